//! OneDrive listing, download and upload (simple PUT or upload session).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::ConnectorError;
use crate::graph::{collect_pages, GraphContext, GraphUrl};
use crate::id_cache::{HandleKind, IdCache};

/// Largest body Graph accepts on a simple content PUT.
pub const SIMPLE_UPLOAD_LIMIT: usize = 4 * 1024 * 1024;
/// Upload-session chunks must be multiples of 320 KiB.
pub const CHUNK_UNIT: usize = 320 * 1024;
pub const DEFAULT_CHUNK: usize = 10 * CHUNK_UNIT;
const MAX_LIST: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    #[serde(default)]
    pub child_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub folder: Option<FolderFacet>,
    #[serde(default)]
    pub file: Option<FileFacet>,
    #[serde(default)]
    pub last_modified_date_time: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    pub fn summary(&self, ids: &IdCache) -> DriveEntry {
        DriveEntry {
            handle: ids.remember(HandleKind::DriveItem, &self.id),
            id: self.id.clone(),
            name: self.name.clone(),
            kind: if self.is_folder() { "folder" } else { "file" }.to_string(),
            size: self.size,
            children: self.folder.as_ref().and_then(|f| f.child_count),
            mime_type: self.file.as_ref().and_then(|f| f.mime_type.clone()),
            modified: self.last_modified_date_time.clone(),
            web_url: self.web_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveEntry {
    pub handle: String,
    pub id: String,
    pub name: String,
    pub kind: String,
    pub size: Option<u64>,
    pub children: Option<u64>,
    pub mime_type: Option<String>,
    pub modified: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriveListInput {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriveDownloadInput {
    /// Item id or handle.
    #[serde(default)]
    pub item_id: Option<String>,
    /// Path inside the drive, e.g. `Reports/q1.xlsx`.
    #[serde(default)]
    pub path: Option<String>,
    /// Local file or directory; defaults to the current directory.
    #[serde(default)]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriveUploadInput {
    pub local_path: String,
    /// Drive folder (trailing `/`) or full target path; defaults to the root.
    #[serde(default)]
    pub remote_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriveListing {
    pub path: String,
    pub count: usize,
    pub files: Vec<DriveEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub id: String,
    pub name: String,
    pub bytes: usize,
    pub saved_to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub id: Option<String>,
    pub name: String,
    pub remote_path: String,
    pub bytes: usize,
    pub method: String,
    pub chunks: usize,
}

fn drive_url(ctx: &GraphContext) -> GraphUrl {
    ctx.url().segment("drive")
}

fn clean_path(path: Option<&str>) -> Option<String> {
    path.map(|p| p.trim().trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
}

/// Folders first, then case-insensitive by name.
pub fn sort_entries(items: &mut [DriveItem]) {
    items.sort_by(|a, b| {
        b.is_folder()
            .cmp(&a.is_folder())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

pub async fn list(ctx: &GraphContext, input: DriveListInput) -> Result<DriveListing, ConnectorError> {
    let path = clean_path(input.path.as_deref());
    let url = match &path {
        Some(p) => drive_url(ctx).drive_path(p, "/children"),
        None => drive_url(ctx).segment("root").segment("children"),
    };
    let cap = input.limit.unwrap_or(200).clamp(1, MAX_LIST);
    let collected = collect_pages(
        ctx.transport.as_ref(),
        &url.top(cap.min(200)).build(),
        cap,
        cap.div_ceil(200) + 1,
    )
    .await?;
    let mut items: Vec<DriveItem> = collected
        .items
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();
    sort_entries(&mut items);
    let files: Vec<DriveEntry> = items.iter().map(|i| i.summary(&ctx.ids)).collect();
    Ok(DriveListing {
        path: format!("/{}", path.unwrap_or_default()),
        count: files.len(),
        files,
    })
}

pub async fn download(
    ctx: &GraphContext,
    input: DriveDownloadInput,
) -> Result<DownloadResult, ConnectorError> {
    let item_url = match (
        input.item_id.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        clean_path(input.path.as_deref()),
    ) {
        (Some(id), _) => drive_url(ctx).segment("items").segment(ctx.ids.resolve(id)),
        (None, Some(path)) => drive_url(ctx).drive_path(&path, ""),
        (None, None) => {
            return Err(ConnectorError::InvalidParams(
                "provide item_id or path".to_string(),
            ))
        }
    };

    let meta = ctx.get(&item_url).await?;
    let item: DriveItem = serde_json::from_value(meta)?;
    if item.is_folder() {
        return Err(ConnectorError::InvalidInput(format!(
            "'{}' is a folder",
            item.name
        )));
    }

    let content_url = drive_url(ctx)
        .segment("items")
        .segment(&item.id)
        .segment("content")
        .build();
    let bytes = ctx.transport.get_bytes(&content_url).await?;

    let target = resolve_destination(input.destination.as_deref(), &item.name).await;
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, &bytes).await?;
    info!(name = %item.name, bytes = bytes.len(), "downloaded drive item");
    ctx.ids.remember(HandleKind::DriveItem, &item.id);

    Ok(DownloadResult {
        id: item.id,
        name: item.name,
        bytes: bytes.len(),
        saved_to: target.display().to_string(),
    })
}

async fn resolve_destination(destination: Option<&str>, name: &str) -> PathBuf {
    match destination.map(str::trim).filter(|d| !d.is_empty()) {
        Some(d) => {
            let p = PathBuf::from(d);
            let is_dir = d.ends_with('/')
                || tokio::fs::metadata(&p)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
            if is_dir {
                p.join(name)
            } else {
                p
            }
        }
        None => PathBuf::from(name),
    }
}

/// Target path in the drive for an upload of `local`.
pub fn remote_target(local: &Path, remote: Option<&str>) -> Result<String, ConnectorError> {
    let file_name = local
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ConnectorError::InvalidParams("local_path has no file name".to_string()))?;
    Ok(match remote.map(str::trim).filter(|r| !r.is_empty()) {
        Some(r) if r.ends_with('/') => {
            let folder = r.trim_matches('/');
            if folder.is_empty() {
                file_name.to_string()
            } else {
                format!("{}/{}", folder, file_name)
            }
        }
        Some(r) => r.trim_matches('/').to_string(),
        None => file_name.to_string(),
    })
}

pub async fn upload(ctx: &GraphContext, input: DriveUploadInput) -> Result<UploadResult, ConnectorError> {
    upload_with_chunk(ctx, input, DEFAULT_CHUNK).await
}

pub async fn upload_with_chunk(
    ctx: &GraphContext,
    input: DriveUploadInput,
    chunk_size: usize,
) -> Result<UploadResult, ConnectorError> {
    let local = PathBuf::from(input.local_path.trim());
    let remote = remote_target(&local, input.remote_path.as_deref())?;
    let data = tokio::fs::read(&local).await?;
    let total = data.len();
    let name = remote.rsplit('/').next().unwrap_or(&remote).to_string();

    if total <= SIMPLE_UPLOAD_LIMIT {
        let url = drive_url(ctx).drive_path(&remote, "/content").build();
        let created = ctx
            .transport
            .put_bytes(&url, data, "application/octet-stream")
            .await?;
        return Ok(finish_upload(ctx, created, name, remote, total, "simple", 1));
    }

    // Round down to a 320 KiB multiple, never below one unit.
    let chunk = (chunk_size / CHUNK_UNIT).max(1) * CHUNK_UNIT;
    let session_url = drive_url(ctx)
        .drive_path(&remote, "/createUploadSession")
        .build();
    let session = ctx
        .transport
        .post_json(
            &session_url,
            &json!({"item": {"@microsoft.graph.conflictBehavior": "replace"}}),
        )
        .await?;
    let upload_url = session
        .get("uploadUrl")
        .and_then(Value::as_str)
        .ok_or_else(|| ConnectorError::Other("upload session without uploadUrl".to_string()))?
        .to_string();

    let mut last = Value::Null;
    let mut chunks = 0;
    for (i, part) in data.chunks(chunk).enumerate() {
        let start = i * chunk;
        let end = start + part.len() - 1;
        let range = format!("bytes {}-{}/{}", start, end, total);
        debug!(%range, "uploading chunk");
        last = ctx
            .transport
            .put_chunk(&upload_url, part.to_vec(), &range)
            .await?;
        chunks += 1;
    }
    Ok(finish_upload(ctx, last, name, remote, total, "session", chunks))
}

fn finish_upload(
    ctx: &GraphContext,
    created: Value,
    name: String,
    remote: String,
    bytes: usize,
    method: &str,
    chunks: usize,
) -> UploadResult {
    let id = created
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(id) = &id {
        ctx.ids.remember(HandleKind::DriveItem, id);
    }
    info!(%remote, bytes, method, "uploaded drive item");
    UploadResult {
        id,
        name,
        remote_path: format!("/{}", remote),
        bytes,
        method: method.to_string(),
        chunks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::{context, FakeGraph, Reply};

    #[tokio::test]
    async fn listing_puts_folders_first() {
        let fake = FakeGraph::new().json(
            "root:/Reports:/children",
            json!({"value": [
                {"id": "3", "name": "zeta.txt", "size": 10, "file": {"mimeType": "text/plain"}},
                {"id": "1", "name": "Archive", "folder": {"childCount": 4}},
                {"id": "2", "name": "alpha.docx", "size": 20, "file": {}}
            ]}),
        );
        let (ctx, _fake) = context(fake);
        let listing = list(
            &ctx,
            DriveListInput {
                path: Some("/Reports/".into()),
                limit: None,
            },
        )
        .await
        .unwrap();
        let names: Vec<&str> = listing.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Archive", "alpha.docx", "zeta.txt"]);
        assert_eq!(listing.files[0].kind, "folder");
        assert_eq!(listing.path, "/Reports");
    }

    #[tokio::test]
    async fn download_writes_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeGraph::new()
            .on("items/ITEM1/content", Reply::Bytes(b"hello drive".to_vec()))
            .json("items/ITEM1", json!({"id": "ITEM1", "name": "notes.txt", "file": {}}));
        let (ctx, _fake) = context(fake);
        let result = download(
            &ctx,
            DriveDownloadInput {
                item_id: Some("ITEM1".into()),
                path: None,
                destination: Some(dir.path().display().to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(result.bytes, 11);
        let written = std::fs::read_to_string(dir.path().join("notes.txt")).unwrap();
        assert_eq!(written, "hello drive");
    }

    #[tokio::test]
    async fn small_files_use_simple_put() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("plan.txt");
        std::fs::write(&local, b"small").unwrap();
        let fake = FakeGraph::new().json(
            "root:/Docs/plan.txt:/content",
            json!({"id": "NEW1", "name": "plan.txt"}),
        );
        let (ctx, fake) = context(fake);
        let result = upload(
            &ctx,
            DriveUploadInput {
                local_path: local.display().to_string(),
                remote_path: Some("Docs/".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(result.method, "simple");
        assert_eq!(result.id.as_deref(), Some("NEW1"));
        assert_eq!(fake.uploads.lock().unwrap()[0].1, 5);
    }

    #[tokio::test]
    async fn large_files_go_through_an_upload_session() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("big.bin");
        let total = SIMPLE_UPLOAD_LIMIT + 1000;
        std::fs::write(&local, vec![7u8; total]).unwrap();
        let fake = FakeGraph::new().json(
            "createUploadSession",
            json!({"uploadUrl": "https://upload.test/session/1"}),
        );
        let (ctx, fake) = context(fake);
        let result = upload_with_chunk(
            &ctx,
            DriveUploadInput {
                local_path: local.display().to_string(),
                remote_path: None,
            },
            CHUNK_UNIT * 8 + 5,
        )
        .await
        .unwrap();
        assert_eq!(result.method, "session");
        assert_eq!(result.chunks, 2);
        assert_eq!(result.id.as_deref(), Some("uploaded-item"));

        let uploads = fake.uploads.lock().unwrap();
        let chunk = CHUNK_UNIT * 8;
        assert_eq!(uploads[0].2, format!("bytes 0-{}/{}", chunk - 1, total));
        assert_eq!(
            uploads[1].2,
            format!("bytes {}-{}/{}", chunk, total - 1, total)
        );
        assert!(uploads.iter().all(|(url, _, _)| url == "https://upload.test/session/1"));
    }

    #[test]
    fn remote_targets() {
        let local = Path::new("/tmp/report.pdf");
        assert_eq!(remote_target(local, None).unwrap(), "report.pdf");
        assert_eq!(remote_target(local, Some("/")).unwrap(), "report.pdf");
        assert_eq!(remote_target(local, Some("Docs/Q1/")).unwrap(), "Docs/Q1/report.pdf");
        assert_eq!(remote_target(local, Some("/Docs/final.pdf")).unwrap(), "Docs/final.pdf");
    }
}
