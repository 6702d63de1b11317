use crate::cli::{Cli, DriveAction};
use crate::commands::{run_tool, Args, Result};

/// Handles (`f3`) and bare item ids download by id; anything with a path
/// separator or an extension is a drive path.
fn download_key(target: &str) -> &'static str {
    let target = target.trim();
    if target.contains('/') || target.contains('.') {
        "path"
    } else {
        "item_id"
    }
}

pub async fn run(cli: &Cli, action: &DriveAction) -> Result<()> {
    let (tool, args) = match action {
        DriveAction::Ls { path, limit } => (
            "drive_list",
            Args::new().opt("path", path.clone()).opt("limit", *limit),
        ),
        DriveAction::Upload {
            local_path,
            remote_path,
        } => (
            "drive_upload",
            Args::new()
                .set("local_path", local_path.as_str())
                .opt("remote_path", remote_path.clone()),
        ),
        DriveAction::Download { target, dest } => (
            "drive_download",
            Args::new()
                .set(download_key(target), target.as_str())
                .opt("destination", dest.clone()),
        ),
    };
    run_tool(cli, tool, args.build()).await
}
