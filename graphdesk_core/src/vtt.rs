//! WebVTT transcript parsing for Teams meeting transcripts.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static VOICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<v(?:\.[^\s>]*)?\s+([^>]*)>").expect("voice regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub start: String,
    pub end: String,
    pub speaker: Option<String>,
    pub text: String,
}

/// Consecutive cues of one speaker folded together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub speaker: String,
    pub start: String,
    pub end: String,
    pub text: String,
}

pub const UNKNOWN_SPEAKER: &str = "Unknown";

pub fn parse_vtt(input: &str) -> Vec<Cue> {
    let normalized = input.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in normalized.split("\n\n") {
        let lines: Vec<&str> = block.lines().collect();
        let Some(timing_idx) = lines.iter().position(|l| l.contains("-->")) else {
            continue;
        };
        let mut parts = lines[timing_idx].splitn(2, "-->");
        let start = parts.next().unwrap_or("").trim().to_string();
        // Cue settings may follow the end timestamp.
        let end = parts
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or("")
            .to_string();

        let payload = lines[timing_idx + 1..]
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let speaker = VOICE_RE
            .captures(&payload)
            .map(|c| c[1].trim().to_string())
            .filter(|s| !s.is_empty());
        let text = html_escape::decode_html_entities(TAG_RE.replace_all(&payload, "").trim())
            .into_owned();
        if text.is_empty() {
            continue;
        }
        cues.push(Cue {
            start,
            end,
            speaker,
            text,
        });
    }
    cues
}

pub fn merge_turns(cues: Vec<Cue>) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();
    for cue in cues {
        let speaker = cue
            .speaker
            .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string());
        match turns.last_mut() {
            Some(last) if last.speaker == speaker => {
                last.text.push(' ');
                last.text.push_str(&cue.text);
                last.end = cue.end;
            }
            _ => turns.push(Turn {
                speaker,
                start: cue.start,
                end: cue.end,
                text: cue.text,
            }),
        }
    }
    turns
}

/// Distinct speakers in order of first appearance.
pub fn speakers(turns: &[Turn]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for t in turns {
        if !seen.contains(&t.speaker) {
            seen.push(t.speaker.clone());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "WEBVTT\r\n\r\nNOTE exported by Teams\r\n\r\n0f1c6b1e-1/12-0\r\n00:00:03.120 --> 00:00:05.900 align:start\r\n<v Adele Vance>Morning everyone.</v>\r\n\r\n0f1c6b1e-1/13-0\r\n00:00:06.000 --> 00:00:08.250\r\n<v Adele Vance>Let's start with the budget &amp; timeline.</v>\r\n\r\n00:00:09.000 --> 00:00:10.000\r\n<v Megan Bowen>Sounds good.</v>\r\n\r\n00:00:11.000 --> 00:00:12.000\r\nno voice tag here\r\n";

    #[test]
    fn parses_cues_with_identifiers_and_settings() {
        let cues = parse_vtt(SAMPLE);
        assert_eq!(cues.len(), 4);
        assert_eq!(cues[0].start, "00:00:03.120");
        assert_eq!(cues[0].end, "00:00:05.900");
        assert_eq!(cues[0].speaker.as_deref(), Some("Adele Vance"));
        assert_eq!(cues[1].text, "Let's start with the budget & timeline.");
        assert!(cues[3].speaker.is_none());
    }

    #[test]
    fn merges_consecutive_turns_of_one_speaker() {
        let turns = merge_turns(parse_vtt(SAMPLE));
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].speaker, "Adele Vance");
        assert_eq!(
            turns[0].text,
            "Morning everyone. Let's start with the budget & timeline."
        );
        assert_eq!(turns[0].end, "00:00:08.250");
        assert_eq!(turns[2].speaker, UNKNOWN_SPEAKER);
        assert_eq!(
            speakers(&turns),
            vec!["Adele Vance", "Megan Bowen", UNKNOWN_SPEAKER]
        );
    }
}
