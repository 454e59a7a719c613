//! Audio-fingerprint identification.
//!
//! Pipeline: ffmpeg captures a short snippet of the stream into a scoped
//! temp file, then vibra (Shazam fingerprint CLI) runs against that file as
//! an isolated subprocess.  A crash or leak in either tool cannot take the
//! host process down; the temp file is removed on every exit path by its
//! RAII guard.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How long vibra may run before we give up on it.
const RECOGNIZE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("{0} is not installed")]
    ToolMissing(&'static str),
    #[error("audio capture failed: {0}")]
    CaptureFailed(String),
    #[error("no match")]
    NoMatch,
    #[error("recognizer error: {0}")]
    Malformed(String),
    #[error("could not create capture file: {0}")]
    TempFile(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecognitionResult {
    pub title: String,
    pub artist: Option<String>,
    pub art_url: Option<String>,
    /// Recognizer's own reference page for the track.
    pub external_ref: Option<String>,
}

impl RecognitionResult {
    /// "Artist - Title", or just the title.
    pub fn display(&self) -> String {
        match &self.artist {
            Some(a) => format!("{} - {}", a, self.title),
            None => self.title.clone(),
        }
    }
}

/// One entry in the session log of successful identifications.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifiedTrack {
    pub result: RecognitionResult,
    pub at: DateTime<Local>,
    /// Catalog page resolved asynchronously after the result is shown.
    pub catalog_url: Option<String>,
}

/// Capture `capture_secs` of `stream_url` and identify it.  Blocking from
/// the caller's point of view; run it on a worker task.
pub async fn identify_stream(
    stream_url: &str,
    capture_secs: u32,
) -> Result<RecognitionResult, RecognitionError> {
    let ffmpeg = crate::platform::find_ffmpeg_binary()
        .ok_or(RecognitionError::ToolMissing("ffmpeg"))?;
    let vibra = crate::platform::find_vibra_binary()
        .ok_or(RecognitionError::ToolMissing("vibra"))?;

    let snippet = tempfile::Builder::new()
        .prefix("nightwave-capture-")
        .suffix(".wav")
        .tempfile()?;

    capture_snippet(&ffmpeg, stream_url, capture_secs, snippet.path()).await?;
    identify_file(&vibra, snippet.path()).await
}

/// Record a mono 44.1 kHz WAV snippet of the stream.  Non-zero exit is a
/// recoverable capture failure.
async fn capture_snippet(
    ffmpeg: &Path,
    stream_url: &str,
    secs: u32,
    out: &Path,
) -> Result<(), RecognitionError> {
    info!("capture: {}s of {} -> {}", secs, stream_url, out.display());
    let output = Command::new(ffmpeg)
        .args(["-y", "-t", &secs.to_string(), "-i", stream_url])
        .args(["-vn", "-ac", "1", "-ar", "44100", "-f", "wav"])
        .arg(out)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| RecognitionError::CaptureFailed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().last().unwrap_or("unknown error");
        return Err(RecognitionError::CaptureFailed(tail.to_string()));
    }
    Ok(())
}

/// Run the fingerprint tool against a captured file and parse its output.
async fn identify_file(vibra: &Path, file: &Path) -> Result<RecognitionResult, RecognitionError> {
    debug!("recognize: {} --recognize --file {}", vibra.display(), file.display());
    let mut cmd = Command::new(vibra);
    cmd.args(["--recognize", "--file"])
        .arg(file)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = tokio::time::timeout(RECOGNIZE_TIMEOUT, cmd.output())
        .await
        .map_err(|_| RecognitionError::Malformed("recognizer timed out".into()))?
        .map_err(|e| RecognitionError::Malformed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RecognitionError::Malformed(stderr.trim().to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(stdout.trim())
        .map_err(|e| RecognitionError::Malformed(format!("bad JSON: {}", e)))?;
    parse_track(&json).ok_or(RecognitionError::NoMatch)
}

/// Extract the track object from the recognizer's JSON.  Absence of `track`
/// (or of a usable title) means no match.
pub fn parse_track(json: &serde_json::Value) -> Option<RecognitionResult> {
    let track = json.get("track")?;
    let title = track["title"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())?;
    let artist = track["subtitle"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let art_url = track["images"]["coverart"]
        .as_str()
        .map(|s| s.to_string());
    let external_ref = track["url"].as_str().map(|s| s.to_string());
    Some(RecognitionResult {
        title,
        artist,
        art_url,
        external_ref,
    })
}

// ── catalog enrichment ────────────────────────────────────────────────────────

const MUSICBRAINZ_URL: &str = "https://musicbrainz.org/ws/2/recording";
const USER_AGENT: &str = "nightwave/0.1 (https://github.com/nightwave/nightwave)";

/// Resolve a MusicBrainz recording page for an identified track.  Best
/// effort; failures degrade to no link.
pub async fn lookup_catalog_url(
    client: &reqwest::Client,
    artist: &str,
    title: &str,
) -> Option<String> {
    let query = format!("artist:\"{}\" AND recording:\"{}\"", artist, title);
    let resp = client
        .get(MUSICBRAINZ_URL)
        .query(&[("query", query.as_str()), ("fmt", "json"), ("limit", "1")])
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|e| warn!("catalog lookup failed: {}", e))
        .ok()?;
    let json: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| warn!("catalog response malformed: {}", e))
        .ok()?;
    parse_recording_url(&json)
}

pub fn parse_recording_url(json: &serde_json::Value) -> Option<String> {
    let mbid = json["recordings"][0]["id"].as_str()?;
    Some(format!("https://musicbrainz.org/recording/{}", mbid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_track_full() {
        let json = serde_json::json!({
            "track": {
                "title": "Hey Jude",
                "subtitle": "The Beatles",
                "images": { "coverart": "https://img/cover.jpg" },
                "url": "https://www.shazam.com/track/42"
            }
        });
        let r = parse_track(&json).unwrap();
        assert_eq!(r.title, "Hey Jude");
        assert_eq!(r.artist.as_deref(), Some("The Beatles"));
        assert_eq!(r.art_url.as_deref(), Some("https://img/cover.jpg"));
        assert_eq!(r.external_ref.as_deref(), Some("https://www.shazam.com/track/42"));
        assert_eq!(r.display(), "The Beatles - Hey Jude");
    }

    #[test]
    fn test_parse_track_no_match() {
        assert!(parse_track(&serde_json::json!({"matches": []})).is_none());
    }

    #[test]
    fn test_parse_track_blank_title_is_no_match() {
        let json = serde_json::json!({"track": {"title": "  ", "subtitle": "X"}});
        assert!(parse_track(&json).is_none());
    }

    #[test]
    fn test_parse_track_title_only() {
        let json = serde_json::json!({"track": {"title": "Interlude"}});
        let r = parse_track(&json).unwrap();
        assert!(r.artist.is_none());
        assert_eq!(r.display(), "Interlude");
    }

    #[test]
    fn test_parse_recording_url() {
        let json = serde_json::json!({
            "recordings": [ { "id": "abcd-1234" } ]
        });
        assert_eq!(
            parse_recording_url(&json).as_deref(),
            Some("https://musicbrainz.org/recording/abcd-1234")
        );
        assert!(parse_recording_url(&serde_json::json!({"recordings": []})).is_none());
    }
}
