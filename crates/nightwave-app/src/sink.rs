//! Presentation boundary.  The visual shell lives outside this crate; the
//! orchestrator only ever talks to it through this narrow interface.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::art::ArtImage;
use crate::core::{NowPlayingInfo, PlaybackState};
use nightwave_core::recognition::IdentifiedTrack;

pub trait PresentationSink: Send {
    fn on_now_playing(&self, info: &NowPlayingInfo);
    fn on_art_resolved(&self, key: &str, image: Option<&Arc<ArtImage>>);
    fn on_playback_state_changed(&self, state: PlaybackState);
    fn on_identified_track_added(&self, track: &IdentifiedTrack);
    /// Toast / status line material.
    fn on_transient_message(&self, text: &str);
}

/// Headless sink: traces every event and mirrors the current title into
/// `now_playing.txt` so external tools (bars, widgets) can read it.
pub struct LogSink {
    now_playing_file: PathBuf,
}

impl LogSink {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            now_playing_file: data_dir.join("now_playing.txt"),
        }
    }
}

impl PresentationSink for LogSink {
    fn on_now_playing(&self, info: &NowPlayingInfo) {
        let line = match &info.artist {
            Some(artist) => format!("{} - {}", artist, info.title),
            None => info.title.clone(),
        };
        info!("now playing [{:?}]: {}", info.source, line);
        if let Err(e) = std::fs::write(&self.now_playing_file, &line) {
            warn!("could not write {}: {}", self.now_playing_file.display(), e);
        }
    }

    fn on_art_resolved(&self, key: &str, image: Option<&Arc<ArtImage>>) {
        match image {
            Some(img) => info!("art resolved: {} ({}x{})", key, img.width(), img.height()),
            None => info!("art resolved: {} (none)", key),
        }
    }

    fn on_playback_state_changed(&self, state: PlaybackState) {
        info!("playback state: {:?}", state);
    }

    fn on_identified_track_added(&self, track: &IdentifiedTrack) {
        info!("identified: {}", track.result.display());
    }

    fn on_transient_message(&self, text: &str) {
        info!("{}", text);
    }
}
