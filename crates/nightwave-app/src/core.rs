//! The orchestrator.  One task owns every piece of mutable state — the
//! current session, the displayed now-playing record, the art cache, the
//! identified-track list, the in-flight-recognition flag — and consumes a
//! single event channel that every external input funnels into: engine
//! events, control commands, poll ticks, timer firings and worker results.
//!
//! Workers never touch state; they send immutable values here.  Late results
//! for a session that is no longer current are detected by identity checks
//! at apply time and dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::art::{ArtImage, ArtResolver};
use crate::engine::EngineEvent;
use crate::sink::PresentationSink;
use nightwave_core::feed::{self, FeedEntry};
use nightwave_core::normalize::clean_title;
use nightwave_core::protocol::ControlCommand;
use nightwave_core::recognition::{IdentifiedTrack, RecognitionError, RecognitionResult};
use nightwave_core::station::{neighbor_of, Station, StationStore};

/// Remote feed polling cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Quiet window coalescing a burst of discontinuity signals.
const DISCONTINUITY_DEBOUNCE: Duration = Duration::from_secs(2);
/// How long a recognition result stays on screen before reverting.
const RECOGNITION_DISPLAY: Duration = Duration::from_secs(10);
/// Cover art is downscaled to fit this box.
const ART_TARGET_SIZE: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Connecting,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NowPlayingSource {
    Inband,
    Remote,
    Recognition,
    StationFallback,
}

/// Immutable display snapshot; replaced wholesale, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingInfo {
    pub title: String,
    pub artist: Option<String>,
    pub art_url: Option<String>,
    pub source: NowPlayingSource,
}

impl NowPlayingInfo {
    fn station_fallback(station: &Station) -> Self {
        Self {
            title: station.name.clone(),
            artist: None,
            art_url: station.art_url.clone(),
            source: NowPlayingSource::StationFallback,
        }
    }
}

#[derive(Debug)]
pub struct PlaybackSession {
    pub station: Station,
    pub state: PlaybackState,
    /// True when the station is hosted on the remote feed's domain: inband
    /// metadata is ignored and the feed is polled instead.
    pub remote_tracked: bool,
}

/// Saved display restored when a recognition override expires.
struct RecognitionOverlay {
    prev: NowPlayingInfo,
    session_url: String,
}

/// Everything that can happen, serialized into the orchestrator.
#[derive(Debug)]
pub enum AppEvent {
    Engine(EngineEvent),
    Control(ControlCommand),
    /// Regular polling cadence tick.
    PollTick,
    /// The discontinuity debounce window elapsed.
    DebounceFired,
    /// Remote feed response; `requested_for` is the stream URL the session
    /// had when the request was issued.
    FeedArrived {
        requested_for: String,
        entries: Vec<FeedEntry>,
    },
    /// Track-art lookup finished for an inband title.
    TrackArtLooked {
        title: String,
        art_url: Option<String>,
    },
    ArtResolved {
        key: String,
        image: Option<Arc<ArtImage>>,
    },
    RecognizeRequested,
    RecognitionDone {
        for_url: String,
        outcome: Result<RecognitionResult, RecognitionError>,
    },
    /// The recognition display window elapsed.
    RecognitionRevert,
    /// Catalog enrichment finished for an identified track.
    TrackEnriched {
        index: usize,
        catalog_url: Option<String>,
    },
    SetVolume(f32),
}

// ── worker seams ──────────────────────────────────────────────────────────────

/// Playback engine surface.  Calls are fire-and-forget; outcomes are
/// observed through engine events.
pub trait PlayerControl: Send {
    fn play(&self, url: &str);
    fn toggle_pause(&self);
    fn set_volume(&self, percent: f32);
}

/// Remote now-playing poller.  The response arrives as
/// [`AppEvent::FeedArrived`]; fetch failures degrade to "no update".
pub trait RemoteFeed: Send {
    fn request(&self, requested_for: String);
}

/// Fingerprint identification worker.
pub trait Recognizer: Send {
    fn start(&self, stream_url: String);
    fn enrich(&self, index: usize, artist: String, title: String);
}

// ── orchestrator ──────────────────────────────────────────────────────────────

pub struct AppCore {
    player: Box<dyn PlayerControl>,
    feed: Box<dyn RemoteFeed>,
    recognizer: Box<dyn Recognizer>,
    sink: Box<dyn PresentationSink>,
    stations: Box<dyn StationStore>,
    art: ArtResolver,
    /// Host of the remote feed endpoint; streams on this domain are remote
    /// tracked.  None disables remote tracking.
    feed_host: Option<String>,
    event_tx: mpsc::Sender<AppEvent>,

    session: Option<PlaybackSession>,
    display: Option<NowPlayingInfo>,
    last_inband_raw: Option<String>,
    /// Normalized title → looked-up art URL (None = lookup found nothing).
    track_art_memo: HashMap<String, Option<String>>,
    overlay: Option<RecognitionOverlay>,
    recognizing: bool,
    identified: Vec<IdentifiedTrack>,
    debounce: Option<JoinHandle<()>>,
}

impl AppCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        player: Box<dyn PlayerControl>,
        feed: Box<dyn RemoteFeed>,
        recognizer: Box<dyn Recognizer>,
        art: ArtResolver,
        sink: Box<dyn PresentationSink>,
        stations: Box<dyn StationStore>,
        feed_host: Option<String>,
        event_tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        Self {
            player,
            feed,
            recognizer,
            sink,
            stations,
            art,
            feed_host,
            event_tx,
            session: None,
            display: None,
            last_inband_raw: None,
            track_art_memo: HashMap::new(),
            overlay: None,
            recognizing: false,
            identified: Vec::new(),
            debounce: None,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<AppEvent>) {
        info!("orchestrator running");
        while let Some(ev) = rx.recv().await {
            self.handle_event(ev).await;
        }
        info!("orchestrator stopped: event channel closed");
    }

    async fn handle_event(&mut self, ev: AppEvent) {
        match ev {
            AppEvent::Engine(ev) => self.handle_engine(ev),
            AppEvent::Control(cmd) => self.handle_control(cmd),
            AppEvent::PollTick => self.poll_feed(),
            AppEvent::DebounceFired => {
                self.debounce = None;
                debug!("discontinuity debounce elapsed, forcing feed refresh");
                self.poll_feed();
            }
            AppEvent::FeedArrived {
                requested_for,
                entries,
            } => self.apply_feed(requested_for, entries),
            AppEvent::TrackArtLooked { title, art_url } => self.apply_track_art(title, art_url),
            AppEvent::ArtResolved { key, image } => {
                if let Some(img) = self.art.complete(key.clone(), image) {
                    self.sink.on_art_resolved(&key, Some(&img));
                }
                // failure is a silent no-op: no art is shown, nothing retried
            }
            AppEvent::RecognizeRequested => self.request_recognition(),
            AppEvent::RecognitionDone { for_url, outcome } => {
                self.apply_recognition(for_url, outcome)
            }
            AppEvent::RecognitionRevert => self.revert_recognition(),
            AppEvent::TrackEnriched { index, catalog_url } => {
                if let Some(track) = self.identified.get_mut(index) {
                    track.catalog_url = catalog_url;
                }
            }
            AppEvent::SetVolume(percent) => self.player.set_volume(percent.clamp(0.0, 100.0)),
        }
    }

    // ── tuning ────────────────────────────────────────────────────────────────

    /// Start playing a station.  Tuning to the station already current is a
    /// no-op.
    pub fn tune(&mut self, station: Station) {
        if let Some(session) = &self.session {
            if session.station.url == station.url {
                debug!("already tuned to {}", station.url);
                return;
            }
        }

        info!("tuning into {} ({})", station.name, station.url);
        let remote_tracked = self
            .feed_host
            .as_deref()
            .map(|host| station.url.contains(host))
            .unwrap_or(false);

        // a pending override or debounce belongs to the old session
        self.overlay = None;
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
        self.last_inband_raw = None;

        self.player.play(&station.url);
        let fallback = NowPlayingInfo::station_fallback(&station);
        self.session = Some(PlaybackSession {
            station,
            state: PlaybackState::Connecting,
            remote_tracked,
        });
        self.sink.on_playback_state_changed(PlaybackState::Connecting);
        self.publish(fallback.clone());
        if let Some(url) = &fallback.art_url {
            self.resolve_art(&url.clone());
        }
    }

    fn handle_control(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::PlayPause => {
                if self.session.is_some() {
                    self.player.toggle_pause();
                }
            }
            ControlCommand::NextStation => self.tune_neighbor(1),
            ControlCommand::PrevStation => self.tune_neighbor(-1),
        }
    }

    fn tune_neighbor(&mut self, offset: isize) {
        let list = self.stations.list();
        let current = self.session.as_ref().map(|s| s.station.url.clone());
        if let Some(station) = neighbor_of(&list, current.as_deref(), offset) {
            self.tune(station.clone());
        }
    }

    // ── engine events ─────────────────────────────────────────────────────────

    fn handle_engine(&mut self, ev: EngineEvent) {
        match ev {
            EngineEvent::Metadata(raw) => self.apply_inband(raw),
            EngineEvent::Discontinuity => self.schedule_forced_poll(),
            EngineEvent::CoreIdle(idle) => {
                let Some(state) = self.session.as_ref().map(|s| s.state) else {
                    return;
                };
                if !idle && state != PlaybackState::Paused {
                    self.set_state(PlaybackState::Playing);
                } else if idle && state == PlaybackState::Playing {
                    self.set_state(PlaybackState::Connecting);
                }
            }
            EngineEvent::PauseChanged(paused) => {
                let Some(state) = self.session.as_ref().map(|s| s.state) else {
                    return;
                };
                if paused {
                    self.set_state(PlaybackState::Paused);
                } else if state == PlaybackState::Paused {
                    self.set_state(PlaybackState::Playing);
                }
            }
            EngineEvent::Ended => {
                if let Some(session) = self.session.take() {
                    info!("stream ended: {}", session.station.url);
                    self.overlay = None;
                    if let Some(handle) = self.debounce.take() {
                        handle.abort();
                    }
                    self.sink.on_playback_state_changed(PlaybackState::Stopped);
                }
            }
        }
    }

    fn apply_inband(&mut self, raw: String) {
        let Some(session) = &self.session else { return };
        // Remote-tracked streams carry noisy or absent inband metadata; the
        // polled feed is authoritative for them.
        if session.remote_tracked {
            return;
        }
        if self.last_inband_raw.as_deref() == Some(raw.as_str()) {
            return;
        }
        self.last_inband_raw = Some(raw.clone());

        let title = clean_title(&raw);
        debug!("inband metadata: {:?} -> {:?}", raw, title);
        self.publish(NowPlayingInfo {
            title: title.clone(),
            artist: None,
            art_url: None,
            source: NowPlayingSource::Inband,
        });

        match self.track_art_memo.get(&title).cloned() {
            Some(Some(url)) => self.resolve_art(&url),
            Some(None) => self.resolve_station_art(),
            None => self.art.lookup_track(&title),
        }
    }

    fn schedule_forced_poll(&mut self) {
        let Some(session) = &self.session else { return };
        if !session.remote_tracked {
            return;
        }
        // replace, don't stack: a burst of discontinuities becomes one refresh
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
        debug!("discontinuity: scheduling forced feed refresh");
        let tx = self.event_tx.clone();
        self.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(DISCONTINUITY_DEBOUNCE).await;
            let _ = tx.send(AppEvent::DebounceFired).await;
        }));
    }

    // ── remote feed ───────────────────────────────────────────────────────────

    fn poll_feed(&mut self) {
        let Some(session) = &self.session else { return };
        if !session.remote_tracked {
            return;
        }
        self.feed.request(session.station.url.clone());
    }

    fn apply_feed(&mut self, requested_for: String, entries: Vec<FeedEntry>) {
        let Some(session) = &self.session else { return };
        // identity check at apply time: a response that raced a station
        // switch is dropped, not logged as an error
        if !session.remote_tracked || session.station.url != requested_for {
            debug!("dropping feed response for superseded session");
            return;
        }
        let Some(id) = session.station.remote_id else {
            warn!("station {} has no remote id, cannot match feed", session.station.name);
            return;
        };
        let Some(song) = feed::match_station(&entries, id) else {
            debug!("feed has no entry for station id {}", id);
            return;
        };
        if song.text.is_empty() {
            return;
        }

        let art_url = song.art.clone();
        self.publish(NowPlayingInfo {
            title: song.text.clone(),
            artist: None,
            art_url: art_url.clone(),
            source: NowPlayingSource::Remote,
        });
        match art_url {
            Some(url) => self.resolve_art(&url),
            None => self.resolve_station_art(),
        }
    }

    // ── art ───────────────────────────────────────────────────────────────────

    fn resolve_art(&mut self, key: &str) {
        if let Some(img) = self.art.resolve(key, Some(ART_TARGET_SIZE)) {
            self.sink.on_art_resolved(key, Some(&img));
        }
    }

    fn resolve_station_art(&mut self) {
        let art = self
            .session
            .as_ref()
            .and_then(|s| s.station.art_url.clone());
        if let Some(url) = art {
            self.resolve_art(&url);
        }
    }

    fn apply_track_art(&mut self, title: String, art_url: Option<String>) {
        self.track_art_memo.insert(title.clone(), art_url.clone());
        // only act if this title is still what's displayed
        let current = self
            .display
            .as_ref()
            .filter(|d| d.source == NowPlayingSource::Inband && d.title == title);
        if current.is_none() {
            return;
        }
        match art_url {
            Some(url) => self.resolve_art(&url),
            None => self.resolve_station_art(),
        }
    }

    // ── recognition ───────────────────────────────────────────────────────────

    fn request_recognition(&mut self) {
        let Some(session) = &self.session else {
            self.sink.on_transient_message("Play a station first");
            return;
        };
        if self.recognizing {
            // admission-rejected, not an error state
            self.sink
                .on_transient_message("Identification already in progress");
            return;
        }
        self.recognizing = true;
        self.sink.on_transient_message("Listening (approx. 10s)...");
        self.recognizer.start(session.station.url.clone());
    }

    fn apply_recognition(
        &mut self,
        for_url: String,
        outcome: Result<RecognitionResult, RecognitionError>,
    ) {
        self.recognizing = false;
        let Some(session) = &self.session else { return };
        if session.station.url != for_url {
            debug!("dropping recognition result for superseded session");
            return;
        }

        let result = match outcome {
            Ok(result) => result,
            Err(RecognitionError::NoMatch) => {
                self.sink.on_transient_message("Could not identify song");
                return;
            }
            Err(e) => {
                warn!("recognition failed: {}", e);
                self.sink.on_transient_message(&format!("Identification failed: {}", e));
                return;
            }
        };

        info!("identified: {}", result.display());
        self.sink
            .on_transient_message(&format!("Found: {}", result.display()));

        // timed override: stash what's displayed, revert after the window
        let prev = self
            .display
            .clone()
            .unwrap_or_else(|| NowPlayingInfo::station_fallback(&session.station));
        self.overlay = Some(RecognitionOverlay {
            prev,
            session_url: for_url,
        });

        let info = NowPlayingInfo {
            title: result.title.clone(),
            artist: result.artist.clone(),
            art_url: result.art_url.clone(),
            source: NowPlayingSource::Recognition,
        };
        self.publish(info);
        if let Some(url) = &result.art_url {
            self.resolve_art(&url.clone());
        }

        let index = self.identified.len();
        let track = IdentifiedTrack {
            result: result.clone(),
            at: chrono::Local::now(),
            catalog_url: None,
        };
        self.sink.on_identified_track_added(&track);
        self.identified.push(track);
        if let Some(artist) = result.artist {
            self.recognizer.enrich(index, artist, result.title);
        }

        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RECOGNITION_DISPLAY).await;
            let _ = tx.send(AppEvent::RecognitionRevert).await;
        });
    }

    /// The revert timer always fires; whether it still applies is decided
    /// here.
    fn revert_recognition(&mut self) {
        let Some(overlay) = self.overlay.take() else { return };
        let current = self.session.as_ref().map(|s| s.station.url.as_str());
        if current != Some(overlay.session_url.as_str()) {
            return;
        }
        debug!("recognition display window elapsed, restoring previous info");
        let prev = overlay.prev;
        self.publish(prev.clone());
        if let Some(url) = &prev.art_url {
            self.resolve_art(&url.clone());
        }
    }

    // ── publishing ────────────────────────────────────────────────────────────

    fn publish(&mut self, info: NowPlayingInfo) {
        // any non-recognition publish supersedes a pending override; the
        // revert timer will find nothing to restore
        if info.source != NowPlayingSource::Recognition {
            self.overlay = None;
        }
        self.display = Some(info.clone());
        self.sink.on_now_playing(&info);
    }

    fn set_state(&mut self, state: PlaybackState) {
        if let Some(session) = &mut self.session {
            if session.state != state {
                session.state = state;
                self.sink.on_playback_state_changed(state);
            }
        }
    }

    #[cfg(test)]
    fn display(&self) -> Option<&NowPlayingInfo> {
        self.display.as_ref()
    }

    #[cfg(test)]
    fn identified(&self) -> &[IdentifiedTrack] {
        &self.identified
    }
}
