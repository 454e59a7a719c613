//! Cover-art resolution: a one-shot-per-key cache over a fetch/decode
//! pipeline, plus the track-title → art-URL lookup feeding it.
//!
//! Decoded images are cached under the *original* key (pre-redirect), so a
//! repeated resolve never refetches.  Failures deliver none and are never
//! retried.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::AppEvent;

pub type ArtImage = image::DynamicImage;

pub const ART_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

const ITUNES_SEARCH_URL: &str = "https://itunes.apple.com/search";

/// Fetch side of the resolver.  Implementations run off-thread and report
/// back through the orchestrator channel; tests substitute a counting fake.
pub trait ArtFetcher: Send {
    /// Resolve `key` (URL or local path) to a decoded image, delivered as
    /// [`AppEvent::ArtResolved`].
    fn fetch_image(&self, key: String, target: Option<u32>);
    /// Look up cover art for a track title, delivered as
    /// [`AppEvent::TrackArtLooked`].
    fn lookup_track_art(&self, title: String);
}

pub struct ArtResolver {
    cache: HashMap<String, Arc<ArtImage>>,
    fetcher: Box<dyn ArtFetcher>,
}

impl ArtResolver {
    pub fn new(fetcher: Box<dyn ArtFetcher>) -> Self {
        Self {
            cache: HashMap::new(),
            fetcher,
        }
    }

    /// Cache hit returns the image immediately; a miss kicks off a fetch
    /// whose result arrives later as an event.  Concurrent resolves of the
    /// same key are allowed to duplicate work.
    pub fn resolve(&mut self, key: &str, target: Option<u32>) -> Option<Arc<ArtImage>> {
        if let Some(img) = self.cache.get(key) {
            debug!("art: cache hit {}", key);
            return Some(img.clone());
        }
        self.fetcher.fetch_image(key.to_string(), target);
        None
    }

    /// Record a completed fetch.  Only successes enter the cache.
    pub fn complete(&mut self, key: String, image: Option<Arc<ArtImage>>) -> Option<Arc<ArtImage>> {
        let img = image?;
        self.cache.insert(key, img.clone());
        Some(img)
    }

    pub fn lookup_track(&self, title: &str) {
        self.fetcher.lookup_track_art(title.to_string());
    }
}

// ── HTTP implementation ───────────────────────────────────────────────────────

pub struct HttpArtFetcher {
    client: reqwest::Client,
    event_tx: mpsc::Sender<AppEvent>,
}

impl HttpArtFetcher {
    pub fn new(event_tx: mpsc::Sender<AppEvent>) -> anyhow::Result<Self> {
        // Redirects are followed manually, one hop, so the decode step gets
        // the actual byte payload of the final URL.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(ART_FETCH_TIMEOUT)
            .user_agent("Mozilla/5.0 (compatible; nightwave/0.1)")
            .build()?;
        Ok(Self { client, event_tx })
    }
}

impl ArtFetcher for HttpArtFetcher {
    fn fetch_image(&self, key: String, target: Option<u32>) {
        let client = self.client.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let image = load_art(&client, &key, target).await.map(Arc::new);
            let _ = tx.send(AppEvent::ArtResolved { key, image }).await;
        });
    }

    fn lookup_track_art(&self, title: String) {
        let client = self.client.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let art_url = itunes_art_lookup(&client, &title).await;
            let _ = tx.send(AppEvent::TrackArtLooked { title, art_url }).await;
        });
    }
}

async fn load_art(client: &reqwest::Client, key: &str, target: Option<u32>) -> Option<ArtImage> {
    let bytes = if Path::new(key).exists() {
        tokio::fs::read(key)
            .await
            .map_err(|e| warn!("art: read {} failed: {}", key, e))
            .ok()?
    } else {
        fetch_bytes(client, key).await?
    };
    decode_and_scale(&bytes, target)
}

/// GET with redirects disabled; a redirection response is followed by
/// exactly one re-request of the Location target.
async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Option<Vec<u8>> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| warn!("art: fetch {} failed: {}", url, e))
        .ok()?;

    let resp = if resp.status().is_redirection() {
        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)?
            .to_str()
            .ok()?
            .to_string();
        debug!("art: {} redirected to {}", url, location);
        client
            .get(&location)
            .send()
            .await
            .map_err(|e| warn!("art: redirect fetch {} failed: {}", location, e))
            .ok()?
    } else {
        resp
    };

    if !resp.status().is_success() {
        warn!("art: fetch {} returned {}", url, resp.status());
        return None;
    }
    resp.bytes().await.ok().map(|b| b.to_vec())
}

/// Decode, and downscale (aspect preserved, smooth filter) when larger than
/// the requested size.  Any decode error is a silent none.
pub fn decode_and_scale(bytes: &[u8], target: Option<u32>) -> Option<ArtImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| debug!("art: decode failed: {}", e))
        .ok()?;
    Some(match target {
        Some(size) if img.width() > size || img.height() > size => {
            img.resize(size, size, image::imageops::FilterType::Lanczos3)
        }
        _ => img,
    })
}

// ── track-title lookup ────────────────────────────────────────────────────────

async fn itunes_art_lookup(client: &reqwest::Client, title: &str) -> Option<String> {
    let resp = client
        .get(ITUNES_SEARCH_URL)
        .query(&[("term", title), ("entity", "song"), ("limit", "1")])
        .send()
        .await
        .map_err(|e| warn!("art lookup for '{}' failed: {}", title, e))
        .ok()?;
    let json: serde_json::Value = resp.json().await.ok()?;
    parse_itunes_art(&json)
}

pub fn parse_itunes_art(json: &serde_json::Value) -> Option<String> {
    let art = json["results"][0]["artworkUrl100"].as_str()?;
    Some(upgrade_itunes_art(art))
}

/// The search API serves 100x100 thumbnails, but the CDN happily serves a
/// larger rendition when the path is rewritten.
fn upgrade_itunes_art(url: &str) -> String {
    url.replace("100x100", "600x600")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = ArtImage::ImageRgba8(image::RgbaImage::from_pixel(
            w,
            h,
            image::Rgba([40, 40, 60, 255]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_decode_and_scale_downscales() {
        let img = decode_and_scale(&png_bytes(64, 32), Some(16)).unwrap();
        assert!(img.width() <= 16 && img.height() <= 16);
    }

    #[test]
    fn test_decode_without_target_keeps_size() {
        let img = decode_and_scale(&png_bytes(8, 8), None).unwrap();
        assert_eq!((img.width(), img.height()), (8, 8));
    }

    #[test]
    fn test_decode_smaller_than_target_not_upscaled() {
        let img = decode_and_scale(&png_bytes(8, 8), Some(16)).unwrap();
        assert_eq!((img.width(), img.height()), (8, 8));
    }

    #[test]
    fn test_decode_garbage_is_none() {
        assert!(decode_and_scale(b"not an image", None).is_none());
    }

    #[test]
    fn test_parse_itunes_art_upgrades_resolution() {
        let json = serde_json::json!({
            "resultCount": 1,
            "results": [
                {"artworkUrl100": "https://cdn/img/100x100bb.jpg"}
            ]
        });
        assert_eq!(
            parse_itunes_art(&json).as_deref(),
            Some("https://cdn/img/600x600bb.jpg")
        );
    }

    #[test]
    fn test_parse_itunes_art_empty_results() {
        let json = serde_json::json!({"resultCount": 0, "results": []});
        assert!(parse_itunes_art(&json).is_none());
    }

    struct CountingFetcher {
        fetches: Arc<AtomicUsize>,
    }

    impl ArtFetcher for CountingFetcher {
        fn fetch_image(&self, _key: String, _target: Option<u32>) {
            self.fetches.fetch_add(1, Ordering::SeqCst);
        }
        fn lookup_track_art(&self, _title: String) {}
    }

    #[test]
    fn test_resolver_caches_after_completion() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let mut resolver = ArtResolver::new(Box::new(CountingFetcher {
            fetches: fetches.clone(),
        }));

        assert!(resolver.resolve("http://art/a.png", None).is_none());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let img = Arc::new(decode_and_scale(&png_bytes(4, 4), None).unwrap());
        resolver.complete("http://art/a.png".to_string(), Some(img));

        // second resolve is served from the cache, no new fetch
        assert!(resolver.resolve("http://art/a.png", None).is_some());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolver_failure_not_cached() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let mut resolver = ArtResolver::new(Box::new(CountingFetcher {
            fetches: fetches.clone(),
        }));

        assert!(resolver.resolve("http://art/gone.png", None).is_none());
        assert!(resolver.complete("http://art/gone.png".to_string(), None).is_none());

        // a later resolve tries again
        assert!(resolver.resolve("http://art/gone.png", None).is_none());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}
