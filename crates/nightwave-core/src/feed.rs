//! Remote now-playing feed: one HTTP GET returning a JSON array with one
//! entry per station the endpoint hosts.  Matching is by the stable station
//! identifier, never by URL substring.

use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct FeedEntry {
    pub station: FeedStation,
    #[serde(default)]
    pub now_playing: Option<FeedNowPlaying>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedStation {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedNowPlaying {
    #[serde(default)]
    pub song: Option<FeedSong>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSong {
    /// Display title, usually "Artist - Title".
    #[serde(default)]
    pub text: String,
    /// Cover art URL.
    #[serde(default)]
    pub art: Option<String>,
}

pub async fn fetch_now_playing(
    client: &reqwest::Client,
    url: &str,
) -> anyhow::Result<Vec<FeedEntry>> {
    debug!("feed: GET {}", url);
    let resp = client.get(url).send().await?.error_for_status()?;
    let entries: Vec<FeedEntry> = resp.json().await?;
    debug!("feed: {} entries", entries.len());
    Ok(entries)
}

/// Find the current song for the station with the given stable id.
pub fn match_station(entries: &[FeedEntry], id: u64) -> Option<&FeedSong> {
    entries
        .iter()
        .find(|e| e.station.id == id)?
        .now_playing
        .as_ref()?
        .song
        .as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<FeedEntry> {
        serde_json::from_str(
            r#"[
                {
                    "station": {"id": 1, "name": "Nostalgia"},
                    "now_playing": {"song": {"text": "A - X", "art": "http://art/1.png"}}
                },
                {
                    "station": {"id": 2, "name": "Night City"},
                    "now_playing": {"song": {"text": "B - Y", "art": null}}
                },
                {
                    "station": {"id": 3, "name": "Silent"},
                    "now_playing": null
                }
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_match_by_id() {
        let entries = fixture();
        let song = match_station(&entries, 2).unwrap();
        assert_eq!(song.text, "B - Y");
        assert!(song.art.is_none());
    }

    #[test]
    fn test_match_unknown_id() {
        assert!(match_station(&fixture(), 99).is_none());
    }

    #[test]
    fn test_match_entry_without_song() {
        assert!(match_station(&fixture(), 3).is_none());
    }
}
