use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One tuned-to-able stream.  Identity key is `url`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Station {
    pub name: String,
    pub url: String,
    /// Station logo / fallback cover art.
    #[serde(default)]
    pub art_url: Option<String>,
    /// Stable identifier used by the remote now-playing feed.  Stations
    /// without one never match a feed entry.
    #[serde(default)]
    pub remote_id: Option<u64>,
}

/// External station list collaborator.  The core only calls `list()`; the
/// CRUD surface exists for the (excluded) station-management UI.
pub trait StationStore: Send {
    fn list(&self) -> Vec<Station>;
    fn upsert(&mut self, station: Station) -> anyhow::Result<()>;
    fn remove(&mut self, url: &str) -> anyhow::Result<()>;
    fn contains(&self, url: &str) -> bool;
}

/// Pick the station `offset` entries away from `current_url`, wrapping
/// around the list.  A current station that is not in the list (or nothing
/// tuned at all) selects the first entry.
pub fn neighbor_of<'a>(
    stations: &'a [Station],
    current_url: Option<&str>,
    offset: isize,
) -> Option<&'a Station> {
    if stations.is_empty() {
        return None;
    }
    let Some(url) = current_url else {
        return stations.first();
    };
    match stations.iter().position(|s| s.url == url) {
        Some(idx) => {
            let len = stations.len() as isize;
            let next = (idx as isize + offset).rem_euclid(len) as usize;
            stations.get(next)
        }
        None => stations.first(),
    }
}

// ── TOML station file ─────────────────────────────────────────────────────────

/// Matches the `[[station]]` tables on disk.  Kept separate from `Station`
/// so the file schema can diverge from the in-memory value.
#[derive(Debug, Serialize, Deserialize, Default)]
struct TomlStationFile {
    #[serde(default)]
    station: Vec<TomlStation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TomlStation {
    name: String,
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    art_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_id: Option<u64>,
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: TomlStationFile = toml::from_str(content)?;
    Ok(file
        .station
        .into_iter()
        .map(|s| Station {
            name: s.name,
            url: s.url,
            art_url: s.art_url,
            remote_id: s.remote_id,
        })
        .collect())
}

pub fn load_stations_from_toml(path: &Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_stations_from_toml_str(&content)
}

/// File-backed station store.  A missing file is an empty list; every
/// mutation rewrites the file.
pub struct TomlStationStore {
    path: PathBuf,
    stations: Vec<Station>,
}

impl TomlStationStore {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let stations = if path.exists() {
            load_stations_from_toml(&path)?
        } else {
            Vec::new()
        };
        Ok(Self { path, stations })
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = TomlStationFile {
            station: self
                .stations
                .iter()
                .map(|s| TomlStation {
                    name: s.name.clone(),
                    url: s.url.clone(),
                    art_url: s.art_url.clone(),
                    remote_id: s.remote_id,
                })
                .collect(),
        };
        let content = toml::to_string_pretty(&file)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl StationStore for TomlStationStore {
    fn list(&self) -> Vec<Station> {
        self.stations.clone()
    }

    fn upsert(&mut self, station: Station) -> anyhow::Result<()> {
        match self.stations.iter_mut().find(|s| s.url == station.url) {
            Some(existing) => *existing = station,
            None => self.stations.push(station),
        }
        self.save()
    }

    fn remove(&mut self, url: &str) -> anyhow::Result<()> {
        self.stations.retain(|s| s.url != url);
        self.save()
    }

    fn contains(&self, url: &str) -> bool {
        self.stations.iter().any(|s| s.url == url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(name: &str, url: &str) -> Station {
        Station {
            name: name.to_string(),
            url: url.to_string(),
            ..Station::default()
        }
    }

    fn three() -> Vec<Station> {
        vec![
            station("S1", "http://one"),
            station("S2", "http://two"),
            station("S3", "http://three"),
        ]
    }

    #[test]
    fn test_neighbor_forward_and_back() {
        let list = three();
        assert_eq!(neighbor_of(&list, Some("http://two"), 1).unwrap().name, "S3");
        assert_eq!(neighbor_of(&list, Some("http://two"), -1).unwrap().name, "S1");
    }

    #[test]
    fn test_neighbor_wraps_around() {
        let list = three();
        assert_eq!(neighbor_of(&list, Some("http://three"), 1).unwrap().name, "S1");
        assert_eq!(neighbor_of(&list, Some("http://one"), -1).unwrap().name, "S3");
    }

    #[test]
    fn test_neighbor_unknown_current_selects_first() {
        let list = three();
        assert_eq!(
            neighbor_of(&list, Some("http://elsewhere"), 1).unwrap().name,
            "S1"
        );
        assert_eq!(neighbor_of(&list, None, 1).unwrap().name, "S1");
    }

    #[test]
    fn test_neighbor_empty_list() {
        assert!(neighbor_of(&[], Some("http://one"), 1).is_none());
    }

    #[test]
    fn test_parse_station_toml() {
        let content = r#"
            [[station]]
            name = "Night City Radio"
            url = "https://radio.example.net/listen/ncr/stream"
            art_url = "https://radio.example.net/art/ncr.png"
            remote_id = 7

            [[station]]
            name = "Ad-hoc"
            url = "http://10.0.0.2:8000/stream"
        "#;
        let stations = parse_stations_from_toml_str(content).unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].remote_id, Some(7));
        assert!(stations[1].remote_id.is_none());
        assert!(stations[1].art_url.is_none());
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.toml");

        let mut store = TomlStationStore::open(path.clone()).unwrap();
        assert!(store.list().is_empty());

        store.upsert(station("S1", "http://one")).unwrap();
        store
            .upsert(Station {
                remote_id: Some(3),
                ..station("S2", "http://two")
            })
            .unwrap();
        assert!(store.contains("http://one"));

        // re-open from disk
        let store = TomlStationStore::open(path.clone()).unwrap();
        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].remote_id, Some(3));

        let mut store = store;
        store.remove("http://one").unwrap();
        assert!(!store.contains("http://one"));
        let store = TomlStationStore::open(path).unwrap();
        assert_eq!(store.list().len(), 1);
    }
}
