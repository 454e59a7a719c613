use std::path::PathBuf;

/// Well-known control socket path.  A second invocation of the binary
/// connects here to drive the running instance.
pub fn control_socket_path() -> PathBuf {
    std::env::temp_dir().join("nightwave.sock")
}

/// IPC socket handed to mpv via --input-ipc-server.
pub fn mpv_socket_path() -> PathBuf {
    std::env::temp_dir().join("nightwave-mpv.sock")
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("nightwave")
}

pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".local")
        .join("share")
        .join("nightwave")
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    for dir in path.split(':') {
        for name in names {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

/// Find the mpv binary used for stream playback.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Some(p) = find_beside_exe(&["mpv"]) {
        return Some(p);
    }
    find_on_path(&["mpv"])
}

/// Find ffmpeg for snippet capture.  FFMPEG_PATH overrides the search.
pub fn find_ffmpeg_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("FFMPEG_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }
    if let Some(p) = find_beside_exe(&["ffmpeg"]) {
        return Some(p);
    }
    find_on_path(&["ffmpeg"])
}

/// Find the vibra binary (Shazam fingerprint CLI).
pub fn find_vibra_binary() -> Option<PathBuf> {
    if let Some(p) = find_beside_exe(&["vibra"]) {
        return Some(p);
    }
    find_on_path(&["vibra"])
}
