//! Control channel: a Unix socket at a well-known path so a second
//! invocation of the binary can drive the running instance.  One connection
//! at a time, one bare token per connection, no acknowledgment payload.

use anyhow::Context;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::AppEvent;
use nightwave_core::platform;
use nightwave_core::protocol::ControlCommand;

/// Bind the well-known endpoint and run the accept loop for the process
/// lifetime.  Bind failure is surfaced to the caller; per-connection errors
/// are logged and the loop continues.
pub fn start_server(event_tx: mpsc::Sender<AppEvent>) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    serve_at(platform::control_socket_path(), event_tx)
}

pub fn serve_at(
    path: PathBuf,
    event_tx: mpsc::Sender<AppEvent>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("removing stale control socket {}", path.display()))?;
    }
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("binding control socket {}", path.display()))?;
    info!("control: listening at {}", path.display());
    Ok(tokio::spawn(accept_loop(listener, event_tx)))
}

async fn accept_loop(listener: UnixListener, event_tx: mpsc::Sender<AppEvent>) {
    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                let mut buf = [0u8; 64];
                match stream.read(&mut buf).await {
                    Ok(n) if n > 0 => {
                        let token = String::from_utf8_lossy(&buf[..n]).to_string();
                        match ControlCommand::from_token(&token) {
                            Some(cmd) => {
                                info!("control: received {}", cmd.as_token());
                                if event_tx.send(AppEvent::Control(cmd)).await.is_err() {
                                    // orchestrator gone, nothing left to do
                                    return;
                                }
                            }
                            None => warn!("control: unknown token {:?}", token.trim()),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("control: read error: {}", e),
                }
            }
            Err(e) => warn!("control: accept error: {}", e),
        }
    }
}

/// Client side: deliver one command to the running instance.  A missing or
/// unreachable endpoint means no instance is running.
pub async fn send_command(cmd: ControlCommand) -> anyhow::Result<()> {
    send_command_to(platform::control_socket_path(), cmd).await
}

pub async fn send_command_to(path: PathBuf, cmd: ControlCommand) -> anyhow::Result<()> {
    let mut stream = UnixStream::connect(&path)
        .await
        .map_err(|_| anyhow::anyhow!("nightwave is not running"))?;
    stream.write_all(cmd.as_token().as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_delivered_to_orchestrator() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("control.sock");
        let (tx, mut rx) = mpsc::channel(8);
        let _server = serve_at(sock.clone(), tx).unwrap();

        send_command_to(sock, ControlCommand::NextStation)
            .await
            .unwrap();

        match rx.recv().await {
            Some(AppEvent::Control(ControlCommand::NextStation)) => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_token_survived() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("control.sock");
        let (tx, mut rx) = mpsc::channel(8);
        let _server = serve_at(sock.clone(), tx).unwrap();

        // garbage connection: no event, loop keeps serving
        let mut stream = UnixStream::connect(&sock).await.unwrap();
        stream.write_all(b"reticulate-splines").await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        send_command_to(sock, ControlCommand::PlayPause).await.unwrap();
        match rx.recv().await {
            Some(AppEvent::Control(ControlCommand::PlayPause)) => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_reports_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("missing.sock");
        let err = send_command_to(sock, ControlCommand::PlayPause)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not running"));
    }
}
