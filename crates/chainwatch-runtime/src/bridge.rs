//! Window bridge: one Unix-socket connection per window process,
//! newline-delimited JSON.
//!
//! The first line is `{"hello": {"kind": ..., "tab": ...}}`. Every later line
//! is an envelope bound for the hub. Envelopes the hub sends to the window's
//! kind are written back down the same socket. Tab children share the tab
//! host's endpoint: they may send, but only the host connection receives.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chainwatch_core::Envelope;
use chainwatch_core::types::{WindowHandle, WindowKind};
use chainwatch_ipc::{OpenArgs, Switchboard, WindowLink};

use crate::hub::{Hub, Inbound};

#[derive(Debug, Deserialize)]
pub(crate) struct HelloLine {
    pub hello: Hello,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Hello {
    pub kind: WindowKind,
    #[serde(default)]
    pub tab: Option<String>,
}

fn lock(m: &Mutex<Switchboard>) -> MutexGuard<'_, Switchboard> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bind the bridge socket: private directory, stale socket removed, socket
/// file readable by the owner only.
pub async fn bind(socket_path: &str) -> anyhow::Result<UnixListener> {
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    if std::path::Path::new(socket_path).exists() {
        if UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another hub is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("window bridge listening on {socket_path}");
    Ok(listener)
}

/// Accept window connections forever.
pub async fn serve(
    listener: UnixListener,
    hub: Arc<Hub>,
    inbound: mpsc::UnboundedSender<Inbound>,
) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let hub = Arc::clone(&hub);
        let inbound = inbound.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, hub, inbound).await {
                tracing::debug!("window connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: UnixStream,
    hub: Arc<Hub>,
    inbound: mpsc::UnboundedSender<Inbound>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let Some(first) = lines.next_line().await? else {
        return Ok(());
    };
    let HelloLine { hello } = serde_json::from_str(first.trim())
        .map_err(|e| anyhow::anyhow!("expected hello line: {e}"))?;
    let (handle, link) = open(hub.switchboard(), &hello)?;
    let kind = handle.kind;
    tracing::info!("window {kind} connected ({})", handle.id);

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let endpoint = match link {
        Some(WindowLink {
            endpoint,
            mut to_window,
            mut to_hub,
            ..
        }) => {
            let tx = inbound.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(envelope) = to_hub.recv().await {
                    if tx.send(Inbound { from: kind, envelope }).is_err() {
                        break;
                    }
                }
            }));
            tasks.push(tokio::spawn(async move {
                while let Some(envelope) = to_window.recv().await {
                    if let Err(e) = write_line(&mut writer, &envelope).await {
                        tracing::debug!("write to {kind} failed: {e}");
                        break;
                    }
                }
            }));
            hub.send_snapshot(kind);
            Some(endpoint)
        }
        None => None,
    };

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("{kind}: unreadable envelope: {e}");
                continue;
            }
        };
        if let Err(e) = lock(hub.switchboard()).send_from(kind, envelope) {
            tracing::warn!("{kind}: {e}");
        }
    }

    {
        let mut sb = lock(hub.switchboard());
        // A reconnect of the same kind replaced our endpoint; the window now
        // belongs to the newer connection.
        let replaced = endpoint
            .as_ref()
            .is_some_and(|endpoint| !sb.channels().is_live(endpoint));
        if !replaced {
            sb.close_window(&handle);
        }
    }
    for task in tasks {
        task.abort();
    }
    tracing::info!("window {kind} disconnected ({})", handle.id);
    Ok(())
}

/// Register the window. The tab host and ordinary windows get their own
/// link; tab children piggyback on the host.
fn open(
    switchboard: &Mutex<Switchboard>,
    hello: &Hello,
) -> anyhow::Result<(WindowHandle, Option<WindowLink>)> {
    let mut sb = lock(switchboard);
    let args = OpenArgs {
        tab: hello.tab.clone(),
        init: None,
    };
    let (handle, _) = sb.open_window(hello.kind, args)?;
    if handle.tab.is_some() {
        return Ok((handle, None));
    }
    match sb.link(&handle) {
        Ok(link) => Ok((handle, Some(link))),
        Err(e) => {
            sb.close_window(&handle);
            Err(e.into())
        }
    }
}

async fn write_line(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    envelope: &Envelope,
) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(envelope)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}
