//! UDS window client for the `send` subcommand.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use chainwatch_core::Envelope;
use chainwatch_core::types::WindowKind;

use crate::cli::SendOpts;

/// Connect as `kind`, send one envelope, and collect whatever the hub sends
/// back within `listen`.
pub(crate) async fn send_envelope(
    socket_path: &str,
    kind: WindowKind,
    tab: Option<String>,
    envelope: Envelope,
    listen: Duration,
) -> anyhow::Result<Vec<Envelope>> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to hub at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let hello = serde_json::json!({ "hello": { "kind": kind, "tab": tab } });
    let mut req = serde_json::to_string(&hello)?;
    req.push('\n');
    req.push_str(&serde_json::to_string(&envelope)?);
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;

    let mut lines = BufReader::new(reader).lines();
    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + listen;
    loop {
        match tokio::time::timeout_at(deadline, lines.next_line()).await {
            Ok(Ok(Some(line))) => match serde_json::from_str::<Envelope>(&line) {
                Ok(envelope) => received.push(envelope),
                Err(e) => tracing::debug!("skipping unreadable line: {e}"),
            },
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => break,
        }
    }
    let _ = writer.shutdown().await;
    Ok(received)
}

/// `chainwatch send`: print every envelope received, one JSON object per line.
pub async fn cmd_send(socket_path: &str, opts: SendOpts) -> anyhow::Result<()> {
    let data: serde_json::Value = serde_json::from_str(&opts.data)
        .map_err(|e| anyhow::anyhow!("--data is not valid JSON: {e}"))?;
    let envelope = Envelope::new(opts.task, data);
    let received = send_envelope(
        socket_path,
        opts.kind,
        opts.tab,
        envelope,
        Duration::from_millis(opts.listen_ms),
    )
    .await?;
    for envelope in &received {
        println!("{}", serde_json::to_string(envelope)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn hello_precedes_envelope_and_replies_are_collected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("fake.sock");
        let listener = UnixListener::bind(&socket).expect("bind");

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let hello = lines.next_line().await.expect("read").expect("hello");
            let sent = lines.next_line().await.expect("read").expect("envelope");
            writer
                .write_all(b"{\"task\":\"renderer:toast\",\"data\":{\"message\":\"hi\"}}\nnot json\n")
                .await
                .expect("reply");
            (hello, sent)
        });

        let received = send_envelope(
            &socket.to_string_lossy(),
            WindowKind::Settings,
            None,
            Envelope::new("main:connection:set", serde_json::json!({"online": true})),
            Duration::from_millis(200),
        )
        .await
        .expect("send");

        let (hello, sent) = server.await.expect("server");
        let hello: serde_json::Value = serde_json::from_str(&hello).expect("hello json");
        assert_eq!(hello["hello"]["kind"], "settings");
        let sent: Envelope = serde_json::from_str(&sent).expect("envelope json");
        assert_eq!(sent.task, "main:connection:set");
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].task, "renderer:toast");
    }

    #[tokio::test]
    async fn missing_hub_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("absent.sock");
        let err = send_envelope(
            &socket.to_string_lossy(),
            WindowKind::Settings,
            None,
            Envelope::new("main:connection:set", serde_json::Value::Null),
            Duration::from_millis(10),
        )
        .await
        .expect_err("no hub");
        assert!(err.to_string().contains("cannot connect to hub"));
    }
}
