#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stdiorpc::frame::{Message, RequestId};
use stdiorpc::host::{HostConfig, OutputMode, ProcessHost, SpawnParams};
use stdiorpc::transport::{Callbacks, Transport, TransportError, TransportState};
use tokio::sync::mpsc;

const RESPONDER: &str = r#"while IFS= read -r line; do
  id=${line#*\"id\":}
  id=${id%%,*}
  printf '{"jsonrpc":"2.0","id":%s,"result":{"ok":true}}\n' "$id"
done"#;

#[derive(Debug)]
enum Seen {
    Message(Message),
    Error(TransportError),
    Stderr(String),
    Close,
}

fn recorder() -> (Callbacks, mpsc::UnboundedReceiver<Seen>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (m, e, s, c) = (tx.clone(), tx.clone(), tx.clone(), tx);
    let callbacks = Callbacks::new()
        .on_message(move |msg| {
            let _ = m.send(Seen::Message(msg));
        })
        .on_error(move |err| {
            let _ = e.send(Seen::Error(err));
        })
        .on_stderr(move |text| {
            let _ = s.send(Seen::Stderr(text.to_string()));
        })
        .on_close(move || {
            let _ = c.send(Seen::Close);
        });
    (callbacks, rx)
}

fn sh(script: &str) -> SpawnParams {
    SpawnParams::new("/bin/sh").args(["-c", script])
}

fn transport(
    script: &str,
    output: OutputMode,
) -> (Transport<ProcessHost>, mpsc::UnboundedReceiver<Seen>) {
    let host = ProcessHost::with_config(HostConfig {
        output,
        ..HostConfig::default()
    });
    let (callbacks, rx) = recorder();
    (
        Transport::new(Arc::new(host), sh(script)).with_callbacks(callbacks),
        rx,
    )
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("recorder dropped")
}

async fn wait_closed(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Vec<Seen> {
    let mut seen = Vec::new();
    loop {
        match next(rx).await {
            Seen::Close => return seen,
            other => seen.push(other),
        }
    }
}

#[tokio::test]
async fn ping_round_trip_raw_chunks() {
    let (transport, mut rx) = transport(RESPONDER, OutputMode::Chunks);
    transport.start().await.unwrap();

    transport
        .send(&Message::request(1, "ping", None))
        .await
        .unwrap();
    match next(&mut rx).await {
        Seen::Message(msg) => assert_eq!(msg, Message::response(1, json!({"ok": true}))),
        other => panic!("unexpected {other:?}"),
    }

    transport.close().await.unwrap();
    assert!(matches!(next(&mut rx).await, Seen::Close));
    assert_eq!(transport.state(), TransportState::Closed);
}

#[tokio::test]
async fn ping_round_trip_pre_split_lines() {
    let (transport, mut rx) = transport(RESPONDER, OutputMode::Lines);
    transport.start().await.unwrap();

    for id in 1i64..=3 {
        transport
            .send(&Message::request(id, "ping", None))
            .await
            .unwrap();
    }
    for id in 1i64..=3 {
        match next(&mut rx).await {
            Seen::Message(msg) => assert_eq!(msg.id(), Some(&RequestId::from(id))),
            other => panic!("unexpected {other:?}"),
        }
    }

    transport.close().await.unwrap();
}

#[tokio::test]
async fn child_exit_closes_transport() {
    let script = r#"printf '{"jsonrpc":"2.0","method":"bye"}\n'; exit 3"#;
    let (transport, mut rx) = transport(script, OutputMode::Chunks);
    transport.start().await.unwrap();

    let seen = wait_closed(&mut rx).await;
    assert!(matches!(
        seen.as_slice(),
        [Seen::Message(msg)] if msg.method() == Some("bye")
    ));
    assert_eq!(transport.state(), TransportState::Closed);
    assert!(matches!(
        transport.send(&Message::notification("late", None)).await,
        Err(TransportError::NotStarted)
    ));
}

#[tokio::test]
async fn noisy_child_keeps_valid_frames() {
    let script = r#"echo "booting" >&2
printf 'garbage\n{"jsonrpc":"2.0","method":"ready"}\r\n'
exit 0"#;
    let (transport, mut rx) = transport(script, OutputMode::Chunks);
    transport.start().await.unwrap();

    let seen = wait_closed(&mut rx).await;
    let errors = seen
        .iter()
        .filter(|s| matches!(s, Seen::Error(TransportError::Frame(_))))
        .count();
    let ready = seen
        .iter()
        .any(|s| matches!(s, Seen::Message(msg) if msg.method() == Some("ready")));
    let stderr: String = seen
        .iter()
        .filter_map(|s| match s {
            Seen::Stderr(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();

    assert_eq!(errors, 1);
    assert!(ready);
    assert!(stderr.contains("booting"));
}

#[tokio::test]
async fn missing_command_leaves_transport_idle() {
    let host = Arc::new(ProcessHost::new());
    let transport = Transport::new(host, SpawnParams::new("/nonexistent/stdiorpc-server"));

    let err = transport.start().await.unwrap_err();
    assert!(matches!(err, TransportError::Host(_)));
    assert_eq!(transport.state(), TransportState::Idle);
}

#[tokio::test]
async fn close_kills_long_running_child() {
    let (transport, mut rx) = transport("sleep 30", OutputMode::Chunks);
    transport.start().await.unwrap();
    let handle = transport.handle().unwrap();

    transport.close().await.unwrap();
    assert!(matches!(next(&mut rx).await, Seen::Close));
    assert!(!transport.host().is_running(&handle).await);
    assert!(matches!(
        transport.close().await,
        Err(TransportError::NotStarted)
    ));
}
