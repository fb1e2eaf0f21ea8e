//! Round trip against a tiny JSON-RPC "server" written in POSIX sh.
//!
//! The child answers every request line with an empty result for the same
//! id, says hello on stderr, and exits when its stdin closes.
//!
//! Run with:
//!   cargo run --example sh-echo --features logging

use std::sync::Arc;
use std::time::Duration;

use stdiorpc::logging::{init_logging, LogFormat, LogLevel};
use stdiorpc::{Callbacks, Message, ProcessHost, SpawnParams, Transport};
use tokio::sync::mpsc;

const SERVER: &str = r#"echo "sh-echo ready" >&2
while IFS= read -r line; do
  id=${line#*\"id\":}
  id=${id%%,*}
  printf '{"jsonrpc":"2.0","id":%s,"result":{"echo":true}}\n' "$id"
done"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LogFormat::Text, LogLevel::Debug);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callbacks = Callbacks::new()
        .on_message(move |msg| {
            let _ = tx.send(msg);
        })
        .on_error(|err| eprintln!("transport error: {err}"))
        .on_close(|| eprintln!("transport closed"));

    let params = SpawnParams::new("/bin/sh").args(["-c", SERVER]).name("sh-echo");
    let transport = Transport::new(Arc::new(ProcessHost::new()), params).with_callbacks(callbacks);
    transport.start().await?;

    for id in 1..=3 {
        transport.send(&Message::request(id, "ping", None)).await?;
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(reply)) => eprintln!("reply: {reply:?}"),
            _ => eprintln!("no reply for request {id}"),
        }
    }

    transport.close().await?;
    Ok(())
}
