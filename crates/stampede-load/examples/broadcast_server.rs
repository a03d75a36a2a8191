//! Broadcast WebSocket server for trying `stampede` locally.
//!
//! Every text message received from any client is sent to every connected
//! client, so one `trigger_message` per round reaches the whole pool.
//!
//! Usage: cargo run --example broadcast_server [port]
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let (tx, _) = broadcast::channel::<String>(1024);
    println!("📡 Broadcast server listening on ws://127.0.0.1:{}/echo", port);

    loop {
        let (stream, peer) = listener.accept().await?;
        let tx = tx.clone();
        let mut rx = tx.subscribe();

        tokio::spawn(async move {
            let ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    eprintln!("[{}] ❌ Handshake failed: {}", peer, e);
                    return;
                }
            };
            let (mut sink, mut source) = ws.split();

            loop {
                tokio::select! {
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let _ = tx.send(text.trim().to_string());
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    outgoing = rx.recv() => match outgoing {
                        Ok(text) => {
                            if sink.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            eprintln!("[{}] ⚠️ Lagged, skipped {} messages", peer, skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
    }
}
