use postnet_proto::{read_frame, write_frame, ClientMessage};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::state::{handle_message, Shared};

/// Outbox capacity per connection. A writer that falls this far behind its
/// own acknowledged reads gets messages dropped rather than blocking the
/// rest of the broker (see `send`'s `try_send` in `state.rs`).
const OUTBOX_CAPACITY: usize = 256;

/// Accepts connections forever, spawning one task pair (reader + writer)
/// per client. Returns only if the listener itself errors out.
pub async fn accept_loop(listener: TcpListener, state: Shared) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, state).await {
                log::warn!("postnet-broker: connection {peer} ended: {e}");
            }
        });
    }
}

async fn handle_client(stream: TcpStream, state: Shared) -> anyhow::Result<()> {
    stream.set_nodelay(true).ok();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(OUTBOX_CAPACITY);
    let conn_id = state.lock().unwrap().register(tx);

    let writer_task = tokio::spawn(async move {
        while let Some(body) = rx.recv().await {
            if write_frame(&mut write_half, &body).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let result = loop {
        match read_frame(&mut reader).await {
            Ok(Some(bytes)) => match ClientMessage::decode(&bytes) {
                Ok(msg) => handle_message(state.clone(), conn_id, msg).await,
                Err(e) => {
                    log::warn!("postnet-broker: malformed message from connection {conn_id}: {e}");
                    break Err(anyhow::anyhow!(e));
                }
            },
            Ok(None) => break Ok(()),
            Err(e) => break Err(anyhow::anyhow!(e)),
        }
    };

    state.lock().unwrap().remove(conn_id);
    writer_task.abort();
    result
}
