//! Framed reads and writes on one peer stream.

use pqledger_types::error::NetworkError;
use pqledger_types::message::{
    Message, MessageHeader, MAX_MESSAGE_SIZE, MESSAGE_HEADER_LEN, MESSAGE_MAGIC,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace, warn};

/// Inactivity bound while reading one frame's payload. A peer that stalls
/// mid-message loses the connection instead of wedging the reader.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive undecodable frames tolerated before the connection is
/// dropped. A single bad frame is not terminal; a stream of them is.
const MAX_CONSECUTIVE_BAD_FRAMES: u32 = 3;

/// Events a connection's reader reports to the manager.
#[derive(Debug)]
pub enum ConnEvent {
    Frame { conn: u64, message: Message },
    Closed { conn: u64 },
}

/// Read exactly one frame. Short buffers, bad magic, oversized size fields,
/// and checksum mismatches are all decode failures of this one frame; the
/// caller decides when too many of them spoil the stream.
async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Message, NetworkError> {
    let mut header_bytes = [0u8; MESSAGE_HEADER_LEN];
    match reader.read_exact(&mut header_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(NetworkError::ConnectionClosed)
        }
        Err(e) => return Err(NetworkError::Io(e)),
    }
    let header = MessageHeader::decode(&header_bytes)?;
    if header.magic != *MESSAGE_MAGIC {
        return Err(NetworkError::BadMagic);
    }
    if header.size as usize > MAX_MESSAGE_SIZE {
        return Err(NetworkError::Oversize { size: header.size });
    }

    let mut payload = vec![0u8; header.size as usize];
    if !payload.is_empty() {
        match timeout(READ_TIMEOUT, reader.read_exact(&mut payload)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(NetworkError::ConnectionClosed)
            }
            Ok(Err(e)) => return Err(NetworkError::Io(e)),
            Err(_) => {
                return Err(NetworkError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "payload read stalled",
                )))
            }
        }
    }
    Ok(Message::decode(&header, &payload)?)
}

/// Reader loop: one frame at a time into the manager's event channel. A bad
/// frame is dropped and reading continues; too many bad frames in a row, or
/// a broken socket, close the connection.
pub async fn read_loop(conn: u64, mut reader: OwnedReadHalf, events: mpsc::Sender<ConnEvent>) {
    let mut bad_frames = 0u32;
    loop {
        match read_frame(&mut reader).await {
            Ok(message) => {
                bad_frames = 0;
                trace!(target: "net", "connection {conn}: {} frame", message.message_type());
                if events.send(ConnEvent::Frame { conn, message }).await.is_err() {
                    break;
                }
            }
            Err(
                e @ (NetworkError::Decode(_)
                | NetworkError::BadMagic
                | NetworkError::Oversize { .. }),
            ) => {
                bad_frames += 1;
                debug!(target: "net", "connection {conn}: dropping bad frame: {e}");
                if bad_frames >= MAX_CONSECUTIVE_BAD_FRAMES {
                    warn!(target: "net",
                        "connection {conn}: {bad_frames} bad frames in a row, closing");
                    let _ = events.send(ConnEvent::Closed { conn }).await;
                    break;
                }
            }
            Err(e) => {
                match &e {
                    NetworkError::ConnectionClosed => {
                        debug!(target: "net", "connection {conn} closed by peer")
                    }
                    other => warn!(target: "net", "connection {conn} failed: {other}"),
                }
                let _ = events.send(ConnEvent::Closed { conn }).await;
                break;
            }
        }
    }
}

/// Writer loop: fully write each queued frame; exit on the first failure so
/// the reader side notices the dead socket.
pub async fn write_loop(conn: u64, mut writer: OwnedWriteHalf, mut frames: mpsc::Receiver<Vec<u8>>) {
    while let Some(bytes) = frames.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            warn!(target: "net", "connection {conn}: send failed: {e}");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
