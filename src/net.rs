//! Client side of the relay link.
//!
//! One reader task turns socket lines into [`NetEvent`]s for the simulation
//! actor; one writer task owns the write half so every outbound source
//! (registration, teleports, quit) serialises onto the socket. The session
//! moves Offline -> Registering -> Online and falls back to Offline when the
//! socket dies; the board then runs standalone.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::protocol::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Registering,
    Online,
}

#[derive(Debug)]
pub enum NetEvent {
    /// A parsed relay message, applied to the board between frames.
    Relay(Message),
    /// The link is gone; wall joins that referenced it are void.
    Lost,
}

pub struct Connection {
    pub events: mpsc::UnboundedReceiver<NetEvent>,
    outbound: mpsc::UnboundedSender<String>,
    writer: tokio::task::JoinHandle<()>,
}

impl Connection {
    pub fn send(&self, msg: &Message) {
        let _ = self.outbound.send(msg.to_string());
    }

    /// Close the link after flushing everything queued on the writer.
    pub async fn close(self) {
        drop(self.outbound);
        let _ = self.writer.await;
    }
}

pub async fn connect(host: &str, port: u16, board_name: &str) -> Result<Connection> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("cannot reach relay at {}:{}", host, port))?;
    let (read_half, mut write_half) = stream.into_split();
    let (event_tx, events) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let name = board_name.to_string();
    let registration_tx = out_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        let mut state = SessionState::Registering;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match Message::parse(line) {
                        Ok(Message::GetClientBoardName) => {
                            // Answered with the bare board name.
                            let _ = registration_tx.send(name.clone());
                        }
                        Ok(Message::Disconnect) => {
                            info!("relay closed the session");
                            let _ = event_tx.send(NetEvent::Lost);
                            break;
                        }
                        Ok(Message::Failure) => {
                            warn!("relay reported an unresolvable peer");
                        }
                        Ok(msg) => {
                            if state == SessionState::Registering {
                                state = SessionState::Online;
                                info!("online at the relay as {}", name);
                            }
                            if event_tx.send(NetEvent::Relay(msg)).is_err() {
                                break;
                            }
                        }
                        // Protocol errors discard the line, never the session.
                        Err(err) => debug!("discarding {:?}: {}", line, err),
                    }
                }
                Ok(None) | Err(_) => {
                    let _ = event_tx.send(NetEvent::Lost);
                    break;
                }
            }
        }
    });

    Ok(Connection {
        events,
        outbound: out_tx,
        writer,
    })
}
