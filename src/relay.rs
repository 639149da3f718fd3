//! The relay: a line-protocol message router.
//!
//! Clients connect over TCP, answer `getClientBoardName`, and are entered
//! into a board-name -> writer map. From then on any line whose second
//! token names a known board is forwarded there with a `success ` prefix.
//! The operator joins boards edge-to-edge from stdin (`h A B`, `v A B`) and
//! tears everything down with `disconnect`.
//!
//! The name map is the only shared state; it sits behind one mutex touched
//! by the accept loop, the stdin loop, and the per-client readers. Each
//! socket's writes go through a single writer task fed by a channel, so
//! concurrent senders serialise per socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::game::board::Wall;
use crate::protocol::{Message, SUCCESS_PREFIX};

type ClientTx = mpsc::UnboundedSender<String>;

/// Board-name -> writer-channel map. Injective by construction: a second
/// client claiming a live name is refused.
#[derive(Default)]
pub struct RelayState {
    clients: HashMap<String, ClientTx>,
}

impl RelayState {
    pub fn register(&mut self, name: &str, tx: ClientTx) -> bool {
        if self.clients.contains_key(name) {
            return false;
        }
        self.clients.insert(name.to_string(), tx);
        true
    }

    pub fn unregister(&mut self, name: &str) {
        self.clients.remove(name);
    }

    /// Tell every client the current set of boards.
    pub fn broadcast_connected(&self) {
        let mut names: Vec<String> = self.clients.keys().cloned().collect();
        names.sort_unstable();
        let line = success(&Message::AllConnectedBoards(names));
        for tx in self.clients.values() {
            let _ = tx.send(line.clone());
        }
    }

    /// Operator join. The two parties get the join message; everyone else
    /// is told both walls are spoken for, which evicts stale joins.
    pub fn join(&self, horizontal: bool, first: &str, second: &str) {
        if !self.clients.contains_key(first) || !self.clients.contains_key(second) {
            warn!("join names an unknown board: {} {}", first, second);
            return;
        }
        let (join_msg, first_wall, second_wall) = if horizontal {
            (
                Message::JoinHorizontal {
                    left: first.to_string(),
                    right: second.to_string(),
                },
                Wall::Left,
                Wall::Right,
            )
        } else {
            (
                Message::JoinVertical {
                    top: first.to_string(),
                    bottom: second.to_string(),
                },
                Wall::Top,
                Wall::Bottom,
            )
        };
        let evictions = [
            success(&Message::DisconnectWall {
                board: first.to_string(),
                wall: first_wall,
            }),
            success(&Message::DisconnectWall {
                board: second.to_string(),
                wall: second_wall,
            }),
        ];
        for (name, tx) in &self.clients {
            if name != first && name != second {
                for line in &evictions {
                    let _ = tx.send(line.clone());
                }
            }
        }
        let line = success(&join_msg);
        let _ = self.clients[first].send(line.clone());
        let _ = self.clients[second].send(line);
    }

    /// Forward a client line to the board named by its second token; the
    /// origin hears `failure` when the destination is unknown.
    pub fn route(&self, line: &str, origin: &str) {
        let dest = line.split_whitespace().nth(1);
        match dest.and_then(|d| self.clients.get(d)) {
            Some(tx) => {
                let _ = tx.send(format!("{}{}", SUCCESS_PREFIX, line));
            }
            None => {
                warn!("cannot route {:?} from {}", line, origin);
                if let Some(tx) = self.clients.get(origin) {
                    let _ = tx.send(Message::Failure.to_string());
                }
            }
        }
    }

    /// Close every session: an empty board list, then `disconnect`.
    pub fn disconnect_all(&mut self) {
        let empty = success(&Message::AllConnectedBoards(vec![]));
        for tx in self.clients.values() {
            let _ = tx.send(empty.clone());
            let _ = tx.send(Message::Disconnect.to_string());
        }
        self.clients.clear();
    }
}

fn success(msg: &Message) -> String {
    format!("{}{}", SUCCESS_PREFIX, msg)
}

pub async fn serve(port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("cannot listen on port {}", port))?;
    info!("relay listening on {}", listener.local_addr()?);
    let state = Arc::new(Mutex::new(RelayState::default()));

    let console_state = state.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            handle_console(&console_state, line.trim()).await;
        }
    });

    loop {
        let (socket, addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(state, socket).await {
                warn!("client {}: {:#}", addr, e);
            }
        });
    }
}

async fn handle_console(state: &Arc<Mutex<RelayState>>, line: &str) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        [] => {}
        ["disconnect"] => {
            state.lock().await.disconnect_all();
            // Let the writer tasks drain before the process goes away.
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::process::exit(0);
        }
        ["h", a, b] => state.lock().await.join(true, a, b),
        ["v", a, b] => state.lock().await.join(false, a, b),
        _ => warn!("unknown console command {:?}", line),
    }
}

async fn handle_client(state: Arc<Mutex<RelayState>>, socket: TcpStream) -> Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half
        .write_all(format!("{}\n", Message::GetClientBoardName).as_bytes())
        .await?;
    let name = match lines.next_line().await? {
        Some(line) if !line.trim().is_empty() => line.trim().to_string(),
        _ => anyhow::bail!("client closed before naming its board"),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    {
        let mut state = state.lock().await;
        if !state.register(&name, tx) {
            anyhow::bail!("board name {:?} is already connected", name);
        }
        info!("board {} connected", name);
        state.broadcast_connected();
    }

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" {
                    break;
                }
                state.lock().await.route(line, &name);
            }
            Ok(None) | Err(_) => break,
        }
    }

    let mut state = state.lock().await;
    state.unregister(&name);
    state.broadcast_connected();
    info!("board {} disconnected", name);
    drop(state);
    let _ = writer.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(state: &mut RelayState, name: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        assert!(state.register(name, tx));
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    #[test]
    fn names_are_unique() {
        let mut state = RelayState::default();
        let _a = client(&mut state, "A");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(!state.register("A", tx));
    }

    #[test]
    fn broadcast_lists_every_board() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "A");
        let mut b = client(&mut state, "B");
        state.broadcast_connected();
        assert_eq!(drain(&mut a), vec!["success allConnectedBoards= A B"]);
        assert_eq!(drain(&mut b), vec!["success allConnectedBoards= A B"]);
    }

    #[test]
    fn join_notifies_parties_and_evicts_bystanders() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "A");
        let mut b = client(&mut state, "B");
        let mut c = client(&mut state, "C");
        state.join(true, "A", "B");
        assert_eq!(drain(&mut a), vec!["success joinHorizontal= A B"]);
        assert_eq!(drain(&mut b), vec!["success joinHorizontal= A B"]);
        assert_eq!(
            drain(&mut c),
            vec![
                "success disconnectWall= A left",
                "success disconnectWall= B right"
            ]
        );
    }

    #[test]
    fn repeated_join_repeats_the_same_messages() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "A");
        let mut b = client(&mut state, "B");
        state.join(false, "A", "B");
        let first_a = drain(&mut a);
        let first_b = drain(&mut b);
        state.join(false, "A", "B");
        assert_eq!(drain(&mut a), first_a);
        assert_eq!(drain(&mut b), first_b);
        assert_eq!(first_a, vec!["success joinVertical= A B"]);
    }

    #[test]
    fn join_with_unknown_board_does_nothing() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "A");
        state.join(true, "A", "ghost");
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn routing_forwards_by_second_token() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "A");
        let mut b = client(&mut state, "B");
        state.route("teleportPortal= B ball1 3 0 gate", "A");
        assert_eq!(
            drain(&mut b),
            vec!["success teleportPortal= B ball1 3 0 gate"]
        );
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn unroutable_lines_bounce_back_as_failure() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "A");
        state.route("teleportPortal= Nowhere ball1 3 0 gate", "A");
        assert_eq!(drain(&mut a), vec!["failure"]);
    }

    #[test]
    fn unregister_then_broadcast_drops_the_board() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "A");
        let _b = client(&mut state, "B");
        state.unregister("B");
        state.broadcast_connected();
        assert_eq!(drain(&mut a), vec!["success allConnectedBoards= A"]);
    }

    #[test]
    fn disconnect_all_closes_every_session() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "A");
        state.disconnect_all();
        assert_eq!(
            drain(&mut a),
            vec!["success allConnectedBoards=", "disconnect"]
        );
        // The map is empty; a rejoin under the same name succeeds.
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(state.register("A", tx));
    }
}
