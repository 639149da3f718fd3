//! Wire protocol: line-oriented ASCII messages between boards and the relay.
//!
//! Every message is a single `\n`-terminated line of whitespace-separated
//! tokens. Messages the relay forwards to a client are prefixed with
//! `success `; [`Message::parse`] accepts lines with or without the prefix.
//! Routable messages carry the destination board as their second token,
//! which is all the relay looks at.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::game::board::Wall;
use crate::geometry::Vec2;

pub const SUCCESS_PREFIX: &str = "success ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("malformed {command} message: {reason}")]
    Malformed {
        command: &'static str,
        reason: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Relay asks a newcomer for its board name; the client answers with
    /// the bare name, outside this grammar.
    GetClientBoardName,
    AllConnectedBoards(Vec<String>),
    JoinHorizontal { left: String, right: String },
    JoinVertical { top: String, bottom: String },
    DisconnectWall { board: String, wall: Wall },
    TeleportPortal {
        board: String,
        ball: String,
        vel: Vec2,
        portal: String,
    },
    TeleportWall {
        board: String,
        ball: String,
        vel: Vec2,
        pos: Vec2,
        wall: Wall,
    },
    ConnectPortal { board: String, portal: String },
    DisconnectPortal { board: String, portal: String },
    /// Client requests a graceful shutdown.
    Quit,
    /// Relay tells a client it is closing the session.
    Disconnect,
    /// Relay could not resolve the destination of a forwarded message.
    Failure,
}

impl Message {
    pub fn parse(line: &str) -> Result<Message, ProtocolError> {
        let line = line.strip_prefix(SUCCESS_PREFIX).unwrap_or(line).trim();
        line.parse()
    }

    /// Destination board for messages the relay routes by second token.
    pub fn destination(&self) -> Option<&str> {
        match self {
            Message::TeleportPortal { board, .. }
            | Message::TeleportWall { board, .. }
            | Message::ConnectPortal { board, .. }
            | Message::DisconnectPortal { board, .. } => Some(board),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::GetClientBoardName => write!(f, "getClientBoardName"),
            Message::AllConnectedBoards(boards) => {
                write!(f, "allConnectedBoards=")?;
                for b in boards {
                    write!(f, " {}", b)?;
                }
                Ok(())
            }
            Message::JoinHorizontal { left, right } => {
                write!(f, "joinHorizontal= {} {}", left, right)
            }
            Message::JoinVertical { top, bottom } => {
                write!(f, "joinVertical= {} {}", top, bottom)
            }
            Message::DisconnectWall { board, wall } => {
                write!(f, "disconnectWall= {} {}", board, wall.token())
            }
            Message::TeleportPortal {
                board,
                ball,
                vel,
                portal,
            } => write!(
                f,
                "teleportPortal= {} {} {} {} {}",
                board, ball, vel.x, vel.y, portal
            ),
            Message::TeleportWall {
                board,
                ball,
                vel,
                pos,
                wall,
            } => write!(
                f,
                "teleportWall= {} {} {} {} {} {} {}",
                board,
                ball,
                vel.x,
                vel.y,
                pos.x,
                pos.y,
                wall.token()
            ),
            Message::ConnectPortal { board, portal } => {
                write!(f, "connectPortal= {} {}", board, portal)
            }
            Message::DisconnectPortal { board, portal } => {
                write!(f, "disconnectPortal= {} {}", board, portal)
            }
            Message::Quit => write!(f, "quit"),
            Message::Disconnect => write!(f, "disconnect"),
            Message::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let command = *tokens.first().ok_or(ProtocolError::Empty)?;
        match command {
            "getClientBoardName" => Ok(Message::GetClientBoardName),
            "quit" => Ok(Message::Quit),
            "disconnect" => Ok(Message::Disconnect),
            "failure" => Ok(Message::Failure),
            "allConnectedBoards=" => Ok(Message::AllConnectedBoards(
                tokens[1..].iter().map(|s| s.to_string()).collect(),
            )),
            "joinHorizontal=" => {
                let [left, right] = two_names(&tokens, "joinHorizontal=")?;
                Ok(Message::JoinHorizontal { left, right })
            }
            "joinVertical=" => {
                let [top, bottom] = two_names(&tokens, "joinVertical=")?;
                Ok(Message::JoinVertical { top, bottom })
            }
            "disconnectWall=" => {
                let [board, wall] = two_names(&tokens, "disconnectWall=")?;
                let wall = Wall::from_token(&wall).ok_or(ProtocolError::Malformed {
                    command: "disconnectWall=",
                    reason: "bad wall name",
                })?;
                Ok(Message::DisconnectWall { board, wall })
            }
            "connectPortal=" => {
                let [board, portal] = two_names(&tokens, "connectPortal=")?;
                Ok(Message::ConnectPortal { board, portal })
            }
            "disconnectPortal=" => {
                let [board, portal] = two_names(&tokens, "disconnectPortal=")?;
                Ok(Message::DisconnectPortal { board, portal })
            }
            "teleportPortal=" => {
                if tokens.len() != 6 {
                    return Err(ProtocolError::Malformed {
                        command: "teleportPortal=",
                        reason: "expected 5 arguments",
                    });
                }
                let vel = parse_vec(tokens[3], tokens[4], "teleportPortal=")?;
                Ok(Message::TeleportPortal {
                    board: tokens[1].to_string(),
                    ball: tokens[2].to_string(),
                    vel,
                    portal: tokens[5].to_string(),
                })
            }
            "teleportWall=" => {
                if tokens.len() != 8 {
                    return Err(ProtocolError::Malformed {
                        command: "teleportWall=",
                        reason: "expected 7 arguments",
                    });
                }
                let vel = parse_vec(tokens[3], tokens[4], "teleportWall=")?;
                let pos = parse_vec(tokens[5], tokens[6], "teleportWall=")?;
                let wall = Wall::from_token(tokens[7]).ok_or(ProtocolError::Malformed {
                    command: "teleportWall=",
                    reason: "bad wall name",
                })?;
                Ok(Message::TeleportWall {
                    board: tokens[1].to_string(),
                    ball: tokens[2].to_string(),
                    vel,
                    pos,
                    wall,
                })
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

fn two_names(tokens: &[&str], command: &'static str) -> Result<[String; 2], ProtocolError> {
    if tokens.len() != 3 {
        return Err(ProtocolError::Malformed {
            command,
            reason: "expected 2 arguments",
        });
    }
    Ok([tokens[1].to_string(), tokens[2].to_string()])
}

fn parse_vec(x: &str, y: &str, command: &'static str) -> Result<Vec2, ProtocolError> {
    let x = x.parse::<f64>().map_err(|_| ProtocolError::Malformed {
        command,
        reason: "bad number",
    })?;
    let y = y.parse::<f64>().map_err(|_| ProtocolError::Malformed {
        command,
        reason: "bad number",
    })?;
    Ok(Vec2::new(x, y))
}
