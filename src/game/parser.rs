//! Board-definition file parser.
//!
//! The format is line-oriented: one item per line, `key=value` tokens
//! separated by whitespace, `#` starting a comment. Descriptor problems are
//! fatal: the parser reports the first offending line and the board does not
//! start.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::game::ball::Ball;
use crate::game::board::{Board, BoardError};
use crate::game::config::{FRICTION_DEFAULT, GRAVITY_DEFAULT};
use crate::game::flipper::{Flipper, Handedness};
use crate::game::gadget::{
    Absorber, CircleBumper, Gadget, Portal, SquareBumper, TriangleBumper,
};
use crate::game::snapshot::KeyBinding;
use crate::geometry::{Orientation, Vec2};

#[derive(Debug, Error)]
pub enum BoardFileError {
    #[error("cannot read board file: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },
    #[error("line {line}: {source}")]
    Placement {
        line: usize,
        #[source]
        source: BoardError,
    },
    #[error("portal {portal:?} names local peer {peer:?}, which is not on the board")]
    MissingLocalPeer { portal: String, peer: String },
}

pub fn parse_file(path: &Path) -> Result<Board, BoardFileError> {
    let text = std::fs::read_to_string(path)?;
    parse_str(&text)
}

pub fn parse_str(text: &str) -> Result<Board, BoardFileError> {
    let mut board = Board::new("default");
    board.set_gravity(GRAVITY_DEFAULT);
    board.set_friction1(FRICTION_DEFAULT);
    board.set_friction2(FRICTION_DEFAULT);

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let mut tokens = line.split_whitespace();
        let Some(kind) = tokens.next() else {
            continue;
        };
        let fields = Fields::new(line_no, tokens)?;
        match kind {
            "board" => {
                if let Some(name) = fields.optional("name") {
                    board.set_name(name);
                }
                if let Some(g) = fields.optional_float("gravity")? {
                    board.set_gravity(g);
                }
                if let Some(f1) = fields.optional_float("friction1")? {
                    if f1 < 0.0 {
                        return Err(fields.fail("friction1 must be non-negative"));
                    }
                    board.set_friction1(f1);
                }
                if let Some(f2) = fields.optional_float("friction2")? {
                    if f2 < 0.0 {
                        return Err(fields.fail("friction2 must be non-negative"));
                    }
                    board.set_friction2(f2);
                }
            }
            "ball" => {
                let ball = Ball::new(
                    fields.required("name")?,
                    Vec2::new(fields.float("x")?, fields.float("y")?),
                    Vec2::new(fields.float("xVelocity")?, fields.float("yVelocity")?),
                );
                board
                    .add_ball(ball)
                    .map_err(|source| BoardFileError::Placement { line: line_no, source })?;
            }
            "squareBumper" => {
                let gadget = Gadget::Square(SquareBumper::new(
                    fields.required("name")?,
                    fields.grid_pos()?,
                ));
                add(&mut board, gadget, line_no)?;
            }
            "circleBumper" => {
                let gadget = Gadget::Circle(CircleBumper::new(
                    fields.required("name")?,
                    fields.grid_pos()?,
                ));
                add(&mut board, gadget, line_no)?;
            }
            "triangleBumper" => {
                let gadget = Gadget::Triangle(TriangleBumper::new(
                    fields.required("name")?,
                    fields.grid_pos()?,
                    fields.orientation()?,
                ));
                add(&mut board, gadget, line_no)?;
            }
            "absorber" => {
                let gadget = Gadget::Absorber(Absorber::new(
                    fields.required("name")?,
                    fields.grid_pos()?,
                    fields.int("width")?,
                    fields.int("height")?,
                ));
                add(&mut board, gadget, line_no)?;
            }
            "leftFlipper" | "rightFlipper" => {
                let hand = if kind == "leftFlipper" {
                    Handedness::Left
                } else {
                    Handedness::Right
                };
                let gadget = Gadget::Flipper(Flipper::new(
                    fields.required("name")?,
                    fields.grid_pos()?,
                    hand,
                    fields.orientation()?,
                ));
                add(&mut board, gadget, line_no)?;
            }
            "portal" => {
                let gadget = Gadget::Portal(Portal::new(
                    fields.required("name")?,
                    fields.grid_pos()?,
                    fields.optional("otherBoard").map(str::to_string),
                    fields.required("otherPortal")?,
                ));
                add(&mut board, gadget, line_no)?;
            }
            "fire" => {
                let trigger = fields.required("trigger")?;
                let action = fields.required("action")?;
                board.set_trigger(&trigger, &action);
            }
            "keydown" | "keyup" => {
                board.add_key_binding(KeyBinding {
                    on_press: kind == "keydown",
                    key: fields.required("key")?,
                    action: fields.required("action")?,
                });
            }
            other => {
                return Err(BoardFileError::Syntax {
                    line: line_no,
                    reason: format!("unknown item {:?}", other),
                });
            }
        }
    }

    board.resolve_pending_triggers();
    check_local_portals(&board)?;
    Ok(board)
}

/// Every local portal must be able to deliver: its peer has to exist on
/// this board. Remote peers are checked at run time against connectivity.
fn check_local_portals(board: &Board) -> Result<(), BoardFileError> {
    for gadget in board.gadgets() {
        let Gadget::Portal(p) = gadget else { continue };
        let local = p.other_board.as_deref().map_or(true, |b| b == board.name());
        if !local {
            continue;
        }
        let peer_exists = board
            .gadgets()
            .iter()
            .any(|g| matches!(g, Gadget::Portal(q) if q.name == p.other_portal));
        if !peer_exists {
            return Err(BoardFileError::MissingLocalPeer {
                portal: p.name.clone(),
                peer: p.other_portal.clone(),
            });
        }
    }
    Ok(())
}

fn add(board: &mut Board, gadget: Gadget, line: usize) -> Result<(), BoardFileError> {
    board
        .add_gadget(gadget)
        .map_err(|source| BoardFileError::Placement { line, source })
}

struct Fields<'a> {
    line: usize,
    map: HashMap<&'a str, &'a str>,
}

impl<'a> Fields<'a> {
    fn new(
        line: usize,
        tokens: impl Iterator<Item = &'a str>,
    ) -> Result<Self, BoardFileError> {
        let mut map = HashMap::new();
        for token in tokens {
            let Some((key, value)) = token.split_once('=') else {
                return Err(BoardFileError::Syntax {
                    line,
                    reason: format!("expected key=value, got {:?}", token),
                });
            };
            if value.is_empty() {
                return Err(BoardFileError::Syntax {
                    line,
                    reason: format!("empty value for {:?}", key),
                });
            }
            map.insert(key, value);
        }
        Ok(Self { line, map })
    }

    fn fail(&self, reason: impl Into<String>) -> BoardFileError {
        BoardFileError::Syntax {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn optional(&self, key: &str) -> Option<&'a str> {
        self.map.get(key).copied()
    }

    fn required(&self, key: &str) -> Result<String, BoardFileError> {
        self.optional(key)
            .map(str::to_string)
            .ok_or_else(|| self.fail(format!("missing {}=", key)))
    }

    fn float(&self, key: &str) -> Result<f64, BoardFileError> {
        let raw = self
            .optional(key)
            .ok_or_else(|| self.fail(format!("missing {}=", key)))?;
        raw.parse()
            .map_err(|_| self.fail(format!("{}= is not a number", key)))
    }

    fn optional_float(&self, key: &str) -> Result<Option<f64>, BoardFileError> {
        match self.optional(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| self.fail(format!("{}= is not a number", key))),
        }
    }

    fn int(&self, key: &str) -> Result<u32, BoardFileError> {
        let raw = self
            .optional(key)
            .ok_or_else(|| self.fail(format!("missing {}=", key)))?;
        raw.parse()
            .map_err(|_| self.fail(format!("{}= is not an integer", key)))
    }

    fn grid_pos(&self) -> Result<Vec2, BoardFileError> {
        Ok(Vec2::new(
            f64::from(self.int("x")?),
            f64::from(self.int("y")?),
        ))
    }

    fn orientation(&self) -> Result<Orientation, BoardFileError> {
        match self.optional("orientation") {
            None => Ok(Orientation::Deg0),
            Some(raw) => {
                let deg: u32 = raw
                    .parse()
                    .map_err(|_| self.fail("orientation= is not an integer"))?;
                Orientation::from_degrees(deg)
                    .ok_or_else(|| self.fail("orientation must be 0, 90, 180 or 270"))
            }
        }
    }
}
