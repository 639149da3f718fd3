//! Networked multiplayer 2D pinball.
//!
//! The library holds the simulation core (geometry kernel, gadget model,
//! board, engine loop), the line-oriented wire protocol, the client session
//! and the relay. The two binaries are thin: `pinball` runs a board,
//! `relay` routes messages between boards.

pub mod cli;
pub mod engine;
pub mod game;
pub mod geometry;
pub mod net;
pub mod protocol;
pub mod relay;
