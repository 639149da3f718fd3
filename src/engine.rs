//! The simulation actor.
//!
//! Owns the board and runs the wall-clock frame cadence. Everything that
//! wants to touch board state (relay messages, key edges, quit) is funnelled
//! in as an event and applied between frames; outbound wire messages are
//! pumped to the connection after each frame.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info};
use simple_moving_average::{SumTreeSMA, SMA};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use crate::game::board::Board;
use crate::game::snapshot::KeyEvent;
use crate::net::{Connection, NetEvent};
use crate::protocol::Message;

pub const FRAME: Duration = Duration::from_millis(20);

/// Frames between periodic timing reports.
const REPORT_EVERY: u64 = 500;

#[derive(Debug)]
pub enum Event {
    Key(KeyEvent),
    Quit,
}

pub async fn run(
    mut board: Board,
    mut conn: Option<Connection>,
    mut events: mpsc::UnboundedReceiver<Event>,
    trace: Option<mpsc::UnboundedSender<String>>,
) -> Result<()> {
    let mut ticker = interval(FRAME);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ma = SumTreeSMA::<_, _, 50>::from_zero(Duration::ZERO);
    let mut held_keys: HashSet<String> = HashSet::new();
    let mut last = Instant::now();
    let mut frames: u64 = 0;

    loop {
        ticker.tick().await;

        let mut quitting = false;
        while let Ok(event) = events.try_recv() {
            match event {
                Event::Key(key) => {
                    // A held key fires once; release re-arms it.
                    if key.pressed && !held_keys.insert(key.key.clone()) {
                        continue;
                    }
                    if !key.pressed {
                        held_keys.remove(&key.key);
                    }
                    board.apply_key_event(&key);
                }
                Event::Quit => quitting = true,
            }
        }

        let mut lost = false;
        if let Some(c) = conn.as_mut() {
            while let Ok(event) = c.events.try_recv() {
                match event {
                    NetEvent::Relay(msg) => board.handle_message(&msg),
                    NetEvent::Lost => lost = true,
                }
            }
        }
        if lost {
            info!("relay link lost; continuing standalone");
            board.peer_lost();
            conn = None;
        }

        if quitting {
            if let Some(c) = conn.take() {
                c.send(&Message::Quit);
                c.close().await;
            }
            info!("quit");
            return Ok(());
        }

        let dt = last
            .elapsed()
            .as_secs_f64()
            .min(2.0 * FRAME.as_secs_f64());
        last = Instant::now();

        let compute = Instant::now();
        board.update(dt);
        board.apply_friction_gravity(dt);
        ma.add_sample(compute.elapsed());

        for msg in board.take_outbound() {
            match &conn {
                Some(c) => c.send(&msg),
                None => debug!("standalone, dropping {}", msg),
            }
        }

        if let Some(trace) = &trace {
            let _ = trace.send(serde_json::to_string(&board.snapshot())?);
        }

        frames += 1;
        if frames % REPORT_EVERY == 0 {
            debug!(
                "{}: average frame compute time {:?}",
                board.name(),
                ma.get_average()
            );
        }
    }
}
