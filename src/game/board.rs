//! The board: gadget arena, ball list, trigger graph, wall joins, and the
//! per-frame earliest-collision update.
//!
//! All mutation happens on the simulation task that owns the `Board`. Relay
//! messages are applied between frames through [`Board::handle_message`];
//! messages the board wants sent accumulate in an outbound queue drained by
//! the engine after each frame.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use log::{debug, warn};
use thiserror::Error;

use crate::game::ball::Ball;
use crate::game::config::{BALL_RADIUS, EPS_14, L};
use crate::game::gadget::{Gadget, Portal};
use crate::game::snapshot::{BallView, FlipperView, KeyBinding, KeyEvent, ShapeView, Snapshot};
use crate::geometry::{self, reflect_segment, Segment, Vec2};
use crate::protocol::Message;

/// Backstop against a pathological tangency resolving zero time forever.
const MAX_COLLISIONS_PER_FRAME: u32 = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Wall {
    Left,
    Right,
    Top,
    Bottom,
}

impl Wall {
    pub const ALL: [Wall; 4] = [Wall::Left, Wall::Right, Wall::Top, Wall::Bottom];

    pub fn index(self) -> usize {
        match self {
            Wall::Left => 0,
            Wall::Right => 1,
            Wall::Top => 2,
            Wall::Bottom => 3,
        }
    }

    /// The wall a hand-off arrives through on the neighbouring board.
    pub fn opposite(self) -> Wall {
        match self {
            Wall::Left => Wall::Right,
            Wall::Right => Wall::Left,
            Wall::Top => Wall::Bottom,
            Wall::Bottom => Wall::Top,
        }
    }

    pub fn segment(self) -> Segment {
        match self {
            Wall::Left => Segment::new(Vec2::new(0.0, 0.0), Vec2::new(0.0, L)),
            Wall::Right => Segment::new(Vec2::new(L, 0.0), Vec2::new(L, L)),
            Wall::Top => Segment::new(Vec2::new(0.0, 0.0), Vec2::new(L, 0.0)),
            Wall::Bottom => Segment::new(Vec2::new(0.0, L), Vec2::new(L, L)),
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Wall::Left => "left",
            Wall::Right => "right",
            Wall::Top => "top",
            Wall::Bottom => "bottom",
        }
    }

    pub fn from_token(token: &str) -> Option<Wall> {
        match token {
            "left" => Some(Wall::Left),
            "right" => Some(Wall::Right),
            "top" => Some(Wall::Top),
            "bottom" => Some(Wall::Bottom),
            _ => None,
        }
    }

    /// Where a handed-off ball lands: the tangential coordinate is kept
    /// (clamped inside the playfield so a corner crossing stays legal) and
    /// the normal coordinate is snapped half a ball radius inside this wall.
    pub fn injection_point(self, sent: Vec2) -> Vec2 {
        let inset = BALL_RADIUS / 2.0;
        let clamp = |v: f64| v.clamp(BALL_RADIUS, L - BALL_RADIUS);
        match self {
            Wall::Left => Vec2::new(inset, clamp(sent.y)),
            Wall::Right => Vec2::new(L - inset, clamp(sent.y)),
            Wall::Top => Vec2::new(clamp(sent.x), inset),
            Wall::Bottom => Vec2::new(clamp(sent.x), L - inset),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("duplicate name {0:?}")]
    DuplicateName(String),
    #[error("{0:?} is placed outside the playfield")]
    OutOfBounds(String),
    #[error("{0:?} is not on the integer grid")]
    OffGrid(String),
    #[error("absorber {0:?} has a degenerate or oversized extent")]
    BadExtent(String),
}

#[derive(Debug)]
pub struct Board {
    name: String,
    gravity: f64,
    friction1: f64,
    friction2: f64,
    balls: Vec<Ball>,
    gadgets: Vec<Gadget>,
    /// Trigger graph over gadget handles; actions fire in insertion order.
    trigger_map: HashMap<usize, Vec<usize>>,
    /// `fire` lines whose names did not resolve yet; the parser runs one
    /// deferred pass, after which leftovers are dropped.
    pending_triggers: Vec<(String, String)>,
    absorber_queues: HashMap<usize, VecDeque<String>>,
    joined: [Option<String>; 4],
    connected_boards: Vec<String>,
    /// Portal liveness learned from `connectPortal=`/`disconnectPortal=`.
    portal_connected: HashMap<String, bool>,
    key_bindings: Vec<KeyBinding>,
    outbound: Vec<Message>,
}

impl Board {
    pub fn new(name: impl Into<String>) -> Self {
        use crate::game::config::{FRICTION_DEFAULT, GRAVITY_DEFAULT};
        Self {
            name: name.into(),
            gravity: GRAVITY_DEFAULT,
            friction1: FRICTION_DEFAULT,
            friction2: FRICTION_DEFAULT,
            balls: Vec::new(),
            gadgets: Vec::new(),
            trigger_map: HashMap::new(),
            pending_triggers: Vec::new(),
            absorber_queues: HashMap::new(),
            joined: [None, None, None, None],
            connected_boards: Vec::new(),
            portal_connected: HashMap::new(),
            key_bindings: Vec::new(),
            outbound: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_gravity(&mut self, gravity: f64) {
        self.gravity = gravity;
    }

    pub fn set_friction1(&mut self, mu1: f64) {
        self.friction1 = mu1;
    }

    pub fn set_friction2(&mut self, mu2: f64) {
        self.friction2 = mu2;
    }

    pub fn balls(&self) -> &[Ball] {
        &self.balls
    }

    pub fn gadgets(&self) -> &[Gadget] {
        &self.gadgets
    }

    pub fn join_state(&self) -> &[Option<String>; 4] {
        &self.joined
    }

    pub fn key_bindings(&self) -> &[KeyBinding] {
        &self.key_bindings
    }

    pub fn absorber_queue(&self, name: &str) -> Option<&VecDeque<String>> {
        let idx = self.gadgets.iter().position(|g| g.name() == name)?;
        self.absorber_queues.get(&idx)
    }

    pub fn add_ball(&mut self, ball: Ball) -> Result<(), BoardError> {
        if self.balls.iter().any(|b| b.name() == ball.name()) {
            return Err(BoardError::DuplicateName(ball.name().to_string()));
        }
        let p = ball.pos();
        if !(p.x > 0.0 && p.x < L && p.y > 0.0 && p.y < L) {
            return Err(BoardError::OutOfBounds(ball.name().to_string()));
        }
        self.balls.push(ball);
        Ok(())
    }

    pub fn add_gadget(&mut self, gadget: Gadget) -> Result<(), BoardError> {
        let name = gadget.name().to_string();
        if self.gadgets.iter().any(|g| g.name() == name) {
            return Err(BoardError::DuplicateName(name));
        }
        self.validate_placement(&gadget)?;
        if matches!(gadget, Gadget::Absorber(_)) {
            self.absorber_queues.insert(self.gadgets.len(), VecDeque::new());
        }
        self.gadgets.push(gadget);
        Ok(())
    }

    fn validate_placement(&self, gadget: &Gadget) -> Result<(), BoardError> {
        let name = gadget.name().to_string();
        let check_grid = |p: Vec2| p.x.fract() == 0.0 && p.y.fract() == 0.0;
        let check_cell = |p: Vec2, extent: f64| {
            p.x >= 0.0 && p.y >= 0.0 && p.x + extent <= L && p.y + extent <= L
        };
        match gadget {
            Gadget::Square(g) => {
                if !check_grid(g.pos) {
                    return Err(BoardError::OffGrid(name));
                }
                if !check_cell(g.pos, 1.0) {
                    return Err(BoardError::OutOfBounds(name));
                }
            }
            Gadget::Circle(g) => {
                if !check_grid(g.pos) {
                    return Err(BoardError::OffGrid(name));
                }
                if !check_cell(g.pos, 1.0) {
                    return Err(BoardError::OutOfBounds(name));
                }
            }
            Gadget::Triangle(g) => {
                if !check_grid(g.pos) {
                    return Err(BoardError::OffGrid(name));
                }
                if !check_cell(g.pos, 1.0) {
                    return Err(BoardError::OutOfBounds(name));
                }
            }
            Gadget::Portal(g) => {
                if !check_grid(g.pos) {
                    return Err(BoardError::OffGrid(name));
                }
                if !check_cell(g.pos, 1.0) {
                    return Err(BoardError::OutOfBounds(name));
                }
            }
            Gadget::Flipper(g) => {
                if !check_grid(g.anchor()) {
                    return Err(BoardError::OffGrid(name));
                }
                if !check_cell(g.anchor(), 2.0) {
                    return Err(BoardError::OutOfBounds(name));
                }
            }
            Gadget::Absorber(g) => {
                if !check_grid(g.pos) {
                    return Err(BoardError::OffGrid(name));
                }
                if g.width < 1 || g.height < 1 {
                    return Err(BoardError::BadExtent(name));
                }
                let fits = g.pos.x >= 0.0
                    && g.pos.y >= 0.0
                    && g.pos.x + f64::from(g.width) <= L
                    && g.pos.y + f64::from(g.height) <= L;
                if !fits {
                    return Err(BoardError::BadExtent(name));
                }
            }
        }
        Ok(())
    }

    /// Record that hitting `trigger` fires `action`. Unknown names are kept
    /// aside for the deferred pass rather than rejected: the board file may
    /// forward-reference.
    pub fn set_trigger(&mut self, trigger: &str, action: &str) {
        let t = self.gadgets.iter().position(|g| g.name() == trigger);
        let a = self.gadgets.iter().position(|g| g.name() == action);
        match (t, a) {
            (Some(t), Some(a)) => {
                let actions = self.trigger_map.entry(t).or_default();
                if !actions.contains(&a) {
                    actions.push(a);
                }
            }
            _ => self
                .pending_triggers
                .push((trigger.to_string(), action.to_string())),
        }
    }

    /// Second resolution pass over deferred `fire` lines; whatever still
    /// fails to resolve is silently dropped.
    pub fn resolve_pending_triggers(&mut self) {
        let pending = std::mem::take(&mut self.pending_triggers);
        for (trigger, action) in pending {
            let t = self.gadgets.iter().position(|g| g.name() == trigger);
            let a = self.gadgets.iter().position(|g| g.name() == action);
            if let (Some(t), Some(a)) = (t, a) {
                let actions = self.trigger_map.entry(t).or_default();
                if !actions.contains(&a) {
                    actions.push(a);
                }
            } else {
                debug!("dropping unresolved trigger {} -> {}", trigger, action);
            }
        }
    }

    pub fn add_key_binding(&mut self, binding: KeyBinding) {
        self.key_bindings.push(binding);
    }

    /// Fire whatever bindings match this key edge.
    pub fn apply_key_event(&mut self, event: &KeyEvent) {
        let actions: Vec<String> = self
            .key_bindings
            .iter()
            .filter(|b| b.key == event.key && b.on_press == event.pressed)
            .map(|b| b.action.clone())
            .collect();
        for action in actions {
            self.trigger_by_name(&action);
        }
    }

    /// Fire a gadget by name regardless of what caused it: absorbers emit a
    /// ball, flippers start sweeping, anything else (or an unknown name) is
    /// a no-op.
    pub fn trigger_by_name(&mut self, name: &str) {
        let Some(idx) = self.gadgets.iter().position(|g| g.name() == name) else {
            return;
        };
        self.fire_single(idx);
    }

    pub fn take_outbound(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbound)
    }

    // ------------------------------------------------------------------
    // Frame update
    // ------------------------------------------------------------------

    /// Advance the board through one frame of `frame` seconds: repeatedly
    /// jump to the earliest collision within the remaining budget and
    /// resolve exactly one impact, until the budget is spent.
    pub fn update(&mut self, frame: f64) {
        let mut remaining = frame;
        let mut resolved = 0u32;
        while remaining >= EPS_14 {
            let tau = self.time_to_next_collision(remaining);
            if tau >= remaining {
                self.advance(remaining);
                break;
            }
            self.advance(tau);
            self.resolve_one(remaining);
            remaining -= tau;
            resolved += 1;
            if resolved >= MAX_COLLISIONS_PER_FRAME {
                debug!("collision cap reached on {}", self.name);
                break;
            }
        }
    }

    /// Friction and gravity, applied once per frame with the full frame
    /// time.
    pub fn apply_friction_gravity(&mut self, frame: f64) {
        for ball in &mut self.balls {
            *ball = ball.with_friction_gravity(frame, self.gravity, self.friction1, self.friction2);
        }
    }

    fn advance(&mut self, dt: f64) {
        for ball in &mut self.balls {
            *ball = ball.advanced(dt);
        }
        for gadget in &mut self.gadgets {
            if let Gadget::Flipper(f) = gadget {
                if f.is_moving() {
                    *f = f.step(dt);
                }
            }
        }
    }

    fn time_to_next_collision(&self, within: f64) -> f64 {
        let mut min = f64::INFINITY;
        for (i, ball) in self.balls.iter().enumerate() {
            for other in self.balls.iter().skip(i + 1) {
                min = min.min(ball.time_to_ball(other, within));
            }
            for gadget in &self.gadgets {
                if let Gadget::Portal(p) = gadget {
                    if !self.portal_eligible(p, ball) {
                        continue;
                    }
                }
                min = min.min(gadget.time_to_hit(ball, within));
            }
            for wall in Wall::ALL {
                min = min.min(geometry::time_to_segment(
                    &wall.segment(),
                    &ball.circle(),
                    ball.vel(),
                ));
            }
        }
        min
    }

    /// A portal takes part in collision only when it can actually deliver:
    /// its peer is on this board, or the peer's board is live, or the ball
    /// is currently inside it (so containment can keep excluding it).
    fn portal_eligible(&self, portal: &Portal, ball: &Ball) -> bool {
        if portal.contains(ball) {
            return true;
        }
        match portal.other_board.as_deref() {
            None => true,
            Some(remote) if remote == self.name => true,
            Some(remote) => {
                self.connected_boards.iter().any(|b| b == remote)
                    && self.portal_connected.get(&portal.name).copied() != Some(false)
            }
        }
    }

    /// Resolve the single imminent collision, searching in priority order:
    /// ball-ball, bumper, wall, absorber, portal, flipper. If the imminent
    /// pair vanished between the sweep and this search, nothing happens and
    /// the frame proceeds.
    fn resolve_one(&mut self, within: f64) {
        // Ball-ball.
        for i in 0..self.balls.len() {
            for j in (i + 1)..self.balls.len() {
                if self.balls[i].time_to_ball(&self.balls[j], within) <= EPS_14 {
                    let (v1, v2) = geometry::reflect_balls(
                        self.balls[i].pos(),
                        self.balls[i].vel(),
                        self.balls[j].pos(),
                        self.balls[j].vel(),
                    );
                    self.balls[i] = self.balls[i].with_velocity(v1);
                    self.balls[j] = self.balls[j].with_velocity(v2);
                    return;
                }
            }
        }
        // Bumpers.
        for bi in 0..self.balls.len() {
            for gi in 0..self.gadgets.len() {
                let is_bumper = matches!(
                    self.gadgets[gi],
                    Gadget::Square(_) | Gadget::Circle(_) | Gadget::Triangle(_)
                );
                if is_bumper && self.gadgets[gi].time_to_hit(&self.balls[bi], within) <= EPS_14 {
                    let resolved = self.gadgets[gi].resolve_hit(&self.balls[bi]);
                    self.balls[bi] = resolved;
                    self.fire_actions(gi);
                    return;
                }
            }
        }
        // Walls.
        for bi in 0..self.balls.len() {
            for wall in Wall::ALL {
                let t = geometry::time_to_segment(
                    &wall.segment(),
                    &self.balls[bi].circle(),
                    self.balls[bi].vel(),
                );
                if t <= EPS_14 {
                    self.resolve_wall(bi, wall);
                    return;
                }
            }
        }
        // Absorbers; contained balls report infinity and never re-absorb.
        for bi in 0..self.balls.len() {
            for gi in 0..self.gadgets.len() {
                if matches!(self.gadgets[gi], Gadget::Absorber(_))
                    && self.gadgets[gi].time_to_hit(&self.balls[bi], within) <= EPS_14
                {
                    let name = self.balls[bi].name().to_string();
                    self.balls.remove(bi);
                    self.absorber_queues.entry(gi).or_default().push_back(name);
                    self.fire_actions(gi);
                    return;
                }
            }
        }
        // Portals.
        for bi in 0..self.balls.len() {
            for gi in 0..self.gadgets.len() {
                if let Gadget::Portal(p) = &self.gadgets[gi] {
                    if self.portal_eligible(p, &self.balls[bi])
                        && !p.contains(&self.balls[bi])
                        && self.gadgets[gi].time_to_hit(&self.balls[bi], within) <= EPS_14
                    {
                        self.resolve_portal(bi, gi);
                        return;
                    }
                }
            }
        }
        // Flippers.
        for bi in 0..self.balls.len() {
            for gi in 0..self.gadgets.len() {
                if matches!(self.gadgets[gi], Gadget::Flipper(_))
                    && self.gadgets[gi].time_to_hit(&self.balls[bi], within) <= EPS_14
                {
                    let resolved = self.gadgets[gi].resolve_hit(&self.balls[bi]);
                    self.balls[bi] = resolved;
                    self.fire_actions(gi);
                    return;
                }
            }
        }
    }

    fn resolve_wall(&mut self, bi: usize, wall: Wall) {
        if let Some(dest) = self.joined[wall.index()].clone() {
            let ball = self.balls.remove(bi);
            self.outbound.push(Message::TeleportWall {
                board: dest,
                ball: ball.name().to_string(),
                vel: ball.vel(),
                pos: ball.pos(),
                wall: wall.opposite(),
            });
        } else {
            let vel = reflect_segment(&wall.segment(), self.balls[bi].vel());
            self.balls[bi] = self.balls[bi].with_velocity(vel);
        }
    }

    fn resolve_portal(&mut self, bi: usize, gi: usize) {
        let Gadget::Portal(portal) = self.gadgets[gi].clone() else {
            return;
        };
        let local = portal
            .other_board
            .as_deref()
            .map_or(true, |b| b == self.name);
        if local {
            if let Some(center) = self.portal_center(&portal.other_portal) {
                let ball = &self.balls[bi];
                self.balls[bi] = Ball::new(ball.name(), center, ball.vel());
            } else {
                // Load-time validation makes this unreachable from a parsed
                // board; pass over rather than lose the ball.
                warn!("portal {} has no local peer {}", portal.name, portal.other_portal);
            }
        } else if let Some(remote) = portal.other_board.clone() {
            let ball = self.balls.remove(bi);
            self.outbound.push(Message::TeleportPortal {
                board: remote,
                ball: ball.name().to_string(),
                vel: ball.vel(),
                portal: portal.other_portal.clone(),
            });
        }
    }

    fn portal_center(&self, name: &str) -> Option<Vec2> {
        self.gadgets.iter().find_map(|g| match g {
            Gadget::Portal(p) if p.name == name => Some(p.center()),
            _ => None,
        })
    }

    /// Fire every action wired to `source`, in insertion order. The cascade
    /// is one level deep: an action never re-enters the trigger graph, so a
    /// self-triggered gadget cannot loop within a frame.
    fn fire_actions(&mut self, source: usize) {
        let actions = self.trigger_map.get(&source).cloned().unwrap_or_default();
        for action in actions {
            self.fire_single(action);
        }
    }

    fn fire_single(&mut self, idx: usize) {
        if matches!(self.gadgets[idx], Gadget::Absorber(_)) {
            self.eject_from(idx);
        } else if let Gadget::Flipper(f) = &self.gadgets[idx] {
            let triggered = f.trigger();
            self.gadgets[idx] = Gadget::Flipper(triggered);
        }
    }

    fn eject_from(&mut self, idx: usize) {
        let name = match self.absorber_queues.get_mut(&idx) {
            Some(queue) => match queue.pop_front() {
                Some(name) => name,
                None => return,
            },
            None => return,
        };
        if let Gadget::Absorber(a) = &self.gadgets[idx] {
            self.balls.push(a.eject(&name));
        }
    }

    // ------------------------------------------------------------------
    // Relay messages
    // ------------------------------------------------------------------

    pub fn handle_message(&mut self, msg: &Message) {
        match msg {
            Message::JoinHorizontal { left, right } => {
                if self.name == *left {
                    self.joined[Wall::Left.index()] = Some(right.clone());
                }
                if self.name == *right {
                    self.joined[Wall::Right.index()] = Some(left.clone());
                }
            }
            Message::JoinVertical { top, bottom } => {
                if self.name == *top {
                    self.joined[Wall::Top.index()] = Some(bottom.clone());
                }
                if self.name == *bottom {
                    self.joined[Wall::Bottom.index()] = Some(top.clone());
                }
            }
            Message::DisconnectWall { board, wall } => {
                // The named board is being rejoined on `wall`; whoever faces
                // that wall from the other side must drop the old link.
                let facing = wall.opposite();
                if self.joined[facing.index()].as_deref() == Some(board.as_str()) {
                    self.joined[facing.index()] = None;
                }
            }
            Message::AllConnectedBoards(boards) => {
                let previous = std::mem::replace(&mut self.connected_boards, boards.clone());
                for slot in &mut self.joined {
                    if let Some(b) = slot {
                        if !boards.contains(b) {
                            *slot = None;
                        }
                    }
                }
                self.publish_portal_liveness(&previous);
            }
            Message::ConnectPortal { portal, .. } => {
                self.portal_connected.insert(portal.clone(), true);
            }
            Message::DisconnectPortal { portal, .. } => {
                self.portal_connected.insert(portal.clone(), false);
            }
            Message::TeleportPortal {
                ball, vel, portal, ..
            } => {
                if let Some(center) = self.portal_center(portal) {
                    self.balls.push(Ball::new(ball.clone(), center, *vel));
                } else {
                    warn!("teleport to unknown portal {} dropped", portal);
                }
            }
            Message::TeleportWall {
                ball, vel, pos, wall, ..
            } => {
                let landing = wall.injection_point(*pos);
                self.launch_from_wall(Ball::new(ball.clone(), landing, *vel));
            }
            Message::Failure => warn!("relay could not deliver a message from {}", self.name),
            _ => {}
        }
    }

    /// The relay link died: all wall joins referenced a peer that can no
    /// longer be reached.
    pub fn peer_lost(&mut self) {
        self.joined = [None, None, None, None];
        self.connected_boards.clear();
    }

    /// Announce to freshly connected peer boards that our portals pointing
    /// at them are live again.
    fn publish_portal_liveness(&mut self, previous: &[String]) {
        let mut announcements = Vec::new();
        for gadget in &self.gadgets {
            if let Gadget::Portal(p) = gadget {
                if let Some(remote) = &p.other_board {
                    if *remote == self.name {
                        continue;
                    }
                    let was = previous.iter().any(|b| b == remote);
                    let now = self.connected_boards.iter().any(|b| b == remote);
                    if now && !was {
                        announcements.push(Message::ConnectPortal {
                            board: remote.clone(),
                            portal: p.other_portal.clone(),
                        });
                    }
                }
            }
        }
        self.outbound.extend(announcements);
    }

    /// Inject a ball arriving over a wall join. A placement blocked by a
    /// ball, bumper or flipper is refused and the ball vanishes; a portal
    /// or absorber under the landing point captures it instead.
    fn launch_from_wall(&mut self, ball: Ball) {
        if self.balls.iter().any(|b| b.rejects(&ball)) {
            debug!("arrival {} rejected by a ball", ball.name());
            return;
        }
        for gadget in &self.gadgets {
            let blocking = matches!(
                gadget,
                Gadget::Square(_) | Gadget::Circle(_) | Gadget::Triangle(_) | Gadget::Flipper(_)
            );
            if blocking && gadget.rejects(&ball) {
                debug!("arrival {} rejected by {}", ball.name(), gadget.name());
                return;
            }
        }
        let portal_under = self.gadgets.iter().enumerate().find_map(|(gi, g)| match g {
            Gadget::Portal(p) if p.intersects(&ball) && self.portal_eligible(p, &ball) => Some(gi),
            _ => None,
        });
        if let Some(gi) = portal_under {
            self.balls.push(ball);
            let bi = self.balls.len() - 1;
            self.resolve_portal(bi, gi);
            return;
        }
        let absorber_under = self.gadgets.iter().enumerate().find_map(|(gi, g)| match g {
            Gadget::Absorber(a) if a.intersects(&ball) => Some(gi),
            _ => None,
        });
        if let Some(gi) = absorber_under {
            self.absorber_queues
                .entry(gi)
                .or_default()
                .push_back(ball.name().to_string());
            return;
        }
        self.balls.push(ball);
    }

    // ------------------------------------------------------------------
    // Render view
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> Snapshot {
        let balls = self
            .balls
            .iter()
            .map(|b| BallView {
                name: b.name().to_string(),
                pos: b.pos(),
                vel: b.vel(),
            })
            .collect();
        let mut flippers = Vec::new();
        let mut statics = Vec::new();
        for gadget in &self.gadgets {
            match gadget {
                Gadget::Flipper(f) => {
                    let line = f.line();
                    flippers.push(FlipperView {
                        name: f.name().to_string(),
                        p1: line.p1,
                        p2: line.p2,
                        moving: f.is_moving(),
                    });
                }
                Gadget::Square(g) => statics.push(ShapeView::Rect {
                    pos: g.pos,
                    width: 1.0,
                    height: 1.0,
                }),
                Gadget::Circle(g) => statics.push(ShapeView::Circle {
                    center: g.pos + Vec2::new(0.5, 0.5),
                    radius: 0.5,
                }),
                Gadget::Triangle(g) => statics.push(ShapeView::Polygon {
                    points: g.vertices().to_vec(),
                }),
                Gadget::Absorber(g) => statics.push(ShapeView::Rect {
                    pos: g.pos,
                    width: f64::from(g.width),
                    height: f64::from(g.height),
                }),
                Gadget::Portal(g) => statics.push(ShapeView::Circle {
                    center: g.center(),
                    radius: 0.5,
                }),
            }
        }
        Snapshot {
            board: self.name.clone(),
            balls,
            flippers,
            statics,
            joins: self.joined.clone(),
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "board {} gravity={} friction1={} friction2={}",
            self.name, self.gravity, self.friction1, self.friction2
        )?;
        for ball in &self.balls {
            writeln!(
                f,
                "  ball {} @ ({:.3}, {:.3}) v=({:.3}, {:.3})",
                ball.name(),
                ball.pos().x,
                ball.pos().y,
                ball.vel().x,
                ball.vel().y
            )?;
        }
        for gadget in &self.gadgets {
            writeln!(f, "  {}", gadget)?;
        }
        for wall in Wall::ALL {
            if let Some(peer) = &self.joined[wall.index()] {
                writeln!(f, "  joined {} -> {}", wall.token(), peer)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::flipper::{Flipper, Handedness};
    use crate::game::gadget::{Absorber, CircleBumper, Portal, SquareBumper, TriangleBumper};
    use crate::geometry::Orientation;

    const FRAME: f64 = 0.02;

    fn frictionless(name: &str) -> Board {
        let mut board = Board::new(name);
        board.set_gravity(0.0);
        board.set_friction1(0.0);
        board.set_friction2(0.0);
        board
    }

    fn step(board: &mut Board, frame: f64) {
        board.update(frame);
        board.apply_friction_gravity(frame);
    }

    #[test]
    fn lone_ball_falls_under_gravity_then_bounces() {
        let mut board = Board::new("solo");
        board.set_gravity(25.0);
        board.set_friction1(0.0);
        board.set_friction2(0.0);
        board
            .add_ball(Ball::new("b", Vec2::new(5.0, 5.0), Vec2::ZERO))
            .unwrap();

        for _ in 0..50 {
            step(&mut board, FRAME);
        }
        let ball = &board.balls()[0];
        // One second of 20 ms Euler frames: v = 25, y a little short of the
        // continuous 17.5 because each frame moves at the pre-gravity speed.
        assert!((ball.vel().y - 25.0).abs() < 1e-9);
        assert!(ball.pos().y > 17.0 && ball.pos().y < 17.6);

        // Keep going: the ball must bounce off the bottom wall, not escape.
        let mut bounced = false;
        for _ in 0..100 {
            step(&mut board, FRAME);
            let b = &board.balls()[0];
            assert!(b.pos().y > 0.0 && b.pos().y < L);
            if b.vel().y < 0.0 {
                bounced = true;
                break;
            }
        }
        assert!(bounced);
    }

    #[test]
    fn free_flight_matches_the_analytic_step() {
        let mut board = frictionless("flight");
        board.set_gravity(10.0);
        board
            .add_ball(Ball::new("b", Vec2::new(3.0, 3.0), Vec2::new(2.0, 1.0)))
            .unwrap();
        step(&mut board, FRAME);
        let ball = &board.balls()[0];
        assert!((ball.pos().x - (3.0 + 2.0 * FRAME)).abs() < 1e-9);
        assert!((ball.pos().y - (3.0 + 1.0 * FRAME)).abs() < 1e-9);
        assert!((ball.vel().y - (1.0 + 10.0 * FRAME)).abs() < 1e-9);
    }

    #[test]
    fn head_on_balls_exchange_velocities() {
        let mut board = frictionless("duo");
        board
            .add_ball(Ball::new("a", Vec2::new(10.0, 10.0), Vec2::new(0.0, 1.0)))
            .unwrap();
        board
            .add_ball(Ball::new("b", Vec2::new(10.0, 10.5), Vec2::new(0.0, -1.0)))
            .unwrap();
        step(&mut board, 0.01);
        let a = board.balls().iter().find(|b| b.name() == "a").unwrap();
        let b = board.balls().iter().find(|b| b.name() == "b").unwrap();
        assert!((a.vel().y - -1.0).abs() < 1e-9);
        assert!((b.vel().y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tangent_ball_does_not_stall_the_frame() {
        let mut board = frictionless("tangent");
        // Resting exactly against the right wall and pushing into it.
        board
            .add_ball(Ball::new("b", Vec2::new(L - BALL_RADIUS, 10.0), Vec2::new(1.0, 0.0)))
            .unwrap();
        step(&mut board, FRAME);
        let ball = &board.balls()[0];
        assert!(ball.vel().x < 0.0);
        assert!(ball.pos().x < L);
    }

    #[test]
    fn absorber_queues_and_fires_in_order() {
        let mut board = frictionless("abs");
        board
            .add_gadget(Gadget::Absorber(Absorber::new(
                "trap",
                Vec2::new(0.0, 18.0),
                10,
                2,
            )))
            .unwrap();
        board
            .add_ball(Ball::new("b1", Vec2::new(5.0, 17.0), Vec2::new(0.0, 10.0)))
            .unwrap();
        for _ in 0..10 {
            step(&mut board, FRAME);
        }
        assert!(board.balls().is_empty());
        assert_eq!(
            board.absorber_queue("trap").unwrap().iter().collect::<Vec<_>>(),
            vec!["b1"]
        );

        board.trigger_by_name("trap");
        assert_eq!(board.balls().len(), 1);
        let shot = &board.balls()[0];
        assert!((shot.pos().x - 9.75).abs() < 1e-9);
        assert!((shot.pos().y - 19.75).abs() < 1e-9);
        assert!((shot.vel().y - -50.0).abs() < 1e-9);
        assert!(board.absorber_queue("trap").unwrap().is_empty());
    }

    #[test]
    fn self_triggered_absorber_fires_on_entry() {
        let mut board = frictionless("self");
        board
            .add_gadget(Gadget::Absorber(Absorber::new(
                "trap",
                Vec2::new(0.0, 18.0),
                10,
                2,
            )))
            .unwrap();
        board.set_trigger("trap", "trap");
        board
            .add_ball(Ball::new("b1", Vec2::new(5.0, 17.5), Vec2::new(0.0, 10.0)))
            .unwrap();
        for _ in 0..5 {
            step(&mut board, FRAME);
        }
        // The entry fired the trap, so the one queued ball came right back
        // out: conservation holds with the ball in flight again.
        assert_eq!(board.balls().len(), 1);
        assert!(board.absorber_queue("trap").unwrap().is_empty());
        assert!((board.balls()[0].vel().y + 50.0).abs() < 1.0); // gravity-free eject
    }

    #[test]
    fn bumper_hit_fires_its_actions() {
        let mut board = frictionless("wired");
        board
            .add_gadget(Gadget::Square(SquareBumper::new("sq", Vec2::new(10.0, 10.0))))
            .unwrap();
        board
            .add_gadget(Gadget::Absorber(Absorber::new(
                "trap",
                Vec2::new(0.0, 18.0),
                20,
                2,
            )))
            .unwrap();
        board.set_trigger("sq", "trap");
        // Preload the trap through a direct absorption.
        board
            .add_ball(Ball::new("stored", Vec2::new(5.0, 17.5), Vec2::new(0.0, 10.0)))
            .unwrap();
        for _ in 0..10 {
            step(&mut board, FRAME);
        }
        assert_eq!(board.absorber_queue("trap").unwrap().len(), 1);

        board
            .add_ball(Ball::new("striker", Vec2::new(8.0, 10.5), Vec2::new(5.0, 0.0)))
            .unwrap();
        for _ in 0..25 {
            step(&mut board, FRAME);
        }
        // The bumper reflected the striker and released the stored ball.
        assert_eq!(board.balls().len(), 2);
        assert!(board.absorber_queue("trap").unwrap().is_empty());
    }

    #[test]
    fn local_portal_round_trip_preserves_velocity() {
        let mut board = frictionless("portals");
        board
            .add_gadget(Gadget::Portal(Portal::new("P1", Vec2::new(5.0, 5.0), None, "P2")))
            .unwrap();
        board
            .add_gadget(Gadget::Portal(Portal::new("P2", Vec2::new(10.0, 5.0), None, "P1")))
            .unwrap();
        board
            .add_ball(Ball::new("b", Vec2::new(4.0, 5.5), Vec2::new(3.0, 0.0)))
            .unwrap();
        // Entry at t = 0.25 into P1; re-emitted from P2's centre.
        step(&mut board, 0.3);
        let ball = &board.balls()[0];
        assert!((ball.vel().x - 3.0).abs() < 1e-9);
        assert!((ball.pos().y - 5.5).abs() < 1e-9);
        assert!(ball.pos().x > 10.5 && ball.pos().x < 10.7);
    }

    #[test]
    fn self_peered_portal_passes_the_ball_through() {
        let mut board = frictionless("narcissus");
        board
            .add_gadget(Gadget::Portal(Portal::new("P", Vec2::new(5.0, 5.0), None, "P")))
            .unwrap();
        board
            .add_ball(Ball::new("b", Vec2::new(4.0, 5.5), Vec2::new(3.0, 0.0)))
            .unwrap();
        for _ in 0..40 {
            step(&mut board, FRAME);
        }
        // The ball teleported to the portal's own centre and then flew on
        // with its velocity intact.
        let ball = &board.balls()[0];
        assert!((ball.vel().x - 3.0).abs() < 1e-9);
        assert!(ball.pos().x > 6.0);
    }

    #[test]
    fn remote_portal_emits_a_teleport_message() {
        let mut board = frictionless("Mercury");
        board
            .add_gadget(Gadget::Portal(Portal::new(
                "out",
                Vec2::new(5.0, 5.0),
                Some("Venus".to_string()),
                "in",
            )))
            .unwrap();
        board.handle_message(&Message::AllConnectedBoards(vec![
            "Mercury".into(),
            "Venus".into(),
        ]));
        // Seeing Venus appear published our interest in its portal.
        let outbound = board.take_outbound();
        assert!(outbound.contains(&Message::ConnectPortal {
            board: "Venus".into(),
            portal: "in".into()
        }));

        board
            .add_ball(Ball::new("b", Vec2::new(4.0, 5.5), Vec2::new(3.0, 0.0)))
            .unwrap();
        for _ in 0..20 {
            step(&mut board, FRAME);
        }
        assert!(board.balls().is_empty());
        let outbound = board.take_outbound();
        assert_eq!(
            outbound,
            vec![Message::TeleportPortal {
                board: "Venus".into(),
                ball: "b".into(),
                vel: Vec2::new(3.0, 0.0),
                portal: "in".into(),
            }]
        );
    }

    #[test]
    fn disconnected_remote_portal_lets_the_ball_pass() {
        let mut board = frictionless("Mercury");
        board
            .add_gadget(Gadget::Portal(Portal::new(
                "out",
                Vec2::new(5.0, 5.0),
                Some("Venus".to_string()),
                "in",
            )))
            .unwrap();
        board
            .add_ball(Ball::new("b", Vec2::new(4.0, 5.5), Vec2::new(3.0, 0.0)))
            .unwrap();
        for _ in 0..40 {
            step(&mut board, FRAME);
        }
        // Venus is not connected: the portal never took part in collision.
        let ball = &board.balls()[0];
        assert!(ball.pos().x > 6.0);
    }

    #[test]
    fn joined_wall_hands_the_ball_off() {
        let mut board = frictionless("A");
        board.handle_message(&Message::JoinHorizontal {
            left: "A".into(),
            right: "B".into(),
        });
        assert_eq!(board.join_state()[Wall::Left.index()].as_deref(), Some("B"));

        board
            .add_ball(Ball::new("ballA", Vec2::new(0.3, 5.0), Vec2::new(-10.0, 0.0)))
            .unwrap();
        step(&mut board, FRAME);
        assert!(board.balls().is_empty());
        let outbound = board.take_outbound();
        match &outbound[..] {
            [Message::TeleportWall {
                board: dest,
                ball,
                vel,
                pos,
                wall,
            }] => {
                assert_eq!(dest, "B");
                assert_eq!(ball, "ballA");
                assert_eq!(*vel, Vec2::new(-10.0, 0.0));
                assert!((pos.x - BALL_RADIUS).abs() < 1e-9);
                assert_eq!(*wall, Wall::Right);
            }
            other => panic!("unexpected outbound {:?}", other),
        }
    }

    #[test]
    fn wall_arrival_is_injected_just_inside() {
        let mut board = frictionless("B");
        board.handle_message(&Message::TeleportWall {
            board: "B".into(),
            ball: "ballA".into(),
            vel: Vec2::new(-10.0, 0.0),
            pos: Vec2::new(0.0, 5.0),
            wall: Wall::Right,
        });
        assert_eq!(board.balls().len(), 1);
        let ball = &board.balls()[0];
        assert!((ball.pos().x - (L - BALL_RADIUS / 2.0)).abs() < 1e-9);
        assert!((ball.pos().y - 5.0).abs() < 1e-9);
        assert_eq!(ball.vel(), Vec2::new(-10.0, 0.0));
    }

    #[test]
    fn corner_arrival_is_clamped_onto_the_playfield() {
        let mut board = frictionless("B");
        board.handle_message(&Message::TeleportWall {
            board: "B".into(),
            ball: "b".into(),
            vel: Vec2::new(1.0, 1.0),
            pos: Vec2::new(19.99, 20.3),
            wall: Wall::Bottom,
        });
        let ball = &board.balls()[0];
        assert!((ball.pos().y - (L - BALL_RADIUS / 2.0)).abs() < 1e-9);
        assert!(ball.pos().x <= L - BALL_RADIUS);
    }

    #[test]
    fn blocked_arrival_is_refused() {
        let mut board = frictionless("B");
        board
            .add_gadget(Gadget::Circle(CircleBumper::new("c", Vec2::new(19.0, 5.0))))
            .unwrap();
        board.handle_message(&Message::TeleportWall {
            board: "B".into(),
            ball: "b".into(),
            vel: Vec2::new(-1.0, 0.0),
            pos: Vec2::new(20.0, 5.5),
            wall: Wall::Right,
        });
        assert!(board.balls().is_empty());
    }

    #[test]
    fn join_is_idempotent_and_eviction_works() {
        let mut board = frictionless("C");
        // C was joined to A across its right wall (A's left faces us).
        board.handle_message(&Message::JoinHorizontal {
            left: "A".into(),
            right: "C".into(),
        });
        let once = board.join_state().clone();
        board.handle_message(&Message::JoinHorizontal {
            left: "A".into(),
            right: "C".into(),
        });
        assert_eq!(&once, board.join_state());
        assert_eq!(board.join_state()[Wall::Right.index()].as_deref(), Some("A"));

        // The relay joins A to someone else on that wall; we are told.
        board.handle_message(&Message::DisconnectWall {
            board: "A".into(),
            wall: Wall::Left,
        });
        assert_eq!(board.join_state()[Wall::Right.index()], None);
    }

    #[test]
    fn lost_boards_drop_out_of_the_join_map() {
        let mut board = frictionless("A");
        board.handle_message(&Message::JoinHorizontal {
            left: "A".into(),
            right: "B".into(),
        });
        board.handle_message(&Message::AllConnectedBoards(vec!["A".into()]));
        assert_eq!(board.join_state()[Wall::Left.index()], None);
    }

    #[test]
    fn peer_loss_clears_every_join() {
        let mut board = frictionless("A");
        board.handle_message(&Message::JoinHorizontal {
            left: "A".into(),
            right: "B".into(),
        });
        board.peer_lost();
        assert_eq!(board.join_state(), &[None, None, None, None]);
    }

    #[test]
    fn triggers_resolve_forward_references() {
        let mut board = frictionless("fwd");
        board.set_trigger("sq", "trap"); // neither exists yet
        board
            .add_gadget(Gadget::Square(SquareBumper::new("sq", Vec2::new(10.0, 10.0))))
            .unwrap();
        board
            .add_gadget(Gadget::Absorber(Absorber::new(
                "trap",
                Vec2::new(0.0, 18.0),
                20,
                2,
            )))
            .unwrap();
        board.resolve_pending_triggers();
        assert_eq!(board.trigger_map.len(), 1);
    }

    #[test]
    fn unknown_trigger_by_name_is_a_no_op() {
        let mut board = frictionless("quiet");
        board.trigger_by_name("nothing-here");
        assert!(board.balls().is_empty());
    }

    #[test]
    fn key_bindings_route_to_gadgets() {
        let mut board = frictionless("keys");
        board
            .add_gadget(Gadget::Absorber(Absorber::new(
                "trap",
                Vec2::new(0.0, 18.0),
                10,
                2,
            )))
            .unwrap();
        board
            .add_ball(Ball::new("b", Vec2::new(5.0, 17.5), Vec2::new(0.0, 10.0)))
            .unwrap();
        for _ in 0..10 {
            step(&mut board, FRAME);
        }
        board.add_key_binding(KeyBinding {
            on_press: true,
            key: "space".into(),
            action: "trap".into(),
        });
        board.apply_key_event(&KeyEvent {
            key: "space".into(),
            pressed: true,
        });
        assert_eq!(board.balls().len(), 1);
    }

    #[test]
    fn construction_rejects_bad_descriptors() {
        let mut board = Board::new("strict");
        board
            .add_gadget(Gadget::Square(SquareBumper::new("sq", Vec2::new(1.0, 1.0))))
            .unwrap();
        assert_eq!(
            board.add_gadget(Gadget::Square(SquareBumper::new("sq", Vec2::new(2.0, 2.0)))),
            Err(BoardError::DuplicateName("sq".into()))
        );
        assert_eq!(
            board.add_gadget(Gadget::Square(SquareBumper::new("edge", Vec2::new(20.0, 0.0)))),
            Err(BoardError::OutOfBounds("edge".into()))
        );
        assert_eq!(
            board.add_gadget(Gadget::Absorber(Absorber::new(
                "huge",
                Vec2::new(5.0, 5.0),
                20,
                2
            ))),
            Err(BoardError::BadExtent("huge".into()))
        );
        assert_eq!(
            board.add_ball(Ball::new("out", Vec2::new(25.0, 5.0), Vec2::ZERO)),
            Err(BoardError::OutOfBounds("out".into()))
        );
    }

    #[test]
    fn display_dumps_the_layout() {
        let mut board = frictionless("dump");
        board
            .add_gadget(Gadget::Square(SquareBumper::new("sq", Vec2::new(3.0, 3.0))))
            .unwrap();
        board
            .add_ball(Ball::new("b", Vec2::new(5.0, 5.0), Vec2::ZERO))
            .unwrap();
        board.handle_message(&Message::JoinHorizontal {
            left: "dump".into(),
            right: "other".into(),
        });
        let dump = board.to_string();
        assert!(dump.contains("board dump"));
        assert!(dump.contains("ball b"));
        assert!(dump.contains("squareBumper sq"));
        assert!(dump.contains("joined left -> other"));
    }

    #[test]
    fn snapshot_reflects_the_board() {
        let mut board = frictionless("view");
        board
            .add_gadget(Gadget::Triangle(TriangleBumper::new(
                "t",
                Vec2::new(3.0, 3.0),
                Orientation::Deg90,
            )))
            .unwrap();
        board
            .add_gadget(Gadget::Flipper(Flipper::new(
                "f",
                Vec2::new(10.0, 10.0),
                Handedness::Left,
                Orientation::Deg0,
            )))
            .unwrap();
        board
            .add_ball(Ball::new("b", Vec2::new(5.0, 5.0), Vec2::ZERO))
            .unwrap();
        let snap = board.snapshot();
        assert_eq!(snap.board, "view");
        assert_eq!(snap.balls.len(), 1);
        assert_eq!(snap.flippers.len(), 1);
        assert_eq!(snap.statics.len(), 1);
        // The snapshot serialises for the frame trace.
        assert!(serde_json::to_string(&snap).is_ok());
    }
}
