//! Immutable ball value type.
//!
//! Balls are values: the board rebuilds its ball list each simulation step
//! instead of mutating in place, which keeps collision resolution free of
//! aliasing between the pair being resolved and the rest of the list.

use crate::game::config::{BALL_DIAMETER, BALL_RADIUS, MAX_BALL_SPEED};
use crate::geometry::{self, Circle, Vec2};

#[derive(Clone, Debug, PartialEq)]
pub struct Ball {
    name: String,
    pos: Vec2,
    vel: Vec2,
}

impl Ball {
    /// Velocity magnitude is capped at [`MAX_BALL_SPEED`] so a pathological
    /// reflection cannot run away.
    pub fn new(name: impl Into<String>, pos: Vec2, vel: Vec2) -> Self {
        Self {
            name: name.into(),
            pos,
            vel: vel.clamp_length_max(MAX_BALL_SPEED),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pos(&self) -> Vec2 {
        self.pos
    }

    pub fn vel(&self) -> Vec2 {
        self.vel
    }

    pub fn circle(&self) -> Circle {
        Circle::new(self.pos, BALL_RADIUS)
    }

    /// The ball after free flight for `dt` seconds.
    pub fn advanced(&self, dt: f64) -> Self {
        Self::new(self.name.clone(), self.pos + self.vel * dt, self.vel)
    }

    pub fn with_velocity(&self, vel: Vec2) -> Self {
        Self::new(self.name.clone(), self.pos, vel)
    }

    /// Friction and gravity over `dt`:
    /// `v <- v * max(0, 1 - mu1*dt - mu2*|v|*dt) + (0, g*dt)`.
    pub fn with_friction_gravity(&self, dt: f64, gravity: f64, mu1: f64, mu2: f64) -> Self {
        let speed = self.vel.length();
        let scale = (1.0 - mu1 * dt - mu2 * speed * dt).max(0.0);
        Self::new(
            self.name.clone(),
            self.pos,
            self.vel * scale + Vec2::new(0.0, gravity * dt),
        )
    }

    /// Earliest time this ball touches `other`, or infinity beyond `delta`.
    pub fn time_to_ball(&self, other: &Ball, delta: f64) -> f64 {
        let t = geometry::time_to_ball(&other.circle(), other.vel, &self.circle(), self.vel);
        if t <= delta {
            t
        } else {
            f64::INFINITY
        }
    }

    /// True when placing `other` at its position would overlap this ball;
    /// used to refuse a teleport landing inside us.
    pub fn rejects(&self, other: &Ball) -> bool {
        self.pos.distance_squared(other.pos) <= BALL_DIAMETER * BALL_DIAMETER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    #[test]
    fn free_flight_advances_linearly() {
        let ball = Ball::new("b", Vec2::new(5.0, 5.0), Vec2::new(1.0, -2.0));
        let later = ball.advanced(0.5);
        assert!((later.pos().x - 5.5).abs() < TOL);
        assert!((later.pos().y - 4.0).abs() < TOL);
        assert_eq!(later.vel(), ball.vel());
    }

    #[test]
    fn gravity_only_integration() {
        let ball = Ball::new("b", Vec2::new(5.0, 5.0), Vec2::ZERO);
        let later = ball.with_friction_gravity(1.0, 25.0, 0.0, 0.0);
        assert!((later.vel().y - 25.0).abs() < TOL);
        assert_eq!(later.vel().x, 0.0);
    }

    #[test]
    fn friction_never_reverses_velocity() {
        let ball = Ball::new("b", Vec2::ZERO, Vec2::new(0.1, 0.0));
        // Enormous mu1 over a long step would make the scale negative; it
        // must clamp to a dead stop instead.
        let later = ball.with_friction_gravity(1.0, 0.0, 100.0, 0.0);
        assert_eq!(later.vel(), Vec2::ZERO);
    }

    #[test]
    fn velocity_is_capped() {
        let ball = Ball::new("b", Vec2::ZERO, Vec2::new(1e6, 0.0));
        assert!((ball.vel().length() - MAX_BALL_SPEED).abs() < TOL);
    }

    #[test]
    fn head_on_collision_time() {
        let a = Ball::new("a", Vec2::new(10.0, 10.0), Vec2::new(0.0, 1.0));
        let b = Ball::new("b", Vec2::new(10.0, 11.5), Vec2::new(0.0, -1.0));
        // Gap 1.5 - 0.5 = 1.0, closing at 2.
        let t = a.time_to_ball(&b, 1.0);
        assert!((t - 0.5).abs() < TOL);
        // Outside the foresight window the collision does not exist.
        assert!(a.time_to_ball(&b, 0.1).is_infinite());
    }

    #[test]
    fn overlapping_balls_reject_each_other() {
        let a = Ball::new("a", Vec2::new(10.0, 10.0), Vec2::ZERO);
        let b = Ball::new("b", Vec2::new(10.3, 10.0), Vec2::ZERO);
        assert!(a.rejects(&b));
        let far = Ball::new("c", Vec2::new(12.0, 10.0), Vec2::ZERO);
        assert!(!a.rejects(&far));
    }
}
