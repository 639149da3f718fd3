//! Flipper state machine.
//!
//! A flipper is a length-2 line anchored at a pivot corner of its 2x2
//! bounding box. It has two stable states, rest (0 degrees) and extended
//! (90 degrees), and sweeps between them at a constant angular speed once
//! triggered. While sweeping, collisions use the rotating-surface primitives
//! so the ball picks up momentum from the moving line.

use std::f64::consts::FRAC_PI_2;
use std::fmt;

use serde::Serialize;

use crate::game::ball::Ball;
use crate::game::config::{
    EPS_12, EPS_16, FLIPPER_ANGULAR_SPEED, FLIPPER_LENGTH, FLIPPER_RESTITUTION,
};
use crate::geometry::{
    self, reflect_circle, reflect_rotating_circle, reflect_rotating_segment, reflect_segment,
    rotate_segment, Circle, Orientation, Segment, Vec2,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Handedness {
    Left,
    Right,
}

#[derive(Clone, Debug)]
pub struct Flipper {
    name: String,
    /// Top-left of the 2x2 bounding box.
    anchor: Vec2,
    hand: Handedness,
    orientation: Orientation,
    /// Sweep progress from the rest line, in `[0, PI/2]`.
    rotation: f64,
    moving: bool,
    /// Signed sweep speed in the file convention: positive for left
    /// flippers at rest, negative for right. The sign alternates at each
    /// endpoint so the next trigger runs the sweep backwards.
    angular_velocity: f64,
}

impl Flipper {
    pub fn new(name: impl Into<String>, anchor: Vec2, hand: Handedness, orientation: Orientation) -> Self {
        let angular_velocity = match hand {
            Handedness::Left => FLIPPER_ANGULAR_SPEED,
            Handedness::Right => -FLIPPER_ANGULAR_SPEED,
        };
        Self {
            name: name.into(),
            anchor,
            hand,
            orientation,
            rotation: 0.0,
            moving: false,
            angular_velocity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn anchor(&self) -> Vec2 {
        self.anchor
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    /// Pivot corner and rest-position line for this hand and orientation.
    fn rest_line(&self) -> (Vec2, Segment) {
        let len = FLIPPER_LENGTH;
        let a = self.anchor;
        let (pivot, tip) = match (self.hand, self.orientation) {
            (Handedness::Left, Orientation::Deg0) => (a, a + Vec2::new(0.0, len)),
            (Handedness::Left, Orientation::Deg90) => {
                (a + Vec2::new(0.0, len), a + Vec2::new(len, len))
            }
            (Handedness::Left, Orientation::Deg180) => {
                (a + Vec2::new(len, len), a + Vec2::new(len, 0.0))
            }
            (Handedness::Left, Orientation::Deg270) => (a + Vec2::new(len, 0.0), a),
            (Handedness::Right, Orientation::Deg0) => {
                (a + Vec2::new(len, 0.0), a + Vec2::new(len, len))
            }
            (Handedness::Right, Orientation::Deg90) => {
                (a + Vec2::new(len, len), a + Vec2::new(0.0, len))
            }
            (Handedness::Right, Orientation::Deg180) => (a + Vec2::new(0.0, len), a),
            (Handedness::Right, Orientation::Deg270) => (a, a + Vec2::new(len, 0.0)),
        };
        (pivot, Segment::new(pivot, tip))
    }

    /// The sweep runs through opposite angular directions for the two
    /// hands: a left flipper's line swings by `-rotation`, a right one's by
    /// `+rotation`.
    fn geometric_rotation(&self) -> f64 {
        match self.hand {
            Handedness::Left => -self.rotation,
            Handedness::Right => self.rotation,
        }
    }

    /// Sweep-space rate: positive while heading for 90 degrees.
    fn sweep_rate(&self) -> f64 {
        match self.hand {
            Handedness::Left => self.angular_velocity,
            Handedness::Right => -self.angular_velocity,
        }
    }

    /// Board-frame angular velocity of the line while moving.
    fn surface_omega(&self) -> f64 {
        if !self.moving {
            return 0.0;
        }
        match self.hand {
            Handedness::Left => -self.sweep_rate(),
            Handedness::Right => self.sweep_rate(),
        }
    }

    pub fn line(&self) -> Segment {
        let (pivot, rest) = self.rest_line();
        rotate_segment(&rest, pivot, self.geometric_rotation())
    }

    fn end_caps(&self) -> [Circle; 2] {
        let line = self.line();
        [Circle::point(line.p1), Circle::point(line.p2)]
    }

    /// Start a sweep toward the far endpoint. Triggering a flipper that is
    /// already moving does nothing.
    pub fn trigger(&self) -> Flipper {
        if self.moving {
            return self.clone();
        }
        Flipper {
            moving: true,
            ..self.clone()
        }
    }

    /// Advance the sweep by `dt`, clamping at either endpoint. Reaching an
    /// endpoint parks the flipper and reverses the stored sign so the next
    /// trigger sweeps back.
    pub fn step(&self, dt: f64) -> Flipper {
        if !self.moving {
            return self.clone();
        }
        let next = self.rotation + self.sweep_rate() * dt;
        let mut out = self.clone();
        if next >= FRAC_PI_2 {
            out.rotation = FRAC_PI_2;
            out.moving = false;
            out.angular_velocity = -self.angular_velocity;
        } else if next <= 0.0 {
            out.rotation = 0.0;
            out.moving = false;
            out.angular_velocity = -self.angular_velocity;
        } else {
            out.rotation = next;
        }
        out
    }

    pub fn time_to_hit(&self, ball: &Ball, delta: f64) -> f64 {
        let circle = ball.circle();
        let vel = ball.vel();
        let (pivot, _) = self.rest_line();
        let line = self.line();

        let mut min = if self.moving {
            geometry::time_to_rotating_segment(&line, pivot, self.surface_omega(), &circle, vel, delta)
        } else {
            geometry::time_to_segment(&line, &circle, vel)
        };
        for cap in self.end_caps() {
            min = min.min(if self.moving {
                geometry::time_to_rotating_circle(&cap, pivot, self.surface_omega(), &circle, vel, delta)
            } else {
                geometry::time_to_circle(&cap, &circle, vel)
            });
        }
        if min.max(0.0) <= delta {
            min
        } else {
            f64::INFINITY
        }
    }

    /// Reflect the ball off whichever surface is imminent. A moving flipper
    /// hands the ball the surface velocity at the contact point, scaled by
    /// the restitution coefficient.
    pub fn resolve_hit(&self, ball: &Ball) -> Ball {
        let circle = ball.circle();
        let vel = ball.vel();
        let (pivot, _) = self.rest_line();
        let line = self.line();
        let omega = self.surface_omega();

        for cap in self.end_caps() {
            if self.moving {
                if geometry::time_to_rotating_circle(&cap, pivot, omega, &circle, vel, EPS_16)
                    < EPS_16
                {
                    return ball.with_velocity(reflect_rotating_circle(
                        &cap,
                        pivot,
                        omega,
                        &circle,
                        vel,
                        FLIPPER_RESTITUTION,
                    ));
                }
            } else if geometry::time_to_circle(&cap, &circle, vel) < EPS_16 {
                return ball.with_velocity(reflect_circle(cap.center, ball.pos(), vel));
            }
        }

        if self.moving {
            if geometry::time_to_rotating_segment(&line, pivot, omega, &circle, vel, EPS_12)
                < EPS_12
            {
                return ball.with_velocity(reflect_rotating_segment(
                    &line,
                    pivot,
                    omega,
                    &circle,
                    vel,
                    FLIPPER_RESTITUTION,
                ));
            }
        } else if geometry::time_to_segment(&line, &circle, vel) < EPS_12 {
            return ball.with_velocity(reflect_segment(&line, vel));
        }
        ball.clone()
    }

    pub fn rejects(&self, ball: &Ball) -> bool {
        self.time_to_hit(ball, EPS_16) <= EPS_16
    }
}

impl fmt::Display for Flipper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.hand {
            Handedness::Left => "leftFlipper",
            Handedness::Right => "rightFlipper",
        };
        write!(
            f,
            "{} {} @ ({}, {}) rotation={:.0}{}",
            kind,
            self.name,
            self.anchor.x,
            self.anchor.y,
            self.rotation.to_degrees(),
            if self.moving { " moving" } else { "" }
        )
    }
}
