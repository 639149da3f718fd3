//! Geometry kernel: time-of-impact and reflection primitives.
//!
//! Everything here is a pure function over circles, segments and velocities.
//! Time functions return the earliest non-negative time at which the moving
//! ball first touches the target, or `f64::INFINITY` when the approach is
//! backwards in time or numerically degenerate. Callers compare against their
//! own foresight window.

use glam::DVec2;
use serde::Serialize;

pub type Vec2 = DVec2;

/// Denominators below this are treated as zero.
const DEGENERATE: f64 = 1e-12;

/// Cardinal orientation of a placed gadget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    pub fn radians(self) -> f64 {
        use std::f64::consts::{FRAC_PI_2, PI};
        match self {
            Orientation::Deg0 => 0.0,
            Orientation::Deg90 => FRAC_PI_2,
            Orientation::Deg180 => PI,
            Orientation::Deg270 => PI + FRAC_PI_2,
        }
    }

    pub fn from_degrees(deg: u32) -> Option<Self> {
        match deg {
            0 => Some(Orientation::Deg0),
            90 => Some(Orientation::Deg90),
            180 => Some(Orientation::Deg180),
            270 => Some(Orientation::Deg270),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Circle {
    pub center: Vec2,
    pub radius: f64,
}

impl Circle {
    pub fn new(center: Vec2, radius: f64) -> Self {
        Self { center, radius }
    }

    /// A radius-0 circle standing in for a corner point.
    pub fn point(center: Vec2) -> Self {
        Self { center, radius: 0.0 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub p1: Vec2,
    pub p2: Vec2,
}

impl Segment {
    pub fn new(p1: Vec2, p2: Vec2) -> Self {
        Self { p1, p2 }
    }

    pub fn direction(&self) -> Vec2 {
        self.p2 - self.p1
    }

    /// One of the two unit normals; reflection is symmetric in the choice.
    pub fn unit_normal(&self) -> Vec2 {
        perp(self.direction()).normalize_or_zero()
    }

    pub fn closest_point(&self, p: Vec2) -> Vec2 {
        let dir = self.direction();
        let len_sq = dir.length_squared();
        if len_sq < DEGENERATE {
            return self.p1;
        }
        let t = ((p - self.p1).dot(dir) / len_sq).clamp(0.0, 1.0);
        self.p1 + dir * t
    }

    pub fn distance_to(&self, p: Vec2) -> f64 {
        (p - self.closest_point(p)).length()
    }
}

/// Counter-clockwise perpendicular.
pub fn perp(v: Vec2) -> Vec2 {
    Vec2::new(-v.y, v.x)
}

pub fn rotate_point(p: Vec2, pivot: Vec2, angle: f64) -> Vec2 {
    let (sin, cos) = angle.sin_cos();
    let d = p - pivot;
    pivot + Vec2::new(d.x * cos - d.y * sin, d.x * sin + d.y * cos)
}

pub fn rotate_segment(seg: &Segment, pivot: Vec2, angle: f64) -> Segment {
    Segment::new(
        rotate_point(seg.p1, pivot, angle),
        rotate_point(seg.p2, pivot, angle),
    )
}

pub fn rotate_circle(circle: &Circle, pivot: Vec2, angle: f64) -> Circle {
    Circle::new(rotate_point(circle.center, pivot, angle), circle.radius)
}

/// Time until the moving ball disc first touches a static circle.
pub fn time_to_circle(target: &Circle, ball: &Circle, vel: Vec2) -> f64 {
    let d = ball.center - target.center;
    let r = target.radius + ball.radius;
    let c = d.length_squared() - r * r;
    let b = 2.0 * d.dot(vel);
    if c <= 0.0 {
        // Already in contact: imminent only while still closing.
        return if b < 0.0 { 0.0 } else { f64::INFINITY };
    }
    let a = vel.length_squared();
    if a < DEGENERATE {
        return f64::INFINITY;
    }
    let disc = b * b - 4.0 * a * c;
    if !disc.is_finite() || disc < 0.0 {
        return f64::INFINITY;
    }
    let t = (-b - disc.sqrt()) / (2.0 * a);
    if t.is_finite() && t >= 0.0 {
        t
    } else {
        f64::INFINITY
    }
}

/// Time until two moving ball discs first touch.
pub fn time_to_ball(a: &Circle, va: Vec2, b: &Circle, vb: Vec2) -> f64 {
    // Work in a's rest frame.
    time_to_circle(a, b, vb - va)
}

/// Time until the moving ball disc first touches a line segment, counting
/// the flat span and both endpoint corners.
pub fn time_to_segment(seg: &Segment, ball: &Circle, vel: Vec2) -> f64 {
    let dir = seg.direction();
    let len_sq = dir.length_squared();
    if len_sq < DEGENERATE || !len_sq.is_finite() {
        log::debug!("degenerate segment {:?}, no collision", seg);
        return f64::INFINITY;
    }
    let n = perp(dir) / len_sq.sqrt();
    let s = (ball.center - seg.p1).dot(n);
    let vn = vel.dot(n);
    let r = ball.radius;

    let mut best = f64::INFINITY;
    if s.abs() <= r {
        // Touching the infinite line already; a hit only if the contact lies
        // within the span and the ball is still closing.
        let along = (ball.center - seg.p1).dot(dir) / len_sq;
        if (0.0..=1.0).contains(&along) && s * vn < 0.0 {
            return 0.0;
        }
    } else if s * vn < 0.0 {
        let t = (s.abs() - r) / vn.abs();
        if t.is_finite() && t >= 0.0 {
            let contact = ball.center + vel * t - n * (r * s.signum());
            let along = (contact - seg.p1).dot(dir) / len_sq;
            if (0.0..=1.0).contains(&along) {
                best = t;
            }
        }
    }

    for endpoint in [seg.p1, seg.p2] {
        best = best.min(time_to_circle(&Circle::point(endpoint), ball, vel));
    }
    best
}

/// Time until the ball meets a segment rotating rigidly about `pivot` at
/// `omega` rad/s, searched over `[0, within]`.
///
/// The swept angle per frame is small (a flipper covers ~22 degrees in
/// 20 ms), so the clearance function is well behaved: bracket the first sign
/// change on a fixed grid, then bisect.
pub fn time_to_rotating_segment(
    seg: &Segment,
    pivot: Vec2,
    omega: f64,
    ball: &Circle,
    vel: Vec2,
    within: f64,
) -> f64 {
    if omega == 0.0 {
        return time_to_segment(seg, ball, vel);
    }
    first_contact(within, |t| {
        let rotated = rotate_segment(seg, pivot, omega * t);
        rotated.distance_to(ball.center + vel * t) - ball.radius
    })
}

/// Rotating analogue of [`time_to_circle`], for flipper end caps.
pub fn time_to_rotating_circle(
    circle: &Circle,
    pivot: Vec2,
    omega: f64,
    ball: &Circle,
    vel: Vec2,
    within: f64,
) -> f64 {
    if omega == 0.0 {
        return time_to_circle(circle, ball, vel);
    }
    first_contact(within, |t| {
        let rotated = rotate_circle(circle, pivot, omega * t);
        (ball.center + vel * t - rotated.center).length() - rotated.radius - ball.radius
    })
}

/// First root of `clearance(t) <= 0` over `[0, within]`, or infinity.
fn first_contact(within: f64, clearance: impl Fn(f64) -> f64) -> f64 {
    const STEPS: usize = 64;
    const BISECTIONS: usize = 60;

    if !within.is_finite() || within <= 0.0 {
        return f64::INFINITY;
    }
    let first = clearance(0.0);
    if !first.is_finite() {
        return f64::INFINITY;
    }
    if first <= 0.0 {
        return 0.0;
    }
    let mut t0 = 0.0;
    for i in 1..=STEPS {
        let t1 = within * i as f64 / STEPS as f64;
        let c1 = clearance(t1);
        if c1.is_finite() && c1 <= 0.0 {
            let (mut lo, mut hi) = (t0, t1);
            for _ in 0..BISECTIONS {
                let mid = 0.5 * (lo + hi);
                if clearance(mid) <= 0.0 {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return hi;
        }
        t0 = t1;
    }
    f64::INFINITY
}

/// Specular reflection about the segment's normal.
pub fn reflect_segment(seg: &Segment, v: Vec2) -> Vec2 {
    let n = seg.unit_normal();
    if n == Vec2::ZERO {
        return v;
    }
    v - 2.0 * v.dot(n) * n
}

/// Specular reflection about the line joining the circle centre and the
/// ball centre.
pub fn reflect_circle(center: Vec2, ball_pos: Vec2, v: Vec2) -> Vec2 {
    let n = (ball_pos - center).normalize_or_zero();
    if n == Vec2::ZERO {
        return v;
    }
    v - 2.0 * v.dot(n) * n
}

/// Equal-mass elastic exchange along the centre-to-centre line.
pub fn reflect_balls(p1: Vec2, v1: Vec2, p2: Vec2, v2: Vec2) -> (Vec2, Vec2) {
    let n = (p2 - p1).normalize_or_zero();
    if n == Vec2::ZERO {
        return (v1, v2);
    }
    let a1 = v1.dot(n);
    let a2 = v2.dot(n);
    (v1 + (a2 - a1) * n, v2 + (a1 - a2) * n)
}

/// Reflection off a rotating wall: reflect in the wall's rest frame at the
/// contact point, scale the rebound by `k`, and carry the wall's surface
/// velocity back out.
pub fn reflect_rotating_segment(
    seg: &Segment,
    pivot: Vec2,
    omega: f64,
    ball: &Circle,
    v: Vec2,
    k: f64,
) -> Vec2 {
    let contact = seg.closest_point(ball.center);
    let surface = omega * perp(contact - pivot);
    let n = seg.unit_normal();
    if n == Vec2::ZERO {
        return v;
    }
    let rel = v - surface;
    surface + k * (rel - 2.0 * rel.dot(n) * n)
}

/// Rotating analogue of [`reflect_circle`], for flipper end caps.
pub fn reflect_rotating_circle(
    circle: &Circle,
    pivot: Vec2,
    omega: f64,
    ball: &Circle,
    v: Vec2,
    k: f64,
) -> Vec2 {
    let n = (ball.center - circle.center).normalize_or_zero();
    if n == Vec2::ZERO {
        return v;
    }
    let contact = circle.center + n * circle.radius;
    let surface = omega * perp(contact - pivot);
    let rel = v - surface;
    surface + k * (rel - 2.0 * rel.dot(n) * n)
}
