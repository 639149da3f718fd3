//! Board constants and defaults.

use std::f64::consts::PI;

/// Side length of the square playfield, in board units.
pub const L: f64 = 20.0;

pub const BALL_RADIUS: f64 = 0.25;
pub const BALL_DIAMETER: f64 = 0.5;
/// Cap on ball speed; reflections can never push past this.
pub const MAX_BALL_SPEED: f64 = 500.0;

pub const GRAVITY_DEFAULT: f64 = 25.0;
pub const FRICTION_DEFAULT: f64 = 0.025;

pub const PORTAL_RADIUS: f64 = 0.5;

pub const FLIPPER_LENGTH: f64 = 2.0;
/// 1080 degrees per second.
pub const FLIPPER_ANGULAR_SPEED: f64 = 6.0 * PI;
/// Rebound scale for collisions with a moving flipper.
pub const FLIPPER_RESTITUTION: f64 = 0.95;

/// Downward speed of a ball ejected by an absorber, in L/s.
pub const ABSORBER_EJECT_SPEED: f64 = 50.0;
/// Inset of the ejection point from the absorber's bottom-right corner.
pub const ABSORBER_EJECT_INSET: f64 = 0.25;

// The epsilon cluster. Tuning is local to this table.
//
// EPS_14 is the "now" threshold: any collision time below it is resolved in
// place and the frame budget never drops below it. EPS_12 is the imminence
// threshold used when picking which surface of a gadget was struck.
pub const EPS_16: f64 = 1e-16;
pub const EPS_14: f64 = 1e-14;
pub const EPS_12: f64 = 1e-12;
pub const EPS_9: f64 = 1e-9;
pub const EPS_7: f64 = 1e-7;
pub const EPS_3: f64 = 1e-3;
