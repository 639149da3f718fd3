//! The static gadget set: bumpers, absorbers, portals.
//!
//! Gadgets are a tagged variant rather than trait objects so the simulator's
//! inner loop dispatches with a plain match. Each carries its decomposed
//! geometry (segments plus zero-radius corner circles) computed once at
//! construction.

use crate::game::ball::Ball;
use crate::game::config::{
    ABSORBER_EJECT_INSET, ABSORBER_EJECT_SPEED, BALL_RADIUS, EPS_12, PORTAL_RADIUS,
};
use crate::game::flipper::Flipper;
use crate::geometry::{
    self, reflect_circle, reflect_segment, rotate_circle, rotate_segment, Circle, Orientation,
    Segment, Vec2,
};

#[derive(Clone, Debug)]
pub enum Gadget {
    Square(SquareBumper),
    Circle(CircleBumper),
    Triangle(TriangleBumper),
    Absorber(Absorber),
    Portal(Portal),
    Flipper(Flipper),
}

impl Gadget {
    pub fn name(&self) -> &str {
        match self {
            Gadget::Square(g) => &g.name,
            Gadget::Circle(g) => &g.name,
            Gadget::Triangle(g) => &g.name,
            Gadget::Absorber(g) => &g.name,
            Gadget::Portal(g) => &g.name,
            Gadget::Flipper(g) => g.name(),
        }
    }

    /// Earliest collision time within `delta`, or infinity.
    ///
    /// Absorbers and portals ignore balls already inside them, so a freshly
    /// absorbed or teleported ball can leave without an instant re-hit.
    pub fn time_to_hit(&self, ball: &Ball, delta: f64) -> f64 {
        match self {
            Gadget::Square(g) => min_surface_time(&g.edges, &g.corners, ball, delta),
            Gadget::Circle(g) => gate(geometry::time_to_circle(&g.circle, &ball.circle(), ball.vel()), delta),
            Gadget::Triangle(g) => min_surface_time(&g.edges, &g.corners, ball, delta),
            Gadget::Absorber(g) => {
                if g.contains(ball) {
                    f64::INFINITY
                } else {
                    min_surface_time(&g.edges, &g.corners, ball, delta)
                }
            }
            Gadget::Portal(g) => {
                if g.contains(ball) {
                    f64::INFINITY
                } else {
                    gate(
                        geometry::time_to_circle(&g.circle, &ball.circle(), ball.vel()),
                        delta,
                    )
                }
            }
            Gadget::Flipper(g) => g.time_to_hit(ball, delta),
        }
    }

    /// A new ball with velocity reflected off whichever surface is imminent.
    ///
    /// Absorbers and portals do not reflect; their resolution (queueing,
    /// teleporting) is the board's job and the ball passes through unchanged
    /// here.
    pub fn resolve_hit(&self, ball: &Ball) -> Ball {
        match self {
            Gadget::Square(g) => reflect_off_surfaces(&g.edges, &g.corners, ball),
            Gadget::Circle(g) => {
                ball.with_velocity(reflect_circle(g.circle.center, ball.pos(), ball.vel()))
            }
            Gadget::Triangle(g) => reflect_off_surfaces(&g.edges, &g.corners, ball),
            Gadget::Absorber(_) | Gadget::Portal(_) => ball.clone(),
            Gadget::Flipper(g) => g.resolve_hit(ball),
        }
    }

    /// True when placing `ball` at its position would put it inside this
    /// gadget; the hand-off logic refuses such placements.
    pub fn rejects(&self, ball: &Ball) -> bool {
        match self {
            Gadget::Square(g) => {
                box_overlaps(g.pos, Vec2::new(1.0, 1.0), ball.pos())
            }
            Gadget::Circle(g) => {
                let r = g.circle.radius + BALL_RADIUS;
                g.circle.center.distance_squared(ball.pos()) <= r * r
            }
            Gadget::Triangle(g) => {
                box_overlaps(g.pos, Vec2::new(1.0, 1.0), ball.pos())
            }
            // Absorbers swallow arrivals and portals pass them on; neither
            // ever refuses a placement.
            Gadget::Absorber(_) | Gadget::Portal(_) => false,
            Gadget::Flipper(g) => g.rejects(ball),
        }
    }
}

impl std::fmt::Display for Gadget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gadget::Square(g) => write!(f, "squareBumper {} @ ({}, {})", g.name, g.pos.x, g.pos.y),
            Gadget::Circle(g) => write!(f, "circleBumper {} @ ({}, {})", g.name, g.pos.x, g.pos.y),
            Gadget::Triangle(g) => write!(
                f,
                "triangleBumper {} @ ({}, {}) orientation={:.0}",
                g.name,
                g.pos.x,
                g.pos.y,
                g.orientation.radians().to_degrees()
            ),
            Gadget::Absorber(g) => write!(
                f,
                "absorber {} @ ({}, {}) {}x{}",
                g.name, g.pos.x, g.pos.y, g.width, g.height
            ),
            Gadget::Portal(g) => {
                write!(f, "portal {} @ ({}, {}) -> ", g.name, g.pos.x, g.pos.y)?;
                if let Some(board) = &g.other_board {
                    write!(f, "{}:", board)?;
                }
                write!(f, "{}", g.other_portal)
            }
            Gadget::Flipper(g) => write!(f, "{}", g),
        }
    }
}

fn gate(t: f64, delta: f64) -> f64 {
    if t <= delta {
        t
    } else {
        f64::INFINITY
    }
}

fn min_surface_time(edges: &[Segment], corners: &[Circle], ball: &Ball, delta: f64) -> f64 {
    let circle = ball.circle();
    let vel = ball.vel();
    let mut min = f64::INFINITY;
    for edge in edges {
        min = min.min(geometry::time_to_segment(edge, &circle, vel));
    }
    for corner in corners {
        min = min.min(geometry::time_to_circle(corner, &circle, vel));
    }
    gate(min, delta)
}

/// Reflect off the first surface whose collision time is below [`EPS_12`].
///
/// Corners go first: [`geometry::time_to_segment`] counts a segment's
/// endpoints as part of the segment, so a genuine corner hit also makes an
/// adjacent edge look imminent, and reflecting off that edge's face normal
/// would be wrong. A touching corner wins; only then are the flat faces
/// consulted. When nothing is imminent (a caller raced past the contact),
/// the ball is returned unchanged rather than guessed at.
fn reflect_off_surfaces(edges: &[Segment], corners: &[Circle], ball: &Ball) -> Ball {
    let circle = ball.circle();
    let vel = ball.vel();
    for corner in corners {
        if geometry::time_to_circle(corner, &circle, vel) < EPS_12 {
            return ball.with_velocity(reflect_circle(corner.center, ball.pos(), vel));
        }
    }
    for edge in edges {
        if geometry::time_to_segment(edge, &circle, vel) < EPS_12 {
            return ball.with_velocity(reflect_segment(edge, vel));
        }
    }
    ball.clone()
}

/// Axis-aligned box inflated by the ball radius against the ball centre.
fn box_overlaps(top_left: Vec2, size: Vec2, center: Vec2) -> bool {
    center.x >= top_left.x - BALL_RADIUS
        && center.x <= top_left.x + size.x + BALL_RADIUS
        && center.y >= top_left.y - BALL_RADIUS
        && center.y <= top_left.y + size.y + BALL_RADIUS
}

#[derive(Clone, Debug)]
pub struct SquareBumper {
    pub name: String,
    pub pos: Vec2,
    edges: [Segment; 4],
    corners: [Circle; 4],
}

impl SquareBumper {
    pub fn new(name: impl Into<String>, pos: Vec2) -> Self {
        let (edges, corners) = rect_surfaces(pos, Vec2::new(1.0, 1.0));
        Self {
            name: name.into(),
            pos,
            edges,
            corners,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircleBumper {
    pub name: String,
    pub pos: Vec2,
    circle: Circle,
}

impl CircleBumper {
    pub fn new(name: impl Into<String>, pos: Vec2) -> Self {
        Self {
            name: name.into(),
            pos,
            circle: Circle::new(pos + Vec2::new(0.5, 0.5), 0.5),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TriangleBumper {
    pub name: String,
    pub pos: Vec2,
    pub orientation: Orientation,
    edges: [Segment; 3],
    corners: [Circle; 3],
}

impl TriangleBumper {
    /// Right triangle with its legs along the top and left of the unit cell,
    /// rotated about the cell centre by `orientation`.
    pub fn new(name: impl Into<String>, pos: Vec2, orientation: Orientation) -> Self {
        let top_right = pos + Vec2::new(1.0, 0.0);
        let bottom_left = pos + Vec2::new(0.0, 1.0);
        let center = pos + Vec2::new(0.5, 0.5);
        let angle = orientation.radians();

        let edges = [
            Segment::new(bottom_left, top_right),
            Segment::new(pos, top_right),
            Segment::new(pos, bottom_left),
        ]
        .map(|seg| rotate_segment(&seg, center, angle));
        let corners = [pos, top_right, bottom_left]
            .map(|p| rotate_circle(&Circle::point(p), center, angle));

        Self {
            name: name.into(),
            pos,
            orientation,
            edges,
            corners,
        }
    }

    /// The three rotated corner points, for rendering.
    pub fn vertices(&self) -> [Vec2; 3] {
        [
            self.corners[0].center,
            self.corners[1].center,
            self.corners[2].center,
        ]
    }
}

#[derive(Clone, Debug)]
pub struct Absorber {
    pub name: String,
    pub pos: Vec2,
    pub width: u32,
    pub height: u32,
    edges: [Segment; 4],
    corners: [Circle; 4],
}

impl Absorber {
    pub fn new(name: impl Into<String>, pos: Vec2, width: u32, height: u32) -> Self {
        let size = Vec2::new(f64::from(width), f64::from(height));
        let (edges, corners) = rect_surfaces(pos, size);
        Self {
            name: name.into(),
            pos,
            width,
            height,
            edges,
            corners,
        }
    }

    /// Whether the ball's centre lies within the rectangle.
    pub fn contains(&self, ball: &Ball) -> bool {
        let p = ball.pos();
        p.x >= self.pos.x
            && p.x <= self.pos.x + f64::from(self.width)
            && p.y >= self.pos.y
            && p.y <= self.pos.y + f64::from(self.height)
    }

    /// Whether any part of the ball touches the rectangle.
    pub fn intersects(&self, ball: &Ball) -> bool {
        box_overlaps(
            self.pos,
            Vec2::new(f64::from(self.width), f64::from(self.height)),
            ball.pos(),
        )
    }

    /// The ball this absorber fires: just inside its bottom-right corner,
    /// straight up at the ejection speed.
    pub fn eject(&self, ball_name: &str) -> Ball {
        let pos = self.pos
            + Vec2::new(
                f64::from(self.width) - ABSORBER_EJECT_INSET,
                f64::from(self.height) - ABSORBER_EJECT_INSET,
            );
        Ball::new(ball_name, pos, Vec2::new(0.0, -ABSORBER_EJECT_SPEED))
    }
}

#[derive(Clone, Debug)]
pub struct Portal {
    pub name: String,
    pub pos: Vec2,
    /// Board hosting the peer portal; `None` means this board.
    pub other_board: Option<String>,
    pub other_portal: String,
    circle: Circle,
}

impl Portal {
    pub fn new(
        name: impl Into<String>,
        pos: Vec2,
        other_board: Option<String>,
        other_portal: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pos,
            other_board,
            other_portal: other_portal.into(),
            circle: Circle::new(pos + Vec2::new(PORTAL_RADIUS, PORTAL_RADIUS), PORTAL_RADIUS),
        }
    }

    pub fn center(&self) -> Vec2 {
        self.circle.center
    }

    /// Whether the ball's centre sits inside the portal disc.
    pub fn contains(&self, ball: &Ball) -> bool {
        self.circle.center.distance_squared(ball.pos()) < PORTAL_RADIUS * PORTAL_RADIUS
    }

    /// Whether any part of the ball touches the portal disc.
    pub fn intersects(&self, ball: &Ball) -> bool {
        let reach = PORTAL_RADIUS + BALL_RADIUS;
        self.circle.center.distance_squared(ball.pos()) <= reach * reach
    }
}

fn rect_surfaces(top_left: Vec2, size: Vec2) -> ([Segment; 4], [Circle; 4]) {
    let top_right = top_left + Vec2::new(size.x, 0.0);
    let bottom_left = top_left + Vec2::new(0.0, size.y);
    let bottom_right = top_left + size;
    let edges = [
        Segment::new(top_left, top_right),
        Segment::new(bottom_left, bottom_right),
        Segment::new(top_left, bottom_left),
        Segment::new(top_right, bottom_right),
    ];
    let corners = [top_left, top_right, bottom_left, bottom_right].map(Circle::point);
    (edges, corners)
}
