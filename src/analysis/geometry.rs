// src/analysis/geometry.rs
//
// Pixel-space geometry over a single keypoint frame. Every function is pure.
// A joint the pose model did not report is an explicit error; a degenerate
// triangle (coincident or collinear points) resolves to an angle of 0.

use crate::types::{JointId, KeypointFrame};
use thiserror::Error;

pub type Point = (f64, f64);

/// Side lengths below this are treated as coincident points.
const MIN_SIDE_PX: f64 = 1e-9;
/// |sin| of the vertex angle below this is treated as collinear.
const COLLINEAR_SIN: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("joint {} not present in frame", .0.as_str())]
    MissingJoint(JointId),
}

fn pixel_point(frame: &KeypointFrame, id: JointId) -> Result<Point, GeometryError> {
    let kp = frame
        .keypoint(id)
        .ok_or(GeometryError::MissingJoint(id))?;
    Ok((kp.x * frame.width_px as f64, kp.y * frame.height_px as f64))
}

/// Height above the bottom edge, so visually higher means numerically larger.
pub fn height(frame: &KeypointFrame, id: JointId) -> Result<f64, GeometryError> {
    let (_, y) = pixel_point(frame, id)?;
    Ok(frame.height_px as f64 - y)
}

/// Horizontal pixel offset from the left edge.
pub fn width_offset(frame: &KeypointFrame, id: JointId) -> Result<f64, GeometryError> {
    let (x, _) = pixel_point(frame, id)?;
    Ok(x)
}

pub fn distance(frame: &KeypointFrame, a: JointId, b: JointId) -> Result<f64, GeometryError> {
    let pa = pixel_point(frame, a)?;
    let pb = pixel_point(frame, b)?;
    let d = euclidean(pa, pb);
    Ok(if d.is_finite() { d } else { 0.0 })
}

/// Angle in degrees at `b` formed by the rays to `a` and `c`.
pub fn angle_at_vertex(
    frame: &KeypointFrame,
    a: JointId,
    b: JointId,
    c: JointId,
) -> Result<f64, GeometryError> {
    let pa = pixel_point(frame, a)?;
    let pb = pixel_point(frame, b)?;
    let pc = pixel_point(frame, c)?;
    Ok(triangle_angle(pa, pb, pc))
}

/// Tilt of the shoulder line away from horizontal, in degrees.
///
/// A right-angle anchor is placed according to the quadrant of `b` relative
/// to `a`:
/// - `b` right of and below `a` (image coordinates): anchor `(xb, ya)`, angle
///   measured at `a`
/// - `b` right of and above `a`: anchor `(xa, yb)`, angle measured at `b`
/// - `b` left of `a`: anchor at the midpoint, which yields 0
///
/// Returns the angle together with the anchor so overlays can draw it.
pub fn shoulder_line_angle(
    frame: &KeypointFrame,
    a: JointId,
    b: JointId,
) -> Result<(f64, Point), GeometryError> {
    let (x1, y1) = pixel_point(frame, a)?;
    let (x2, y2) = pixel_point(frame, b)?;

    let (p1, p2, anchor) = if x2 >= x1 && y2 >= y1 {
        ((x2, y2), (x1, y1), (x2, y1))
    } else if x2 >= x1 && y2 <= y1 {
        ((x1, y1), (x2, y2), (x1, y2))
    } else {
        ((x1, y1), (x2, y2), ((x1 + x2) / 2.0, (y1 + y2) / 2.0))
    };

    Ok((triangle_angle(p1, p2, anchor), anchor))
}

fn euclidean(p: Point, q: Point) -> f64 {
    ((q.0 - p.0).powi(2) + (q.1 - p.1).powi(2)).sqrt()
}

/// Law of cosines at `p2` with l1=|p2,p3|, l2=|p1,p3|, l3=|p1,p2|.
pub(crate) fn triangle_angle(p1: Point, p2: Point, p3: Point) -> f64 {
    let l1 = euclidean(p2, p3);
    let l2 = euclidean(p1, p3);
    let l3 = euclidean(p1, p2);

    if !(l1 > MIN_SIDE_PX && l3 > MIN_SIDE_PX) {
        return 0.0;
    }

    let cross = (p1.0 - p2.0) * (p3.1 - p2.1) - (p1.1 - p2.1) * (p3.0 - p2.0);
    if (cross / (l1 * l3)).abs() <= COLLINEAR_SIN {
        return 0.0;
    }

    let cos = (l1 * l1 + l3 * l3 - l2 * l2) / (2.0 * l1 * l3);
    if !cos.is_finite() || !(-1.0..=1.0).contains(&cos) {
        return 0.0;
    }

    cos.acos().to_degrees()
}
