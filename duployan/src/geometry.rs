//! The angle and coordinate kernel.
//!
//! Angles are measured in degrees counterclockwise from east and wrap
//! modulo 360.

use kurbo::Point;

use crate::util::EPSILON;

/// Converts from polar to rectangular coordinates.
///
/// `theta` is in radians, matching the trigonometry call sites.
pub fn rect(r: f64, theta: f64) -> Point {
    Point::new(r * theta.cos(), r * theta.sin())
}

/// Like [`rect`], but takes the angle in degrees.
pub fn rect_deg(r: f64, degrees: f64) -> Point {
    rect(r, degrees.to_radians())
}

/// Normalizes an angle into [0, 360).
pub fn normalize(angle: f64) -> f64 {
    let a = angle % 360.0;
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}

/// Returns the angle that a bearing of `theta` degrees has after being
/// scaled by `scale_x` and `scale_y`.
pub fn scale_angle(theta: f64, scale_x: f64, scale_y: f64) -> f64 {
    let theta = theta.to_radians();
    normalize((scale_y * theta.sin()).atan2(scale_x * theta.cos()).to_degrees())
}

/// Returns whether `key` appears within the arc from `start` to `stop`.
///
/// The arc is traversed counterclockwise, or clockwise if `clockwise`.
pub fn in_degree_range(key: f64, start: f64, stop: f64, clockwise: bool) -> bool {
    let (start, stop) = if clockwise { (stop, start) } else { (start, stop) };
    if start <= stop {
        start <= key && key <= stop
    } else {
        start <= key || key <= stop
    }
}

/// Modular angle subtraction.
///
/// The result preserves the sign of `a - b` when non-zero; when the
/// operands coincide and `full_turn` is set, the result is 360 instead
/// of 0.
pub fn subtract_angles(a: f64, b: f64, full_turn: bool) -> f64 {
    let da = normalize(a - b);
    if da == 0.0 && full_turn {
        360.0
    } else {
        da
    }
}

/// Returns whether two floats are equal within [`EPSILON`].
pub fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_axes() {
        let p = rect_deg(2.0, 0.0);
        assert!(close(p.x, 2.0) && close(p.y, 0.0));
        let p = rect_deg(2.0, 90.0);
        assert!(close(p.x, 0.0) && close(p.y, 2.0));
        let p = rect_deg(2.0, 180.0);
        assert!(close(p.x, -2.0) && close(p.y, 0.0));
    }

    #[test]
    fn normalize_wraps() {
        assert_eq!(normalize(360.0), 0.0);
        assert_eq!(normalize(-90.0), 270.0);
        assert_eq!(normalize(725.0), 5.0);
    }

    #[test]
    fn degree_range_counterclockwise() {
        assert!(in_degree_range(45.0, 0.0, 90.0, false));
        assert!(!in_degree_range(180.0, 0.0, 90.0, false));
        // A range crossing 0.
        assert!(in_degree_range(350.0, 270.0, 90.0, false));
        assert!(in_degree_range(10.0, 270.0, 90.0, false));
        assert!(!in_degree_range(180.0, 270.0, 90.0, false));
    }

    #[test]
    fn degree_range_clockwise() {
        assert!(in_degree_range(45.0, 90.0, 0.0, true));
        assert!(!in_degree_range(180.0, 90.0, 0.0, true));
    }

    #[test]
    fn subtraction_full_turn() {
        assert_eq!(subtract_angles(90.0, 90.0, true), 360.0);
        assert_eq!(subtract_angles(90.0, 90.0, false), 0.0);
        assert_eq!(subtract_angles(90.0, 45.0, true), 45.0);
        assert_eq!(subtract_angles(45.0, 90.0, true), 315.0);
    }

    #[test]
    fn scale_angle_identity() {
        assert!(close(scale_angle(30.0, 1.0, 1.0), 30.0));
        // Stretching y pulls a diagonal toward vertical.
        assert!(scale_angle(45.0, 1.0, 2.0) > 45.0);
    }
}
