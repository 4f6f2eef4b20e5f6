//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Clamp a value into `[min, max]`.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    value.max(min).min(max)
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}

/// Wrap a value into the half open range `[min, max)`.
pub fn input_modulus<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    let span = max - min;
    let wrapped = min + rem_euclid(value - min, span);

    // Float error can land exactly on the excluded bound
    if wrapped >= max {
        min
    } else {
        wrapped
    }
}

/// Wrap an angle into `[-pi, pi)`.
pub fn wrap_pi(angle_rad: f64) -> f64 {
    input_modulus(angle_rad, -std::f64::consts::PI, std::f64::consts::PI)
}

/// Wrap an angle into `[-180, 180)`.
pub fn wrap_deg_180(angle_deg: f64) -> f64 {
    input_modulus(angle_deg, -180.0, 180.0)
}

/// Signed shortest angular distance from `a` to `b`, in `[-pi, pi)`.
pub fn ang_dist(a_rad: f64, b_rad: f64) -> f64 {
    wrap_pi(b_rad - a_rad)
}

/// Zero a value inside the deadband, pass it through unchanged outside.
pub fn apply_deadband<T>(value: T, deadband: T) -> T
where
    T: Float,
{
    if value.abs() <= deadband {
        T::zero()
    } else {
        value
    }
}

/// Square a value, keeping its sign.
pub fn square_keep_sign<T>(value: T) -> T
where
    T: Float,
{
    value * value.abs()
}

/// True if `a` and `b` are within `tolerance` of each other.
pub fn is_near<T>(a: T, b: T, tolerance: T) -> bool
where
    T: Float,
{
    (a - b).abs() <= tolerance
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_input_modulus() {
        assert_eq!(wrap_deg_180(180.0), -180.0);
        assert_eq!(wrap_deg_180(-180.0), -180.0);
        assert_eq!(wrap_deg_180(190.0), -170.0);
        assert_eq!(wrap_deg_180(-190.0), 170.0);
        assert_eq!(wrap_deg_180(530.0), 170.0);
        assert!(is_near(wrap_pi(3.0 * PI / 2.0), -PI / 2.0, 1e-12));
    }

    #[test]
    fn test_ang_dist() {
        assert!(is_near(ang_dist(0.1, -0.1), -0.2, 1e-12));
        assert!(is_near(ang_dist(PI - 0.1, -PI + 0.1), 0.2, 1e-12));
    }

    #[test]
    fn test_deadband_and_square() {
        assert_eq!(apply_deadband(0.05, 0.1), 0.0);
        assert_eq!(apply_deadband(-0.1, 0.1), 0.0);
        assert_eq!(apply_deadband(0.5, 0.1), 0.5);
        assert_eq!(square_keep_sign(-0.5), -0.25);
        assert_eq!(lin_map((0.0, 1.0), (0.0, 10.0), 0.25), 2.5);
    }
}
