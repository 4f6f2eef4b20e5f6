//! # Field
//!
//! Field dimensions and conversions between the blue-origin field frame and the red alliance's
//! view of it. The field frame has its origin in the blue alliance's corner with `+x` towards the
//! red alliance wall.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ds::Alliance;
use util::geom::{Pose2d, Rotation2d};

use crate::drive::ChassisSpeeds;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Units: meters
pub const FIELD_LENGTH_M: f64 = 17.55;

/// Units: meters
pub const FIELD_WIDTH_M: f64 = 8.05;

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Convert a blue-origin pose into the given alliance's frame.
///
/// For red the field is rotated by half a turn about its centre, `(x, y, θ) -> (L - x, W - y,
/// θ + 180°)`. The conversion is its own inverse. For blue it is the identity.
pub fn alliance_convert(pose: &Pose2d, alliance: Alliance) -> Pose2d {
    match alliance {
        Alliance::Blue => *pose,
        Alliance::Red => Pose2d::new(
            FIELD_LENGTH_M - pose.x_m,
            FIELD_WIDTH_M - pose.y_m,
            pose.heading.rotate_by(&Rotation2d::from_degrees(180.0)),
        ),
    }
}

/// Convert field-frame speeds into the given alliance's frame.
pub fn alliance_convert_speeds(speeds: &ChassisSpeeds, alliance: Alliance) -> ChassisSpeeds {
    match alliance {
        Alliance::Blue => *speeds,
        Alliance::Red => ChassisSpeeds::new(-speeds.vx_mps, -speeds.vy_mps, speeds.omega_radps),
    }
}

/// The rotation from the field frame to the driver's forward direction: 0° for blue, 180° for
/// red.
pub fn operator_perspective(alliance: Alliance) -> Rotation2d {
    match alliance {
        Alliance::Blue => Rotation2d::from_degrees(0.0),
        Alliance::Red => Rotation2d::from_degrees(180.0),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use util::maths::is_near;

    fn assert_pose_near(a: &Pose2d, b: &Pose2d) {
        assert!(is_near(a.x_m, b.x_m, 1e-9), "{:?} != {:?}", a, b);
        assert!(is_near(a.y_m, b.y_m, 1e-9), "{:?} != {:?}", a, b);
        let dtheta = (a.heading - b.heading).radians();
        assert!(dtheta.abs() < 1e-9, "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_red_conversion() {
        let blue = Pose2d::new(1.0, 2.0, Rotation2d::from_degrees(0.0));
        let red = alliance_convert(&blue, Alliance::Red);
        assert_pose_near(
            &red,
            &Pose2d::new(16.55, 6.05, Rotation2d::from_degrees(180.0)),
        );
    }

    #[test]
    fn test_conversion_is_an_involution() {
        let poses = [
            Pose2d::new(1.0, 2.0, Rotation2d::from_degrees(0.0)),
            Pose2d::new(8.7, 0.3, Rotation2d::from_degrees(-135.0)),
            Pose2d::new(17.0, 8.0, Rotation2d::from_degrees(90.0)),
        ];

        for p in poses.iter() {
            let twice = alliance_convert(&alliance_convert(p, Alliance::Red), Alliance::Red);
            assert_pose_near(&twice, p);
            assert_eq!(alliance_convert(p, Alliance::Blue), *p);
        }
    }

    #[test]
    fn test_perspective() {
        assert_eq!(operator_perspective(Alliance::Blue).degrees(), 0.0);
        assert!(is_near(operator_perspective(Alliance::Red).degrees().abs(), 180.0, 1e-9));
    }
}
