//! # Swerve kinematics
//!
//! Conversions between chassis speeds and the state of each module. The inverse direction is
//! exact, the forward direction (module motion to chassis motion) is a least squares fit over the
//! modules that could be read.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector, Vector2};
use serde::Serialize;
use util::geom::{Pose2d, Rotation2d, Twist2d};

use super::NUM_MODULES;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Velocity of the chassis.
///
/// Whether the speeds are in the robot or field frame depends on where the value came from.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct ChassisSpeeds {
    /// Units: meters/second
    pub vx_mps: f64,

    /// Units: meters/second
    pub vy_mps: f64,

    /// Units: radians/second, counter-clockwise positive
    pub omega_radps: f64,
}

/// Speed and heading of one module.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct SwerveModuleState {
    /// Units: meters/second
    pub speed_mps: f64,

    pub angle: Rotation2d,
}

/// Distance travelled by one module's wheel and its heading.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct SwerveModulePosition {
    /// Units: meters
    pub distance_m: f64,

    pub angle: Rotation2d,
}

/// Kinematics of a four module swerve chassis.
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    /// Module positions in the robot frame, x forward, y left.
    ///
    /// Units: meters
    locations_m: [Vector2<f64>; NUM_MODULES],
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ChassisSpeeds {
    pub fn new(vx_mps: f64, vy_mps: f64, omega_radps: f64) -> Self {
        Self {
            vx_mps,
            vy_mps,
            omega_radps,
        }
    }

    /// Convert field frame speeds into the robot frame of a robot with the given heading.
    pub fn from_field_relative(field: &ChassisSpeeds, robot_heading: Rotation2d) -> Self {
        let (vx, vy) = robot_heading.inverse().rotate_xy(field.vx_mps, field.vy_mps);
        Self::new(vx, vy, field.omega_radps)
    }

    /// Convert robot frame speeds into the field frame.
    pub fn to_field_relative(&self, robot_heading: Rotation2d) -> Self {
        let (vx, vy) = robot_heading.rotate_xy(self.vx_mps, self.vy_mps);
        Self::new(vx, vy, self.omega_radps)
    }

    /// Correct for the skew from translating while rotating over a period of `dt_s`.
    ///
    /// The returned speeds, held for `dt_s`, move the robot along the straight line the original
    /// speeds describe.
    pub fn discretize(&self, dt_s: f64) -> Self {
        if dt_s <= 0.0 {
            return *self;
        }

        let target = Pose2d::new(
            self.vx_mps * dt_s,
            self.vy_mps * dt_s,
            Rotation2d::from_radians(self.omega_radps * dt_s),
        );
        let twist = Pose2d::default().log(&target);

        Self::new(
            twist.dx_m / dt_s,
            twist.dy_m / dt_s,
            twist.dtheta_rad / dt_s,
        )
    }

    /// Magnitude of the translational velocity.
    ///
    /// Units: meters/second
    pub fn speed_mps(&self) -> f64 {
        self.vx_mps.hypot(self.vy_mps)
    }

    pub fn is_zero(&self) -> bool {
        self.vx_mps.abs() < 1e-9 && self.vy_mps.abs() < 1e-9 && self.omega_radps.abs() < 1e-9
    }
}

impl SwerveModuleState {
    pub fn new(speed_mps: f64, angle: Rotation2d) -> Self {
        Self { speed_mps, angle }
    }

    /// Minimise the steering needed to reach this state from `current`.
    ///
    /// If the module would have to turn more than 90 degrees it instead turns to the opposite
    /// heading and drives backwards.
    pub fn optimize(&self, current: Rotation2d) -> Self {
        let delta = self.angle - current;
        if delta.radians().abs() > std::f64::consts::FRAC_PI_2 {
            Self::new(
                -self.speed_mps,
                self.angle.rotate_by(&Rotation2d::from_degrees(180.0)),
            )
        } else {
            *self
        }
    }
}

impl SwerveModulePosition {
    pub fn new(distance_m: f64, angle: Rotation2d) -> Self {
        Self { distance_m, angle }
    }
}

impl SwerveKinematics {
    /// Create from module locations `[x, y]` in the robot frame.
    pub fn new(locations_m: [[f64; 2]; NUM_MODULES]) -> Self {
        let mut locs = [Vector2::zeros(); NUM_MODULES];
        for (l, p) in locs.iter_mut().zip(locations_m.iter()) {
            *l = Vector2::new(p[0], p[1]);
        }
        Self { locations_m: locs }
    }

    pub fn locations_m(&self) -> &[Vector2<f64>; NUM_MODULES] {
        &self.locations_m
    }

    /// Module states achieving robot frame `speeds`.
    ///
    /// When the chassis is not moving the modules keep the given `hold` headings rather than
    /// snapping to zero.
    pub fn to_module_states(
        &self,
        speeds: &ChassisSpeeds,
        hold: &[Rotation2d; NUM_MODULES],
    ) -> [SwerveModuleState; NUM_MODULES] {
        let mut states = [SwerveModuleState::default(); NUM_MODULES];

        for i in 0..NUM_MODULES {
            if speeds.is_zero() {
                states[i] = SwerveModuleState::new(0.0, hold[i]);
                continue;
            }

            let loc = &self.locations_m[i];
            let vx = speeds.vx_mps - speeds.omega_radps * loc.y;
            let vy = speeds.vy_mps + speeds.omega_radps * loc.x;

            states[i] = SwerveModuleState::new(vx.hypot(vy), Rotation2d::from_xy(vx, vy));
        }

        states
    }

    /// Chassis speeds from the measured module states.
    pub fn to_chassis_speeds(&self, states: &[SwerveModuleState; NUM_MODULES]) -> ChassisSpeeds {
        let measured: Vec<Option<(f64, Rotation2d)>> =
            states.iter().map(|s| Some((s.speed_mps, s.angle))).collect();

        match self.solve(&measured) {
            Some((vx, vy, omega)) => ChassisSpeeds::new(vx, vy, omega),
            None => ChassisSpeeds::default(),
        }
    }

    /// Chassis motion over a period from the change in each module's position.
    ///
    /// `None` deltas (modules which could not be read) are left out of the fit. With fewer than
    /// two modules the translation can't be recovered and a zero twist is returned.
    pub fn to_twist(&self, deltas: &[Option<SwerveModulePosition>; NUM_MODULES]) -> Twist2d {
        let measured: Vec<Option<(f64, Rotation2d)>> = deltas
            .iter()
            .map(|d| d.map(|d| (d.distance_m, d.angle)))
            .collect();

        match self.solve(&measured) {
            Some((dx, dy, dtheta)) => Twist2d {
                dx_m: dx,
                dy_m: dy,
                dtheta_rad: dtheta,
            },
            None => Twist2d::default(),
        }
    }

    /// Scale module speeds down so none exceeds `max_speed_mps`, keeping their ratios.
    pub fn desaturate(states: &mut [SwerveModuleState; NUM_MODULES], max_speed_mps: f64) {
        let fastest = states
            .iter()
            .map(|s| s.speed_mps.abs())
            .fold(0.0f64, f64::max);

        if fastest > max_speed_mps && fastest > 0.0 {
            let k = max_speed_mps / fastest;
            for s in states.iter_mut() {
                s.speed_mps *= k;
            }
        }
    }

    /// Least squares solution of the module velocity equations
    ///
    /// ```text
    /// [ 1 0 -y_i ] [vx]   [v_i cos a_i]
    /// [ 0 1  x_i ] [vy] = [v_i sin a_i]
    ///              [w ]
    /// ```
    fn solve(&self, measured: &[Option<(f64, Rotation2d)>]) -> Option<(f64, f64, f64)> {
        let rows: Vec<(usize, f64, Rotation2d)> = measured
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.map(|(v, a)| (i, v, a)))
            .collect();

        if rows.len() < 2 {
            return None;
        }

        let mut a = DMatrix::<f64>::zeros(rows.len() * 2, 3);
        let mut b = DVector::<f64>::zeros(rows.len() * 2);

        for (r, (i, v, angle)) in rows.iter().enumerate() {
            let loc = &self.locations_m[*i];
            a[(2 * r, 0)] = 1.0;
            a[(2 * r, 2)] = -loc.y;
            a[(2 * r + 1, 1)] = 1.0;
            a[(2 * r + 1, 2)] = loc.x;

            b[2 * r] = v * angle.cos();
            b[2 * r + 1] = v * angle.sin();
        }

        let at = a.transpose();
        let ata_inv = (&at * &a).try_inverse()?;
        let x = ata_inv * at * b;

        Some((x[0], x[1], x[2]))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn square_chassis() -> SwerveKinematics {
        SwerveKinematics::new([[0.3, 0.3], [0.3, -0.3], [-0.3, 0.3], [-0.3, -0.3]])
    }

    fn near(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_straight_line() {
        let k = square_chassis();
        let hold = [Rotation2d::default(); NUM_MODULES];
        let states = k.to_module_states(&ChassisSpeeds::new(1.0, 0.0, 0.0), &hold);
        for s in states.iter() {
            assert!(near(s.speed_mps, 1.0));
            assert!(near(s.angle.radians(), 0.0));
        }

        let speeds = k.to_chassis_speeds(&states);
        assert!(near(speeds.vx_mps, 1.0));
        assert!(near(speeds.vy_mps, 0.0));
        assert!(near(speeds.omega_radps, 0.0));
    }

    #[test]
    fn test_spin_in_place() {
        let k = square_chassis();
        let hold = [Rotation2d::default(); NUM_MODULES];
        let states = k.to_module_states(&ChassisSpeeds::new(0.0, 0.0, 1.0), &hold);

        // Front left wheel points back-left to front-right tangent, i.e. 135 degrees
        assert!(near(states[0].angle.degrees(), 135.0));
        let r = 0.3f64.hypot(0.3);
        for s in states.iter() {
            assert!(near(s.speed_mps, r));
        }

        let speeds = k.to_chassis_speeds(&states);
        assert!(near(speeds.omega_radps, 1.0));
    }

    #[test]
    fn test_stopped_holds_heading() {
        let k = square_chassis();
        let hold = [Rotation2d::from_degrees(30.0); NUM_MODULES];
        let states = k.to_module_states(&ChassisSpeeds::default(), &hold);
        for s in states.iter() {
            assert_eq!(s.speed_mps, 0.0);
            assert!(near(s.angle.degrees(), 30.0));
        }
    }

    #[test]
    fn test_twist_ignores_missing_modules() {
        let k = square_chassis();
        let d = Some(SwerveModulePosition::new(0.1, Rotation2d::default()));
        let twist = k.to_twist(&[d, None, d, d]);
        assert!(near(twist.dx_m, 0.1));
        assert!(near(twist.dy_m, 0.0));
        assert!(near(twist.dtheta_rad, 0.0));

        let twist = k.to_twist(&[d, None, None, None]);
        assert_eq!(twist.dx_m, 0.0);
    }

    #[test]
    fn test_desaturate() {
        let mut states = [
            SwerveModuleState::new(6.0, Rotation2d::default()),
            SwerveModuleState::new(3.0, Rotation2d::default()),
            SwerveModuleState::new(-1.5, Rotation2d::default()),
            SwerveModuleState::new(0.0, Rotation2d::default()),
        ];
        SwerveKinematics::desaturate(&mut states, 4.5);
        assert!(near(states[0].speed_mps, 4.5));
        assert!(near(states[1].speed_mps, 2.25));
        assert!(near(states[2].speed_mps, -1.125));
    }

    #[test]
    fn test_optimize() {
        let s = SwerveModuleState::new(2.0, Rotation2d::from_degrees(170.0));
        let o = s.optimize(Rotation2d::from_degrees(0.0));
        assert!(near(o.speed_mps, -2.0));
        assert!(near(o.angle.degrees(), -10.0));

        let o = s.optimize(Rotation2d::from_degrees(120.0));
        assert_eq!(o, s);
    }

    #[test]
    fn test_field_relative_round_trip() {
        let heading = Rotation2d::from_degrees(90.0);
        let field = ChassisSpeeds::new(1.0, 0.0, 0.5);
        let robot = ChassisSpeeds::from_field_relative(&field, heading);
        assert!(near(robot.vx_mps, 0.0));
        assert!(near(robot.vy_mps, -1.0));
        let back = robot.to_field_relative(heading);
        assert!(near(back.vx_mps, 1.0));
        assert!(near(back.vy_mps, 0.0));
    }
}
