//! # Trapezoidal motion profile
//!
//! Steps a setpoint towards a goal position without exceeding a cruise velocity or an
//! acceleration limit, arriving at the goal at rest.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Limits of a profile.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
pub struct ProfileConstraints {
    /// Units: meters/second
    pub cruise_velocity_mps: f64,

    /// Units: meters/second^2
    pub acceleration_mps2: f64,

    /// Accepted so parameter files can carry it, the trapezoid has no jerk limit.
    ///
    /// Units: meters/second^3
    #[serde(default)]
    pub jerk_mps3: f64,
}

/// A point on the profile.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct ProfileState {
    /// Units: meters
    pub position_m: f64,

    /// Units: meters/second
    pub velocity_mps: f64,
}

#[derive(Debug, Clone)]
pub struct TrapezoidProfile {
    constraints: ProfileConstraints,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrapezoidProfile {
    pub fn new(constraints: ProfileConstraints) -> Self {
        Self { constraints }
    }

    pub fn constraints(&self) -> &ProfileConstraints {
        &self.constraints
    }

    /// The setpoint `dt_s` after `current` when heading for `goal_m`, and the acceleration used
    /// to get there.
    pub fn calculate(&self, dt_s: f64, current: ProfileState, goal_m: f64) -> (ProfileState, f64) {
        let accel = self.constraints.acceleration_mps2.abs();
        let cruise = self.constraints.cruise_velocity_mps.abs();

        if dt_s <= 0.0 {
            return (current, 0.0);
        }

        // Work along the direction of travel so the rest is one-sided
        let error = goal_m - current.position_m;
        let dir = if error >= 0.0 { 1.0 } else { -1.0 };
        let remaining = error.abs();
        let v = current.velocity_mps * dir;

        // Fastest speed from which we can still stop at the goal
        let v_stop = (2.0 * accel * remaining).sqrt();
        let v_target = cruise.min(v_stop);

        let v_next = if v < v_target {
            (v + accel * dt_s).min(v_target)
        } else {
            (v - accel * dt_s).max(v_target)
        };

        let travel = 0.5 * (v + v_next) * dt_s;
        if travel >= remaining {
            let state = ProfileState {
                position_m: goal_m,
                velocity_mps: 0.0,
            };
            return (state, -current.velocity_mps / dt_s);
        }

        let state = ProfileState {
            position_m: current.position_m + dir * travel,
            velocity_mps: dir * v_next,
        };
        (state, dir * (v_next - v) / dt_s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn profile() -> TrapezoidProfile {
        TrapezoidProfile::new(ProfileConstraints {
            cruise_velocity_mps: 0.4,
            acceleration_mps2: 1.0,
            jerk_mps3: 0.0,
        })
    }

    fn run(p: &TrapezoidProfile, start: ProfileState, goal_m: f64) -> (usize, f64) {
        let mut state = start;
        let mut max_speed: f64 = 0.0;
        for i in 0..1000 {
            let (next, _) = p.calculate(0.02, state, goal_m);
            state = next;
            max_speed = max_speed.max(state.velocity_mps.abs());
            if state.position_m == goal_m && state.velocity_mps == 0.0 {
                return (i + 1, max_speed);
            }
        }
        panic!("profile did not reach the goal");
    }

    #[test]
    fn test_reaches_goal_within_limits() {
        let p = profile();
        let (ticks, max_speed) = run(&p, ProfileState::default(), 0.6);

        assert!(max_speed <= 0.4 + 1e-9);
        // 0.4 s accelerating, 0.4 s braking and 1.1 s cruising, give or take the discretisation
        assert!(ticks >= 85 && ticks <= 105, "took {} ticks", ticks);
    }

    #[test]
    fn test_moves_down_and_reverses() {
        let p = profile();

        let (ticks, _) = run(&p, ProfileState { position_m: 0.5, velocity_mps: 0.0 }, 0.1);
        assert!(ticks > 0);

        // Moving up at speed with a goal below, the first step must slow down
        let start = ProfileState {
            position_m: 0.3,
            velocity_mps: 0.4,
        };
        let (next, accel) = p.calculate(0.02, start, 0.0);
        assert!(next.velocity_mps < 0.4);
        assert!((accel + 1.0).abs() < 1e-9);
        run(&p, start, 0.0);
    }

    #[test]
    fn test_at_goal_stays() {
        let p = profile();
        let at = ProfileState {
            position_m: 0.25,
            velocity_mps: 0.0,
        };
        let (next, accel) = p.calculate(0.02, at, 0.25);
        assert_eq!(next, at);
        assert_eq!(accel, 0.0);
    }
}
