//! # Climber
//!
//! An arm driven open loop at a fixed duty cycle. Travel is limited in software: a command which
//! would move the arm past either end of its travel gives zero output instead.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use std::{cell::RefCell, rc::Rc};

use crate::{
    cmd::{FunctionalCommand, Subsystem, SubsystemId},
    hal::{ControlRequest, HalError, Hardware, Motor, MotorConfig},
    telemetry::{LogContext, Loggable},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ClimberParams {
    /// Duty cycle when extending or retracting
    pub climb_speed: f64,

    /// Units: rotations
    pub lower_limit_rot: f64,

    /// Units: rotations
    pub upper_limit_rot: f64,

    /// Units: rotations
    pub tolerance_rot: f64,

    pub motor: MotorConfig,
}

pub struct Climber {
    id: SubsystemId,
    params: ClimberParams,
    motor: Motor,

    /// Last commanded duty cycle, after limiting
    output: f64,

    tm: LogContext,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Climber {
    pub fn new(hw: &Hardware, params: ClimberParams) -> Self {
        Self {
            id: SubsystemId::next(),
            motor: hw.motor("Climber/motor", params.motor.clone()),
            params,
            output: 0.0,
            tm: LogContext::new("Climber"),
        }
    }

    pub fn with_context(mut self, tm: LogContext) -> Self {
        self.tm = tm;
        self
    }

    pub fn motor(&self) -> &Motor {
        &self.motor
    }

    /// Units: rotations
    pub fn position_rot(&self) -> Result<f64, HalError> {
        self.motor.position_rot()
    }

    pub fn is_fully_extended(&self) -> bool {
        match self.position_rot() {
            Ok(p) => p >= self.params.upper_limit_rot - self.params.tolerance_rot,
            Err(_) => true,
        }
    }

    pub fn is_fully_retracted(&self) -> bool {
        match self.position_rot() {
            Ok(p) => p <= self.params.lower_limit_rot + self.params.tolerance_rot,
            Err(_) => true,
        }
    }

    pub fn extend(&mut self) -> Result<(), HalError> {
        self.set_speed(self.params.climb_speed.abs())
    }

    pub fn retract(&mut self) -> Result<(), HalError> {
        self.set_speed(-self.params.climb_speed.abs())
    }

    /// Drive at `speed`, zeroed if it would leave the travel. A position that can't be read
    /// counts as being at both limits.
    pub fn set_speed(&mut self, speed: f64) -> Result<(), HalError> {
        let mut speed = speed.max(-1.0).min(1.0);
        if (speed > 0.0 && self.is_fully_extended()) || (speed < 0.0 && self.is_fully_retracted())
        {
            speed = 0.0;
        }

        self.output = speed;
        self.motor
            .set_control(ControlRequest::DutyCycle { output: speed })
    }

    pub fn stop(&mut self) {
        self.output = 0.0;
        self.motor.stop();
    }
}

impl Subsystem for Climber {
    fn name(&self) -> &str {
        "Climber"
    }

    fn id(&self) -> SubsystemId {
        self.id
    }

    fn periodic(&mut self) {
        self.log(&self.tm);
    }
}

impl Loggable for Climber {
    fn log(&self, ctx: &LogContext) {
        if let Ok(p) = self.position_rot() {
            ctx.put("position", p);
        }
        ctx.put("output", self.output);
        ctx.put("extended", self.is_fully_extended());
        ctx.put("retracted", self.is_fully_retracted());
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Extend until interrupted, stopping at the top of travel.
pub fn extend(climber: &Rc<RefCell<Climber>>) -> FunctionalCommand {
    drive(climber, "ExtendClimber", true)
}

/// Retract until interrupted, stopping at the bottom of travel.
pub fn retract(climber: &Rc<RefCell<Climber>>) -> FunctionalCommand {
    drive(climber, "RetractClimber", false)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn drive(climber: &Rc<RefCell<Climber>>, name: &str, extending: bool) -> FunctionalCommand {
    let (c_exec, c_end) = (climber.clone(), climber.clone());
    FunctionalCommand::new(
        name,
        || Ok(()),
        move || {
            let mut c = c_exec.borrow_mut();
            if extending {
                c.extend()?;
            } else {
                c.retract()?;
            }
            Ok(())
        },
        move |_| {
            c_end.borrow_mut().stop();
            Ok(())
        },
        || false,
    )
    .requiring(Some(climber.borrow().id()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cmd::{CommandExt, Scheduler};
    use util::time::Clock;

    fn sim() -> (Rc<RefCell<Climber>>, Scheduler, Clock) {
        let clock = Clock::manual();
        let hw = Hardware::sim(&clock);
        let params: ClimberParams =
            toml::from_str(include_str!("../../params/climber.toml")).unwrap();
        let c = Rc::new(RefCell::new(Climber::new(&hw, params)));
        let mut sched = Scheduler::new();
        sched.set_disabled(false);
        sched.register_subsystem(&c);
        (c, sched, clock)
    }

    #[test]
    fn test_extend_clamps_at_top() {
        let (c, mut sched, clock) = sim();
        let cmd = extend(&c).into_handle();
        sched.schedule(&cmd).unwrap();

        for _ in 0..100 {
            clock.advance(0.02);
            sched.run();
        }

        let c_ref = c.borrow();
        assert!(c_ref.is_fully_extended());
        assert_eq!(c_ref.motor().control(), ControlRequest::DutyCycle { output: 0.0 });
        // Never more than one tick of travel past the limit
        assert!(c_ref.position_rot().unwrap() <= 0.22 + 0.5 * 0.02);
        drop(c_ref);

        sched.cancel(&cmd);
        assert_eq!(c.borrow().motor().control(), ControlRequest::Neutral);
    }

    #[test]
    fn test_retract_from_top() {
        let (c, mut sched, clock) = sim();
        c.borrow().motor().set_position(0.2).unwrap();

        let cmd = retract(&c).into_handle();
        sched.schedule(&cmd).unwrap();
        clock.advance(0.02);
        sched.run();
        assert_eq!(
            c.borrow().motor().control(),
            ControlRequest::DutyCycle { output: -1.0 }
        );

        for _ in 0..100 {
            clock.advance(0.02);
            sched.run();
        }
        assert!(c.borrow().is_fully_retracted());
    }

    #[test]
    fn test_limits_refuse_further_travel() {
        let (c, _sched, _clock) = sim();
        let mut c = c.borrow_mut();

        c.motor().set_position(0.3).unwrap();
        c.extend().unwrap();
        assert_eq!(c.motor().control(), ControlRequest::DutyCycle { output: 0.0 });
        c.retract().unwrap();
        assert_eq!(c.motor().control(), ControlRequest::DutyCycle { output: -1.0 });

        c.motor().set_position(-0.05).unwrap();
        c.retract().unwrap();
        assert_eq!(c.motor().control(), ControlRequest::DutyCycle { output: 0.0 });
    }
}
