//! # Elevator
//!
//! One linear axis driven by a single motor, with a limit switch at the bottom of travel. The
//! motor's mechanism unit is the meter of carriage travel.
//!
//! Position moves are profiled in software and handed to the motor controller as closed loop
//! position setpoints with a feedforward. Whenever the limit switch is reached the encoder is
//! rezeroed.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use serde::Deserialize;
use std::{cell::RefCell, rc::Rc};
use util::time::Clock;

use super::profile::{ProfileConstraints, ProfileState, TrapezoidProfile};
use crate::{
    cmd::{CommandResult, FunctionalCommand, RunCommand, Subsystem, SubsystemExt, SubsystemId},
    hal::{Battery, ControlRequest, DigitalInput, HalError, Hardware, Motor, MotorConfig},
    sysid::{SysIdConfig, SysIdMechanism, SysIdRoutine},
    telemetry::{LogContext, Loggable},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// In simulation the limit switch closes at or below this position.
///
/// Units: meters
const SIM_LIMIT_POSITION_M: f64 = 1e-3;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ElevatorParams {
    pub name: String,

    pub profile: ProfileConstraints,

    pub feedforward: ElevatorFeedforward,

    /// Top of travel, the bottom is zero.
    ///
    /// Units: meters
    pub upper_limit_m: f64,

    /// Units: meters
    pub tolerance_m: f64,

    /// Duty cycle used when homing
    pub homing_speed: f64,

    /// Closed loop gains and limits of the motor controller, in meters of travel.
    pub motor: MotorConfig,
}

/// Feedforward terms of the position loop.
#[derive(Debug, Copy, Clone, Default, PartialEq, Deserialize)]
pub struct ElevatorFeedforward {
    /// Units: volts
    pub ks_v: f64,

    /// Units: volts/(meter/second)
    pub kv_v_per_mps: f64,

    /// Units: volts/(meter/second^2)
    pub ka_v_per_mps2: f64,

    /// Holds the carriage against gravity.
    ///
    /// Units: volts
    pub kg_v: f64,
}

pub struct Elevator {
    id: SubsystemId,
    params: ElevatorParams,
    period_s: f64,

    motor: Motor,
    limit: DigitalInput,
    battery: Battery,
    simulated: bool,

    profile: TrapezoidProfile,
    output: ElevatorOutput,

    /// Goal of the last position request, kept after the output changes
    target_m: f64,

    /// Current profiled setpoint
    setpoint: ProfileState,
    setpoint_accel_mps2: f64,

    /// Set once the encoder has been zeroed on the switch for this contact
    limit_latched: bool,
    homed: bool,

    /// Ticks where the profiled output could not be applied
    num_output_faults: u64,
    output_fault: bool,

    tm: LogContext,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq)]
enum ElevatorOutput {
    Neutral,
    Profiled,
    Duty,
    Voltage,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Elevator {
    pub fn new(hw: &Hardware, params: ElevatorParams, period_s: f64) -> Self {
        let mut config = params.motor.clone();
        config.forward_soft_limit_rot = Some(params.upper_limit_m);
        config.reverse_soft_limit_rot = Some(0.0);

        let tm = LogContext::new("Superstructure").child(&params.name);

        Self {
            id: SubsystemId::next(),
            motor: hw.motor(&format!("Superstructure/{}/motor", params.name), config),
            limit: hw.digital_input(&format!("Superstructure/{}/limit", params.name), true),
            battery: hw.battery(),
            simulated: hw.is_sim(),
            profile: TrapezoidProfile::new(params.profile),
            output: ElevatorOutput::Neutral,
            target_m: 0.0,
            setpoint: ProfileState::default(),
            setpoint_accel_mps2: 0.0,
            limit_latched: false,
            homed: false,
            num_output_faults: 0,
            output_fault: false,
            period_s,
            params,
            tm,
        }
    }

    pub fn with_context(mut self, tm: LogContext) -> Self {
        self.tm = tm;
        self
    }

    pub fn params(&self) -> &ElevatorParams {
        &self.params
    }

    pub fn motor(&self) -> &Motor {
        &self.motor
    }

    /// Start a profiled move to `position_m`, clamped into the travel.
    pub fn set_target_position(&mut self, position_m: f64) {
        let goal_m = position_m.max(0.0).min(self.params.upper_limit_m);
        if goal_m != position_m {
            warn!(
                "{} target {:.3} m is outside the travel, using {:.3} m",
                self.params.name, position_m, goal_m
            );
        }

        // A new move continues from the live setpoint, otherwise from where the carriage is
        if self.output != ElevatorOutput::Profiled {
            self.setpoint = ProfileState {
                position_m: self.position_m().unwrap_or(0.0),
                velocity_mps: self.velocity_mps().unwrap_or(0.0),
            };
        }

        self.target_m = goal_m;
        self.output = ElevatorOutput::Profiled;
        self.motor.set_reverse_soft_limit_enabled(true);
    }

    /// Open loop duty cycle plus gravity compensation. With `override_lower_limit` the carriage
    /// may be driven below the reverse soft limit, used for homing.
    pub fn set_speed(&mut self, duty: f64, override_lower_limit: bool) -> Result<(), HalError> {
        self.output = ElevatorOutput::Duty;
        self.motor
            .set_reverse_soft_limit_enabled(!override_lower_limit);

        let gravity = self.params.feedforward.kg_v / self.battery.voltage_or_nominal_v();
        self.motor.set_control(ControlRequest::DutyCycle {
            output: (duty + gravity).max(-1.0).min(1.0),
        })
    }

    /// Raw voltage, used by system identification.
    pub fn set_voltage(&mut self, volts: f64) -> Result<(), HalError> {
        self.output = ElevatorOutput::Voltage;
        self.motor.set_control(ControlRequest::Voltage { volts })
    }

    pub fn set_lower_limit_enabled(&mut self, enabled: bool) {
        self.motor.set_reverse_soft_limit_enabled(enabled);
    }

    /// Zero the encoder at the current position.
    pub fn reset_position(&mut self) -> Result<(), HalError> {
        self.motor.set_position(0.0)?;
        self.setpoint = ProfileState::default();
        self.homed = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.output = ElevatorOutput::Neutral;
        self.motor.stop();
    }

    /// Units: meters
    pub fn position_m(&self) -> Result<f64, HalError> {
        self.motor.position_rot()
    }

    /// Units: meters/second
    pub fn velocity_mps(&self) -> Result<f64, HalError> {
        self.motor.velocity_rps()
    }

    /// Units: meters
    pub fn target_position_m(&self) -> f64 {
        self.target_m
    }

    pub fn is_homed(&self) -> bool {
        self.homed
    }

    pub fn num_output_faults(&self) -> u64 {
        self.num_output_faults
    }

    /// Whether the bottom limit switch is closed. A switch that can't be read is open.
    pub fn is_at_limit(&self) -> bool {
        self.limit.get().unwrap_or(false)
    }

    pub fn is_at_target_position(&self) -> bool {
        self.is_at_position(self.target_m)
    }

    pub fn is_at_position(&self, position_m: f64) -> bool {
        match self.position_m() {
            Ok(p) => (p - position_m).abs() <= self.params.tolerance_m,
            Err(_) => false,
        }
    }

    fn feedforward_v(&self, velocity_mps: f64, accel_mps2: f64) -> f64 {
        let ff = &self.params.feedforward;
        let static_v = if velocity_mps.abs() > 1e-9 {
            ff.ks_v * velocity_mps.signum()
        } else {
            0.0
        };
        static_v + ff.kv_v_per_mps * velocity_mps + ff.ka_v_per_mps2 * accel_mps2 + ff.kg_v
    }

    fn step_profile(&mut self) -> Result<(), HalError> {
        let (next, accel) = self
            .profile
            .calculate(self.period_s, self.setpoint, self.target_m);
        self.setpoint = next;
        self.setpoint_accel_mps2 = accel;

        self.motor.set_control(ControlRequest::Position {
            position_rot: next.position_m,
            velocity_rps: next.velocity_mps,
            feedforward_v: self.feedforward_v(next.velocity_mps, accel),
        })
    }

    fn update_limit(&mut self) {
        if self.simulated {
            if let Ok(p) = self.position_m() {
                self.limit.set_sim(p <= SIM_LIMIT_POSITION_M);
            }
        }

        if !self.is_at_limit() {
            self.limit_latched = false;
            return;
        }

        if !self.limit_latched {
            match self.reset_position() {
                Ok(()) => {
                    info!("{} zeroed on the limit switch", self.params.name);
                    self.limit_latched = true;
                }
                Err(e) => warn!("{} could not zero on the limit switch: {}", self.params.name, e),
            }
        }
    }
}

impl Subsystem for Elevator {
    fn name(&self) -> &str {
        &self.params.name
    }

    fn id(&self) -> SubsystemId {
        self.id
    }

    fn periodic(&mut self) {
        self.update_limit();

        if self.output == ElevatorOutput::Profiled {
            match self.step_profile() {
                Ok(()) => self.output_fault = false,
                Err(e) => {
                    self.num_output_faults += 1;
                    if !self.output_fault {
                        warn!("{} profiled output not applied: {}", self.params.name, e);
                        self.output_fault = true;
                    }
                }
            }
        }

        self.log(&self.tm);
    }
}

impl Loggable for Elevator {
    fn log(&self, ctx: &LogContext) {
        if let Ok(p) = self.position_m() {
            ctx.put("position", p);
        }
        if let Ok(v) = self.velocity_mps() {
            ctx.put("velocity", v);
        }
        if let Ok(v) = self.motor.applied_voltage_v() {
            ctx.put("voltage", v);
        }
        ctx.put("target", self.target_m);
        ctx.put("setpoint", self.setpoint.position_m);
        ctx.put("at_limit", self.is_at_limit());
        ctx.put("homed", self.homed);
        ctx.put("output_faults", self.num_output_faults as i64);
        ctx.put("output", format!("{:?}", self.output));
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Move to `position_m`, finishing once within tolerance. The motor is released at the end.
pub fn move_to_position(elevator: &Rc<RefCell<Elevator>>, position_m: f64) -> FunctionalCommand {
    let name = format!("{}MoveTo({:.3})", elevator.borrow().params.name, position_m);
    let (e_init, e_end, e_fin) = (elevator.clone(), elevator.clone(), elevator.clone());

    FunctionalCommand::new(
        &name,
        move || {
            e_init.borrow_mut().set_target_position(position_m);
            Ok(())
        },
        || Ok(()),
        move |_| {
            e_end.borrow_mut().stop();
            Ok(())
        },
        move || e_fin.borrow().is_at_target_position(),
    )
    .requiring(Some(elevator.borrow().id()))
}

/// Hold `position_m` until interrupted.
pub fn hold_at_position(elevator: &Rc<RefCell<Elevator>>, position_m: f64) -> FunctionalCommand {
    let name = format!("{}Hold({:.3})", elevator.borrow().params.name, position_m);
    let (e_init, e_end) = (elevator.clone(), elevator.clone());

    FunctionalCommand::new(
        &name,
        move || {
            e_init.borrow_mut().set_target_position(position_m);
            Ok(())
        },
        || Ok(()),
        move |_| {
            e_end.borrow_mut().stop();
            Ok(())
        },
        || false,
    )
    .requiring(Some(elevator.borrow().id()))
}

/// Drive down past the soft limit until the limit switch closes, then zero the encoder.
pub fn homing(elevator: &Rc<RefCell<Elevator>>) -> FunctionalCommand {
    let (speed, name) = {
        let e = elevator.borrow();
        (e.params.homing_speed.abs(), format!("{}Homing", e.params.name))
    };
    let (e_init, e_exec, e_end, e_fin) = (
        elevator.clone(),
        elevator.clone(),
        elevator.clone(),
        elevator.clone(),
    );

    FunctionalCommand::new(
        &name,
        move || {
            e_init.borrow_mut().set_lower_limit_enabled(false);
            Ok(())
        },
        move || {
            e_exec.borrow_mut().set_speed(-speed, true)?;
            Ok(())
        },
        move |_| -> CommandResult {
            let mut e = e_end.borrow_mut();
            e.stop();
            let reset = e.reset_position();
            e.set_lower_limit_enabled(true);
            reset?;
            Ok(())
        },
        move || e_fin.borrow().is_at_limit(),
    )
    .requiring(Some(elevator.borrow().id()))
}

/// Drive at the duty cycle given by `speed` every tick.
pub fn manual_control<F>(elevator: &Rc<RefCell<Elevator>>, mut speed: F) -> RunCommand
where
    F: FnMut() -> f64 + 'static,
{
    let name = format!("{}Manual", elevator.borrow().params.name);
    elevator.run(&name, move |e| {
        e.set_speed(speed(), false)?;
        Ok(())
    })
}

/// Characterise the elevator with raw voltages. The lower soft limit stays enabled.
pub fn sysid(elevator: &Rc<RefCell<Elevator>>, config: SysIdConfig, clock: &Clock) -> SysIdRoutine {
    let (e_drive, e_sample) = (elevator.clone(), elevator.clone());
    let name = format!("elevator_{}", elevator.borrow().params.name.to_lowercase());
    let mech = SysIdMechanism::new(
        &name,
        elevator.borrow().id(),
        move |volts| e_drive.borrow_mut().set_voltage(volts),
        move || {
            let e = e_sample.borrow();
            Some((e.position_m().ok()?, e.velocity_mps().ok()?))
        },
    );
    SysIdRoutine::new(config, mech, clock)
}
