//! # System identification
//!
//! Runs the standard characterisation tests against a mechanism which accepts a raw voltage:
//!
//! - quasistatic, the voltage ramps up slowly from zero so acceleration is negligible,
//! - dynamic, a voltage step is applied so acceleration dominates.
//!
//! Each test runs forwards or in reverse until interrupted or until it times out. Every tick the
//! applied voltage and the mechanism's position and velocity are logged under
//! `sysid/<mechanism>/`, along with the name of the running test.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use serde::Deserialize;
use std::{cell::RefCell, collections::BTreeSet, rc::Rc};
use util::time::{Clock, Timer};

use crate::{
    cmd::{Command, CommandError, CommandResult, SequentialGroup, SubsystemId},
    hal::HalError,
    telemetry::LogContext,
};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

type DriveFn = Box<dyn FnMut(f64) -> Result<(), HalError>>;
type SampleFn = Box<dyn Fn() -> Option<(f64, f64)>>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
pub struct SysIdConfig {
    /// Units: volts/second
    #[serde(default = "default_ramp_rate")]
    pub ramp_rate_vps: f64,

    /// Units: volts
    #[serde(default = "default_step_voltage")]
    pub step_voltage_v: f64,

    /// Units: seconds
    #[serde(default = "default_timeout")]
    pub timeout_s: f64,
}

/// Test configuration for every characterised mechanism.
#[derive(Debug, Clone, Deserialize)]
pub struct SysIdParams {
    pub drive_translation: SysIdConfig,
    pub drive_steer: SysIdConfig,
    pub drive_rotation: SysIdConfig,
    pub elevator: SysIdConfig,
}

/// A mechanism under test.
pub struct SysIdMechanism {
    name: String,
    requirement: SubsystemId,
    drive: DriveFn,
    sample: SampleFn,
}

/// Builds the four test commands for one mechanism.
pub struct SysIdRoutine {
    config: SysIdConfig,
    mechanism: Rc<RefCell<SysIdMechanism>>,
    clock: Clock,
}

/// One characterisation test.
pub struct SysIdCommand {
    config: SysIdConfig,
    mechanism: Rc<RefCell<SysIdMechanism>>,
    test: SysIdTest,
    direction: SysIdDirection,
    timer: Timer,
    tm: LogContext,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SysIdTest {
    Quasistatic,
    Dynamic,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SysIdDirection {
    Forward,
    Reverse,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SysIdConfig {
    fn default() -> Self {
        Self {
            ramp_rate_vps: default_ramp_rate(),
            step_voltage_v: default_step_voltage(),
            timeout_s: default_timeout(),
        }
    }
}

impl SysIdMechanism {
    /// A mechanism driven by `drive` (volts) and measured by `sample` (position, velocity in the
    /// mechanism's own units).
    pub fn new<D, S>(name: &str, requirement: SubsystemId, drive: D, sample: S) -> Self
    where
        D: FnMut(f64) -> Result<(), HalError> + 'static,
        S: Fn() -> Option<(f64, f64)> + 'static,
    {
        Self {
            name: name.to_string(),
            requirement,
            drive: Box::new(drive),
            sample: Box::new(sample),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SysIdRoutine {
    pub fn new(config: SysIdConfig, mechanism: SysIdMechanism, clock: &Clock) -> Self {
        Self {
            config,
            mechanism: Rc::new(RefCell::new(mechanism)),
            clock: clock.clone(),
        }
    }

    pub fn quasistatic(&self, direction: SysIdDirection) -> SysIdCommand {
        self.command(SysIdTest::Quasistatic, direction)
    }

    pub fn dynamic(&self, direction: SysIdDirection) -> SysIdCommand {
        self.command(SysIdTest::Dynamic, direction)
    }

    /// Every test in turn: quasistatic forward and reverse, then dynamic forward and reverse.
    pub fn all_tests(&self) -> SequentialGroup {
        SequentialGroup::new(vec![
            Box::new(self.quasistatic(SysIdDirection::Forward)),
            Box::new(self.quasistatic(SysIdDirection::Reverse)),
            Box::new(self.dynamic(SysIdDirection::Forward)),
            Box::new(self.dynamic(SysIdDirection::Reverse)),
        ])
    }

    fn command(&self, test: SysIdTest, direction: SysIdDirection) -> SysIdCommand {
        let name = self.mechanism.borrow().name.clone();
        SysIdCommand {
            config: self.config,
            mechanism: self.mechanism.clone(),
            test,
            direction,
            timer: Timer::new(&self.clock),
            tm: LogContext::new("sysid").child(&name),
        }
    }
}

impl SysIdCommand {
    /// Voltage to apply `elapsed_s` into the test.
    pub fn voltage_at(&self, elapsed_s: f64) -> f64 {
        let sign = match self.direction {
            SysIdDirection::Forward => 1.0,
            SysIdDirection::Reverse => -1.0,
        };
        match self.test {
            SysIdTest::Quasistatic => sign * self.config.ramp_rate_vps * elapsed_s,
            SysIdTest::Dynamic => sign * self.config.step_voltage_v,
        }
    }

    fn state_name(&self) -> String {
        let test = match self.test {
            SysIdTest::Quasistatic => "quasistatic",
            SysIdTest::Dynamic => "dynamic",
        };
        let dir = match self.direction {
            SysIdDirection::Forward => "forward",
            SysIdDirection::Reverse => "reverse",
        };
        format!("{}-{}", test, dir)
    }
}

impl Command for SysIdCommand {
    fn name(&self) -> String {
        format!("SysId({}, {})", self.mechanism.borrow().name, self.state_name())
    }

    fn requirements(&self) -> BTreeSet<SubsystemId> {
        let mut r = BTreeSet::new();
        r.insert(self.mechanism.borrow().requirement);
        r
    }

    fn initialize(&mut self) -> CommandResult {
        info!("Starting {}", self.name());
        self.timer.restart();
        Ok(())
    }

    fn execute(&mut self) -> CommandResult {
        let volts = self.voltage_at(self.timer.get_s());
        let mut mech = self
            .mechanism
            .try_borrow_mut()
            .map_err(|_| CommandError::Failed(String::from("mechanism in use by another test")))?;

        (mech.drive)(volts)?;

        self.tm.put("voltage", volts);
        self.tm.put("state", self.state_name());
        if let Some((position, velocity)) = (mech.sample)() {
            self.tm.put("position", position);
            self.tm.put("velocity", velocity);
        }
        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(self.timer.has_elapsed(self.config.timeout_s))
    }

    fn end(&mut self, _interrupted: bool) -> CommandResult {
        self.timer.stop();
        self.tm.put("state", "none");
        let mut mech = self
            .mechanism
            .try_borrow_mut()
            .map_err(|_| CommandError::Failed(String::from("mechanism in use by another test")))?;
        (mech.drive)(0.0)?;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_ramp_rate() -> f64 {
    1.0
}

fn default_step_voltage() -> f64 {
    7.0
}

fn default_timeout() -> f64 {
    10.0
}
