//! Commands built from closures, plus waits and prints.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use std::collections::BTreeSet;
use util::time::{Clock, Timer};

use super::{Command, CommandError, CommandResult, SubsystemId};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

type Body = Box<dyn FnMut() -> CommandResult>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Runs a closure once when scheduled, then finishes.
pub struct InstantCommand {
    name: String,
    body: Body,
    requirements: BTreeSet<SubsystemId>,
}

/// Runs a closure every tick, never finishes on its own.
pub struct RunCommand {
    name: String,
    body: Body,
    requirements: BTreeSet<SubsystemId>,
}

/// Runs one closure when scheduled and another when it ends. Never finishes on its own, used to
/// model "while held" actions.
pub struct StartEndCommand {
    name: String,
    start: Body,
    end: Body,
    requirements: BTreeSet<SubsystemId>,
}

/// A command with every lifecycle step given as a closure.
pub struct FunctionalCommand {
    name: String,
    init: Body,
    exec: Body,
    end: Box<dyn FnMut(bool) -> CommandResult>,
    is_finished: Box<dyn FnMut() -> bool>,
    requirements: BTreeSet<SubsystemId>,
}

/// Finishes once a duration has elapsed.
pub struct WaitCommand {
    timer: Timer,
    duration_s: f64,
}

/// Finishes once a condition becomes true.
pub struct WaitUntilCommand {
    condition: Box<dyn FnMut() -> bool>,
}

/// Logs a message and finishes. Runs when disabled.
pub struct PrintCommand {
    message: String,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

macro_rules! impl_requiring {
    ($($t:ty),+) => {
        $(
            impl $t {
                /// Add subsystem requirements to this command.
                pub fn requiring<I: IntoIterator<Item = SubsystemId>>(mut self, ids: I) -> Self {
                    self.requirements.extend(ids);
                    self
                }
            }
        )+
    };
}

impl_requiring!(InstantCommand, RunCommand, StartEndCommand, FunctionalCommand);

impl InstantCommand {
    pub fn new<F: FnMut() -> CommandResult + 'static>(name: &str, body: F) -> Self {
        Self {
            name: name.to_string(),
            body: Box::new(body),
            requirements: BTreeSet::new(),
        }
    }
}

impl Command for InstantCommand {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn requirements(&self) -> BTreeSet<SubsystemId> {
        self.requirements.clone()
    }

    fn initialize(&mut self) -> CommandResult {
        (self.body)()
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(true)
    }
}

impl RunCommand {
    pub fn new<F: FnMut() -> CommandResult + 'static>(name: &str, body: F) -> Self {
        Self {
            name: name.to_string(),
            body: Box::new(body),
            requirements: BTreeSet::new(),
        }
    }
}

impl Command for RunCommand {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn requirements(&self) -> BTreeSet<SubsystemId> {
        self.requirements.clone()
    }

    fn execute(&mut self) -> CommandResult {
        (self.body)()
    }
}

impl StartEndCommand {
    pub fn new<F, G>(name: &str, start: F, end: G) -> Self
    where
        F: FnMut() -> CommandResult + 'static,
        G: FnMut() -> CommandResult + 'static,
    {
        Self {
            name: name.to_string(),
            start: Box::new(start),
            end: Box::new(end),
            requirements: BTreeSet::new(),
        }
    }
}

impl Command for StartEndCommand {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn requirements(&self) -> BTreeSet<SubsystemId> {
        self.requirements.clone()
    }

    fn initialize(&mut self) -> CommandResult {
        (self.start)()
    }

    fn end(&mut self, _interrupted: bool) -> CommandResult {
        (self.end)()
    }
}

impl FunctionalCommand {
    pub fn new<I, X, E, F>(name: &str, init: I, exec: X, end: E, is_finished: F) -> Self
    where
        I: FnMut() -> CommandResult + 'static,
        X: FnMut() -> CommandResult + 'static,
        E: FnMut(bool) -> CommandResult + 'static,
        F: FnMut() -> bool + 'static,
    {
        Self {
            name: name.to_string(),
            init: Box::new(init),
            exec: Box::new(exec),
            end: Box::new(end),
            is_finished: Box::new(is_finished),
            requirements: BTreeSet::new(),
        }
    }
}

impl Command for FunctionalCommand {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn requirements(&self) -> BTreeSet<SubsystemId> {
        self.requirements.clone()
    }

    fn initialize(&mut self) -> CommandResult {
        (self.init)()
    }

    fn execute(&mut self) -> CommandResult {
        (self.exec)()
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok((self.is_finished)())
    }

    fn end(&mut self, interrupted: bool) -> CommandResult {
        (self.end)(interrupted)
    }
}

impl WaitCommand {
    pub fn new(clock: &Clock, duration_s: f64) -> Self {
        Self {
            timer: Timer::new(clock),
            duration_s,
        }
    }
}

impl Command for WaitCommand {
    fn name(&self) -> String {
        format!("Wait({}s)", self.duration_s)
    }

    fn initialize(&mut self) -> CommandResult {
        self.timer.restart();
        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(self.timer.has_elapsed(self.duration_s))
    }

    fn end(&mut self, _interrupted: bool) -> CommandResult {
        self.timer.stop();
        Ok(())
    }

    fn runs_when_disabled(&self) -> bool {
        true
    }
}

impl WaitUntilCommand {
    pub fn new<F: FnMut() -> bool + 'static>(condition: F) -> Self {
        Self {
            condition: Box::new(condition),
        }
    }
}

impl Command for WaitUntilCommand {
    fn name(&self) -> String {
        String::from("WaitUntil")
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok((self.condition)())
    }

    fn runs_when_disabled(&self) -> bool {
        true
    }
}

impl PrintCommand {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl Command for PrintCommand {
    fn name(&self) -> String {
        String::from("Print")
    }

    fn initialize(&mut self) -> CommandResult {
        info!("{}", self.message);
        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(true)
    }

    fn runs_when_disabled(&self) -> bool {
        true
    }
}
