//! # Command runtime
//!
//! Commands are small state machines (`initialize`, `execute`, `is_finished`, `end`) which act on
//! subsystems. The [`Scheduler`] runs them once per main tick and guarantees that a subsystem is
//! only ever used by one command at a time.
//!
//! Commands are composed with the groups in [`group`] and the decorators in [`CommandExt`], and
//! bound to operator inputs through [`Trigger`]s.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Basic commands built from closures
pub mod basic;

/// Sequential and parallel command groups
pub mod group;

mod scheduler;
mod subsystem;
mod trigger;

pub use basic::{
    FunctionalCommand, InstantCommand, PrintCommand, RunCommand, StartEndCommand, WaitCommand,
    WaitUntilCommand,
};
pub use group::{ParallelGroup, ParallelKind, SequentialGroup};
pub use scheduler::{BindingKind, Scheduler, SchedulerError};
pub use subsystem::{Subsystem, SubsystemExt, SubsystemId};
pub use trigger::Trigger;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{cell::RefCell, collections::BTreeSet, fmt, rc::Rc};
use thiserror::Error;
use util::time::Clock;

use crate::hal::HalError;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Result of a command body.
pub type CommandResult = Result<(), CommandError>;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A command which can be run by the [`Scheduler`].
///
/// Lifecycle: `initialize` once when scheduled, then `execute` followed by `is_finished` every
/// tick, then `end` exactly once. `end(false)` means the command finished by itself,
/// `end(true)` that it was interrupted.
///
/// A body which returns an error (or panics) is force-ended and removed by the scheduler.
pub trait Command {
    fn name(&self) -> String {
        String::from("Command")
    }

    /// Subsystems this command needs exclusive use of.
    fn requirements(&self) -> BTreeSet<SubsystemId> {
        BTreeSet::new()
    }

    fn initialize(&mut self) -> CommandResult {
        Ok(())
    }

    fn execute(&mut self) -> CommandResult {
        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(false)
    }

    fn end(&mut self, _interrupted: bool) -> CommandResult {
        Ok(())
    }

    /// Whether `execute` runs while the robot is disabled.
    fn runs_when_disabled(&self) -> bool {
        false
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        InterruptionBehavior::CancelSelf
    }
}

/// Decorators available on every command.
pub trait CommandExt: Command + Sized + 'static {
    /// Run `next` once this command finishes.
    fn and_then<C: Command + 'static>(self, next: C) -> SequentialGroup {
        SequentialGroup::new(vec![Box::new(self), Box::new(next)])
    }

    /// End this command early once `condition` becomes true.
    fn until<F: FnMut() -> bool + 'static>(self, condition: F) -> ParallelGroup {
        ParallelGroup::new_unchecked(
            ParallelKind::Race,
            vec![Box::new(self), Box::new(WaitUntilCommand::new(condition))],
        )
    }

    /// Interrupt this command if it runs for longer than `timeout_s`.
    fn with_timeout(self, clock: &Clock, timeout_s: f64) -> ParallelGroup {
        ParallelGroup::new_unchecked(
            ParallelKind::Race,
            vec![Box::new(self), Box::new(WaitCommand::new(clock, timeout_s))],
        )
    }

    /// Run alongside `other`, finishing when both have finished.
    fn along_with<C: Command + 'static>(self, other: C) -> Result<ParallelGroup, CompositionError> {
        ParallelGroup::new(ParallelKind::All, vec![Box::new(self), Box::new(other)])
    }

    /// Run alongside `other`, finishing when either finishes.
    fn race_with<C: Command + 'static>(self, other: C) -> Result<ParallelGroup, CompositionError> {
        ParallelGroup::new(ParallelKind::Race, vec![Box::new(self), Box::new(other)])
    }

    /// Run alongside `others`, finishing when this command finishes.
    fn deadline_with(
        self,
        others: Vec<Box<dyn Command>>,
    ) -> Result<ParallelGroup, CompositionError> {
        let mut commands: Vec<Box<dyn Command>> = vec![Box::new(self)];
        commands.extend(others);
        ParallelGroup::new(ParallelKind::Deadline, commands)
    }

    fn ignoring_disable(self, runs_when_disabled: bool) -> Wrapped<Self> {
        Wrapped::new(self).allow_disabled(runs_when_disabled)
    }

    fn with_name(self, name: &str) -> Wrapped<Self> {
        Wrapped::new(self).named(name)
    }

    fn with_interrupt_behavior(self, behavior: InterruptionBehavior) -> Wrapped<Self> {
        Wrapped::new(self).interrupt_behavior(behavior)
    }

    fn boxed(self) -> Box<dyn Command> {
        Box::new(self)
    }

    /// Wrap into a shared handle which can be scheduled and bound to triggers.
    fn into_handle(self) -> CommandHandle {
        CommandHandle::new(self)
    }
}

impl<C: Command + Sized + 'static> CommandExt for C {}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A shared, schedulable reference to a command.
///
/// Two handles are equal when they refer to the same command instance.
#[derive(Clone)]
pub struct CommandHandle(Rc<RefCell<dyn Command>>);

/// A command with some of its properties overridden.
pub struct Wrapped<C: Command> {
    inner: C,
    name: Option<String>,
    runs_when_disabled: Option<bool>,
    interrupt_behavior: Option<InterruptionBehavior>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What happens when a command is scheduled that needs a subsystem this command holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InterruptionBehavior {
    /// This command is cancelled and the incoming one runs
    CancelSelf,

    /// The incoming command is refused
    CancelIncoming,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Hardware fault: {0}")]
    Hal(#[from] HalError),

    #[error("{0}")]
    Failed(String),

    #[error("Command body panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum CompositionError {
    #[error("Commands in a parallel group must not share requirements, {0} and {1} overlap")]
    OverlappingRequirements(String, String),

    #[error("A deadline group needs a deadline command")]
    NoDeadline,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CommandHandle {
    pub fn new<C: Command + 'static>(command: C) -> Self {
        Self(Rc::new(RefCell::new(command)))
    }

    pub fn from_boxed(command: Box<dyn Command>) -> Self {
        Self::new(command)
    }

    pub fn name(&self) -> String {
        self.0
            .try_borrow()
            .map(|c| c.name())
            .unwrap_or_else(|_| String::from("<busy>"))
    }

    pub fn requirements(&self) -> BTreeSet<SubsystemId> {
        self.0
            .try_borrow()
            .map(|c| c.requirements())
            .unwrap_or_default()
    }

    pub fn runs_when_disabled(&self) -> bool {
        self.0
            .try_borrow()
            .map(|c| c.runs_when_disabled())
            .unwrap_or(false)
    }

    pub fn interruption_behavior(&self) -> InterruptionBehavior {
        self.0
            .try_borrow()
            .map(|c| c.interruption_behavior())
            .unwrap_or(InterruptionBehavior::CancelSelf)
    }

    /// Run `f` on the command, failing if the command is already borrowed (a command trying to
    /// run itself).
    pub(crate) fn with<T, F: FnOnce(&mut dyn Command) -> Result<T, CommandError>>(
        &self,
        f: F,
    ) -> Result<T, CommandError> {
        let mut cmd = self
            .0
            .try_borrow_mut()
            .map_err(|_| CommandError::Failed(String::from("command is already running")))?;
        f(&mut *cmd)
    }
}

impl PartialEq for CommandHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CommandHandle {}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandHandle({})", self.name())
    }
}

impl Command for Box<dyn Command> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn requirements(&self) -> BTreeSet<SubsystemId> {
        (**self).requirements()
    }

    fn initialize(&mut self) -> CommandResult {
        (**self).initialize()
    }

    fn execute(&mut self) -> CommandResult {
        (**self).execute()
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        (**self).is_finished()
    }

    fn end(&mut self, interrupted: bool) -> CommandResult {
        (**self).end(interrupted)
    }

    fn runs_when_disabled(&self) -> bool {
        (**self).runs_when_disabled()
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        (**self).interruption_behavior()
    }
}

impl<C: Command> Wrapped<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            name: None,
            runs_when_disabled: None,
            interrupt_behavior: None,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn allow_disabled(mut self, value: bool) -> Self {
        self.runs_when_disabled = Some(value);
        self
    }

    pub fn interrupt_behavior(mut self, behavior: InterruptionBehavior) -> Self {
        self.interrupt_behavior = Some(behavior);
        self
    }
}

impl<C: Command> Command for Wrapped<C> {
    fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.inner.name())
    }

    fn requirements(&self) -> BTreeSet<SubsystemId> {
        self.inner.requirements()
    }

    fn initialize(&mut self) -> CommandResult {
        self.inner.initialize()
    }

    fn execute(&mut self) -> CommandResult {
        self.inner.execute()
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        self.inner.is_finished()
    }

    fn end(&mut self, interrupted: bool) -> CommandResult {
        self.inner.end(interrupted)
    }

    fn runs_when_disabled(&self) -> bool {
        self.runs_when_disabled
            .unwrap_or_else(|| self.inner.runs_when_disabled())
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        self.interrupt_behavior
            .unwrap_or_else(|| self.inner.interruption_behavior())
    }
}
