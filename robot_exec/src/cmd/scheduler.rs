//! # Scheduler
//!
//! Runs commands once per main tick and arbitrates subsystem use. Per tick, [`Scheduler::run`]:
//!
//! 1. Polls every trigger binding, scheduling or cancelling commands on edges.
//! 2. Executes each running command in the order it was scheduled, ending those which finish.
//! 3. Schedules the default command of every subsystem nobody is using (and executes it).
//! 4. Runs every subsystem's `periodic`.
//!
//! Command bodies which fail or panic are force-ended and removed, the tick carries on.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, error, warn};
use std::{
    cell::RefCell,
    collections::BTreeMap,
    panic::{catch_unwind, AssertUnwindSafe},
    rc::Rc,
};
use thiserror::Error;

use super::{
    Command, CommandError, CommandHandle, InterruptionBehavior, Subsystem, SubsystemId, Trigger,
};
use crate::telemetry::LogContext;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Scheduler {
    subsystems: Vec<RegisteredSubsystem>,

    /// Running commands in the order they were scheduled
    scheduled: Vec<CommandHandle>,

    /// Which running command holds each subsystem
    holders: BTreeMap<SubsystemId, CommandHandle>,

    bindings: Vec<Binding>,

    disabled: bool,

    tm: LogContext,
}

struct RegisteredSubsystem {
    id: SubsystemId,
    name: String,
    subsystem: Rc<RefCell<dyn Subsystem>>,
    default_command: Option<CommandHandle>,
}

struct Binding {
    trigger: Trigger,
    kind: BindingKind,
    command: CommandHandle,
    last: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How a trigger drives its command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BindingKind {
    /// Schedule on the rising edge
    OnTrue,

    /// Schedule on the falling edge
    OnFalse,

    /// Schedule on the rising edge, cancel on the falling edge
    WhileTrue,

    /// Schedule on the falling edge, cancel on the rising edge
    WhileFalse,

    /// Toggle the command on each rising edge
    ToggleOnTrue,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Cannot schedule {incoming}, {holder} holds a requirement and cannot be interrupted")]
    RequirementHeld { incoming: String, holder: String },

    #[error("{0} failed to initialize: {1}")]
    InitFailed(String, CommandError),

    #[error("Default command {command} must require subsystem {subsystem}")]
    DefaultMissingRequirement { command: String, subsystem: String },

    #[error("Subsystem {0} is not registered")]
    UnknownSubsystem(String),
}

/// Lifecycle step of a command.
#[derive(Debug, Copy, Clone)]
enum Step {
    Initialize,
    Execute,
    IsFinished,
    End(bool),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Scheduler {
    pub fn new() -> Self {
        Self::with_context(LogContext::new("Scheduler"))
    }

    pub fn with_context(tm: LogContext) -> Self {
        Self {
            subsystems: Vec::new(),
            scheduled: Vec::new(),
            holders: BTreeMap::new(),
            bindings: Vec::new(),
            disabled: true,
            tm,
        }
    }

    /// Register a subsystem so its `periodic` runs and it can have a default command.
    pub fn register_subsystem<S: Subsystem + 'static>(&mut self, subsystem: &Rc<RefCell<S>>) {
        let (id, name) = {
            let s = subsystem.borrow();
            (s.id(), s.name().to_string())
        };

        if self.subsystems.iter().any(|s| s.id == id) {
            warn!("Subsystem {} registered twice, ignoring", name);
            return;
        }

        let shared: Rc<RefCell<dyn Subsystem>> = subsystem.clone();
        self.subsystems.push(RegisteredSubsystem {
            id,
            name,
            subsystem: shared,
            default_command: None,
        });
    }

    /// Set the command which runs on `subsystem` whenever nothing else needs it.
    pub fn set_default_command(
        &mut self,
        subsystem: SubsystemId,
        command: CommandHandle,
    ) -> Result<(), SchedulerError> {
        let entry = self
            .subsystems
            .iter_mut()
            .find(|s| s.id == subsystem)
            .ok_or_else(|| SchedulerError::UnknownSubsystem(format!("{:?}", subsystem)))?;

        if !command.requirements().contains(&subsystem) {
            return Err(SchedulerError::DefaultMissingRequirement {
                command: command.name(),
                subsystem: entry.name.clone(),
            });
        }

        entry.default_command = Some(command);
        Ok(())
    }

    /// Bind a command to a trigger. The trigger's current value is taken as its last value, so a
    /// binding made while a button is held does not fire until the next edge.
    pub fn bind(&mut self, trigger: Trigger, kind: BindingKind, command: CommandHandle) {
        let last = trigger.get();
        self.bindings.push(Binding {
            trigger,
            kind,
            command,
            last,
        });
    }

    pub fn on_true(&mut self, trigger: Trigger, command: CommandHandle) {
        self.bind(trigger, BindingKind::OnTrue, command)
    }

    pub fn while_true(&mut self, trigger: Trigger, command: CommandHandle) {
        self.bind(trigger, BindingKind::WhileTrue, command)
    }

    /// Inhibit `execute` of commands which don't run when disabled.
    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn is_scheduled(&self, command: &CommandHandle) -> bool {
        self.scheduled.contains(command)
    }

    /// The command currently holding `subsystem`, if any.
    pub fn requiring(&self, subsystem: SubsystemId) -> Option<CommandHandle> {
        self.holders.get(&subsystem).cloned()
    }

    /// Names of the running commands, in scheduling order.
    pub fn running_names(&self) -> Vec<String> {
        self.scheduled.iter().map(|c| c.name()).collect()
    }

    /// Schedule a command, interrupting any interruptible commands holding its requirements.
    ///
    /// `initialize` runs immediately. Scheduling a command which is already running does nothing.
    pub fn schedule(&mut self, command: &CommandHandle) -> Result<(), SchedulerError> {
        if self.is_scheduled(command) {
            return Ok(());
        }

        let requirements = command.requirements();

        let mut conflicts: Vec<CommandHandle> = Vec::new();
        for r in requirements.iter() {
            if let Some(holder) = self.holders.get(r) {
                if !conflicts.contains(holder) {
                    conflicts.push(holder.clone());
                }
            }
        }

        for holder in conflicts.iter() {
            if holder.interruption_behavior() == InterruptionBehavior::CancelIncoming
                && !self.is_default_command(holder)
            {
                return Err(SchedulerError::RequirementHeld {
                    incoming: command.name(),
                    holder: holder.name(),
                });
            }
        }

        for holder in conflicts.iter() {
            self.cancel(holder);
        }

        debug!("Scheduling {}", command.name());

        if let Err(e) = invoke(command, Step::Initialize) {
            error!("{} failed to initialize: {}", command.name(), e);
            if let Err(e) = invoke(command, Step::End(true)) {
                error!("{} failed to end: {}", command.name(), e);
            }
            return Err(SchedulerError::InitFailed(command.name(), e));
        }

        for r in requirements {
            self.holders.insert(r, command.clone());
        }
        self.scheduled.push(command.clone());

        Ok(())
    }

    /// Cancel a running command. Does nothing if it isn't running.
    ///
    /// A command which finished in its own step this tick has already ended and left the
    /// running set, so cancelling it is a no-op and it keeps its `end(false)`.
    pub fn cancel(&mut self, command: &CommandHandle) {
        if !self.is_scheduled(command) {
            return;
        }

        self.remove(command);

        debug!("Cancelling {}", command.name());

        if let Err(e) = invoke(command, Step::End(true)) {
            error!("{} failed to end: {}", command.name(), e);
        }
    }

    /// Cancel every running command, in scheduling order.
    pub fn cancel_all(&mut self) {
        for c in self.scheduled.clone() {
            self.cancel(&c);
        }
    }

    /// Run one tick.
    pub fn run(&mut self) {
        self.poll_bindings();

        for c in self.scheduled.clone() {
            // A command ended by an earlier one this tick is skipped
            if self.is_scheduled(&c) {
                self.step(&c);
            }
        }

        for c in self.schedule_defaults() {
            if self.is_scheduled(&c) {
                self.step(&c);
            }
        }

        for s in self.subsystems.iter() {
            let subsystem = s.subsystem.clone();
            let result = catch_unwind(AssertUnwindSafe(|| match subsystem.try_borrow_mut() {
                Ok(mut s) => s.periodic(),
                Err(_) => warn!("Subsystem is busy, periodic skipped"),
            }));
            if result.is_err() {
                error!("Subsystem {} panicked in periodic", s.name);
            }
        }

        self.tm.put("running", self.running_names());
    }

    /// Execute a command and end it if finished.
    fn step(&mut self, command: &CommandHandle) {
        if self.disabled && !command.runs_when_disabled() {
            return;
        }

        let result =
            invoke(command, Step::Execute).and_then(|_| invoke(command, Step::IsFinished));

        match result {
            Ok(false) => (),
            Ok(true) => {
                self.remove(command);
                if let Err(e) = invoke(command, Step::End(false)) {
                    error!("{} failed to end: {}", command.name(), e);
                }
            }
            Err(e) => {
                error!("{} failed, force ending: {}", command.name(), e);
                self.remove(command);
                if let Err(e) = invoke(command, Step::End(true)) {
                    error!("{} failed to end: {}", command.name(), e);
                }
            }
        }
    }

    fn poll_bindings(&mut self) {
        let mut actions: Vec<(CommandHandle, bool)> = Vec::new();

        for b in self.bindings.iter_mut() {
            let now = b.trigger.get();
            let rising = now && !b.last;
            let falling = !now && b.last;
            b.last = now;

            let action = match b.kind {
                BindingKind::OnTrue if rising => Some(true),
                BindingKind::OnFalse if falling => Some(true),
                BindingKind::WhileTrue if rising => Some(true),
                BindingKind::WhileTrue if falling => Some(false),
                BindingKind::WhileFalse if falling => Some(true),
                BindingKind::WhileFalse if rising => Some(false),
                BindingKind::ToggleOnTrue if rising => Some(!self.scheduled.contains(&b.command)),
                _ => None,
            };

            if let Some(schedule) = action {
                actions.push((b.command.clone(), schedule));
            }
        }

        for (command, schedule) in actions {
            if schedule {
                if let Err(e) = self.schedule(&command) {
                    warn!("Binding could not schedule {}: {}", command.name(), e);
                }
            } else {
                self.cancel(&command);
            }
        }
    }

    /// Schedule the default command of every free subsystem, returning those scheduled.
    fn schedule_defaults(&mut self) -> Vec<CommandHandle> {
        let free: Vec<CommandHandle> = self
            .subsystems
            .iter()
            .filter(|s| !self.holders.contains_key(&s.id))
            .filter_map(|s| s.default_command.clone())
            .collect();

        let mut started = Vec::new();
        for c in free {
            match self.schedule(&c) {
                Ok(()) => started.push(c),
                Err(e) => warn!("Could not schedule default command: {}", e),
            }
        }
        started
    }

    fn remove(&mut self, command: &CommandHandle) {
        self.scheduled.retain(|c| c != command);
        self.holders.retain(|_, c| c != command);
    }

    fn is_default_command(&self, command: &CommandHandle) -> bool {
        self.subsystems
            .iter()
            .any(|s| s.default_command.as_ref() == Some(command))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run one lifecycle step, turning panics into errors.
///
/// Returns the result of `is_finished` for [`Step::IsFinished`], false for the other steps.
fn invoke(command: &CommandHandle, step: Step) -> Result<bool, CommandError> {
    let result = catch_unwind(AssertUnwindSafe(|| {
        command.with(|c: &mut dyn Command| match step {
            Step::Initialize => c.initialize().map(|_| false),
            Step::Execute => c.execute().map(|_| false),
            Step::IsFinished => c.is_finished(),
            Step::End(interrupted) => c.end(interrupted).map(|_| false),
        })
    }));

    match result {
        Ok(r) => r,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| String::from("unknown panic"));
            Err(CommandError::Panicked(msg))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cmd::{CommandExt, CommandResult, InstantCommand, StartEndCommand};
    use std::{
        cell::Cell,
        collections::BTreeSet,
    };

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        id: SubsystemId,
        name: &'static str,
        log: Log,
    }

    impl Subsystem for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn id(&self) -> SubsystemId {
            self.id
        }

        fn periodic(&mut self) {
            self.log.borrow_mut().push(format!("{}.periodic", self.name));
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Fault {
        None,
        ExecuteError,
        ExecutePanic,
    }

    struct Rec {
        name: &'static str,
        log: Log,
        reqs: BTreeSet<SubsystemId>,
        finished: Rc<Cell<bool>>,
        fault: Fault,
        behavior: InterruptionBehavior,
    }

    impl Rec {
        fn new(name: &'static str, log: &Log, reqs: &[SubsystemId]) -> Self {
            Self {
                name,
                log: log.clone(),
                reqs: reqs.iter().copied().collect(),
                finished: Rc::new(Cell::new(false)),
                fault: Fault::None,
                behavior: InterruptionBehavior::CancelSelf,
            }
        }

        fn push(&self, what: &str) {
            self.log.borrow_mut().push(format!("{}.{}", self.name, what));
        }
    }

    impl Command for Rec {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn requirements(&self) -> BTreeSet<SubsystemId> {
            self.reqs.clone()
        }

        fn initialize(&mut self) -> CommandResult {
            self.push("initialize");
            Ok(())
        }

        fn execute(&mut self) -> CommandResult {
            self.push("execute");
            match self.fault {
                Fault::None => Ok(()),
                Fault::ExecuteError => Err(CommandError::Failed("broken".into())),
                Fault::ExecutePanic => panic!("exploded"),
            }
        }

        fn is_finished(&mut self) -> Result<bool, CommandError> {
            Ok(self.finished.get())
        }

        fn end(&mut self, interrupted: bool) -> CommandResult {
            self.push(&format!("end({})", interrupted));
            Ok(())
        }

        fn interruption_behavior(&self) -> InterruptionBehavior {
            self.behavior
        }
    }

    fn take(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.borrow_mut())
    }

    fn setup() -> (Scheduler, Log, Rc<RefCell<Recorder>>) {
        let log = Log::default();
        let s = Rc::new(RefCell::new(Recorder {
            id: SubsystemId::next(),
            name: "S",
            log: log.clone(),
        }));
        let mut sched = Scheduler::with_context(LogContext::new("test/scheduler"));
        sched.set_disabled(false);
        sched.register_subsystem(&s);
        (sched, log, s)
    }

    #[test]
    fn test_default_command_yields_and_returns() {
        let (mut sched, log, s) = setup();
        let id = s.borrow().id();

        let d = Rec::new("D", &log, &[id]).into_handle();
        let c = Rec::new("C", &log, &[id]).into_handle();
        sched.set_default_command(id, d.clone()).unwrap();

        sched.schedule(&c).unwrap();
        sched.run();
        assert_eq!(take(&log), vec!["C.initialize", "C.execute", "S.periodic"]);
        assert_eq!(sched.requiring(id), Some(c.clone()));

        sched.cancel(&c);
        assert_eq!(take(&log), vec!["C.end(true)"]);

        sched.run();
        assert_eq!(take(&log), vec!["D.initialize", "D.execute", "S.periodic"]);
        assert_eq!(sched.requiring(id), Some(d.clone()));

        // A new command interrupts the default
        sched.schedule(&c).unwrap();
        assert_eq!(take(&log), vec!["D.end(true)", "C.initialize"]);
    }

    #[test]
    fn test_default_must_require_subsystem() {
        let (mut sched, log, s) = setup();
        let id = s.borrow().id();
        let d = Rec::new("D", &log, &[]).into_handle();
        assert!(matches!(
            sched.set_default_command(id, d),
            Err(SchedulerError::DefaultMissingRequirement { .. })
        ));
    }

    #[test]
    fn test_end_runs_once_and_finish_wins() {
        let (mut sched, log, s) = setup();
        let id = s.borrow().id();

        let rec = Rec::new("A", &log, &[id]);
        let finished = rec.finished.clone();
        let a = rec.into_handle();

        // Finished in its own step, then cancelled in the same tick
        sched.schedule(&a).unwrap();
        finished.set(true);
        sched.run();
        sched.cancel(&a);
        sched.cancel(&a);
        assert_eq!(
            take(&log),
            vec!["A.initialize", "A.execute", "A.end(false)", "S.periodic"]
        );

        // Finishing by itself
        finished.set(false);
        sched.schedule(&a).unwrap();
        sched.run();
        finished.set(true);
        sched.run();
        sched.run();
        assert_eq!(
            take(&log),
            vec![
                "A.initialize",
                "A.execute",
                "S.periodic",
                "A.execute",
                "A.end(false)",
                "S.periodic",
                "S.periodic"
            ]
        );
        assert!(!sched.is_scheduled(&a));
    }

    #[test]
    fn test_cancel_before_execute_is_interrupted() {
        let (mut sched, log, s) = setup();
        let id = s.borrow().id();
        sched.set_disabled(true);

        // Would report finished, but never stepped while disabled
        let rec = Rec::new("A", &log, &[id]);
        rec.finished.set(true);
        let a = rec.into_handle();

        sched.schedule(&a).unwrap();
        sched.run();
        sched.cancel_all();
        assert_eq!(
            take(&log),
            vec!["A.initialize", "S.periodic", "A.end(true)"]
        );
        assert!(!sched.is_scheduled(&a));
    }

    #[test]
    fn test_cancel_incoming_refuses() {
        let (mut sched, log, s) = setup();
        let id = s.borrow().id();

        let mut rec = Rec::new("Hold", &log, &[id]);
        rec.behavior = InterruptionBehavior::CancelIncoming;
        let hold = rec.into_handle();
        let other = Rec::new("Other", &log, &[id]).into_handle();

        sched.schedule(&hold).unwrap();
        assert!(matches!(
            sched.schedule(&other),
            Err(SchedulerError::RequirementHeld { .. })
        ));
        assert!(sched.is_scheduled(&hold));
        assert!(!sched.is_scheduled(&other));
    }

    #[test]
    fn test_failing_commands_are_force_ended() {
        let (mut sched, log, s) = setup();
        let id = s.borrow().id();

        let mut bad = Rec::new("Bad", &log, &[id]);
        bad.fault = Fault::ExecuteError;
        let bad = bad.into_handle();

        let mut boom = Rec::new("Boom", &log, &[]);
        boom.fault = Fault::ExecutePanic;
        let boom = boom.into_handle();

        sched.schedule(&bad).unwrap();
        sched.schedule(&boom).unwrap();
        sched.run();

        let l = take(&log);
        assert!(l.contains(&"Bad.end(true)".to_string()));
        assert!(l.contains(&"Boom.end(true)".to_string()));
        assert_eq!(l.last().unwrap(), "S.periodic");
        assert!(sched.running_names().is_empty());
        assert!(sched.requiring(id).is_none());
    }

    #[test]
    fn test_disabled_skips_execute() {
        let (mut sched, log, s) = setup();
        let id = s.borrow().id();
        sched.set_disabled(true);

        let a = Rec::new("A", &log, &[id]).into_handle();
        let b = Rec::new("B", &log, &[]).ignoring_disable(true).into_handle();
        sched.schedule(&a).unwrap();
        sched.schedule(&b).unwrap();
        sched.run();
        assert_eq!(
            take(&log),
            vec!["A.initialize", "B.initialize", "B.execute", "S.periodic"]
        );

        sched.cancel(&a);
        assert_eq!(take(&log), vec!["A.end(true)"]);
    }

    #[test]
    fn test_bindings() {
        let (mut sched, log, s) = setup();
        let id = s.borrow().id();
        let button = Rc::new(Cell::new(false));
        let trigger = {
            let b = button.clone();
            Trigger::new(move || b.get())
        };

        let held = Rec::new("Held", &log, &[id]).into_handle();
        sched.while_true(trigger.clone(), held.clone());

        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let pressed = InstantCommand::new("Pressed", move || {
            c.set(c.get() + 1);
            Ok(())
        })
        .into_handle();
        sched.on_true(trigger.clone(), pressed);

        let toggled = Rec::new("Toggled", &log, &[]).into_handle();
        sched.bind(trigger, BindingKind::ToggleOnTrue, toggled.clone());

        sched.run();
        assert!(!sched.is_scheduled(&held));

        button.set(true);
        sched.run();
        assert!(sched.is_scheduled(&held));
        assert!(sched.is_scheduled(&toggled));
        assert_eq!(count.get(), 1);

        // Level held, no new edges
        sched.run();
        assert_eq!(count.get(), 1);

        button.set(false);
        sched.run();
        assert!(!sched.is_scheduled(&held));
        assert!(sched.is_scheduled(&toggled));

        button.set(true);
        sched.run();
        assert!(!sched.is_scheduled(&toggled));
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_start_end_models_while_held() {
        let (mut sched, _log, s) = setup();
        let id = s.borrow().id();
        let on = Rc::new(Cell::new(false));
        let (a, b) = (on.clone(), on.clone());
        let cmd = StartEndCommand::new(
            "hold",
            move || {
                a.set(true);
                Ok(())
            },
            move || {
                b.set(false);
                Ok(())
            },
        )
        .requiring(vec![id])
        .into_handle();

        sched.schedule(&cmd).unwrap();
        sched.run();
        assert!(on.get());
        sched.cancel_all();
        assert!(!on.get());
        assert!(!sched.is_scheduled(&cmd));
    }
}
