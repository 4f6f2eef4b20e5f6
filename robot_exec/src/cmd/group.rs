// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeSet;

use super::{Command, CommandError, CommandResult, CompositionError, InterruptionBehavior, SubsystemId};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Runs its commands one after another.
///
/// Requires the union of its children's requirements for its whole run.
pub struct SequentialGroup {
    commands: Vec<Box<dyn Command>>,

    /// Index of the running child, `None` when the group isn't running
    current: Option<usize>,

    requirements: BTreeSet<SubsystemId>,
}

/// Runs its commands at the same time.
pub struct ParallelGroup {
    kind: ParallelKind,

    /// Children and whether each is still running
    commands: Vec<(Box<dyn Command>, bool)>,

    /// Set when a race or deadline condition is met
    done: bool,

    requirements: BTreeSet<SubsystemId>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// When a parallel group finishes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParallelKind {
    /// When every child has finished
    All,

    /// When any child finishes, the others are interrupted
    Race,

    /// When the first child finishes, the others are interrupted
    Deadline,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SequentialGroup {
    pub fn new(commands: Vec<Box<dyn Command>>) -> Self {
        let requirements = commands.iter().flat_map(|c| c.requirements()).collect();
        Self {
            commands,
            current: None,
            requirements,
        }
    }

    /// Append another command to the sequence.
    pub fn then<C: Command + 'static>(mut self, next: C) -> Self {
        self.requirements.extend(next.requirements());
        self.commands.push(Box::new(next));
        self
    }
}

impl Command for SequentialGroup {
    fn name(&self) -> String {
        let names: Vec<String> = self.commands.iter().map(|c| c.name()).collect();
        format!("Sequence({})", names.join(", "))
    }

    fn requirements(&self) -> BTreeSet<SubsystemId> {
        self.requirements.clone()
    }

    fn initialize(&mut self) -> CommandResult {
        self.current = Some(0);
        match self.commands.first_mut() {
            Some(c) => c.initialize(),
            None => Ok(()),
        }
    }

    fn execute(&mut self) -> CommandResult {
        let i = match self.current {
            Some(i) if i < self.commands.len() => i,
            _ => return Ok(()),
        };

        self.commands[i].execute()?;

        if self.commands[i].is_finished()? {
            // Advance first so a failing end isn't run a second time on interruption
            self.current = Some(i + 1);
            self.commands[i].end(false)?;

            if let Some(next) = self.commands.get_mut(i + 1) {
                next.initialize()?;
            }
        }

        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(match self.current {
            Some(i) => i >= self.commands.len(),
            None => false,
        })
    }

    fn end(&mut self, interrupted: bool) -> CommandResult {
        let current = self.current.take();
        if interrupted {
            if let Some(c) = current.and_then(|i| self.commands.get_mut(i)) {
                c.end(true)?;
            }
        }
        Ok(())
    }

    fn runs_when_disabled(&self) -> bool {
        self.commands.iter().all(|c| c.runs_when_disabled())
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        any_cancel_incoming(self.commands.iter().map(|c| c.interruption_behavior()))
    }
}

impl ParallelGroup {
    /// Build a parallel group. Children must not share requirements.
    ///
    /// For [`ParallelKind::Deadline`] the first command is the deadline.
    pub fn new(
        kind: ParallelKind,
        commands: Vec<Box<dyn Command>>,
    ) -> Result<Self, CompositionError> {
        if kind == ParallelKind::Deadline && commands.is_empty() {
            return Err(CompositionError::NoDeadline);
        }

        for (i, a) in commands.iter().enumerate() {
            let reqs_a = a.requirements();
            for b in commands.iter().skip(i + 1) {
                if !reqs_a.is_disjoint(&b.requirements()) {
                    return Err(CompositionError::OverlappingRequirements(a.name(), b.name()));
                }
            }
        }

        Ok(Self::new_unchecked(kind, commands))
    }

    /// Build a group whose children are known not to overlap.
    pub(super) fn new_unchecked(kind: ParallelKind, commands: Vec<Box<dyn Command>>) -> Self {
        let requirements = commands.iter().flat_map(|c| c.requirements()).collect();
        Self {
            kind,
            commands: commands.into_iter().map(|c| (c, false)).collect(),
            done: false,
            requirements,
        }
    }

    /// A group finishing when `deadline` finishes.
    pub fn deadline(
        deadline: Box<dyn Command>,
        others: Vec<Box<dyn Command>>,
    ) -> Result<Self, CompositionError> {
        let mut commands = vec![deadline];
        commands.extend(others);
        Self::new(ParallelKind::Deadline, commands)
    }
}

impl Command for ParallelGroup {
    fn name(&self) -> String {
        let names: Vec<String> = self.commands.iter().map(|(c, _)| c.name()).collect();
        format!("{:?}({})", self.kind, names.join(", "))
    }

    fn requirements(&self) -> BTreeSet<SubsystemId> {
        self.requirements.clone()
    }

    fn initialize(&mut self) -> CommandResult {
        self.done = false;
        for (c, running) in self.commands.iter_mut() {
            *running = true;
            c.initialize()?;
        }
        Ok(())
    }

    fn execute(&mut self) -> CommandResult {
        for (i, (c, running)) in self.commands.iter_mut().enumerate() {
            if !*running {
                continue;
            }

            c.execute()?;

            if c.is_finished()? {
                *running = false;
                c.end(false)?;

                match self.kind {
                    ParallelKind::All => (),
                    ParallelKind::Race => self.done = true,
                    ParallelKind::Deadline => self.done |= i == 0,
                }
            }
        }

        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(match self.kind {
            ParallelKind::All => self.commands.iter().all(|(_, running)| !running),
            _ => self.done,
        })
    }

    fn end(&mut self, _interrupted: bool) -> CommandResult {
        // Anything still running when the group ends was cut short
        let mut result = Ok(());
        for (c, running) in self.commands.iter_mut() {
            if *running {
                *running = false;
                if let Err(e) = c.end(true) {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn runs_when_disabled(&self) -> bool {
        self.commands.iter().all(|(c, _)| c.runs_when_disabled())
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        any_cancel_incoming(self.commands.iter().map(|(c, _)| c.interruption_behavior()))
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn any_cancel_incoming<I: Iterator<Item = InterruptionBehavior>>(mut iter: I) -> InterruptionBehavior {
    if iter.any(|b| b == InterruptionBehavior::CancelIncoming) {
        InterruptionBehavior::CancelIncoming
    } else {
        InterruptionBehavior::CancelSelf
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cmd::{CommandExt, InstantCommand, RunCommand, WaitCommand};
    use std::{cell::RefCell, rc::Rc};
    use util::time::Clock;

    type Log = Rc<RefCell<Vec<String>>>;

    fn logged(log: &Log, name: &'static str, finish_after: usize) -> Box<dyn Command> {
        struct Logged {
            log: Log,
            name: &'static str,
            count: usize,
            finish_after: usize,
        }

        impl Command for Logged {
            fn name(&self) -> String {
                self.name.to_string()
            }
            fn initialize(&mut self) -> CommandResult {
                self.count = 0;
                self.log.borrow_mut().push(format!("{}.init", self.name));
                Ok(())
            }
            fn execute(&mut self) -> CommandResult {
                self.count += 1;
                self.log.borrow_mut().push(format!("{}.exec", self.name));
                Ok(())
            }
            fn is_finished(&mut self) -> Result<bool, CommandError> {
                Ok(self.count >= self.finish_after)
            }
            fn end(&mut self, interrupted: bool) -> CommandResult {
                self.log
                    .borrow_mut()
                    .push(format!("{}.end({})", self.name, interrupted));
                Ok(())
            }
        }

        Box::new(Logged {
            log: log.clone(),
            name,
            count: 0,
            finish_after,
        })
    }

    #[test]
    fn test_sequence_runs_in_order() {
        let log = Log::default();
        let mut seq = SequentialGroup::new(vec![logged(&log, "a", 1), logged(&log, "b", 2)]);

        seq.initialize().unwrap();
        seq.execute().unwrap();
        assert!(!seq.is_finished().unwrap());
        seq.execute().unwrap();
        seq.execute().unwrap();
        assert!(seq.is_finished().unwrap());
        seq.end(false).unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["a.init", "a.exec", "a.end(false)", "b.init", "b.exec", "b.exec", "b.end(false)"]
        );
    }

    #[test]
    fn test_sequence_interrupt_ends_active_child() {
        let log = Log::default();
        let mut seq = SequentialGroup::new(vec![logged(&log, "a", 5), logged(&log, "b", 1)]);
        seq.initialize().unwrap();
        seq.execute().unwrap();
        seq.end(true).unwrap();
        assert_eq!(log.borrow().last().unwrap(), "a.end(true)");
        assert!(!log.borrow().iter().any(|l| l.starts_with("b.")));
    }

    #[test]
    fn test_race_interrupts_losers() {
        let log = Log::default();
        let mut race =
            ParallelGroup::new(ParallelKind::Race, vec![logged(&log, "a", 1), logged(&log, "b", 3)])
                .unwrap();

        race.initialize().unwrap();
        race.execute().unwrap();
        assert!(race.is_finished().unwrap());
        race.end(false).unwrap();

        let log = log.borrow();
        assert!(log.contains(&"a.end(false)".to_string()));
        assert!(log.contains(&"b.end(true)".to_string()));
    }

    #[test]
    fn test_deadline_and_all() {
        let log = Log::default();
        let mut deadline =
            ParallelGroup::deadline(logged(&log, "d", 2), vec![logged(&log, "o", 1)]).unwrap();
        deadline.initialize().unwrap();
        deadline.execute().unwrap();
        assert!(!deadline.is_finished().unwrap());
        deadline.execute().unwrap();
        assert!(deadline.is_finished().unwrap());

        let mut all =
            ParallelGroup::new(ParallelKind::All, vec![logged(&log, "x", 1), logged(&log, "y", 2)])
                .unwrap();
        all.initialize().unwrap();
        all.execute().unwrap();
        assert!(!all.is_finished().unwrap());
        all.execute().unwrap();
        assert!(all.is_finished().unwrap());
    }

    #[test]
    fn test_overlapping_requirements_rejected() {
        let id = SubsystemId::next();
        let a = RunCommand::new("a", || Ok(())).requiring(vec![id]);
        let b = InstantCommand::new("b", || Ok(())).requiring(vec![id]);

        assert!(matches!(
            a.along_with(b),
            Err(CompositionError::OverlappingRequirements(_, _))
        ));
    }

    #[test]
    fn test_timeout_decorator() {
        let clock = Clock::manual();
        let mut cmd = RunCommand::new("forever", || Ok(())).with_timeout(&clock, 1.0);
        cmd.initialize().unwrap();
        cmd.execute().unwrap();
        assert!(!cmd.is_finished().unwrap());
        clock.advance(1.0);
        cmd.execute().unwrap();
        assert!(cmd.is_finished().unwrap());

        let mut seq = WaitCommand::new(&clock, 0.5).and_then(InstantCommand::new("x", || Ok(())));
        seq.initialize().unwrap();
        clock.advance(0.5);
        seq.execute().unwrap();
        seq.execute().unwrap();
        assert!(seq.is_finished().unwrap());
    }
}
