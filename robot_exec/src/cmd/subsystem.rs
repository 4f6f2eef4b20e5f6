//! # Subsystems
//!
//! A subsystem is a named piece of the robot with a periodic hook. It is also the unit of mutual
//! exclusion: a command lists the [`SubsystemId`]s it needs and the scheduler never runs two
//! commands needing the same one.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    cell::RefCell,
    collections::BTreeSet,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use super::{CommandResult, InstantCommand, RunCommand, StartEndCommand};

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

static NEXT_SUBSYSTEM_ID: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Requirement token of a subsystem, unique for the life of the process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubsystemId(usize);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait Subsystem {
    fn name(&self) -> &str;

    fn id(&self) -> SubsystemId;

    /// Called once per main tick, after every command has executed.
    fn periodic(&mut self) {}
}

/// Command factories bound to a shared subsystem. The produced commands require the subsystem.
pub trait SubsystemExt<S> {
    /// A command running `f` once.
    fn run_once<F>(&self, name: &str, f: F) -> InstantCommand
    where
        F: FnMut(&mut S) -> CommandResult + 'static;

    /// A command running `f` every tick until interrupted.
    fn run<F>(&self, name: &str, f: F) -> RunCommand
    where
        F: FnMut(&mut S) -> CommandResult + 'static;

    /// A command running `start` when scheduled and `end` when interrupted.
    fn start_end<F, G>(&self, name: &str, start: F, end: G) -> StartEndCommand
    where
        F: FnMut(&mut S) -> CommandResult + 'static,
        G: FnMut(&mut S) -> CommandResult + 'static;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SubsystemId {
    pub fn next() -> Self {
        SubsystemId(NEXT_SUBSYSTEM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl<S: Subsystem + 'static> SubsystemExt<S> for Rc<RefCell<S>> {
    fn run_once<F>(&self, name: &str, mut f: F) -> InstantCommand
    where
        F: FnMut(&mut S) -> CommandResult + 'static,
    {
        let s = self.clone();
        InstantCommand::new(name, move || f(&mut s.borrow_mut())).requiring(requirement_of(self))
    }

    fn run<F>(&self, name: &str, mut f: F) -> RunCommand
    where
        F: FnMut(&mut S) -> CommandResult + 'static,
    {
        let s = self.clone();
        RunCommand::new(name, move || f(&mut s.borrow_mut())).requiring(requirement_of(self))
    }

    fn start_end<F, G>(&self, name: &str, mut start: F, mut end: G) -> StartEndCommand
    where
        F: FnMut(&mut S) -> CommandResult + 'static,
        G: FnMut(&mut S) -> CommandResult + 'static,
    {
        let s_start = self.clone();
        let s_end = self.clone();
        StartEndCommand::new(
            name,
            move || start(&mut s_start.borrow_mut()),
            move || end(&mut s_end.borrow_mut()),
        )
        .requiring(requirement_of(self))
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn requirement_of<S: Subsystem>(s: &Rc<RefCell<S>>) -> BTreeSet<SubsystemId> {
    let mut reqs = BTreeSet::new();
    reqs.insert(s.borrow().id());
    reqs
}
