//! # Superstructure
//!
//! The inner and outer elevators moved together between named presets. Each elevator is its own
//! subsystem, superstructure commands require both.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod elevator;
mod profile;

pub use elevator::{Elevator, ElevatorFeedforward, ElevatorParams};
pub use profile::{ProfileConstraints, ProfileState, TrapezoidProfile};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use serde::Deserialize;
use std::{cell::Cell, cell::RefCell, rc::Rc};

use crate::{
    cmd::{
        CommandExt, CompositionError, InstantCommand, ParallelGroup, ParallelKind, RunCommand,
        Scheduler, SequentialGroup,
    },
    hal::Hardware,
    telemetry::{LogContext, Loggable},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SuperstructureParams {
    pub inner: ElevatorParams,
    pub outer: ElevatorParams,
    pub presets: SuperstructurePresets,
}

/// Positions of both elevators.
#[derive(Debug, Copy, Clone, Default, PartialEq, Deserialize)]
pub struct SuperstructureState {
    /// Units: meters
    pub inner_m: f64,

    /// Units: meters
    pub outer_m: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuperstructurePresets {
    pub l1: SuperstructureState,
    pub l2: SuperstructureState,
    pub l3: SuperstructureState,
    pub l4: SuperstructureState,
    pub home: SuperstructureState,
    pub coral_station: SuperstructureState,
}

pub struct Superstructure {
    inner: Rc<RefCell<Elevator>>,
    outer: Rc<RefCell<Elevator>>,
    presets: SuperstructurePresets,

    /// Preset most recently commanded
    target: Rc<Cell<Option<Preset>>>,

    tm: LogContext,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Preset {
    L1,
    L2,
    L3,
    L4,
    Home,
    CoralStation,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SuperstructurePresets {
    pub fn get(&self, preset: Preset) -> SuperstructureState {
        match preset {
            Preset::L1 => self.l1,
            Preset::L2 => self.l2,
            Preset::L3 => self.l3,
            Preset::L4 => self.l4,
            Preset::Home => self.home,
            Preset::CoralStation => self.coral_station,
        }
    }
}

impl Superstructure {
    pub fn new(hw: &Hardware, params: SuperstructureParams, period_s: f64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Elevator::new(hw, params.inner, period_s))),
            outer: Rc::new(RefCell::new(Elevator::new(hw, params.outer, period_s))),
            presets: params.presets,
            target: Rc::new(Cell::new(None)),
            tm: LogContext::new("Superstructure"),
        }
    }

    /// Register both elevators with the scheduler.
    pub fn register(&self, scheduler: &mut Scheduler) {
        scheduler.register_subsystem(&self.inner);
        scheduler.register_subsystem(&self.outer);
    }

    pub fn inner(&self) -> &Rc<RefCell<Elevator>> {
        &self.inner
    }

    pub fn outer(&self) -> &Rc<RefCell<Elevator>> {
        &self.outer
    }

    pub fn presets(&self) -> &SuperstructurePresets {
        &self.presets
    }

    pub fn target(&self) -> Option<Preset> {
        self.target.get()
    }

    /// Current position of both elevators, `None` if either can't be read.
    pub fn state(&self) -> Option<SuperstructureState> {
        let inner_m = self.inner.borrow().position_m().ok()?;
        let outer_m = self.outer.borrow().position_m().ok()?;
        Some(SuperstructureState { inner_m, outer_m })
    }

    pub fn is_at(&self, state: &SuperstructureState) -> bool {
        self.inner.borrow().is_at_position(state.inner_m)
            && self.outer.borrow().is_at_position(state.outer_m)
    }

    /// Move both elevators to `preset`, finishing when both are within tolerance.
    pub fn go_to_preset(&self, preset: Preset) -> Result<SequentialGroup, CompositionError> {
        let state = self.presets.get(preset);
        let target = self.target.clone();
        let mark = InstantCommand::new("MarkTarget", move || {
            info!("Superstructure going to {:?}", preset);
            target.set(Some(preset));
            Ok(())
        });

        let moves = elevator::move_to_position(&self.inner, state.inner_m)
            .along_with(elevator::move_to_position(&self.outer, state.outer_m))?;

        Ok(mark.and_then(moves))
    }

    /// Hold both elevators at `preset` until interrupted.
    pub fn hold_preset(&self, preset: Preset) -> Result<ParallelGroup, CompositionError> {
        let state = self.presets.get(preset);
        elevator::hold_at_position(&self.inner, state.inner_m)
            .along_with(elevator::hold_at_position(&self.outer, state.outer_m))
    }

    /// Go to `preset` then hold it, the usual operator binding.
    pub fn go_to_and_hold(&self, preset: Preset) -> Result<SequentialGroup, CompositionError> {
        Ok(self.go_to_preset(preset)?.then(self.hold_preset(preset)?))
    }

    /// Home both elevators at once.
    pub fn home(&self) -> Result<ParallelGroup, CompositionError> {
        ParallelGroup::new(
            ParallelKind::All,
            vec![
                elevator::homing(&self.inner).boxed(),
                elevator::homing(&self.outer).boxed(),
            ],
        )
    }

    /// Drive the outer elevator open loop from an operator axis.
    pub fn manual<F>(&self, speed: F) -> RunCommand
    where
        F: FnMut() -> f64 + 'static,
    {
        elevator::manual_control(&self.outer, speed)
    }

    /// Publish the combined state, called once per tick by the container.
    pub fn log_state(&self) {
        self.log(&self.tm);
    }
}

impl Loggable for Superstructure {
    fn log(&self, ctx: &LogContext) {
        if let Some(s) = self.state() {
            ctx.put("state", vec![s.inner_m, s.outer_m]);
        }
        let target = match self.target.get() {
            Some(p) => format!("{:?}", p),
            None => String::from("None"),
        };
        ctx.put("target", target);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cmd::CommandHandle;
    use util::time::Clock;

    fn sim() -> (Superstructure, Scheduler, Clock) {
        let clock = Clock::manual();
        let hw = Hardware::sim(&clock);
        let s = Superstructure::new(&hw, elevator::test::test_params(), 0.02);
        let mut sched = Scheduler::new();
        sched.set_disabled(false);
        s.register(&mut sched);
        (s, sched, clock)
    }

    fn run_until_done(sched: &mut Scheduler, clock: &Clock, cmd: &CommandHandle) -> usize {
        let mut ticks = 0;
        while sched.is_scheduled(cmd) {
            clock.advance(0.02);
            sched.run();
            ticks += 1;
            assert!(ticks < 1000, "{} never finished", cmd.name());
        }
        ticks
    }

    #[test]
    fn test_shipped_presets() {
        let p = elevator::test::test_params().presets;
        assert_eq!(p.get(Preset::L1), SuperstructureState { inner_m: 0.0, outer_m: 0.10 });
        assert_eq!(p.get(Preset::L4), SuperstructureState { inner_m: 0.62, outer_m: 0.68 });
        assert_eq!(p.get(Preset::Home), SuperstructureState::default());
    }

    #[test]
    fn test_go_to_preset_moves_both() {
        let (s, mut sched, clock) = sim();

        let cmd = s.go_to_preset(Preset::L3).unwrap().into_handle();
        sched.schedule(&cmd).unwrap();
        run_until_done(&mut sched, &clock, &cmd);

        assert_eq!(s.target(), Some(Preset::L3));
        assert!(s.is_at(&s.presets().get(Preset::L3)));
    }

    #[test]
    fn test_hold_keeps_position() {
        let (s, mut sched, clock) = sim();

        let cmd = s.go_to_and_hold(Preset::L2).unwrap().into_handle();
        sched.schedule(&cmd).unwrap();
        for _ in 0..200 {
            clock.advance(0.02);
            sched.run();
        }

        // Still holding, never finishes on its own
        assert!(sched.is_scheduled(&cmd));
        assert!(s.is_at(&s.presets().get(Preset::L2)));

        sched.cancel(&cmd);
        assert!(!sched.is_scheduled(&cmd));
    }

    #[test]
    fn test_home_both() {
        let (s, mut sched, clock) = sim();
        s.inner().borrow().motor().set_position(0.1).unwrap();
        s.outer().borrow().motor().set_position(0.05).unwrap();

        let cmd = s.home().unwrap().into_handle();
        sched.schedule(&cmd).unwrap();
        run_until_done(&mut sched, &clock, &cmd);

        let state = s.state().unwrap();
        assert!(state.inner_m.abs() < 1e-9);
        assert!(state.outer_m.abs() < 1e-9);
    }

    #[test]
    fn test_manual_drives_outer() {
        let (s, mut sched, clock) = sim();
        let cmd = s.manual(|| 0.5).into_handle();
        sched.schedule(&cmd).unwrap();
        for _ in 0..10 {
            clock.advance(0.02);
            sched.run();
        }
        assert!(s.outer().borrow().position_m().unwrap() > 0.01);
        assert!(s.inner().borrow().position_m().unwrap().abs() < 1e-9);
    }
}
