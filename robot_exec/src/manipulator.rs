//! # Manipulator
//!
//! A single roller with a beam break across the mouth. The roller is run by a state machine which
//! seats a game piece against the beam break: a piece which goes in too far is purged back out a
//! little and reintaken slowly until it breaks the beam again.
//!
//! The state machine advances in `periodic`, the motor output always follows the state reached in
//! that tick.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use serde::Deserialize;
use std::{cell::RefCell, rc::Rc};
use util::time::Timer;

use crate::{
    cmd::{FunctionalCommand, Subsystem, SubsystemId},
    hal::{ControlRequest, Debouncer, DigitalInput, HalError, Hardware, Motor, MotorConfig},
    telemetry::{LogContext, Loggable},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ManipulatorParams {
    /// Roller duty cycles
    pub intake_speed: f64,
    pub outtake_speed: f64,
    pub slow_outtake_speed: f64,
    pub purge_speed: f64,
    pub reintake_speed: f64,

    /// Units: seconds
    pub brute_outtake_time_s: f64,

    /// Give up reintaking after this long without seeing the piece.
    ///
    /// Units: seconds
    pub reintake_timeout_s: f64,

    /// Units: seconds
    pub sensor_debounce_s: f64,

    pub motor: MotorConfig,
}

pub struct Manipulator {
    id: SubsystemId,
    params: ManipulatorParams,

    motor: Motor,
    sensor: DigitalInput,
    debouncer: Debouncer,

    /// Debounced beam break, true when a piece is across it
    piece_in_sensor: bool,
    sensor_fault: bool,

    /// Ticks where the roller output could not be applied
    num_output_faults: u64,
    output_fault: bool,

    state: ManipulatorState,
    can_intake: bool,
    timer: Timer,

    tm: LogContext,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ManipulatorState {
    /// Empty, intaking whenever allowed
    Hungry,

    /// Piece went past the beam, backing it out
    Purging,

    /// Piece backed out, pulling it in slowly
    Reintaking,

    /// Holding a piece
    Happy,

    Outtaking,
    SlowOuttaking,

    /// Outtake on a timer, ignoring the sensor
    BruteOuttaking,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Manipulator {
    pub fn new(hw: &Hardware, params: ManipulatorParams) -> Self {
        let clock = hw.clock();
        Self {
            id: SubsystemId::next(),
            motor: hw.motor("Manipulator/motor", params.motor.clone()),
            // Active low, the beam is unbroken at rest
            sensor: hw.digital_input("Manipulator/beam_break", true),
            debouncer: Debouncer::new(params.sensor_debounce_s, clock, false),
            piece_in_sensor: false,
            sensor_fault: false,
            num_output_faults: 0,
            output_fault: false,
            state: ManipulatorState::Hungry,
            can_intake: false,
            timer: Timer::started(clock),
            params,
            tm: LogContext::new("Manipulator"),
        }
    }

    pub fn with_context(mut self, tm: LogContext) -> Self {
        self.tm = tm;
        self
    }

    pub fn state(&self) -> ManipulatorState {
        self.state
    }

    /// Force the state, entering a brute outtake restarts its timer.
    pub fn set_state(&mut self, state: ManipulatorState) {
        if state == ManipulatorState::BruteOuttaking {
            self.timer.restart();
        }
        if state != self.state {
            debug!("Manipulator {:?} -> {:?}", self.state, state);
        }
        self.state = state;
    }

    pub fn set_can_intake(&mut self, can_intake: bool) {
        self.can_intake = can_intake;
    }

    pub fn can_intake(&self) -> bool {
        self.can_intake
    }

    /// Whether a piece is seated.
    pub fn has_piece(&self) -> bool {
        self.state == ManipulatorState::Happy
    }

    /// Whether the beam is broken, debounced.
    pub fn has_piece_in_sensor(&self) -> bool {
        self.piece_in_sensor
    }

    pub fn num_output_faults(&self) -> u64 {
        self.num_output_faults
    }

    pub fn motor(&self) -> &Motor {
        &self.motor
    }

    pub fn sensor(&self) -> &DigitalInput {
        &self.sensor
    }

    fn read_sensor(&mut self) {
        match self.sensor.get() {
            Ok(raw) => {
                self.sensor_fault = false;
                self.piece_in_sensor = self.debouncer.calculate(!raw);
            }
            Err(e) => {
                if !self.sensor_fault {
                    warn!("Manipulator beam break unreadable, holding last value: {}", e);
                    self.sensor_fault = true;
                }
            }
        }
    }

    fn next_state(&self) -> ManipulatorState {
        use ManipulatorState::*;

        let sensor = self.piece_in_sensor;
        match self.state {
            Hungry if sensor => Purging,
            Purging if !sensor => Reintaking,
            // Seeing the piece beats the timeout
            Reintaking if sensor => Happy,
            Reintaking if self.timer.has_elapsed(self.params.reintake_timeout_s) => Hungry,
            Outtaking | SlowOuttaking if !sensor => Hungry,
            BruteOuttaking if self.timer.has_elapsed(self.params.brute_outtake_time_s) => Hungry,
            s => s,
        }
    }

    fn output(&self) -> f64 {
        use ManipulatorState::*;

        match self.state {
            Hungry if self.can_intake => self.params.intake_speed,
            Hungry => 0.0,
            Purging => -self.params.purge_speed,
            Reintaking => self.params.reintake_speed,
            Happy => 0.0,
            Outtaking | BruteOuttaking => self.params.outtake_speed,
            SlowOuttaking => self.params.slow_outtake_speed,
        }
    }

    fn set(&self, output: f64) -> Result<(), HalError> {
        self.motor.set_control(ControlRequest::DutyCycle { output })
    }
}

impl Subsystem for Manipulator {
    fn name(&self) -> &str {
        "Manipulator"
    }

    fn id(&self) -> SubsystemId {
        self.id
    }

    fn periodic(&mut self) {
        self.read_sensor();

        let next = self.next_state();
        if next != self.state {
            if next == ManipulatorState::Reintaking {
                self.timer.restart();
            }
            debug!("Manipulator {:?} -> {:?}", self.state, next);
            self.state = next;
        }

        match self.set(self.output()) {
            Ok(()) => self.output_fault = false,
            Err(e) => {
                self.num_output_faults += 1;
                if !self.output_fault {
                    warn!("Manipulator roller output not applied: {}", e);
                    self.output_fault = true;
                }
            }
        }

        self.log(&self.tm);
    }
}

impl Loggable for Manipulator {
    fn log(&self, ctx: &LogContext) {
        ctx.put("state", format!("{:?}", self.state));
        ctx.put("has_piece", self.has_piece());
        ctx.put("piece_in_sensor", self.piece_in_sensor);
        ctx.put("can_intake", self.can_intake);
        ctx.put("output_faults", self.num_output_faults as i64);
        if let Ok(v) = self.motor.applied_voltage_v() {
            ctx.put("voltage", v);
        }
        if let Ok(i) = self.motor.stator_current_a() {
            ctx.put("current", i);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Allow intaking until a piece is seated.
pub fn intake(manipulator: &Rc<RefCell<Manipulator>>) -> FunctionalCommand {
    let (m_init, m_end, m_fin) = (manipulator.clone(), manipulator.clone(), manipulator.clone());
    FunctionalCommand::new(
        "Intake",
        move || {
            m_init.borrow_mut().set_can_intake(true);
            Ok(())
        },
        || Ok(()),
        move |_| {
            m_end.borrow_mut().set_can_intake(false);
            Ok(())
        },
        move || m_fin.borrow().has_piece(),
    )
    .requiring(Some(manipulator.borrow().id()))
}

/// Outtake until the beam clears.
pub fn outtake(manipulator: &Rc<RefCell<Manipulator>>) -> FunctionalCommand {
    outtake_in_state(manipulator, "Outtake", ManipulatorState::Outtaking)
}

/// Outtake slowly until the beam clears.
pub fn slow_outtake(manipulator: &Rc<RefCell<Manipulator>>) -> FunctionalCommand {
    outtake_in_state(manipulator, "SlowOuttake", ManipulatorState::SlowOuttaking)
}

/// Outtake for a fixed time whatever the sensor says, for a piece stuck off the beam.
pub fn brute_outtake(manipulator: &Rc<RefCell<Manipulator>>) -> FunctionalCommand {
    let (m_init, m_fin) = (manipulator.clone(), manipulator.clone());
    FunctionalCommand::new(
        "BruteOuttake",
        move || {
            m_init
                .borrow_mut()
                .set_state(ManipulatorState::BruteOuttaking);
            Ok(())
        },
        || Ok(()),
        |_| Ok(()),
        move || m_fin.borrow().state() != ManipulatorState::BruteOuttaking,
    )
    .requiring(Some(manipulator.borrow().id()))
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn outtake_in_state(
    manipulator: &Rc<RefCell<Manipulator>>,
    name: &str,
    state: ManipulatorState,
) -> FunctionalCommand {
    let (m_init, m_fin) = (manipulator.clone(), manipulator.clone());
    FunctionalCommand::new(
        name,
        move || {
            m_init.borrow_mut().set_state(state);
            Ok(())
        },
        || Ok(()),
        |_| Ok(()),
        move || !m_fin.borrow().has_piece_in_sensor(),
    )
    .requiring(Some(manipulator.borrow().id()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cmd::{CommandExt, Scheduler};
    use util::time::Clock;

    fn params() -> ManipulatorParams {
        let mut p: ManipulatorParams =
            toml::from_str(include_str!("../../params/manipulator.toml")).unwrap();
        p.sensor_debounce_s = 0.0;
        p
    }

    struct Rig {
        m: Manipulator,
        clock: Clock,
    }

    impl Rig {
        fn new() -> Self {
            let clock = Clock::manual();
            let hw = Hardware::sim(&clock);
            Self {
                m: Manipulator::new(&hw, params()),
                clock,
            }
        }

        /// Run one tick with the beam broken or not.
        fn tick(&mut self, piece: bool) -> ManipulatorState {
            self.m.sensor().set_sim(!piece);
            self.clock.advance(0.02);
            self.m.periodic();
            self.m.state()
        }

        fn duty(&self) -> f64 {
            match self.m.motor().control() {
                ControlRequest::DutyCycle { output } => output,
                ControlRequest::Neutral => 0.0,
                other => panic!("unexpected request {:?}", other),
            }
        }
    }

    #[test]
    fn test_hungry_without_permission_is_still() {
        let mut r = Rig::new();
        for _ in 0..50 {
            assert_eq!(r.tick(false), ManipulatorState::Hungry);
            assert_eq!(r.duty(), 0.0);
        }

        r.m.set_can_intake(true);
        r.tick(false);
        assert_eq!(r.duty(), 0.6);
    }

    #[test]
    fn test_seat_a_piece() {
        let mut r = Rig::new();
        r.m.set_can_intake(true);

        assert_eq!(r.tick(true), ManipulatorState::Purging);
        assert_eq!(r.duty(), -0.2);
        assert_eq!(r.tick(true), ManipulatorState::Purging);

        assert_eq!(r.tick(false), ManipulatorState::Reintaking);
        assert_eq!(r.duty(), 0.2);
        assert_eq!(r.tick(false), ManipulatorState::Reintaking);

        assert_eq!(r.tick(true), ManipulatorState::Happy);
        assert_eq!(r.duty(), 0.0);
        assert!(r.m.has_piece());

        // Stays happy whatever the sensor does
        assert_eq!(r.tick(false), ManipulatorState::Happy);
    }

    #[test]
    fn test_reintake_times_out() {
        let mut r = Rig::new();
        r.tick(true);
        r.tick(false);
        assert_eq!(r.m.state(), ManipulatorState::Reintaking);

        let mut ticks = 0;
        while r.tick(false) == ManipulatorState::Reintaking {
            ticks += 1;
            assert!(ticks < 100);
        }
        assert_eq!(r.m.state(), ManipulatorState::Hungry);
        // 0.5 s of reintaking at 20 ms a tick
        assert!(ticks >= 24 && ticks <= 25, "took {} ticks", ticks);
    }

    #[test]
    fn test_sensor_wins_over_reintake_timeout() {
        let mut r = Rig::new();
        r.tick(true);
        r.tick(false);
        r.clock.advance(1.0);
        assert_eq!(r.tick(true), ManipulatorState::Happy);
    }

    #[test]
    fn test_outtakes() {
        let mut r = Rig::new();
        r.m.set_state(ManipulatorState::Happy);

        r.m.set_state(ManipulatorState::Outtaking);
        assert_eq!(r.tick(true), ManipulatorState::Outtaking);
        assert_eq!(r.duty(), 0.89);
        assert_eq!(r.tick(false), ManipulatorState::Hungry);

        r.m.set_state(ManipulatorState::SlowOuttaking);
        assert_eq!(r.tick(true), ManipulatorState::SlowOuttaking);
        assert_eq!(r.duty(), 0.4);

        r.m.set_state(ManipulatorState::BruteOuttaking);
        let mut ticks = 0;
        while r.tick(false) == ManipulatorState::BruteOuttaking {
            ticks += 1;
            assert!(ticks < 100);
        }
        assert!(ticks >= 49 && ticks <= 50, "took {} ticks", ticks);
    }

    #[test]
    fn test_debounced_sensor() {
        let clock = Clock::manual();
        let hw = Hardware::sim(&clock);
        let mut p = params();
        p.sensor_debounce_s = 0.04;
        let mut m = Manipulator::new(&hw, p);

        // A single tick glitch is ignored
        m.sensor().set_sim(false);
        clock.advance(0.02);
        m.periodic();
        assert!(!m.has_piece_in_sensor());
        m.sensor().set_sim(true);
        clock.advance(0.02);
        m.periodic();
        assert_eq!(m.state(), ManipulatorState::Hungry);

        // Held for the debounce time it's seen
        m.sensor().set_sim(false);
        for _ in 0..3 {
            clock.advance(0.02);
            m.periodic();
        }
        assert!(m.has_piece_in_sensor());
        assert_eq!(m.state(), ManipulatorState::Purging);
    }

    #[test]
    fn test_intake_command_finishes_when_seated() {
        let clock = Clock::manual();
        let hw = Hardware::sim(&clock);
        let m = Rc::new(RefCell::new(Manipulator::new(&hw, params())));
        let mut sched = Scheduler::new();
        sched.set_disabled(false);
        sched.register_subsystem(&m);

        let cmd = intake(&m).into_handle();
        sched.schedule(&cmd).unwrap();
        assert!(m.borrow().can_intake());

        for piece in [true, false, true].iter() {
            m.borrow().sensor().set_sim(!*piece);
            clock.advance(0.02);
            sched.run();
        }
        assert!(m.borrow().has_piece());

        // Finished on the next tick, intaking no longer allowed
        clock.advance(0.02);
        sched.run();
        assert!(!sched.is_scheduled(&cmd));
        assert!(!m.borrow().can_intake());
    }

    #[test]
    fn test_output_fault_counted_and_state_machine_continues() {
        let mut r = Rig::new();
        r.m.set_can_intake(true);
        r.tick(false);
        assert_eq!(r.m.num_output_faults(), 0);

        r.m.motor().set_sim_connected(false);
        assert_eq!(r.tick(true), ManipulatorState::Purging);
        assert_eq!(r.tick(true), ManipulatorState::Purging);
        assert_eq!(r.m.num_output_faults(), 2);
        // The last accepted output is still the intake
        assert_eq!(r.duty(), 0.6);

        r.m.motor().set_sim_connected(true);
        r.tick(true);
        assert_eq!(r.m.num_output_faults(), 2);
        assert_eq!(r.duty(), -0.2);
    }
}
