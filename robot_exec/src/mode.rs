//! # Mode controller
//!
//! Tracks the robot mode requested by the driver station (Disabled, Autonomous, Teleop, Test) and
//! calls the container's hooks around each transition:
//!
//! - entering Autonomous schedules a fresh autonomous command from the container,
//! - entering Teleop cancels that command if it is still running,
//! - entering Test cancels every running command.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ds::RobotMode;
use log::{info, warn};

use crate::{
    cmd::{CommandHandle, Scheduler},
    telemetry::LogContext,
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Mode hooks provided by the robot container.
pub trait ModeHooks {
    /// Called once when `mode` is entered, after the controller's own transition actions.
    fn mode_init(&mut self, _mode: RobotMode, _scheduler: &mut Scheduler) {}

    /// Called every tick while in `mode`.
    fn mode_periodic(&mut self, _mode: RobotMode, _scheduler: &mut Scheduler) {}

    /// Called once when `mode` is left, before the next mode's actions.
    fn mode_exit(&mut self, _mode: RobotMode, _scheduler: &mut Scheduler) {}

    /// A fresh autonomous command, pulled on every entry into Autonomous.
    fn autonomous_command(&mut self) -> Option<CommandHandle>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ModeController {
    /// Current mode, `None` before the first update
    mode: Option<RobotMode>,

    auto_command: Option<CommandHandle>,

    tm: LogContext,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ModeController {
    pub fn new() -> Self {
        Self::with_context(LogContext::new("Robot"))
    }

    pub fn with_context(tm: LogContext) -> Self {
        Self {
            mode: None,
            auto_command: None,
            tm,
        }
    }

    /// The current mode, Disabled before the first update.
    pub fn mode(&self) -> RobotMode {
        self.mode.unwrap_or(RobotMode::Disabled)
    }

    /// Apply the requested mode for this tick, then run the mode's periodic hook.
    pub fn update<H: ModeHooks + ?Sized>(
        &mut self,
        requested: RobotMode,
        hooks: &mut H,
        scheduler: &mut Scheduler,
    ) {
        if self.mode != Some(requested) {
            if let Some(old) = self.mode {
                info!("Mode change: {:?} -> {:?}", old, requested);
                hooks.mode_exit(old, scheduler);
            } else {
                info!("Initial mode: {:?}", requested);
            }

            scheduler.set_disabled(requested == RobotMode::Disabled);

            match requested {
                RobotMode::Autonomous => {
                    self.auto_command = hooks.autonomous_command();
                    match self.auto_command {
                        Some(ref c) => {
                            if let Err(e) = scheduler.schedule(c) {
                                warn!("Could not schedule the autonomous command: {}", e);
                            }
                        }
                        None => warn!("No autonomous command available"),
                    }
                }
                RobotMode::Teleop => {
                    if let Some(c) = self.auto_command.take() {
                        scheduler.cancel(&c);
                    }
                }
                RobotMode::Test => scheduler.cancel_all(),
                RobotMode::Disabled => (),
            }

            hooks.mode_init(requested, scheduler);
            self.mode = Some(requested);
        }

        hooks.mode_periodic(requested, scheduler);

        self.tm.put("mode", format!("{:?}", requested));
        self.tm.put("enabled", requested.is_enabled());
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}
