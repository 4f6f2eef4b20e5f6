//! # Robot library.
//!
//! This library allows the executable, benches and tests to access items defined inside the robot
//! crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Climber - software limited open loop arm
pub mod climber;

/// Command framework - commands, subsystems, triggers and the scheduler
pub mod cmd;

/// Robot containers - composition roots for each robot variant
pub mod container;

/// Data store - cycle bookkeeping and the safe mode latch
pub mod data_store;

/// Swerve drive - modules, kinematics, pose estimation and trajectory following
pub mod drive;

/// Driver station client - receives driver station packets from the network
pub mod ds_client;

/// Field geometry - alliance conversion of poses and speeds
pub mod field;

/// Hardware abstraction - motors, encoders, gyro, digital inputs
pub mod hal;

/// Driver station input - latest packet, gamepads and dashboard buttons
pub mod input;

/// Fiducial localizer - multi-camera robot pose estimates
pub mod localizer;

/// Manipulator - coral intake and outtake state machine
pub mod manipulator;

/// Mode controller - robot mode transitions and their hooks
pub mod mode;

/// Parameters for the executable
pub mod params;

/// Persistent preferences stored on the robot
pub mod prefs;

/// Main tick
pub mod robot;

/// Superstructure - the two stage elevator and its presets
pub mod superstructure;

/// System identification routines
pub mod sysid;

/// Telemetry sink and outputs
pub mod telemetry;

/// Values tunable from the driver station
pub mod tuning;
