//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the robot software: the driver station
//! link, telemetry packets, and the vision coprocessor packets.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Driver station packets (mode, alliance, gamepads, tunable updates)
pub mod ds;

/// Packet definitions for equipment (like the vision coprocessors)
pub mod eqpt;

/// Network module
pub mod net;

/// Telemetry values and packets
pub mod tm;
