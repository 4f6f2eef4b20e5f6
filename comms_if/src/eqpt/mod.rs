//! # Equipment Interface
//!
//! This module defines the interface structures which are exchanged with equipment
//! servers/clients, currently only the vision coprocessors.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod vision;
