//! Centralized constants for the m8s project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod quota;
pub mod state;
