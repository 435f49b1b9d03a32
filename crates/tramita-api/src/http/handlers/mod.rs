//! REST API handler modules.

pub mod definition;
pub mod instance;
pub mod stats;
