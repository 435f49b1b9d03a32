//! Shared domain types for Tramita.
//!
//! This crate contains the core domain types used across the Tramita platform:
//! WorkflowDefinition, WorkflowInstance, WorkflowHistory, statistics, and their
//! associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod definition;
pub mod error;
pub mod history;
pub mod instance;
pub mod stats;
