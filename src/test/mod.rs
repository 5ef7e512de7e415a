//! Shared testing infrastructure.
//!
//! - [`host`] - In-memory runtime and module metadata with recorded definitions
//! - [`factories`] - Descriptor construction shortcuts
//! - [`evaluator`] - Symbolic execution of emitted probe prologs

pub mod evaluator;
