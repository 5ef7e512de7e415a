//! Deciding what to instrument, and describing it.
//!
//! # Key Components
//!
//! - [`MethodDescriptor`] - Identity, argument shape and body of one method
//! - [`InstrumentationRegistry`] - Registered `Assembly` / `Type.Method` targets
//! - [`InstrumentationFilter`] - Structural exclusions (constructors, bodiless methods)
//! - [`RuntimeDetector`] - One-time .NET Core / .NET Framework detection

mod descriptor;
mod filter;
mod registry;
mod runtime;

pub use descriptor::{ArgumentKind, ArgumentType, MethodDescriptor};
pub use filter::InstrumentationFilter;
pub use registry::{InstrumentationRegistry, InstrumentationTarget};
pub use runtime::{detect, RuntimeDetector, RuntimeFamily};
