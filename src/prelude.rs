//! # dotprobe Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dotprobe library.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotprobe operations
pub use crate::Error;

/// The result type used throughout dotprobe
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The profiler instance and its lifecycle state
pub use crate::profiler::{Profiler, ProfilerState};

/// Configuration of the probe and the initial targets
pub use crate::config::{ProbeTarget, ProfilerConfig};

// ================================================================================================
// Host Interfaces
// ================================================================================================

/// Interfaces provided by the runtime
pub use crate::host::{
    EventMask, FunctionControl, FunctionId, FunctionInfo, HResult, HostResult, MetadataEmit,
    MetadataImport, ModuleId, ModuleInfo, ModuleMetadata, ProfilerCallback, ProfilerInfo,
};

// ================================================================================================
// Instrumentation
// ================================================================================================

/// Descriptors, registry, filter and runtime family
pub use crate::instrument::{
    ArgumentType, InstrumentationFilter, InstrumentationRegistry, InstrumentationTarget,
    MethodDescriptor, RuntimeFamily,
};

/// The rewriting engine
pub use crate::rewriter::{ILRewriter, MAX_ARGUMENTS};

/// Encoding form selection for emitted instructions
pub use crate::assembly::EncodingForm;

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;
