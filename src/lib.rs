// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # dotprobe
//!
//! Entry-point instrumentation for .NET methods, written as the core of a CLR profiler.
//!
//! When the runtime is about to JIT (or re-JIT) a method that has been registered for
//! instrumentation, `dotprobe` builds a new CIL body for it: a short prolog that packs the
//! receiver and every argument into an `object[]` (boxing value types on the way), calls an
//! external managed probe with the method's fully qualified name and that array, and then falls
//! through into the untouched original code.
//!
//! ## Architecture
//!
//! - [`host`] - The runtime side: profiler info, per-module metadata, callback surface
//! - [`metadata`] - Tokens, signature blobs and method body headers (ECMA-335)
//! - [`assembly`] - Capacity-checked CIL instruction encoding
//! - [`rewriter`] - The bytecode rewriting engine
//! - [`instrument`] - Method descriptors, runtime detection, registry and filter
//! - [`profiler`] - Lifecycle state machine, JIT hooks and re-JIT activation
//! - [`config`] - Probe target and initial instrumentation targets
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotprobe::prelude::*;
//!
//! # fn host() -> Arc<dyn ProfilerInfo> { unimplemented!() }
//! let profiler = Profiler::new(ProfilerConfig::default());
//! profiler.initialize(host())?;
//!
//! // Instrument `OrderService.Place` from now on, and re-JIT it if it was already compiled
//! profiler.request_rejit("MyApp.Orders", "OrderService.Place")?;
//! # Ok::<(), dotprobe::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). A failed rewrite never installs a partial
//! body; the method simply keeps its original code.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

pub(crate) mod io;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
pub mod prelude;

/// Capacity-checked CIL encoding: the rewrite buffer, opcodes and the instruction encoder.
pub mod assembly;

/// Probe target and instrumentation target configuration.
pub mod config;

/// Exported control surface (`RequestReJIT`, `RemoveMethodToInstrument`) and plugin load/unload.
pub mod ffi;

/// Interfaces the runtime provides to the profiler, and the callback surface it drives.
pub mod host;

/// Method descriptors, runtime detection, the instrumentation registry and filter.
pub mod instrument;

/// Metadata tokens, signature blobs and method bodies based on ECMA-335.
pub mod metadata;

/// The profiler instance: lifecycle, JIT hooks and re-JIT activation.
pub mod profiler;

/// The bytecode rewriting engine.
pub mod rewriter;

/// `dotprobe` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotprobe` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

pub use config::ProfilerConfig;
pub use profiler::Profiler;
