//! The notification surface driven by the runtime.

use std::sync::Arc;

use crate::{
    host::{ClassId, FunctionControl, FunctionId, HResult, ModuleId, ProfilerInfo},
    metadata::token::Token,
};

/// Notifications delivered by the runtime to an attached profiler.
///
/// Mirrors the subset of `ICorProfilerCallback4` the instrumentation cares about. Every hook
/// defaults to a no-op returning [`HResult::S_OK`], so implementors only override what they use.
/// Returned failure codes are advisory; the runtime only acts on them for
/// [`ProfilerCallback::initialize`] and [`ProfilerCallback::get_rejit_parameters`].
#[allow(unused_variables)]
pub trait ProfilerCallback: Send + Sync {
    /// The profiler was attached. `info` is the runtime's interface for the rest of the process.
    fn initialize(&self, info: Arc<dyn ProfilerInfo>) -> HResult {
        HResult::S_OK
    }

    /// The runtime is shutting down; no further callbacks will succeed.
    fn shutdown(&self) -> HResult {
        HResult::S_OK
    }

    /// A module started loading.
    fn module_load_started(&self, module: ModuleId) -> HResult {
        HResult::S_OK
    }

    /// A module finished loading with status `status`.
    fn module_load_finished(&self, module: ModuleId, status: HResult) -> HResult {
        HResult::S_OK
    }

    /// A class finished loading with status `status`.
    fn class_load_finished(&self, class: ClassId, status: HResult) -> HResult {
        HResult::S_OK
    }

    /// `function` is about to be compiled for the first time.
    fn jit_compilation_started(&self, function: FunctionId, is_safe_to_block: bool) -> HResult {
        HResult::S_OK
    }

    /// `function` finished compiling with status `status`.
    fn jit_compilation_finished(
        &self,
        function: FunctionId,
        status: HResult,
        is_safe_to_block: bool,
    ) -> HResult {
        HResult::S_OK
    }

    /// A re-JIT of `function` started.
    fn rejit_compilation_started(&self, function: FunctionId, is_safe_to_block: bool) -> HResult {
        HResult::S_OK
    }

    /// The runtime asks for the replacement body of a method scheduled for re-JIT.
    fn get_rejit_parameters(
        &self,
        module: ModuleId,
        method: Token,
        control: &dyn FunctionControl,
    ) -> HResult {
        HResult::S_OK
    }

    /// A re-JIT of `function` finished with status `status`.
    fn rejit_compilation_finished(
        &self,
        function: FunctionId,
        status: HResult,
        is_safe_to_block: bool,
    ) -> HResult {
        HResult::S_OK
    }

    /// A scheduled re-JIT of `method` failed with status `status`.
    fn rejit_error(&self, module: ModuleId, method: Token, status: HResult) -> HResult {
        HResult::S_OK
    }

    /// Managed code threw an exception.
    fn exception_thrown(&self) -> HResult {
        HResult::S_OK
    }
}
