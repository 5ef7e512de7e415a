//! The runtime notification surface, forwarding to the [`Profiler`] operations.

use std::sync::Arc;

use log::{debug, warn};

use crate::{
    host::{FunctionControl, FunctionId, HResult, ModuleId, ProfilerCallback, ProfilerInfo},
    metadata::token::Token,
    profiler::Profiler,
    Result,
};

fn status<T>(result: Result<T>) -> HResult {
    match result {
        Ok(_) => HResult::S_OK,
        Err(error) => error.hresult(),
    }
}

impl ProfilerCallback for Profiler {
    fn initialize(&self, info: Arc<dyn ProfilerInfo>) -> HResult {
        status(
            Profiler::initialize(self, info)
                .inspect_err(|error| warn!("Profiler initialization failed: {error}")),
        )
    }

    fn shutdown(&self) -> HResult {
        status(Profiler::shutdown(self))
    }

    fn jit_compilation_started(&self, function: FunctionId, _is_safe_to_block: bool) -> HResult {
        status(Profiler::jit_compilation_started(self, function))
    }

    fn rejit_compilation_started(&self, function: FunctionId, _is_safe_to_block: bool) -> HResult {
        debug!("Re-JIT of {function:?} started");
        HResult::S_OK
    }

    fn get_rejit_parameters(
        &self,
        module: ModuleId,
        method: Token,
        control: &dyn FunctionControl,
    ) -> HResult {
        status(Profiler::get_rejit_parameters(self, module, method, control))
    }

    fn rejit_error(&self, module: ModuleId, method: Token, status: HResult) -> HResult {
        warn!("Re-JIT of {method} in {module:?} failed - {status}");
        HResult::S_OK
    }
}
