//! The profiler: lifecycle, JIT hooks and re-JIT activation.
//!
//! A [`Profiler`] ties the pieces together. The runtime drives it through the
//! [`crate::host::ProfilerCallback`] implementation in this module; the managed side drives it
//! through the [`crate::ffi`] exports, which reach the process-wide instance kept by
//! [`global`].
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --initialize--> Initialized --shutdown--> ShuttingDown
//! ```
//!
//! `ShuttingDown` is terminal. The runtime interface is only held while `Initialized`.
//!
//! # Activation
//!
//! Registering a method only affects compilations that happen afterwards. Methods that were
//! already compiled are found by walking the loaded modules of the target assembly and
//! scheduled for re-JIT; the runtime then asks for their new body through
//! [`Profiler::get_rejit_parameters`].

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use strum::Display;
use uguid::{guid, Guid};

use crate::{
    config::ProfilerConfig,
    host::{
        EventMask, FunctionControl, FunctionId, HResult, JitFunctionControl, ModuleId,
        ProfilerInfo,
    },
    instrument::{
        InstrumentationFilter, InstrumentationRegistry, MethodDescriptor, RuntimeDetector,
        RuntimeFamily,
    },
    metadata::token::Token,
    rewriter::ILRewriter,
    Error, Result,
};

mod callbacks;
pub mod global;

/// Class id under which the runtime loads the profiler (`CORECLR_PROFILER` / `COR_PROFILER`).
pub const CLSID_PROFILER: Guid = guid!("107d2832-7b1d-4a31-8d0d-c9e1d6e499a2");

/// Lifecycle state of a [`Profiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProfilerState {
    /// Created, not yet attached to a runtime
    Uninitialized,
    /// Attached and instrumenting
    Initialized,
    /// Detached; every further request is refused
    ShuttingDown,
}

struct Lifecycle {
    state: ProfilerState,
    info: Option<Arc<dyn ProfilerInfo>>,
}

/// Method entry instrumentation for one process.
///
/// All methods take `&self` and may be called from any thread.
pub struct Profiler {
    config: ProfilerConfig,
    lifecycle: Mutex<Lifecycle>,
    registry: InstrumentationRegistry,
    runtime: RuntimeDetector,
    filter: InstrumentationFilter,
}

impl Profiler {
    /// An uninitialized profiler using `config`.
    #[must_use]
    pub fn new(config: ProfilerConfig) -> Self {
        let runtime = RuntimeDetector::new(config.core_library.as_str());
        Profiler {
            config,
            lifecycle: Mutex::new(Lifecycle {
                state: ProfilerState::Uninitialized,
                info: None,
            }),
            registry: InstrumentationRegistry::new(),
            runtime,
            filter: InstrumentationFilter,
        }
    }

    /// Attach to the runtime.
    ///
    /// Subscribes to [`EventMask::INSTRUMENTATION`] and registers the configured targets.
    ///
    /// # Errors
    /// Returns [`crate::Error::AlreadyInitialized`] or [`crate::Error::ShuttingDown`] outside
    /// the `Uninitialized` state, or [`crate::Error::HostRejected`] if the runtime refuses the
    /// event mask.
    pub fn initialize(&self, info: Arc<dyn ProfilerInfo>) -> Result<()> {
        let mut lifecycle = lock!(self.lifecycle)?;
        match lifecycle.state {
            ProfilerState::Uninitialized => {}
            ProfilerState::Initialized => return Err(Error::AlreadyInitialized),
            ProfilerState::ShuttingDown => return Err(Error::ShuttingDown),
        }

        info.set_event_mask(EventMask::INSTRUMENTATION)
            .map_err(Error::HostRejected)?;

        for target in &self.config.targets {
            self.registry.add(&target.assembly, &target.method)?;
        }

        lifecycle.state = ProfilerState::Initialized;
        lifecycle.info = Some(info);
        info!(
            "Profiler {CLSID_PROFILER} initialized, probe {}!{}.{}, {} initial targets",
            self.config.probe.assembly,
            self.config.probe.type_name,
            self.config.probe.method,
            self.config.targets.len()
        );
        Ok(())
    }

    /// Detach from the runtime. Calling it again has no further effect.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the lifecycle lock is poisoned.
    pub fn shutdown(&self) -> Result<()> {
        let mut lifecycle = lock!(self.lifecycle)?;
        if lifecycle.state != ProfilerState::ShuttingDown {
            info!("Profiler shutting down");
        }
        lifecycle.state = ProfilerState::ShuttingDown;
        lifecycle.info = None;
        Ok(())
    }

    /// Current lifecycle state.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the lifecycle lock is poisoned.
    pub fn state(&self) -> Result<ProfilerState> {
        Ok(lock!(self.lifecycle)?.state)
    }

    /// The configuration this profiler was created with
    #[must_use]
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// The registered instrumentation targets
    #[must_use]
    pub fn registry(&self) -> &InstrumentationRegistry {
        &self.registry
    }

    /// The detected runtime family, once the first method was rewritten
    #[must_use]
    pub fn runtime(&self) -> Option<RuntimeFamily> {
        self.runtime.cached()
    }

    fn host(&self) -> Result<Arc<dyn ProfilerInfo>> {
        let lifecycle = lock!(self.lifecycle)?;
        match (&lifecycle.state, &lifecycle.info) {
            (ProfilerState::Initialized, Some(info)) => Ok(Arc::clone(info)),
            (ProfilerState::ShuttingDown, _) => Err(Error::ShuttingDown),
            _ => Err(Error::NotInitialized),
        }
    }

    /// Handle the first-time compilation of `function`.
    ///
    /// Returns `true` if a rewritten body was installed. Methods whose descriptor cannot be
    /// extracted are not eligible.
    ///
    /// # Errors
    /// Returns lifecycle errors, or the error of a failed rewrite of an eligible method.
    pub fn jit_compilation_started(&self, function: FunctionId) -> Result<bool> {
        let info = self.host()?;
        let descriptor = match MethodDescriptor::from_function(&*info, function) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                debug!("Not instrumenting {function:?}: {error}");
                return Ok(false);
            }
        };

        if !self.eligible(&descriptor) {
            return Ok(false);
        }

        let control = JitFunctionControl::new(&*info, descriptor.module_id, descriptor.method_token);
        self.instrument(&*info, &descriptor, &control)?;
        Ok(true)
    }

    /// Provide the new body of `method` in `module` for a scheduled re-JIT through `control`.
    ///
    /// Returns `true` if a rewritten body was installed.
    ///
    /// # Errors
    /// Returns lifecycle errors, or the error of a failed rewrite of an eligible method.
    pub fn get_rejit_parameters(
        &self,
        module: ModuleId,
        method: Token,
        control: &dyn FunctionControl,
    ) -> Result<bool> {
        let info = self.host()?;
        let descriptor = match MethodDescriptor::from_method(&*info, module, method) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                debug!("Not instrumenting re-JIT of {method}: {error}");
                return Ok(false);
            }
        };

        if !self.eligible(&descriptor) {
            return Ok(false);
        }

        self.instrument(&*info, &descriptor, control)?;
        Ok(true)
    }

    fn eligible(&self, descriptor: &MethodDescriptor<'_>) -> bool {
        if !self.registry.is_eligible(descriptor) {
            return false;
        }
        debug!("{} is registered for instrumentation", descriptor.full_name());
        self.filter.should_instrument(descriptor)
    }

    fn instrument(
        &self,
        info: &dyn ProfilerInfo,
        descriptor: &MethodDescriptor<'_>,
        control: &dyn FunctionControl,
    ) -> Result<()> {
        let metadata = info
            .module_metadata(descriptor.module_id)
            .map_err(|hr| Error::MetadataResolution {
                what: format!("metadata of {:?}", descriptor.module_id),
                hr,
            })?;

        let family = self.runtime.family(&*metadata);
        ILRewriter::new(&self.config, family)
            .rewrite(descriptor, &*metadata, control)
            .inspect_err(|error| warn!("Failed to instrument {}: {error}", descriptor.full_name()))
    }

    /// Register `method` (`Type.Method`) of `assembly` and re-JIT every loaded match.
    ///
    /// Returns the number of re-JIT requests issued. Modules whose metadata cannot be walked are
    /// skipped with a warning; the registration stays in place whatever happens.
    ///
    /// # Errors
    /// Returns lifecycle errors, [`crate::Error::InvalidArgument`] for empty names,
    /// [`crate::Error::MetadataResolution`] if the loaded modules cannot be enumerated, or
    /// [`crate::Error::HostRejected`] if the runtime refuses a re-JIT request.
    pub fn request_rejit(&self, assembly: &str, method: &str) -> Result<usize> {
        let info = self.host()?;
        if self.registry.add(assembly, method)? {
            info!("Registered {assembly}!{method} for instrumentation");
        }

        let modules = info
            .enum_modules()
            .map_err(|hr| Error::MetadataResolution {
                what: "loaded modules".to_string(),
                hr,
            })?;

        let mut requested = 0;
        for module in modules {
            let matches = match find_methods(&*info, module, assembly, method) {
                Ok(matches) => matches,
                Err(error) => {
                    warn!("Skipping {module:?} while activating {assembly}!{method}: {error}");
                    continue;
                }
            };

            for token in matches {
                info.request_rejit(&[module], &[token])
                    .map_err(Error::HostRejected)?;
                debug!("Requested re-JIT of {token} in {module:?}");
                requested += 1;
            }
        }

        info!("Requested re-JIT of {requested} loaded methods matching {assembly}!{method}");
        Ok(requested)
    }

    /// Unregister `method` (`Type.Method`) of `assembly`.
    ///
    /// Already instrumented bodies stay in place until the method is compiled again. Returns
    /// `false` if the method was not registered.
    ///
    /// # Errors
    /// Returns [`crate::Error::ShuttingDown`] after shutdown.
    pub fn remove_method(&self, assembly: &str, method: &str) -> Result<bool> {
        if self.state()? == ProfilerState::ShuttingDown {
            return Err(Error::ShuttingDown);
        }

        let removed = self.registry.remove(assembly, method)?;
        if removed {
            info!("Unregistered {assembly}!{method}");
        }
        Ok(removed)
    }
}

/// `MethodDef` tokens of `module` whose `Type.Method` equals `qualified`, if the module belongs
/// to `assembly`.
fn find_methods(
    info: &dyn ProfilerInfo,
    module: ModuleId,
    assembly: &str,
    qualified: &str,
) -> Result<Vec<Token>> {
    let module_info = info
        .module_info(module)
        .map_err(resolution(format!("module info of {module:?}")))?;
    if module_info.assembly_name.to_string_lossy() != assembly {
        return Ok(Vec::new());
    }

    let metadata = info
        .module_metadata(module)
        .map_err(resolution(format!("metadata of {module:?}")))?;

    let mut matches = Vec::new();
    for type_def in metadata
        .enum_type_defs()
        .map_err(resolution("type definitions".to_string()))?
    {
        let type_name = metadata
            .type_def_props(type_def)
            .map_err(resolution(format!("type {type_def}")))?
            .name
            .to_string_lossy();

        let Some(method_name) = qualified
            .strip_prefix(type_name.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
        else {
            continue;
        };

        for method in metadata
            .enum_methods(type_def)
            .map_err(resolution(format!("methods of {type_name}")))?
        {
            let props = metadata
                .method_props(method)
                .map_err(resolution(format!("method {method}")))?;
            if props.name.to_string_lossy() == method_name {
                matches.push(method);
            }
        }
    }

    Ok(matches)
}

fn resolution(what: String) -> impl FnOnce(HResult) -> Error {
    move |hr| Error::MetadataResolution { what, hr }
}
