//! Interfaces the runtime provides to the profiler.
//!
//! The profiler never talks to COM directly. Everything it needs from the runtime is described
//! by the traits in this module, which a thin adapter over `ICorProfilerInfo`,
//! `IMetaDataImport`/`IMetaDataEmit` and `ICorProfilerFunctionControl` implements. Keeping the
//! seam here lets the whole rewriting pipeline run against in-memory hosts in tests.
//!
//! # Key Components
//!
//! - [`ProfilerInfo`] - Function/module queries, body installation, re-JIT requests
//! - [`MetadataImport`] / [`MetadataEmit`] - Per-module metadata reads and reference definition
//! - [`ModuleMetadata`] - Both metadata halves behind one object
//! - [`FunctionControl`] - Sink accepting a replacement body during re-JIT
//! - [`ProfilerCallback`] - The notification surface the runtime drives
//!
//! Every host call returns a [`HostResult`], carrying the raw [`HResult`] on failure so it can be
//! reported verbatim.

use std::{fmt, sync::Arc};

use bitflags::bitflags;
use widestring::{U16Str, U16String};

use crate::metadata::token::Token;

mod callback;

pub use callback::ProfilerCallback;

/// Result of a call into the runtime.
pub type HostResult<T> = std::result::Result<T, HResult>;

/// A COM status code.
///
/// Negative values are failures, everything else is success.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    /// Operation succeeded
    pub const S_OK: HResult = HResult(0);
    /// Operation succeeded, with nothing to do
    pub const S_FALSE: HResult = HResult(1);
    /// Unspecified failure
    pub const E_FAIL: HResult = HResult(0x8000_4005_u32 as i32);
    /// One or more arguments are invalid
    pub const E_INVALIDARG: HResult = HResult(0x8007_0057_u32 as i32);
    /// Failed to allocate the necessary memory
    pub const E_OUTOFMEMORY: HResult = HResult(0x8007_000E_u32 as i32);
    /// Invalid pointer, used for null arguments crossing the control surface
    pub const E_POINTER: HResult = HResult(0x8000_4003_u32 as i32);
    /// The object is not in a state to accept the call
    pub const E_UNEXPECTED: HResult = HResult(0x8000_FFFF_u32 as i32);

    /// Returns `true` for any non-negative status.
    #[must_use]
    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// Returns `true` for any negative status.
    #[must_use]
    pub fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Convert into a [`HostResult`], `Ok` for any success code.
    ///
    /// # Errors
    /// Returns `self` if this status is a failure.
    pub fn ok(self) -> HostResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult(0x{:08X})", self.0 as u32)
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HRESULT 0x{:08X}", self.0 as u32)
    }
}

impl From<HResult> for i32 {
    fn from(hr: HResult) -> Self {
        hr.0
    }
}

/// Runtime identifier of a loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

/// Runtime identifier of a function instance about to be compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub usize);

/// Runtime identifier of a loaded class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub usize);

/// Runtime identifier of a loaded assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblyId(pub usize);

/// Answer to [`ProfilerInfo::function_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Class the function belongs to
    pub class_id: ClassId,
    /// Module declaring the function
    pub module_id: ModuleId,
    /// `MethodDef` token of the function inside its module
    pub token: Token,
}

/// Answer to [`ProfilerInfo::module_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// File path the module was loaded from
    pub path: U16String,
    /// Owning assembly
    pub assembly_id: AssemblyId,
    /// Simple name of the owning assembly, e.g. `MyApp.Orders`
    pub assembly_name: U16String,
}

/// Properties of a `MethodDef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodProps {
    /// `TypeDef` token of the declaring type
    pub owner: Token,
    /// Simple method name
    pub name: U16String,
    /// `MethodAttributes` bits
    pub attributes: u32,
    /// Raw `MethodDefSig` blob
    pub signature: Vec<u8>,
}

/// Properties of a `TypeDef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefProps {
    /// Namespace-qualified type name
    pub name: U16String,
    /// `TypeAttributes` bits
    pub flags: u32,
    /// Base type (`TypeDef`, `TypeRef` or `TypeSpec`), null for interfaces and `System.Object`
    pub extends: Token,
    /// Number of generic parameters the type declares (`EnumGenericParams`)
    pub generic_params: u32,
}

/// Properties of a `TypeRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRefProps {
    /// Resolution scope (usually an `AssemblyRef`)
    pub resolution_scope: Token,
    /// Namespace-qualified type name
    pub name: U16String,
}

bitflags! {
    /// `COR_PRF_MONITOR` bits selecting which notifications the runtime delivers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        /// Function unload notifications
        const MONITOR_FUNCTION_UNLOADS = 0x0000_0001;
        /// Class load notifications
        const MONITOR_CLASS_LOADS = 0x0000_0002;
        /// Module load notifications
        const MONITOR_MODULE_LOADS = 0x0000_0004;
        /// Assembly load notifications
        const MONITOR_ASSEMBLY_LOADS = 0x0000_0008;
        /// JIT compilation notifications
        const MONITOR_JIT_COMPILATION = 0x0000_0020;
        /// Exception notifications
        const MONITOR_EXCEPTIONS = 0x0000_0040;
        /// Allow `RequestReJIT`
        const ENABLE_REJIT = 0x0004_0000;
        /// Skip transparency checks for full-trust code calling the probe
        const DISABLE_TRANSPARENCY_CHECKS_UNDER_FULL_TRUST = 0x4000_0000;
        /// Force JIT instead of loading precompiled images, so every method is seen
        const DISABLE_ALL_NGEN_IMAGES = 0x8000_0000;
    }
}

impl EventMask {
    /// Notifications and capabilities the instrumenting profiler subscribes to.
    pub const INSTRUMENTATION: EventMask = EventMask::MONITOR_CLASS_LOADS
        .union(EventMask::MONITOR_MODULE_LOADS)
        .union(EventMask::MONITOR_JIT_COMPILATION)
        .union(EventMask::MONITOR_EXCEPTIONS)
        .union(EventMask::ENABLE_REJIT)
        .union(EventMask::DISABLE_TRANSPARENCY_CHECKS_UNDER_FULL_TRUST)
        .union(EventMask::DISABLE_ALL_NGEN_IMAGES);
}

/// Read access to one module's metadata.
pub trait MetadataImport: Send + Sync {
    /// Properties of the `MethodDef` row `method`.
    ///
    /// # Errors
    /// Returns the collaborator's status if the token cannot be resolved.
    fn method_props(&self, method: Token) -> HostResult<MethodProps>;

    /// Properties of the `TypeDef` row `type_def`.
    ///
    /// # Errors
    /// Returns the collaborator's status if the token cannot be resolved.
    fn type_def_props(&self, type_def: Token) -> HostResult<TypeDefProps>;

    /// Properties of the `TypeRef` row `type_ref`.
    ///
    /// # Errors
    /// Returns the collaborator's status if the token cannot be resolved.
    fn type_ref_props(&self, type_ref: Token) -> HostResult<TypeRefProps>;

    /// Blob of the `StandAloneSig` row `signature`.
    ///
    /// # Errors
    /// Returns the collaborator's status if the token cannot be resolved.
    fn sig_from_token(&self, signature: Token) -> HostResult<Vec<u8>>;

    /// All `AssemblyRef` tokens of the module.
    ///
    /// # Errors
    /// Returns the collaborator's status if enumeration fails.
    fn enum_assembly_refs(&self) -> HostResult<Vec<Token>>;

    /// Simple name of the `AssemblyRef` row `assembly_ref`.
    ///
    /// # Errors
    /// Returns the collaborator's status if the token cannot be resolved.
    fn assembly_ref_name(&self, assembly_ref: Token) -> HostResult<U16String>;

    /// All `TypeDef` tokens of the module.
    ///
    /// # Errors
    /// Returns the collaborator's status if enumeration fails.
    fn enum_type_defs(&self) -> HostResult<Vec<Token>>;

    /// All `MethodDef` tokens declared by `type_def`.
    ///
    /// # Errors
    /// Returns the collaborator's status if enumeration fails.
    fn enum_methods(&self, type_def: Token) -> HostResult<Vec<Token>>;
}

/// Definition of new references and blobs inside one module.
pub trait MetadataEmit: Send + Sync {
    /// Add an `AssemblyRef` with the given simple name.
    ///
    /// # Errors
    /// Returns the collaborator's status if the row cannot be added.
    fn define_assembly_ref(&self, name: &U16Str) -> HostResult<Token>;

    /// Add a `TypeRef` named `name` resolved through `scope`.
    ///
    /// # Errors
    /// Returns the collaborator's status if the row cannot be added.
    fn define_type_ref_by_name(&self, scope: Token, name: &U16Str) -> HostResult<Token>;

    /// Add a `MemberRef` on `parent` with the given name and signature blob.
    ///
    /// # Errors
    /// Returns the collaborator's status if the row cannot be added.
    fn define_member_ref(&self, parent: Token, name: &U16Str, signature: &[u8])
        -> HostResult<Token>;

    /// Add a literal to the user-string heap.
    ///
    /// # Errors
    /// Returns the collaborator's status if the heap entry cannot be added.
    fn define_user_string(&self, value: &U16Str) -> HostResult<Token>;

    /// Token of a `StandAloneSig` row holding `signature`.
    ///
    /// # Errors
    /// Returns the collaborator's status if the row cannot be added.
    fn token_from_sig(&self, signature: &[u8]) -> HostResult<Token>;

    /// Token of a `TypeSpec` row holding `signature`.
    ///
    /// # Errors
    /// Returns the collaborator's status if the row cannot be added.
    fn token_from_type_spec(&self, signature: &[u8]) -> HostResult<Token>;
}

/// Both metadata halves of a module behind a single object.
pub trait ModuleMetadata: MetadataImport + MetadataEmit {}

impl<T: MetadataImport + MetadataEmit + ?Sized> ModuleMetadata for T {}

/// Queries and commands the runtime offers to the profiler.
///
/// Implementations must be callable from any thread; the runtime compiles methods concurrently.
pub trait ProfilerInfo: Send + Sync {
    /// Class, module and token of `function`.
    ///
    /// # Errors
    /// Returns the runtime's status if the function id is unknown.
    fn function_info(&self, function: FunctionId) -> HostResult<FunctionInfo>;

    /// Path and owning assembly of `module`.
    ///
    /// # Errors
    /// Returns the runtime's status if the module id is unknown.
    fn module_info(&self, module: ModuleId) -> HostResult<ModuleInfo>;

    /// Metadata of `module`, opened for reading and writing.
    ///
    /// # Errors
    /// Returns the runtime's status if the metadata cannot be opened.
    fn module_metadata(&self, module: ModuleId) -> HostResult<Arc<dyn ModuleMetadata>>;

    /// The current method body (header, code and extra sections) of `method`.
    ///
    /// # Errors
    /// Returns the runtime's status if the method has no body.
    fn il_function_body(&self, module: ModuleId, method: Token) -> HostResult<&[u8]>;

    /// Replace the body of `method` before it is first compiled.
    ///
    /// # Errors
    /// Returns the runtime's status if the body is refused.
    fn set_il_function_body(&self, module: ModuleId, method: Token, body: &[u8])
        -> HostResult<()>;

    /// All currently loaded modules.
    ///
    /// # Errors
    /// Returns the runtime's status if enumeration fails.
    fn enum_modules(&self) -> HostResult<Vec<ModuleId>>;

    /// Schedule the given methods for recompilation.
    ///
    /// `modules` and `methods` are parallel slices.
    ///
    /// # Errors
    /// Returns the runtime's status if the request is refused.
    fn request_rejit(&self, modules: &[ModuleId], methods: &[Token]) -> HostResult<()>;

    /// Select which notifications are delivered.
    ///
    /// # Errors
    /// Returns the runtime's status if the mask is refused.
    fn set_event_mask(&self, mask: EventMask) -> HostResult<()>;
}

/// Destination for a rewritten method body.
///
/// During re-JIT the runtime hands one of these to the profiler; for first-time compilation
/// [`JitFunctionControl`] routes the body through [`ProfilerInfo::set_il_function_body`].
pub trait FunctionControl {
    /// Install `body` as the method's new body.
    ///
    /// # Errors
    /// Returns the runtime's status if the body is refused.
    fn set_il_function_body(&self, body: &[u8]) -> HostResult<()>;
}

/// [`FunctionControl`] for methods that are compiled for the first time.
pub struct JitFunctionControl<'a> {
    info: &'a dyn ProfilerInfo,
    module: ModuleId,
    method: Token,
}

impl<'a> JitFunctionControl<'a> {
    /// Sink installing bodies for `method` of `module` through `info`.
    #[must_use]
    pub fn new(info: &'a dyn ProfilerInfo, module: ModuleId, method: Token) -> Self {
        JitFunctionControl {
            info,
            module,
            method,
        }
    }
}

impl FunctionControl for JitFunctionControl<'_> {
    fn set_il_function_body(&self, body: &[u8]) -> HostResult<()> {
        self.info
            .set_il_function_body(self.module, self.method, body)
    }
}
