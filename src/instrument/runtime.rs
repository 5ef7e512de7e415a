//! Detection of the hosting runtime family.
//!
//! .NET Core and .NET Framework keep the base types in different assemblies, so references to
//! `System.Object` and to the boxed primitive types must resolve through `System.Runtime` on one
//! and `mscorlib` on the other. The family is decided once, from the assembly references of the
//! first module a method is rewritten in, and cached for the rest of the process.

use std::sync::OnceLock;

use log::{debug, info};
use strum::{Display, EnumIter};

use crate::{config::ProfilerConfig, host::MetadataImport};

/// The flavor of runtime hosting the profiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum RuntimeFamily {
    /// .NET Framework, base types in `mscorlib`
    #[strum(serialize = ".NET Framework")]
    Framework,
    /// .NET Core / .NET 5+, base types forwarded through `System.Runtime`
    #[strum(serialize = ".NET Core")]
    Core,
}

impl RuntimeFamily {
    /// Name of the assembly the base types are referenced from.
    #[must_use]
    pub fn base_library<'c>(&self, config: &'c ProfilerConfig) -> &'c str {
        match self {
            RuntimeFamily::Framework => &config.framework_library,
            RuntimeFamily::Core => &config.core_library,
        }
    }
}

/// Classify a module by its assembly references.
///
/// A reference to `core_library` means Core. Anything else, including a failure to enumerate the
/// references, means Framework.
pub fn detect<M: MetadataImport + ?Sized>(metadata: &M, core_library: &str) -> RuntimeFamily {
    let references = match metadata.enum_assembly_refs() {
        Ok(references) => references,
        Err(hr) => {
            debug!("Assembly references unavailable ({hr}), assuming .NET Framework");
            return RuntimeFamily::Framework;
        }
    };

    let references_core = references.into_iter().any(|reference| {
        metadata
            .assembly_ref_name(reference)
            .is_ok_and(|name| name.to_string_lossy() == core_library)
    });

    if references_core {
        RuntimeFamily::Core
    } else {
        RuntimeFamily::Framework
    }
}

/// Process-wide cache of the detected [`RuntimeFamily`].
#[derive(Debug)]
pub struct RuntimeDetector {
    core_library: String,
    family: OnceLock<RuntimeFamily>,
}

impl RuntimeDetector {
    /// Detector recognizing Core by references to `core_library`.
    pub fn new(core_library: impl Into<String>) -> Self {
        RuntimeDetector {
            core_library: core_library.into(),
            family: OnceLock::new(),
        }
    }

    /// The runtime family, detected from `metadata` on the first call and cached afterwards.
    pub fn family<M: MetadataImport + ?Sized>(&self, metadata: &M) -> RuntimeFamily {
        *self.family.get_or_init(|| {
            let family = detect(metadata, &self.core_library);
            info!("Detected runtime family: {family}");
            family
        })
    }

    /// The cached family, if detection already ran.
    #[must_use]
    pub fn cached(&self) -> Option<RuntimeFamily> {
        self.family.get().copied()
    }
}
