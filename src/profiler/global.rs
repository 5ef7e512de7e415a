//! The process-wide profiler instance.
//!
//! The runtime loads one profiler per process and the control surface exports carry no context
//! pointer, so the instance lives in a static slot. It is installed when the plugin is loaded
//! and released when it is unloaded; everything else works on a borrowed `&Profiler`.

use std::sync::{Arc, RwLock};

use crate::{profiler::Profiler, Error, Result};

static PROFILER: RwLock<Option<Arc<Profiler>>> = RwLock::new(None);

/// Install `profiler` as the process-wide instance.
///
/// # Errors
/// Returns [`crate::Error::AlreadyInitialized`] if an instance is already installed, or
/// [`crate::Error::LockError`] if the slot is poisoned.
pub fn install(profiler: Profiler) -> Result<Arc<Profiler>> {
    let mut slot = write_lock!(PROFILER)?;
    if slot.is_some() {
        return Err(Error::AlreadyInitialized);
    }

    let profiler = Arc::new(profiler);
    *slot = Some(Arc::clone(&profiler));
    Ok(profiler)
}

/// The installed instance, if any
#[must_use]
pub fn current() -> Option<Arc<Profiler>> {
    read_lock!(PROFILER).ok().and_then(|slot| slot.clone())
}

/// Remove the installed instance, returning it.
///
/// # Errors
/// Returns [`crate::Error::LockError`] if the slot is poisoned.
pub fn release() -> Result<Option<Arc<Profiler>>> {
    Ok(write_lock!(PROFILER)?.take())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::ProfilerConfig;

    /// Serializes tests touching the process-wide slot
    pub(crate) static SLOT: Mutex<()> = Mutex::new(());

    #[test]
    fn install_current_release() {
        let _guard = SLOT.lock().unwrap_or_else(|e| e.into_inner());
        release().unwrap();

        assert!(current().is_none());
        let installed = install(Profiler::new(ProfilerConfig::default())).unwrap();
        assert!(Arc::ptr_eq(&installed, &current().unwrap()));

        assert!(matches!(
            install(Profiler::new(ProfilerConfig::default())),
            Err(Error::AlreadyInitialized)
        ));

        let released = release().unwrap().unwrap();
        assert!(Arc::ptr_eq(&installed, &released));
        assert!(current().is_none());
        assert!(release().unwrap().is_none());
    }
}
