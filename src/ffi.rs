//! C exports forming the control surface of the loaded profiler.
//!
//! The managed probe assembly reaches the profiler through P/Invoke:
//!
//! ```csharp
//! [DllImport("dotprobe", CharSet = CharSet.Unicode)]
//! static extern int RequestReJIT(string assembly, string method);
//! [DllImport("dotprobe", CharSet = CharSet.Unicode)]
//! static extern int RemoveMethodToInstrument(string assembly, string method);
//! ```
//!
//! Both take NUL-terminated UTF-16 strings, `method` in `Type.Method` form, and return an
//! HRESULT. They act on the instance installed by [`load`].

use std::sync::Arc;

use log::{debug, info};
use widestring::U16CStr;

use crate::{
    config::ProfilerConfig,
    host::HResult,
    profiler::{global, Profiler},
    Error, Result,
};

/// Initialize logging and install a profiler configured from the environment.
///
/// Logging goes through `env_logger` and is controlled by `RUST_LOG`; a logger installed
/// earlier by the host process is left alone.
///
/// # Errors
/// Returns [`crate::Error::AlreadyInitialized`] if a profiler is already installed.
pub fn load() -> Result<Arc<Profiler>> {
    if env_logger::try_init().is_err() {
        debug!("Logger already installed, keeping it");
    }

    let config = ProfilerConfig::from_env();
    info!(
        "Loading profiler, probe {}!{}.{}",
        config.probe.assembly, config.probe.type_name, config.probe.method
    );
    global::install(Profiler::new(config))
}

/// Shut down and release the installed profiler, if any.
///
/// # Errors
/// Returns [`crate::Error::LockError`] if the instance slot or lifecycle lock is poisoned.
pub fn unload() -> Result<()> {
    match global::release()? {
        Some(profiler) => profiler.shutdown(),
        None => Ok(()),
    }
}

/// Read a NUL-terminated UTF-16 argument.
///
/// # Safety
/// `value` must be null or point to a readable NUL-terminated UTF-16 string.
unsafe fn argument(value: *const u16, name: &str) -> std::result::Result<String, HResult> {
    if value.is_null() {
        debug!("Control call with null {name}");
        return Err(HResult::E_POINTER);
    }
    Ok(U16CStr::from_ptr_str(value).to_string_lossy())
}

fn control(call: impl FnOnce(&Profiler) -> Result<()>) -> HResult {
    let Some(profiler) = global::current() else {
        return Error::NotInitialized.hresult();
    };

    match call(&profiler) {
        Ok(()) => HResult::S_OK,
        Err(error) => error.hresult(),
    }
}

/// Register `method` of `assembly` for instrumentation and re-JIT loaded matches.
///
/// # Safety
/// `assembly` and `method` must each be null or point to a readable NUL-terminated UTF-16
/// string.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn RequestReJIT(assembly: *const u16, method: *const u16) -> i32 {
    let (assembly, method) = match (argument(assembly, "assembly"), argument(method, "method")) {
        (Ok(assembly), Ok(method)) => (assembly, method),
        (Err(hr), _) | (_, Err(hr)) => return hr.0,
    };

    control(|profiler| profiler.request_rejit(&assembly, &method).map(|_| ())).0
}

/// Stop instrumenting `method` of `assembly`.
///
/// # Safety
/// `assembly` and `method` must each be null or point to a readable NUL-terminated UTF-16
/// string.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn RemoveMethodToInstrument(assembly: *const u16, method: *const u16) -> i32 {
    let (assembly, method) = match (argument(assembly, "assembly"), argument(method, "method")) {
        (Ok(assembly), Ok(method)) => (assembly, method),
        (Err(hr), _) | (_, Err(hr)) => return hr.0,
    };

    control(|profiler| profiler.remove_method(&assembly, &method).map(|_| ())).0
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use widestring::U16CString;

    use super::*;
    use crate::{
        profiler::global::tests::SLOT,
        test::host::{MockHost, MockModule},
    };

    fn wide(value: &str) -> U16CString {
        U16CString::from_str(value).unwrap()
    }

    #[test]
    fn null_arguments() {
        let method = wide("OrderService.Place");
        unsafe {
            assert_eq!(
                RequestReJIT(ptr::null(), method.as_ptr()),
                HResult::E_POINTER.0
            );
            assert_eq!(
                RemoveMethodToInstrument(method.as_ptr(), ptr::null()),
                HResult::E_POINTER.0
            );
        }
    }

    #[test]
    fn routes_to_the_installed_profiler() {
        let _guard = SLOT.lock().unwrap_or_else(|e| e.into_inner());
        unload().unwrap();

        let assembly = wide("MyApp.Orders");
        let method = wide("OrderService.Place");
        assert_eq!(
            unsafe { RequestReJIT(assembly.as_ptr(), method.as_ptr()) },
            Error::NotInitialized.hresult().0
        );

        let module = MockModule::new("MyApp.Orders");
        let service = module.add_type("OrderService", Some("System.Object"));
        let place = module.add_method(service, "Place", 0x0016, &[0x00, 0x00, 0x01], &[0x0A, 0x00, 0x2A]);
        let mut host = MockHost::new();
        let module_id = host.add_module(module);
        let host = Arc::new(host);

        let profiler = global::install(Profiler::new(ProfilerConfig::default())).unwrap();
        profiler.initialize(host.clone()).unwrap();

        assert_eq!(
            unsafe { RequestReJIT(assembly.as_ptr(), method.as_ptr()) },
            HResult::S_OK.0
        );
        assert_eq!(host.rejit_requests(), vec![(module_id, place)]);

        assert_eq!(
            unsafe { RemoveMethodToInstrument(assembly.as_ptr(), method.as_ptr()) },
            HResult::S_OK.0
        );
        assert!(profiler.registry().is_empty());

        unload().unwrap();
        assert!(global::current().is_none());
        assert_eq!(
            profiler.request_rejit("MyApp.Orders", "OrderService.Place").unwrap_err().hresult(),
            Error::ShuttingDown.hresult()
        );
    }
}
