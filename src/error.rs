use thiserror::Error;

use crate::host::HResult;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure is scoped to a single operation: a failed rewrite leaves the method with its
/// original body, a failed activation leaves the registry entry in place, and nothing in here is
/// fatal to the hosting process. [`Error::hresult`] translates each variant into the status code
/// that is handed back to the runtime.
///
/// # Error Categories
///
/// ## Rewriting Errors
/// - [`Error::InvalidArgument`] - Descriptor or collaborator is unusable
/// - [`Error::BufferOverflow`] - Emission would exceed the pre-sized rewrite buffer
/// - [`Error::TooManyArguments`] - Argument count above the safety cap
/// - [`Error::MetadataResolution`] - A token, reference or signature could not be resolved
/// - [`Error::HostRejected`] - The runtime refused the submitted body
///
/// ## Parsing Errors
/// - [`Error::Malformed`] - Corrupted method header or signature blob
/// - [`Error::OutOfBounds`] - Attempted to read beyond a blob
/// - [`Error::DescriptorExtractionFailed`] - Method metadata lookup failed
///
/// ## Lifecycle Errors
/// - [`Error::AlreadyInitialized`], [`Error::NotInitialized`], [`Error::ShuttingDown`]
/// - [`Error::LockError`] - Thread synchronization failure
///
/// # Examples
///
/// ```rust
/// use dotprobe::Error;
///
/// let err = Error::TooManyArguments(1025);
/// assert!(err.hresult().is_failure());
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A descriptor or collaborator handed to an operation is unusable.
    ///
    /// Raised when argument type information does not line up with the declared argument count,
    /// or when a required name is empty.
    #[error("Invalid argument - {0}")]
    InvalidArgument(String),

    /// Emitting the next instruction would exceed the pre-sized rewrite buffer.
    ///
    /// The buffer is allocated once and never grows; running out of room fails the rewrite
    /// cleanly instead of truncating the body.
    #[error("IL buffer overflow - needed {needed} bytes at offset {offset}, capacity {capacity}")]
    BufferOverflow {
        /// Number of bytes the failed write needed
        needed: usize,
        /// Cursor position at the time of the write
        offset: usize,
        /// Allocated capacity of the buffer
        capacity: usize,
    },

    /// A reference, token or signature could not be resolved by the metadata collaborator.
    #[error("Failed to resolve {what} - {hr}")]
    MetadataResolution {
        /// Which reference was being resolved
        what: String,
        /// Status returned by the collaborator
        hr: HResult,
    },

    /// The runtime refused the submitted method body, e.g. because it failed verification.
    #[error("The runtime rejected the new method body - {0}")]
    HostRejected(HResult),

    /// The method declares more arguments than the rewriter is willing to stage.
    ///
    /// The associated value is the declared argument count.
    #[error("Too many arguments to instrument - {0}")]
    TooManyArguments(usize),

    /// Method metadata required to describe a method could not be obtained.
    ///
    /// Callers treat this as "not eligible"; it exists so the skipped method can be diagnosed.
    #[error("Failed to extract method descriptor: {what} - {hr}")]
    DescriptorExtractionFailed {
        /// Which lookup failed
        what: String,
        /// Status returned by the runtime
        hr: HResult,
    },

    /// A method header or signature blob is damaged and could not be parsed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing a blob.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// `initialize` was called on a profiler that already left the `Uninitialized` state.
    #[error("The profiler is already initialized")]
    AlreadyInitialized,

    /// An operation needing the runtime interface ran before `initialize`.
    #[error("The profiler is not initialized")]
    NotInitialized,

    /// The profiler is shutting down and refuses further work.
    #[error("The profiler is shutting down")]
    ShuttingDown,

    /// Failed to lock target.
    ///
    /// A thread panicked while holding the lock, leaving it poisoned.
    #[error("Failed to lock target")]
    LockError,
}

impl Error {
    /// Status code reported back to the runtime for this error.
    #[must_use]
    pub fn hresult(&self) -> HResult {
        match self {
            Error::InvalidArgument(_) | Error::TooManyArguments(_) => HResult::E_INVALIDARG,
            Error::BufferOverflow { .. } => HResult::E_OUTOFMEMORY,
            Error::MetadataResolution { hr, .. }
            | Error::DescriptorExtractionFailed { hr, .. }
            | Error::HostRejected(hr) => {
                if hr.is_failure() {
                    *hr
                } else {
                    HResult::E_FAIL
                }
            }
            Error::NotInitialized | Error::ShuttingDown => HResult::E_UNEXPECTED,
            Error::Malformed { .. }
            | Error::OutOfBounds
            | Error::AlreadyInitialized
            | Error::LockError => HResult::E_FAIL,
        }
    }
}
