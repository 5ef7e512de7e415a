//! Metadata primitives for instrumenting .NET methods.
//!
//! This module contains the ECMA-335 building blocks the rewriter works with. It does not load
//! assemblies; every blob it parses comes from the runtime's metadata interfaces.
//!
//! # Key Components
//!
//! - [`token`] - Metadata table row references used throughout .NET
//! - [`method`] - Method body headers, exception clauses and attribute flags
//! - [`signatures`] - Method and local variable signature blobs
//!
//! # Examples
//!
//! ```rust
//! use dotprobe::metadata::{method::MethodBody, signatures::parse_method_signature};
//!
//! let body = MethodBody::from(&[0x06, 0x00, 0x2A])?;
//! assert_eq!(body.size_code, 1);
//!
//! let signature = parse_method_signature(&[0x00, 0x01, 0x01, 0x0E])?;
//! assert_eq!(signature.params.len(), 1);
//! # Ok::<(), dotprobe::Error>(())
//! ```

/// Implementation of the method header and exception sections of CIL
pub mod method;
/// Implementation of method and local variable signatures
pub mod signatures;
/// Commonly used metadata token type
pub mod token;
