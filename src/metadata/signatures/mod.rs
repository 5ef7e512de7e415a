//! Method and local variable signature blobs (ECMA-335 II.23.2).
//!
//! The rewriter needs three things from signatures: the argument list of the method being
//! instrumented (to decide how each argument is staged), the local variable list (to append the
//! `object[]` slot) and the fixed signature of the probe it calls.
//!
//! # Key Components
//!
//! - [`parse_method_signature`] - Walks a `MethodDefSig` into a [`MethodSignature`]
//! - [`TypeSignature`] - The parsed shape of one type in a signature
//! - [`append_local`] - Extends a `LocalVarSig` by one local
//! - [`PROBE_SIGNATURE`] - `void (string, object[])`

mod encoders;
mod parser;

pub use encoders::{
    append_local, encode_compressed_token, encode_compressed_uint, open_generic_value_type,
    LocalsSignature, OBJECT_ARRAY, PROBE_SIGNATURE,
};
pub use parser::{parse_method_signature, BlobReader};

use crate::metadata::token::Token;

/// Element type markers of signature blobs
#[allow(non_snake_case, missing_docs)]
pub mod ELEMENT_TYPE {
    //Marks end of a list
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    // Followed by type
    pub const PTR: u8 = 0x0f;
    // Followed by type
    pub const BYREF: u8 = 0x10;
    // Followed by TypeDef or TypeRef token
    pub const VALUETYPE: u8 = 0x11;
    // Followed by TypeDef or TypeRef token
    pub const CLASS: u8 = 0x12;
    // Generic parameter in a generic type definition, represented as number
    pub const VAR: u8 = 0x13;
    // type rank boundsCount bound1 … loCount lo1 …
    pub const ARRAY: u8 = 0x14;
    // Generic type instantiation. Followed by type type-arg-count type-1 ... type-n
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    // System.IntPtr
    pub const I: u8 = 0x18;
    // System.UIntPtr
    pub const U: u8 = 0x19;
    // Followed by full method signature
    pub const FNPTR: u8 = 0x1b;
    // System.Object
    pub const OBJECT: u8 = 0x1c;
    // Single-dim array with 0 lower bound
    pub const SZARRAY: u8 = 0x1d;
    // Generic parameter in a generic method definition,represented as number
    pub const MVAR: u8 = 0x1e;
    // Required modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_REQD: u8 = 0x1f;
    // Optional modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_OPT: u8 = 0x20;
    // Sentinel for vararg method signature
    pub const SENTINEL: u8 = 0x41;
    // Denotes a local variable that points at a pinned object
    pub const PINNED: u8 = 0x45;
}

/// Calling convention bits of the first byte of a method signature
#[allow(non_snake_case, missing_docs)]
pub mod CALLING_CONVENTION {
    pub const DEFAULT: u8 = 0x00;
    pub const VARARG: u8 = 0x05;
    pub const GENERIC: u8 = 0x10;
    pub const HASTHIS: u8 = 0x20;
    pub const EXPLICITTHIS: u8 = 0x40;
    /// Marks a `LocalVarSig`
    pub const LOCAL_SIG: u8 = 0x07;
}

/// The parsed shape of a type inside a signature.
///
/// Only the distinctions that matter for staging a value into an `object[]` are kept; array
/// bounds are skipped and function pointer signatures are read but discarded.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSignature {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    I,
    U,
    String,
    Object,
    TypedByRef,
    Class(Token),
    ValueType(Token),
    GenericParamType(u32),
    GenericParamMethod(u32),
    /// Instantiated generic type: base type and type arguments
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    SzArray(Box<TypeSignature>),
    Array(Box<TypeSignature>, u32),
    Ptr(Box<TypeSignature>),
    FnPtr,
    ByRef(Box<TypeSignature>),
}

impl TypeSignature {
    /// Name of the base library type a primitive boxes into, `None` for anything else.
    #[must_use]
    pub fn primitive_name(&self) -> Option<&'static str> {
        let name = match self {
            TypeSignature::Boolean => "System.Boolean",
            TypeSignature::Char => "System.Char",
            TypeSignature::I1 => "System.SByte",
            TypeSignature::U1 => "System.Byte",
            TypeSignature::I2 => "System.Int16",
            TypeSignature::U2 => "System.UInt16",
            TypeSignature::I4 => "System.Int32",
            TypeSignature::U4 => "System.UInt32",
            TypeSignature::I8 => "System.Int64",
            TypeSignature::U8 => "System.UInt64",
            TypeSignature::R4 => "System.Single",
            TypeSignature::R8 => "System.Double",
            TypeSignature::I => "System.IntPtr",
            TypeSignature::U => "System.UIntPtr",
            _ => return None,
        };
        Some(name)
    }

    /// Returns `true` for generic instantiations over a value type, e.g. `Nullable<int>`.
    #[must_use]
    pub fn is_generic_value_type(&self) -> bool {
        matches!(self, TypeSignature::GenericInst(base, _) if matches!(**base, TypeSignature::ValueType(_)))
    }
}

/// One parameter (or the return type) of a method signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParameter {
    /// Passed by reference (`ref`, `out`, `in`)
    pub by_ref: bool,
    /// The type, without custom modifiers and without the by-ref marker
    pub base: TypeSignature,
    /// Encoded bytes of `base`, usable as a `TypeSpec` blob
    pub blob: Vec<u8>,
}

/// A parsed `MethodDefSig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    /// Instance method, the receiver is argument 0
    pub has_this: bool,
    /// The receiver is listed explicitly as the first parameter
    pub explicit_this: bool,
    /// Number of generic method parameters
    pub generic_param_count: u32,
    /// Return type
    pub return_type: SignatureParameter,
    /// Declared parameters, excluding the implicit receiver
    pub params: Vec<SignatureParameter>,
}
