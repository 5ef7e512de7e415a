use crate::{
    metadata::{
        signatures::{BlobReader, CALLING_CONVENTION, ELEMENT_TYPE},
        token::{Token, TABLE},
    },
    Error, Result,
};

/// `object[]` as a type in a signature blob
pub const OBJECT_ARRAY: [u8; 2] = [ELEMENT_TYPE::SZARRAY, ELEMENT_TYPE::OBJECT];

/// Signature of the probe method: static `void (string, object[])`
pub const PROBE_SIGNATURE: [u8; 6] = [
    CALLING_CONVENTION::DEFAULT,
    0x02,
    ELEMENT_TYPE::VOID,
    ELEMENT_TYPE::STRING,
    ELEMENT_TYPE::SZARRAY,
    ELEMENT_TYPE::OBJECT,
];

/// Highest local count addressable by `ldloc`/`stloc`
const MAX_LOCALS: u32 = 0xFFFE;

/// A local variable signature extended by one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalsSignature {
    /// The complete `LocalVarSig` blob
    pub blob: Vec<u8>,
    /// Index of the appended local
    pub index: u16,
}

/// Encode `value` as a compressed unsigned integer (ECMA-335 II.23.2).
///
/// # Errors
/// Returns [`crate::Error::InvalidArgument`] for values above `0x1FFF_FFFF`.
pub fn encode_compressed_uint(value: u32, out: &mut Vec<u8>) -> Result<()> {
    match value {
        0..=0x7F => out.push(value as u8),
        0x80..=0x3FFF => {
            out.push(((value >> 8) as u8) | 0x80);
            out.push(value as u8);
        }
        0x4000..=0x1FFF_FFFF => {
            out.push(((value >> 24) as u8) | 0xC0);
            out.push((value >> 16) as u8);
            out.push((value >> 8) as u8);
            out.push(value as u8);
        }
        _ => {
            return Err(Error::InvalidArgument(format!(
                "{value:#x} cannot be compressed"
            )))
        }
    }
    Ok(())
}

/// Build a `LocalVarSig` holding the locals of `original` followed by one local of type `local`.
///
/// Existing local types are copied byte for byte so their indices stay valid. `original` is
/// `None` for methods without locals.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `original` is not a local signature, or
/// [`crate::Error::InvalidArgument`] if no further local can be addressed.
///
/// # Examples
///
/// ```rust
/// use dotprobe::metadata::signatures::{append_local, OBJECT_ARRAY};
///
/// // Two locals (int32, string) -> three, the new one at index 2
/// let locals = append_local(Some(&[0x07, 0x02, 0x08, 0x0E]), &OBJECT_ARRAY)?;
/// assert_eq!(locals.index, 2);
/// assert_eq!(locals.blob, vec![0x07, 0x03, 0x08, 0x0E, 0x1D, 0x1C]);
/// # Ok::<(), dotprobe::Error>(())
/// ```
pub fn append_local(original: Option<&[u8]>, local: &[u8]) -> Result<LocalsSignature> {
    let (count, types) = match original {
        Some(data) => {
            let mut reader = BlobReader::new(data);
            let kind = reader.read_u8()?;
            if kind != CALLING_CONVENTION::LOCAL_SIG {
                return Err(malformed_error!(
                    "Not a local variable signature - {:#x}",
                    kind
                ));
            }

            (reader.read_compressed_uint()?, reader.remaining())
        }
        None => (0, &[][..]),
    };

    if count >= MAX_LOCALS {
        return Err(Error::InvalidArgument(format!(
            "method already declares {count} locals"
        )));
    }

    let mut blob = Vec::with_capacity(types.len() + local.len() + 5);
    blob.push(CALLING_CONVENTION::LOCAL_SIG);
    encode_compressed_uint(count + 1, &mut blob)?;
    blob.extend_from_slice(types);
    blob.extend_from_slice(local);

    Ok(LocalsSignature {
        blob,
        index: count as u16,
    })
}

/// Encode `token` as a `TypeDefOrRefOrSpecEncoded` value (ECMA-335 II.23.2.8).
///
/// # Errors
/// Returns [`crate::Error::InvalidArgument`] for tokens of other tables or rows too large to
/// compress.
pub fn encode_compressed_token(token: Token, out: &mut Vec<u8>) -> Result<()> {
    let tag = match token.table() {
        TABLE::TYPE_DEF => 0x0,
        TABLE::TYPE_REF => 0x1,
        TABLE::TYPE_SPEC => 0x2,
        _ => {
            return Err(Error::InvalidArgument(format!(
                "{token} is not a TypeDef, TypeRef or TypeSpec"
            )))
        }
    };

    encode_compressed_uint((token.row() << 2) | tag, out)
}

/// Signature of a generic value type instantiated over its own type parameters,
/// `GENERICINST VALUETYPE <type_def> n VAR 0 .. VAR n-1`.
///
/// Inside the type's own methods this names the type of `this`.
///
/// # Errors
/// Returns [`crate::Error::InvalidArgument`] if `type_def` cannot be encoded or `params` is 0.
pub fn open_generic_value_type(type_def: Token, params: u32) -> Result<Vec<u8>> {
    if params == 0 {
        return Err(Error::InvalidArgument(format!(
            "{type_def} declares no generic parameters"
        )));
    }

    let mut blob = vec![ELEMENT_TYPE::GENERICINST, ELEMENT_TYPE::VALUETYPE];
    encode_compressed_token(type_def, &mut blob)?;
    encode_compressed_uint(params, &mut blob)?;
    for index in 0..params {
        blob.push(ELEMENT_TYPE::VAR);
        encode_compressed_uint(index, &mut blob)?;
    }
    Ok(blob)
}
