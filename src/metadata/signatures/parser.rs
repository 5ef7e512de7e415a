use crate::{
    metadata::{
        signatures::{
            MethodSignature, SignatureParameter, TypeSignature, CALLING_CONVENTION, ELEMENT_TYPE,
        },
        token::Token,
    },
    Error::OutOfBounds,
    Result,
};

/// Nesting limit for type signatures; deeper blobs are rejected as malformed
const MAX_RECURSION_DEPTH: usize = 50;

/// Sequential reader over a signature blob.
pub struct BlobReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BlobReader<'a> {
    /// Reader positioned at the start of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        BlobReader { data, position: 0 }
    }

    /// Current read offset
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns `true` while unread bytes remain
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// The unread tail of the blob
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    /// Bytes between `start` and the current position
    #[must_use]
    pub fn slice_from(&self, start: usize) -> &'a [u8] {
        &self.data[start.min(self.position)..self.position]
    }

    /// Read one byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the blob.
    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.position).ok_or(OutOfBounds)?;
        self.position += 1;
        Ok(byte)
    }

    /// Look at the next byte without consuming it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the blob.
    pub fn peek_u8(&self) -> Result<u8> {
        self.data.get(self.position).copied().ok_or(OutOfBounds)
    }

    /// Read a compressed unsigned integer as defined in ECMA-335 II.23.2.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the blob ends early or
    /// [`crate::Error::Malformed`] for an invalid leading byte.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_u8()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_u8()?;
            let value = ((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte);
            return Ok(value);
        }

        // 4-byte encoding: 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_u8()?);
            let b2 = u32::from(self.read_u8()?);
            let b3 = u32::from(self.read_u8()?);
            let value = ((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3;
            return Ok(value);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a `TypeDefOrRefOrSpecEncoded` token (ECMA-335 II.23.2.8).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid table tag.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table: u32 = match compressed_token & 0x3 {
            0x0 => 0x0200_0000, // TypeDef
            0x1 => 0x0100_0000, // TypeRef
            0x2 => 0x1B00_0000, // TypeSpec
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::new(table + (compressed_token >> 2)))
    }
}

/// Parse a `MethodDefSig` blob.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged blobs.
///
/// # Examples
///
/// ```rust
/// use dotprobe::metadata::signatures::{parse_method_signature, TypeSignature};
///
/// // instance void (int32, string)
/// let signature = parse_method_signature(&[0x20, 0x02, 0x01, 0x08, 0x0E])?;
/// assert!(signature.has_this);
/// assert_eq!(signature.params.len(), 2);
/// assert_eq!(signature.params[0].base, TypeSignature::I4);
/// # Ok::<(), dotprobe::Error>(())
/// ```
pub fn parse_method_signature(data: &[u8]) -> Result<MethodSignature> {
    let mut parser = SignatureParser::new(data);
    parser.parse_method_signature()
}

struct SignatureParser<'a> {
    reader: BlobReader<'a>,
    depth: usize,
}

impl<'a> SignatureParser<'a> {
    fn new(data: &'a [u8]) -> Self {
        SignatureParser {
            reader: BlobReader::new(data),
            depth: 0,
        }
    }

    fn parse_method_signature(&mut self) -> Result<MethodSignature> {
        let convention = self.reader.read_u8()?;
        let generic_param_count = if convention & CALLING_CONVENTION::GENERIC != 0 {
            self.reader.read_compressed_uint()?
        } else {
            0
        };

        let param_count = self.reader.read_compressed_uint()?;
        let return_type = self.parse_parameter()?;

        // Bounded by the blob length, not by the declared count
        let mut params = Vec::with_capacity((param_count as usize).min(self.reader.remaining().len()));
        for _ in 0..param_count {
            if self.reader.peek_u8()? == ELEMENT_TYPE::SENTINEL {
                self.reader.read_u8()?;
            }
            params.push(self.parse_parameter()?);
        }

        Ok(MethodSignature {
            has_this: convention & CALLING_CONVENTION::HASTHIS != 0,
            explicit_this: convention & CALLING_CONVENTION::EXPLICITTHIS != 0,
            generic_param_count,
            return_type,
            params,
        })
    }

    fn parse_parameter(&mut self) -> Result<SignatureParameter> {
        self.skip_custom_mods()?;

        let by_ref = self.reader.peek_u8()? == ELEMENT_TYPE::BYREF;
        if by_ref {
            self.reader.read_u8()?;
            self.skip_custom_mods()?;
        }

        let start = self.reader.position();
        let base = self.parse_type()?;
        let blob = self.reader.slice_from(start).to_vec();

        Ok(SignatureParameter { by_ref, base, blob })
    }

    fn parse_type(&mut self) -> Result<TypeSignature> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(malformed_error!(
                "Signature nesting exceeds {} levels",
                MAX_RECURSION_DEPTH
            ));
        }

        let current_byte = self.reader.read_u8()?;
        let parsed = match current_byte {
            ELEMENT_TYPE::VOID => TypeSignature::Void,
            ELEMENT_TYPE::BOOLEAN => TypeSignature::Boolean,
            ELEMENT_TYPE::CHAR => TypeSignature::Char,
            ELEMENT_TYPE::I1 => TypeSignature::I1,
            ELEMENT_TYPE::U1 => TypeSignature::U1,
            ELEMENT_TYPE::I2 => TypeSignature::I2,
            ELEMENT_TYPE::U2 => TypeSignature::U2,
            ELEMENT_TYPE::I4 => TypeSignature::I4,
            ELEMENT_TYPE::U4 => TypeSignature::U4,
            ELEMENT_TYPE::I8 => TypeSignature::I8,
            ELEMENT_TYPE::U8 => TypeSignature::U8,
            ELEMENT_TYPE::R4 => TypeSignature::R4,
            ELEMENT_TYPE::R8 => TypeSignature::R8,
            ELEMENT_TYPE::I => TypeSignature::I,
            ELEMENT_TYPE::U => TypeSignature::U,
            ELEMENT_TYPE::STRING => TypeSignature::String,
            ELEMENT_TYPE::OBJECT => TypeSignature::Object,
            ELEMENT_TYPE::TYPEDBYREF => TypeSignature::TypedByRef,
            ELEMENT_TYPE::PTR => {
                self.skip_custom_mods()?;
                TypeSignature::Ptr(Box::new(self.parse_type()?))
            }
            ELEMENT_TYPE::BYREF => TypeSignature::ByRef(Box::new(self.parse_type()?)),
            ELEMENT_TYPE::VALUETYPE => TypeSignature::ValueType(self.reader.read_compressed_token()?),
            ELEMENT_TYPE::CLASS => TypeSignature::Class(self.reader.read_compressed_token()?),
            ELEMENT_TYPE::VAR => TypeSignature::GenericParamType(self.reader.read_compressed_uint()?),
            ELEMENT_TYPE::MVAR => {
                TypeSignature::GenericParamMethod(self.reader.read_compressed_uint()?)
            }
            ELEMENT_TYPE::ARRAY => {
                let elem_type = self.parse_type()?;
                let rank = self.reader.read_compressed_uint()?;

                let num_sizes = self.reader.read_compressed_uint()?;
                for _ in 0..num_sizes {
                    self.reader.read_compressed_uint()?;
                }

                // Lower bounds are signed, but share the unsigned length encoding
                let num_lo_bounds = self.reader.read_compressed_uint()?;
                for _ in 0..num_lo_bounds {
                    self.reader.read_compressed_uint()?;
                }

                TypeSignature::Array(Box::new(elem_type), rank)
            }
            ELEMENT_TYPE::GENERICINST => {
                let peek_byte = self.reader.peek_u8()?;
                if peek_byte != ELEMENT_TYPE::CLASS && peek_byte != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        peek_byte
                    ));
                }

                let base_type = self.parse_type()?;
                let arg_count = self.reader.read_compressed_uint()?;

                let mut type_args = Vec::new();
                for _ in 0..arg_count {
                    type_args.push(self.parse_type()?);
                }

                TypeSignature::GenericInst(Box::new(base_type), type_args)
            }
            ELEMENT_TYPE::FNPTR => {
                self.parse_method_signature()?;
                TypeSignature::FnPtr
            }
            ELEMENT_TYPE::SZARRAY => {
                self.skip_custom_mods()?;
                TypeSignature::SzArray(Box::new(self.parse_type()?))
            }
            ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
                self.reader.read_compressed_token()?;
                self.parse_type()?
            }
            ELEMENT_TYPE::PINNED => self.parse_type()?,
            _ => {
                return Err(malformed_error!(
                    "Unsupported ELEMENT_TYPE - {}",
                    current_byte
                ))
            }
        };

        self.depth -= 1;
        Ok(parsed)
    }

    fn skip_custom_mods(&mut self) -> Result<()> {
        while self.reader.has_more_data() {
            let next_byte = self.reader.peek_u8()?;
            if next_byte != ELEMENT_TYPE::CMOD_OPT && next_byte != ELEMENT_TYPE::CMOD_REQD {
                break;
            }

            self.reader.read_u8()?;
            self.reader.read_compressed_token()?;
        }
        Ok(())
    }
}
