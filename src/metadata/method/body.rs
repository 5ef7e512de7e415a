//! Representation, parsing and emission of CIL method body headers.
//!
//! This module decodes tiny and fat method headers together with their exception handling
//! sections, and writes the fat header and exception section of a rewritten body. The code bytes
//! between header and sections are never interpreted here.
//!
//! # Examples
//!
//! ```rust
//! use dotprobe::metadata::method::MethodBody;
//!
//! // Tiny header: 2 bytes of code (ldarg.0; ret)
//! let data = [0x0A, 0x02, 0x2A];
//! let body = MethodBody::from(&data)?;
//! assert!(!body.is_fat);
//! assert_eq!(body.size_code, 2);
//! assert_eq!(body.code(&data), &[0x02, 0x2A]);
//! # Ok::<(), dotprobe::Error>(())
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use crate::{
    assembly::RewriteBuffer,
    io::{read_le, read_le_at},
    metadata::{
        method::{
            ExceptionHandler, ExceptionHandlerFlags, MethodBodyFlags, SectionFlags,
            FAT_CLAUSE_SIZE, SECTION_HEADER_SIZE, SMALL_CLAUSE_SIZE,
        },
        token::Token,
    },
    Error::OutOfBounds,
    Result,
};

/// Size of a fat method header in bytes
pub const FAT_HEADER_SIZE: usize = 12;

/// Operand stack depth implied by a tiny header
pub const TINY_MAX_STACK: usize = 8;

/// Describes one method that has been compiled to CIL bytecode.
///
/// The `MethodBody` struct represents the parsed body of a .NET method, including header information,
/// code size, stack requirements, local variable signature, and exception handling regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Size of the method (length of all instructions, not counting the header) in bytes
    pub size_code: usize,
    /// Size of the method header in bytes
    pub size_header: usize,
    /// `MetaData` token for a signature describing the layout of the local variables for the method. 0 == no local variables
    pub local_var_sig_token: u32,
    /// Maximum number of items on the operand stack
    pub max_stack: usize,
    /// Flag, indicating the type of the method header
    pub is_fat: bool,
    /// Flag, indicating to call default constructor on all local variables
    pub is_init_local: bool,
    /// Flag, indicating if this method does have exception handlers
    pub is_exception_data: bool,
    /// A list of exception handlers this method has
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Create a `MethodBody` object from a sequence of bytes.
    ///
    /// # Arguments
    /// * `data` - The byte slice from which this object shall be created
    ///
    /// # Errors
    /// Returns an error if the data is empty, out of bounds, or malformed.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: 0,
                    max_stack: TINY_MAX_STACK,
                    is_fat: false,
                    is_init_local: false,
                    is_exception_data: false,
                    exception_handlers: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < FAT_HEADER_SIZE {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;

                let size_header = ((first_duo >> 12) * 4) as usize;
                if size_header < FAT_HEADER_SIZE {
                    return Err(malformed_error!(
                        "Fat method header declares {} bytes",
                        size_header
                    ));
                }

                let size_code = read_le::<u32>(&data[4..])? as usize;
                if data.len() < size_code + size_header {
                    return Err(OutOfBounds);
                }

                let local_var_sig_token = read_le::<u32>(&data[8..])?;
                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000111111111111_u16);
                let max_stack = read_le::<u16>(&data[2..])? as usize;

                let is_init_local = flags_header.contains(MethodBodyFlags::INIT_LOCALS);

                // Exception Handling -> II.25.4.6
                // The extra sections currently can only contain exception handling data
                let mut exception_handlers = Vec::new();
                if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    let mut cursor = size_header + size_code;
                    cursor = (cursor + 3) & !3;

                    loop {
                        if data.len() < cursor + SECTION_HEADER_SIZE {
                            return Err(OutOfBounds);
                        }

                        let section_start = cursor;
                        let section_flags =
                            SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
                        if !section_flags.contains(SectionFlags::EHTABLE) {
                            return Err(malformed_error!(
                                "Unsupported method data section - {:#04x}",
                                section_flags.bits()
                            ));
                        }

                        let is_fat_section = section_flags.contains(SectionFlags::FAT_FORMAT);
                        let (section_size, clause_size) = if is_fat_section {
                            (
                                (read_le::<u32>(&data[cursor..])? >> 8) as usize,
                                FAT_CLAUSE_SIZE,
                            )
                        } else {
                            (
                                read_le::<u8>(&data[cursor + 1..])? as usize,
                                SMALL_CLAUSE_SIZE,
                            )
                        };

                        if section_size < SECTION_HEADER_SIZE {
                            return Err(malformed_error!(
                                "Exception section declares {} bytes",
                                section_size
                            ));
                        }
                        if data.len() < section_start + section_size {
                            return Err(OutOfBounds);
                        }

                        cursor += SECTION_HEADER_SIZE;
                        for _ in 0..(section_size - SECTION_HEADER_SIZE) / clause_size {
                            let handler = if is_fat_section {
                                // Intentionally truncating u32 to u16 for exception handler flags
                                #[allow(clippy::cast_possible_truncation)]
                                let flags = read_le_at::<u32>(data, &mut cursor)? as u16;
                                ExceptionHandler {
                                    flags: ExceptionHandlerFlags::from_bits_truncate(flags),
                                    try_offset: read_le_at::<u32>(data, &mut cursor)?,
                                    try_length: read_le_at::<u32>(data, &mut cursor)?,
                                    handler_offset: read_le_at::<u32>(data, &mut cursor)?,
                                    handler_length: read_le_at::<u32>(data, &mut cursor)?,
                                    filter_offset: read_le_at::<u32>(data, &mut cursor)?,
                                }
                            } else {
                                ExceptionHandler {
                                    flags: ExceptionHandlerFlags::from_bits_truncate(
                                        read_le_at::<u16>(data, &mut cursor)?,
                                    ),
                                    try_offset: u32::from(read_le_at::<u16>(data, &mut cursor)?),
                                    try_length: u32::from(read_le_at::<u8>(data, &mut cursor)?),
                                    handler_offset: u32::from(read_le_at::<u16>(
                                        data,
                                        &mut cursor,
                                    )?),
                                    handler_length: u32::from(read_le_at::<u8>(data, &mut cursor)?),
                                    filter_offset: read_le_at::<u32>(data, &mut cursor)?,
                                }
                            };
                            exception_handlers.push(handler);
                        }

                        if !section_flags.contains(SectionFlags::MORE_SECTS) {
                            break;
                        }
                        cursor = (section_start + section_size + 3) & !3;
                    }
                }

                Ok(MethodBody {
                    size_code,
                    size_header,
                    local_var_sig_token,
                    max_stack,
                    is_fat: true,
                    is_init_local,
                    is_exception_data: !exception_handlers.is_empty(),
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Get the full size of this method, header and code
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// The instruction bytes of `data`, the same slice this body was parsed from.
    ///
    /// The range was validated by [`MethodBody::from`]; a shorter `data` yields what remains.
    #[must_use]
    pub fn code<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = self.size_header.min(data.len());
        let end = self.size().min(data.len());
        &data[start..end]
    }
}

/// The 12 bytes of a fat method header.
///
/// `has_sections` sets `MORE_SECTS`, announcing an exception section after the code.
#[must_use]
pub fn encode_fat_header(
    max_stack: u16,
    code_size: u32,
    local_var_sig: Token,
    init_locals: bool,
    has_sections: bool,
) -> [u8; FAT_HEADER_SIZE] {
    let mut flags = MethodBodyFlags::FAT_FORMAT;
    if init_locals {
        flags |= MethodBodyFlags::INIT_LOCALS;
    }
    if has_sections {
        flags |= MethodBodyFlags::MORE_SECTS;
    }
    let flags_and_size = flags.bits() | (((FAT_HEADER_SIZE / 4) as u16) << 12);

    let mut header = [0_u8; FAT_HEADER_SIZE];
    header[0..2].copy_from_slice(&flags_and_size.to_le_bytes());
    header[2..4].copy_from_slice(&max_stack.to_le_bytes());
    header[4..8].copy_from_slice(&code_size.to_le_bytes());
    header[8..12].copy_from_slice(&local_var_sig.to_le_bytes());
    header
}

/// Append `handlers` as one exception section, 4-byte aligned after the code.
///
/// The small format is kept when every clause and the section size fit into it; otherwise the
/// fat format is written. Nothing is written for an empty slice.
///
/// # Errors
/// Returns [`crate::Error::BufferOverflow`] if the section does not fit, or
/// [`crate::Error::Malformed`] if there are more clauses than a fat section can describe.
pub fn write_exception_section(
    buffer: &mut RewriteBuffer,
    handlers: &[ExceptionHandler],
) -> Result<()> {
    if handlers.is_empty() {
        return Ok(());
    }

    buffer.align(4)?;

    let small_size = SECTION_HEADER_SIZE + handlers.len() * SMALL_CLAUSE_SIZE;
    if small_size <= usize::from(u8::MAX) && handlers.iter().all(ExceptionHandler::fits_small) {
        let mut section = Vec::with_capacity(small_size);
        section.extend_from_slice(&[SectionFlags::EHTABLE.bits(), small_size as u8, 0, 0]);
        for handler in handlers {
            section.extend_from_slice(&handler.flags.bits().to_le_bytes());
            section.extend_from_slice(&(handler.try_offset as u16).to_le_bytes());
            section.push(handler.try_length as u8);
            section.extend_from_slice(&(handler.handler_offset as u16).to_le_bytes());
            section.push(handler.handler_length as u8);
            section.extend_from_slice(&handler.filter_offset.to_le_bytes());
        }
        return buffer.write_bytes(&section);
    }

    let fat_size = SECTION_HEADER_SIZE + handlers.len() * FAT_CLAUSE_SIZE;
    if fat_size > 0x00FF_FFFF {
        return Err(malformed_error!(
            "Too many exception clauses for one section - {}",
            handlers.len()
        ));
    }

    let mut section = Vec::with_capacity(fat_size);
    let kind = (SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits();
    section.extend_from_slice(&((fat_size as u32) << 8 | u32::from(kind)).to_le_bytes());
    for handler in handlers {
        section.extend_from_slice(&u32::from(handler.flags.bits()).to_le_bytes());
        section.extend_from_slice(&handler.try_offset.to_le_bytes());
        section.extend_from_slice(&handler.try_length.to_le_bytes());
        section.extend_from_slice(&handler.handler_offset.to_le_bytes());
        section.extend_from_slice(&handler.handler_length.to_le_bytes());
        section.extend_from_slice(&handler.filter_offset.to_le_bytes());
    }
    buffer.write_bytes(&section)
}
