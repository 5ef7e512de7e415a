//! Exception handler clauses of CIL method bodies.
//!
//! Clause offsets are relative to the first instruction of the method. When code is inserted in
//! front of the original instructions every offset moves by the same amount, which is what
//! [`ExceptionHandler::shifted`] does.

use bitflags::bitflags;

use crate::Result;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause.
        ///
        /// The `filter_offset` field contains the metadata token of the exception type
        /// that this handler catches.
        const EXCEPTION = 0x0000;

        /// An exception filter and handler clause.
        ///
        /// The `filter_offset` field contains the offset of the filter block.
        const FILTER = 0x0001;

        /// A finally clause.
        const FINALLY = 0x0002;

        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// Size of one clause in a small exception section
pub const SMALL_CLAUSE_SIZE: usize = 12;
/// Size of one clause in a fat exception section
pub const FAT_CLAUSE_SIZE: usize = 24;
/// Size of the header in front of the clauses of either section format
pub const SECTION_HEADER_SIZE: usize = 4;

/// One try/catch/finally/fault clause.
///
/// ```text
/// try {
///     // try_offset -> try_offset + try_length
/// }
/// catch (ExceptionType) {
///     // handler_offset -> handler_offset + handler_length
/// }
/// ```
///
/// # References
/// - ECMA-335 6th Edition, Partition II, Section 25.4.6 - Exception Handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// Offset in bytes of try block from start of method body.
    pub try_offset: u32,
    /// Length in bytes of the try block.
    pub try_length: u32,
    /// Location of the handler for this try block.
    pub handler_offset: u32,
    /// Size of the handler code in bytes.
    pub handler_length: u32,
    /// Class token for typed clauses, filter offset for filter clauses, unused otherwise.
    pub filter_offset: u32,
}

impl ExceptionHandler {
    /// Returns `true` if `filter_offset` holds a code offset rather than a class token.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FILTER)
    }

    /// The clause with every code offset moved forward by `delta` bytes.
    ///
    /// Lengths and class tokens are unchanged.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an offset would leave the 32-bit range.
    pub fn shifted(&self, delta: u32) -> Result<ExceptionHandler> {
        let shift = |offset: u32| {
            offset
                .checked_add(delta)
                .ok_or_else(|| malformed_error!("Exception clause offset overflow - {}", offset))
        };

        Ok(ExceptionHandler {
            flags: self.flags,
            try_offset: shift(self.try_offset)?,
            try_length: self.try_length,
            handler_offset: shift(self.handler_offset)?,
            handler_length: self.handler_length,
            filter_offset: if self.is_filter() {
                shift(self.filter_offset)?
            } else {
                self.filter_offset
            },
        })
    }

    /// Returns `true` if the clause can be stored in the small section format.
    #[must_use]
    pub fn fits_small(&self) -> bool {
        self.try_offset <= u32::from(u16::MAX)
            && self.try_length <= u32::from(u8::MAX)
            && self.handler_offset <= u32::from(u16::MAX)
            && self.handler_length <= u32::from(u8::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(flags: ExceptionHandlerFlags, filter_offset: u32) -> ExceptionHandler {
        ExceptionHandler {
            flags,
            try_offset: 0x02,
            try_length: 0x10,
            handler_offset: 0x12,
            handler_length: 0x08,
            filter_offset,
        }
    }

    #[test]
    fn shift_keeps_class_token() {
        let shifted = clause(ExceptionHandlerFlags::EXCEPTION, 0x0100_0003)
            .shifted(0x20)
            .unwrap();
        assert_eq!(shifted.try_offset, 0x22);
        assert_eq!(shifted.try_length, 0x10);
        assert_eq!(shifted.handler_offset, 0x32);
        assert_eq!(shifted.handler_length, 0x08);
        assert_eq!(shifted.filter_offset, 0x0100_0003);
    }

    #[test]
    fn shift_moves_filter_block() {
        let shifted = clause(ExceptionHandlerFlags::FILTER, 0x1A).shifted(0x20).unwrap();
        assert_eq!(shifted.filter_offset, 0x3A);
    }

    #[test]
    fn shift_overflow_is_malformed() {
        let mut handler = clause(ExceptionHandlerFlags::FINALLY, 0);
        handler.handler_offset = u32::MAX;
        assert!(matches!(
            handler.shifted(1),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn small_format_limits() {
        let mut handler = clause(ExceptionHandlerFlags::FINALLY, 0);
        assert!(handler.fits_small());

        handler.try_offset = 0xFFFF;
        assert!(handler.fits_small());

        handler.try_offset = 0x1_0000;
        assert!(!handler.fits_small());

        handler.try_offset = 0;
        handler.handler_length = 0x100;
        assert!(!handler.fits_small());
    }
}
