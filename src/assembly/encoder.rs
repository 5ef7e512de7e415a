//! Instruction encoder writing CIL straight into a [`RewriteBuffer`].
//!
//! Each `emit` method assembles one complete instruction (opcode and operand) and hands it to
//! the buffer as a single write, either landing entirely or failing with
//! [`crate::Error::BufferOverflow`]. Alongside the bytes, the encoder tracks the evaluation
//! stack depth so the rewritten method header can declare a sufficient `max_stack`.
//!
//! # Encoding Forms
//!
//! With [`EncodingForm::Compact`] the encoder picks the one-byte forms where they exist:
//! `ldarg.0`-`ldarg.3`, `ldloc.0`, `stloc.0` and `ldc.i4.0`-`ldc.i4.8`. Anything else, and
//! everything under [`EncodingForm::General`], uses the general `0xFE`-prefixed or 32-bit
//! immediate form. Both forms have identical semantics.
//!
//! # Examples
//!
//! ```rust
//! use dotprobe::assembly::{EncodingForm, InstructionEncoder, RewriteBuffer};
//!
//! let mut buffer = RewriteBuffer::with_capacity(16);
//! let mut encoder = InstructionEncoder::new(&mut buffer, EncodingForm::Compact);
//! encoder.ldarg(0)?;
//! encoder.ldc_i4(300)?;
//! assert_eq!(encoder.max_stack(), 2);
//!
//! assert_eq!(buffer.as_slice(), &[0x02, 0x20, 0x2C, 0x01, 0x00, 0x00]);
//! # Ok::<(), dotprobe::Error>(())
//! ```

use crate::{
    assembly::{opcodes, RewriteBuffer},
    metadata::token::Token,
    Error, Result,
};

/// Selects between compact and general instruction forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingForm {
    /// Use one-byte forms where available
    #[default]
    Compact,
    /// Always use the general forms
    General,
}

/// Emits CIL instructions into a borrowed [`RewriteBuffer`].
pub struct InstructionEncoder<'b> {
    buffer: &'b mut RewriteBuffer,
    form: EncodingForm,
    /// Buffer position of the first instruction
    start: usize,
    /// Current stack depth (number of items on evaluation stack)
    current_stack_depth: u16,
    /// Maximum stack depth reached during encoding
    max_stack_depth: u16,
}

impl<'b> InstructionEncoder<'b> {
    /// Encoder appending to `buffer` at its current position.
    pub fn new(buffer: &'b mut RewriteBuffer, form: EncodingForm) -> Self {
        let start = buffer.position();
        InstructionEncoder {
            buffer,
            form,
            start,
            current_stack_depth: 0,
            max_stack_depth: 0,
        }
    }

    /// Number of bytes emitted by this encoder
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.position() - self.start
    }

    /// Returns `true` if nothing has been emitted yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest evaluation stack depth reached so far
    #[must_use]
    pub fn max_stack(&self) -> u16 {
        self.max_stack_depth
    }

    /// Evaluation stack depth after the last emitted instruction
    #[must_use]
    pub fn stack_depth(&self) -> u16 {
        self.current_stack_depth
    }

    fn compact(&self) -> bool {
        self.form == EncodingForm::Compact
    }

    /// Write one instruction and apply its stack effect; nothing changes if either fails.
    fn emit(&mut self, bytes: &[u8], pops: u16, pushes: u16) -> Result<()> {
        let Some(depth) = self.current_stack_depth.checked_sub(pops) else {
            return Err(Error::InvalidArgument(format!(
                "instruction pops {pops} values with only {} on the stack",
                self.current_stack_depth
            )));
        };
        let depth = depth
            .checked_add(pushes)
            .ok_or_else(|| Error::InvalidArgument("evaluation stack too deep".to_string()))?;

        self.buffer.write_bytes(bytes)?;

        self.current_stack_depth = depth;
        self.max_stack_depth = self.max_stack_depth.max(depth);
        Ok(())
    }

    fn emit_with_token(&mut self, opcode: u8, token: Token, pops: u16, pushes: u16) -> Result<()> {
        let value = token.to_le_bytes();
        self.emit(
            &[opcode, value[0], value[1], value[2], value[3]],
            pops,
            pushes,
        )
    }

    /// `ldarg` - push argument `index` (argument 0 is the receiver of instance methods).
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the instruction does not fit.
    pub fn ldarg(&mut self, index: u16) -> Result<()> {
        if self.compact() && index <= 3 {
            return self.emit(&[opcodes::LDARG_0 + index as u8], 0, 1);
        }

        let value = index.to_le_bytes();
        self.emit(&[opcodes::FE_PREFIX, opcodes::FE_LDARG, value[0], value[1]], 0, 1)
    }

    /// `ldloc` - push local `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the instruction does not fit.
    pub fn ldloc(&mut self, index: u16) -> Result<()> {
        if self.compact() && index == 0 {
            return self.emit(&[opcodes::LDLOC_0], 0, 1);
        }

        let value = index.to_le_bytes();
        self.emit(&[opcodes::FE_PREFIX, opcodes::FE_LDLOC, value[0], value[1]], 0, 1)
    }

    /// `stloc` - pop into local `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the instruction does not fit, or
    /// [`crate::Error::InvalidArgument`] on an empty stack.
    pub fn stloc(&mut self, index: u16) -> Result<()> {
        if self.compact() && index == 0 {
            return self.emit(&[opcodes::STLOC_0], 1, 0);
        }

        let value = index.to_le_bytes();
        self.emit(&[opcodes::FE_PREFIX, opcodes::FE_STLOC, value[0], value[1]], 1, 0)
    }

    /// `ldc.i4` - push a 32-bit integer literal.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the instruction does not fit.
    pub fn ldc_i4(&mut self, value: i32) -> Result<()> {
        if self.compact() && (0..=8).contains(&value) {
            return self.emit(&[opcodes::LDC_I4_0 + value as u8], 0, 1);
        }

        let value = value.to_le_bytes();
        self.emit(
            &[opcodes::LDC_I4, value[0], value[1], value[2], value[3]],
            0,
            1,
        )
    }

    /// `ldnull` - push a null reference.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the instruction does not fit.
    pub fn ldnull(&mut self) -> Result<()> {
        self.emit(&[opcodes::LDNULL], 0, 1)
    }

    /// `ldstr` - push the user string `string`.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the instruction does not fit.
    pub fn ldstr(&mut self, string: Token) -> Result<()> {
        self.emit_with_token(opcodes::LDSTR, string, 0, 1)
    }

    /// `newarr` - pop a length, push a new zero-based array of `element_type`.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the instruction does not fit, or
    /// [`crate::Error::InvalidArgument`] on an empty stack.
    pub fn newarr(&mut self, element_type: Token) -> Result<()> {
        self.emit_with_token(opcodes::NEWARR, element_type, 1, 1)
    }

    /// `box` - pop a value of `value_type`, push an object reference to a boxed copy.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the instruction does not fit, or
    /// [`crate::Error::InvalidArgument`] on an empty stack.
    pub fn box_value(&mut self, value_type: Token) -> Result<()> {
        self.emit_with_token(opcodes::BOX, value_type, 1, 1)
    }

    /// `ldobj` - pop an address, push the `value_type` stored there.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the instruction does not fit, or
    /// [`crate::Error::InvalidArgument`] on an empty stack.
    pub fn ldobj(&mut self, value_type: Token) -> Result<()> {
        self.emit_with_token(opcodes::LDOBJ, value_type, 1, 1)
    }

    /// `stelem.ref` - pop array, index and value; store the value into the array.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the instruction does not fit, or
    /// [`crate::Error::InvalidArgument`] if fewer than three values are on the stack.
    pub fn stelem_ref(&mut self) -> Result<()> {
        self.emit(&[opcodes::STELEM_REF], 3, 0)
    }

    /// `call` - invoke `method`, consuming `arguments` stack values and pushing `returns`.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the instruction does not fit, or
    /// [`crate::Error::InvalidArgument`] if the stack holds fewer than `arguments` values.
    pub fn call(&mut self, method: Token, arguments: u16, returns: u16) -> Result<()> {
        self.emit_with_token(opcodes::CALL, method, arguments, returns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(
        form: EncodingForm,
        f: impl FnOnce(&mut InstructionEncoder<'_>) -> Result<()>,
    ) -> Result<Vec<u8>> {
        let mut buffer = RewriteBuffer::with_capacity(64);
        let mut encoder = InstructionEncoder::new(&mut buffer, form);
        f(&mut encoder)?;
        Ok(buffer.into_inner())
    }

    #[test]
    fn test_compact_forms() -> Result<()> {
        let bytecode = encode(EncodingForm::Compact, |e| {
            e.ldarg(0)?;
            e.ldarg(3)?;
            e.ldloc(0)?;
            e.stloc(0)?;
            e.ldc_i4(0)?;
            e.ldc_i4(8)
        })?;

        assert_eq!(bytecode, vec![0x02, 0x05, 0x06, 0x0A, 0x16, 0x1E]);
        Ok(())
    }

    #[test]
    fn test_general_forms_beyond_compact_range() -> Result<()> {
        let bytecode = encode(EncodingForm::Compact, |e| {
            e.ldarg(4)?;
            e.ldloc(1)?;
            e.stloc(0x0102)?;
            e.ldc_i4(9)?;
            e.ldc_i4(-1)
        })?;

        assert_eq!(
            bytecode,
            vec![
                0xFE, 0x09, 0x04, 0x00, // ldarg 4
                0xFE, 0x0C, 0x01, 0x00, // ldloc 1
                0xFE, 0x0E, 0x02, 0x01, // stloc 258
                0x20, 0x09, 0x00, 0x00, 0x00, // ldc.i4 9
                0x20, 0xFF, 0xFF, 0xFF, 0xFF, // ldc.i4 -1
            ]
        );
        Ok(())
    }

    #[test]
    fn test_forced_general_forms() -> Result<()> {
        let bytecode = encode(EncodingForm::General, |e| {
            e.ldarg(0)?;
            e.ldc_i4(1)?;
            e.stloc(0)?;
            e.ldloc(0)?;
            Ok(())
        })?;

        assert_eq!(
            bytecode,
            vec![
                0xFE, 0x09, 0x00, 0x00, 0x20, 0x01, 0x00, 0x00, 0x00, 0xFE, 0x0E, 0x00, 0x00,
                0xFE, 0x0C, 0x00, 0x00,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_token_instructions() -> Result<()> {
        let bytecode = encode(EncodingForm::Compact, |e| {
            e.ldstr(Token::new(0x7000_0001))?;
            e.ldnull()?;
            e.call(Token::new(0x0A00_0002), 2, 0)?;
            e.ldarg(0)?;
            e.ldobj(Token::new(0x0200_0003))?;
            e.box_value(Token::new(0x0200_0003))?;
            e.newarr(Token::new(0x0100_0004))
        })?;

        assert_eq!(
            bytecode,
            vec![
                0x72, 0x01, 0x00, 0x00, 0x70, // ldstr
                0x14, // ldnull
                0x28, 0x02, 0x00, 0x00, 0x0A, // call
                0x02, // ldarg.0
                0x71, 0x03, 0x00, 0x00, 0x02, // ldobj
                0x8C, 0x03, 0x00, 0x00, 0x02, // box
                0x8D, 0x04, 0x00, 0x00, 0x01, // newarr
            ]
        );
        Ok(())
    }

    #[test]
    fn test_stack_tracking() -> Result<()> {
        let mut buffer = RewriteBuffer::with_capacity(64);
        let mut encoder = InstructionEncoder::new(&mut buffer, EncodingForm::Compact);

        encoder.ldc_i4(2)?;
        encoder.newarr(Token::new(0x0100_0001))?;
        encoder.stloc(0)?;
        assert_eq!(encoder.stack_depth(), 0);

        encoder.ldloc(0)?;
        encoder.ldc_i4(0)?;
        encoder.ldarg(0)?;
        encoder.box_value(Token::new(0x0100_0002))?;
        assert_eq!(encoder.stack_depth(), 3);
        encoder.stelem_ref()?;

        assert_eq!(encoder.stack_depth(), 0);
        assert_eq!(encoder.max_stack(), 3);
        Ok(())
    }

    #[test]
    fn test_stack_underflow_writes_nothing() {
        let mut buffer = RewriteBuffer::with_capacity(64);
        let mut encoder = InstructionEncoder::new(&mut buffer, EncodingForm::Compact);

        encoder.ldnull().unwrap();
        assert!(matches!(
            encoder.stelem_ref(),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(encoder.len(), 1);
        assert_eq!(encoder.stack_depth(), 1);
    }

    #[test]
    fn test_overflow_keeps_partial_instruction_out() {
        let mut buffer = RewriteBuffer::with_capacity(3);
        let mut encoder = InstructionEncoder::new(&mut buffer, EncodingForm::Compact);

        encoder.ldnull().unwrap();
        assert!(matches!(
            encoder.ldstr(Token::new(0x7000_0001)),
            Err(Error::BufferOverflow { needed: 5, .. })
        ));
        assert_eq!(encoder.stack_depth(), 1);
        assert_eq!(buffer.as_slice(), &[0x14]);
    }

    #[test]
    fn test_encoder_starts_at_buffer_position() {
        let mut buffer = RewriteBuffer::with_capacity(32);
        buffer.write_zeros(12).unwrap();

        let mut encoder = InstructionEncoder::new(&mut buffer, EncodingForm::Compact);
        assert!(encoder.is_empty());
        encoder.ldarg(1).unwrap();
        assert_eq!(encoder.len(), 1);
        assert_eq!(buffer.position(), 13);
    }
}
