//! CIL emission: the fixed-capacity rewrite buffer, opcode constants and the instruction encoder.
//!
//! # Key Components
//!
//! - [`RewriteBuffer`] - Pre-sized output buffer that fails instead of growing
//! - [`InstructionEncoder`] - Emits individual instructions and tracks stack depth
//! - [`EncodingForm`] - Compact or general instruction forms
//! - [`opcodes`] - Raw opcode bytes

mod buffer;
mod encoder;
pub mod opcodes;

pub use buffer::RewriteBuffer;
pub use encoder::{EncodingForm, InstructionEncoder};
