//! CIL opcode byte constants (ECMA-335) emitted by the prolog encoder.
//!
//! Single-byte opcodes are named after their mnemonic (e.g. [`CALL`] = `0x28`). Two-byte
//! opcodes that use the `0xFE` prefix have their second byte stored with an `FE_` prefix
//! (e.g. [`FE_LDARG`] = `0x09` for `ldarg` = `0xFE 0x09`).
#![allow(missing_docs)]

// ── Single-byte opcodes ────────────────────────────────────────────────────

// Misc
pub const NOP: u8 = 0x00;

// Load argument shorthand
pub const LDARG_0: u8 = 0x02;
pub const LDARG_1: u8 = 0x03;
pub const LDARG_2: u8 = 0x04;
pub const LDARG_3: u8 = 0x05;

// Load/store local shorthand
pub const LDLOC_0: u8 = 0x06;
pub const STLOC_0: u8 = 0x0A;

// Null / constant loaders
pub const LDNULL: u8 = 0x14;
pub const LDC_I4_0: u8 = 0x16;
pub const LDC_I4_8: u8 = 0x1E;
pub const LDC_I4: u8 = 0x20;

// Calls and control flow
pub const CALL: u8 = 0x28;
pub const RET: u8 = 0x2A;

// Object model
pub const LDOBJ: u8 = 0x71;
pub const LDSTR: u8 = 0x72;
pub const BOX: u8 = 0x8C;
pub const NEWARR: u8 = 0x8D;
pub const STELEM_REF: u8 = 0xA2;

// ── Two-byte opcodes (0xFE prefix) ─────────────────────────────────────────

pub const FE_PREFIX: u8 = 0xFE;

pub const FE_LDARG: u8 = 0x09;
pub const FE_LDLOC: u8 = 0x0C;
pub const FE_STLOC: u8 = 0x0E;
