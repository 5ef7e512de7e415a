//! Symbolic execution of probe prologs.
//!
//! Understands exactly the instructions the prolog encoder emits, in both encoding forms, and
//! runs them against symbolic values until the probe `call`. Anything else panics, which is
//! the desired outcome in a test.

use std::collections::HashMap;

use crate::{assembly::opcodes, metadata::token::Token};

/// A symbolic evaluation stack value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Integer literal
    Int(i32),
    /// `ldnull`
    Null,
    /// Argument slot as loaded by `ldarg`
    Argument(u16),
    /// Value of the given type loaded through an address by `ldobj`
    Indirect(Token, Box<Value>),
    /// Boxed value of the given type
    Boxed(Token, Box<Value>),
    /// User string
    Str(Token),
    /// Reference to an array created by `newarr`
    Array(usize),
}

/// What reached the probe.
#[derive(Debug, Clone)]
pub struct ProbeCall {
    /// Called method
    pub method: Token,
    /// Identity string handed to the probe
    pub identity: Token,
    /// Element type of the staged array
    pub element_type: Token,
    /// Local the staged array was stored in
    pub array_local: u16,
    /// Slots of the staged array, `None` where nothing was stored
    pub arguments: Vec<Option<Value>>,
    /// Number of bytes up to and including the call
    pub prolog_len: usize,
    /// Deepest evaluation stack seen
    pub max_depth: usize,
}

struct Machine<'c> {
    code: &'c [u8],
    pc: usize,
    stack: Vec<Value>,
    locals: HashMap<u16, Value>,
    arrays: Vec<(Token, Vec<Option<Value>>)>,
    max_depth: usize,
}

impl Machine<'_> {
    fn u8(&mut self) -> u8 {
        let value = self.code[self.pc];
        self.pc += 1;
        value
    }

    fn u16(&mut self) -> u16 {
        let value = u16::from_le_bytes([self.code[self.pc], self.code[self.pc + 1]]);
        self.pc += 2;
        value
    }

    fn u32(&mut self) -> u32 {
        let bytes = &self.code[self.pc..self.pc + 4];
        self.pc += 4;
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn token(&mut self) -> Token {
        Token::new(self.u32())
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
        self.max_depth = self.max_depth.max(self.stack.len());
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("evaluation stack underflow")
    }

    fn array(&self, value: &Value) -> usize {
        match value {
            Value::Array(id) => *id,
            other => panic!("expected an array reference, got {other:?}"),
        }
    }

    fn store(&mut self, index: u16) {
        let value = self.pop();
        self.locals.insert(index, value);
    }

    fn load(&mut self, index: u16) {
        let value = self
            .locals
            .get(&index)
            .cloned()
            .unwrap_or_else(|| panic!("local {index} read before written"));
        self.push(value);
    }
}

/// Run `code` from its first byte up to the first `call`.
///
/// # Panics
/// On any instruction the prolog never emits, on stack misuse, or if no call is reached.
pub fn run_prolog(code: &[u8]) -> ProbeCall {
    let mut machine = Machine {
        code,
        pc: 0,
        stack: Vec::new(),
        locals: HashMap::new(),
        arrays: Vec::new(),
        max_depth: 0,
    };

    loop {
        let opcode = machine.u8();
        match opcode {
            opcodes::LDARG_0..=opcodes::LDARG_3 => {
                machine.push(Value::Argument(u16::from(opcode - opcodes::LDARG_0)));
            }
            opcodes::LDLOC_0 => machine.load(0),
            opcodes::STLOC_0 => machine.store(0),
            opcodes::LDC_I4_0..=opcodes::LDC_I4_8 => {
                machine.push(Value::Int(i32::from(opcode - opcodes::LDC_I4_0)));
            }
            opcodes::LDC_I4 => {
                let value = machine.u32() as i32;
                machine.push(Value::Int(value));
            }
            opcodes::LDNULL => machine.push(Value::Null),
            opcodes::LDSTR => {
                let token = machine.token();
                machine.push(Value::Str(token));
            }
            opcodes::NEWARR => {
                let element_type = machine.token();
                let Value::Int(length) = machine.pop() else {
                    panic!("newarr without a length");
                };
                machine
                    .arrays
                    .push((element_type, vec![None; usize::try_from(length).unwrap()]));
                let id = machine.arrays.len() - 1;
                machine.push(Value::Array(id));
            }
            opcodes::BOX => {
                let value_type = machine.token();
                let value = machine.pop();
                machine.push(Value::Boxed(value_type, Box::new(value)));
            }
            opcodes::LDOBJ => {
                let value_type = machine.token();
                let address = machine.pop();
                machine.push(Value::Indirect(value_type, Box::new(address)));
            }
            opcodes::STELEM_REF => {
                let value = machine.pop();
                let Value::Int(index) = machine.pop() else {
                    panic!("stelem.ref without an index");
                };
                let array = machine.pop();
                let id = machine.array(&array);
                machine.arrays[id].1[usize::try_from(index).unwrap()] = Some(value);
            }
            opcodes::CALL => {
                let method = machine.token();
                let array = machine.pop();
                let Value::Str(identity) = machine.pop() else {
                    panic!("probe called without an identity string");
                };
                assert!(machine.stack.is_empty(), "values left on the stack");

                let id = machine.array(&array);
                let array_local = machine
                    .locals
                    .iter()
                    .find(|(_, value)| **value == Value::Array(id))
                    .map(|(index, _)| *index)
                    .expect("staged array never stored in a local");
                let (element_type, arguments) = machine.arrays[id].clone();

                return ProbeCall {
                    method,
                    identity,
                    element_type,
                    array_local,
                    arguments,
                    prolog_len: machine.pc,
                    max_depth: machine.max_depth,
                };
            }
            opcodes::FE_PREFIX => {
                let second = machine.u8();
                let index = machine.u16();
                match second {
                    opcodes::FE_LDARG => machine.push(Value::Argument(index)),
                    opcodes::FE_LDLOC => machine.load(index),
                    opcodes::FE_STLOC => machine.store(index),
                    other => panic!("unexpected instruction FE {other:02X}"),
                }
            }
            other => panic!("unexpected opcode {other:02X} at {}", machine.pc - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_minimal_prolog() {
        let code = [
            0x17, // ldc.i4.1
            0x8D, 0x01, 0x00, 0x00, 0x01, // newarr
            0x0A, // stloc.0
            0x06, 0x16, 0x14, 0xA2, // ldloc.0; ldc.i4.0; ldnull; stelem.ref
            0x72, 0x01, 0x00, 0x00, 0x70, // ldstr
            0x06, // ldloc.0
            0x28, 0x01, 0x00, 0x00, 0x0A, // call
            0x2A,
        ];

        let call = run_prolog(&code);
        assert_eq!(call.arguments, vec![Some(Value::Null)]);
        assert_eq!(call.prolog_len, code.len() - 1);
        assert_eq!(call.max_depth, 3);
        assert_eq!(call.array_local, 0);
    }
}
