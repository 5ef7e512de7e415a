//! The probe prolog placed in front of every instrumented method body.
//!
//! ```text
//! ldc.i4   <slots>
//! newarr   System.Object
//! stloc    <array>
//! ldloc    <array>          // once per receiver / argument
//! ldc.i4   <slot>
//! ldarg    <slot>           // or ldnull for by-ref arguments
//! [ldobj T] [box T]
//! stelem.ref
//! ldstr    "Assembly!Type.Method"
//! ldloc    <array>
//! call     void Probe(string, object[])
//! ```
//!
//! All tokens are resolved before emission starts; [`Prolog::emit`] only writes bytes.

use crate::{assembly::InstructionEncoder, metadata::token::Token, Result};

/// How one declared argument reaches its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Staging {
    /// Object reference, stored as loaded
    Reference,
    /// Value type, boxed with the given token
    Boxed(Token),
    /// Not representable as an object; `null` is stored instead
    Null,
}

/// How the receiver of an instance method reaches slot 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Receiver {
    /// `this` is an object reference
    Reference,
    /// `this` is a managed pointer to a value of the given type: copied out and boxed
    ValueType(Token),
}

/// A fully resolved prolog, ready to be encoded.
#[derive(Debug, Clone)]
pub(crate) struct Prolog {
    /// `TypeRef` of `System.Object`, the array element type
    pub object_type: Token,
    /// Index of the local holding the staged array
    pub array_local: u16,
    /// Receiver handling, `None` for static methods
    pub receiver: Option<Receiver>,
    /// Staging of each declared argument in order
    pub arguments: Vec<Staging>,
    /// User string `Assembly!Type.Method`
    pub identity: Token,
    /// `MemberRef` of the probe
    pub probe: Token,
}

impl Prolog {
    /// Total number of array slots
    pub fn slots(&self) -> usize {
        self.arguments.len() + usize::from(self.receiver.is_some())
    }

    /// Encode the prolog through `encoder`.
    ///
    /// Slot indices must fit `u16`; the argument cap keeps them far below that.
    pub fn emit(&self, encoder: &mut InstructionEncoder<'_>) -> Result<()> {
        encoder.ldc_i4(self.slots() as i32)?;
        encoder.newarr(self.object_type)?;
        encoder.stloc(self.array_local)?;

        let first: u16 = match self.receiver {
            Some(receiver) => {
                encoder.ldloc(self.array_local)?;
                encoder.ldc_i4(0)?;
                encoder.ldarg(0)?;
                if let Receiver::ValueType(value_type) = receiver {
                    encoder.ldobj(value_type)?;
                    encoder.box_value(value_type)?;
                }
                encoder.stelem_ref()?;
                1
            }
            None => 0,
        };

        for (slot, staging) in (first..).zip(&self.arguments) {
            encoder.ldloc(self.array_local)?;
            encoder.ldc_i4(i32::from(slot))?;
            match staging {
                Staging::Reference => encoder.ldarg(slot)?,
                Staging::Boxed(value_type) => {
                    encoder.ldarg(slot)?;
                    encoder.box_value(*value_type)?;
                }
                Staging::Null => encoder.ldnull()?,
            }
            encoder.stelem_ref()?;
        }

        encoder.ldstr(self.identity)?;
        encoder.ldloc(self.array_local)?;
        encoder.call(self.probe, 2, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{EncodingForm, RewriteBuffer},
        test::evaluator::{run_prolog, Value},
    };

    const OBJECT: Token = Token::new(0x0100_0001);
    const INT32: Token = Token::new(0x0100_0002);
    const POINT: Token = Token::new(0x0200_0003);
    const IDENTITY: Token = Token::new(0x7000_0001);
    const PROBE: Token = Token::new(0x0A00_0001);

    fn prolog(receiver: Option<Receiver>, arguments: Vec<Staging>) -> Prolog {
        Prolog {
            object_type: OBJECT,
            array_local: 0,
            receiver,
            arguments,
            identity: IDENTITY,
            probe: PROBE,
        }
    }

    fn encode(prolog: &Prolog, form: EncodingForm) -> (Vec<u8>, u16) {
        let mut buffer = RewriteBuffer::with_capacity(512);
        let mut encoder = InstructionEncoder::new(&mut buffer, form);
        prolog.emit(&mut encoder).unwrap();
        let max_stack = encoder.max_stack();
        (buffer.as_slice().to_vec(), max_stack)
    }

    #[test]
    fn static_without_arguments() {
        let (code, max_stack) = encode(&prolog(None, vec![]), EncodingForm::Compact);
        assert_eq!(
            code,
            vec![
                0x16, // ldc.i4.0
                0x8D, 0x01, 0x00, 0x00, 0x01, // newarr System.Object
                0x0A, // stloc.0
                0x72, 0x01, 0x00, 0x00, 0x70, // ldstr
                0x06, // ldloc.0
                0x28, 0x01, 0x00, 0x00, 0x0A, // call
            ]
        );
        assert_eq!(max_stack, 2);
    }

    #[test]
    fn value_type_receiver_is_copied_and_boxed() {
        let (code, max_stack) = encode(
            &prolog(Some(Receiver::ValueType(POINT)), vec![]),
            EncodingForm::Compact,
        );
        assert_eq!(
            &code[7..20],
            &[
                0x06, // ldloc.0
                0x16, // ldc.i4.0
                0x02, // ldarg.0
                0x71, 0x03, 0x00, 0x00, 0x02, // ldobj MyApp.Point
                0x8C, 0x03, 0x00, 0x00, 0x02, // box MyApp.Point
            ]
        );
        assert_eq!(max_stack, 3);

        let call = run_prolog(&code);
        assert_eq!(
            call.arguments,
            vec![Some(Value::Boxed(
                POINT,
                Box::new(Value::Indirect(POINT, Box::new(Value::Argument(0))))
            ))]
        );
    }

    #[test]
    fn arguments_follow_the_receiver() {
        let call = run_prolog(
            &encode(
                &prolog(
                    Some(Receiver::Reference),
                    vec![Staging::Boxed(INT32), Staging::Reference, Staging::Null],
                ),
                EncodingForm::Compact,
            )
            .0,
        );

        assert_eq!(call.element_type, OBJECT);
        assert_eq!(call.identity, IDENTITY);
        assert_eq!(call.method, PROBE);
        assert_eq!(
            call.arguments,
            vec![
                Some(Value::Argument(0)),
                Some(Value::Boxed(INT32, Box::new(Value::Argument(1)))),
                Some(Value::Argument(2)),
                Some(Value::Null),
            ]
        );
    }

    #[test]
    fn general_form_uses_long_encodings() {
        let mut staged = prolog(None, vec![Staging::Reference]);
        staged.array_local = 5;

        let (code, _) = encode(&staged, EncodingForm::General);
        assert_eq!(&code[0..5], &[0x20, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&code[10..14], &[0xFE, 0x0E, 0x05, 0x00]);
        assert_eq!(&code[14..18], &[0xFE, 0x0C, 0x05, 0x00]);
        assert_eq!(&code[23..27], &[0xFE, 0x09, 0x00, 0x00]);
    }
}
