//! The bytecode rewriting engine.
//!
//! [`ILRewriter`] turns the original body of a method into a new body that first hands the
//! method's identity and arguments to the configured probe and then runs the original code
//! unchanged:
//!
//! ```text
//! +----------------+-------------------+---------------------+---------------------+
//! | fat header     | probe prolog      | original code bytes | exception section   |
//! | (12 bytes)     | (see [`prolog`])  | (verbatim)          | (offsets shifted)   |
//! +----------------+-------------------+---------------------+---------------------+
//! ```
//!
//! # Process
//!
//! 1. The original header and exception sections are parsed with [`MethodBody`]
//! 2. Every token the prolog needs is resolved through the module's metadata: the extended
//!    local signature, `System.Object`, boxing types, the probe `MemberRef` and the identity
//!    user string
//! 3. The prolog is encoded into a [`RewriteBuffer`] sized once from the original body
//! 4. The original code is appended, followed by the shifted exception clauses
//! 5. The header is written last, once code size and stack depth are known
//!
//! Nothing is submitted unless every step succeeded.

use std::collections::HashMap;

use log::{debug, info, warn};
use widestring::U16String;

use crate::{
    assembly::{EncodingForm, InstructionEncoder, RewriteBuffer},
    config::ProfilerConfig,
    host::{FunctionControl, HostResult, ModuleMetadata},
    instrument::{ArgumentKind, ArgumentType, MethodDescriptor, RuntimeFamily},
    metadata::{
        method::{encode_fat_header, write_exception_section, MethodBody, FAT_HEADER_SIZE},
        signatures::{
            append_local, open_generic_value_type, LocalsSignature, OBJECT_ARRAY, PROBE_SIGNATURE,
        },
        token::Token,
    },
    Error, Result,
};

pub(crate) mod prolog;

use prolog::{Prolog, Receiver, Staging};

/// Highest number of declared arguments a method may have to be instrumented.
pub const MAX_ARGUMENTS: usize = 1024;

/// `ldc.i4 <n>; newarr; stloc <a>` in their longest forms
const ARRAY_SETUP_SIZE: usize = 5 + 5 + 4;
/// `ldloc; ldc.i4; ldarg; ldobj; box; stelem.ref` in their longest forms
const RECEIVER_STAGING_SIZE: usize = 4 + 5 + 4 + 5 + 5 + 1;
/// `ldloc; ldc.i4; ldarg; box; stelem.ref` in their longest forms
const ARGUMENT_STAGING_SIZE: usize = 4 + 5 + 4 + 5 + 1;
/// `ldstr; ldloc; call`
const PROBE_CALL_SIZE: usize = 5 + 4 + 5;
/// A tiny header becoming a fat one
const HEADER_GROWTH: usize = FAT_HEADER_SIZE - 1;
/// Alignment padding plus one small section of 20 clauses converted to the fat format
const SECTION_GROWTH: usize = 256;

/// Room reserved on top of the original body length for everything the rewrite adds.
///
/// Covers the longest prolog [`MAX_ARGUMENTS`] permits, header growth and exception section
/// growth. The rewrite buffer is allocated once with this padding and never grows.
pub const IL_BUFFER_PADDING: usize = ARRAY_SETUP_SIZE
    + RECEIVER_STAGING_SIZE
    + MAX_ARGUMENTS * ARGUMENT_STAGING_SIZE
    + PROBE_CALL_SIZE
    + HEADER_GROWTH
    + SECTION_GROWTH;

/// Rewrites method bodies to call the probe on entry.
///
/// A rewriter is cheap to create and holds no state between rewrites; every rewrite owns its
/// buffer, signature and token cache.
///
/// # Examples
///
/// ```rust,ignore
/// use dotprobe::prelude::*;
///
/// let rewriter = ILRewriter::new(&config, RuntimeFamily::Core);
/// rewriter.rewrite(&descriptor, &*metadata, &control)?;
/// ```
pub struct ILRewriter<'c> {
    config: &'c ProfilerConfig,
    runtime: RuntimeFamily,
    form: EncodingForm,
}

impl<'c> ILRewriter<'c> {
    /// Rewriter calling the probe of `config`, resolving base types for `runtime`.
    #[must_use]
    pub fn new(config: &'c ProfilerConfig, runtime: RuntimeFamily) -> Self {
        ILRewriter {
            config,
            runtime,
            form: EncodingForm::default(),
        }
    }

    /// Select the instruction encoding form of the prolog.
    #[must_use]
    pub fn with_encoding(mut self, form: EncodingForm) -> Self {
        self.form = form;
        self
    }

    /// Rewrite the method described by `descriptor` and install the result through `control`.
    ///
    /// # Errors
    /// Returns any error of [`ILRewriter::build`], or [`crate::Error::HostRejected`] if the
    /// runtime refuses the new body.
    pub fn rewrite(
        &self,
        descriptor: &MethodDescriptor<'_>,
        metadata: &dyn ModuleMetadata,
        control: &dyn FunctionControl,
    ) -> Result<()> {
        let body = self.build(descriptor, metadata)?;

        control.set_il_function_body(&body).map_err(|hr| {
            warn!("Runtime rejected body of {} - {hr}", descriptor.full_name());
            Error::HostRejected(hr)
        })?;

        info!(
            "Instrumented {} ({} -> {} bytes)",
            descriptor.full_name(),
            descriptor.il_code.len(),
            body.len()
        );
        Ok(())
    }

    /// Build the instrumented body of `descriptor` without installing it.
    ///
    /// New references are defined in `metadata` even if the body is never installed; repeated
    /// builds reuse what the collaborator returns for identical definitions.
    ///
    /// # Errors
    /// - [`crate::Error::InvalidArgument`] if the descriptor is inconsistent or has no body
    /// - [`crate::Error::TooManyArguments`] above [`MAX_ARGUMENTS`]
    /// - [`crate::Error::Malformed`] / [`crate::Error::OutOfBounds`] for a damaged body
    /// - [`crate::Error::MetadataResolution`] if a token cannot be obtained
    /// - [`crate::Error::BufferOverflow`] if the new body does not fit the buffer
    pub fn build(
        &self,
        descriptor: &MethodDescriptor<'_>,
        metadata: &dyn ModuleMetadata,
    ) -> Result<Vec<u8>> {
        validate(descriptor)?;

        let original = descriptor.il_code;
        let body = MethodBody::from(original)?;
        debug!(
            "Rewriting {} - {} bytes of code, {} exception clauses",
            descriptor.full_name(),
            body.size_code,
            body.exception_handlers.len()
        );

        let mut resolver = Resolver::new(metadata);
        let locals = resolver.locals(&body)?;
        let prolog = self.resolve_prolog(descriptor, &mut resolver, &locals)?;

        let mut buffer = RewriteBuffer::with_capacity(original.len() + IL_BUFFER_PADDING);
        buffer.write_zeros(FAT_HEADER_SIZE)?;

        let mut encoder = InstructionEncoder::new(&mut buffer, self.form);
        prolog.emit(&mut encoder)?;
        if encoder.stack_depth() != 0 {
            return Err(Error::InvalidArgument(format!(
                "prolog of {} leaves {} values on the stack",
                descriptor.full_name(),
                encoder.stack_depth()
            )));
        }
        let prolog_len = encoder.len();
        let prolog_stack = encoder.max_stack();

        let code = body.code(original);
        buffer.write_bytes(code)?;

        let shift = u32::try_from(prolog_len)
            .map_err(|_| Error::InvalidArgument(format!("prolog of {prolog_len} bytes")))?;
        let handlers = body
            .exception_handlers
            .iter()
            .map(|handler| handler.shifted(shift))
            .collect::<Result<Vec<_>>>()?;

        let code_size = u32::try_from(prolog_len + code.len())
            .map_err(|_| malformed_error!("Code size overflow - {}", code.len()))?;
        let original_stack = u16::try_from(body.max_stack).unwrap_or(u16::MAX);

        write_exception_section(&mut buffer, &handlers)?;

        let header = encode_fat_header(
            original_stack.max(prolog_stack),
            code_size,
            locals.token,
            true,
            !handlers.is_empty(),
        );
        buffer.patch(0, &header)?;

        Ok(buffer.into_inner())
    }

    fn resolve_prolog(
        &self,
        descriptor: &MethodDescriptor<'_>,
        resolver: &mut Resolver<'_>,
        locals: &Locals,
    ) -> Result<Prolog> {
        let base_library = self.runtime.base_library(self.config);
        let object_type = resolver.type_ref(base_library, "System.Object")?;

        let receiver = if descriptor.is_static {
            None
        } else if descriptor.is_value_type && descriptor.type_generic_params > 0 {
            let signature =
                open_generic_value_type(descriptor.type_token, descriptor.type_generic_params)?;
            Some(Receiver::ValueType(resolver.type_spec(&signature)?))
        } else if descriptor.is_value_type {
            Some(Receiver::ValueType(descriptor.type_token))
        } else {
            Some(Receiver::Reference)
        };

        let arguments = descriptor
            .arg_types
            .iter()
            .map(|argument| self.staging(argument, base_library, resolver))
            .collect::<Result<Vec<_>>>()?;

        let probe_config = &self.config.probe;
        let probe_type = resolver.type_ref(&probe_config.assembly, &probe_config.type_name)?;
        let probe = resolver.member_ref(probe_type, &probe_config.method, &PROBE_SIGNATURE)?;
        let identity = resolver.user_string(&descriptor.full_name())?;

        Ok(Prolog {
            object_type,
            array_local: locals.index,
            receiver,
            arguments,
            identity,
            probe,
        })
    }

    fn staging(
        &self,
        argument: &ArgumentType,
        base_library: &str,
        resolver: &mut Resolver<'_>,
    ) -> Result<Staging> {
        Ok(match argument.kind {
            ArgumentKind::Reference => Staging::Reference,
            ArgumentKind::ByRef => Staging::Null,
            ArgumentKind::Primitive => {
                Staging::Boxed(resolver.type_ref(base_library, &argument.type_name)?)
            }
            ArgumentKind::ValueType if !argument.token.is_null() => Staging::Boxed(argument.token),
            ArgumentKind::ValueType => {
                return Err(Error::InvalidArgument(format!(
                    "value type argument '{}' without a token",
                    argument.type_name
                )))
            }
            ArgumentKind::TypeSpec => Staging::Boxed(resolver.type_spec(&argument.signature)?),
        })
    }
}

fn validate(descriptor: &MethodDescriptor<'_>) -> Result<()> {
    if descriptor.arg_types.len() != descriptor.arg_count {
        return Err(Error::InvalidArgument(format!(
            "{} declares {} arguments but describes {}",
            descriptor.full_name(),
            descriptor.arg_count,
            descriptor.arg_types.len()
        )));
    }

    if descriptor.arg_count > MAX_ARGUMENTS {
        return Err(Error::TooManyArguments(descriptor.arg_count));
    }

    if descriptor.il_code.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "{} has no method body",
            descriptor.full_name()
        )));
    }

    Ok(())
}

/// The extended local signature of one rewrite.
struct Locals {
    token: Token,
    index: u16,
}

/// Resolves and caches the references one rewrite needs.
struct Resolver<'m> {
    metadata: &'m dyn ModuleMetadata,
    assembly_refs: HashMap<String, Token>,
    type_refs: HashMap<(Token, String), Token>,
}

impl<'m> Resolver<'m> {
    fn new(metadata: &'m dyn ModuleMetadata) -> Self {
        Resolver {
            metadata,
            assembly_refs: HashMap::new(),
            type_refs: HashMap::new(),
        }
    }

    /// Original locals plus one `object[]`, tokenized.
    fn locals(&mut self, body: &MethodBody) -> Result<Locals> {
        let original = if body.local_var_sig_token == 0 {
            None
        } else {
            let token = Token::new(body.local_var_sig_token);
            Some(resolved(self.metadata.sig_from_token(token), || {
                format!("local signature {token}")
            })?)
        };

        let LocalsSignature { blob, index } = append_local(original.as_deref(), &OBJECT_ARRAY)?;
        let token = resolved(self.metadata.token_from_sig(&blob), || {
            "extended local signature".to_string()
        })?;

        Ok(Locals { token, index })
    }

    /// Existing `AssemblyRef` named `name`, or a new one.
    fn assembly_ref(&mut self, name: &str) -> Result<Token> {
        if let Some(token) = self.assembly_refs.get(name) {
            return Ok(*token);
        }

        let existing = self.metadata.enum_assembly_refs().ok().and_then(|references| {
            references.into_iter().find(|reference| {
                self.metadata
                    .assembly_ref_name(*reference)
                    .is_ok_and(|found| found.to_string_lossy() == name)
            })
        });

        let token = match existing {
            Some(token) => token,
            None => resolved(
                self.metadata
                    .define_assembly_ref(&U16String::from_str(name)),
                || format!("assembly reference {name}"),
            )?,
        };

        self.assembly_refs.insert(name.to_string(), token);
        Ok(token)
    }

    /// `TypeRef` to `type_name` in `assembly`.
    fn type_ref(&mut self, assembly: &str, type_name: &str) -> Result<Token> {
        let scope = self.assembly_ref(assembly)?;
        let key = (scope, type_name.to_string());
        if let Some(token) = self.type_refs.get(&key) {
            return Ok(*token);
        }

        let token = resolved(
            self.metadata
                .define_type_ref_by_name(scope, &U16String::from_str(type_name)),
            || format!("type reference [{assembly}]{type_name}"),
        )?;

        self.type_refs.insert(key, token);
        Ok(token)
    }

    fn type_spec(&mut self, signature: &[u8]) -> Result<Token> {
        resolved(self.metadata.token_from_type_spec(signature), || {
            format!("type specification {signature:02X?}")
        })
    }

    fn member_ref(&mut self, parent: Token, name: &str, signature: &[u8]) -> Result<Token> {
        resolved(
            self.metadata
                .define_member_ref(parent, &U16String::from_str(name), signature),
            || format!("member reference {name} on {parent}"),
        )
    }

    fn user_string(&mut self, value: &str) -> Result<Token> {
        resolved(
            self.metadata
                .define_user_string(&U16String::from_str(value)),
            || format!("user string '{value}'"),
        )
    }
}

fn resolved<T>(result: HostResult<T>, what: impl FnOnce() -> String) -> Result<T> {
    result.map_err(|hr| Error::MetadataResolution { what: what(), hr })
}
