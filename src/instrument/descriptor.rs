//! Method descriptors: everything the rewriter needs to know about one method.
//!
//! A [`MethodDescriptor`] is assembled from the runtime's metadata each time a method is about
//! to be (re)compiled and dropped once the rewrite attempt is over. It borrows the method's
//! original body from the runtime and never modifies it.
//!
//! # Argument Slots
//!
//! For instance methods slot 0 is the receiver and declared argument `i` lives in slot `i + 1`;
//! for static methods argument `i` lives in slot `i`. The slot index is both the `ldarg` operand
//! and the position in the `object[]` handed to the probe.

use log::debug;
use widestring::U16String;

use crate::{
    host::{FunctionId, HResult, HostResult, MetadataImport, ModuleId, ProfilerInfo, TypeDefProps},
    metadata::{
        method::MethodModifiers,
        signatures::{parse_method_signature, SignatureParameter, TypeSignature},
        token::{Token, TABLE},
    },
    Error, Result,
};

/// How an argument is placed into an `object` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    /// Object reference, stored as is
    Reference,
    /// Built-in value type; boxed through a `TypeRef` into the base library
    Primitive,
    /// User value type or enum; boxed with its `TypeDef`/`TypeRef` token
    ValueType,
    /// Generic parameter or generic value type instantiation; boxed through a `TypeSpec`
    TypeSpec,
    /// Managed or unmanaged pointer, or `TypedReference`; staged as `null`
    ByRef,
}

/// Type information of one declared argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentType {
    /// Staging strategy
    pub kind: ArgumentKind,
    /// `TypeDef`/`TypeRef` of the argument type, null where there is none
    pub token: Token,
    /// Display name, e.g. `System.Int32` or `MyApp.Money`; empty where unknown
    pub type_name: String,
    /// Signature bytes of the type, used to build a `TypeSpec`
    pub signature: Vec<u8>,
}

impl ArgumentType {
    /// Object reference argument
    pub fn reference(token: Token, type_name: impl Into<String>) -> Self {
        ArgumentType {
            kind: ArgumentKind::Reference,
            token,
            type_name: type_name.into(),
            signature: Vec::new(),
        }
    }

    /// Built-in value type named `type_name`, e.g. `System.Int32`
    pub fn primitive(type_name: impl Into<String>) -> Self {
        ArgumentType {
            kind: ArgumentKind::Primitive,
            token: Token::NULL,
            type_name: type_name.into(),
            signature: Vec::new(),
        }
    }

    /// User value type identified by `token`
    pub fn value_type(token: Token, type_name: impl Into<String>) -> Self {
        ArgumentType {
            kind: ArgumentKind::ValueType,
            token,
            type_name: type_name.into(),
            signature: Vec::new(),
        }
    }

    /// Type only expressible as a signature blob
    pub fn type_spec(signature: Vec<u8>) -> Self {
        ArgumentType {
            kind: ArgumentKind::TypeSpec,
            token: Token::NULL,
            type_name: String::new(),
            signature,
        }
    }

    /// Argument passed by reference
    pub fn by_ref(type_name: impl Into<String>) -> Self {
        ArgumentType {
            kind: ArgumentKind::ByRef,
            token: Token::NULL,
            type_name: type_name.into(),
            signature: Vec::new(),
        }
    }

    /// Returns `true` if the argument cannot be stored at all and is staged as `null`.
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        self.kind == ArgumentKind::ByRef
    }
}

/// Identity, shape and original body of a method about to be compiled.
#[derive(Debug, Clone)]
pub struct MethodDescriptor<'a> {
    /// Simple name of the declaring assembly
    pub assembly_name: String,
    /// Namespace-qualified name of the declaring type
    pub type_name: String,
    /// Method name
    pub method_name: String,
    /// Module declaring the method
    pub module_id: ModuleId,
    /// `MethodDef` token of the method
    pub method_token: Token,
    /// `TypeDef` token of the declaring type
    pub type_token: Token,
    /// Number of declared arguments, excluding the receiver
    pub arg_count: usize,
    /// Declared argument types in order
    pub arg_types: Vec<ArgumentType>,
    /// Static method, no receiver
    pub is_static: bool,
    /// The declaring type is a value type, so the receiver is a managed pointer
    pub is_value_type: bool,
    /// Generic parameters of the declaring type, 0 for non-generic types
    pub type_generic_params: u32,
    /// Original method body (header, code and sections), owned by the runtime
    pub il_code: &'a [u8],
}

impl<'a> MethodDescriptor<'a> {
    /// Describe the method behind a JIT notification.
    ///
    /// # Errors
    /// Returns [`crate::Error::DescriptorExtractionFailed`] naming the lookup that failed.
    pub fn from_function(info: &'a dyn ProfilerInfo, function: FunctionId) -> Result<Self> {
        let function_info = lookup(info.function_info(function), || {
            format!("function info of {function:?}")
        })?;

        Self::from_method(info, function_info.module_id, function_info.token)
    }

    /// Describe `method` of `module`, as identified by re-JIT requests.
    ///
    /// # Errors
    /// Returns [`crate::Error::DescriptorExtractionFailed`] naming the lookup that failed.
    pub fn from_method(info: &'a dyn ProfilerInfo, module: ModuleId, method: Token) -> Result<Self> {
        let module_info = lookup(info.module_info(module), || {
            format!("module info of {module:?}")
        })?;
        let metadata = lookup(info.module_metadata(module), || {
            format!("metadata of {module:?}")
        })?;

        let props = lookup(metadata.method_props(method), || {
            format!("properties of method {method}")
        })?;
        let owner = lookup(metadata.type_def_props(props.owner), || {
            format!("declaring type {} of method {method}", props.owner)
        })?;

        let method_name = props.name.to_string_lossy();
        let signature = parse_method_signature(&props.signature).map_err(|error| {
            Error::DescriptorExtractionFailed {
                what: format!("signature of {method_name}: {error}"),
                hr: HResult::E_FAIL,
            }
        })?;

        let modifiers = MethodModifiers::from_method_flags(props.attributes);
        let is_static = modifiers.contains(MethodModifiers::STATIC) || !signature.has_this;
        let is_value_type = !is_static && extends_value_type(&*metadata, &owner)?;

        let arg_types = signature
            .params
            .iter()
            .map(|param| argument_type(&*metadata, param))
            .collect::<Result<Vec<_>>>()?;

        let il_code = if modifiers.intersects(MethodModifiers::ABSTRACT | MethodModifiers::PINVOKE_IMPL)
        {
            &[][..]
        } else {
            lookup(info.il_function_body(module, method), || {
                format!("body of method {method}")
            })?
        };

        Ok(MethodDescriptor {
            assembly_name: module_info.assembly_name.to_string_lossy(),
            type_name: owner.name.to_string_lossy(),
            method_name,
            module_id: module,
            method_token: method,
            type_token: props.owner,
            arg_count: arg_types.len(),
            arg_types,
            is_static,
            is_value_type,
            type_generic_params: owner.generic_params,
            il_code,
        })
    }

    /// `Type.Method`, the key the registry matches on
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.type_name, self.method_name)
    }

    /// `Assembly!Type.Method`, the identity handed to the probe
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}!{}.{}", self.assembly_name, self.type_name, self.method_name)
    }

    /// Returns `true` for instance and type constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.method_name == ".ctor" || self.method_name == ".cctor"
    }

    /// Number of argument slots including the receiver
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.arg_count + usize::from(!self.is_static)
    }

    /// Slot of declared argument `index`
    #[must_use]
    pub fn arg_slot(&self, index: usize) -> usize {
        index + usize::from(!self.is_static)
    }
}

fn lookup<T>(result: HostResult<T>, what: impl FnOnce() -> String) -> Result<T> {
    result.map_err(|hr| {
        let what = what();
        debug!("Descriptor lookup failed: {what} - {hr}");
        Error::DescriptorExtractionFailed { what, hr }
    })
}

fn type_name<M: MetadataImport + ?Sized>(metadata: &M, token: Token) -> HostResult<U16String> {
    match token.table() {
        TABLE::TYPE_DEF => Ok(metadata.type_def_props(token)?.name),
        TABLE::TYPE_REF => Ok(metadata.type_ref_props(token)?.name),
        _ => Ok(U16String::new()),
    }
}

/// A type is a value type iff its base type is `System.ValueType` or `System.Enum`.
fn extends_value_type<M: MetadataImport + ?Sized>(metadata: &M, owner: &TypeDefProps) -> Result<bool> {
    if owner.extends.is_null() {
        return Ok(false);
    }

    let base = lookup(type_name(metadata, owner.extends), || {
        format!("base type {}", owner.extends)
    })?
    .to_string_lossy();

    let own = owner.name.to_string_lossy();
    Ok((base == "System.ValueType" || base == "System.Enum") && own != "System.Enum")
}

fn argument_type<M: MetadataImport + ?Sized>(
    metadata: &M,
    param: &SignatureParameter,
) -> Result<ArgumentType> {
    if param.by_ref {
        return Ok(ArgumentType::by_ref(String::new()));
    }

    if let Some(name) = param.base.primitive_name() {
        return Ok(ArgumentType::primitive(name));
    }

    let argument = match &param.base {
        TypeSignature::String => ArgumentType::reference(Token::NULL, "System.String"),
        TypeSignature::Object => ArgumentType::reference(Token::NULL, "System.Object"),
        TypeSignature::Class(token) => ArgumentType::reference(*token, String::new()),
        TypeSignature::SzArray(_) | TypeSignature::Array(..) => {
            ArgumentType::reference(Token::NULL, String::new())
        }
        TypeSignature::ValueType(token) => {
            let name = lookup(type_name(metadata, *token), || {
                format!("value type {token}")
            })?;
            ArgumentType::value_type(*token, name.to_string_lossy())
        }
        TypeSignature::GenericInst(..) if param.base.is_generic_value_type() => {
            ArgumentType::type_spec(param.blob.clone())
        }
        TypeSignature::GenericInst(..) => ArgumentType::reference(Token::NULL, String::new()),
        TypeSignature::GenericParamType(_) | TypeSignature::GenericParamMethod(_) => {
            ArgumentType::type_spec(param.blob.clone())
        }
        TypeSignature::Ptr(_) | TypeSignature::FnPtr | TypeSignature::TypedByRef => {
            ArgumentType::by_ref(String::new())
        }
        TypeSignature::ByRef(_) => ArgumentType::by_ref(String::new()),
        other => {
            return Err(Error::DescriptorExtractionFailed {
                what: format!("unsupported parameter type {other:?}"),
                hr: HResult::E_FAIL,
            })
        }
    };

    Ok(argument)
}
