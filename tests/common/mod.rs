//! A small in-memory runtime for the integration tests.
//!
//! Each [`Assembly`] is one module; types and methods are declared up front, after which the
//! runtime only records what the profiler asks of it.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use dotprobe::{
    host::{AssemblyId, ClassId, MethodProps, TypeDefProps, TypeRefProps},
    metadata::token::{Token, TABLE},
    prelude::*,
};
use widestring::{U16Str, U16String};

struct Method {
    owner: Token,
    name: String,
    attributes: u32,
    signature: Vec<u8>,
    body: Vec<u8>,
}

#[derive(Default)]
struct Emitted {
    assembly_refs: Vec<String>,
    type_refs: Vec<(Token, String)>,
    member_refs: Vec<(Token, String, Vec<u8>)>,
    signatures: Vec<Vec<u8>>,
    type_specs: Vec<Vec<u8>>,
    user_strings: Vec<String>,
}

/// One module with its metadata.
pub struct Assembly {
    name: String,
    types: Vec<(String, Token)>,
    methods: Vec<Method>,
    emitted: Mutex<Emitted>,
}

fn token(table: u8, row: usize) -> Token {
    Token::from_parts(table, row as u32)
}

fn find_or_push<T: PartialEq>(rows: &mut Vec<T>, value: T) -> usize {
    match rows.iter().position(|row| *row == value) {
        Some(index) => index + 1,
        None => {
            rows.push(value);
            rows.len()
        }
    }
}

impl Assembly {
    /// Module of `name` referencing `references`
    pub fn new(name: &str, references: &[&str]) -> Self {
        Assembly {
            name: name.to_string(),
            types: Vec::new(),
            methods: Vec::new(),
            emitted: Mutex::new(Emitted {
                assembly_refs: references.iter().map(|r| (*r).to_string()).collect(),
                ..Emitted::default()
            }),
        }
    }

    /// Declare a class deriving from `System.Object`
    pub fn class(&mut self, name: &str) -> Token {
        let object = {
            let mut emitted = self.emitted.lock().unwrap();
            find_or_push(&mut emitted.type_refs, (Token::NULL, "System.Object".to_string()))
        };
        self.types.push((name.to_string(), token(TABLE::TYPE_REF, object)));
        token(TABLE::TYPE_DEF, self.types.len())
    }

    /// Declare a method of `owner`
    pub fn method(
        &mut self,
        owner: Token,
        name: &str,
        attributes: u32,
        signature: &[u8],
        body: &[u8],
    ) -> Token {
        self.methods.push(Method {
            owner,
            name: name.to_string(),
            attributes,
            signature: signature.to_vec(),
            body: body.to_vec(),
        });
        token(TABLE::METHOD_DEF, self.methods.len())
    }

    /// User string behind `token`
    pub fn user_string(&self, token: Token) -> Option<String> {
        let emitted = self.emitted.lock().unwrap();
        emitted.user_strings.get(token.row() as usize - 1).cloned()
    }

    /// `(parent type, name, signature)` of a `MemberRef`, with the parent resolved to
    /// `[assembly]Type`
    pub fn member_ref(&self, token: Token) -> Option<(String, String, Vec<u8>)> {
        let emitted = self.emitted.lock().unwrap();
        let (parent, name, signature) = emitted.member_refs.get(token.row() as usize - 1)?;
        let (scope, type_name) = emitted.type_refs.get(parent.row() as usize - 1)?;
        let assembly = emitted.assembly_refs.get(scope.row() as usize - 1)?;
        Some((
            format!("[{assembly}]{type_name}"),
            name.clone(),
            signature.clone(),
        ))
    }

    /// Blob of a `StandAloneSig`
    pub fn signature(&self, token: Token) -> Option<Vec<u8>> {
        let emitted = self.emitted.lock().unwrap();
        emitted.signatures.get(token.row() as usize - 1).cloned()
    }

    fn type_name(&self, type_def: Token) -> HostResult<&str> {
        self.types
            .get((type_def.row() as usize).wrapping_sub(1))
            .map(|(name, _)| name.as_str())
            .ok_or(HResult::E_INVALIDARG)
    }
}

impl MetadataImport for Assembly {
    fn method_props(&self, method: Token) -> HostResult<MethodProps> {
        let found = self
            .methods
            .get((method.row() as usize).wrapping_sub(1))
            .ok_or(HResult::E_INVALIDARG)?;
        Ok(MethodProps {
            owner: found.owner,
            name: U16String::from_str(&found.name),
            attributes: found.attributes,
            signature: found.signature.clone(),
        })
    }

    fn type_def_props(&self, type_def: Token) -> HostResult<TypeDefProps> {
        let (name, extends) = self
            .types
            .get((type_def.row() as usize).wrapping_sub(1))
            .ok_or(HResult::E_INVALIDARG)?;
        Ok(TypeDefProps {
            name: U16String::from_str(name),
            flags: 0,
            extends: *extends,
            generic_params: 0,
        })
    }

    fn type_ref_props(&self, type_ref: Token) -> HostResult<TypeRefProps> {
        let emitted = self.emitted.lock().unwrap();
        let (scope, name) = emitted
            .type_refs
            .get((type_ref.row() as usize).wrapping_sub(1))
            .ok_or(HResult::E_INVALIDARG)?;
        Ok(TypeRefProps {
            resolution_scope: *scope,
            name: U16String::from_str(name),
        })
    }

    fn sig_from_token(&self, signature: Token) -> HostResult<Vec<u8>> {
        self.signature(signature).ok_or(HResult::E_INVALIDARG)
    }

    fn enum_assembly_refs(&self) -> HostResult<Vec<Token>> {
        let emitted = self.emitted.lock().unwrap();
        Ok((1..=emitted.assembly_refs.len())
            .map(|row| token(TABLE::ASSEMBLY_REF, row))
            .collect())
    }

    fn assembly_ref_name(&self, assembly_ref: Token) -> HostResult<U16String> {
        let emitted = self.emitted.lock().unwrap();
        emitted
            .assembly_refs
            .get((assembly_ref.row() as usize).wrapping_sub(1))
            .map(|name| U16String::from_str(name))
            .ok_or(HResult::E_INVALIDARG)
    }

    fn enum_type_defs(&self) -> HostResult<Vec<Token>> {
        Ok((1..=self.types.len())
            .map(|row| token(TABLE::TYPE_DEF, row))
            .collect())
    }

    fn enum_methods(&self, type_def: Token) -> HostResult<Vec<Token>> {
        self.type_name(type_def)?;
        Ok(self
            .methods
            .iter()
            .enumerate()
            .filter(|(_, method)| method.owner == type_def)
            .map(|(index, _)| token(TABLE::METHOD_DEF, index + 1))
            .collect())
    }
}

impl MetadataEmit for Assembly {
    fn define_assembly_ref(&self, name: &U16Str) -> HostResult<Token> {
        let mut emitted = self.emitted.lock().unwrap();
        let row = find_or_push(&mut emitted.assembly_refs, name.to_string_lossy());
        Ok(token(TABLE::ASSEMBLY_REF, row))
    }

    fn define_type_ref_by_name(&self, scope: Token, name: &U16Str) -> HostResult<Token> {
        let mut emitted = self.emitted.lock().unwrap();
        let row = find_or_push(&mut emitted.type_refs, (scope, name.to_string_lossy()));
        Ok(token(TABLE::TYPE_REF, row))
    }

    fn define_member_ref(
        &self,
        parent: Token,
        name: &U16Str,
        signature: &[u8],
    ) -> HostResult<Token> {
        let mut emitted = self.emitted.lock().unwrap();
        let row = find_or_push(
            &mut emitted.member_refs,
            (parent, name.to_string_lossy(), signature.to_vec()),
        );
        Ok(token(TABLE::MEMBER_REF, row))
    }

    fn define_user_string(&self, value: &U16Str) -> HostResult<Token> {
        let mut emitted = self.emitted.lock().unwrap();
        let row = find_or_push(&mut emitted.user_strings, value.to_string_lossy());
        Ok(token(TABLE::USER_STRING, row))
    }

    fn token_from_sig(&self, signature: &[u8]) -> HostResult<Token> {
        let mut emitted = self.emitted.lock().unwrap();
        let row = find_or_push(&mut emitted.signatures, signature.to_vec());
        Ok(token(TABLE::STANDALONE_SIG, row))
    }

    fn token_from_type_spec(&self, signature: &[u8]) -> HostResult<Token> {
        let mut emitted = self.emitted.lock().unwrap();
        let row = find_or_push(&mut emitted.type_specs, signature.to_vec());
        Ok(token(TABLE::TYPE_SPEC, row))
    }
}

/// The runtime: loaded modules, JIT-visible functions and recorded requests.
#[derive(Default)]
pub struct Runtime {
    modules: Vec<Arc<Assembly>>,
    functions: HashMap<FunctionId, (ModuleId, Token)>,
    installed: Mutex<Vec<(ModuleId, Token, Vec<u8>)>>,
    rejits: Mutex<Vec<(ModuleId, Token)>>,
}

impl Runtime {
    /// Load `assembly` as a module
    pub fn load(&mut self, assembly: Assembly) -> ModuleId {
        self.modules.push(Arc::new(assembly));
        ModuleId(self.modules.len())
    }

    /// Function id for `method` of `module`
    pub fn function(&mut self, module: ModuleId, method: Token) -> FunctionId {
        let id = FunctionId(0x100 + self.functions.len());
        self.functions.insert(id, (module, method));
        id
    }

    /// The module behind `module`
    pub fn assembly(&self, module: ModuleId) -> Arc<Assembly> {
        Arc::clone(&self.modules[module.0 - 1])
    }

    /// Bodies installed for first-time compilation
    pub fn installed(&self) -> Vec<(ModuleId, Token, Vec<u8>)> {
        self.installed.lock().unwrap().clone()
    }

    /// Re-JIT requests in order
    pub fn rejits(&self) -> Vec<(ModuleId, Token)> {
        self.rejits.lock().unwrap().clone()
    }

    fn module(&self, module: ModuleId) -> HostResult<&Arc<Assembly>> {
        self.modules
            .get(module.0.wrapping_sub(1))
            .ok_or(HResult::E_INVALIDARG)
    }
}

impl ProfilerInfo for Runtime {
    fn function_info(&self, function: FunctionId) -> HostResult<FunctionInfo> {
        let (module_id, token) = *self.functions.get(&function).ok_or(HResult::E_INVALIDARG)?;
        Ok(FunctionInfo {
            class_id: ClassId(1),
            module_id,
            token,
        })
    }

    fn module_info(&self, module: ModuleId) -> HostResult<ModuleInfo> {
        let assembly = self.module(module)?;
        Ok(ModuleInfo {
            path: U16String::from_str(&format!("{}.dll", assembly.name)),
            assembly_id: AssemblyId(module.0),
            assembly_name: U16String::from_str(&assembly.name),
        })
    }

    fn module_metadata(&self, module: ModuleId) -> HostResult<Arc<dyn ModuleMetadata>> {
        let metadata: Arc<dyn ModuleMetadata> = self.module(module)?.clone();
        Ok(metadata)
    }

    fn il_function_body(&self, module: ModuleId, method: Token) -> HostResult<&[u8]> {
        self.module(module)?
            .methods
            .get((method.row() as usize).wrapping_sub(1))
            .map(|method| method.body.as_slice())
            .ok_or(HResult::E_FAIL)
    }

    fn set_il_function_body(
        &self,
        module: ModuleId,
        method: Token,
        body: &[u8],
    ) -> HostResult<()> {
        self.installed
            .lock()
            .unwrap()
            .push((module, method, body.to_vec()));
        Ok(())
    }

    fn enum_modules(&self) -> HostResult<Vec<ModuleId>> {
        Ok((1..=self.modules.len()).map(ModuleId).collect())
    }

    fn request_rejit(&self, modules: &[ModuleId], methods: &[Token]) -> HostResult<()> {
        self.rejits
            .lock()
            .unwrap()
            .extend(modules.iter().copied().zip(methods.iter().copied()));
        Ok(())
    }

    fn set_event_mask(&self, _mask: EventMask) -> HostResult<()> {
        Ok(())
    }
}

/// A re-JIT function control keeping the last body
#[derive(Default)]
pub struct Control(pub Mutex<Option<Vec<u8>>>);

impl FunctionControl for Control {
    fn set_il_function_body(&self, body: &[u8]) -> HostResult<()> {
        *self.0.lock().unwrap() = Some(body.to_vec());
        Ok(())
    }
}
