//! The isolated namespace a script is evaluated into.
//!
//! A [`Namespace`] owns its engine, compiled script, and the top-level
//! variables left behind by evaluating the script once. Nothing else can add
//! to or replace its entries after [`Namespace::load`] returns.

use std::collections::{BTreeMap, BTreeSet};

use rhai::{AST, CallFnOptions, Dynamic, Engine, FnAccess, FnPtr, Scope};
use serde_json::Value;
use thiserror::Error;

use crate::{
    sandbox::{HostLink, SandboxConfig, create_engine},
    value::{ValueError, dynamic_to_json, json_to_dynamic},
};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("script failed to parse: {0}")]
    Parse(#[from] rhai::ParseError),
    #[error("script raised during top-level evaluation: {0}")]
    Eval(String),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("{name} accepts {expected:?} argument(s), called with {given}")]
    Arity {
        name: String,
        expected: Vec<usize>,
        given: usize,
    },
    #[error("{0}")]
    Raised(String),
    #[error("result is not JSON-serializable: {0}")]
    Unserializable(#[from] ValueError),
}

/// Why a name did not resolve to an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    Undefined,
    NotInvokable,
}

#[derive(Debug)]
enum Entry {
    /// Named script function, possibly overloaded by arity.
    Function { arities: BTreeSet<usize> },
    /// Top-level variable holding a function pointer or closure.
    Pointer(FnPtr),
}

pub struct Namespace {
    engine: Engine,
    ast: AST,
    globals: Scope<'static>,
    entries: BTreeMap<String, Entry>,
}

impl Namespace {
    /// Compile `text` and run its top level exactly once.
    ///
    /// # Errors
    /// Returns error if the script does not parse or raises while running its
    /// top level.
    pub fn load(text: &str, config: &SandboxConfig, link: &HostLink) -> Result<Self, LoadError> {
        let engine = create_engine(config, link);
        let ast = engine.compile(text)?;

        let mut globals = Scope::new();
        engine
            .run_ast_with_scope(&mut globals, &ast)
            .map_err(|err| LoadError::Eval(err.to_string()))?;

        let mut entries = BTreeMap::new();
        for func in ast.iter_functions() {
            // Anonymous closures compile to functions with generated names.
            if func.access == FnAccess::Private || func.name.contains('$') {
                continue;
            }
            if let Entry::Function { arities } = entries
                .entry(func.name.to_owned())
                .or_insert_with(|| Entry::Function {
                    arities: BTreeSet::new(),
                })
            {
                arities.insert(func.params.len());
            }
        }
        for (name, _, value) in globals.iter() {
            if entries.contains_key(name) {
                continue;
            }
            if let Some(ptr) = value.try_cast::<FnPtr>() {
                entries.insert(name.to_owned(), Entry::Pointer(ptr));
            }
        }

        Ok(Self {
            engine,
            ast,
            globals,
            entries,
        })
    }

    /// Names of every entry point, sorted.
    pub fn entry_points(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Look up an entry point by name.
    ///
    /// # Errors
    /// Returns why the name is not callable.
    pub fn resolve<'a>(&'a self, name: &'a str) -> Result<EntryPoint<'a>, Unresolved> {
        match self.entries.get(name) {
            Some(entry) => Ok(EntryPoint {
                namespace: self,
                name,
                entry,
            }),
            None if self.globals.contains(name) => Err(Unresolved::NotInvokable),
            None => Err(Unresolved::Undefined),
        }
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// A callable taking one optional JSON value and returning one optional JSON
/// value.
pub struct EntryPoint<'a> {
    namespace: &'a Namespace,
    name: &'a str,
    entry: &'a Entry,
}

impl EntryPoint<'_> {
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name
    }

    /// Invoke with no argument (`None`) or exactly one.
    ///
    /// Each call runs against its own copy of the top-level variables,
    /// including those captured by closures, so calls never observe each
    /// other.
    ///
    /// # Errors
    /// Returns error if the arity does not match, the script raises, or the
    /// result has no JSON form.
    pub fn call(&self, data: Option<&Value>) -> Result<Option<Value>, CallError> {
        let args: Vec<Dynamic> = data.map(json_to_dynamic).into_iter().collect();
        let ns = self.namespace;

        let result = match self.entry {
            Entry::Function { arities } => {
                if !arities.contains(&args.len()) {
                    return Err(CallError::Arity {
                        name: self.name.to_owned(),
                        expected: arities.iter().copied().collect(),
                        given: args.len(),
                    });
                }
                let mut scope = ns.globals.clone();
                let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
                ns.engine
                    .call_fn_with_options::<Dynamic>(options, &mut scope, &ns.ast, self.name, args)
            }
            Entry::Pointer(ptr) => {
                // Captured variables are shared cells; give this call its own.
                let mut ptr = ptr.clone();
                for captured in ptr.iter_curry_mut() {
                    *captured = captured.flatten_clone();
                }
                ptr.call::<Dynamic>(&ns.engine, &ns.ast, args)
            }
        }
        .map_err(|err| CallError::Raised(err.to_string()))?;

        if result.is_unit() {
            return Ok(None);
        }
        Ok(Some(dynamic_to_json(&result)?))
    }
}
