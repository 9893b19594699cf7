//! Core library for the Oleander scripting language: lexing, parsing,
//! the scope-tree executer, the namespace-aware module interface, the
//! AST cache, and REPL utilities.

pub mod ast;
pub mod cache;
pub mod diagnostics;
pub mod eval;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod scope;
pub mod stdlib;

pub use cache::AstCache;
pub use diagnostics::{Diagnostic, DiagnosticKind, OleanderError, Result, SourceSpan};
pub use object::{Method, Object, ObjectKind, Stream};
pub use parser::parse_source;
pub use repl::Repl;
pub use runtime::{Executer, Module, Runtime};
pub use scope::{Scope, ScopeKind};
