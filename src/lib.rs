//! Crate root: wires together the compilation pipeline.
//!
//! The stages are intentionally small and composable so they can be
//! evolved independently:
//! - `tokenizer` performs lexical analysis and produces a flat token
//!   stream with source locations.
//! - `parser` owns all syntactic knowledge and returns a typed AST with
//!   value/boolean coercions already in place.
//! - `context` and `symbol` model scopes, frames, and storage locations.
//! - `codegen` lowers the AST to MIPS assembly text and appends the
//!   runtime library.
//! - `error` centralises the diagnostics types shared by every stage.

pub mod ast;
pub mod code;
pub mod context;
pub mod error;
pub mod location;
pub mod parser;
pub mod symbol;
pub mod tokenizer;
pub mod types;

mod codegen;

pub use error::{CompileError, CompileResult, Diagnostic, Severity};

/// Compile a source string into MIPS assembly. The first diagnosed error
/// is returned; use [`ast::Program::compile`] directly to observe every
/// diagnostic of a run.
pub fn generate_assembly(source: &str, filename: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source, filename)?;
  let program = parser::parse(tokens)?;
  let mut first_error = None;
  let asm = program.compile(|diagnostic| {
    if diagnostic.severity == Severity::Error && first_error.is_none() {
      first_error = Some(CompileError::at(&diagnostic.location, diagnostic.message.clone()));
    }
  });
  match first_error {
    None => Ok(asm),
    Some(error) => Err(error),
  }
}
