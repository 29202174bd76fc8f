//! The context stack carried through code generation.
//!
//! Four nested kinds, outer to inner: `GlobalContext` (whole program:
//! symbol table, label counter, collected diagnostics), `FunctionContext`
//! (one function: frame allocator, return label, loop-target stacks, which
//! `$t` registers the body touched), `LocalContext` (one block: a scope
//! rib pushed on entry and popped on drop), and `ExpressionContext` (one
//! expression evaluation: the pool of free temporary registers). Each
//! inner context borrows its parent, so an inner context can never outlive
//! the scope it belongs to.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::error::{CompileError, CompileResult, Diagnostic};
use crate::location::Location;
use crate::symbol::Symbol;
use crate::types::{SymbolType, WORD};

const TEMP_COUNT: u8 = 10;

pub struct GlobalContext {
  symbols: HashMap<String, Rc<Symbol>>,
  labels: usize,
  pub diagnostics: Vec<Diagnostic>,
}

impl GlobalContext {
  pub fn new() -> Self {
    Self {
      symbols: HashMap::new(),
      labels: 0,
      diagnostics: Vec::new(),
    }
  }

  /// Mint a fresh, globally unique label.
  pub fn next_label(&mut self) -> String {
    let label = format!("L{}", self.labels);
    self.labels += 1;
    label
  }

  pub fn declare(
    &mut self,
    name: &str,
    symbol: Symbol,
    location: &Location,
  ) -> CompileResult<Rc<Symbol>> {
    if self.symbols.contains_key(name) {
      return Err(CompileError::at(
        location,
        format!("redeclaration of \"{name}\""),
      ));
    }
    let symbol = Rc::new(symbol);
    self.symbols.insert(name.to_string(), symbol.clone());
    Ok(symbol)
  }

  pub fn lookup(&self, name: &str) -> Option<Rc<Symbol>> {
    self.symbols.get(name).cloned()
  }

  pub fn warn(&mut self, location: &Location, message: impl Into<String>) {
    self.diagnostics.push(Diagnostic::warning(location, message));
  }
}

impl Default for GlobalContext {
  fn default() -> Self {
    Self::new()
  }
}

struct Scope {
  names: HashMap<String, Rc<Symbol>>,
  entry_depth: i32,
}

pub struct FunctionContext<'g> {
  pub global: &'g mut GlobalContext,
  pub return_type: SymbolType,
  pub return_label: String,
  /// Every `$t` register the body ever reserved; the prologue saves these.
  pub used_temps: BTreeSet<u8>,
  scopes: Vec<Scope>,
  depth: i32,
  max_depth: i32,
  break_labels: Vec<String>,
  continue_labels: Vec<String>,
}

impl<'g> FunctionContext<'g> {
  pub fn new(global: &'g mut GlobalContext, return_type: SymbolType) -> Self {
    let return_label = global.next_label();
    Self {
      global,
      return_type,
      return_label,
      used_temps: BTreeSet::new(),
      // The base scope holds the parameters.
      scopes: vec![Scope {
        names: HashMap::new(),
        entry_depth: 0,
      }],
      depth: 0,
      max_depth: 0,
      break_labels: Vec::new(),
      continue_labels: Vec::new(),
    }
  }

  pub fn declare_param(&mut self, name: &str, index: usize, location: &Location) -> CompileResult<()> {
    let base = &mut self.scopes[0];
    if base.names.contains_key(name) {
      return Err(CompileError::at(
        location,
        format!("redeclaration of function parameter \"{name}\""),
      ));
    }
    let offset = 2 * WORD as i32 + (WORD * index) as i32;
    base.names.insert(
      name.to_string(),
      Rc::new(Symbol::Param {
        offset,
        ty: SymbolType::Int,
      }),
    );
    Ok(())
  }

  /// Reserve `bytes` of frame space and return the slot's `$fp` offset
  /// (the lowest address of the slice). The high-water mark is what the
  /// prologue ultimately allocates.
  fn alloc(&mut self, bytes: i32) -> i32 {
    self.depth += bytes;
    self.max_depth = self.max_depth.max(self.depth);
    -self.depth
  }

  /// Frame bytes needed for locals, after the whole body has compiled.
  pub fn frame_locals(&self) -> i32 {
    self.max_depth
  }

  fn push_scope(&mut self) {
    self.scopes.push(Scope {
      names: HashMap::new(),
      entry_depth: self.depth,
    });
  }

  fn pop_scope(&mut self) {
    let scope = self.scopes.pop().expect("scope stack underflow");
    // Return the scope's frame slice; siblings may reuse it.
    self.depth = scope.entry_depth;
  }

  pub fn lookup(&self, name: &str) -> Option<Rc<Symbol>> {
    for scope in self.scopes.iter().rev() {
      if let Some(symbol) = scope.names.get(name) {
        return Some(symbol.clone());
      }
    }
    self.global.lookup(name)
  }

  pub fn push_break(&mut self, label: String) {
    self.break_labels.push(label);
  }

  pub fn pop_break(&mut self) {
    self.break_labels.pop().expect("break stack underflow");
  }

  pub fn break_label(&self) -> Option<&str> {
    self.break_labels.last().map(String::as_str)
  }

  pub fn push_continue(&mut self, label: String) {
    self.continue_labels.push(label);
  }

  pub fn pop_continue(&mut self) {
    self.continue_labels.pop().expect("continue stack underflow");
  }

  pub fn continue_label(&self) -> Option<&str> {
    self.continue_labels.last().map(String::as_str)
  }
}

/// One lexical block. Creating it pushes a scope rib; dropping it pops the
/// rib and releases the block's frame slice, on every exit path.
pub struct LocalContext<'a, 'g> {
  pub func: &'a mut FunctionContext<'g>,
}

impl<'a, 'g> LocalContext<'a, 'g> {
  pub fn new(func: &'a mut FunctionContext<'g>) -> Self {
    func.push_scope();
    Self { func }
  }

  /// Open a nested block chained to this one.
  pub fn nested(&mut self) -> LocalContext<'_, 'g> {
    self.func.push_scope();
    LocalContext {
      func: &mut *self.func,
    }
  }

  pub fn declare_local(
    &mut self,
    name: &str,
    ty: SymbolType,
    location: &Location,
  ) -> CompileResult<Rc<Symbol>> {
    let current = self.func.scopes.last().expect("no open scope");
    if current.names.contains_key(name) {
      return Err(CompileError::at(
        location,
        format!("symbol \"{name}\" already declared"),
      ));
    }
    let symbol = match &ty {
      SymbolType::Array { len } => {
        let offset = self.func.alloc((WORD * len) as i32);
        Symbol::ArrayBase {
          place: crate::symbol::ArrayPlace::Frame(offset),
          len: *len,
        }
      }
      SymbolType::Int => Symbol::Local {
        offset: self.func.alloc(WORD as i32),
        ty,
      },
      other => unreachable!("locals of type {other} are not parsed"),
    };
    let symbol = Rc::new(symbol);
    self
      .func
      .scopes
      .last_mut()
      .expect("no open scope")
      .names
      .insert(name.to_string(), symbol.clone());
    Ok(symbol)
  }

  /// Nearest binding for `name`: this block, enclosing blocks, parameters,
  /// then the global namespace.
  pub fn lookup(&self, name: &str) -> Option<Rc<Symbol>> {
    self.func.lookup(name)
  }

  pub fn next_label(&mut self) -> String {
    self.func.global.next_label()
  }
}

impl Drop for LocalContext<'_, '_> {
  fn drop(&mut self) {
    self.func.pop_scope();
  }
}

/// Transient state for evaluating one expression: the pool of free `$t`
/// registers. Reserved by pop, released by push; nested evaluations get
/// disjoint temporaries.
pub struct ExpressionContext<'a, 'l, 'g> {
  pub scope: &'a mut LocalContext<'l, 'g>,
  free: Vec<u8>,
}

impl<'a, 'l, 'g> ExpressionContext<'a, 'l, 'g> {
  pub fn new(scope: &'a mut LocalContext<'l, 'g>) -> Self {
    Self {
      scope,
      free: (0..TEMP_COUNT).rev().collect(),
    }
  }

  pub fn reserve_temp(&mut self, location: &Location) -> CompileResult<Rc<Symbol>> {
    match self.free.pop() {
      Some(index) => {
        self.scope.func.used_temps.insert(index);
        Ok(Rc::new(Symbol::Temp { index }))
      }
      None => Err(CompileError::at(
        location,
        "expression too complex: out of temporary registers",
      )),
    }
  }

  /// Return a temporary to the pool. Releasing anything else is a no-op,
  /// which lets callers release whatever symbol an operand evaluated to.
  pub fn release(&mut self, symbol: &Symbol) {
    if let Symbol::Temp { index } = symbol {
      debug_assert!(!self.free.contains(index), "double release of $t{index}");
      self.free.push(*index);
    }
  }

  pub fn free_temps(&self) -> usize {
    self.free.len()
  }

  pub fn next_label(&mut self) -> String {
    self.scope.func.global.next_label()
  }

  pub fn lookup(&self, name: &str) -> Option<Rc<Symbol>> {
    self.scope.lookup(name)
  }

  pub fn warn(&mut self, location: &Location, message: impl Into<String>) {
    self.scope.func.global.warn(location, message);
  }
}
