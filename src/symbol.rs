//! Storage locations and how to move values in and out of them.
//!
//! A `Symbol` knows two things: how to load its value into a named register
//! and how to store a named register back into its slot. Code generation
//! treats symbols uniformly – it picks a destination register (`$v0`,
//! `$v1`, or a reserved `$t` temporary) and asks the symbol to do the rest.
//! Misusing a variant (storing into a literal, loading a bare function
//! name) is rejected by the callers before emission ever happens, so the
//! corresponding arms here are unreachable.

use crate::code::Code;
use crate::types::SymbolType;

/// Mangling applied to every source-declared global name. Keeps user names
/// out of the minted `L<n>` label namespace and away from the runtime
/// library routines.
pub fn mangle(name: &str) -> String {
  format!("_{name}")
}

pub fn temp_reg(index: u8) -> String {
  format!("$t{index}")
}

/// Where an array's storage lives: behind a data-section label or inside
/// the current frame at a fixed `$fp` offset.
#[derive(Debug, Clone)]
pub enum ArrayPlace {
  Label(String),
  Frame(i32),
}

#[derive(Debug)]
pub enum Symbol {
  /// A global scalar (or string field, which is never loadable).
  Global { label: String, ty: SymbolType },
  /// A local slot at a negative `$fp` offset.
  Local { offset: i32, ty: SymbolType },
  /// A parameter slot at a positive `$fp` offset.
  Param { offset: i32, ty: SymbolType },
  /// An array; loading yields the base address, never an element.
  ArrayBase { place: ArrayPlace, len: usize },
  /// A known constant.
  Literal { value: i32 },
  /// A reserved `$t` register.
  Temp { index: u8 },
  /// A function signature registered in the global namespace.
  Function {
    label: String,
    params: Vec<SymbolType>,
    ret: SymbolType,
  },
  /// The result of calling a void function. Loading it is a compile error,
  /// raised by the caller.
  Void,
}

impl Symbol {
  pub fn ty(&self) -> SymbolType {
    match self {
      Symbol::Global { ty, .. } | Symbol::Local { ty, .. } | Symbol::Param { ty, .. } => ty.clone(),
      Symbol::ArrayBase { len, .. } => SymbolType::Array { len: *len },
      Symbol::Literal { .. } | Symbol::Temp { .. } => SymbolType::Int,
      Symbol::Function { ret, .. } => ret.clone(),
      Symbol::Void => SymbolType::Void,
    }
  }

  pub fn is_array(&self) -> bool {
    matches!(self, Symbol::ArrayBase { .. })
  }

  pub fn is_void(&self) -> bool {
    matches!(self, Symbol::Void)
  }

  /// The register backing this symbol, for temporaries.
  pub fn register(&self) -> Option<String> {
    match self {
      Symbol::Temp { index } => Some(temp_reg(*index)),
      _ => None,
    }
  }

  /// Emit instructions that load this symbol's value into `reg`. For
  /// arrays the value is the base address.
  pub fn load_value(&self, reg: &str, code: &mut Code) {
    match self {
      Symbol::Global { label, .. } => code.op(format!("lw {reg}, {label}")),
      Symbol::Local { offset, .. } | Symbol::Param { offset, .. } => {
        code.op(format!("lw {reg}, {offset}($fp)"))
      }
      Symbol::ArrayBase {
        place: ArrayPlace::Label(label),
        ..
      } => code.op(format!("la {reg}, {label}")),
      Symbol::ArrayBase {
        place: ArrayPlace::Frame(offset),
        ..
      } => code.op(format!("addu {reg}, $fp, {offset}")),
      Symbol::Literal { value } => code.op(format!("li {reg}, {value}")),
      Symbol::Temp { index } => code.op(format!("move {reg}, {}", temp_reg(*index))),
      Symbol::Function { .. } | Symbol::Void => {
        unreachable!("loads from non-value symbols are rejected before emission")
      }
    }
  }

  /// Emit instructions that store `reg` into this symbol's slot.
  pub fn save_value(&self, reg: &str, code: &mut Code) {
    match self {
      Symbol::Global { label, .. } => code.op(format!("sw {reg}, {label}")),
      Symbol::Local { offset, .. } | Symbol::Param { offset, .. } => {
        code.op(format!("sw {reg}, {offset}($fp)"))
      }
      Symbol::Temp { index } => code.op(format!("move {}, {reg}", temp_reg(*index))),
      Symbol::ArrayBase { .. } | Symbol::Literal { .. } | Symbol::Function { .. } | Symbol::Void => {
        unreachable!("stores into unassignable symbols are rejected before emission")
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn emitted(symbol: &Symbol, load: bool) -> String {
    let mut code = Code::new();
    if load {
      symbol.load_value("$v0", &mut code);
    } else {
      symbol.save_value("$v0", &mut code);
    }
    code.text().trim().to_string()
  }

  #[test]
  fn global_load_and_store() {
    let g = Symbol::Global {
      label: mangle("counter"),
      ty: SymbolType::Int,
    };
    assert_eq!(emitted(&g, true), "lw $v0, _counter");
    assert_eq!(emitted(&g, false), "sw $v0, _counter");
  }

  #[test]
  fn frame_slots_are_fp_relative() {
    let local = Symbol::Local {
      offset: -8,
      ty: SymbolType::Int,
    };
    let param = Symbol::Param {
      offset: 12,
      ty: SymbolType::Int,
    };
    assert_eq!(emitted(&local, true), "lw $v0, -8($fp)");
    assert_eq!(emitted(&param, false), "sw $v0, 12($fp)");
  }

  #[test]
  fn array_base_loads_an_address() {
    let global = Symbol::ArrayBase {
      place: ArrayPlace::Label(mangle("buf")),
      len: 5,
    };
    let frame = Symbol::ArrayBase {
      place: ArrayPlace::Frame(-24),
      len: 5,
    };
    assert_eq!(emitted(&global, true), "la $v0, _buf");
    assert_eq!(emitted(&frame, true), "addu $v0, $fp, -24");
  }

  #[test]
  fn temporaries_move_through_registers() {
    let t = Symbol::Temp { index: 3 };
    assert_eq!(emitted(&t, true), "move $v0, $t3");
    assert_eq!(emitted(&t, false), "move $t3, $v0");
  }
}
