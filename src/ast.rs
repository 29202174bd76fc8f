//! The typed abstract syntax tree.
//!
//! Expressions are partitioned into two categories. A *value* expression
//! produces a 32-bit integer in a register; a *boolean* expression produces
//! control flow to one of two caller-supplied labels. The parser builds
//! nodes through the smart constructors here, which coerce every child into
//! the category its parent requires by inserting exactly one `ValueCast` or
//! `BoolCast` where needed. Code generation can therefore match on the
//! variants without ever checking categories again.

use crate::error::{CompileError, CompileResult};
use crate::location::Location;
use crate::types::SymbolType;
use std::fmt;
use std::rc::Rc;

// ----- Operators -----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Div,
  BitAnd,
  BitOr,
  BitXor,
}

impl BinOp {
  pub fn mnemonic(self) -> &'static str {
    match self {
      BinOp::Add => "addu",
      BinOp::Sub => "subu",
      BinOp::Mul => "mul",
      BinOp::Div => "divu",
      BinOp::BitAnd => "and",
      BinOp::BitOr => "or",
      BinOp::BitXor => "xor",
    }
  }
}

impl fmt::Display for BinOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let symbol = match self {
      BinOp::Add => "+",
      BinOp::Sub => "-",
      BinOp::Mul => "*",
      BinOp::Div => "/",
      BinOp::BitAnd => "&",
      BinOp::BitOr => "|",
      BinOp::BitXor => "^",
    };
    write!(f, "{symbol}")
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
  Plus,
  Neg,
  BitNot,
}

impl UnOp {
  pub fn mnemonic(self) -> &'static str {
    match self {
      UnOp::Plus => "move",
      UnOp::Neg => "negu",
      UnOp::BitNot => "not",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

impl RelOp {
  pub fn branch(self) -> &'static str {
    match self {
      RelOp::Eq => "beq",
      RelOp::Ne => "bne",
      RelOp::Lt => "blt",
      RelOp::Le => "ble",
      RelOp::Gt => "bgt",
      RelOp::Ge => "bge",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
  And,
  Or,
}

// ----- Expressions -----

/// An expression producing an integer value through a symbol.
#[derive(Debug)]
pub enum ValueExpr {
  Constant {
    value: i32,
    location: Location,
  },
  /// Construction only; evaluating a string literal is a compile error.
  /// Its one legitimate home is a global field initializer.
  StringLiteral {
    bytes: Vec<u8>,
    location: Location,
  },
  Variable {
    name: String,
    location: Location,
  },
  ArrayAccess {
    name: String,
    index: Box<ValueExpr>,
    location: Location,
  },
  Unary {
    op: UnOp,
    operand: Box<ValueExpr>,
    location: Location,
  },
  Binary {
    op: BinOp,
    lhs: Box<ValueExpr>,
    rhs: Box<ValueExpr>,
    location: Location,
  },
  Assignment {
    target: Box<ValueExpr>,
    value: Box<ValueExpr>,
    location: Location,
  },
  Call {
    name: String,
    args: Vec<ValueExpr>,
    location: Location,
  },
  /// Coercion of a boolean expression into the value 1 or 0.
  ValueCast {
    inner: Box<BoolExpr>,
    location: Location,
  },
}

/// An expression producing control flow to a true or false label.
#[derive(Debug)]
pub enum BoolExpr {
  Not {
    operand: Box<BoolExpr>,
    location: Location,
  },
  Logical {
    op: BoolOp,
    lhs: Box<BoolExpr>,
    rhs: Box<BoolExpr>,
    location: Location,
  },
  Relational {
    op: RelOp,
    lhs: Box<ValueExpr>,
    rhs: Box<ValueExpr>,
    location: Location,
  },
  /// Coercion of a value: branches on whether it is nonzero.
  BoolCast {
    inner: Box<ValueExpr>,
    location: Location,
  },
}

/// Either category, as handed around by the parser before a parent node
/// fixes the requirement.
#[derive(Debug)]
pub enum Expression {
  Value(ValueExpr),
  Bool(BoolExpr),
}

impl ValueExpr {
  pub fn location(&self) -> &Location {
    match self {
      ValueExpr::Constant { location, .. }
      | ValueExpr::StringLiteral { location, .. }
      | ValueExpr::Variable { location, .. }
      | ValueExpr::ArrayAccess { location, .. }
      | ValueExpr::Unary { location, .. }
      | ValueExpr::Binary { location, .. }
      | ValueExpr::Assignment { location, .. }
      | ValueExpr::Call { location, .. }
      | ValueExpr::ValueCast { location, .. } => location,
    }
  }

  /// True for the expressions that designate a writable storage location.
  pub fn is_lvalue(&self) -> bool {
    matches!(
      self,
      ValueExpr::Variable { .. } | ValueExpr::ArrayAccess { .. }
    )
  }

  /// Fold the expression to a constant, if its whole subtree is made of
  /// literals and operators. Arithmetic wraps like the emitted `addu` /
  /// `subu` / `mul` instructions, and division follows `divu`'s unsigned
  /// semantics so a folded result is bit-for-bit what the program would
  /// compute. Division by zero never folds; the emitted `divu` traps at
  /// runtime instead.
  pub fn precompute(&self) -> Option<i32> {
    match self {
      ValueExpr::Constant { value, .. } => Some(*value),
      ValueExpr::Unary { op, operand, .. } => {
        let value = operand.precompute()?;
        Some(match op {
          UnOp::Plus => value,
          UnOp::Neg => value.wrapping_neg(),
          UnOp::BitNot => !value,
        })
      }
      ValueExpr::Binary { op, lhs, rhs, .. } => {
        let lhs = lhs.precompute()?;
        let rhs = rhs.precompute()?;
        Some(match op {
          BinOp::Add => lhs.wrapping_add(rhs),
          BinOp::Sub => lhs.wrapping_sub(rhs),
          BinOp::Mul => lhs.wrapping_mul(rhs),
          BinOp::Div => {
            if rhs == 0 {
              return None;
            }
            ((lhs as u32) / (rhs as u32)) as i32
          }
          BinOp::BitAnd => lhs & rhs,
          BinOp::BitOr => lhs | rhs,
          BinOp::BitXor => lhs ^ rhs,
        })
      }
      _ => None,
    }
  }
}

impl BoolExpr {
  pub fn location(&self) -> &Location {
    match self {
      BoolExpr::Not { location, .. }
      | BoolExpr::Logical { location, .. }
      | BoolExpr::Relational { location, .. }
      | BoolExpr::BoolCast { location, .. } => location,
    }
  }
}

impl Expression {
  pub fn location(&self) -> &Location {
    match self {
      Expression::Value(v) => v.location(),
      Expression::Bool(b) => b.location(),
    }
  }

  /// Coerce into the value category, wrapping booleans in a `ValueCast`.
  /// Identity on expressions that already are values, so casts never nest.
  pub fn into_value(self) -> ValueExpr {
    match self {
      Expression::Value(v) => v,
      Expression::Bool(b) => {
        let location = b.location().clone();
        ValueExpr::ValueCast {
          inner: Box::new(b),
          location,
        }
      }
    }
  }

  /// Coerce into the boolean category, wrapping values in a `BoolCast`.
  pub fn into_bool(self) -> BoolExpr {
    match self {
      Expression::Bool(b) => b,
      Expression::Value(v) => {
        let location = v.location().clone();
        BoolExpr::BoolCast {
          inner: Box::new(v),
          location,
        }
      }
    }
  }

  // ----- Smart constructors used by the parser -----

  pub fn constant(value: i32, location: Location) -> Expression {
    Expression::Value(ValueExpr::Constant { value, location })
  }

  pub fn string_literal(bytes: Vec<u8>, location: Location) -> Expression {
    Expression::Value(ValueExpr::StringLiteral { bytes, location })
  }

  pub fn variable(name: String, location: Location) -> Expression {
    Expression::Value(ValueExpr::Variable { name, location })
  }

  pub fn array_access(name: String, index: Expression, location: Location) -> Expression {
    Expression::Value(ValueExpr::ArrayAccess {
      name,
      index: Box::new(index.into_value()),
      location,
    })
  }

  pub fn unary(op: UnOp, operand: Expression, op_location: &Location) -> Expression {
    let operand = operand.into_value();
    let location = op_location.merge(operand.location());
    Expression::Value(ValueExpr::Unary {
      op,
      operand: Box::new(operand),
      location,
    })
  }

  pub fn binary(op: BinOp, lhs: Expression, rhs: Expression) -> Expression {
    let lhs = lhs.into_value();
    let rhs = rhs.into_value();
    let location = lhs.location().merge(rhs.location());
    Expression::Value(ValueExpr::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
      location,
    })
  }

  /// Build an assignment, rejecting non-lvalue targets.
  pub fn assignment(target: Expression, value: Expression) -> CompileResult<Expression> {
    let target = target.into_value();
    if !target.is_lvalue() {
      return Err(CompileError::at(
        target.location(),
        "left-hand side of assignment is not assignable",
      ));
    }
    let value = value.into_value();
    let location = target.location().merge(value.location());
    Ok(Expression::Value(ValueExpr::Assignment {
      target: Box::new(target),
      value: Box::new(value),
      location,
    }))
  }

  pub fn call(name: String, args: Vec<Expression>, location: Location) -> Expression {
    Expression::Value(ValueExpr::Call {
      name,
      args: args.into_iter().map(Expression::into_value).collect(),
      location,
    })
  }

  pub fn not(operand: Expression, op_location: &Location) -> Expression {
    let operand = operand.into_bool();
    let location = op_location.merge(operand.location());
    Expression::Bool(BoolExpr::Not {
      operand: Box::new(operand),
      location,
    })
  }

  pub fn logical(op: BoolOp, lhs: Expression, rhs: Expression) -> Expression {
    let lhs = lhs.into_bool();
    let rhs = rhs.into_bool();
    let location = lhs.location().merge(rhs.location());
    Expression::Bool(BoolExpr::Logical {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
      location,
    })
  }

  pub fn relational(op: RelOp, lhs: Expression, rhs: Expression) -> Expression {
    let lhs = lhs.into_value();
    let rhs = rhs.into_value();
    let location = lhs.location().merge(rhs.location());
    Expression::Bool(BoolExpr::Relational {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
      location,
    })
  }
}

// ----- Statements -----

#[derive(Debug)]
pub struct StatementBlock {
  pub statements: Vec<Statement>,
  pub location: Location,
}

#[derive(Debug)]
pub struct SwitchCase {
  /// `None` marks the `default` clause.
  pub value: Option<i32>,
  pub body: Vec<Statement>,
  pub location: Location,
}

#[derive(Debug)]
pub enum Statement {
  Declaration {
    name: String,
    ty: SymbolType,
    location: Location,
  },
  Expression(Expression),
  Block(StatementBlock),
  IfElse {
    condition: BoolExpr,
    then_block: StatementBlock,
    else_block: Option<StatementBlock>,
    location: Location,
  },
  Switch {
    scrutinee: ValueExpr,
    cases: Vec<SwitchCase>,
    location: Location,
  },
  While {
    condition: BoolExpr,
    body: StatementBlock,
    location: Location,
  },
  For {
    init: Vec<Statement>,
    condition: BoolExpr,
    step: Option<Expression>,
    body: StatementBlock,
    location: Location,
  },
  Break {
    location: Location,
  },
  Continue {
    location: Location,
  },
  Return {
    value: Option<ValueExpr>,
    location: Location,
  },
}

impl Statement {
  pub fn location(&self) -> &Location {
    match self {
      Statement::Declaration { location, .. }
      | Statement::IfElse { location, .. }
      | Statement::Switch { location, .. }
      | Statement::While { location, .. }
      | Statement::For { location, .. }
      | Statement::Break { location }
      | Statement::Continue { location }
      | Statement::Return { location, .. } => location,
      Statement::Expression(expr) => expr.location(),
      Statement::Block(block) => &block.location,
    }
  }
}

// ----- Definitions -----

#[derive(Debug)]
pub enum FieldInit {
  /// A constant expression; must fold at compile time.
  Value(ValueExpr),
  /// A string literal initializing a global byte array.
  Bytes(Vec<u8>),
}

#[derive(Debug)]
pub struct FieldDefinition {
  pub name: String,
  pub ty: SymbolType,
  pub init: Option<FieldInit>,
  pub location: Location,
}

#[derive(Debug)]
pub struct Parameter {
  pub name: String,
  pub location: Location,
}

#[derive(Debug)]
pub struct FunctionDefinition {
  pub name: String,
  pub return_type: SymbolType,
  pub params: Vec<Parameter>,
  pub body: StatementBlock,
  pub location: Location,
}

#[derive(Debug)]
pub enum Definition {
  Field(FieldDefinition),
  Function(FunctionDefinition),
  /// Like a function, but with the fixed `main` entry label, no
  /// parameters, and an exit-syscall tail.
  Main(FunctionDefinition),
}

impl Definition {
  pub fn location(&self) -> &Location {
    match self {
      Definition::Field(f) => &f.location,
      Definition::Function(f) | Definition::Main(f) => &f.location,
    }
  }
}

#[derive(Debug)]
pub struct Program {
  pub file: Rc<str>,
  pub definitions: Vec<Definition>,
}
