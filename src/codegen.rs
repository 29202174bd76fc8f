//! Code generation: lower the typed AST into MIPS assembly text.
//!
//! Every statement compiles to a `Code` fragment; value expressions
//! additionally yield the symbol holding their result, and boolean
//! expressions take the pair of labels control should reach. Values move
//! through `$v0`/`$v1`, intermediate results live in reserved `$t`
//! registers, and the function prologue/epilogue is wrapped around the
//! body after it has compiled, once the frame size is known.

use crate::ast::{
  BinOp, BoolExpr, BoolOp, Definition, Expression, FieldDefinition, FieldInit, FunctionDefinition,
  Program, Statement, StatementBlock, ValueExpr,
};
use crate::code::{Code, TAB};
use crate::context::{ExpressionContext, FunctionContext, GlobalContext, LocalContext};
use crate::error::{CompileError, CompileResult, Diagnostic};
use crate::location::Location;
use crate::symbol::{mangle, temp_reg, ArrayPlace, Symbol};
use crate::types::{SymbolType, WORD};
use std::collections::HashSet;
use std::rc::Rc;

/// The hand-written runtime library, appended verbatim to every program.
pub const BUILTINS: &str = include_str!("builtins.asm");

fn undefined(name: &str, location: &Location) -> CompileError {
  CompileError::at(location, format!("undefined symbol \"{name}\""))
}

/// Load a symbol's value into a named register, rejecting the result of a
/// void call. This is the one place the "void function used as value"
/// error comes from.
fn load_into(symbol: &Symbol, reg: &str, code: &mut Code, location: &Location) -> CompileResult<()> {
  if symbol.is_void() {
    return Err(CompileError::at(location, "void function used as value"));
  }
  symbol.load_value(reg, code);
  Ok(())
}

// ----- Value expressions -----

impl ValueExpr {
  /// Emit code computing this expression and return the symbol holding the
  /// result. Every value-producing path returns a reserved temporary; only
  /// a call to a void function returns the unloadable void symbol.
  pub fn evaluate(&self, ctx: &mut ExpressionContext) -> CompileResult<(Code, Rc<Symbol>)> {
    match self {
      ValueExpr::Constant { value, location } => {
        let result = ctx.reserve_temp(location)?;
        let mut code = Code::new();
        let reg = result.register().expect("temporaries have registers");
        Symbol::Literal { value: *value }.load_value(&reg, &mut code);
        Ok((code, result))
      }

      ValueExpr::StringLiteral { location, .. } => Err(CompileError::at(
        location,
        "string literal used as a value",
      )),

      ValueExpr::Variable { name, location } => {
        let symbol = ctx.lookup(name).ok_or_else(|| undefined(name, location))?;
        match &*symbol {
          Symbol::Function { .. } => Err(CompileError::at(
            location,
            format!("\"{name}\" is a function, not a variable"),
          )),
          Symbol::Global { ty, .. } if !ty.is_value_type() => Err(CompileError::at(
            location,
            format!("symbol \"{name}\" of type \"{ty}\" cannot be used as a value"),
          )),
          _ => {
            let result = ctx.reserve_temp(location)?;
            let mut code = Code::new();
            let reg = result.register().expect("temporaries have registers");
            symbol.load_value(&reg, &mut code);
            Ok((code, result))
          }
        }
      }

      ValueExpr::ArrayAccess {
        name,
        index,
        location,
      } => {
        let symbol = ctx.lookup(name).ok_or_else(|| undefined(name, location))?;
        let Symbol::ArrayBase { len, .. } = &*symbol else {
          return Err(CompileError::at(
            location,
            format!("symbol \"{name}\" of type \"{}\" is not indexable", symbol.ty()),
          ));
        };
        let len = *len;

        let (mut code, index_sym) = index.evaluate(ctx)?;
        emit_bounds_check(&mut code, index, &index_sym, len, location)?;

        let address = ctx.reserve_temp(location)?;
        let address_reg = address.register().expect("temporaries have registers");
        index_sym.load_value("$v0", &mut code);
        code.op(format!("mul $v0, $v0, {WORD}"));
        symbol.load_value(&address_reg, &mut code);
        code.op(format!("addu {address_reg}, {address_reg}, $v0"));

        let result = ctx.reserve_temp(location)?;
        code.op(format!("lw $v0, 0({address_reg})"));
        result.save_value("$v0", &mut code);

        ctx.release(&index_sym);
        ctx.release(&address);
        Ok((code, result))
      }

      ValueExpr::Unary {
        op,
        operand,
        location,
      } => {
        let (mut code, operand_sym) = operand.evaluate(ctx)?;
        load_into(&operand_sym, "$v0", &mut code, operand.location())?;
        code.op(format!("{} $v0, $v0", op.mnemonic()));
        ctx.release(&operand_sym);
        let result = ctx.reserve_temp(location)?;
        result.save_value("$v0", &mut code);
        Ok((code, result))
      }

      ValueExpr::Binary {
        op,
        lhs,
        rhs,
        location,
      } => {
        if *op == BinOp::Div && rhs.precompute() == Some(0) {
          ctx.warn(location, "divide by zero");
        }
        let (mut code, lhs_sym) = lhs.evaluate(ctx)?;
        let (rhs_code, rhs_sym) = rhs.evaluate(ctx)?;
        code.append(rhs_code);
        load_into(&lhs_sym, "$v0", &mut code, lhs.location())?;
        load_into(&rhs_sym, "$v1", &mut code, rhs.location())?;
        code.op(format!("{} $v0, $v0, $v1", op.mnemonic()));
        ctx.release(&lhs_sym);
        ctx.release(&rhs_sym);
        let result = ctx.reserve_temp(location)?;
        result.save_value("$v0", &mut code);
        Ok((code, result))
      }

      ValueExpr::Assignment { target, value, .. } => {
        let (mut code, value_sym) = value.evaluate(ctx)?;
        code.append(target.assign(ctx, &value_sym)?);
        // The expression's own value is the value stored.
        Ok((code, value_sym))
      }

      ValueExpr::Call {
        name,
        args,
        location,
      } => {
        let symbol = ctx
          .lookup(name)
          .ok_or_else(|| CompileError::at(location, format!("function \"{name}\" is not defined")))?;
        let Symbol::Function { label, params, ret } = &*symbol else {
          return Err(CompileError::at(
            location,
            format!("\"{name}\" is not a function"),
          ));
        };
        if params.len() != args.len() {
          return Err(CompileError::at(
            location,
            format!(
              "arity mismatch: \"{name}\" takes {} argument{}, {} given",
              params.len(),
              if params.len() == 1 { "" } else { "s" },
              args.len()
            ),
          ));
        }

        let mut code = Code::new();
        let arg_bytes = WORD * args.len();
        if !args.is_empty() {
          code.op(format!("subu $sp, $sp, {arg_bytes}"));
        }
        // Arguments are evaluated strictly left to right, each stored into
        // its slot as soon as its value is known.
        for (slot, (arg, param_ty)) in args.iter().zip(params).enumerate() {
          let (arg_code, arg_sym) = arg.evaluate(ctx)?;
          code.append(arg_code);
          let arg_ty = arg_sym.ty();
          if !arg_ty.is_value_type() || !param_ty.is_value_type() {
            return Err(CompileError::at(
              arg.location(),
              format!("argument of type \"{arg_ty}\" is not compatible with type \"{param_ty}\""),
            ));
          }
          arg_sym.load_value("$v0", &mut code);
          code.op(format!("sw $v0, {}($sp)", WORD * slot));
          ctx.release(&arg_sym);
        }
        code.op(format!("jal {label}"));
        if !args.is_empty() {
          code.op(format!("addu $sp, $sp, {arg_bytes}"));
        }

        if *ret == SymbolType::Void {
          Ok((code, Rc::new(Symbol::Void)))
        } else {
          let result = ctx.reserve_temp(location)?;
          result.save_value("$v0", &mut code);
          Ok((code, result))
        }
      }

      ValueExpr::ValueCast { inner, location } => {
        let set_label = ctx.next_label();
        let clear_label = ctx.next_label();
        let end_label = ctx.next_label();
        let mut code = inner.evaluate(ctx, &set_label, &clear_label)?;
        code.label(&set_label);
        code.op("li $v0, 1");
        code.op(format!("j {end_label}"));
        code.label(&clear_label);
        code.op("move $v0, $zero");
        code.label(&end_label);
        let result = ctx.reserve_temp(location)?;
        result.save_value("$v0", &mut code);
        Ok((code, result))
      }
    }
  }

  /// Store `value` into the location this lvalue designates. Defined only
  /// for `Variable` and `ArrayAccess`; the AST constructors reject every
  /// other assignment target.
  fn assign(&self, ctx: &mut ExpressionContext, value: &Symbol) -> CompileResult<Code> {
    match self {
      ValueExpr::Variable { name, location } => {
        let symbol = ctx.lookup(name).ok_or_else(|| undefined(name, location))?;
        match &*symbol {
          Symbol::Global { ty, .. } if !ty.is_value_type() => Err(CompileError::at(
            location,
            format!("symbol \"{name}\" of type \"{ty}\" is not assignable"),
          )),
          Symbol::Global { .. } | Symbol::Local { .. } | Symbol::Param { .. } => {
            let mut code = Code::new();
            load_into(value, "$v0", &mut code, location)?;
            symbol.save_value("$v0", &mut code);
            Ok(code)
          }
          Symbol::ArrayBase { .. } => Err(CompileError::at(
            location,
            format!("symbol \"{name}\" of type \"{}\" is not assignable", symbol.ty()),
          )),
          Symbol::Function { .. } => Err(CompileError::at(
            location,
            format!("\"{name}\" is a function, not a variable"),
          )),
          Symbol::Literal { .. } | Symbol::Temp { .. } | Symbol::Void => {
            unreachable!("name tables never hold literals, temporaries, or void")
          }
        }
      }

      ValueExpr::ArrayAccess {
        name,
        index,
        location,
      } => {
        let symbol = ctx.lookup(name).ok_or_else(|| undefined(name, location))?;
        let Symbol::ArrayBase { len, .. } = &*symbol else {
          return Err(CompileError::at(
            location,
            format!("symbol \"{name}\" of type \"{}\" is not indexable", symbol.ty()),
          ));
        };
        let len = *len;

        let (mut code, index_sym) = index.evaluate(ctx)?;
        emit_bounds_check(&mut code, index, &index_sym, len, location)?;

        let address = ctx.reserve_temp(location)?;
        let address_reg = address.register().expect("temporaries have registers");
        index_sym.load_value("$v0", &mut code);
        code.op(format!("mul $v0, $v0, {WORD}"));
        symbol.load_value(&address_reg, &mut code);
        code.op(format!("addu {address_reg}, {address_reg}, $v0"));

        load_into(value, "$v1", &mut code, location)?;
        code.op(format!("sw $v1, 0({address_reg})"));

        ctx.release(&index_sym);
        ctx.release(&address);
        Ok(code)
      }

      _ => unreachable!("assignments to non-lvalues are rejected at construction"),
    }
  }
}

/// Check an array index against the declared length. A precomputable index
/// is checked right here at compile time; anything else defers to the
/// runtime helper, which aborts the program on a bad index.
fn emit_bounds_check(
  code: &mut Code,
  index: &ValueExpr,
  index_sym: &Symbol,
  len: usize,
  location: &Location,
) -> CompileResult<()> {
  if let Some(value) = index.precompute() {
    if value < 0 || value as usize >= len {
      return Err(CompileError::at(location, "array index is out of bounds"));
    }
    return Ok(());
  }
  code.op("# runtime array index bounds check");
  load_into(index_sym, "$a0", code, index.location())?;
  code.op(format!("li $a1, {len}"));
  code.op("jal check_bounds");
  Ok(())
}

// ----- Boolean expressions -----

impl BoolExpr {
  /// Emit code that transfers control to `true_label` or `false_label`
  /// according to this expression's truth. Control never falls through.
  pub fn evaluate(
    &self,
    ctx: &mut ExpressionContext,
    true_label: &str,
    false_label: &str,
  ) -> CompileResult<Code> {
    match self {
      // Negation swaps the targets.
      BoolExpr::Not { operand, .. } => operand.evaluate(ctx, false_label, true_label),

      BoolExpr::Logical { op, lhs, rhs, .. } => {
        let mid_label = ctx.next_label();
        let mut code = match op {
          // a && b: b is only reached through a's true exit.
          BoolOp::And => lhs.evaluate(ctx, &mid_label, false_label)?,
          // a || b: b is only reached through a's false exit.
          BoolOp::Or => lhs.evaluate(ctx, true_label, &mid_label)?,
        };
        code.label(&mid_label);
        code.append(rhs.evaluate(ctx, true_label, false_label)?);
        Ok(code)
      }

      BoolExpr::Relational { op, lhs, rhs, .. } => {
        let (mut code, lhs_sym) = lhs.evaluate(ctx)?;
        let (rhs_code, rhs_sym) = rhs.evaluate(ctx)?;
        code.append(rhs_code);
        load_into(&lhs_sym, "$v0", &mut code, lhs.location())?;
        load_into(&rhs_sym, "$v1", &mut code, rhs.location())?;
        code.op(format!("{} $v0, $v1, {true_label}", op.branch()));
        code.op(format!("j {false_label}"));
        ctx.release(&lhs_sym);
        ctx.release(&rhs_sym);
        Ok(code)
      }

      BoolExpr::BoolCast { inner, .. } => {
        let (mut code, sym) = inner.evaluate(ctx)?;
        load_into(&sym, "$v0", &mut code, inner.location())?;
        code.op(format!("bne $v0, $zero, {true_label}"));
        code.op(format!("j {false_label}"));
        ctx.release(&sym);
        Ok(code)
      }
    }
  }
}

// ----- Statements -----

/// Compile an expression in statement position, discarding its result. A
/// boolean expression branches to a single shared end label.
fn compile_expression_statement(
  expr: &Expression,
  ctx: &mut LocalContext,
) -> CompileResult<Code> {
  match expr {
    Expression::Value(value) => {
      let mut exprs = ExpressionContext::new(ctx);
      let (code, result) = value.evaluate(&mut exprs)?;
      exprs.release(&result);
      Ok(code)
    }
    Expression::Bool(boolean) => {
      let end_label = ctx.next_label();
      let mut exprs = ExpressionContext::new(ctx);
      let mut code = boolean.evaluate(&mut exprs, &end_label, &end_label)?;
      drop(exprs);
      code.label(&end_label);
      Ok(code)
    }
  }
}

impl StatementBlock {
  pub fn compile(&self, ctx: &mut LocalContext) -> CompileResult<Code> {
    let mut scope = ctx.nested();
    let mut code = Code::new();
    for statement in &self.statements {
      code.append(statement.compile(&mut scope)?);
    }
    Ok(code)
  }
}

impl Statement {
  pub fn compile(&self, ctx: &mut LocalContext) -> CompileResult<Code> {
    match self {
      Statement::Declaration { name, ty, location } => {
        ctx.declare_local(name, ty.clone(), location)?;
        Ok(Code::new())
      }

      Statement::Expression(expr) => compile_expression_statement(expr, ctx),

      Statement::Block(block) => block.compile(ctx),

      Statement::IfElse {
        condition,
        then_block,
        else_block,
        ..
      } => {
        let then_label = ctx.next_label();
        let else_label = ctx.next_label();
        // Without an else block, the else and end labels coincide.
        let end_label = if else_block.is_some() {
          ctx.next_label()
        } else {
          else_label.clone()
        };
        let mut code = {
          let mut exprs = ExpressionContext::new(ctx);
          condition.evaluate(&mut exprs, &then_label, &else_label)?
        };
        code.label(&then_label);
        code.append(then_block.compile(ctx)?);
        if let Some(else_block) = else_block {
          code.op(format!("j {end_label}"));
          code.label(&else_label);
          code.append(else_block.compile(ctx)?);
          code.label(&end_label);
        } else {
          code.label(&end_label);
        }
        Ok(code)
      }

      Statement::Switch {
        scrutinee,
        cases,
        location,
      } => {
        let mut seen = HashSet::new();
        let mut default_seen = false;
        for case in cases {
          match case.value {
            Some(value) => {
              if !seen.insert(value) {
                return Err(CompileError::at(
                  &case.location,
                  format!("duplicate case value {value}"),
                ));
              }
            }
            None => {
              if default_seen {
                return Err(CompileError::at(&case.location, "duplicate default case"));
              }
              default_seen = true;
            }
          }
        }

        let end_label = ctx.next_label();
        let mut labels = Vec::with_capacity(cases.len());
        let mut code;
        {
          let mut exprs = ExpressionContext::new(ctx);
          let (selector_code, selector) = scrutinee.evaluate(&mut exprs)?;
          code = selector_code;
          if selector.is_void() {
            return Err(CompileError::at(
              scrutinee.location(),
              "void function used as value",
            ));
          }
          let selector_reg = selector.register().expect("value results live in temporaries");
          let probe = exprs.reserve_temp(location)?;
          let probe_reg = probe.register().expect("temporaries have registers");
          for _ in cases {
            labels.push(exprs.next_label());
          }
          for (case, label) in cases.iter().zip(&labels) {
            if let Some(value) = case.value {
              Symbol::Literal { value }.load_value(&probe_reg, &mut code);
              code.op(format!("beq {selector_reg}, {probe_reg}, {label}"));
            }
          }
          let target = cases
            .iter()
            .position(|case| case.value.is_none())
            .map(|i| labels[i].as_str())
            .unwrap_or(end_label.as_str());
          code.op(format!("j {target}"));
          exprs.release(&probe);
          exprs.release(&selector);
        }

        // Case bodies in source order; the end of one falls through into
        // the next unless a break jumps out.
        ctx.func.push_break(end_label.clone());
        {
          let mut inner = ctx.nested();
          for (case, label) in cases.iter().zip(&labels) {
            code.label(label);
            for statement in &case.body {
              code.append(statement.compile(&mut inner)?);
            }
          }
        }
        ctx.func.pop_break();
        code.label(&end_label);
        Ok(code)
      }

      Statement::While {
        condition, body, ..
      } => {
        let top_label = ctx.next_label();
        let body_label = ctx.next_label();
        let end_label = ctx.next_label();
        let mut code = Code::new();
        code.label(&top_label);
        {
          let mut exprs = ExpressionContext::new(ctx);
          code.append(condition.evaluate(&mut exprs, &body_label, &end_label)?);
        }
        code.label(&body_label);
        ctx.func.push_break(end_label.clone());
        ctx.func.push_continue(top_label.clone());
        code.append(body.compile(ctx)?);
        ctx.func.pop_continue();
        ctx.func.pop_break();
        code.op(format!("j {top_label}"));
        code.label(&end_label);
        Ok(code)
      }

      Statement::For {
        init,
        condition,
        step,
        body,
        ..
      } => {
        // The init declarations live in their own scope wrapping the loop.
        let mut scope = ctx.nested();
        let mut code = Code::new();
        for statement in init {
          code.append(statement.compile(&mut scope)?);
        }
        let top_label = scope.next_label();
        let body_label = scope.next_label();
        let step_label = scope.next_label();
        let end_label = scope.next_label();
        code.label(&top_label);
        {
          let mut exprs = ExpressionContext::new(&mut scope);
          code.append(condition.evaluate(&mut exprs, &body_label, &end_label)?);
        }
        code.label(&body_label);
        scope.func.push_break(end_label.clone());
        scope.func.push_continue(step_label.clone());
        code.append(body.compile(&mut scope)?);
        scope.func.pop_continue();
        scope.func.pop_break();
        code.label(&step_label);
        if let Some(step) = step {
          code.append(compile_expression_statement(step, &mut scope)?);
        }
        code.op(format!("j {top_label}"));
        code.label(&end_label);
        Ok(code)
      }

      Statement::Break { location } => match ctx.func.break_label() {
        Some(label) => {
          let mut code = Code::new();
          code.op(format!("j {label}"));
          Ok(code)
        }
        None => Err(CompileError::at(location, "break outside loop/switch")),
      },

      Statement::Continue { location } => match ctx.func.continue_label() {
        Some(label) => {
          let mut code = Code::new();
          code.op(format!("j {label}"));
          Ok(code)
        }
        None => Err(CompileError::at(location, "continue outside loop")),
      },

      Statement::Return { value, location } => {
        let returns_value = ctx.func.return_type.is_value_type();
        let mut code = Code::new();
        match (value, returns_value) {
          (Some(expr), true) => {
            if let Some(folded) = expr.precompute() {
              code.op(format!("li $v0, {folded}"));
            } else {
              let mut exprs = ExpressionContext::new(ctx);
              let (expr_code, result) = expr.evaluate(&mut exprs)?;
              code.append(expr_code);
              load_into(&result, "$v0", &mut code, expr.location())?;
              exprs.release(&result);
            }
          }
          (None, false) => {}
          _ => {
            return Err(CompileError::at(
              location,
              "return value type does not match function return type",
            ));
          }
        }
        code.op(format!("j {}", ctx.func.return_label));
        Ok(code)
      }
    }
  }
}

// ----- Definitions -----

impl FieldDefinition {
  fn compile(&self) -> CompileResult<Code> {
    let mut code = Code::new();
    code.data_label(&mangle(&self.name));
    match (&self.ty, &self.init) {
      (SymbolType::Int, None) => code.directive(".word 0"),
      (SymbolType::Int, Some(FieldInit::Value(expr))) => {
        let value = expr
          .precompute()
          .ok_or_else(|| CompileError::at(expr.location(), "non-constant global initializer"))?;
        code.directive(format!(".word {value}"));
      }
      (SymbolType::Array { len }, None) => code.directive(format!(".space {}", WORD * len)),
      (SymbolType::Str { len }, Some(FieldInit::Bytes(bytes))) => {
        if bytes.len() + 1 > *len {
          return Err(CompileError::at(
            &self.location,
            format!("string literal does not fit in {len} bytes"),
          ));
        }
        emit_bytes(&mut code, bytes);
        let padding = len - bytes.len() - 1;
        if padding > 0 {
          code.directive(format!(".space {padding}"));
        }
      }
      _ => unreachable!("field shapes are fixed by the parser"),
    }
    Ok(code)
  }
}

/// Emit a NUL-terminated byte-array initializer. Content the assembler's
/// escape set can express goes out as a quoted `.asciiz`; anything else
/// falls back to a `.byte` list.
fn emit_bytes(code: &mut Code, bytes: &[u8]) {
  let expressible = bytes
    .iter()
    .all(|b| matches!(b, b' '..=b'~' | b'\n' | b'\t'));
  if expressible {
    let mut quoted = String::new();
    for &b in bytes {
      match b {
        b'\n' => quoted.push_str("\\n"),
        b'\t' => quoted.push_str("\\t"),
        b'"' => quoted.push_str("\\\""),
        b'\\' => quoted.push_str("\\\\"),
        _ => quoted.push(b as char),
      }
    }
    code.directive(format!(".asciiz \"{quoted}\""));
  } else {
    let mut values: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
    values.push("0".to_string());
    code.directive(format!(".byte {}", values.join(", ")));
  }
}

impl FunctionDefinition {
  fn compile(&self, ctx: &mut GlobalContext, is_main: bool) -> CompileResult<Code> {
    let label = if is_main {
      self.name.clone()
    } else {
      mangle(&self.name)
    };

    let mut func = FunctionContext::new(ctx, self.return_type.clone());
    for (index, param) in self.params.iter().enumerate() {
      func.declare_param(&param.name, index, &param.location)?;
    }

    // The body compiles first; the frame size (locals high-water mark plus
    // save slots for every touched $t register) is only known afterwards.
    let mut body_code = Code::new();
    {
      let mut scope = LocalContext::new(&mut func);
      for statement in &self.body.statements {
        body_code.append(statement.compile(&mut scope)?);
      }
    }

    let locals = func.frame_locals();
    let temps: Vec<u8> = func.used_temps.iter().copied().collect();
    let return_label = func.return_label.clone();
    let word = WORD as i32;
    let frame = 2 * word + locals + word * temps.len() as i32;
    let temp_slot = |slot: usize| -(locals + word * (slot as i32 + 1));

    let mut code = Code::new();
    code.label(&label);
    code.op(format!("subu $sp, $sp, {frame}"));
    code.op(format!("sw $ra, {}($sp)", frame - word));
    code.op(format!("sw $fp, {}($sp)", frame - 2 * word));
    code.op(format!("addu $fp, $sp, {}", frame - 2 * word));
    for (slot, index) in temps.iter().enumerate() {
      code.op(format!("sw {}, {}($fp)", temp_reg(*index), temp_slot(slot)));
    }
    code.append(body_code);
    code.label(&return_label);
    if is_main {
      // main has no caller; its return path is the exit syscall.
      code.op("li $v0, 10");
      code.op("syscall");
    } else {
      for (slot, index) in temps.iter().enumerate() {
        code.op(format!("lw {}, {}($fp)", temp_reg(*index), temp_slot(slot)));
      }
      code.op(format!("lw $ra, {word}($fp)"));
      code.op("move $sp, $fp");
      code.op("lw $fp, 0($sp)");
      code.op(format!("addu $sp, $sp, {}", 2 * word));
      code.op("jr $ra");
    }
    code.blank();
    Ok(code)
  }
}

impl Definition {
  /// First pass: bring the definition's name into the global namespace.
  fn register(&self, ctx: &mut GlobalContext) -> CompileResult<()> {
    match self {
      Definition::Field(field) => {
        let symbol = match &field.ty {
          SymbolType::Int => Symbol::Global {
            label: mangle(&field.name),
            ty: SymbolType::Int,
          },
          SymbolType::Array { len } => Symbol::ArrayBase {
            place: ArrayPlace::Label(mangle(&field.name)),
            len: *len,
          },
          SymbolType::Str { len } => Symbol::Global {
            label: mangle(&field.name),
            ty: SymbolType::Str { len: *len },
          },
          other => unreachable!("fields of type {other} are not parsed"),
        };
        ctx.declare(&field.name, symbol, &field.location)?;
      }
      Definition::Function(def) => register_function(ctx, def, mangle(&def.name))?,
      Definition::Main(def) => register_function(ctx, def, def.name.clone())?,
    }
    Ok(())
  }

  fn compile(&self, ctx: &mut GlobalContext) -> CompileResult<Code> {
    match self {
      Definition::Field(field) => field.compile(),
      Definition::Function(def) => def.compile(ctx, false),
      Definition::Main(def) => def.compile(ctx, true),
    }
  }
}

fn register_function(
  ctx: &mut GlobalContext,
  def: &FunctionDefinition,
  label: String,
) -> CompileResult<()> {
  ctx.declare(
    &def.name,
    Symbol::Function {
      label,
      params: vec![SymbolType::Int; def.params.len()],
      ret: def.return_type.clone(),
    },
    &def.location,
  )?;
  Ok(())
}

fn register_builtins(ctx: &mut GlobalContext) {
  let builtins: &[(&str, usize, SymbolType)] = &[
    ("print_int", 1, SymbolType::Void),
    ("print_char", 1, SymbolType::Void),
    ("read_int", 0, SymbolType::Int),
    ("read_char", 0, SymbolType::Int),
    ("exit", 0, SymbolType::Void),
    ("exit2", 1, SymbolType::Void),
  ];
  for (name, arity, ret) in builtins {
    ctx
      .declare(
        name,
        Symbol::Function {
          label: (*name).to_string(),
          params: vec![SymbolType::Int; *arity],
          ret: ret.clone(),
        },
        &Location::builtin(),
      )
      .expect("builtin names are unique");
  }
}

// ----- Program driver -----

impl Program {
  /// Compile the whole program to assembly text. Diagnostics stream
  /// through `report`; a definition that produced an error contributes no
  /// code, but the remaining definitions still compile so one run reports
  /// as many problems as possible.
  pub fn compile<F: FnMut(&Diagnostic)>(&self, mut report: F) -> String {
    let mut ctx = GlobalContext::new();
    register_builtins(&mut ctx);

    // First pass: register every top-level name, so functions may call
    // each other and globals may be referenced before their declaration.
    let mut registered = Vec::with_capacity(self.definitions.len());
    for definition in &self.definitions {
      match definition.register(&mut ctx) {
        Ok(()) => registered.push(true),
        Err(error) => {
          report(&Diagnostic::error(&error));
          registered.push(false);
        }
      }
    }
    log::trace!("registered {} top-level names", self.definitions.len());

    if !self
      .definitions
      .iter()
      .any(|d| matches!(d, Definition::Main(_)))
    {
      report(&Diagnostic::error(&CompileError::at(
        &Location::start_of(self.file.clone()),
        "no main function defined",
      )));
    }

    // Second pass: compile each definition in source order.
    let mut program_code = Code::new();
    for (definition, ok) in self.definitions.iter().zip(&registered) {
      if !*ok {
        continue;
      }
      match definition.compile(&mut ctx) {
        Ok(code) => program_code.append(code),
        Err(error) => report(&Diagnostic::error(&error)),
      }
      for diagnostic in ctx.diagnostics.drain(..) {
        report(&diagnostic);
      }
    }

    let mut out = String::new();
    out.push_str(".data\n");
    out.push_str(program_code.data());
    out.push_str(".text\n");
    out.push_str(".globl main\n");
    out.push_str(TAB);
    out.push_str("j main\n");
    out.push_str(program_code.text());
    out.push_str(BUILTINS);
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Severity;

  fn compile_collect(source: &str) -> (String, Vec<Diagnostic>) {
    let tokens = crate::tokenizer::tokenize(source, "test.c").unwrap();
    let program = crate::parser::parse(tokens).unwrap();
    let mut diagnostics = Vec::new();
    let asm = program.compile(|d| diagnostics.push(d.clone()));
    (asm, diagnostics)
  }

  fn compile_ok(source: &str) -> String {
    let (asm, diagnostics) = compile_collect(source);
    let errors: Vec<_> = diagnostics
      .iter()
      .filter(|d| d.severity == Severity::Error)
      .collect();
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_labels_unique(&asm);
    asm
  }

  fn first_error(source: &str) -> Diagnostic {
    let (_, diagnostics) = compile_collect(source);
    diagnostics
      .into_iter()
      .find(|d| d.severity == Severity::Error)
      .expect("expected a compile error")
  }

  /// Every label must be defined exactly once across the whole output.
  fn assert_labels_unique(asm: &str) {
    let mut seen = std::collections::HashSet::new();
    for line in asm.lines() {
      if let Some(label) = line.strip_suffix(':') {
        assert!(seen.insert(label.to_string()), "label {label} defined twice");
      }
    }
  }

  fn line_index(asm: &str, predicate: impl Fn(&str) -> bool) -> usize {
    asm
      .lines()
      .position(|line| predicate(line.trim()))
      .expect("expected line not found")
  }

  #[test]
  fn program_layout() {
    let asm = compile_ok("int main() { }");
    assert!(asm.starts_with(".data\n.text\n.globl main\n    j main\nmain:\n"));
    // main's return path is the exit syscall.
    assert!(asm.contains("li $v0, 10\n    syscall"));
    // The runtime library is appended.
    assert!(asm.contains("check_bounds_fail:"));
    assert!(asm.contains("print_int:"));
  }

  #[test]
  fn globals_and_arithmetic() {
    let asm = compile_ok("int r;\nint main() { r = 2 + 3 * 4 - 1; }");
    assert!(asm.contains("_r:\n    .word 0\n"));
    assert!(asm.contains("sw $v0, _r"));
    assert!(asm.contains("mul $v0, $v0, $v1"));
    assert!(asm.contains("addu $v0, $v0, $v1"));
    assert!(asm.contains("subu $v0, $v0, $v1"));
  }

  #[test]
  fn folded_global_initializer() {
    let asm = compile_ok("int c = 2 + 3 * 4;\nint main() { }");
    assert!(asm.contains("_c:\n    .word 14\n"));
  }

  #[test]
  fn non_constant_global_initializer() {
    let diagnostic = first_error("int a;\nint b = a + 1;\nint main() { }");
    assert!(diagnostic.message.contains("non-constant global initializer"));
    assert_eq!(diagnostic.location.start_line, 2);
  }

  #[test]
  fn short_circuit_right_operand_sits_behind_a_label() {
    let asm = compile_ok("int r; int x;\nint main() { r = x != 0 && 10 / x > 2; }");
    // The left operand's true exit branches to the mid label.
    let bne = line_index(&asm, |l| l.starts_with("bne $v0, $v1, "));
    let mid = asm
      .lines()
      .nth(bne)
      .unwrap()
      .trim()
      .rsplit(' ')
      .next()
      .unwrap()
      .to_string();
    let mid_def = line_index(&asm, |l| l == format!("{mid}:"));
    let divu = line_index(&asm, |l| l.starts_with("divu"));
    assert!(bne < mid_def, "mid label must follow the left operand");
    assert!(
      mid_def < divu,
      "the division belongs to the right operand, behind the mid label"
    );
  }

  #[test]
  fn divide_by_zero_warns_but_still_compiles() {
    let (asm, diagnostics) = compile_collect("int main() { int x; x = 1 / 0; }");
    let warnings: Vec<_> = diagnostics
      .iter()
      .filter(|d| d.severity == Severity::Warning)
      .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("divide by zero"));
    assert!(diagnostics.iter().all(|d| d.severity != Severity::Error));
    // Division by zero never folds; the divu is emitted and traps at run
    // time.
    assert!(asm.contains("divu"));
  }

  #[test]
  fn value_cast_materializes_one_or_zero() {
    let asm = compile_ok("int r;\nint main() { r = 1 < 2; }");
    assert!(asm.contains("blt $v0, $v1, "));
    assert!(asm.contains("li $v0, 1"));
    assert!(asm.contains("move $v0, $zero"));
  }

  #[test]
  fn statement_level_boolean_uses_one_shared_label() {
    let asm = compile_ok("int x;\nint main() { x == 1; }");
    let beq = line_index(&asm, |l| l.starts_with("beq $v0, $v1, "));
    let line = asm.lines().nth(beq).unwrap().trim();
    let target = line.rsplit(' ').next().unwrap();
    // The j on the false path goes to the same label.
    assert!(asm.contains(&format!("j {target}\n")));
    assert!(asm.contains(&format!("{target}:\n")));
  }

  #[test]
  fn break_outside_loop_is_reported() {
    let diagnostic = first_error("int main() { break; }");
    assert!(diagnostic.message.contains("break"));
    assert_eq!(diagnostic.location.start_line, 1);
  }

  #[test]
  fn continue_outside_loop_is_reported() {
    let diagnostic = first_error("int main() { continue; }");
    assert!(diagnostic.message.contains("continue"));
  }

  #[test]
  fn duplicate_case_values_are_reported() {
    let diagnostic =
      first_error("int main() { int x; switch (x) { case 7: break; case 7: break; } }");
    assert!(diagnostic.message.contains("duplicate case value 7"));
  }

  #[test]
  fn duplicate_default_cases_are_reported() {
    let diagnostic =
      first_error("int main() { int x; switch (x) { default: break; default: break; } }");
    assert!(diagnostic.message.contains("duplicate default"));
  }

  #[test]
  fn switch_dispatch_and_fall_through() {
    let asm = compile_ok(
      "int r; int x;\nint main() { switch (x) { case 1: r = r + 1; case 2: r = r + 10; break; case 3: r = r + 100; } }",
    );
    // One comparison per non-default case.
    let targets: Vec<String> = asm
      .lines()
      .filter(|l| l.trim().starts_with("beq ") && !l.contains("$zero"))
      .map(|l| l.trim().rsplit(' ').next().unwrap().to_string())
      .collect();
    assert_eq!(targets.len(), 3);
    // Case 1 falls through into case 2: no jump between their labels.
    let case1 = line_index(&asm, |l| l == format!("{}:", targets[0]));
    let case2 = line_index(&asm, |l| l == format!("{}:", targets[1]));
    let case3 = line_index(&asm, |l| l == format!("{}:", targets[2]));
    let between_1_and_2: Vec<&str> = asm
      .lines()
      .take(case2)
      .skip(case1 + 1)
      .map(str::trim)
      .collect();
    assert!(
      between_1_and_2.iter().all(|l| !l.starts_with("j ")),
      "case 1 must fall through into case 2"
    );
    // Case 2 ends in the break's jump out.
    let between_2_and_3: Vec<&str> = asm
      .lines()
      .take(case3)
      .skip(case2 + 1)
      .map(str::trim)
      .collect();
    assert_eq!(
      between_2_and_3.iter().filter(|l| l.starts_with("j ")).count(),
      1,
      "case 2 ends in the break"
    );
  }

  #[test]
  fn recursion_compiles_with_saved_temporaries() {
    let asm = compile_ok(
      "int r;\nint fact(int n) { if (n <= 1) { return 1; } return n * fact(n - 1); }\nint main() { r = fact(5); }",
    );
    assert!(asm.contains("_fact:"));
    assert!(asm.contains("jal _fact"));
    // The frame keeps live temporaries across the recursive call.
    assert!(asm.contains("sw $t0, "));
    assert!(asm.contains("lw $t0, "));
    assert!(asm.contains("jr $ra"));
  }

  #[test]
  fn parameters_arrive_on_the_stack() {
    let asm = compile_ok(
      "int r;\nint add(int a, int b) { return a + b; }\nint main() { r = add(2, 3); }",
    );
    // Caller side: argument slots below $sp, popped after the call.
    assert!(asm.contains("subu $sp, $sp, 8"));
    assert!(asm.contains("sw $v0, 0($sp)"));
    assert!(asm.contains("sw $v0, 4($sp)"));
    assert!(asm.contains("jal _add"));
    assert!(asm.contains("addu $sp, $sp, 8"));
    // Callee side: parameters at positive $fp offsets, loaded into the
    // temporaries the expression reserved.
    assert!(asm.contains("lw $t0, 8($fp)"));
    assert!(asm.contains("lw $t1, 12($fp)"));
  }

  #[test]
  fn arity_mismatch_is_reported() {
    let diagnostic = first_error("int f(int a) { return a; }\nint main() { f(1, 2); }");
    assert!(diagnostic.message.contains("arity"));
    assert_eq!(diagnostic.location.start_line, 2);
  }

  #[test]
  fn void_function_in_value_position_is_reported() {
    let diagnostic = first_error("int r;\nvoid f() { }\nint main() { r = f(); }");
    assert!(diagnostic.message.contains("void function used as value"));
  }

  #[test]
  fn void_call_in_statement_position_is_fine() {
    let asm = compile_ok("void f() { }\nint main() { f(); }");
    assert!(asm.contains("jal _f"));
  }

  #[test]
  fn builtins_are_callable_without_mangling() {
    let asm = compile_ok("int main() { print_int(42); print_char(10); }");
    assert!(asm.contains("jal print_int"));
    assert!(asm.contains("jal print_char"));
  }

  #[test]
  fn builtin_results_are_values() {
    let asm = compile_ok("int x;\nint main() { x = read_int(); }");
    assert!(asm.contains("jal read_int"));
    assert!(asm.contains("sw $v0, _x"));
  }

  #[test]
  fn redefining_a_builtin_is_reported() {
    let diagnostic = first_error("void print_int() { }\nint main() { }");
    assert!(diagnostic.message.contains("redeclaration"));
  }

  #[test]
  fn calling_a_variable_is_reported() {
    let diagnostic = first_error("int x;\nint main() { x(); }");
    assert!(diagnostic.message.contains("is not a function"));
  }

  #[test]
  fn using_a_function_as_a_variable_is_reported() {
    let diagnostic = first_error("int f() { return 0; }\nint main() { int y; y = f; }");
    assert!(diagnostic.message.contains("is a function, not a variable"));
  }

  #[test]
  fn undefined_symbols_do_not_stop_later_definitions() {
    let (asm, diagnostics) = compile_collect(
      "int f() { return missing; }\nint g() { return 1; }\nint main() { }",
    );
    let errors: Vec<_> = diagnostics
      .iter()
      .filter(|d| d.severity == Severity::Error)
      .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("undefined symbol \"missing\""));
    assert_eq!(errors[0].location.start_line, 1);
    // No partial assembly for the failing definition, full assembly for
    // the rest.
    assert!(!asm.contains("_f:"));
    assert!(asm.contains("_g:"));
  }

  #[test]
  fn duplicate_globals_are_reported_on_the_second() {
    let diagnostic = first_error("int x;\nint x;\nint main() { }");
    assert!(diagnostic.message.contains("redeclaration"));
    assert_eq!(diagnostic.location.start_line, 2);
  }

  #[test]
  fn local_redeclaration_and_shadowing() {
    let diagnostic = first_error("int main() { int x; int x; }");
    assert!(diagnostic.message.contains("already declared"));
    // Shadowing in a nested block is allowed.
    compile_ok("int main() { int x; x = 1; { int x; x = 2; } x = 3; }");
  }

  #[test]
  fn names_do_not_escape_their_block() {
    let diagnostic = first_error("int main() { { int y; } y = 1; }");
    assert!(diagnostic.message.contains("undefined symbol \"y\""));
  }

  #[test]
  fn global_arrays_reserve_space() {
    let asm = compile_ok("int a[5];\nint main() { }");
    assert!(asm.contains("_a:\n    .space 20\n"));
  }

  #[test]
  fn dynamic_indexing_calls_the_bounds_helper() {
    let asm = compile_ok("int a[5]; int i;\nint main() { a[i] = 2; i = a[i]; }");
    assert!(asm.contains("jal check_bounds"));
    assert!(asm.contains("li $a1, 5"));
    assert!(asm.contains("mul $v0, $v0, 4"));
    assert!(asm.contains("sw $v1, 0("));
    assert!(asm.contains("lw $v0, 0("));
  }

  #[test]
  fn constant_indices_are_checked_at_compile_time() {
    let diagnostic = first_error("int main() { int a[5]; a[5] = 1; }");
    assert!(diagnostic.message.contains("out of bounds"));
    // An in-range constant index needs no runtime check.
    let asm = compile_ok("int main() { int a[5]; a[4] = 1; }");
    assert!(!asm.contains("jal check_bounds"));
  }

  #[test]
  fn indexing_a_scalar_is_reported() {
    let diagnostic = first_error("int x;\nint main() { x[0] = 1; }");
    assert!(diagnostic.message.contains("not indexable"));
  }

  #[test]
  fn assigning_to_an_array_as_a_whole_is_reported() {
    let diagnostic = first_error("int a[5];\nint main() { a = 1; }");
    assert!(diagnostic.message.contains("not assignable"));
  }

  #[test]
  fn string_fields_emit_asciiz() {
    let asm = compile_ok("int msg[] = \"hi\\n\";\nint main() { }");
    assert!(asm.contains("_msg:\n    .asciiz \"hi\\n\"\n"));
  }

  #[test]
  fn string_fields_pad_to_their_declared_length() {
    let asm = compile_ok("int buf[10] = \"hi\";\nint main() { }");
    assert!(asm.contains("_buf:\n    .asciiz \"hi\"\n    .space 7\n"));
  }

  #[test]
  fn exotic_bytes_fall_back_to_byte_lists() {
    let asm = compile_ok("int blob[] = \"a\\x01b\";\nint main() { }");
    assert!(asm.contains(".byte 97, 1, 98, 0"));
  }

  #[test]
  fn oversized_string_literal_is_reported() {
    let diagnostic = first_error("int buf[2] = \"hi\";\nint main() { }");
    assert!(diagnostic.message.contains("does not fit"));
  }

  #[test]
  fn string_literal_in_an_expression_is_reported() {
    let diagnostic = first_error("int main() { int x; x = \"hi\"; }");
    assert!(diagnostic.message.contains("string literal"));
  }

  #[test]
  fn return_type_mismatches_are_reported() {
    let diagnostic = first_error("void f() { return 1; }\nint main() { }");
    assert!(diagnostic.message.contains("return value type"));
    let diagnostic = first_error("int f() { return; }\nint main() { }");
    assert!(diagnostic.message.contains("return value type"));
  }

  #[test]
  fn constant_returns_fold() {
    let asm = compile_ok("int five() { return 2 + 3; }\nint r;\nint main() { r = five(); }");
    assert!(asm.contains("li $v0, 5"));
  }

  #[test]
  fn main_may_return_early() {
    let asm = compile_ok("int main() { return 5; }");
    assert!(asm.contains("li $v0, 5"));
    assert!(asm.contains("li $v0, 10"));
  }

  #[test]
  fn missing_main_is_reported() {
    let diagnostic = first_error("int f() { return 0; }");
    assert!(diagnostic.message.contains("no main function defined"));
  }

  #[test]
  fn functions_may_call_forward() {
    let asm = compile_ok(
      "int r;\nint main() { r = later(); }\nint later() { return 7; }",
    );
    assert!(asm.contains("jal _later"));
    assert!(asm.contains("_later:"));
  }

  #[test]
  fn for_loop_with_continue() {
    let asm = compile_ok(
      "int s;\nint main() { int i; for (i = 1; i <= 10; i = i + 1) { if (i & 1) { continue; } s = s + i; } }",
    );
    assert!(asm.contains("ble $v0, $v1, "));
    assert!(asm.contains("and $v0, $v0, $v1"));
  }

  #[test]
  fn while_loop_shape() {
    let asm = compile_ok("int n;\nint main() { while (n > 0) { n = n - 1; } }");
    let bgt = line_index(&asm, |l| l.starts_with("bgt $v0, $v1, "));
    // The backward jump to the loop top precedes the end label.
    let top_label = {
      // The top label is the first minted label inside main.
      let main_start = line_index(&asm, |l| l == "main:");
      asm
        .lines()
        .skip(main_start)
        .map(str::trim)
        .find(|l| l.ends_with(':') && l.starts_with('L'))
        .unwrap()
        .trim_end_matches(':')
        .to_string()
    };
    assert!(asm.contains(&format!("j {top_label}\n")));
    assert!(bgt > 0);
  }

  #[test]
  fn deep_expressions_exhaust_the_register_pool() {
    // Nine right-nested additions peak at exactly ten live temporaries.
    let ok = "int x;\nint main() { x = 1+(2+(3+(4+(5+(6+(7+(8+(9+10)))))))); }";
    compile_ok(ok);
    let too_deep = "int x;\nint main() { x = 1+(2+(3+(4+(5+(6+(7+(8+(9+(10+11))))))))); }";
    let diagnostic = first_error(too_deep);
    assert!(diagnostic.message.contains("too complex"));
  }

  #[test]
  fn assignment_yields_its_value() {
    let asm = compile_ok("int a; int b;\nint main() { a = b = 3; }");
    // b's store happens before a's; both stores read the same temporary.
    let store_b = line_index(&asm, |l| l == "sw $v0, _b");
    let store_a = line_index(&asm, |l| l == "sw $v0, _a");
    assert!(store_b < store_a);
  }

  #[test]
  fn not_swaps_branch_targets() {
    let asm = compile_ok("int x;\nint main() { if (!(x == 0)) { x = 1; } }");
    // beq's taken branch must lead to the else/end label, not the then
    // label, because the negation swapped the targets.
    let beq_line = asm
      .lines()
      .map(str::trim)
      .find(|l| l.starts_with("beq $v0, $v1, "))
      .unwrap();
    let beq_target = beq_line.rsplit(' ').next().unwrap();
    let j_line = asm
      .lines()
      .map(str::trim)
      .find(|l| l.starts_with("j L") && !l.contains("main"))
      .unwrap();
    let j_target = j_line.rsplit(' ').next().unwrap();
    assert_ne!(beq_target, j_target);
  }
}
