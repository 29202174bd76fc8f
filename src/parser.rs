//! Recursive-descent parser producing the typed AST.
//!
//! The parser owns all syntactic knowledge: a precedence-climbing ladder
//! for expressions and a thin statement layer above it. Category coercion
//! is not its business – it hands sub-expressions to the AST smart
//! constructors, which insert the casts – but it is the place where
//! lvalue-ness, constant case labels, and declaration shapes are enforced,
//! because those are properties of the source text.

use crate::ast::{
  BinOp, BoolOp, Definition, Expression, FieldDefinition, FieldInit, FunctionDefinition, Parameter,
  Program, RelOp, Statement, StatementBlock, SwitchCase, UnOp,
};
use crate::error::{CompileError, CompileResult};
use crate::location::Location;
use crate::tokenizer::{Token, TokenKind};
use crate::types::SymbolType;

/// Parse a token stream (as produced by `tokenizer::tokenize`) into a
/// program.
pub fn parse(tokens: Vec<Token>) -> CompileResult<Program> {
  let mut stream = TokenStream::new(tokens);
  let file = stream.peek().location.file.clone();

  let mut definitions = Vec::new();
  while !stream.at_eof() {
    definitions.push(parse_definition(&mut stream)?);
  }

  log::trace!("parsed {} definitions from {}", definitions.len(), file);
  Ok(Program { file, definitions })
}

// ----- Definitions -----

fn parse_definition(stream: &mut TokenStream) -> CompileResult<Definition> {
  let is_void = stream.is("void");
  let type_loc = if is_void {
    stream.expect("void")?
  } else {
    stream.expect("int")?
  };
  let (name, name_loc) = stream.ident()?;

  if stream.is("(") {
    let return_type = if is_void {
      SymbolType::Void
    } else {
      SymbolType::Int
    };
    return parse_function(stream, name, return_type, type_loc);
  }
  if is_void {
    return Err(CompileError::at(&name_loc, "fields cannot be void"));
  }
  parse_field(stream, name, name_loc.merge(&type_loc))
}

fn parse_function(
  stream: &mut TokenStream,
  name: String,
  return_type: SymbolType,
  type_loc: Location,
) -> CompileResult<Definition> {
  stream.expect("(")?;
  let mut params = Vec::new();
  if !stream.is(")") {
    loop {
      stream.expect("int")?;
      let (param_name, param_loc) = stream.ident()?;
      params.push(Parameter {
        name: param_name,
        location: param_loc,
      });
      if !stream.accept(",") {
        break;
      }
    }
  }
  stream.expect(")")?;
  let body = parse_block(stream)?;
  let location = type_loc.merge(&body.location);

  let def = FunctionDefinition {
    name,
    return_type,
    params,
    body,
    location,
  };
  if def.name == "main" {
    if let Some(param) = def.params.first() {
      return Err(CompileError::at(&param.location, "main takes no parameters"));
    }
    return Ok(Definition::Main(def));
  }
  Ok(Definition::Function(def))
}

fn parse_field(
  stream: &mut TokenStream,
  name: String,
  location: Location,
) -> CompileResult<Definition> {
  let mut ty = SymbolType::Int;
  let mut init = None;

  if stream.accept("[") {
    if stream.accept("]") {
      // Length inferred from the string initializer.
      stream.expect("=")?;
      let (bytes, _) = stream.string()?;
      ty = SymbolType::Str {
        len: bytes.len() + 1,
      };
      init = Some(FieldInit::Bytes(bytes));
    } else {
      let (len, len_loc) = stream.number()?;
      if len <= 0 {
        return Err(CompileError::at(&len_loc, "array length must be positive"));
      }
      stream.expect("]")?;
      if stream.accept("=") {
        let (bytes, _) = stream.string()?;
        ty = SymbolType::Str { len: len as usize };
        init = Some(FieldInit::Bytes(bytes));
      } else {
        ty = SymbolType::Array { len: len as usize };
      }
    }
  } else if stream.accept("=") {
    let value = parse_expr(stream)?;
    init = Some(FieldInit::Value(value.into_value()));
  }

  let semi_loc = stream.expect(";")?;
  Ok(Definition::Field(FieldDefinition {
    name,
    ty,
    init,
    location: location.merge(&semi_loc),
  }))
}

// ----- Statements -----

fn parse_block(stream: &mut TokenStream) -> CompileResult<StatementBlock> {
  let open = stream.expect("{")?;
  let mut statements = Vec::new();
  loop {
    if stream.is("}") {
      break;
    }
    if stream.at_eof() {
      return Err(CompileError::at(&stream.location(), "expected \"}\""));
    }
    parse_stmt_into(stream, &mut statements)?;
  }
  let close = stream.expect("}")?;
  Ok(StatementBlock {
    statements,
    location: open.merge(&close),
  })
}

/// Parse one statement into `out`. Declarations may expand to several
/// statements (`int i = 5;` becomes a declaration plus an assignment), and
/// a bare `;` expands to none, which is why this pushes instead of
/// returning.
fn parse_stmt_into(stream: &mut TokenStream, out: &mut Vec<Statement>) -> CompileResult<()> {
  if stream.is("int") {
    return parse_declaration_into(stream, out);
  }
  if stream.accept(";") {
    return Ok(());
  }
  let statement = parse_stmt(stream)?;
  out.push(statement);
  Ok(())
}

fn parse_stmt(stream: &mut TokenStream) -> CompileResult<Statement> {
  match stream.keyword() {
    Some("if") => parse_if(stream),
    Some("switch") => parse_switch(stream),
    Some("while") => parse_while(stream),
    Some("for") => parse_for(stream),
    Some("break") => {
      let location = stream.expect("break")?.merge(&stream.expect(";")?);
      Ok(Statement::Break { location })
    }
    Some("continue") => {
      let location = stream.expect("continue")?.merge(&stream.expect(";")?);
      Ok(Statement::Continue { location })
    }
    Some("return") => parse_return(stream),
    Some("else") => Err(CompileError::at(
      &stream.location(),
      "unexpected 'else' without a matching 'if'",
    )),
    _ if stream.is("{") => Ok(Statement::Block(parse_block(stream)?)),
    _ => {
      let expr = parse_expr(stream)?;
      stream.expect(";")?;
      Ok(Statement::Expression(expr))
    }
  }
}

fn parse_declaration_into(stream: &mut TokenStream, out: &mut Vec<Statement>) -> CompileResult<()> {
  stream.expect("int")?;
  loop {
    let (name, name_loc) = stream.ident()?;
    if stream.accept("[") {
      let (len, len_loc) = stream.number()?;
      if len <= 0 {
        return Err(CompileError::at(&len_loc, "array length must be positive"));
      }
      let close = stream.expect("]")?;
      if stream.is("=") {
        return Err(CompileError::at(
          &stream.location(),
          "array initialisers are not supported",
        ));
      }
      out.push(Statement::Declaration {
        name,
        ty: SymbolType::Array { len: len as usize },
        location: name_loc.merge(&close),
      });
    } else {
      out.push(Statement::Declaration {
        name: name.clone(),
        ty: SymbolType::Int,
        location: name_loc.clone(),
      });
      if stream.accept("=") {
        let value = parse_expr(stream)?;
        let assignment = Expression::assignment(Expression::variable(name, name_loc), value)?;
        out.push(Statement::Expression(assignment));
      }
    }
    if !stream.accept(",") {
      break;
    }
  }
  stream.expect(";")?;
  Ok(())
}

fn parse_if(stream: &mut TokenStream) -> CompileResult<Statement> {
  let start = stream.expect("if")?;
  stream.expect("(")?;
  let condition = parse_expr(stream)?;
  stream.expect(")")?;
  let then_block = parse_block(stream)?;

  let else_block = if stream.accept("else") {
    if stream.is("if") {
      // else-if chains nest as a block around the inner if.
      let inner = parse_stmt(stream)?;
      let location = inner.location().clone();
      Some(StatementBlock {
        statements: vec![inner],
        location,
      })
    } else {
      Some(parse_block(stream)?)
    }
  } else {
    None
  };

  let end = else_block
    .as_ref()
    .map(|b| b.location.clone())
    .unwrap_or_else(|| then_block.location.clone());
  Ok(Statement::IfElse {
    condition: condition.into_bool(),
    then_block,
    else_block,
    location: start.merge(&end),
  })
}

fn parse_switch(stream: &mut TokenStream) -> CompileResult<Statement> {
  let start = stream.expect("switch")?;
  stream.expect("(")?;
  let scrutinee = parse_expr(stream)?;
  stream.expect(")")?;
  stream.expect("{")?;

  let mut cases = Vec::new();
  while !stream.is("}") {
    let (value, case_loc) = if stream.is("case") {
      let case_loc = stream.expect("case")?;
      let expr = parse_expr(stream)?.into_value();
      let value = expr.precompute().ok_or_else(|| {
        CompileError::at(expr.location(), "case value must be constant")
      })?;
      let colon = stream.expect(":")?;
      (Some(value), case_loc.merge(&colon))
    } else if stream.is("default") {
      let default_loc = stream.expect("default")?;
      let colon = stream.expect(":")?;
      (None, default_loc.merge(&colon))
    } else {
      return Err(CompileError::at(
        &stream.location(),
        format!("expected \"case\" or \"default\", but got \"{}\"", stream.describe()),
      ));
    };

    let mut body = Vec::new();
    while !stream.is("case") && !stream.is("default") && !stream.is("}") {
      if stream.at_eof() {
        return Err(CompileError::at(&stream.location(), "expected \"}\""));
      }
      parse_stmt_into(stream, &mut body)?;
    }
    cases.push(SwitchCase {
      value,
      body,
      location: case_loc,
    });
  }
  let end = stream.expect("}")?;

  Ok(Statement::Switch {
    scrutinee: scrutinee.into_value(),
    cases,
    location: start.merge(&end),
  })
}

fn parse_while(stream: &mut TokenStream) -> CompileResult<Statement> {
  let start = stream.expect("while")?;
  stream.expect("(")?;
  let condition = parse_expr(stream)?;
  stream.expect(")")?;
  let body = parse_block(stream)?;
  let location = start.merge(&body.location);
  Ok(Statement::While {
    condition: condition.into_bool(),
    body,
    location,
  })
}

fn parse_for(stream: &mut TokenStream) -> CompileResult<Statement> {
  let start = stream.expect("for")?;
  stream.expect("(")?;

  let mut init = Vec::new();
  if stream.is("int") {
    parse_declaration_into(stream, &mut init)?;
  } else {
    if !stream.is(";") {
      loop {
        let expr = parse_expr(stream)?;
        init.push(Statement::Expression(expr));
        if !stream.accept(",") {
          break;
        }
      }
    }
    stream.expect(";")?;
  }

  let condition = if stream.is(";") {
    // An omitted condition is constant true.
    Expression::constant(1, stream.location()).into_bool()
  } else {
    parse_expr(stream)?.into_bool()
  };
  stream.expect(";")?;

  let step = if stream.is(")") {
    None
  } else {
    Some(parse_expr(stream)?)
  };
  stream.expect(")")?;

  let body = parse_block(stream)?;
  let location = start.merge(&body.location);
  Ok(Statement::For {
    init,
    condition,
    step,
    body,
    location,
  })
}

fn parse_return(stream: &mut TokenStream) -> CompileResult<Statement> {
  let start = stream.expect("return")?;
  let value = if stream.is(";") {
    None
  } else {
    Some(parse_expr(stream)?.into_value())
  };
  let end = stream.expect(";")?;
  Ok(Statement::Return {
    value,
    location: start.merge(&end),
  })
}

// ----- Expressions -----

fn parse_expr(stream: &mut TokenStream) -> CompileResult<Expression> {
  parse_assignment(stream)
}

fn parse_assignment(stream: &mut TokenStream) -> CompileResult<Expression> {
  let lhs = parse_logical_or(stream)?;
  if stream.accept("=") {
    let rhs = parse_assignment(stream)?;
    return Expression::assignment(lhs, rhs);
  }
  Ok(lhs)
}

fn parse_logical_or(stream: &mut TokenStream) -> CompileResult<Expression> {
  let mut node = parse_logical_and(stream)?;
  while stream.accept("||") {
    let rhs = parse_logical_and(stream)?;
    node = Expression::logical(BoolOp::Or, node, rhs);
  }
  Ok(node)
}

fn parse_logical_and(stream: &mut TokenStream) -> CompileResult<Expression> {
  let mut node = parse_bit_or(stream)?;
  while stream.accept("&&") {
    let rhs = parse_bit_or(stream)?;
    node = Expression::logical(BoolOp::And, node, rhs);
  }
  Ok(node)
}

fn parse_bit_or(stream: &mut TokenStream) -> CompileResult<Expression> {
  let mut node = parse_bit_xor(stream)?;
  while stream.accept("|") {
    let rhs = parse_bit_xor(stream)?;
    node = Expression::binary(BinOp::BitOr, node, rhs);
  }
  Ok(node)
}

fn parse_bit_xor(stream: &mut TokenStream) -> CompileResult<Expression> {
  let mut node = parse_bit_and(stream)?;
  while stream.accept("^") {
    let rhs = parse_bit_and(stream)?;
    node = Expression::binary(BinOp::BitXor, node, rhs);
  }
  Ok(node)
}

fn parse_bit_and(stream: &mut TokenStream) -> CompileResult<Expression> {
  let mut node = parse_equality(stream)?;
  while stream.accept("&") {
    let rhs = parse_equality(stream)?;
    node = Expression::binary(BinOp::BitAnd, node, rhs);
  }
  Ok(node)
}

fn parse_equality(stream: &mut TokenStream) -> CompileResult<Expression> {
  let mut node = parse_relational(stream)?;
  loop {
    let op = if stream.accept("==") {
      RelOp::Eq
    } else if stream.accept("!=") {
      RelOp::Ne
    } else {
      break;
    };
    let rhs = parse_relational(stream)?;
    node = Expression::relational(op, node, rhs);
  }
  Ok(node)
}

fn parse_relational(stream: &mut TokenStream) -> CompileResult<Expression> {
  let mut node = parse_additive(stream)?;
  loop {
    let op = if stream.accept("<=") {
      RelOp::Le
    } else if stream.accept(">=") {
      RelOp::Ge
    } else if stream.accept("<") {
      RelOp::Lt
    } else if stream.accept(">") {
      RelOp::Gt
    } else {
      break;
    };
    let rhs = parse_additive(stream)?;
    node = Expression::relational(op, node, rhs);
  }
  Ok(node)
}

fn parse_additive(stream: &mut TokenStream) -> CompileResult<Expression> {
  let mut node = parse_multiplicative(stream)?;
  loop {
    let op = if stream.accept("+") {
      BinOp::Add
    } else if stream.accept("-") {
      BinOp::Sub
    } else {
      break;
    };
    let rhs = parse_multiplicative(stream)?;
    node = Expression::binary(op, node, rhs);
  }
  Ok(node)
}

fn parse_multiplicative(stream: &mut TokenStream) -> CompileResult<Expression> {
  let mut node = parse_unary(stream)?;
  loop {
    let op = if stream.accept("*") {
      BinOp::Mul
    } else if stream.accept("/") {
      BinOp::Div
    } else {
      break;
    };
    let rhs = parse_unary(stream)?;
    node = Expression::binary(op, node, rhs);
  }
  Ok(node)
}

fn parse_unary(stream: &mut TokenStream) -> CompileResult<Expression> {
  let op_loc = stream.location();
  if stream.accept("+") {
    let operand = parse_unary(stream)?;
    return Ok(Expression::unary(UnOp::Plus, operand, &op_loc));
  }
  if stream.accept("-") {
    let operand = parse_unary(stream)?;
    return Ok(Expression::unary(UnOp::Neg, operand, &op_loc));
  }
  if stream.accept("~") {
    let operand = parse_unary(stream)?;
    return Ok(Expression::unary(UnOp::BitNot, operand, &op_loc));
  }
  if stream.accept("!") {
    let operand = parse_unary(stream)?;
    return Ok(Expression::not(operand, &op_loc));
  }
  parse_primary(stream)
}

fn parse_primary(stream: &mut TokenStream) -> CompileResult<Expression> {
  if stream.accept("(") {
    let node = parse_expr(stream)?;
    stream.expect(")")?;
    return Ok(node);
  }

  match stream.peek().kind {
    TokenKind::Num => {
      let (value, location) = stream.number()?;
      Ok(Expression::constant(value, location))
    }
    TokenKind::Str => {
      let (bytes, location) = stream.string()?;
      Ok(Expression::string_literal(bytes, location))
    }
    TokenKind::Ident => {
      let (name, name_loc) = stream.ident()?;
      if stream.accept("(") {
        let mut args = Vec::new();
        if !stream.is(")") {
          loop {
            args.push(parse_assignment(stream)?);
            if !stream.accept(",") {
              break;
            }
          }
        }
        let close = stream.expect(")")?;
        return Ok(Expression::call(name, args, name_loc.merge(&close)));
      }
      if stream.accept("[") {
        let index = parse_expr(stream)?;
        let close = stream.expect("]")?;
        return Ok(Expression::array_access(name, index, name_loc.merge(&close)));
      }
      Ok(Expression::variable(name, name_loc))
    }
    _ => Err(CompileError::at(
      &stream.location(),
      format!("expected an expression, but got \"{}\"", stream.describe()),
    )),
  }
}

// ----- Token cursor -----

/// Lightweight cursor over the token vector. The vector always ends with
/// an `Eof` token, which `peek` keeps returning once the input runs out.
struct TokenStream {
  tokens: Vec<Token>,
  pos: usize,
}

impl TokenStream {
  fn new(tokens: Vec<Token>) -> Self {
    debug_assert!(matches!(
      tokens.last().map(|t| t.kind),
      Some(TokenKind::Eof)
    ));
    Self { tokens, pos: 0 }
  }

  fn peek(&self) -> &Token {
    self
      .tokens
      .get(self.pos)
      .unwrap_or_else(|| self.tokens.last().expect("token stream is never empty"))
  }

  fn location(&self) -> Location {
    self.peek().location.clone()
  }

  fn at_eof(&self) -> bool {
    self.peek().kind == TokenKind::Eof
  }

  /// Does the current token spell `symbol` (as punctuator or keyword)?
  fn is(&self, symbol: &str) -> bool {
    let token = self.peek();
    matches!(token.kind, TokenKind::Punctuator | TokenKind::Keyword) && token.text == symbol
  }

  fn keyword(&self) -> Option<&str> {
    let token = self.peek();
    (token.kind == TokenKind::Keyword).then_some(token.text.as_str())
  }

  /// Consume the current token if it matches.
  fn accept(&mut self, symbol: &str) -> bool {
    if self.is(symbol) {
      self.pos += 1;
      return true;
    }
    false
  }

  /// Consume a required token, returning its location for span building.
  fn expect(&mut self, symbol: &str) -> CompileResult<Location> {
    if self.is(symbol) {
      let location = self.location();
      self.pos += 1;
      return Ok(location);
    }
    Err(CompileError::at(
      &self.location(),
      format!("expected \"{symbol}\", but got \"{}\"", self.describe()),
    ))
  }

  fn ident(&mut self) -> CompileResult<(String, Location)> {
    let token = self.peek();
    if token.kind == TokenKind::Ident {
      let result = (token.text.clone(), token.location.clone());
      self.pos += 1;
      return Ok(result);
    }
    Err(CompileError::at(
      &self.location(),
      format!("expected an identifier, but got \"{}\"", self.describe()),
    ))
  }

  fn number(&mut self) -> CompileResult<(i32, Location)> {
    let token = self.peek();
    if token.kind == TokenKind::Num {
      let result = (
        token.value.expect("numeric token carries a value"),
        token.location.clone(),
      );
      self.pos += 1;
      return Ok(result);
    }
    Err(CompileError::at(
      &self.location(),
      format!("expected a number, but got \"{}\"", self.describe()),
    ))
  }

  fn string(&mut self) -> CompileResult<(Vec<u8>, Location)> {
    let token = self.peek();
    if token.kind == TokenKind::Str {
      let result = (
        token.bytes.clone().expect("string token carries bytes"),
        token.location.clone(),
      );
      self.pos += 1;
      return Ok(result);
    }
    Err(CompileError::at(
      &self.location(),
      format!("expected a string literal, but got \"{}\"", self.describe()),
    ))
  }

  /// Human-friendly description of the current token for diagnostics.
  fn describe(&self) -> String {
    let token = self.peek();
    match token.kind {
      TokenKind::Eof => "EOF".to_string(),
      TokenKind::Str => format!("\"{}\"", token.text),
      _ => token.text.clone(),
    }
  }
}
