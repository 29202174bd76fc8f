//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer knows nothing about semantics beyond recognising
//! keywords, operators, and literals. Multi-character punctuators are
//! matched before single-character ones to avoid ambiguity, and every
//! token carries the full source span it was scanned from.

use crate::error::{CompileError, CompileResult};
use crate::location::Location;
use std::rc::Rc;

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Ident,
  Keyword,
  Num,
  Str,
  Punctuator,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  pub value: Option<i32>,
  pub bytes: Option<Vec<u8>>,
  pub location: Location,
}

pub const KEYWORDS: &[&str] = &[
  "int", "void", "if", "else", "switch", "case", "default", "while", "for", "break", "continue",
  "return",
];

const MULTI_PUNCT: &[&str] = &["&&", "||", "==", "!=", "<=", ">="];
const SINGLE_PUNCT: &[u8] = b"+-*/&|^~!<>=(){}[];,:";

struct Scanner<'a> {
  bytes: &'a [u8],
  pos: usize,
  line: u32,
  column: u32,
  file: Rc<str>,
}

impl<'a> Scanner<'a> {
  fn new(source: &'a str, filename: &str) -> Self {
    Self {
      bytes: source.as_bytes(),
      pos: 0,
      line: 1,
      column: 1,
      file: filename.into(),
    }
  }

  fn peek(&self) -> Option<u8> {
    self.bytes.get(self.pos).copied()
  }

  fn peek_at(&self, offset: usize) -> Option<u8> {
    self.bytes.get(self.pos + offset).copied()
  }

  fn bump(&mut self) -> Option<u8> {
    let byte = self.peek()?;
    self.pos += 1;
    if byte == b'\n' {
      self.line += 1;
      self.column = 1;
    } else {
      self.column += 1;
    }
    Some(byte)
  }

  fn here(&self) -> (u32, u32) {
    (self.line, self.column)
  }

  fn span_from(&self, start: (u32, u32)) -> Location {
    Location::new(self.file.clone(), start, self.here())
  }

  fn point(&self) -> Location {
    Location::new(self.file.clone(), self.here(), self.here())
  }

  fn starts_with(&self, s: &str) -> bool {
    self.bytes[self.pos..].starts_with(s.as_bytes())
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof`
/// marker.
pub fn tokenize(source: &str, filename: &str) -> CompileResult<Vec<Token>> {
  let mut scanner = Scanner::new(source, filename);
  let mut tokens = Vec::new();

  while let Some(c) = scanner.peek() {
    if c.is_ascii_whitespace() {
      scanner.bump();
      continue;
    }

    if scanner.starts_with("//") {
      while let Some(b) = scanner.peek() {
        if b == b'\n' {
          break;
        }
        scanner.bump();
      }
      continue;
    }

    if scanner.starts_with("/*") {
      skip_block_comment(&mut scanner)?;
      continue;
    }

    if c.is_ascii_digit() {
      tokens.push(scan_number(&mut scanner)?);
      continue;
    }

    if c.is_ascii_alphabetic() || c == b'_' {
      tokens.push(scan_word(&mut scanner));
      continue;
    }

    if c == b'"' {
      tokens.push(scan_string(&mut scanner)?);
      continue;
    }

    if let Some(op) = MULTI_PUNCT.iter().find(|op| scanner.starts_with(op)) {
      let start = scanner.here();
      scanner.bump();
      scanner.bump();
      tokens.push(punct(op, scanner.span_from(start)));
      continue;
    }

    if SINGLE_PUNCT.contains(&c) {
      let start = scanner.here();
      scanner.bump();
      tokens.push(punct(&(c as char).to_string(), scanner.span_from(start)));
      continue;
    }

    return Err(CompileError::at(
      &scanner.point(),
      format!("invalid token: '{}'", c as char),
    ));
  }

  tokens.push(Token {
    kind: TokenKind::Eof,
    text: String::new(),
    value: None,
    bytes: None,
    location: scanner.point(),
  });

  log::trace!("scanned {} tokens from {}", tokens.len(), filename);
  Ok(tokens)
}

fn punct(text: &str, location: Location) -> Token {
  Token {
    kind: TokenKind::Punctuator,
    text: text.to_string(),
    value: None,
    bytes: None,
    location,
  }
}

fn skip_block_comment(scanner: &mut Scanner) -> CompileResult<()> {
  let start = scanner.here();
  scanner.bump();
  scanner.bump();
  loop {
    if scanner.peek().is_none() {
      return Err(CompileError::at(
        &scanner.span_from(start),
        "unterminated block comment",
      ));
    }
    if scanner.starts_with("*/") {
      scanner.bump();
      scanner.bump();
      return Ok(());
    }
    scanner.bump();
  }
}

fn scan_word(scanner: &mut Scanner) -> Token {
  let start = scanner.here();
  let from = scanner.pos;
  while let Some(b) = scanner.peek() {
    if b.is_ascii_alphanumeric() || b == b'_' {
      scanner.bump();
    } else {
      break;
    }
  }
  let text = std::str::from_utf8(&scanner.bytes[from..scanner.pos])
    .expect("identifier bytes are ASCII")
    .to_string();
  let kind = if KEYWORDS.contains(&text.as_str()) {
    TokenKind::Keyword
  } else {
    TokenKind::Ident
  };
  Token {
    kind,
    text,
    value: None,
    bytes: None,
    location: scanner.span_from(start),
  }
}

fn scan_number(scanner: &mut Scanner) -> CompileResult<Token> {
  let start = scanner.here();
  let from = scanner.pos;

  let hex = scanner.peek() == Some(b'0')
    && matches!(scanner.peek_at(1), Some(b'x') | Some(b'X'))
    && scanner.peek_at(2).is_some_and(|b| b.is_ascii_hexdigit());
  if hex {
    scanner.bump();
    scanner.bump();
    while scanner.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
      scanner.bump();
    }
  } else {
    while scanner.peek().is_some_and(|b| b.is_ascii_digit()) {
      scanner.bump();
    }
  }

  let text = std::str::from_utf8(&scanner.bytes[from..scanner.pos])
    .expect("number bytes are ASCII")
    .to_string();
  let location = scanner.span_from(start);

  let value = if hex {
    u32::from_str_radix(&text[2..], 16)
      .map(|v| v as i32)
      .map_err(|_| CompileError::at(&location, format!("integer literal {text} is out of range")))?
  } else {
    let wide: i64 = text
      .parse()
      .map_err(|_| CompileError::at(&location, format!("integer literal {text} is out of range")))?;
    i32::try_from(wide)
      .map_err(|_| CompileError::at(&location, format!("integer literal {text} is out of range")))?
  };

  Ok(Token {
    kind: TokenKind::Num,
    text,
    value: Some(value),
    bytes: None,
    location,
  })
}

/// Scan a string literal, decoding the C escapes `\n \t \r \\ \" \' \0`
/// and `\xHH` into raw bytes.
fn scan_string(scanner: &mut Scanner) -> CompileResult<Token> {
  let start = scanner.here();
  scanner.bump(); // opening quote
  let mut bytes = Vec::new();

  loop {
    let Some(c) = scanner.peek() else {
      return Err(CompileError::at(
        &scanner.span_from(start),
        "unterminated string literal",
      ));
    };
    match c {
      b'"' => {
        scanner.bump();
        break;
      }
      b'\n' => {
        return Err(CompileError::at(
          &scanner.span_from(start),
          "unterminated string literal",
        ));
      }
      b'\\' => {
        scanner.bump();
        let escape_loc = scanner.point();
        match scanner.bump() {
          Some(b'n') => bytes.push(b'\n'),
          Some(b't') => bytes.push(b'\t'),
          Some(b'r') => bytes.push(b'\r'),
          Some(b'\\') => bytes.push(b'\\'),
          Some(b'"') => bytes.push(b'"'),
          Some(b'\'') => bytes.push(b'\''),
          Some(b'0') => bytes.push(0),
          Some(b'x') => {
            let hi = scanner.bump();
            let lo = scanner.bump();
            match (hi.and_then(hex_digit), lo.and_then(hex_digit)) {
              (Some(hi), Some(lo)) => bytes.push(hi * 16 + lo),
              _ => {
                return Err(CompileError::at(
                  &escape_loc,
                  "\\x escape requires two hexadecimal digits",
                ));
              }
            }
          }
          Some(other) => {
            return Err(CompileError::at(
              &escape_loc,
              format!("unknown escape sequence '\\{}'", other as char),
            ));
          }
          None => {
            return Err(CompileError::at(
              &scanner.span_from(start),
              "unterminated string literal",
            ));
          }
        }
      }
      0x80.. => {
        return Err(CompileError::at(
          &scanner.point(),
          "string literals must be ASCII",
        ));
      }
      _ => {
        scanner.bump();
        bytes.push(c);
      }
    }
  }

  Ok(Token {
    kind: TokenKind::Str,
    text: String::from_utf8_lossy(&bytes).into_owned(),
    value: None,
    bytes: Some(bytes),
    location: scanner.span_from(start),
  })
}

fn hex_digit(b: u8) -> Option<u8> {
  (b as char).to_digit(16).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source, "test.c")
      .unwrap()
      .into_iter()
      .map(|t| t.kind)
      .collect()
  }

  #[test]
  fn scans_a_simple_statement() {
    let tokens = tokenize("int x = 42;", "test.c").unwrap();
    let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, ["int", "x", "=", "42", ";", ""]);
    assert_eq!(tokens[0].kind, TokenKind::Keyword);
    assert_eq!(tokens[1].kind, TokenKind::Ident);
    assert_eq!(tokens[3].value, Some(42));
    assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
  }

  #[test]
  fn multi_character_punctuators_win() {
    let tokens = tokenize("a<=b && c||d", "test.c").unwrap();
    let puncts: Vec<&str> = tokens
      .iter()
      .filter(|t| t.kind == TokenKind::Punctuator)
      .map(|t| t.text.as_str())
      .collect();
    assert_eq!(puncts, ["<=", "&&", "||"]);
  }

  #[test]
  fn hex_literals() {
    let tokens = tokenize("0x10 0xffffffff", "test.c").unwrap();
    assert_eq!(tokens[0].value, Some(16));
    assert_eq!(tokens[1].value, Some(-1));
  }

  #[test]
  fn decimal_literal_out_of_range() {
    let err = tokenize("2147483648", "test.c").unwrap_err();
    assert!(err.message.contains("out of range"));
  }

  #[test]
  fn string_escapes_decode_to_bytes() {
    let tokens = tokenize(r#""a\n\t\\\"\0\x41""#, "test.c").unwrap();
    assert_eq!(
      tokens[0].bytes.as_deref(),
      Some(&[b'a', b'\n', b'\t', b'\\', b'"', 0, 0x41][..])
    );
  }

  #[test]
  fn unknown_escape_is_an_error() {
    let err = tokenize(r#""\q""#, "test.c").unwrap_err();
    assert!(err.message.contains("unknown escape"));
  }

  #[test]
  fn unterminated_string_is_an_error() {
    let err = tokenize("\"abc", "test.c").unwrap_err();
    assert!(err.message.contains("unterminated string"));
  }

  #[test]
  fn comments_are_skipped() {
    assert_eq!(
      kinds("1 // line\n/* block\nstill */ 2"),
      [TokenKind::Num, TokenKind::Num, TokenKind::Eof]
    );
    let err = tokenize("/* open", "test.c").unwrap_err();
    assert!(err.message.contains("unterminated block comment"));
  }

  #[test]
  fn locations_track_lines_and_columns() {
    let tokens = tokenize("int\n  x;", "test.c").unwrap();
    let x = &tokens[1];
    assert_eq!((x.location.start_line, x.location.start_column), (2, 3));
    assert_eq!((x.location.end_line, x.location.end_column), (2, 4));
  }

  #[test]
  fn invalid_byte_is_reported() {
    let err = tokenize("int @;", "test.c").unwrap_err();
    assert!(err.message.contains("invalid token"));
  }
}
