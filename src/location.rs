//! Source spans attached to tokens, AST nodes, and diagnostics.
//!
//! A location covers a region of one source file: start and end line/column
//! pairs, both 1-based, with the end pointing one past the last character.
//! Spans compose with [`Location::merge`], taking the earliest start and the
//! latest end, so every AST node covers exactly the source it was built
//! from. Locations are only read back when a diagnostic is produced.

use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
  pub file: Rc<str>,
  pub start_line: u32,
  pub start_column: u32,
  pub end_line: u32,
  pub end_column: u32,
}

impl Location {
  pub fn new(file: Rc<str>, start: (u32, u32), end: (u32, u32)) -> Self {
    Self {
      file,
      start_line: start.0,
      start_column: start.1,
      end_line: end.0,
      end_column: end.1,
    }
  }

  /// A zero-width location at the very beginning of a file. Used for
  /// diagnostics that concern the file as a whole.
  pub fn start_of(file: Rc<str>) -> Self {
    Self::new(file, (1, 1), (1, 1))
  }

  /// The location of symbols that are not declared in any source file.
  pub fn builtin() -> Self {
    Self::start_of("<builtin>".into())
  }

  /// The smallest span covering both `self` and `other`.
  pub fn merge(&self, other: &Location) -> Location {
    let start = (self.start_line, self.start_column).min((other.start_line, other.start_column));
    let end = (self.end_line, self.end_column).max((other.end_line, other.end_column));
    Location::new(self.file.clone(), start, end)
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.start_line == self.end_line {
      write!(
        f,
        "{}:{}.{}-{}",
        self.file, self.start_line, self.start_column, self.end_column
      )
    } else {
      write!(
        f,
        "{}:{}.{}-{}.{}",
        self.file, self.start_line, self.start_column, self.end_line, self.end_column
      )
    }
  }
}
