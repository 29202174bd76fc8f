//! Append-only assembly fragments.
//!
//! A `Code` value accumulates two string buffers: the text section
//! (instructions, indented one tab stop) and the data section (labels and
//! storage directives). Fragments concatenate section-wise and in order, so
//! a definition that fails to compile simply never gets its fragment
//! appended to the program.

pub const TAB: &str = "    ";

#[derive(Debug, Default, Clone)]
pub struct Code {
  text: String,
  data: String,
}

impl Code {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append one instruction line to the text section.
  pub fn op(&mut self, instruction: impl AsRef<str>) {
    self.text.push_str(TAB);
    self.text.push_str(instruction.as_ref());
    self.text.push('\n');
  }

  /// Place a label in the text section.
  pub fn label(&mut self, name: &str) {
    self.text.push_str(name);
    self.text.push_str(":\n");
  }

  /// A blank separator line in the text section.
  pub fn blank(&mut self) {
    self.text.push('\n');
  }

  /// Place a label in the data section.
  pub fn data_label(&mut self, name: &str) {
    self.data.push_str(name);
    self.data.push_str(":\n");
  }

  /// Append one storage directive line to the data section.
  pub fn directive(&mut self, line: impl AsRef<str>) {
    self.data.push_str(TAB);
    self.data.push_str(line.as_ref());
    self.data.push('\n');
  }

  /// Concatenate another fragment onto this one, section-wise.
  pub fn append(&mut self, other: Code) {
    self.text.push_str(&other.text);
    self.data.push_str(&other.data);
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn data(&self) -> &str {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sections_accumulate_independently() {
    let mut code = Code::new();
    code.op("li $v0, 1");
    code.data_label("_x");
    code.directive(".word 7");
    code.label("L0");
    code.op("jr $ra");
    assert_eq!(code.text(), "    li $v0, 1\nL0:\n    jr $ra\n");
    assert_eq!(code.data(), "_x:\n    .word 7\n");
  }

  #[test]
  fn append_preserves_order_within_sections() {
    let mut a = Code::new();
    a.op("first");
    a.directive(".word 1");
    let mut b = Code::new();
    b.op("second");
    b.directive(".word 2");
    a.append(b);
    assert_eq!(a.text(), "    first\n    second\n");
    assert_eq!(a.data(), "    .word 1\n    .word 2\n");
  }
}
