//! A single line of SPIR-V textual assembly
//!
//! Lines are kept as raw text and queried on demand. An instruction has the
//! shape `[%result =] Opcode operand*`; identifiers are tokens starting with
//! the `%` sigil and running to the next whitespace or quote.

use std::collections::HashMap;
use std::fmt;

/// Sigil that starts every identifier
pub const ID_SIGIL: char = '%';

/// Comment marker
pub const COMMENT_MARKER: char = ';';

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Line {
    text: String,
}

/// Byte range of one identifier token inside a line
type Span = (usize, usize);

fn is_id_terminator(ch: char) -> bool {
    ch.is_whitespace() || ch == '"'
}

/// Locate every identifier token at or after `start`
fn id_spans(s: &str, start: usize) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut begin: Option<usize> = None;

    for (pos, ch) in s[start..].char_indices() {
        let pos = pos + start;
        match begin {
            Some(b) if is_id_terminator(ch) => {
                spans.push((b, pos));
                begin = None;
            }
            Some(_) => {}
            None if ch == ID_SIGIL => begin = Some(pos),
            None => {}
        }
    }

    if let Some(b) = begin {
        spans.push((b, s.len()));
    }

    spans
}

/// Rebuild `s` with the given spans replaced
fn splice_spans(s: &str, replacements: &[(Span, &str)]) -> String {
    let mut out = String::with_capacity(s.len());
    let mut cursor = 0;
    for ((begin, end), new) in replacements {
        out.push_str(&s[cursor..*begin]);
        out.push_str(new);
        cursor = *end;
    }
    out.push_str(&s[cursor..]);
    out
}

impl Line {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Build an instruction line from its parts, single-space separated
    pub fn from_parts(lhs: Option<&str>, opcode: &str, operands: &[&str]) -> Self {
        let mut text = String::new();
        if let Some(lhs) = lhs {
            text.push_str(lhs);
            text.push_str(" = ");
        }
        text.push_str(opcode);
        for operand in operands {
            text.push(' ');
            text.push_str(operand);
        }
        Self { text }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn trim(&mut self) {
        let trimmed = self.text.trim();
        if trimmed.len() != self.text.len() {
            self.text = trimmed.to_string();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// False for blank lines and pure comments
    pub fn has_code(&self) -> bool {
        let s = self.text.trim_start();
        !s.is_empty() && !s.starts_with(COMMENT_MARKER)
    }

    pub fn contains(&self, s: &str) -> bool {
        self.text.contains(s)
    }

    /// All identifiers, in textual order
    pub fn identifiers(&self) -> Vec<&str> {
        self.identifiers_from(0)
    }

    /// Identifiers starting at byte offset `start` or later
    pub fn identifiers_from(&self, start: usize) -> Vec<&str> {
        if start >= self.text.len() || !self.text.is_char_boundary(start) {
            return Vec::new();
        }
        id_spans(&self.text, start)
            .into_iter()
            .map(|(b, e)| &self.text[b..e])
            .collect()
    }

    /// Defined identifier of `%id = ...`, if any
    pub fn lhs_identifier(&self) -> Option<&str> {
        let (lhs, _) = self.text.split_once('=')?;
        let lhs = lhs.trim();
        if lhs.starts_with(ID_SIGIL) && !lhs.contains(char::is_whitespace) {
            Some(lhs)
        } else {
            None
        }
    }

    /// Text after the `=`, trimmed
    pub fn rhs(&self) -> Option<&str> {
        self.lhs_identifier()?;
        let (_, rhs) = self.text.split_once('=')?;
        Some(rhs.trim())
    }

    /// Instruction text without the `%id =` prefix
    fn instruction(&self) -> &str {
        match self.rhs() {
            Some(rhs) => rhs,
            None => self.text.trim(),
        }
    }

    pub fn opcode(&self) -> Option<&str> {
        if !self.has_code() {
            return None;
        }
        self.instruction().split_whitespace().next()
    }

    pub fn is_opcode(&self, opcode: &str) -> bool {
        self.opcode() == Some(opcode)
    }

    /// Every token after the opcode, identifiers and literals alike
    pub fn operands(&self) -> Vec<&str> {
        if !self.has_code() {
            return Vec::new();
        }
        self.instruction().split_whitespace().skip(1).collect()
    }

    /// Identifiers on the right-hand side of `%id = Opcode ...`
    pub fn rhs_identifiers(&self) -> Vec<&str> {
        match self.rhs() {
            Some(rhs) => id_spans(rhs, 0).into_iter().map(|(b, e)| &rhs[b..e]).collect(),
            None => Vec::new(),
        }
    }

    /// Identifiers used (not defined) by this instruction
    pub fn operand_identifiers(&self) -> Vec<&str> {
        if self.lhs_identifier().is_some() {
            self.rhs_identifiers()
        } else {
            self.identifiers()
        }
    }

    /// Replace the first whole-token occurrence of `original`
    pub fn replace_id(&mut self, original: &str, new: &str) -> bool {
        let found = id_spans(&self.text, 0)
            .into_iter()
            .find(|&(b, e)| &self.text[b..e] == original);

        match found {
            Some(span) => {
                self.text = splice_spans(&self.text, &[(span, new)]);
                true
            }
            None => false,
        }
    }

    /// Replace every whole-token occurrence of `original`, in one pass
    pub fn replace_all_ids(&mut self, original: &str, new: &str) -> usize {
        let spans: Vec<(Span, &str)> = id_spans(&self.text, 0)
            .into_iter()
            .filter(|&(b, e)| &self.text[b..e] == original)
            .map(|span| (span, new))
            .collect();

        if !spans.is_empty() {
            self.text = splice_spans(&self.text, &spans);
        }
        spans.len()
    }

    /// Rename operand identifiers through `renames`, leaving the defined id alone
    pub fn rename_operands(&mut self, renames: &HashMap<String, String>) -> usize {
        if renames.is_empty() {
            return 0;
        }

        let skip_until = match self.lhs_identifier() {
            Some(_) => self.text.find('=').map_or(0, |p| p + 1),
            None => 0,
        };

        let spans: Vec<(Span, &str)> = id_spans(&self.text, skip_until)
            .into_iter()
            .filter_map(|(b, e)| {
                renames
                    .get(&self.text[b..e])
                    .map(|new| ((b, e), new.as_str()))
            })
            .collect();

        if !spans.is_empty() {
            self.text = splice_spans(&self.text, &spans);
        }
        spans.len()
    }

    /// Prepend `prefix` to every identifier (`%x` becomes `%<prefix>x`)
    pub fn prefix_identifiers(&mut self, prefix: &str) {
        if self.text.contains(ID_SIGIL) {
            let with_prefix = format!("{}{}", ID_SIGIL, prefix);
            self.text = self.text.replace(ID_SIGIL, &with_prefix);
        }
    }

    /// Replace the first literal occurrence of `original`
    pub fn replace_str(&mut self, original: &str, new: &str) -> bool {
        if !self.text.contains(original) {
            return false;
        }
        self.text = self.text.replacen(original, new, 1);
        true
    }

    /// Replace every literal occurrence of `original`
    pub fn replace_all_str(&mut self, original: &str, new: &str) -> usize {
        let count = self.text.matches(original).count();
        if count > 0 {
            self.text = self.text.replace(original, new);
        }
        count
    }

    /// Logically delete the line; compaction happens in a later pass
    pub fn mark_as_empty(&mut self) {
        self.text.clear();
    }
}

impl From<&str> for Line {
    fn from(text: &str) -> Self {
        Line::new(text)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}
