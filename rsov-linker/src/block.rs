//! Structural blocks of a module
//!
//! A block is a contiguous run of lines sharing one structural role. The
//! variants of [`Block`] appear in a module in the order of [`BlockKind`].

use crate::function::FunctionBlock;
use crate::line::Line;
use log::debug;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Block kinds, declared in canonical module order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockKind {
    Header,
    Decorations,
    TypesAndConstants,
    Variables,
    FunctionDecl,
    Function,
    MainFunction,
}

impl BlockKind {
    pub fn name(&self) -> &'static str {
        match self {
            BlockKind::Header => "Header",
            BlockKind::Decorations => "Decor",
            BlockKind::TypesAndConstants => "TypeAndConst",
            BlockKind::Variables => "Var",
            BlockKind::FunctionDecl => "FunDecl",
            BlockKind::Function => "Function",
            BlockKind::MainFunction => "MainFun",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ordered lines of one block
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineBlock {
    lines: Vec<Line>,
}

impl LineBlock {
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    pub fn from_lines(lines: impl IntoIterator<Item = Line>) -> Self {
        let mut block = Self::new();
        for line in lines {
            block.add_line(line);
        }
        block
    }

    /// Append a line, trimming surrounding whitespace
    pub fn add_line(&mut self, mut line: Line) {
        line.trim();
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn lines_mut(&mut self) -> &mut [Line] {
        &mut self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn has_code(&self) -> bool {
        self.lines.iter().any(Line::has_code)
    }

    pub fn last_line(&self) -> Option<&Line> {
        self.lines.last()
    }

    /// Whole-token occurrences of `id` across the block
    pub fn id_count(&self, id: &str) -> usize {
        self.lines
            .iter()
            .map(|l| l.identifiers().into_iter().filter(|i| *i == id).count())
            .sum()
    }

    pub fn replace_all_ids(&mut self, old: &str, new: &str) -> usize {
        self.lines
            .iter_mut()
            .map(|l| l.replace_all_ids(old, new))
            .sum()
    }

    pub fn remove_non_code_lines(&mut self) {
        self.lines.retain(Line::has_code);
    }

    /// Drop lines left blank by logical deletion
    pub fn remove_empty_lines(&mut self) {
        self.lines.retain(|l| !l.is_empty());
    }
}

/// Module header: capabilities, imports, entry points, debug strings
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderBlock {
    block: LineBlock,
}

impl HeaderBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernel names embedded as `<list_id> = OpString "%k1 %k2 "`, in order.
    /// Returns `None` when the header carries no such line.
    pub fn kernel_names(&self, list_id: &str) -> Option<Vec<&str>> {
        self.block
            .lines()
            .iter()
            .filter(|l| l.is_opcode("OpString"))
            .find(|l| l.lhs_identifier() == Some(list_id))
            .map(|l| l.rhs_identifiers())
    }
}

impl Deref for HeaderBlock {
    type Target = LineBlock;

    fn deref(&self) -> &LineBlock {
        &self.block
    }
}

impl DerefMut for HeaderBlock {
    fn deref_mut(&mut self) -> &mut LineBlock {
        &mut self.block
    }
}

/// One structural block of a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Header(HeaderBlock),
    Decorations(LineBlock),
    TypesAndConstants(LineBlock),
    Variables(LineBlock),
    FunctionDecl(LineBlock),
    Function(FunctionBlock),
    MainFunction(FunctionBlock),
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Header(_) => BlockKind::Header,
            Block::Decorations(_) => BlockKind::Decorations,
            Block::TypesAndConstants(_) => BlockKind::TypesAndConstants,
            Block::Variables(_) => BlockKind::Variables,
            Block::FunctionDecl(_) => BlockKind::FunctionDecl,
            Block::Function(_) => BlockKind::Function,
            Block::MainFunction(_) => BlockKind::MainFunction,
        }
    }

    pub fn content(&self) -> &LineBlock {
        match self {
            Block::Header(b) => &**b,
            Block::Decorations(b)
            | Block::TypesAndConstants(b)
            | Block::Variables(b)
            | Block::FunctionDecl(b) => b,
            Block::Function(f) | Block::MainFunction(f) => &**f,
        }
    }

    pub fn content_mut(&mut self) -> &mut LineBlock {
        match self {
            Block::Header(b) => &mut **b,
            Block::Decorations(b)
            | Block::TypesAndConstants(b)
            | Block::Variables(b)
            | Block::FunctionDecl(b) => b,
            Block::Function(f) | Block::MainFunction(f) => &mut **f,
        }
    }

    pub fn lines(&self) -> &[Line] {
        self.content().lines()
    }

    pub fn lines_mut(&mut self) -> &mut [Line] {
        self.content_mut().lines_mut()
    }

    pub fn as_header(&self) -> Option<&HeaderBlock> {
        match self {
            Block::Header(h) => Some(h),
            _ => None,
        }
    }

    /// Function and main-function blocks; declarations are excluded
    pub fn as_function(&self) -> Option<&FunctionBlock> {
        match self {
            Block::Function(f) | Block::MainFunction(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionBlock> {
        match self {
            Block::Function(f) | Block::MainFunction(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_main(&self) -> bool {
        matches!(self, Block::MainFunction(_))
    }

    /// True for a function (not a declaration) named `name`
    pub fn is_function_named(&self, name: &str) -> bool {
        self.as_function()
            .is_some_and(|f| matches!(f.name(), Ok(n) if n == name))
    }

    pub fn dump(&self) {
        debug!("{}Block: {{", self.kind());
        for line in self.lines() {
            if line.has_code() {
                debug!("\t{}", line);
            } else {
                debug!("{}", line);
            }
        }
        debug!("}} ({}Block)", self.kind());
    }
}
