//! Linker module: an ordered sequence of structural blocks
//!
//! Parsing splits a text stream into Header, Decorations, TypesAndConstants,
//! Variables and one block per function. The module exclusively owns its
//! blocks, so blocks can be cloned freely between modules.

use crate::block::{Block, BlockKind, HeaderBlock, LineBlock};
use crate::error::{LinkError, Result};
use crate::function::{FunctionBlock, OP_FUNCTION, OP_FUNCTION_END, OP_RETURN, OP_RETURN_VALUE};
use crate::line::Line;
use log::{debug, log_enabled, trace, Level};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Name of the entry function in both input modules
pub const MAIN_FUNCTION_ID: &str = "%main";

const DECORATION_OPCODES: &[&str] = &[
    "OpDecorate",
    "OpMemberDecorate",
    "OpDecorationGroup",
    "OpGroupDecorate",
    "OpGroupMemberDecorate",
];

pub fn is_decoration(line: &Line) -> bool {
    line.opcode().is_some_and(|op| DECORATION_OPCODES.contains(&op))
}

pub fn is_type_or_constant(line: &Line) -> bool {
    line.opcode()
        .is_some_and(|op| {
            op.starts_with("OpType")
                || op.starts_with("OpConstant")
                || op.starts_with("OpSpecConstant")
        })
}

fn is_function_start(line: &Line) -> bool {
    line.is_opcode(OP_FUNCTION)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkerModule {
    blocks: Vec<Block>,
}

impl LinkerModule {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Split `source` into blocks by structural markers
    pub fn parse(source: &str) -> Result<Self> {
        let lines: Vec<Line> = source.lines().map(Line::new).collect();
        let mut module = LinkerModule::new();
        let mut it = lines.into_iter().peekable();

        let mut header = HeaderBlock::new();
        while let Some(line) = it.next_if(|l| {
            !is_decoration(l) && !is_type_or_constant(l) && !is_function_start(l)
        }) {
            if !line.is_empty() {
                header.add_line(line);
            }
        }
        module.add_block(Block::Header(header));

        let mut decorations = LineBlock::new();
        while let Some(line) = it.next_if(|l| !is_type_or_constant(l) && !is_function_start(l)) {
            decorations.add_line(line);
        }
        decorations.remove_non_code_lines();
        module.add_block(Block::Decorations(decorations));

        let mut types = LineBlock::new();
        let mut variables = LineBlock::new();
        while let Some(line) = it.next_if(|l| !is_function_start(l)) {
            if !line.has_code() {
                continue;
            }
            if is_type_or_constant(&line) {
                types.add_line(line);
            } else {
                variables.add_line(line);
            }
        }
        module.add_block(Block::TypesAndConstants(types));
        if !variables.is_empty() {
            module.add_block(Block::Variables(variables));
        }

        while let Some(line) = it.next() {
            // Consume blank lines and comments between functions.
            if !line.has_code() {
                continue;
            }

            let name = match line.lhs_identifier() {
                Some(id) if is_function_start(&line) => id.to_string(),
                _ => {
                    return Err(LinkError::malformed_function(
                        line.as_str(),
                        "functions should start with OpFunction",
                    ))
                }
            };

            let mut function = LineBlock::new();
            let mut has_return = false;
            let mut terminated = false;
            function.add_line(line);

            for line in it.by_ref() {
                if !line.has_code() {
                    continue;
                }
                has_return |= matches!(line.opcode(), Some(OP_RETURN) | Some(OP_RETURN_VALUE));
                let is_end = line.is_opcode(OP_FUNCTION_END);
                function.add_line(line);
                if is_end {
                    terminated = true;
                    break;
                }
            }

            if !terminated {
                return Err(LinkError::malformed_function(&name, "missing OpFunctionEnd"));
            }

            let block = if name == MAIN_FUNCTION_ID {
                Block::MainFunction(FunctionBlock::from_block(function))
            } else if has_return {
                Block::Function(FunctionBlock::from_block(function))
            } else {
                Block::FunctionDecl(function)
            };
            trace!("Parsed {} block {}", block.kind(), name);
            module.add_block(block);
        }

        Ok(module)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path).map_err(|e| LinkError::io(path, e))?;
        Self::parse(&source)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn add_block(&mut self, block: Block) -> &mut Block {
        self.blocks.push(block);
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }

    /// Every line of every block, in block order
    pub fn lines(&self) -> impl Iterator<Item = &Line> + '_ {
        self.blocks.iter().flat_map(|b| b.lines().iter())
    }

    pub fn lines_mut(&mut self) -> impl Iterator<Item = &mut Line> + '_ {
        self.blocks.iter_mut().flat_map(|b| b.lines_mut().iter_mut())
    }

    pub fn line_count(&self) -> usize {
        self.blocks.iter().map(|b| b.lines().len()).sum()
    }

    pub fn blocks_where<P>(&self, predicate: P) -> Vec<&Block>
    where
        P: Fn(&Block) -> bool,
    {
        self.blocks.iter().filter(|b| predicate(b)).collect()
    }

    pub fn remove_blocks_where<P>(&mut self, predicate: P) -> usize
    where
        P: Fn(&Block) -> bool,
    {
        let before = self.blocks.len();
        self.blocks.retain(|b| !predicate(b));
        before - self.blocks.len()
    }

    pub fn header(&self) -> Option<&HeaderBlock> {
        self.blocks.iter().find_map(Block::as_header)
    }

    pub fn main_function(&self) -> Option<&FunctionBlock> {
        self.blocks.iter().find(|b| b.is_main()).and_then(Block::as_function)
    }

    pub fn main_function_mut(&mut self) -> Option<&mut FunctionBlock> {
        self.blocks
            .iter_mut()
            .find(|b| b.is_main())
            .and_then(Block::as_function_mut)
    }

    /// Stable sort into Header, Decorations, TypesAndConstants, Variables,
    /// declarations and functions, and main last
    pub fn fix_block_order(&mut self) {
        self.blocks.sort_by_key(Block::kind);
    }

    pub fn remove_empty_blocks(&mut self) {
        self.remove_blocks_where(|b| b.content().is_empty());
    }

    /// Drop deleted, blank and comment lines (the header keeps its comments),
    /// then any block left empty
    pub fn remove_non_code(&mut self) {
        for block in &mut self.blocks {
            if block.kind() == BlockKind::Header {
                block.content_mut().remove_empty_lines();
            } else {
                block.content_mut().remove_non_code_lines();
            }
        }
        self.remove_empty_blocks();
    }

    /// Remove every function not reachable from main through calls
    pub fn remove_unused_functions(&mut self) -> Result<usize> {
        let main = self.main_function().ok_or(LinkError::MissingMainFunction)?;

        let mut used: HashSet<String> = HashSet::new();
        let mut worklist: Vec<String> = main
            .called_functions()?
            .into_iter()
            .map(str::to_string)
            .collect();

        while let Some(name) = worklist.pop() {
            if !used.insert(name.clone()) {
                continue;
            }
            for block in self.blocks_where(|b| b.is_function_named(&name)) {
                if let Some(f) = block.as_function() {
                    worklist.extend(f.called_functions()?.into_iter().map(str::to_string));
                }
            }
        }

        let mut unused = HashSet::new();
        for block in &self.blocks {
            if let Block::Function(f) = block {
                let name = f.name()?;
                if !used.contains(name) {
                    unused.insert(name.to_string());
                }
            }
        }

        for name in &unused {
            debug!("Removing unused function {}", name);
        }

        Ok(self.remove_blocks_where(|b| {
            matches!(b, Block::Function(f) if f.name().is_ok_and(|n| unused.contains(n)))
        }))
    }

    pub fn write_to<W: Write>(&self, mut out: W, annotate: bool) -> io::Result<()> {
        for block in &self.blocks {
            if annotate && block.kind() != BlockKind::Header {
                write!(out, "\n\n; {}\n\n", block.kind())?;
            }
            for line in block.lines() {
                if annotate && line.has_code() {
                    write!(out, "\t")?;
                }
                writeln!(out, "{}", line)?;
            }
        }
        Ok(())
    }

    pub fn to_text(&self, annotate: bool) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf, annotate);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn save_to_file(&self, path: &Path, annotate: bool) -> Result<()> {
        let file = File::create(path).map_err(|e| LinkError::io(path, e))?;
        let mut out = BufWriter::new(file);
        self.write_to(&mut out, annotate)
            .and_then(|_| out.flush())
            .map_err(|e| LinkError::io(path, e))
    }

    pub fn dump(&self) {
        if log_enabled!(Level::Debug) {
            for block in &self.blocks {
                block.dump();
            }
        }
    }
}
