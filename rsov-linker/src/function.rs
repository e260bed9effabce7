//! Function blocks and their call-graph and signature queries
//!
//! A function block runs from `%name = OpFunction ...` to `OpFunctionEnd`.
//! Every query is derived from the lines, so renames are always reflected.

use crate::block::LineBlock;
use crate::error::{LinkError, Result};
use crate::line::Line;
use std::ops::{Deref, DerefMut};

pub const OP_FUNCTION: &str = "OpFunction";
pub const OP_FUNCTION_END: &str = "OpFunctionEnd";
pub const OP_FUNCTION_PARAMETER: &str = "OpFunctionParameter";
pub const OP_FUNCTION_CALL: &str = "OpFunctionCall";
pub const OP_LABEL: &str = "OpLabel";
pub const OP_RETURN: &str = "OpReturn";
pub const OP_RETURN_VALUE: &str = "OpReturnValue";

/// Identifier of the void type emitted by the wrapper generator
pub const VOID_TYPE_ID: &str = "%void";

fn is_return(line: &Line) -> bool {
    matches!(line.opcode(), Some(OP_RETURN) | Some(OP_RETURN_VALUE))
}

/// A parsed `%result = OpFunctionCall %type %callee %args...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall<'a> {
    pub result: &'a str,
    pub return_type: &'a str,
    pub callee: &'a str,
    pub args: Vec<&'a str>,
}

impl<'a> FunctionCall<'a> {
    pub fn parse(line: &'a Line) -> Result<Self> {
        let result = line.lhs_identifier().ok_or_else(|| {
            LinkError::malformed_instruction(OP_FUNCTION_CALL, line.as_str(), "no result id")
        })?;

        let ids = line.rhs_identifiers();
        if ids.len() < 2 {
            return Err(LinkError::malformed_instruction(
                OP_FUNCTION_CALL,
                line.as_str(),
                "no return type and function name",
            ));
        }

        Ok(Self {
            result,
            return_type: ids[0],
            callee: ids[1],
            args: ids[2..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionBlock {
    block: LineBlock,
}

impl FunctionBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_block(block: LineBlock) -> Self {
        Self { block }
    }

    /// The `%name = OpFunction %ret Control %fnty` line
    pub fn declaration(&self) -> Result<&Line> {
        let first = self
            .block
            .lines()
            .first()
            .ok_or_else(|| LinkError::malformed_function("", "empty function block"))?;

        if !first.is_opcode(OP_FUNCTION) || first.lhs_identifier().is_none() {
            return Err(LinkError::malformed_function(
                first.as_str(),
                "function must start with '%name = OpFunction'",
            ));
        }
        Ok(first)
    }

    pub fn name(&self) -> Result<&str> {
        let decl = self.declaration()?;
        decl.lhs_identifier()
            .ok_or_else(|| LinkError::malformed_function(decl.as_str(), "no function name"))
    }

    pub fn return_type(&self) -> Result<&str> {
        let decl = self.declaration()?;
        decl.rhs_identifiers()
            .first()
            .copied()
            .ok_or_else(|| LinkError::malformed_function(decl.as_str(), "no return type"))
    }

    fn parameter_lines(&self) -> impl Iterator<Item = &Line> {
        self.block
            .lines()
            .iter()
            .filter(|l| l.is_opcode(OP_FUNCTION_PARAMETER))
    }

    pub fn arity(&self) -> usize {
        self.parameter_lines().count()
    }

    /// Formal parameter ids, in declaration order
    pub fn parameters(&self) -> Result<Vec<&str>> {
        self.parameter_lines()
            .map(|l| {
                l.lhs_identifier()
                    .ok_or_else(|| LinkError::malformed_function(l.as_str(), "unnamed parameter"))
            })
            .collect()
    }

    /// Operand of the function's `OpReturnValue`, if it returns one
    pub fn return_value(&self) -> Option<&str> {
        self.block
            .lines()
            .iter()
            .find(|l| l.is_opcode(OP_RETURN_VALUE))
            .and_then(|l| l.identifiers().first().copied())
    }

    /// Lines between the first label and the first return
    pub fn body(&self) -> Result<&[Line]> {
        let lines = self.block.lines();
        let name = self.name()?;

        let label = lines
            .iter()
            .position(|l| l.is_opcode(OP_LABEL))
            .ok_or_else(|| LinkError::malformed_function(name, "no OpLabel"))?;

        let ret = lines[label + 1..]
            .iter()
            .position(is_return)
            .ok_or_else(|| LinkError::malformed_function(name, "no return instruction"))?;

        Ok(&lines[label + 1..label + 1 + ret])
    }

    pub fn has_function_calls(&self) -> bool {
        self.block
            .lines()
            .iter()
            .any(|l| l.is_opcode(OP_FUNCTION_CALL))
    }

    pub fn calls(&self) -> Result<Vec<FunctionCall<'_>>> {
        self.block
            .lines()
            .iter()
            .filter(|l| l.is_opcode(OP_FUNCTION_CALL))
            .map(FunctionCall::parse)
            .collect()
    }

    /// Callee names, in call order (duplicates kept)
    pub fn called_functions(&self) -> Result<Vec<&str>> {
        Ok(self.calls()?.into_iter().map(|c| c.callee).collect())
    }

    pub fn is_directly_recursive(&self) -> Result<bool> {
        let name = self.name()?;
        Ok(self.called_functions()?.contains(&name))
    }

    /// Void return type (plain or with the kernel prefix) ending in a bare `OpReturn`
    pub fn is_return_type_void(&self, kernel_prefix: &str) -> Result<bool> {
        let ret_ty = self.return_type()?;
        let prefixed_void = format!("%{}{}", kernel_prefix, &VOID_TYPE_ID[1..]);
        if ret_ty != VOID_TYPE_ID && ret_ty != prefixed_void {
            return Ok(false);
        }

        let lines = self.block.lines();
        if lines.len() < 4 {
            return Err(LinkError::malformed_function(
                self.name()?,
                "needs at least OpFunction, OpLabel, OpReturn and OpFunctionEnd",
            ));
        }
        Ok(lines[lines.len() - 2].as_str().trim() == OP_RETURN)
    }
}

impl Deref for FunctionBlock {
    type Target = LineBlock;

    fn deref(&self) -> &LineBlock {
        &self.block
    }
}

impl DerefMut for FunctionBlock {
    fn deref_mut(&mut self) -> &mut LineBlock {
        &mut self.block
    }
}
