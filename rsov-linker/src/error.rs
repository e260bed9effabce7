//! Error types for the module linker
//!
//! Every failure aborts the whole link. There is no partial output.

use crate::block::BlockKind;
use std::path::PathBuf;
use thiserror::Error;

/// Which input a structural error was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleRole {
    Kernel,
    Wrapper,
    Output,
}

impl std::fmt::Display for ModuleRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleRole::Kernel => write!(f, "kernel"),
            ModuleRole::Wrapper => write!(f, "wrapper"),
            ModuleRole::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("{module} module ended early, expected a {expected} block")]
    MissingBlock {
        module: ModuleRole,
        expected: BlockKind,
    },

    #[error("{module} module has a {found} block where a {expected} block was expected")]
    UnexpectedBlock {
        module: ModuleRole,
        expected: BlockKind,
        found: BlockKind,
    },

    #[error("Malformed function: {reason}: '{line}'")]
    MalformedFunction { line: String, reason: String },

    #[error("Wrapper module has no main function")]
    MissingMainFunction,

    #[error("More than one main function found in wrapper module")]
    DuplicateMainFunction,

    #[error("Kernel names not found in wrapper header")]
    KernelNamesNotFound,

    #[error("Unsupported number of kernels: {0}")]
    UnsupportedKernelCount(usize),

    #[error("Main function never references the placeholder '{callee}'")]
    PlaceholderNotFound { callee: String },

    #[error("Callee '{name}' not found ({candidates} matching functions)")]
    UnresolvedCallee { name: String, candidates: usize },

    #[error("Arity mismatch calling '{callee}' (caller: {caller_args}, callee: {callee_params})")]
    ArityMismatch {
        callee: String,
        caller_args: usize,
        callee_params: usize,
    },

    #[error("Return value not found for '{function}' with non-void return type")]
    MissingReturnValue { function: String },

    #[error("Function '{name}' is recursive")]
    RecursiveFunction { name: String },

    #[error("Recursive call chain: {}", chain.join(" -> "))]
    RecursiveCallChain { chain: Vec<String> },

    #[error("Malformed {opcode}: {reason}: '{line}'")]
    MalformedInstruction {
        opcode: String,
        line: String,
        reason: String,
    },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid linker configuration: {0}")]
    Config(String),
}

impl LinkError {
    pub fn malformed_function(line: &str, reason: impl Into<String>) -> Self {
        LinkError::MalformedFunction {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed_instruction(opcode: &str, line: &str, reason: impl Into<String>) -> Self {
        LinkError::MalformedInstruction {
            opcode: opcode.to_string(),
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LinkError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
