//! Instruction-level rewrites the downstream consumer needs

use crate::error::{LinkError, Result};
use crate::function::FunctionBlock;
use crate::line::Line;
use crate::module::LinkerModule;
use log::{debug, trace};

pub const OP_IN_BOUNDS_PTR_ACCESS_CHAIN: &str = "OpInBoundsPtrAccessChain";
pub const OP_ACCESS_CHAIN: &str = "OpAccessChain";
pub const OP_VECTOR_SHUFFLE: &str = "OpVectorShuffle";

/// Literal marking an undefined vector-shuffle lane
pub const UNDEF_LANE_SENTINEL: &str = "4294967295";

/// Index of the element operand dropped from an in-bounds pointer access chain
const ELEMENT_OPERAND: usize = 2;

/// Rewrite the storage class `from` to `to`, both as a standalone keyword and
/// embedded in generated names such as `%_ptr_Function_uint`
pub fn fix_storage_class(module: &mut LinkerModule, from: &str, to: &str) -> usize {
    let keyword = (format!(" {}", from), format!(" {}", to));
    let embedded = (format!("_{}_", from), format!("_{}_", to));

    let mut count = 0;
    for line in module.lines_mut() {
        count += line.replace_all_str(&keyword.0, &keyword.1);
        count += line.replace_all_str(&embedded.0, &embedded.1);
    }
    debug!("Rewrote {} '{}' storage class occurrences to '{}'", count, from, to);
    count
}

/// `%p = OpInBoundsPtrAccessChain %ty %base %elem %idx...` becomes
/// `%p = OpAccessChain %ty %base %idx...`
pub fn fix_access_chains(function: &mut FunctionBlock) -> Result<usize> {
    let mut count = 0;
    for line in function.lines_mut() {
        if !line.is_opcode(OP_IN_BOUNDS_PTR_ACCESS_CHAIN) {
            continue;
        }

        let rewritten = {
            let mut operands = line.operands();
            if operands.len() < 4 {
                return Err(LinkError::malformed_instruction(
                    OP_IN_BOUNDS_PTR_ACCESS_CHAIN,
                    line.as_str(),
                    "expected at least 4 operands",
                ));
            }
            operands.remove(ELEMENT_OPERAND);
            Line::from_parts(line.lhs_identifier(), OP_ACCESS_CHAIN, &operands)
        };

        trace!("{} -> {}", line, rewritten);
        *line = rewritten;
        count += 1;
    }
    Ok(count)
}

/// Replace undefined-lane literals in every vector shuffle with lane 0
pub fn fix_vector_shuffles(function: &mut FunctionBlock) -> usize {
    let mut count = 0;
    for line in function.lines_mut() {
        if !line.is_opcode(OP_VECTOR_SHUFFLE) {
            continue;
        }

        let operands = line.operands();
        let undefined = operands.iter().filter(|op| **op == UNDEF_LANE_SENTINEL).count();
        if undefined == 0 {
            continue;
        }

        let operands: Vec<&str> = operands
            .into_iter()
            .map(|op| if op == UNDEF_LANE_SENTINEL { "0" } else { op })
            .collect();
        let rewritten = Line::from_parts(line.lhs_identifier(), OP_VECTOR_SHUFFLE, &operands);
        *line = rewritten;
        count += undefined;
    }
    if count > 0 {
        debug!("Replaced {} undefined shuffle lanes", count);
    }
    count
}
