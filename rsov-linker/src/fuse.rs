//! Type and constant deduplication
//!
//! The kernel and wrapper both declare the basic types they use, so after the
//! splice the output has duplicate definitions. A definition is a duplicate
//! when its right-hand side, after earlier renames, matches one seen before.

use crate::line::Line;
use crate::module::{is_type_or_constant, LinkerModule};
use log::{debug, trace};
use std::collections::HashMap;

/// Fuse duplicate type and constant definitions, returning how many were
/// removed. References to a removed id are rewritten to the surviving one.
pub fn fuse_types_and_constants(module: &mut LinkerModule) -> usize {
    let mut canonical: HashMap<String, String> = HashMap::new();
    let mut renames: HashMap<String, String> = HashMap::new();

    for line in module.lines_mut() {
        if !line.has_code() {
            continue;
        }
        line.rename_operands(&renames);

        if !is_type_or_constant(line) {
            continue;
        }
        let Some((id, key)) = definition(line) else {
            continue;
        };

        match canonical.get(&key) {
            Some(first) => {
                trace!("Fusing {} into {} ({})", id, first, key);
                renames.insert(id, first.clone());
                line.mark_as_empty();
            }
            None => {
                canonical.insert(key, id);
            }
        }
    }

    if renames.is_empty() {
        return 0;
    }

    // Decorations and the header precede the types they refer to.
    for line in module.lines_mut() {
        line.rename_operands(&renames);
    }
    for block in module.blocks_mut() {
        block.content_mut().remove_empty_lines();
    }

    debug!("Fused {} duplicate types and constants", renames.len());
    renames.len()
}

fn definition(line: &Line) -> Option<(String, String)> {
    let id = line.lhs_identifier()?;
    let rhs = line.rhs()?;
    Some((id.to_string(), normalize(rhs)))
}

/// Collapse runs of whitespace so spacing differences do not defeat fusion
fn normalize(rhs: &str) -> String {
    rhs.split_whitespace().collect::<Vec<_>>().join(" ")
}
