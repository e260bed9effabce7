//! Call inlining into the main function
//!
//! Every call in main is replaced by a renamed copy of the callee's body,
//! repeating until main contains no calls. The call graph is checked for
//! cycles first, so the repetition always terminates.

use crate::block::{Block, LineBlock};
use crate::error::{LinkError, Result};
use crate::function::{FunctionBlock, FunctionCall, OP_FUNCTION_CALL};
use crate::line::Line;
use crate::module::LinkerModule;
use log::{debug, trace};
use std::collections::HashMap;

/// Reject any cycle in the call graph of the module's function blocks
pub fn check_call_graph(module: &LinkerModule) -> Result<()> {
    let mut graph: Vec<(&str, Vec<&str>)> = Vec::new();
    for function in module.blocks().iter().filter_map(Block::as_function) {
        graph.push((function.name()?, function.called_functions()?));
    }
    let index: HashMap<&str, usize> = graph
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (*name, i))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; graph.len()];
    for root in 0..graph.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        // Each frame is a node and the position of its next callee
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::OnStack;

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let callees = &graph[node].1;
            if frame.1 == callees.len() {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            }
            let callee = callees[frame.1];
            frame.1 += 1;

            // Calls to declarations have no body to recurse into.
            let Some(&target) = index.get(callee) else {
                continue;
            };
            match marks[target] {
                Mark::OnStack => {
                    let start = stack.iter().position(|(n, _)| *n == target).unwrap_or(0);
                    let mut chain: Vec<String> = stack[start..]
                        .iter()
                        .map(|(n, _)| graph[*n].0.to_string())
                        .collect();
                    chain.push(callee.to_string());
                    return Err(LinkError::RecursiveCallChain { chain });
                }
                Mark::Unvisited => {
                    marks[target] = Mark::OnStack;
                    stack.push((target, 0));
                }
                Mark::Done => {}
            }
        }
    }
    Ok(())
}

/// Inlines calls in main, tracking how often each callee has been copied
pub struct Inliner<'a> {
    kernel_prefix: &'a str,
    copies: HashMap<String, usize>,
    inlined: usize,
}

impl<'a> Inliner<'a> {
    pub fn new(kernel_prefix: &'a str) -> Self {
        Self {
            kernel_prefix,
            copies: HashMap::new(),
            inlined: 0,
        }
    }

    /// Inline to a fixed point; returns the number of call sites replaced
    pub fn inline_main(&mut self, module: &mut LinkerModule) -> Result<usize> {
        check_call_graph(module)?;

        let before = self.inlined;
        let mut pass = 0;
        loop {
            let main = module.main_function().ok_or(LinkError::MissingMainFunction)?;
            if !main.has_function_calls() {
                break;
            }
            pass += 1;

            let lines = self.inline_pass(module, main)?;
            let main = module
                .main_function_mut()
                .ok_or(LinkError::MissingMainFunction)?;
            *main = FunctionBlock::from_block(LineBlock::from_lines(lines));
            debug!("Inlining pass {} done", pass);
        }
        Ok(self.inlined - before)
    }

    /// One pass over main: every call replaced by a copy of its callee's body,
    /// then the pass's renames applied newest first
    fn inline_pass(&mut self, module: &LinkerModule, main: &FunctionBlock) -> Result<Vec<Line>> {
        let mut lines = Vec::with_capacity(main.len());
        let mut renames: Vec<(String, String)> = Vec::new();

        for line in main.lines() {
            if !line.is_opcode(OP_FUNCTION_CALL) {
                lines.push(line.clone());
                continue;
            }

            let call = FunctionCall::parse(line)?;
            let callee = find_callee(module, call.callee)?;
            let copy = self.next_copy(call.callee);
            trace!("Inlining {} (copy {})", line, copy);

            lines.extend(self.instantiate(callee, &call, copy, &mut renames)?);
            self.inlined += 1;
        }

        for (from, to) in renames.iter().rev() {
            for line in lines.iter_mut() {
                line.replace_all_ids(from, to);
            }
        }
        Ok(lines)
    }

    fn next_copy(&mut self, callee: &str) -> usize {
        let copy = self.copies.entry(callee.to_string()).or_insert(0);
        *copy += 1;
        *copy
    }

    /// Copy of the callee's body for one call site. Registers the renames
    /// wiring parameters to arguments and the call result to the return value.
    fn instantiate(
        &self,
        callee: &FunctionBlock,
        call: &FunctionCall<'_>,
        copy: usize,
        renames: &mut Vec<(String, String)>,
    ) -> Result<Vec<Line>> {
        let name = callee.name()?;
        let params = callee.parameters()?;
        if params.len() != call.args.len() {
            return Err(LinkError::ArityMismatch {
                callee: name.to_string(),
                caller_args: call.args.len(),
                callee_params: params.len(),
            });
        }

        let mut body: Vec<Line> = callee.body()?.to_vec();

        // Later copies get fresh names for everything the callee defines.
        let mut fresh: HashMap<String, String> = HashMap::new();
        if copy > 1 {
            let defined = params
                .iter()
                .copied()
                .chain(callee.body()?.iter().filter_map(Line::lhs_identifier));
            for id in defined {
                fresh.insert(id.to_string(), format!("{}_inl{}", id, copy));
            }
            for line in body.iter_mut() {
                for (old, new) in &fresh {
                    line.replace_all_ids(old, new);
                }
            }
        }
        let local = |id: &str| fresh.get(id).cloned().unwrap_or_else(|| id.to_string());

        for (param, arg) in params.iter().zip(call.args.iter()) {
            push_rename(renames, local(*param), arg.to_string());
        }

        match callee.return_value() {
            Some(value) => push_rename(renames, call.result.to_string(), local(value)),
            None => {
                if !callee.is_return_type_void(self.kernel_prefix)? {
                    return Err(LinkError::MissingReturnValue {
                        function: name.to_string(),
                    });
                }
            }
        }

        Ok(body)
    }
}

fn push_rename(renames: &mut Vec<(String, String)>, from: String, to: String) {
    if from != to {
        debug!("New rename: {} -> {}", from, to);
        renames.push((from, to));
    }
}

fn find_callee<'m>(module: &'m LinkerModule, name: &str) -> Result<&'m FunctionBlock> {
    let matches: Vec<&FunctionBlock> = module
        .blocks()
        .iter()
        .filter(|b| matches!(b, Block::Function(_)) && b.is_function_named(name))
        .filter_map(Block::as_function)
        .collect();

    match matches.as_slice() {
        [callee] => Ok(*callee),
        _ => Err(LinkError::UnresolvedCallee {
            name: name.to_string(),
            candidates: matches.len(),
        }),
    }
}
