//! The link engine: merges a kernel module into a wrapper module
//!
//! Phases run in a fixed order and any failure aborts the link:
//! prefix and storage-class fixup on the kernel, structural splice, entry
//! point resolution, inlining into main, instruction fixups, block ordering,
//! dead function removal, type/constant fusion and cleanup.

use crate::block::{Block, BlockKind};
use crate::error::{LinkError, ModuleRole, Result};
use crate::fixups::{fix_access_chains, fix_storage_class, fix_vector_shuffles};
use crate::fuse::fuse_types_and_constants;
use crate::inline::Inliner;
use crate::module::LinkerModule;
use crate::options::LinkOptions;
use log::{debug, info, warn};
use serde::Serialize;
use std::path::Path;

/// Summary of one link
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Prefixed id of the kernel that replaced the placeholder
    pub kernel: String,
    pub inlined_calls: usize,
    pub fused_definitions: usize,
    pub removed_functions: usize,
    pub storage_class_rewrites: usize,
    pub access_chain_rewrites: usize,
    pub shuffle_lane_rewrites: usize,
    pub blocks: usize,
    pub lines: usize,
}

pub struct Linker {
    options: LinkOptions,
}

impl Linker {
    pub fn new(options: LinkOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &LinkOptions {
        &self.options
    }

    /// Link the files at `kernel` and `wrapper`, writing the result to `output`
    pub fn link_files(&self, kernel: &Path, wrapper: &Path, output: &Path) -> Result<LinkStats> {
        let kernel_module = LinkerModule::load(kernel)?;
        let wrapper_module = LinkerModule::load(wrapper)?;

        let (linked, stats) = self.link_modules(kernel_module, wrapper_module)?;
        linked.save_to_file(output, self.options.annotate_blocks)?;

        info!(
            "Linked {} into {} ({} lines)",
            kernel.display(),
            output.display(),
            stats.lines
        );
        Ok(stats)
    }

    pub fn link_sources(&self, kernel: &str, wrapper: &str) -> Result<(LinkerModule, LinkStats)> {
        let kernel = LinkerModule::parse(kernel)?;
        let wrapper = LinkerModule::parse(wrapper)?;
        self.link_modules(kernel, wrapper)
    }

    pub fn link_modules(
        &self,
        mut kernel: LinkerModule,
        wrapper: LinkerModule,
    ) -> Result<(LinkerModule, LinkStats)> {
        self.options.validate()?;
        let mut stats = LinkStats::default();

        // Checked up front so no output is built for an unsupported wrapper.
        let kernel_id = self.resolve_kernel(&wrapper)?;
        debug!("Kernel entry point resolved to {}", kernel_id);

        for line in kernel.lines_mut() {
            line.prefix_identifiers(&self.options.kernel_prefix);
        }
        stats.storage_class_rewrites = fix_storage_class(
            &mut kernel,
            &self.options.storage_class_from,
            &self.options.storage_class_to,
        );
        debug!("Kernel module after prefixing:");
        kernel.dump();

        let mut output = splice(kernel, wrapper)?;
        debug!("Module after splice:");
        output.dump();

        let main = output
            .main_function_mut()
            .ok_or(LinkError::MissingMainFunction)?;
        let patched = main.replace_all_ids(&self.options.placeholder_callee, &kernel_id);
        match patched {
            0 => {
                return Err(LinkError::PlaceholderNotFound {
                    callee: self.options.placeholder_callee.clone(),
                });
            }
            1 => {}
            n => warn!(
                "Main function references {} {} times",
                self.options.placeholder_callee, n
            ),
        }

        let mut inliner = Inliner::new(&self.options.kernel_prefix);
        stats.inlined_calls = inliner.inline_main(&mut output)?;

        let main = output
            .main_function_mut()
            .ok_or(LinkError::MissingMainFunction)?;
        stats.access_chain_rewrites = fix_access_chains(main)?;
        stats.shuffle_lane_rewrites = fix_vector_shuffles(main);
        debug!("Module after inlining:");
        output.dump();

        output.fix_block_order();
        stats.removed_functions = output.remove_unused_functions()?;
        stats.fused_definitions = fuse_types_and_constants(&mut output);
        output.remove_non_code();
        debug!("Final module:");
        output.dump();

        stats.kernel = kernel_id;
        stats.blocks = output.blocks().len();
        stats.lines = output.line_count();
        Ok((output, stats))
    }

    /// Prefixed id of the single kernel named in the wrapper header
    fn resolve_kernel(&self, wrapper: &LinkerModule) -> Result<String> {
        let header = wrapper.header().ok_or(LinkError::MissingBlock {
            module: ModuleRole::Wrapper,
            expected: BlockKind::Header,
        })?;
        let names = header
            .kernel_names(&self.options.kernel_list_id)
            .ok_or(LinkError::KernelNamesNotFound)?;

        match names.as_slice() {
            [name] => Ok(self.options.prefixed(name)),
            _ => Err(LinkError::UnsupportedKernelCount(names.len())),
        }
    }
}

fn expect_block(
    blocks: &mut impl Iterator<Item = Block>,
    module: ModuleRole,
    expected: BlockKind,
) -> Result<Block> {
    match blocks.next() {
        Some(block) if block.kind() == expected => Ok(block),
        Some(block) => Err(LinkError::UnexpectedBlock {
            module,
            expected,
            found: block.kind(),
        }),
        None => Err(LinkError::MissingBlock { module, expected }),
    }
}

/// Build the output module from both inputs, walking their blocks in step
fn splice(kernel: LinkerModule, wrapper: LinkerModule) -> Result<LinkerModule> {
    use ModuleRole::{Kernel, Wrapper};

    let mut output = LinkerModule::new();
    let mut w = wrapper.into_blocks().into_iter();
    let mut k = kernel.into_blocks().into_iter().peekable();

    output.add_block(expect_block(&mut w, Wrapper, BlockKind::Header)?);
    expect_block(&mut k, Kernel, BlockKind::Header)?;

    output.add_block(expect_block(&mut w, Wrapper, BlockKind::Decorations)?);
    expect_block(&mut k, Kernel, BlockKind::Decorations)?;

    output.add_block(expect_block(&mut w, Wrapper, BlockKind::TypesAndConstants)?);
    output.add_block(expect_block(&mut k, Kernel, BlockKind::TypesAndConstants)?);

    output.add_block(expect_block(&mut w, Wrapper, BlockKind::Variables)?);
    if let Some(variables) = k.next_if(|b| b.kind() == BlockKind::Variables) {
        output.add_block(variables);
    }

    let mut has_main = false;
    for block in w {
        match block {
            Block::MainFunction(_) if has_main => return Err(LinkError::DuplicateMainFunction),
            Block::MainFunction(_) => {
                has_main = true;
                output.add_block(block);
            }
            Block::Function(_) | Block::FunctionDecl(_) => {
                output.add_block(block);
            }
            other => {
                return Err(LinkError::UnexpectedBlock {
                    module: Wrapper,
                    expected: BlockKind::Function,
                    found: other.kind(),
                })
            }
        }
    }
    if !has_main {
        return Err(LinkError::MissingMainFunction);
    }

    for block in k {
        match block {
            Block::FunctionDecl(_) => {}
            Block::Function(function) | Block::MainFunction(function) => {
                if function.is_directly_recursive()? {
                    return Err(LinkError::RecursiveFunction {
                        name: function.name()?.to_string(),
                    });
                }
                output.add_block(Block::Function(function));
            }
            other => {
                return Err(LinkError::UnexpectedBlock {
                    module: Kernel,
                    expected: BlockKind::Function,
                    found: other.kind(),
                })
            }
        }
    }

    Ok(output)
}
