pub mod block;
pub mod error;
pub mod fixups;
pub mod function;
pub mod fuse;
pub mod inline;
pub mod line;
pub mod link;
pub mod module;
pub mod options;

pub use block::{Block, BlockKind, HeaderBlock, LineBlock};
pub use error::{LinkError, ModuleRole, Result};
pub use function::{FunctionBlock, FunctionCall};
pub use inline::{check_call_graph, Inliner};
pub use line::Line;
pub use link::{LinkStats, Linker};
pub use module::LinkerModule;
pub use options::LinkOptions;

/// Link kernel and wrapper sources with default options, returning the
/// serialized module
pub fn link(kernel: &str, wrapper: &str) -> Result<String> {
    let options = LinkOptions::default();
    let annotate = options.annotate_blocks;
    let (module, _) = Linker::new(options).link_sources(kernel, wrapper)?;
    Ok(module.to_text(annotate))
}
