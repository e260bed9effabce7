use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Knobs of the link, defaulting to what the wrapper and kernel producers emit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkOptions {
    /// Prepended to every kernel identifier (`%x` becomes `%<prefix>x`)
    pub kernel_prefix: String,
    /// Header string listing the kernel names
    pub kernel_list_id: String,
    /// Callee the wrapper's main calls in place of the kernel
    pub placeholder_callee: String,
    /// Storage class the kernel producer emits by mistake, and its replacement
    pub storage_class_from: String,
    pub storage_class_to: String,
    /// Emit `; <Block>` banners and indent code lines
    pub annotate_blocks: bool,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            kernel_prefix: "rs_linker_".to_string(),
            kernel_list_id: "%RS_KERNELS".to_string(),
            placeholder_callee: "%RS_SPIRV_DUMMY_".to_string(),
            storage_class_from: "Function".to_string(),
            storage_class_to: "Uniform".to_string(),
            annotate_blocks: true,
        }
    }
}

impl LinkOptions {
    /// Load options from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LinkError::io(path, e))?;
        let options: LinkOptions = serde_json::from_str(&content)
            .map_err(|e| LinkError::Config(format!("{}: {}", path.display(), e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kernel_prefix.is_empty() {
            return Err(LinkError::Config("kernel_prefix must not be empty".to_string()));
        }
        if self.kernel_prefix.contains(char::is_whitespace) {
            return Err(LinkError::Config(format!(
                "kernel_prefix '{}' contains whitespace",
                self.kernel_prefix
            )));
        }
        for (field, id) in [
            ("kernel_list_id", &self.kernel_list_id),
            ("placeholder_callee", &self.placeholder_callee),
        ] {
            if !id.starts_with('%') {
                return Err(LinkError::Config(format!(
                    "{} '{}' is not an identifier",
                    field, id
                )));
            }
        }
        if self.storage_class_from.is_empty() || self.storage_class_to.is_empty() {
            return Err(LinkError::Config("storage classes must not be empty".to_string()));
        }
        Ok(())
    }

    /// Kernel-module id of `name` (`%foo` becomes `%rs_linker_foo`)
    pub fn prefixed(&self, name: &str) -> String {
        format!("%{}{}", self.kernel_prefix, name.trim_start_matches('%'))
    }
}
