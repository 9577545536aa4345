//! Filesystem tools
//!
//! Every path is validated through [`RootGuard`] before any I/O. Failures
//! come back as error results so the model sees them as tool output.

use anyhow::{anyhow, Result};
use sdk::protocol::{ToolCallResult, ToolDescriptor};
use sdk::types::{ToolError, ToolInput};
use serde_json::json;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::guard::RootGuard;

#[derive(Debug)]
pub struct FsTools {
    guard: RootGuard,
}

impl FsTools {
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            guard: RootGuard::new(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        self.guard.root()
    }

    /// Tools advertised by `tools/list`.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let path_only = |description: &str| {
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": description }
                },
                "required": ["path"]
            })
        };
        let listing = json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the root",
                    "default": "."
                }
            }
        });

        vec![
            ToolDescriptor::new(
                "read_file",
                "Read the content of a file.",
                path_only("File to read, relative to the root"),
            ),
            ToolDescriptor::new(
                "write_file",
                "Write content to a file, creating parent directories.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "File to write" },
                        "content": { "type": "string", "description": "Full new content" }
                    },
                    "required": ["path", "content"]
                }),
            ),
            ToolDescriptor::new(
                "list_dir",
                "List files and directories in the given path as a JSON array of names.",
                listing.clone(),
            ),
            ToolDescriptor::new(
                "list_directory",
                "List files and directories in the given path as a JSON array of names.",
                listing,
            ),
            ToolDescriptor::new(
                "create_directory",
                "Create a directory and any missing parents.",
                path_only("Directory to create, relative to the root"),
            ),
        ]
    }

    /// Runs one `tools/call`. Unknown tools are an argument error.
    pub async fn call(&self, input: &ToolInput) -> Result<ToolCallResult, ToolError> {
        let outcome = match input.name.as_str() {
            "read_file" => self.read_file(&input.param_str("path")?).await,
            "write_file" => {
                let path = input.param_str("path")?;
                let content = input.param_str("content")?;
                self.write_file(&path, &content).await
            }
            "list_dir" | "list_directory" => self.list_dir(&input.param_str_or("path", ".")).await,
            "create_directory" => self.create_directory(&input.param_str("path")?).await,
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };

        Ok(match outcome {
            Ok(text) => ToolCallResult::text(text),
            Err(e) => {
                warn!("{} failed: {}", input.name, e);
                ToolCallResult::error(e.to_string())
            }
        })
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.guard.resolve(path)?;
        info!("Reading file: {}", resolved.display());

        let content = fs::read_to_string(&resolved)
            .await
            .map_err(|e| anyhow!("Error reading file {}: {}", path, e))?;

        debug!("Read {} bytes from {}", content.len(), resolved.display());
        Ok(content)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<String> {
        let resolved = self.guard.resolve_for_write(path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| anyhow!("Error creating directories for {}: {}", path, e))?;
        }

        info!("Writing {} bytes to: {}", content.len(), resolved.display());
        fs::write(&resolved, content)
            .await
            .map_err(|e| anyhow!("Error writing file {}: {}", path, e))?;

        Ok(format!("Wrote {} bytes to {}", content.len(), path))
    }

    async fn list_dir(&self, path: &str) -> Result<String> {
        let resolved = self.guard.resolve(path)?;
        info!("Listing directory: {}", resolved.display());

        let mut entries = fs::read_dir(&resolved)
            .await
            .map_err(|e| anyhow!("Error listing directory {}: {}", path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(serde_json::to_string(&names)?)
    }

    async fn create_directory(&self, path: &str) -> Result<String> {
        let resolved = self.guard.resolve_for_write(path)?;
        fs::create_dir_all(&resolved)
            .await
            .map_err(|e| anyhow!("Error creating directory {}: {}", path, e))?;

        info!("Created directory: {}", resolved.display());
        Ok(format!("Created directory {}", path))
    }
}
