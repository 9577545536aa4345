//! Aggregated tool catalog
//!
//! Merges the catalogs of all running servers into one namespace. Servers
//! are visited in registration order; the first server to expose a tool name
//! keeps it bare, later servers get `<server>.<tool>`.

use sdk::protocol::ToolDescriptor;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// One tool as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    /// Name the model uses
    pub qualified_name: String,
    pub server: String,
    /// Name the server knows the tool by
    pub tool: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    by_name: HashMap<String, usize>,
}

impl Catalog {
    /// Builds the catalog from `(server, tools)` pairs in registration order.
    pub fn aggregate<'a, I>(servers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [ToolDescriptor])>,
    {
        let mut catalog = Catalog::default();

        for (server, tools) in servers {
            let mut seen_here = Vec::with_capacity(tools.len());
            for tool in tools {
                if seen_here.contains(&tool.name.as_str()) {
                    tracing::warn!("Server '{}' lists tool '{}' twice", server, tool.name);
                    continue;
                }
                seen_here.push(tool.name.as_str());

                let qualified_name = catalog.free_name(server, &tool.name);
                catalog.insert(CatalogEntry {
                    qualified_name,
                    server: server.to_string(),
                    tool: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                });
            }
        }
        catalog
    }

    fn free_name(&self, server: &str, tool: &str) -> String {
        if !self.by_name.contains_key(tool) {
            return tool.to_string();
        }
        let namespaced = format!("{}.{}", server, tool);
        if !self.by_name.contains_key(&namespaced) {
            return namespaced;
        }
        (2..)
            .map(|n| format!("{}_{}", namespaced, n))
            .find(|candidate| !self.by_name.contains_key(candidate))
            .unwrap_or(namespaced)
    }

    fn insert(&mut self, entry: CatalogEntry) {
        self.by_name
            .insert(entry.qualified_name.clone(), self.entries.len());
        self.entries.push(entry);
    }

    /// Looks up a name the model used.
    ///
    /// Exact qualified names win; `<server>.<tool>` is also accepted for
    /// tools that kept their bare name.
    pub fn resolve(&self, name: &str) -> Option<&CatalogEntry> {
        if let Some(&i) = self.by_name.get(name) {
            return self.entries.get(i);
        }
        let (server, tool) = name.split_once('.')?;
        self.entries
            .iter()
            .find(|entry| entry.server == server && entry.tool == tool)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any running server exposes `tool` under its own name.
    pub fn server_with_tool(&self, tool: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.tool == tool)
            .map(|entry| entry.server.as_str())
    }
}
