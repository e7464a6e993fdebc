//! Tool descriptors and the per-connection catalog.
//!
//! A provider advertises its operations once at session start. The
//! [`Catalog`] is the client's immutable snapshot of that advertisement; the
//! gate and the session both look tool names up in it by exact match.

use serde::{Deserialize, Serialize};

/// Full description of one tool as advertised by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name (unique identifier).
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's arguments.
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Create a new tool descriptor.
    ///
    /// # Example
    ///
    /// ```rust
    /// use toolbridge::catalog::ToolDescriptor;
    /// use serde_json::json;
    ///
    /// let tool = ToolDescriptor::new(
    ///     "read_file",
    ///     "Read the contents of a file",
    ///     json!({
    ///         "type": "object",
    ///         "properties": { "path": { "type": "string" } },
    ///         "required": ["path"]
    ///     }),
    /// );
    /// assert_eq!(tool.name, "read_file");
    /// ```
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Ordered, read-only set of tools discovered from one provider.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    tools: Vec<ToolDescriptor>,
}

impl Catalog {
    /// Build a catalog, keeping the first descriptor for any duplicated name.
    pub fn new(tools: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        let mut kept: Vec<ToolDescriptor> = Vec::new();
        for tool in tools {
            if kept.iter().any(|t| t.name == tool.name) {
                tracing::warn!(tool = %tool.name, "ignoring duplicate tool name in catalog");
                continue;
            }
            kept.push(tool);
        }
        Self { tools: kept }
    }

    /// Look a tool up by exact name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Whether a tool with this exact name was advertised.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Tools in advertisement order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    /// Tool names in advertisement order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Number of tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the provider advertised no tools.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl FromIterator<ToolDescriptor> for Catalog {
    fn from_iter<I: IntoIterator<Item = ToolDescriptor>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_is_exact() {
        let catalog: Catalog = [
            ToolDescriptor::new("read_file", "Read", json!({})),
            ToolDescriptor::new("list_directory", "List", json!({})),
        ]
        .into_iter()
        .collect();

        assert!(catalog.contains("read_file"));
        assert!(!catalog.contains("READ_FILE"));
        assert!(!catalog.contains("read_file "));
        assert_eq!(catalog.names(), vec!["read_file", "list_directory"]);
    }

    #[test]
    fn test_duplicates_keep_first() {
        let catalog = Catalog::new([
            ToolDescriptor::new("a", "first", json!({})),
            ToolDescriptor::new("a", "second", json!({})),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("a").map(|t| t.description.as_str()), Some("first"));
    }

    #[test]
    fn test_deserialize_wire_shape() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "read_file",
            "description": "Read a file",
            "inputSchema": {"type": "object"},
            "annotations": null
        }))
        .unwrap_or_else(|e| panic!("deserialize failed: {e}"));
        assert_eq!(tool.input_schema, json!({"type": "object"}));

        let bare: Result<ToolDescriptor, _> = serde_json::from_value(json!({"name": "x"}));
        assert!(bare.is_ok());
    }
}
