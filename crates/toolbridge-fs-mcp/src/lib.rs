//! Toolbridge filesystem MCP server
//!
//! An MCP server that exposes a sandboxed workspace directory as a set of
//! filesystem tools. Every path argument is resolved against the workspace
//! root and rejected if it escapes it.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    model::*,
    schemars::{self, JsonSchema},
    service::{RequestContext, RoleServer},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use toolbridge::{FsError, Workspace};

fn default_dot() -> String {
    ".".to_string()
}

/// Parameters for tools taking a single path
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PathParams {
    /// Path relative to the workspace root
    pub path: String,
}

/// Parameters for `create_directory`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateDirectoryParams {
    /// Directory to create, relative to the workspace root
    pub path: String,
    /// Create missing parent directories (default: false)
    #[serde(default)]
    pub parents: bool,
    /// Succeed if the directory already exists (default: false)
    #[serde(default)]
    pub exist_ok: bool,
}

/// Parameters for `create_file`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateFileParams {
    /// File to create, relative to the workspace root. Must not exist yet.
    pub path: String,
    /// Initial content
    #[serde(default)]
    pub content: Option<String>,
}

/// Parameters for `write_file`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WriteFileParams {
    /// Existing file to write, relative to the workspace root
    pub path: String,
    /// Text to write
    pub content: String,
    /// Append instead of replacing the file (default: false)
    #[serde(default)]
    pub append: bool,
}

/// Parameters for `list_directory`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListDirectoryParams {
    /// Directory to list, relative to the workspace root (default: ".")
    #[serde(default = "default_dot")]
    pub path: String,
    /// Include type, size and modification time (default: false)
    #[serde(default)]
    pub detailed: bool,
}

/// Parameters for `delete_path`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeletePathParams {
    /// File or directory to delete, relative to the workspace root
    pub path: String,
    /// Delete non-empty directories with all their contents (default: false)
    #[serde(default)]
    pub recursive: bool,
}

/// Parameters for `move_path` and `copy_path`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransferParams {
    /// Existing path, relative to the workspace root
    pub source: String,
    /// New path, relative to the workspace root. Must not exist yet.
    pub destination: String,
}

/// The closed set of tools this server provides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileTool {
    /// Create a directory
    CreateDirectory,
    /// Create a new file
    CreateFile,
    /// Overwrite or append to a file
    WriteFile,
    /// Read a text file
    ReadFile,
    /// List a directory
    ListDirectory,
    /// Delete a file or directory
    DeletePath,
    /// Move or rename
    MovePath,
    /// Copy a file or tree
    CopyPath,
    /// Describe a file or directory
    GetDirectoryOrFileInfo,
}

impl FileTool {
    /// Every tool, in advertisement order.
    pub const ALL: [FileTool; 9] = [
        FileTool::CreateDirectory,
        FileTool::CreateFile,
        FileTool::WriteFile,
        FileTool::ReadFile,
        FileTool::ListDirectory,
        FileTool::DeletePath,
        FileTool::MovePath,
        FileTool::CopyPath,
        FileTool::GetDirectoryOrFileInfo,
    ];

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            FileTool::CreateDirectory => "create_directory",
            FileTool::CreateFile => "create_file",
            FileTool::WriteFile => "write_file",
            FileTool::ReadFile => "read_file",
            FileTool::ListDirectory => "list_directory",
            FileTool::DeletePath => "delete_path",
            FileTool::MovePath => "move_path",
            FileTool::CopyPath => "copy_path",
            FileTool::GetDirectoryOrFileInfo => "get_directory_or_file_info",
        }
    }

    /// Look a tool up by exact wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    fn title(self) -> &'static str {
        match self {
            FileTool::CreateDirectory => "Create Directory",
            FileTool::CreateFile => "Create File",
            FileTool::WriteFile => "Write File",
            FileTool::ReadFile => "Read File",
            FileTool::ListDirectory => "List Directory",
            FileTool::DeletePath => "Delete Path",
            FileTool::MovePath => "Move Path",
            FileTool::CopyPath => "Copy Path",
            FileTool::GetDirectoryOrFileInfo => "Get File or Directory Info",
        }
    }

    fn description(self) -> &'static str {
        match self {
            FileTool::CreateDirectory => {
                "Create a directory in the workspace. Set parents=true to create missing parent \
                directories and exist_ok=true to accept a directory that already exists."
            }
            FileTool::CreateFile => {
                "Create a new file in the workspace, optionally with initial content. Fails if \
                the path already exists."
            }
            FileTool::WriteFile => {
                "Write text to an existing file, replacing its content or appending with \
                append=true."
            }
            FileTool::ReadFile => "Read the contents of a text file in the workspace.",
            FileTool::ListDirectory => {
                "List the contents of a workspace directory. Set detailed=true for type, size \
                and modification time."
            }
            FileTool::DeletePath => {
                "Delete a file or directory. Non-empty directories require recursive=true."
            }
            FileTool::MovePath => "Move or rename a file or directory within the workspace.",
            FileTool::CopyPath => {
                "Copy a file or directory within the workspace. Symbolic links inside copied \
                directories are skipped."
            }
            FileTool::GetDirectoryOrFileInfo => {
                "Get size and timestamps of a file, or the entries of a directory."
            }
        }
    }

    fn input_schema(self) -> Arc<JsonObject> {
        match self {
            FileTool::CreateDirectory => schema_of::<CreateDirectoryParams>(),
            FileTool::CreateFile => schema_of::<CreateFileParams>(),
            FileTool::WriteFile => schema_of::<WriteFileParams>(),
            FileTool::ListDirectory => schema_of::<ListDirectoryParams>(),
            FileTool::DeletePath => schema_of::<DeletePathParams>(),
            FileTool::MovePath | FileTool::CopyPath => schema_of::<TransferParams>(),
            FileTool::ReadFile | FileTool::GetDirectoryOrFileInfo => schema_of::<PathParams>(),
        }
    }

    /// MCP descriptor for this tool.
    pub fn descriptor(self) -> Tool {
        Tool {
            name: self.name().into(),
            title: Some(self.title().into()),
            description: Some(self.description().into()),
            input_schema: self.input_schema(),
            output_schema: None,
            annotations: None,
            icons: None,
            meta: None,
        }
    }
}

fn schema_of<T: JsonSchema>() -> Arc<JsonObject> {
    let schema = schemars::schema_for!(T);
    match serde_json::to_value(schema).unwrap_or_default() {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(JsonObject::new()),
    }
}

/// A decoded call, ready to run against the workspace.
#[derive(Debug)]
enum FileRequest {
    CreateDirectory(CreateDirectoryParams),
    CreateFile(CreateFileParams),
    WriteFile(WriteFileParams),
    ReadFile(PathParams),
    ListDirectory(ListDirectoryParams),
    DeletePath(DeletePathParams),
    MovePath(TransferParams),
    CopyPath(TransferParams),
    GetDirectoryOrFileInfo(PathParams),
}

fn params<T: DeserializeOwned>(arguments: JsonObject) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::Value::Object(arguments))
}

impl FileRequest {
    fn decode(tool: FileTool, arguments: JsonObject) -> Result<Self, serde_json::Error> {
        Ok(match tool {
            FileTool::CreateDirectory => FileRequest::CreateDirectory(params(arguments)?),
            FileTool::CreateFile => FileRequest::CreateFile(params(arguments)?),
            FileTool::WriteFile => FileRequest::WriteFile(params(arguments)?),
            FileTool::ReadFile => FileRequest::ReadFile(params(arguments)?),
            FileTool::ListDirectory => FileRequest::ListDirectory(params(arguments)?),
            FileTool::DeletePath => FileRequest::DeletePath(params(arguments)?),
            FileTool::MovePath => FileRequest::MovePath(params(arguments)?),
            FileTool::CopyPath => FileRequest::CopyPath(params(arguments)?),
            FileTool::GetDirectoryOrFileInfo => {
                FileRequest::GetDirectoryOrFileInfo(params(arguments)?)
            }
        })
    }

    fn execute(self, workspace: &Workspace) -> Result<String, FsError> {
        match self {
            FileRequest::CreateDirectory(p) => {
                workspace.create_directory(&p.path, p.parents, p.exist_ok)
            }
            FileRequest::CreateFile(p) => workspace.create_file(&p.path, p.content.as_deref()),
            FileRequest::WriteFile(p) => workspace.write_file(&p.path, &p.content, p.append),
            FileRequest::ReadFile(p) => workspace.read_file(&p.path),
            FileRequest::ListDirectory(p) => workspace.list_directory(&p.path, p.detailed),
            FileRequest::DeletePath(p) => workspace.delete_path(&p.path, p.recursive),
            FileRequest::MovePath(p) => workspace.move_path(&p.source, &p.destination),
            FileRequest::CopyPath(p) => workspace.copy_path(&p.source, &p.destination),
            FileRequest::GetDirectoryOrFileInfo(p) => workspace.get_directory_or_file_info(&p.path),
        }
    }
}

/// MCP server exposing one sandboxed workspace.
#[derive(Clone)]
pub struct FileManagerServer {
    workspace: Arc<Workspace>,
}

impl std::fmt::Debug for FileManagerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManagerServer")
            .field("root", &self.workspace.root())
            .finish()
    }
}

impl FileManagerServer {
    /// Serve `workspace`.
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace: Arc::new(workspace),
        }
    }

    /// Run a tool by name.
    ///
    /// Unknown names and undecodable arguments are protocol errors. Failures
    /// of the operation itself are tool results flagged as errors, with text
    /// `Error [<kind>]: <message>`.
    pub async fn call(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, McpError> {
        let tool = FileTool::from_name(name)
            .ok_or_else(|| McpError::invalid_params(format!("Unknown tool: {}", name), None))?;
        let request = FileRequest::decode(tool, arguments.unwrap_or_default()).map_err(|e| {
            McpError::invalid_params(format!("Invalid parameters for {}: {}", name, e), None)
        })?;

        let workspace = Arc::clone(&self.workspace);
        let outcome = tokio::task::spawn_blocking(move || request.execute(&workspace))
            .await
            .map_err(|e| McpError::internal_error(format!("{} task failed: {}", name, e), None))?;

        match outcome {
            Ok(text) => {
                tracing::debug!(tool = name, "tool succeeded");
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => {
                if e.is_security_denial() {
                    tracing::warn!(target: "audit", tool = name, error = %e, "sandbox violation");
                } else {
                    tracing::debug!(tool = name, error = %e, "tool failed");
                }
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Error [{}]: {}",
                    e.kind(),
                    e
                ))]))
            }
        }
    }
}

impl ServerHandler for FileManagerServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Filesystem tools confined to a single workspace directory. All paths are \
                relative to the workspace root; paths that resolve outside it are rejected."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: FileTool::ALL.into_iter().map(FileTool::descriptor).collect(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.call(&request.name, request.arguments).await
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn server() -> (TempDir, FileManagerServer) {
        let dir = TempDir::new().expect("create temp dir");
        let workspace = Workspace::open(dir.path().join("workspace")).expect("open workspace");
        (dir, FileManagerServer::new(workspace))
    }

    fn args(value: Value) -> Option<JsonObject> {
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// (text, is_error) of a result, read through its wire form.
    fn text_of(result: &CallToolResult) -> (String, bool) {
        let wire = serde_json::to_value(result).expect("serialize result");
        (
            wire["content"][0]["text"].as_str().unwrap_or_default().to_string(),
            wire["isError"].as_bool().unwrap_or(false),
        )
    }

    #[test]
    fn test_names_round_trip() {
        for tool in FileTool::ALL {
            assert_eq!(FileTool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(FileTool::from_name("READ_FILE"), None);
        assert_eq!(FileTool::from_name("get_current_directory"), None);
    }

    #[test]
    fn test_schemas_name_their_fields() {
        let schema = FileTool::WriteFile.input_schema();
        let properties = schema.get("properties").expect("properties");
        for field in ["path", "content", "append"] {
            assert!(properties.get(field).is_some(), "missing {field}");
        }
        let required = schema.get("required").expect("required");
        assert!(required.as_array().unwrap().contains(&json!("content")));
        assert!(!required.as_array().unwrap().contains(&json!("append")));
    }

    #[test]
    fn test_param_defaults() {
        let p: CreateDirectoryParams = serde_json::from_value(json!({"path": "a"})).unwrap();
        assert!(!p.parents);
        assert!(!p.exist_ok);

        let p: ListDirectoryParams = serde_json::from_value(json!({})).unwrap();
        assert_eq!(p.path, ".");
        assert!(!p.detailed);
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let (_dir, server) = server();

        let created = server
            .call("create_directory", args(json!({"path": "a/b", "parents": true})))
            .await
            .unwrap();
        assert_eq!(text_of(&created), ("Directory created at a/b".to_string(), false));

        server
            .call("create_file", args(json!({"path": "a/b/x.txt", "content": "hi"})))
            .await
            .unwrap();
        let listing = server
            .call("list_directory", args(json!({"path": "a/b"})))
            .await
            .unwrap();
        assert_eq!(text_of(&listing).0, "Contents of a/b:\nx.txt");

        let read = server
            .call("read_file", args(json!({"path": "a/b/x.txt"})))
            .await
            .unwrap();
        assert_eq!(text_of(&read), ("hi".to_string(), false));
    }

    #[tokio::test]
    async fn test_repeated_create_directory_needs_exist_ok() {
        let (_dir, server) = server();

        let first = server
            .call("create_directory", args(json!({"path": "d"})))
            .await
            .unwrap();
        assert!(!text_of(&first).1);

        let again = server
            .call("create_directory", args(json!({"path": "d"})))
            .await
            .unwrap();
        let (text, is_error) = text_of(&again);
        assert!(is_error);
        assert!(text.starts_with("Error [already_exists]:"), "{text}");

        let tolerated = server
            .call("create_directory", args(json!({"path": "d", "exist_ok": true})))
            .await
            .unwrap();
        assert_eq!(
            text_of(&tolerated),
            ("Directory already exists at d".to_string(), false)
        );
    }

    #[tokio::test]
    async fn test_operation_errors_are_tool_errors() {
        let (_dir, server) = server();

        let escape = server
            .call("read_file", args(json!({"path": "../../etc/passwd"})))
            .await
            .unwrap();
        let (text, is_error) = text_of(&escape);
        assert!(is_error);
        assert!(text.starts_with("Error [sandbox_violation]:"), "{text}");

        let missing = server
            .call("read_file", args(json!({"path": "nope.txt"})))
            .await
            .unwrap();
        let (text, is_error) = text_of(&missing);
        assert!(is_error);
        assert!(text.starts_with("Error [not_found]:"), "{text}");
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let (_dir, server) = server();

        assert!(server.call("format_disk", None).await.is_err());
        assert!(server.call("read_file", None).await.is_err());
        assert!(
            server
                .call("read_file", args(json!({"path": 42})))
                .await
                .is_err()
        );
    }
}
