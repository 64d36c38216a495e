//! Tool registry over the engine operations.
//!
//! Every caller-facing operation is a [`Tool`] with a JSON Schema for its
//! parameters. The REST surface and the MCP bridge both dispatch through the
//! same [`ToolRegistry`], so parameter validation and defaults behave the
//! same on either transport.
//!
//! A tool returns `Err` only for malformed parameters. Operation failures
//! (unknown KB, upstream errors) come back as `Ok` with `"success": false`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Serialize;
use serde_json::{json, Value};

use crate::engine::Engine;
use crate::extract::SUPPORTED_TYPES;
use crate::ingest::UploadRequest;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    /// Run the tool with parameters already checked by [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What tools run against.
#[derive(Clone)]
pub struct ToolContext {
    engine: Arc<Engine>,
}

impl ToolContext {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// Tool metadata as listed by `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    let s = params[key].as_str().unwrap_or("");
    if s.trim().is_empty() {
        bail!("{} must not be empty", key);
    }
    Ok(s)
}

fn top_k_param(params: &Value) -> Result<Option<usize>> {
    match params.get("top_k").and_then(Value::as_u64) {
        Some(0) => bail!("invalid top_k: must be >= 1"),
        Some(k) => Ok(Some(k as usize)),
        None => Ok(None),
    }
}

fn kb_name_schema() -> Value {
    json!({ "type": "string", "description": "Knowledge base name (e.g. 'gun_law', 'medical')" })
}

pub struct CreateCollectionTool;

#[async_trait]
impl Tool for CreateCollectionTool {
    fn name(&self) -> &str {
        "create_collection"
    }

    fn description(&self) -> &str {
        "Create a new empty knowledge base. Usually unnecessary: upload_document_to_kb creates it automatically."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "kb_name": kb_name_schema(),
                "description": { "type": "string", "description": "What this knowledge base contains; used for automatic routing" }
            },
            "required": ["kb_name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let kb_name = str_param(&params, "kb_name")?;
        let description = params["description"].as_str();
        Ok(ctx
            .engine()
            .create_collection(kb_name, description)
            .await
            .to_json())
    }
}

pub struct ListCollectionsTool;

#[async_trait]
impl Tool for ListCollectionsTool {
    fn name(&self) -> &str {
        "list_collections"
    }

    fn description(&self) -> &str {
        "List all knowledge bases with their descriptions and point counts"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        Ok(ctx.engine().list_collections().await.to_json())
    }
}

pub struct CollectionInfoTool;

#[async_trait]
impl Tool for CollectionInfoTool {
    fn name(&self) -> &str {
        "get_collection_info"
    }

    fn description(&self) -> &str {
        "Show point counts and stored metadata for one knowledge base"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "kb_name": kb_name_schema() },
            "required": ["kb_name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let kb_name = str_param(&params, "kb_name")?;
        Ok(ctx.engine().get_collection_info(kb_name).await.to_json())
    }
}

pub struct UploadDocumentTool;

#[async_trait]
impl Tool for UploadDocumentTool {
    fn name(&self) -> &str {
        "upload_document_to_kb"
    }

    fn description(&self) -> &str {
        "Upload a PDF, text, or DOCX document into a knowledge base. Metadata is extracted automatically and the KB is created if missing (auto_create)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "kb_name": kb_name_schema(),
                "file_content": { "type": "string", "description": "File content, base64 encoded" },
                "filename": { "type": "string", "description": "Original filename (e.g. 'gun_act.pdf')" },
                "content_type": {
                    "type": "string",
                    "description": format!("MIME type of the file: {}", SUPPORTED_TYPES.join(", "))
                },
                "auto_create": {
                    "type": "boolean",
                    "default": true,
                    "description": "Create the knowledge base if it does not exist"
                },
                "metadata": {
                    "type": "object",
                    "description": "Extra metadata fields; these override extracted values"
                }
            },
            "required": ["kb_name", "file_content", "filename", "content_type"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let kb_name = str_param(&params, "kb_name")?;
        let filename = str_param(&params, "filename")?;
        let content_type = str_param(&params, "content_type")?;
        let encoded = str_param(&params, "file_content")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .context("invalid file_content: not valid base64")?;

        let req = UploadRequest {
            kb_name: kb_name.to_string(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            bytes,
            auto_create: params["auto_create"].as_bool().unwrap_or(true),
            metadata: params["metadata"].as_object().cloned().unwrap_or_default(),
        };
        Ok(ctx.engine().upload_document(req).await.to_json())
    }
}

pub struct ChatWithKbTool {
    default_top_k: usize,
}

#[async_trait]
impl Tool for ChatWithKbTool {
    fn name(&self) -> &str {
        "chat_with_kb"
    }

    fn description(&self) -> &str {
        "Ask a question against one knowledge base, with per-session conversation memory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "kb_name": kb_name_schema(),
                "query": { "type": "string", "description": "The question" },
                "session_id": { "type": "string", "description": "Conversation id; reuse it for follow-up questions" },
                "top_k": { "type": "integer", "default": self.default_top_k, "description": "Number of sources to return" }
            },
            "required": ["kb_name", "query", "session_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let kb_name = str_param(&params, "kb_name")?;
        let query = str_param(&params, "query")?;
        let session_id = str_param(&params, "session_id")?;
        let top_k = top_k_param(&params)?;
        Ok(ctx
            .engine()
            .chat_with_kb(kb_name, query, session_id, top_k)
            .await
            .to_json())
    }
}

pub struct ChatGlobalTool {
    default_top_k: usize,
}

#[async_trait]
impl Tool for ChatGlobalTool {
    fn name(&self) -> &str {
        "chat_global"
    }

    fn description(&self) -> &str {
        "Ask a question without naming a knowledge base; the semantic router picks the best match"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The question" },
                "session_id": { "type": "string", "description": "Conversation id; reuse it for follow-up questions" },
                "top_k": { "type": "integer", "default": self.default_top_k, "description": "Number of sources to return" }
            },
            "required": ["query", "session_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = str_param(&params, "query")?;
        let session_id = str_param(&params, "session_id")?;
        let top_k = top_k_param(&params)?;
        Ok(ctx
            .engine()
            .chat_global(query, session_id, top_k)
            .await
            .to_json())
    }
}

pub struct ClearHistoryTool;

#[async_trait]
impl Tool for ClearHistoryTool {
    fn name(&self) -> &str {
        "clear_chat_history"
    }

    fn description(&self) -> &str {
        "Forget the conversation history of one session in one knowledge base"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "kb_name": kb_name_schema(),
                "session_id": { "type": "string", "description": "Conversation id to clear" }
            },
            "required": ["kb_name", "session_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let kb_name = str_param(&params, "kb_name")?;
        let session_id = str_param(&params, "session_id")?;
        Ok(ctx
            .engine()
            .clear_chat_history(kb_name, session_id)
            .await
            .to_json())
    }
}

pub struct DeleteCollectionTool;

#[async_trait]
impl Tool for DeleteCollectionTool {
    fn name(&self) -> &str {
        "delete_collection"
    }

    fn description(&self) -> &str {
        "Delete a knowledge base with all its documents and sessions. Cannot be undone."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "kb_name": kb_name_schema() },
            "required": ["kb_name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let kb_name = str_param(&params, "kb_name")?;
        Ok(ctx.engine().delete_collection(kb_name).await.to_json())
    }
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// All eight knowledge-base tools.
    pub fn with_builtins(default_top_k: usize) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CreateCollectionTool));
        registry.register(Box::new(ListCollectionsTool));
        registry.register(Box::new(CollectionInfoTool));
        registry.register(Box::new(UploadDocumentTool));
        registry.register(Box::new(ChatWithKbTool { default_top_k }));
        registry.register(Box::new(ChatGlobalTool { default_top_k }));
        registry.register(Box::new(ClearHistoryTool));
        registry.register(Box::new(DeleteCollectionTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Validate `params` against the named tool's schema and run it.
    pub async fn call(&self, name: &str, params: &Value, ctx: &ToolContext) -> Result<Value> {
        let Some(tool) = self.find(name) else {
            bail!("tool not found: {}", name);
        };
        let params = validate_params(&tool.parameters_schema(), params)?;
        tool.execute(params, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check required fields, types and enums against a JSON Schema object and
/// fill in defaults for absent optional properties.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let mut result = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("invalid parameters: expected an object, got {}", json_type_name(other)),
    };

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for field in required.iter().filter_map(Value::as_str) {
        if !result.contains_key(field) {
            bail!("invalid parameters: missing required parameter: {}", field);
        }
    }

    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (name, prop) in &properties {
        let Some(value) = result.get(name) else {
            if let Some(default) = prop.get("default") {
                result.insert(name.clone(), default.clone());
            }
            continue;
        };

        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                bail!(
                    "invalid parameters: '{}' must be of type '{}', got {}",
                    name,
                    expected,
                    json_type_name(value)
                );
            }
        }

        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                let list: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                bail!(
                    "invalid parameters: '{}' must be one of [{}], got {}",
                    name,
                    list.join(", "),
                    value
                );
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_all_operations() {
        let registry = ToolRegistry::with_builtins(5);
        let names: Vec<&str> = registry.tools().iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "create_collection",
                "list_collections",
                "get_collection_info",
                "upload_document_to_kb",
                "chat_with_kb",
                "chat_global",
                "clear_chat_history",
                "delete_collection",
            ]
        );
        assert!(registry.find("chat_global").is_some());
        assert!(registry.find("search").is_none());
    }

    #[test]
    fn defaults_are_injected() {
        let registry = ToolRegistry::with_builtins(7);
        let schema = registry.find("chat_global").unwrap().parameters_schema();
        let out = validate_params(&schema, &json!({ "query": "q", "session_id": "s" })).unwrap();
        assert_eq!(out["top_k"], 7);
    }

    #[test]
    fn missing_required_is_rejected() {
        let schema = ToolRegistry::with_builtins(5)
            .find("chat_with_kb")
            .unwrap()
            .parameters_schema();
        let err = validate_params(&schema, &json!({ "kb_name": "legal" })).unwrap_err();
        assert!(err.to_string().contains("missing required parameter"));
    }

    #[test]
    fn enum_values_are_enforced() {
        let schema = json!({
            "type": "object",
            "properties": { "mode": { "type": "string", "enum": ["a", "b"] } }
        });
        let err = validate_params(&schema, &json!({ "mode": "c" })).unwrap_err();
        assert!(err.to_string().contains("must be one of"));
        assert!(validate_params(&schema, &json!({ "mode": "a" })).is_ok());
    }

    #[test]
    fn upload_accepts_parameterised_content_type() {
        let schema = UploadDocumentTool.parameters_schema();
        let ok = validate_params(&schema, &json!({
            "kb_name": "legal",
            "file_content": "aGk=",
            "filename": "a.txt",
            "content_type": "text/plain; charset=utf-8"
        }))
        .unwrap();
        assert_eq!(ok["auto_create"], true);
        assert_eq!(ok["content_type"], "text/plain; charset=utf-8");
    }

    #[test]
    fn wrong_types_are_rejected() {
        let schema = ChatGlobalTool { default_top_k: 5 }.parameters_schema();
        let err = validate_params(&schema, &json!({ "query": "q", "session_id": "s", "top_k": "five" }))
            .unwrap_err();
        assert!(err.to_string().contains("must be of type 'integer'"));
        assert!(validate_params(&schema, &json!("q")).is_err());
    }

    #[test]
    fn top_k_zero_is_invalid() {
        assert!(top_k_param(&json!({ "top_k": 0 })).is_err());
        assert_eq!(top_k_param(&json!({ "top_k": 3 })).unwrap(), Some(3));
        assert_eq!(top_k_param(&json!({})).unwrap(), None);
    }
}
