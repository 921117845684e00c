use crate::{
    errors::AppError,
    mcp::registry::Tool,
    project::SessionStore,
    tools::{parse_params, session_files},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileParams {
    project_session_id: String,
    file_path: String,
}

pub struct ReadFileTool { sessions: Arc<dyn SessionStore> }

impl ReadFileTool { pub fn new(sessions: Arc<dyn SessionStore>) -> Self { Self { sessions } } }

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str { "read_file" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["projectSessionId","filePath"],"properties": {"projectSessionId":{"type":"string"},"filePath":{"type":"string"}}}, "output": {"type":"object","properties": {"content":{"type":"string"}}}})
    }
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let p: FileParams = parse_params(params)?;
        let content = session_files(self.sessions.as_ref(), &p.project_session_id)?.read(&p.file_path)?;
        Ok(json!({"content": content}))
    }
}

pub struct FileExistsTool { sessions: Arc<dyn SessionStore> }

impl FileExistsTool { pub fn new(sessions: Arc<dyn SessionStore>) -> Self { Self { sessions } } }

#[async_trait]
impl Tool for FileExistsTool {
    fn name(&self) -> &'static str { "file_exists" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["projectSessionId","filePath"],"properties": {"projectSessionId":{"type":"string"},"filePath":{"type":"string"}}}, "output": {"type":"object","properties": {"exists":{"type":"boolean"}}}})
    }
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let p: FileParams = parse_params(params)?;
        let exists = session_files(self.sessions.as_ref(), &p.project_session_id)?.exists(&p.file_path);
        Ok(json!({"exists": exists}))
    }
}
