use crate::{
    errors::AppError,
    mcp::registry::Tool,
    project::{SessionStore, WriteMode},
    tools::{parse_params, session_files},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteParams {
    project_session_id: String,
    file_path: String,
    content: String,
    #[serde(default)]
    mode: WriteMode,
}

pub struct WriteFileTool {
    sessions: Arc<dyn SessionStore>,
}

impl WriteFileTool {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str { "write_file" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["projectSessionId","filePath","content"],"properties": {"projectSessionId":{"type":"string"},"filePath":{"type":"string"},"content":{"type":"string"},"mode":{"type":"string","enum":["overwrite","append"]}}}, "output": {"type":"object","properties": {"content":{"type":"string"}}}})
    }
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let p: WriteParams = parse_params(params)?;
        let files = session_files(self.sessions.as_ref(), &p.project_session_id)?;
        files.write(&p.file_path, &p.content, p.mode)?;
        let verb = match p.mode {
            WriteMode::Overwrite => "wrote",
            WriteMode::Append => "appended",
        };
        Ok(json!({"content": format!("Successfully {verb} to {}", p.file_path)}))
    }
}
