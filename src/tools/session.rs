use crate::{
    errors::AppError,
    mcp::registry::Tool,
    project::{registry::authorize_project, ProjectRegistry, Sessions},
    tools::parse_params,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::{path::PathBuf, sync::Arc};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitParams {
    project_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    project_session_id: String,
}

/// Opens a session on a working copy of a registered project.
pub struct InitProjectTool {
    registry: Arc<dyn ProjectRegistry>,
    sessions: Arc<Sessions>,
}

impl InitProjectTool {
    pub fn new(registry: Arc<dyn ProjectRegistry>, sessions: Arc<Sessions>) -> Self {
        Self { registry, sessions }
    }
}

#[async_trait]
impl Tool for InitProjectTool {
    fn name(&self) -> &'static str { "init_project" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["projectDir"],"properties": {"projectDir":{"type":"string"}}}, "output": {"type":"object","properties": {"projectSessionId":{"type":"string"},"workingDir":{"type":"string"}}}})
    }
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let p: InitParams = parse_params(params)?;
        let root = authorize_project(self.registry.as_ref(), &p.project_dir)?;
        let session = self.sessions.open(&root)?;
        Ok(json!({"projectSessionId": session.id, "workingDir": session.working_dir}))
    }
}

pub struct CommitSessionTool { sessions: Arc<Sessions> }

impl CommitSessionTool { pub fn new(sessions: Arc<Sessions>) -> Self { Self { sessions } } }

#[async_trait]
impl Tool for CommitSessionTool {
    fn name(&self) -> &'static str { "commit_session" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["projectSessionId"],"properties": {"projectSessionId":{"type":"string"}}}, "output": {"type":"object","properties": {"filesCopied":{"type":"integer"}}}})
    }
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let p: SessionParams = parse_params(params)?;
        let copied = self.sessions.commit(&p.project_session_id)?;
        Ok(json!({"filesCopied": copied}))
    }
}

pub struct CloseSessionTool { sessions: Arc<Sessions> }

impl CloseSessionTool { pub fn new(sessions: Arc<Sessions>) -> Self { Self { sessions } } }

#[async_trait]
impl Tool for CloseSessionTool {
    fn name(&self) -> &'static str { "close_session" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["projectSessionId"],"properties": {"projectSessionId":{"type":"string"}}}, "output": {"type":"object","properties": {"closed":{"type":"boolean"}}}})
    }
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let p: SessionParams = parse_params(params)?;
        self.sessions.close(&p.project_session_id)?;
        Ok(json!({"closed": true}))
    }
}
