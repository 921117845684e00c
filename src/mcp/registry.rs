use crate::{
    config::Config,
    errors::AppError,
    project::{FileRegistry, ProjectRegistry, SessionStore, Sessions},
    runner::{batch::BatchOrchestrator, docker::DockerRunner, ContainerRunner},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type DynTool = Arc<dyn Tool + Send + Sync + 'static>;

/// Collaborators the tools are built on.
pub struct Backends {
    pub projects: Arc<dyn ProjectRegistry>,
    pub runner: Arc<dyn ContainerRunner>,
    pub sessions: Arc<Sessions>,
}

impl Backends {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let identity = cfg.runner.identity()?;
        let runner = DockerRunner::new(&cfg.runner, cfg.limits.max_output_kb * 1024, identity)?;
        Ok(Self {
            projects: Arc::new(FileRegistry::new(&cfg.registry)),
            runner: Arc::new(runner),
            sessions: Arc::new(Sessions::new(cfg.sessions.root.clone())),
        })
    }
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Vec<(String, DynTool)>,
}

impl ToolRegistry {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self::with_backends(cfg, Backends::from_config(cfg)?))
    }

    pub fn with_backends(cfg: &Config, backends: Backends) -> Self {
        use crate::tools::{
            exec::ExecuteBatchTool,
            fs_read::{FileExistsTool, ReadFileTool},
            fs_write::WriteFileTool,
            session::{CloseSessionTool, CommitSessionTool, InitProjectTool},
        };
        let store: Arc<dyn SessionStore> = backends.sessions.clone();
        let orchestrator = Arc::new(BatchOrchestrator::new(backends.projects.clone(), backends.runner));
        let tools: Vec<DynTool> = vec![
            Arc::new(InitProjectTool::new(backends.projects, backends.sessions.clone())),
            Arc::new(CommitSessionTool::new(backends.sessions.clone())),
            Arc::new(CloseSessionTool::new(backends.sessions)),
            Arc::new(WriteFileTool::new(store.clone())),
            Arc::new(ReadFileTool::new(store.clone())),
            Arc::new(FileExistsTool::new(store)),
            Arc::new(ExecuteBatchTool::new(cfg, orchestrator)),
        ];
        let mut tools: Vec<(String, DynTool)> = tools.into_iter().map(|t| (t.name().to_string(), t)).collect();
        tools.sort_by(|a, b| a.0.cmp(&b.0));
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<DynTool> { self.tools.iter().find(|(n, _)| n == name).map(|(_, t)| t.clone()) }
    pub fn list_names(&self) -> Vec<String> { self.tools.iter().map(|(n, _)| n.clone()).collect() }
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")] pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")] pub error: Option<super::types::ErrorObj>,
}

#[async_trait]
pub trait Tool {
    fn name(&self) -> &'static str;
    fn capabilities(&self) -> serde_json::Value;
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError>;
    async fn call_stream(&self, _params: serde_json::Value) -> Result<crate::server::StreamBody, AppError> {
        Err(AppError::ToolError("streaming not supported".into()))
    }
}
