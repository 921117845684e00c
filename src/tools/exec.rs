use crate::{
    config::Config,
    errors::AppError,
    mcp::registry::Tool,
    runner::batch::{BatchOptions, BatchOrchestrator, BatchReport},
    tools::parse_params,
};
use async_trait::async_trait;
use axum::body::Body;
use serde::Deserialize;
use serde_json::json;
use std::{
    ops::ControlFlow,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchParams {
    commands: Vec<String>,
    project_dir: PathBuf,
    #[serde(default = "default_stop_on_error")]
    stop_on_error: bool,
    #[serde(default)]
    timeout_secs: Option<u64>,
}
fn default_stop_on_error() -> bool { true }

pub struct ExecuteBatchTool {
    orchestrator: Arc<BatchOrchestrator>,
    exec_timeout: Duration,
    batch_deadline: Option<Duration>,
}

impl ExecuteBatchTool {
    pub fn new(cfg: &Config, orchestrator: Arc<BatchOrchestrator>) -> Self {
        Self { orchestrator, exec_timeout: cfg.limits.exec_timeout, batch_deadline: cfg.limits.batch_deadline }
    }

    fn options(&self, p: &BatchParams) -> BatchOptions {
        // callers may only shorten the configured timeout
        let timeout = p
            .timeout_secs
            .filter(|t| *t > 0)
            .map(|t| Duration::from_secs(t).min(self.exec_timeout))
            .unwrap_or(self.exec_timeout);
        let options = BatchOptions::new(p.stop_on_error, timeout);
        match self.batch_deadline {
            Some(d) => options.with_deadline(Instant::now() + d),
            None => options,
        }
    }
}

fn report_json(report: &BatchReport) -> serde_json::Value {
    json!({"content": report.to_string(), "isError": report.is_error, "results": report.results})
}

#[async_trait]
impl Tool for ExecuteBatchTool {
    fn name(&self) -> &'static str { "execute_batch_commands" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["commands","projectDir"],"properties": {"commands": {"type":"array","items":{"type":"string"}},"projectDir":{"type":"string"},"stopOnError":{"type":"boolean","default":true},"timeoutSecs":{"type":"integer"}}}, "output": {"type":"object","properties": {"content":{"type":"string"},"isError":{"type":"boolean"},"results":{"type":"array","items":{"type":"object","properties":{"command":{"type":"string"},"output":{"type":"string"},"success":{"type":"boolean"}}}}}}})
    }

    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let p: BatchParams = parse_params(params)?;
        let options = self.options(&p);
        match self.orchestrator.run_batch(&p.commands, &p.project_dir, options).await {
            Ok(report) => Ok(report_json(&report)),
            Err(e) if e.is_precondition() => {
                Ok(json!({"content": format!("Error: {e}"), "isError": true, "results": []}))
            }
            Err(e) => Err(e),
        }
    }

    async fn call_stream(&self, params: serde_json::Value) -> Result<crate::server::StreamBody, AppError> {
        let p: BatchParams = parse_params(params)?;
        let options = self.options(&p);
        let orchestrator = self.orchestrator.clone();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let start = json!({"event":"start","tool":"execute_batch_commands","commands": p.commands.len()});
            if tx.send(line(start)).is_err() {
                debug!("stream client gone before batch start");
                return;
            }
            let outcome = orchestrator
                .run_batch_with(&p.commands, &p.project_dir, options, |index, result| {
                    match tx.send(line(json!({"event":"result","index": index,"result": result}))) {
                        Ok(()) => ControlFlow::Continue(()),
                        Err(_) => ControlFlow::Break(()),
                    }
                })
                .await;
            let last = match outcome {
                Ok(report) => json!({"event":"end","isError": report.is_error,"content": report.to_string()}),
                Err(e) => json!({"event":"error","error":{"code": e.code(),"message": e.to_string()}}),
            };
            let _ = tx.send(line(last));
        });

        let stream = async_stream::stream! {
            while let Some(l) = rx.recv().await {
                yield Ok::<_, std::io::Error>(l);
            }
        };
        Ok(Body::from_stream(stream))
    }
}

fn line(v: serde_json::Value) -> String {
    format!("{v}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Limits,
        testing::{registered_project, ScriptedRunner},
    };

    fn tool(orchestrator: BatchOrchestrator) -> ExecuteBatchTool {
        let limits = Limits::default();
        ExecuteBatchTool { orchestrator: Arc::new(orchestrator), exec_timeout: limits.exec_timeout, batch_deadline: None }
    }

    #[tokio::test]
    async fn dropped_stream_launches_nothing() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("alpine:3"));
        let runner = ScriptedRunner::new();
        let tool = tool(BatchOrchestrator::new(registry, runner.clone()));

        let body = tool.call_stream(json!({"commands": ["echo 1", "echo 2"], "projectDir": root})).await.unwrap();
        drop(body);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn precondition_failure_is_an_empty_error_report() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, None);
        let tool = tool(BatchOrchestrator::new(registry, ScriptedRunner::new()));

        let out = tool.call(json!({"commands": ["echo 1"], "projectDir": root})).await.unwrap();
        assert_eq!(out["isError"], true);
        assert_eq!(out["results"], json!([]));
        assert!(out["content"].as_str().unwrap().starts_with("Error: no docker image configured"));
    }
}
