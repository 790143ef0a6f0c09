/// HTTP client for the engine's REST API
///
/// Used by worker processes to deploy configs, start workflows, report task
/// outcomes and manage their subscriptions.

use crate::api::processes::DeployResponse;
use crate::api::subscriptions::SubscribeResponse;
use crate::api::workflows::{CompleteTaskResponse, CreateWorkflowRequest, CreateWorkflowResponse, TaskRequest};
use crate::process::{ProcessConfig, Workflow};
use crate::runtime::CompletionOutcome;
use crate::subscriber::SubscribeRequest;
use anyhow::Result;
use reqwest::{Client, Response};

#[derive(Debug, Clone)]
pub struct EngineClient {
    base_url: String,
    client: Client,
}

impl EngineClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub async fn deploy_process(&self, config: &ProcessConfig) -> Result<()> {
        let response = self
            .client
            .post(self.url("/process_configs"))
            .json(config)
            .send()
            .await?;
        let deployed: DeployResponse = check(response).await?.json().await?;
        tracing::debug!("Deployed process {}", deployed.process_id);
        Ok(())
    }

    pub async fn create_workflow(&self, process_id: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/workflows"))
            .json(&CreateWorkflowRequest {
                process_id: process_id.to_string(),
            })
            .send()
            .await?;
        let created: CreateWorkflowResponse = check(response).await?.json().await?;
        Ok(created.workflow_id)
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow> {
        let response = self
            .client
            .get(self.url(&format!("/workflows/{}", workflow_id)))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn complete_task(&self, workflow_id: &str, task: &str) -> Result<CompletionOutcome> {
        let response = self
            .client
            .post(self.url("/workflows/complete_task"))
            .json(&task_request(workflow_id, task))
            .send()
            .await?;
        let completed: CompleteTaskResponse = check(response).await?.json().await?;
        Ok(completed.outcome)
    }

    pub async fn fail_task(&self, workflow_id: &str, task: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/workflows/fail_task"))
            .json(&task_request(workflow_id, task))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// Register a worker endpoint; returns the session key
    pub async fn subscribe(&self, request: &SubscribeRequest) -> Result<String> {
        let response = self
            .client
            .post(self.url("/subscriptions"))
            .json(request)
            .send()
            .await?;
        let subscribed: SubscribeResponse = check(response).await?.json().await?;
        Ok(subscribed.session_key)
    }

    pub async fn unsubscribe(&self, session_key: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/subscriptions/{}", session_key)))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn task_request(workflow_id: &str, task: &str) -> TaskRequest {
    TaskRequest {
        workflow_id: workflow_id.to_string(),
        task: task.to_string(),
    }
}

/// Turn a non-2xx response into an error carrying the engine's message
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| value.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    anyhow::bail!("engine returned {}: {}", status, message)
}
