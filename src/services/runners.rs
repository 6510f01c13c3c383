//! Agent execution logic behind a tagged-type registry.
//!
//! Each agent type resolves to a `Runner` at service init; the worker
//! runtime invokes `execute` with the task's input payload. Runners talk
//! to the language model through the opaque port and return a JSON result.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::error::ExecutionError;
use crate::domain::models::AgentType;
use crate::domain::ports::LanguageModel;

#[async_trait]
pub trait Runner: Send + Sync {
    fn system_prompt(&self) -> &str;

    async fn execute(&self, input: &serde_json::Value) -> Result<serde_json::Value, ExecutionError>;
}

/// Resolves agent types to runner instances at service init.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: HashMap<AgentType, Arc<dyn Runner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    /// Registry with the built-in runners for every agent type.
    pub fn with_defaults(model: Arc<dyn LanguageModel>) -> Self {
        let mut registry = Self::new();
        registry.register(AgentType::Research, Arc::new(ResearchRunner::new(model.clone())));
        registry.register(AgentType::Analysis, Arc::new(AnalysisRunner::new(model.clone())));
        let generic: Arc<dyn Runner> = Arc::new(GenericRunner::new(model));
        for agent_type in [
            AgentType::Worker,
            AgentType::Specialist,
            AgentType::Coordinator,
            AgentType::Orchestrator,
        ] {
            registry.register(agent_type, generic.clone());
        }
        registry
    }

    pub fn register(&mut self, agent_type: AgentType, runner: Arc<dyn Runner>) {
        self.runners.insert(agent_type, runner);
    }

    pub fn resolve(&self, agent_type: AgentType) -> Option<Arc<dyn Runner>> {
        self.runners.get(&agent_type).cloned()
    }
}

fn query_from(input: &serde_json::Value) -> Result<&str, ExecutionError> {
    input
        .get("query")
        .and_then(|q| q.as_str())
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ExecutionError::Validation("input has no query".to_string()))
}

/// Gathers and summarizes information for a query.
pub struct ResearchRunner {
    model: Arc<dyn LanguageModel>,
}

impl ResearchRunner {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Runner for ResearchRunner {
    fn system_prompt(&self) -> &str {
        "You are a research agent. Gather relevant information for the \
         query and produce a concise, sourced summary."
    }

    async fn execute(&self, input: &serde_json::Value) -> Result<serde_json::Value, ExecutionError> {
        let query = query_from(input)?;
        let prompt = format!("{}\n\nQuery: {query}", self.system_prompt());
        let summary = self.model.invoke(&prompt).await?;
        Ok(json!({
            "summary": summary,
            "query": query,
            "sources": [],
        }))
    }
}

/// Produces structured findings over supplied data.
pub struct AnalysisRunner {
    model: Arc<dyn LanguageModel>,
}

impl AnalysisRunner {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Runner for AnalysisRunner {
    fn system_prompt(&self) -> &str {
        "You are an analysis agent. Examine the provided data and report \
         findings, trends and anomalies."
    }

    async fn execute(&self, input: &serde_json::Value) -> Result<serde_json::Value, ExecutionError> {
        let query = query_from(input)?;
        let context = input.get("context").cloned().unwrap_or(json!({}));
        let prompt = format!(
            "{}\n\nTask: {query}\nContext: {context}",
            self.system_prompt()
        );
        let findings = self.model.invoke(&prompt).await?;
        Ok(json!({
            "findings": findings,
            "query": query,
        }))
    }
}

/// Fallback for agent types with no specialized behavior.
pub struct GenericRunner {
    model: Arc<dyn LanguageModel>,
}

impl GenericRunner {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Runner for GenericRunner {
    fn system_prompt(&self) -> &str {
        "You are a task-executing agent. Complete the requested work and \
         return the outcome."
    }

    async fn execute(&self, input: &serde_json::Value) -> Result<serde_json::Value, ExecutionError> {
        let query = query_from(input)?;
        let prompt = format!("{}\n\n{query}", self.system_prompt());
        let result = self.model.invoke(&prompt).await?;
        Ok(json!({"result": result}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{EchoLanguageModel, NullLanguageModel};

    #[tokio::test]
    async fn registry_resolves_every_agent_type() {
        let registry = RunnerRegistry::with_defaults(Arc::new(EchoLanguageModel));
        for agent_type in [
            AgentType::Orchestrator,
            AgentType::Worker,
            AgentType::Research,
            AgentType::Analysis,
            AgentType::Specialist,
            AgentType::Coordinator,
        ] {
            assert!(registry.resolve(agent_type).is_some(), "{agent_type} missing");
        }
    }

    #[tokio::test]
    async fn research_runner_summarizes() {
        let runner = ResearchRunner::new(Arc::new(EchoLanguageModel));
        let output = runner
            .execute(&json!({"query": "state of fusion power"}))
            .await
            .unwrap();
        assert!(output["summary"].as_str().unwrap().contains("fusion"));
        assert_eq!(output["query"], "state of fusion power");
    }

    #[tokio::test]
    async fn empty_query_is_a_validation_error() {
        let runner = GenericRunner::new(Arc::new(EchoLanguageModel));
        let err = runner.execute(&json!({"query": "  "})).await.unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn missing_model_degrades_to_recoverable_failure() {
        let runner = AnalysisRunner::new(Arc::new(NullLanguageModel));
        let err = runner
            .execute(&json!({"query": "analyze this"}))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
