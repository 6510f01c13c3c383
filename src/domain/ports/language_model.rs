//! Opaque language-model port.
//!
//! Agents treat the model as `invoke(prompt) -> text`. The concrete client
//! lives outside the core; the control plane only needs the seam and a
//! graceful degradation path when no model is wired in.

use async_trait::async_trait;

use crate::domain::error::ExecutionError;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String, ExecutionError>;
}

/// Stand-in used when no model client is configured. Every invocation
/// fails as a recoverable upstream error, so affected tasks retry and
/// eventually fail with `UPSTREAM_FAILURE` instead of crashing the plane.
#[derive(Debug, Clone, Default)]
pub struct NullLanguageModel;

#[async_trait]
impl LanguageModel for NullLanguageModel {
    async fn invoke(&self, _prompt: &str) -> Result<String, ExecutionError> {
        Err(ExecutionError::Upstream(
            "no language model configured".to_string(),
        ))
    }
}

/// Deterministic model used in tests and demos: echoes a summary of the
/// prompt back.
#[derive(Debug, Clone, Default)]
pub struct EchoLanguageModel;

#[async_trait]
impl LanguageModel for EchoLanguageModel {
    async fn invoke(&self, prompt: &str) -> Result<String, ExecutionError> {
        let head: String = prompt.chars().take(200).collect();
        Ok(format!("echo: {head}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_model_degrades_recoverably() {
        let err = NullLanguageModel.invoke("hello").await.unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn echo_model_returns_text() {
        let out = EchoLanguageModel.invoke("summarise X").await.unwrap();
        assert!(out.contains("summarise X"));
    }
}
