//! HTTP fallback resolver against an OpenAI-compatible chat-completions
//! endpoint.
//!
//! The model is asked to answer with a JSON object matching
//! `ResolverOutcome`; a reply that is not valid JSON degrades to a plain
//! text response with the default difficulty rather than failing the
//! dispatch.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{FallbackResolver, ResolverOutcome};
use crate::config::ResolverConfig;
use crate::errors::EngineError;
use crate::rule_graph::GraphSnapshot;
use crate::types::Task;

const DEFAULT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You are the fallback resolver of a signal-driven dispatch engine. \
Reply with a single JSON object: {\"response\": string, \"operations\": \
[{\"op\":\"write\",\"path\":...,\"content\":...} | {\"op\":\"exec\",\"cmd\":...,\"args\":[...]}], \
\"difficulty\": number in [0,1], \"label\": short string}. \
Only propose operations the task explicitly asks for.";

pub struct HttpResolver {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

fn first_env(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = std::env::var(key) {
            if !value.trim().is_empty() {
                return Some(value);
            }
        }
    }
    None
}

impl HttpResolver {
    pub fn new(config: &ResolverConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Resolver(format!("failed to build HTTP client: {}", e)))?;

        let base_url = first_env(&["SYNAPSE_RESOLVER_URL"])
            .or_else(|| config.base_url.clone())
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        let model = first_env(&["SYNAPSE_RESOLVER_MODEL"])
            .or_else(|| config.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_key = first_env(&["SYNAPSE_RESOLVER_API_KEY"])
            .or_else(|| config.api_key.clone())
            .ok_or_else(|| {
                EngineError::Resolver(
                    "resolver API key not set (SYNAPSE_RESOLVER_API_KEY)".to_string(),
                )
            })?;

        Ok(Self {
            client,
            base_url,
            model,
            api_key,
        })
    }

    fn user_prompt(task: &Task, graph: &GraphSnapshot) -> String {
        let known_signals: Vec<&str> = graph
            .nodes
            .iter()
            .flat_map(|n| n.edges.keys().map(|s| s.as_str()))
            .collect();
        json!({
            "goal": task.goal,
            "inputs": task.inputs,
            "known_signals": known_signals,
        })
        .to_string()
    }
}

#[async_trait]
impl FallbackResolver for HttpResolver {
    async fn resolve_fallback(
        &self,
        task: &Task,
        graph: &GraphSnapshot,
    ) -> Result<ResolverOutcome, EngineError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::user_prompt(task, graph)},
            ],
            "response_format": {"type": "json_object"},
        });

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::Resolver(format!("request failed: {}", e)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| EngineError::Resolver(format!("invalid response body: {}", e)))?;
        if !status.is_success() {
            return Err(EngineError::Resolver(format!(
                "resolver endpoint returned {}: {}",
                status, body
            )));
        }

        let content = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or("{}");
        debug!(goal = %task.goal, bytes = content.len(), "resolver reply received");

        let outcome = match serde_json::from_str::<ResolverOutcome>(content) {
            Ok(outcome) => outcome,
            Err(_) => ResolverOutcome {
                response: Some(content.to_string()),
                operations: Vec::new(),
                difficulty: 0.3,
                label: None,
            },
        };
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverKind;

    #[test]
    fn missing_api_key_is_an_error() {
        std::env::remove_var("SYNAPSE_RESOLVER_API_KEY");
        let config = ResolverConfig {
            kind: ResolverKind::Http,
            base_url: None,
            model: None,
            api_key: None,
            timeout_secs: 5,
        };
        assert!(HttpResolver::new(&config).is_err());
    }

    #[test]
    fn outcome_parses_from_model_json() {
        let outcome: ResolverOutcome = serde_json::from_str(
            r#"{"response":"done","operations":[{"op":"write","path":"a.txt","content":"x"}],"difficulty":0.4,"label":"demo"}"#,
        )
        .unwrap();
        assert_eq!(outcome.operations.len(), 1);
        assert_eq!(outcome.difficulty, 0.4);
    }
}
