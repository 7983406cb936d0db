//! Client for the external conversation-store collaborator.
//!
//! Two duties: persisting conversation messages (best-effort, see
//! [`crate::persist`]) and answering dialectic queries — free-form questions
//! about a learner, answered from their conversation history.

use std::time::Duration;

use mentor_core::config::ConversationStoreConfig;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DialecticResponse {
    pub insight: String,
    pub query: String,
}

pub struct ConversationStoreClient {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl ConversationStoreClient {
    pub fn new(config: &ConversationStoreConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Persist one conversation message. Failures are logged, never raised.
    pub async fn persist_message(&self, user_id: &str, chat_id: &str, content: &str, is_user: bool) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };

        let role = if is_user { "user" } else { "assistant" };
        let body = serde_json::json!({
            "user_id": user_id,
            "chat_id": chat_id,
            "role": role,
            "content": content,
        });

        let result = self
            .authed(self.client.post(format!("{endpoint}/messages")))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(user_id, chat_id, role, "message persisted");
            }
            Ok(resp) => {
                warn!(user_id, status = resp.status().as_u16(), "persist failed");
            }
            Err(e) => {
                warn!(user_id, error = %e, "persist failed");
            }
        }
    }

    /// Ask the collaborator a question about a learner. Returns None when
    /// unconfigured or on any failure.
    pub async fn query_dialectic(&self, user_id: &str, question: &str) -> Option<DialecticResponse> {
        let endpoint = self.endpoint.as_ref()?;

        let body = serde_json::json!({
            "user_id": user_id,
            "query": question,
        });

        let result = self
            .authed(self.client.post(format!("{endpoint}/dialectic")))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                let parsed: DialecticReply = resp.json().await.ok()?;
                debug!(user_id, "dialectic queried");
                Some(DialecticResponse {
                    insight: parsed.insight,
                    query: question.to_string(),
                })
            }
            Ok(resp) => {
                warn!(user_id, status = resp.status().as_u16(), "dialectic failed");
                None
            }
            Err(e) => {
                warn!(user_id, error = %e, "dialectic failed");
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct DialecticReply {
    insight: String,
}
