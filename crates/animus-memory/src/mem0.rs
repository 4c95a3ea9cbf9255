use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};

/// Readiness probes are cached this long to avoid a thundering herd of
/// health checks from concurrent chat turns.
const READY_CACHE_TTL: Duration = Duration::from_secs(5);

/// Scope tags attached to everything sent to semantic memory.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryTags {
    pub user_id: String,
    pub soul_id: String,
    pub session_id: String,
    pub terminal_id: String,
}

/// Best-effort client for an external mem0-style semantic memory.
///
/// Nothing here may block a chat turn: callers either fire-and-forget
/// (`add`) or treat failures as an empty recall (`search`).
pub struct Mem0Client {
    client: reqwest::Client,
    base_url: String,
    ready_cache: Mutex<Option<(Instant, bool)>>,
}

impl Mem0Client {
    pub fn new(base_url: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            ready_cache: Mutex::new(None),
        }
    }

    /// Health probe with a short TTL cache. When this returns false the
    /// recall tool is not offered to the LLM at all.
    pub async fn ready(&self) -> bool {
        {
            let cache = self.ready_cache.lock().unwrap();
            if let Some((at, ready)) = *cache {
                if at.elapsed() < READY_CACHE_TTL {
                    return ready;
                }
            }
        }

        let ready = match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "semantic memory health probe failed");
                false
            }
        };

        *self.ready_cache.lock().unwrap() = Some((Instant::now(), ready));
        ready
    }

    /// Push messages into semantic memory. Best-effort: errors are the
    /// caller's to log, never to surface.
    pub async fn add(&self, messages: &[(String, String)], tags: &MemoryTags) -> Result<()> {
        let body = serde_json::json!({
            "messages": messages
                .iter()
                .map(|(role, content)| serde_json::json!({"role": role, "content": content}))
                .collect::<Vec<_>>(),
            "metadata": tags,
        });
        let resp = self
            .client
            .post(format!("{}/v1/memories", self.base_url))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(MemoryError::Semantic(format!(
                "add returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Search scoped memories; returns plain text snippets.
    pub async fn search(&self, query: &str, tags: &MemoryTags, top_k: u32) -> Result<Vec<String>> {
        let body = serde_json::json!({
            "query": query,
            "filter": {
                "user_id": tags.user_id,
                "soul_id": tags.soul_id,
            },
            "top_k": top_k,
        });
        let resp = self
            .client
            .post(format!("{}/v1/memories/search", self.base_url))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(MemoryError::Semantic(format!(
                "search returned {}",
                resp.status()
            )));
        }
        let parsed: SearchResponse = resp.json().await.map_err(|e| {
            warn!(error = %e, "semantic memory returned malformed search response");
            MemoryError::Semantic(e.to_string())
        })?;
        Ok(parsed
            .results
            .into_iter()
            .map(|r| r.memory)
            .filter(|m| !m.is_empty())
            .collect())
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    memory: String,
}
