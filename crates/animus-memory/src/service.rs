use std::sync::Arc;

use animus_core::config::MemoryConfig;
use animus_core::types::MessageRole;
use animus_llm::{ChatTurn, LlmProvider, LlmRequest};
use animus_store::{Soul, Store};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::mem0::{Mem0Client, MemoryTags};

/// Summarizer instruction for session compaction.
const SUMMARIZER_SYSTEM: &str = "你是会话记忆压缩器。把下面的对话压缩成一段持续记忆，\
供后续对话作为上下文使用。必须保留：用户意图、偏好、约束条件、已达成的结论、待办事项。\
忽略寒暄和无信息量的往返。不超过220个汉字，只输出摘要正文。";

/// Shown in the prompt when a session has no compacted summary yet.
const NO_SUMMARY_FALLBACK: &str = "（暂无长期摘要）";

/// Short-term log, rolling summary, and the semantic-memory bridge.
pub struct MemoryService {
    store: Arc<Store>,
    llm: Arc<dyn LlmProvider>,
    mem0: Option<Arc<Mem0Client>>,
    cfg: MemoryConfig,
    summarizer_model: String,
}

impl MemoryService {
    pub fn new(
        store: Arc<Store>,
        llm: Arc<dyn LlmProvider>,
        mem0: Option<Arc<Mem0Client>>,
        cfg: MemoryConfig,
        summarizer_model: String,
    ) -> Self {
        Self {
            store,
            llm,
            mem0,
            cfg,
            summarizer_model,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.cfg
    }

    pub fn mem0(&self) -> Option<&Arc<Mem0Client>> {
        self.mem0.as_ref()
    }

    /// True when the recall tool should be offered this turn.
    pub async fn recall_ready(&self) -> bool {
        match &self.mem0 {
            Some(client) => client.ready().await,
            None => false,
        }
    }

    /// Persist one message and forward it to semantic memory in the
    /// background. User turns re-arm the idle worker via the store.
    #[allow(clippy::too_many_arguments)]
    pub fn persist_message(
        &self,
        session_id: &str,
        user_id: &str,
        terminal_id: &str,
        soul_id: &str,
        role: MessageRole,
        name: Option<&str>,
        tool_call_id: Option<&str>,
        content: &str,
    ) -> Result<i64> {
        let id = self.store.append_message(
            session_id,
            user_id,
            terminal_id,
            soul_id,
            role,
            name,
            tool_call_id,
            content,
        )?;

        // Only dialogue roles are worth semantic indexing.
        if matches!(role, MessageRole::User | MessageRole::Assistant) {
            if let Some(client) = &self.mem0 {
                let client = Arc::clone(client);
                let tags = MemoryTags {
                    user_id: user_id.to_string(),
                    soul_id: soul_id.to_string(),
                    session_id: session_id.to_string(),
                    terminal_id: terminal_id.to_string(),
                };
                let messages = vec![(role.as_str().to_string(), content.to_string())];
                tokio::spawn(async move {
                    if let Err(e) = client.add(&messages, &tags).await {
                        debug!(error = %e, "semantic memory add failed (ignored)");
                    }
                });
            }
        }

        Ok(id)
    }

    /// Persist an observation row; empty digests are a no-op.
    pub fn persist_observation(
        &self,
        session_id: &str,
        user_id: &str,
        terminal_id: &str,
        soul_id: &str,
        content: &str,
    ) -> Result<Option<i64>> {
        if content.trim().is_empty() {
            return Ok(None);
        }
        let id = self.store.append_message(
            session_id,
            user_id,
            terminal_id,
            soul_id,
            MessageRole::Observation,
            None,
            None,
            content,
        )?;
        Ok(Some(id))
    }

    /// Assemble the memory block of the system prompt:
    /// soul self-description, the rolling summary, and any current-turn
    /// observations. Returns `(prompt_context, current_summary)`.
    pub fn build_context(
        &self,
        soul: &Soul,
        session_id: &str,
        observation_digest: &str,
    ) -> Result<(String, String)> {
        let effective = soul.effective_personality();
        let state = &soul.emotion_state;

        let mut context = format!(
            "## 自我\n你是「{}」，MBTI 类型 {}。\n有效人格：{}\n当前情绪 PAD=({:.2}, {:.2}, {:.2})，无聊度 {:.2}。\n",
            soul.name,
            soul.mbti_type,
            effective.profile_string(),
            state.p,
            state.a,
            state.d,
            state.boredom,
        );

        let summary = match self.store.get_session(session_id)? {
            Some(session) if !session.summary.is_empty() => session.summary,
            _ => String::new(),
        };
        context.push_str("\n## 长期摘要\n");
        if summary.is_empty() {
            context.push_str(NO_SUMMARY_FALLBACK);
        } else {
            context.push_str(&summary);
        }
        context.push('\n');

        if !observation_digest.trim().is_empty() {
            context.push_str("\n## 本轮观察\n");
            context.push_str(observation_digest.trim());
            context.push('\n');
        }

        Ok((context, summary))
    }

    /// Compact the session when enough fresh material accumulated (or
    /// unconditionally when forced). Returns the summary that is
    /// current after the call — unchanged when below thresholds.
    pub async fn maybe_compress_session(&self, session_id: &str, force: bool) -> Result<String> {
        let (summary, cursor) = self.store.summary_state(session_id)?;
        let (count, chars) = self.store.fresh_stats(session_id, cursor)?;

        if count == 0 {
            return Ok(summary);
        }
        if !force
            && count < self.cfg.compact_message_threshold
            && chars < self.cfg.compact_char_threshold
        {
            return Ok(summary);
        }

        let messages =
            self.store
                .fresh_messages(session_id, cursor, self.cfg.compact_scan_limit)?;
        let Some(max_id) = messages.last().map(|m| m.id) else {
            return Ok(summary);
        };

        let mut transcript = String::new();
        if !summary.is_empty() {
            transcript.push_str("已有摘要：\n");
            transcript.push_str(&summary);
            transcript.push_str("\n\n");
        }
        transcript.push_str("新对话：\n");
        for m in &messages {
            transcript.push_str(&format!("{}: {}\n", m.role, m.content));
        }

        let request = LlmRequest {
            model: self.summarizer_model.clone(),
            system: SUMMARIZER_SYSTEM.to_string(),
            messages: vec![ChatTurn::user(transcript)],
            tools: Vec::new(),
            max_tokens: 512,
        };
        let response = self.llm.complete(&request).await?;
        let new_summary = response.content.trim().to_string();
        if new_summary.is_empty() {
            warn!(session_id, "summarizer returned empty text, keeping old summary");
            return Ok(summary);
        }

        self.store.update_summary(session_id, &new_summary, max_id)?;
        info!(
            session_id,
            compacted = messages.len(),
            up_to = max_id,
            "session compacted"
        );
        Ok(new_summary)
    }

    /// The summary currently stored for a session, if any.
    pub fn latest_summary(&self, session_id: &str) -> Result<String> {
        Ok(self
            .store
            .get_session(session_id)?
            .map(|s| s.summary)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animus_llm::{LlmResponse, ProviderError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for FixedSummarizer {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _req: &LlmRequest) -> Result2<LlmResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(LlmResponse {
                content: format!("summary v{n}"),
                model: "fixed".into(),
                tokens_in: 0,
                tokens_out: 0,
                tool_calls: Vec::new(),
            })
        }
    }

    type Result2<T, E> = std::result::Result<T, E>;

    fn service_with_thresholds(msgs: i64, chars: i64) -> (MemoryService, String) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let soul = store.create_soul("u1", "Nova", "INTJ", "").unwrap();
        let cfg = MemoryConfig {
            compact_message_threshold: msgs,
            compact_char_threshold: chars,
            ..MemoryConfig::default()
        };
        let service = MemoryService::new(
            store,
            Arc::new(FixedSummarizer { calls: AtomicUsize::new(0) }),
            None,
            cfg,
            "fixed".into(),
        );
        (service, soul.soul_id)
    }

    fn push_turns(service: &MemoryService, soul_id: &str, n: usize) {
        for i in 0..n {
            service
                .persist_message(
                    "s1",
                    "u1",
                    "t1",
                    soul_id,
                    if i % 2 == 0 { MessageRole::User } else { MessageRole::Assistant },
                    None,
                    None,
                    &format!("turn {i}"),
                )
                .unwrap();
        }
    }

    #[tokio::test]
    async fn below_thresholds_is_a_no_op_and_idempotent() {
        let (service, soul_id) = service_with_thresholds(80, 12_000);
        push_turns(&service, &soul_id, 4);

        let first = service.maybe_compress_session("s1", false).await.unwrap();
        assert_eq!(first, "");
        let second = service.maybe_compress_session("s1", false).await.unwrap();
        assert_eq!(second, "");
        let (_, cursor) = service.store.summary_state("s1").unwrap();
        assert_eq!(cursor, 0);
    }

    #[tokio::test]
    async fn message_threshold_triggers_compaction() {
        let (service, soul_id) = service_with_thresholds(10, 1_000_000);
        push_turns(&service, &soul_id, 10);

        let summary = service.maybe_compress_session("s1", false).await.unwrap();
        assert_eq!(summary, "summary v1");
        let (_, cursor) = service.store.summary_state("s1").unwrap();
        assert!(cursor > 0);

        // No new messages: nothing to do, summary unchanged.
        let again = service.maybe_compress_session("s1", false).await.unwrap();
        assert_eq!(again, "summary v1");
    }

    #[tokio::test]
    async fn char_threshold_triggers_compaction_too() {
        let (service, soul_id) = service_with_thresholds(1_000_000, 20);
        push_turns(&service, &soul_id, 6); // ~36 chars total
        let summary = service.maybe_compress_session("s1", false).await.unwrap();
        assert_eq!(summary, "summary v1");
    }

    #[tokio::test]
    async fn force_compacts_below_thresholds() {
        let (service, soul_id) = service_with_thresholds(80, 12_000);
        push_turns(&service, &soul_id, 2);
        let summary = service.maybe_compress_session("s1", true).await.unwrap();
        assert_eq!(summary, "summary v1");
    }

    #[tokio::test]
    async fn cursor_advances_monotonically_across_compactions() {
        let (service, soul_id) = service_with_thresholds(2, 1_000_000);
        push_turns(&service, &soul_id, 2);
        service.maybe_compress_session("s1", false).await.unwrap();
        let (_, c1) = service.store.summary_state("s1").unwrap();

        push_turns(&service, &soul_id, 2);
        service.maybe_compress_session("s1", false).await.unwrap();
        let (_, c2) = service.store.summary_state("s1").unwrap();
        assert!(c2 > c1);
    }

    #[tokio::test]
    async fn observation_noop_on_empty_content() {
        let (service, soul_id) = service_with_thresholds(80, 12_000);
        let none = service
            .persist_observation("s1", "u1", "t1", &soul_id, "   ")
            .unwrap();
        assert!(none.is_none());
        let some = service
            .persist_observation("s1", "u1", "t1", &soul_id, "camera: a cat")
            .unwrap();
        assert!(some.is_some());
    }

    #[tokio::test]
    async fn build_context_includes_soul_summary_and_observations() {
        let (service, soul_id) = service_with_thresholds(80, 12_000);
        push_turns(&service, &soul_id, 2);
        let soul = service.store.get_soul(&soul_id).unwrap().unwrap();

        let (ctx, summary) = service.build_context(&soul, "s1", "camera: a cat").unwrap();
        assert!(ctx.contains("Nova"));
        assert!(ctx.contains("INTJ"));
        assert!(ctx.contains(NO_SUMMARY_FALLBACK));
        assert!(ctx.contains("camera: a cat"));
        assert_eq!(summary, "");

        service.maybe_compress_session("s1", true).await.unwrap();
        let (ctx, summary) = service.build_context(&soul, "s1", "").unwrap();
        assert!(ctx.contains("summary v1"));
        assert_eq!(summary, "summary v1");
        assert!(!ctx.contains("本轮观察"));
    }
}
