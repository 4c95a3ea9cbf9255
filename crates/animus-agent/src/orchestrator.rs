//! The chat turn state machine.
//!
//! One turn: resolve soul → split inputs → persist → emotion → persona
//! step → intent short-circuit → prompt → LLM pass #1 → optional recall
//! pass → dispatch terminal tools → normalize → persist → compaction.
//! Best-effort collaborators (emotion analyzer, intent filter, semantic
//! memory, MQTT publishes) degrade silently; the LLM on pass #1 and the
//! store are the only hard dependencies.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use animus_core::types::{ChatInput, MessageRole};
use animus_core::{AnimusError, Result};
use animus_llm::{ChatTurn, LlmProvider, LlmRequest, LlmResponse, ToolDefinition};
use animus_memory::{MemoryService, MemoryTags};
use animus_mqtt::{EmotionUpdate, IntentAction};
use animus_persona::engine::{self, EngineParams, ExecMode, UpdateInput, Updated};
use animus_persona::EmotionSignal;
use animus_registry::{SkillDefinition, TerminalRegistry};
use animus_store::{Soul, Store};

use crate::emotion::EmotionAnalyzer;
use crate::intent::{DecisionKind, IntentFilterClient, IntentMatch};
use crate::prompt::{build_system_prompt, normalize_reply, PromptArgs};
use crate::recall::{
    format_recall_output, parse_recall_args, recall_tool_definition, RECALL_TOOL_NAME,
};
use crate::resolver::SoulResolver;
use crate::traits::{EmotionPublisher, IntentActionPublisher, SkillInvoker, StatusPublisher};

/// Acknowledgement when an intent fires without the LLM.
const INTENT_ACK: &str = "好的，马上就做。";
/// Acknowledgement when the gate intercepts an intent.
const INTENT_SOOTHE: &str = "我现在状态不太好，这件事稍后再做好吗？";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurnRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    pub session_id: String,
    pub terminal_id: String,
    #[serde(default)]
    pub soul_id: Option<String>,
    #[serde(default)]
    pub soul_hint: Option<String>,
    pub inputs: Vec<ChatInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurnResponse {
    pub session_id: String,
    pub terminal_id: String,
    pub soul_id: String,
    pub reply: String,
    pub executed_skills: Vec<String>,
    pub context_summary: String,
    pub intent_decision: Option<String>,
    pub exec_mode: String,
    pub exec_probability: f64,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,
    pub max_tokens: u32,
    pub base_exec_probability: f64,
    pub history_window: usize,
    pub tool_timeout: Duration,
}

/// Everything the orchestrator talks to, wired at construction.
pub struct OrchestratorDeps {
    pub store: Arc<Store>,
    pub memory: Arc<MemoryService>,
    pub registry: Arc<TerminalRegistry>,
    pub resolver: Arc<SoulResolver>,
    pub llm: Arc<dyn LlmProvider>,
    pub emotion: EmotionAnalyzer,
    pub intent: IntentFilterClient,
    pub invoker: Arc<dyn SkillInvoker>,
    pub status: Arc<dyn StatusPublisher>,
    pub emotion_pub: Arc<dyn EmotionPublisher>,
    pub intent_pub: Arc<dyn IntentActionPublisher>,
}

pub struct ChatOrchestrator {
    store: Arc<Store>,
    memory: Arc<MemoryService>,
    registry: Arc<TerminalRegistry>,
    resolver: Arc<SoulResolver>,
    llm: Arc<dyn LlmProvider>,
    emotion: EmotionAnalyzer,
    intent: IntentFilterClient,
    invoker: Arc<dyn SkillInvoker>,
    status: Arc<dyn StatusPublisher>,
    emotion_pub: Arc<dyn EmotionPublisher>,
    intent_pub: Arc<dyn IntentActionPublisher>,
    engine: EngineParams,
    cfg: OrchestratorConfig,
    /// Per-soul update locks: reload → persona step → write is atomic
    /// per soul. Reads outside the lock are fine.
    soul_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl ChatOrchestrator {
    pub fn new(deps: OrchestratorDeps, cfg: OrchestratorConfig) -> Self {
        Self {
            store: deps.store,
            memory: deps.memory,
            registry: deps.registry,
            resolver: deps.resolver,
            llm: deps.llm,
            emotion: deps.emotion,
            intent: deps.intent,
            invoker: deps.invoker,
            status: deps.status,
            emotion_pub: deps.emotion_pub,
            intent_pub: deps.intent_pub,
            engine: EngineParams::default(),
            cfg,
            soul_locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TerminalRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run one chat turn end to end.
    pub async fn handle_chat(
        &self,
        req: ChatTurnRequest,
        cancel: CancellationToken,
    ) -> Result<ChatTurnResponse> {
        if req.session_id.trim().is_empty() {
            return Err(AnimusError::Validation("session_id is required".into()));
        }
        if req.terminal_id.trim().is_empty() {
            return Err(AnimusError::Validation("terminal_id is required".into()));
        }

        // 1. Resolve the bound soul — fails fast before any LLM call.
        let (soul, user_id) = self.resolve_soul_for_turn(&req)?;
        let soul_id = soul.soul_id.clone();

        // 2. Split inputs into dialogue text and an observation digest.
        let (user_text, observation_digest) = split_inputs(&req.inputs)?;
        self.memory.persist_observation(
            &req.session_id,
            &user_id,
            &req.terminal_id,
            &soul_id,
            &observation_digest,
        )?;

        // 3. Persist the user message.
        self.memory.persist_message(
            &req.session_id,
            &user_id,
            &req.terminal_id,
            &soul_id,
            MessageRole::User,
            None,
            None,
            &user_text,
        )?;

        // 4. Emotion analysis (best-effort) + persona step + publish.
        let emotion = self.emotion.analyze(&user_text).await;
        let (soul, updated) = self.advance_affect(&soul_id, emotion.clone(), true).await?;
        self.publish_affect(&req.terminal_id, &soul_id, &req.session_id, &emotion, &updated)
            .await;

        let mut exec_mode = updated.exec_mode;
        let mut exec_probability = updated.exec_probability;
        let mut intent_decision: Option<String> = None;

        // 5. Intent short-circuit.
        if self.intent.is_configured() {
            if let Some(catalog) = self.registry.intent_catalog_for(&req.terminal_id) {
                if !catalog.is_empty() {
                    if let Some(decision) = self.intent.evaluate(&user_text, &catalog).await {
                        intent_decision = Some(decision.decision.as_str().to_string());
                        if decision.decision == DecisionKind::ExecuteIntents {
                            let actionable = decision.actionable(&catalog);
                            if !actionable.is_empty() {
                                return self
                                    .short_circuit(
                                        &req,
                                        &user_id,
                                        &soul_id,
                                        actionable,
                                        exec_mode,
                                        exec_probability,
                                    )
                                    .await;
                            }
                        }
                    }
                }
            }
        }

        // 6–7. Prompt context and the tool set.
        let relations = self.store.list_relations(&soul_id)?;
        let (memory_context, _) =
            self.memory
                .build_context(&soul, &req.session_id, &observation_digest)?;
        let system = build_system_prompt(&PromptArgs {
            memory_context: &memory_context,
            soul_name: &soul.name,
            soul_mbti: &soul.mbti_type,
            state: &soul.emotion_state,
            user_emotion: &emotion,
            exec_mode,
            exec_probability,
            snapshot_at: Utc::now(),
            relations: &relations,
            user_text: &user_text,
        });

        let terminal_skills = self.registry.skills_for(&req.terminal_id);
        let mut tools: Vec<ToolDefinition> =
            terminal_skills.iter().map(skill_to_tool).collect();
        let recall_ready = self.memory.recall_ready().await;
        if recall_ready {
            tools.push(recall_tool_definition());
        }

        let mut turns = self.history_turns(&req.session_id)?;

        // 8. LLM pass #1 — the only hard LLM dependency of the turn.
        let request = LlmRequest {
            model: self.cfg.model.clone(),
            system,
            messages: turns.clone(),
            tools,
            max_tokens: self.cfg.max_tokens,
        };
        let pass1 = self
            .llm
            .complete(&request)
            .await
            .map_err(|e| AnimusError::Provider(e.to_string()))?;

        turns.push(ChatTurn::Assistant {
            content: pass1.content.clone(),
            tool_calls: pass1.tool_calls.clone(),
        });

        // 9. Recall mode when pass #1 asked for memory.
        let wants_recall = pass1
            .tool_calls
            .iter()
            .any(|c| c.name == RECALL_TOOL_NAME);
        let final_resp = if wants_recall {
            let (resp, mode, prob) = self
                .recall_pass(
                    &req,
                    &user_id,
                    &soul_id,
                    &user_text,
                    &observation_digest,
                    &emotion,
                    &mut turns,
                    &pass1,
                    &terminal_skills,
                )
                .await?;
            exec_mode = mode;
            exec_probability = prob;
            resp
        } else {
            pass1
        };

        // 10. Dispatch terminal tool calls through the gate.
        let available: HashSet<&str> = terminal_skills.iter().map(|s| s.name.as_str()).collect();
        let mut executed_skills = Vec::new();
        for call in final_resp
            .tool_calls
            .iter()
            .filter(|c| c.name != RECALL_TOOL_NAME)
        {
            if !available.contains(call.name.as_str()) {
                warn!(skill = %call.name, terminal_id = %req.terminal_id,
                      "tool call names a skill the terminal does not advertise, skipped");
                continue;
            }

            let output = if exec_mode == ExecMode::AutoExecute {
                match tokio::time::timeout(
                    self.cfg.tool_timeout,
                    self.invoker.invoke_skill(
                        &req.terminal_id,
                        &call.name,
                        call.arguments.clone(),
                        &cancel,
                    ),
                )
                .await
                {
                    Ok(Ok(out)) => {
                        executed_skills.push(call.name.clone());
                        out
                    }
                    Ok(Err(e)) => {
                        warn!(skill = %call.name, error = %e, "skill invocation failed");
                        e
                    }
                    Err(_) => {
                        warn!(skill = %call.name, "skill invocation timed out");
                        "tool timeout".to_string()
                    }
                }
            } else {
                format!("（执行门已拦截，{} 未被执行）", call.name)
            };

            self.memory.persist_message(
                &req.session_id,
                &user_id,
                &req.terminal_id,
                &soul_id,
                MessageRole::Tool,
                Some(&call.name),
                Some(&call.id),
                &output,
            )?;
        }

        // 11–12. Normalize and persist the reply (empty when silent).
        let (reply, silent) = normalize_reply(&final_resp.content);
        self.memory.persist_message(
            &req.session_id,
            &user_id,
            &req.terminal_id,
            &soul_id,
            MessageRole::Assistant,
            None,
            None,
            &reply,
        )?;

        // 13. Post-turn compaction; failures keep the stored summary.
        let context_summary = match self.memory.maybe_compress_session(&req.session_id, false).await
        {
            Ok(s) => s,
            Err(e) => {
                warn!(session_id = %req.session_id, error = %e, "post-turn compaction failed");
                self.memory.latest_summary(&req.session_id).unwrap_or_default()
            }
        };

        info!(
            session_id = %req.session_id,
            soul_id = %soul_id,
            silent,
            executed = executed_skills.len(),
            mode = %exec_mode,
            "chat turn complete"
        );

        Ok(ChatTurnResponse {
            session_id: req.session_id,
            terminal_id: req.terminal_id,
            soul_id,
            reply,
            executed_skills,
            context_summary,
            intent_decision,
            exec_mode: exec_mode.as_str().to_string(),
            exec_probability,
        })
    }

    // ── turn stages ──────────────────────────────────────────────────────

    fn resolve_soul_for_turn(&self, req: &ChatTurnRequest) -> Result<(Soul, String)> {
        // Explicit soul id: verify, bind, use.
        if let Some(sid) = req.soul_id.as_deref().filter(|s| !s.trim().is_empty()) {
            let soul = self.store.get_soul(sid)?.ok_or_else(|| AnimusError::SoulNotFound {
                user_id: req.user_id.clone().unwrap_or_default(),
                hint: sid.to_string(),
            })?;
            if let Some(uid) = &req.user_id {
                if !uid.is_empty() && uid != &soul.user_id {
                    return Err(AnimusError::Validation(format!(
                        "soul {sid} does not belong to user {uid}"
                    )));
                }
            }
            let user_id = soul.user_id.clone();
            self.store.bind_terminal(&user_id, &req.terminal_id, sid)?;
            self.registry.set_soul(&req.terminal_id, sid);
            return Ok((soul, user_id));
        }

        // Registry-cached binding from terminal traffic.
        if let Some(cached) = self.registry.soul_for(&req.terminal_id) {
            if let Some(soul) = self.store.get_soul(&cached)? {
                let matches_user = req
                    .user_id
                    .as_deref()
                    .map(|uid| uid.is_empty() || uid == soul.user_id)
                    .unwrap_or(true);
                if matches_user {
                    let user_id = soul.user_id.clone();
                    return Ok((soul, user_id));
                }
            }
        }

        // Full resolution — requires a user id.
        let user_id = req
            .user_id
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                AnimusError::Validation("user_id is required when no soul is bound".into())
            })?;
        let soul_id =
            self.resolver
                .resolve(&user_id, &req.terminal_id, req.soul_hint.as_deref())?;
        self.registry.set_soul(&req.terminal_id, &soul_id);
        let soul = self
            .store
            .get_soul(&soul_id)?
            .ok_or_else(|| AnimusError::Internal("resolved soul vanished".into()))?;
        Ok((soul, user_id))
    }

    fn soul_lock(&self, soul_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let entry = self
            .soul_locks
            .entry(soul_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())));
        Arc::clone(entry.value())
    }

    /// Reload → persona step → persist, serialized per soul.
    pub(crate) async fn advance_affect(
        &self,
        soul_id: &str,
        emotion: EmotionSignal,
        has_user_input: bool,
    ) -> Result<(Soul, Updated)> {
        let lock = self.soul_lock(soul_id);
        let _guard = lock.lock().await;

        let mut soul = self
            .store
            .get_soul(soul_id)?
            .ok_or_else(|| AnimusError::SoulNotFound {
                user_id: String::new(),
                hint: soul_id.to_string(),
            })?;
        let updated = engine::update(
            &self.engine,
            &soul.personality,
            &soul.emotion_state,
            &UpdateInput {
                now: Utc::now(),
                emotion,
                has_user_input,
            },
            self.cfg.base_exec_probability,
        );
        self.store.update_soul_emotion(soul_id, &updated.state)?;
        soul.emotion_state = updated.state.clone();
        Ok((soul, updated))
    }

    pub(crate) async fn publish_affect(
        &self,
        terminal_id: &str,
        soul_id: &str,
        session_id: &str,
        emotion: &EmotionSignal,
        updated: &Updated,
    ) {
        let state = &updated.state;
        let update = EmotionUpdate {
            terminal_id: terminal_id.to_string(),
            soul_id: soul_id.to_string(),
            session_id: session_id.to_string(),
            snapshot_at: Utc::now().to_rfc3339(),
            user_emotion: emotion.label.clone(),
            user_emotion_intensity: emotion.intensity,
            p: state.p,
            a: state.a,
            d: state.d,
            exec_mode: updated.exec_mode.as_str().to_string(),
            exec_probability: updated.exec_probability,
            keywords: state
                .emotion_keywords()
                .into_iter()
                .map(String::from)
                .collect(),
        };
        if let Err(e) = self.emotion_pub.publish_emotion(update).await {
            warn!(terminal_id, error = %e, "emotion_update publish failed");
        }
    }

    /// Intent short-circuit: dispatch (or soothe) without the LLM.
    async fn short_circuit(
        &self,
        req: &ChatTurnRequest,
        user_id: &str,
        soul_id: &str,
        actionable: Vec<IntentMatch>,
        exec_mode: ExecMode,
        exec_probability: f64,
    ) -> Result<ChatTurnResponse> {
        let mut executed_skills = Vec::new();
        let reply = if exec_mode == ExecMode::AutoExecute {
            for m in &actionable {
                let skill = m.skill.clone().unwrap_or_default();
                let action = IntentAction {
                    terminal_id: req.terminal_id.clone(),
                    session_id: req.session_id.clone(),
                    intent: m.intent.clone(),
                    skill: skill.clone(),
                    slots: m.slots.clone(),
                };
                match self.intent_pub.publish_intent_action(action).await {
                    Ok(()) => executed_skills.push(skill),
                    Err(e) => warn!(intent = %m.intent, error = %e, "intent_action publish failed"),
                }
            }
            INTENT_ACK
        } else {
            debug!(soul_id, "gate blocked the intent path");
            INTENT_SOOTHE
        };

        self.memory.persist_message(
            &req.session_id,
            user_id,
            &req.terminal_id,
            soul_id,
            MessageRole::Assistant,
            None,
            None,
            reply,
        )?;
        let context_summary = self.memory.latest_summary(&req.session_id)?;

        Ok(ChatTurnResponse {
            session_id: req.session_id.clone(),
            terminal_id: req.terminal_id.clone(),
            soul_id: soul_id.to_string(),
            reply: reply.to_string(),
            executed_skills,
            context_summary,
            intent_decision: Some(DecisionKind::ExecuteIntents.as_str().to_string()),
            exec_mode: exec_mode.as_str().to_string(),
            exec_probability,
        })
    }

    /// Recall mode: execute memory lookups, then LLM pass #2 with only
    /// terminal tools. Pass #2 failure keeps pass #1's reply.
    #[allow(clippy::too_many_arguments)]
    async fn recall_pass(
        &self,
        req: &ChatTurnRequest,
        user_id: &str,
        soul_id: &str,
        user_text: &str,
        observation_digest: &str,
        emotion: &EmotionSignal,
        turns: &mut Vec<ChatTurn>,
        pass1: &LlmResponse,
        terminal_skills: &[SkillDefinition],
    ) -> Result<(LlmResponse, ExecMode, f64)> {
        self.status
            .publish_status(&req.terminal_id, "mem0_searching", serde_json::Value::Null)
            .await;

        let tags = MemoryTags {
            user_id: user_id.to_string(),
            soul_id: soul_id.to_string(),
            session_id: req.session_id.clone(),
            terminal_id: req.terminal_id.clone(),
        };

        let mut all_ok = true;
        for call in pass1
            .tool_calls
            .iter()
            .filter(|c| c.name == RECALL_TOOL_NAME)
        {
            let output = match parse_recall_args(&call.arguments, user_text) {
                Ok((query, top_k)) => match self.memory.mem0() {
                    Some(client) => match client.search(&query, &tags, top_k).await {
                        Ok(snippets) => format_recall_output(&snippets),
                        Err(e) => {
                            all_ok = false;
                            warn!(error = %e, "memory recall failed");
                            format!("recall failed: {e}")
                        }
                    },
                    None => {
                        all_ok = false;
                        "recall failed: semantic memory unavailable".to_string()
                    }
                },
                Err(invalid) => {
                    all_ok = false;
                    invalid
                }
            };

            turns.push(ChatTurn::Tool {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                content: output.clone(),
            });
            self.memory.persist_message(
                &req.session_id,
                user_id,
                &req.terminal_id,
                soul_id,
                MessageRole::Tool,
                Some(&call.name),
                Some(&call.id),
                &output,
            )?;
        }

        let event = if all_ok { "mem0_search_done" } else { "mem0_search_failed" };
        self.status
            .publish_status(&req.terminal_id, event, serde_json::Value::Null)
            .await;

        // The gate at pass #2 reflects the soul state at this moment.
        let soul = self
            .store
            .get_soul(soul_id)?
            .ok_or_else(|| AnimusError::Internal("soul vanished mid-turn".into()))?;
        let effective = soul.effective_personality();
        let (exec_probability, exec_mode) = engine::execution_probability(
            &self.engine,
            &effective,
            &soul.emotion_state,
            self.cfg.base_exec_probability,
            Utc::now(),
        );

        let relations = self.store.list_relations(soul_id)?;
        let (memory_context, _) =
            self.memory
                .build_context(&soul, &req.session_id, observation_digest)?;
        let system = build_system_prompt(&PromptArgs {
            memory_context: &memory_context,
            soul_name: &soul.name,
            soul_mbti: &soul.mbti_type,
            state: &soul.emotion_state,
            user_emotion: emotion,
            exec_mode,
            exec_probability,
            snapshot_at: Utc::now(),
            relations: &relations,
            user_text,
        });

        let request = LlmRequest {
            model: self.cfg.model.clone(),
            system,
            messages: turns.clone(),
            tools: terminal_skills.iter().map(skill_to_tool).collect(),
            max_tokens: self.cfg.max_tokens,
        };

        match self.llm.complete(&request).await {
            Ok(pass2) => {
                turns.push(ChatTurn::Assistant {
                    content: pass2.content.clone(),
                    tool_calls: pass2.tool_calls.clone(),
                });
                Ok((pass2, exec_mode, exec_probability))
            }
            Err(e) => {
                warn!(error = %e, "LLM pass #2 failed, keeping pass #1 reply");
                Ok((pass1.clone(), exec_mode, exec_probability))
            }
        }
    }

    fn history_turns(&self, session_id: &str) -> Result<Vec<ChatTurn>> {
        let messages = self
            .store
            .recent_messages(session_id, self.cfg.history_window)?;
        Ok(messages
            .into_iter()
            .map(|m| match m.role {
                MessageRole::Assistant => ChatTurn::assistant(m.content),
                MessageRole::Tool => ChatTurn::Tool {
                    tool_call_id: m.tool_call_id.unwrap_or_default(),
                    name: m.name.unwrap_or_default(),
                    content: m.content,
                },
                _ => ChatTurn::user(m.content),
            })
            .collect())
    }
}

fn skill_to_tool(skill: &SkillDefinition) -> ToolDefinition {
    ToolDefinition {
        name: skill.name.clone(),
        description: skill.description.clone(),
        input_schema: skill.input_schema.clone(),
    }
}

/// Split raw inputs: dialogue kinds become the user text, everything
/// else is folded into the observation digest. At least one non-empty
/// dialogue input is required.
fn split_inputs(inputs: &[ChatInput]) -> Result<(String, String)> {
    let mut texts = Vec::new();
    let mut observations = Vec::new();
    for input in inputs {
        let text = input.text.trim();
        if text.is_empty() {
            continue;
        }
        if input.is_dialogue() {
            texts.push(text.to_string());
        } else {
            observations.push(format!("{}: {}", input.kind, text));
        }
    }
    if texts.is_empty() {
        return Err(AnimusError::Validation(
            "inputs must contain at least one non-empty keyboard_text or speech_text".into(),
        ));
    }
    Ok((texts.join("\n"), observations.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use animus_core::config::MemoryConfig;
    use animus_llm::{ProviderError, ToolCall};
    use animus_memory::Mem0Client;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    // ── fakes ────────────────────────────────────────────────────────────

    struct ScriptedLlm {
        script: Mutex<VecDeque<std::result::Result<LlmResponse, String>>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedLlm {
        fn new(script: Vec<std::result::Result<LlmResponse, String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn reply(content: &str) -> std::result::Result<LlmResponse, String> {
            Ok(LlmResponse {
                content: content.to_string(),
                model: "scripted".into(),
                tokens_in: 0,
                tokens_out: 0,
                tool_calls: Vec::new(),
            })
        }

        fn reply_with_calls(
            content: &str,
            calls: Vec<ToolCall>,
        ) -> std::result::Result<LlmResponse, String> {
            Ok(LlmResponse {
                content: content.to_string(),
                model: "scripted".into(),
                tokens_in: 0,
                tokens_out: 0,
                tool_calls: calls,
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            req: &LlmRequest,
        ) -> std::result::Result<LlmResponse, ProviderError> {
            self.requests.lock().unwrap().push(req.clone());
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(resp)) => Ok(resp),
                Some(Err(msg)) => Err(ProviderError::Api {
                    status: 500,
                    message: msg,
                }),
                None => Err(ProviderError::Api {
                    status: 500,
                    message: "script exhausted".into(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingInvoker {
        calls: Mutex<Vec<(String, String)>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl SkillInvoker for RecordingInvoker {
        async fn invoke_skill(
            &self,
            terminal_id: &str,
            skill: &str,
            _arguments: serde_json::Value,
            _cancel: &CancellationToken,
        ) -> std::result::Result<String, String> {
            self.calls
                .lock()
                .unwrap()
                .push((terminal_id.to_string(), skill.to_string()));
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(format!("{skill} done")),
            }
        }
    }

    #[derive(Default)]
    struct RecordingStatus {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StatusPublisher for RecordingStatus {
        async fn publish_status(&self, _terminal_id: &str, event: &str, _data: serde_json::Value) {
            self.events.lock().unwrap().push(event.to_string());
        }
    }

    #[derive(Default)]
    struct RecordingEmotionPub {
        updates: Mutex<Vec<EmotionUpdate>>,
    }

    #[async_trait]
    impl EmotionPublisher for RecordingEmotionPub {
        async fn publish_emotion(&self, update: EmotionUpdate) -> std::result::Result<(), String> {
            self.updates.lock().unwrap().push(update);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingIntentPub {
        actions: Mutex<Vec<IntentAction>>,
    }

    #[async_trait]
    impl IntentActionPublisher for RecordingIntentPub {
        async fn publish_intent_action(
            &self,
            action: IntentAction,
        ) -> std::result::Result<(), String> {
            self.actions.lock().unwrap().push(action);
            Ok(())
        }
    }

    // ── harness ──────────────────────────────────────────────────────────

    struct Harness {
        orchestrator: ChatOrchestrator,
        store: Arc<Store>,
        llm: Arc<ScriptedLlm>,
        invoker: Arc<RecordingInvoker>,
        status: Arc<RecordingStatus>,
        emotion_pub: Arc<RecordingEmotionPub>,
        intent_pub: Arc<RecordingIntentPub>,
        soul_id: String,
    }

    fn harness_with(
        script: Vec<std::result::Result<LlmResponse, String>>,
        mem0: Option<Arc<Mem0Client>>,
        invoker: RecordingInvoker,
    ) -> Harness {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let soul = store.create_soul("u1", "Nova", "INTJ", "").unwrap();
        store.bind_terminal("u1", "t1", &soul.soul_id).unwrap();

        let llm = ScriptedLlm::new(script);
        let memory = Arc::new(MemoryService::new(
            Arc::clone(&store),
            llm.clone() as Arc<dyn LlmProvider>,
            mem0,
            MemoryConfig::default(),
            "scripted".into(),
        ));
        let registry = Arc::new(TerminalRegistry::new(Duration::from_secs(60)));
        registry.set_soul("t1", &soul.soul_id);
        registry.set_skills(
            "t1",
            Some(soul.soul_id.clone()),
            1,
            vec![SkillDefinition {
                name: "wave".into(),
                description: "wave the arm".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
        );

        let invoker = Arc::new(invoker);
        let status = Arc::new(RecordingStatus::default());
        let emotion_pub = Arc::new(RecordingEmotionPub::default());
        let intent_pub = Arc::new(RecordingIntentPub::default());
        let http = reqwest::Client::new();

        let orchestrator = ChatOrchestrator::new(
            OrchestratorDeps {
                store: Arc::clone(&store),
                memory,
                registry,
                resolver: Arc::new(SoulResolver::new(Arc::clone(&store))),
                llm: llm.clone() as Arc<dyn LlmProvider>,
                emotion: EmotionAnalyzer::new(http.clone(), None),
                intent: IntentFilterClient::new(http, None),
                invoker: invoker.clone() as Arc<dyn SkillInvoker>,
                status: status.clone() as Arc<dyn StatusPublisher>,
                emotion_pub: emotion_pub.clone() as Arc<dyn EmotionPublisher>,
                intent_pub: intent_pub.clone() as Arc<dyn IntentActionPublisher>,
            },
            OrchestratorConfig {
                model: "scripted".into(),
                max_tokens: 512,
                base_exec_probability: 0.85,
                history_window: 20,
                tool_timeout: Duration::from_secs(1),
            },
        );

        Harness {
            orchestrator,
            store,
            llm,
            invoker,
            status,
            emotion_pub,
            intent_pub,
            soul_id: soul.soul_id,
        }
    }

    fn text_request(text: &str) -> ChatTurnRequest {
        ChatTurnRequest {
            user_id: Some("u1".into()),
            session_id: "s1".into(),
            terminal_id: "t1".into(),
            soul_id: None,
            soul_hint: None,
            inputs: vec![ChatInput {
                kind: "keyboard_text".into(),
                text: text.into(),
            }],
        }
    }

    // ── tests ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn plain_turn_returns_reply_and_persists_both_sides() {
        let h = harness_with(
            vec![ScriptedLlm::reply("你好呀")],
            None,
            RecordingInvoker::default(),
        );
        let resp = h
            .orchestrator
            .handle_chat(text_request("你好"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.reply, "你好呀");
        assert_eq!(resp.soul_id, h.soul_id);
        assert!(resp.executed_skills.is_empty());
        assert_eq!(resp.exec_mode, "auto_execute");
        assert!(resp.exec_probability > 0.5);

        let messages = h.store.recent_messages("s1", 10).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "你好呀");

        // The affect snapshot went out exactly once.
        assert_eq!(h.emotion_pub.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn advertised_skill_call_is_dispatched_and_recorded() {
        let h = harness_with(
            vec![ScriptedLlm::reply_with_calls(
                "挥手啦",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "wave".into(),
                    arguments: serde_json::json!({"speed": "fast"}),
                }],
            )],
            None,
            RecordingInvoker::default(),
        );
        let resp = h
            .orchestrator
            .handle_chat(text_request("挥个手"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.executed_skills, vec!["wave"]);
        assert_eq!(h.invoker.calls.lock().unwrap().len(), 1);

        let messages = h.store.recent_messages("s1", 10).unwrap();
        let tool_msg = messages.iter().find(|m| m.role == MessageRole::Tool).unwrap();
        assert_eq!(tool_msg.name.as_deref(), Some("wave"));
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_msg.content, "wave done");
    }

    #[tokio::test]
    async fn unknown_skill_is_skipped_without_dispatch() {
        let h = harness_with(
            vec![ScriptedLlm::reply_with_calls(
                "好",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "ghost_skill".into(),
                    arguments: serde_json::json!({}),
                }],
            )],
            None,
            RecordingInvoker::default(),
        );
        let resp = h
            .orchestrator
            .handle_chat(text_request("做点什么"), CancellationToken::new())
            .await
            .unwrap();

        assert!(resp.executed_skills.is_empty());
        assert!(h.invoker.calls.lock().unwrap().is_empty());
        // Nothing recorded for the skipped call.
        let messages = h.store.recent_messages("s1", 10).unwrap();
        assert!(messages.iter().all(|m| m.role != MessageRole::Tool));
    }

    #[tokio::test]
    async fn blocked_gate_intercepts_instead_of_invoking() {
        let h = harness_with(
            vec![ScriptedLlm::reply_with_calls(
                "……",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "wave".into(),
                    arguments: serde_json::json!({}),
                }],
            )],
            None,
            RecordingInvoker::default(),
        );

        // Lock the soul so the gate blocks.
        let mut soul = h.store.get_soul(&h.soul_id).unwrap().unwrap();
        soul.emotion_state.lock_until = Some(Utc::now() + chrono::Duration::seconds(300));
        h.store
            .update_soul_emotion(&h.soul_id, &soul.emotion_state)
            .unwrap();

        let resp = h
            .orchestrator
            .handle_chat(text_request("挥手"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.exec_mode, "blocked");
        assert!(resp.executed_skills.is_empty());
        assert!(h.invoker.calls.lock().unwrap().is_empty());

        let messages = h.store.recent_messages("s1", 10).unwrap();
        let tool_msg = messages.iter().find(|m| m.role == MessageRole::Tool).unwrap();
        assert!(tool_msg.content.contains("拦截"));
    }

    #[tokio::test]
    async fn failed_invocation_records_error_but_not_executed() {
        let h = harness_with(
            vec![ScriptedLlm::reply_with_calls(
                "好",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "wave".into(),
                    arguments: serde_json::json!({}),
                }],
            )],
            None,
            RecordingInvoker {
                fail_with: Some("tool timeout".into()),
                ..Default::default()
            },
        );
        let resp = h
            .orchestrator
            .handle_chat(text_request("挥手"), CancellationToken::new())
            .await
            .unwrap();

        assert!(resp.executed_skills.is_empty());
        let messages = h.store.recent_messages("s1", 10).unwrap();
        let tool_msg = messages.iter().find(|m| m.role == MessageRole::Tool).unwrap();
        assert_eq!(tool_msg.content, "tool timeout");
    }

    #[tokio::test]
    async fn no_reply_sentinel_yields_silent_empty_reply() {
        let h = harness_with(
            vec![ScriptedLlm::reply("<NO_REPLY>")],
            None,
            RecordingInvoker::default(),
        );
        let resp = h
            .orchestrator
            .handle_chat(text_request("嗯"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.reply, "");
        let messages = h.store.recent_messages("s1", 10).unwrap();
        assert_eq!(messages.last().unwrap().content, "");
    }

    #[tokio::test]
    async fn missing_dialogue_text_is_a_validation_error() {
        let h = harness_with(vec![], None, RecordingInvoker::default());
        let mut req = text_request("");
        req.inputs = vec![ChatInput {
            kind: "vision_caption".into(),
            text: "a cat on the sofa".into(),
        }];
        let err = h
            .orchestrator
            .handle_chat(req, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnimusError::Validation(_)));
    }

    #[tokio::test]
    async fn observation_inputs_are_persisted_alongside_the_turn() {
        let h = harness_with(
            vec![ScriptedLlm::reply("看到啦")],
            None,
            RecordingInvoker::default(),
        );
        let mut req = text_request("看这个");
        req.inputs.push(ChatInput {
            kind: "vision_caption".into(),
            text: "a cat on the sofa".into(),
        });
        h.orchestrator
            .handle_chat(req, CancellationToken::new())
            .await
            .unwrap();

        // recent_messages filters observations; count them directly.
        let (count, _) = h.store.fresh_stats("s1", 0).unwrap();
        assert_eq!(count, 3); // observation + user + assistant
    }

    #[tokio::test]
    async fn unknown_user_without_soul_fails_with_soul_not_found() {
        let h = harness_with(vec![], None, RecordingInvoker::default());
        let mut req = text_request("你好");
        req.user_id = Some("stranger".into());
        req.terminal_id = "t-new".into();
        let err = h
            .orchestrator
            .handle_chat(req, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnimusError::SoulNotFound { .. }));
    }

    #[tokio::test]
    async fn two_souls_without_hint_fail_with_selection_required() {
        let h = harness_with(vec![], None, RecordingInvoker::default());
        h.store.create_soul("u2", "Alpha", "ENTP", "").unwrap();
        h.store.create_soul("u2", "Beta", "ISFJ", "").unwrap();
        let mut req = text_request("你好");
        req.user_id = Some("u2".into());
        req.terminal_id = "t-new".into();
        let err = h
            .orchestrator
            .handle_chat(req, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnimusError::SoulSelectionRequired { count: 2, .. }));
    }

    #[tokio::test]
    async fn recall_pass_runs_two_llm_calls_and_dispatches_pass2_tools() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/memories/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"memory": "喜欢茉莉花茶"}]
            })))
            .mount(&server)
            .await;

        let mem0 = Arc::new(Mem0Client::new(server.uri(), 5));
        let h = harness_with(
            vec![
                ScriptedLlm::reply_with_calls(
                    "",
                    vec![ToolCall {
                        id: "call_r".into(),
                        name: RECALL_TOOL_NAME.into(),
                        arguments: serde_json::json!({"query": "earlier preferences"}),
                    }],
                ),
                ScriptedLlm::reply_with_calls(
                    "想起来了，你喜欢茉莉花茶",
                    vec![ToolCall {
                        id: "call_w".into(),
                        name: "wave".into(),
                        arguments: serde_json::json!({}),
                    }],
                ),
            ],
            Some(mem0),
            RecordingInvoker::default(),
        );

        let resp = h
            .orchestrator
            .handle_chat(text_request("我以前说过喜欢什么？"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.reply, "想起来了，你喜欢茉莉花茶");
        assert_eq!(resp.executed_skills, vec!["wave"]);

        let events = h.status.events.lock().unwrap().clone();
        assert_eq!(events, vec!["mem0_searching", "mem0_search_done"]);

        // Pass #1 offered the recall tool, pass #2 must not.
        let requests = h.llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].tools.iter().any(|t| t.name == RECALL_TOOL_NAME));
        assert!(requests[1].tools.iter().all(|t| t.name != RECALL_TOOL_NAME));

        // The recall result is a persisted tool message.
        let messages = h.store.recent_messages("s1", 10).unwrap();
        let recall_msg = messages
            .iter()
            .find(|m| m.name.as_deref() == Some(RECALL_TOOL_NAME))
            .unwrap();
        assert!(recall_msg.content.contains("茉莉花茶"));
    }

    #[tokio::test]
    async fn pass2_failure_keeps_pass1_reply() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/memories/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": []
            })))
            .mount(&server)
            .await;

        let mem0 = Arc::new(Mem0Client::new(server.uri(), 5));
        let h = harness_with(
            vec![
                ScriptedLlm::reply_with_calls(
                    "让我想想",
                    vec![ToolCall {
                        id: "call_r".into(),
                        name: RECALL_TOOL_NAME.into(),
                        arguments: serde_json::json!({"query": "q"}),
                    }],
                ),
                Err("boom".into()),
            ],
            Some(mem0),
            RecordingInvoker::default(),
        );

        let resp = h
            .orchestrator
            .handle_chat(text_request("想想看"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.reply, "让我想想");
        assert!(resp.executed_skills.is_empty());
    }

    #[tokio::test]
    async fn llm_pass1_failure_propagates() {
        let h = harness_with(vec![Err("down".into())], None, RecordingInvoker::default());
        let err = h
            .orchestrator
            .handle_chat(text_request("你好"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnimusError::Provider(_)));
    }

    #[tokio::test]
    async fn short_circuit_publishes_when_auto_and_soothes_when_blocked() {
        let h = harness_with(vec![], None, RecordingInvoker::default());
        let req = text_request("开灯");
        let actionable = vec![IntentMatch {
            intent: "intent_light".into(),
            skill: Some("control_light".into()),
            slots: serde_json::json!({"state": "on"}),
            status: crate::intent::IntentStatus::Ready,
        }];

        let resp = h
            .orchestrator
            .short_circuit(&req, "u1", &h.soul_id, actionable.clone(), ExecMode::AutoExecute, 0.8)
            .await
            .unwrap();
        assert_eq!(resp.reply, INTENT_ACK);
        assert_eq!(resp.executed_skills, vec!["control_light"]);
        assert_eq!(h.intent_pub.actions.lock().unwrap().len(), 1);
        assert_eq!(h.intent_pub.actions.lock().unwrap()[0].skill, "control_light");

        let resp = h
            .orchestrator
            .short_circuit(&req, "u1", &h.soul_id, actionable, ExecMode::Blocked, 0.01)
            .await
            .unwrap();
        assert_eq!(resp.reply, INTENT_SOOTHE);
        assert!(resp.executed_skills.is_empty());
        // No further publish happened.
        assert_eq!(h.intent_pub.actions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_window_feeds_prior_turns_to_the_llm() {
        let h = harness_with(
            vec![ScriptedLlm::reply("第二轮"), ScriptedLlm::reply("第三轮")],
            None,
            RecordingInvoker::default(),
        );
        // Seed one earlier exchange.
        h.orchestrator
            .handle_chat(text_request("第一句"), CancellationToken::new())
            .await
            .unwrap();
        h.orchestrator
            .handle_chat(text_request("第二句"), CancellationToken::new())
            .await
            .unwrap();

        let requests = h.llm.requests.lock().unwrap();
        let last = requests.last().unwrap();
        // History: user1, assistant1, user2 (current turn included).
        assert_eq!(last.messages.len(), 3);
        assert!(matches!(&last.messages[0], ChatTurn::User { content } if content == "第一句"));
        assert!(matches!(&last.messages[1], ChatTurn::Assistant { content, .. } if content == "第二轮"));
    }
}
