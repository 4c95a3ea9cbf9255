//! System prompt assembly for a chat turn.

use animus_persona::{AffectState, EmotionSignal, ExecMode};
use animus_store::SoulRelation;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

use animus_core::types::GENERIC_ACK;

/// The model signals deliberate silence with this sentinel.
pub const NO_REPLY_SENTINEL: &str = "<NO_REPLY>";

pub struct PromptArgs<'a> {
    pub memory_context: &'a str,
    pub soul_name: &'a str,
    pub soul_mbti: &'a str,
    pub state: &'a AffectState,
    pub user_emotion: &'a EmotionSignal,
    pub exec_mode: ExecMode,
    pub exec_probability: f64,
    pub snapshot_at: DateTime<Utc>,
    pub relations: &'a [SoulRelation],
    pub user_text: &'a str,
}

/// Build the full system prompt: memory block, affect snapshot,
/// persona-relation guidance, numbered decision rules, reply voice.
pub fn build_system_prompt(args: &PromptArgs<'_>) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(args.memory_context);

    let keywords = args.state.emotion_keywords().join("、");
    prompt.push_str(&format!(
        "\n## 情绪快照\n\
         snapshot_at: {}\n\
         用户情绪: {}（强度 {:.2}）\n\
         自身 PAD: ({:.2}, {:.2}, {:.2})\n\
         执行门: {}（概率 {:.2}）\n\
         情绪关键词: {}\n",
        args.snapshot_at.to_rfc3339(),
        args.user_emotion.label,
        args.user_emotion.intensity,
        args.state.p,
        args.state.a,
        args.state.d,
        args.exec_mode,
        args.exec_probability,
        keywords,
    ));

    if let Some(guidance) = relation_guidance(args) {
        prompt.push_str("\n## 对话关系\n");
        prompt.push_str(&guidance);
        prompt.push('\n');
    }

    prompt.push_str(
        "\n## 决策规则\n\
         1. 先理解用户意图，再决定是否调用技能工具。\n\
         2. 只调用本轮列出的工具，参数必须符合其 schema。\n\
         3. 执行门为 blocked 时不要调用工具，也不要假装执行过，只用语言回应。\n\
         4. recall_memory 只在确实需要更早的历史信息时使用，一轮最多一次。\n\
         5. 不确定时先澄清，不要编造设备状态。\n",
    );

    prompt.push_str(&format!(
        "\n## 回复口吻\n\
         用「{}」的口吻回复，简短自然，不要罗列规则或解释内部状态。\n\
         如果这一轮不适合说话（用户在自言自语、内容无需回应），只输出 {} 。\n",
        args.soul_name, NO_REPLY_SENTINEL,
    ));

    prompt
}

/// Persona-relation guidance block.
///
/// A stored relation whose target name appears in the user text wins;
/// otherwise a target persona is inferred from an MBTI code or keyword
/// cues in the text, and soul↔target resonance picks the strategy.
fn relation_guidance(args: &PromptArgs<'_>) -> Option<String> {
    for relation in args.relations {
        if !relation.target_name.is_empty() && args.user_text.contains(&relation.target_name) {
            let mbti = relation.target_mbti.as_deref().unwrap_or("未知");
            return Some(format!(
                "对方是「{}」（MBTI {}）。相处要点：{}",
                relation.target_name, mbti, relation.guidance
            ));
        }
    }

    let target = infer_target_mbti(args.user_text)?;
    let score = resonance(args.soul_mbti, &target);
    let strategy = if score >= 0.5 {
        "同频共鸣：顺着对方的表达方式回应，强化共同点"
    } else {
        "互补引导：保持自己的节奏，温和地补足对方缺少的视角"
    };
    Some(format!(
        "推测对方人格倾向 {target}（契合度 {score:.2}）。策略：{strategy}。"
    ))
}

/// Find a target persona in free text: an explicit MBTI code, or
/// common personality keyword cues.
pub fn infer_target_mbti(text: &str) -> Option<String> {
    static MBTI_RE: OnceLock<Regex> = OnceLock::new();
    let re = MBTI_RE.get_or_init(|| {
        Regex::new(r"\b([EI][SN][TF][JP])\b").expect("static regex")
    });
    if let Some(m) = re.captures(text) {
        return Some(m[1].to_string());
    }

    // Keyword cues only pin single axes; unknown axes stay at a common
    // default so downstream resonance still has four letters.
    let mut e = None;
    let mut f = None;
    for (cue, axis) in [
        ("外向", 'E'),
        ("开朗", 'E'),
        ("内向", 'I'),
        ("害羞", 'I'),
        ("安静", 'I'),
    ] {
        if text.contains(cue) {
            e = Some(axis);
            break;
        }
    }
    for (cue, axis) in [
        ("感性", 'F'),
        ("情绪化", 'F'),
        ("理性", 'T'),
        ("冷静", 'T'),
    ] {
        if text.contains(cue) {
            f = Some(axis);
            break;
        }
    }
    match (e, f) {
        (None, None) => None,
        (e, f) => Some(format!(
            "{}N{}P",
            e.unwrap_or('I'),
            f.unwrap_or('F')
        )),
    }
}

/// Shared-letter fraction between two MBTI codes, in [0, 1].
pub fn resonance(a: &str, b: &str) -> f64 {
    if a.len() != 4 || b.len() != 4 {
        return 0.0;
    }
    let matches = a
        .chars()
        .zip(b.chars())
        .filter(|(x, y)| x == y)
        .count();
    matches as f64 / 4.0
}

/// Trim the model's reply and resolve the silence sentinel.
///
/// Returns `(reply, silent)`. Silent turns store and return an empty
/// reply; a blank non-silent reply becomes the generic acknowledgement.
pub fn normalize_reply(content: &str) -> (String, bool) {
    let trimmed = content.trim().trim_matches('`').trim();
    let upper = trimmed.to_uppercase();
    if matches!(upper.as_str(), "<NO_REPLY>" | "NO_REPLY" | "[NO_REPLY]") {
        return (String::new(), true);
    }
    if trimmed.is_empty() {
        return (GENERIC_ACK.to_string(), false);
    }
    (trimmed.to_string(), false)
}
