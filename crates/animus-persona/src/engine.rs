//! The affect update step and the execution gate.
//!
//! `update` advances one soul's [`AffectState`] by `dt = now -
//! last_updated_at` (clamped to [0, 7200] s) under an incoming emotion
//! signal, then derives the gate. All rates are per-second and every
//! relaxation uses exponential gain `1 - exp(-dt/τ)` rather than linear
//! `dt/τ` scaling, so a long idle gap cannot overshoot a target.

use chrono::{DateTime, Duration, Utc};

use crate::state::{AffectState, EmotionSignal};
use crate::vector::PersonalityVector;

/// Engine constants. Defaults are the tuned production values; tests and
/// simulations may shrink time constants to speed things up.
#[derive(Debug, Clone)]
pub struct EngineParams {
    /// Max seconds a single step may integrate.
    pub max_dt_secs: f64,
    /// Idle seconds before boredom starts to build.
    pub boredom_idle_threshold_secs: f64,
    pub boredom_tau_up_secs: f64,
    pub boredom_tau_down_secs: f64,
    /// Length of the boredom wash-out pulse applied per user input.
    pub boredom_pulse_secs: f64,
    pub impact_base: f64,
    pub max_impact_norm: f64,
    pub negative_gain: f64,
    pub positive_gain: f64,
    pub shock_theta: f64,
    pub shock_tau_base_secs: f64,
    pub shock_negative_gain: f64,
    pub shock_positive_gain: f64,
    pub recovery_rate: f64,
    pub extreme_tau_secs: f64,
    pub drift_eta: f64,
    pub drift_gamma: f64,
    pub drift_max: f64,
    pub lock_base_secs: f64,
    pub lock_refresh_min_secs: f64,
    pub lock_refresh_max_secs: f64,
    pub unlock_ratio_min: f64,
    pub unlock_ratio_max: f64,
    /// Remaining lock below this simply unlocks.
    pub unlock_epsilon_secs: f64,
    pub extreme_penalty: f64,
    pub shock_penalty: f64,
    pub lock_gate_factor: f64,
    /// EMA window for the long-term trajectory features.
    pub long_ema_tau_secs: f64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            max_dt_secs: 7200.0,
            boredom_idle_threshold_secs: 18.0,
            boredom_tau_up_secs: 240.0,
            boredom_tau_down_secs: 90.0,
            boredom_pulse_secs: 2.0,
            impact_base: 0.55,
            max_impact_norm: 0.42,
            negative_gain: 1.30,
            positive_gain: 0.62,
            shock_theta: 0.08,
            shock_tau_base_secs: 120.0,
            shock_negative_gain: 1.25,
            shock_positive_gain: 0.58,
            recovery_rate: 0.18,
            extreme_tau_secs: 360.0,
            drift_eta: 9e-5,
            drift_gamma: 4e-5,
            drift_max: 0.22,
            lock_base_secs: 120.0,
            lock_refresh_min_secs: 18.0,
            lock_refresh_max_secs: 48.0,
            unlock_ratio_min: 0.20,
            unlock_ratio_max: 0.75,
            unlock_epsilon_secs: 0.5,
            extreme_penalty: 0.95,
            shock_penalty: 0.8,
            lock_gate_factor: 0.02,
            long_ema_tau_secs: 2400.0,
        }
    }
}

/// Whether the gate lets terminal skill calls fire. Strictly binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    AutoExecute,
    Blocked,
}

impl ExecMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecMode::AutoExecute => "auto_execute",
            ExecMode::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct UpdateInput {
    pub now: DateTime<Utc>,
    pub emotion: EmotionSignal,
    pub has_user_input: bool,
}

#[derive(Debug, Clone)]
pub struct Updated {
    pub state: AffectState,
    pub effective: PersonalityVector,
    pub exec_probability: f64,
    pub exec_mode: ExecMode,
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

const NEGATIVE_LABELS: &[&str] = &[
    "anger", "fear", "sadness", "disgust", "anxiety", "frustration", "contempt", "愤怒", "生气",
    "恐惧", "害怕", "悲伤", "难过", "厌恶", "焦虑", "沮丧",
];

const POSITIVE_LABELS: &[&str] = &[
    "joy", "happiness", "excitement", "affection", "gratitude", "calm", "relief", "开心", "喜悦",
    "兴奋", "感动", "感激", "平静", "放松",
];

/// Split an emotion signal into negative/positive polarity scores in
/// [0, 1], combining the label class with the sign of the PAD pleasure
/// axis. A mislabelled but clearly negative-valence signal still reads
/// as negative.
pub fn polarity_scores(sig: &EmotionSignal) -> (f64, f64) {
    let label = sig.label.to_lowercase();
    let label_neg = if NEGATIVE_LABELS.iter().any(|l| *l == label) {
        1.0
    } else {
        0.0
    };
    let label_pos = if POSITIVE_LABELS.iter().any(|l| *l == label) {
        1.0
    } else {
        0.0
    };
    let intensity = clamp01(sig.intensity);
    let neg = clamp01(intensity * (0.65 * label_neg + 0.45 * (-sig.p).max(0.0)));
    let pos = clamp01(intensity * (0.65 * label_pos + 0.45 * sig.p.max(0.0)));
    (neg, pos)
}

/// Advance `prev` to `input.now`. Pure: the caller persists the result.
pub fn update(
    params: &EngineParams,
    base: &PersonalityVector,
    prev: &AffectState,
    input: &UpdateInput,
    base_exec_prob: f64,
) -> Updated {
    let mut state = prev.clone();
    state.sanitize();

    let now = input.now;
    let dt = (now - state.last_updated_at)
        .num_milliseconds()
        .max(0) as f64
        / 1000.0;
    let dt = dt.min(params.max_dt_secs);

    // 1. Effective personality.
    let eff = base.add(&state.drift).clamp01();

    // 2. Idle accounting. A real user turn or any non-neutral signal
    //    counts as interaction.
    let has_input = input.has_user_input || !input.emotion.is_neutral();
    if has_input {
        state.last_interaction_at = now;
    }
    let idle_secs = (now - state.last_interaction_at).num_milliseconds().max(0) as f64 / 1000.0;

    // 3. Boredom. Stable personalities get bored slower; sensitive ones
    //    faster. The same shaping applies to the wash-out.
    let boredom_shape = (1.0 + 0.6 * eff.stability - 0.7 * eff.sensitivity).max(0.2);
    if has_input {
        let tau_down = params.boredom_tau_down_secs * boredom_shape;
        state.boredom *= (-params.boredom_pulse_secs / tau_down).exp();
    } else if idle_secs >= params.boredom_idle_threshold_secs {
        let tau_up = params.boredom_tau_up_secs * boredom_shape;
        let gain = 1.0 - (-dt / tau_up).exp();
        state.boredom += (1.0 - state.boredom) * gain;
    }
    state.boredom = clamp01(state.boredom);

    // 4. PAD target: personality-driven neutral, pulled toward a flat
    //    negative prior as boredom builds.
    let neutral_p = 0.30 * eff.empathy - 0.10;
    let neutral_a = 0.20 * eff.expressiveness - 0.05;
    let neutral_d = 0.35 * eff.dominance - 0.12;
    let bored_w = 0.6 * state.boredom;
    let target_p = lerp(neutral_p, -0.35, bored_w);
    let target_a = lerp(neutral_a, -0.15, bored_w);
    let target_d = lerp(neutral_d, -0.10, bored_w);

    // 5. Impact from the user emotion.
    let (neg, pos) = polarity_scores(&input.emotion);
    let gain = params.impact_base
        * lerp(1.0, params.negative_gain, neg)
        * lerp(1.0, params.positive_gain, pos);
    let composite = 0.45 * eff.empathy + 0.35 * eff.sensitivity + 0.20 * (1.0 - eff.stability);
    let intensity = clamp01(input.emotion.intensity);
    let mut dp = gain * composite * intensity * input.emotion.p;
    let mut da = gain * composite * intensity * input.emotion.a;
    let mut dd = gain * composite * intensity * input.emotion.d;
    let norm = (dp * dp + da * da + dd * dd).sqrt();
    if norm > params.max_impact_norm {
        let scale = params.max_impact_norm / norm;
        dp *= scale;
        da *= scale;
        dd *= scale;
    }
    let impact_norm = norm.min(params.max_impact_norm);

    // 6. Shock: decays with a personality-shaped time constant, charges
    //    from impact beyond the θ dead zone.
    let shock_tau =
        params.shock_tau_base_secs * (1.0 + 0.8 * eff.stability - 0.6 * eff.sensitivity).max(0.25);
    state.shock_load *= (-dt / shock_tau).exp();
    let neg_share = if neg + pos > 0.0 { neg / (neg + pos) } else { 0.5 };
    let shock_gain = lerp(params.shock_positive_gain, params.shock_negative_gain, neg_share);
    state.shock_load += shock_gain * (impact_norm - params.shock_theta).max(0.0);
    state.shock_load = clamp01(state.shock_load);

    // 7. Recovery pull toward target. Shock weakens the pull.
    let lambda = params.recovery_rate * (1.0 - 0.65 * state.shock_load);
    let recovery_gain = 1.0 - (-lambda * dt).exp();
    state.p = (state.p + dp + recovery_gain * (target_p - state.p)).clamp(-1.0, 1.0);
    state.a = (state.a + da + recovery_gain * (target_a - state.a)).clamp(-1.0, 1.0);
    state.d = (state.d + dd + recovery_gain * (target_d - state.d)).clamp(-1.0, 1.0);

    // 8. Long-term features and drift.
    let ema_alpha = 1.0 - (-dt / params.long_ema_tau_secs).exp();
    state.long_mu_p = (state.long_mu_p + ema_alpha * (state.p - state.long_mu_p)).clamp(-1.0, 1.0);
    state.long_mu_a = clamp01(state.long_mu_a + ema_alpha * (state.a.abs() - state.long_mu_a));
    state.long_mu_d = (state.long_mu_d + ema_alpha * (state.d - state.long_mu_d)).clamp(-1.0, 1.0);
    let deviation = ((state.p - state.long_mu_p).abs()
        + (state.a.abs() - state.long_mu_a).abs()
        + (state.d - state.long_mu_d).abs())
        / 3.0;
    state.long_volatility = clamp01(
        state.long_volatility + ema_alpha * (clamp01(deviation) - state.long_volatility),
    );

    let drift_target = PersonalityVector {
        empathy: 0.6 * state.long_mu_p,
        sensitivity: 0.8 * state.long_volatility - 0.2,
        stability: 0.25 - 0.7 * state.long_volatility,
        expressiveness: 0.5 * state.long_mu_a - 0.1,
        dominance: 0.4 * state.long_mu_d,
    };
    let decay = 1.0 - params.drift_gamma * dt;
    let step = params.drift_eta * dt;
    let cap = params.drift_max;
    state.drift.empathy = (state.drift.empathy * decay + step * drift_target.empathy).clamp(-cap, cap);
    state.drift.sensitivity =
        (state.drift.sensitivity * decay + step * drift_target.sensitivity).clamp(-cap, cap);
    state.drift.stability =
        (state.drift.stability * decay + step * drift_target.stability).clamp(-cap, cap);
    state.drift.expressiveness =
        (state.drift.expressiveness * decay + step * drift_target.expressiveness).clamp(-cap, cap);
    state.drift.dominance =
        (state.drift.dominance * decay + step * drift_target.dominance).clamp(-cap, cap);

    // 9. Extreme memory and the lock.
    let z = state.extremity();
    let track_tau = params.extreme_tau_secs
        * (0.6 + 0.8 * eff.stability)
        * (1.0 - 0.45 * state.shock_load).max(0.2);
    // Rises much faster than it fades.
    let tau = if z > state.extreme_memory { track_tau / 6.0 } else { track_tau };
    let track_alpha = 1.0 - (-dt / tau).exp();
    state.extreme_memory = clamp01(state.extreme_memory + track_alpha * (z - state.extreme_memory));

    let was_locked = state.is_locked(now);
    let triggered = neg >= 0.35 && neg >= 1.08 * pos && (z >= 0.95 || state.shock_load >= 0.9);
    if triggered {
        if was_locked {
            let refresh_t = clamp01(0.6 * eff.sensitivity + 0.4 * (1.0 - eff.stability));
            let refresh =
                lerp(params.lock_refresh_min_secs, params.lock_refresh_max_secs, refresh_t);
            state.lock_until = state
                .lock_until
                .map(|until| until + Duration::milliseconds((refresh * 1000.0) as i64));
        } else {
            state.lock_until =
                Some(now + Duration::milliseconds((params.lock_base_secs * 1000.0) as i64));
        }
    } else if was_locked && pos > 0.0 {
        // Positive soothing eats into the remaining lock time.
        if let Some(until) = state.lock_until {
            let remaining = (until - now).num_milliseconds().max(0) as f64 / 1000.0;
            let ratio = lerp(params.unlock_ratio_min, params.unlock_ratio_max, clamp01(pos));
            let remaining = remaining * (1.0 - ratio);
            if remaining <= params.unlock_epsilon_secs {
                state.lock_until = None;
            } else {
                state.lock_until =
                    Some(now + Duration::milliseconds((remaining * 1000.0) as i64));
            }
        }
    }

    if dt > 0.0 {
        if !state.is_locked(now) && z < 0.7 && state.shock_load < 0.35 {
            if state.stable_since.is_none() {
                state.stable_since = Some(now);
            }
        } else {
            state.stable_since = None;
        }
    }

    state.last_updated_at = now;

    let (exec_probability, exec_mode) =
        execution_probability(params, &eff, &state, base_exec_prob, now);

    Updated {
        state,
        effective: eff,
        exec_probability,
        exec_mode,
    }
}

/// Derive the gate from the current state. Monotone non-increasing in
/// extreme memory, shock load and PAD extremity; strictly reduced while
/// locked.
pub fn execution_probability(
    params: &EngineParams,
    eff: &PersonalityVector,
    state: &AffectState,
    base_prob: f64,
    now: DateTime<Utc>,
) -> (f64, ExecMode) {
    let resilience = clamp01(0.6 * eff.stability + 0.4 * (1.0 - eff.sensitivity));
    let reactivity =
        clamp01(0.5 * eff.sensitivity + 0.3 * eff.expressiveness + 0.2 * (1.0 - eff.stability));

    let z = state.extremity();
    let tau = lerp(0.35, 0.85, resilience);
    let alpha = lerp(5.5, 0.6, resilience);
    let zn = ((z - tau) / (1.0 - tau)).clamp(0.0, 1.0);
    let trait_factor = 0.5 + 0.9 * reactivity;

    let mut g = (-(alpha * zn.powi(3)
        + params.extreme_penalty * trait_factor * state.extreme_memory
        + params.shock_penalty * trait_factor * state.shock_load))
        .exp();
    if state.is_locked(now) {
        g *= params.lock_gate_factor;
    }

    let prob = clamp01(base_prob * g);
    let threshold = (0.30 + 0.22 * reactivity - 0.15 * resilience).clamp(0.05, 0.9);
    let mode = if prob >= threshold {
        ExecMode::AutoExecute
    } else {
        ExecMode::Blocked
    };
    (prob, mode)
}
