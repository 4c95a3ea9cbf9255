use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vector::PersonalityVector;

/// A labelled PAD reading from the emotion analyzer.
///
/// `p`, `a`, `d` are the signal's direction in PAD space; `intensity`
/// in [0, 1] scales how hard it hits the soul.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionSignal {
    pub label: String,
    pub p: f64,
    pub a: f64,
    pub d: f64,
    pub intensity: f64,
}

impl EmotionSignal {
    pub fn neutral() -> Self {
        Self {
            label: "neutral".to_string(),
            p: 0.0,
            a: 0.0,
            d: 0.0,
            intensity: 0.0,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.label == "neutral" || self.intensity <= f64::EPSILON
    }
}

/// The full affective state of one soul. Persisted as a JSON column on
/// the soul row; always treated as a value and written back whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectState {
    /// Pleasure, arousal, dominance, each in [-1, 1].
    pub p: f64,
    pub a: f64,
    pub d: f64,
    /// Builds while idle, washed out by interaction. [0, 1].
    pub boredom: f64,
    /// Accumulated affective shock; slows recovery. [0, 1].
    pub shock_load: f64,
    /// Trace of how extreme the PAD point has recently been. [0, 1].
    pub extreme_memory: f64,
    /// Long-horizon EMAs of the PAD trajectory.
    pub long_mu_p: f64,
    pub long_mu_a: f64,
    pub long_mu_d: f64,
    pub long_volatility: f64,
    /// Slow personality drift applied on top of the base vector.
    pub drift: PersonalityVector,
    /// While set and in the future, the execution gate is all but shut.
    pub lock_until: Option<DateTime<Utc>>,
    /// Set once the state has calmed down; cleared on renewed turbulence.
    pub stable_since: Option<DateTime<Utc>>,
    pub last_interaction_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl AffectState {
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            p: 0.0,
            a: 0.0,
            d: 0.0,
            boredom: 0.0,
            shock_load: 0.0,
            extreme_memory: 0.0,
            long_mu_p: 0.0,
            long_mu_a: 0.0,
            long_mu_d: 0.0,
            long_volatility: 0.0,
            drift: PersonalityVector::zero(),
            lock_until: None,
            stable_since: None,
            last_interaction_at: now,
            last_updated_at: now,
        }
    }

    /// Largest PAD magnitude — the engine's "how far out are we" scalar.
    pub fn extremity(&self) -> f64 {
        self.p.abs().max(self.a.abs()).max(self.d.abs())
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_until.is_some_and(|until| until > now)
    }

    /// Replace any NaN/infinite component with its neutral value and
    /// clamp everything back into range. A corrupt persisted state must
    /// never poison future updates.
    pub fn sanitize(&mut self) {
        for v in [&mut self.p, &mut self.a, &mut self.d] {
            if !v.is_finite() {
                *v = 0.0;
            }
            *v = v.clamp(-1.0, 1.0);
        }
        for v in [
            &mut self.boredom,
            &mut self.shock_load,
            &mut self.extreme_memory,
            &mut self.long_mu_a,
            &mut self.long_volatility,
        ] {
            if !v.is_finite() {
                *v = 0.0;
            }
            *v = v.clamp(0.0, 1.0);
        }
        for v in [&mut self.long_mu_p, &mut self.long_mu_d] {
            if !v.is_finite() {
                *v = 0.0;
            }
            *v = v.clamp(-1.0, 1.0);
        }
        for c in [
            &mut self.drift.empathy,
            &mut self.drift.sensitivity,
            &mut self.drift.stability,
            &mut self.drift.expressiveness,
            &mut self.drift.dominance,
        ] {
            if !c.is_finite() {
                *c = 0.0;
            }
        }
    }

    /// Mood keywords for the prompt affect block, derived from the PAD
    /// octant plus boredom. Deterministic so prompts are reproducible.
    pub fn emotion_keywords(&self) -> Vec<&'static str> {
        let mut words = Vec::with_capacity(3);
        words.push(match (self.p >= 0.0, self.a >= 0.15) {
            (true, true) => "兴奋",
            (true, false) => "平和",
            (false, true) => "烦躁",
            (false, false) => "低落",
        });
        if self.d >= 0.25 {
            words.push("自信");
        } else if self.d <= -0.25 {
            words.push("退缩");
        }
        if self.boredom >= 0.6 {
            words.push("无聊");
        }
        if self.shock_load >= 0.6 {
            words.push("紧绷");
        }
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_recovers_from_nan() {
        let mut s = AffectState::initial(Utc::now());
        s.p = f64::NAN;
        s.a = f64::INFINITY;
        s.boredom = f64::NEG_INFINITY;
        s.long_mu_p = 7.0;
        s.sanitize();
        assert_eq!(s.p, 0.0);
        assert_eq!(s.a, 1.0);
        assert_eq!(s.boredom, 0.0);
        assert_eq!(s.long_mu_p, 1.0);
    }

    #[test]
    fn keywords_follow_octant() {
        let mut s = AffectState::initial(Utc::now());
        s.p = -0.5;
        s.a = 0.6;
        assert!(s.emotion_keywords().contains(&"烦躁"));
        s.p = 0.5;
        s.a = 0.0;
        assert!(s.emotion_keywords().contains(&"平和"));
    }

    #[test]
    fn affect_state_round_trips_through_json() {
        let s = AffectState::initial(Utc::now());
        let json = serde_json::to_string(&s).unwrap();
        let back: AffectState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.p, s.p);
        assert_eq!(back.last_interaction_at, s.last_interaction_at);
        assert!(back.lock_until.is_none());
    }
}
