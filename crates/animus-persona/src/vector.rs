use serde::{Deserialize, Serialize};

/// Five-dimensional personality vector, each component in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonalityVector {
    pub empathy: f64,
    pub sensitivity: f64,
    pub stability: f64,
    pub expressiveness: f64,
    pub dominance: f64,
}

impl Default for PersonalityVector {
    fn default() -> Self {
        Self::neutral()
    }
}

impl PersonalityVector {
    /// Midpoint of every axis — the starting point for MBTI mapping.
    pub fn neutral() -> Self {
        Self {
            empathy: 0.5,
            sensitivity: 0.5,
            stability: 0.5,
            expressiveness: 0.5,
            dominance: 0.5,
        }
    }

    pub fn zero() -> Self {
        Self {
            empathy: 0.0,
            sensitivity: 0.0,
            stability: 0.0,
            expressiveness: 0.0,
            dominance: 0.0,
        }
    }

    pub fn clamp01(mut self) -> Self {
        self.empathy = self.empathy.clamp(0.0, 1.0);
        self.sensitivity = self.sensitivity.clamp(0.0, 1.0);
        self.stability = self.stability.clamp(0.0, 1.0);
        self.expressiveness = self.expressiveness.clamp(0.0, 1.0);
        self.dominance = self.dominance.clamp(0.0, 1.0);
        self
    }

    /// Component-wise sum, unclamped. Callers clamp when the result must
    /// be a valid personality (effective = clamp01(base + drift)).
    pub fn add(&self, other: &PersonalityVector) -> Self {
        Self {
            empathy: self.empathy + other.empathy,
            sensitivity: self.sensitivity + other.sensitivity,
            stability: self.stability + other.stability,
            expressiveness: self.expressiveness + other.expressiveness,
            dominance: self.dominance + other.dominance,
        }
    }

    pub fn components(&self) -> [f64; 5] {
        [
            self.empathy,
            self.sensitivity,
            self.stability,
            self.expressiveness,
            self.dominance,
        ]
    }

    /// Compact profile string for soul prompt fragments, stable across
    /// restarts: `empathy=0.72 sensitivity=0.58 ...` with 2 decimals.
    pub fn profile_string(&self) -> String {
        format!(
            "empathy={:.2} sensitivity={:.2} stability={:.2} expressiveness={:.2} dominance={:.2}",
            self.empathy, self.sensitivity, self.stability, self.expressiveness, self.dominance
        )
    }
}

/// True when `code` is a well-formed MBTI type: [EI][SN][TF][JP].
pub fn is_valid_mbti(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 4
        && matches!(bytes[0], b'E' | b'I')
        && matches!(bytes[1], b'S' | b'N')
        && matches!(bytes[2], b'T' | b'F')
        && matches!(bytes[3], b'J' | b'P')
}

/// Deterministic MBTI → personality mapping.
///
/// Starts from the neutral vector and applies a fixed signed delta per
/// letter, then clamps. Invalid codes get the neutral vector so a soul
/// row with a corrupt type still behaves.
pub fn mbti_vector(code: &str) -> PersonalityVector {
    let mut pv = PersonalityVector::neutral();
    if !is_valid_mbti(code) {
        return pv;
    }

    for ch in code.chars() {
        match ch {
            'E' => {
                pv.expressiveness += 0.20;
                pv.dominance += 0.08;
            }
            'I' => {
                pv.expressiveness -= 0.20;
                pv.sensitivity += 0.06;
            }
            'S' => {
                pv.stability += 0.10;
                pv.sensitivity -= 0.06;
            }
            'N' => {
                pv.sensitivity += 0.10;
                pv.stability -= 0.04;
            }
            'T' => {
                pv.empathy -= 0.16;
                pv.dominance += 0.10;
            }
            'F' => {
                pv.empathy += 0.20;
                pv.sensitivity += 0.08;
            }
            'J' => {
                pv.stability += 0.12;
                pv.dominance += 0.06;
            }
            'P' => {
                pv.stability -= 0.10;
                pv.expressiveness += 0.08;
            }
            _ => unreachable!("validated above"),
        }
    }

    pv.clamp01()
}
