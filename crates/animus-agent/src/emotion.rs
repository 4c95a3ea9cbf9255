use animus_persona::EmotionSignal;
use serde::Deserialize;
use tracing::warn;

/// Client for the external emotion-analysis service.
///
/// Strictly best-effort: any failure (unconfigured, network, malformed
/// body) degrades to a neutral signal and the turn continues.
pub struct EmotionAnalyzer {
    client: reqwest::Client,
    base_url: Option<String>,
}

#[derive(Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    label: String,
    #[serde(default)]
    p: f64,
    #[serde(default)]
    a: f64,
    #[serde(default)]
    d: f64,
    #[serde(default)]
    intensity: f64,
}

impl EmotionAnalyzer {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        Self { client, base_url }
    }

    pub async fn analyze(&self, text: &str) -> EmotionSignal {
        let Some(base) = &self.base_url else {
            return EmotionSignal::neutral();
        };

        let body = serde_json::json!({ "text": text });
        let resp = match self
            .client
            .post(format!("{base}/v1/analyze"))
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "emotion analyzer unreachable, assuming neutral");
                return EmotionSignal::neutral();
            }
        };

        if !resp.status().is_success() {
            warn!(status = resp.status().as_u16(), "emotion analyzer error, assuming neutral");
            return EmotionSignal::neutral();
        }

        match resp.json::<AnalyzeResponse>().await {
            Ok(parsed) => {
                let label = if parsed.label.is_empty() {
                    "neutral".to_string()
                } else {
                    parsed.label
                };
                EmotionSignal {
                    label,
                    p: parsed.p.clamp(-1.0, 1.0),
                    a: parsed.a.clamp(-1.0, 1.0),
                    d: parsed.d.clamp(-1.0, 1.0),
                    intensity: parsed.intensity.clamp(0.0, 1.0),
                }
            }
            Err(e) => {
                warn!(error = %e, "emotion analyzer returned malformed body, assuming neutral");
                EmotionSignal::neutral()
            }
        }
    }
}
