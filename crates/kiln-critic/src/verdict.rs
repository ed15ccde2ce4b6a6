//! Structured verdict parsing

use kiln_core::{Critique, KilnError, Result};
use serde::Deserialize;

/// The JSON object the critic model is asked to reply with
#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub reasoning: String,
    pub success: bool,
    #[serde(default)]
    pub critique: String,
}

impl From<Verdict> for Critique {
    fn from(verdict: Verdict) -> Self {
        let description = if verdict.critique.trim().is_empty() {
            verdict.reasoning
        } else {
            verdict.critique
        };
        Critique {
            success: verdict.success,
            description: description.trim().to_string(),
        }
    }
}

/// Locate the JSON object in a reply (fenced or surrounded by prose)
fn json_candidate(text: &str) -> Option<&str> {
    let body = if text.contains("```json") {
        text.split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(text)
    } else {
        text
    };

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

/// Parse a critic reply
///
/// Anything that is not an object with a boolean `success` is a
/// [`KilnError::CritiqueParse`].
pub fn parse_verdict(text: &str) -> Result<Critique> {
    let json = json_candidate(text)
        .ok_or_else(|| KilnError::CritiqueParse(format!("no JSON object in reply: {}", text.trim())))?;

    let verdict: Verdict = serde_json::from_str(json)
        .map_err(|e| KilnError::CritiqueParse(format!("{}: {}", e, json)))?;
    Ok(verdict.into())
}
