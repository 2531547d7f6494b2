//! The structured assistant response contract.
//!
//! The model is instructed to reply with one JSON object of this shape.
//! Parsing is all-or-nothing: the text either satisfies the whole shape or it
//! is treated as plain prose and wrapped as the `response` field verbatim.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// A knowledge entry the model says it used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantSource {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub relevance: String,
}

/// A single comprehension question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningCheck {
    pub question: String,
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
}

/// The JSON document the UI renders.
///
/// Optional lists keep the absent/empty distinction: `[]` round-trips as
/// `[]`, while a missing or `null` field stays absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredAssistantResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_sources: Option<Vec<RelevantSource>>,

    pub response: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_resources: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_check: Option<LearningCheck>,
}

/// Why a model reply did not satisfy the contract.
#[derive(Debug, Error)]
pub enum MalformedResponseShape {
    #[error("reply does not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("reply is not a JSON object")]
    NotAnObject,

    #[error("learningCheck needs at least 2 options, got {0}")]
    TooFewOptions(usize),
}

/// Which branch of the contract a reply took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    Structured,
    Fallback,
}

/// The result of [`StructuredAssistantResponse::parse`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub response: StructuredAssistantResponse,
    pub shape: ResponseShape,
}

impl ParsedResponse {
    pub fn is_structured(&self) -> bool {
        self.shape == ResponseShape::Structured
    }
}

impl StructuredAssistantResponse {
    /// A response with only the answer text.
    pub fn prose(text: impl Into<String>) -> Self {
        Self {
            relevant_sources: None,
            response: text.into(),
            suggested_resources: None,
            learning_check: None,
        }
    }

    /// Validate `raw` against the contract.
    ///
    /// Surrounding whitespace and one enclosing Markdown code fence are
    /// tolerated.
    pub fn try_parse(raw: &str) -> Result<Self, MalformedResponseShape> {
        let value: serde_json::Value = serde_json::from_str(strip_code_fence(raw))?;
        if !value.is_object() {
            return Err(MalformedResponseShape::NotAnObject);
        }
        let parsed: Self = serde_json::from_value(value)?;
        if let Some(check) = &parsed.learning_check {
            if check.options.len() < 2 {
                return Err(MalformedResponseShape::TooFewOptions(check.options.len()));
            }
        }
        Ok(parsed)
    }

    /// Apply the contract, falling back to prose. Never fails.
    pub fn parse(raw: &str) -> ParsedResponse {
        match Self::try_parse(raw) {
            Ok(response) => ParsedResponse {
                response,
                shape: ResponseShape::Structured,
            },
            Err(e) => {
                debug!(error = %e, len = raw.len(), "Model reply is not structured; using prose fallback");
                ParsedResponse {
                    response: Self::prose(raw),
                    shape: ResponseShape::Fallback,
                }
            }
        }
    }
}

/// Remove one enclosing ``` fence (with or without a language tag).
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the language tag line, e.g. "json"
    match inner.split_once('\n') {
        Some((tag, body)) if !tag.trim_start().starts_with('{') => body.trim(),
        _ => inner.trim(),
    }
}

/// Render a response as plain text for terminals, block by block.
pub fn render_plain(response: &StructuredAssistantResponse) -> String {
    let mut blocks: Vec<String> = Vec::new();

    if let Some(sources) = response.relevant_sources.as_ref().filter(|s| !s.is_empty()) {
        let lines: Vec<String> = sources
            .iter()
            .map(|s| format!("  - {} ({}): {}", s.title, s.kind, s.relevance))
            .collect();
        blocks.push(format!("Relevant Sources:\n{}", lines.join("\n")));
    }

    let paragraphs: Vec<&str> = response
        .response
        .split('\n')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    blocks.push(paragraphs.join("\n\n"));

    if let Some(resources) = response.suggested_resources.as_ref().filter(|r| !r.is_empty()) {
        let lines: Vec<String> = resources.iter().map(|r| format!("  - {r}")).collect();
        blocks.push(format!("Suggested Resources:\n{}", lines.join("\n")));
    }

    if let Some(check) = &response.learning_check {
        let mut block = format!("Quick Learning Check:\n  {}", check.question);
        for (i, option) in check.options.iter().enumerate() {
            let letter = char::from(b'A' + (i % 26) as u8);
            block.push_str(&format!("\n    {letter}) {option}"));
        }
        if let Some(answer) = &check.correct_answer {
            block.push_str(&format!("\n  Answer: {answer}"));
        }
        blocks.push(block);
    }

    blocks.join("\n\n")
}
