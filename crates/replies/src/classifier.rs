//! Reply classification — `classify(message_text, context) -> classification`.
//!
//! The classifier is stateless and safe to retry. The keyword classifier is
//! the deterministic default; `LlmClient` is the narrow adapter seam for a
//! model-backed implementation (cheap tier for obvious replies, premium for
//! ambiguous ones).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use agency_core::error::AgencyResult;
use agency_core::types::{Channel, ReplyIntent, Sentiment};

/// Confidence below this goes to the manual review queue.
pub const ESCALATION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub sentiment: Sentiment,
    pub intent: ReplyIntent,
    pub objection_type: Option<String>,
    pub question_text: Option<String>,
    pub confidence: f64,
}

/// Context handed to the classifier alongside the message text.
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext {
    pub channel: Option<Channel>,
    pub touch_number: u32,
    pub previous_outbound: Option<String>,
}

#[async_trait]
pub trait ReplyClassifier: Send + Sync {
    async fn classify(&self, text: &str, context: &ClassifyContext)
        -> AgencyResult<Classification>;
}

// ─── LLM adapter seam ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmTier {
    Cheap,
    Premium,
}

/// Narrow interface to the LLM provider. The platform never talks to a
/// model except through this.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, tier: LlmTier) -> AgencyResult<String>;
}

// ─── Keyword classifier ─────────────────────────────────────────────────────

/// Deterministic rule-based classifier. Rules are ordered: the unsubscribe
/// family must win over everything else for compliance.
pub struct KeywordClassifier;

const UNSUBSCRIBE_MARKERS: &[&str] = &[
    "unsubscribe",
    "remove me",
    "take me off",
    "stop emailing",
    "stop contacting",
    "opt out",
];

const NOT_INTERESTED_MARKERS: &[&str] = &[
    "not interested",
    "no thanks",
    "no thank you",
    "we're good",
    "we are good",
    "not a fit",
    "not right now",
];

const INTERESTED_MARKERS: &[&str] = &[
    "interested",
    "tell me more",
    "sounds good",
    "let's talk",
    "book a",
    "schedule",
    "calendar",
    "demo",
    "happy to chat",
];

const OBJECTION_MARKERS: &[(&str, &str)] = &[
    ("too expensive", "price"),
    ("how much", "price"),
    ("price", "price"),
    ("cost", "price"),
    ("budget", "price"),
    ("already have", "incumbent"),
    ("already use", "incumbent"),
    ("bad time", "timing"),
    ("next quarter", "timing"),
];

const NEGATIVE_MARKERS: &[&str] = &["no", "not", "never", "stop", "bad", "waste"];
const POSITIVE_MARKERS: &[&str] = &["great", "thanks", "good", "yes", "sure", "happy"];

impl KeywordClassifier {
    fn sentiment(text: &str) -> Sentiment {
        let negatives = NEGATIVE_MARKERS
            .iter()
            .filter(|m| text.contains(*m))
            .count();
        let positives = POSITIVE_MARKERS
            .iter()
            .filter(|m| text.contains(*m))
            .count();
        match positives.cmp(&negatives) {
            std::cmp::Ordering::Greater => Sentiment::Positive,
            std::cmp::Ordering::Less => Sentiment::Negative,
            std::cmp::Ordering::Equal => Sentiment::Neutral,
        }
    }
}

#[async_trait]
impl ReplyClassifier for KeywordClassifier {
    async fn classify(
        &self,
        text: &str,
        _context: &ClassifyContext,
    ) -> AgencyResult<Classification> {
        let lower = text.to_lowercase();
        let sentiment = Self::sentiment(&lower);

        if UNSUBSCRIBE_MARKERS.iter().any(|m| lower.contains(m)) {
            return Ok(Classification {
                sentiment: Sentiment::Negative,
                intent: ReplyIntent::Unsubscribe,
                objection_type: None,
                question_text: None,
                confidence: 0.95,
            });
        }

        if NOT_INTERESTED_MARKERS.iter().any(|m| lower.contains(m)) {
            return Ok(Classification {
                sentiment: Sentiment::Negative,
                intent: ReplyIntent::NotInterested,
                objection_type: None,
                question_text: None,
                confidence: 0.85,
            });
        }

        if let Some((_, objection)) = OBJECTION_MARKERS.iter().find(|(m, _)| lower.contains(m)) {
            return Ok(Classification {
                sentiment,
                intent: ReplyIntent::Objection,
                objection_type: Some((*objection).to_string()),
                question_text: None,
                confidence: 0.7,
            });
        }

        if INTERESTED_MARKERS.iter().any(|m| lower.contains(m)) {
            return Ok(Classification {
                sentiment: Sentiment::Positive,
                intent: ReplyIntent::Interested,
                objection_type: None,
                question_text: None,
                confidence: 0.8,
            });
        }

        if lower.contains('?') {
            return Ok(Classification {
                sentiment,
                intent: ReplyIntent::Question,
                objection_type: None,
                question_text: Some(text.to_string()),
                confidence: 0.65,
            });
        }

        // Nothing matched: low confidence, escalates to manual review.
        Ok(Classification {
            sentiment,
            intent: ReplyIntent::OutOfScope,
            objection_type: None,
            question_text: None,
            confidence: 0.3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn classify(text: &str) -> Classification {
        KeywordClassifier
            .classify(text, &ClassifyContext::default())
            .await
            .expect("classify")
    }

    #[tokio::test]
    async fn test_unsubscribe_wins() {
        let c = classify("I'm interested in nothing, please remove me from your list").await;
        assert_eq!(c.intent, ReplyIntent::Unsubscribe);
        assert!(c.confidence >= ESCALATION_THRESHOLD);
    }

    #[tokio::test]
    async fn test_interested() {
        let c = classify("This sounds good, can you book a demo next week?").await;
        assert_eq!(c.intent, ReplyIntent::Interested);
        assert_eq!(c.sentiment, Sentiment::Positive);
    }

    #[tokio::test]
    async fn test_not_interested() {
        let c = classify("No thanks, we're good for now").await;
        assert_eq!(c.intent, ReplyIntent::NotInterested);
    }

    #[tokio::test]
    async fn test_price_objection() {
        let c = classify("How much does this cost?").await;
        assert_eq!(c.intent, ReplyIntent::Objection);
        assert_eq!(c.objection_type.as_deref(), Some("price"));
    }

    #[tokio::test]
    async fn test_question_captured() {
        let c = classify("Which integrations do you support?").await;
        assert_eq!(c.intent, ReplyIntent::Question);
        assert!(c.question_text.is_some());
    }

    #[tokio::test]
    async fn test_ambiguous_escalates() {
        let c = classify("fwd: see below").await;
        assert_eq!(c.intent, ReplyIntent::OutOfScope);
        assert!(c.confidence < ESCALATION_THRESHOLD);
    }

    #[tokio::test]
    async fn test_classifier_is_deterministic() {
        let a = classify("How much does this cost?").await;
        let b = classify("How much does this cost?").await;
        assert_eq!(a.intent, b.intent);
        assert_eq!(a.confidence, b.confidence);
    }
}
