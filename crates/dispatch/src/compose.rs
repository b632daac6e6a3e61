//! Touch composition — turns a scheduled touch plus lead context into the
//! content that goes out.
//!
//! Copy generation proper is delegated to an LLM adapter behind this trait;
//! the template composer is the deterministic fallback and the shape both
//! implementations share. The `enhanced` flag selects the richer prompt
//! path.

use async_trait::async_trait;

use agency_core::error::AgencyResult;
use agency_core::types::{
    Channel, ContentSnapshot, PersonalizationFlags, PoolLead, ScheduledTouch,
};

#[derive(Debug, Clone)]
pub struct ComposedTouch {
    pub subject: Option<String>,
    pub body: String,
    pub snapshot: ContentSnapshot,
}

#[async_trait]
pub trait TouchComposer: Send + Sync {
    async fn compose(&self, touch: &ScheduledTouch, lead: &PoolLead)
        -> AgencyResult<ComposedTouch>;
}

/// Deterministic template-based composer.
pub struct TemplateComposer;

#[async_trait]
impl TouchComposer for TemplateComposer {
    async fn compose(
        &self,
        touch: &ScheduledTouch,
        lead: &PoolLead,
    ) -> AgencyResult<ComposedTouch> {
        let first_name = lead.first_name.as_deref().unwrap_or("there");
        let company = lead.company.as_deref().unwrap_or("your team");

        let subject = match touch.channel {
            Channel::Email => Some(match touch.template_ref.as_str() {
                "intro" => format!("Quick question about {company}"),
                "value_follow_up" => format!("{first_name} - an idea for {company}"),
                "break_up" => "Should I close your file?".to_string(),
                other => format!("Re: {other}"),
            }),
            _ => None,
        };

        let mention_company = touch.enhanced && lead.company.is_some();
        let body = if mention_company {
            format!(
                "Hi {first_name},\n\nI've been following {company} and noticed you're growing. \
                 Most teams your size struggle to keep the pipeline full without burning the \
                 founders' time. We fix that.\n\nWorth a quick chat this week?"
            )
        } else {
            format!(
                "Hi {first_name},\n\nMost teams struggle to keep the pipeline full without \
                 burning the founders' time. We fix that.\n\nWorth a quick chat this week?"
            )
        };

        let snapshot = ContentSnapshot {
            subject: subject.clone(),
            body: body.clone(),
            pain_points: vec!["leads".to_string(), "time".to_string()],
            cta: Some("worth a quick chat".to_string()),
            personalization: PersonalizationFlags {
                company_mention: mention_company,
                recent_news: false,
                mutual_connection: false,
                industry_specific: touch.enhanced && lead.industry.is_some(),
            },
        };

        Ok(ComposedTouch {
            subject,
            body,
            snapshot,
        })
    }
}
