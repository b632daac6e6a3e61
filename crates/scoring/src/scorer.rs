//! ALS scoring — `score(lead, weights) -> {score, components, tier}`.

use serde::{Deserialize, Serialize};

use agency_core::error::{AgencyError, AgencyResult};
use agency_core::types::{
    AlsTier, AlsWeights, BuyerSignal, IcpProfile, PoolLead, ScoreComponents,
};

/// Negative history known about a lead at scoring time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RiskFlags {
    pub bounced: bool,
    pub unsubscribed: bool,
    pub competitor_domain: bool,
    pub role_mismatch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredLead {
    pub score: u8,
    pub tier: AlsTier,
    pub components: ScoreComponents,
}

/// Pure ALS scorer. Component raw values are computed against the
/// documented maxima and then scaled by the client weight vector, so the
/// default weights reproduce the documented table exactly.
pub struct Scorer {
    personal_domains: Vec<String>,
}

const MAX_DATA_QUALITY: i32 = 20;
const MAX_AUTHORITY: i32 = 25;
const MAX_COMPANY_FIT: i32 = 25;
const MAX_TIMING: i32 = 15;
const MAX_RISK: i32 = 15;

impl Scorer {
    pub fn new(personal_domains: Vec<String>) -> Self {
        Self { personal_domains }
    }

    pub fn score(
        &self,
        lead: &PoolLead,
        icp: &IcpProfile,
        risk: RiskFlags,
        buyer: Option<&BuyerSignal>,
        weights: &AlsWeights,
    ) -> AgencyResult<ScoredLead> {
        if !weights.is_valid() {
            return Err(AgencyError::Validation(format!(
                "ALS weights sum to {}, expected 100",
                weights.sum()
            )));
        }

        let data_quality = scale(
            self.data_quality(lead),
            MAX_DATA_QUALITY,
            i32::from(weights.data_quality),
        );
        let authority = scale(
            Self::authority(lead),
            MAX_AUTHORITY,
            i32::from(weights.authority),
        );
        let company_fit = scale(
            Self::company_fit(lead, icp),
            MAX_COMPANY_FIT,
            i32::from(weights.company_fit),
        );
        let timing = scale(Self::timing(lead), MAX_TIMING, i32::from(weights.timing));
        let risk = -scale(Self::risk_penalty(risk), MAX_RISK, i32::from(weights.risk));
        let linkedin_boost = Self::linkedin_boost(lead);
        let buyer_bonus = Self::buyer_bonus(buyer);

        let components = ScoreComponents {
            data_quality: data_quality as i16,
            authority: authority as i16,
            company_fit: company_fit as i16,
            timing: timing as i16,
            risk: risk as i16,
            linkedin_boost: linkedin_boost as i16,
            buyer_bonus: buyer_bonus as i16,
        };

        let score = i32::from(components.total()).clamp(0, 100) as u8;
        Ok(ScoredLead {
            score,
            tier: AlsTier::from_score(score),
            components,
        })
    }

    /// verified email 8, phone 6, LinkedIn URL 4, non-personal email 2.
    fn data_quality(&self, lead: &PoolLead) -> i32 {
        let mut points = 0;
        if lead.email_verified {
            points += 8;
        }
        if lead.phone.is_some() {
            points += 6;
        }
        if lead.linkedin_url.is_some() {
            points += 4;
        }
        if !lead.domain.is_empty() && !self.personal_domains.iter().any(|d| d == &lead.domain) {
            points += 2;
        }
        points
    }

    /// Seniority ladder keyed off the title.
    fn authority(lead: &PoolLead) -> i32 {
        let title = match &lead.title {
            Some(t) => t.to_lowercase(),
            None => return 0,
        };
        if title.contains("owner") || title.contains("ceo") || title.contains("founder") {
            25
        } else if title.contains("chief")
            || title.contains("cto")
            || title.contains("cfo")
            || title.contains("coo")
            || title.contains("cmo")
        {
            22
        } else if title.contains("vp") || title.contains("vice president") {
            18
        } else if title.contains("director") || title.contains("head of") {
            15
        } else if title.contains("manager") {
            10
        } else {
            0
        }
    }

    /// industry 10, size band 8, country 7 — against the client ICP.
    fn company_fit(lead: &PoolLead, icp: &IcpProfile) -> i32 {
        let mut points = 0;
        if let Some(industry) = &lead.industry {
            if icp
                .industries
                .iter()
                .any(|i| i.eq_ignore_ascii_case(industry))
            {
                points += 10;
            }
        }
        if let Some(count) = lead.employee_count {
            let min_ok = icp.min_employees.map_or(true, |m| count >= m);
            let max_ok = icp.max_employees.map_or(true, |m| count <= m);
            if min_ok && max_ok && (icp.min_employees.is_some() || icp.max_employees.is_some()) {
                points += 8;
            }
        }
        if let Some(country) = &lead.country {
            if icp.countries.iter().any(|c| c.eq_ignore_ascii_case(country)) {
                points += 7;
            }
        }
        points
    }

    /// new in role < 180d (6), actively hiring >= 3 roles (5), funded < 365d (4).
    fn timing(lead: &PoolLead) -> i32 {
        let mut points = 0;
        if lead.signals.days_in_role.map_or(false, |d| d < 180) {
            points += 6;
        }
        if lead.signals.open_roles >= 3 {
            points += 5;
        }
        if lead.signals.funded_days_ago.map_or(false, |d| d < 365) {
            points += 4;
        }
        points
    }

    /// bounced -10, unsubscribed -15, competitor -5, role mismatch -5,
    /// capped at the component maximum.
    fn risk_penalty(risk: RiskFlags) -> i32 {
        let mut penalty = 0;
        if risk.bounced {
            penalty += 10;
        }
        if risk.unsubscribed {
            penalty += 15;
        }
        if risk.competitor_domain {
            penalty += 5;
        }
        if risk.role_mismatch {
            penalty += 5;
        }
        penalty.min(MAX_RISK)
    }

    /// Up to +10 from scraped engagement signals.
    fn linkedin_boost(lead: &PoolLead) -> i32 {
        let mut boost = 0;
        if lead.signals.posts_present {
            boost += 3;
        }
        if lead.signals.recent_activity {
            boost += 4;
        }
        if lead.signals.network_size > 500 {
            boost += 3;
        }
        boost.min(10)
    }

    /// Known-buyer bonus 0..=15 from the anonymized cross-tenant aggregate.
    fn buyer_bonus(buyer: Option<&BuyerSignal>) -> i32 {
        match buyer {
            Some(signal) => (i32::from(signal.buyer_score) * 15) / 100,
            None => 0,
        }
    }
}

fn scale(raw: i32, max: i32, weight: i32) -> i32 {
    if max == 0 {
        return 0;
    }
    (raw * weight) / max
}
