use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Tenants ────────────────────────────────────────────────────────────────

/// Subscription tier a client is on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TenantTier {
    Ignition,
    Velocity,
    Dominance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Cancelled,
    Paused,
}

impl SubscriptionStatus {
    /// Whether dispatch is allowed to send on behalf of this client.
    pub fn can_send(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    Autopilot,
    Copilot,
    Manual,
}

/// ALS component weight vector. Client-learned overrides must still sum to 100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlsWeights {
    pub data_quality: u8,
    pub authority: u8,
    pub company_fit: u8,
    pub timing: u8,
    pub risk: u8,
}

impl AlsWeights {
    pub fn sum(&self) -> u32 {
        u32::from(self.data_quality)
            + u32::from(self.authority)
            + u32::from(self.company_fit)
            + u32::from(self.timing)
            + u32::from(self.risk)
    }

    pub fn is_valid(&self) -> bool {
        self.sum() == 100
    }
}

impl Default for AlsWeights {
    fn default() -> Self {
        Self {
            data_quality: 20,
            authority: 25,
            company_fit: 25,
            timing: 15,
            risk: 15,
        }
    }
}

/// Per-channel daily send caps for a tenant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelCaps {
    pub email: u32,
    pub sms: u32,
    pub linkedin: u32,
    pub voice: u32,
    pub mail: u32,
}

impl ChannelCaps {
    pub fn for_channel(&self, channel: Channel) -> u32 {
        match channel {
            Channel::Email => self.email,
            Channel::Sms => self.sms,
            Channel::Linkedin => self.linkedin,
            Channel::Voice => self.voice,
            Channel::Mail => self.mail,
        }
    }
}

impl Default for ChannelCaps {
    fn default() -> Self {
        Self {
            email: 50,
            sms: 100,
            linkedin: 17,
            voice: 50,
            mail: u32::MAX,
        }
    }
}

/// Ideal Customer Profile — a tenant-scoped filter over pool-lead attributes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IcpProfile {
    pub industries: Vec<String>,
    pub countries: Vec<String>,
    pub min_employees: Option<u32>,
    pub max_employees: Option<u32>,
}

impl IcpProfile {
    /// Whether a pool lead falls inside this profile. Empty filter lists
    /// match everything.
    pub fn matches(&self, lead: &PoolLead) -> bool {
        if !self.industries.is_empty() {
            let industry = lead.industry.as_deref().unwrap_or("");
            if !self
                .industries
                .iter()
                .any(|i| i.eq_ignore_ascii_case(industry))
            {
                return false;
            }
        }
        if !self.countries.is_empty() {
            let country = lead.country.as_deref().unwrap_or("");
            if !self.countries.iter().any(|c| c.eq_ignore_ascii_case(country)) {
                return false;
            }
        }
        if let Some(min) = self.min_employees {
            if lead.employee_count.unwrap_or(0) < min {
                return false;
            }
        }
        if let Some(max) = self.max_employees {
            if lead.employee_count.unwrap_or(u32::MAX) > max {
                return false;
            }
        }
        true
    }
}

/// Tenant policy knobs consulted by scoring, allocation, and dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPolicy {
    pub daily_caps: ChannelCaps,
    pub permission_mode: PermissionMode,
    pub als_weights: AlsWeights,
    /// Monthly budget of enhanced-content touches. `None` = unlimited.
    pub monthly_enhanced_budget: Option<u32>,
    pub enrichment_daily_budget_aud: f64,
    pub attribution_window_days: u32,
    /// Whether the per-touch signal gate is applied at allocation time.
    pub signal_gate_enabled: bool,
    pub icp: IcpProfile,
    /// Local-time window in which dispatch may send (UTC hours).
    pub send_window_start_hour: u8,
}

impl Default for TenantPolicy {
    fn default() -> Self {
        Self {
            daily_caps: ChannelCaps::default(),
            permission_mode: PermissionMode::Copilot,
            als_weights: AlsWeights::default(),
            monthly_enhanced_budget: None,
            enrichment_daily_budget_aud: 50.0,
            attribution_window_days: 90,
            signal_gate_enabled: false,
            icp: IcpProfile::default(),
            send_window_start_hour: 8,
        }
    }
}

/// A client of the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub tier: TenantTier,
    pub subscription_status: SubscriptionStatus,
    pub credits_remaining: u32,
    pub policy: TenantPolicy,
    pub created_at: DateTime<Utc>,
}

// ─── Pool Leads ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Unassigned,
    Assigned,
    Retired,
}

/// Timing / engagement signals carried on a pool lead. Populated by
/// enrichment; consumed by the scorer and the allocator's signal gate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LeadSignals {
    /// Days since the person started their current role, if known.
    pub days_in_role: Option<u32>,
    /// Number of currently open roles at the company.
    pub open_roles: u32,
    /// Days since the company's last funding round, if known.
    pub funded_days_ago: Option<u32>,
    /// Technology-stack match score against the client ICP, 0.0..=1.0.
    pub tech_match: f32,
    /// LinkedIn engagement score 0..=100.
    pub linkedin_engagement: u8,
    pub referral_source: bool,
    /// LinkedIn scrape: profile has recent posts.
    pub posts_present: bool,
    /// LinkedIn scrape: activity within the last 30 days.
    pub recent_activity: bool,
    pub network_size: u32,
}

/// A platform-owned prospect record. `email` is unique platform-wide and
/// always stored lowercase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolLead {
    pub id: Uuid,
    pub email: String,
    pub domain: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub linkedin_url: Option<String>,
    pub phone: Option<String>,
    pub email_verified: bool,
    pub industry: Option<String>,
    pub employee_count: Option<u32>,
    pub country: Option<String>,
    pub revenue_band: Option<String>,
    pub signals: LeadSignals,
    pub enrichment_source: Option<String>,
    pub enrichment_cost_aud: f64,
    pub pool_status: PoolStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_refreshed_at: DateTime<Utc>,
}

impl PoolLead {
    /// Minimal lead from an email address; the waterfall fills in the rest.
    pub fn from_email(email: &str) -> Self {
        let email = email.trim().to_lowercase();
        let domain = email.split('@').nth(1).unwrap_or_default().to_string();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            domain,
            first_name: None,
            last_name: None,
            title: None,
            company: None,
            linkedin_url: None,
            phone: None,
            email_verified: false,
            industry: None,
            employee_count: None,
            country: None,
            revenue_band: None,
            signals: LeadSignals::default(),
            enrichment_source: None,
            enrichment_cost_aud: 0.0,
            pool_status: PoolStatus::Unassigned,
            first_seen_at: now,
            last_refreshed_at: now,
        }
    }
}

// ─── Assignments ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    Active,
    Converted,
    Released,
    Suppressed,
}

impl AssignmentState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AssignmentState::Active)
    }
}

/// Exclusive binding of a pool lead to a tenant for outreach. At most one
/// active assignment exists per pool lead across all tenants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub pool_lead_id: Uuid,
    pub campaign_id: Uuid,
    pub state: AssignmentState,
    pub assigned_at: DateTime<Utc>,
    pub terminal_at: Option<DateTime<Utc>>,
}

/// Outcome of `try_assign`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum AssignOutcome {
    Assigned { assignment_id: Uuid },
    AlreadyYours { assignment_id: Uuid },
    Collision { other_client: Uuid },
    Suppressed { reason: String },
}

// ─── Lead Views ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Enriched,
    Scored,
    InSequence,
    Converted,
    Unsubscribed,
    Bounced,
    Dead,
}

impl LeadStatus {
    /// Terminal for sequencing: no further touches may be scheduled or sent.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LeadStatus::Converted | LeadStatus::Unsubscribed | LeadStatus::Bounced | LeadStatus::Dead
        )
    }
}

/// ALS tier derived from the 0–100 score. Lower bounds are inclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlsTier {
    Hot,
    Warm,
    Cool,
    Cold,
    Dead,
}

impl AlsTier {
    pub fn from_score(score: u8) -> Self {
        match score {
            85..=u8::MAX => AlsTier::Hot,
            60..=84 => AlsTier::Warm,
            35..=59 => AlsTier::Cool,
            20..=34 => AlsTier::Cold,
            _ => AlsTier::Dead,
        }
    }
}

/// Component breakdown of an ALS score. `risk` is a penalty and is stored
/// as a non-positive value in -15..=0; the other components are bounded by
/// their documented maxima.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ScoreComponents {
    pub data_quality: i16,
    pub authority: i16,
    pub company_fit: i16,
    pub timing: i16,
    pub risk: i16,
    pub linkedin_boost: i16,
    pub buyer_bonus: i16,
}

impl ScoreComponents {
    pub fn total(&self) -> i16 {
        self.data_quality
            + self.authority
            + self.company_fit
            + self.timing
            + self.risk
            + self.linkedin_boost
            + self.buyer_bonus
    }
}

/// A tenant's view of a pool lead via its assignment, carrying all
/// tenant-scoped mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadView {
    pub id: Uuid,
    pub client_id: Uuid,
    pub pool_lead_id: Uuid,
    pub assignment_id: Uuid,
    pub campaign_id: Uuid,
    pub als_score: u8,
    pub als_tier: AlsTier,
    pub components: ScoreComponents,
    pub status: LeadStatus,
    pub sequence_position: u32,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// ─── Campaigns ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

/// Channel allocation percentages. Must sum to exactly 100 on any active
/// campaign.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelAllocation {
    pub email: u8,
    pub sms: u8,
    pub linkedin: u8,
    pub voice: u8,
    pub mail: u8,
}

impl ChannelAllocation {
    pub fn sum(&self) -> u32 {
        u32::from(self.email)
            + u32::from(self.sms)
            + u32::from(self.linkedin)
            + u32::from(self.voice)
            + u32::from(self.mail)
    }

    pub fn is_valid(&self) -> bool {
        self.sum() == 100
    }
}

impl Default for ChannelAllocation {
    fn default() -> Self {
        Self {
            email: 60,
            sms: 5,
            linkedin: 20,
            voice: 10,
            mail: 5,
        }
    }
}

/// One step of a campaign's sequence template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub channel: Channel,
    pub offset_days: u32,
    pub template_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub allocation: ChannelAllocation,
    pub daily_cap: u32,
    pub permission_mode: PermissionMode,
    pub sequence: Vec<SequenceStep>,
    pub icp: IcpProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Channels & Activities ──────────────────────────────────────────────────

/// Outreach channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Linkedin,
    Voice,
    Mail,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Email,
        Channel::Sms,
        Channel::Linkedin,
        Channel::Voice,
        Channel::Mail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Linkedin => "linkedin",
            Channel::Voice => "voice",
            Channel::Mail => "mail",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Replied,
    Bounced,
    Complained,
    Unsubscribed,
    /// Provider-permanent failure surfaced in the lead timeline.
    Failed,
    /// JIT validator rejection, recorded with a skip reason.
    Skipped,
}

/// Flags recording which personalization elements were used in a touch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PersonalizationFlags {
    pub company_mention: bool,
    pub recent_news: bool,
    pub mutual_connection: bool,
    pub industry_specific: bool,
}

/// Structured capture of the content that went out in a touch. Mined by the
/// WHAT detector.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContentSnapshot {
    pub subject: Option<String>,
    pub body: String,
    pub pain_points: Vec<String>,
    pub cta: Option<String>,
    pub personalization: PersonalizationFlags,
}

/// Immutable append-only record of a single outreach touch or event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub client_id: Uuid,
    pub campaign_id: Uuid,
    pub pool_lead_id: Uuid,
    pub channel: Channel,
    pub action: ActivityAction,
    /// The sending resource (mailbox / seat / phone number) used.
    pub resource_id: String,
    pub provider_message_id: Option<String>,
    pub thread_id: Option<Uuid>,
    pub touch_number: u32,
    pub sent_at: DateTime<Utc>,
    pub content: Option<ContentSnapshot>,
    /// Back-filled to true when the lead converts within the attribution
    /// window.
    pub led_to_booking: bool,
    pub skip_reason: Option<String>,
}

// ─── Threads & Messages ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Resolved,
    Stale,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadOutcome {
    Converted,
    Rejected,
    NoResponse,
    Ongoing,
}

/// One conversation per (client, pool lead, channel family).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub client_id: Uuid,
    pub pool_lead_id: Uuid,
    pub channel: Channel,
    pub status: ThreadStatus,
    pub outcome: ThreadOutcome,
    pub message_count: u32,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// Classified intent of an inbound reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyIntent {
    Interested,
    Question,
    Objection,
    NotInterested,
    Unsubscribe,
    OutOfScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub direction: Direction,
    pub content: String,
    pub sentiment: Option<Sentiment>,
    pub intent: Option<ReplyIntent>,
    pub objection_type: Option<String>,
    pub question_text: Option<String>,
    /// Position within the thread, starting at 1.
    pub position: u32,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ─── Buyer Signals ──────────────────────────────────────────────────────────

/// Platform-wide anonymized record of a domain's purchase history. Feeds the
/// known-buyer bonus at scoring time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerSignal {
    pub domain: String,
    pub times_bought: u32,
    pub avg_value: f64,
    pub services_bought: Vec<String>,
    pub buyer_score: u8,
}

// ─── Scheduled Touches ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TouchStatus {
    Pending,
    Leased,
    Completed,
    Cancelled,
    DeadLetter,
    /// Dropped after exhausting rate-limit re-queues.
    Dropped,
}

/// A unit of work in the dispatch queue: one planned touch toward one lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTouch {
    pub id: Uuid,
    pub client_id: Uuid,
    pub campaign_id: Uuid,
    pub pool_lead_id: Uuid,
    pub channel: Channel,
    /// The sending resource this touch is pinned to.
    pub resource_id: String,
    pub due_at: DateTime<Utc>,
    pub touch_number: u32,
    pub template_ref: String,
    /// Allocator verdict: richer content path is permitted for this touch.
    pub enhanced: bool,
    pub status: TouchStatus,
    pub attempts: u32,
    /// Times this touch was pushed to the next send window after rate
    /// exhaustion.
    pub requeues: u32,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
