use serde::Deserialize;

/// Root application configuration. Loaded from environment variables with
/// the prefix `AGENCY_OS__` and `__` as the section separator.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Routes every adapter to a single operator address and never hits real
    /// recipients. Enforced at adapter construction.
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default = "default_test_recipient")]
    pub test_recipient: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub replies: ReplyConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub suppression: SuppressionConfig,
    #[serde(default)]
    pub webhooks: WebhookSecrets,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_workers_per_channel")]
    pub workers_per_channel: usize,
    /// Leased-lock visibility timeout for claimed touches.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Rate-limit re-queues permitted before a touch is dropped.
    #[serde(default = "default_max_requeues")]
    pub max_requeues: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Per-resource, per-UTC-day send caps.
#[derive(Debug, Clone, Deserialize)]
pub struct RateConfig {
    #[serde(default = "default_email_cap")]
    pub email_per_mailbox: u32,
    #[serde(default = "default_sms_cap")]
    pub sms_per_number: u32,
    #[serde(default = "default_linkedin_cap")]
    pub linkedin_per_seat: u32,
    #[serde(default = "default_voice_cap")]
    pub voice_per_number: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyConfig {
    /// Safety-net sweep cadence.
    #[serde(default = "default_sweep_interval_hours")]
    pub sweep_interval_hours: u64,
    /// No inbound for this long after last outbound marks the thread stale.
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: u32,
    #[serde(default = "default_cooling_off_months")]
    pub cooling_off_months: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_detector_interval_days")]
    pub detector_interval_days: u64,
    #[serde(default = "default_min_converting")]
    pub min_converting: usize,
    #[serde(default = "default_min_total")]
    pub min_total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_cache_version")]
    pub cache_version: String,
    #[serde(default = "default_cache_ttl_days")]
    pub cache_ttl_days: u32,
    #[serde(default = "default_daily_budget_aud")]
    pub default_daily_budget_aud: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuppressionConfig {
    /// Webmail domains excluded from domain-level suppression.
    #[serde(default = "default_personal_domains")]
    pub personal_domains: Vec<String>,
}

/// Per-provider webhook signing secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSecrets {
    #[serde(default = "default_secret")]
    pub email: String,
    #[serde(default = "default_secret")]
    pub sms: String,
    #[serde(default = "default_secret")]
    pub linkedin: String,
    #[serde(default = "default_secret")]
    pub voice: String,
    #[serde(default = "default_secret")]
    pub mail: String,
    /// Secret used to sign outbound webhooks to client endpoints.
    #[serde(default = "default_secret")]
    pub outbound: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_test_recipient() -> String {
    "ops@agency-os.test".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_workers_per_channel() -> usize {
    2
}
fn default_lease_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_secs() -> u64 {
    30
}
fn default_backoff_max_secs() -> u64 {
    3600
}
fn default_max_requeues() -> u32 {
    3
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_email_cap() -> u32 {
    50
}
fn default_sms_cap() -> u32 {
    100
}
fn default_linkedin_cap() -> u32 {
    17
}
fn default_voice_cap() -> u32 {
    50
}
fn default_sweep_interval_hours() -> u64 {
    6
}
fn default_stale_after_days() -> u32 {
    30
}
fn default_cooling_off_months() -> u32 {
    12
}
fn default_detector_interval_days() -> u64 {
    7
}
fn default_min_converting() -> usize {
    5
}
fn default_min_total() -> usize {
    20
}
fn default_cache_version() -> String {
    "v1".to_string()
}
fn default_cache_ttl_days() -> u32 {
    90
}
fn default_daily_budget_aud() -> f64 {
    50.0
}
fn default_personal_domains() -> Vec<String> {
    [
        "gmail.com",
        "yahoo.com",
        "outlook.com",
        "hotmail.com",
        "icloud.com",
        "aol.com",
        "proton.me",
        "protonmail.com",
        "gmx.com",
        "mail.com",
        "yandex.com",
        "live.com",
        "msn.com",
        "me.com",
        "zoho.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_secret() -> String {
    "change-me".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers_per_channel: default_workers_per_channel(),
            lease_secs: default_lease_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            max_requeues: default_max_requeues(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            email_per_mailbox: default_email_cap(),
            sms_per_number: default_sms_cap(),
            linkedin_per_seat: default_linkedin_cap(),
            voice_per_number: default_voice_cap(),
        }
    }
}

impl RateConfig {
    /// Daily cap for a resource on the given channel. Mail is cost-gated,
    /// not rate-capped.
    pub fn cap_for(&self, channel: crate::types::Channel) -> Option<u32> {
        use crate::types::Channel;
        match channel {
            Channel::Email => Some(self.email_per_mailbox),
            Channel::Sms => Some(self.sms_per_number),
            Channel::Linkedin => Some(self.linkedin_per_seat),
            Channel::Voice => Some(self.voice_per_number),
            Channel::Mail => None,
        }
    }
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            sweep_interval_hours: default_sweep_interval_hours(),
            stale_after_days: default_stale_after_days(),
            cooling_off_months: default_cooling_off_months(),
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            detector_interval_days: default_detector_interval_days(),
            min_converting: default_min_converting(),
            min_total: default_min_total(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            cache_version: default_cache_version(),
            cache_ttl_days: default_cache_ttl_days(),
            default_daily_budget_aud: default_daily_budget_aud(),
        }
    }
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            personal_domains: default_personal_domains(),
        }
    }
}

impl Default for WebhookSecrets {
    fn default() -> Self {
        Self {
            email: default_secret(),
            sms: default_secret(),
            linkedin: default_secret(),
            voice: default_secret(),
            mail: default_secret(),
            outbound: default_secret(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            test_mode: false,
            test_recipient: default_test_recipient(),
            api: ApiConfig::default(),
            dispatch: DispatchConfig::default(),
            rate: RateConfig::default(),
            replies: ReplyConfig::default(),
            learning: LearningConfig::default(),
            enrichment: EnrichmentConfig::default(),
            suppression: SuppressionConfig::default(),
            webhooks: WebhookSecrets::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("AGENCY_OS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Channel;

    #[test]
    fn test_defaults_match_documented_caps() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.rate.cap_for(Channel::Email), Some(50));
        assert_eq!(cfg.rate.cap_for(Channel::Sms), Some(100));
        assert_eq!(cfg.rate.cap_for(Channel::Linkedin), Some(17));
        assert_eq!(cfg.rate.cap_for(Channel::Voice), Some(50));
        assert_eq!(cfg.rate.cap_for(Channel::Mail), None);
        assert_eq!(cfg.dispatch.max_attempts, 5);
        assert_eq!(cfg.dispatch.lease_secs, 60);
        assert_eq!(cfg.replies.sweep_interval_hours, 6);
    }

    #[test]
    fn test_personal_domains_seeded() {
        let cfg = SuppressionConfig::default();
        assert!(cfg.personal_domains.iter().any(|d| d == "gmail.com"));
        assert!(cfg.personal_domains.len() >= 10);
    }
}
