use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Reason an identifier was added to the suppression list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    ExistingCustomer,
    Bounce,
    Unsubscribe,
    DoNotContact,
    Competitor,
    CoolingOff,
}

impl SuppressionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionReason::ExistingCustomer => "existing_customer",
            SuppressionReason::Bounce => "bounce",
            SuppressionReason::Unsubscribe => "unsubscribe",
            SuppressionReason::DoNotContact => "do_not_contact",
            SuppressionReason::Competitor => "competitor",
            SuppressionReason::CoolingOff => "cooling_off",
        }
    }
}

/// What is being suppressed. Domain entries shadow every email within the
/// domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum SuppressionTarget {
    Email(String),
    Domain(String),
}

impl SuppressionTarget {
    pub fn email(value: &str) -> Self {
        SuppressionTarget::Email(value.trim().to_lowercase())
    }

    pub fn domain(value: &str) -> Self {
        SuppressionTarget::Domain(value.trim().to_lowercase())
    }
}

/// A single suppression record. `client_id = None` is a global entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub target: SuppressionTarget,
    pub reason: SuppressionReason,
    pub source: String,
    /// The customer record this entry came from, for CRM imports.
    pub customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Expiry is advisory: entries are never deleted, checks just skip
    /// expired ones.
    pub expires_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// SuppressionIndex
// ---------------------------------------------------------------------------

/// Thread-safe suppression index with tenant and global scopes.
pub struct SuppressionIndex {
    /// (scope, target) -> entry. Upserts keep the map idempotent.
    entries: DashMap<(Option<Uuid>, SuppressionTarget), SuppressionEntry>,
    /// Webmail domains excluded from domain-level suppression.
    personal_domains: Vec<String>,
}

impl SuppressionIndex {
    pub fn new(personal_domains: Vec<String>) -> Self {
        Self {
            entries: DashMap::new(),
            personal_domains,
        }
    }

    fn is_personal_domain(&self, domain: &str) -> bool {
        self.personal_domains.iter().any(|d| d == domain)
    }

    /// Idempotent upsert. Domain entries for personal webmail domains are
    /// refused (suppressing gmail.com would suppress half the pool).
    pub fn add(
        &self,
        client_id: Option<Uuid>,
        target: SuppressionTarget,
        reason: SuppressionReason,
        source: &str,
        customer_id: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Option<SuppressionEntry> {
        if let SuppressionTarget::Domain(domain) = &target {
            if self.is_personal_domain(domain) {
                info!(domain, "skipping domain suppression for personal domain");
                return None;
            }
        }

        let key = (client_id, target.clone());
        if let Some(existing) = self.entries.get(&key) {
            return Some(existing.clone());
        }

        let entry = SuppressionEntry {
            id: Uuid::new_v4(),
            client_id,
            target,
            reason,
            source: source.to_string(),
            customer_id,
            created_at: Utc::now(),
            expires_at,
        };
        info!(
            client_id = ?entry.client_id,
            target = ?entry.target,
            reason = reason.as_str(),
            "suppression entry added"
        );
        self.entries.insert(key, entry.clone());
        Some(entry)
    }

    /// Check whether contact is forbidden for this client. A domain-level
    /// hit shadows any email within that domain; global entries apply to
    /// every tenant. Expired entries are ignored.
    pub fn check(
        &self,
        client_id: Uuid,
        email: Option<&str>,
        domain: Option<&str>,
    ) -> Option<SuppressionReason> {
        let now = Utc::now();
        let email = email.map(|e| e.trim().to_lowercase());
        let domain = domain.map(|d| d.trim().to_lowercase()).or_else(|| {
            email
                .as_deref()
                .and_then(|e| e.split('@').nth(1).map(str::to_string))
        });

        let mut targets: Vec<SuppressionTarget> = Vec::new();
        if let Some(domain) = domain {
            if !self.is_personal_domain(&domain) {
                targets.push(SuppressionTarget::Domain(domain));
            }
        }
        if let Some(email) = email {
            targets.push(SuppressionTarget::Email(email));
        }

        for target in targets {
            for scope in [None, Some(client_id)] {
                if let Some(entry) = self.entries.get(&(scope, target.clone())) {
                    let expired = entry.expires_at.map(|e| e <= now).unwrap_or(false);
                    if !expired {
                        return Some(entry.reason);
                    }
                }
            }
        }
        None
    }

    /// Bulk import from a customer CSV / CRM pull. Returns the number of
    /// entries actually created.
    pub fn import(
        &self,
        client_id: Uuid,
        items: Vec<(SuppressionTarget, SuppressionReason, Option<String>)>,
    ) -> usize {
        let mut created = 0usize;
        for (target, reason, customer_id) in items {
            if self
                .add(Some(client_id), target, reason, "import", customer_id, None)
                .is_some()
            {
                created += 1;
            }
        }
        info!(%client_id, created, "bulk suppression import completed");
        created
    }

    /// Bounce policy: the address is bad for everyone, so the entry is
    /// global and never expires.
    pub fn suppress_bounce(&self, email: &str) -> Option<SuppressionEntry> {
        self.add(
            None,
            SuppressionTarget::email(email),
            SuppressionReason::Bounce,
            "bounce_webhook",
            None,
            None,
        )
    }

    /// Complaint policy: scoped to the tenant that sent the offending mail,
    /// never expires.
    pub fn suppress_complaint(&self, client_id: Uuid, email: &str) -> Option<SuppressionEntry> {
        self.add(
            Some(client_id),
            SuppressionTarget::email(email),
            SuppressionReason::DoNotContact,
            "complaint_webhook",
            None,
            None,
        )
    }

    /// One-click unsubscribe: tenant-scoped.
    pub fn suppress_unsubscribe(&self, client_id: Uuid, email: &str) -> Option<SuppressionEntry> {
        self.add(
            Some(client_id),
            SuppressionTarget::email(email),
            SuppressionReason::Unsubscribe,
            "unsubscribe",
            None,
            None,
        )
    }

    /// Global unsubscribe across all tenants.
    pub fn suppress_unsubscribe_global(&self, email: &str) -> Option<SuppressionEntry> {
        self.add(
            None,
            SuppressionTarget::email(email),
            SuppressionReason::Unsubscribe,
            "global_unsubscribe",
            None,
            None,
        )
    }

    /// Cooling-off after a not-interested reply.
    pub fn suppress_cooling_off(
        &self,
        client_id: Uuid,
        email: &str,
        months: u32,
    ) -> Option<SuppressionEntry> {
        self.add(
            Some(client_id),
            SuppressionTarget::email(email),
            SuppressionReason::CoolingOff,
            "reply_classifier",
            None,
            Some(Utc::now() + Duration::days(i64::from(months) * 30)),
        )
    }

    pub fn entries_for(&self, client_id: Option<Uuid>) -> Vec<SuppressionEntry> {
        self.entries
            .iter()
            .filter(|e| e.key().0 == client_id)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SuppressionIndex {
        SuppressionIndex::new(vec!["gmail.com".into(), "yahoo.com".into()])
    }

    #[test]
    fn test_add_is_idempotent() {
        let idx = index();
        let client = Uuid::new_v4();

        idx.add(
            Some(client),
            SuppressionTarget::email("a@corp.com"),
            SuppressionReason::Unsubscribe,
            "test",
            None,
            None,
        );
        idx.add(
            Some(client),
            SuppressionTarget::email("A@CORP.COM"),
            SuppressionReason::Unsubscribe,
            "test",
            None,
            None,
        );

        assert_eq!(idx.count(), 1);
    }

    #[test]
    fn test_domain_shadows_email() {
        let idx = index();
        let client = Uuid::new_v4();

        idx.add(
            Some(client),
            SuppressionTarget::domain("competitor.com"),
            SuppressionReason::Competitor,
            "test",
            None,
            None,
        );

        // Any email within the domain is shadowed.
        assert_eq!(
            idx.check(client, Some("ceo@competitor.com"), None),
            Some(SuppressionReason::Competitor)
        );
        // Other tenants are unaffected by a tenant-scoped entry.
        assert_eq!(idx.check(Uuid::new_v4(), Some("ceo@competitor.com"), None), None);
    }

    #[test]
    fn test_global_scope_applies_to_all_tenants() {
        let idx = index();
        idx.suppress_bounce("dead@corp.com");

        assert_eq!(
            idx.check(Uuid::new_v4(), Some("dead@corp.com"), None),
            Some(SuppressionReason::Bounce)
        );
        assert_eq!(
            idx.check(Uuid::new_v4(), Some("dead@corp.com"), None),
            Some(SuppressionReason::Bounce)
        );
    }

    #[test]
    fn test_personal_domains_not_domain_suppressible() {
        let idx = index();
        let client = Uuid::new_v4();

        // Refused outright.
        assert!(idx
            .add(
                Some(client),
                SuppressionTarget::domain("gmail.com"),
                SuppressionReason::DoNotContact,
                "test",
                None,
                None,
            )
            .is_none());

        // An email-level entry on a personal domain still works.
        idx.add(
            Some(client),
            SuppressionTarget::email("someone@gmail.com"),
            SuppressionReason::Unsubscribe,
            "test",
            None,
            None,
        );
        assert_eq!(
            idx.check(client, Some("someone@gmail.com"), None),
            Some(SuppressionReason::Unsubscribe)
        );
        assert_eq!(idx.check(client, Some("other@gmail.com"), None), None);
    }

    #[test]
    fn test_expired_cooling_off_ignored() {
        let idx = index();
        let client = Uuid::new_v4();

        // Insert an already-expired entry directly.
        let target = SuppressionTarget::email("cold@corp.com");
        idx.entries.insert(
            (Some(client), target.clone()),
            SuppressionEntry {
                id: Uuid::new_v4(),
                client_id: Some(client),
                target,
                reason: SuppressionReason::CoolingOff,
                source: "test".into(),
                customer_id: None,
                created_at: Utc::now() - Duration::days(400),
                expires_at: Some(Utc::now() - Duration::days(30)),
            },
        );

        assert_eq!(idx.check(client, Some("cold@corp.com"), None), None);
    }

    #[test]
    fn test_bulk_import() {
        let idx = index();
        let client = Uuid::new_v4();

        let created = idx.import(
            client,
            vec![
                (
                    SuppressionTarget::email("cust1@a.com"),
                    SuppressionReason::ExistingCustomer,
                    Some("crm-1".into()),
                ),
                (
                    SuppressionTarget::domain("b.com"),
                    SuppressionReason::ExistingCustomer,
                    Some("crm-2".into()),
                ),
                // Personal domain entry is refused.
                (
                    SuppressionTarget::domain("gmail.com"),
                    SuppressionReason::ExistingCustomer,
                    None,
                ),
            ],
        );

        assert_eq!(created, 2);
        assert_eq!(
            idx.check(client, None, Some("b.com")),
            Some(SuppressionReason::ExistingCustomer)
        );
    }

    #[test]
    fn test_cooling_off_expiry_set() {
        let idx = index();
        let client = Uuid::new_v4();
        let entry = idx
            .suppress_cooling_off(client, "later@corp.com", 12)
            .expect("entry");
        let expires = entry.expires_at.expect("expiry");
        assert!(expires > Utc::now() + Duration::days(350));
    }
}
