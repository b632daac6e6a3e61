//! End-to-end scenarios across the whole platform: assignment collisions,
//! tier-gated sequencing, unsubscribe handling, rate saturation, safety-net
//! reconciliation, and detector attribution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use agency_api::rest::AppState;
use agency_core::config::AppConfig;
use agency_core::error::AgencyResult;
use agency_core::event_bus::{capture_sink, noop_sink, CaptureSink, OutreachEventType};
use agency_core::types::{
    Activity, ActivityAction, AlsTier, AssignOutcome, Campaign, CampaignStatus, Channel,
    ChannelAllocation, LeadStatus, PermissionMode, PoolLead, ScheduledTouch, ScoreComponents,
    SubscriptionStatus, Tenant, TenantPolicy, TenantTier, TouchStatus,
};
use agency_channels::{
    email::EmailConfig, linkedin::LinkedinConfig, mail::DirectMailConfig, sms::SmsConfig,
    voice::VoiceConfig, ChannelAdapter, DirectMailAdapter, EmailAdapter, LinkedinAdapter,
    ProviderEvent, ProviderEventKind, RecipientRouting, SmsAdapter, VoiceAdapter,
};
use agency_dispatch::worker::TouchOutcome;
use agency_dispatch::{
    DispatchContext, DispatchWorker, JitValidator, TemplateComposer,
};
use agency_enrichment::{default_providers, EnrichmentCache, EnrichmentWaterfall};
use agency_learning::{run_all, WhenDetector, HowDetector, Detector, DetectorContext};
use agency_core::patterns::{PatternPayload, PatternType};
use agency_pool::{PoolManager, StubProspectSource, Supplier};
use agency_replies::{KeywordClassifier, MessagePoller, ReplyIngestor};
use agency_scoring::{Allocator, Scorer};
use agency_store::{AgencyStore, RateCounters, TouchQueue};
use agency_suppression::{SuppressionIndex, SuppressionReason};

struct Harness {
    state: AppState,
    events: Arc<CaptureSink>,
    ctx: Arc<DispatchContext>,
    ingestor: Arc<ReplyIngestor>,
}

fn adapters() -> HashMap<Channel, Arc<dyn ChannelAdapter>> {
    let routing = || RecipientRouting::Live;
    let mut map: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();
    map.insert(
        Channel::Email,
        Arc::new(EmailAdapter::new(
            EmailConfig {
                from_name: "Agency".into(),
                webhook_secret: "secret".into(),
                open_tracking: true,
                click_tracking: true,
            },
            routing(),
        )),
    );
    map.insert(
        Channel::Sms,
        Arc::new(SmsAdapter::new(
            SmsConfig {
                webhook_secret: "secret".into(),
            },
            routing(),
        )),
    );
    map.insert(
        Channel::Linkedin,
        Arc::new(LinkedinAdapter::new(
            LinkedinConfig {
                webhook_secret: "secret".into(),
            },
            routing(),
        )),
    );
    map.insert(
        Channel::Voice,
        Arc::new(VoiceAdapter::new(
            VoiceConfig {
                webhook_secret: "secret".into(),
            },
            routing(),
        )),
    );
    map.insert(
        Channel::Mail,
        Arc::new(DirectMailAdapter::new(
            DirectMailConfig {
                webhook_secret: "secret".into(),
                unit_cost_aud: 4.5,
            },
            routing(),
        )),
    );
    map
}

fn harness() -> Harness {
    let config = AppConfig::default();
    let events = capture_sink();
    let store = Arc::new(AgencyStore::new());
    let queue = Arc::new(TouchQueue::new());
    let counters = Arc::new(RateCounters::new());
    let suppression = Arc::new(SuppressionIndex::new(
        config.suppression.personal_domains.clone(),
    ));
    let pool = Arc::new(PoolManager::new(
        store.clone(),
        queue.clone(),
        suppression.clone(),
        events.clone(),
    ));
    let waterfall = Arc::new(EnrichmentWaterfall::new(
        EnrichmentCache::new("v1", 90),
        default_providers(),
        counters.clone(),
        50.0,
    ));
    let supplier = Arc::new(Supplier::new(
        store.clone(),
        pool.clone(),
        waterfall.clone(),
        Arc::new(StubProspectSource {
            domain_pool: vec![],
        }),
    ));
    let ingestor = Arc::new(ReplyIngestor::new(
        store.clone(),
        queue.clone(),
        suppression.clone(),
        pool.clone(),
        Arc::new(KeywordClassifier),
        events.clone(),
        config.replies.clone(),
    ));
    let adapters = adapters();
    let validator = JitValidator::new(
        store.clone(),
        suppression.clone(),
        counters.clone(),
        config.rate.clone(),
    );
    let ctx = Arc::new(DispatchContext {
        store: store.clone(),
        queue: queue.clone(),
        counters: counters.clone(),
        validator,
        adapters: adapters.clone(),
        composer: Arc::new(TemplateComposer),
        events: noop_sink(),
        config: config.dispatch.clone(),
    });

    let state = AppState {
        store,
        queue,
        counters,
        suppression,
        pool,
        supplier,
        waterfall,
        ingestor: ingestor.clone(),
        adapters,
        scorer: Arc::new(Scorer::new(config.suppression.personal_domains.clone())),
        config: Arc::new(config),
        tokens: Arc::new(dashmap::DashMap::new()),
        start_time: Instant::now(),
    };

    Harness {
        state,
        events,
        ctx,
        ingestor,
    }
}

fn tenant(state: &AppState, credits: u32) -> Uuid {
    let client_id = Uuid::new_v4();
    state.store.upsert_tenant(Tenant {
        id: client_id,
        name: "Tenant".into(),
        tier: TenantTier::Velocity,
        subscription_status: SubscriptionStatus::Active,
        credits_remaining: credits,
        policy: TenantPolicy::default(),
        created_at: Utc::now(),
    });
    client_id
}

fn campaign(state: &AppState, client_id: Uuid) -> Campaign {
    let campaign = Campaign {
        id: Uuid::new_v4(),
        client_id,
        name: "outbound".into(),
        status: CampaignStatus::Active,
        allocation: ChannelAllocation::default(),
        daily_cap: 500,
        permission_mode: PermissionMode::Autopilot,
        sequence: Allocator::default_sequence(),
        icp: Default::default(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    state.store.upsert_campaign(campaign.clone()).expect("campaign");
    campaign
}

fn email_touch(
    client_id: Uuid,
    campaign_id: Uuid,
    pool_lead_id: Uuid,
    resource: &str,
    touch_number: u32,
) -> ScheduledTouch {
    ScheduledTouch {
        id: Uuid::new_v4(),
        client_id,
        campaign_id,
        pool_lead_id,
        channel: Channel::Email,
        resource_id: resource.to_string(),
        due_at: Utc::now() - Duration::minutes(1),
        touch_number,
        template_ref: "intro".into(),
        enhanced: false,
        status: TouchStatus::Pending,
        attempts: 0,
        requeues: 0,
        lease_expires_at: None,
        last_error: None,
    }
}

// ─── Scenario 1: assignment collision ───────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enrollment_yields_one_winner() {
    let h = harness();
    let c1 = tenant(&h.state, 100);
    let c2 = tenant(&h.state, 100);
    let camp1 = campaign(&h.state, c1);
    let camp2 = campaign(&h.state, c2);
    let lead_id = h
        .state
        .store
        .upsert_pool_lead(PoolLead::from_email("alice@corp.com"));

    let store_a = h.state.store.clone();
    let store_b = h.state.store.clone();
    let a = tokio::task::spawn_blocking(move || {
        store_a.try_assign(c1, lead_id, camp1.id, None).expect("assign")
    });
    let b = tokio::task::spawn_blocking(move || {
        store_b.try_assign(c2, lead_id, camp2.id, None).expect("assign")
    });
    let (a, b) = (a.await.expect("join"), b.await.expect("join"));

    let assigned = [&a, &b]
        .iter()
        .filter(|o| matches!(o, AssignOutcome::Assigned { .. }))
        .count();
    let collisions = [&a, &b]
        .iter()
        .filter(|o| matches!(o, AssignOutcome::Collision { .. }))
        .count();
    assert_eq!(assigned, 1, "exactly one client wins");
    assert_eq!(collisions, 1, "the other sees a collision naming the holder");
}

// ─── Scenario 2: tier arithmetic + tier-gated allocation ───────────────────

#[test]
fn component_sums_cross_tier_boundaries() {
    // dq 16 + auth 22 + fit 22 + timing 6 + risk 0 = 66 -> warm.
    let mut components = ScoreComponents {
        data_quality: 16,
        authority: 22,
        company_fit: 22,
        timing: 6,
        risk: 0,
        linkedin_boost: 0,
        buyer_bonus: 0,
    };
    assert_eq!(components.total(), 66);
    assert_eq!(AlsTier::from_score(66), AlsTier::Warm);

    components.linkedin_boost = 10;
    assert_eq!(components.total(), 76);
    assert_eq!(AlsTier::from_score(76), AlsTier::Warm);

    components.timing += 5; // actively hiring
    assert_eq!(components.total(), 81);
    assert_eq!(AlsTier::from_score(81), AlsTier::Warm);

    components.company_fit += 5;
    assert_eq!(components.total(), 86);
    assert_eq!(AlsTier::from_score(86), AlsTier::Hot);

    // Boundary: 84 warm, 85 hot (lower bound inclusive).
    assert_eq!(AlsTier::from_score(84), AlsTier::Warm);
    assert_eq!(AlsTier::from_score(85), AlsTier::Hot);

    // Hot unlocks all five channels; sms/mail appear only at hot.
    let hot = Allocator::channels_for_tier(AlsTier::Hot);
    assert_eq!(hot.len(), 5);
    for tier in [AlsTier::Warm, AlsTier::Cool, AlsTier::Cold] {
        let channels = Allocator::channels_for_tier(tier);
        assert!(!channels.contains(&Channel::Sms));
        assert!(!channels.contains(&Channel::Mail));
    }
}

// ─── Scenario 3: unsubscribe end-to-end through dispatch ───────────────────

#[tokio::test]
async fn unsubscribe_stops_the_sequence() {
    let h = harness();
    let client_id = tenant(&h.state, 100);
    let camp = campaign(&h.state, client_id);
    let lead_id = h
        .state
        .store
        .upsert_pool_lead(PoolLead::from_email("bob@corp.com"));
    h.state
        .store
        .try_assign(client_id, lead_id, camp.id, None)
        .expect("assign");

    // Touch 1 goes out.
    h.state
        .queue
        .push(email_touch(client_id, camp.id, lead_id, "mb-1", 1));
    let worker = DispatchWorker::new(h.ctx.clone(), Channel::Email, 0);
    let outcome = worker.process_one(Utc::now()).await.expect("touch due");
    assert_eq!(outcome, TouchOutcome::Sent);

    let sent = h
        .state
        .store
        .activities_for_lead(client_id, lead_id)
        .into_iter()
        .find(|a| a.action == ActivityAction::Sent)
        .expect("sent activity");
    let pmid = sent.provider_message_id.clone().expect("provider id");

    // Touch 2 is pending when the reply lands.
    h.state
        .queue
        .push(email_touch(client_id, camp.id, lead_id, "mb-1", 2));

    h.ingestor
        .ingest(vec![ProviderEvent {
            provider_event_id: "evt-unsub".into(),
            provider_message_id: pmid,
            kind: ProviderEventKind::InboundMessage {
                body: "please remove me from your list".into(),
            },
            occurred_at: Utc::now(),
        }])
        .await
        .expect("ingest");

    // Suppression entry, terminal lead view, rejected thread.
    assert_eq!(
        h.state
            .suppression
            .check(client_id, Some("bob@corp.com"), None),
        Some(SuppressionReason::Unsubscribe)
    );
    let view = h
        .state
        .store
        .get_lead_view(client_id, lead_id)
        .expect("view");
    assert_eq!(view.status, LeadStatus::Unsubscribed);

    // The pending touch was cancelled; the worker finds nothing to send.
    assert!(worker.process_one(Utc::now()).await.is_none());
    assert_eq!(h.state.queue.snapshot().cancelled, 1);
    assert_eq!(h.events.count_type(OutreachEventType::LeadUnsubscribed), 1);
}

// ─── Scenario 4: rate limit saturation ─────────────────────────────────────

#[tokio::test]
async fn mailbox_cap_requeues_overflow_to_next_day() {
    let h = harness();
    let client_id = tenant(&h.state, 1_000);
    let camp = campaign(&h.state, client_id);

    for i in 0..75 {
        let lead_id = h
            .state
            .store
            .upsert_pool_lead(PoolLead::from_email(&format!("p{i}@corp{i}.com")));
        h.state
            .store
            .try_assign(client_id, lead_id, camp.id, None)
            .expect("assign");
        h.state
            .queue
            .push(email_touch(client_id, camp.id, lead_id, "shared-mailbox", 1));
    }

    let worker = DispatchWorker::new(h.ctx.clone(), Channel::Email, 0);
    let mut sent = 0usize;
    let mut requeued = 0usize;
    while let Some(outcome) = worker.process_one(Utc::now()).await {
        match outcome {
            TouchOutcome::Sent => sent += 1,
            TouchOutcome::Requeued => requeued += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(sent, 50, "mailbox cap is 50/day");
    assert_eq!(requeued, 25, "overflow re-queued to the next window");

    let snapshot = h.state.queue.snapshot();
    assert_eq!(snapshot.completed, 50);
    assert_eq!(snapshot.pending, 25);
    assert_eq!(snapshot.dead_letter, 0);

    // No duplicates: exactly 50 sent activities.
    let mut activities = 0usize;
    h.state.store.scan_activities(client_id, |a| {
        if a.action == ActivityAction::Sent {
            activities += 1;
        }
    });
    assert_eq!(activities, 50);
}

// ─── Scenario 5: safety-net reconciliation ─────────────────────────────────

#[tokio::test]
async fn sweep_discovers_bounce_missed_by_webhooks() {
    let h = harness();
    let client_id = tenant(&h.state, 100);
    let camp = campaign(&h.state, client_id);
    let lead_id = h
        .state
        .store
        .upsert_pool_lead(PoolLead::from_email("carol@corp.com"));
    h.state
        .store
        .try_assign(client_id, lead_id, camp.id, None)
        .expect("assign");

    h.state
        .queue
        .push(email_touch(client_id, camp.id, lead_id, "mb-1", 1));
    let worker = DispatchWorker::new(h.ctx.clone(), Channel::Email, 0);
    assert_eq!(
        worker.process_one(Utc::now()).await,
        Some(TouchOutcome::Sent)
    );

    struct BouncePoller;
    #[async_trait]
    impl MessagePoller for BouncePoller {
        async fn poll(&self, pmid: &str) -> AgencyResult<Vec<ProviderEvent>> {
            Ok(vec![ProviderEvent {
                provider_event_id: format!("missed-{pmid}"),
                provider_message_id: pmid.to_string(),
                kind: ProviderEventKind::Bounced,
                occurred_at: Utc::now(),
            }])
        }
    }

    let report = h
        .ingestor
        .sweep(&BouncePoller, Duration::seconds(0))
        .await
        .expect("sweep");
    assert_eq!(report.processed, 1);

    // One bounced activity; suppression written; lead terminated.
    let bounced: Vec<Activity> = h
        .state
        .store
        .activities_for_lead(client_id, lead_id)
        .into_iter()
        .filter(|a| a.action == ActivityAction::Bounced)
        .collect();
    assert_eq!(bounced.len(), 1);
    assert_eq!(
        h.state
            .suppression
            .check(Uuid::new_v4(), Some("carol@corp.com"), None),
        Some(SuppressionReason::Bounce)
    );
    let view = h
        .state
        .store
        .get_lead_view(client_id, lead_id)
        .expect("view");
    assert_eq!(view.status, LeadStatus::Bounced);

    // A second sweep is a no-op.
    let again = h
        .ingestor
        .sweep(&BouncePoller, Duration::seconds(0))
        .await
        .expect("sweep");
    assert_eq!(again.processed, 0);
}

// ─── Scenario 6: CIS attribution ───────────────────────────────────────────

#[tokio::test]
async fn detectors_attribute_converting_touches() {
    let h = harness();
    let client_id = tenant(&h.state, 100);
    let camp = campaign(&h.state, client_id);

    let insert_sequence = |email: &str, touches: u32, converts: bool| -> Uuid {
        let lead_id = h.state.store.upsert_pool_lead(PoolLead::from_email(email));
        h.state
            .store
            .try_assign(client_id, lead_id, camp.id, None)
            .expect("assign");
        for n in 1..=touches {
            // Converters alternate email -> linkedin; the rest stay on email.
            let channel = if converts && n % 2 == 0 {
                Channel::Linkedin
            } else {
                Channel::Email
            };
            h.state
                .store
                .insert_activity(Activity {
                    id: Uuid::new_v4(),
                    client_id,
                    campaign_id: camp.id,
                    pool_lead_id: lead_id,
                    channel,
                    action: ActivityAction::Sent,
                    resource_id: "mb-1".into(),
                    provider_message_id: None,
                    thread_id: None,
                    touch_number: n,
                    sent_at: Utc::now() - Duration::days(i64::from(touches - n) * 2),
                    content: None,
                    led_to_booking: false,
                    skip_reason: None,
                })
                .expect("activity");
        }
        lead_id
    };

    // Three converters at touches 4, 5, 3 (12 activities) plus six
    // non-converters with 3 touches each (18): 30 activities total.
    for (i, touches) in [(0, 4u32), (1, 5), (2, 3)] {
        let lead = insert_sequence(&format!("conv{i}@win{i}.com"), touches, true);
        h.state
            .store
            .record_conversion(client_id, lead, 90)
            .expect("convert");
    }
    for i in 0..6 {
        insert_sequence(&format!("cold{i}@lose{i}.com"), 3, false);
    }

    let patterns = run_all(
        &h.state.store,
        client_id,
        &agency_core::config::LearningConfig::default(),
    );
    assert_eq!(patterns.len(), 4);
    for pattern in &patterns {
        assert_eq!(pattern.sample_size, 30);
        assert!(
            pattern.confidence < 0.5,
            "12 converting activities is a small sample"
        );
        assert!(pattern.confidence > 0.0);
    }

    // WHEN: the converting touch numbers cluster in {3, 4, 5}.
    let ctx = DetectorContext::gather(&h.state.store, client_id);
    let PatternPayload::When(when) = WhenDetector.detect(&ctx) else {
        panic!("wrong payload");
    };
    assert_eq!(when.optimal_touch_numbers.len(), 3);
    for n in &when.optimal_touch_numbers {
        assert!((3..=5).contains(n), "unexpected converting touch {n}");
    }

    // HOW: the email -> linkedin bigram used by converters outranks the
    // email -> email bigram of the non-converters.
    let PatternPayload::How(how) = HowDetector.detect(&ctx) else {
        panic!("wrong payload");
    };
    let top = how.winning_sequences.first().expect("winning sequence");
    assert_eq!(top.channels, vec![Channel::Email, Channel::Linkedin]);
    assert!(how
        .losing_sequences
        .iter()
        .any(|s| s.channels == vec![Channel::Email, Channel::Email]));

    // Detector re-run on unchanged input is byte-equal.
    let a = serde_json::to_vec(&HowDetector.detect(&ctx)).expect("serialize");
    let b = serde_json::to_vec(&HowDetector.detect(&ctx)).expect("serialize");
    assert_eq!(a, b);
    assert_eq!(HowDetector.pattern_type(), PatternType::How);
}

// ─── API handler behaviour ─────────────────────────────────────────────────

#[tokio::test]
async fn campaign_allocation_must_sum_to_100() {
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::Json;

    let h = harness();
    let client_id = tenant(&h.state, 100);
    h.state
        .tokens
        .insert("tok".into(), ("user@x".into(), client_id));
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer tok".parse().expect("header"));

    let bad = agency_api::rest::CreateCampaignRequest {
        name: "bad".into(),
        allocation_pct: ChannelAllocation {
            email: 50,
            sms: 10,
            linkedin: 10,
            voice: 10,
            mail: 10,
        },
        daily_cap: 100,
        permission_mode: PermissionMode::Copilot,
        sequence: vec![],
    };
    let result =
        agency_api::rest::create_campaign(State(h.state.clone()), headers.clone(), Json(bad)).await;
    let err = result.err().expect("400");
    assert_eq!(err.0, axum::http::StatusCode::BAD_REQUEST);

    // Unauthenticated requests are refused outright.
    let result = agency_api::rest::create_campaign(
        State(h.state.clone()),
        HeaderMap::new(),
        Json(agency_api::rest::CreateCampaignRequest {
            name: "x".into(),
            allocation_pct: ChannelAllocation::default(),
            daily_cap: 10,
            permission_mode: PermissionMode::Copilot,
            sequence: vec![],
        }),
    )
    .await;
    assert_eq!(
        result.err().expect("401").0,
        axum::http::StatusCode::UNAUTHORIZED
    );
}
