//! Agency OS — multi-tenant B2B outreach platform core.
//!
//! Main entry point: boots the store, suppression index, enrichment
//! waterfall, pool manager, dispatch orchestrator, reply ingestor, and the
//! API server, plus the operator subcommands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use uuid::Uuid;

use agency_api::outbound::{OutboundEmitter, OutboundEvent};
use agency_api::rest::AppState;
use agency_api::LoggingTransport;
use agency_core::config::AppConfig;
use agency_core::error::AgencyResult;
use agency_core::event_bus::{EventSink, OutreachEvent, OutreachEventType};
use agency_core::types::{
    Channel, PoolLead, SubscriptionStatus, Tenant, TenantPolicy, TenantTier,
};
use agency_channels::{
    ChannelAdapter, DirectMailAdapter, EmailAdapter, LinkedinAdapter, ProviderEvent,
    RecipientRouting, SmsAdapter, VoiceAdapter,
};
use agency_dispatch::{DispatchContext, DispatchOrchestrator, JitValidator, TemplateComposer};
use agency_enrichment::{default_providers, EnrichmentCache, EnrichmentWaterfall};
use agency_learning::run_all;
use agency_pool::{PoolManager, StubProspectSource, Supplier};
use agency_replies::{KeywordClassifier, MessagePoller, ReplyIngestor};
use agency_scoring::Scorer;
use agency_store::{AgencyStore, RateCounters, TouchQueue};
use agency_suppression::SuppressionIndex;

#[derive(Parser, Debug)]
#[command(name = "agency-os")]
#[command(about = "Multi-tenant B2B outreach platform core")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "AGENCY_OS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "AGENCY_OS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Route all sends to the operator address (overrides config)
    #[arg(long, env = "TEST_MODE")]
    test_mode: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the platform: dispatch workers, reply sweep, detectors, API.
    Serve,
    /// Print worker, queue, and rate-limit snapshot. Exit 0 if healthy.
    Status,
    /// Force-run the CIS detectors for a client.
    Detect { client_id: Uuid },
    /// Force-top-up the pool for a client.
    Enrich {
        client_id: Uuid,
        #[arg(long, default_value_t = 10)]
        n: usize,
    },
    /// Inject a test inbound reply for an activity.
    SimulateReply {
        activity_id: Uuid,
        #[arg(long)]
        body: String,
    },
}

/// Everything the process wires together at startup.
struct Platform {
    state: AppState,
    orchestrator: DispatchOrchestrator,
    ingestor: Arc<ReplyIngestor>,
    config: AppConfig,
}

fn build_adapters(config: &AppConfig) -> HashMap<Channel, Arc<dyn ChannelAdapter>> {
    // TEST_MODE is decided here, once, at construction. No send path can
    // reach a real recipient after this point when the flag is set.
    let routing = || RecipientRouting::from_test_mode(config.test_mode, &config.test_recipient);

    let mut adapters: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();
    adapters.insert(
        Channel::Email,
        Arc::new(EmailAdapter::new(
            agency_channels::email::EmailConfig {
                from_name: "Agency OS".into(),
                webhook_secret: config.webhooks.email.clone(),
                open_tracking: true,
                click_tracking: true,
            },
            routing(),
        )),
    );
    adapters.insert(
        Channel::Sms,
        Arc::new(SmsAdapter::new(
            agency_channels::sms::SmsConfig {
                webhook_secret: config.webhooks.sms.clone(),
            },
            routing(),
        )),
    );
    adapters.insert(
        Channel::Linkedin,
        Arc::new(LinkedinAdapter::new(
            agency_channels::linkedin::LinkedinConfig {
                webhook_secret: config.webhooks.linkedin.clone(),
            },
            routing(),
        )),
    );
    adapters.insert(
        Channel::Voice,
        Arc::new(VoiceAdapter::new(
            agency_channels::voice::VoiceConfig {
                webhook_secret: config.webhooks.voice.clone(),
            },
            routing(),
        )),
    );
    adapters.insert(
        Channel::Mail,
        Arc::new(DirectMailAdapter::new(
            agency_channels::mail::DirectMailConfig {
                webhook_secret: config.webhooks.mail.clone(),
                unit_cost_aud: 4.50,
            },
            routing(),
        )),
    );
    adapters
}

fn build_platform(config: AppConfig, events: Arc<dyn EventSink>) -> Platform {
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
        EnrichmentCache::new(&config.enrichment.cache_version, config.enrichment.cache_ttl_days),
        default_providers(),
        counters.clone(),
        config.enrichment.default_daily_budget_aud,
    ));
    let supplier = Arc::new(Supplier::new(
        store.clone(),
        pool.clone(),
        waterfall.clone(),
        Arc::new(StubProspectSource {
            domain_pool: Vec::new(),
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

    let adapters = build_adapters(&config);

    let validator = JitValidator::new(
        store.clone(),
        suppression.clone(),
        counters.clone(),
        config.rate.clone(),
    );
    let orchestrator = DispatchOrchestrator::new(DispatchContext {
        store: store.clone(),
        queue: queue.clone(),
        counters: counters.clone(),
        validator,
        adapters: adapters.clone(),
        composer: Arc::new(TemplateComposer),
        events: events.clone(),
        config: config.dispatch.clone(),
    });

    let scorer = Arc::new(Scorer::new(config.suppression.personal_domains.clone()));

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
        scorer,
        config: Arc::new(config.clone()),
        tokens: Arc::new(dashmap::DashMap::new()),
        start_time: Instant::now(),
    };

    Platform {
        state,
        orchestrator,
        ingestor,
        config,
    }
}

/// Seed a development tenant with an API token so the surface is usable
/// out of the box.
fn seed_dev_tenant(state: &AppState) -> Uuid {
    let client_id = Uuid::new_v4();
    state.store.upsert_tenant(Tenant {
        id: client_id,
        name: "Dev Tenant".into(),
        tier: TenantTier::Velocity,
        subscription_status: SubscriptionStatus::Active,
        credits_remaining: 1_000,
        policy: TenantPolicy::default(),
        created_at: chrono::Utc::now(),
    });
    state
        .tokens
        .insert("dev-token".into(), ("dev@agency-os.test".into(), client_id));

    for (email, title) in [
        ("jordan@bluegum.com.au", "CEO"),
        ("priya@fastlane.io", "Director of Growth"),
        ("sam@harbourlabs.co", "Founder"),
    ] {
        let mut lead = PoolLead::from_email(email);
        lead.title = Some(title.into());
        lead.company = Some(email.split('@').nth(1).unwrap_or("co").into());
        lead.email_verified = true;
        state.store.upsert_pool_lead(lead);
    }

    info!(%client_id, "seeded dev tenant (token: dev-token)");
    client_id
}

/// Forwards conversion/unsubscribe events to client-configured webhook
/// endpoints. Delivery runs detached so emitters never block on a slow
/// receiver.
struct OutboundBridge {
    emitter: Arc<OutboundEmitter>,
}

impl EventSink for OutboundBridge {
    fn emit(&self, event: OutreachEvent) {
        let outbound = match event.event_type {
            OutreachEventType::LeadConverted => OutboundEvent::LeadConverted,
            OutreachEventType::LeadUnsubscribed => OutboundEvent::Unsubscribe,
            _ => return,
        };
        let (Some(client_id), Some(pool_lead_id)) = (event.client_id, event.pool_lead_id) else {
            return;
        };
        let emitter = self.emitter.clone();
        tokio::spawn(async move {
            emitter
                .emit(
                    client_id,
                    outbound,
                    pool_lead_id,
                    serde_json::json!({"pool_lead_id": pool_lead_id}),
                )
                .await;
        });
    }
}

/// The sweep needs a provider poller; out of the box there is nothing to
/// poll, so the no-op poller keeps the loop honest until a real provider
/// client is plugged in.
struct NoopPoller;

#[async_trait]
impl MessagePoller for NoopPoller {
    async fn poll(&self, _provider_message_id: &str) -> AgencyResult<Vec<ProviderEvent>> {
        Ok(Vec::new())
    }
}

async fn serve(platform: Platform) -> anyhow::Result<()> {
    let Platform {
        state,
        orchestrator,
        ingestor,
        config,
    } = platform;

    seed_dev_tenant(&state);

    // Metrics exporter.
    let metrics_addr: std::net::SocketAddr =
        format!("0.0.0.0:{}", config.metrics.port).parse()?;
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
    {
        error!(error = %e, "failed to start metrics exporter");
    }

    // Dispatch workers.
    let worker_handles = orchestrator.start();

    // Safety-net reply sweep + stale marking.
    let sweep_ingestor = ingestor.clone();
    let sweep_hours = config.replies.sweep_interval_hours.max(1);
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(sweep_hours * 3600));
        loop {
            interval.tick().await;
            let window = chrono::Duration::hours(sweep_hours as i64);
            match sweep_ingestor.sweep(&NoopPoller, window).await {
                Ok(report) => info!(processed = report.processed, "reply sweep completed"),
                Err(e) => warn!(error = %e, "reply sweep failed"),
            }
            sweep_ingestor.mark_stale_threads(chrono::Utc::now());
        }
    });

    // Subscription cancellations release every active assignment so the
    // leads return to the pool.
    let release_store = state.store.clone();
    let release_pool = state.pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            for tenant in release_store.list_tenants() {
                if tenant.subscription_status == SubscriptionStatus::Cancelled {
                    if let Err(e) = release_pool.release_all(tenant.id) {
                        warn!(client_id = %tenant.id, error = %e, "release job failed");
                    }
                }
            }
        }
    });

    // Weekly CIS detector schedule.
    let detector_store = state.store.clone();
    let learning_config = config.learning.clone();
    let detector_days = config.learning.detector_interval_days.max(1);
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(detector_days * 86_400));
        loop {
            interval.tick().await;
            for tenant in detector_store.list_tenants() {
                run_all(&detector_store, tenant.id, &learning_config);
            }
        }
    });

    // Graceful shutdown: SIGTERM/SIGINT.
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT, shutting down");
        }
    };

    let addr = std::net::SocketAddr::new(
        config.api.host.parse()?,
        config.api.http_port,
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Starting HTTP server");
    axum::serve(listener, agency_api::build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    orchestrator.shutdown();
    for handle in worker_handles {
        let _ = handle.await;
    }

    info!("Agency OS shut down cleanly");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agency_os=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if cli.test_mode {
        config.test_mode = true;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        test_mode = config.test_mode,
        "Agency OS starting up"
    );

    let emitter = Arc::new(OutboundEmitter::new(
        Arc::new(LoggingTransport),
        &config.webhooks.outbound,
    ));
    let platform = build_platform(config, Arc::new(OutboundBridge { emitter }));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(platform).await?,
        Command::Status => {
            let queue = platform.state.queue.snapshot();
            let rates = platform.state.counters.usage_snapshot();
            println!("{}", serde_json::to_string_pretty(&queue)?);
            println!("{}", serde_json::to_string_pretty(&rates)?);
            let healthy = queue.dead_letter == 0;
            std::process::exit(if healthy { 0 } else { 1 });
        }
        Command::Detect { client_id } => {
            let patterns = run_all(&platform.state.store, client_id, &platform.config.learning);
            for pattern in patterns {
                println!(
                    "{:?}: sample_size={} confidence={:.3}",
                    pattern.pattern_type, pattern.sample_size, pattern.confidence
                );
            }
        }
        Command::Enrich { client_id, n } => {
            let report = agency_api::rest::force_top_up(&platform.state, client_id, n).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::SimulateReply { activity_id, body } => {
            agency_api::rest::simulate_reply(&platform.state, activity_id, &body).await?;
            println!("reply ingested for activity {activity_id}");
        }
    }

    Ok(())
}
