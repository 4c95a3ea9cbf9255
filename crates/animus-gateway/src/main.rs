use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use animus_agent::orchestrator::{OrchestratorConfig, OrchestratorDeps};
use animus_agent::wiring::HubAdapter;
use animus_agent::{ChatOrchestrator, SoulResolver};
use animus_agent::emotion::EmotionAnalyzer;
use animus_agent::intent::IntentFilterClient;
use animus_core::config::AnimusConfig;
use animus_llm::OpenAiProvider;
use animus_memory::{Mem0Client, MemoryService};
use animus_mqtt::hub::{HubOptions, MqttHub};
use animus_registry::TerminalRegistry;
use animus_store::Store;

mod app;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "animus_gateway=info,animus_agent=info,tower_http=warn".into()),
        )
        .init();

    // Load config: explicit path > ANIMUS_CONFIG env > ~/.animus/animus.toml
    let config_path = std::env::var("ANIMUS_CONFIG").ok();
    let config = AnimusConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({}), using defaults", e);
        AnimusConfig::default()
    });

    // Migration or store failure at startup is fatal.
    let store = Arc::new(Store::open(&config.database.path)?);
    info!(path = %config.database.path, "store opened");

    let llm: Arc<dyn animus_llm::LlmProvider> = Arc::new(OpenAiProvider::new(
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
        config.llm.request_timeout_secs,
    ));

    // Bounded client for ancillary services (emotion, intent, mem0).
    let services_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.services.http_timeout_secs))
        .build()?;

    let mem0 = config
        .services
        .mem0_url
        .clone()
        .map(|url| Arc::new(Mem0Client::new(url, config.services.http_timeout_secs)));

    let summarizer_model = config
        .llm
        .summarizer_model
        .clone()
        .unwrap_or_else(|| config.llm.model.clone());
    let memory = Arc::new(MemoryService::new(
        Arc::clone(&store),
        Arc::clone(&llm),
        mem0,
        config.memory.clone(),
        summarizer_model,
    ));

    let registry = Arc::new(TerminalRegistry::new(Duration::from_secs(
        config.mqtt.skill_ttl_secs,
    )));
    let resolver = Arc::new(SoulResolver::new(Arc::clone(&store)));

    let (hub, event_loop) = MqttHub::new(
        HubOptions {
            host: config.mqtt.host.clone(),
            port: config.mqtt.port,
            client_id: config.mqtt.client_id.clone(),
            topic_prefix: config.mqtt.topic_prefix.clone(),
            invoke_timeout: Duration::from_secs(config.mqtt.invoke_timeout_secs),
        },
        Arc::clone(&registry),
        Arc::clone(&resolver) as Arc<dyn animus_mqtt::SoulBinder>,
    );
    let adapter = HubAdapter::new(Arc::clone(&hub));

    let orchestrator = Arc::new(ChatOrchestrator::new(
        OrchestratorDeps {
            store: Arc::clone(&store),
            memory: Arc::clone(&memory),
            registry: Arc::clone(&registry),
            resolver: Arc::clone(&resolver),
            llm,
            emotion: EmotionAnalyzer::new(
                services_client.clone(),
                config.services.emotion_url.clone(),
            ),
            intent: IntentFilterClient::new(
                services_client,
                config.services.intent_url.clone(),
            ),
            invoker: adapter.clone(),
            status: adapter.clone(),
            emotion_pub: adapter.clone(),
            intent_pub: adapter,
        },
        OrchestratorConfig {
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            base_exec_probability: config.persona.base_exec_probability,
            history_window: config.memory.history_window,
            tool_timeout: Duration::from_secs(config.mqtt.tool_timeout_secs),
        },
    ));

    // Background loops share one shutdown signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(Arc::clone(&hub).run(event_loop, shutdown_rx.clone()));
    tokio::spawn(animus_memory::idle::run_idle_worker(
        Arc::clone(&memory),
        shutdown_rx.clone(),
    ));
    tokio::spawn(animus_agent::decay::run_decay_publisher(
        Arc::clone(&orchestrator),
        config.persona.decay_interval_secs,
        shutdown_rx,
    ));

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState {
        config,
        store,
        registry,
        orchestrator,
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("animus gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
