//! # Sweepline — binary entry point
//!
//! Boot order: `.env` → tracing → Config → Store → providers → analysis loop +
//! monitoring loop + log writer → read-only monitoring server. ctrl-c / SIGTERM
//! stops everything; each loop finishes the run it is in.
//!
//! See [`sweepline::config::Config`] for every environment variable.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sweepline::config::Config;
use sweepline::engine::analysis::{run_analysis_loop, AnalysisEngine, EngineDeps, EngineSettings};
use sweepline::engine::lifecycle::{run_monitor_loop, TradeLifecycleManager};
use sweepline::engine::router::DecisionRouter;
use sweepline::engine::session::{SessionClock, SystemClock};
use sweepline::events::EventBus;
use sweepline::logsink::{run_log_writer, StoreLogLayer, LOG_CHANNEL_CAPACITY};
use sweepline::providers::llm::{AnthropicProvider, GroqProvider};
use sweepline::providers::mt5::Mt5Bridge;
use sweepline::providers::sentiment::{
    MajoritySentiment, NewsApiSentiment, RedditSentiment, TwitterSentiment,
};
use sweepline::providers::SentimentProvider;
use sweepline::routes;
use sweepline::state::AppState;
use sweepline::store::{MemoryStore, Store};

// ─── Entry Point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env (optional, prod uses real env vars) ──────────────────
    dotenvy::dotenv().ok();

    // ── 2. Initialise structured logging (stdout + bot_logs via the Store) ───
    let (log_layer, log_rx) = StoreLogLayer::new(LOG_CHANNEL_CAPACITY, tracing::Level::INFO);
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(log_layer)
        .with(EnvFilter::from_default_env()
            .add_directive("sweepline=debug".parse()?)
            .add_directive("tower_http=info".parse()?))
        .init();

    info!(
        r#"

  ╔═══════════════════════════════════════════════╗
  ║        SWEEPLINE — Signal Engine              ║
  ║        Levels · Confluences · Sweeps          ║
  ╚═══════════════════════════════════════════════╝"#
    );

    // ── 3. Config ────────────────────────────────────────────────────────────
    let config = Config::from_env().context("invalid configuration")?;
    info!(assets = ?config.assets, tz = %config.timezone, "⚙️ config loaded");

    // ── 4. Store ─────────────────────────────────────────────────────────────
    let store = build_store(&config).await?;

    // ── 5. Providers ─────────────────────────────────────────────────────────
    let http = reqwest::Client::builder()
        .user_agent(config.reddit_user_agent.clone())
        .build()
        .context("failed to build HTTP client")?;

    if config.anthropic_api_key.is_none() {
        warn!("ANTHROPIC_API_KEY not set — primary provider will reject every request");
    }
    if config.groq_api_key.is_none() {
        warn!("GROQ_API_KEY not set — fallback provider will reject every request");
    }

    let primary  = Arc::new(AnthropicProvider::new(http.clone(), config.anthropic_api_key.clone(), config.claude_model.clone()));
    let fallback = Arc::new(GroqProvider::new(http.clone(), config.groq_api_key.clone(), config.groq_model.clone()));
    let exec     = Arc::new(Mt5Bridge::new(http.clone(), config.mt5_base_url.clone()));
    let news     = Arc::new(NewsApiSentiment::new(http.clone(), config.newsapi_key.clone()));
    let reddit: Arc<dyn SentimentProvider> =
        Arc::new(RedditSentiment::new(http.clone(), config.reddit_user_agent.clone()));
    let twitter: Arc<dyn SentimentProvider> =
        Arc::new(TwitterSentiment::new(http.clone(), config.twitter_bearer_token.clone()));
    let social = Arc::new(MajoritySentiment::new("social", vec![reddit, twitter]));

    let events = EventBus::default();
    let clock = Arc::new(SystemClock);
    let session = SessionClock::new(config.timezone);

    // ── 6. Engine ────────────────────────────────────────────────────────────
    let deps = EngineDeps {
        exec:   exec.clone(),
        store:  store.clone(),
        news,
        social,
        clock:  clock.clone(),
        events: events.clone(),
    };
    let router = DecisionRouter::new(
        primary,
        fallback,
        config.decision_policy(),
        config.fallback_min_confidence,
    );
    let engine = AnalysisEngine::new(EngineSettings::from(&config), deps, router);
    let lifecycle = TradeLifecycleManager::new(
        exec,
        store.clone(),
        session,
        config.provider_policy(),
        events.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let analysis = tokio::spawn(run_analysis_loop(engine, config.analysis_interval, shutdown_rx.clone()));
    let monitor = tokio::spawn(run_monitor_loop(lifecycle, config.monitor_interval, shutdown_rx.clone()));
    let log_writer = tokio::spawn(run_log_writer(store.clone(), log_rx, shutdown_rx.clone()));

    // ── 7. Monitoring server ─────────────────────────────────────────────────
    let state = Arc::new(AppState::new(store, events, clock, session, config.assets.clone()));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = config.bind_addr.parse().context("BIND_ADDR is not a socket address")?;
    info!(?addr, "🚀 Sweepline monitor starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut server_rx = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_rx.changed().await;
        })
        .await?;

    // ── 8. Drain loops ───────────────────────────────────────────────────────
    let _ = analysis.await;
    let _ = monitor.await;
    let _ = log_writer.await;
    info!("👋 Sweepline stopped");
    Ok(())
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    #[cfg(feature = "postgres")]
    if let Some(url) = &config.database_url {
        let pg = sweepline::store::PgStore::connect(url).await?;
        return Ok(Arc::new(pg));
    }

    if config.database_url.is_some() {
        warn!("DATABASE_URL set but the postgres feature is disabled — using in-memory store");
    } else {
        warn!("DATABASE_URL not set — using in-memory store (state is lost on restart)");
    }
    Ok(Arc::new(MemoryStore::new()))
}

/// ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("🛑 shutdown requested");
}
