use dsr_core::coalescing::CoalescingEmitter;
use dsr_core::config::{page_size_from_env_value, window_from_env_value};
use dsr_core::constants::{AUDIT_LOG_FILE, MAX_PAGE_SIZE};
use dsr_core::{
    AuditLog, Catalogue, CoreConfig, CoreContext, FileAuditLog, LocalStore, MemoryAuditLog,
    ReleaseEngine, StaticJobStatus, StaticRoleProvider, TracingNotifier,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the DSR service
///
/// Loads the catalogue and role grants, opens the release store and serves the REST API.
///
/// # Environment Variables
/// - `DSR_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `DSR_CATALOGUE`: catalogue YAML document (required)
/// - `DSR_ROLES`: role grants YAML (optional; without it nobody holds a role)
/// - `DSR_DATA_DIR`: release directory, also holding the audit log; releases and audit
///   events are kept in memory only when unset
/// - `DSR_PAGE_SIZE`: default node tree page size
/// - `DSR_EGRESS_WINDOW_SECS`: egress audit coalescing window
///
/// # Errors
/// Returns an error if configuration is invalid, the catalogue, roles or stored releases
/// cannot be loaded, or the server fails to bind or run.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dsr=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("DSR_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let catalogue_path = std::env::var("DSR_CATALOGUE")
        .map(PathBuf::from)
        .map_err(|_| anyhow::anyhow!("DSR_CATALOGUE must point at a catalogue document"))?;
    let catalogue = Catalogue::from_yaml(&std::fs::read_to_string(&catalogue_path)?)?;

    let roles = match std::env::var("DSR_ROLES").ok() {
        Some(path) => StaticRoleProvider::from_yaml(&std::fs::read_to_string(path)?)?,
        None => {
            tracing::warn!("DSR_ROLES not set, no caller holds a role");
            StaticRoleProvider::new()
        }
    };

    let data_dir = std::env::var("DSR_DATA_DIR").ok().map(PathBuf::from);
    let cfg = Arc::new(CoreConfig::new(
        data_dir,
        page_size_from_env_value(std::env::var("DSR_PAGE_SIZE").ok())?,
        MAX_PAGE_SIZE,
        window_from_env_value(std::env::var("DSR_EGRESS_WINDOW_SECS").ok())?,
    )?);

    let (store, audit): (LocalStore, Arc<dyn AuditLog>) = match cfg.release_data_dir() {
        Some(dir) => {
            if !dir.exists() {
                anyhow::bail!("Release data directory does not exist: {}", dir.display());
            }
            (
                LocalStore::open(catalogue, dir)?,
                Arc::new(FileAuditLog::open(&dir.join(AUDIT_LOG_FILE))?),
            )
        }
        None => {
            tracing::warn!("DSR_DATA_DIR not set, releases will not survive a restart");
            (LocalStore::in_memory(catalogue), Arc::new(MemoryAuditLog::new()))
        }
    };

    let ctx = CoreContext::new(
        cfg,
        Arc::new(store),
        audit,
        Arc::new(roles),
        Arc::new(StaticJobStatus::new()),
        Arc::new(TracingNotifier),
    );
    let mut engine = ReleaseEngine::new(Arc::new(ctx));
    if let Some(emitter) = CoalescingEmitter::current() {
        engine = engine.with_egress(emitter);
    }

    tracing::info!("++ Starting DSR REST on {}", rest_addr);

    let app = api_rest::router(Arc::new(engine));
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
