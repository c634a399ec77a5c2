use std::{process, sync::Arc, time::Duration};

use tenderscope::{
    application::{error::AppError, repos::TendersRepo, tenders::TenderService},
    cache::{CacheConfig, CacheWarmer, ResponseCache, build_store, keys},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        monitoring::{Monitor, MonitorConfig},
        telemetry,
    },
};
use tokio::signal;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
        config::Command::CachePurge(args) => run_cache_purge(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let repo: Arc<dyn TendersRepo> = repositories;

    let cache_config = CacheConfig::from(&settings.cache);
    let cache = ResponseCache::new(build_store(&cache_config));
    let warmer = Arc::new(CacheWarmer::new(
        cache.clone(),
        cache_config.warming_enabled(),
    ));
    let monitor = Arc::new(Monitor::new(MonitorConfig::from(&settings.monitoring)));

    let tenders = Arc::new(TenderService::new(
        repo,
        cache,
        warmer,
        monitor,
        settings.search.mode,
    ));
    let state = HttpState {
        tenders,
        environment: settings.environment,
    };
    let router = http::build_router(state, &settings.cors);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "tenderscope::server",
        addr = %settings.server.addr,
        search_mode = %settings.search.mode,
        cache_backend = ?cache_config.backend,
        cache_enabled = cache_config.enabled,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!(target = "tenderscope::server", "server stopped");
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    init_repositories(&settings).await?;
    info!(target = "tenderscope::migrate", "migrations applied");
    Ok(())
}

async fn run_cache_purge(
    settings: config::Settings,
    args: config::CachePurgeArgs,
) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let store = build_store(&cache_config);
    if !store.is_available().await {
        return Err(AppError::from(InfraError::cache(format!(
            "{} cache backend is not reachable",
            store.backend()
        ))));
    }

    let prefix = match args.prefix.as_deref() {
        Some(prefix) if !prefix.trim().is_empty() => prefix.trim().to_string(),
        _ => keys::version_prefix(None),
    };
    let removed = store.delete_by_prefix(&prefix).await;
    info!(
        target = "tenderscope::cache",
        backend = store.backend(),
        prefix = %prefix,
        removed,
        "cache purged"
    );
    println!("removed {removed} keys under `{prefix}`");
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

/// Resolves on Ctrl-C or SIGTERM, then gives in-flight requests the grace period.
async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(target = "tenderscope::server", error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(target = "tenderscope::server", error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(
        target = "tenderscope::server",
        grace_secs = grace.as_secs(),
        "shutdown requested, draining connections"
    );
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(target = "tenderscope::server", "grace period elapsed, exiting");
        process::exit(0);
    });
}
