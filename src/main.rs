use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use pagefreeze::{
    application::{catalog::ReportCatalog, error::AppError, purge::purge_page},
    cache::{CacheConfig, CacheState},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::sync::watch;
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
        config::Command::Purge(args) => run_purge(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    info!(
        output_dir = %cache_config.output_dir.display(),
        development_mode = cache_config.development_mode,
        gzip = cache_config.gzip,
        brotli = cache_config.brotli,
        expire_minutes = cache_config.expire_minutes,
        "static page cache configured"
    );

    let state = HttpState {
        catalog: Arc::new(ReportCatalog::default()),
        cache: Some(CacheState::new(cache_config)),
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "listening");

    let (stop_tx, stop_rx) = watch::channel(false);
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(stop_tx))
        .into_future();

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = drain_deadline(stop_rx, settings.server.graceful_shutdown) => {
            warn!("graceful shutdown timed out, dropping open connections");
        }
    }

    info!("server stopped");
    Ok(())
}

async fn run_purge(settings: config::Settings, args: config::PurgeArgs) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let removed = purge_page(&cache_config, &args.path, args.query.as_deref()).await?;
    if removed == 0 {
        info!(path = %args.path, "no stored page to purge");
    }
    Ok(())
}

async fn shutdown_signal(stop: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested, draining connections");
    let _ = stop.send(true);
}

/// Resolves once shutdown has been requested and `grace` has elapsed.
async fn drain_deadline(mut stop: watch::Receiver<bool>, grace: Duration) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(grace).await;
}
