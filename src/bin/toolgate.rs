//! toolgate server binary.
//!
//! Wires configuration, storage, the OAuth services, the backend supervisor and the gateway,
//! then serves HTTP until Ctrl-C or SIGTERM. The backend process is left running on shutdown;
//! its PID file lets the next server run find it again.

use anyhow::Result;
use std::{env, sync::Arc};
use toolgate::{
    audit::{AuditSink, TracingAuditSink},
    config::Config,
    http::{AppEngine, AppState, build_router},
    storage::{create_storage_backend, parse_storage_backend},
    supervisor::ProcessSupervisor,
    templates::build_env,
};

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "toolgate=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let version = toolgate::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    tracing::info!(?version, "Starting toolgate");

    let config = Arc::new(Config::new()?);

    let http_client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(*config.http_client_timeout.as_ref())
        .build()?;

    let template_env = AppEngine::from(build_env(
        config.http_templates_path.clone(),
        config.version.clone(),
    ));

    let storage_backend =
        parse_storage_backend(&config.storage_backend, config.database_url.as_deref())?;
    tracing::info!(backend = ?storage_backend, "initializing storage");
    let oauth_storage = create_storage_backend(storage_backend).await?;

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let supervisor = Arc::new(
        ProcessSupervisor::new(
            config.supervisor_settings(),
            http_client.clone(),
            audit.clone(),
        )
        .with_cancellation(token.child_token()),
    );

    let app_context = AppState::new(
        config.clone(),
        http_client,
        oauth_storage,
        template_env,
        supervisor.clone(),
        audit,
    );

    // Shutdown on Ctrl-C or SIGTERM
    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to install Ctrl+C handler");
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
                    tracing::error!(error = %err, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }

            tracker.close();
            inner_token.cancel();
        });
    }

    // Expired codes, tokens, pending authorizations and sessions
    {
        let inner_token = token.clone();
        let auth_server = app_context.auth_server.clone();
        let sessions = app_context.sessions.clone();
        let interval = *config.cleanup_interval.as_ref();
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = inner_token.cancelled() => break,
                    _ = ticker.tick() => {
                        match auth_server.cleanup_expired().await {
                            Ok(removed) => tracing::debug!(removed, "expired oauth records removed"),
                            Err(err) => tracing::error!(error = %err, "expired record cleanup failed"),
                        }
                        let sessions_removed = sessions.cleanup_expired().await;
                        tracing::debug!(sessions_removed, "expired sessions removed");
                    }
                }
            }
        });
    }

    // Backend auto-start
    {
        let supervisor = supervisor.clone();
        tracker.spawn(async move {
            match supervisor.auto_start().await {
                Ok(Some(handle)) => tracing::info!(pid = handle.pid, "backend auto-started"),
                Ok(None) => {}
                Err(err) => tracing::error!(error = %err, "backend auto-start failed"),
            }
        });
    }

    let app = build_router(app_context);

    let bind_address = format!("{}:{}", config.http_host, config.http_port.as_ref());
    let listener = TcpListener::bind(&bind_address).await?;

    // Start HTTP server
    {
        let inner_token = token.clone();
        tracker.spawn(async move {
            tracing::info!("Starting server on {bind_address}");

            let shutdown_token = inner_token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    tokio::select! {
                        () = shutdown_token.cancelled() => { }
                    }
                    tracing::info!("axum graceful shutdown complete");
                })
                .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }

            inner_token.cancel();
        });
    }

    tracker.wait().await;

    Ok(())
}
