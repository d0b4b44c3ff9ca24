//! Server lifecycle: build state, start workers, serve, shut down.

use std::sync::Arc;

use crate::api;
use crate::audit::{self, AuditService};
use crate::core::{BackgroundTasks, Config, ServerState, TaskKind};
use crate::db::Db;
use crate::events::presence::PresenceTracker;
use crate::events::{EventBus, mailer, scanner};
use crate::utils::{AppError, AppResult};

pub struct Server {
    state: ServerState,
    tasks: BackgroundTasks,
}

impl Server {
    /// Open the database, wire the services and start the background
    /// workers.
    pub async fn build(config: Config) -> AppResult<Self> {
        let db = Db::open(&config.db_path).await?;

        std::fs::create_dir_all(&config.uploads_dir)
            .map_err(|e| AppError::internal(format!("Cannot create uploads dir: {e}")))?;

        let bus = EventBus::new(1024);
        let (audit_service, audit_rx) = AuditService::new(&db, 256);
        let state = ServerState::new(db.clone(), config, bus.clone(), audit_service.clone());

        let mut tasks = BackgroundTasks::new();

        tasks.spawn(
            "audit_writer",
            TaskKind::Worker,
            audit::run_worker(audit_rx, audit_service.storage().clone()),
        );

        let recipient = state
            .config
            .company_email
            .clone()
            .unwrap_or_else(|| "ops@localhost".to_string());
        tasks.spawn(
            "email_dispatcher",
            TaskKind::Listener,
            mailer::run_email_worker(
                db.clone(),
                bus.clone(),
                Arc::new(mailer::LogMailer),
                recipient,
                tasks.shutdown_token(),
            ),
        );

        tasks.spawn(
            "condition_scanner",
            TaskKind::Periodic,
            scanner::run_scanner(db.clone(), bus.clone(), tasks.shutdown_token()),
        );

        tasks.spawn(
            "presence_reaper",
            TaskKind::Periodic,
            presence_reaper(state.presence.clone(), tasks.shutdown_token()),
        );

        Ok(Self { state, tasks })
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Serve until ctrl-c, then drain the background tasks.
    pub async fn run(self) -> AppResult<()> {
        let app = api::build_app(&self.state);
        let addr = format!("0.0.0.0:{}", self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::internal(format!("Cannot bind {addr}: {e}")))?;

        tracing::info!(addr = %addr, "ZRP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutdown signal received");
            })
            .await
            .map_err(|e| AppError::internal(format!("Server error: {e}")))?;

        self.tasks.shutdown().await;
        Ok(())
    }
}

async fn presence_reaper(
    presence: PresenceTracker,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(15));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => presence.expire(),
        }
    }
}
