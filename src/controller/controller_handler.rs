//! Daemon assembly and lifecycle.
//!
//! The [`Controller`] wires the subsystems together (storage, session
//! manager, capture pipeline, bridge, tool supervisor), spawns their
//! background tasks, and tears everything down on ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::sync::{mpsc, watch};

use crate::bridge::relay::{Hub, Relay};
use crate::bridge::web_server::BridgeServer;
use crate::capture::types::ExportFormat;
use crate::capture::CaptureProcessor;
use crate::configuration::config::{ensure_directories, Config};
use crate::controller::tool_supervisor::ToolSupervisor;
use crate::error_handling::types::ControllerError;
use crate::session_management::SessionManager;
use crate::storage::data_dir::DataDir;
use crate::storage::database_storage::DatabaseStore;
use crate::storage::storage_trait::Store;

/// Heartbeat log interval.
const HEARTBEAT_SECS: u64 = 10;

pub struct Controller {
    pub config: Config,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        Ok(Self { config })
    }

    /// Bring up every subsystem and run until ctrl-c.
    pub async fn run(&self) -> Result<(), ControllerError> {
        let config_dir =
            Config::config_dir().map_err(ControllerError::ConfigurationError)?;
        ensure_directories(&config_dir).map_err(ControllerError::ConfigurationError)?;

        let db_path = self
            .config
            .db_path()
            .map_err(ControllerError::ConfigurationError)?;
        let store: Arc<dyn Store> = Arc::new(
            DatabaseStore::open(&db_path)
                .await
                .map_err(ControllerError::StorageError)?,
        );
        info!("Session database at {}", db_path.display());

        let data_dir = self
            .config
            .data_dir()
            .map_err(ControllerError::ConfigurationError)?;
        let data = DataDir::new(&config_dir, data_dir);

        let sessions = Arc::new(SessionManager::new(
            store,
            data.captcha_dir().to_path_buf(),
        ));
        let processor = Arc::new(CaptureProcessor::new(
            sessions.clone(),
            data.clone(),
            self.config.automation_rules.auto_session,
        ));

        let hub = Arc::new(Hub::new());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(ToolSupervisor::new(self.config.clone(), events_tx));

        // Supervisor events fan out to relay clients.
        let hub_for_events = hub.clone();
        tokio::spawn(async move {
            while let Some(message) = events_rx.recv().await {
                hub_for_events.broadcast(&message);
            }
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let port = self.config.browser_integration.port;
        let auto_captcha = self.config.automation_rules.auto_captcha;
        let server = BridgeServer::new(
            hub.clone(),
            processor.clone(),
            sessions.clone(),
            supervisor.clone(),
            auto_captcha,
        );
        tokio::spawn(async move {
            if let Err(e) = server.start(port).await {
                error!("Bridge API failed: {}", e);
            }
        });

        // Periodic full export, when enabled.
        let exporter = if self.config.automation_rules.auto_data_export {
            let sessions_for_export = sessions.clone();
            let export_dir = data.export_dir().to_path_buf();
            let refresh = self.config.automation_rules.auto_refresh.max(1);
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(refresh));
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = sessions_for_export
                        .export_sessions(ExportFormat::Json, &export_dir)
                        .await
                    {
                        error!("Periodic export failed: {}", e);
                    }
                }
            }))
        } else {
            None
        };

        let relay = Arc::new(Relay::new(
            hub.clone(),
            processor,
            sessions.clone(),
            supervisor.clone(),
            data,
            auto_captcha,
        ));
        let relay_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = relay.run(port + 1, relay_shutdown).await {
                error!("Relay failed: {}", e);
            }
        });

        let sweep = sessions.spawn_expiry_sweep();
        let monitor = supervisor.clone().spawn_monitor(shutdown_rx);

        // Heartbeat with connection and session counts.
        let hub_for_heartbeat = hub.clone();
        let sessions_for_heartbeat = sessions.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(HEARTBEAT_SECS));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!(
                    "{} relay client(s), {} session(s)",
                    hub_for_heartbeat.client_count(),
                    sessions_for_heartbeat.session_count().await
                );
            }
        });

        info!("turboX hub running on port {} (relay on {})", port, port + 1);

        tokio::signal::ctrl_c().await.map_err(|e| {
            ControllerError::InitializationFailed(format!("signal handler: {}", e))
        })?;
        info!("Shutting down");

        let _ = shutdown_tx.send(true);
        supervisor.stop_all().await;
        sweep.abort();
        monitor.abort();
        heartbeat.abort();
        if let Some(task) = exporter {
            task.abort();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_construction() {
        let controller = Controller::new(Config::default()).unwrap();
        assert_eq!(controller.config.browser_integration.port, 8765);
    }
}
