//! Main application orchestration.
//!
//! Wires the event-stream client to the configured credential source and
//! subscriptions, feeds connection state and message counts into metrics,
//! and disconnects cleanly on shutdown.

use crate::config::AppConfig;
use crate::error::AppResult;
use evstream_core::ConnectionState;
use evstream_telemetry::Metrics;
use evstream_ws::{EnvCredential, EventStreamClient, ObserverHandle, SubscriptionHandle};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    client: EventStreamClient,
    subscriptions: Vec<SubscriptionHandle>,
    observer: Option<ObserverHandle>,
}

impl Application {
    /// Create a new application. Must be called within a tokio runtime.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let credentials = EnvCredential::new(config.auth.token_env.clone());
        let client = EventStreamClient::new(config.connection_config(), credentials)?;

        Ok(Self {
            config,
            client,
            subscriptions: Vec::new(),
            observer: None,
        })
    }

    pub fn client(&self) -> &EventStreamClient {
        &self.client
    }

    /// Run until Ctrl-C.
    pub async fn run(&mut self) -> AppResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(?e, "Failed to listen for shutdown signal");
            }
        })
        .await
    }

    /// Connect and log events until `shutdown` resolves, then disconnect.
    pub async fn run_until<F>(&mut self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        self.install_observer();
        self.install_subscriptions();

        info!(
            url = %self.config.websocket.url,
            token_env = %self.config.auth.token_env,
            "Connecting to event stream"
        );
        self.client.connect();

        let period = Duration::from_secs(self.config.telemetry.status_interval_secs.max(1));
        let mut status_tick = tokio::time::interval(period);
        status_tick.tick().await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = status_tick.tick() => self.log_status(),

                // Handle shutdown signal
                () = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        // Cleanup
        self.client.disconnect();
        for handle in self.subscriptions.drain(..) {
            self.client.unsubscribe(&handle);
        }
        if let Some(handle) = self.observer.take() {
            self.client.remove_connection_state_observer(handle);
        }
        info!(
            dispatched = self.client.dispatched_count(),
            "Event stream client stopped"
        );
        Ok(())
    }

    fn install_observer(&mut self) {
        if self.observer.is_some() {
            return;
        }
        let handle = self.client.on_connection_state_change(|status| {
            Metrics::connection_status(status);
            match status.state {
                ConnectionState::Error => warn!(%status, "Connection state"),
                _ => info!(%status, "Connection state"),
            }
        });
        self.observer = Some(handle);
    }

    fn install_subscriptions(&mut self) {
        if !self.subscriptions.is_empty() {
            return;
        }
        for event_type in &self.config.subscriptions.event_types {
            let handle = self.client.subscribe(event_type, |msg| {
                Metrics::message_dispatched(&msg.event_type);
                info!(
                    event_type = %msg.event_type,
                    timestamp = msg.timestamp.as_deref().unwrap_or("-"),
                    request_id = msg.request_id.as_deref().unwrap_or("-"),
                    payload = %msg.payload,
                    "Event received"
                );
            });
            debug!(%event_type, "Subscribed");
            self.subscriptions.push(handle);
        }
    }

    fn log_status(&self) {
        let status = self.client.connection_status();
        let heartbeat = self.client.heartbeat_stats();
        if let Some(rtt_ms) = heartbeat.last_rtt_ms {
            Metrics::heartbeat_rtt(rtt_ms as f64);
        }
        info!(
            %status,
            reconnect_attempt = self.client.reconnect_attempt(),
            last_rtt_ms = ?heartbeat.last_rtt_ms,
            last_event = ?self.client.last_event_timestamp(),
            dispatched = self.client.dispatched_count(),
            "Status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstream_core::ConnectionError;

    fn config_without_token() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.token_env = "EVSTREAM_TEST_TOKEN_NEVER_SET".to_string();
        config.subscriptions.event_types = vec!["vote.cast".to_string(), "*".to_string()];
        config
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_connecting() {
        let mut app = Application::new(config_without_token()).unwrap();
        let client = app.client().clone();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        client.on_connection_state_change(move |status| s.lock().unwrap().push(status.clone()));

        app.run_until(async {}).await.unwrap();

        let seen = seen.lock().unwrap();
        let states: Vec<ConnectionState> = seen.iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            [
                ConnectionState::Disconnected,
                ConnectionState::Error,
                ConnectionState::Disconnected
            ]
        );
        assert_eq!(seen[1].error, Some(ConnectionError::NoCredential));
        assert!(!client.reconnect_pending());
    }

    #[tokio::test]
    async fn test_run_until_cleans_up_subscriptions() {
        let mut app = Application::new(config_without_token()).unwrap();
        app.run_until(async {}).await.unwrap();
        assert!(app.subscriptions.is_empty());
        assert!(app.observer.is_none());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let mut config = AppConfig::default();
        config.websocket.url = "http://example.com".to_string();
        assert!(Application::new(config).is_err());
    }
}
