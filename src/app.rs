//! Wiring from the command line configuration to the library crates.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::*;
use auth::expiry::{ExpiryMonitor, ExpirySettings};
use auth::fingerprint::{FingerprintGenerator, SystemSignals};
use auth::http::HttpClientConfig;
use auth::store::{FileSlot, SessionStore, FINGERPRINT_FILE};
use auth::{SessionManager, SessionSettings};
use live::backoff::BackoffPolicy;
use live::{EventStreamClient, StreamSettings};
use service::config::Config;

pub fn session_settings(config: &Config) -> SessionSettings {
    let mut settings = SessionSettings::new(config.base_url());
    settings.http = HttpClientConfig {
        timeout: config.request_timeout(),
        max_retries: config.http_max_retries,
        ..HttpClientConfig::default()
    };
    settings
}

pub fn expiry_settings(config: &Config) -> ExpirySettings {
    ExpirySettings {
        poll_interval: config.expiry_poll_interval(),
        warning_window: config.expiry_warning_window(),
    }
}

pub fn stream_settings(config: &Config) -> StreamSettings {
    StreamSettings {
        handshake_timeout: config.stream_handshake_timeout(),
        backoff: BackoffPolicy {
            initial: config.stream_initial_backoff(),
            max: config.stream_max_backoff(),
            max_retries: config.stream_max_retries,
        },
        ..StreamSettings::new(config.base_url())
    }
}

pub struct App {
    pub config: Config,
    pub manager: Arc<SessionManager>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.state_dir).with_context(|| {
            format!("Could not create state directory {}", config.state_dir.display())
        })?;

        if config.is_production() && !config.base_url().starts_with("https://") {
            warn!("Sending credentials to {} without TLS", config.base_url());
        }

        let fingerprint = FingerprintGenerator::new(
            Box::new(SystemSignals::default()),
            Box::new(FileSlot::new(config.state_dir.join(FINGERPRINT_FILE))),
        );
        let manager = SessionManager::new(
            session_settings(&config),
            SessionStore::on_disk(&config.state_dir),
            fingerprint,
        )
        .context("Could not build the HTTP client")?;

        Ok(Self {
            config,
            manager: Arc::new(manager),
        })
    }

    pub fn expiry_monitor(&self) -> ExpiryMonitor {
        ExpiryMonitor::new(self.manager.clone(), expiry_settings(&self.config))
    }

    pub fn event_stream(&self) -> EventStreamClient {
        EventStreamClient::with_sse(stream_settings(&self.config), self.manager.clone())
    }
}
