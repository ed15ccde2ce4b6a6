//! HTTP adapter for a Mineflayer bridge server
//!
//! Endpoints: `POST /start` (reset), `POST /step` (run code), `POST /stop`.
//! Starting and supervising the bridge process itself is left to the
//! operator.

use async_trait::async_trait;
use kiln_core::config::EnvironmentSettings;
use kiln_core::ports::{Environment, EnvironmentFactory};
use kiln_core::{CodeUnit, KilnError, Observation, Position, ResetMode, ResetOptions, Result, Skill};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::observation::{BridgeEvent, ObservationBuilder};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    wait_ticks: u32,
    reset: ResetMode,
    inventory: &'a BTreeMap<String, u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
}

#[derive(Debug, Serialize)]
struct StepRequest {
    code: String,
    programs: String,
}

/// Environment backed by a Mineflayer bridge
pub struct MineflayerEnvironment {
    http: reqwest::Client,
    base_url: String,
    builder: ObservationBuilder,
    connected: bool,
}

impl MineflayerEnvironment {
    pub fn new(server_url: &str, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| KilnError::Environment(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: server_url.trim_end_matches('/').to_string(),
            builder: ObservationBuilder,
            connected: false,
        })
    }

    pub fn from_settings(settings: &EnvironmentSettings) -> Result<Self> {
        Self::new(
            &settings.server_url,
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    async fn post<B: Serialize + ?Sized>(&self, endpoint: &str, body: &B) -> Result<Vec<BridgeEvent>> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| KilnError::Environment(format!("{} failed: {}", endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(KilnError::Environment(format!(
                "{} returned {}: {}",
                endpoint, status, text
            )));
        }

        response.json().await.map_err(|e| {
            KilnError::Environment(format!("{} returned an unreadable body: {}", endpoint, e))
        })
    }
}

#[async_trait]
impl Environment for MineflayerEnvironment {
    async fn reset(&mut self, options: &ResetOptions) -> Result<Observation> {
        let request = StartRequest {
            port: options.mc_port,
            wait_ticks: options.wait_ticks,
            reset: options.mode,
            inventory: &options.inventory,
            position: options.position,
        };

        let events = self.post("/start", &request).await?;
        self.connected = true;
        info!("Environment reset ({:?})", options.mode);
        Ok(self.builder.build(&events))
    }

    async fn step(&mut self, unit: &CodeUnit, helpers: &[Skill]) -> Result<Observation> {
        if !self.connected {
            return Err(KilnError::EnvironmentNotReady(
                "step called before reset".to_string(),
            ));
        }

        let request = StepRequest {
            code: unit.program(),
            programs: helpers
                .iter()
                .map(|s| s.code.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        };

        let events = self.post("/step", &request).await?;
        Ok(self.builder.build(&events))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        let url = format!("{}/stop", self.base_url);
        match self.http.post(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Environment closed");
                Ok(())
            }
            Ok(response) => {
                warn!("Bridge refused stop: {}", response.status());
                Err(KilnError::Environment(format!(
                    "/stop returned {}",
                    response.status()
                )))
            }
            Err(e) => Err(KilnError::Environment(format!("/stop failed: {}", e))),
        }
    }
}

/// Creates a fresh bridge connection per agent run
pub struct MineflayerFactory {
    settings: EnvironmentSettings,
}

impl MineflayerFactory {
    pub fn new(settings: EnvironmentSettings) -> Self {
        Self { settings }
    }
}

impl EnvironmentFactory for MineflayerFactory {
    fn create(&self) -> Result<Box<dyn Environment>> {
        Ok(Box::new(MineflayerEnvironment::from_settings(&self.settings)?))
    }
}
