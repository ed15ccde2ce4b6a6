//! Supervisor that owns the running control loop
//!
//! Only one loop runs at a time. Each start builds a fresh environment and
//! the environment is always closed before the loop is handed back, so a
//! restart never reuses a live environment.

use std::sync::Arc;

use kiln_core::ports::EnvironmentFactory;
use kiln_core::{KilnError, Result};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent_loop::{AgentLoop, LoopExit};
use crate::progress::ProgressChannel;

type LoopOutput = (AgentLoop, Result<LoopExit>);

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<LoopOutput>,
}

/// Starts, stops and restarts the agent loop
pub struct AgentSupervisor {
    factory: Arc<dyn EnvironmentFactory>,
    idle: Option<AgentLoop>,
    running: Option<RunningLoop>,
    progress: ProgressChannel,
}

impl AgentSupervisor {
    pub fn new(agent_loop: AgentLoop, factory: Arc<dyn EnvironmentFactory>) -> Self {
        let progress = agent_loop.progress().clone();
        Self {
            factory,
            idle: Some(agent_loop),
            running: None,
            progress,
        }
    }

    /// Channel the supervised loop publishes on
    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Spawn the loop with a fresh environment
    ///
    /// Starting while a loop is running does nothing.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("Agent loop already running, ignoring start");
            return Ok(());
        }
        // Collect a loop that finished on its own
        if self.running.is_some() {
            if let Err(e) = self.wait().await {
                warn!("Previous run ended with error: {}", e);
            }
        }

        let mut agent_loop = self
            .idle
            .take()
            .ok_or_else(|| KilnError::Other("agent loop is unavailable after a crash".to_string()))?;
        let mut env = match self.factory.create() {
            Ok(env) => env,
            Err(e) => {
                self.idle = Some(agent_loop);
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = agent_loop.run(env.as_mut(), &token).await;
            if let Err(e) = env.close().await {
                warn!("Failed to close environment: {}", e);
            }
            (agent_loop, result)
        });

        info!("Agent loop started");
        self.running = Some(RunningLoop { cancel, handle });
        Ok(())
    }

    /// Cancel the running loop and wait for it to release the environment
    ///
    /// Returns `None` when no loop was running.
    pub async fn stop(&mut self) -> Result<Option<LoopExit>> {
        let Some(running) = self.running.as_ref() else {
            return Ok(None);
        };
        running.cancel.cancel();
        self.wait().await.map(Some)
    }

    /// Stop then start with a fresh environment
    pub async fn restart(&mut self) -> Result<()> {
        if let Err(e) = self.stop().await {
            warn!("Run ended with error before restart: {}", e);
        }
        self.start().await
    }

    /// Wait for the running loop to end on its own
    ///
    /// Cancel-safe: dropping this future leaves the loop running.
    pub async fn wait(&mut self) -> Result<LoopExit> {
        let Some(running) = self.running.as_mut() else {
            return Err(KilnError::Other("agent loop is not running".to_string()));
        };
        let joined = (&mut running.handle).await;
        self.running = None;
        self.collect(joined)
    }

    fn collect(&mut self, joined: std::result::Result<LoopOutput, JoinError>) -> Result<LoopExit> {
        match joined {
            Ok((agent_loop, result)) => {
                self.idle = Some(agent_loop);
                match &result {
                    Ok(exit) => info!("Agent loop finished: {:?}", exit),
                    Err(e) => error!(stage = e.stage(), "Agent loop halted: {}", e),
                }
                result
            }
            Err(e) => {
                error!("Agent loop task failed: {}", e);
                Err(KilnError::Other(format!("agent loop task failed: {}", e)))
            }
        }
    }

    /// The idle loop, if no run is in progress
    pub fn agent_loop(&self) -> Option<&AgentLoop> {
        self.idle.as_ref()
    }
}
