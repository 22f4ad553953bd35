use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use shared::protocol::{CHECK_CYCLE_HEADER, SERVICE_INFO_PATH};
use shared::types::{ActivityState, ServiceRecord};
use crate::config::CheckerConfig;
use crate::registry::ServiceRegistry;

/// Why a probe counts as failed. Never leaves this module.
#[derive(Debug, Error)]
enum Unreachable {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("responded with status {0}")]
    Status(reqwest::StatusCode),
    #[error("responded without a service descriptor")]
    EmptyBody,
}

/// Data one checking cycle hands down into request construction.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
}

impl CheckContext {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            started_at: Utc::now(),
        }
    }
}

/// A fully built health request, waiting to be sent
pub struct Probe {
    pub service_id: String,
    request: reqwest::Request,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub active: usize,
    pub inactive: usize,
}

/// Whether a state last updated at `state.last_update` must be probed at `now`
pub fn is_due(state: &ActivityState, valid: Duration, now: DateTime<Utc>) -> bool {
    chrono::Duration::from_std(valid)
        .ok()
        .and_then(|valid| state.last_update.checked_add_signed(valid))
        .map(|expires| expires <= now)
        .unwrap_or(false)
}

pub struct AvailabilityChecker {
    registry: Arc<ServiceRegistry>,
    client: reqwest::Client,
    config: CheckerConfig,
}

impl AvailabilityChecker {
    pub fn new(registry: Arc<ServiceRegistry>, config: CheckerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("service-directoryd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build probe HTTP client")?;

        Ok(Self {
            registry,
            client,
            config,
        })
    }

    /// Selection phase: build a probe for every service whose state has expired.
    ///
    /// Runs synchronously on the scheduling task so everything `ctx` carries is
    /// baked into the requests before they are handed to workers. A service
    /// whose request cannot be built is marked inactive right away.
    pub fn prepare_probes(&self, ctx: &CheckContext) -> Vec<Probe> {
        let now = Utc::now();
        let valid = self.config.state_valid_duration();

        let due: Vec<ServiceRecord> = self
            .registry
            .stream_service_states()
            .filter(|(_, state)| is_due(state, valid, now))
            .map(|(service, _)| service)
            .collect();

        let mut probes = Vec::with_capacity(due.len());
        for service in due {
            match self.build_request(&service, ctx) {
                Ok(request) => probes.push(Probe {
                    service_id: service.id,
                    request,
                }),
                Err(e) => {
                    tracing::warn!(
                        service_id = %service.id,
                        service_url = %service.service_url,
                        "Cannot build availability probe: {}", e
                    );
                    self.registry.mark_inactive(&service.id);
                }
            }
        }

        probes
    }

    fn build_request(&self, service: &ServiceRecord, ctx: &CheckContext) -> reqwest::Result<reqwest::Request> {
        let url = format!("{}{}", service.service_url.trim_end_matches('/'), SERVICE_INFO_PATH);

        self.client
            .get(url)
            .timeout(self.config.probe_timeout())
            .header(reqwest::header::ACCEPT, "application/json")
            .header(CHECK_CYCLE_HEADER, ctx.cycle.to_string())
            .build()
    }

    /// Dispatch phase: send prepared probes concurrently and record each result
    pub async fn dispatch(&self, probes: Vec<Probe>) -> CycleOutcome {
        stream::iter(probes)
            .map(|probe| self.check(probe))
            .buffer_unordered(self.config.max_concurrent_probes)
            .fold(CycleOutcome::default(), |mut outcome, active| async move {
                if active {
                    outcome.active += 1;
                } else {
                    outcome.inactive += 1;
                }
                outcome
            })
            .await
    }

    async fn check(&self, probe: Probe) -> bool {
        let active = match self.send(probe.request).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(service_id = %probe.service_id, "Service unreachable: {}", e);
                false
            }
        };

        self.registry.set_active(&probe.service_id, active);
        active
    }

    async fn send(&self, request: reqwest::Request) -> Result<(), Unreachable> {
        let response = self.client.execute(request).await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(Unreachable::Status(status));
        }

        match response.json::<Option<ServiceRecord>>().await? {
            Some(_) => Ok(()),
            None => Err(Unreachable::EmptyBody),
        }
    }
}

/// Checking loop: one cycle per `checking_rate` tick until cancelled.
/// Dispatch runs detached, so a slow cycle never delays the next one.
pub async fn run(checker: Arc<AvailabilityChecker>, cancel: CancellationToken) -> Result<()> {
    let mut interval = tokio::time::interval(checker.config.checking_rate());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let tracker = TaskTracker::new();
    let mut cycle = 0u64;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                cycle += 1;
                let ctx = CheckContext::new(cycle);
                let probes = checker.prepare_probes(&ctx);
                if probes.is_empty() {
                    continue;
                }

                tracing::debug!(cycle, due = probes.len(), "Checking service availability");

                let dispatcher = checker.clone();
                tracker.spawn(async move {
                    let outcome = dispatcher.dispatch(probes).await;
                    tracing::debug!(
                        cycle = ctx.cycle,
                        active = outcome.active,
                        inactive = outcome.inactive,
                        elapsed_ms = (Utc::now() - ctx.started_at).num_milliseconds(),
                        "Availability check completed"
                    );
                });
            }
            _ = cancel.cancelled() => {
                tracing::info!("Availability checker shutting down");
                break;
            }
        }
    }

    tracker.close();
    tracker.wait().await;

    Ok(())
}
