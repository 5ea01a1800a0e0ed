//! Simulation platform endpoints.
//!
//! Thin typed layer over [`QuotaAwareClient`] for the calls a worker makes:
//! authenticate, submit a simulation, poll its progress, delete it.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::quota_client::{ApiRequest, ClientConfig, QuotaAwareClient, RawResponse};
use crate::error::ClientError;

pub const ENDPOINT_AUTHENTICATION: &str = "authentication";
pub const ENDPOINT_SIMULATIONS: &str = "simulations";

/// Rate-limit bucket names.
pub mod api_names {
    pub const AUTHENTICATION: &str = "authentication";
    pub const SIMULATION_CREATE: &str = "simulations.create";
    pub const SIMULATION_PROGRESS: &str = "simulations.progress";
    pub const SIMULATION_DELETE: &str = "simulations.delete";
}

/// Handle returned by a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationHandle {
    pub progress_id: String,
    pub retry_after: Option<f64>,
}

/// Terminal payload of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    #[serde(default)]
    pub id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub alpha: Option<String>,
}

impl SimulationOutcome {
    pub const STATUS_COMPLETE: &'static str = "COMPLETE";

    pub fn is_complete(&self) -> bool {
        self.status.eq_ignore_ascii_case(Self::STATUS_COMPLETE)
    }
}

/// Result of a single progress poll.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationProgress {
    /// Still running; poll again after `retry_after` seconds.
    Running {
        progress: Option<f64>,
        retry_after: f64,
    },
    Finished(SimulationOutcome),
}

#[derive(Debug, Deserialize)]
struct ProgressBody {
    #[serde(default)]
    progress: Option<f64>,
}

/// Typed access to the simulation endpoints.
pub struct PlatformClient {
    inner: QuotaAwareClient,
}

impl PlatformClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            inner: QuotaAwareClient::new(config)?,
        })
    }

    pub fn from_client(inner: QuotaAwareClient) -> Self {
        Self { inner }
    }

    /// Underlying quota-aware client.
    pub fn client(&self) -> &QuotaAwareClient {
        &self.inner
    }

    pub fn has_credentials(&self) -> bool {
        self.inner.config().has_credentials()
    }

    /// Establishes a session with basic auth. The session cookie is kept by
    /// the client and sent with every later call.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::MissingCredentials` when none are configured, or the
    /// request error when sign-in is rejected.
    pub async fn authenticate(&self) -> Result<(), ClientError> {
        if !self.has_credentials() {
            return Err(ClientError::MissingCredentials);
        }

        let req = ApiRequest::post(ENDPOINT_AUTHENTICATION, api_names::AUTHENTICATION)
            .with_basic_auth()
            .with_retryable_status_codes(vec![429, 500, 502, 503, 504]);
        let outcome = self.inner.request_raw(&req).await?;
        info!(status = %outcome.result.status, "Authenticated with simulation platform");
        Ok(())
    }

    /// Submits a simulation. The platform answers `201 Created` with the
    /// progress URL in `Location`.
    pub async fn create_simulation(
        &self,
        payload: &serde_json::Value,
    ) -> Result<SimulationHandle, ClientError> {
        let req = ApiRequest::post(ENDPOINT_SIMULATIONS, api_names::SIMULATION_CREATE)
            .with_json(payload.clone());
        let outcome = self.inner.request_raw(&req).await?;
        let response = outcome.result;

        if response.status.as_u16() != 201 {
            return Err(ClientError::UnexpectedResponse(format!(
                "expected 201 Created from simulation submit, got {}",
                response.status
            )));
        }

        let progress_id = progress_id_from_location(&response)?;
        debug!(progress_id = %progress_id, retry_after = ?outcome.retry_after, "Simulation submitted");

        Ok(SimulationHandle {
            progress_id,
            retry_after: outcome.retry_after,
        })
    }

    /// Polls a simulation. A `Retry-After` header means it is still running;
    /// its absence means the body is the terminal payload.
    pub async fn get_progress(&self, progress_id: &str) -> Result<SimulationProgress, ClientError> {
        let req = ApiRequest::get(
            format!("{}/{}", ENDPOINT_SIMULATIONS, progress_id),
            api_names::SIMULATION_PROGRESS,
        );
        let outcome = self.inner.request_raw(&req).await?;

        match outcome.retry_after {
            Some(retry_after) => {
                let progress = outcome
                    .result
                    .json::<ProgressBody>()
                    .ok()
                    .and_then(|b| b.progress);
                Ok(SimulationProgress::Running {
                    progress,
                    retry_after,
                })
            }
            None => Ok(SimulationProgress::Finished(outcome.result.json()?)),
        }
    }

    /// Deletes a simulation on the platform.
    pub async fn delete_simulation(&self, progress_id: &str) -> Result<(), ClientError> {
        let req = ApiRequest::delete(
            format!("{}/{}", ENDPOINT_SIMULATIONS, progress_id),
            api_names::SIMULATION_DELETE,
        )
        .with_max_retries(0);
        self.inner.request_raw(&req).await?;
        Ok(())
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

fn progress_id_from_location(response: &RawResponse) -> Result<String, ClientError> {
    let location = response.header("location").ok_or_else(|| {
        ClientError::UnexpectedResponse("simulation submit returned no Location header".into())
    })?;

    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ClientError::UnexpectedResponse(format!("cannot parse progress id from {}", location))
        })
}
