use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::Client;
use thiserror::Error;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::target::Target;

/// Status and timing of an attempt that got a response back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status_code: u16,
    pub elapsed: Duration,
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to create request: {0}")]
    RequestConstructionFailed(String),
    #[error("failed to perform request: {0}")]
    TransportFailed(String),
    #[error("request cancelled")]
    Cancelled,
}

/// One timed GET against a target.
pub trait Probe {
    fn probe(
        &self,
        target: &Target,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<ProbeResponse, ProbeError>> + Send;
}

/// [`Probe`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// Builds the client once; `timeout` caps each attempt at the transport level.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialised.
    pub fn new(timeout: Option<Duration>) -> Result<Self, Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl Probe for HttpProbe {
    async fn probe(
        &self,
        target: &Target,
        token: &CancellationToken,
    ) -> Result<ProbeResponse, ProbeError> {
        let request = self
            .client
            .get(target.url().clone())
            .build()
            .map_err(|e| ProbeError::RequestConstructionFailed(e.to_string()))?;

        let start = Instant::now();
        select! {
            biased;
            () = token.cancelled() => Err(ProbeError::Cancelled),
            result = self.client.execute(request) => {
                let elapsed = start.elapsed();
                // Only the headers matter; the body is released when `response` drops.
                let response = result.map_err(|e| ProbeError::TransportFailed(e.to_string()))?;
                Ok(ProbeResponse {
                    status_code: response.status().as_u16(),
                    elapsed,
                })
            }
        }
    }
}
