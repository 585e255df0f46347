use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// `url` is where the body came from, after redirects.
    Page { code: u16, url: Url, body: String },
    /// The server kept answering with a non-200 status.
    Rejected { code: u16 },
    /// The last attempt could not complete at the transport level.
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub min_delay_ms: u64,
    pub domain_delay_ms: u64,
}

impl FetchPolicy {
    /// Pause after attempt `attempt` (1-based): linear backoff on the domain
    /// delay, never below the global floor.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.domain_delay_ms.saturating_mul(u64::from(attempt));
        Duration::from_millis(self.min_delay_ms.max(backoff))
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    policy: FetchPolicy,
}

impl Fetcher {
    pub fn new(policy: FetchPolicy) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(policy.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_millis(policy.timeout_ms))
            .build()?;
        Ok(Self { client, policy })
    }

    pub async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> FetchOutcome {
        let attempts = self.policy.max_retries.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return FetchOutcome::Cancelled;
            }
            let response = self.client.get(url.clone()).send().await;

            tokio::select! {
                _ = cancel.cancelled() => return FetchOutcome::Cancelled,
                _ = tokio::time::sleep(self.policy.delay_for(attempt)) => {}
            }

            let outcome = match response {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    let final_url = resp.url().clone();
                    match resp.text().await {
                        Ok(body) => return FetchOutcome::Page { code: 200, url: final_url, body },
                        Err(e) => FetchOutcome::Failed { error: e.to_string() },
                    }
                }
                Ok(resp) => FetchOutcome::Rejected { code: resp.status().as_u16() },
                Err(e) => FetchOutcome::Failed { error: e.to_string() },
            };
            debug!(url = %url, attempt, outcome = ?outcome, "fetch attempt failed");
            last = Some(outcome);
        }
        last.unwrap_or(FetchOutcome::Failed { error: "no attempt made".to_string() })
    }
}
