use std::time::Duration;

use ncmonitor_core::{
    endpoint_url, now_ms, parse_serverinfo, FailureKind, ParseError, PollResult, ServerConfig,
};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

/// Header carrying the serverinfo access token
pub const TOKEN_HEADER: &str = "NC-Token";

/// Longest response body excerpt kept in a failure message
const BODY_EXCERPT_LEN: usize = 200;

/// HTTP client for the serverinfo endpoint.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone, Default)]
pub struct MetricsClient {
    client: reqwest::Client,
}

impl MetricsClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// One authenticated GET against `server`.
    ///
    /// Never returns an error: every failure is folded into
    /// [`PollResult::Failed`] with a category. Does not retry.
    #[instrument(skip(self, server), fields(server = %server.name))]
    pub async fn fetch(&self, server: &ServerConfig, timeout: Duration) -> PollResult {
        let url = endpoint_url(&server.base_url);
        debug!("Fetching {}", url);

        match tokio::time::timeout(timeout, self.fetch_body(&url, &server.token, timeout)).await {
            Ok(Ok(body)) => match parse_serverinfo(&server.name, now_ms(), &body) {
                Ok(snapshot) => {
                    debug!("Fetched metrics");
                    PollResult::Ok(snapshot)
                }
                Err(e) => {
                    warn!("Unusable serverinfo response: {}", e);
                    PollResult::failed(parse_failure_kind(&e), e.to_string())
                }
            },
            Ok(Err((kind, message))) => {
                warn!("Fetch failed ({}): {}", kind, message);
                PollResult::failed(kind, message)
            }
            Err(_) => {
                warn!("Fetch timed out after {:?}", timeout);
                PollResult::failed(
                    FailureKind::Timeout,
                    format!("no response within {}s", timeout.as_secs_f32()),
                )
            }
        }
    }

    async fn fetch_body(
        &self,
        url: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<String, (FailureKind, String)> {
        let resp = self
            .client
            .get(url)
            .header(TOKEN_HEADER, token)
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| (transport_failure_kind(&e), e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(BODY_EXCERPT_LEN).collect();
            return Err((
                status_failure_kind(status),
                format!("HTTP {} {}", status, excerpt.trim()).trim_end().to_string(),
            ));
        }

        resp.text()
            .await
            .map_err(|e| (transport_failure_kind(&e), e.to_string()))
    }
}

fn status_failure_kind(status: StatusCode) -> FailureKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureKind::AuthRejected,
        other => FailureKind::UnexpectedStatus(other.as_u16()),
    }
}

fn transport_failure_kind(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_decode() {
        FailureKind::ResponseUnparseable
    } else {
        FailureKind::NetworkUnreachable
    }
}

fn parse_failure_kind(err: &ParseError) -> FailureKind {
    match err {
        ParseError::InvalidJson(_) | ParseError::MissingData => FailureKind::ResponseUnparseable,
        ParseError::ApiStatus { .. } if err.is_unauthorized() => FailureKind::AuthRejected,
        ParseError::ApiStatus { .. } => FailureKind::ApiStatus,
    }
}
