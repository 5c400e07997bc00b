//! Shared blocking HTTP plumbing for the fetchers.

use super::provider::DataError;
use crate::domain::Source;
use reqwest::blocking::Client;
use std::time::Duration;

/// Build a blocking client with a bounded per-request timeout.
pub fn build_client(timeout: Duration) -> Result<Client, DataError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("epfd/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DataError::NetworkUnreachable(format!("failed to build HTTP client: {e}")))
}

/// GET `url` and return the body, mapping transport and status failures.
pub(crate) fn get_text(
    client: &Client,
    feed: Source,
    url: &str,
    query: &[(&str, String)],
) -> Result<String, DataError> {
    let resp = client
        .get(url)
        .query(query)
        .send()
        .map_err(|e| DataError::NetworkUnreachable(format!("{feed}: {e}")))?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(DataError::AuthenticationRequired(format!(
            "{feed} rejected the request credentials"
        )));
    }
    if !status.is_success() {
        return Err(DataError::Http {
            feed,
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    resp.text()
        .map_err(|e| DataError::NetworkUnreachable(format!("{feed}: reading body: {e}")))
}
