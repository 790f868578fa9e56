//! Collaborators behind the engine's store traits.
//!
//! - [`gitlab::GitLabClient`]: destination store and identity directory.
//! - [`bugzilla::BugzillaClient`]: source tracker over the REST API.
//! - [`json_dir::JsonBugDirectory`]: source tracker over exported records.
//! - [`dry_run::DryRunStore`]: destination wrapper that only logs writes.

pub mod bugzilla;
pub mod dry_run;
pub mod gitlab;
pub mod json_dir;

use std::time::Duration;

use bugferry_core::store::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use tracing::debug;

pub const USER_AGENT: &str = concat!("bugferry/", env!("CARGO_PKG_VERSION"));

/// Attempts for idempotent reads, including the first.
pub const MAX_GET_ATTEMPTS: u32 = 3;

/// Statuses worth retrying a GET on.
const fn is_retryable(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

pub fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

/// Run a GET built by `request`, retrying throttled and server-side
/// failures with a doubling delay.
pub fn get_with_retry(
    url: &str,
    retry_delay: Duration,
    request: impl Fn() -> ureq::Request,
) -> StoreResult<ureq::Response> {
    let mut attempt = 1;
    loop {
        match request().call() {
            Ok(response) => return Ok(response),
            Err(ureq::Error::Status(status, _)) if is_retryable(status) && attempt < MAX_GET_ATTEMPTS => {
                let delay = retry_delay * 2_u32.pow(attempt - 1);
                debug!(url, status, attempt, ?delay, "retrying GET");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(http_error("GET", url, err)),
        }
    }
}

pub fn http_error(method: &'static str, url: &str, err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Status(status, response) => StoreError::Http {
            method,
            url: url.to_string(),
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => StoreError::Transport {
            method,
            url: url.to_string(),
            reason: transport.to_string(),
        },
    }
}

pub fn decode<T: DeserializeOwned>(url: &str, response: ureq::Response) -> StoreResult<T> {
    response.into_json::<T>().map_err(|err| StoreError::Decode {
        url: url.to_string(),
        reason: err.to_string(),
    })
}

/// `true` for a 404 from the remote.
pub const fn is_not_found(err: &StoreError) -> bool {
    matches!(err, StoreError::Http { status: 404, .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_only_throttling_and_server_errors() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable(status), "{status}");
        }
        for status in [400, 401, 403, 404, 409, 422] {
            assert!(!is_retryable(status), "{status}");
        }
    }

    #[test]
    fn not_found_is_only_404() {
        let missing = StoreError::Http {
            method: "GET",
            url: "/x".to_string(),
            status: 404,
            body: String::new(),
        };
        let forbidden = StoreError::Http {
            method: "GET",
            url: "/x".to_string(),
            status: 403,
            body: String::new(),
        };
        assert!(is_not_found(&missing));
        assert!(!is_not_found(&forbidden));
    }
}
