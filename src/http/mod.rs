// Blocking HTTP requests with retry, shared by the embedding provider and the
// Milvus backend. Callers run these inside `spawn_blocking`.


use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("{service} rejected the request: HTTP {status}")]
    Rejected { service: &'static str, status: u16 },

    #[error("Non-retryable error from {service}: {message}")]
    NonRetryable {
        service: &'static str,
        message: String,
    },

    #[error("{service} unreachable after {attempts} attempts: {message}")]
    Exhausted {
        service: &'static str,
        attempts: u32,
        message: String,
    },
}

/// Run `request_fn` up to `attempts` times.
///
/// 5xx, 429 and transport failures are retried with exponential backoff
/// starting at one second. Any other failure returns immediately.
#[inline]
pub fn send_with_retry<F>(
    service: &'static str,
    attempts: u32,
    request_fn: F,
) -> Result<String, RequestError>
where
    F: FnMut() -> Result<String, ureq::Error>,
{
    send_with_backoff(service, attempts, BASE_RETRY_DELAY, request_fn)
}

pub(crate) fn send_with_backoff<F>(
    service: &'static str,
    attempts: u32,
    base_delay: Duration,
    mut request_fn: F,
) -> Result<String, RequestError>
where
    F: FnMut() -> Result<String, ureq::Error>,
{
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        debug!("{} request attempt {}/{}", service, attempt, attempts);

        match request_fn() {
            Ok(response_text) => {
                debug!("{} request succeeded on attempt {}", service, attempt);
                return Ok(response_text);
            }
            Err(error) => {
                match &error {
                    ureq::Error::StatusCode(status) if *status >= 500 || *status == 429 => {
                        warn!(
                            "{} returned status {}, attempt {}/{}",
                            service, status, attempt, attempts
                        );
                    }
                    ureq::Error::StatusCode(status) => {
                        warn!("{} client error (status {}), not retrying", service, status);
                        return Err(RequestError::Rejected {
                            service,
                            status: *status,
                        });
                    }
                    ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_) => {
                        warn!(
                            "Transport error from {}: {}, attempt {}/{}",
                            service, error, attempt, attempts
                        );
                    }
                    _ => {
                        return Err(RequestError::NonRetryable {
                            service,
                            message: error.to_string(),
                        });
                    }
                }

                last_error = Some(error);

                if attempt < attempts {
                    let delay = base_delay * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All retry attempts failed for {}", service);
    Err(RequestError::Exhausted {
        service,
        attempts,
        message: last_error.map_or_else(|| "no response".to_string(), |e| e.to_string()),
    })
}
