use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone)]
pub(crate) struct HttpSettings {
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) attempts: usize,
    pub(crate) retry_delay: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(8),
            attempts: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl HttpSettings {
    pub(crate) fn single_attempt(&self) -> Self {
        Self {
            attempts: 1,
            ..self.clone()
        }
    }

    fn agent(&self) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout_connect(self.connect_timeout)
            .timeout_read(self.read_timeout)
            .timeout_write(self.read_timeout)
            .build()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub(crate) enum FetchError {
    #[error("HTTP status {status}{} after {attempts} attempt(s)", body_suffix(.body))]
    Status {
        status: u16,
        body: String,
        attempts: usize,
    },
    #[error("transport error after {attempts} attempt(s): {detail}")]
    Transport { detail: String, attempts: usize },
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" ({body})")
    }
}

impl FetchError {
    pub(crate) fn is_client_error(&self) -> bool {
        matches!(self, FetchError::Status { status, .. } if (400..500).contains(status) && !should_retry_http_status(*status))
    }
}

fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

fn truncated_body(response: ureq::Response) -> String {
    let body = response.into_string().ok().unwrap_or_default();
    body.trim().chars().take(240).collect()
}

fn with_retries<F>(settings: &HttpSettings, url: &str, mut call: F) -> Result<ureq::Response, FetchError>
where
    F: FnMut(&ureq::Agent) -> Result<ureq::Response, ureq::Error>,
{
    let attempts = settings.attempts.max(1);
    let agent = settings.agent();

    for attempt in 1..=attempts {
        match call(&agent) {
            Ok(response) => return Ok(response),
            Err(ureq::Error::Status(status, response)) => {
                let retryable = should_retry_http_status(status);
                if retryable && attempt < attempts {
                    debug!(url, status, attempt, "retrying HTTP request");
                    thread::sleep(settings.retry_delay);
                    continue;
                }
                return Err(FetchError::Status {
                    status,
                    body: truncated_body(response),
                    attempts: attempt,
                });
            }
            Err(ureq::Error::Transport(err)) => {
                if attempt < attempts {
                    debug!(url, attempt, error = %err, "retrying after transport error");
                    thread::sleep(settings.retry_delay);
                    continue;
                }
                return Err(FetchError::Transport {
                    detail: err.to_string(),
                    attempts: attempt,
                });
            }
        }
    }

    Err(FetchError::Transport {
        detail: "exhausted attempts without a concrete error".to_string(),
        attempts,
    })
}

pub(crate) fn get_text_with_retries(
    url: &str,
    referer: Option<&str>,
    query: &[(String, String)],
    settings: &HttpSettings,
) -> Result<String, FetchError> {
    let response = with_retries(settings, url, |agent| {
        let mut request = agent.get(url);
        if let Some(referer) = referer {
            request = request.set("Referer", referer);
        }
        for (key, value) in query {
            request = request.query(key, value);
        }
        request.call()
    })?;
    response
        .into_string()
        .map_err(|err| FetchError::Decode(err.to_string()))
}

pub(crate) fn head_with_retries(
    url: &str,
    referer: Option<&str>,
    settings: &HttpSettings,
) -> Result<Option<String>, FetchError> {
    let response = with_retries(settings, url, |agent| {
        let mut request = agent.head(url);
        if let Some(referer) = referer {
            request = request.set("Referer", referer);
        }
        request.call()
    })?;
    Ok(response.header("Content-Type").map(str::to_string))
}

pub(crate) fn post_json_with_retries(
    url: &str,
    bearer: Option<&str>,
    body: &str,
    settings: &HttpSettings,
) -> Result<(), FetchError> {
    with_retries(settings, url, |agent| {
        let mut request = agent.post(url).set("Content-Type", "application/json");
        if let Some(token) = bearer {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request.send_string(body)
    })?;
    Ok(())
}
