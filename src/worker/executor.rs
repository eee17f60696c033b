use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;
use url::Url;

use crate::args::HttpMethod;
use crate::error::{AppError, AppResult, ValidationError, WorkerError};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

const USER_AGENT: &str = concat!("dirtysoap-worker/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed,
    Failed,
}

/// Executes a single iteration of the active run.
///
/// Implementations report transport and assertion problems as
/// [`IterationOutcome::Failed`]; the worker never aborts an assignment
/// because one iteration went wrong.
#[async_trait]
pub trait IterationExecutor: Send + Sync {
    async fn execute(&self, run_id: &str, index: u64) -> IterationOutcome;
}

/// One configured HTTP request per iteration.
///
/// `{{iteration}}` and `{{run_id}}` in the URL and body are replaced before
/// each request so SOAP envelopes can carry unique message ids.
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub expected_status: u16,
    pub timeout: Duration,
}

impl HttpRequestSpec {
    #[must_use]
    pub const fn new(url: String) -> Self {
        Self {
            url,
            method: HttpMethod::Post,
            headers: Vec::new(),
            body: None,
            expected_status: DEFAULT_EXPECTED_STATUS,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct HttpIterationExecutor {
    client: Client,
    spec: HttpRequestSpec,
}

impl HttpIterationExecutor {
    /// Builds the shared client and validates headers and URL up front.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid headers, an unparsable URL, or when the
    /// HTTP client cannot be built.
    pub fn new(spec: HttpRequestSpec) -> AppResult<Self> {
        let sample_url = render_template(&spec.url, &template_vars("run", 0));
        Url::parse(&sample_url).map_err(|err| {
            AppError::validation(ValidationError::InvalidTargetUrl {
                url: spec.url.clone(),
                source: err,
            })
        })?;

        let mut headers = HeaderMap::new();
        for (key, value) in &spec.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|err| {
                AppError::validation(ValidationError::InvalidHeaderName {
                    header: key.clone(),
                    source: err,
                })
            })?;
            let val = HeaderValue::from_str(value).map_err(|err| {
                AppError::validation(ValidationError::InvalidHeaderValue {
                    header: key.clone(),
                    source: err,
                })
            })?;
            headers.append(name, val);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(spec.timeout)
            .build()
            .map_err(|err| AppError::worker(WorkerError::HttpClient { source: err }))?;
        Ok(Self { client, spec })
    }
}

#[async_trait]
impl IterationExecutor for HttpIterationExecutor {
    async fn execute(&self, run_id: &str, index: u64) -> IterationOutcome {
        let vars = template_vars(run_id, index);
        let url = render_template(&self.spec.url, &vars);
        let mut request = match self.spec.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Patch => self.client.patch(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        if let Some(body) = self.spec.body.as_ref() {
            request = request.body(render_template(body, &vars));
        }

        match request.send().await {
            Ok(response) if response.status().as_u16() == self.spec.expected_status => {
                IterationOutcome::Completed
            }
            Ok(response) => {
                debug!(
                    "Iteration {} of {} returned status {}",
                    index,
                    run_id,
                    response.status()
                );
                IterationOutcome::Failed
            }
            Err(err) => {
                debug!("Iteration {} of {} failed: {}", index, run_id, err);
                IterationOutcome::Failed
            }
        }
    }
}

fn template_vars(run_id: &str, index: u64) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("iteration".to_owned(), index.to_string()),
        ("run_id".to_owned(), run_id.to_owned()),
    ])
}

/// Replaces `{{key}}` placeholders; unknown keys are kept verbatim.
pub(crate) fn render_template(input: &str, vars: &BTreeMap<String, String>) -> String {
    let mut rest = input;
    let mut output = String::with_capacity(input.len());

    loop {
        let Some(start) = rest.find("{{") else {
            output.push_str(rest);
            break;
        };
        let (before, after_start) = rest.split_at(start);
        output.push_str(before);
        let after = after_start.strip_prefix("{{").unwrap_or(after_start);
        let Some(end) = after.find("}}") else {
            output.push_str("{{");
            output.push_str(after);
            break;
        };
        let (key_part, after_end) = after.split_at(end);
        let key = key_part.trim();
        if let Some(value) = vars.get(key) {
            output.push_str(value);
        } else {
            output.push_str("{{");
            output.push_str(key);
            output.push_str("}}");
        }
        rest = after_end.strip_prefix("}}").unwrap_or(after_end);
    }
    output
}
