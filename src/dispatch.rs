// src/dispatch.rs
use crate::error::TrellisError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use trellis_core::{ProcessingError, RequestEnvironment, TreeProcessor};
use trellis_executor::ExecutorImpl;
use trellis_traits::Executor;

/// One request to dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub uri: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub internal: bool,
}

impl RequestSpec {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Marks the request as issued by the processor itself, which lets it
    /// reach internal-only pipelines.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    fn environment(&self) -> RequestEnvironment {
        let env = self
            .parameters
            .iter()
            .fold(RequestEnvironment::new(self.uri.as_str()), |env, (name, value)| {
                env.with_parameter(name.as_str(), value.as_str())
            });
        if self.internal { env.internal() } else { env }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Ok,
    Redirect,
    NoMatch,
    NotFound,
    Error,
}

/// What became of one request.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub uri: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub body_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_micros: u128,
}

impl Outcome {
    fn new(uri: &str, status: Status) -> Self {
        Self {
            uri: uri.to_string(),
            status,
            content_type: None,
            body: Vec::new(),
            body_length: 0,
            redirect: None,
            error: None,
            elapsed_micros: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Status::Ok | Status::Redirect)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends requests through one tree processor.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    processor: Arc<TreeProcessor>,
    executor: ExecutorImpl,
}

impl Dispatcher {
    pub fn new(processor: Arc<TreeProcessor>, executor: ExecutorImpl) -> Self {
        Self { processor, executor }
    }

    pub fn processor(&self) -> &Arc<TreeProcessor> {
        &self.processor
    }

    pub fn executor(&self) -> &ExecutorImpl {
        &self.executor
    }

    /// Processes one request in full.
    pub fn dispatch(&self, request: &RequestSpec) -> Outcome {
        dispatch_one(&self.processor, request)
    }

    /// Processes a batch with the configured executor. Outcomes come back in
    /// request order.
    pub fn dispatch_all(&self, requests: Vec<RequestSpec>) -> Vec<Outcome> {
        log::info!(
            "Dispatching {} requests with {} (parallelism {})",
            requests.len(),
            self.executor.name(),
            self.executor.parallelism()
        );
        let processor = Arc::clone(&self.processor);
        self.executor
            .execute_all(requests, move |request| dispatch_one(&processor, &request))
    }

    /// Assembles the pipeline a request would run and describes it, without
    /// running it. `None` when nothing matches.
    pub fn describe_pipeline(&self, request: &RequestSpec) -> Result<Option<String>, TrellisError> {
        let mut env = request.environment();
        let pipeline = self.processor.build_pipeline(&mut env)?;
        Ok(pipeline.map(|p| p.describe()))
    }

    /// Releases the processing tree once in-flight requests are done.
    pub fn dispose(&self) {
        self.processor.dispose();
    }
}

fn dispatch_one(processor: &TreeProcessor, request: &RequestSpec) -> Outcome {
    let start = Instant::now();
    let mut env = request.environment();
    let result = processor.process(&mut env);

    let mut outcome = match result {
        Ok(true) => {
            let redirect = env.redirection().map(|r| r.uri.clone());
            let mut outcome = Outcome::new(
                &request.uri,
                if redirect.is_some() { Status::Redirect } else { Status::Ok },
            );
            outcome.redirect = redirect;
            outcome.content_type = env.content_type().map(str::to_string);
            outcome.body = env.into_output();
            outcome.body_length = outcome.body.len();
            outcome
        }
        Ok(false) => Outcome::new(&request.uri, Status::NoMatch),
        Err(ProcessingError::NotFound { .. }) => Outcome::new(&request.uri, Status::NotFound),
        Err(e) => {
            log::warn!("Request '{}' failed: {e}", request.uri);
            let mut outcome = Outcome::new(&request.uri, Status::Error);
            outcome.error = Some(e.to_string());
            outcome
        }
    };
    outcome.elapsed_micros = start.elapsed().as_micros();
    outcome
}
