//! Client library for the Crow photo server.
//!
//! The server exposes three endpoints: `/login` and `/refresh` hand out JWT
//! access tokens, `/upload` accepts a single image as multipart form data
//! behind a bearer token. [`Session`] owns the tokens and decides what to do
//! with every [`Reply`]; [`CrowClient`] only moves bytes.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub mod session;
pub mod settings;
pub mod upload;

pub use session::{Outcome, RefreshState, Session};
pub use settings::{Settings, DEFAULT_SERVER_URL};
pub use upload::{FormField, ProgressMeter, UploadProgress, UploadRequest};

// --- ERROR HANDLING ---

#[derive(Debug, thiserror::Error)]
pub enum CrowError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Token refresh in progress")]
    RefreshInProgress,

    #[error("No file selected")]
    NoFileSelected,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid server URL: {0:?}")]
    InvalidServerUrl(String),
}

pub type Result<T> = std::result::Result<T, CrowError>;

// --- WIRE MODELS ---

#[derive(Serialize, Debug)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize, Debug)]
struct RefreshBody<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Deserialize, Debug)]
pub(crate) struct LoginResponse {
    pub token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RefreshResponse {
    pub token: String,
}

// --- REQUESTS & REPLIES ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Login,
    Refresh,
    Upload,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Login => "/login",
            Endpoint::Refresh => "/refresh",
            Endpoint::Upload => "/upload",
        }
    }

    /// Endpoints that need a bearer token. A 401 from one of these starts a
    /// token refresh; a 401 from `/login` or `/refresh` never does.
    pub fn is_protected(&self) -> bool {
        matches!(self, Endpoint::Upload)
    }
}

/// An operation against the server, independent of credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { username: String, password: String },
    Refresh { refresh_token: String },
    Upload(UploadRequest),
}

impl Command {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Command::Login { .. } => Endpoint::Login,
            Command::Refresh { .. } => Endpoint::Refresh,
            Command::Upload(_) => Endpoint::Upload,
        }
    }
}

/// A command ready to send: bearer token attached by the [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub bearer: Option<String>,
    /// Set on the one re-issue that follows a successful refresh.
    pub retry: bool,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            bearer: None,
            retry: false,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.command.endpoint()
    }
}

/// What came back for a [`Request`]. `status` is `None` when no HTTP
/// response was received at all.
#[derive(Debug, Clone)]
pub struct Reply {
    pub request: Request,
    pub status: Option<u16>,
    pub body: String,
    pub error: Option<String>,
}

impl Reply {
    pub fn new(request: Request, status: u16, body: impl Into<String>) -> Self {
        let error = StatusCode::from_u16(status)
            .ok()
            .filter(|s| !s.is_success())
            .map(|s| format!("HTTP {s}"));
        Self {
            request,
            status: Some(status),
            body: body.into(),
            error,
        }
    }

    pub fn transport_error(request: Request, error: impl Into<String>) -> Self {
        Self {
            request,
            status: None,
            body: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.request.endpoint()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && matches!(self.status, Some(200..=299))
    }
}

// --- THE CLIENT ---

#[derive(Clone)]
pub struct CrowClient {
    client: Client,
    server_url: String,
}

impl CrowClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Some(std::time::Duration::from_secs(90)))
            .build()
            .unwrap_or_default();

        Self {
            client,
            server_url: server_url.into(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn set_server_url(&mut self, server_url: impl Into<String>) {
        self.server_url = server_url.into();
    }

    fn api_url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), endpoint.path())
    }

    /// Sends a request and wraps whatever comes back in a [`Reply`].
    ///
    /// Transport failures and HTTP error statuses are part of the reply; the
    /// `Err` side is reserved for local problems that stop the request from
    /// being sent, such as an upload file that cannot be opened.
    pub async fn send(&self, request: Request) -> Result<Reply> {
        self.send_with_progress(request, |_| {}).await
    }

    pub async fn send_with_progress<F>(&self, request: Request, on_progress: F) -> Result<Reply>
    where
        F: Fn(UploadProgress) + Send + Sync + 'static,
    {
        let endpoint = request.endpoint();
        let url = self.api_url(endpoint);

        let mut builder = match &request.command {
            Command::Login { username, password } => self
                .client
                .post(&url)
                .json(&LoginBody { username, password }),
            Command::Refresh { refresh_token } => {
                self.client.post(&url).json(&RefreshBody { refresh_token })
            }
            Command::Upload(upload) => {
                let form = upload.build_form(on_progress).await?;
                self.client.post(&url).multipart(form)
            }
        };
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        debug!(%url, retry = request.retry, "sending request");
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(%url, error = %e, "request failed");
                return Ok(Reply::transport_error(request, e.to_string()));
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(%url, status, error = %e, "failed to read response body");
                return Ok(Reply::transport_error(request, e.to_string()));
            }
        };
        debug!(%url, status, bytes = body.len(), "received response");
        Ok(Reply::new(request, status, body))
    }

    /// Sends `request` and keeps feeding replies through `session` until it
    /// settles: a 401 turns into a refresh, a successful refresh into the
    /// one retry. Returns the final outcome; every intermediate outcome is
    /// passed to `on_outcome` first.
    pub async fn execute<F, O>(
        &self,
        session: &mut Session,
        request: Request,
        on_progress: F,
        mut on_outcome: O,
    ) -> Result<Outcome>
    where
        F: Fn(UploadProgress) + Clone + Send + Sync + 'static,
        O: FnMut(&Outcome),
    {
        let mut next = request;
        loop {
            let reply = self.send_with_progress(next, on_progress.clone()).await?;
            let outcome = session.dispatch(reply);
            on_outcome(&outcome);
            match outcome.next_request() {
                Some(request) => next = request,
                None => return Ok(outcome),
            }
        }
    }
}
