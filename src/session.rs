//! Token state and response routing.
//!
//! [`Session::dispatch`] is the single place where replies are interpreted.
//! It is keyed by endpoint and status:
//!
//! | endpoint            | status   | outcome                                   |
//! |---------------------|----------|-------------------------------------------|
//! | protected           | 401      | refresh, ignore, or expire the session    |
//! | `/refresh`          | stale    | ignored                                   |
//! | `/refresh`          | 200      | store token, retry the failed request     |
//! | `/refresh`          | other    | clear tokens                              |
//! | any                 | non-2xx  | failure, logged with the server message   |
//! | `/login`            | 2xx      | store both tokens                         |
//! | `/upload`           | 2xx      | upload finished                           |

use crate::{
    Command, CrowError, Endpoint, LoginResponse, RefreshResponse, Reply, Request, Result,
    UploadRequest,
};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing,
}

/// Access and refresh tokens for one login, plus the refresh guard.
///
/// Tokens live only in memory; a new process starts logged out.
#[derive(Debug, Clone, Default)]
pub struct Session {
    access_token: String,
    refresh_token: String,
    refresh: RefreshState,
    /// Last protected command rejected with 401, re-sent after a refresh.
    pending: Option<Command>,
}

/// What a reply means for the caller.
#[derive(Debug, Clone)]
pub enum Outcome {
    LoggedIn,
    LoginFailed(String),
    Uploaded { body: String },
    /// Access token rejected; send this refresh request.
    Refresh(Request),
    /// Access token rejected while a refresh is already running.
    RefreshInFlight,
    /// New access token stored; re-send the failed request.
    Retry(Request),
    /// New access token stored, nothing to retry.
    Refreshed,
    /// Refresh reply for a session that has since been replaced; ignored.
    StaleRefresh,
    RefreshFailed(String),
    SessionExpired,
    Failed { error: String, body: String },
}

impl Outcome {
    /// The follow-up request the caller has to send, if any.
    pub fn next_request(&self) -> Option<Request> {
        match self {
            Outcome::Refresh(request) | Outcome::Retry(request) => Some(request.clone()),
            _ => None,
        }
    }

    /// Whether the outcome left the user without a usable session.
    pub fn requires_login(&self) -> bool {
        matches!(self, Outcome::RefreshFailed(_) | Outcome::SessionExpired)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::LoggedIn => write!(f, "Login Success! Tokens received."),
            Outcome::LoginFailed(reason) => write!(f, "Login failed: {reason}"),
            Outcome::Uploaded { .. } => write!(f, "Upload finished successfully!"),
            Outcome::Refresh(_) => write!(f, "Access Token expired (401). Trying Refresh..."),
            Outcome::RefreshInFlight => {
                write!(f, "Access Token expired (401). Refresh already in progress.")
            }
            Outcome::Retry(_) => {
                write!(f, "Token refreshed successfully. Retrying last action...")
            }
            Outcome::Refreshed => write!(f, "Token refreshed successfully."),
            Outcome::StaleRefresh => write!(f, "Ignoring refresh reply from an earlier login."),
            Outcome::RefreshFailed(reason) => {
                write!(f, "Refresh failed ({reason}). Please login again.")
            }
            Outcome::SessionExpired => write!(f, "Session expired. Please login again."),
            Outcome::Failed { error, body } => {
                write!(f, "Network Error: {error}")?;
                if !body.is_empty() {
                    write!(f, "\nServer Message: {body}")?;
                }
                Ok(())
            }
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session resumed from tokens obtained elsewhere.
    pub fn with_tokens(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            ..Self::default()
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.refresh
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh == RefreshState::Refreshing
    }

    pub fn can_upload(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn clear(&mut self) {
        self.access_token.clear();
        self.refresh_token.clear();
        self.refresh = RefreshState::Idle;
        self.pending = None;
    }

    /// Wraps a command in a request, attaching the access token when the
    /// endpoint needs one.
    pub fn authorize(&self, command: Command) -> Request {
        let bearer = command
            .endpoint()
            .is_protected()
            .then(|| self.access_token.clone());
        Request {
            command,
            bearer,
            retry: false,
        }
    }

    pub fn login(&self, username: impl Into<String>, password: impl Into<String>) -> Request {
        self.authorize(Command::Login {
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn upload(&self, upload: UploadRequest) -> Result<Request> {
        if !self.can_upload() {
            return Err(CrowError::NotAuthenticated);
        }
        // The current access token is already known to be rejected.
        if self.is_refreshing() {
            return Err(CrowError::RefreshInProgress);
        }
        Ok(self.authorize(Command::Upload(upload)))
    }

    pub fn dispatch(&mut self, reply: Reply) -> Outcome {
        let endpoint = reply.endpoint();
        match (endpoint, reply.status) {
            (e, Some(401)) if e.is_protected() => self.on_unauthorized(reply.request),
            (Endpoint::Refresh, _) => self.on_refresh_reply(&reply),
            _ if !reply.is_success() => {
                let error = reply.error.unwrap_or_else(|| "request failed".to_string());
                warn!(endpoint = endpoint.path(), %error, "request failed");
                Outcome::Failed {
                    error,
                    body: reply.body,
                }
            }
            (Endpoint::Login, _) => self.on_login_reply(&reply.body),
            (Endpoint::Upload, _) => {
                info!("upload finished");
                Outcome::Uploaded { body: reply.body }
            }
        }
    }

    fn on_unauthorized(&mut self, request: Request) -> Outcome {
        if request.retry {
            warn!("retried request rejected again, giving up");
            self.clear();
            return Outcome::SessionExpired;
        }

        self.pending = Some(request.command);

        if self.is_refreshing() {
            info!("refresh already in flight, not starting another");
            return Outcome::RefreshInFlight;
        }

        if self.refresh_token.is_empty() {
            warn!("access token rejected and no refresh token held");
            self.clear();
            return Outcome::SessionExpired;
        }

        info!("access token rejected, refreshing");
        match self.start_refresh() {
            Some(request) => Outcome::Refresh(request),
            None => Outcome::RefreshInFlight,
        }
    }

    /// Moves to `Refreshing` and returns the `/refresh` request to send.
    /// `None` while a refresh is already running or without a refresh token.
    pub fn start_refresh(&mut self) -> Option<Request> {
        if self.is_refreshing() || self.refresh_token.is_empty() {
            return None;
        }
        self.refresh = RefreshState::Refreshing;
        Some(self.authorize(Command::Refresh {
            refresh_token: self.refresh_token.clone(),
        }))
    }

    /// A refresh reply only counts while that refresh is still the one in
    /// flight for the current refresh token.
    fn is_current_refresh(&self, request: &Request) -> bool {
        self.is_refreshing()
            && matches!(
                &request.command,
                Command::Refresh { refresh_token } if *refresh_token == self.refresh_token
            )
    }

    fn on_refresh_reply(&mut self, reply: &Reply) -> Outcome {
        if !self.is_current_refresh(&reply.request) {
            info!("discarding refresh reply from a replaced session");
            return Outcome::StaleRefresh;
        }
        self.refresh = RefreshState::Idle;

        if reply.status != Some(200) {
            let reason = match (&reply.error, reply.status) {
                (Some(error), _) => error.clone(),
                (None, Some(status)) => format!("HTTP {status}"),
                (None, None) => "no response".to_string(),
            };
            warn!(%reason, "token refresh rejected");
            self.clear();
            return Outcome::RefreshFailed("Session invalid".to_string());
        }

        let token = match serde_json::from_str::<RefreshResponse>(&reply.body) {
            Ok(parsed) if !parsed.token.is_empty() => parsed.token,
            Ok(_) => {
                warn!("refresh response carried an empty token");
                self.clear();
                return Outcome::RefreshFailed("Empty token".to_string());
            }
            Err(e) => {
                warn!(error = %e, "malformed refresh response");
                self.clear();
                return Outcome::RefreshFailed("Invalid JSON response".to_string());
            }
        };

        self.access_token = token;
        info!("access token refreshed");

        match self.pending.take() {
            Some(command) => {
                let mut request = self.authorize(command);
                request.retry = true;
                Outcome::Retry(request)
            }
            None => Outcome::Refreshed,
        }
    }

    fn on_login_reply(&mut self, body: &str) -> Outcome {
        match serde_json::from_str::<LoginResponse>(body) {
            Ok(tokens) => {
                self.access_token = tokens.token;
                self.refresh_token = tokens.refresh_token;
                self.refresh = RefreshState::Idle;
                self.pending = None;
                info!("logged in");
                Outcome::LoggedIn
            }
            Err(e) => {
                warn!(error = %e, "malformed login response");
                Outcome::LoginFailed("Invalid JSON response.".to_string())
            }
        }
    }
}
