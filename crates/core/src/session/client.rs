//! Authenticated REST session against one console management server.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ClientConfig;
use crate::errors::SessionError;

/// Header carrying the session token on every authorized request.
pub const SESSION_HEADER: &str = "x-api-session";
/// Header carrying the anti-forgery token on mutating requests.
pub const XSRF_HEADER: &str = "X-XSRF-TOKEN";

const SESSION_COOKIE: &str = "x-api-session";
const XSRF_COOKIE: &str = "XSRF-TOKEN";
/// JSON fields some backends use to return the session token in the body.
const SESSION_BODY_FIELDS: &[&str] = &["x-api-session", "apiSession", "token"];

#[derive(Serialize)]
struct LogonRequest<'a> {
    userid: &'a str,
    password: &'a str,
}

/// Status and body of a completed request.
///
/// Non-success statuses are returned as values; only transport faults are
/// errors.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ---------------------------------------------------------------------------
// Transport settings
// ---------------------------------------------------------------------------

/// Transport settings used to open sessions.
#[derive(Debug, Clone)]
pub struct ApiClient {
    scheme: &'static str,
    api_prefix: String,
    accept_invalid_certs: bool,
    timeout: Option<Duration>,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            scheme: if config.use_tls { "https" } else { "http" },
            api_prefix: config.api_prefix.trim_end_matches('/').to_string(),
            accept_invalid_certs: config.accept_invalid_certs,
            timeout: config.request_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Root URL of the API on `host`, without a trailing slash.
    pub fn base_url(&self, host: &str) -> String {
        format!("{}://{}{}", self.scheme, host, self.api_prefix)
    }

    /// Seed cookies, log on and return an authenticated [`Session`].
    ///
    /// A logon that does not answer `200 OK` yields
    /// [`SessionError::AuthenticationFailed`]; the caller decides whether
    /// that ends the process.
    #[instrument(skip(self, password), fields(scheme = self.scheme))]
    pub async fn connect(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<Session, SessionError> {
        let mut session = self.open(host, user)?;

        let seed = session.get("/productinfo", "application/json").await?;
        debug!(status = seed.status_code(), "seed request completed");

        let logon = session
            .post("/viewerlogon", &LogonRequest { userid: user, password })
            .await?;
        if logon.status != StatusCode::OK {
            warn!(host, user, status = logon.status_code(), "logon rejected");
            return Err(SessionError::AuthenticationFailed {
                host: host.to_string(),
                user: user.to_string(),
                status: logon.status_code(),
            });
        }

        let logon_url = session.url("/viewerlogon")?;
        session.api_session = session
            .cookie(&logon_url, SESSION_COOKIE)
            .or_else(|| token_from_body(&logon.body));
        if session.api_session.is_none() {
            warn!(host, "logon succeeded but no session token was returned");
        }

        info!(host, user, "logon successful");
        Ok(session)
    }

    /// Build an unauthenticated session with its own cookie jar.
    pub(crate) fn open(&self, host: &str, user: &str) -> Result<Session, SessionError> {
        let jar = Arc::new(Jar::default());
        let mut builder = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .danger_accept_invalid_certs(self.accept_invalid_certs);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Session {
            host: host.to_string(),
            user: user.to_string(),
            base_url: self.base_url(host),
            http: builder.build()?,
            jar,
            api_session: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One authenticated connection to one server.
///
/// Each session owns its cookie jar; rotated CSRF cookies from any response
/// are picked up by the next mutating call. Sessions never share state, so
/// a source and a target session can be driven concurrently.
pub struct Session {
    host: String,
    user: String,
    base_url: String,
    http: reqwest::Client,
    jar: Arc<Jar>,
    api_session: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_session.is_some())
            .finish()
    }
}

impl Session {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn is_authenticated(&self) -> bool {
        self.api_session.is_some()
    }

    /// Authorized read with the given `Accept` type.
    pub async fn get(&self, path: &str, accept: &str) -> Result<ApiResponse, SessionError> {
        let url = self.url(path)?;
        let req = self.authorized(Method::GET, &url)?.header(ACCEPT, accept);
        self.execute(Method::GET, url, req).await
    }

    /// Authorized read of a zip payload.
    pub async fn get_zip(&self, path: &str) -> Result<ApiResponse, SessionError> {
        self.get(path, "application/zip").await
    }

    /// Authorized `POST` with a JSON body.
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse, SessionError> {
        let url = self.url(path)?;
        let payload = serde_json::to_vec(body)?;
        let req = self
            .authorized(Method::POST, &url)?
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);
        self.execute(Method::POST, url, req).await
    }

    /// Authorized `POST` without a body.
    pub async fn post_empty(&self, path: &str) -> Result<ApiResponse, SessionError> {
        let url = self.url(path)?;
        let req = self.authorized(Method::POST, &url)?;
        self.execute(Method::POST, url, req).await
    }

    /// Authorized `PUT` with a JSON body.
    pub async fn put<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse, SessionError> {
        let url = self.url(path)?;
        let payload = serde_json::to_vec(body)?;
        let req = self
            .authorized(Method::PUT, &url)?
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);
        self.execute(Method::PUT, url, req).await
    }

    /// Authorized `DELETE`.
    pub async fn delete(&self, path: &str) -> Result<ApiResponse, SessionError> {
        let url = self.url(path)?;
        let req = self.authorized(Method::DELETE, &url)?;
        self.execute(Method::DELETE, url, req).await
    }

    /// Upload `file` as multipart field `file` with an octet-stream type.
    ///
    /// An empty file is rejected before anything is sent.
    #[instrument(skip(self), fields(host = %self.host, file = %file.display()))]
    pub async fn post_binary(&self, path: &str, file: &Path) -> Result<ApiResponse, SessionError> {
        let size = tokio::fs::metadata(file).await?.len();
        if size == 0 {
            return Err(SessionError::EmptyUpload(file.to_path_buf()));
        }
        debug!(size, "uploading file");

        let data = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.zip".to_string());
        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        let url = self.url(path)?;
        let req = self.authorized(Method::POST, &url)?.multipart(form);
        self.execute(Method::POST, url, req).await
    }

    // -- internals --------------------------------------------------------

    fn url(&self, path: &str) -> Result<Url, SessionError> {
        let raw = format!("{}{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| SessionError::InvalidUrl {
            url: raw,
            detail: e.to_string(),
        })
    }

    /// Start a request carrying the session header, plus the current CSRF
    /// token for anything that is not a read.
    fn authorized(&self, method: Method, url: &Url) -> Result<RequestBuilder, SessionError> {
        let mut req = self.http.request(method.clone(), url.clone());
        if let Some(token) = &self.api_session {
            req = req.header(SESSION_HEADER, header_value(token)?);
        }
        if method != Method::GET {
            if let Some(xsrf) = self.cookie(url, XSRF_COOKIE) {
                req = req.header(XSRF_HEADER, header_value(&xsrf)?);
            }
        }
        Ok(req)
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        req: RequestBuilder,
    ) -> Result<ApiResponse, SessionError> {
        trace!(method = method.as_str(), url = url.as_str(), "sending request");
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?.to_vec();
        if status.is_success() {
            debug!(
                method = method.as_str(),
                url = url.as_str(),
                status = status.as_u16(),
                bytes = body.len(),
                "request completed"
            );
        } else {
            warn!(
                method = method.as_str(),
                "HTTP {} from {}",
                status.as_u16(),
                url
            );
            trace!(body = %String::from_utf8_lossy(&body), "error response body");
        }
        Ok(ApiResponse { status, body })
    }

    /// Current value of cookie `name` as it would be sent to `url`.
    fn cookie(&self, url: &Url, name: &str) -> Option<String> {
        let header = self.jar.cookies(url)?;
        find_cookie(header.to_str().ok()?, name)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, SessionError> {
    HeaderValue::from_str(value).map_err(|e| SessionError::InvalidHeader(e.to_string()))
}

/// Pick `name` out of a `Cookie:` header value (`a=1; b=2`).
fn find_cookie(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

/// Session token embedded in a JSON logon response, if any.
fn token_from_body(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    SESSION_BODY_FIELDS
        .iter()
        .find_map(|field| value.get(*field).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
