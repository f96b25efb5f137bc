//! Portal authentication for Elektra
//!
//! This module decides between reusing the persisted session and running a
//! fresh login, and carries the pure-HTTP CAS login client. A failed or
//! skipped login never leaves a half-written session on disk; the store is
//! only updated after the login client returns a full cookie set.

use crate::error::{ElektraError, Result};
use crate::logging::get_logger;
use crate::session::{Cookie, Credentials, CredentialsProvider, SessionStore};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Browser-equivalent User-Agent sent on every portal request
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36";

/// PND application base URL
pub const PND_BASE_URL: &str = "https://pnd.cezdistribuce.cz/cezpnd2";

const CAS_LOGIN_URL: &str = "https://cas.cez.cz/cas/login";
const OAUTH2_AUTHORIZE_URL: &str = "https://cas.cez.cz/cas/oidc/authorize";
const CLIENT_ID: &str = "M7z7ZnPjX3FNMouD.onpremise.bp.pnd.prod";

/// Marker text the portal serves during a planned outage
const MAINTENANCE_MARKER: &str = "právě probíhá odstávka systému";

const MAX_REDIRECTS: usize = 10;

static EXECUTION_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<input[^>]*name=["']execution["'][^>]*value=["']([^"']*)["']"#)
        .unwrap_or_else(|e| panic!("invalid execution token pattern: {}", e))
});

/// Tokens usable for requests in the current cycle
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// Session cookies, read-only for the remainder of the cycle
    pub cookies: Vec<Cookie>,

    /// Whether login was skipped this cycle
    pub reused: bool,
}

/// Login collaborator: turns credentials into a portal cookie set
#[async_trait]
pub trait LoginClient: Send + Sync {
    /// Perform the login flow and return the resulting cookies
    async fn login(&self, credentials: &Credentials) -> Result<Vec<Cookie>>;
}

/// Decides reuse vs. re-login and keeps the session store current
pub struct AuthManager {
    provider: CredentialsProvider,
    store: SessionStore,
    login_client: Arc<dyn LoginClient>,
    logger: crate::logging::StructuredLogger,
}

impl AuthManager {
    /// Create a new manager over the given collaborators
    pub fn new(
        provider: CredentialsProvider,
        store: SessionStore,
        login_client: Arc<dyn LoginClient>,
    ) -> Self {
        Self {
            provider,
            store,
            login_client,
            logger: get_logger("auth"),
        }
    }

    /// Return a usable session, reusing the persisted one when still valid
    pub async fn ensure_session(&self) -> Result<AuthSession> {
        if let Some(state) = self.store.load() {
            if !self.store.is_expired(&state, Utc::now()) {
                self.logger.debug("Reusing persisted session");
                return Ok(AuthSession {
                    cookies: state.cookies,
                    reused: true,
                });
            }
        }
        self.login_and_persist().await
    }

    /// Re-login unconditionally, bypassing the persisted state
    ///
    /// Used after the server rejected the current tokens; re-reading the
    /// store would hand back the very cookies that were just refused.
    pub async fn refresh_session(&self) -> Result<AuthSession> {
        self.logger.info("Forcing re-authentication");
        self.login_and_persist().await
    }

    async fn login_and_persist(&self) -> Result<AuthSession> {
        let credentials = self.provider.get_credentials()?;
        let cookies = self.login_client.login(&credentials).await?;
        self.store.save(cookies.clone(), Utc::now())?;
        Ok(AuthSession {
            cookies,
            reused: false,
        })
    }
}

/// Pure-HTTP login client for the CAS OAuth2/OIDC flow
///
/// Walks the same sequence a browser does: fetch the CAS login page, post
/// the credential form with the page's `execution` token, then follow the
/// authorize redirect chain until the PND dashboard answers, collecting
/// cookies from every hop.
pub struct CasLoginClient {
    client: reqwest::Client,
    logger: crate::logging::StructuredLogger,
}

impl CasLoginClient {
    /// Create a new CAS login client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            logger: get_logger("auth"),
        })
    }

    fn service_url() -> String {
        format!("{}/login/oauth2/code/mepas-external", PND_BASE_URL)
    }

    /// Issue a request, following redirects manually and absorbing cookies
    async fn request(
        &self,
        jar: &mut Vec<Cookie>,
        method: reqwest::Method,
        url: &str,
        form: Option<&[(&str, &str)]>,
    ) -> Result<(reqwest::StatusCode, String)> {
        let mut url = reqwest::Url::parse(url)
            .map_err(|e| ElektraError::auth(format!("Invalid URL {}: {}", url, e)))?;
        let mut method = method;
        let mut form = form;

        for _ in 0..MAX_REDIRECTS {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT);
            if !jar.is_empty() {
                request = request.header(
                    reqwest::header::COOKIE,
                    crate::session::cookie_header(jar),
                );
            }
            if let Some(fields) = form {
                request = request.form(fields);
            }

            let response = request.send().await?;
            absorb_set_cookie_headers(jar, response.headers());

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                if let Some(location) = location {
                    url = url.join(&location).map_err(|e| {
                        ElektraError::auth(format!("Invalid redirect target: {}", e))
                    })?;
                    // Redirects are always re-issued as GET without the form body
                    method = reqwest::Method::GET;
                    form = None;
                    continue;
                }
            }

            let body = response.text().await?;
            return Ok((status, body));
        }

        Err(ElektraError::auth("Redirect chain did not terminate"))
    }

    fn extract_execution_token(html: &str) -> Result<String> {
        EXECUTION_TOKEN_RE
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                ElektraError::auth("Could not extract execution token from CAS login page")
            })
    }

    fn check_maintenance(body: &str) -> Result<()> {
        if body.to_lowercase().contains(MAINTENANCE_MARKER) {
            return Err(ElektraError::maintenance(
                "DIP/PND portal is in maintenance window",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LoginClient for CasLoginClient {
    async fn login(&self, credentials: &Credentials) -> Result<Vec<Cookie>> {
        let mut jar: Vec<Cookie> = Vec::new();

        self.logger
            .info(&format!("Starting CAS login for {}", credentials.email));

        // Step 1: CAS login page, extract the execution CSRF token
        let login_page_url = format!("{}?service={}", CAS_LOGIN_URL, Self::service_url());
        let (status, body) = self
            .request(&mut jar, reqwest::Method::GET, &login_page_url, None)
            .await?;
        Self::check_maintenance(&body)?;
        if !status.is_success() {
            return Err(ElektraError::auth(format!(
                "CAS login page returned HTTP {}",
                status
            )));
        }
        let execution = Self::extract_execution_token(&body)?;

        // Step 2: post credentials with the execution token
        let form = [
            ("username", credentials.email.as_str()),
            ("password", credentials.password.as_str()),
            ("execution", execution.as_str()),
            ("_eventId", "submit"),
        ];
        let (status, body) = self
            .request(&mut jar, reqwest::Method::POST, CAS_LOGIN_URL, Some(&form))
            .await?;
        Self::check_maintenance(&body)?;
        let lowered = body.to_lowercase();
        if lowered.contains("invalid credentials") || lowered.contains("přihlašovací údaje") {
            return Err(ElektraError::auth("Invalid credentials"));
        }
        if !status.is_success() {
            return Err(ElektraError::auth(format!(
                "CAS credential post returned HTTP {}",
                status
            )));
        }

        // Step 3: OAuth2/OIDC authorize chain sets the ticket-granting cookies
        let authorize_url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope=openid+profile",
            OAUTH2_AUTHORIZE_URL,
            CLIENT_ID,
            Self::service_url()
        );
        let (status, body) = self
            .request(&mut jar, reqwest::Method::GET, &authorize_url, None)
            .await?;
        Self::check_maintenance(&body)?;
        if !status.is_success() {
            return Err(ElektraError::auth(format!(
                "OAuth2 authorize returned HTTP {}",
                status
            )));
        }

        // Step 4: the dashboard view establishes the PND application session
        let dashboard_url = format!("{}/external/dashboard/view", PND_BASE_URL);
        let (status, _body) = self
            .request(&mut jar, reqwest::Method::GET, &dashboard_url, None)
            .await?;
        if !status.is_success() {
            return Err(ElektraError::auth(format!(
                "PND dashboard returned HTTP {}",
                status
            )));
        }

        if jar.is_empty() {
            return Err(ElektraError::auth("Login produced no session cookies"));
        }
        self.logger
            .info(&format!("Login successful, got {} cookies", jar.len()));
        Ok(jar)
    }
}

/// Merge `Set-Cookie` response headers into the jar, replacing by name
fn absorb_set_cookie_headers(jar: &mut Vec<Cookie>, headers: &reqwest::header::HeaderMap) {
    for value in headers.get_all(reqwest::header::SET_COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        let Some(cookie) = parse_set_cookie(raw) else {
            continue;
        };
        if let Some(existing) = jar.iter_mut().find(|c| c.name == cookie.name) {
            *existing = cookie;
        } else {
            jar.push(cookie);
        }
    }
}

/// Parse a single `Set-Cookie` header value into a `Cookie`
///
/// Only the name/value pair and the expiry attributes matter here; path and
/// domain scoping are irrelevant because every request targets the portal.
fn parse_set_cookie(raw: &str) -> Option<Cookie> {
    let mut parts = raw.split(';');
    let first = parts.next()?.trim();
    let (name, value) = first.split_once('=')?;
    if name.is_empty() {
        return None;
    }

    let mut expires: Option<f64> = None;
    for attr in parts {
        let attr = attr.trim();
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim().to_ascii_lowercase(), v.trim()),
            None => continue,
        };
        match key.as_str() {
            "max-age" => {
                if let Ok(secs) = val.parse::<i64>() {
                    expires = Some(Utc::now().timestamp() as f64 + secs as f64);
                }
            }
            "expires" => {
                if expires.is_none() {
                    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(val) {
                        expires = Some(dt.timestamp() as f64);
                    }
                }
            }
            _ => {}
        }
    }

    Some(Cookie {
        name: name.trim().to_string(),
        value: value.trim().to_string(),
        expires,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CezConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLoginClient {
        calls: AtomicUsize,
        result: fn() -> Result<Vec<Cookie>>,
    }

    impl FakeLoginClient {
        fn new(result: fn() -> Result<Vec<Cookie>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
            })
        }
    }

    #[async_trait]
    impl LoginClient for FakeLoginClient {
        async fn login(&self, _credentials: &Credentials) -> Result<Vec<Cookie>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn manager_with(
        dir: &tempfile::TempDir,
        login: Arc<FakeLoginClient>,
    ) -> (AuthManager, SessionStore) {
        let path = dir.path().join("session_state.json");
        let provider = CredentialsProvider::new(CezConfig {
            email: "user@example.com".to_string(),
            password: "secret".to_string(),
        });
        let manager = AuthManager::new(provider, SessionStore::new(&path, 6), login);
        (manager, SessionStore::new(&path, 6))
    }

    #[tokio::test]
    async fn ensure_session_reuses_valid_state() {
        let dir = tempfile::tempdir().unwrap();
        let login = FakeLoginClient::new(|| Ok(vec![Cookie::new("fresh", "1")]));
        let (manager, store) = manager_with(&dir, login.clone());

        store
            .save(vec![Cookie::new("JSESSIONID", "cached")], Utc::now())
            .unwrap();

        let session = manager.ensure_session().await.unwrap();
        assert!(session.reused);
        assert_eq!(session.cookies[0].name, "JSESSIONID");
        assert_eq!(login.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ensure_session_logs_in_when_expired() {
        let dir = tempfile::tempdir().unwrap();
        let login = FakeLoginClient::new(|| Ok(vec![Cookie::new("fresh", "1")]));
        let (manager, store) = manager_with(&dir, login.clone());

        let stale = Utc::now() - chrono::Duration::hours(7);
        store
            .save(vec![Cookie::new("JSESSIONID", "stale")], stale)
            .unwrap();

        let session = manager.ensure_session().await.unwrap();
        assert!(!session.reused);
        assert_eq!(session.cookies[0].name, "fresh");
        assert_eq!(login.calls.load(Ordering::SeqCst), 1);

        // The store was replaced wholesale
        let state = store.load().unwrap();
        assert_eq!(state.cookies[0].name, "fresh");
    }

    #[tokio::test]
    async fn refresh_session_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let login = FakeLoginClient::new(|| Ok(vec![Cookie::new("fresh", "1")]));
        let (manager, store) = manager_with(&dir, login.clone());

        store
            .save(vec![Cookie::new("JSESSIONID", "cached")], Utc::now())
            .unwrap();

        let session = manager.refresh_session().await.unwrap();
        assert!(!session.reused);
        assert_eq!(login.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn maintenance_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let login =
            FakeLoginClient::new(|| Err(ElektraError::maintenance("portal outage page")));
        let (manager, _store) = manager_with(&dir, login);

        let err = manager.ensure_session().await.unwrap_err();
        assert!(err.is_maintenance());
    }

    #[tokio::test]
    async fn missing_credentials_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let login = FakeLoginClient::new(|| Ok(Vec::new()));
        let path = dir.path().join("session_state.json");
        let provider =
            CredentialsProvider::with_env_prefix(CezConfig::default(), "ELEKTRA_TEST_AUTH");
        let manager = AuthManager::new(provider, SessionStore::new(&path, 6), login.clone());

        assert!(matches!(
            manager.ensure_session().await,
            Err(ElektraError::CredentialsMissing)
        ));
        assert_eq!(login.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn execution_token_extraction() {
        let html = r#"<form><input type="hidden" name="execution" value="e1s1-abc"/></form>"#;
        assert_eq!(
            CasLoginClient::extract_execution_token(html).unwrap(),
            "e1s1-abc"
        );
        assert!(CasLoginClient::extract_execution_token("<form></form>").is_err());
    }

    #[test]
    fn maintenance_marker_detection() {
        let body = "Omlouváme se, právě probíhá odstávka systému.";
        assert!(CasLoginClient::check_maintenance(body).unwrap_err().is_maintenance());
        assert!(CasLoginClient::check_maintenance("<html>login</html>").is_ok());
    }

    #[test]
    fn set_cookie_parsing() {
        let cookie = parse_set_cookie("JSESSIONID=abc123; Path=/; HttpOnly").unwrap();
        assert_eq!(cookie.name, "JSESSIONID");
        assert_eq!(cookie.value, "abc123");
        assert!(cookie.expires.is_none());

        let cookie = parse_set_cookie("TGC=xyz; Max-Age=3600; Secure").unwrap();
        let expiry = cookie.expires.unwrap();
        let expected = Utc::now().timestamp() as f64 + 3600.0;
        assert!((expiry - expected).abs() < 5.0);

        assert!(parse_set_cookie("garbage-without-pair").is_none());
    }

    #[test]
    fn set_cookie_replaces_by_name() {
        let mut jar = vec![Cookie::new("a", "old")];
        let mut headers = reqwest::header::HeaderMap::new();
        headers.append(
            reqwest::header::SET_COOKIE,
            reqwest::header::HeaderValue::from_static("a=new; Path=/"),
        );
        headers.append(
            reqwest::header::SET_COOKIE,
            reqwest::header::HeaderValue::from_static("b=2"),
        );
        absorb_set_cookie_headers(&mut jar, &headers);
        assert_eq!(jar.len(), 2);
        assert_eq!(jar[0].value, "new");
        assert_eq!(jar[1].name, "b");
    }
}
