//! Session coordinator: bearer attachment and single-flight refresh on 401
//!
//! Every request is sent with the current access token. When the server
//! answers `401 Unauthorized`, the request is resent once with a fresh access
//! token. All requests that fail together share one refresh call: the first
//! one starts it, the others await the same outcome. A request whose 401
//! arrives after another refresh already replaced the token it was sent with
//! is resent with the current token, without refreshing again.
//!
//! Login and logout start a new local session generation. A refresh that
//! started under an older generation finishes without touching the tokens.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use reqwest::{
    Method, Request, RequestBuilder, Response, StatusCode,
    header::{AUTHORIZATION, HeaderValue},
};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{ClientError, ClientResult},
    models::{LoginResponse, LogoutAllResponse, TokenPair},
    storage::RefreshTokenStorage,
};

/// Outcome of a refresh: the new access token, or `None` once the session is gone
type RefreshFlight = Shared<BoxFuture<'static, Option<String>>>;

#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    base_url: Url,
    session: RwLock<LocalSession>,
    in_flight: Mutex<Option<RefreshFlight>>,
    storage: Arc<dyn RefreshTokenStorage>,
}

#[derive(Default)]
struct LocalSession {
    /// Never persisted
    access_token: Option<String>,
    /// Bumped by every login and logout
    generation: u64,
}

impl SessionClient {
    pub fn new(base_url: &str, storage: Arc<dyn RefreshTokenStorage>) -> ClientResult<Self> {
        Self::with_http_client(reqwest::Client::new(), base_url, storage)
    }

    pub fn with_http_client(
        http: reqwest::Client,
        base_url: &str,
        storage: Arc<dyn RefreshTokenStorage>,
    ) -> ClientResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                session: RwLock::new(LocalSession::default()),
                in_flight: Mutex::new(None),
                storage,
            }),
        })
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.current_access_token()
    }

    /// True while a refresh token is stored
    pub fn has_session(&self) -> ClientResult<bool> {
        Ok(self.inner.storage.load()?.is_some())
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<LoginResponse> {
        let response = self
            .inner
            .http
            .post(self.inner.endpoint("login")?)
            .form(&[("email", email), ("password", password)])
            .send()
            .await?;
        let login: LoginResponse = read_json(response).await?;

        self.inner
            .begin_session(&login.tokens.access_token, &login.tokens.refresh_token)?;
        info!(user_id = %login.user.id, "Logged in");
        Ok(login)
    }

    /// Revoke the stored refresh token on the server and forget both tokens.
    /// Local state is cleared even when the server call fails.
    pub async fn logout(&self) -> ClientResult<()> {
        let refresh_token = self.inner.storage.load()?.ok_or(ClientError::NotLoggedIn)?;

        let sent = self
            .inner
            .http
            .post(self.inner.endpoint("logout")?)
            .form(&[("refresh_token", refresh_token.as_str())])
            .send()
            .await;
        self.inner.clear_tokens();

        let response = sent?;
        if !response.status().is_success() {
            return Err(ClientError::from_response(response).await);
        }
        info!("Logged out");
        Ok(())
    }

    /// End every session of the current user, this one included
    pub async fn logout_all(&self) -> ClientResult<u64> {
        let response = self.execute(self.post("logout-all")?).await?;
        let body: LogoutAllResponse = read_json(response).await?;
        self.inner.clear_tokens();

        info!(revoked = body.revoked, "Logged out of all sessions");
        Ok(body.revoked)
    }

    /// Drop both tokens without contacting the server
    pub fn end_session(&self) -> ClientResult<()> {
        Ok(self.inner.end_session()?)
    }

    pub fn request(&self, method: Method, path: &str) -> ClientResult<RequestBuilder> {
        Ok(self.inner.http.request(method, self.inner.endpoint(path)?))
    }

    pub fn get(&self, path: &str) -> ClientResult<RequestBuilder> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> ClientResult<RequestBuilder> {
        self.request(Method::POST, path)
    }

    /// GET `path` through the coordinator and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let response = self.execute(self.get(path)?).await?;
        read_json(response).await
    }

    /// Send with bearer credentials, refreshing and resending once on 401.
    ///
    /// A 401 that survives the refresh is returned as the response, not as an
    /// error. Requests whose body cannot be cloned are never resent.
    pub async fn execute(&self, request: RequestBuilder) -> ClientResult<Response> {
        let request = request.build()?;
        let retry = request.try_clone();

        let sent_with = self.inner.current_access_token();
        let response = self.send(request, sent_with.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(retry) = retry else {
            debug!("Request body cannot be replayed, returning 401");
            return Ok(response);
        };

        match self.token_after_unauthorized(sent_with).await {
            Some(token) => self.send(retry, Some(&token)).await,
            None => Ok(response),
        }
    }

    async fn send(&self, mut request: Request, token: Option<&str>) -> ClientResult<Response> {
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(self.inner.http.execute(request).await?)
    }

    /// Token to resend with after a 401 for a request sent with `sent_with`
    async fn token_after_unauthorized(&self, sent_with: Option<String>) -> Option<String> {
        let flight = {
            let mut slot = self.inner.in_flight.lock();

            let current = self.inner.current_access_token();
            if current.is_some() && current != sent_with {
                debug!("Access token replaced since the request was sent");
                return current;
            }

            match slot.as_ref() {
                Some(flight) => {
                    debug!("Joining refresh already in flight");
                    flight.clone()
                }
                None => {
                    debug!("Starting token refresh");
                    let flight = self.inner.start_refresh();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }
}

impl Inner {
    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn current_access_token(&self) -> Option<String> {
        self.session.read().access_token.clone()
    }

    /// Install a freshly logged-in session, superseding any refresh in flight
    fn begin_session(&self, access_token: &str, refresh_token: &str) -> std::io::Result<()> {
        let saved = {
            let mut session = self.session.write();
            session.generation += 1;
            session.access_token = None;
            let saved = self.storage.save(refresh_token);
            if saved.is_ok() {
                session.access_token = Some(access_token.to_string());
            }
            saved
        };
        self.in_flight.lock().take();
        saved
    }

    fn end_session(&self) -> std::io::Result<()> {
        let cleared = {
            let mut session = self.session.write();
            session.generation += 1;
            session.access_token = None;
            self.storage.clear()
        };
        self.in_flight.lock().take();
        cleared
    }

    fn clear_tokens(&self) {
        if let Err(e) = self.end_session() {
            warn!("Failed to clear stored refresh token: {}", e);
        }
    }

    /// The flight only holds a weak handle, so dropping every client while
    /// it is pending frees the client state and the flight with it
    fn start_refresh(self: &Arc<Self>) -> RefreshFlight {
        let inner = Arc::downgrade(self);
        let generation = self.session.read().generation;
        let http = self.http.clone();
        let storage = Arc::clone(&self.storage);
        let endpoint = self.endpoint("refresh");

        async move {
            let outcome = request_refresh(&http, storage.as_ref(), endpoint).await;
            let inner = Weak::upgrade(&inner)?;
            inner.finish_refresh(generation, outcome)
        }
        .boxed()
        .shared()
    }

    /// Apply a refresh outcome. Any failure ends the local session.
    fn finish_refresh(&self, generation: u64, outcome: ClientResult<TokenPair>) -> Option<String> {
        let token = {
            let mut session = self.session.write();
            if session.generation != generation {
                debug!("Session changed during refresh, discarding its outcome");
                return session.access_token.clone();
            }

            let stored = outcome.and_then(|pair| {
                self.storage.save(&pair.refresh_token)?;
                Ok(pair.access_token)
            });
            match stored {
                Ok(access_token) => {
                    debug!("Token refresh succeeded");
                    session.access_token = Some(access_token);
                }
                Err(ClientError::NotLoggedIn) => {
                    debug!("No refresh token stored");
                    session.access_token = None;
                }
                Err(e) => {
                    warn!("Token refresh failed: {}", e);
                    session.access_token = None;
                    if let Err(e) = self.storage.clear() {
                        warn!("Failed to clear stored refresh token: {}", e);
                    }
                }
            }
            session.access_token.clone()
        };

        self.in_flight.lock().take();
        token
    }
}

/// One refresh call with the stored refresh token
async fn request_refresh(
    http: &reqwest::Client,
    storage: &dyn RefreshTokenStorage,
    endpoint: ClientResult<Url>,
) -> ClientResult<TokenPair> {
    let refresh_token = storage.load()?.ok_or(ClientError::NotLoggedIn)?;
    let response = http
        .post(endpoint?)
        .form(&[("refresh_token", refresh_token.as_str())])
        .send()
        .await?;
    read_json(response).await
}

async fn read_json<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    if !response.status().is_success() {
        return Err(ClientError::from_response(response).await);
    }
    Ok(response.json().await?)
}
