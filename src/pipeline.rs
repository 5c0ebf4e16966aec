//! Authenticating request pipeline
//!
//! Attaches the stored access token to outgoing requests and, when the API
//! answers `401 Unauthorized`, renews the token once through the refresh
//! endpoint and replays the request with the new credential.
//!
//! Each request carries an explicit chain length: the original attempt is 1
//! and a replay is 2. A `401` on a chain of length 2 or more is returned as
//! final, which bounds every request to at most one refresh and one replay
//! even when the server keeps rejecting freshly issued tokens.

use crate::auth_client::AuthApi;
use crate::error::Result;
use crate::token_store::TokenStore;
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::{now_millis, TokenPair};
use async_singleflight::Group;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Chain length at which a `401` is no longer retried
pub const MAX_CHAIN_LENGTH: u32 = 2;

/// Request pipeline with transparent token refresh
pub struct AuthPipeline<T, S> {
    transport: Arc<T>,
    store: Arc<S>,
    auth: AuthApi<T>,
    /// Singleflight group keyed by refresh token, so concurrent `401`s presenting
    /// the same refresh token share one refresh call and one store write.
    /// Error type is String because singleflight requires a cloneable error
    refresh_singleflight: Group<TokenPair, String>,
}

impl<T: Transport, S: TokenStore> AuthPipeline<T, S> {
    /// Create a pipeline; the refresh client shares the transport but never authenticates
    pub fn new(transport: Arc<T>, store: Arc<S>) -> Self {
        let auth = AuthApi::new(Arc::clone(&transport));
        Self {
            transport,
            store,
            auth,
            refresh_singleflight: Group::new(),
        }
    }

    pub fn token_store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn auth_api(&self) -> &AuthApi<T> {
        &self.auth
    }

    /// Send a fresh request (chain length 1)
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.send_with_chain(request, 1).await
    }

    /// Send a request whose exchange already has `chain_len` attempts behind it
    ///
    /// Returns `Ok` for every HTTP status, including a final `401`. Transport
    /// failures of the request itself propagate unchanged and are not retried.
    pub async fn send_with_chain(
        &self,
        request: HttpRequest,
        chain_len: u32,
    ) -> Result<HttpResponse> {
        let request = match self.store.get().access_token {
            Some(token) if !token.is_empty() => request.with_bearer(&token),
            _ => request,
        };

        debug!(
            method = %request.method,
            path = %request.path,
            has_token = request.bearer_token().is_some(),
            chain_len,
            "Dispatching request"
        );
        let response = self.transport.execute(request.clone()).await?;

        if !response.is_unauthorized() {
            return Ok(response);
        }

        if chain_len >= MAX_CHAIN_LENGTH {
            warn!(path = %request.path, chain_len, "Unauthorized after retry, giving up");
            return Ok(response);
        }

        let refresh_token = match self.store.get().refresh_token {
            Some(token) if !token.is_empty() => token,
            _ => {
                debug!(path = %request.path, "Unauthorized and no refresh token stored");
                return Ok(response);
            }
        };

        let tokens = match self.refresh_shared(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(_) => return Ok(response),
        };

        let retry = request.with_bearer(&tokens.access_token);
        debug!(path = %retry.path, chain_len = chain_len + 1, "Replaying request with refreshed token");
        self.transport.execute(retry).await
    }

    async fn refresh_shared(&self, refresh_token: &str) -> std::result::Result<TokenPair, String> {
        // (None, None) means the leader was dropped before finishing
        for _ in 0..2 {
            let (success_opt, error_opt, shared) = self
                .refresh_singleflight
                .work(refresh_token, self.refresh_and_store(refresh_token))
                .await;

            if shared {
                debug!("Joined an in-flight token refresh");
            }

            match (success_opt, error_opt) {
                (Some(tokens), _) => return Ok(tokens),
                (None, Some(err_str)) => return Err(err_str),
                (None, None) => debug!("Token refresh leader was cancelled, refreshing again"),
            }
        }

        Err("Token refresh abandoned".to_string())
    }

    /// Leader side of a refresh; the store is written once per refresh
    async fn refresh_and_store(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<TokenPair, String> {
        match self.auth.refresh(refresh_token).await {
            Ok(tokens) => {
                self.store_refreshed(&tokens);
                Ok(tokens)
            }
            Err(e) => {
                let err_msg = e.to_string();
                // Another request may already have rotated the refresh token; its
                // fresh credentials stay in place.
                if self.store.get().refresh_token.as_deref() == Some(refresh_token) {
                    warn!(error = %err_msg, "Token refresh failed, clearing stored tokens");
                    self.store.clear();
                } else {
                    warn!(error = %err_msg, "Token refresh failed for a superseded refresh token");
                }
                Err(err_msg)
            }
        }
    }

    fn store_refreshed(&self, tokens: &TokenPair) {
        let expiry = tokens.expiry_from(now_millis());
        match tokens.rotated_refresh_token() {
            Some(rotated) => {
                self.store
                    .set_full(tokens.access_token.clone(), rotated.to_string(), expiry);
                info!("Access and refresh tokens renewed");
            }
            None => {
                self.store.set_access_only(tokens.access_token.clone(), expiry);
                info!("Access token renewed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_client::REFRESH_PATH;
    use crate::error::ClientError;
    use crate::token_store::MemoryTokenStore;
    use crate::transport::mock::{json_response, MockTransport};
    use crate::types::TokenState;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::time::Duration;

    const MERCHANTS: &str = "/catalog/merchants";

    /// Protected endpoint accepting only `valid`; refresh endpoint answering `refresh`
    fn server(
        valid: &'static str,
        refresh: impl Fn() -> Result<HttpResponse> + Send + Sync + 'static,
    ) -> Arc<MockTransport> {
        Arc::new(MockTransport::new(move |req| {
            if req.path == REFRESH_PATH {
                return refresh();
            }
            if req.bearer_token() == Some(valid) {
                json_response(StatusCode::OK, json!({"items": [], "next_cursor": null}))
            } else {
                json_response(StatusCode::UNAUTHORIZED, json!({"detail": "bad token"}))
            }
        }))
    }

    fn refresh_ok(
        access: &'static str,
        refresh: Option<&'static str>,
    ) -> impl Fn() -> Result<HttpResponse> + Send + Sync + 'static {
        move || {
            json_response(
                StatusCode::OK,
                json!({"access_token": access, "refresh_token": refresh, "expires_in": 3600}),
            )
        }
    }

    fn refresh_never_called() -> Result<HttpResponse> {
        panic!("refresh must not be called")
    }

    fn store_with(access: Option<&str>, refresh: Option<&str>) -> Arc<MemoryTokenStore> {
        Arc::new(MemoryTokenStore::with_state(TokenState {
            access_token: access.map(str::to_string),
            refresh_token: refresh.map(str::to_string),
            access_expiry_millis: if access.is_some() { 1_000 } else { 0 },
        }))
    }

    #[tokio::test]
    async fn test_valid_token_single_dispatch() {
        let transport = server("A1", refresh_never_called);
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(Arc::clone(&transport), Arc::clone(&store));

        let response = pipeline.send(HttpRequest::get(MERCHANTS)).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bearer_token(), Some("A1"));
    }

    #[tokio::test]
    async fn test_empty_store_without_refresh_token_returns_401() {
        let transport = server("A1", refresh_never_called);
        let store = store_with(None, None);
        let pipeline = AuthPipeline::new(Arc::clone(&transport), Arc::clone(&store));

        let response = pipeline.send(HttpRequest::get(MERCHANTS)).await.unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].header_value("authorization").is_none());
        assert_eq!(store.get(), TokenState::default());
    }

    #[tokio::test]
    async fn test_stale_token_refreshed_and_replayed() {
        let transport = server("A2", refresh_ok("A2", None));
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(Arc::clone(&transport), Arc::clone(&store));

        let before = now_millis();
        let response = pipeline.send(HttpRequest::get(MERCHANTS)).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let sent = transport.requests();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].bearer_token(), Some("A1"));
        assert_eq!(sent[1].path, REFRESH_PATH);
        assert!(sent[1].header_value("authorization").is_none());
        assert_eq!(sent[1].body, Some(json!({"refresh_token": "R1"})));
        assert_eq!(sent[2].bearer_token(), Some("A2"));

        let state = store.get();
        assert_eq!(state.access_token.as_deref(), Some("A2"));
        assert_eq!(state.refresh_token.as_deref(), Some("R1"));
        assert!(state.access_expiry_millis >= before + 3_600_000);
        assert!(state.access_expiry_millis <= now_millis() + 3_600_000);
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_stored() {
        let transport = server("A2", refresh_ok("A2", Some("R2")));
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(transport, Arc::clone(&store));

        pipeline.send(HttpRequest::get(MERCHANTS)).await.unwrap();

        let state = store.get();
        assert_eq!(state.access_token.as_deref(), Some("A2"));
        assert_eq!(state.refresh_token.as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_rejected_refresh_clears_store() {
        let transport = server("A2", || {
            json_response(StatusCode::UNAUTHORIZED, json!({"detail": "refresh token revoked"}))
        });
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(Arc::clone(&transport), Arc::clone(&store));

        let response = pipeline.send(HttpRequest::get(MERCHANTS)).await.unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body, json!({"detail": "bad token"}).to_string());
        assert_eq!(transport.requests_to(MERCHANTS).len(), 1);
        assert_eq!(store.get(), TokenState::default());
    }

    #[tokio::test]
    async fn test_refresh_transport_failure_clears_store() {
        let transport = server("A2", || Err(ClientError::transport("dns failure")));
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(Arc::clone(&transport), Arc::clone(&store));

        let response = pipeline.send(HttpRequest::get(MERCHANTS)).await.unwrap();

        assert!(response.is_unauthorized());
        assert_eq!(store.get(), TokenState::default());
    }

    #[tokio::test]
    async fn test_loop_guard_skips_refresh() {
        let transport = server("A2", refresh_never_called);
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(Arc::clone(&transport), Arc::clone(&store));

        let response = pipeline
            .send_with_chain(HttpRequest::get(MERCHANTS), MAX_CHAIN_LENGTH)
            .await
            .unwrap();

        assert!(response.is_unauthorized());
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(store.get().access_token.as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn test_persistent_401_refreshes_once() {
        // Server rejects even the freshly issued token
        let transport = server("never", refresh_ok("A2", None));
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(Arc::clone(&transport), Arc::clone(&store));

        let response = pipeline.send(HttpRequest::get(MERCHANTS)).await.unwrap();

        assert!(response.is_unauthorized());
        assert_eq!(transport.requests_to(REFRESH_PATH).len(), 1);
        assert_eq!(transport.requests_to(MERCHANTS).len(), 2);
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let transport = Arc::new(MockTransport::new(|_| {
            json_response(StatusCode::FORBIDDEN, json!({"detail": "no access"}))
        }));
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(Arc::clone(&transport), store);

        let response = pipeline.send(HttpRequest::get("/orders/1")).await.unwrap();

        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_primary_transport_failure_propagates() {
        let transport = Arc::new(MockTransport::new(|_| {
            Err(ClientError::transport("connection reset"))
        }));
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(Arc::clone(&transport), Arc::clone(&store));

        let err = pipeline.send(HttpRequest::get(MERCHANTS)).await.unwrap_err();

        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(store.get().refresh_token.as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let transport = Arc::new(
            MockTransport::new(|req| {
                if req.path == REFRESH_PATH {
                    return json_response(
                        StatusCode::OK,
                        json!({"access_token": "A2", "expires_in": 3600}),
                    );
                }
                if req.bearer_token() == Some("A2") {
                    json_response(StatusCode::OK, json!({}))
                } else {
                    json_response(StatusCode::UNAUTHORIZED, json!({}))
                }
            })
            .with_delay(REFRESH_PATH, Duration::from_millis(50)),
        );
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(Arc::clone(&transport), store);

        let (first, second) = tokio::join!(
            pipeline.send(HttpRequest::get(MERCHANTS)),
            pipeline.send(HttpRequest::get("/catalog/1/categories")),
        );

        assert_eq!(first.unwrap().status, StatusCode::OK);
        assert_eq!(second.unwrap().status, StatusCode::OK);
        assert_eq!(transport.requests_to(REFRESH_PATH).len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_refresh_leader_does_not_fail_follower() {
        let transport = Arc::new(
            MockTransport::new(|req| {
                if req.path == REFRESH_PATH {
                    return json_response(
                        StatusCode::OK,
                        json!({"access_token": "A2", "expires_in": 3600}),
                    );
                }
                if req.bearer_token() == Some("A2") {
                    json_response(StatusCode::OK, json!({}))
                } else {
                    json_response(StatusCode::UNAUTHORIZED, json!({}))
                }
            })
            .with_delay(REFRESH_PATH, Duration::from_millis(100)),
        );
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(Arc::clone(&transport), Arc::clone(&store));

        let leader = tokio::time::timeout(
            Duration::from_millis(20),
            pipeline.send(HttpRequest::get(MERCHANTS)),
        );
        let follower = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            pipeline.send(HttpRequest::get("/catalog/1/categories")).await
        };
        let (leader, follower) = tokio::join!(leader, follower);

        assert!(leader.is_err(), "leader should have been cancelled");
        assert_eq!(follower.unwrap().status, StatusCode::OK);
        // The follower ran its own refresh after the leader was dropped
        assert_eq!(transport.requests_to(REFRESH_PATH).len(), 2);
        assert_eq!(store.get().access_token.as_deref(), Some("A2"));
        assert_eq!(store.get().refresh_token.as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_concurrently_rotated_tokens() {
        let store = store_with(Some("A1"), Some("R1"));
        let rotating_store = Arc::clone(&store);
        // Another request rotates to A2/R2 while this refresh with R1 is being rejected
        let transport = server("A2", move || {
            rotating_store.set_full("A2".to_string(), "R2".to_string(), i64::MAX);
            json_response(StatusCode::UNAUTHORIZED, json!({"detail": "refresh token rotated"}))
        });
        let pipeline = AuthPipeline::new(Arc::clone(&transport), Arc::clone(&store));

        let response = pipeline.send(HttpRequest::get(MERCHANTS)).await.unwrap();

        assert!(response.is_unauthorized());
        let state = store.get();
        assert_eq!(state.access_token.as_deref(), Some("A2"));
        assert_eq!(state.refresh_token.as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_post_body_survives_replay() {
        let transport = Arc::new(MockTransport::new(|req| {
            if req.path == REFRESH_PATH {
                return json_response(
                    StatusCode::OK,
                    json!({"access_token": "A2", "expires_in": 3600}),
                );
            }
            if req.bearer_token() == Some("A2") {
                json_response(StatusCode::OK, json!({"echo": req.body}))
            } else {
                json_response(StatusCode::UNAUTHORIZED, json!({}))
            }
        }));
        let store = store_with(Some("A1"), Some("R1"));
        let pipeline = AuthPipeline::new(Arc::clone(&transport), store);

        let request = HttpRequest::post("/orders")
            .json(&json!({"shop_id": 1}))
            .unwrap();
        let response = pipeline.send(request).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body, json!({"echo": {"shop_id": 1}}));

        let orders = transport.requests_to("/orders");
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].method, reqwest::Method::POST);
        assert_eq!(orders[0].body, orders[1].body);
        assert_eq!(orders[1].bearer_token(), Some("A2"));
    }
}
