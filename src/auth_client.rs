//! Unauthenticated client for the auth service: login, refresh and logout
//!
//! Requests built here never carry an `Authorization` header, so a stale
//! access token can neither leak into nor mask a refresh failure.

use crate::error::{ClientError, Result};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::{LoginRequest, LogoutRequest, LogoutResponse, RefreshRequest, TokenPair};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Macro to check HTTP response status and return error if not successful
///
/// 4xx answers mean the service rejected the credentials or payload; anything
/// else unsuccessful is reported as a plain API failure.
macro_rules! check_response {
    ($response:expr, $operation:expr) => {
        if !$response.is_success() {
            let status = $response.status.as_u16();
            warn!(operation = $operation, status, "Auth service returned an error");
            if $response.status.is_client_error() {
                return Err(ClientError::AuthRejected {
                    status,
                    body: $response.body,
                });
            }
            return Err(ClientError::Api {
                status,
                body: $response.body,
            });
        }
    };
}

/// Client for the auth endpoints
///
/// Performs no retries; retry policy belongs to the caller.
pub struct AuthApi<T> {
    transport: Arc<T>,
}

impl<T> Clone for AuthApi<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> AuthApi<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Exchange a Telegram user id for a token pair
    pub async fn login(&self, telegram_user_id: i64) -> Result<TokenPair> {
        debug!(telegram_user_id, "Logging in");
        let request = HttpRequest::post(LOGIN_PATH).json(&LoginRequest { telegram_user_id })?;
        let tokens: TokenPair = self.call(request, "login").await?;
        info!(telegram_user_id, "Login successful");
        Ok(tokens)
    }

    /// Exchange a refresh token for a new access token (and possibly a rotated refresh token)
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        debug!("Refreshing access token");
        let request = HttpRequest::post(REFRESH_PATH).json(&RefreshRequest {
            refresh_token: refresh_token.to_string(),
        })?;
        let tokens: TokenPair = self.call(request, "refresh").await?;
        debug!(
            rotated = tokens.rotated_refresh_token().is_some(),
            expires_in_secs = tokens.expires_in_secs,
            "Refresh successful"
        );
        Ok(tokens)
    }

    /// Revoke a refresh token
    pub async fn logout(&self, refresh_token: &str) -> Result<LogoutResponse> {
        let request = HttpRequest::post(LOGOUT_PATH).json(&LogoutRequest {
            refresh_token: refresh_token.to_string(),
        })?;
        self.call(request, "logout").await
    }

    async fn call<R: DeserializeOwned>(&self, request: HttpRequest, operation: &str) -> Result<R> {
        let response: HttpResponse = self.transport.execute(request).await?;
        check_response!(response, operation);
        response.json()
    }
}
