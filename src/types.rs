//! Type definitions for authentication and the catalog API

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tokens returned by login or refresh, with a relative expiry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    /// Absent when the auth service did not rotate the refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(rename = "expires_in")]
    pub expires_in_secs: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenPair {
    /// Absolute access-token expiry in unix millis, counted from `now_millis`
    pub fn expiry_from(&self, now_millis: i64) -> i64 {
        let lifetime = i64::try_from(self.expires_in_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        now_millis.saturating_add(lifetime)
    }

    /// The rotated refresh token, ignoring empty values
    pub fn rotated_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Snapshot of the stored credentials
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Unix millis; 0 when no access token is stored
    pub access_expiry_millis: i64,
}

impl TokenState {
    pub fn has_access_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Check if the access token is missing or past its expiry
    pub fn is_access_expired(&self, now_millis: i64) -> bool {
        !self.has_access_token() || now_millis >= self.access_expiry_millis
    }
}

/// Current wall clock in unix millis
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub telegram_user_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoutResponse {
    pub detail: String,
}

/// `{"ok": bool}` acknowledgement used by health checks and chat read markers
#[derive(Debug, Clone, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItemRequest {
    pub product_id: i64,
    pub quantity: u32,
}

/// New order for one shop; without `items` the server converts the client's cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateOrderRequest {
    pub shop_id: i64,
    pub comment: String,
    pub fulfillment_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OrderItemRequest>>,
}

impl CreateOrderRequest {
    /// Courier order built from the server-side cart
    pub fn from_cart(shop_id: i64) -> Self {
        Self {
            shop_id,
            comment: String::new(),
            fulfillment_type: "courier".to_string(),
            items: None,
        }
    }

    pub fn with_items(mut self, items: Vec<OrderItemRequest>) -> Self {
        self.items = Some(items);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedOrder {
    pub order_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

/// Kind of merchant listed by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusinessType {
    Shop,
    Restaurant,
}

impl BusinessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessType::Shop => "shop",
            BusinessType::Restaurant => "restaurant",
        }
    }
}

impl fmt::Display for BusinessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Merchant {
    pub id: i64,
    pub name: String,
    pub business_type: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub is_active: i64,
}

impl Merchant {
    pub fn is_active(&self) -> bool {
        self.is_active != 0
    }
}

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque continuation marker; absent on the last page
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

pub type MerchantsPage = Page<Merchant>;
