//! Typed façade over the authenticating pipeline

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::pipeline::AuthPipeline;
use crate::token_store::{MemoryTokenStore, TokenStore};
use crate::transport::{HttpRequest, ReqwestTransport, Transport};
use crate::types::{
    now_millis, BusinessType, CreateOrderRequest, CreatedOrder, Merchant, MerchantsPage,
    OkResponse, Page, SendMessageRequest, SentMessage, TokenPair,
};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MERCHANTS_PATH: &str = "/catalog/merchants";
pub const SEARCH_PATH: &str = "/search";
pub const HEALTH_PATH: &str = "/health";
pub const ORDERS_PATH: &str = "/orders";
pub const CHATS_PATH: &str = "/chats";

/// Longest chat message the server accepts, in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Largest page size the catalog accepts
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Untyped rows (categories, products, orders, chats, messages)
pub type JsonPage = Page<serde_json::Value>;

/// Client for the Teztaom API
///
/// Login stores the issued tokens; every catalog call goes through
/// [`AuthPipeline`], which renews an expired access token transparently.
pub struct ApiClient<T = ReqwestTransport, S = MemoryTokenStore> {
    pipeline: AuthPipeline<T, S>,
}

impl ApiClient<ReqwestTransport, MemoryTokenStore> {
    /// Create a client over HTTP with an empty in-memory token store
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(MemoryTokenStore::new()))
    }
}

impl<S: TokenStore> ApiClient<ReqwestTransport, S> {
    /// Create a client over HTTP using a caller-provided token store
    pub fn with_store(config: &ClientConfig, store: Arc<S>) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config)?);
        Ok(Self::from_parts(transport, store))
    }
}

impl<T: Transport, S: TokenStore> ApiClient<T, S> {
    pub fn from_parts(transport: Arc<T>, store: Arc<S>) -> Self {
        Self {
            pipeline: AuthPipeline::new(transport, store),
        }
    }

    pub fn pipeline(&self) -> &AuthPipeline<T, S> {
        &self.pipeline
    }

    pub fn token_store(&self) -> &Arc<S> {
        self.pipeline.token_store()
    }

    /// Log in with a Telegram user id and store the issued tokens
    ///
    /// A login starts a new session: a refresh token left by a previous
    /// session is dropped when the service issues none.
    pub async fn login(&self, telegram_user_id: i64) -> Result<TokenPair> {
        let tokens = self.pipeline.auth_api().login(telegram_user_id).await?;
        let expiry = tokens.expiry_from(now_millis());
        let store = self.token_store();
        match tokens.rotated_refresh_token() {
            Some(refresh) => store.set_full(tokens.access_token.clone(), refresh.to_string(), expiry),
            None => {
                store.clear();
                store.set_access_only(tokens.access_token.clone(), expiry);
            }
        }
        Ok(tokens)
    }

    /// Revoke the stored refresh token and forget all credentials
    ///
    /// The store is cleared even when the revocation call fails.
    pub async fn logout(&self) -> Result<()> {
        let refresh_token = self.token_store().get().refresh_token;
        let result = match refresh_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => self
                .pipeline
                .auth_api()
                .logout(token)
                .await
                .map(|response| debug!(detail = %response.detail, "Logged out")),
            None => Ok(()),
        };
        self.token_store().clear();
        info!("Session closed");
        result
    }

    /// List merchants of one type; `cursor` of `None` requests the first page
    pub async fn list_merchants(
        &self,
        business_type: BusinessType,
        cursor: Option<&str>,
    ) -> Result<MerchantsPage> {
        self.list_merchants_page(business_type, cursor, None).await
    }

    /// List merchants with an explicit page size, clamped to `1..=100`
    pub async fn list_merchants_page(
        &self,
        business_type: BusinessType,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<MerchantsPage> {
        let request = paged(
            HttpRequest::get(MERCHANTS_PATH).query("type", business_type.as_str()),
            cursor,
            limit,
        );
        self.call_json(request).await
    }

    /// Follow `next_cursor` until the last page and collect every merchant
    pub async fn list_all_merchants(&self, business_type: BusinessType) -> Result<Vec<Merchant>> {
        let mut merchants = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.list_merchants(business_type, cursor.as_deref()).await?;
            merchants.extend(page.items);

            match page.next_cursor {
                Some(next) if seen.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    warn!(cursor = %next, "Server repeated a cursor, stopping pagination");
                    break;
                }
                None => break,
            }
        }

        debug!(count = merchants.len(), business_type = %business_type, "Fetched all merchants");
        Ok(merchants)
    }

    /// List the categories of one merchant
    pub async fn list_categories(&self, merchant_id: i64, cursor: Option<&str>) -> Result<JsonPage> {
        let request = paged(
            HttpRequest::get(format!("/catalog/{merchant_id}/categories")),
            cursor,
            None,
        );
        self.call_json(request).await
    }

    /// List the active products of a category within one merchant
    pub async fn list_category_items(
        &self,
        category_id: i64,
        merchant_id: i64,
        cursor: Option<&str>,
    ) -> Result<JsonPage> {
        let request = paged(
            HttpRequest::get(format!("/catalog/categories/{category_id}/items"))
                .query("merchant_id", merchant_id.to_string()),
            cursor,
            None,
        );
        self.call_json(request).await
    }

    /// Full-text product search across merchants of one type
    pub async fn search_products(
        &self,
        query: &str,
        business_type: BusinessType,
        cursor: Option<&str>,
    ) -> Result<JsonPage> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ClientError::Configuration(
                "search query must not be empty".to_string(),
            ));
        }
        let request = paged(
            HttpRequest::get(SEARCH_PATH)
                .query("q", query)
                .query("type", business_type.as_str()),
            cursor,
            None,
        );
        self.call_json(request).await
    }

    /// List the caller's orders, optionally filtered by status
    pub async fn list_orders(&self, status: Option<&str>, cursor: Option<&str>) -> Result<JsonPage> {
        let request = paged(
            HttpRequest::get(ORDERS_PATH).query_opt("status", status),
            cursor,
            None,
        );
        self.call_json(request).await
    }

    /// One order with its items, as `{"order": .., "items": [..]}`
    pub async fn get_order(&self, order_id: i64) -> Result<serde_json::Value> {
        self.call_json(HttpRequest::get(format!("{ORDERS_PATH}/{order_id}")))
            .await
    }

    /// Place an order; returns the new order id
    pub async fn create_order(&self, order: &CreateOrderRequest) -> Result<i64> {
        let request = HttpRequest::post(ORDERS_PATH).json(order)?;
        let created: CreatedOrder = self.call_json(request).await?;
        info!(order_id = created.order_id, shop_id = order.shop_id, "Order created");
        Ok(created.order_id)
    }

    /// List order chats that have at least one message
    pub async fn list_chats(&self, cursor: Option<&str>) -> Result<JsonPage> {
        self.call_json(paged(HttpRequest::get(CHATS_PATH), cursor, None))
            .await
    }

    pub async fn list_messages(&self, order_id: i64, cursor: Option<&str>) -> Result<JsonPage> {
        let request = paged(
            HttpRequest::get(format!("{CHATS_PATH}/{order_id}/messages")),
            cursor,
            None,
        );
        self.call_json(request).await
    }

    /// Post a chat message on an order; returns the new message id
    pub async fn send_message(&self, order_id: i64, text: &str) -> Result<i64> {
        let text = text.trim();
        if text.is_empty() || text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ClientError::Configuration(format!(
                "message text must be 1 to {MAX_MESSAGE_CHARS} characters"
            )));
        }
        let request = HttpRequest::post(format!("{CHATS_PATH}/{order_id}/messages")).json(
            &SendMessageRequest {
                text: text.to_string(),
            },
        )?;
        let sent: SentMessage = self.call_json(request).await?;
        Ok(sent.message_id)
    }

    pub async fn mark_chat_read(&self, order_id: i64) -> Result<bool> {
        let ack: OkResponse = self
            .call_json(HttpRequest::post(format!("{CHATS_PATH}/{order_id}/read")))
            .await?;
        Ok(ack.ok)
    }

    pub async fn health(&self) -> Result<bool> {
        let health: OkResponse = self.call_json(HttpRequest::get(HEALTH_PATH)).await?;
        Ok(health.ok)
    }

    /// Send through the pipeline and decode a successful JSON answer
    async fn call_json<R: DeserializeOwned>(&self, request: HttpRequest) -> Result<R> {
        let response = self.pipeline.send(request).await?;
        if response.is_unauthorized() {
            return Err(ClientError::Unauthorized);
        }
        if !response.is_success() {
            return Err(ClientError::Api {
                status: response.status.as_u16(),
                body: response.body,
            });
        }
        response.json()
    }
}

fn paged(request: HttpRequest, cursor: Option<&str>, limit: Option<u32>) -> HttpRequest {
    request
        .query_opt("cursor", cursor)
        .query_opt("limit", limit.map(|l| l.clamp(1, MAX_PAGE_LIMIT).to_string()))
}
