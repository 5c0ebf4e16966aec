//! Teztaom Rust Client
//!
//! A Rust client library for the Teztaom merchant catalog API, with bearer
//! token management and transparent refresh on `401 Unauthorized`.

pub mod api_client;
pub mod auth_client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod token_store;
pub mod transport;
pub mod types;

pub use api_client::ApiClient;
pub use auth_client::AuthApi;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use pipeline::AuthPipeline;
pub use token_store::{MemoryTokenStore, TokenStore};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use types::{
    BusinessType, CreateOrderRequest, Merchant, MerchantsPage, OrderItemRequest, Page, TokenPair,
    TokenState,
};
