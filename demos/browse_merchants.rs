//! Log in and page through the merchant catalog
//!
//! Usage:
//!   TEZTAOM_API_BASE_URL=http://localhost:8000 TELEGRAM_USER_ID=1 \
//!     cargo run --example browse_merchants

use teztaom_rs_client::{ApiClient, BusinessType, ClientConfig, TokenStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::from_env()?;
    let user_id: i64 = std::env::var("TELEGRAM_USER_ID")
        .unwrap_or_else(|_| "1".to_string())
        .parse()?;
    let business_type = match std::env::var("BUSINESS_TYPE").as_deref() {
        Ok("restaurant") => BusinessType::Restaurant,
        _ => BusinessType::Shop,
    };

    println!("=== Teztaom Client Example ===");
    println!("Endpoint: {}", config.base_url());
    println!("Telegram user: {user_id}");
    println!();

    let client = ApiClient::new(&config)?;

    if !client.health().await? {
        println!("! Server reports unhealthy state");
    }

    let tokens = client.login(user_id).await?;
    println!("✓ Logged in, access token valid for {}s", tokens.expires_in_secs);
    println!();

    let mut cursor: Option<String> = None;
    let mut page_no = 1;
    loop {
        let page = client
            .list_merchants_page(business_type, cursor.as_deref(), Some(10))
            .await?;
        println!("Page {page_no}:");
        for merchant in &page.items {
            println!(
                "  [{}] {} ({}){}",
                merchant.id,
                merchant.name,
                merchant.business_type,
                if merchant.is_active() { "" } else { " - inactive" }
            );
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
        page_no += 1;
    }
    println!();

    let state = client.token_store().get();
    println!(
        "Stored refresh token: {}",
        if state.refresh_token.is_some() { "yes" } else { "no" }
    );

    client.logout().await?;
    println!("✓ Logged out");

    Ok(())
}
