//! Current-user endpoint (/auth/me)

use anyhow::{Context, Result};

use super::client::DeskClient;
use crate::models::UserProfile;

/// Fetch the profile of the authenticated user (verifies auth works).
pub async fn whoami_data(client: &DeskClient) -> Result<UserProfile> {
    let resp = client.get("/auth/me").await?;
    resp.json().await.context("Failed to parse /auth/me response")
}

/// Fetch and display current user info.
pub async fn whoami() -> Result<()> {
    let client = DeskClient::new()?;
    let me = whoami_data(&client).await?;

    println!();
    println!("Display Name: {}", me.display_name);
    println!("Role:         {}", me.role.as_str());
    println!("ID:           {}", me.id);

    Ok(())
}
