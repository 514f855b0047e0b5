//! Authentication against the support-desk backend
//!
//! The backend issues bearer JWTs from a plain credentials endpoint; the
//! token and the user profile travel together in the login response.

pub mod tokens;

pub use tokens::StoredToken;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::config::Config;
use crate::models::UserProfile;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    expires_in: Option<u64>,
    user: UserProfile,
}

/// Log in with email and password, storing the issued token and profile.
pub async fn login(server: Option<String>, email: &str, password: &str) -> Result<()> {
    let mut config = Config::load()?;

    if let Some(server) = server {
        config.server_url = Some(server.trim_end_matches('/').to_string());
    }
    let api_base = config.api_base()?;

    let url = format!("{}/auth/login", api_base);
    tracing::debug!("Login POST {}", url);

    let resp = reqwest::Client::new()
        .post(&url)
        .json(&serde_json::json!({ "email": email, "password": password }))
        .send()
        .await
        .context("Login request failed")?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!("Invalid credentials.");
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("Login failed: HTTP {} — {}", status.as_u16(), body);
    }

    let login: LoginResponse = resp.json().await.context("Failed to parse login response")?;

    config.set_access_token(login.token, login.expires_in);
    config.set_profile(login.user.clone());
    config.save()?;

    println!(
        "Logged in as {} ({})",
        login.user.display_name,
        login.user.role.as_str()
    );
    Ok(())
}

/// Clear stored credentials.
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_session();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Show current authentication status.
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    match config.server_url {
        Some(ref url) => println!("Server:  {}", url),
        None => println!("Server:  not configured"),
    }

    match config.get_access_token() {
        Some(token) if !token.is_expired() => {
            println!("Token:   valid");
            if let Some(exp) = token.expires_at {
                println!("  expires_at: {}", exp);
            }
        }
        Some(_) => {
            println!("Token:   expired (run 'desk-cli login')");
        }
        None => {
            println!("Token:   none");
        }
    }

    match config.get_profile() {
        Some(profile) => println!(
            "User:    {} (id={}, {})",
            profile.display_name,
            profile.id,
            profile.role.as_str()
        ),
        None => println!("User:    none"),
    }

    Ok(())
}
