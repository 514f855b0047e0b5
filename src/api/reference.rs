//! Reference-data endpoints: departments, request types, priorities, users

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

use super::client::DeskClient;
use crate::models::User;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestType {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Priority {
    pub id: i64,
    pub name: String,
}

pub async fn list_departments_data(client: &DeskClient) -> Result<Vec<Department>> {
    let resp = client.get("/departments").await?;
    resp.json().await.context("Failed to parse departments")
}

pub async fn list_request_types_data(client: &DeskClient) -> Result<Vec<RequestType>> {
    let resp = client.get("/request-types").await?;
    resp.json().await.context("Failed to parse request types")
}

pub async fn list_priorities_data(client: &DeskClient) -> Result<Vec<Priority>> {
    let resp = client.get("/priorities").await?;
    resp.json().await.context("Failed to parse priorities")
}

pub async fn list_users_data(client: &DeskClient) -> Result<Vec<User>> {
    let resp = client.get("/users").await?;
    resp.json().await.context("Failed to parse users")
}

/// Map of user id to display name, for rendering presence and senders.
pub async fn user_names(client: &DeskClient) -> Result<HashMap<i64, String>> {
    let users = list_users_data(client).await?;
    Ok(users
        .into_iter()
        .map(|u| {
            let name = u.display_name.unwrap_or_else(|| format!("user {}", u.id));
            (u.id, name)
        })
        .collect())
}

/// List reference data (prints to stdout).
pub async fn list_reference() -> Result<()> {
    let client = DeskClient::new()?;

    let departments = list_departments_data(&client).await?;
    let types = list_request_types_data(&client).await?;
    let priorities = list_priorities_data(&client).await?;

    println!("\nDepartments:");
    for d in &departments {
        println!("  {:<4} {}", d.id, d.name);
    }

    println!("\nRequest Types:");
    for t in &types {
        println!("  {:<4} {}", t.id, t.name);
    }

    println!("\nPriorities:");
    for p in &priorities {
        println!("  {:<4} {}", p.id, p.name);
    }

    Ok(())
}
