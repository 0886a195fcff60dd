//! Camp Bug Hunter API client
//!
//! Thin reqwest wrapper over the JSON API used by the CLI commands.

use anyhow::{anyhow, Result};
use camp_bug_hunter::api::PLUGIN_TOKEN_HEADER;
use camp_bug_hunter::models::{Bug, PendingCommand, Reward};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct BalanceBody {
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct CommandsBody {
    commands: Vec<PendingCommand>,
}

/// Filters for `GET /api/bugs`
#[derive(Debug, Default)]
pub struct BugQuery {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub minecraft_ign: Option<String>,
}

pub struct CampClient {
    client: Client,
    base_url: String,
}

impl CampClient {
    pub fn new(base_url: &str) -> Self {
        // Fall back to the default client if the builder fails
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Turn a non-2xx response into an error carrying the server's message
    async fn failure(what: &str, resp: Response) -> anyhow::Error {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_else(|_| "Unknown error".into());
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        anyhow!("{} ({}): {}", what, status, message)
    }

    pub async fn list_rewards(&self) -> Result<Vec<Reward>> {
        let resp = self.client.get(self.url("/api/rewards")).send().await?;
        if !resp.status().is_success() {
            return Err(Self::failure("Failed to fetch rewards", resp).await);
        }
        Ok(resp.json().await?)
    }

    pub async fn balance(&self, minecraft_username: &str) -> Result<i64> {
        let resp = self
            .client
            .get(self.url("/api/rewards/balance"))
            .query(&[("minecraftUsername", minecraft_username)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::failure("Failed to fetch balance", resp).await);
        }
        let body: BalanceBody = resp.json().await?;
        Ok(body.balance)
    }

    pub async fn list_bugs(&self, query: &BugQuery) -> Result<Vec<Bug>> {
        let mut params = Vec::new();
        if let Some(status) = &query.status {
            params.push(("status", status.to_uppercase()));
        }
        if let Some(severity) = &query.severity {
            params.push(("severity", severity.to_uppercase()));
        }
        if let Some(owner) = &query.minecraft_ign {
            params.push(("minecraftIgn", owner.clone()));
        }

        let resp = self
            .client
            .get(self.url("/api/bugs"))
            .query(&params)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::failure("Failed to fetch bugs", resp).await);
        }
        Ok(resp.json().await?)
    }

    /// Claim pending reward commands the way the Minecraft plugin does
    pub async fn poll_commands(&self, plugin_token: Option<&str>) -> Result<Vec<PendingCommand>> {
        let mut request = self.client.get(self.url("/api/rewards/commands"));
        if let Some(token) = plugin_token {
            request = request.header(PLUGIN_TOKEN_HEADER, token);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(Self::failure("Failed to poll commands", resp).await);
        }
        let body: CommandsBody = resp.json().await?;
        Ok(body.commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = CampClient::new("http://localhost:3000/");
        assert_eq!(
            client.url("/api/rewards"),
            "http://localhost:3000/api/rewards"
        );
        assert_eq!(client.url("health"), "http://localhost:3000/health");
    }
}
