//! Balance command

use crate::client::CampClient;
use crate::style::*;
use anyhow::Result;

pub async fn run(url: &str, minecraft_username: &str) -> Result<()> {
    let client = CampClient::new(url);
    let balance = client.balance(minecraft_username).await?;

    print_success(&format!(
        "{} has {} reward coin{}",
        style_cyan(minecraft_username),
        style_bold(&balance.to_string()),
        if balance == 1 { "" } else { "s" }
    ));
    Ok(())
}
