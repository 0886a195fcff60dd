//! Poll command
//!
//! Stands in for the Minecraft plugin: claims pending reward commands and
//! prints them instead of dispatching them on a server console.

use std::time::Duration;

use crate::client::CampClient;
use crate::style::*;
use anyhow::Result;

pub async fn run(url: &str, token: Option<&str>, watch: Option<u64>) -> Result<()> {
    let client = CampClient::new(url);

    let Some(every) = watch else {
        let count = poll_once(&client, token).await?;
        if count == 0 {
            print_info("No pending commands.");
        }
        return Ok(());
    };

    print_info(&format!(
        "Polling {} every {}s (Ctrl-C to stop)",
        url,
        every.max(1)
    ));
    let mut interval = tokio::time::interval(Duration::from_secs(every.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = poll_once(&client, token).await {
                    print_warning(&format!("{}", e));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                print_info("Stopped polling.");
                return Ok(());
            }
        }
    }
}

async fn poll_once(client: &CampClient, token: Option<&str>) -> Result<usize> {
    let commands = client.poll_commands(token).await?;
    for command in &commands {
        println!(
            "{} {} {}",
            style_green("→"),
            command.command,
            style_dim(&format!("({})", command.id))
        );
    }
    Ok(commands.len())
}
