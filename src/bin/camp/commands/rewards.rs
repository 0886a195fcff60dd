//! Rewards command

use crate::client::CampClient;
use crate::style::*;
use anyhow::Result;

pub async fn run(url: &str) -> Result<()> {
    print_header("Reward Shop");

    let client = CampClient::new(url);
    let rewards = client.list_rewards().await?;

    if rewards.is_empty() {
        print_info("No rewards available yet.");
        return Ok(());
    }

    println!();
    println!("{:>6}  {:<24}  {:>8}  Description", "Cost", "Reward", "Stock");
    println!("{}", "─".repeat(75));

    for reward in &rewards {
        let stock = match reward.stock {
            Some(0) => style_red(&format!("{:>8}", "sold out")),
            Some(left) => format!("{:>8}", left),
            None => style_dim(&format!("{:>8}", "∞")),
        };
        println!(
            "{}  {:<24}  {}  {}",
            style_yellow(&format!("{:>6}", reward.cost)),
            truncate(&reward.name, 24),
            stock,
            style_dim(&truncate(&reward.description, 40))
        );
    }

    println!();
    println!("Total rewards: {}", rewards.len());
    Ok(())
}
