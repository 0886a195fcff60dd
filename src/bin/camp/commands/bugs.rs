//! Bug list command

use crate::client::{BugQuery, CampClient};
use crate::style::*;
use anyhow::Result;

pub async fn run(url: &str, query: BugQuery) -> Result<()> {
    print_header("Bug Reports");

    let client = CampClient::new(url);
    let bugs = client.list_bugs(&query).await?;

    if bugs.is_empty() {
        print_info("No bug reports match.");
        return Ok(());
    }

    println!();
    println!(
        "{:<10}  {:<8}  {:<18}  {:<16}  Title",
        "Date", "Severity", "Status", "Reporter"
    );
    println!("{}", "─".repeat(90));

    for bug in &bugs {
        println!(
            "{:<10}  {}  {}  {:<16}  {}",
            bug.created_at.format("%Y-%m-%d"),
            style_severity(bug.severity.as_str(), 8),
            style_status(bug.status.as_str(), 18),
            truncate(&bug.minecraft_ign, 16),
            truncate(&bug.title, 40)
        );
    }

    println!();
    println!("Total reports: {}", bugs.len());
    Ok(())
}
