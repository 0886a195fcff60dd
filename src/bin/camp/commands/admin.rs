//! Admin bootstrap
//!
//! Creates the first administrator, or promotes an existing account, directly
//! in the configured database. The web API has no way to mint admins.

use anyhow::{bail, Result};
use camp_bug_hunter::models::NewUser;
use camp_bug_hunter::password::{hash_password, policy_violations};
use camp_bug_hunter::{open_storage, Config};
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub async fn bootstrap() -> Result<()> {
    println!();
    println!("{}", style("  Admin Bootstrap").cyan().bold());
    println!(
        "  {}",
        style("Create or promote a Camp Bug Hunter administrator").dim()
    );
    println!();

    let config = Config::load()?;
    let opening = spinner("Opening database...");
    let storage = open_storage(&config).await?;
    opening.finish_and_clear();
    println!(
        "  {} Connected to {} storage",
        style("✓").green(),
        style(storage.backend()).cyan()
    );
    println!();

    let theme = ColorfulTheme::default();
    let minecraft_username: String = Input::with_theme(&theme)
        .with_prompt("  Minecraft username")
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                return Err("Username cannot be empty");
            }
            Ok(())
        })
        .interact_text()?;
    let minecraft_username = minecraft_username.trim().to_string();

    if let Some(user) = storage.find_user(&minecraft_username).await? {
        if user.is_admin {
            println!(
                "  {} {} is already an administrator",
                style("✓").green(),
                style(&minecraft_username).cyan()
            );
            return Ok(());
        }

        let promote = Confirm::with_theme(&theme)
            .with_prompt(format!("  Promote existing account {}?", minecraft_username))
            .default(true)
            .interact()?;
        if !promote {
            println!("  {} Bootstrap cancelled", style("✗").red());
            return Ok(());
        }

        storage.set_admin(&minecraft_username, true).await?;
        println!(
            "  {} {} is now an administrator",
            style("✓").green(),
            style(&minecraft_username).cyan()
        );
        return Ok(());
    }

    let email: String = Input::with_theme(&theme)
        .with_prompt("  Email")
        .validate_with(|input: &String| -> Result<(), &str> {
            if !input.contains('@') {
                return Err("Enter a valid email address");
            }
            Ok(())
        })
        .interact_text()?;

    let password = Password::with_theme(&theme)
        .with_prompt("  Password")
        .with_confirmation("  Confirm password", "Passwords do not match")
        .interact()?;
    let violations = policy_violations(&password);
    if !violations.is_empty() {
        bail!("Password requirements not met: {}", violations.join(", "));
    }

    let creating = spinner("Creating administrator...");
    let password_hash = hash_password(&password)?;
    let user = storage
        .create_user(NewUser {
            email: email.trim().to_lowercase(),
            minecraft_username,
            password_hash,
            is_admin: true,
        })
        .await?;
    creating.finish_and_clear();

    println!(
        "  {} Created administrator {}",
        style("✓").green(),
        style(&user.minecraft_username).cyan()
    );
    if config.auth.session_secret.is_none() {
        println!(
            "  {} ADMIN_SESSION_SECRET is not set; admin logins will not get a session",
            style("⚠").yellow()
        );
    }
    Ok(())
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
