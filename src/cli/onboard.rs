use crate::config::{Config, expand_home, parse_hhmm};
use crate::db::Database;
use anyhow::{Context, Result};
use dialoguer::{Confirm, Input, theme::ColorfulTheme};

pub fn run_onboarding() -> Result<Config> {
    println!("──────────────────────────────────────────");
    println!("  Welcome to Shelfmark onboarding.");
    println!("──────────────────────────────────────────");

    let theme = ColorfulTheme::default();
    let defaults = Config::default();

    println!("\n[1/4] Database location");
    let db_path_input: String = Input::with_theme(&theme)
        .with_prompt("  SQLite database file")
        .default(defaults.db_path.display().to_string())
        .interact_text()
        .context("Failed to read database path")?;
    let db_path = expand_home(db_path_input.trim());
    println!("  ✓ {}", db_path.display());

    println!("\n[2/4] API port");
    let api_port: u16 = Input::with_theme(&theme)
        .with_prompt("  Local port for the JSON API")
        .default(defaults.api_port)
        .interact_text()
        .context("Failed to read API port")?;
    println!("  ✓ http://127.0.0.1:{api_port}");

    println!("\n[3/4] Reader display name");
    println!("  Used in reading statistics for members without a profile.");
    let default_display_name: String = Input::with_theme(&theme)
        .with_prompt("  Placeholder display name")
        .default(defaults.default_display_name.clone())
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            if input.trim().is_empty() {
                Err("Display name must not be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()
        .context("Failed to read display name")?;

    println!("\n[4/4] Nightly statistics rebuild");
    let rebuild_enabled = Confirm::with_theme(&theme)
        .with_prompt("  Recompute all statistics once a day?")
        .default(true)
        .interact()
        .context("Failed to read rebuild input")?;

    let rebuild_time = if rebuild_enabled {
        let time: String = Input::with_theme(&theme)
            .with_prompt("  Rebuild time (UTC)")
            .default(defaults.rebuild_time.clone())
            .validate_with(|input: &String| -> std::result::Result<(), &str> {
                parse_hhmm(input)
                    .map(|_| ())
                    .map_err(|_| "Use HH:MM format (example: 03:15)")
            })
            .interact_text()
            .context("Failed to read rebuild time")?;
        println!("  ✓ Statistics will be rebuilt daily at {time} UTC");
        time
    } else {
        println!("  ✓ Skipped nightly rebuild");
        defaults.rebuild_time.clone()
    };

    let config = Config {
        db_path,
        api_port,
        default_display_name: default_display_name.trim().to_string(),
        rebuild_enabled,
        rebuild_time,
        ..defaults
    };

    config.ensure_bootstrap_files()?;
    config.save()?;
    let _ = Database::open(&config.db_path)?;

    println!("\n──────────────────────────────────────────");
    println!("  Onboarding complete!");
    println!("  Run `shelfmark service` to start the API and dispatcher.");
    println!("──────────────────────────────────────────");

    Ok(config)
}
