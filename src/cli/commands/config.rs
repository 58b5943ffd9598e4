//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::controller::PolicyKind;
use crate::error::{RmkError, RmkResult};
use clap::ValueEnum;
use console::style;
use std::path::PathBuf;

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> RmkResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> RmkResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> RmkResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        println!(
            "{} Config already exists at {}",
            style("!").yellow().bold(),
            path.display()
        );
        println!("  {}", style("Use --force to overwrite").dim());
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    println!(
        "{} Configuration initialized at {}",
        style("✓").green().bold(),
        path.display()
    );

    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> RmkResult<()> {
    let mut config = config.clone();
    apply(&mut config, key, value)?;

    manager.save(&config).await?;
    println!("{} Set {} = {}", style("✓").green().bold(), key, value);

    Ok(())
}

/// Set the dot-separated `key` of `config` from its string form
fn apply(config: &mut Config, key: &str, value: &str) -> RmkResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "verbose"] => config.general.verbose = parse_bool(value)?,
        ["general", "trace"] => config.general.trace = parse_bool(value)?,

        ["build", "task"] => config.build.task = value.to_string(),
        ["build", "build_file"] => config.build.build_file = value.to_string(),
        ["build", "concurrency"] => config.build.concurrency = parse_number(value)?,
        ["build", "policy"] => {
            config.build.policy = PolicyKind::from_str(value, true)
                .map_err(|_| RmkError::User(format!("Invalid policy: {}", value)))?
        }

        ["cache", "remote_url"] => config.cache.remote_url = optional(value),
        ["cache", "timeout_secs"] => config.cache.timeout_secs = parse_number(value)?,

        ["git", "checkout_dir"] => config.git.checkout_dir = optional(value).map(PathBuf::from),

        _ => {
            return Err(RmkError::User(format!(
                "Unknown config key: {} (valid: {})",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }
    Ok(())
}

const VALID_KEYS: &[&str] = &[
    "general.verbose",
    "general.trace",
    "build.task",
    "build.build_file",
    "build.concurrency",
    "build.policy",
    "cache.remote_url",
    "cache.timeout_secs",
    "git.checkout_dir",
];

/// Empty strings unset optional keys
fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_bool(value: &str) -> RmkResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(RmkError::User(format!("Invalid boolean value: {}", value))),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> RmkResult<T> {
    value
        .parse()
        .map_err(|_| RmkError::User(format!("Invalid number: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_known_keys() {
        let mut config = Config::default();
        apply(&mut config, "build.policy", "readonly").unwrap();
        apply(&mut config, "build.concurrency", "8").unwrap();
        apply(&mut config, "general.trace", "off").unwrap();
        apply(&mut config, "cache.remote_url", "http://cache:8080").unwrap();
        apply(&mut config, "cache.timeout_secs", "5").unwrap();

        assert_eq!(config.build.policy, PolicyKind::Readonly);
        assert_eq!(config.build.concurrency, 8);
        assert!(!config.general.trace);
        assert_eq!(config.cache.remote_url.as_deref(), Some("http://cache:8080"));
        assert_eq!(config.cache.timeout_secs, 5);

        apply(&mut config, "cache.remote_url", "").unwrap();
        assert!(config.cache.remote_url.is_none());
    }

    #[test]
    fn apply_rejects_bad_input() {
        let mut config = Config::default();
        assert!(apply(&mut config, "vm.name", "x").is_err());
        assert!(apply(&mut config, "build.policy", "sometimes").is_err());
        assert!(apply(&mut config, "build.concurrency", "lots").is_err());
    }
}
