//! Alias command implementation.
//!
//! Manages friendly board names (aliases) that map to board names or
//! identifiers.

use std::io::Write;
use std::path::Path;

use anyhow::{Result, bail};
use tabled::{builder::Builder, settings::Style};

use crate::config::Config;
use crate::util::write_output;

/// Alias subcommand actions
pub enum AliasAction {
    /// List all aliases
    List,
    /// Set an alias
    Set { name: String, device: String },
    /// Remove an alias
    Remove { name: String },
}

/// Apply `action` to the config file at `path`.
pub fn cmd_alias(action: AliasAction, path: &Path, quiet: bool, out: &mut impl Write) -> Result<()> {
    let mut config = Config::load_from(path)?;

    match action {
        AliasAction::List => {
            if config.aliases.is_empty() {
                if !quiet {
                    write_output(
                        out,
                        "No aliases configured.\n\n\
                         Add an alias with: thunderboard alias set <name> <device>\n",
                    )?;
                }
            } else {
                let mut builder = Builder::default();
                builder.push_record(["Alias", "Board"]);

                let mut aliases: Vec<_> = config.aliases.iter().collect();
                aliases.sort_by_key(|(name, _)| name.as_str());
                for (name, device) in aliases {
                    builder.push_record([name.as_str(), device.as_str()]);
                }

                let mut table = builder.build();
                table.with(Style::rounded());
                write_output(out, &format!("{}\n", table))?;
            }
        }
        AliasAction::Set { name, device } => {
            if name.trim().is_empty() {
                bail!("Alias name must not be empty");
            }
            if config.aliases.contains_key(&device) {
                bail!(
                    "'{}' is itself an alias. Point '{}' at a board name or identifier.",
                    device,
                    name
                );
            }

            let was_update = config.aliases.contains_key(&name);
            config.aliases.insert(name.clone(), device.clone());
            config.save_to(path)?;

            if !quiet {
                let verb = if was_update { "Updated" } else { "Added" };
                write_output(out, &format!("{} alias '{}' -> {}\n", verb, name, device))?;
            }
        }
        AliasAction::Remove { name } => {
            if config.aliases.remove(&name).is_none() {
                bail!("Alias '{}' not found", name);
            }
            config.save_to(path)?;
            if !quiet {
                write_output(out, &format!("Removed alias '{}'\n", name))?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::text;
    use tempfile::TempDir;

    fn set(path: &Path, name: &str, device: &str) -> Result<String> {
        let mut out = Vec::new();
        cmd_alias(
            AliasAction::Set {
                name: name.to_string(),
                device: device.to_string(),
            },
            path,
            false,
            &mut out,
        )?;
        Ok(text(out))
    }

    #[test]
    fn test_set_list_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        assert_eq!(
            set(&path, "desk", "Thunder Sense #09621").unwrap(),
            "Added alias 'desk' -> Thunder Sense #09621\n"
        );
        assert_eq!(
            set(&path, "desk", "Thunder React #47911").unwrap(),
            "Updated alias 'desk' -> Thunder React #47911\n"
        );

        let mut out = Vec::new();
        cmd_alias(AliasAction::List, &path, false, &mut out).unwrap();
        let listing = text(out);
        assert!(listing.contains("desk"));
        assert!(listing.contains("Thunder React #47911"));

        let mut out = Vec::new();
        cmd_alias(
            AliasAction::Remove {
                name: "desk".to_string(),
            },
            &path,
            false,
            &mut out,
        )
        .unwrap();
        assert!(Config::load_from(&path).unwrap().aliases.is_empty());
    }

    #[test]
    fn test_list_empty_quiet() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        cmd_alias(AliasAction::List, &dir.path().join("config.toml"), true, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_remove_unknown_alias() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        let err = cmd_alias(
            AliasAction::Remove {
                name: "bike".to_string(),
            },
            &dir.path().join("config.toml"),
            false,
            &mut out,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_alias_chain_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        set(&path, "desk", "Thunder Sense #09621").unwrap();
        assert!(set(&path, "office", "desk").is_err());
    }

    #[test]
    fn test_set_keeps_other_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config {
            device: Some("desk".to_string()),
            timeout: Some(12),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        set(&path, "desk", "Thunder Sense #09621").unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.timeout, Some(12));
        assert_eq!(loaded.device.as_deref(), Some("desk"));
    }
}
