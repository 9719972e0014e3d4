//! Configuration view and validation: `pipewright config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use pipewright::config::{CONFIG_DIR, PipelineConfig};

    let config_path = PipelineConfig::path_in(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Pipewright Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No pipewright.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            // Effective values include PIPEWRIGHT_* overrides.
            let config = PipelineConfig::load_or_default(project_dir)?;
            print!("{}", config.to_toml_string()?);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No pipewright.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = PipelineConfig::load(&config_path)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            if let Err(e) = config.ensure_usable() {
                println!();
                println!("{} {}", console::style("error:").red().bold(), e);
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("pipewright.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(project_dir.join(CONFIG_DIR))?;
            PipelineConfig::default().save(&config_path)?;

            println!("Created pipewright.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [project] locale, timezone");
            println!("  - [vendor] model, base_url, max_concurrency");
            println!("  - [correction] max_retries");
            println!();
        }
    }

    Ok(())
}
