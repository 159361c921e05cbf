use clap::Subcommand;
use reverscodes_core::Config;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one value
    Get {
        /// Dot-path key (e.g. "quota.max_deferrals", "detection.max_attempts")
        key: String,
    },
    /// Change one value and save
    Set {
        key: String,
        /// New value (lists take JSON, e.g. '["adsbox","ad-banner"]')
        value: String,
    },
    /// Show every value as `key = value`
    List {
        /// Output the whole config as JSON
        #[arg(long)]
        json: bool,
    },
    /// Overwrite the config file with defaults
    Reset,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let value = Config::load()?
                .get(&key)
                .ok_or_else(|| format!("unknown key: {key}"))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            println!("{key} = {}", config.get(&key).unwrap_or(value));
        }
        ConfigAction::List { json } => {
            let config = Config::load()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }
            let entries = config.entries();
            let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
            for (key, value) in entries {
                println!("{key:<width$} = {value}");
            }
        }
        ConfigAction::Reset => {
            Config::default().save()?;
            println!("config reset to defaults");
        }
    }
    Ok(())
}
