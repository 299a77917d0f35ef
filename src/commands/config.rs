use std::path::Path;

use crate::cli::ConfigAction;
use crate::config::Config;

fn report_error(json_output: bool, context: &str, e: &anyhow::Error) -> ! {
    if json_output {
        let body = serde_json::json!({"status": "error", "message": format!("{}: {:#}", context, e)});
        println!("{}", body);
    } else {
        eprintln!("Error: {}: {:#}", context, e);
    }
    std::process::exit(1);
}

fn report_success(json_output: bool, message: &str) {
    if json_output {
        println!("{}", serde_json::json!({"status": "success", "message": message}));
    } else {
        println!("{}", message);
    }
}

pub fn handle_config_action(action: &ConfigAction, path: &Path, json_output: bool) {
    match action {
        ConfigAction::Init => match Config::default().save_to(path) {
            Ok(()) => report_success(
                json_output,
                &format!("Configuration initialized at: {}", path.display()),
            ),
            Err(e) => report_error(json_output, "Failed to initialize config", &e),
        },
        ConfigAction::Show => match Config::load_from(path) {
            Ok(config) => {
                if json_output {
                    match serde_json::to_string_pretty(&config) {
                        Ok(json) => println!("{}", json),
                        Err(e) => report_error(json_output, "Failed to serialize config to JSON", &e.into()),
                    }
                } else {
                    println!("Configuration ({})", path.display());
                    println!("{}", config.to_commented_toml());
                }
            }
            Err(e) => report_error(json_output, "Failed to load config", &e),
        },
        ConfigAction::Set { key, value } => {
            let mut config = match Config::load_file(path) {
                Ok(config) => config,
                Err(e) => report_error(json_output, "Failed to load config", &e),
            };
            if let Err(e) = config.set_value(key, value) {
                report_error(json_output, "Invalid configuration", &e);
            }
            match config.save_to(path) {
                Ok(()) => report_success(json_output, &format!("Configuration updated: {} = {}", key, value)),
                Err(e) => report_error(json_output, "Failed to save config", &e),
            }
        }
    }
}
