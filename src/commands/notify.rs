use anyhow::{Context, Result};

use crate::config::Config;
use crate::pipeline::notifier_from_config;

pub async fn handle_notify_test_command(config: &Config, json_output: bool) -> Result<()> {
    if config.notifier.webhook_url.is_none() {
        eprintln!("Warning: notifier.webhook_url is not set, the test message goes to the log only");
    }

    let notifier = notifier_from_config(&config.notifier)?;
    notifier
        .send_test()
        .await
        .context("Failed to send test notification")?;

    if json_output {
        println!(r#"{{"status": "success", "message": "Test notification sent"}}"#);
    } else {
        println!("Test notification sent");
    }

    Ok(())
}
