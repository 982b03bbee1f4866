//! Self-heal policy commands

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, PolicySnapshot, PolicyUpdate};
use crate::output::{color_status, format_timestamp, print_info, print_success, OutputFormat};

const POLICY_PATH: &str = "api/self-heal";

pub async fn show_policy(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let policy: PolicySnapshot = client.get(POLICY_PATH).await?;
    print_policy(&policy, format)
}

pub async fn set_policy(
    client: &ApiClient,
    update: PolicyUpdate,
    format: OutputFormat,
) -> Result<()> {
    if update.is_empty() {
        print_info("Nothing to change; pass --enabled, --mode or --rate-limit-seconds");
        return show_policy(client, format).await;
    }

    let policy: PolicySnapshot = client.post(POLICY_PATH, &update).await?;
    if format == OutputFormat::Table {
        print_success("Self-heal policy updated");
    }
    print_policy(&policy, format)
}

fn print_policy(policy: &PolicySnapshot, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(policy)?);
        }
        OutputFormat::Table => {
            println!("{}", "Self-Heal Policy".bold());
            println!("{}", "=".repeat(40));
            println!(
                "Enabled:        {}",
                color_status(if policy.enabled { "enabled" } else { "disabled" })
            );
            println!("Mode:           {}", color_status(&policy.mode));
            println!("Rate limit:     {}s", policy.rate_limit_seconds);
            println!();

            let rate_state = match (&policy.rate_limited, &policy.rate_limit_until) {
                (true, Some(until)) => format!(
                    "{} until {}",
                    color_status("rate limited"),
                    format_timestamp(until)
                ),
                (true, None) => color_status("rate limited"),
                (false, _) => color_status("ok"),
            };
            println!("Throttling:     {}", rate_state);
            println!(
                "Isolation:      {}",
                color_status(if policy.isolated { "isolated" } else { "ok" })
            );
        }
    }
    Ok(())
}
