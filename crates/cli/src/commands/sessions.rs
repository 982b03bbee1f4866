//! Session listing

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, SessionInfo};
use crate::output::{color_status, format_timestamp, print_table, OutputFormat};

#[derive(Tabled, serde::Serialize)]
struct SessionRow {
    #[tabled(rename = "Session")]
    id: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Monitor URL")]
    monitor_url: String,
    #[tabled(rename = "Opened")]
    opened_at: String,
}

impl From<&SessionInfo> for SessionRow {
    fn from(info: &SessionInfo) -> Self {
        Self {
            id: info.id.clone(),
            source: color_status(&info.source),
            monitor_url: info.monitor_url.clone().unwrap_or_else(|| "-".to_string()),
            opened_at: format_timestamp(&info.opened_at),
        }
    }
}

pub async fn list_sessions(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let sessions: Vec<SessionInfo> = client.get("api/sessions").await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sessions)?),
        OutputFormat::Table => {
            let rows: Vec<SessionRow> = sessions.iter().map(SessionRow::from).collect();
            print_table(&rows, format);
        }
    }
    Ok(())
}
