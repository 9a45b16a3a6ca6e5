//! Status file for the video overlay
//!
//! The file is replaced atomically (write `<path>.tmp`, then rename) so a
//! reader polling it, such as ffmpeg's `drawtext` with `reload=1`, never sees
//! a half-written file.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

use crate::config::{StatusConfig, StatusFormat};
use crate::shutdown::Shutdown;
use crate::streams::ChannelInfo;

/// JSON form of the status file
#[derive(Serialize)]
struct StatusDocument<'a> {
    online: bool,
    updated_at: DateTime<Utc>,
    active_calls: usize,
    channels: &'a [ChannelInfo],
}

/// Writes the active talkgroup list to disk
pub struct StatusFile {
    path: PathBuf,
    format: StatusFormat,
}

impl StatusFile {
    pub fn new(config: &StatusConfig) -> Self {
        Self {
            path: config.path.clone(),
            format: config.format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render the file contents for a snapshot
    pub fn render(&self, active: &[ChannelInfo]) -> String {
        match self.format {
            StatusFormat::Text => render_text(active),
            StatusFormat::Json => render_json(true, active),
        }
    }

    /// Contents written once the mixer stops
    pub fn render_offline(&self) -> String {
        match self.format {
            StatusFormat::Text => "Offline".to_string(),
            StatusFormat::Json => render_json(false, &[]),
        }
    }

    /// Atomically replace the status file
    pub async fn write(&self, active: &[ChannelInfo]) -> std::io::Result<()> {
        self.replace(self.render(active)).await
    }

    pub async fn write_offline(&self) -> std::io::Result<()> {
        self.replace(self.render_offline()).await
    }

    async fn replace(&self, contents: String) -> std::io::Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }

    /// Rewrite the file on every published snapshot until shutdown, then
    /// mark it offline.
    pub async fn run(self, mut updates: watch::Receiver<Vec<ChannelInfo>>, shutdown: Shutdown) {
        tracing::info!("Writing status to {}", self.path.display());

        let initial = updates.borrow_and_update().clone();
        self.write_logged(&initial).await;

        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let active = updates.borrow_and_update().clone();
                    self.write_logged(&active).await;
                }
                _ = shutdown.wait() => break,
            }
        }

        if let Err(e) = self.write_offline().await {
            tracing::warn!("Could not mark status file {} offline: {}", self.path.display(), e);
        }
        tracing::info!("Status writer stopped");
    }

    async fn write_logged(&self, active: &[ChannelInfo]) {
        if let Err(e) = self.write(active).await {
            tracing::error!("Could not write status file {}: {}", self.path.display(), e);
        }
    }
}

fn render_text(active: &[ChannelInfo]) -> String {
    if active.is_empty() {
        return "Monitoring... (0 active calls)".to_string();
    }

    let mut lines = Vec::with_capacity(active.len() + 2);
    lines.push(format!("Active Calls: {}", active.len()));
    lines.push("-".repeat(20));
    for channel in active {
        lines.push(format!(
            "TG {} ({}) - {}",
            channel.channel_id, channel.short_name, channel.tag
        ));
    }
    lines.join("\n")
}

fn render_json(online: bool, active: &[ChannelInfo]) -> String {
    let document = StatusDocument {
        online,
        updated_at: Utc::now(),
        active_calls: active.len(),
        channels: active,
    };
    // Only plain data in here; serialization cannot fail
    serde_json::to_string_pretty(&document).unwrap_or_default()
}
