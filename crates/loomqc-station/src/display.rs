//! Fire-and-forget updates for the operator display.
//!
//! The display itself lives outside this workspace. The station pushes
//! [`DisplayUpdate`]s into an unbounded channel so a slow or absent
//! display never holds up the next cycle.

use std::sync::Arc;

use loomqc_pipeline::{CheckRow, RgbImage};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Severity of an operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

/// One change to what the operator sees.
#[derive(Debug, Clone)]
pub enum DisplayUpdate {
    /// Forget the previous sheet.
    Clear,
    /// The cropped sheet being inspected.
    Cropped(Arc<RgbImage>),
    /// Sheet with measurements and defects drawn in.
    Annotated(RgbImage),
    /// The anomaly scorer's reconstruction, if any.
    Reconstruction(Option<RgbImage>),
    /// The result table.
    Results { passed: bool, rows: Vec<CheckRow> },
    /// A transient message.
    Notify { level: Level, message: String },
}

/// Sending half of the display channel.
#[derive(Debug, Clone)]
pub struct DisplaySink {
    sender: Option<mpsc::UnboundedSender<DisplayUpdate>>,
}

impl DisplaySink {
    /// A sink and the receiver a display consumes.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DisplayUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A sink that drops every update.
    #[must_use]
    pub const fn disconnected() -> Self {
        Self { sender: None }
    }

    /// Queue an update. Never blocks; updates for a closed display are
    /// dropped.
    pub fn send(&self, update: DisplayUpdate) {
        if let Some(sender) = &self.sender {
            // A closed display is not a cycle failure.
            let _ = sender.send(update);
        }
    }

    pub fn notify(&self, level: Level, message: impl Into<String>) {
        self.send(DisplayUpdate::Notify {
            level,
            message: message.into(),
        });
    }
}

/// Consume updates by logging the ones a headless station cares about.
pub async fn log_display(mut receiver: mpsc::UnboundedReceiver<DisplayUpdate>) {
    while let Some(update) = receiver.recv().await {
        match update {
            DisplayUpdate::Results { passed, rows } => {
                let failed: Vec<&str> = rows
                    .iter()
                    .filter(|row| !row.result)
                    .map(|row| row.check.as_str())
                    .collect();
                info!(passed, checks = rows.len(), ?failed, "inspection result");
            }
            DisplayUpdate::Notify {
                level: Level::Error,
                message,
            } => error!(%message, "operator notification"),
            DisplayUpdate::Notify {
                level: Level::Info,
                message,
            } => info!(%message, "operator notification"),
            DisplayUpdate::Clear
            | DisplayUpdate::Cropped(_)
            | DisplayUpdate::Annotated(_)
            | DisplayUpdate::Reconstruction(_) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn updates_arrive_in_order() {
        let (sink, mut receiver) = DisplaySink::channel();
        sink.send(DisplayUpdate::Clear);
        sink.notify(Level::Info, "processing");

        assert!(matches!(receiver.recv().await, Some(DisplayUpdate::Clear)));
        assert!(matches!(
            receiver.recv().await,
            Some(DisplayUpdate::Notify { level: Level::Info, ref message }) if message == "processing"
        ));
    }

    #[test]
    fn closed_display_is_ignored() {
        let (sink, receiver) = DisplaySink::channel();
        drop(receiver);
        sink.notify(Level::Error, "nobody listens");
        DisplaySink::disconnected().send(DisplayUpdate::Clear);
    }
}
