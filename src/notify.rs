//! Notification sink for server `toast` messages

use tracing::info;

/// Receives user-facing notifications
pub trait Notifier: Send {
    fn notify(&mut self, message: &str);
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, message: &str) {
        info!("Notification: {}", message);
    }
}

/// Forwards notifications over a channel to a UI task
pub struct ChannelNotifier {
    tx: tokio::sync::mpsc::UnboundedSender<String>,
}

impl ChannelNotifier {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&mut self, message: &str) {
        // A closed receiver means nobody is showing notifications anymore
        let _ = self.tx.send(message.to_string());
    }
}
