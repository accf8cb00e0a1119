use std::future::Future;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Success,
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
}

/// Transient toast channel. Fire-and-forget: the store never consumes a
/// return value and never blocks on delivery.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);

    fn success(&self, message: &str) {
        self.notify(message, Severity::Success);
    }

    fn error(&self, message: &str) {
        self.notify(message, Severity::Error);
    }

    fn warning(&self, message: &str) {
        self.notify(message, Severity::Warning);
    }

    fn info(&self, message: &str) {
        self.notify(message, Severity::Info);
    }
}

/// Pushes notifications onto an unbounded channel for a UI to drain. A
/// closed receiver drops the message.
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        let _ = self.sender.send(Notification {
            message: message.to_string(),
            severity,
        });
    }
}

#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub confirm_text: String,
    pub cancel_text: String,
}

impl ConfirmRequest {
    pub fn new(title: &str, message: &str, confirm_text: &str, cancel_text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            message: message.to_string(),
            confirm_text: confirm_text.to_string(),
            cancel_text: cancel_text.to_string(),
        }
    }
}

pub type ConfirmFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Modal confirmation gate. Resolves `true` only on an explicit confirm;
/// dismissal in any form resolves `false`.
pub trait Confirmer: Send + Sync {
    fn request(&self, request: ConfirmRequest) -> ConfirmFuture<'_>;
}

/// Forwards each request plus a oneshot reply handle to a UI consumer. A
/// dropped reply handle counts as dismissal.
pub struct ChannelConfirmer {
    sender: mpsc::UnboundedSender<(ConfirmRequest, oneshot::Sender<bool>)>,
}

impl ChannelConfirmer {
    pub fn new() -> (
        Self,
        mpsc::UnboundedReceiver<(ConfirmRequest, oneshot::Sender<bool>)>,
    ) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Confirmer for ChannelConfirmer {
    fn request(&self, request: ConfirmRequest) -> ConfirmFuture<'_> {
        let (reply, response) = oneshot::channel();
        let delivered = self.sender.send((request, reply)).is_ok();
        Box::pin(async move {
            if !delivered {
                return false;
            }
            response.await.unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_notifier_delivers_in_order() {
        let (notifier, mut receiver) = ChannelNotifier::new();
        notifier.success("saved");
        notifier.error("failed");

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.message, "saved");
        assert_eq!(first.severity, Severity::Success);

        let second = receiver.recv().await.unwrap();
        assert_eq!(second.severity, Severity::Error);
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_panic() {
        let (notifier, receiver) = ChannelNotifier::new();
        drop(receiver);
        notifier.info("into the void");
    }

    #[tokio::test]
    async fn confirmer_resolves_with_user_choice() {
        let (confirmer, mut receiver) = ChannelConfirmer::new();
        let pending = confirmer.request(ConfirmRequest::new("Close", "Sure?", "Close", "Keep"));

        let answer = tokio::spawn(async move {
            let (request, reply) = receiver.recv().await.unwrap();
            assert_eq!(request.title, "Close");
            reply.send(true).unwrap();
        });

        assert!(pending.await);
        answer.await.unwrap();
    }

    #[tokio::test]
    async fn dismissed_dialog_counts_as_not_confirmed() {
        let (confirmer, mut receiver) = ChannelConfirmer::new();
        let pending = confirmer.request(ConfirmRequest::new("Close", "Sure?", "Close", "Keep"));

        let dismiss = tokio::spawn(async move {
            let (_request, reply) = receiver.recv().await.unwrap();
            drop(reply);
        });

        assert!(!pending.await);
        dismiss.await.unwrap();
    }
}
