pub mod slack;

pub use slack::SlackNotifier;

/// Best-effort text delivery to the operator.
///
/// Fire-and-forget: implementations must not block the caller on delivery
/// and must swallow their own failures.
pub trait Notifier: Send + Sync {
    fn send_text(&self, message: &str);
}

/// Fallback when no delivery channel is configured
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_text(&self, message: &str) {
        tracing::info!(target: "notify", "{}", message);
    }
}
