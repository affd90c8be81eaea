//! Boundary to whatever renders completion popups. Delivery is fire-and-forget; the caller
//! guarantees one call per terminal transition.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Swap,
    Moonpay,
    Transak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionState {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub key: String,
    pub order_id: String,
    pub from: String,
    pub to: String,
    pub from_amount: String,
    pub to_amount: String,
    pub state: CompletionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotificationKind, completion: &Completion);
}

/// Emits completions as structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, kind: NotificationKind, c: &Completion) {
        tracing::info!(
            ?kind,
            key = %c.key,
            order_id = %c.order_id,
            from = %c.from,
            to = %c.to,
            from_amount = %c.from_amount,
            to_amount = %c.to_amount,
            state = ?c.state,
            reason = c.reason.as_deref(),
            "order reached a terminal state"
        );
    }
}

/// Forwards completions to an async consumer. A dropped receiver is not an error.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<(NotificationKind, Completion)>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(NotificationKind, Completion)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, kind: NotificationKind, completion: &Completion) {
        if self.tx.send((kind, completion.clone())).is_err() {
            tracing::debug!(key = %completion.key, "notification receiver gone");
        }
    }
}

/// Keeps every completion in memory. Used by tests and by one-shot CLI runs that print
/// what happened.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    seen: Arc<Mutex<Vec<(NotificationKind, Completion)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> eyre::Result<Vec<(NotificationKind, Completion)>> {
        let mut g = self
            .seen
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
        Ok(std::mem::take(&mut *g))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NotificationKind, completion: &Completion) {
        match self.seen.lock() {
            Ok(mut g) => g.push((kind, completion.clone())),
            Err(e) => tracing::warn!(error = %e, "recording notifier poisoned"),
        }
    }
}

/// Fan out to several notifiers in order.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl std::fmt::Debug for FanoutNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutNotifier")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl FanoutNotifier {
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, kind: NotificationKind, completion: &Completion) {
        for s in &self.sinks {
            s.notify(kind, completion);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Completion {
        Completion {
            key: "BTC-UST".to_owned(),
            order_id: "x1".to_owned(),
            from: "BTC".to_owned(),
            to: "UST".to_owned(),
            from_amount: "0.01".to_owned(),
            to_amount: "500".to_owned(),
            state: CompletionState::Completed,
            reason: None,
        }
    }

    #[test]
    fn fanout_reaches_every_sink() -> eyre::Result<()> {
        let a = RecordingNotifier::new();
        let (ch, mut rx) = ChannelNotifier::new();
        let fan = FanoutNotifier::default()
            .with(Arc::new(a.clone()))
            .with(Arc::new(ch))
            .with(Arc::new(TracingNotifier));
        fan.notify(NotificationKind::Swap, &sample());

        assert_eq!(a.take()?.len(), 1);
        assert!(a.take()?.is_empty());
        let (kind, c) = rx.try_recv()?;
        assert_eq!(kind, NotificationKind::Swap);
        assert_eq!(c.state, CompletionState::Completed);
        Ok(())
    }

    #[test]
    fn completion_serializes_lowercase_state() -> eyre::Result<()> {
        let v = serde_json::to_value(sample())?;
        assert_eq!(v.get("state"), Some(&serde_json::json!("completed")));
        assert!(v.get("reason").is_none());
        Ok(())
    }
}
