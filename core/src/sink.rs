//! Completion notification.
//!
//! The dispatcher calls its sink once per finished send, synchronously, in
//! completion order. How the notification fans out is up to the sink.

use tokio::sync::mpsc;

use crate::http::Completion;

/// Event name the completion is reported under; used to look up the
/// configured level.
pub const ON_MESSAGE: &str = "httpq.on_message";

/// Routing tag handed to the sink with each completion. The queue never
/// interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventLevel(pub u32);

impl EventLevel {
    pub const ALL: EventLevel = EventLevel(u32::MAX);
}

impl Default for EventLevel {
    fn default() -> Self {
        EventLevel::ALL
    }
}

pub trait NotificationSink {
    fn notify(&self, completion: &Completion, level: EventLevel);
}

impl<F> NotificationSink for F
where
    F: Fn(&Completion, EventLevel),
{
    fn notify(&self, completion: &Completion, level: EventLevel) {
        self(completion, level)
    }
}

/// Calls every registered sink, in registration order.
#[derive(Default)]
pub struct SinkList {
    sinks: Vec<Box<dyn NotificationSink + Send + Sync>>,
}

impl SinkList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: impl NotificationSink + Send + Sync + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn with(mut self, sink: impl NotificationSink + Send + Sync + 'static) -> Self {
        self.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl NotificationSink for SinkList {
    fn notify(&self, completion: &Completion, level: EventLevel) {
        for sink in &self.sinks {
            sink.notify(completion, level);
        }
    }
}

/// Forwards completions to an unbounded channel owned by the caller.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(Completion, EventLevel)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Completion, EventLevel)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, completion: &Completion, level: EventLevel) {
        if self.tx.send((completion.clone(), level)).is_err() {
            tracing::debug!(id = %completion.request.id(), "completion receiver dropped");
        }
    }
}
