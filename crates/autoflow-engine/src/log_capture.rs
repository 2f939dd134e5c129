//! Per-execution log capture.
//!
//! [`StreamLogLayer`] is installed once in the global subscriber. While the
//! worker thread runs an execution inside [`capture`], every event emitted on
//! that thread is also forwarded to the execution's stream as a `log` record.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::stream::{StreamRecord, StreamSender};

thread_local! {
    static SINK: RefCell<Option<Arc<StreamSender>>> = const { RefCell::new(None) };
}

/// Run `f` with this thread's events forwarded to `sender`.
pub fn capture<R>(sender: Arc<StreamSender>, f: impl FnOnce() -> R) -> R {
    struct Reset(Option<Arc<StreamSender>>);

    impl Drop for Reset {
        fn drop(&mut self) {
            let previous = self.0.take();
            SINK.with(|sink| *sink.borrow_mut() = previous);
        }
    }

    let previous = SINK.with(|sink| sink.borrow_mut().replace(sender));
    let _reset = Reset(previous);
    f()
}

/// Forwards events to the current thread's capture sink, if any.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamLogLayer;

impl<S: Subscriber> Layer<S> for StreamLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        SINK.with(|sink| {
            let Ok(sink) = sink.try_borrow() else { return };
            let Some(sender) = sink.as_ref() else { return };
            sender.send(StreamRecord::Log(format_event(event)));
        });
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

fn format_event(event: &Event<'_>) -> String {
    let meta = event.metadata();
    let mut visitor = LineVisitor::default();
    event.record(&mut visitor);
    format!("{:<5} {}: {}{}", meta.level(), meta.target(), visitor.message, visitor.fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_events_forwarded_only_inside_capture() {
        let subscriber = tracing_subscriber::registry().with(StreamLogLayer);
        let (tx, mut rx) = stream::channel(16);
        let tx = Arc::new(tx);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("before");
            let n = capture(tx.clone(), || {
                tracing::info!(entries = 3, "running task");
                tracing::warn!("careful");
                7
            });
            assert_eq!(n, 7);
            tracing::info!("after");
        });

        let mut lines = Vec::new();
        while let Some(StreamRecord::Log(line)) = rx.try_next() {
            lines.push(line);
        }
        assert_eq!(lines.len(), 2, "{lines:?}");
        assert!(lines[0].contains("running task"));
        assert!(lines[0].contains("entries=3"));
        assert!(lines[0].starts_with("INFO"));
        assert!(lines[1].starts_with("WARN"));
    }
}
