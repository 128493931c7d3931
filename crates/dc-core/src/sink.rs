//! The abstract user-facing message sink.
//!
//! Sessions never print directly; they post through a [`MessageSink`] so
//! the CLI can render it however it likes (and tests can collect it into a
//! `Vec` for assertions) without every handler caring which.

/// How urgently a message should be surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Routine chat, roster churn.
    Low,
    /// Search results, transfer progress.
    Medium,
    /// Authentication failures, forced disconnects, fatal protocol errors.
    High,
}

/// A destination for user-facing messages.
pub trait MessageSink: Send + Sync {
    /// Post a message at the given priority.
    fn post(&self, priority: Priority, text: &str);
}

/// A sink that discards everything. Useful as a default before the CLI
/// wires up a real one, and in tests that don't care about output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MessageSink for NullSink {
    fn post(&self, _priority: Priority, _text: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct CollectingSink(Mutex<Vec<(Priority, String)>>);

    impl MessageSink for CollectingSink {
        fn post(&self, priority: Priority, text: &str) {
            self.0.lock().unwrap().push((priority, text.to_string()));
        }
    }

    #[test]
    fn collecting_sink_records_in_order() {
        let sink = CollectingSink::default();
        sink.post(Priority::Low, "roster updated");
        sink.post(Priority::High, "bad password");
        let messages = sink.0.into_inner().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].0, Priority::High);
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
    }
}
