//! Message filters that get first refusal on inbound messages

use std::sync::Arc;

use crate::ipc::protocol::Message;

/// Outcome of offering a message to a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// The filter handled the message; nothing else sees it
    Consumed,
    /// Offer the message to the next filter, then default dispatch
    PassThrough,
}

/// An interceptor for inbound channel messages
///
/// Filters run synchronously on the host's dispatch context. A slow filter
/// stalls every message for that host.
pub trait MessageFilter: Send + Sync {
    /// Decide whether to consume `message`
    fn on_message_received(&self, message: &Message) -> FilterVerdict;

    /// Called once the filter has been registered with a host
    fn on_filter_added(&self) {}

    /// Called when the filter is removed before the channel closes
    fn on_filter_removed(&self) {}

    /// Called when the child completes its handshake
    fn on_channel_connected(&self, _pid: u32) {}

    /// Called when the channel is shutting down; the filter is dropped after
    fn on_channel_closing(&self) {}
}

/// Ordered set of filters
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn MessageFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter at the end of the chain
    pub fn push(&mut self, filter: Arc<dyn MessageFilter>) {
        filter.on_filter_added();
        self.filters.push(filter);
    }

    /// Remove a previously added filter, matched by identity
    pub fn remove(&mut self, filter: &Arc<dyn MessageFilter>) -> bool {
        let Some(index) = self.filters.iter().position(|f| Arc::ptr_eq(f, filter)) else {
            return false;
        };
        let removed = self.filters.remove(index);
        removed.on_filter_removed();
        true
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Offer `message` to each filter in registration order
    ///
    /// Stops at the first filter that consumes it.
    pub fn dispatch(&self, message: &Message) -> FilterVerdict {
        for (index, filter) in self.filters.iter().enumerate() {
            if filter.on_message_received(message) == FilterVerdict::Consumed {
                tracing::trace!(name = message.name(), index, "message consumed by filter");
                return FilterVerdict::Consumed;
            }
        }
        FilterVerdict::PassThrough
    }

    pub fn notify_connected(&self, pid: u32) {
        for filter in &self.filters {
            filter.on_channel_connected(pid);
        }
    }

    /// Tell every filter the channel is closing and release them
    pub fn close(&mut self) {
        for filter in self.filters.drain(..) {
            filter.on_channel_closing();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Filter that records what it saw and consumes only when told to
    pub(crate) struct RecordingFilter {
        consume: bool,
        pub(crate) seen: Mutex<Vec<String>>,
        pub(crate) closing: AtomicUsize,
        pub(crate) connected: Mutex<Option<u32>>,
    }

    impl RecordingFilter {
        pub(crate) fn new(consume: bool) -> Arc<Self> {
            Arc::new(Self {
                consume,
                seen: Mutex::new(Vec::new()),
                closing: AtomicUsize::new(0),
                connected: Mutex::new(None),
            })
        }

        pub(crate) fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl MessageFilter for RecordingFilter {
        fn on_message_received(&self, message: &Message) -> FilterVerdict {
            self.seen.lock().unwrap().push(message.name().to_string());
            if self.consume {
                FilterVerdict::Consumed
            } else {
                FilterVerdict::PassThrough
            }
        }

        fn on_channel_connected(&self, pid: u32) {
            *self.connected.lock().unwrap() = Some(pid);
        }

        fn on_channel_closing(&self) {
            self.closing.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_first_consumer_stops_chain() {
        let f1 = RecordingFilter::new(false);
        let f2 = RecordingFilter::new(true);
        let f3 = RecordingFilter::new(false);

        let mut chain = FilterChain::new();
        chain.push(f1.clone());
        chain.push(f2.clone());
        chain.push(f3.clone());

        for name in ["a", "b"] {
            let verdict = chain.dispatch(&Message::new(name, vec![]));
            assert_eq!(verdict, FilterVerdict::Consumed);
        }

        assert_eq!(f1.seen(), ["a", "b"]);
        assert_eq!(f2.seen(), ["a", "b"]);
        assert!(f3.seen().is_empty());
    }

    #[test]
    fn test_pass_through_when_nobody_consumes() {
        let mut chain = FilterChain::new();
        chain.push(RecordingFilter::new(false));
        assert_eq!(
            chain.dispatch(&Message::new("x", vec![])),
            FilterVerdict::PassThrough
        );
        assert_eq!(
            FilterChain::new().dispatch(&Message::new("x", vec![])),
            FilterVerdict::PassThrough
        );
    }

    #[test]
    fn test_remove_by_identity() {
        let consumer = RecordingFilter::new(true);
        let as_dyn: Arc<dyn MessageFilter> = consumer.clone();
        let mut chain = FilterChain::new();
        chain.push(as_dyn.clone());

        assert!(chain.remove(&as_dyn));
        assert!(!chain.remove(&as_dyn));
        assert_eq!(
            chain.dispatch(&Message::new("x", vec![])),
            FilterVerdict::PassThrough
        );
        assert!(consumer.seen().is_empty());
    }

    #[test]
    fn test_close_notifies_and_drops() {
        let filter = RecordingFilter::new(false);
        let mut chain = FilterChain::new();
        chain.push(filter.clone());
        chain.close();

        assert!(chain.is_empty());
        assert_eq!(filter.closing.load(Ordering::SeqCst), 1);
        assert_eq!(Arc::strong_count(&filter), 1);
    }
}
