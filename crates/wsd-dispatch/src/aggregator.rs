//! Text fragment aggregation.

/// Accumulates the text fragments of one logical message on one connection.
///
/// The aggregator does not know where a message ends; that is the FIN bit of
/// the transport's framing. Whoever routes frames must call [`reset`] (or
/// [`take`]) after delivering a complete message. Forgetting to do so glues
/// the next message onto the previous one; that is a caller bug and is not
/// detected here.
///
/// There is no locking. An aggregator belongs to exactly one connection and
/// is only reachable through that connection's `&mut ConnectionState`, so it
/// is never shared across connections.
///
/// [`reset`]: FragmentAggregator::reset
/// [`take`]: FragmentAggregator::take
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FragmentAggregator {
    buffer: String,
}

impl FragmentAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
    }

    /// The message so far. Does not clear it.
    pub fn current_value(&self) -> &str {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Hand out the assembled message and leave the buffer empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
