//! ConnectionState — per-connection dispatch record.
//!
//! Owned by the task that reads the connection's frames. That task feeds
//! every inbound frame through [`ConnectionState::on_frame`], and hands each
//! completed message to [`ConnectionState::enqueue_message`]. The handler side
//! consumes [`ConnectionState::dispatch`], a stream backed by the same
//! single-slot queue, so a slow handler holds back that connection alone.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wsd_protocol::{
    CloseCode, DispatchError, DispatchMode, DispatchResult, Frame, FrameKind, InboundMessage,
};

use crate::aggregator::FragmentAggregator;
use crate::queue::DispatchQueue;
use crate::service::ServiceDescriptor;

/// What the frame-reading path should do after [`ConnectionState::on_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A text fragment was buffered; the message is not complete yet.
    Pending,
    /// A complete logical message, to be enqueued for the handler.
    Message(InboundMessage),
    /// A ping arrived; answer with a pong carrying this payload.
    Pong(Bytes),
    /// Nothing to do (unsolicited pong).
    Ignored,
    /// The peer is closing. The dispatch queue is already closed.
    Close {
        code: Option<CloseCode>,
        reason: String,
    },
}

/// Dispatch state of one connection.
///
/// `C` is the live transport handle, bound once the handshake completes. `E`
/// is the application-visible endpoint object, owned here for the lifetime of
/// the connection. Usable on either end of a connection.
pub struct ConnectionState<C, E> {
    id: String,
    connection: Option<C>,
    service: Arc<ServiceDescriptor>,
    endpoint: E,
    dispatch_mode: DispatchMode,
    aggregator: Option<FragmentAggregator>,
    /// Bytes of a UTF-8 sequence split across two text fragments.
    partial_utf8: Vec<u8>,
    queue: DispatchQueue<InboundMessage>,
    opened_at: Option<Instant>,
}

impl<C, E> ConnectionState<C, E> {
    pub fn new(service: Arc<ServiceDescriptor>, endpoint: E, dispatch_mode: DispatchMode) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            connection: None,
            service,
            endpoint,
            dispatch_mode,
            aggregator: None,
            partial_utf8: Vec::new(),
            queue: DispatchQueue::new(),
            opened_at: None,
        }
    }

    /// Build a state whose connection is already established.
    pub fn with_connection(
        service: Arc<ServiceDescriptor>,
        connection: C,
        endpoint: E,
        dispatch_mode: DispatchMode,
    ) -> Self {
        let mut state = Self::new(service, endpoint, dispatch_mode);
        state.connection = Some(connection);
        state
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Attach the live connection. Works once; a second call fails with
    /// `AlreadyBound` and leaves the first binding in place.
    pub fn bind(&mut self, connection: C) -> DispatchResult<()> {
        if self.connection.is_some() {
            return Err(DispatchError::AlreadyBound);
        }
        self.connection = Some(connection);
        Ok(())
    }

    pub fn connection(&self) -> DispatchResult<&C> {
        self.connection.as_ref().ok_or(DispatchError::NotConnected)
    }

    pub fn is_bound(&self) -> bool {
        self.connection.is_some()
    }

    pub fn service(&self) -> &Arc<ServiceDescriptor> {
        &self.service
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut E {
        &mut self.endpoint
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch_mode
    }

    /// The fragment aggregator, created on first use.
    pub fn aggregator(&mut self) -> &mut FragmentAggregator {
        self.aggregator.get_or_insert_with(FragmentAggregator::new)
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    pub fn on_open(&mut self) {
        self.opened_at = Some(Instant::now());
        info!("Connection opened: {} on {}", self.id, self.service.base_path());
    }

    /// Route one inbound frame.
    ///
    /// Text fragments are collected until the final one; the aggregator is
    /// reset as soon as the complete message is taken out of it. Binary
    /// frames are delivered as they are. A close frame closes the dispatch
    /// queue before returning. Frames over the service's max frame size fail
    /// with `FrameTooLarge`; the reassembled message has no size limit.
    pub fn on_frame(&mut self, frame: Frame) -> DispatchResult<FrameOutcome> {
        let max = self.service.max_frame_size();
        if frame.len() > max {
            return Err(DispatchError::FrameTooLarge {
                size: frame.len(),
                max,
            });
        }
        self.route(frame)
    }

    /// Route a whole message that the transport already reassembled from
    /// frames it size-checked itself. The frame limit does not apply to it.
    pub fn on_reassembled(&mut self, message: Frame) -> DispatchResult<FrameOutcome> {
        self.route(message)
    }

    fn route(&mut self, frame: Frame) -> DispatchResult<FrameOutcome> {
        match frame.kind {
            FrameKind::Text => {
                let text = match self.decode_fragment(&frame.payload, frame.is_final) {
                    Ok(text) => text,
                    Err(e) => {
                        self.aggregator().reset();
                        return Err(e);
                    }
                };
                let aggregator = self.aggregator();
                aggregator.append(&text);
                if !frame.is_final {
                    return Ok(FrameOutcome::Pending);
                }
                let message = aggregator.take();
                Ok(FrameOutcome::Message(InboundMessage::Text(message)))
            }
            FrameKind::Binary => Ok(FrameOutcome::Message(InboundMessage::Binary(frame.payload))),
            FrameKind::Ping => Ok(FrameOutcome::Pong(frame.payload)),
            FrameKind::Pong => Ok(FrameOutcome::Ignored),
            FrameKind::Close => {
                let code = CloseCode::from_payload(&frame.payload);
                let reason = frame
                    .payload
                    .get(2..)
                    .map(|r| String::from_utf8_lossy(r).into_owned())
                    .unwrap_or_default();
                self.queue.close();
                debug!("Close frame on {} (code: {code:?}, reason: {reason:?})", self.id);
                Ok(FrameOutcome::Close { code, reason })
            }
        }
    }

    /// Hand a complete message to the handler side, waiting until it is
    /// taken. Fails with `QueueClosed` once the connection is closing.
    pub async fn enqueue_message(&self, message: InboundMessage) -> DispatchResult<()> {
        self.queue.put(message).await
    }

    /// Like [`enqueue_message`](Self::enqueue_message); `Cancelled` if
    /// `cancel` fires before a handler takes the message.
    pub async fn enqueue_message_cancellable(
        &self,
        message: InboundMessage,
        cancel: &CancellationToken,
    ) -> DispatchResult<()> {
        self.queue.put_cancellable(message, cancel).await
    }

    /// Detached form of [`enqueue_message`](Self::enqueue_message) that does
    /// not borrow the state, so the reader can keep routing control frames
    /// while the hand-off is pending.
    pub fn hand_off(
        &self,
        message: InboundMessage,
    ) -> impl Future<Output = DispatchResult<()>> + Send + 'static {
        let queue = self.queue.clone();
        async move { queue.put(message).await }
    }

    /// Completed messages in arrival order, one `take` per item. Ends when
    /// the connection closes.
    pub fn dispatch(&self) -> impl Stream<Item = InboundMessage> + Send + 'static {
        futures_util::stream::unfold(self.queue.clone(), |queue| async move {
            match queue.take().await {
                Ok(message) => Some((message, queue)),
                Err(_) => None,
            }
        })
    }

    /// Close the dispatch queue, releasing any pending producer or consumer
    /// with `QueueClosed`. Idempotent.
    pub fn on_close(&mut self, code: Option<CloseCode>, reason: &str) {
        self.queue.close();
        if let Some(aggregator) = self.aggregator.as_mut() {
            aggregator.reset();
        }
        self.partial_utf8.clear();
        let code = code.map(|c| c.code().to_string()).unwrap_or_else(|| "none".into());
        info!("Connection closed: {} (code: {code}, reason: {reason:?})", self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Decode a text fragment, carrying an incomplete trailing UTF-8 sequence
    /// over to the next fragment.
    fn decode_fragment(&mut self, payload: &[u8], is_final: bool) -> DispatchResult<String> {
        let mut bytes = std::mem::take(&mut self.partial_utf8);
        bytes.extend_from_slice(payload);

        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => {
                let utf8 = e.utf8_error();
                // error_len() == None: the input ended mid-sequence
                if is_final || utf8.error_len().is_some() {
                    return Err(DispatchError::InvalidPayload(format!(
                        "text frame is not valid UTF-8: {utf8}"
                    )));
                }
                let valid = utf8.valid_up_to();
                let mut bytes = e.into_bytes();
                self.partial_utf8 = bytes.split_off(valid);
                // the prefix up to `valid` was just checked
                String::from_utf8(bytes)
                    .map_err(|e| DispatchError::InvalidPayload(e.to_string()))
            }
        }
    }
}

impl<C, E: std::fmt::Debug> std::fmt::Debug for ConnectionState<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("id", &self.id)
            .field("bound", &self.connection.is_some())
            .field("service", &self.service.base_path())
            .field("endpoint", &self.endpoint)
            .field("dispatch_mode", &self.dispatch_mode)
            .field("closed", &self.queue.is_closed())
            .finish()
    }
}
