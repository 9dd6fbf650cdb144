//! Endpoint, ConnectionHandle and Session tests.

use std::time::Duration;

use tokio::sync::mpsc;
use wsd_protocol::{CloseCode, DispatchError, OutboundMessage};
use wsd_transport::{ConnectionHandle, Endpoint, Session};

#[test]
fn endpoint_tracks_activity() {
    let mut endpoint = Endpoint::new("/chat", Some("chat.v2".into()));
    assert_eq!(endpoint.path, "/chat");
    assert_eq!(endpoint.connected_at, endpoint.last_activity);

    std::thread::sleep(Duration::from_millis(5));
    assert!(endpoint.idle_for() >= Duration::from_millis(5));
    endpoint.touch();
    assert!(endpoint.last_activity > endpoint.connected_at);
}

#[test]
fn handle_queues_messages_for_the_writer() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(tx);

    handle.send_text("hello").unwrap();
    handle.close(CloseCode::GoingAway, "idle timeout").unwrap();

    assert_eq!(rx.try_recv().unwrap(), OutboundMessage::Text("hello".into()));
    assert_eq!(
        rx.try_recv().unwrap(),
        OutboundMessage::Close {
            code: CloseCode::GoingAway,
            reason: "idle timeout".into()
        }
    );
}

#[test]
fn send_after_writer_is_gone_fails() {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(tx);
    drop(rx);
    assert!(handle.is_closed());
    assert_eq!(handle.send_text("late"), Err(DispatchError::QueueClosed));
}

#[test]
fn session_exposes_endpoint_and_sends() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let endpoint = Endpoint::new("/v1/chat", None);
    let session = Session::new("conn-1", endpoint.clone(), ConnectionHandle::new(tx));

    assert_eq!(session.id(), "conn-1");
    assert_eq!(session.path(), "/v1/chat");
    assert_eq!(session.subprotocol(), None);
    assert_eq!(session.connected_at(), endpoint.connected_at);

    session.send(OutboundMessage::Binary(vec![1u8, 2].into())).unwrap();
    session.close(CloseCode::Normal, "").unwrap();
    assert_eq!(rx.try_recv().unwrap(), OutboundMessage::Binary(vec![1u8, 2].into()));
    assert!(matches!(rx.try_recv().unwrap(), OutboundMessage::Close { code: CloseCode::Normal, .. }));
}
