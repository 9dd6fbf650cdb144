//! Protocol layer tests — close codes, frames, errors and config schema.

use bytes::Bytes;
use serde_json::json;
use wsd_protocol::*;

// ─────────────────────────────────────────────────────────────────────────────
// CloseCode
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn close_code_values() {
    assert_eq!(CloseCode::Normal.code(), 1000);
    assert_eq!(CloseCode::GoingAway.code(), 1001);
    assert_eq!(CloseCode::MessageTooBig.code(), 1009);
    assert_eq!(CloseCode::InternalError.code(), 1011);
    assert_eq!(CloseCode::Other(4001).code(), 4001);
}

#[test]
fn close_code_from_code() {
    assert_eq!(CloseCode::from_code(1007), CloseCode::InvalidPayload);
    assert_eq!(CloseCode::from_code(1008), CloseCode::PolicyViolation);
    assert_eq!(CloseCode::from_code(4500), CloseCode::Other(4500));
}

#[test]
fn close_code_from_payload() {
    assert_eq!(CloseCode::from_payload(&[0x03, 0xE8]), Some(CloseCode::Normal));
    assert_eq!(CloseCode::from_payload(&[0x03, 0xE9, b'x']), Some(CloseCode::GoingAway));
    assert_eq!(CloseCode::from_payload(&[]), None);
    assert_eq!(CloseCode::from_payload(&[0x03]), None);
}

// ─────────────────────────────────────────────────────────────────────────────
// Frames and messages
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn frame_constructors() {
    let text = Frame::text("hi");
    assert_eq!(text.kind, FrameKind::Text);
    assert!(text.is_final);
    assert_eq!(text.payload, Bytes::from_static(b"hi"));

    let fragment = Frame::text_fragment("h", false);
    assert!(!fragment.is_final);

    let close = Frame::close(CloseCode::GoingAway, "bye");
    assert_eq!(close.kind, FrameKind::Close);
    assert_eq!(&close.payload[..], &[0x03, 0xE9, b'b', b'y', b'e']);
    assert!(close.kind.is_control());
    assert!(!FrameKind::Binary.is_control());
}

#[test]
fn inbound_message_accessors() {
    let text = InboundMessage::Text("abc".into());
    assert_eq!(text.as_text(), Some("abc"));
    assert_eq!(text.len(), 3);

    let binary = InboundMessage::Binary(Bytes::new());
    assert_eq!(binary.as_text(), None);
    assert!(binary.is_empty());

    assert_eq!(OutboundMessage::from(text), OutboundMessage::Text("abc".into()));
}

// ─────────────────────────────────────────────────────────────────────────────
// DispatchError
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn error_close_codes() {
    assert_eq!(DispatchError::QueueClosed.close_code(), CloseCode::GoingAway);
    assert_eq!(
        DispatchError::FrameTooLarge { size: 10, max: 5 }.close_code(),
        CloseCode::MessageTooBig
    );
    assert_eq!(DispatchError::no_match("/x").close_code(), CloseCode::PolicyViolation);
    assert_eq!(DispatchError::NotConnected.close_code(), CloseCode::InternalError);
}

#[test]
fn only_cancelled_is_retryable() {
    assert!(DispatchError::Cancelled.is_retryable());
    assert!(!DispatchError::QueueClosed.is_retryable());
    assert!(!DispatchError::AlreadyBound.is_retryable());
}

#[test]
fn error_messages() {
    assert_eq!(
        DispatchError::no_match("/chat").to_string(),
        "no websocket service matches path '/chat'"
    );
    assert_eq!(
        DispatchError::configuration("bad").to_string(),
        "invalid service configuration: bad"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// ServiceConfig
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn config_minimal() {
    let config: ServiceConfig = serde_json::from_value(json!({ "name": "echo" })).unwrap();
    assert_eq!(config, ServiceConfig::new("echo"));
    assert_eq!(config.dispatch_mode, DispatchMode::Asynchronous);
    assert!(config.subprotocols.is_none());
    assert!(config.remote_functions.is_empty());
}

#[test]
fn config_full() {
    let config: ServiceConfig = serde_json::from_value(json!({
        "name": "chatService",
        "basePath": "/v1/chat/",
        "subprotocols": ["chat.v2", "chat"],
        "idleTimeoutSecs": 120,
        "maxFrameSize": 4096,
        "dispatchMode": "synchronous",
        "remoteFunctions": ["onText", "onUpgrade"]
    }))
    .unwrap();
    assert_eq!(config.base_path, Some(BasePath::Path("/v1/chat/".into())));
    assert_eq!(config.idle_timeout_secs, Some(120));
    assert_eq!(config.max_frame_size, Some(4096));
    assert_eq!(config.dispatch_mode, DispatchMode::Synchronous);
    assert_eq!(config.remote_functions, vec!["onText", UPGRADE_HOOK]);
}

#[test]
fn config_negative_values_survive_parsing() {
    let config: ServiceConfig =
        serde_json::from_value(json!({ "name": "s", "idleTimeoutSecs": -3 })).unwrap();
    assert_eq!(config.idle_timeout_secs, Some(-3));
}

#[test]
fn base_path_segments() {
    let path: BasePath = serde_json::from_value(json!(["v1", "chat"])).unwrap();
    assert_eq!(path.joined(), "v1/chat");
}

#[test]
fn services_file_errors_are_configuration_errors() {
    let err = ServicesFile::from_json("{ not json").unwrap_err();
    assert!(matches!(err, DispatchError::Configuration(_)));

    let missing = ServicesFile::load(std::path::Path::new("/definitely/not/here.json")).unwrap_err();
    assert!(matches!(missing, DispatchError::Configuration(_)));
}

#[test]
fn constants() {
    assert_eq!(DEFAULT_MAX_FRAME_SIZE, 65_536);
    assert_eq!(UPGRADE_HOOK, "onUpgrade");
    assert_eq!(ANONYMOUS_NAME_PREFIX, '$');
}
