//! Wire-format tests for the text and binary codecs.
//!
//! The byte-for-byte expectations here are the compatibility contract
//! with Phoenix servers: if one of these changes, clients and servers
//! stop understanding each other.

use flare_protocol::{
    BinarySerializer, JsonSerializer, Payload, PhoenixSerializer, ProtocolError, Serializer,
    SocketMessage,
};
use flare_transport::Frame;

// =========================================================================
// Helpers
// =========================================================================

fn message(join_ref: &str, reference: &str, topic: &str, event: &str, payload: Payload) -> SocketMessage {
    SocketMessage::Message {
        join_ref: Some(join_ref.into()),
        reference: Some(reference.into()),
        topic: topic.into(),
        event: event.into(),
        payload,
    }
}

// =========================================================================
// Text encoding
// =========================================================================

#[test]
fn test_text_encode_embeds_payload_as_escaped_string() {
    let msg = message("0", "1", "t", "e", Payload::Json("{\"foo\": 1}".into()));
    let text = JsonSerializer.encode_text(&msg).unwrap();
    assert_eq!(text, r#"["0","1","t","e","{\"foo\": 1}"]"#);
}

#[test]
fn test_text_encode_absent_refs_are_null() {
    let msg = SocketMessage::Message {
        join_ref: None,
        reference: Some("3".into()),
        topic: "room:1".into(),
        event: "new_msg".into(),
        payload: Payload::empty(),
    };
    let text = JsonSerializer.encode_text(&msg).unwrap();
    assert_eq!(text, r#"[null,"3","room:1","new_msg","{}"]"#);
}

#[test]
fn test_text_encode_rejects_binary_payload() {
    let msg = message("0", "1", "t", "e", Payload::Binary(vec![1]));
    assert!(matches!(
        JsonSerializer.encode_text(&msg),
        Err(ProtocolError::InvalidFrame(_))
    ));
}

#[test]
fn test_text_encode_returns_text_frame() {
    let msg = message("0", "1", "t", "e", Payload::empty());
    let frame = JsonSerializer.encode(&msg).unwrap();
    assert!(matches!(frame, Frame::Text(_)));
}

// =========================================================================
// Text decoding
// =========================================================================

#[test]
fn test_text_decode_reply() {
    let text = r#"[null,"2","topic","phx_reply",{"response":"foo","status":"ok"}]"#;
    let decoded = JsonSerializer.decode_text(text).unwrap();
    assert_eq!(
        decoded,
        SocketMessage::Reply {
            join_ref: None,
            reference: Some("2".into()),
            topic: "topic".into(),
            status: "ok".into(),
            payload: Payload::Json("foo".into()),
        }
    );
}

#[test]
fn test_text_decode_reply_object_response_is_compacted() {
    let text = r#"["1","1","room:1","phx_reply",{"status":"error","response":{ "reason" : "unauthorized" }}]"#;
    let decoded = JsonSerializer.decode_text(text).unwrap();
    let SocketMessage::Reply { status, payload, join_ref, .. } = decoded else {
        panic!("expected a reply");
    };
    assert_eq!(status, "error");
    assert_eq!(join_ref.as_deref(), Some("1"));
    assert_eq!(payload, Payload::Json(r#"{"reason":"unauthorized"}"#.into()));
}

#[test]
fn test_text_decode_broadcast() {
    let text = r#"[null,null,"topic","event",{"user":"foo"}]"#;
    let decoded = JsonSerializer.decode_text(text).unwrap();
    assert_eq!(
        decoded,
        SocketMessage::Broadcast {
            topic: "topic".into(),
            event: "event".into(),
            payload: Payload::Json("{\"user\":\"foo\"}".into()),
        }
    );
}

#[test]
fn test_text_decode_message_with_refs() {
    let text = r#"["1",null,"room:1","new_msg",{"body":"hi"}]"#;
    let decoded = JsonSerializer.decode_text(text).unwrap();
    assert_eq!(
        decoded,
        SocketMessage::Message {
            join_ref: Some("1".into()),
            reference: None,
            topic: "room:1".into(),
            event: "new_msg".into(),
            payload: Payload::Json("{\"body\":\"hi\"}".into()),
        }
    );
}

#[test]
fn test_text_decode_array_payload_is_compacted() {
    let text = r#"[null,null,"t","e",[1, 2, 3]]"#;
    let decoded = JsonSerializer.decode_text(text).unwrap();
    assert_eq!(decoded.payload(), &Payload::Json("[1,2,3]".into()));
}

#[test]
fn test_text_round_trip_of_encoded_messages() {
    // Encoding wraps the payload in a string; decoding takes strings
    // verbatim, so the text codec round-trips its own output.
    let messages = [
        message("1", "2", "room:1", "new_msg", Payload::Json("{\"body\":\"hi\"}".into())),
        SocketMessage::Broadcast {
            topic: "room:1".into(),
            event: "presence".into(),
            payload: Payload::empty(),
        },
        SocketMessage::Reply {
            join_ref: Some("1".into()),
            reference: Some("1".into()),
            topic: "room:1".into(),
            status: "ok".into(),
            payload: Payload::Json("{}".into()),
        },
    ];
    for msg in messages {
        let text = JsonSerializer.encode_text(&msg).unwrap();
        assert_eq!(JsonSerializer.decode_text(&text).unwrap(), msg, "{text}");
    }
}

// =========================================================================
// Text decoding: malformed input
// =========================================================================

#[test]
fn test_text_decode_garbage_is_decode_error() {
    assert!(matches!(
        JsonSerializer.decode_text("not json at all"),
        Err(ProtocolError::Decode(_))
    ));
}

#[test]
fn test_text_decode_wrong_length_is_invalid() {
    let err = JsonSerializer.decode_text(r#"[null,"1","t","e"]"#).unwrap_err();
    assert!(err.to_string().contains("expected 5 array elements, got 4"));
}

#[test]
fn test_text_decode_object_is_invalid() {
    assert!(matches!(
        JsonSerializer.decode_text(r#"{"topic":"t"}"#),
        Err(ProtocolError::InvalidFrame(_))
    ));
}

#[test]
fn test_text_decode_non_string_topic_is_invalid() {
    assert!(JsonSerializer.decode_text(r#"[null,null,5,"e",{}]"#).is_err());
}

#[test]
fn test_text_decode_numeric_ref_is_invalid() {
    assert!(JsonSerializer.decode_text(r#"[null,1,"t","e",{}]"#).is_err());
}

#[test]
fn test_text_decode_reply_without_status_is_error() {
    assert!(
        JsonSerializer
            .decode_text(r#"[null,"1","t","phx_reply",{"response":{}}]"#)
            .is_err()
    );
}

// =========================================================================
// Binary encoding
// =========================================================================

#[test]
fn test_binary_encode_push() {
    let msg = message("0", "1", "t", "e", Payload::Binary(vec![0x01]));
    let bytes = BinarySerializer.encode_bytes(&msg).unwrap();
    assert_eq!(bytes, [0x00, 0x01, 0x01, 0x01, 0x01, b'0', b'1', b't', b'e', 0x01]);
}

#[test]
fn test_binary_encode_push_variable_lengths() {
    let msg = message("10", "1", "top", "ev", Payload::Binary(vec![0x01]));
    let bytes = BinarySerializer.encode_bytes(&msg).unwrap();
    assert_eq!(
        bytes,
        [0x00, 0x02, 0x01, 0x03, 0x02, b'1', b'0', b'1', b't', b'o', b'p', b'e', b'v', 0x01]
    );
}

#[test]
fn test_binary_decode_reply() {
    let bytes = [
        0x01, 0x02, 0x02, 0x03, 0x02, b'1', b'0', b'1', b'2', b't', b'o', b'p', b'o', b'k', 0x01,
    ];
    assert_eq!(
        BinarySerializer.decode_bytes(&bytes).unwrap(),
        SocketMessage::Reply {
            join_ref: Some("10".into()),
            reference: Some("12".into()),
            topic: "top".into(),
            status: "ok".into(),
            payload: Payload::Binary(vec![0x01]),
        }
    );
}

#[test]
fn test_binary_decode_broadcast() {
    let bytes = [0x02, 0x03, 0x02, b't', b'o', b'p', b'e', b'v', 0x01];
    assert_eq!(
        BinarySerializer.decode_bytes(&bytes).unwrap(),
        SocketMessage::Broadcast {
            topic: "top".into(),
            event: "ev".into(),
            payload: Payload::Binary(vec![0x01]),
        }
    );
}

#[test]
fn test_binary_round_trip_keeps_arbitrary_payload_bytes() {
    let payload = Payload::Binary((0..=255).collect());
    let messages = [
        message("1", "7", "room:ü", "upload", payload.clone()),
        SocketMessage::Reply {
            join_ref: None,
            reference: Some("9".into()),
            topic: "room:1".into(),
            status: "error".into(),
            payload: payload.clone(),
        },
        SocketMessage::Broadcast {
            topic: "room:1".into(),
            event: "frame".into(),
            payload: Payload::Binary(vec![]),
        },
    ];
    for msg in messages {
        let bytes = BinarySerializer.encode_bytes(&msg).unwrap();
        assert_eq!(BinarySerializer.decode_bytes(&bytes).unwrap(), msg);
    }
}

// =========================================================================
// PhoenixSerializer: frame selection
// =========================================================================

#[test]
fn test_phoenix_serializer_picks_frame_by_payload() {
    let text = PhoenixSerializer
        .encode(&message("1", "1", "t", "e", Payload::empty()))
        .unwrap();
    assert_eq!(text, Frame::Text(r#"["1","1","t","e","{}"]"#.into()));

    let binary = PhoenixSerializer
        .encode(&message("1", "1", "t", "e", Payload::Binary(vec![7])))
        .unwrap();
    assert!(matches!(binary, Frame::Binary(_)));
}

#[test]
fn test_phoenix_serializer_decodes_both_frame_kinds() {
    let from_text = PhoenixSerializer
        .decode(&Frame::Text(r#"[null,null,"t","e",{}]"#.into()))
        .unwrap();
    assert_eq!(from_text.payload(), &Payload::Json("{}".into()));

    let from_binary = PhoenixSerializer
        .decode(&Frame::Binary(vec![2, 1, 1, b't', b'e', 5]))
        .unwrap();
    assert_eq!(from_binary.payload(), &Payload::Binary(vec![5]));
}

#[test]
fn test_json_serializer_rejects_binary_frames() {
    assert!(JsonSerializer.decode(&Frame::Binary(vec![2, 0, 0])).is_err());
}
