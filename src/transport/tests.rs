use super::*;
use crate::config::AudioEncoding;
use crate::engine::EngineEvent;
use crossbeam_channel::{unbounded, Receiver};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn next_transport_event(rx: &Receiver<EngineEvent>) -> TransportEvent {
    match rx.recv_timeout(WAIT).expect("transport event") {
        EngineEvent::Transport(event) => event,
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn outbound_audio_chunk_is_tagged_and_base64_encoded() {
    let message = OutboundMessage::AudioChunk {
        turn_id: 3,
        seq: 1,
        encoding: AudioEncoding::Wav,
        data: vec![1, 2, 3],
    };
    let value = serde_json::to_value(&message).expect("serialize");
    assert_eq!(
        value,
        json!({"type": "audio_chunk", "turn_id": 3, "seq": 1, "encoding": "wav", "data": "AQID"})
    );
}

#[test]
fn start_turn_omits_missing_session() {
    let message = OutboundMessage::StartTurn {
        turn_id: 0,
        resume_session_id: None,
        sample_rate: 16_000,
        encoding: AudioEncoding::Pcm16,
    };
    let value = serde_json::to_value(&message).expect("serialize");
    assert_eq!(
        value,
        json!({"type": "start_turn", "turn_id": 0, "sample_rate": 16000, "encoding": "pcm16"})
    );
}

#[test]
fn inbound_audio_chunk_classifies_as_chunk_with_annotation() {
    let raw = r#"{"type":"audio_chunk","turn_id":2,"data":"AQID","text":"Step one"}"#;
    let message: InboundMessage = serde_json::from_str(raw).expect("parse");
    assert_eq!(message.turn_id(), Some(2));
    assert_eq!(
        message.classify(),
        Inbound::Chunk {
            bytes: vec![1, 2, 3],
            annotation: Some("Step one".to_string())
        }
    );
}

#[test]
fn inbound_control_messages_classify_as_signals() {
    let cases = [
        (
            r#"{"type":"processing_complete","turn_id":1}"#,
            ControlSignal::ProcessingComplete,
        ),
        (
            r#"{"type":"no_speech_detected","turn_id":1}"#,
            ControlSignal::NoSpeechDetected,
        ),
        (
            r#"{"type":"stream_started","turn_id":1}"#,
            ControlSignal::StreamStarted,
        ),
        (
            r#"{"type":"cancelled","turn_id":1}"#,
            ControlSignal::CancelAcknowledged,
        ),
        (
            r#"{"type":"navigation_hint","turn_id":1,"target":"settings"}"#,
            ControlSignal::NavigationHint("settings".to_string()),
        ),
    ];
    for (raw, expected) in cases {
        let message: InboundMessage = serde_json::from_str(raw).expect(raw);
        assert_eq!(message.classify(), Inbound::Control(expected), "{raw}");
    }
}

#[test]
fn error_without_turn_id_is_untargeted() {
    let message: InboundMessage =
        serde_json::from_str(r#"{"type":"error","message":"overloaded"}"#).expect("parse");
    assert_eq!(message.turn_id(), None);
    assert_eq!(
        message.classify(),
        Inbound::Control(ControlSignal::Error("overloaded".to_string()))
    );
}

#[test]
fn transcript_updates_are_interim() {
    let message: InboundMessage =
        serde_json::from_str(r#"{"type":"transcript_update","turn_id":1,"text":"hel"}"#)
            .expect("parse");
    assert_eq!(
        message.classify(),
        Inbound::Transcript {
            text: "hel".to_string(),
            is_final: false
        }
    );
}

#[test]
fn rejects_invalid_base64_audio() {
    let raw = r#"{"type":"audio_chunk","turn_id":1,"data":"***"}"#;
    assert!(serde_json::from_str::<InboundMessage>(raw).is_err());
}

#[test]
fn send_without_connection_reports_closed() {
    let (tx, _rx) = unbounded();
    let mut transport = TcpTransport::new("127.0.0.1:9", tx);
    let result = transport.send(&OutboundMessage::Cancel { turn_id: 0 });
    assert_eq!(result, Err(TransportError::Closed));
    assert!(!transport.is_open());
}

#[test]
fn connect_to_unresolvable_address_fails() {
    let (tx, _rx) = unbounded();
    let mut transport = TcpTransport::new("not a host:1", tx);
    assert!(matches!(
        transport.connect(),
        Err(TransportError::Connect { .. })
    ));
}

#[test]
fn tcp_round_trip_delivers_lines_and_close() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let (tx, rx) = unbounded();
    let mut transport = TcpTransport::new(addr, tx);
    transport.connect().expect("connect");
    let generation = transport.generation();
    let (mut server, _) = listener.accept().expect("accept");

    transport
        .send(&OutboundMessage::EndTurn {
            turn_id: 4,
            chunk_count: 2,
        })
        .expect("send");
    let mut line = String::new();
    BufReader::new(server.try_clone().expect("clone"))
        .read_line(&mut line)
        .expect("read line");
    let sent: OutboundMessage = serde_json::from_str(line.trim()).expect("valid json line");
    assert_eq!(
        sent,
        OutboundMessage::EndTurn {
            turn_id: 4,
            chunk_count: 2
        }
    );

    server
        .write_all(b"not json\n{\"type\":\"processing_complete\",\"turn_id\":4}\n")
        .expect("write");
    assert_eq!(
        next_transport_event(&rx),
        TransportEvent::Inbound {
            generation,
            message: InboundMessage::ProcessingComplete { turn_id: 4 }
        }
    );

    drop(server);
    match next_transport_event(&rx) {
        TransportEvent::Closed {
            generation: closed, ..
        } => assert_eq!(closed, generation),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn close_advances_generation() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let (tx, _rx) = unbounded();
    let mut transport = TcpTransport::new(addr, tx);
    transport.connect().expect("connect");
    let first = transport.generation();
    transport.close();
    assert!(!transport.is_open());
    assert_ne!(transport.generation(), first);
    transport.connect().expect("reconnect");
    assert!(transport.generation() > first);
}
