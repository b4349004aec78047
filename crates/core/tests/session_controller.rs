mod support;

use serde_json::json;
use std::sync::atomic::Ordering;
use support::{Harness, Step};
use wanda_core::{
    conversation::ConversationState,
    error::{SendError, SetupError},
    presentation::DisplayState,
    protocol::{ClientEvent, EventDirection},
    transcript::Role,
    transport::TransportEvent,
};

#[tokio::test]
async fn test_start_runs_setup_in_order() {
    let mut harness = Harness::new();
    harness
        .controller
        .start_session(Some("chad_vyhlidal".into()))
        .await
        .unwrap();

    assert_eq!(
        harness.world.ops(),
        vec![
            "mint:chad_vyhlidal",
            "connect:stun:stun.l.google.com:19302",
            "add_audio_line",
            "open_microphone:true:true:true",
            "attach_microphone",
            "open_side_channel:oai-events",
            "create_local_description",
            "exchange:ek_test:v=0 offer",
            "apply_remote_answer:v=0 answer",
        ]
    );
    assert!(harness.controller.has_session());
    assert!(!harness.controller.is_active());
    assert_eq!(harness.controller.reference_id(), Some("chad_vyhlidal"));
}

#[tokio::test]
async fn test_channel_open_sends_configuration_handshake() {
    let mut harness = Harness::new();
    harness
        .controller
        .start_session(Some("chad_vyhlidal".into()))
        .await
        .unwrap();
    harness.open_channel();

    assert!(harness.controller.is_active());
    let sent = harness.world.sent_json();
    assert_eq!(sent.len(), 5);

    assert_eq!(sent[0]["type"], "session.update");
    assert_eq!(sent[0]["session"]["modalities"], json!(["audio", "text"]));
    assert_eq!(
        sent[0]["session"]["turn_detection"],
        json!({
            "type": "server_vad",
            "threshold": 0.5,
            "prefix_padding_ms": 300,
            "silence_duration_ms": 350,
            "create_response": true,
            "interrupt_response": true
        })
    );

    assert_eq!(sent[1]["session"]["tool_choice"], "auto");
    assert_eq!(
        sent[1]["session"]["tools"][0]["name"],
        "get_talentiq_dictionary_section"
    );

    let text = |i: usize| sent[i]["item"]["content"][0]["text"].as_str().unwrap().to_string();
    assert_eq!(sent[2]["item"]["role"], "system");
    assert_eq!(text(2), "Playbook Context for chad_vyhlidal:\n\n# chad_vyhlidal");
    assert!(text(3).starts_with("TalentIQ Dictionary TOC:\n\n[\n  {"));
    assert_eq!(text(4), "Use get_talentiq_dictionary_section for definitions.");

    for frame in &sent {
        assert!(frame["event_id"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(frame.get("timestamp").is_none());
    }
    assert_eq!(harness.controller.event_log().len(), 5);
}

#[tokio::test]
async fn test_reference_content_is_truncated_to_8000_chars() {
    let mut harness = Harness::new();
    *harness.world.reference_content.lock().unwrap() = Some("é".repeat(9000));
    harness
        .controller
        .start_session(Some("long".into()))
        .await
        .unwrap();

    let context = harness.controller.preloaded_context().unwrap();
    assert_eq!(
        context.reference_content.as_ref().map(|c| c.chars().count()),
        Some(8000)
    );
}

#[tokio::test]
async fn test_preload_failures_do_not_fail_setup() {
    let mut harness = Harness::new();
    harness.world.content_down.store(true, Ordering::SeqCst);
    harness
        .controller
        .start_session(Some("chad_vyhlidal".into()))
        .await
        .unwrap();
    harness.open_channel();

    // Both configuration updates, then only the fallback prompt.
    let sent = harness.world.sent_json();
    assert_eq!(sent.len(), 3);
    assert_eq!(
        sent[2]["item"]["content"][0]["text"],
        "You are a helpful AI assistant. Please follow the user's instructions."
    );
}

#[tokio::test]
async fn test_state_follows_response_lifecycle() {
    let mut harness = Harness::connected(None).await;
    assert_eq!(harness.controller.conversation_state(), ConversationState::Idle);

    harness.receive(json!({ "type": "response.created", "event_id": "e1" }));
    assert_eq!(harness.controller.conversation_state(), ConversationState::Thinking);
    harness.receive(json!({ "type": "output_audio_buffer.started", "event_id": "e2" }));
    assert_eq!(harness.controller.conversation_state(), ConversationState::Speaking);
    harness.receive(json!({ "type": "response.audio.done", "event_id": "e3" }));
    assert_eq!(harness.controller.conversation_state(), ConversationState::Idle);

    let types = harness.controller.event_log().types_in_order(EventDirection::Inbound);
    assert_eq!(
        types,
        vec!["response.created", "output_audio_buffer.started", "response.audio.done"]
    );
}

#[tokio::test]
async fn test_channel_messages_arrive_through_transport_events() {
    let mut harness = Harness::connected(None).await;
    harness.world.emit(TransportEvent::ChannelMessage(
        json!({ "type": "response.created" }).to_string(),
    ));
    harness.pump();
    assert_eq!(harness.controller.conversation_state(), ConversationState::Thinking);
}

#[tokio::test]
async fn test_unknown_events_are_logged_without_state_change() {
    let mut harness = Harness::connected(None).await;
    harness.receive(json!({ "type": "response.created" }));

    let before = harness.controller.event_log().len();
    let calls = harness.receive(json!({ "type": "rate_limits.updated", "rate_limits": [] }));
    assert!(calls.is_empty());
    assert_eq!(harness.controller.conversation_state(), ConversationState::Thinking);
    assert_eq!(harness.controller.event_log().len(), before + 1);

    let latest = harness.controller.event_log().latest().unwrap();
    assert_eq!(latest.event_type, "rate_limits.updated");
    assert_eq!(latest.payload["rate_limits"], json!([]));
    assert!(latest.payload["timestamp"].is_string());
}

#[tokio::test]
async fn test_tool_call_from_streamed_fragments() {
    let mut harness = Harness::connected(None).await;
    assert!(
        harness
            .receive(json!({
                "type": "response.output_item.added",
                "item": { "type": "function_call", "name": "get_section", "call_id": "c1" }
            }))
            .is_empty()
    );
    harness.receive(json!({
        "type": "response.function_call_arguments.delta", "call_id": "c1", "delta": "{\"section_id\":"
    }));
    harness.receive(json!({
        "type": "response.function_call_arguments.delta", "call_id": "c1", "delta": "\"abc\"}"
    }));
    let calls = harness.receive(json!({
        "type": "response.function_call_arguments.done", "call_id": "c1", "arguments": ""
    }));

    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].call_id, "c1");
    assert_eq!(calls[0].name, "get_section");
    assert_eq!(calls[0].arguments, json!({ "section_id": "abc" }));
}

#[tokio::test]
async fn test_unknown_tool_reports_error_then_requests_response() {
    let mut harness = Harness::connected(None).await;
    harness.receive(json!({
        "type": "response.output_item.added",
        "item": { "type": "function_call", "name": "get_section", "call_id": "c1" }
    }));
    let calls = harness.receive(json!({
        "type": "response.function_call_arguments.done", "call_id": "c1", "arguments": "{}"
    }));
    let call = calls.into_iter().next().unwrap();
    harness.controller.run_tool_call(call).await;

    let sent = harness.world.sent_json();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["item"]["type"], "function_call_output");
    assert_eq!(sent[0]["item"]["call_id"], "c1");
    let output: serde_json::Value =
        serde_json::from_str(sent[0]["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(
        output,
        json!({
            "error": "unknown_function",
            "message": "Unknown function: get_section. Must be get_talentiq_dictionary_section."
        })
    );
    assert_eq!(sent[1]["type"], "response.create");
    assert_eq!(sent[1]["response"]["modalities"], json!(["audio", "text"]));
    assert!(harness.controller.tool_calls().is_empty());
}

#[tokio::test]
async fn test_dictionary_tool_round_trip() {
    let mut harness = Harness::connected(None).await;
    harness.receive(json!({
        "type": "response.output_item.added",
        "item": { "type": "function_call", "name": "get_talentiq_dictionary_section", "call_id": "c9" }
    }));
    let calls = harness.receive(json!({
        "type": "response.function_call_arguments.done",
        "call_id": "c9",
        "arguments": "{\"section_id\":\"grit\"}"
    }));
    let outcome = harness
        .controller
        .run_tool_call(calls.into_iter().next().unwrap())
        .await;

    assert!(outcome.is_success());
    assert_eq!(*harness.world.section_requests.lock().unwrap(), vec!["grit"]);
    let sent = harness.world.sent_json();
    let output: serde_json::Value =
        serde_json::from_str(sent[0]["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(output["id"], "grit");
    assert_eq!(harness.world.sent_types()[1], "response.create");
}

#[tokio::test]
async fn test_failing_tool_reports_tool_error() {
    let mut harness = Harness::connected(None).await;
    harness.receive(json!({
        "type": "response.output_item.added",
        "item": { "type": "function_call", "name": "get_talentiq_dictionary_section", "id": "item_1" }
    }));
    let calls = harness.receive(json!({
        "type": "response.function_call_arguments.done",
        "call_id": "item_1",
        "arguments": "{\"section_id\":\"missing\"}"
    }));
    harness
        .controller
        .run_tool_call(calls.into_iter().next().unwrap())
        .await;

    let sent = harness.world.sent_json();
    let output: serde_json::Value =
        serde_json::from_str(sent[0]["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(output["error"], "tool_error");
    assert_eq!(output["message"], "section not found");
    assert_eq!(sent[1]["type"], "response.create");
    assert!(harness.controller.tool_calls().get("item_1").is_none());
}

#[tokio::test]
async fn test_text_while_agent_speaks_cancels_first() {
    let mut harness = Harness::connected(None).await;
    harness.make_agent_speak();

    harness.controller.send_text_message("hi");

    assert!(!harness.controller.is_agent_speaking());
    assert_eq!(
        harness.world.sent_types(),
        vec!["response.cancel", "conversation.item.create", "response.create"]
    );
    let sent = harness.world.sent_json();
    assert_eq!(sent[1]["item"]["role"], "user");
    assert_eq!(sent[1]["item"]["content"][0]["text"], "hi");

    let entries = harness.controller.transcript().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].role, Role::User);
    assert!(entries[0].is_final);
}

#[tokio::test]
async fn test_text_while_agent_silent_does_not_cancel() {
    let mut harness = Harness::connected(None).await;
    harness.controller.send_text_message("hello there");
    assert_eq!(
        harness.world.sent_types(),
        vec!["conversation.item.create", "response.create"]
    );
}

#[tokio::test]
async fn test_agent_speech_drives_display_state() {
    let mut harness = Harness::connected(None).await;
    assert_eq!(harness.controller.snapshot().display_state, DisplayState::Waiting);
    harness.make_agent_speak();
    let snapshot = harness.controller.snapshot();
    assert!(snapshot.is_agent_speaking);
    assert_eq!(snapshot.display_state, DisplayState::AgentSpeaking);
}

#[tokio::test]
async fn test_transcripts_for_both_roles() {
    let mut harness = Harness::connected(None).await;
    harness.receive(json!({ "type": "conversation.item.input_audio_transcription.delta", "delta": "what is" }));
    harness.receive(json!({ "type": "response.created" }));
    harness.receive(json!({ "type": "response.audio_transcript.delta", "delta": "Grit " }));
    harness.receive(json!({ "type": "response.audio_transcript.delta", "delta": "is" }));
    harness.receive(json!({
        "type": "conversation.item.input_audio_transcription.completed", "transcript": "What is grit?"
    }));
    assert_eq!(harness.controller.live_transcript(), "Grit is");
    harness.receive(json!({ "type": "response.audio_transcript.done", "transcript": "Grit is resilience." }));

    let entries = harness.controller.transcript().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!((entries[0].role, entries[0].text.as_str()), (Role::User, "What is grit?"));
    assert_eq!(
        (entries[1].role, entries[1].text.as_str()),
        (Role::Agent, "Grit is resilience.")
    );
    assert!(entries.iter().all(|e| e.is_final));
    assert_eq!(harness.controller.live_transcript(), "Grit is resilience.");
}

fn transcript_view(harness: &Harness) -> Vec<(Role, String, bool)> {
    harness
        .controller
        .transcript()
        .entries()
        .iter()
        .map(|e| (e.role, e.text.clone(), e.is_final))
        .collect()
}

#[tokio::test]
async fn test_interrupted_response_keeps_turn_order() {
    let mut harness = Harness::connected(None).await;
    harness.receive(json!({ "type": "response.created" }));
    harness.receive(json!({ "type": "response.audio_transcript.delta", "delta": "Grit is" }));
    harness.make_agent_speak();

    harness.controller.send_text_message("hi");
    harness.receive(json!({ "type": "response.created" }));
    harness.receive(json!({ "type": "response.audio_transcript.delta", "delta": "Hello" }));

    assert_eq!(
        transcript_view(&harness),
        vec![
            (Role::Agent, "Grit is".to_string(), true),
            (Role::User, "hi".to_string(), true),
            (Role::Agent, "Hello".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn test_new_response_closes_unfinished_agent_turn() {
    let mut harness = Harness::connected(None).await;
    harness.receive(json!({ "type": "response.created" }));
    harness.receive(json!({ "type": "response.audio_transcript.delta", "delta": "First" }));
    harness.receive(json!({ "type": "response.created" }));
    harness.receive(json!({ "type": "response.audio_transcript.delta", "delta": "Second" }));
    harness.receive(json!({ "type": "response.audio_transcript.done", "transcript": "Second." }));

    assert_eq!(
        transcript_view(&harness),
        vec![
            (Role::Agent, "First".to_string(), true),
            (Role::Agent, "Second.".to_string(), true),
        ]
    );
}

#[tokio::test]
async fn test_new_user_speech_closes_unfinished_user_turn() {
    let mut harness = Harness::connected(None).await;
    harness.receive(json!({ "type": "input_audio_buffer.speech_started" }));
    harness.receive(json!({ "type": "conversation.item.input_audio_transcription.delta", "delta": "what is" }));
    harness.receive(json!({ "type": "input_audio_buffer.speech_stopped" }));
    harness.receive(json!({ "type": "input_audio_buffer.speech_started" }));
    harness.receive(json!({ "type": "conversation.item.input_audio_transcription.delta", "delta": "never mind" }));

    assert_eq!(
        transcript_view(&harness),
        vec![
            (Role::User, "what is".to_string(), true),
            (Role::User, "never mind".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn test_unsent_text_is_not_transcribed() {
    let mut harness = Harness::new();
    harness.controller.send_text_message("anyone?");
    assert!(harness.controller.transcript().is_empty());

    let mut harness = Harness::new();
    harness.controller.start_session(None).await.unwrap();
    harness.controller.send_text_message("too early");
    assert!(harness.controller.transcript().is_empty());
    assert!(harness.world.sent_json().is_empty());
}

#[tokio::test]
async fn test_send_without_channel_is_not_logged() {
    let mut harness = Harness::new();
    assert!(!harness.controller.send_event(ClientEvent::response_create()));
    harness.controller.send_text_message("anyone?");
    assert!(harness.controller.event_log().is_empty());

    let err = harness
        .controller
        .try_send_event(ClientEvent::response_cancel())
        .unwrap_err();
    assert!(matches!(err, SendError::ChannelUnavailable(_)));
}

#[tokio::test]
async fn test_send_before_channel_opens_is_not_logged() {
    let mut harness = Harness::new();
    harness.controller.start_session(None).await.unwrap();
    assert!(!harness.controller.send_event(ClientEvent::response_create()));
    assert!(harness.controller.event_log().is_empty());
    assert!(harness.world.sent_json().is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mut harness = Harness::new();
    harness.controller.stop_session().await;
    harness.controller.stop_session().await;
    assert!(harness.world.ops().is_empty());

    let snapshot = harness.controller.snapshot();
    assert!(!snapshot.is_active);
    assert!(!snapshot.is_user_speaking);
    assert!(!snapshot.is_agent_speaking);
    assert!(!snapshot.is_microphone_muted);
    assert_eq!(snapshot.conversation_state, ConversationState::Idle);
}

#[tokio::test]
async fn test_stop_releases_everything_and_resets_state() {
    let mut harness = Harness::connected(None).await;
    harness.receive(json!({ "type": "response.created" }));
    harness.receive(json!({ "type": "response.audio_transcript.delta", "delta": "Hi" }));
    harness.receive(json!({
        "type": "response.output_item.added",
        "item": { "type": "function_call", "name": "x", "call_id": "c1" }
    }));
    harness.make_agent_speak();
    harness.controller.set_microphone_muted(true);

    let before = harness.world.ops().len();
    harness.controller.stop_session().await;
    assert_eq!(
        harness.world.ops()[before..],
        ["close_channel", "stop_outbound_tracks", "close_peer", "stop_microphone"]
    );

    assert!(!harness.controller.has_session());
    assert!(!harness.controller.is_active());
    assert!(!harness.controller.is_agent_speaking());
    assert!(!harness.controller.is_microphone_muted());
    assert_eq!(harness.controller.conversation_state(), ConversationState::Idle);
    assert!(harness.controller.transcript().is_empty());
    assert!(harness.controller.tool_calls().is_empty());
    assert!(harness.controller.frame_ticker().is_none());

    harness.controller.stop_session().await;
    assert_eq!(harness.world.ops().len(), before + 4);
}

#[tokio::test]
async fn test_teardown_continues_past_failing_steps() {
    let mut harness = Harness::connected(None).await;
    harness.world.fail_teardown.store(true, Ordering::SeqCst);
    let before = harness.world.ops().len();
    harness.controller.stop_session().await;
    assert_eq!(
        harness.world.ops()[before..],
        ["close_channel", "stop_outbound_tracks", "close_peer", "stop_microphone"]
    );
}

#[tokio::test]
async fn test_events_from_previous_session_are_ignored() {
    let mut harness = Harness::connected(None).await;
    let stale_sink = harness.world.sink.lock().unwrap().clone().unwrap();

    harness.controller.start_session(None).await.unwrap();
    harness.open_channel();
    harness.world.clear_sent();

    stale_sink.emit(TransportEvent::ChannelMessage(
        json!({ "type": "response.created" }).to_string(),
    ));
    stale_sink.emit(TransportEvent::ChannelOpen);
    harness.pump();

    assert_eq!(harness.controller.conversation_state(), ConversationState::Idle);
    assert!(harness.world.sent_json().is_empty());
}

#[tokio::test]
async fn test_restart_tears_down_previous_session_first() {
    let mut harness = Harness::connected(Some("a")).await;
    harness.receive(json!({ "type": "response.created" }));
    let before = harness.world.ops().len();

    harness.controller.start_session(Some("b".into())).await.unwrap();
    let ops = harness.world.ops();
    assert_eq!(ops[before], "close_channel");
    assert_eq!(ops[before + 4], "mint:b");
    assert!(harness.controller.event_log().is_empty());
    assert_eq!(harness.controller.conversation_state(), ConversationState::Idle);
}

#[tokio::test]
async fn test_credential_failure_opens_nothing() {
    let mut harness = Harness::new();
    harness.world.fail_at(Step::Credential);
    let err = harness.controller.start_session(None).await.unwrap_err();
    assert!(matches!(err, SetupError::Credential(_)));
    assert_eq!(harness.world.ops(), vec!["mint:-"]);
    assert!(!harness.controller.has_session());
}

#[tokio::test]
async fn test_microphone_failure_releases_peer() {
    let mut harness = Harness::new();
    harness.world.fail_at(Step::Microphone);
    let err = harness.controller.start_session(None).await.unwrap_err();
    assert!(matches!(err, SetupError::Microphone(_)));
    let ops = harness.world.ops();
    assert_eq!(ops[ops.len() - 2..], ["stop_outbound_tracks", "close_peer"]);
    assert!(!harness.controller.has_session());
}

#[tokio::test]
async fn test_exchange_failure_releases_everything() {
    let mut harness = Harness::new();
    harness.world.fail_at(Step::Exchange);
    let err = harness.controller.start_session(None).await.unwrap_err();
    assert!(matches!(err, SetupError::Negotiation(_)));
    let ops = harness.world.ops();
    assert_eq!(
        ops[ops.len() - 4..],
        ["close_channel", "stop_outbound_tracks", "close_peer", "stop_microphone"]
    );
    assert!(!harness.controller.has_session());
    assert!(harness.controller.frame_ticker().is_none());
}

#[tokio::test]
async fn test_events_from_failed_attempt_are_ignored() {
    let mut harness = Harness::new();
    harness.world.fail_at(Step::Answer);
    assert!(harness.controller.start_session(None).await.is_err());
    harness.world.emit(TransportEvent::ChannelOpen);
    harness.pump();
    assert!(!harness.controller.is_active());
}

#[tokio::test]
async fn test_microphone_mute_toggles_track() {
    let mut harness = Harness::connected(None).await;
    assert!(harness.controller.toggle_microphone());
    assert!(!harness.world.mic_enabled.load(Ordering::SeqCst));
    assert!(!harness.controller.toggle_microphone());
    assert!(harness.world.mic_enabled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_user_speech_detected_from_microphone() {
    let mut harness = Harness::connected(None).await;
    harness.world.speak_into_microphone(0.4);
    let t0 = std::time::Instant::now();
    assert!(!harness.controller.on_analysis_tick(t0));
    assert!(
        harness
            .controller
            .on_analysis_tick(t0 + std::time::Duration::from_millis(100))
    );
    assert_eq!(harness.controller.snapshot().display_state, DisplayState::UserSpeaking);
}

#[tokio::test]
async fn test_channel_close_marks_session_inactive() {
    let mut harness = Harness::connected(None).await;
    harness.world.emit(TransportEvent::ChannelClosed);
    harness.pump();
    assert!(!harness.controller.is_active());
    assert!(harness.controller.has_session());
}
