//! Live session integration tests
//!
//! Exercises the transport state machine and the conversation driver
//! against an in-memory connector.

use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use voice_studio::Error;
use voice_studio::live::{
    EndReason, LiveController, LiveConversation, LiveOptions, SessionEvent, SessionState,
    SessionTransport,
};
use voice_studio::voice::{
    CapturePipeline, FrameSink, INPUT_SAMPLE_RATE, Mixer, OUTPUT_SAMPLE_RATE, VisualizationFeed,
    encode_frame,
};

mod common;

use common::{FakeConnector, FakeSource, pcm, session_config};

const FRAME: usize = 4096;

async fn open_transport(connector: &FakeConnector) -> SessionTransport {
    let mut transport = SessionTransport::new();
    assert_ok!(transport.connect(connector, &session_config()).await);
    transport
}

async fn start_conversation(
    connector: &FakeConnector,
    source: &FakeSource,
    feed: &Arc<VisualizationFeed>,
) -> LiveConversation<FakeSource, Mixer> {
    LiveConversation::start(
        connector,
        LiveOptions::new(session_config()),
        source.clone(),
        Mixer::new(OUTPUT_SAMPLE_RATE),
        Arc::clone(feed),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_transport_opens_and_sends() {
    let connector = FakeConnector::new();
    let mut transport = open_transport(&connector).await;
    let mut remote = connector.take_remote();

    assert_eq!(transport.state(), SessionState::Open);
    assert_eq!(connector.opened()[0].voice, "Zephyr");

    assert_ok!(transport.send(encode_frame(&[0.25; 8], INPUT_SAMPLE_RATE)));
    let sent = remote.outbound.recv().await.unwrap();
    assert_eq!(sent.mime_type, "audio/pcm;rate=16000");
    assert_eq!(sent.data.len(), 16);
}

#[tokio::test]
async fn test_transport_state_is_observable() {
    let connector = FakeConnector::new();
    let mut transport = SessionTransport::new();
    let states = transport.subscribe_state();
    assert_eq!(*states.borrow(), SessionState::Idle);

    assert_ok!(transport.connect(&connector, &session_config()).await);
    assert_eq!(*states.borrow(), SessionState::Open);

    transport.close();
    assert_eq!(*states.borrow(), SessionState::Closed);
}

#[tokio::test]
async fn test_connect_failure_is_errored() {
    let connector = FakeConnector::failing("handshake refused");
    let mut transport = SessionTransport::new();

    let err = assert_err!(transport.connect(&connector, &session_config()).await);
    assert!(matches!(err, Error::Connection(msg) if msg.contains("handshake refused")));
    assert_eq!(transport.state(), SessionState::Errored);

    let err = assert_err!(transport.send(encode_frame(&[0.0], INPUT_SAMPLE_RATE)));
    assert!(matches!(err, Error::NotOpen(state) if state == "errored"));
}

#[tokio::test]
async fn test_transport_connects_once() {
    let connector = FakeConnector::new();
    let mut transport = open_transport(&connector).await;

    assert_err!(transport.connect(&connector, &session_config()).await);
    assert_eq!(connector.opened().len(), 1);
    assert_eq!(transport.state(), SessionState::Open);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let connector = FakeConnector::new();
    let mut transport = open_transport(&connector).await;
    let mut remote = connector.take_remote();

    transport.close();
    transport.close();

    assert_eq!(transport.state(), SessionState::Closed);
    assert!(remote.was_shut_down());
    assert!(transport.next_event().await.is_none());

    let err = assert_err!(transport.send(encode_frame(&[0.0], INPUT_SAMPLE_RATE)));
    assert!(matches!(err, Error::NotOpen(state) if state == "closed"));
}

#[tokio::test]
async fn test_events_arrive_in_order() {
    let connector = FakeConnector::new();
    let mut transport = open_transport(&connector).await;
    let remote = connector.take_remote();

    remote.emit(SessionEvent::AudioChunk(vec![1, 0]));
    remote.emit(SessionEvent::Interrupted);
    remote.emit(SessionEvent::TurnComplete);

    assert_eq!(
        transport.next_event().await,
        Some(SessionEvent::AudioChunk(vec![1, 0]))
    );
    assert_eq!(transport.next_event().await, Some(SessionEvent::Interrupted));
    assert_eq!(transport.next_event().await, Some(SessionEvent::TurnComplete));
    assert_eq!(transport.state(), SessionState::Open);
}

#[tokio::test]
async fn test_remote_close_ends_transport() {
    let connector = FakeConnector::new();
    let mut transport = open_transport(&connector).await;
    let remote = connector.take_remote();

    remote.emit(SessionEvent::Closed);

    assert_eq!(transport.next_event().await, Some(SessionEvent::Closed));
    assert_eq!(transport.state(), SessionState::Errored);
    assert!(transport.next_event().await.is_none());

    // Closing afterwards only releases
    transport.close();
    assert_eq!(transport.state(), SessionState::Errored);
}

#[tokio::test]
async fn test_vanished_remote_reads_as_closed() {
    let connector = FakeConnector::new();
    let mut transport = open_transport(&connector).await;
    drop(connector.take_remote());

    assert_eq!(transport.next_event().await, Some(SessionEvent::Closed));
    assert_eq!(transport.state(), SessionState::Errored);
}

#[tokio::test]
async fn test_remote_error_marks_errored() {
    let connector = FakeConnector::new();
    let mut transport = open_transport(&connector).await;
    let remote = connector.take_remote();

    remote.emit(SessionEvent::Errored("socket reset".to_string()));

    assert_eq!(
        transport.next_event().await,
        Some(SessionEvent::Errored("socket reset".to_string()))
    );
    assert_eq!(transport.state(), SessionState::Errored);
    assert!(!transport.is_open());
}

#[test]
fn test_frames_dropped_without_session() {
    let source = FakeSource::new();
    let mut capture = CapturePipeline::new(source.clone(), FRAME).unwrap();
    let mut transport = SessionTransport::new();

    source.push(&vec![0.5; FRAME * 2 + 10]);
    let sink: &mut dyn FrameSink = &mut transport;
    let report = capture.tick(Some(sink));

    assert_eq!(report.frames, 2);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.dropped, 2);
    assert!((capture.level() - 0.5).abs() < 1e-6);

    // Dropped frames are gone, not queued
    let report = capture.tick(None);
    assert_eq!(report.frames, 0);
}

#[tokio::test]
async fn test_capture_tick_forwards_frames() {
    let connector = FakeConnector::new();
    let source = FakeSource::new();
    let feed = Arc::new(VisualizationFeed::new());
    let mut conversation = start_conversation(&connector, &source, &feed).await;
    let mut remote = connector.take_remote();

    source.push(&vec![0.5; FRAME + 100]);
    conversation.on_tick();

    let chunk = remote.outbound.recv().await.unwrap();
    assert_eq!(chunk.data.len(), FRAME * 2);
    assert!(remote.outbound.try_recv().is_err());

    let input = feed.input();
    assert!((input.rms - 0.5).abs() < 1e-6);
    assert!(!input.is_silent());

    // The partial window completes on a later tick
    source.push(&vec![0.5; FRAME - 100]);
    conversation.on_tick();
    assert!(remote.outbound.recv().await.is_some());
}

#[tokio::test]
async fn test_input_captured_while_connecting_is_not_sent() {
    let connector = FakeConnector::new();
    let source = FakeSource::new();
    let feed = Arc::new(VisualizationFeed::new());

    // The device is already running while the session connects
    source.push(&vec![0.5; FRAME * 3]);
    let mut conversation = start_conversation(&connector, &source, &feed).await;
    let mut remote = connector.take_remote();

    conversation.on_tick();
    assert!(remote.outbound.try_recv().is_err());
    assert!(feed.input().is_silent());

    // Input after open flows normally
    source.push(&vec![0.5; FRAME]);
    conversation.on_tick();
    assert!(remote.outbound.recv().await.is_some());
    assert!(remote.outbound.try_recv().is_err());
}

#[tokio::test]
async fn test_audio_chunks_schedule_gaplessly() {
    let connector = FakeConnector::new();
    let source = FakeSource::new();
    let feed = Arc::new(VisualizationFeed::new());
    let mut conversation = start_conversation(&connector, &source, &feed).await;

    for _ in 0..3 {
        let outcome = conversation.handle_event(SessionEvent::AudioChunk(pcm(2400, 1000)));
        assert_eq!(assert_ok!(outcome), None);
    }

    assert_eq!(conversation.scheduler().active_count(), 3);
    let cursor = conversation.scheduler().next_start_time().unwrap();
    assert!((cursor - 0.3).abs() < 1e-9);
}

#[tokio::test]
async fn test_interruption_stops_playback() {
    let connector = FakeConnector::new();
    let source = FakeSource::new();
    let feed = Arc::new(VisualizationFeed::new());
    let mut conversation = start_conversation(&connector, &source, &feed).await;

    assert_ok!(conversation.handle_event(SessionEvent::AudioChunk(pcm(2400, 1000))));
    assert_ok!(conversation.handle_event(SessionEvent::AudioChunk(pcm(2400, 1000))));
    assert_ok!(conversation.handle_event(SessionEvent::Interrupted));

    assert!(conversation.scheduler().is_idle());
    assert!(conversation.scheduler().next_start_time().is_none());
    assert_eq!(conversation.scheduler().output().active_voices(), 0);
    assert!(conversation.transport().is_open());
}

#[tokio::test]
async fn test_run_ends_on_remote_close() {
    let connector = FakeConnector::new();
    let source = FakeSource::new();
    let feed = Arc::new(VisualizationFeed::new());
    let mut conversation = start_conversation(&connector, &source, &feed).await;
    let remote = connector.take_remote();

    remote.emit(SessionEvent::AudioChunk(pcm(2400, 1000)));
    remote.emit(SessionEvent::TurnComplete);
    remote.emit(SessionEvent::Closed);

    let reason = assert_ok!(conversation.run(std::future::pending::<()>()).await);
    assert_eq!(reason, EndReason::RemoteClosed);

    assert_eq!(conversation.transport().state(), SessionState::Errored);
    assert!(!source.is_running());
    assert!(conversation.scheduler().is_idle());
    assert!(feed.input().is_silent());
    assert!(feed.output().is_silent());
}

#[tokio::test]
async fn test_run_surfaces_remote_error_after_teardown() {
    let connector = FakeConnector::new();
    let source = FakeSource::new();
    let feed = Arc::new(VisualizationFeed::new());
    let mut conversation = start_conversation(&connector, &source, &feed).await;
    let remote = connector.take_remote();

    remote.emit(SessionEvent::Errored("socket reset".to_string()));

    let err = assert_err!(conversation.run(std::future::pending::<()>()).await);
    assert!(matches!(err, Error::Connection(msg) if msg == "socket reset"));
    assert_eq!(conversation.transport().state(), SessionState::Errored);
    assert!(!source.is_running());
}

#[tokio::test]
async fn test_shutdown_signal_stops_conversation() {
    let connector = FakeConnector::new();
    let source = FakeSource::new();
    let feed = Arc::new(VisualizationFeed::new());
    let mut conversation = start_conversation(&connector, &source, &feed).await;
    let mut remote = connector.take_remote();

    let reason = assert_ok!(conversation.run(std::future::ready(())).await);
    assert_eq!(reason, EndReason::Stopped);

    assert_eq!(conversation.transport().state(), SessionState::Closed);
    assert!(remote.was_shut_down());
    assert!(!source.is_running());

    // A second stop is a no-op
    conversation.stop();
    assert_eq!(conversation.transport().state(), SessionState::Closed);
}

#[tokio::test]
async fn test_failed_start_releases_microphone() {
    let connector = FakeConnector::failing("no route to host");
    let source = FakeSource::new();
    let feed = Arc::new(VisualizationFeed::new());

    let result = LiveConversation::start(
        &connector,
        LiveOptions::new(session_config()),
        source.clone(),
        Mixer::new(OUTPUT_SAMPLE_RATE),
        Arc::clone(&feed),
    )
    .await;

    assert!(matches!(result, Err(Error::Connection(_))));
    assert!(!source.is_running());
    assert!(feed.input().is_silent());
}

#[tokio::test]
async fn test_controller_replaces_conversation() {
    let connector = FakeConnector::new();
    let feed = Arc::new(VisualizationFeed::new());
    let mut controller = LiveController::new();

    let first_source = FakeSource::new();
    assert_ok!(
        controller
            .start(
                &connector,
                LiveOptions::new(session_config()),
                first_source.clone(),
                Mixer::new(OUTPUT_SAMPLE_RATE),
                Arc::clone(&feed),
            )
            .await
    );
    let mut first_remote = connector.take_remote();

    let second_source = FakeSource::new();
    assert_ok!(
        controller
            .start(
                &connector,
                LiveOptions::new(session_config()),
                second_source.clone(),
                Mixer::new(OUTPUT_SAMPLE_RATE),
                Arc::clone(&feed),
            )
            .await
    );

    assert!(first_remote.was_shut_down());
    assert!(!first_source.is_running());
    assert!(second_source.is_running());
    assert!(controller.is_active());
    assert!(controller.active().unwrap().transport().is_open());

    controller.stop();
    assert!(!controller.is_active());
    assert!(!second_source.is_running());
}
