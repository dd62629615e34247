use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use vocord_audio::{AudioFrame, PlaybackSink};
use vocord_engine::{
    spawn, AllowAllGate, Collaborators, ConversationEvent, ConversationHandle, EngineConfig,
    ErrorKind, PaywallGate, StaticTokenProvider, TracingConversationLogger,
};
use vocord_foundation::{EngineError, TransportError};
use vocord_transport::client::{InboundEvent, RealtimeConnection, RealtimeTransport};
use vocord_transport::pcm;
use vocord_transport::protocol::{ClientEvent, ResponseInfo, ServerEvent, SessionInfo};

// ---- scripted transport ----

enum ConnectScript {
    Ok,
    Fail(TransportError),
}

#[derive(Clone)]
struct MockLink {
    server_tx: mpsc::Sender<InboundEvent>,
    sent: Arc<Mutex<Vec<ClientEvent>>>,
}

impl MockLink {
    async fn server_event(&self, event: ServerEvent) {
        self.server_tx
            .send(InboundEvent::Event(event))
            .await
            .expect("engine dropped the connection");
    }

    async fn drop_connection(&self, reason: &str) {
        let _ = self
            .server_tx
            .send(InboundEvent::Disconnected(reason.to_string()))
            .await;
    }

    fn appended_frames(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ClientEvent::InputAudioBufferAppend { .. }))
            .count()
    }

    fn sent_cancel(&self) -> bool {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, ClientEvent::ResponseCancel))
    }
}

struct MockTransport {
    script: Mutex<VecDeque<ConnectScript>>,
    links: Mutex<Vec<MockLink>>,
}

impl MockTransport {
    fn new(script: Vec<ConnectScript>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            links: Mutex::new(Vec::new()),
        }
    }

    fn link(&self, index: usize) -> MockLink {
        self.links.lock().unwrap()[index].clone()
    }

    fn connect_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

#[async_trait]
impl RealtimeTransport for MockTransport {
    async fn connect(&self, _token: &str) -> Result<RealtimeConnection, TransportError> {
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectScript::Fail(TransportError::Disconnected(
                "script exhausted".into(),
            )));
        match next {
            ConnectScript::Fail(e) => Err(e),
            ConnectScript::Ok => {
                let (out_tx, mut out_rx) = mpsc::channel(64);
                let (in_tx, in_rx) = mpsc::channel(64);
                let sent = Arc::new(Mutex::new(Vec::new()));

                in_tx
                    .send(InboundEvent::Event(ServerEvent::SessionCreated {
                        session: SessionInfo {
                            id: "sess_mock".into(),
                        },
                    }))
                    .await
                    .unwrap();

                let sent_in_task = sent.clone();
                let task = tokio::spawn(async move {
                    while let Some(event) = out_rx.recv().await {
                        sent_in_task.lock().unwrap().push(event);
                    }
                });

                self.links.lock().unwrap().push(MockLink {
                    server_tx: in_tx,
                    sent,
                });

                Ok(RealtimeConnection {
                    outbound: out_tx,
                    events: in_rx,
                    task,
                })
            }
        }
    }
}

// ---- in-memory playback sink ----

#[derive(Default)]
struct SinkState {
    written: Vec<i16>,
    flushes: usize,
}

struct TestSink(Arc<Mutex<SinkState>>);

impl PlaybackSink for TestSink {
    fn write(&mut self, samples: &[i16]) -> usize {
        self.0.lock().unwrap().written.extend_from_slice(samples);
        samples.len()
    }

    fn flush(&mut self) {
        self.0.lock().unwrap().flushes += 1;
    }

    fn buffered_samples(&self) -> usize {
        0
    }
}

struct DenyGate;

impl PaywallGate for DenyGate {
    fn is_authorized(&self) -> bool {
        false
    }
}

// ---- fixture ----

struct Fixture {
    handle: ConversationHandle,
    events: mpsc::Receiver<ConversationEvent>,
    frames_tx: mpsc::Sender<AudioFrame>,
    transport: Arc<MockTransport>,
    sink: Arc<Mutex<SinkState>>,
}

fn fixture_with_gate(script: Vec<ConnectScript>, gate: Arc<dyn PaywallGate>) -> Fixture {
    let transport = Arc::new(MockTransport::new(script));
    let (frames_tx, frames_rx) = mpsc::channel(256);
    let sink = Arc::new(Mutex::new(SinkState::default()));

    let mut config = EngineConfig::default();
    config.transport.url = "wss://mock.test/realtime".into();

    let (handle, events, _task) = spawn(
        config,
        frames_rx,
        Box::new(TestSink(sink.clone())),
        Collaborators {
            transport: transport.clone(),
            tokens: Arc::new(StaticTokenProvider::new("tok-test")),
            logger: Arc::new(TracingConversationLogger),
            gate,
        },
        None,
    )
    .expect("engine config is valid");

    Fixture {
        handle,
        events,
        frames_tx,
        transport,
        sink,
    }
}

fn fixture(script: Vec<ConnectScript>) -> Fixture {
    fixture_with_gate(script, Arc::new(AllowAllGate))
}

async fn next_event(rx: &mut mpsc::Receiver<ConversationEvent>) -> ConversationEvent {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

async fn assert_no_event(rx: &mut mpsc::Receiver<ConversationEvent>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected event: {:?}", event);
    }
}

fn tone_frame(dbfs: f32) -> AudioFrame {
    let amplitude = 10f32.powf(dbfs / 20.0) * std::f32::consts::SQRT_2 * 32767.0;
    let samples: Vec<i16> = (0..480)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * 440.0 * i as f32 / 24_000.0;
            (phase.sin() * amplitude) as i16
        })
        .collect();
    frame_from(samples)
}

fn silence_frame() -> AudioFrame {
    frame_from(vec![0i16; 480])
}

fn frame_from(samples: Vec<i16>) -> AudioFrame {
    AudioFrame {
        samples: Arc::from(samples),
        sample_rate: 24_000,
        channels: 1,
        timestamp_ms: 0,
        captured_at: std::time::Instant::now(),
    }
}

async fn drive_to_user_speaking(fx: &mut Fixture) {
    for _ in 0..3 {
        fx.frames_tx.send(tone_frame(-20.0)).await.unwrap();
    }
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::SpeechStarted);
}

// ---- tests ----

#[tokio::test]
async fn start_connects_and_detects_speech() {
    let mut fx = fixture(vec![ConnectScript::Ok]);

    fx.handle.start().await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    // Connected must arrive promptly once the transport resolves
    let connected = timeout(Duration::from_millis(200), fx.events.recv())
        .await
        .expect("Connected was late")
        .unwrap();
    assert_eq!(connected, ConversationEvent::Connected);

    let link = fx.transport.link(0);
    assert!(matches!(
        link.sent.lock().unwrap().first(),
        Some(ClientEvent::SessionUpdate { .. })
    ));

    // Two qualifying frames are not enough for an onset
    fx.frames_tx.send(tone_frame(-20.0)).await.unwrap();
    fx.frames_tx.send(tone_frame(-20.0)).await.unwrap();
    assert_no_event(&mut fx.events).await;

    // The third crosses the continuity trigger
    fx.frames_tx.send(tone_frame(-20.0)).await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::SpeechStarted);

    // Prefix padding plus the live frame all reached the transport
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(link.appended_frames() >= 3);

    // 1.5 s of trailing silence ends the segment
    for _ in 0..80 {
        fx.frames_tx.send(silence_frame()).await.unwrap();
    }
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::SpeechStopped);
}

#[tokio::test]
async fn invalid_token_fails_without_reconnecting() {
    let mut fx = fixture(vec![ConnectScript::Fail(TransportError::Unauthorized)]);

    let err = fx.handle.start().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Transport(TransportError::Unauthorized)
    ));

    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    match next_event(&mut fx.events).await {
        ConversationEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::Auth),
        other => panic!("expected auth error, got {:?}", other),
    }
    // Auth failures never enter the reconnect path
    assert_no_event(&mut fx.events).await;
    assert_eq!(fx.transport.connect_count(), 0);
}

#[tokio::test]
async fn paywall_rejection_is_terminal() {
    let mut fx = fixture_with_gate(vec![ConnectScript::Ok], Arc::new(DenyGate));

    let err = fx.handle.start().await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized));

    match next_event(&mut fx.events).await {
        ConversationEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::Unauthorized),
        other => panic!("expected unauthorized error, got {:?}", other),
    }
    assert_eq!(fx.transport.connect_count(), 0);
}

#[tokio::test]
async fn second_start_is_rejected_while_active() {
    let mut fx = fixture(vec![ConnectScript::Ok, ConnectScript::Ok]);
    fx.handle.start().await.unwrap();
    assert!(matches!(
        fx.handle.start().await,
        Err(EngineError::SessionActive)
    ));
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);
    assert_eq!(fx.transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_retries_with_backoff_then_gives_up() {
    let mut fx = fixture(vec![ConnectScript::Ok]);
    fx.handle.start().await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);

    let started = tokio::time::Instant::now();
    fx.transport.link(0).drop_connection("network lost").await;

    assert_eq!(
        next_event(&mut fx.events).await,
        ConversationEvent::Reconnecting
    );
    match next_event(&mut fx.events).await {
        ConversationEvent::Error { kind, .. } => {
            assert_eq!(kind, ErrorKind::NetworkExhausted);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }

    // 1 s + 2 s + 4 s of virtual backoff
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(8),
        "unexpected backoff duration: {:?}",
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_succeeds_on_second_attempt() {
    let mut fx = fixture(vec![
        ConnectScript::Ok,
        ConnectScript::Fail(TransportError::Disconnected("refused".into())),
        ConnectScript::Ok,
    ]);
    fx.handle.start().await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);

    fx.transport.link(0).drop_connection("network lost").await;
    assert_eq!(
        next_event(&mut fx.events).await,
        ConversationEvent::Reconnecting
    );
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);
    assert_eq!(fx.transport.connect_count(), 2);
}

#[tokio::test]
async fn mute_discards_everything_captured() {
    let mut fx = fixture(vec![ConnectScript::Ok]);
    fx.handle.start().await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);

    assert!(!fx.handle.toggle_listening().await.unwrap());

    for _ in 0..10 {
        fx.frames_tx.send(tone_frame(-20.0)).await.unwrap();
    }
    assert_no_event(&mut fx.events).await;

    let link = fx.transport.link(0);
    // session.update only; no audio leaked while muted
    assert_eq!(link.appended_frames(), 0);

    assert!(fx.handle.toggle_listening().await.unwrap());
}

#[tokio::test]
async fn assistant_audio_starts_and_finishes_playback() {
    let mut fx = fixture(vec![ConnectScript::Ok]);
    fx.handle.start().await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);

    let link = fx.transport.link(0);
    link.server_event(ServerEvent::ResponseCreated {
        response: ResponseInfo {
            id: "resp_1".into(),
            status: None,
        },
    })
    .await;
    link.server_event(ServerEvent::ResponseAudioDelta {
        response_id: "resp_1".into(),
        delta: pcm::encode_frame(&[100i16; 480]),
    })
    .await;

    assert_eq!(
        next_event(&mut fx.events).await,
        ConversationEvent::AudioPlaybackStarted
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fx.sink.lock().unwrap().written.len(), 480);

    link.server_event(ServerEvent::ResponseDone {
        response: ResponseInfo {
            id: "resp_1".into(),
            status: Some("completed".into()),
        },
    })
    .await;
    assert_eq!(
        next_event(&mut fx.events).await,
        ConversationEvent::AudioPlaybackFinished
    );
}

#[tokio::test]
async fn barge_in_cancels_the_response() {
    let mut fx = fixture(vec![ConnectScript::Ok]);
    fx.handle.start().await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);

    let link = fx.transport.link(0);
    link.server_event(ServerEvent::ResponseCreated {
        response: ResponseInfo {
            id: "resp_1".into(),
            status: None,
        },
    })
    .await;
    link.server_event(ServerEvent::ResponseAudioDelta {
        response_id: "resp_1".into(),
        delta: pcm::encode_frame(&[100i16; 480]),
    })
    .await;
    assert_eq!(
        next_event(&mut fx.events).await,
        ConversationEvent::AudioPlaybackStarted
    );

    // The user talks over the assistant
    for _ in 0..3 {
        fx.frames_tx.send(tone_frame(-20.0)).await.unwrap();
    }
    assert_eq!(
        next_event(&mut fx.events).await,
        ConversationEvent::AudioPlaybackFinished
    );
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::SpeechStarted);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(link.sent_cancel());
    assert!(fx.sink.lock().unwrap().flushes >= 1);

    // Deltas for the cancelled response are dropped, not played
    let before = fx.sink.lock().unwrap().written.len();
    link.server_event(ServerEvent::ResponseAudioDelta {
        response_id: "resp_1".into(),
        delta: pcm::encode_frame(&[100i16; 480]),
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.sink.lock().unwrap().written.len(), before);
}

#[tokio::test]
async fn server_vad_confirmation_does_not_duplicate_events() {
    let mut fx = fixture(vec![ConnectScript::Ok]);
    fx.handle.start().await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);

    drive_to_user_speaking(&mut fx).await;

    let link = fx.transport.link(0);
    // Server confirms what the client already detected
    link.server_event(ServerEvent::SpeechStarted { audio_start_ms: 0 }).await;
    assert_no_event(&mut fx.events).await;

    // Server ends the turn first
    link.server_event(ServerEvent::SpeechStopped { audio_end_ms: 900 }).await;
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::SpeechStopped);

    // The client VAD's own trailing-silence stop must not fire a second event
    for _ in 0..80 {
        fx.frames_tx.send(silence_frame()).await.unwrap();
    }
    assert_no_event(&mut fx.events).await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let mut fx = fixture(vec![ConnectScript::Ok]);
    fx.handle.start().await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);

    fx.handle.stop().await.unwrap();
    assert_eq!(
        next_event(&mut fx.events).await,
        ConversationEvent::Disconnected
    );

    fx.handle.stop().await.unwrap();
    assert_no_event(&mut fx.events).await;
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_a_pending_reconnect() {
    let mut fx = fixture(vec![ConnectScript::Ok]);
    fx.handle.start().await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);

    fx.transport.link(0).drop_connection("network lost").await;
    assert_eq!(
        next_event(&mut fx.events).await,
        ConversationEvent::Reconnecting
    );

    // Stop while the first backoff sleep is pending
    fx.handle.stop().await.unwrap();
    assert_eq!(
        next_event(&mut fx.events).await,
        ConversationEvent::Disconnected
    );
    // No further reconnect attempt happened
    assert_eq!(fx.transport.connect_count(), 1);
    assert_no_event(&mut fx.events).await;
}

#[tokio::test]
async fn protocol_error_event_keeps_the_session() {
    let mut fx = fixture(vec![ConnectScript::Ok]);
    fx.handle.start().await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);

    let link = fx.transport.link(0);
    link.server_event(ServerEvent::Error {
        error: vocord_transport::protocol::ErrorInfo {
            kind: "invalid_request_error".into(),
            code: None,
            message: "bad audio chunk".into(),
        },
    })
    .await;

    match next_event(&mut fx.events).await {
        ConversationEvent::Error { kind, detail } => {
            assert_eq!(kind, ErrorKind::Protocol);
            assert_eq!(detail, "bad audio chunk");
        }
        other => panic!("expected protocol error, got {:?}", other),
    }

    // Session still alive: speech detection keeps working
    drive_to_user_speaking(&mut fx).await;
}

#[tokio::test]
async fn transcript_deltas_carry_roles() {
    let mut fx = fixture(vec![ConnectScript::Ok]);
    fx.handle.start().await.unwrap();
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connecting);
    assert_eq!(next_event(&mut fx.events).await, ConversationEvent::Connected);

    let link = fx.transport.link(0);
    link.server_event(ServerEvent::ResponseAudioTranscriptDelta {
        response_id: "resp_1".into(),
        delta: "Hello the".into(),
    })
    .await;
    link.server_event(ServerEvent::InputAudioTranscriptionCompleted {
        item_id: "item_1".into(),
        transcript: "Hi there".into(),
    })
    .await;

    match next_event(&mut fx.events).await {
        ConversationEvent::TranscriptDelta(seg) => {
            assert_eq!(seg.role, vocord_engine::Role::Assistant);
            assert!(!seg.is_final);
            assert_eq!(seg.text, "Hello the");
            assert_eq!(seg.session_id, "sess_mock");
        }
        other => panic!("expected transcript, got {:?}", other),
    }
    match next_event(&mut fx.events).await {
        ConversationEvent::TranscriptDelta(seg) => {
            assert_eq!(seg.role, vocord_engine::Role::User);
            assert!(seg.is_final);
            assert_eq!(seg.text, "Hi there");
        }
        other => panic!("expected transcript, got {:?}", other),
    }
}
