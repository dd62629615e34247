use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};

use crate::collaborators::{ConversationLogger, PaywallGate, TokenProvider};
use crate::config::EngineConfig;
use crate::events::{ConversationEvent, ErrorKind, Role, TranscriptSegment};
use crate::session::Session;
use crate::state::{ConversationState, StateTracker};
use vocord_audio::{AudioFrame, PlaybackSink};
use vocord_foundation::{AuthError, ConfigError, EngineError, TransportError};
use vocord_telemetry::PipelineMetrics;
use vocord_transport::client::{InboundEvent, RealtimeConnection, RealtimeTransport};
use vocord_transport::pcm;
use vocord_transport::protocol::{
    ClientEvent, ServerEvent, SessionConfig, TurnDetection,
};
use vocord_vad::{EnergyVad, VadProcessor, VadSignal};

enum Command {
    Start(oneshot::Sender<Result<(), EngineError>>),
    Stop(oneshot::Sender<()>),
    ToggleListening(oneshot::Sender<bool>),
}

/// Caller-facing control surface. Cloneable; all commands are serialized
/// through the worker task.
#[derive(Clone)]
pub struct ConversationHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ConversationHandle {
    /// Begin a session. Fails fast when one is already active, when the
    /// paywall rejects the account, or when the first connect fails.
    pub async fn start(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Start(tx))
            .await
            .map_err(|_| EngineError::WorkerGone)?;
        rx.await.map_err(|_| EngineError::WorkerGone)?
    }

    /// Tear the session down. Idempotent; returns only after cleanup is
    /// complete.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stop(tx))
            .await
            .map_err(|_| EngineError::WorkerGone)?;
        rx.await.map_err(|_| EngineError::WorkerGone)
    }

    /// Flip the outbound-mute flag. Returns true when the microphone is now
    /// live.
    pub async fn toggle_listening(&self) -> Result<bool, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ToggleListening(tx))
            .await
            .map_err(|_| EngineError::WorkerGone)?;
        rx.await.map_err(|_| EngineError::WorkerGone)
    }
}

/// External collaborators injected into the engine.
pub struct Collaborators {
    pub transport: Arc<dyn RealtimeTransport>,
    pub tokens: Arc<dyn TokenProvider>,
    pub logger: Arc<dyn ConversationLogger>,
    pub gate: Arc<dyn PaywallGate>,
}

/// Spawn the engine worker. `frames_rx` is the wire-format frame stream from
/// the audio chunker; `playback` receives decoded assistant audio.
pub fn spawn(
    config: EngineConfig,
    frames_rx: mpsc::Receiver<AudioFrame>,
    playback: Box<dyn PlaybackSink>,
    collaborators: Collaborators,
    metrics: Option<Arc<PipelineMetrics>>,
) -> Result<
    (
        ConversationHandle,
        mpsc::Receiver<ConversationEvent>,
        JoinHandle<()>,
    ),
    EngineError,
> {
    config.validate()?;
    let vad = EnergyVad::new(config.vad.clone())
        .map_err(|e| ConfigError::InvalidVad(e.to_string()))?;

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (events_tx, events_rx) = mpsc::channel(64);

    let worker = EngineWorker {
        config,
        vad,
        state: StateTracker::new(),
        session: None,
        cmd_rx,
        frames_rx,
        frames_closed: false,
        events_tx,
        outbound: None,
        inbound: None,
        net_task: None,
        playback,
        transport: collaborators.transport,
        tokens: collaborators.tokens,
        logger: collaborators.logger,
        gate: collaborators.gate,
        metrics,
        muted: false,
        prefix: VecDeque::new(),
        speech_event_active: false,
        active_response: None,
        cancelling_response: None,
    };

    let task = tokio::spawn(worker.run());
    Ok((ConversationHandle { cmd_tx }, events_rx, task))
}

struct EngineWorker {
    config: EngineConfig,
    vad: EnergyVad,
    state: StateTracker,
    session: Option<Session>,

    cmd_rx: mpsc::Receiver<Command>,
    frames_rx: mpsc::Receiver<AudioFrame>,
    frames_closed: bool,
    events_tx: mpsc::Sender<ConversationEvent>,

    // Live connection, split so select! can borrow the pieces independently
    outbound: Option<mpsc::Sender<ClientEvent>>,
    inbound: Option<mpsc::Receiver<InboundEvent>>,
    net_task: Option<JoinHandle<()>>,

    playback: Box<dyn PlaybackSink>,
    transport: Arc<dyn RealtimeTransport>,
    tokens: Arc<dyn TokenProvider>,
    logger: Arc<dyn ConversationLogger>,
    gate: Arc<dyn PaywallGate>,
    metrics: Option<Arc<PipelineMetrics>>,

    muted: bool,
    /// Recent frames kept while Listening so a speech onset is not clipped.
    prefix: VecDeque<Arc<[i16]>>,
    /// Dedupe guard: SpeechStarted/SpeechStopped each fire once per speech
    /// event regardless of which VAD (client or server) detected it.
    speech_event_active: bool,
    active_response: Option<String>,
    /// A cancelled response keeps streaming deltas until the server catches
    /// up; those are dropped by id.
    cancelling_response: Option<String>,
}

async fn recv_inbound(rx: &mut Option<mpsc::Receiver<InboundEvent>>) -> Option<InboundEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl EngineWorker {
    async fn run(mut self) {
        tracing::info!("Conversation engine started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                frame = self.frames_rx.recv(), if !self.frames_closed => match frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => {
                        tracing::info!("Audio pipeline ended");
                        self.frames_closed = true;
                    }
                },
                inbound = recv_inbound(&mut self.inbound), if self.inbound.is_some() => match inbound {
                    Some(ev) => self.handle_inbound(ev).await,
                    None => self.inbound = None,
                },
            }
        }
        self.finish_stop().await;
        tracing::info!("Conversation engine stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start(reply) => {
                let result = self.handle_start().await;
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                self.finish_stop().await;
                let _ = reply.send(());
            }
            Command::ToggleListening(reply) => {
                let listening = self.toggle_mute().await;
                let _ = reply.send(listening);
            }
        }
    }

    // ---- session lifecycle ----

    async fn handle_start(&mut self) -> Result<(), EngineError> {
        if self.state.current().is_active() {
            return Err(EngineError::SessionActive);
        }
        if !self.gate.is_authorized() {
            self.state.transition(ConversationState::Error);
            self.publish(ConversationEvent::Error {
                kind: ErrorKind::Unauthorized,
                detail: "voice sessions are not available on this account".into(),
            })
            .await;
            return Err(EngineError::Unauthorized);
        }

        self.state.transition(ConversationState::Connecting);
        self.publish(ConversationEvent::Connecting).await;

        match self.connect_session().await {
            Ok(()) => {
                self.vad.reset();
                self.reset_speech_state();
                self.muted = false;
                self.state.transition(ConversationState::Listening);
                self.publish(ConversationEvent::Connected).await;
                Ok(())
            }
            Err(e) => {
                self.teardown_connection().await;
                self.session = None;
                self.state.transition(ConversationState::Error);
                self.publish(ConversationEvent::Error {
                    kind: ErrorKind::from(&e),
                    detail: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    /// Fetch a fresh token, connect, wait for `session.created`, then push
    /// our session parameters. Used for both first connect and reconnects.
    async fn connect_session(&mut self) -> Result<(), EngineError> {
        let token = self.tokens.voice_token().await?;
        if token.is_expired() {
            return Err(AuthError::Expired.into());
        }

        let mut conn = self.transport.connect(&token.secret).await?;

        let deadline = Instant::now() + self.config.transport.connect_timeout;
        let session_info = loop {
            let event = timeout_at(deadline, conn.events.recv()).await.map_err(|_| {
                TransportError::ConnectTimeout(self.config.transport.connect_timeout)
            })?;
            match event {
                Some(InboundEvent::Event(ServerEvent::SessionCreated { session })) => {
                    break session;
                }
                Some(InboundEvent::Event(_)) => continue,
                Some(InboundEvent::Disconnected(reason)) => {
                    return Err(TransportError::Disconnected(reason).into());
                }
                None => {
                    return Err(
                        TransportError::Disconnected("closed during setup".into()).into()
                    );
                }
            }
        };

        let mut session = self.session.take().unwrap_or_else(Session::local);
        session.adopt_server_id(&session_info.id);
        tracing::info!("Session established: {}", session.id);

        conn.send(ClientEvent::SessionUpdate {
            session: self.session_config(),
        })
        .await?;

        self.session = Some(session);
        self.install_connection(conn);
        Ok(())
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            voice: self.config.voice.clone(),
            instructions: self.config.instructions.clone(),
            turn_detection: self.config.server_vad.then(|| {
                TurnDetection::server_vad(
                    self.config.vad_threshold,
                    self.config.prefix_padding_ms,
                    self.config.silence_duration_ms,
                )
            }),
            ..Default::default()
        }
    }

    fn install_connection(&mut self, conn: RealtimeConnection) {
        let RealtimeConnection {
            outbound,
            events,
            task,
        } = conn;
        self.outbound = Some(outbound);
        self.inbound = Some(events);
        self.net_task = Some(task);
    }

    async fn teardown_connection(&mut self) {
        self.outbound = None;
        self.inbound = None;
        if let Some(task) = self.net_task.take() {
            if timeout(Duration::from_secs(2), task).await.is_err() {
                tracing::warn!("Network task did not exit in time; detaching");
            }
        }
    }

    /// Full teardown behind `stop()`. Idempotent: terminal states return
    /// without publishing anything.
    async fn finish_stop(&mut self) {
        if matches!(
            self.state.current(),
            ConversationState::Idle | ConversationState::Closed | ConversationState::Error
        ) {
            return;
        }
        self.teardown_connection().await;
        self.playback.flush();
        self.vad.reset();
        self.reset_speech_state();
        self.session = None;
        if self.state.transition(ConversationState::Closed) {
            self.publish(ConversationEvent::Disconnected).await;
        }
    }

    fn reset_speech_state(&mut self) {
        self.prefix.clear();
        self.speech_event_active = false;
        self.active_response = None;
        self.cancelling_response = None;
        if let Some(m) = &self.metrics {
            m.mark_speaking(false);
        }
    }

    async fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        if self.muted {
            self.prefix.clear();
            // A mute mid-utterance ends the speech event cleanly
            if self.state.current() == ConversationState::UserSpeaking {
                self.end_user_speech().await;
            }
            self.vad.reset();
            tracing::info!("Microphone muted");
        } else {
            tracing::info!("Microphone live");
        }
        !self.muted
    }

    // ---- capture frame path ----

    async fn handle_frame(&mut self, frame: AudioFrame) {
        if !self.state.current().is_active() || self.muted {
            self.count_discard();
            return;
        }

        let signal = match self.vad.process(&frame.samples) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("VAD rejected frame: {}", e);
                return;
            }
        };

        match (signal, self.state.current()) {
            (VadSignal::SpeechStart, ConversationState::Listening) => {
                self.begin_user_speech(&frame).await;
            }
            (VadSignal::SpeechStart, ConversationState::AssistantSpeaking) => {
                if self.config.barge_in {
                    self.cancel_assistant_response().await;
                    self.begin_user_speech(&frame).await;
                } else {
                    self.count_discard();
                }
            }
            (VadSignal::SpeechContinuing, ConversationState::UserSpeaking) => {
                self.forward_samples(&frame.samples).await;
            }
            (VadSignal::SpeechStop, ConversationState::UserSpeaking) => {
                self.forward_samples(&frame.samples).await;
                self.end_user_speech().await;
            }
            (_, ConversationState::Listening) => {
                self.buffer_prefix(frame);
            }
            _ => self.count_discard(),
        }
    }

    async fn begin_user_speech(&mut self, frame: &AudioFrame) {
        // Onset padding goes out first so the first syllable survives
        let buffered: Vec<Arc<[i16]>> = self.prefix.drain(..).collect();
        for samples in buffered {
            self.forward_samples(&samples).await;
        }
        self.forward_samples(&frame.samples).await;

        if self.state.transition(ConversationState::UserSpeaking) && !self.speech_event_active {
            self.speech_event_active = true;
            if let Some(m) = &self.metrics {
                m.vad_segments.fetch_add(1, Ordering::Relaxed);
                m.mark_speaking(true);
            }
            self.publish(ConversationEvent::SpeechStarted).await;
        }
    }

    async fn end_user_speech(&mut self) {
        if self.state.transition(ConversationState::Listening) && self.speech_event_active {
            self.speech_event_active = false;
            if let Some(m) = &self.metrics {
                m.mark_speaking(false);
            }
            self.publish(ConversationEvent::SpeechStopped).await;

            // Without server turn detection the client closes the turn itself
            if !self.config.server_vad {
                self.send_control(ClientEvent::InputAudioBufferCommit).await;
                self.send_control(ClientEvent::ResponseCreate).await;
            }
        }
    }

    fn buffer_prefix(&mut self, frame: AudioFrame) {
        let cap = self.config.prefix_frames();
        if cap == 0 {
            self.count_discard();
            return;
        }
        if self.prefix.len() >= cap {
            self.prefix.pop_front();
            self.count_discard();
        }
        self.prefix.push_back(frame.samples);
    }

    /// Audio is never queued behind a slow socket; a full outbound channel
    /// drops the frame and counts it.
    async fn forward_samples(&mut self, samples: &[i16]) {
        let Some(outbound) = &self.outbound else {
            self.count_discard();
            return;
        };
        let audio = pcm::encode_frame(samples);
        match outbound.try_send(ClientEvent::InputAudioBufferAppend { audio }) {
            Ok(()) => {
                if let Some(m) = &self.metrics {
                    m.frames_forwarded.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("Outbound queue full; dropping frame");
                self.count_discard();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => self.count_discard(),
        }
    }

    /// Control events must not be dropped; these block until the network
    /// task takes them.
    async fn send_control(&mut self, event: ClientEvent) {
        if let Some(outbound) = &self.outbound {
            if outbound.send(event).await.is_err() {
                tracing::warn!("Control event lost; connection is closing");
            }
        }
    }

    fn count_discard(&self) {
        if let Some(m) = &self.metrics {
            m.frames_discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ---- barge-in ----

    async fn cancel_assistant_response(&mut self) {
        self.send_control(ClientEvent::ResponseCancel).await;
        self.playback.flush();
        self.cancelling_response = self.active_response.take();
        if self.state.transition(ConversationState::Listening) {
            self.publish(ConversationEvent::AudioPlaybackFinished).await;
        }
    }

    // ---- inbound path ----

    async fn handle_inbound(&mut self, inbound: InboundEvent) {
        match inbound {
            InboundEvent::Disconnected(reason) => self.handle_disconnect(reason).await,
            InboundEvent::Event(event) => self.handle_server_event(event).await,
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { session } | ServerEvent::SessionUpdated { session } => {
                if let Some(s) = &mut self.session {
                    s.adopt_server_id(&session.id);
                }
            }
            ServerEvent::SpeechStarted { .. } => {
                // Server corrects a missed local onset
                if self.state.current() == ConversationState::Listening
                    && !self.speech_event_active
                {
                    let buffered: Vec<Arc<[i16]>> = self.prefix.drain(..).collect();
                    for samples in buffered {
                        self.forward_samples(&samples).await;
                    }
                    if self.state.transition(ConversationState::UserSpeaking) {
                        self.speech_event_active = true;
                        if let Some(m) = &self.metrics {
                            m.mark_speaking(true);
                        }
                        self.publish(ConversationEvent::SpeechStarted).await;
                    }
                }
            }
            ServerEvent::SpeechStopped { .. } => {
                if self.state.current() == ConversationState::UserSpeaking
                    && self.speech_event_active
                    && self.state.transition(ConversationState::Listening)
                {
                    self.speech_event_active = false;
                    if let Some(m) = &self.metrics {
                        m.mark_speaking(false);
                    }
                    self.publish(ConversationEvent::SpeechStopped).await;
                }
            }
            ServerEvent::ResponseCreated { response } => {
                self.active_response = Some(response.id);
            }
            ServerEvent::ResponseAudioDelta { response_id, delta } => {
                if self.cancelling_response.as_deref() == Some(response_id.as_str()) {
                    return;
                }
                match pcm::decode_frame(&delta) {
                    Ok(samples) => self.play_assistant_audio(&samples).await,
                    Err(e) => tracing::warn!("Undecodable audio delta: {}", e),
                }
            }
            ServerEvent::ResponseAudioTranscriptDelta { delta, .. } => {
                let segment = TranscriptSegment {
                    role: Role::Assistant,
                    text: delta,
                    is_final: false,
                    session_id: self.session_id(),
                };
                self.publish(ConversationEvent::TranscriptDelta(segment)).await;
            }
            ServerEvent::InputAudioTranscriptionCompleted { transcript, .. } => {
                let segment = TranscriptSegment {
                    role: Role::User,
                    text: transcript,
                    is_final: true,
                    session_id: self.session_id(),
                };
                self.publish(ConversationEvent::TranscriptDelta(segment)).await;
            }
            ServerEvent::ResponseDone { response } => {
                if self.cancelling_response.as_deref() == Some(response.id.as_str()) {
                    self.cancelling_response = None;
                    return;
                }
                self.active_response = None;
                if self.state.current() == ConversationState::AssistantSpeaking
                    && self.state.transition(ConversationState::Listening)
                {
                    self.publish(ConversationEvent::AudioPlaybackFinished).await;
                }
            }
            ServerEvent::Error { error } => {
                // Protocol errors do not end the session
                self.publish(ConversationEvent::Error {
                    kind: ErrorKind::Protocol,
                    detail: error.message,
                })
                .await;
            }
            ServerEvent::Unknown => {}
        }
    }

    async fn play_assistant_audio(&mut self, samples: &[i16]) {
        self.playback.write(samples);

        match self.state.current() {
            ConversationState::AssistantSpeaking => {}
            ConversationState::UserSpeaking => {
                // The server answered; the user turn is implicitly over
                self.end_user_speech().await;
                if self.state.transition(ConversationState::AssistantSpeaking) {
                    self.publish(ConversationEvent::AudioPlaybackStarted).await;
                }
            }
            ConversationState::Listening => {
                if self.state.transition(ConversationState::AssistantSpeaking) {
                    self.publish(ConversationEvent::AudioPlaybackStarted).await;
                }
            }
            _ => {}
        }
    }

    fn session_id(&self) -> String {
        self.session
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_default()
    }

    // ---- reconnection supervisor ----

    async fn handle_disconnect(&mut self, reason: String) {
        tracing::warn!("Transport lost: {}", reason);
        self.teardown_connection().await;
        self.playback.flush();
        self.vad.reset();
        self.reset_speech_state();

        if !self.state.transition(ConversationState::Reconnecting) {
            return;
        }
        self.publish(ConversationEvent::Reconnecting).await;
        self.run_reconnect().await;
    }

    async fn run_reconnect(&mut self) {
        let policy = self.config.reconnect.clone();
        for attempt in 0..policy.max_attempts {
            let deadline = Instant::now() + policy.delay_for_attempt(attempt);
            if !self.sleep_or_cancel(deadline).await {
                return;
            }

            if let Some(m) = &self.metrics {
                m.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            }
            tracing::info!("Reconnect attempt {}/{}", attempt + 1, policy.max_attempts);

            match self.connect_session().await {
                Ok(()) => {
                    if self.state.transition(ConversationState::Listening) {
                        self.publish(ConversationEvent::Connected).await;
                    }
                    return;
                }
                Err(e) => {
                    self.teardown_connection().await;
                    if ErrorKind::from(&e) == ErrorKind::Auth {
                        // A rejected fresh token will not get better on retry
                        self.session = None;
                        if self.state.transition(ConversationState::Error) {
                            self.publish(ConversationEvent::Error {
                                kind: ErrorKind::Auth,
                                detail: e.to_string(),
                            })
                            .await;
                        }
                        return;
                    }
                    tracing::warn!("Reconnect attempt failed: {}", e);
                }
            }
        }

        self.session = None;
        if self.state.transition(ConversationState::Error) {
            self.publish(ConversationEvent::Error {
                kind: ErrorKind::NetworkExhausted,
                detail: format!("gave up after {} attempts", policy.max_attempts),
            })
            .await;
        }
    }

    /// Backoff sleep that stays responsive to commands. Returns false when
    /// the session was stopped while waiting.
    async fn sleep_or_cancel(&mut self, deadline: Instant) -> bool {
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Stop(reply)) => {
                        self.finish_stop().await;
                        let _ = reply.send(());
                        return false;
                    }
                    Some(Command::Start(reply)) => {
                        let _ = reply.send(Err(EngineError::SessionActive));
                    }
                    Some(Command::ToggleListening(reply)) => {
                        let listening = self.toggle_mute().await;
                        let _ = reply.send(listening);
                    }
                    None => {
                        self.finish_stop().await;
                        return false;
                    }
                },
            }
        }
    }

    // ---- event publication ----

    async fn publish(&mut self, event: ConversationEvent) {
        self.logger.record(&event);
        if self.events_tx.send(event).await.is_err() {
            tracing::debug!("Event subscriber gone");
        }
    }
}
