//! Async driver for the orchestrator
//!
//! Inputs and command completions are handled one at a time on this task,
//! so transitions never interleave. Long-running work (capture, remote calls,
//! playback) runs elsewhere and reports back tagged with its cycle, which
//! keeps inputs flowing: a trigger during a cycle reaches the machine and is
//! dropped there instead of queueing behind the cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::audio::{AudioCapture, AudioPlayback};
use crate::events::SessionEvent;
use crate::inference::{InferenceResult, InferenceService};

use super::dispatch::SessionInput;
use super::error::SessionError;
use super::machine::{Command, Orchestrator};
use super::state::{CycleId, SessionState};

/// Results of spawned work, fed back into the machine
#[derive(Debug)]
enum Completion {
    CaptureStarted(CycleId, Result<(), SessionError>),
    CaptureStopped(CycleId, Result<Clip, SessionError>),
    FailsafeElapsed(CycleId),
    InferenceFinished(CycleId, Result<InferenceResult, SessionError>),
    PlaybackFinished(CycleId),
}

#[derive(Debug)]
struct Clip {
    audio: Vec<u8>,
    mime: String,
}

enum CaptureRequest {
    Start(CycleId),
    Stop(CycleId),
}

/// Owns the capture device and applies requests strictly in order, so a
/// stop can never overtake the start it belongs to.
struct CaptureWorker<C> {
    capture: C,
    requests: mpsc::UnboundedReceiver<CaptureRequest>,
}

impl<C: AudioCapture> CaptureWorker<C> {
    async fn run(mut self, done_tx: mpsc::UnboundedSender<Completion>) {
        while let Some(request) = self.requests.recv().await {
            let done = match request {
                CaptureRequest::Start(cycle) => {
                    let result = self
                        .capture
                        .start()
                        .await
                        .map_err(|e| SessionError::CaptureDenied(e.to_string()));
                    Completion::CaptureStarted(cycle, result)
                }
                CaptureRequest::Stop(cycle) => {
                    let result = self
                        .capture
                        .stop()
                        .await
                        .map(|audio| Clip {
                            audio,
                            mime: self.capture.mime().to_string(),
                        })
                        .map_err(|e| SessionError::CaptureFailed(e.to_string()));
                    Completion::CaptureStopped(cycle, result)
                }
            };

            if done_tx.send(done).is_err() {
                break;
            }
        }
    }
}

pub struct SessionRunner<C, I, P> {
    orchestrator: Orchestrator,
    capture_tx: mpsc::UnboundedSender<CaptureRequest>,
    capture_worker: Option<CaptureWorker<C>>,
    inference: Arc<I>,
    playback: Arc<P>,
    failsafe: Duration,
    playback_limit: Duration,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
}

impl<C, I, P> SessionRunner<C, I, P>
where
    C: AudioCapture,
    I: InferenceService,
    P: AudioPlayback,
{
    pub fn new(
        event_tx: broadcast::Sender<SessionEvent>,
        capture: C,
        inference: I,
        playback: P,
        failsafe: Duration,
        playback_limit: Duration,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (capture_tx, requests) = mpsc::unbounded_channel();

        Self {
            orchestrator: Orchestrator::new(event_tx),
            capture_tx,
            capture_worker: Some(CaptureWorker { capture, requests }),
            inference: Arc::new(inference),
            playback: Arc::new(playback),
            failsafe,
            playback_limit,
            done_tx,
            done_rx,
        }
    }

    /// Run until every input sender is dropped
    pub async fn run(mut self, mut input_rx: mpsc::Receiver<SessionInput>) {
        info!(failsafe_ms = self.failsafe.as_millis() as u64, "session runner started");

        if let Some(worker) = self.capture_worker.take() {
            tokio::spawn(worker.run(self.done_tx.clone()));
        }

        loop {
            tokio::select! {
                // Inputs first: anything that arrived before a completion is
                // judged against the state it arrived in
                biased;

                input = input_rx.recv() => match input {
                    Some(input) => self.handle_input(input),
                    None => break,
                },
                Some(done) = self.done_rx.recv() => self.handle_completion(done),
            }
        }

        info!("session runner stopped");
    }

    fn handle_input(&mut self, input: SessionInput) {
        debug!(?input, state = %self.orchestrator.state(), "session input");
        let command = match input {
            SessionInput::Trigger(source) => self.orchestrator.on_trigger(source),
            SessionInput::StopRequested => self.orchestrator.on_stop_requested(),
        };
        self.execute(command);
    }

    fn handle_completion(&mut self, done: Completion) {
        let command = match done {
            Completion::CaptureStarted(cycle, result) => {
                self.orchestrator.on_capture_started(cycle, result)
            }
            Completion::CaptureStopped(cycle, Ok(clip)) => {
                if cycle == self.orchestrator.cycle()
                    && self.orchestrator.state() == SessionState::Processing
                {
                    self.spawn_inference(cycle, clip);
                } else {
                    debug!(%cycle, "clip from an earlier cycle discarded");
                }
                None
            }
            Completion::CaptureStopped(cycle, Err(error)) => {
                self.orchestrator.on_inference_finished(cycle, Err(error))
            }
            Completion::FailsafeElapsed(cycle) => self.orchestrator.on_failsafe_elapsed(cycle),
            Completion::InferenceFinished(cycle, result) => {
                self.orchestrator.on_inference_finished(cycle, result)
            }
            Completion::PlaybackFinished(cycle) => self.orchestrator.on_playback_finished(cycle),
        };
        self.execute(command);
    }

    fn execute(&self, command: Option<Command>) {
        let Some(command) = command else {
            return;
        };

        match command {
            Command::BeginCapture { cycle } => {
                self.request_capture(CaptureRequest::Start(cycle));
                self.spawn_failsafe(cycle);
            }
            Command::FinishCapture { cycle } => self.request_capture(CaptureRequest::Stop(cycle)),
            Command::Play { cycle, audio } => self.spawn_playback(cycle, audio),
        }
    }

    fn request_capture(&self, request: CaptureRequest) {
        if self.capture_tx.send(request).is_err() {
            warn!("capture worker stopped");
        }
    }

    fn spawn_failsafe(&self, cycle: CycleId) {
        let failsafe = self.failsafe;
        let done_tx = self.done_tx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(failsafe).await;
            let _ = done_tx.send(Completion::FailsafeElapsed(cycle));
        });
    }

    fn spawn_inference(&self, cycle: CycleId, clip: Clip) {
        let inference = Arc::clone(&self.inference);
        let done_tx = self.done_tx.clone();

        tokio::spawn(async move {
            let result = process_clip(inference.as_ref(), clip.audio, &clip.mime).await;
            let _ = done_tx.send(Completion::InferenceFinished(cycle, result));
        });
    }

    fn spawn_playback(&self, cycle: CycleId, audio: Vec<u8>) {
        let playback = Arc::clone(&self.playback);
        let done_tx = self.done_tx.clone();

        let limit = self.playback_limit;

        // A hung player must not hold the session in Speaking
        tokio::spawn(async move {
            match tokio::time::timeout(limit, playback.play(audio)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%cycle, error = %e, "reply playback failed"),
                Err(_) => warn!(%cycle, limit_ms = limit.as_millis() as u64, "reply playback timed out"),
            }
            let _ = done_tx.send(Completion::PlaybackFinished(cycle));
        });
    }
}

/// Transcribe, then ask. The second call needs the first one's text.
async fn process_clip<I>(
    inference: &I,
    audio: Vec<u8>,
    mime: &str,
) -> Result<InferenceResult, SessionError>
where
    I: InferenceService + ?Sized,
{
    let transcript = inference
        .transcribe(audio, mime)
        .await
        .map_err(|e| SessionError::RemoteCallFailure(e.to_string()))?;

    let transcript = transcript.trim();
    if transcript.is_empty() {
        info!("no speech detected, skipping AI response");
        return Err(SessionError::TranscriptionEmpty);
    }

    let reply = inference
        .respond(transcript)
        .await
        .map_err(|e| SessionError::RemoteCallFailure(e.to_string()))?;

    Ok(InferenceResult {
        transcript: transcript.to_string(),
        reply_text: reply.text,
        reply_audio: reply.audio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::audio::{CaptureError, PlaybackError};
    use crate::events::{StopCause, TransitionDetail, TriggerSource};
    use crate::inference::{InferenceError, Reply};

    const FAILSAFE: Duration = Duration::from_secs(6);
    const PLAYBACK_LIMIT: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct Counters {
        capture_starts: AtomicUsize,
        transcribe_calls: AtomicUsize,
        respond_calls: AtomicUsize,
        plays: AtomicUsize,
    }

    struct FakeCapture {
        counters: Arc<Counters>,
        deny: bool,
    }

    #[async_trait]
    impl AudioCapture for FakeCapture {
        async fn start(&mut self) -> Result<(), CaptureError> {
            self.counters.capture_starts.fetch_add(1, Ordering::SeqCst);
            if self.deny {
                return Err(CaptureError::Denied("permission denied".into()));
            }
            Ok(())
        }

        async fn stop(&mut self) -> Result<Vec<u8>, CaptureError> {
            Ok(b"clip".to_vec())
        }

        fn mime(&self) -> &str {
            "audio/wav"
        }
    }

    struct FakeInference {
        counters: Arc<Counters>,
        transcript: &'static str,
        fail_respond: bool,
    }

    #[async_trait]
    impl InferenceService for FakeInference {
        async fn transcribe(&self, audio: Vec<u8>, mime: &str) -> Result<String, InferenceError> {
            assert_eq!(audio, b"clip");
            assert_eq!(mime, "audio/wav");
            self.counters.transcribe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.transcript.to_string())
        }

        async fn respond(&self, prompt: &str) -> Result<Reply, InferenceError> {
            self.counters.respond_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_respond {
                return Err(InferenceError::Status {
                    endpoint: "ask",
                    status: reqwest::StatusCode::BAD_GATEWAY,
                    body: String::new(),
                });
            }
            assert_eq!(prompt, "hello");
            Ok(Reply {
                text: "hi there".to_string(),
                audio: vec![7, 7, 7],
            })
        }
    }

    /// Holds playback open until released
    struct FakePlayback {
        counters: Arc<Counters>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl AudioPlayback for FakePlayback {
        async fn play(&self, audio: Vec<u8>) -> Result<(), PlaybackError> {
            assert_eq!(audio, vec![7, 7, 7]);
            self.counters.plays.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(())
        }
    }

    struct Harness {
        input_tx: mpsc::Sender<SessionInput>,
        events: broadcast::Receiver<SessionEvent>,
        counters: Arc<Counters>,
        release_playback: Arc<Notify>,
    }

    impl Harness {
        fn start(transcript: &'static str, deny_capture: bool, fail_respond: bool) -> Self {
            let counters = Arc::new(Counters::default());
            let release_playback = Arc::new(Notify::new());
            let (event_tx, events) = broadcast::channel(64);
            let (input_tx, input_rx) = mpsc::channel(16);

            let runner = SessionRunner::new(
                event_tx,
                FakeCapture {
                    counters: Arc::clone(&counters),
                    deny: deny_capture,
                },
                FakeInference {
                    counters: Arc::clone(&counters),
                    transcript,
                    fail_respond,
                },
                FakePlayback {
                    counters: Arc::clone(&counters),
                    release: Arc::clone(&release_playback),
                },
                FAILSAFE,
                PLAYBACK_LIMIT,
            );
            tokio::spawn(runner.run(input_rx));

            Self {
                input_tx,
                events,
                counters,
                release_playback,
            }
        }

        async fn send(&self, input: SessionInput) {
            self.input_tx.send(input).await.unwrap();
        }

        async fn next_event(&mut self) -> SessionEvent {
            self.events.recv().await.unwrap()
        }

        async fn next_target(&mut self) -> SessionState {
            self.next_event().await.target()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_reply_cycle() {
        let mut h = Harness::start("hello", false, false);

        h.send(SessionInput::Trigger(TriggerSource::Hardware)).await;
        assert_eq!(h.next_target().await, SessionState::Recording);

        h.send(SessionInput::StopRequested).await;
        assert_eq!(h.next_target().await, SessionState::Processing);

        match h.next_event().await {
            SessionEvent::Transition {
                to: SessionState::Speaking,
                detail:
                    TransitionDetail::Replied {
                        transcript,
                        reply_text,
                    },
                ..
            } => {
                assert_eq!(transcript, "hello");
                assert_eq!(reply_text, "hi there");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        h.release_playback.notify_one();
        assert_eq!(h.next_target().await, SessionState::Idle);
        assert_eq!(h.counters.plays.load(Ordering::SeqCst), 1);

        // Busy flag cleared: a new trigger starts a new cycle
        h.send(SessionInput::Trigger(TriggerSource::Pointer)).await;
        assert_eq!(h.next_target().await, SessionState::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_transcript_skips_ai_response() {
        let mut h = Harness::start("   ", false, false);

        h.send(SessionInput::Trigger(TriggerSource::Keyboard)).await;
        h.send(SessionInput::StopRequested).await;
        assert_eq!(h.next_target().await, SessionState::Recording);
        assert_eq!(h.next_target().await, SessionState::Processing);

        let event = h.next_event().await;
        assert!(matches!(
            event,
            SessionEvent::Transition {
                from: SessionState::Processing,
                to: SessionState::Idle,
                detail: TransitionDetail::Failed {
                    error: SessionError::TranscriptionEmpty
                },
                ..
            }
        ));
        assert_eq!(h.counters.transcribe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.counters.respond_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_returns_to_idle() {
        let mut h = Harness::start("hello", false, true);

        h.send(SessionInput::Trigger(TriggerSource::Pointer)).await;
        h.send(SessionInput::StopRequested).await;
        h.next_event().await;
        h.next_event().await;

        assert!(matches!(
            h.next_event().await,
            SessionEvent::Transition {
                to: SessionState::Idle,
                detail: TransitionDetail::Failed {
                    error: SessionError::RemoteCallFailure(_)
                },
                ..
            }
        ));
        assert_eq!(h.counters.plays.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_while_busy_start_no_capture() {
        let mut h = Harness::start("hello", false, false);

        h.send(SessionInput::Trigger(TriggerSource::Hardware)).await;
        assert_eq!(h.next_target().await, SessionState::Recording);
        h.send(SessionInput::Trigger(TriggerSource::Keyboard)).await;
        h.send(SessionInput::Trigger(TriggerSource::Pointer)).await;
        h.send(SessionInput::StopRequested).await;

        assert_eq!(h.next_target().await, SessionState::Processing);
        assert_eq!(h.next_target().await, SessionState::Speaking);
        // Triggers during Speaking are dropped too
        h.send(SessionInput::Trigger(TriggerSource::Hardware)).await;
        h.release_playback.notify_one();
        assert_eq!(h.next_target().await, SessionState::Idle);

        assert_eq!(h.counters.capture_starts.load(Ordering::SeqCst), 1);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_denied_unlocks_next_trigger() {
        let mut h = Harness::start("hello", true, false);

        h.send(SessionInput::Trigger(TriggerSource::Pointer)).await;
        assert_eq!(h.next_target().await, SessionState::Recording);
        assert!(matches!(
            h.next_event().await,
            SessionEvent::Transition {
                from: SessionState::Recording,
                to: SessionState::Idle,
                detail: TransitionDetail::Failed {
                    error: SessionError::CaptureDenied(_)
                },
                ..
            }
        ));

        h.send(SessionInput::Trigger(TriggerSource::Pointer)).await;
        assert_eq!(h.next_target().await, SessionState::Recording);
        assert_eq!(h.next_target().await, SessionState::Idle);
        assert_eq!(h.counters.capture_starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failsafe_stops_hardware_recording() {
        let mut h = Harness::start("hello", false, false);
        let started = tokio::time::Instant::now();

        h.send(SessionInput::Trigger(TriggerSource::Hardware)).await;
        assert_eq!(h.next_target().await, SessionState::Recording);

        // No stop signal ever arrives
        match h.next_event().await {
            SessionEvent::Transition {
                to: SessionState::Processing,
                detail: TransitionDetail::CaptureStopped { cause },
                ..
            } => assert_eq!(cause, StopCause::Failsafe),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(started.elapsed() >= FAILSAFE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failsafe_after_manual_stop_is_noop() {
        let mut h = Harness::start("hello", false, false);

        h.send(SessionInput::Trigger(TriggerSource::Pointer)).await;
        h.send(SessionInput::StopRequested).await;
        assert_eq!(h.next_target().await, SessionState::Recording);
        match h.next_event().await {
            SessionEvent::Transition {
                detail: TransitionDetail::CaptureStopped { cause },
                ..
            } => assert_eq!(cause, StopCause::Manual),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.next_target().await, SessionState::Speaking);

        // Let the failsafe deadline pass while still speaking
        tokio::time::sleep(FAILSAFE * 2).await;
        assert!(h.events.try_recv().is_err());

        h.release_playback.notify_one();
        assert_eq!(h.next_target().await, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_playback_is_cut_off() {
        let mut h = Harness::start("hello", false, false);
        let started = tokio::time::Instant::now();

        h.send(SessionInput::Trigger(TriggerSource::Pointer)).await;
        h.send(SessionInput::StopRequested).await;
        assert_eq!(h.next_target().await, SessionState::Recording);
        assert_eq!(h.next_target().await, SessionState::Processing);
        assert_eq!(h.next_target().await, SessionState::Speaking);

        // Playback is never released
        assert_eq!(h.next_target().await, SessionState::Idle);
        assert!(started.elapsed() >= PLAYBACK_LIMIT);
        assert_eq!(h.counters.plays.load(Ordering::SeqCst), 1);

        h.send(SessionInput::Trigger(TriggerSource::Hardware)).await;
        assert_eq!(h.next_target().await, SessionState::Recording);
    }
}
