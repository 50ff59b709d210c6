//! End-to-end call lifecycle tests against in-memory ports

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parley::application::{CallDialer, SessionRuntime, ShutdownBarrier};
use parley::config::Config;
use parley::domain::handoff::{
    AgentBehavior, AgentFactory, AgentVariant, ConversationContext, SpeechPort, TurnAction,
    TurnOutcome,
};
use parley::domain::outcome::{CallOutcome, DialError};
use parley::domain::session::{
    DialTarget, SessionEvent, SessionEventBus, SessionStatus, UsageMetrics, UserState,
};
use parley::infrastructure::memory::{MemoryEgress, MemorySpeech, MemoryStorage, MemoryTelephony};
use parley::infrastructure::notify::NotificationDispatcher;
use parley::infrastructure::recording::{EgressJobState, RecordingManager};

struct TriageAgent;

#[async_trait]
impl AgentBehavior for TriageAgent {
    fn variant(&self) -> AgentVariant {
        AgentVariant::LanguageTriage
    }

    async fn on_enter(
        &self,
        _context: &ConversationContext,
        speech: &dyn SpeechPort,
    ) -> parley::Result<()> {
        speech.speak("Hello! English or Hindi?").await
    }

    async fn handle_turn(
        &self,
        _input: &str,
        _context: &ConversationContext,
    ) -> parley::Result<TurnAction> {
        Ok(TurnAction::Handoff {
            confirmation: "Your language preference is noted.".to_string(),
            next: AgentVariant::Specialized {
                language: "hindi".to_string(),
                domain: "sales".to_string(),
            },
        })
    }
}

struct SalesAgent;

#[async_trait]
impl AgentBehavior for SalesAgent {
    fn variant(&self) -> AgentVariant {
        AgentVariant::Specialized {
            language: "hindi".to_string(),
            domain: "sales".to_string(),
        }
    }

    async fn on_enter(
        &self,
        _context: &ConversationContext,
        speech: &dyn SpeechPort,
    ) -> parley::Result<()> {
        speech.speak("Namaste!").await
    }

    async fn handle_turn(
        &self,
        input: &str,
        _context: &ConversationContext,
    ) -> parley::Result<TurnAction> {
        if input.contains("bye") {
            Ok(TurnAction::EndCall {
                reason: "user requested".to_string(),
                farewell: "Goodbye!".to_string(),
            })
        } else {
            Ok(TurnAction::Reply("Noted.".to_string()))
        }
    }
}

struct Factory;

impl AgentFactory for Factory {
    fn build(&self, variant: &AgentVariant) -> parley::Result<Box<dyn AgentBehavior>> {
        match variant {
            AgentVariant::LanguageTriage => Ok(Box::new(TriageAgent)),
            AgentVariant::Specialized { .. } => Ok(Box::new(SalesAgent)),
        }
    }
}

struct Harness {
    telephony: Arc<MemoryTelephony>,
    egress: Arc<MemoryEgress>,
    storage: Arc<MemoryStorage>,
    speech: Arc<MemorySpeech>,
    dispatcher: Arc<NotificationDispatcher>,
    recording: Arc<RecordingManager>,
    barrier: Arc<ShutdownBarrier>,
    dialer: CallDialer,
    config: Config,
}

fn harness(base_url: &str) -> Harness {
    let mut config = Config::default();
    config.notifier.base_url = base_url.to_string();
    // Keep presence supervision fast inside tests
    config.agent.presence_interval_secs = 0;
    config.agent.presence_prompts = 2;

    let telephony = Arc::new(MemoryTelephony::new());
    let egress = Arc::new(MemoryEgress::new());
    let storage = Arc::new(MemoryStorage::new());
    let speech = Arc::new(MemorySpeech::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(reqwest::Client::new()));
    let barrier = Arc::new(ShutdownBarrier::new());
    let recording = Arc::new(RecordingManager::new(
        egress.clone(),
        storage.clone(),
        config.recording.storage_domain.clone(),
        Duration::from_secs(config.recording.watchdog_secs),
    ));
    let dialer = CallDialer::new(
        telephony.clone(),
        dispatcher.clone(),
        speech.clone(),
        Arc::new(Factory),
        config.clone(),
    );

    Harness {
        telephony,
        egress,
        storage,
        speech,
        dispatcher,
        recording,
        barrier,
        dialer,
        config,
    }
}

fn target() -> DialTarget {
    DialTarget::from_job_metadata(
        r#"{"phone_number": "+919900000001", "trunk_id": "T1", "bridge_id": "bridge-1"}"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_outbound_call_full_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook_listener/bridge-1"))
        .and(body_partial_json(json!({
            "status": "ended",
            "call_status": "completed",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness(&server.uri());
    let mut bound = h.dialer.place_call(&target()).await.unwrap();
    assert_eq!(bound.session.status(), SessionStatus::Active);
    let room = bound.session.room().clone();

    // Live audio confirmed, recording starts
    let destination = h
        .recording
        .destination_for(&room, &h.config.recording_credentials());
    let job = h
        .recording
        .begin_recording(&room, destination, &h.barrier)
        .await;
    assert_eq!(job.state().await, EgressJobState::Started);

    let runtime = SessionRuntime::new(
        &bound,
        h.speech.clone(),
        h.dispatcher.clone(),
        h.recording.clone(),
        h.telephony.clone(),
        h.barrier.clone(),
        h.config.clone(),
    );
    let mut bus = SessionEventBus::new();
    runtime.wire(&mut bus, &room);

    // A short conversation with one handoff and a user-requested close
    let outcome = bound.controller.process_turn("Hindi, please").await.unwrap();
    assert!(matches!(outcome, TurnOutcome::HandedOff(_)));
    bus.publish(&SessionEvent::MetricsCollected {
        metrics: UsageMetrics {
            llm_prompt_tokens: 120,
            llm_completion_tokens: 40,
            tts_characters: 200,
            stt_audio_seconds: 3.5,
        },
    });
    bus.publish(&SessionEvent::ToolExecuted {
        tool_name: "lookup_order".to_string(),
        payload: json!({ "ok": true }),
    });
    let outcome = bound.controller.process_turn("bye bye").await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Closed(_)));
    bus.publish(&SessionEvent::Close);

    runtime.closed().await;
    runtime.finalize(&mut bound, Some(&job)).await;

    // Recording stopped exactly once, artifacts uploaded as siblings
    assert_eq!(h.egress.stopped_jobs().await.len(), 1);
    let keys = h.storage.keys().await;
    assert!(keys.iter().any(|k| k.ends_with("/transcript.json")));
    assert!(keys.iter().any(|k| k.ends_with("/summary.json")));

    // Room torn down, session completed, farewell spoken before close
    assert_eq!(h.telephony.deleted_rooms().await, vec![room]);
    assert_eq!(bound.session.status(), SessionStatus::Completed);
    assert!(h.speech.is_closed());
    let spoken = h.speech.spoken().await;
    assert!(spoken.iter().any(|line| line == "Goodbye!"));
}

#[tokio::test]
async fn test_busy_dial_reports_failure_before_job_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook_listener/bridge-1"))
        .and(body_partial_json(json!({
            "event": "failed_to_create_sip_participant",
            "status": "dial_busy",
            "call_status": "busy",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server.uri());
    h.telephony
        .fail_next_dial(
            DialError::new("twirp error: sip status: 486: Busy Here")
                .with_metadata("sip_status_code", "486"),
        )
        .await;

    let failure = h.dialer.place_call(&target()).await.unwrap_err();
    assert_eq!(failure.outcome, CallOutcome::Busy);
    assert_eq!(failure.status, SessionStatus::DialBusy);

    // The room shell never survives a failed dial
    assert_eq!(h.telephony.deleted_rooms().await.len(), 1);
    // Recording was never started
    assert!(h.egress.stopped_jobs().await.is_empty());
}

#[tokio::test]
async fn test_terminal_webhook_failure_does_not_fail_finalization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("bridge down"))
        .mount(&server)
        .await;

    let h = harness(&server.uri());
    let mut bound = h.dialer.place_call(&target()).await.unwrap();
    let room = bound.session.room().clone();

    let runtime = SessionRuntime::new(
        &bound,
        h.speech.clone(),
        h.dispatcher.clone(),
        h.recording.clone(),
        h.telephony.clone(),
        h.barrier.clone(),
        h.config.clone(),
    );
    let mut bus = SessionEventBus::new();
    runtime.wire(&mut bus, &room);

    bus.publish(&SessionEvent::Close);
    runtime.closed().await;
    runtime.finalize(&mut bound, None).await;

    // The webhook failed but the session still finalized cleanly
    assert_eq!(bound.session.status(), SessionStatus::Completed);
    let keys = h.storage.keys().await;
    assert!(keys.iter().any(|k| k.ends_with("/transcript.json")));
}

#[tokio::test]
async fn test_presence_supervision_closes_after_unanswered_prompts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness(&server.uri());
    let bound = h.dialer.place_call(&target()).await.unwrap();
    let room = bound.session.room().clone();

    let runtime = SessionRuntime::new(
        &bound,
        h.speech.clone(),
        h.dispatcher.clone(),
        h.recording.clone(),
        h.telephony.clone(),
        h.barrier.clone(),
        h.config.clone(),
    );
    let mut bus = SessionEventBus::new();
    runtime.wire(&mut bus, &room);

    bus.publish(&SessionEvent::UserStateChanged {
        new_state: UserState::Away,
    });

    // Two unanswered prompts, then the session shuts down
    runtime.closed().await;
    assert!(h.speech.is_closed());
    let prompts = h
        .speech
        .spoken()
        .await
        .iter()
        .filter(|line| line.contains("still present"))
        .count();
    assert_eq!(prompts, 2);
}

#[tokio::test]
async fn test_returning_user_cancels_presence_shutdown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut config_harness = harness(&server.uri());
    // Long interval so the user can "return" before the second prompt
    config_harness.config.agent.presence_interval_secs = 1;
    let h = config_harness;

    let bound = h.dialer.place_call(&target()).await.unwrap();
    let room = bound.session.room().clone();

    let runtime = SessionRuntime::new(
        &bound,
        h.speech.clone(),
        h.dispatcher.clone(),
        h.recording.clone(),
        h.telephony.clone(),
        h.barrier.clone(),
        h.config.clone(),
    );
    let mut bus = SessionEventBus::new();
    runtime.wire(&mut bus, &room);

    bus.publish(&SessionEvent::UserStateChanged {
        new_state: UserState::Away,
    });
    bus.publish(&SessionEvent::UserStateChanged {
        new_state: UserState::Speaking,
    });

    h.barrier.wait().await;
    assert!(!h.speech.is_closed());
}
