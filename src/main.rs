use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley::application::{CallDialer, SessionRuntime, ShutdownBarrier};
use parley::config::Config;
use parley::domain::handoff::{
    AgentBehavior, AgentFactory, AgentVariant, ConversationContext, SpeechPort, TurnAction,
};
use parley::domain::session::{DialTarget, SessionEvent, SessionEventBus};
use parley::infrastructure::auth::ApiClient;
use parley::infrastructure::memory::{MemoryEgress, MemorySpeech, MemoryStorage, MemoryTelephony};
use parley::infrastructure::notify::NotificationDispatcher;
use parley::infrastructure::recording::RecordingManager;
use tracing::{info, warn, Level};

/// Minimal triage agent for the demo lifecycle: greets, then hands off to
/// a Hindi sales agent on the first turn.
struct DemoTriageAgent;

#[async_trait]
impl AgentBehavior for DemoTriageAgent {
    fn variant(&self) -> AgentVariant {
        AgentVariant::LanguageTriage
    }

    async fn on_enter(
        &self,
        _context: &ConversationContext,
        speech: &dyn SpeechPort,
    ) -> parley::Result<()> {
        speech
            .speak("Hello! Would you prefer English or Hindi?")
            .await
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

struct DemoSalesAgent {
    language: String,
    domain: String,
}

#[async_trait]
impl AgentBehavior for DemoSalesAgent {
    fn variant(&self) -> AgentVariant {
        AgentVariant::Specialized {
            language: self.language.clone(),
            domain: self.domain.clone(),
        }
    }

    async fn on_enter(
        &self,
        _context: &ConversationContext,
        speech: &dyn SpeechPort,
    ) -> parley::Result<()> {
        speech.speak("Namaste! How can I help you today?").await
    }

    async fn handle_turn(
        &self,
        input: &str,
        _context: &ConversationContext,
    ) -> parley::Result<TurnAction> {
        if input.contains("bye") {
            Ok(TurnAction::EndCall {
                reason: "user requested".to_string(),
                farewell: "Thank you for your time. Goodbye!".to_string(),
            })
        } else {
            Ok(TurnAction::Reply("Let me look into that for you.".to_string()))
        }
    }
}

struct DemoFactory;

impl AgentFactory for DemoFactory {
    fn build(&self, variant: &AgentVariant) -> parley::Result<Box<dyn AgentBehavior>> {
        match variant {
            AgentVariant::LanguageTriage => Ok(Box::new(DemoTriageAgent)),
            AgentVariant::Specialized { language, domain } => Ok(Box::new(DemoSalesAgent {
                language: language.clone(),
                domain: domain.clone(),
            })),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting Parley call orchestration worker");

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Demo: run one call lifecycle end to end against in-memory ports
    demo_call_lifecycle(config).await?;

    info!("Parley worker finished");
    Ok(())
}

async fn demo_call_lifecycle(config: Config) -> anyhow::Result<()> {
    // The bridge also serves per-agent persona data behind the OAuth
    // client-credentials grant; fetch it before dialing when credentials
    // are configured.
    if !config.auth.client_id.is_empty() {
        let api = ApiClient::from_config(reqwest::Client::new(), &config.auth);
        match api
            .fetch_agent_profile(&config.notifier.base_url, &config.agent.identifier)
            .await
        {
            Ok(profile) => info!(agent = %config.agent.identifier, %profile, "Agent profile loaded"),
            Err(e) => warn!(error = %e, "Agent profile fetch failed, using defaults"),
        }
    }

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
        Arc::new(DemoFactory),
        config.clone(),
    );

    let target = DialTarget::from_job_metadata(
        r#"{"phone_number": "+919900000001", "trunk_id": "demo-trunk", "bridge_id": "demo-bridge"}"#,
    )
    .map_err(|e| anyhow::anyhow!(e))?;

    let mut bound = match dialer.place_call(&target).await {
        Ok(bound) => bound,
        Err(failure) => {
            info!(outcome = failure.outcome.as_str(), "Demo dial failed");
            return Ok(());
        }
    };
    let room = bound.session.room().clone();
    info!(room = %room, "Demo call bound");

    // Live audio confirmed: start the recording.
    let destination = recording.destination_for(&room, &config.recording_credentials());
    let job = recording
        .begin_recording(&room, destination, &barrier)
        .await;

    let runtime = SessionRuntime::new(
        &bound,
        speech.clone(),
        dispatcher.clone(),
        recording.clone(),
        telephony.clone(),
        barrier.clone(),
        config,
    );
    let mut bus = SessionEventBus::new();
    runtime.wire(&mut bus, &room);

    // Drive a short scripted conversation through the controller.
    bound.controller.process_turn("Hindi, please").await?;
    bound.controller.process_turn("bye bye").await?;
    bus.publish(&SessionEvent::Close);

    runtime.closed().await;
    runtime.finalize(&mut bound, Some(&job)).await;

    info!(
        spoken = speech.spoken().await.len(),
        stored_objects = storage.keys().await.len(),
        "Demo call finished"
    );

    drop(runtime);
    drop(dialer);
    match Arc::try_unwrap(dispatcher) {
        Ok(dispatcher) => dispatcher.shutdown().await,
        Err(_) => info!("Dispatcher still shared; skipping drain"),
    }
    Ok(())
}
