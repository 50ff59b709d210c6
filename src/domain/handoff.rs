//! Agent handoff control
//!
//! Holds the single active conversational agent for a session and swaps
//! agents atomically on a handoff signal. Agents never swap themselves:
//! they return a handoff action from turn handling, and the controller owns
//! the transition, so two agents can never be simultaneously active. The
//! conversation context moves with the handoff; the outgoing agent is
//! dropped and cannot retain it.

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Speaker role of one conversational turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
}

/// One conversational turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Accumulated dialogue state that survives agent handoffs
///
/// Owned exclusively by the active agent slot; transferred, not copied, on
/// handoff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    turns: Vec<Turn>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: TurnRole::User,
            content: content.into(),
            at: Utc::now(),
        });
    }

    pub fn push_agent(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: TurnRole::Agent,
            content: content.into(),
            at: Utc::now(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Transcript payload for the terminal webhook
    pub fn to_transcript(&self) -> serde_json::Value {
        serde_json::json!({ "items": self.turns })
    }
}

/// Tagged variant over the agents observed in this domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentVariant {
    /// Detects the caller's preferred language and hands off
    LanguageTriage,
    /// Domain- and language-specialized agent
    Specialized { language: String, domain: String },
}

/// Capability interface of the live audio session
///
/// Consumed, not implemented, by this core; the speech/LLM provider sits
/// behind it.
#[async_trait]
pub trait SpeechPort: Send + Sync {
    /// Speak literal text and wait for playout to finish
    async fn speak(&self, text: &str) -> Result<()>;

    /// Generate and speak a reply from instructions
    async fn generate_reply(&self, instructions: &str) -> Result<()>;

    /// Terminate the audio session
    async fn close(&self) -> Result<()>;
}

/// What an agent decided to do with one user turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnAction {
    /// Speak a reply and keep the turn loop going
    Reply(String),
    /// Hand control to another variant; the confirmation line is spoken
    /// before the swap
    Handoff {
        confirmation: String,
        next: AgentVariant,
    },
    /// The call was answered by a voicemail system; terminate immediately
    VoicemailDetected { evidence: String },
    /// Conclude the conversation: speak the farewell, wait for playout,
    /// then terminate
    EndCall { reason: String, farewell: String },
}

/// Behavior of one agent variant
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    fn variant(&self) -> AgentVariant;

    /// Called when the agent takes over the session (greeting line)
    async fn on_enter(&self, context: &ConversationContext, speech: &dyn SpeechPort)
        -> Result<()>;

    /// Decide what to do with one user turn
    async fn handle_turn(&self, input: &str, context: &ConversationContext)
        -> Result<TurnAction>;
}

/// Builds agent behaviors for variants requested in handoffs
pub trait AgentFactory: Send + Sync {
    fn build(&self, variant: &AgentVariant) -> Result<Box<dyn AgentBehavior>>;
}

/// Why the controller closed the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Voicemail,
    EndCall,
}

/// Outcome of processing one turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Continue,
    HandedOff(AgentVariant),
    Closed(CloseReason),
}

struct ActiveAgent {
    agent: Box<dyn AgentBehavior>,
    context: ConversationContext,
}

/// Controller owning the active-agent slot for one session
///
/// The slot is guarded by a single-writer lock: only start/handoff write it,
/// and turn processing re-reads it at the start of every turn. Holding the
/// lock for the whole turn serializes handoff against turn processing, so
/// no partial state is observable mid-handoff.
pub struct HandoffController {
    speech: Arc<dyn SpeechPort>,
    factory: Arc<dyn AgentFactory>,
    active: Mutex<Option<ActiveAgent>>,
    closed: AtomicBool,
}

impl HandoffController {
    pub fn new(speech: Arc<dyn SpeechPort>, factory: Arc<dyn AgentFactory>) -> Self {
        Self {
            speech,
            factory,
            active: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Bind the initial agent with its (possibly pre-seeded) context
    pub async fn start(&self, initial: AgentVariant, context: ConversationContext) -> Result<()> {
        self.ensure_open()?;

        let mut slot = self.active.lock().await;
        if slot.is_some() {
            return Err(DomainError::InvalidOperation(
                "Controller already started".to_string(),
            ));
        }

        let agent = self.factory.build(&initial)?;
        agent.on_enter(&context, self.speech.as_ref()).await?;
        *slot = Some(ActiveAgent { agent, context });

        Ok(())
    }

    /// Explicit handoff: apply the new variant and the transferred context
    /// together, never independently
    pub async fn handoff(&self, next: AgentVariant, context: ConversationContext) -> Result<()> {
        self.ensure_open()?;

        let mut slot = self.active.lock().await;
        let agent = self.factory.build(&next)?;
        agent.on_enter(&context, self.speech.as_ref()).await?;
        // The previous agent is dropped here together with any stale context
        *slot = Some(ActiveAgent { agent, context });

        Ok(())
    }

    /// Process one user turn through whichever agent is currently active
    pub async fn process_turn(&self, input: &str) -> Result<TurnOutcome> {
        self.ensure_open()?;

        let mut slot = self.active.lock().await;
        let active = slot.as_mut().ok_or_else(|| {
            DomainError::InvalidOperation("No active agent; controller not started".to_string())
        })?;

        active.context.push_user(input);
        let action = active.agent.handle_turn(input, &active.context).await?;

        match action {
            TurnAction::Reply(text) => {
                active.context.push_agent(&text);
                self.speech.speak(&text).await?;
                Ok(TurnOutcome::Continue)
            }
            TurnAction::Handoff { confirmation, next } => {
                info!(next = ?next, "Agent requested handoff");
                active.context.push_agent(&confirmation);
                self.speech.speak(&confirmation).await?;

                // Move the context out; the outgoing agent is dropped and
                // must not retain a reference to it
                let context = std::mem::take(&mut active.context);
                let incoming = self.factory.build(&next)?;
                incoming.on_enter(&context, self.speech.as_ref()).await?;
                *active = ActiveAgent {
                    agent: incoming,
                    context,
                };

                Ok(TurnOutcome::HandedOff(next))
            }
            TurnAction::VoicemailDetected { evidence } => {
                info!(evidence = %evidence, "Voicemail detected, terminating session");
                self.closed.store(true, Ordering::SeqCst);
                self.speech.close().await?;
                Ok(TurnOutcome::Closed(CloseReason::Voicemail))
            }
            TurnAction::EndCall { reason, farewell } => {
                info!(reason = %reason, "End of call requested");
                active.context.push_agent(&farewell);
                // speak() waits for playout before we tear the session down
                self.speech.speak(&farewell).await?;
                self.closed.store(true, Ordering::SeqCst);
                self.speech.close().await?;
                Ok(TurnOutcome::Closed(CloseReason::EndCall))
            }
        }
    }

    /// Resume speech suppressed by a turn-detector false positive
    ///
    /// The original content is replayed, not regenerated from scratch.
    pub async fn resume_after_false_interruption(
        &self,
        resume_instructions: Option<&str>,
    ) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let instructions =
            resume_instructions.unwrap_or("Resume your previous answer where it was cut off.");
        self.speech.generate_reply(instructions).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Variant currently holding the session, if any
    pub async fn active_variant(&self) -> Option<AgentVariant> {
        self.active.lock().await.as_ref().map(|a| a.agent.variant())
    }

    /// Snapshot of the conversation for transcript finalization
    pub async fn snapshot_context(&self) -> Option<ConversationContext> {
        self.active.lock().await.as_ref().map(|a| a.context.clone())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DomainError::SessionClosed(
                "No handoff or turn processing after terminal close".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Speech port that records every call in order
    #[derive(Default)]
    struct RecordingSpeech {
        log: StdMutex<Vec<String>>,
    }

    impl RecordingSpeech {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpeechPort for RecordingSpeech {
        async fn speak(&self, text: &str) -> Result<()> {
            self.log.lock().unwrap().push(format!("speak:{}", text));
            Ok(())
        }

        async fn generate_reply(&self, instructions: &str) -> Result<()> {
            self.log.lock().unwrap().push(format!("reply:{}", instructions));
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.log.lock().unwrap().push("close".to_string());
            Ok(())
        }
    }

    /// Scripted agent: pops the next action from a queue
    struct ScriptedAgent {
        variant: AgentVariant,
        script: StdMutex<Vec<TurnAction>>,
    }

    #[async_trait]
    impl AgentBehavior for ScriptedAgent {
        fn variant(&self) -> AgentVariant {
            self.variant.clone()
        }

        async fn on_enter(
            &self,
            _context: &ConversationContext,
            speech: &dyn SpeechPort,
        ) -> Result<()> {
            speech.speak(&format!("enter:{:?}", self.variant)).await
        }

        async fn handle_turn(
            &self,
            _input: &str,
            _context: &ConversationContext,
        ) -> Result<TurnAction> {
            Ok(self
                .script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(TurnAction::Reply("fallback".to_string())))
        }
    }

    struct ScriptedFactory {
        scripts: StdMutex<std::collections::HashMap<String, Vec<TurnAction>>>,
    }

    impl ScriptedFactory {
        fn new() -> Self {
            Self {
                scripts: StdMutex::new(std::collections::HashMap::new()),
            }
        }

        fn script(self, variant: &AgentVariant, mut actions: Vec<TurnAction>) -> Self {
            // stored reversed so pop() yields actions in order
            actions.reverse();
            self.scripts
                .lock()
                .unwrap()
                .insert(format!("{:?}", variant), actions);
            self
        }
    }

    impl AgentFactory for ScriptedFactory {
        fn build(&self, variant: &AgentVariant) -> Result<Box<dyn AgentBehavior>> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .get(&format!("{:?}", variant))
                .cloned()
                .unwrap_or_default();
            Ok(Box::new(ScriptedAgent {
                variant: variant.clone(),
                script: StdMutex::new(script),
            }))
        }
    }

    fn specialized(language: &str, domain: &str) -> AgentVariant {
        AgentVariant::Specialized {
            language: language.to_string(),
            domain: domain.to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_then_reply() {
        let speech = Arc::new(RecordingSpeech::default());
        let factory = Arc::new(ScriptedFactory::new().script(
            &AgentVariant::LanguageTriage,
            vec![TurnAction::Reply("hello there".to_string())],
        ));
        let controller = HandoffController::new(speech.clone(), factory);

        controller
            .start(AgentVariant::LanguageTriage, ConversationContext::new())
            .await
            .unwrap();
        let outcome = controller.process_turn("hi").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Continue);
        assert_eq!(
            speech.log(),
            vec!["speak:enter:LanguageTriage", "speak:hello there"]
        );
    }

    #[tokio::test]
    async fn test_handoff_moves_context_and_detaches_old_agent() {
        let speech = Arc::new(RecordingSpeech::default());
        let hindi = specialized("hi", "interiors");
        let factory = Arc::new(
            ScriptedFactory::new()
                .script(
                    &AgentVariant::LanguageTriage,
                    vec![TurnAction::Handoff {
                        confirmation: "noted, switching".to_string(),
                        next: hindi.clone(),
                    }],
                )
                .script(&hindi, vec![TurnAction::Reply("namaste".to_string())]),
        );
        let controller = HandoffController::new(speech.clone(), factory);

        controller
            .start(AgentVariant::LanguageTriage, ConversationContext::new())
            .await
            .unwrap();

        let outcome = controller.process_turn("hindi please").await.unwrap();
        assert_eq!(outcome, TurnOutcome::HandedOff(hindi.clone()));
        assert_eq!(controller.active_variant().await, Some(hindi));

        // Subsequent turns reach the new agent, never the old one
        let outcome = controller.process_turn("need a new kitchen").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Continue);

        // The transferred context holds the full history across the swap
        let context = controller.snapshot_context().await.unwrap();
        let contents: Vec<&str> = context.turns().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "hindi please",
                "noted, switching",
                "need a new kitchen",
                "namaste"
            ]
        );
    }

    #[tokio::test]
    async fn test_reentrant_handoff_between_specialized_agents() {
        let speech = Arc::new(RecordingSpeech::default());
        let support = specialized("en", "support");
        let sales = specialized("en", "sales");
        let factory = Arc::new(
            ScriptedFactory::new()
                .script(
                    &AgentVariant::LanguageTriage,
                    vec![TurnAction::Handoff {
                        confirmation: "to support".to_string(),
                        next: support.clone(),
                    }],
                )
                .script(
                    &support,
                    vec![TurnAction::Handoff {
                        confirmation: "to sales".to_string(),
                        next: sales.clone(),
                    }],
                ),
        );
        let controller = HandoffController::new(speech, factory);

        controller
            .start(AgentVariant::LanguageTriage, ConversationContext::new())
            .await
            .unwrap();
        controller.process_turn("help").await.unwrap();
        let outcome = controller.process_turn("actually, buying").await.unwrap();

        assert_eq!(outcome, TurnOutcome::HandedOff(sales.clone()));
        assert_eq!(controller.active_variant().await, Some(sales));
    }

    #[tokio::test]
    async fn test_voicemail_is_terminal() {
        let speech = Arc::new(RecordingSpeech::default());
        let factory = Arc::new(ScriptedFactory::new().script(
            &AgentVariant::LanguageTriage,
            vec![TurnAction::VoicemailDetected {
                evidence: "leave a message after the beep".to_string(),
            }],
        ));
        let controller = HandoffController::new(speech.clone(), factory);

        controller
            .start(AgentVariant::LanguageTriage, ConversationContext::new())
            .await
            .unwrap();
        let outcome = controller.process_turn("...").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Closed(CloseReason::Voicemail));
        assert!(controller.is_closed());

        // No further handoff or turn processing after terminal close
        assert!(controller.process_turn("hello?").await.is_err());
        assert!(controller
            .handoff(specialized("en", "sales"), ConversationContext::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_end_call_speaks_farewell_before_close() {
        let speech = Arc::new(RecordingSpeech::default());
        let factory = Arc::new(ScriptedFactory::new().script(
            &AgentVariant::LanguageTriage,
            vec![TurnAction::EndCall {
                reason: "user said goodbye".to_string(),
                farewell: "Thank you for calling. Goodbye!".to_string(),
            }],
        ));
        let controller = HandoffController::new(speech.clone(), factory);

        controller
            .start(AgentVariant::LanguageTriage, ConversationContext::new())
            .await
            .unwrap();
        let outcome = controller.process_turn("bye").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Closed(CloseReason::EndCall));

        let log = speech.log();
        let farewell_pos = log
            .iter()
            .position(|e| e == "speak:Thank you for calling. Goodbye!")
            .unwrap();
        let close_pos = log.iter().position(|e| e == "close").unwrap();
        assert!(farewell_pos < close_pos);
    }

    #[tokio::test]
    async fn test_false_interruption_resumes_original_content() {
        let speech = Arc::new(RecordingSpeech::default());
        let factory = Arc::new(ScriptedFactory::new());
        let controller = HandoffController::new(speech.clone(), factory);

        controller
            .resume_after_false_interruption(Some("continue listing the venue options"))
            .await
            .unwrap();
        assert_eq!(speech.log(), vec!["reply:continue listing the venue options"]);
    }
}
