//! Session runtime wiring
//!
//! Connects one bound session's event bus to the rest of the system:
//! usage metrics accumulation, tool-call webhooks, false-interruption
//! recovery, user-presence supervision, and close-triggered finalization.
//! Bus handlers never touch the network inline; remote work goes through
//! the dispatcher queue or a tracked background task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::application::dialer::BoundSession;
use crate::application::shutdown::ShutdownBarrier;
use crate::config::Config;
use crate::domain::handoff::{HandoffController, SpeechPort};
use crate::domain::session::{SessionEvent, SessionEventBus, UsageCollector, UserState};
use crate::infrastructure::notify::{
    summary_payload, NotificationDispatcher, OutboundEvent, TerminalSummary,
};
use crate::infrastructure::recording::{EgressJob, RecordingManager};
use crate::infrastructure::storage;
use crate::infrastructure::telephony::TelephonyPort;

const PRESENCE_PROMPT: &str =
    "The user has been inactive. Politely check if they're still present.";

/// Runs one bound session from answer to teardown
pub struct SessionRuntime {
    controller: Arc<HandoffController>,
    speech: Arc<dyn SpeechPort>,
    dispatcher: Arc<NotificationDispatcher>,
    recording: Arc<RecordingManager>,
    telephony: Arc<dyn TelephonyPort>,
    barrier: Arc<ShutdownBarrier>,
    usage: Arc<StdMutex<UsageCollector>>,
    close_signal: Arc<Notify>,
    user_away: Arc<AtomicBool>,
    presence_started: Arc<AtomicBool>,
    config: Config,
    room_id: String,
}

impl SessionRuntime {
    pub fn new(
        bound: &BoundSession,
        speech: Arc<dyn SpeechPort>,
        dispatcher: Arc<NotificationDispatcher>,
        recording: Arc<RecordingManager>,
        telephony: Arc<dyn TelephonyPort>,
        barrier: Arc<ShutdownBarrier>,
        config: Config,
    ) -> Self {
        let room_id = bound
            .session
            .session_id()
            .map(|id| id.to_string())
            .unwrap_or_default();
        Self {
            controller: Arc::clone(&bound.controller),
            speech,
            dispatcher,
            recording,
            telephony,
            barrier,
            usage: Arc::new(StdMutex::new(UsageCollector::new())),
            close_signal: Arc::new(Notify::new()),
            user_away: Arc::new(AtomicBool::new(false)),
            presence_started: Arc::new(AtomicBool::new(false)),
            config,
            room_id,
        }
    }

    /// Subscribe this runtime's handlers on the session's event bus
    pub fn wire(&self, bus: &mut SessionEventBus, room: &crate::domain::shared::RoomName) {
        let room = room.clone();

        // Usage metrics accumulate toward the terminal summary.
        let usage = Arc::clone(&self.usage);
        bus.subscribe(move |event| {
            if let SessionEvent::MetricsCollected { metrics } = event {
                let mut collector = usage.lock().map_err(|_| {
                    crate::DomainError::Internal("usage collector lock poisoned".to_string())
                })?;
                collector.collect(metrics);
            }
            Ok(())
        });

        // Tool-call reports go out through the queue; the turn loop never
        // waits on them.
        let dispatcher = Arc::clone(&self.dispatcher);
        let base_url = self.config.notifier.base_url.clone();
        let room_id = self.room_id.clone();
        let tool_room = room.clone();
        bus.subscribe(move |event| {
            if let SessionEvent::ToolExecuted { tool_name, payload } = event {
                info!(room = %tool_room, tool = %tool_name, "Function tool executed");
                dispatcher.enqueue(OutboundEvent::tool_executed(
                    &base_url,
                    &tool_room,
                    &room_id,
                    payload.clone(),
                ));
            }
            Ok(())
        });

        // Background noise can trip the turn detector; resume the
        // suppressed speech with its original content.
        let controller = Arc::clone(&self.controller);
        let barrier = Arc::clone(&self.barrier);
        let resume_room = room.clone();
        bus.subscribe(move |event| {
            if let SessionEvent::AgentFalseInterruption {
                resume_instructions,
            } = event
            {
                info!(room = %resume_room, "False positive interruption, resuming");
                let controller = Arc::clone(&controller);
                let instructions = resume_instructions.clone();
                let log_room = resume_room.clone();
                barrier.spawn(async move {
                    if let Err(e) = controller
                        .resume_after_false_interruption(instructions.as_deref())
                        .await
                    {
                        warn!(room = %log_room, error = %e, "Failed to resume after false interruption");
                    }
                });
            }
            Ok(())
        });

        // Presence supervision: prompt an away user a bounded number of
        // times, then shut the session down.
        let speech = Arc::clone(&self.speech);
        let barrier = Arc::clone(&self.barrier);
        let close_signal = Arc::clone(&self.close_signal);
        let user_away = Arc::clone(&self.user_away);
        let presence_started = Arc::clone(&self.presence_started);
        let prompts = self.config.agent.presence_prompts;
        let interval = Duration::from_secs(self.config.agent.presence_interval_secs);
        let presence_room = room.clone();
        bus.subscribe(move |event| {
            if let SessionEvent::UserStateChanged { new_state } = event {
                user_away.store(*new_state == UserState::Away, Ordering::SeqCst);
                if *new_state == UserState::Away
                    && !presence_started.swap(true, Ordering::SeqCst)
                {
                    let speech = Arc::clone(&speech);
                    let close_signal = Arc::clone(&close_signal);
                    let user_away = Arc::clone(&user_away);
                    let presence_started = Arc::clone(&presence_started);
                    let log_room = presence_room.clone();
                    barrier.spawn(async move {
                        for _ in 0..prompts {
                            if !user_away.load(Ordering::SeqCst) {
                                presence_started.store(false, Ordering::SeqCst);
                                return;
                            }
                            if let Err(e) = speech.generate_reply(PRESENCE_PROMPT).await {
                                warn!(room = %log_room, error = %e, "Presence prompt failed");
                                return;
                            }
                            tokio::time::sleep(interval).await;
                        }
                        if user_away.load(Ordering::SeqCst) {
                            info!(room = %log_room, "User still away, shutting session down");
                            if let Err(e) = speech.close().await {
                                warn!(room = %log_room, error = %e, "Failed to close audio session");
                            }
                            close_signal.notify_one();
                        }
                    });
                }
            }
            Ok(())
        });

        // Pipeline errors are diagnostics, not call failures.
        let error_room = room.clone();
        bus.subscribe(move |event| {
            if let SessionEvent::Error { message } = event {
                warn!(room = %error_room, error = %message, "Session pipeline error");
            }
            Ok(())
        });

        // Close is the only event that triggers finalization.
        let close_signal = Arc::clone(&self.close_signal);
        let close_room = room;
        bus.subscribe(move |event| {
            if matches!(event, SessionEvent::Close) {
                info!(room = %close_room, "Session closed");
                close_signal.notify_one();
            }
            Ok(())
        });
    }

    /// Resolve once the session's close has been signalled
    pub async fn closed(&self) {
        self.close_signal.notified().await;
    }

    /// Finalize the session after close
    ///
    /// Stops the recording, uploads the artifacts, delivers the terminal
    /// summary (awaited: the job must not end before the bridge knows),
    /// tears down the room, and joins every background task.
    pub async fn finalize(&self, bound: &mut BoundSession, job: Option<&Arc<EgressJob>>) {
        let room = bound.session.room().clone();

        if let Some(job) = job {
            self.recording.ensure_stopped(job).await;
        }

        let context = self
            .controller
            .snapshot_context()
            .await
            .unwrap_or_default();
        let summary = self
            .usage
            .lock()
            .map(|collector| collector.summary().clone())
            .unwrap_or_default();

        self.recording.finalize(&room, &context, &summary).await;

        if bound.session.is_active() {
            if let Err(e) = bound.session.complete() {
                warn!(room = %room, error = %e, "Failed to complete session");
            }
        }

        let recording_url = format!(
            "{}/{}",
            self.config.recording.playback_base_url,
            storage::recording_file_name(&room)
        );
        let terminal = TerminalSummary {
            agent_identifier: self.config.agent.identifier.clone(),
            conversation_id: room.to_string(),
            status: "ended".to_string(),
            call_status: bound.session.status().as_str().to_string(),
            room_id: self.room_id.clone(),
            recording_url,
            transcript: context.to_transcript(),
            summary: summary_payload(&summary),
        };
        let event = OutboundEvent::terminal_summary(
            &self.config.notifier.base_url,
            bound.bridge_id(),
            &terminal,
        );
        if let Err(e) = self.dispatcher.dispatch_now(&event).await {
            error!(room = %room, error = %e, "Failed to deliver terminal summary webhook");
        }
        self.dispatcher.enqueue(OutboundEvent::session_closed(
            &self.config.notifier.base_url,
            &room,
            &self.room_id,
        ));

        if let Err(e) = self.telephony.delete_room(&room).await {
            warn!(room = %room, error = %e, "Failed to delete room");
        }

        self.barrier.wait().await;
    }
}
