use crate::artifact::ArtifactRef;
use crate::binder::MessageBinder;
use crate::client::{ChatBackend, ChatRequest, ChatReply, TtsStatus};
use crate::error::{PlaybackError, SessionError};
use crate::poller::{self, PollHandle, Poller};
use crate::state::{AppEvent, AudioStatus, ChatMessage, MessageLog, Role};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

pub const WELCOME_MESSAGE: &str =
    "I'm Wednesday Addams, an assistant with a taste for the dark and the poetic. What do you want?";
pub const FALLBACK_REPLY: &str =
    "Sorry, something went wrong on my side. Please try again in a moment.";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub output_path: String,
    pub welcome: Option<String>,
    pub fallback_reply: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "deepseek-r1:latest".into(),
            output_path: "output".into(),
            welcome: Some(WELCOME_MESSAGE.into()),
            fallback_reply: FALLBACK_REPLY.into(),
        }
    }
}

/// Clears the busy flag when a send finishes, however it finishes.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One chat conversation: owns the message log and every poll started for it.
pub struct ChatSession {
    log: Arc<Mutex<MessageLog>>,
    backend: Arc<dyn ChatBackend>,
    poller: Arc<Poller>,
    binder: Arc<MessageBinder>,
    events: Sender<AppEvent>,
    config: SessionConfig,
    busy: AtomicBool,
    polls: Mutex<HashMap<u64, PollHandle>>,
}

impl ChatSession {
    pub fn new(
        log: Arc<Mutex<MessageLog>>,
        backend: Arc<dyn ChatBackend>,
        poller: Arc<Poller>,
        binder: Arc<MessageBinder>,
        events: Sender<AppEvent>,
        config: SessionConfig,
    ) -> Self {
        let session = Self {
            log,
            backend,
            poller,
            binder,
            events,
            config,
            busy: AtomicBool::new(false),
            polls: Mutex::new(HashMap::new()),
        };
        if let Some(welcome) = session.config.welcome.clone() {
            session.append(Role::Assistant, welcome, None, AudioStatus::None);
        }
        session
    }

    /// Snapshot of the history.
    pub fn messages(&self) -> Vec<ChatMessage> {
        match self.log.lock() {
            Ok(log) => log.messages().to_vec(),
            Err(_) => Vec::new(),
        }
    }

    pub fn message(&self, id: u64) -> Option<ChatMessage> {
        self.log.lock().ok()?.get(id).cloned()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn append(
        &self,
        role: Role,
        text: String,
        audio_ref: Option<ArtifactRef>,
        audio_status: AudioStatus,
    ) -> ChatMessage {
        let message = match self.log.lock() {
            Ok(mut log) => log.push(role, text, audio_ref, audio_status),
            Err(poisoned) => poisoned.into_inner().push(role, text, audio_ref, audio_status),
        };
        let _ = self.events.send(AppEvent::MessageAppended(message.clone()));
        message
    }

    /// Send user text and record the assistant reply.
    ///
    /// When the reply says speech is still being generated, a poll is started
    /// for it. A failed request still leaves a fallback reply in the history.
    pub async fn send(&self, text: &str) -> Result<ChatMessage, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(SessionError::Busy);
        }
        let _busy = BusyGuard(&self.busy);

        self.append(Role::User, text.to_string(), None, AudioStatus::None);
        let request = ChatRequest {
            message: text.to_string(),
            use_tts: self.binder.auto_play(),
            model: self.config.model.clone(),
            output_path: self.config.output_path.clone(),
        };

        match self.backend.chat(&request).await {
            Ok(reply) => Ok(self.accept_reply(reply)),
            Err(e) => {
                log::error!("[session] chat request failed: {}", e);
                self.append(
                    Role::Assistant,
                    self.config.fallback_reply.clone(),
                    None,
                    AudioStatus::None,
                );
                let _ = self.events.send(AppEvent::ChatFailed(e.to_string()));
                Err(e.into())
            }
        }
    }

    fn accept_reply(&self, reply: ChatReply) -> ChatMessage {
        let artifact = reply.audio_path.as_deref().map(ArtifactRef::new);
        let status = match (reply.tts_status, &artifact) {
            (TtsStatus::Generating | TtsStatus::Ready, Some(a)) if a.is_empty() => {
                log::warn!("[session] reply audio path has no file name, marking speech failed");
                AudioStatus::Error
            }
            (TtsStatus::Generating, Some(_)) => AudioStatus::Generating,
            (TtsStatus::Ready, Some(_)) => AudioStatus::Ready,
            (TtsStatus::Error, _) => AudioStatus::Error,
            _ => AudioStatus::None,
        };
        let message = self.append(Role::Assistant, reply.message, artifact.clone(), status);

        match (status, artifact) {
            (AudioStatus::Generating, Some(artifact)) => self.start_poll(message.id, artifact),
            (AudioStatus::Ready, Some(artifact)) if self.binder.auto_play() => {
                self.schedule_playback(message.id, artifact)
            }
            _ => {}
        }
        message
    }

    /// Track the delayed auto-play of an already-ready reply like a poll, so
    /// shutdown cancels it too.
    fn schedule_playback(&self, message_id: u64, artifact: ArtifactRef) {
        let binder = self.binder.clone();
        let bound = artifact.clone();
        let handle = poller::spawn_task(artifact, async move {
            binder.play_after_delay(&bound).await;
        });
        match self.polls.lock() {
            Ok(mut polls) => {
                polls.retain(|_, handle| !handle.is_finished());
                polls.insert(message_id, handle);
            }
            // Dropping the handle cancels the playback.
            Err(_) => log::error!("[session] poll table poisoned, not playing message #{}", message_id),
        }
    }

    fn start_poll(&self, message_id: u64, artifact: ArtifactRef) {
        let Ok(mut polls) = self.polls.lock() else {
            log::error!("[session] poll table poisoned, message #{} stays pending", message_id);
            return;
        };
        polls.retain(|_, handle| !handle.is_finished());
        if let Some(existing) = polls.get(&message_id) {
            log::warn!(
                "[session] message #{} already polling {}, not starting another",
                message_id,
                existing.artifact()
            );
            return;
        }

        let binder = self.binder.clone();
        let bound = artifact.clone();
        let handle = poller::spawn(self.poller.clone(), artifact, move |outcome| async move {
            binder.apply(message_id, &bound, outcome).await;
        });
        polls.insert(message_id, handle);
    }

    /// Polls and scheduled playbacks that have not finished yet.
    pub fn live_polls(&self) -> usize {
        match self.polls.lock() {
            Ok(polls) => polls.values().filter(|h| !h.is_finished()).count(),
            Err(_) => 0,
        }
    }

    #[cfg(test)]
    pub fn take_poll(&self, message_id: u64) -> Option<PollHandle> {
        self.polls.lock().ok()?.remove(&message_id)
    }

    /// Play the audio of a settled message again.
    pub fn replay(&self, message_id: u64) -> Result<(), PlaybackError> {
        let artifact = self
            .message(message_id)
            .filter(|m| m.audio_status == AudioStatus::Ready)
            .and_then(|m| m.audio_ref)
            .ok_or(PlaybackError::NotReady(message_id))?;
        self.binder.playback().play(&artifact)
    }

    /// Cancel every live poll. Cancelled messages keep their `Generating` status.
    pub fn shutdown(&self) {
        if let Ok(mut polls) = self.polls.lock() {
            for (message_id, handle) in polls.drain() {
                if !handle.is_finished() {
                    log::info!("[session] cancelling poll for message #{}", message_id);
                    handle.cancel();
                }
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
