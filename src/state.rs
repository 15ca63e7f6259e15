use crate::artifact::ArtifactRef;
use chrono::{DateTime, Local};

/// Events sent from background tasks to the front-end loop.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A line typed by the user.
    Input(String),
    /// Stdin was closed.
    InputClosed,
    MessageAppended(ChatMessage),
    AudioStatusChanged {
        message_id: u64,
        status: AudioStatus,
        artifact: Option<ArtifactRef>,
    },
    /// Chat request failed; the fallback message was already appended.
    ChatFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "you",
            Role::Assistant => "wednesday",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStatus {
    None,
    Generating,
    Ready,
    Timeout,
    Error,
}

impl AudioStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AudioStatus::Ready | AudioStatus::Timeout | AudioStatus::Error)
    }

    /// Text shown next to a message that carries audio.
    pub fn label(self) -> &'static str {
        match self {
            AudioStatus::None => "",
            AudioStatus::Generating => "Generating speech...",
            AudioStatus::Ready => "Play speech",
            AudioStatus::Timeout => "Speech generation timed out",
            AudioStatus::Error => "Speech generation failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: u64,
    pub role: Role,
    pub text: String,
    pub audio_ref: Option<ArtifactRef>,
    pub audio_status: AudioStatus,
    pub created_at: DateTime<Local>,
}

/// Append-only message history for one chat session.
///
/// Only `audio_status`/`audio_ref` ever change after a push, and only through
/// [`MessageLog::settle_audio`].
#[derive(Debug, Default)]
pub struct MessageLog {
    next_id: u64,
    messages: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        role: Role,
        text: impl Into<String>,
        audio_ref: Option<ArtifactRef>,
        audio_status: AudioStatus,
    ) -> ChatMessage {
        let message = ChatMessage {
            id: self.next_id,
            role,
            text: text.into(),
            audio_ref,
            audio_status,
            created_at: Local::now(),
        };
        self.next_id += 1;
        self.messages.push(message.clone());
        message
    }

    pub fn get(&self, id: u64) -> Option<&ChatMessage> {
        // Ids are assigned in push order starting at zero.
        self.messages.get(id as usize).filter(|m| m.id == id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Move a generating message to a terminal audio status.
    ///
    /// Returns `false` (and changes nothing) when the message is unknown or
    /// already settled.
    pub fn settle_audio(&mut self, id: u64, status: AudioStatus, artifact: &ArtifactRef) -> bool {
        debug_assert!(status.is_terminal());
        let Some(message) = self.messages.get_mut(id as usize).filter(|m| m.id == id) else {
            return false;
        };
        if message.audio_status != AudioStatus::Generating {
            return false;
        }
        message.audio_status = status;
        if status == AudioStatus::Ready {
            message.audio_ref = Some(artifact.clone());
        }
        true
    }
}
