use crate::artifact::ArtifactRef;
use crate::playback::PlaybackTrigger;
use crate::poller::PollOutcome;
use crate::state::{AppEvent, MessageLog};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The only writer of terminal audio state into the message log.
pub struct MessageBinder {
    log: Arc<Mutex<MessageLog>>,
    events: Sender<AppEvent>,
    playback: PlaybackTrigger,
    /// Read once per `Ready` outcome so toggling takes effect immediately.
    auto_play: Arc<AtomicBool>,
    playback_delay: Duration,
}

impl MessageBinder {
    pub fn new(
        log: Arc<Mutex<MessageLog>>,
        events: Sender<AppEvent>,
        playback: PlaybackTrigger,
        auto_play: Arc<AtomicBool>,
        playback_delay: Duration,
    ) -> Self {
        Self {
            log,
            events,
            playback,
            auto_play,
            playback_delay,
        }
    }

    pub fn playback(&self) -> &PlaybackTrigger {
        &self.playback
    }

    pub fn auto_play(&self) -> bool {
        self.auto_play.load(Ordering::SeqCst)
    }

    /// Write `outcome` into message `message_id`.
    ///
    /// Returns `false` when the message was already settled; repeated
    /// deliveries change nothing and never replay audio.
    pub async fn apply(&self, message_id: u64, artifact: &ArtifactRef, outcome: PollOutcome) -> bool {
        let status = outcome.audio_status();
        let settled = match self.log.lock() {
            Ok(mut log) => log.settle_audio(message_id, status, artifact),
            Err(_) => {
                log::error!("[binder] message log poisoned, dropping {:?}", outcome);
                false
            }
        };
        if !settled {
            log::debug!(
                "[binder] message #{} already settled, ignoring {:?}",
                message_id,
                outcome
            );
            return false;
        }

        log::info!("[binder] message #{} audio {:?}", message_id, status);
        let _ = self.events.send(AppEvent::AudioStatusChanged {
            message_id,
            status,
            artifact: Some(artifact.clone()),
        });

        if outcome == PollOutcome::Ready && self.auto_play() {
            self.play_after_delay(artifact).await;
        }
        true
    }

    /// Give the front-end a moment to render before audio starts.
    pub async fn play_after_delay(&self, artifact: &ArtifactRef) {
        tokio::time::sleep(self.playback_delay).await;
        self.playback.trigger(artifact);
    }
}

#[cfg(test)]
mod tests {
    use super::MessageBinder;
    use crate::artifact::ArtifactRef;
    use crate::client::parse_base;
    use crate::playback::tests::RecordingPlayer;
    use crate::playback::PlaybackTrigger;
    use crate::poller::PollOutcome;
    use crate::state::{AppEvent, AudioStatus, MessageLog, Role};
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc::{channel, Receiver};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    struct Fixture {
        binder: MessageBinder,
        log: Arc<Mutex<MessageLog>>,
        player: Arc<RecordingPlayer>,
        events: Receiver<AppEvent>,
        message_id: u64,
    }

    fn fixture(auto_play: bool) -> Fixture {
        let log = Arc::new(Mutex::new(MessageLog::new()));
        let message_id = log
            .lock()
            .unwrap()
            .push(
                Role::Assistant,
                "reply",
                Some(ArtifactRef::new("out/x.wav")),
                AudioStatus::Generating,
            )
            .id;
        let player = Arc::new(RecordingPlayer::default());
        let (tx, rx) = channel();
        let binder = MessageBinder::new(
            log.clone(),
            tx,
            PlaybackTrigger::new(parse_base("http://localhost:8000").unwrap(), Some(player.clone())),
            Arc::new(AtomicBool::new(auto_play)),
            Duration::from_millis(500),
        );
        Fixture {
            binder,
            log,
            player,
            events: rx,
            message_id,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_settles_message_and_plays_after_delay() {
        let f = fixture(true);
        let started = Instant::now();
        let applied = f
            .binder
            .apply(f.message_id, &ArtifactRef::new("x.wav"), PollOutcome::Ready)
            .await;

        assert!(applied);
        assert!(started.elapsed() >= Duration::from_millis(500));
        let log = f.log.lock().unwrap();
        let message = log.get(f.message_id).unwrap();
        assert_eq!(message.audio_status, AudioStatus::Ready);
        assert_eq!(message.audio_ref.as_ref().unwrap().filename(), "x.wav");
        assert_eq!(
            *f.player.played.lock().unwrap(),
            vec!["http://localhost:8000/audio/x.wav".to_string()]
        );
        assert!(matches!(
            f.events.try_recv(),
            Ok(AppEvent::AudioStatusChanged {
                status: AudioStatus::Ready,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_delivery_is_ignored() {
        let f = fixture(true);
        let artifact = ArtifactRef::new("x.wav");
        assert!(f.binder.apply(f.message_id, &artifact, PollOutcome::Ready).await);
        assert!(!f.binder.apply(f.message_id, &artifact, PollOutcome::Error).await);
        assert!(!f.binder.apply(f.message_id, &artifact, PollOutcome::Ready).await);

        assert_eq!(f.player.played.lock().unwrap().len(), 1);
        assert_eq!(
            f.log.lock().unwrap().get(f.message_id).unwrap().audio_status,
            AudioStatus::Ready
        );
        assert_eq!(f.events.try_iter().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_and_error_never_play() {
        let f = fixture(true);
        let artifact = ArtifactRef::new("x.wav");
        assert!(f.binder.apply(f.message_id, &artifact, PollOutcome::Timeout).await);
        assert_eq!(
            f.log.lock().unwrap().get(f.message_id).unwrap().audio_status,
            AudioStatus::Timeout
        );
        assert!(f.player.played.lock().unwrap().is_empty());

        let g = fixture(true);
        assert!(g.binder.apply(g.message_id, &artifact, PollOutcome::Error).await);
        assert_eq!(
            g.log.lock().unwrap().get(g.message_id).unwrap().audio_status,
            AudioStatus::Error
        );
        assert!(g.player.played.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_play_off_skips_playback() {
        let f = fixture(false);
        assert!(
            f.binder
                .apply(f.message_id, &ArtifactRef::new("x.wav"), PollOutcome::Ready)
                .await
        );
        assert!(f.player.played.lock().unwrap().is_empty());
    }
}
