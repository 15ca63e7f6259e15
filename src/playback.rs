use crate::artifact::ArtifactRef;
use crate::client::endpoint;
use crate::error::PlaybackError;
use reqwest::Url;
use std::process::Command;
use std::sync::Arc;

/// Something that can start playing a media URL without blocking.
pub trait Player: Send + Sync {
    fn play(&self, url: &Url) -> Result<(), PlaybackError>;
}

/// Hands the URL to an external program, e.g. `ffplay -nodisp -autoexit`.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// The desktop's default handler for URLs.
    pub fn platform_default() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Self::from_command_line("rundll32 url.dll,FileProtocolHandler")
        } else if cfg!(target_os = "macos") {
            Self::from_command_line("open")
        } else if cfg!(unix) {
            Self::from_command_line("xdg-open")
        } else {
            None
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Player for CommandPlayer {
    fn play(&self, url: &Url) -> Result<(), PlaybackError> {
        Command::new(&self.program)
            .args(&self.args)
            .arg(url.as_str())
            .spawn()
            .map_err(|source| PlaybackError::Launch {
                command: self.command_line(),
                source,
            })?;
        Ok(())
    }
}

/// Resolves artifacts against the service address and plays them.
#[derive(Clone)]
pub struct PlaybackTrigger {
    base: Url,
    player: Option<Arc<dyn Player>>,
}

impl PlaybackTrigger {
    pub fn new(base: Url, player: Option<Arc<dyn Player>>) -> Self {
        Self { base, player }
    }

    pub fn media_url(&self, artifact: &ArtifactRef) -> Result<Url, PlaybackError> {
        Ok(endpoint(&self.base, &["audio", artifact.filename()])?)
    }

    pub fn play(&self, artifact: &ArtifactRef) -> Result<(), PlaybackError> {
        let player = self.player.as_ref().ok_or(PlaybackError::NoPlayer)?;
        let url = self.media_url(artifact)?;
        log::info!("[playback] playing {}", url);
        player.play(&url)
    }

    /// Fire-and-forget playback; failures are only logged.
    pub fn trigger(&self, artifact: &ArtifactRef) {
        if let Err(e) = self.play(artifact) {
            log::error!("[playback] {}: {}", artifact, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{CommandPlayer, PlaybackTrigger, Player};
    use crate::artifact::ArtifactRef;
    use crate::client::parse_base;
    use crate::error::PlaybackError;
    use reqwest::Url;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub(crate) struct RecordingPlayer {
        pub(crate) played: Mutex<Vec<String>>,
    }

    impl Player for RecordingPlayer {
        fn play(&self, url: &Url) -> Result<(), PlaybackError> {
            self.played.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    struct BrokenPlayer;

    impl Player for BrokenPlayer {
        fn play(&self, _url: &Url) -> Result<(), PlaybackError> {
            Err(PlaybackError::Launch {
                command: "missing-player".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            })
        }
    }

    #[test]
    fn resolves_bare_filename_under_audio() {
        let trigger = PlaybackTrigger::new(parse_base("http://localhost:8000").unwrap(), None);
        let url = trigger.media_url(&ArtifactRef::new(r"output\x.wav")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/audio/x.wav");
    }

    #[test]
    fn plays_resolved_url() {
        let player = Arc::new(RecordingPlayer::default());
        let trigger =
            PlaybackTrigger::new(parse_base("http://localhost:8000").unwrap(), Some(player.clone()));
        trigger.play(&ArtifactRef::new("x.wav")).unwrap();
        assert_eq!(
            *player.played.lock().unwrap(),
            vec!["http://localhost:8000/audio/x.wav".to_string()]
        );
    }

    #[test]
    fn failures_are_swallowed_by_trigger() {
        let trigger =
            PlaybackTrigger::new(parse_base("http://localhost:8000").unwrap(), Some(Arc::new(BrokenPlayer)));
        assert!(trigger.play(&ArtifactRef::new("x.wav")).is_err());
        trigger.trigger(&ArtifactRef::new("x.wav"));

        let silent = PlaybackTrigger::new(parse_base("http://localhost:8000").unwrap(), None);
        assert!(matches!(
            silent.play(&ArtifactRef::new("x.wav")),
            Err(PlaybackError::NoPlayer)
        ));
    }

    #[test]
    fn parses_player_command_line() {
        let player = CommandPlayer::from_command_line("  ffplay -nodisp  -autoexit ").unwrap();
        assert_eq!(player.command_line(), "ffplay -nodisp -autoexit");
        assert!(CommandPlayer::from_command_line("   ").is_none());
    }
}
