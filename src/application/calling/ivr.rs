//! IVR runner: plays prompts and collects digits for one call
//!
//! The interpreter decides; this module does the waiting. Greeting playback
//! completes before the next digit is taken, but digits typed meanwhile stay
//! in the session's DTMF buffer.

use crate::infrastructure::ivr::{DtmfBuffer, IvrInterpreter, IvrMenuTree, IvrNext};
use crate::infrastructure::media::{AudioPlayer, PlaybackOutcome};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the IVR ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IvrExit {
    /// Queue the caller; `team` is the option's target, if any
    Transfer { team: Option<String> },
    Hangup,
    GotoFlow { flow: Option<String> },
    /// Session shut down or the IVR was stopped
    Cancelled,
    /// DTMF buffer closed
    InputClosed,
}

/// Plays one named prompt to the caller
#[async_trait]
pub trait PromptPlayer: Send + Sync {
    async fn play(&self, prompt: &str);
}

/// Plays prompts as OGG/Opus files below `audio_dir`
pub struct FilePromptPlayer {
    player: Arc<AudioPlayer>,
    audio_dir: PathBuf,
}

impl FilePromptPlayer {
    pub fn new(player: Arc<AudioPlayer>, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            player,
            audio_dir: audio_dir.into(),
        }
    }

    /// Path of a prompt inside `audio_dir`. Absolute paths and parent
    /// components are refused so stored menus cannot reach other files.
    fn resolve(&self, prompt: &str) -> Option<PathBuf> {
        let path = Path::new(prompt);
        let contained = path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained || prompt.is_empty() {
            return None;
        }
        Some(self.audio_dir.join(path))
    }
}

#[async_trait]
impl PromptPlayer for FilePromptPlayer {
    async fn play(&self, prompt: &str) {
        let Some(path) = self.resolve(prompt) else {
            warn!("Refusing prompt {:?} outside the audio directory", prompt);
            return;
        };
        match self.player.play_file(&path).await {
            Ok(PlaybackOutcome::Finished) => debug!("Prompt {} finished", path.display()),
            Ok(PlaybackOutcome::Stopped) => debug!("Prompt {} stopped", path.display()),
            // A missing prompt must not strand the caller in the menu
            Err(e) => warn!("Skipping prompt {}: {}", path.display(), e),
        }
    }
}

/// Run the menu until it reaches a final action, the input closes, or
/// `cancel` fires
pub async fn run_ivr(
    call_id: &str,
    tree: Arc<IvrMenuTree>,
    dtmf: &DtmfBuffer,
    prompts: &dyn PromptPlayer,
    cancel: &CancellationToken,
) -> IvrExit {
    info!("Starting IVR for call {}", call_id);
    let mut interpreter = IvrInterpreter::new(tree);
    let mut step = interpreter.start();

    loop {
        for prompt in &step.prompts {
            tokio::select! {
                _ = cancel.cancelled() => return IvrExit::Cancelled,
                _ = prompts.play(prompt) => {}
            }
        }

        match step.next {
            IvrNext::Continue => {}
            IvrNext::Transfer { target } => {
                info!("IVR of call {} requests transfer (team: {:?})", call_id, target);
                return IvrExit::Transfer { team: target };
            }
            IvrNext::Hangup => {
                info!("IVR of call {} hangs up", call_id);
                return IvrExit::Hangup;
            }
            IvrNext::GotoFlow { target } => {
                info!("IVR of call {} hands off to flow {:?}", call_id, target);
                return IvrExit::GotoFlow { flow: target };
            }
        }

        let timeout = interpreter.timeout();
        step = tokio::select! {
            _ = cancel.cancelled() => return IvrExit::Cancelled,
            received = tokio::time::timeout(timeout, dtmf.recv()) => match received {
                Ok(Some(digit)) => interpreter.on_digit(digit),
                Ok(None) => {
                    debug!("DTMF input of call {} closed", call_id);
                    return IvrExit::InputClosed;
                }
                Err(_) => {
                    debug!(
                        "No digit on call {} within {:?} (retry {})",
                        call_id,
                        timeout,
                        interpreter.retries() + 1
                    );
                    interpreter.on_timeout()
                }
            },
        };
    }
}
