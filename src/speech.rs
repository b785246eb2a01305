//! Spoken output and audible cues.
//!
//! Speech is fire-and-forget: the orchestrator hands off the reply and
//! returns without joining. The only externally observable surface is
//! `stop()` and `is_active()`. Cues are short preset sounds for failure
//! conditions that occur before any reply text exists.

use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Error,
    Warning,
}

pub trait SpeechSink: Send + Sync {
    /// Start speaking `text` in the background, replacing any active speech.
    fn speak(&self, text: &str) -> Result<()>;

    /// Stop the active utterance, if any.
    fn stop(&self);

    fn is_active(&self) -> bool;

    /// Play a short preset sound without touching active speech.
    fn cue(&self, cue: Cue);
}

/// `say`-backed sink (macOS). One utterance at a time; a new `speak` kills
/// the previous child first.
pub struct SayCommandSpeech {
    child: Mutex<Option<Child>>,
}

impl SayCommandSpeech {
    pub fn new() -> Self {
        Self {
            child: Mutex::new(None),
        }
    }

    fn cue_path(cue: Cue) -> &'static str {
        match cue {
            Cue::Error => "/System/Library/Sounds/Basso.aiff",
            Cue::Warning => "/System/Library/Sounds/Sosumi.aiff",
        }
    }
}

impl Default for SayCommandSpeech {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSink for SayCommandSpeech {
    fn speak(&self, text: &str) -> Result<()> {
        let mut guard = self.child.lock().unwrap();
        if let Some(mut old) = guard.take() {
            let _ = old.kill();
            let _ = old.wait();
        }
        let child = Command::new("say")
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to run say")?;
        *guard = Some(child);
        Ok(())
    }

    fn stop(&self) {
        let mut guard = self.child.lock().unwrap();
        if let Some(mut child) = guard.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn is_active(&self) -> bool {
        let mut guard = self.child.lock().unwrap();
        match guard.as_mut() {
            // try_wait returns Ok(None) while the child is still running.
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn cue(&self, cue: Cue) {
        let path = Self::cue_path(cue);
        let spawned = Command::new("afplay")
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            tracing::warn!(error = %e, path, "could not play cue sound");
        }
    }
}

/// Silent sink for tests and platforms without a speech command.
#[derive(Default)]
pub struct NullSpeech;

impl SpeechSink for NullSpeech {
    fn speak(&self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn stop(&self) {}

    fn is_active(&self) -> bool {
        false
    }

    fn cue(&self, _cue: Cue) {}
}
