//! Input injection backends.
//!
//! The action library talks to a trait so tests can observe injected events
//! without touching the OS. The real backend drives macOS System Events
//! through `osascript`; other platforms get a backend that reports the
//! limitation instead of silently doing nothing.

use std::time::Duration;

use anyhow::Result;

pub trait InputBackend: Send + Sync {
    /// Move the pointer to device coordinates over `move_duration`, then click.
    fn click(&self, x: i32, y: i32, move_duration: Duration) -> Result<()>;

    /// Press a key combination: zero or more modifiers plus one final key,
    /// e.g. `["ctrl", "w"]`.
    fn hotkey(&self, keys: &[String]) -> Result<()>;

    /// Move the pointer without clicking.
    fn move_pointer(&self, x: i32, y: i32, move_duration: Duration) -> Result<()>;
}

#[cfg(target_os = "macos")]
pub use macos::SystemEventsInput;

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use anyhow::Context;
    use std::process::Command;

    /// `osascript`-backed input injection via System Events.
    pub struct SystemEventsInput;

    fn run_osascript(script: &str) -> Result<String> {
        let output = Command::new("osascript")
            .arg("-e")
            .arg(script)
            .output()
            .context("Failed to run osascript")?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(anyhow::anyhow!("AppleScript Error: {}", stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn modifier_clause(keys: &[String]) -> Option<String> {
        if keys.len() < 2 {
            return None;
        }
        let mods: Vec<&str> = keys[..keys.len() - 1]
            .iter()
            .map(|k| match k.as_str() {
                "ctrl" | "control" => "control down",
                "cmd" | "command" => "command down",
                "alt" | "option" => "option down",
                "shift" => "shift down",
                other => {
                    tracing::warn!(modifier = other, "unknown modifier, sending as shift");
                    "shift down"
                }
            })
            .collect();
        Some(format!(" using {{{}}}", mods.join(", ")))
    }

    /// System Events key codes for non-character keys.
    fn key_code(key: &str) -> Option<u8> {
        match key {
            "left" => Some(123),
            "right" => Some(124),
            "down" => Some(125),
            "up" => Some(126),
            "enter" | "return" => Some(36),
            "tab" => Some(48),
            "esc" | "escape" => Some(53),
            "delete" | "backspace" => Some(51),
            _ => None,
        }
    }

    impl InputBackend for SystemEventsInput {
        fn click(&self, x: i32, y: i32, move_duration: Duration) -> Result<()> {
            // System Events clicks at absolute coordinates; the travel time is
            // honored as a settle delay before the event fires.
            std::thread::sleep(move_duration);
            run_osascript(&format!(
                "tell application \"System Events\" to click at {{{}, {}}}",
                x, y
            ))
            .map(|_| ())
        }

        fn hotkey(&self, keys: &[String]) -> Result<()> {
            let last = keys
                .last()
                .ok_or_else(|| anyhow::anyhow!("hotkey requires at least one key"))?;
            let mods = modifier_clause(keys).unwrap_or_default();
            let script = match key_code(last) {
                Some(code) => format!(
                    "tell application \"System Events\" to key code {}{}",
                    code, mods
                ),
                None => format!(
                    "tell application \"System Events\" to keystroke {:?}{}",
                    last, mods
                ),
            };
            run_osascript(&script).map(|_| ())
        }

        fn move_pointer(&self, x: i32, y: i32, move_duration: Duration) -> Result<()> {
            // System Events has no click-free pointer move; honor the travel
            // time so scripts that pace themselves with moves still work.
            tracing::debug!(x, y, "pointer move treated as delay");
            std::thread::sleep(move_duration);
            Ok(())
        }
    }
}

/// Placeholder backend for platforms without an injection implementation.
pub struct UnsupportedInput;

impl InputBackend for UnsupportedInput {
    fn click(&self, _x: i32, _y: i32, _move_duration: Duration) -> Result<()> {
        Err(anyhow::anyhow!(
            "input injection is not supported on this platform"
        ))
    }

    fn hotkey(&self, _keys: &[String]) -> Result<()> {
        Err(anyhow::anyhow!(
            "input injection is not supported on this platform"
        ))
    }

    fn move_pointer(&self, _x: i32, _y: i32, _move_duration: Duration) -> Result<()> {
        Err(anyhow::anyhow!(
            "input injection is not supported on this platform"
        ))
    }
}
