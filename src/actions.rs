//! Verified action library.
//!
//! Screen automation is non-deterministic: animations, focus races, slow
//! redraws. Every primitive here performs one input action and confirms it
//! had a visible effect by comparing grayscale frames from before and after,
//! retrying within a bounded budget before giving up. Verification-by-diff is
//! a cheap, UI-agnostic confidence signal, not an accessibility-tree check.

use std::sync::Arc;
use std::time::Duration;

use image::GrayImage;
use serde::Serialize;

use crate::capture::FrameSource;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::input::InputBackend;
use crate::screen::ScreenOrigin;

/// Outcome of one verified action, reported back into script results.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub ok: bool,
    /// Resolved device coordinates (for clicks; hotkeys report the focus
    /// point when one was used, else 0,0).
    pub x: i32,
    pub y: i32,
    pub verified: bool,
    /// 1-based attempt that succeeded.
    pub attempt: u32,
    /// Measured mean absolute pixel difference.
    pub change: f64,
    pub label: String,
    /// 1-based candidate index, for multi-candidate clicks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_index: Option<u32>,
}

/// Per-call tunables, defaulting from config and overridable per statement.
#[derive(Debug, Clone, Copy)]
pub struct VerifyParams {
    pub retries: u32,
    pub post_delay: Duration,
    pub min_change: f64,
    pub move_duration: Duration,
}

impl VerifyParams {
    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self {
            retries: cfg.verify_retries,
            post_delay: cfg.post_delay(),
            min_change: cfg.min_change,
            move_duration: cfg.move_duration(),
        }
    }
}

/// Executes verified actions against an input backend, resolving image-local
/// coordinates through the cycle's screen origin at click time. `frames` is
/// optional: without it actions run unverified (degraded mode).
pub struct ActionDriver {
    input: Arc<dyn InputBackend>,
    frames: Option<Arc<dyn FrameSource>>,
    origin: ScreenOrigin,
}

impl ActionDriver {
    pub fn new(
        input: Arc<dyn InputBackend>,
        frames: Option<Arc<dyn FrameSource>>,
        origin: ScreenOrigin,
    ) -> Self {
        Self { input, frames, origin }
    }

    /// Click image-local coordinates and verify the screen changed.
    pub fn click_and_verify(
        &self,
        x: f64,
        y: f64,
        label: &str,
        p: VerifyParams,
    ) -> Result<ActionResult, AgentError> {
        let (sx, sy) = self.origin.to_device(x, y);

        let frames = match &self.frames {
            Some(frames) => frames,
            None => {
                // Degraded mode: no diff backend, single unverified click.
                self.input
                    .click(sx, sy, p.move_duration)
                    .map_err(|e| script_err("InputError", e))?;
                std::thread::sleep(p.post_delay);
                return Ok(ActionResult {
                    ok: true,
                    x: sx,
                    y: sy,
                    verified: false,
                    attempt: 1,
                    change: 0.0,
                    label: label.to_string(),
                    candidate_index: None,
                });
            }
        };

        let mut last_change = 0.0;
        for attempt in 0..=p.retries {
            let before = frames.grab_gray().map_err(|e| AgentError::Capture(e.to_string()))?;
            self.input
                .click(sx, sy, p.move_duration)
                .map_err(|e| script_err("InputError", e))?;
            std::thread::sleep(p.post_delay);
            let after = frames.grab_gray().map_err(|e| AgentError::Capture(e.to_string()))?;
            let change = mean_abs_diff(&before, &after);
            last_change = change;
            if change >= p.min_change {
                return Ok(ActionResult {
                    ok: true,
                    x: sx,
                    y: sy,
                    verified: true,
                    attempt: attempt + 1,
                    change,
                    label: label.to_string(),
                    candidate_index: None,
                });
            }
            tracing::warn!(
                label,
                x = sx,
                y = sy,
                attempt = attempt + 1,
                total = p.retries + 1,
                change,
                "click produced no visible change"
            );
        }

        Err(AgentError::Verification {
            label: label.to_string(),
            attempts: p.retries + 1,
            last_change,
            required: p.min_change,
        })
    }

    /// Try candidate points in order until one click verifies. The failure
    /// message aggregates every candidate's error, in order.
    pub fn click_candidates(
        &self,
        points: &[(f64, f64)],
        label: &str,
        retries_per_point: u32,
        p: VerifyParams,
    ) -> Result<ActionResult, AgentError> {
        if points.is_empty() {
            return Err(script_err_msg(
                "ValueError",
                "click_candidates requires at least one point",
            ));
        }
        let per_point = VerifyParams {
            retries: retries_per_point,
            ..p
        };
        let mut errors = Vec::new();
        for (idx, (x, y)) in points.iter().enumerate() {
            let candidate_label = format!("{} candidate {}", label, idx + 1);
            match self.click_and_verify(*x, *y, &candidate_label, per_point) {
                Ok(mut result) => {
                    result.candidate_index = Some(idx as u32 + 1);
                    return Ok(result);
                }
                Err(e) => errors.push(e.to_string()),
            }
        }
        Err(script_err_msg(
            "VerificationError",
            format!("click_candidates failed for '{}': {}", label, errors.join(" | ")),
        ))
    }

    /// Press a key combination and verify the screen changed.
    pub fn hotkey_and_verify(
        &self,
        keys: &[String],
        label: &str,
        p: VerifyParams,
    ) -> Result<ActionResult, AgentError> {
        if keys.is_empty() {
            return Err(script_err_msg("ValueError", "hotkey requires at least one key"));
        }

        let frames = match &self.frames {
            Some(frames) => frames,
            None => {
                self.input
                    .hotkey(keys)
                    .map_err(|e| script_err("InputError", e))?;
                std::thread::sleep(p.post_delay);
                return Ok(ActionResult {
                    ok: true,
                    x: 0,
                    y: 0,
                    verified: false,
                    attempt: 1,
                    change: 0.0,
                    label: label.to_string(),
                    candidate_index: None,
                });
            }
        };

        let mut last_change = 0.0;
        for attempt in 0..=p.retries {
            let before = frames.grab_gray().map_err(|e| AgentError::Capture(e.to_string()))?;
            self.input
                .hotkey(keys)
                .map_err(|e| script_err("InputError", e))?;
            std::thread::sleep(p.post_delay);
            let after = frames.grab_gray().map_err(|e| AgentError::Capture(e.to_string()))?;
            let change = mean_abs_diff(&before, &after);
            last_change = change;
            if change >= p.min_change {
                return Ok(ActionResult {
                    ok: true,
                    x: 0,
                    y: 0,
                    verified: true,
                    attempt: attempt + 1,
                    change,
                    label: label.to_string(),
                    candidate_index: None,
                });
            }
            tracing::warn!(
                label,
                keys = ?keys,
                attempt = attempt + 1,
                change,
                "hotkey produced no visible change"
            );
        }

        Err(AgentError::Verification {
            label: label.to_string(),
            attempts: p.retries + 1,
            last_change,
            required: p.min_change,
        })
    }

    /// Optionally click to focus, press the hotkey, and fall back to a
    /// coordinate click sequence when the hotkey alone produced no change.
    pub fn ensure_focus_and_hotkey(
        &self,
        keys: &[String],
        focus: Option<(f64, f64)>,
        fallbacks: &[(f64, f64)],
        label: &str,
        p: VerifyParams,
    ) -> Result<ActionResult, AgentError> {
        if let Some((fx, fy)) = focus {
            // Unverified focus click; moving focus often changes nothing
            // visible beyond a caret.
            let (sx, sy) = self.origin.to_device(fx, fy);
            self.input
                .click(sx, sy, p.move_duration)
                .map_err(|e| script_err("InputError", e))?;
            std::thread::sleep(p.post_delay / 2);
        }

        match self.hotkey_and_verify(keys, label, p) {
            Ok(result) => Ok(result),
            Err(hotkey_err) if !fallbacks.is_empty() => {
                tracing::warn!(label, error = %hotkey_err, "hotkey unverified, trying fallback clicks");
                self.click_candidates(fallbacks, label, 1, p).map_err(|fallback_err| {
                    script_err_msg(
                        "VerificationError",
                        format!("{} | fallback: {}", hotkey_err, fallback_err),
                    )
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Move the pointer without clicking; never verified.
    pub fn move_to(&self, x: f64, y: f64, duration: Duration) -> Result<(), AgentError> {
        let (sx, sy) = self.origin.to_device(x, y);
        self.input
            .move_pointer(sx, sy, duration)
            .map_err(|e| script_err("InputError", e))
    }
}

fn script_err(kind: &str, e: anyhow::Error) -> AgentError {
    AgentError::Script {
        kind: kind.to_string(),
        message: e.to_string(),
    }
}

fn script_err_msg(kind: &str, message: impl Into<String>) -> AgentError {
    AgentError::Script {
        kind: kind.to_string(),
        message: message.into(),
    }
}

/// Mean absolute pixel difference between two grayscale frames. Mismatched
/// dimensions (e.g. a resolution change mid-action) count as maximal change.
pub fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 255.0;
    }
    let total: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| (pa[0] as i64 - pb[0] as i64).unsigned_abs())
        .sum();
    total as f64 / (a.width() as f64 * a.height() as f64)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use anyhow::Result;
    use image::Luma;
    use std::sync::Mutex;

    /// Records injected events instead of touching the OS.
    #[derive(Default)]
    pub struct FakeInput {
        pub clicks: Mutex<Vec<(i32, i32)>>,
        pub hotkeys: Mutex<Vec<Vec<String>>>,
        pub moves: Mutex<Vec<(i32, i32)>>,
    }

    impl InputBackend for FakeInput {
        fn click(&self, x: i32, y: i32, _move_duration: Duration) -> Result<()> {
            self.clicks.lock().unwrap().push((x, y));
            Ok(())
        }

        fn hotkey(&self, keys: &[String]) -> Result<()> {
            self.hotkeys.lock().unwrap().push(keys.to_vec());
            Ok(())
        }

        fn move_pointer(&self, x: i32, y: i32, _move_duration: Duration) -> Result<()> {
            self.moves.lock().unwrap().push((x, y));
            Ok(())
        }
    }

    /// Returns frames from a scripted sequence of brightness levels; repeats
    /// the last frame once the sequence is exhausted.
    pub struct ScriptedFrames {
        levels: Mutex<Vec<u8>>,
        last: Mutex<u8>,
    }

    impl ScriptedFrames {
        pub fn new(levels: Vec<u8>) -> Self {
            Self {
                levels: Mutex::new(levels),
                last: Mutex::new(0),
            }
        }

        /// A source whose frames never change (verification always fails).
        pub fn frozen() -> Self {
            Self::new(vec![0])
        }
    }

    impl FrameSource for ScriptedFrames {
        fn grab_gray(&self) -> Result<GrayImage> {
            let mut levels = self.levels.lock().unwrap();
            let level = if levels.is_empty() {
                *self.last.lock().unwrap()
            } else {
                let level = levels.remove(0);
                *self.last.lock().unwrap() = level;
                level
            };
            Ok(GrayImage::from_pixel(8, 8, Luma([level])))
        }
    }

    pub fn fast_params() -> VerifyParams {
        VerifyParams {
            retries: 2,
            post_delay: Duration::from_millis(0),
            min_change: 1.5,
            move_duration: Duration::from_millis(0),
        }
    }
}
