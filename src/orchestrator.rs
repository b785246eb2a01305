//! Orchestration state machine.
//!
//! One call handles one classified user utterance end to end: capture the
//! screen, record the turn, plan (deterministic intent table first, planner
//! otherwise), validate and execute the script, replan once on failure, record
//! the assistant turn, and always hand the reply to the speech sink. A cycle
//! owns the session exclusively for its duration; the capture origin it stores
//! is only meaningful within that cycle.

use std::sync::Arc;

use serde::Serialize;

use crate::capture::{CaptureProvider, FrameSource};
use crate::config::AgentConfig;
use crate::executor::{ScriptExecutor, ScriptExecutionResult};
use crate::actions::{ActionDriver, VerifyParams};
use crate::input::InputBackend;
use crate::intents;
use crate::planner::{Classification, Plan, PlanRequest, Planner};
use crate::prompts;
use crate::screen::ScreenOrigin;
use crate::session::Session;
use crate::speech::{Cue, SpeechSink};
use crate::validator;

const REFUSAL_REPLY: &str = "I can't help with that request.";
const FAILURE_REPLY: &str = "Sorry, I ran into a problem and couldn't finish that action.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    Idle,
    Captured,
    Planned,
    Executed,
    Replanning,
    ReExecuted,
    Done,
    Failed,
}

/// Final result of one orchestration cycle.
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub ok: bool,
    pub classification: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AgentOutcome {
    fn failure(classification: Classification, error: &str, detail: Option<String>) -> Self {
        Self {
            ok: false,
            classification: classification.label().to_string(),
            script_ok: None,
            script_error: None,
            reply: None,
            error: Some(error.to_string()),
            detail,
        }
    }
}

pub struct Orchestrator {
    cfg: AgentConfig,
    capture: Arc<dyn CaptureProvider>,
    frames: Option<Arc<dyn FrameSource>>,
    input: Arc<dyn InputBackend>,
    planner: Arc<dyn Planner>,
    speech: Arc<dyn SpeechSink>,
}

impl Orchestrator {
    pub fn new(
        cfg: AgentConfig,
        capture: Arc<dyn CaptureProvider>,
        frames: Option<Arc<dyn FrameSource>>,
        input: Arc<dyn InputBackend>,
        planner: Arc<dyn Planner>,
        speech: Arc<dyn SpeechSink>,
    ) -> Self {
        Self {
            cfg,
            capture,
            frames,
            input,
            planner,
            speech,
        }
    }

    /// Run one full cycle for a classified utterance.
    pub async fn handle(
        &self,
        session: &mut Session,
        classification: Classification,
        user_text: &str,
    ) -> AgentOutcome {
        let cycle_id = uuid::Uuid::new_v4();
        tracing::info!(cycle = %cycle_id, class = classification.label(), "cycle started");
        let mut state = CycleState::Idle;

        if classification == Classification::Unsafe {
            self.advance(&mut state, CycleState::Failed);
            self.speech.cue(Cue::Warning);
            self.deliver(REFUSAL_REPLY);
            let mut outcome =
                AgentOutcome::failure(classification, "unsafe request refused", None);
            outcome.reply = Some(REFUSAL_REPLY.to_string());
            return outcome;
        }

        // Capture before any memory mutation so a failed capture leaves the
        // session untouched.
        let capture = match self.capture.capture(true, false).await {
            Ok(capture) => capture,
            Err(e) => {
                self.advance(&mut state, CycleState::Failed);
                tracing::error!(error = %e, "screen capture failed");
                self.speech.cue(Cue::Error);
                return AgentOutcome::failure(
                    classification,
                    "Screenshot failed",
                    Some(e.to_string()),
                );
            }
        };
        session
            .origin
            .set(capture.meta.origin_left, capture.meta.origin_top);
        self.advance(&mut state, CycleState::Captured);

        session.memory.push_user(user_text);

        let plan = match self.first_plan(session, classification, user_text, &capture).await {
            Ok(plan) => plan,
            Err(detail) => {
                // Recoverable: roll back the user turn so memory never keeps
                // an unanswered utterance.
                session.memory.pop_last();
                self.advance(&mut state, CycleState::Failed);
                self.speech.cue(Cue::Error);
                return AgentOutcome::failure(classification, "Planning failed", Some(detail));
            }
        };
        self.advance(&mut state, CycleState::Planned);

        if classification == Classification::Chat || plan.script.trim().is_empty() {
            self.advance(&mut state, CycleState::Done);
            session.memory.push_assistant(&plan.reply);
            self.deliver(&plan.reply);
            return AgentOutcome {
                ok: true,
                classification: classification.label().to_string(),
                script_ok: Some(true),
                script_error: None,
                reply: Some(plan.reply),
                error: None,
                detail: None,
            };
        }

        let first_run = self.run_script(&plan.script, session.origin).await;
        self.advance(&mut state, CycleState::Executed);

        let (final_run, reply) = if first_run.ok {
            (first_run, plan.reply.clone())
        } else {
            self.advance(&mut state, CycleState::Replanning);
            let script_error = first_run
                .error
                .clone()
                .unwrap_or_else(|| "unknown script error".to_string());
            match self
                .replan_and_execute(session, classification, user_text, &script_error)
                .await
            {
                Ok((run, replan_reply)) => {
                    self.advance(&mut state, CycleState::ReExecuted);
                    if run.ok {
                        (run, replan_reply)
                    } else {
                        (run, FAILURE_REPLY.to_string())
                    }
                }
                Err(detail) => {
                    tracing::error!(detail = %detail, "replanning failed");
                    (first_run, FAILURE_REPLY.to_string())
                }
            }
        };

        let ok = final_run.ok;
        self.advance(&mut state, if ok { CycleState::Done } else { CycleState::Failed });

        // Memory records the reply that is actually delivered, including the
        // failure apology, so history and speech never diverge.
        session.memory.push_assistant(&reply);
        self.deliver(&reply);

        AgentOutcome {
            ok,
            classification: classification.label().to_string(),
            script_ok: Some(final_run.ok),
            script_error: final_run.error,
            reply: Some(reply),
            error: None,
            detail: None,
        }
    }

    /// Deterministic intent table first, planner otherwise.
    async fn first_plan(
        &self,
        session: &Session,
        classification: Classification,
        user_text: &str,
        capture: &crate::capture::Capture,
    ) -> Result<Plan, String> {
        if classification == Classification::Agent {
            if let Some(canned) = intents::match_intent(user_text) {
                tracing::info!(intent = canned.name, "using canned plan");
                return Ok(Plan {
                    script: canned.script,
                    reply: canned.reply,
                });
            }
        }

        let history = session.memory.history_excluding_last();
        let raw = self
            .planner
            .plan(PlanRequest {
                instructions: prompts::MAIN_SYSTEM_PROMPT,
                classification,
                user_text,
                image_png: &capture.png,
                metadata: &capture.meta,
                history: &history,
            })
            .await
            .map_err(|e| e.to_string())?;
        crate::planner::parse_plan_output(&raw, classification).map_err(|e| e.to_string())
    }

    /// Single automatic replan: fresh capture, error-seeded instructions, one
    /// more execution. Any failure inside here is terminal for the cycle.
    async fn replan_and_execute(
        &self,
        session: &mut Session,
        classification: Classification,
        user_text: &str,
        script_error: &str,
    ) -> Result<(ScriptExecutionResult, String), String> {
        let capture = self
            .capture
            .capture(true, false)
            .await
            .map_err(|e| format!("re-capture failed: {}", e))?;
        session
            .origin
            .set(capture.meta.origin_left, capture.meta.origin_top);

        let instructions = prompts::replan_instructions(user_text, script_error);
        let history = session.memory.history_excluding_last();
        let raw = self
            .planner
            .plan(PlanRequest {
                instructions: &instructions,
                classification,
                user_text,
                image_png: &capture.png,
                metadata: &capture.meta,
                history: &history,
            })
            .await
            .map_err(|e| e.to_string())?;
        let plan =
            crate::planner::parse_plan_output(&raw, classification).map_err(|e| e.to_string())?;
        let run = self.run_script(&plan.script, session.origin).await;
        Ok((run, plan.reply))
    }

    /// Validate, then execute on the blocking pool. Validation failures come
    /// back as a failed run so they share the replan path.
    async fn run_script(&self, script_text: &str, origin: ScreenOrigin) -> ScriptExecutionResult {
        let script = match validator::validate(script_text, self.cfg.policy) {
            Ok(script) => script,
            Err(e) => {
                tracing::warn!(error = %e, "script rejected by validator");
                return ScriptExecutionResult {
                    ok: false,
                    error: Some(format!("{}: {}", e.kind(), e)),
                    actions: Vec::new(),
                };
            }
        };

        let input = Arc::clone(&self.input);
        let frames = self.frames.clone();
        let policy = self.cfg.policy;
        let defaults = VerifyParams::from_config(&self.cfg);
        let retries_per_point = self.cfg.retries_per_point;
        let joined = tokio::task::spawn_blocking(move || {
            let driver = ActionDriver::new(input, frames, origin);
            ScriptExecutor::new(driver, policy, defaults, retries_per_point).execute(&script)
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(e) => ScriptExecutionResult {
                ok: false,
                error: Some(format!("ExecutorError: execution task panicked: {}", e)),
                actions: Vec::new(),
            },
        }
    }

    /// Fire-and-forget speech; the cycle never blocks on audio.
    fn deliver(&self, reply: &str) {
        if let Err(e) = self.speech.speak(reply) {
            tracing::warn!(error = %e, "could not start speech");
        }
    }

    fn advance(&self, state: &mut CycleState, next: CycleState) {
        tracing::debug!(from = ?*state, to = ?next, "state transition");
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::test_support::{FakeInput, ScriptedFrames};
    use crate::capture::Capture;
    use crate::screen::{CaptureMetadata, GridSpec};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeCapture {
        calls: Mutex<u32>,
        fail: bool,
    }

    impl FakeCapture {
        fn ok() -> Self {
            Self {
                calls: Mutex::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Mutex::new(0),
                fail: true,
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CaptureProvider for FakeCapture {
        async fn capture(&self, _with_grid: bool, _all_monitors: bool) -> Result<Capture> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                return Err(anyhow::anyhow!("display server unavailable"));
            }
            Ok(Capture {
                png: vec![0x89, 0x50, 0x4e, 0x47],
                meta: CaptureMetadata {
                    width: 1920,
                    height: 1080,
                    origin_left: 0,
                    origin_top: 0,
                    capture_mode: "primary".to_string(),
                    grid: GridSpec::default(),
                    scale: 0.75,
                },
            })
        }
    }

    /// Replays queued responses and records the instructions of every call.
    #[derive(Default)]
    struct FakePlanner {
        responses: Mutex<Vec<Result<String, String>>>,
        seen_instructions: Mutex<Vec<String>>,
    }

    impl FakePlanner {
        fn with(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                seen_instructions: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen_instructions.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Planner for FakePlanner {
        async fn plan(&self, request: PlanRequest<'_>) -> Result<String> {
            self.seen_instructions
                .lock()
                .unwrap()
                .push(request.instructions.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(anyhow::anyhow!("no scripted response"));
            }
            responses.remove(0).map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[derive(Default)]
    struct RecordingSpeech {
        spoken: Mutex<Vec<String>>,
        cues: Mutex<Vec<Cue>>,
    }

    impl SpeechSink for RecordingSpeech {
        fn speak(&self, text: &str) -> Result<()> {
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn stop(&self) {}

        fn is_active(&self) -> bool {
            false
        }

        fn cue(&self, cue: Cue) {
            self.cues.lock().unwrap().push(cue);
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        capture: Arc<FakeCapture>,
        planner: Arc<FakePlanner>,
        input: Arc<FakeInput>,
        speech: Arc<RecordingSpeech>,
        session: Session,
    }

    fn fixture(
        capture: FakeCapture,
        planner: FakePlanner,
        frame_levels: Vec<u8>,
    ) -> Fixture {
        let cfg = AgentConfig {
            post_delay_ms: 0,
            move_duration_ms: 0,
            ..AgentConfig::default()
        };
        let capture = Arc::new(capture);
        let planner = Arc::new(planner);
        let input = Arc::new(FakeInput::default());
        let speech = Arc::new(RecordingSpeech::default());
        let frames: Arc<dyn FrameSource> = Arc::new(ScriptedFrames::new(frame_levels));
        let session = Session::new(&cfg);
        let orchestrator = Orchestrator::new(
            cfg,
            capture.clone(),
            Some(frames),
            input.clone(),
            planner.clone(),
            speech.clone(),
        );
        Fixture {
            orchestrator,
            capture,
            planner,
            input,
            speech,
            session,
        }
    }

    #[tokio::test]
    async fn chat_cycle_records_and_speaks_the_reply() {
        let mut f = fixture(
            FakeCapture::ok(),
            FakePlanner::with(vec![Ok("Doing great, thanks!".to_string())]),
            vec![0],
        );
        let outcome = f
            .orchestrator
            .handle(&mut f.session, Classification::Chat, "how are you")
            .await;
        assert!(outcome.ok);
        assert_eq!(outcome.reply.as_deref(), Some("Doing great, thanks!"));
        assert_eq!(f.session.memory.len(), 2);
        assert_eq!(f.speech.spoken.lock().unwrap()[0], "Doing great, thanks!");
        assert!(f.input.clicks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_tab_uses_canned_plan_without_calling_the_planner() {
        // Hotkey verifies on the first attempt.
        let mut f = fixture(FakeCapture::ok(), FakePlanner::default(), vec![0, 200]);
        let outcome = f
            .orchestrator
            .handle(&mut f.session, Classification::Agent, "close tab")
            .await;
        assert!(outcome.ok, "outcome: {:?}", outcome);
        assert_eq!(outcome.script_ok, Some(true));
        assert_eq!(f.planner.calls(), 0);
        assert_eq!(
            f.input.hotkeys.lock().unwrap()[0],
            vec!["ctrl".to_string(), "w".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_script_triggers_exactly_one_replan_with_the_error_text() {
        // First plan clicks a dead spot (frames frozen at 0 for all three
        // attempts), replanned script sleeps and succeeds.
        let first = "click_and_verify(5, 5, \"ghost\")\n---DELIMITER---\nClicked it.".to_string();
        let second = "sleep(0)\n---DELIMITER---\nTook another route.".to_string();
        let mut f = fixture(
            FakeCapture::ok(),
            FakePlanner::with(vec![Ok(first), Ok(second)]),
            vec![0],
        );
        let outcome = f
            .orchestrator
            .handle(&mut f.session, Classification::Agent, "press the ghost button")
            .await;
        assert!(outcome.ok);
        assert_eq!(outcome.script_ok, Some(true));
        assert_eq!(outcome.reply.as_deref(), Some("Took another route."));
        assert_eq!(f.planner.calls(), 2);
        let instructions = f.planner.seen_instructions.lock().unwrap();
        assert!(instructions[1].contains("verification failed for 'ghost'"));
        assert!(instructions[1].contains("Do not repeat the same approach"));
        // Fresh capture for the replan.
        assert_eq!(f.capture.calls(), 2);
        // Memory keeps the reply that was delivered, not the first plan's.
        let last = f.session.memory.iter().last().unwrap();
        assert_eq!(last.content, "Took another route.");
    }

    #[tokio::test]
    async fn replan_failure_ends_the_cycle_with_an_apology() {
        let first = "click_and_verify(5, 5, \"ghost\")\n---DELIMITER---\nClicked it.".to_string();
        let second =
            "click_and_verify(9, 9, \"still ghost\")\n---DELIMITER---\nTrying again.".to_string();
        let mut f = fixture(
            FakeCapture::ok(),
            FakePlanner::with(vec![Ok(first), Ok(second)]),
            vec![0],
        );
        let outcome = f
            .orchestrator
            .handle(&mut f.session, Classification::Agent, "press the ghost button")
            .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.script_ok, Some(false));
        assert!(outcome.script_error.unwrap().contains("VerificationError"));
        assert_eq!(outcome.reply.as_deref(), Some(FAILURE_REPLY));
        assert_eq!(f.planner.calls(), 2);
        assert_eq!(f.speech.spoken.lock().unwrap()[0], FAILURE_REPLY);
    }

    #[tokio::test]
    async fn blocked_script_is_never_executed_and_replans_once() {
        let first =
            "import os; os.system(\"rm -rf /\")\n---DELIMITER---\nRunning it.".to_string();
        let second = "sleep(0)\n---DELIMITER---\nDid it safely.".to_string();
        let mut f = fixture(
            FakeCapture::ok(),
            FakePlanner::with(vec![Ok(first), Ok(second)]),
            vec![0],
        );
        let outcome = f
            .orchestrator
            .handle(&mut f.session, Classification::Agent, "clean up my files")
            .await;
        assert!(outcome.ok);
        let instructions = f.planner.seen_instructions.lock().unwrap();
        assert!(instructions[1].contains("'os'"));
        // The blocked script produced zero side effects.
        assert!(f.input.clicks.lock().unwrap().is_empty());
        assert!(f.input.hotkeys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn capture_failure_is_terminal_and_mutates_nothing() {
        let mut f = fixture(FakeCapture::failing(), FakePlanner::default(), vec![0]);
        let outcome = f
            .orchestrator
            .handle(&mut f.session, Classification::Agent, "close tab")
            .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("Screenshot failed"));
        assert!(outcome.detail.unwrap().contains("display server unavailable"));
        assert!(f.session.memory.is_empty());
        assert_eq!(f.planner.calls(), 0);
        assert_eq!(f.speech.cues.lock().unwrap()[0], Cue::Error);
    }

    #[tokio::test]
    async fn planner_failure_rolls_back_the_user_turn() {
        let mut f = fixture(
            FakeCapture::ok(),
            FakePlanner::with(vec![Err("503 service unavailable".to_string())]),
            vec![0],
        );
        let outcome = f
            .orchestrator
            .handle(&mut f.session, Classification::Agent, "do something novel")
            .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("Planning failed"));
        assert!(f.session.memory.is_empty());
    }

    #[tokio::test]
    async fn parse_failure_is_recoverable_like_a_transport_failure() {
        let mut f = fixture(
            FakeCapture::ok(),
            FakePlanner::with(vec![Ok("no delimiter anywhere".to_string())]),
            vec![0],
        );
        let outcome = f
            .orchestrator
            .handle(&mut f.session, Classification::Agent, "do something novel")
            .await;
        assert!(!outcome.ok);
        assert!(outcome.detail.unwrap().contains("---DELIMITER---"));
        assert!(f.session.memory.is_empty());
    }

    #[tokio::test]
    async fn unsafe_classification_short_circuits_before_capture() {
        let mut f = fixture(FakeCapture::ok(), FakePlanner::default(), vec![0]);
        let outcome = f
            .orchestrator
            .handle(&mut f.session, Classification::Unsafe, "wipe my disk")
            .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.reply.as_deref(), Some(REFUSAL_REPLY));
        assert_eq!(f.capture.calls(), 0);
        assert!(f.session.memory.is_empty());
        assert_eq!(f.speech.cues.lock().unwrap()[0], Cue::Warning);
        assert_eq!(f.speech.spoken.lock().unwrap()[0], REFUSAL_REPLY);
    }

    #[tokio::test]
    async fn agent_plan_with_empty_script_behaves_like_chat() {
        let raw = "---DELIMITER---\nNothing on screen needs doing.".to_string();
        let mut f = fixture(FakeCapture::ok(), FakePlanner::with(vec![Ok(raw)]), vec![0]);
        let outcome = f
            .orchestrator
            .handle(&mut f.session, Classification::Agent, "anything to click?")
            .await;
        assert!(outcome.ok);
        assert_eq!(outcome.script_ok, Some(true));
        assert!(f.input.clicks.lock().unwrap().is_empty());
    }
}
