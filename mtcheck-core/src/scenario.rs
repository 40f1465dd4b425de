//! One scenario = one media file driven through the full
//! load/arm/follow/play/seek/teardown sequence against the running
//! timecode. Phases are strictly sequential; the first failing phase
//! aborts the scenario and every failure carries post-mortem diagnostics.

use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use serde::Serialize;
use strum::Display;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    mtc::TimecodeSource,
    offset::OffsetTracker,
    osc::{OscClient, OscClientError},
    player::{Player, PlayerCommand, PlayerError, PlayerLauncher},
};

/// Fixed suspension points of the state machine. Defaults mirror the
/// timings the player is known to tolerate; tests shrink them to zero.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Wait after spawn for file decoding/setup.
    pub stabilize:      Duration,
    /// Wait before a timecode read so the listener holds a fresh value.
    pub read_settle:    Duration,
    /// Wait after sending a command for the player to process it.
    pub command_settle: Duration,
    /// Interval between liveness polls during playback.
    pub liveness_poll:  Duration,
    /// Progress is logged every this many polls.
    pub progress_every: u64,
    /// Wait after a seek before confirming liveness.
    pub seek_settle:    Duration,
    /// Grace period before a graceful stop escalates to a kill.
    pub teardown_grace: Duration,
}

impl Default for Timing {
    #[inline]
    fn default() -> Self {
        Timing {
            stabilize:      Duration::from_millis(1500),
            read_settle:    Duration::from_millis(100),
            command_settle: Duration::from_millis(500),
            liveness_poll:  Duration::from_secs(1),
            progress_every: 5,
            seek_settle:    Duration::from_millis(500),
            teardown_grace: Duration::from_secs(5),
        }
    }
}

impl Timing {
    /// All waits collapsed to zero. Phase ordering is unchanged, so the
    /// state machine can be exercised in microseconds.
    #[inline]
    pub fn instant() -> Self {
        Timing {
            stabilize:      Duration::ZERO,
            read_settle:    Duration::ZERO,
            command_settle: Duration::ZERO,
            liveness_poll:  Duration::ZERO,
            progress_every: 5,
            seek_settle:    Duration::ZERO,
            teardown_grace: Duration::ZERO,
        }
    }
}

/// Phases in execution order, as recorded into the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Spawn,
    Stabilize,
    ArmOffset,
    EnableFollow,
    VerifyAdvancing,
    Play,
    Seek,
    Teardown,
}

/// Seek/play steps appended after the main playback stretch in stress
/// scenarios.
#[derive(Debug, Clone, Copy)]
pub enum StressStep {
    Seek { delta_ms: i64 },
    Play { duration: Duration },
}

/// Immutable description of one test scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name:          String,
    pub media:         PathBuf,
    pub command_port:  u16,
    pub play_duration: Duration,
    pub stress:        Vec<StressStep>,
}

impl Scenario {
    /// The canonical stress plan: 40 s of playback happen first (the
    /// scenario's `play_duration`), then seeks back and forth with short
    /// playback stretches between them.
    #[inline]
    pub fn stress_plan() -> Vec<StressStep> {
        vec![
            StressStep::Seek {
                delta_ms: -10_000
            },
            StressStep::Seek {
                delta_ms: 5_000
            },
            StressStep::Seek {
                delta_ms: -15_000
            },
            StressStep::Seek {
                delta_ms: 20_000
            },
            StressStep::Play {
                duration: Duration::from_secs(20),
            },
            StressStep::Seek {
                delta_ms: -5_000
            },
            StressStep::Play {
                duration: Duration::from_secs(10),
            },
        ]
    }
}

/// Outcome of one scenario. Appended to the suite's result list and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name:           String,
    pub passed:         bool,
    pub failure_reason: Option<String>,
    pub diagnostics:    Option<String>,
    pub warnings:       Vec<String>,
    pub phases:         Vec<Phase>,
}

/// Suite-level collaborators a scenario borrows for its lifetime.
pub struct ScenarioContext<'a> {
    pub launcher:      &'a dyn PlayerLauncher,
    pub clock:         Option<&'a dyn TimecodeSource>,
    pub player_binary: PathBuf,
    pub use_pw_jack:   bool,
    pub timing:        Timing,
    pub cancel:        &'a AtomicBool,
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("{0}")]
    Spawn(#[from] PlayerError),
    #[error("{0}")]
    CommandSocket(#[from] OscClientError),
    #[error("Player exited during load (exit code {})", fmt_code(.0))]
    ExitedDuringLoad(Option<i32>),
    #[error("Failed to send {0} command")]
    CommandSendFailed(&'static str),
    #[error("Player exited during playback after {0} seconds (exit code {code})", code = fmt_code(.1))]
    ExitedDuringPlayback(u64, Option<i32>),
    #[error("Player exited during seek (exit code {})", fmt_code(.0))]
    ExitedDuringSeek(Option<i32>),
    #[error("Cancelled")]
    Cancelled,
}

fn fmt_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "killed by signal".to_owned(), |c| c.to_string())
}

/// Drives one scenario from spawn to teardown and reports the outcome.
#[inline]
pub fn run_scenario(scenario: &Scenario, ctx: &ScenarioContext<'_>) -> ScenarioReport {
    info!("==== SCENARIO: {} ====", scenario.name);
    info!("Media file: {}", scenario.media.display());

    let mut run = ScenarioRun {
        scenario,
        ctx,
        phases: Vec::new(),
        warnings: Vec::new(),
    };
    run.execute()
}

struct ScenarioRun<'a> {
    scenario: &'a Scenario,
    ctx:      &'a ScenarioContext<'a>,
    phases:   Vec<Phase>,
    warnings: Vec<String>,
}

impl ScenarioRun<'_> {
    fn execute(&mut self) -> ScenarioReport {
        // SPAWN: sync disabled, neutral offset, so the file loads without
        // being driven by the timecode.
        self.enter(Phase::Spawn);
        let command = PlayerCommand {
            binary:            self.ctx.player_binary.clone(),
            media:             self.scenario.media.clone(),
            command_port:      self.scenario.command_port,
            initial_offset_ms: 0,
            use_pw_jack:       self.ctx.use_pw_jack,
        };
        let mut player = match self.ctx.launcher.spawn(&command) {
            Ok(player) => player,
            Err(e) => return self.failed(ScenarioError::Spawn(e), None),
        };
        let osc = match OscClient::new(self.scenario.command_port) {
            Ok(osc) => osc,
            Err(e) => {
                player.terminate(self.ctx.timing.teardown_grace);
                return self.failed(ScenarioError::CommandSocket(e), None);
            },
        };

        // STABILIZE
        self.enter(Phase::Stabilize);
        thread::sleep(self.ctx.timing.stabilize);
        if !player.is_alive() {
            let code = player.exit_code();
            let diagnostics = post_mortem(player.as_mut());
            return self.failed(ScenarioError::ExitedDuringLoad(code), Some(diagnostics));
        }
        info!("Player started and file loaded");

        // ARM_OFFSET: read the timecode right now and align file start
        // with it.
        self.enter(Phase::ArmOffset);
        let mut tracker = OffsetTracker::new();
        let mut armed_reading = None;
        match self.ctx.clock {
            Some(clock) => {
                thread::sleep(self.ctx.timing.read_settle);
                let t_ms = clock.milliseconds();
                let offset = tracker.arm(t_ms);
                info!("Current MTC time: {} ({} ms)", clock.timecode(), t_ms);
                info!("Calculated offset: {} ms", offset);
                if !osc.send_offset(offset as f32) {
                    player.terminate(self.ctx.timing.teardown_grace);
                    return self.failed(ScenarioError::CommandSendFailed("/offset"), None);
                }
                armed_reading = Some(t_ms);
            },
            None => {
                self.warn("MTC listener unavailable, falling back to the static command-line offset");
            },
        }
        thread::sleep(self.ctx.timing.command_settle);

        // ENABLE_FOLLOW. The offset is never re-sent after this point:
        // re-arming a following player causes an audible re-seek.
        self.enter(Phase::EnableFollow);
        if !osc.send_follow() {
            player.terminate(self.ctx.timing.teardown_grace);
            return self.failed(ScenarioError::CommandSendFailed("/mtcfollow"), None);
        }
        info!("MTC following enabled");
        thread::sleep(self.ctx.timing.command_settle);

        // VERIFY_ADVANCING: soft check, the timecode source is outside
        // this harness's control.
        self.enter(Phase::VerifyAdvancing);
        if let (Some(clock), Some(earlier)) = (self.ctx.clock, armed_reading) {
            let later = clock.milliseconds();
            if later > earlier {
                info!("MTC timecode is advancing (+{} ms)", later - earlier);
            } else {
                self.warn("MTC timecode not observed advancing");
            }
        }

        // PLAY
        self.enter(Phase::Play);
        info!("Playing for {} seconds...", self.scenario.play_duration.as_secs());
        if let Err(e) = self.play(player.as_mut(), self.scenario.play_duration) {
            let diagnostics = post_mortem(player.as_mut());
            player.terminate(self.ctx.timing.teardown_grace);
            return self.failed(e, Some(diagnostics));
        }

        // Stress steps, if any.
        for step in &self.scenario.stress {
            match *step {
                StressStep::Seek {
                    delta_ms,
                } => {
                    self.enter(Phase::Seek);
                    let offset = tracker.seek(delta_ms);
                    info!("Seeking: offset = {} ms ({:+} ms)", offset, delta_ms);
                    if !osc.send_offset(offset as f32) {
                        player.terminate(self.ctx.timing.teardown_grace);
                        return self.failed(ScenarioError::CommandSendFailed("/offset"), None);
                    }
                    thread::sleep(self.ctx.timing.seek_settle);
                    if !player.is_alive() {
                        let code = player.exit_code();
                        let diagnostics = post_mortem(player.as_mut());
                        return self
                            .failed(ScenarioError::ExitedDuringSeek(code), Some(diagnostics));
                    }
                },
                StressStep::Play {
                    duration,
                } => {
                    self.enter(Phase::Play);
                    info!("Playing for {} seconds...", duration.as_secs());
                    if let Err(e) = self.play(player.as_mut(), duration) {
                        let diagnostics = post_mortem(player.as_mut());
                        player.terminate(self.ctx.timing.teardown_grace);
                        return self.failed(e, Some(diagnostics));
                    }
                },
            }
        }

        // TEARDOWN: stop the player, the timecode keeps running.
        self.enter(Phase::Teardown);
        player.terminate(self.ctx.timing.teardown_grace);
        info!("Scenario completed: {}", self.scenario.name);

        ScenarioReport {
            name:           self.scenario.name.clone(),
            passed:         true,
            failure_reason: None,
            diagnostics:    None,
            warnings:       self.warnings.clone(),
            phases:         self.phases.clone(),
        }
    }

    /// Polls liveness once per interval for the whole stretch, logging
    /// timecode progress periodically.
    fn play(&mut self, player: &mut dyn Player, duration: Duration) -> Result<(), ScenarioError> {
        let seconds = duration.as_secs();
        let mut reference = self.ctx.clock.map(|clock| clock.milliseconds());

        for elapsed in 1..=seconds {
            if self.ctx.cancel.load(Ordering::Relaxed) {
                return Err(ScenarioError::Cancelled);
            }
            thread::sleep(self.ctx.timing.liveness_poll);
            if !player.is_alive() {
                return Err(ScenarioError::ExitedDuringPlayback(elapsed, player.exit_code()));
            }
            if elapsed % self.ctx.timing.progress_every == 0 {
                if let (Some(clock), Some(earlier)) = (self.ctx.clock, reference) {
                    let now = clock.milliseconds();
                    info!(
                        "[{}s] MTC time: {} ({} ms, +{} ms)",
                        elapsed,
                        clock.timecode(),
                        now,
                        now.saturating_sub(earlier)
                    );
                    reference = Some(now);
                }
            }
        }

        Ok(())
    }

    fn enter(&mut self, phase: Phase) {
        self.phases.push(phase);
    }

    fn warn(&mut self, message: &str) {
        warn!("{}", message);
        self.warnings.push(message.to_owned());
    }

    fn failed(&self, error: ScenarioError, diagnostics: Option<String>) -> ScenarioReport {
        warn!("Scenario {} failed: {}", self.scenario.name, error);
        if let Some(d) = &diagnostics {
            warn!("{}", d);
        }

        ScenarioReport {
            name:           self.scenario.name.clone(),
            passed:         false,
            failure_reason: Some(error.to_string()),
            diagnostics,
            warnings:       self.warnings.clone(),
            phases:         self.phases.clone(),
        }
    }
}

fn post_mortem(player: &mut dyn Player) -> String {
    let output = player.captured_output();
    format!("STDOUT:\n{}\nSTDERR:\n{}", output.stdout, output.stderr)
}
