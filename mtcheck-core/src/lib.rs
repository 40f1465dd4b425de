//! Integration-test harness for MTC-slaved media players.
//!
//! The harness generates MIDI timecode, spawns the player under test as a
//! black-box process, arms it with a millisecond offset over its OSC
//! command port, enables timecode following and then watches the process
//! stay alive through playback and seeks.

pub mod mtc;
pub mod offset;
pub mod osc;
pub mod player;
pub mod scenario;
pub mod setup;
pub mod suite;
pub mod timecode;

pub use crate::{
    mtc::{MtcListener, MtcSender, TimecodeSource},
    offset::OffsetTracker,
    osc::{OscArg, OscClient},
    player::{OsPlayerLauncher, Player, PlayerCommand, PlayerLauncher},
    scenario::{run_scenario, Phase, Scenario, ScenarioContext, ScenarioReport, StressStep, Timing},
    suite::{
        build_plan,
        run_suite,
        FormatFamily,
        SuiteOptions,
        SuiteReport,
        TimecodeService,
        AUTOMATED_BASE_PORT,
        STRESS_BASE_PORT,
    },
    timecode::{Timecode, DEFAULT_FPS},
};
