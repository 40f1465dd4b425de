use std::{
    panic,
    path::PathBuf,
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use clap::Parser;
use mtcheck_core::{
    build_plan,
    run_suite,
    setup::{detect_audio_backend, find_player_binary},
    suite::{TimecodeService, AUTOMATED_BASE_PORT, STRESS_BASE_PORT},
    OsPlayerLauncher,
    SuiteOptions,
    Timing,
};
use thiserror::Error;
use tracing::{info, level_filters::LevelFilter, warn};

use crate::{cli::MtcheckCli, logging::init_logging};

mod cli;
mod logging;

const MTC_PORT_NAME: &str = "TestMTC";
const LISTENER_WARMUP: Duration = Duration::from_millis(500);
const PAUSE_BETWEEN_SCENARIOS: Duration = Duration::from_secs(1);

const DEFAULT_PLAY_SECONDS: u64 = 15;
const STRESS_PLAY_SECONDS: u64 = 40;

fn main() -> Result<()> {
    let orig_hook = panic::take_hook();
    // Catch panics in child threads
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(1);
    }));
    run()
}

fn run() -> Result<()> {
    let cli = MtcheckCli::parse();
    let log_path = cli.log.clone().unwrap_or_else(default_log_path);
    let _logger_guard = init_logging(LevelFilter::INFO, &log_path, LevelFilter::DEBUG)?;
    info!("CUEMS AUDIOPLAYER - AUTOMATED MTC INTEGRATION TEST");
    info!("Test results will be logged to: {}", log_path.display());

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
        })?;
    }

    let backend = detect_audio_backend()?;
    let cwd = std::env::current_dir()?;
    let player_binary = find_player_binary(cli.player.as_deref(), &cwd)?;

    let options = SuiteOptions {
        format:        cli.format,
        media_dir:     cli.media_dir.clone().unwrap_or_else(|| default_media_dir(&cwd)),
        single_file:   cli.file.clone(),
        play_duration: Duration::from_secs(cli.duration.unwrap_or(if cli.stress {
            STRESS_PLAY_SECONDS
        } else {
            DEFAULT_PLAY_SECONDS
        })),
        stress:        cli.stress,
        base_port:     cli.port_base.unwrap_or(if cli.stress {
            STRESS_BASE_PORT
        } else {
            AUTOMATED_BASE_PORT
        }),
    };
    let plan = build_plan(&options)?;
    info!("{} test scenario(s) planned", plan.len());

    let timecode = TimecodeService::start(
        cli.fps,
        0,
        MTC_PORT_NAME,
        cli.mtc_port.as_deref(),
        LISTENER_WARMUP,
    )?;

    let launcher = OsPlayerLauncher;
    let report = run_suite(
        &plan,
        &launcher,
        timecode.clock(),
        &player_binary,
        backend.use_pw_jack(),
        Timing::default(),
        PAUSE_BETWEEN_SCENARIOS,
        &cancel,
    );

    info!("Stopping MTC timecode...");
    timecode.stop();

    report.log_summary();
    if let Some(path) = &cli.report {
        report.save_json(path)?;
    }
    info!("Full test log: {}", log_path.display());

    if cancel.load(Ordering::SeqCst) {
        warn!("Run interrupted");
    }
    if !report.all_passed() {
        bail!(MtcheckError::ScenariosFailed {
            failed: report.total() - report.passed(),
            total:  report.total(),
        });
    }
    info!("All tests passed!");
    Ok(())
}

fn default_log_path() -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("MTC_TEST_RESULTS_{timestamp}.log"))
}

/// Video media takes precedence when both directories exist, matching the
/// layout the media generator scripts produce.
fn default_media_dir(cwd: &std::path::Path) -> PathBuf {
    let video = cwd.join("test_video_files");
    if video.is_dir() {
        video
    } else {
        cwd.join("test_audio_files")
    }
}

#[derive(Debug, Error)]
enum MtcheckError {
    #[error("{failed} of {total} scenario(s) failed")]
    ScenariosFailed {
        failed: usize,
        total:  usize,
    },
}
