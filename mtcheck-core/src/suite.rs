//! Builds the scenario list for a run (format family tables, single-file
//! override, port assignment), owns the suite-wide timecode service, runs
//! scenarios back to back and aggregates the results.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    mtc::{MtcListener, MtcSender, MtcSenderError, TimecodeSource},
    player::PlayerLauncher,
    scenario::{run_scenario, Scenario, ScenarioContext, ScenarioReport, Timing},
    timecode::{Timecode, TimecodeError},
};

/// First command port of an automated run; each scenario gets the next one.
pub const AUTOMATED_BASE_PORT: u16 = 7000;
/// First command port of a stress run.
pub const STRESS_BASE_PORT: u16 = 8000;

const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "mkv", "avi", "mov", "m4v", "webm", "flv"];

/// Which slice of the media matrix to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FormatFamily {
    Wav,
    Aiff,
    Mp3,
    Other,
    Video,
    All,
}

/// One row of the format matrix: a label plus the filename shape the
/// matching media file must have.
struct FormatCase {
    label:     &'static str,
    stem_mark: &'static str,
    extension: &'static str,
}

const fn case(
    label: &'static str,
    stem_mark: &'static str,
    extension: &'static str,
) -> FormatCase {
    FormatCase {
        label,
        stem_mark,
        extension,
    }
}

const WAV_CASES: [FormatCase; 5] = [
    case("WAV 44.1kHz 16-bit", "_44100_16bit", "wav"),
    case("WAV 44.1kHz 24-bit", "_44100_24bit", "wav"),
    case("WAV 44.1kHz 32-bit", "_44100_32bit", "wav"),
    case("WAV 48kHz 16-bit (resampling)", "_48000_16bit", "wav"),
    case("WAV 48kHz 24-bit (resampling)", "_48000_24bit", "wav"),
];

const AIFF_CASES: [FormatCase; 5] = [
    case("AIFF 44.1kHz 16-bit", "_44100_16bit", "aiff"),
    case("AIFF 44.1kHz 24-bit", "_44100_24bit", "aiff"),
    case("AIFF 44.1kHz 32-bit", "_44100_32bit", "aiff"),
    case("AIFF 48kHz 16-bit (resampling)", "_48000_16bit", "aiff"),
    case("AIFF 48kHz 24-bit (resampling)", "_48000_24bit", "aiff"),
];

const MP3_CASES: [FormatCase; 5] = [
    case("MP3 44.1kHz 128k", "_44100_128k", "mp3"),
    case("MP3 44.1kHz 192k", "_44100_192k", "mp3"),
    case("MP3 44.1kHz 256k", "_44100_256k", "mp3"),
    case("MP3 44.1kHz 320k", "_44100_320k", "mp3"),
    case("MP3 48kHz 192k (resampling)", "_48000_192k", "mp3"),
];

const OTHER_CASES: [FormatCase; 4] = [
    case("FLAC 44.1kHz", "_44100_flac", "flac"),
    case("OGG 44.1kHz", "_44100_ogg", "ogg"),
    case("OPUS 48kHz", "_48000_opus", "opus"),
    case("AAC 44.1kHz", "_44100_aac", "m4a"),
];

/// Everything the plan builder needs to decide what runs.
#[derive(Debug, Clone)]
pub struct SuiteOptions {
    pub format:        FormatFamily,
    pub media_dir:     PathBuf,
    pub single_file:   Option<PathBuf>,
    pub play_duration: Duration,
    pub stress:        bool,
    pub base_port:     u16,
}

/// Expands the options into concrete scenarios. Missing media files are
/// skipped with a warning; an entirely empty plan is an error.
pub fn build_plan(options: &SuiteOptions) -> Result<Vec<Scenario>, SuiteError> {
    if let Some(file) = &options.single_file {
        if !file.is_file() {
            return Err(SuiteError::MediaFileNotFound(file.display().to_string()));
        }
        let name = file
            .file_name()
            .map_or_else(|| file.display().to_string(), |n| n.to_string_lossy().into_owned());
        return Ok(vec![scenario_for(
            format!("Single file test: {name}"),
            file.clone(),
            options,
            0,
        )]);
    }

    let mut scenarios = Vec::new();
    match options.format {
        FormatFamily::All => {
            for family in [
                FormatFamily::Wav,
                FormatFamily::Aiff,
                FormatFamily::Mp3,
                FormatFamily::Other,
                FormatFamily::Video,
            ] {
                extend_for_family(&mut scenarios, family, options);
            }
        },
        family => extend_for_family(&mut scenarios, family, options),
    }

    if scenarios.is_empty() {
        return Err(SuiteError::NoScenarios(options.format));
    }
    Ok(scenarios)
}

fn extend_for_family(scenarios: &mut Vec<Scenario>, family: FormatFamily, options: &SuiteOptions) {
    let cases: &[FormatCase] = match family {
        FormatFamily::Wav => &WAV_CASES,
        FormatFamily::Aiff => &AIFF_CASES,
        FormatFamily::Mp3 => &MP3_CASES,
        FormatFamily::Other => &OTHER_CASES,
        FormatFamily::Video => {
            for media in video_files(&options.media_dir) {
                let name =
                    media.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                let index = scenarios.len();
                scenarios.push(scenario_for(format!("Video: {name}"), media, options, index));
            }
            return;
        },
        FormatFamily::All => unreachable!("expanded by the caller"),
    };

    for format_case in cases {
        match find_media(&options.media_dir, format_case) {
            Some(media) => {
                let index = scenarios.len();
                scenarios.push(scenario_for(format_case.label.to_owned(), media, options, index));
            },
            None => warn!("Skipping {}: no matching media file", format_case.label),
        }
    }
}

fn scenario_for(name: String, media: PathBuf, options: &SuiteOptions, index: usize) -> Scenario {
    Scenario {
        name,
        media,
        command_port: options.base_port + index as u16,
        play_duration: options.play_duration,
        stress: if options.stress {
            Scenario::stress_plan()
        } else {
            Vec::new()
        },
    }
}

/// First file in the directory matching the case, in name order so runs
/// are deterministic.
fn find_media(media_dir: &Path, format_case: &FormatCase) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = list_files(media_dir)
        .into_iter()
        .filter(|path| {
            let name =
                path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            name.ends_with(&format!("{}.{}", format_case.stem_mark, format_case.extension))
                || (name.contains(format_case.stem_mark)
                    && path.extension().is_some_and(|e| e == format_case.extension))
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

fn video_files(media_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = list_files(media_dir)
        .into_iter()
        .filter(|path| {
            path.extension().is_some_and(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                VIDEO_EXTENSIONS.contains(&ext.as_str())
            })
        })
        .collect();
    files.sort();
    files
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect(),
        Err(e) => {
            warn!("Cannot read media directory {}: {}", dir.display(), e);
            Vec::new()
        },
    }
}

/// The suite-wide MTC authority: a sender driving timecode from
/// 00:00:00:00 and, when MIDI input works, a listener reading it back.
/// Created once and shared read-only by every scenario.
pub struct TimecodeService {
    sender:   MtcSender,
    listener: Option<MtcListener>,
}

impl TimecodeService {
    /// Opens the sender, rewinds to zero and starts the clock; then tries
    /// to attach a listener. Listener failure degrades to static offsets.
    pub fn start(
        fps: u32,
        port: i32,
        port_name: &str,
        listener_hint: Option<&str>,
        warmup: Duration,
    ) -> Result<Self, SuiteError> {
        let sender = MtcSender::open(fps, port, port_name)?;
        sender.set_time(Timecode::zero(fps)?);
        sender.play();
        info!("MTC timecode started from 00:00:00:00 at {} fps", fps);
        thread::sleep(warmup);

        let listener = match MtcListener::start(listener_hint) {
            Ok(listener) => {
                info!("MTC listener attached to port: {}", listener.port_name());
                Some(listener)
            },
            Err(e) => {
                warn!("Failed to initialize MTC listener: {e}");
                let ports = MtcListener::list_ports();
                if !ports.is_empty() {
                    warn!("Available MIDI input ports: {}", ports.join(", "));
                }
                warn!("Continuing without dynamic offset calculation");
                None
            },
        };

        Ok(TimecodeService {
            sender,
            listener,
        })
    }

    #[inline]
    pub fn clock(&self) -> Option<&dyn TimecodeSource> {
        self.listener.as_ref().map(|listener| listener as &dyn TimecodeSource)
    }

    #[inline]
    pub fn stop(&self) {
        self.sender.stop();
    }
}

/// Aggregated outcome of a whole run.
#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub results: Vec<ScenarioReport>,
}

impl SuiteReport {
    #[inline]
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.results.len()
    }

    #[inline]
    pub fn all_passed(&self) -> bool {
        self.passed() == self.total()
    }

    pub fn log_summary(&self) {
        info!("==== TEST SUMMARY ====");
        for result in &self.results {
            if result.passed {
                info!("PASS: {}", result.name);
            } else {
                info!(
                    "FAIL: {} ({})",
                    result.name,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
        info!("Total: {}/{} tests passed", self.passed(), self.total());
    }

    pub fn save_json(&self, path: &Path) -> Result<(), SuiteError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| SuiteError::ReportWrite {
            path: path.display().to_string(),
            source,
        })?;
        info!("Report written to {}", path.display());
        Ok(())
    }
}

/// Runs every scenario in order with a short pause between them, stopping
/// early when cancelled.
pub fn run_suite(
    scenarios: &[Scenario],
    launcher: &dyn PlayerLauncher,
    clock: Option<&dyn TimecodeSource>,
    player_binary: &Path,
    use_pw_jack: bool,
    timing: Timing,
    pause_between: Duration,
    cancel: &AtomicBool,
) -> SuiteReport {
    let context = ScenarioContext {
        launcher,
        clock,
        player_binary: player_binary.to_path_buf(),
        use_pw_jack,
        timing,
        cancel,
    };

    let mut results = Vec::with_capacity(scenarios.len());
    for (index, scenario) in scenarios.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            warn!("Cancelled, skipping remaining scenarios");
            break;
        }
        results.push(run_scenario(scenario, &context));
        if index + 1 < scenarios.len() {
            thread::sleep(pause_between);
        }
    }

    SuiteReport {
        results,
    }
}

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("Media file not found: {0}")]
    MediaFileNotFound(String),
    #[error("No test scenarios found for format: {0}")]
    NoScenarios(FormatFamily),
    #[error("Failed to initialize MTC sender: {0}")]
    Sender(#[from] MtcSenderError),
    #[error("{0}")]
    Timecode(#[from] TimecodeError),
    #[error("Failed to serialize report: {0}")]
    ReportSerialize(#[from] serde_json::Error),
    #[error("Failed to write report to {path}: {source}")]
    ReportWrite {
        path:   String,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;
    use crate::scenario::StressStep;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    fn options(media_dir: &Path, format: FormatFamily) -> SuiteOptions {
        SuiteOptions {
            format,
            media_dir: media_dir.to_path_buf(),
            single_file: None,
            play_duration: Duration::from_secs(15),
            stress: false,
            base_port: AUTOMATED_BASE_PORT,
        }
    }

    #[test]
    fn wav_family_enumerates_in_matrix_order_with_incrementing_ports() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "tone_44100_16bit.wav");
        touch(dir.path(), "tone_44100_24bit.wav");
        touch(dir.path(), "tone_48000_16bit.wav");

        let plan = build_plan(&options(dir.path(), FormatFamily::Wav)).unwrap();

        let names: Vec<&str> = plan.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![
            "WAV 44.1kHz 16-bit",
            "WAV 44.1kHz 24-bit",
            "WAV 48kHz 16-bit (resampling)",
        ]);
        let ports: Vec<u16> = plan.iter().map(|s| s.command_port).collect();
        assert_eq!(ports, vec![7000, 7001, 7002]);
    }

    #[test]
    fn all_runs_wav_before_aiff_before_mp3() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "tone_44100_16bit.mp3");
        touch(dir.path(), "tone_44100_128k.mp3");
        touch(dir.path(), "tone_44100_16bit.aiff");
        touch(dir.path(), "tone_44100_16bit.wav");

        let plan = build_plan(&options(dir.path(), FormatFamily::All)).unwrap();

        let names: Vec<&str> = plan.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![
            "WAV 44.1kHz 16-bit",
            "AIFF 44.1kHz 16-bit",
            "MP3 44.1kHz 128k",
        ]);
    }

    #[test]
    fn video_family_takes_every_video_file_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b_clip.mkv");
        touch(dir.path(), "a_clip.mp4");
        touch(dir.path(), "notes.txt");

        let plan = build_plan(&options(dir.path(), FormatFamily::Video)).unwrap();

        let names: Vec<&str> = plan.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Video: a_clip.mp4", "Video: b_clip.mkv"]);
    }

    #[test]
    fn single_file_override_wins_over_format() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "special.wav");
        touch(dir.path(), "tone_44100_16bit.wav");

        let mut opts = options(dir.path(), FormatFamily::All);
        opts.single_file = Some(dir.path().join("special.wav"));
        let plan = build_plan(&opts).unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].name, "Single file test: special.wav");
    }

    #[test]
    fn missing_single_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path(), FormatFamily::All);
        opts.single_file = Some(dir.path().join("gone.wav"));

        assert!(matches!(
            build_plan(&opts),
            Err(SuiteError::MediaFileNotFound(_))
        ));
    }

    #[test]
    fn empty_media_dir_yields_no_scenarios_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            build_plan(&options(dir.path(), FormatFamily::Wav)),
            Err(SuiteError::NoScenarios(FormatFamily::Wav))
        ));
    }

    #[test]
    fn stress_option_attaches_the_stress_plan() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "tone_44100_16bit.wav");

        let mut opts = options(dir.path(), FormatFamily::Wav);
        opts.stress = true;
        opts.base_port = STRESS_BASE_PORT;
        let plan = build_plan(&opts).unwrap();

        assert_eq!(plan[0].command_port, 8000);
        assert_eq!(plan[0].stress.len(), Scenario::stress_plan().len());
        assert!(matches!(plan[0].stress[0], StressStep::Seek {
            delta_ms: -10_000
        }));
    }

    #[test]
    fn format_family_parses_cli_spellings() {
        use std::str::FromStr;
        assert_eq!(FormatFamily::from_str("wav").unwrap(), FormatFamily::Wav);
        assert_eq!(FormatFamily::from_str("all").unwrap(), FormatFamily::All);
        assert!(FormatFamily::from_str("flac").is_err());
    }
}
