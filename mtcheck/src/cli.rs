use std::path::PathBuf;

use clap::Parser as ClapParser;
use mtcheck_core::FormatFamily;

#[derive(ClapParser)]
#[command(
    name = "mtcheck",
    about = "Automated MTC integration test harness for the cuems audio player.",
    version
)]
pub struct MtcheckCli {
    /// Format family to test: wav, aiff, mp3, other, video or all.
    #[arg(long, default_value_t = FormatFamily::All)]
    pub format: FormatFamily,

    /// Playback duration per scenario in seconds. Defaults to 15, or 40
    /// when --stress is set.
    #[arg(long)]
    pub duration: Option<u64>,

    /// Test only this media file instead of the format matrix.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Run the seek stress plan after the main playback stretch.
    #[arg(long)]
    pub stress: bool,

    /// Directory holding the test media files. Defaults to
    /// ./test_video_files when it exists, else ./test_audio_files.
    #[arg(long)]
    pub media_dir: Option<PathBuf>,

    /// Path to the player binary. Defaults to probing the build output.
    #[arg(long)]
    pub player: Option<PathBuf>,

    /// First OSC command port; scenarios use consecutive ports from here.
    /// Defaults to 7000, or 8000 when --stress is set.
    #[arg(long)]
    pub port_base: Option<u16>,

    /// MTC frame rate.
    #[arg(long, default_value_t = 25)]
    pub fps: u32,

    /// Substring of the MIDI input port to listen on. Defaults to
    /// auto-detection.
    #[arg(long)]
    pub mtc_port: Option<String>,

    /// Log file path. Defaults to MTC_TEST_RESULTS_<timestamp>.log.
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Write the suite report as JSON to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,
}
