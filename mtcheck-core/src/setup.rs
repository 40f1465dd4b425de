//! Environment checks that must pass before any scenario runs: a usable
//! JACK audio service and the player binary itself.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

const PLAYER_NAMES: [&str; 2] = ["audioplayer-cuems_dbg", "audioplayer-cuems"];

/// How the player will reach the JACK API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioBackend {
    /// A native `jackd` daemon is running.
    Jack,
    /// No daemon, but `pw-jack` exists; the player gets wrapped with it.
    PipeWire,
}

impl AudioBackend {
    #[inline]
    pub fn use_pw_jack(self) -> bool {
        self == AudioBackend::PipeWire
    }
}

/// Looks for a running `jackd`, then for the PipeWire compatibility
/// wrapper. Anything else means the player cannot produce audio at all.
#[inline]
pub fn detect_audio_backend() -> Result<AudioBackend, SetupError> {
    let mut system = sysinfo::System::new();
    system.refresh_all();
    if system
        .processes()
        .values()
        .any(|process| process.name().to_string_lossy() == "jackd")
    {
        info!("JACK daemon is running");
        return Ok(AudioBackend::Jack);
    }

    match which::which("pw-jack") {
        Ok(path) => {
            warn!(
                "JACK daemon not running, using pw-jack compatibility layer ({})",
                path.display()
            );
            Ok(AudioBackend::PipeWire)
        },
        Err(_) => Err(SetupError::NoAudioBackend),
    }
}

/// Resolves the player binary: an explicit path wins, otherwise the usual
/// build output locations are probed relative to `base_dir`, debug build
/// first.
#[inline]
pub fn find_player_binary(
    explicit: Option<&Path>,
    base_dir: &Path,
) -> Result<PathBuf, SetupError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(SetupError::PlayerNotFound(path.display().to_string()));
    }

    for dir in search_dirs(base_dir) {
        for name in PLAYER_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                info!("Found player binary: {}", candidate.display());
                return Ok(candidate);
            }
        }
    }

    Err(SetupError::PlayerNotFound(format!(
        "no {} under {}",
        PLAYER_NAMES[1],
        base_dir.display()
    )))
}

fn search_dirs(base_dir: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![
        base_dir.join("build"),
        base_dir.join("build").join("src"),
        base_dir.to_path_buf(),
        base_dir.join("src"),
    ];
    // Running from inside build/ itself.
    if let Some(parent) = base_dir.parent() {
        dirs.push(parent.join("build"));
        dirs.push(parent.join("build").join("src"));
    }
    dirs
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(
        "JACK is not running and pw-jack is not available; start JACK with: jackd -d alsa -r \
         44100, or install PipeWire with JACK support"
    )]
    NoAudioBackend,
    #[error("Player binary not found: {0}; build the project first")]
    PlayerNotFound(String),
}
