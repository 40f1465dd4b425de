//! Supervision of the external audio player process. The player is a black
//! box: it is started with sync disabled, commanded over UDP, polled for
//! liveness, and its output is only available post-mortem.

use std::{
    io::{BufRead, BufReader, Read},
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, warn};

const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Invocation of the player binary for one scenario: media file, command
/// port, initial offset, and MTC following left disabled so the file loads
/// without being driven by the timecode.
#[derive(Debug, Clone)]
pub struct PlayerCommand {
    pub binary:            PathBuf,
    pub media:             PathBuf,
    pub command_port:      u16,
    pub initial_offset_ms: i64,
    pub use_pw_jack:       bool,
}

impl PlayerCommand {
    /// Builds the OS command: `[pw-jack] <binary> -f <media> -p <port> -o
    /// <offset>`, with `/usr/local/lib` prepended to the library path so
    /// the player finds libmtcmaster.
    #[inline]
    pub fn command(&self) -> Command {
        let mut command = if self.use_pw_jack {
            let mut c = Command::new("pw-jack");
            c.arg(&self.binary);
            c
        } else {
            Command::new(&self.binary)
        };

        command
            .arg("-f")
            .arg(&self.media)
            .arg("-p")
            .arg(self.command_port.to_string())
            .arg("-o")
            .arg(self.initial_offset_ms.to_string());

        let library_path = match std::env::var("LD_LIBRARY_PATH") {
            Ok(existing) => format!("/usr/local/lib:{}", existing),
            Err(_) => "/usr/local/lib".to_owned(),
        };
        command.env("LD_LIBRARY_PATH", library_path);

        command
    }

    #[inline]
    pub fn display(&self) -> String {
        let base = format!(
            "{} -f {} -p {} -o {}",
            self.binary.display(),
            self.media.display(),
            self.command_port,
            self.initial_offset_ms
        );
        if self.use_pw_jack {
            format!("pw-jack {}", base)
        } else {
            base
        }
    }
}

/// Diagnostic output captured from an exited player.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Capability interface over one running player. Implemented against real
/// OS processes and against a fake in the orchestrator tests.
pub trait Player: Send {
    /// Non-blocking liveness poll.
    fn is_alive(&mut self) -> bool;

    /// Exit code, once the process has exited.
    fn exit_code(&mut self) -> Option<i32>;

    /// Captured stdout/stderr; complete only once the process has exited.
    fn captured_output(&mut self) -> CapturedOutput;

    /// Graceful stop, escalating to a forceful kill after `grace`.
    fn terminate(&mut self, grace: Duration);
}

/// Spawns players. The orchestrator only sees this trait, so its state
/// machine can be exercised without a real player binary.
pub trait PlayerLauncher {
    fn spawn(&self, command: &PlayerCommand) -> Result<Box<dyn Player>, PlayerError>;
}

/// Real OS-process launcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsPlayerLauncher;

impl PlayerLauncher for OsPlayerLauncher {
    #[inline]
    fn spawn(&self, command: &PlayerCommand) -> Result<Box<dyn Player>, PlayerError> {
        debug!("Spawning player: {}", command.display());
        let player = OsPlayer::spawn(command.command()).map_err(|source| PlayerError::Spawn {
            program: command.binary.display().to_string(),
            source,
        })?;

        Ok(Box::new(player))
    }
}

/// A spawned player process with its stdout/stderr drained by background
/// threads, so a chatty player never blocks on a full pipe.
pub struct OsPlayer {
    child:         Child,
    status:        Option<ExitStatus>,
    stdout:        Arc<Mutex<String>>,
    stderr:        Arc<Mutex<String>>,
    drain_threads: Vec<JoinHandle<()>>,
}

impl OsPlayer {
    #[inline]
    pub fn spawn(mut command: Command) -> std::io::Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = Arc::new(Mutex::new(String::new()));
        let stderr = Arc::new(Mutex::new(String::new()));
        let mut drain_threads = Vec::with_capacity(2);

        if let Some(pipe) = child.stdout.take() {
            drain_threads.push(Self::drain(pipe, Arc::clone(&stdout)));
        }
        if let Some(pipe) = child.stderr.take() {
            drain_threads.push(Self::drain(pipe, Arc::clone(&stderr)));
        }

        Ok(OsPlayer {
            child,
            status: None,
            stdout,
            stderr,
            drain_threads,
        })
    }

    fn drain<R: Read + Send + 'static>(pipe: R, buffer: Arc<Mutex<String>>) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut reader = BufReader::new(pipe);
            let mut line = Vec::with_capacity(128);
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        buffer.lock().expect("output buffer lock").push_str(&text);
                    },
                    Err(_) => break,
                }
            }
        })
    }

    fn poll(&mut self) -> Option<ExitStatus> {
        if self.status.is_some() {
            return self.status;
        }
        match self.child.try_wait() {
            Ok(status) => {
                self.status = status;
                status
            },
            Err(e) => {
                warn!("Failed to poll player process: {}", e);
                self.status
            },
        }
    }

    fn join_drains(&mut self) {
        for handle in self.drain_threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Player for OsPlayer {
    #[inline]
    fn is_alive(&mut self) -> bool {
        self.poll().is_none()
    }

    #[inline]
    fn exit_code(&mut self) -> Option<i32> {
        self.poll().and_then(|status| status.code())
    }

    #[inline]
    fn captured_output(&mut self) -> CapturedOutput {
        if self.poll().is_some() {
            self.join_drains();
        }

        CapturedOutput {
            stdout: self.stdout.lock().expect("output buffer lock").clone(),
            stderr: self.stderr.lock().expect("output buffer lock").clone(),
        }
    }

    #[inline]
    fn terminate(&mut self, grace: Duration) {
        if self.poll().is_some() {
            self.join_drains();
            return;
        }

        #[cfg(unix)]
        {
            // SAFETY: plain kill(2) on the child's pid with a valid signal.
            unsafe {
                libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM);
            }

            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                if self.poll().is_some() {
                    self.join_drains();
                    return;
                }
                thread::sleep(TERMINATE_POLL_INTERVAL);
            }
            warn!("Player ignored SIGTERM for {:?}, killing", grace);
        }
        #[cfg(not(unix))]
        let _ = grace;

        if let Err(e) = self.child.kill() {
            warn!("Failed to kill player process: {}", e);
        }
        match self.child.wait() {
            Ok(status) => self.status = Some(status),
            Err(e) => warn!("Failed to reap player process: {}", e),
        }
        self.join_drains();
    }
}

impl Drop for OsPlayer {
    #[inline]
    fn drop(&mut self) {
        // A scenario always tears its player down explicitly; this only
        // fires on early error paths.
        if self.poll().is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Failed to start player {program}: {source}")]
    Spawn {
        program: String,
        source:  std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script);
        c
    }

    #[test]
    fn exited_process_reports_dead_with_output() {
        let mut player = OsPlayer::spawn(sh("echo out; echo err 1>&2; exit 3")).unwrap();

        // Allow the short-lived process to finish.
        let deadline = Instant::now() + Duration::from_secs(5);
        while player.is_alive() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        assert!(!player.is_alive());
        assert_eq!(player.exit_code(), Some(3));
        let output = player.captured_output();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[test]
    fn long_running_process_is_alive_then_terminates() {
        let mut player = OsPlayer::spawn(sh("sleep 30")).unwrap();
        assert!(player.is_alive());

        player.terminate(Duration::from_secs(5));
        assert!(!player.is_alive());
    }

    #[test]
    fn sigterm_resistant_process_is_killed_after_grace() {
        let mut player = OsPlayer::spawn(sh("trap '' TERM; sleep 30")).unwrap();
        // Give the shell a moment to install the trap.
        thread::sleep(Duration::from_millis(200));
        assert!(player.is_alive());

        player.terminate(Duration::from_millis(300));
        assert!(!player.is_alive());
    }

    #[test]
    fn command_line_matches_player_contract() {
        let command = PlayerCommand {
            binary:            PathBuf::from("/opt/audioplayer-cuems"),
            media:             PathBuf::from("/media/test_44100_16bit.wav"),
            command_port:      7003,
            initial_offset_ms: 0,
            use_pw_jack:       false,
        };
        assert_eq!(
            command.display(),
            "/opt/audioplayer-cuems -f /media/test_44100_16bit.wav -p 7003 -o 0"
        );

        let wrapped = PlayerCommand {
            use_pw_jack: true,
            ..command
        };
        assert!(wrapped.display().starts_with("pw-jack "));
    }

    #[test]
    fn spawn_failure_surfaces_program_name() {
        let launcher = OsPlayerLauncher;
        let command = PlayerCommand {
            binary:            PathBuf::from("/nonexistent/audioplayer"),
            media:             PathBuf::from("/nonexistent/file.wav"),
            command_port:      7000,
            initial_offset_ms: 0,
            use_pw_jack:       false,
        };
        let err = launcher.spawn(&command).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/audioplayer"));
    }
}
