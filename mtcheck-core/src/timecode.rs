use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frame rate used by the harness when none is configured. The cuems rig
/// broadcasts MTC at 25 fps (EBU).
pub const DEFAULT_FPS: u32 = 25;

const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;
const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// One reading of the running timecode: hours:minutes:seconds:frames at a
/// fixed frame rate. Immutable once constructed; later reads supersede
/// earlier ones instead of mutating them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timecode {
    hours:   u32,
    minutes: u32,
    seconds: u32,
    frames:  u32,
    fps:     u32,
}

impl Timecode {
    #[inline]
    pub fn new(hours: u32, minutes: u32, seconds: u32, frames: u32, fps: u32) -> Result<Self, TimecodeError> {
        if fps == 0 {
            return Err(TimecodeError::ZeroFrameRate);
        }
        if hours > 23 {
            return Err(TimecodeError::HoursOutOfRange(hours));
        }
        if minutes > 59 {
            return Err(TimecodeError::MinutesOutOfRange(minutes));
        }
        if seconds > 59 {
            return Err(TimecodeError::SecondsOutOfRange(seconds));
        }
        if frames >= fps {
            return Err(TimecodeError::FramesOutOfRange {
                frames,
                fps,
            });
        }

        Ok(Timecode {
            hours,
            minutes,
            seconds,
            frames,
            fps,
        })
    }

    /// 00:00:00:00 at the given frame rate.
    #[inline]
    pub fn zero(fps: u32) -> Result<Self, TimecodeError> {
        Timecode::new(0, 0, 0, 0, fps)
    }

    /// Builds a timecode from a millisecond count, wrapping at 24 hours.
    /// The sub-frame remainder is truncated.
    #[inline]
    pub fn from_millis(millis: u64, fps: u32) -> Result<Self, TimecodeError> {
        if fps == 0 {
            return Err(TimecodeError::ZeroFrameRate);
        }
        let millis = millis % MS_PER_DAY;
        let hours = (millis / MS_PER_HOUR) as u32;
        let minutes = ((millis % MS_PER_HOUR) / MS_PER_MINUTE) as u32;
        let seconds = ((millis % MS_PER_MINUTE) / MS_PER_SECOND) as u32;
        let frames = ((millis % MS_PER_SECOND) * u64::from(fps) / MS_PER_SECOND) as u32;

        Timecode::new(hours, minutes, seconds, frames, fps)
    }

    /// Total elapsed milliseconds since 00:00:00:00, truncated to whole
    /// milliseconds on the frame component.
    #[inline]
    pub fn to_millis(self) -> u64 {
        u64::from(self.hours) * MS_PER_HOUR
            + u64::from(self.minutes) * MS_PER_MINUTE
            + u64::from(self.seconds) * MS_PER_SECOND
            + u64::from(self.frames) * MS_PER_SECOND / u64::from(self.fps)
    }

    /// Total elapsed nanoseconds since 00:00:00:00, the unit libmtcmaster's
    /// setTime expects.
    #[inline]
    pub fn to_nanos(self) -> u64 {
        let whole_seconds = u64::from(self.hours) * 3600
            + u64::from(self.minutes) * 60
            + u64::from(self.seconds);
        whole_seconds * NANOS_PER_SECOND
            + u64::from(self.frames) * NANOS_PER_SECOND / u64::from(self.fps)
    }

    #[inline]
    pub fn hours(self) -> u32 {
        self.hours
    }

    #[inline]
    pub fn minutes(self) -> u32 {
        self.minutes
    }

    #[inline]
    pub fn seconds(self) -> u32 {
        self.seconds
    }

    #[inline]
    pub fn frames(self) -> u32 {
        self.frames
    }

    #[inline]
    pub fn fps(self) -> u32 {
        self.fps
    }
}

impl Display for Timecode {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds, self.frames
        )
    }
}

#[derive(Debug, Clone, Copy, Error)]
pub enum TimecodeError {
    #[error("Frame rate must be non-zero")]
    ZeroFrameRate,
    #[error("Hours out of range: {0} (max 23)")]
    HoursOutOfRange(u32),
    #[error("Minutes out of range: {0} (max 59)")]
    MinutesOutOfRange(u32),
    #[error("Seconds out of range: {0} (max 59)")]
    SecondsOutOfRange(u32),
    #[error("Frames out of range: {frames} (frame rate {fps})")]
    FramesOutOfRange { frames: u32, fps: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip() {
        let tc = Timecode::new(1, 2, 3, 12, 25).unwrap();
        assert_eq!(tc.to_millis(), 3_600_000 + 120_000 + 3_000 + 480);
        let back = Timecode::from_millis(tc.to_millis(), 25).unwrap();
        assert_eq!(back, tc);
    }

    #[test]
    fn nanos_match_sender_arithmetic() {
        // 00:00:01:05 at 25 fps = 1.2 s
        let tc = Timecode::new(0, 0, 1, 5, 25).unwrap();
        assert_eq!(tc.to_nanos(), 1_200_000_000);

        let tc = Timecode::new(2, 30, 0, 0, 25).unwrap();
        assert_eq!(tc.to_nanos(), 9_000_000_000_000);
    }

    #[test]
    fn frames_must_stay_below_fps() {
        assert!(Timecode::new(0, 0, 0, 24, 25).is_ok());
        assert!(matches!(
            Timecode::new(0, 0, 0, 25, 25),
            Err(TimecodeError::FramesOutOfRange { .. })
        ));
        assert!(matches!(
            Timecode::new(24, 0, 0, 0, 25),
            Err(TimecodeError::HoursOutOfRange(24))
        ));
    }

    #[test]
    fn sub_frame_millis_truncate() {
        // 39 ms is inside frame 0 at 25 fps (one frame = 40 ms).
        let tc = Timecode::from_millis(39, 25).unwrap();
        assert_eq!(tc.frames(), 0);
        let tc = Timecode::from_millis(40, 25).unwrap();
        assert_eq!(tc.frames(), 1);
    }

    #[test]
    fn from_millis_wraps_at_midnight() {
        let tc = Timecode::from_millis(24 * 3_600_000 + 1_000, 25).unwrap();
        assert_eq!(tc.to_millis(), 1_000);
    }

    #[test]
    fn display_formats_as_hh_mm_ss_ff() {
        let tc = Timecode::new(9, 5, 7, 3, 25).unwrap();
        assert_eq!(tc.to_string(), "09:05:07:03");
    }
}
