//! MIDI-side listener keeping a continuously updated copy of the running
//! timecode. A midir callback thread parses quarter-frame and full-frame
//! MTC messages into a pair of atomics; scenario code only ever reads.
//!
//! There is no synchronization barrier between starting the listener and
//! the first complete quarter-frame cycle, so callers must allow a short
//! warm-up wait before trusting the first read.

use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc, Mutex,
};

use midir::MidiInputConnection;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    mtc::TimecodeSource,
    timecode::{Timecode, DEFAULT_FPS},
};

const QUARTER_FRAME_STATUS: u8 = 0xF1;
const SYSEX_FULL_FRAME: [u8; 5] = [0xF0, 0x7F, 0x7F, 0x01, 0x01];

struct SharedTime {
    millis: AtomicU64,
    fps:    AtomicU32,
}

/// RAII wrapper around the midir connection. Drop closes the port and
/// stops the background parsing.
pub struct MtcListener {
    _connection: Mutex<MidiInputConnection<()>>,
    state:       Arc<SharedTime>,
    port_name:   String,
}

impl MtcListener {
    /// Connects to a MIDI input port and starts following the timecode.
    /// Picks the first port whose name contains `port_hint`, or the first
    /// available port when no hint is given.
    #[inline]
    pub fn start(port_hint: Option<&str>) -> Result<Self, MtcListenerError> {
        let midi_in = midir::MidiInput::new("mtcheck")?;
        let ports = midi_in.ports();
        if ports.is_empty() {
            return Err(MtcListenerError::NoPorts);
        }

        let port = match port_hint {
            Some(hint) => ports
                .iter()
                .find(|p| {
                    midi_in
                        .port_name(p)
                        .map(|name| name.contains(hint))
                        .unwrap_or(false)
                })
                .ok_or_else(|| MtcListenerError::PortNotFound(hint.to_owned()))?,
            None => &ports[0],
        };
        let port_name = midi_in.port_name(port).unwrap_or_else(|_| "<unknown>".to_owned());

        let state = Arc::new(SharedTime {
            millis: AtomicU64::new(0),
            fps:    AtomicU32::new(DEFAULT_FPS),
        });
        let callback_state = Arc::clone(&state);
        let mut assembler = QuarterFrameAssembler::default();

        // midir manages its own callback thread internally
        let connection = midi_in
            .connect(
                port,
                "mtcheck-mtc",
                move |_timestamp, data, _| {
                    if let Some(tc) = assembler.feed(data).or_else(|| parse_full_frame(data)) {
                        // A quarter-frame cycle spans two frames, so the
                        // assembled value lags real time by that much.
                        let lag_ms = if data.first() == Some(&QUARTER_FRAME_STATUS) {
                            2_000 / u64::from(tc.fps())
                        } else {
                            0
                        };
                        callback_state.millis.store(tc.to_millis() + lag_ms, Ordering::Relaxed);
                        callback_state.fps.store(tc.fps(), Ordering::Relaxed);
                    }
                },
                (),
            )
            .map_err(|e| MtcListenerError::Connect(e.to_string()))?;

        info!("MTC listener connected to MIDI port \"{}\"", port_name);

        Ok(MtcListener {
            _connection: Mutex::new(connection),
            state,
            port_name,
        })
    }

    /// Names of all available MIDI input ports.
    #[inline]
    pub fn list_ports() -> Vec<String> {
        let Ok(midi_in) = midir::MidiInput::new("mtcheck-enumerate") else {
            return Vec::new();
        };
        midi_in
            .ports()
            .iter()
            .filter_map(|p| midi_in.port_name(p).ok())
            .collect()
    }

    #[inline]
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl TimecodeSource for MtcListener {
    #[inline]
    fn milliseconds(&self) -> u64 {
        self.state.millis.load(Ordering::Relaxed)
    }

    #[inline]
    fn timecode(&self) -> Timecode {
        let fps = self.state.fps.load(Ordering::Relaxed).max(1);
        Timecode::from_millis(self.milliseconds(), fps)
            .expect("non-zero frame rate cannot fail conversion")
    }
}

/// Accumulates the eight quarter-frame pieces of one MTC cycle and yields
/// a timecode when the final piece completes a full set.
#[derive(Debug, Default)]
struct QuarterFrameAssembler {
    pieces: [u8; 8],
    seen:   u8,
}

impl QuarterFrameAssembler {
    fn feed(&mut self, data: &[u8]) -> Option<Timecode> {
        if data.len() < 2 || data[0] != QUARTER_FRAME_STATUS {
            return None;
        }
        let piece = (data[1] >> 4) as usize & 0x7;
        self.pieces[piece] = data[1] & 0x0F;
        self.seen |= 1 << piece;

        if piece != 7 || self.seen != 0xFF {
            return None;
        }
        self.seen = 0;

        let frames = u32::from(self.pieces[0]) | (u32::from(self.pieces[1] & 0x1) << 4);
        let seconds = u32::from(self.pieces[2]) | (u32::from(self.pieces[3] & 0x3) << 4);
        let minutes = u32::from(self.pieces[4]) | (u32::from(self.pieces[5] & 0x3) << 4);
        let hours = u32::from(self.pieces[6]) | (u32::from(self.pieces[7] & 0x1) << 4);
        let fps = rate_to_fps((self.pieces[7] >> 1) & 0x3);

        match Timecode::new(hours, minutes, seconds, frames, fps) {
            Ok(tc) => Some(tc),
            Err(e) => {
                debug!("Discarding malformed quarter-frame cycle: {}", e);
                None
            },
        }
    }
}

/// MTC full-frame SysEx: F0 7F 7F 01 01 hr mn sc fr F7, with the frame
/// rate packed into bits 5-6 of the hours byte.
fn parse_full_frame(data: &[u8]) -> Option<Timecode> {
    if data.len() < 10 || data[..5] != SYSEX_FULL_FRAME {
        return None;
    }
    let hours = u32::from(data[5] & 0x1F);
    let fps = rate_to_fps((data[5] >> 5) & 0x3);
    let minutes = u32::from(data[6]);
    let seconds = u32::from(data[7]);
    let frames = u32::from(data[8]);

    Timecode::new(hours, minutes, seconds, frames, fps).ok()
}

/// MTC rate code to nominal fps. Drop-frame 29.97 is folded onto 30; the
/// resulting sub-frame error is far below the listener jitter the harness
/// tolerates.
fn rate_to_fps(rate: u8) -> u32 {
    match rate {
        0 => 24,
        1 => 25,
        _ => 30,
    }
}

#[derive(Debug, Error)]
pub enum MtcListenerError {
    #[error("Failed to open MIDI input: {0}")]
    Init(#[from] midir::InitError),
    #[error("No MIDI input ports available")]
    NoPorts,
    #[error("No MIDI input port matching \"{0}\"")]
    PortNotFound(String),
    #[error("Failed to connect MIDI port: {0}")]
    Connect(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quarter_frames(tc: Timecode, rate_code: u8) -> Vec<[u8; 2]> {
        let f = tc.frames() as u8;
        let s = tc.seconds() as u8;
        let m = tc.minutes() as u8;
        let h = tc.hours() as u8;
        [
            f & 0x0F,
            (f >> 4) & 0x1,
            s & 0x0F,
            (s >> 4) & 0x3,
            m & 0x0F,
            (m >> 4) & 0x3,
            h & 0x0F,
            ((h >> 4) & 0x1) | (rate_code << 1),
        ]
        .into_iter()
        .enumerate()
        .map(|(piece, value)| [QUARTER_FRAME_STATUS, ((piece as u8) << 4) | value])
        .collect()
    }

    #[test]
    fn assembles_one_complete_cycle() {
        let tc = Timecode::new(1, 2, 3, 20, 25).unwrap();
        let mut assembler = QuarterFrameAssembler::default();

        let mut result = None;
        for msg in quarter_frames(tc, 1) {
            result = assembler.feed(&msg);
        }
        assert_eq!(result, Some(tc));
    }

    #[test]
    fn partial_cycle_yields_nothing() {
        let tc = Timecode::new(0, 0, 5, 0, 25).unwrap();
        let mut assembler = QuarterFrameAssembler::default();

        // Drop piece 3: the cycle never completes even when piece 7 lands.
        for (i, msg) in quarter_frames(tc, 1).iter().enumerate() {
            if i == 3 {
                continue;
            }
            assert_eq!(assembler.feed(msg), None);
        }
    }

    #[test]
    fn rate_bits_select_frame_rate() {
        let tc24 = Timecode::new(0, 0, 1, 10, 24).unwrap();
        let mut assembler = QuarterFrameAssembler::default();
        let mut result = None;
        for msg in quarter_frames(tc24, 0) {
            result = assembler.feed(&msg);
        }
        assert_eq!(result.unwrap().fps(), 24);
    }

    #[test]
    fn full_frame_sysex_parses() {
        // 01:02:03:04 at 25 fps (rate code 1 in hours bits 5-6).
        let msg = [0xF0, 0x7F, 0x7F, 0x01, 0x01, 0x21, 0x02, 0x03, 0x04, 0xF7];
        let tc = parse_full_frame(&msg).unwrap();
        assert_eq!(tc, Timecode::new(1, 2, 3, 4, 25).unwrap());
    }

    #[test]
    fn unrelated_messages_are_ignored() {
        let mut assembler = QuarterFrameAssembler::default();
        assert_eq!(assembler.feed(&[0x90, 0x40, 0x7F]), None);
        assert_eq!(parse_full_frame(&[0xF0, 0x7F, 0x00]), None);
    }
}
