//! Minimal OSC datagram encoder and UDP command link for the player's
//! command listener. Only the subset the player consumes is implemented;
//! the byte layout must match the receiving side exactly.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use thiserror::Error;
use tracing::{debug, warn};

/// One OSC argument. The wire type tag is decided by the variant, so a
/// value with no corresponding tag cannot be constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
}

impl OscArg {
    fn type_tag(&self) -> char {
        match self {
            OscArg::Float(_) => 'f',
            OscArg::Int(_) => 'i',
            OscArg::Str(_) => 's',
        }
    }
}

/// Appends `bytes` plus a null terminator, zero-padded so the block length
/// is a multiple of 4. A block whose payload is already 4-aligned gains a
/// full 4 nulls, matching the receiver's framing.
fn push_padded(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes);
    let nulls = 4 - bytes.len() % 4;
    out.extend(std::iter::repeat(0u8).take(nulls));
}

/// Encodes one OSC message: padded address block, padded type-tag block
/// (`,` plus one tag per argument), then the arguments in order as 4-byte
/// big-endian values (strings padded like the address).
#[inline]
pub fn encode(address: &str, args: &[OscArg]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(16 + args.len() * 4);
    push_padded(&mut msg, address.as_bytes());

    let mut type_tags = String::with_capacity(1 + args.len());
    type_tags.push(',');
    for arg in args {
        type_tags.push(arg.type_tag());
    }
    push_padded(&mut msg, type_tags.as_bytes());

    for arg in args {
        match arg {
            OscArg::Float(value) => msg.extend_from_slice(&value.to_be_bytes()),
            OscArg::Int(value) => msg.extend_from_slice(&value.to_be_bytes()),
            OscArg::Str(value) => push_padded(&mut msg, value.as_bytes()),
        }
    }

    msg
}

/// Connectionless UDP link to one player's command port on loopback.
/// Sends report boolean success; a lost or refused datagram is the
/// scenario's problem to interpret, not a hard fault here.
#[derive(Debug)]
pub struct OscClient {
    socket: UdpSocket,
    dest:   SocketAddr,
}

impl OscClient {
    #[inline]
    pub fn new(command_port: u16) -> Result<Self, OscClientError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .map_err(OscClientError::Bind)?;

        Ok(OscClient {
            socket,
            dest: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, command_port)),
        })
    }

    #[inline]
    pub fn send(&self, address: &str, args: &[OscArg]) -> bool {
        let msg = encode(address, args);
        match self.socket.send_to(&msg, self.dest) {
            Ok(_) => {
                debug!("Sent {} ({} bytes) to {}", address, msg.len(), self.dest);
                true
            },
            Err(e) => {
                warn!("Failed to send {} to {}: {}", address, self.dest, e);
                false
            },
        }
    }

    /// `/offset` with one float argument: absolute millisecond offset to
    /// apply immediately.
    #[inline]
    pub fn send_offset(&self, offset_ms: f32) -> bool {
        self.send("/offset", &[OscArg::Float(offset_ms)])
    }

    /// `/mtcfollow` with no arguments: enable timecode-following mode.
    #[inline]
    pub fn send_follow(&self) -> bool {
        self.send("/mtcfollow", &[])
    }
}

#[derive(Debug, Error)]
pub enum OscClientError {
    #[error("Failed to bind command socket: {0}")]
    Bind(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_message_is_bit_exact() {
        let msg = encode("/offset", &[OscArg::Float(-1234.0)]);

        let mut expected = Vec::new();
        expected.extend_from_slice(b"/offset\0");
        expected.extend_from_slice(b",f\0\0");
        expected.extend_from_slice(&(-1234.0f32).to_be_bytes());
        assert_eq!(msg, expected);
    }

    #[test]
    fn follow_message_has_empty_tag_block() {
        let msg = encode("/mtcfollow", &[]);
        // "/mtcfollow" is 10 bytes -> padded to 12, "," -> padded to 4.
        assert_eq!(&msg[..12], b"/mtcfollow\0\0");
        assert_eq!(&msg[12..], b",\0\0\0");
    }

    #[test]
    fn aligned_payload_still_gains_nulls() {
        // A 4-aligned address must still get a terminator block of 4 nulls.
        let msg = encode("/abc", &[]);
        assert_eq!(&msg[..8], b"/abc\0\0\0\0");
    }

    #[test]
    fn every_block_is_4_aligned() {
        let cases: Vec<(&str, Vec<OscArg>)> = vec![
            ("/a", vec![]),
            ("/offset", vec![OscArg::Float(0.5)]),
            ("/x", vec![OscArg::Int(-7), OscArg::Str("hello".to_owned())]),
            ("/long/address/here", vec![OscArg::Str(String::new())]),
        ];
        for (address, args) in cases {
            let msg = encode(address, &args);
            assert_eq!(msg.len() % 4, 0, "unaligned message for {}", address);
        }
    }

    #[test]
    fn int_and_string_arguments_encode_in_order() {
        let msg = encode("/x", &[OscArg::Int(258), OscArg::Str("ok".to_owned())]);
        let mut expected = Vec::new();
        expected.extend_from_slice(b"/x\0\0");
        expected.extend_from_slice(b",is\0");
        expected.extend_from_slice(&258i32.to_be_bytes());
        expected.extend_from_slice(b"ok\0\0");
        assert_eq!(msg, expected);
    }

    #[test]
    fn client_delivers_datagram_to_loopback() {
        let receiver = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let client = OscClient::new(port).unwrap();
        assert!(client.send_offset(-40.0));

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], encode("/offset", &[OscArg::Float(-40.0)]));
    }
}
