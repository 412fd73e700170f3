// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Frame codec supporting the two on-wire layout families.
//!
//! Delimited framing (variable size, flag-delimited):
//! `[0x7E][seq][kind][len u16 LE][payload][crc u32 LE][0x7E]`
//!
//! Fixed framing (every frame occupies FIXED_FRAME_SIZE bytes):
//! `[crc u32 LE][seq][kind][len u16 LE][payload slot, zero-padded]`
//!
//! Both families checksum the same bytes: seq, kind, the little-endian
//! length field and the payload bytes actually used. Padding is never
//! checksummed.

use std::io;
use std::time::Duration;
use crate::crc::crc32;
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Frame Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Ack,
    Nak,
    Eot,
}

impl FrameKind {
    fn to_byte(self) -> u8 {
        match self {
            FrameKind::Data => FRAME_DATA,
            FrameKind::Ack => FRAME_ACK,
            FrameKind::Nak => FRAME_NAK,
            FrameKind::Eot => FRAME_EOT,
        }
    }

    fn from_byte(byte: u8) -> Option<FrameKind> {
        match byte {
            FRAME_DATA => Some(FrameKind::Data),
            FRAME_ACK => Some(FrameKind::Ack),
            FRAME_NAK => Some(FrameKind::Nak),
            FRAME_EOT => Some(FrameKind::Eot),
            _ => None,
        }
    }
}

/// On-wire layout family, selected once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Delimited,
    Fixed,
}

/// One atomic unit exchanged over the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn data(seq: u8, payload: Vec<u8>) -> Frame {
        Frame { kind: FrameKind::Data, seq, payload }
    }

    pub fn ack(seq: u8) -> Frame {
        Frame { kind: FrameKind::Ack, seq, payload: Vec::new() }
    }

    pub fn nak(seq: u8) -> Frame {
        Frame { kind: FrameKind::Nak, seq, payload: Vec::new() }
    }

    pub fn eot() -> Frame {
        Frame { kind: FrameKind::Eot, seq: 0, payload: Vec::new() }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Structurally invalid bytes: bad flags, impossible length, short buffer
    Malformed,
    /// Structurally valid but the recomputed CRC disagrees
    ChecksumMismatch,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Malformed => write!(f, "malformed frame"),
            FrameError::ChecksumMismatch => write!(f, "checksum mismatch"),
        }
    }
}

impl std::error::Error for FrameError {}

// ============================================================================
// Encode / Decode
// ============================================================================

/// Bytes covered by the checksum: seq, kind, length field, used payload
fn checksum_input(seq: u8, kind: FrameKind, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u16;
    let mut input = Vec::with_capacity(4 + payload.len());
    input.push(seq);
    input.push(kind.to_byte());
    input.extend_from_slice(&len.to_le_bytes());
    input.extend_from_slice(payload);
    input
}

pub fn encode(frame: &Frame, framing: Framing) -> Vec<u8> {
    assert!(frame.payload.len() <= MAX_PAYLOAD);
    assert!(frame.seq <= 1);

    let len = frame.payload.len() as u16;
    let crc = crc32(&checksum_input(frame.seq, frame.kind, &frame.payload));

    match framing {
        Framing::Delimited => {
            let mut buf = Vec::with_capacity(DELIMITED_OVERHEAD + frame.payload.len());
            buf.push(FRAME_FLAG);
            buf.push(frame.seq);
            buf.push(frame.kind.to_byte());
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(&frame.payload);
            buf.extend_from_slice(&crc.to_le_bytes());
            buf.push(FRAME_FLAG);
            buf
        }
        Framing::Fixed => {
            let mut buf = Vec::with_capacity(FIXED_FRAME_SIZE);
            buf.extend_from_slice(&crc.to_le_bytes());
            buf.push(frame.seq);
            buf.push(frame.kind.to_byte());
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(&frame.payload);
            buf.resize(FIXED_FRAME_SIZE, 0);
            buf
        }
    }
}

pub fn decode(buf: &[u8], framing: Framing) -> Result<Frame, FrameError> {
    match framing {
        Framing::Delimited => decode_delimited(buf),
        Framing::Fixed => decode_fixed(buf),
    }
}

fn decode_delimited(buf: &[u8]) -> Result<Frame, FrameError> {
    if buf.len() < DELIMITED_OVERHEAD {
        return Err(FrameError::Malformed);
    }
    if buf[0] != FRAME_FLAG || buf[buf.len() - 1] != FRAME_FLAG {
        return Err(FrameError::Malformed);
    }

    let len = u16::from_le_bytes([buf[3], buf[4]]) as usize;
    if len > MAX_PAYLOAD || buf.len() != DELIMITED_OVERHEAD + len {
        return Err(FrameError::Malformed);
    }

    let stored = u32::from_le_bytes([
        buf[5 + len],
        buf[6 + len],
        buf[7 + len],
        buf[8 + len],
    ]);
    if crc32(&buf[1..5 + len]) != stored {
        return Err(FrameError::ChecksumMismatch);
    }

    finish_decode(buf[1], buf[2], &buf[5..5 + len])
}

fn decode_fixed(buf: &[u8]) -> Result<Frame, FrameError> {
    if buf.len() != FIXED_FRAME_SIZE {
        return Err(FrameError::Malformed);
    }

    let len = u16::from_le_bytes([buf[6], buf[7]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(FrameError::Malformed);
    }

    let stored = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if crc32(&buf[4..FIXED_HEADER + len]) != stored {
        return Err(FrameError::ChecksumMismatch);
    }

    finish_decode(buf[4], buf[5], &buf[FIXED_HEADER..FIXED_HEADER + len])
}

/// Field validation that runs after the checksum, so a corrupted seq or
/// kind byte surfaces as ChecksumMismatch rather than Malformed.
fn finish_decode(seq: u8, kind_byte: u8, payload: &[u8]) -> Result<Frame, FrameError> {
    if seq > 1 {
        return Err(FrameError::Malformed);
    }
    let kind = FrameKind::from_byte(kind_byte).ok_or(FrameError::Malformed)?;

    // DATA carries 1..=MAX_PAYLOAD bytes, control frames carry none
    match kind {
        FrameKind::Data if payload.is_empty() => return Err(FrameError::Malformed),
        FrameKind::Ack | FrameKind::Nak | FrameKind::Eot if !payload.is_empty() => {
            return Err(FrameError::Malformed);
        }
        _ => {}
    }

    Ok(Frame { kind, seq, payload: payload.to_vec() })
}

// ============================================================================
// Incremental Frame Reader
// ============================================================================

/// Result of waiting for one frame on the transport
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Frame(Frame),
    Invalid(FrameError),
    TimedOut,
}

/// Waits for one frame. Returns TimedOut when the transport yields nothing
/// within the interval, Invalid when bytes arrived but do not decode, and
/// propagates any non-timeout transport error.
pub fn read_frame(
    serial: &mut dyn SerialPort,
    framing: Framing,
    timeout: Duration,
) -> io::Result<ReadOutcome> {
    match framing {
        Framing::Delimited => read_delimited(serial, timeout),
        Framing::Fixed => read_fixed(serial, timeout),
    }
}

fn read_byte(serial: &mut dyn SerialPort, timeout: Duration) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match serial.read_timeout(&mut byte, timeout) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(byte[0])),
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_delimited(serial: &mut dyn SerialPort, timeout: Duration) -> io::Result<ReadOutcome> {
    let mut buf: Vec<u8> = Vec::with_capacity(DELIMITED_OVERHEAD);

    loop {
        let byte = match read_byte(serial, timeout)? {
            Some(b) => b,
            None => return Ok(ReadOutcome::TimedOut),
        };

        // Resync: skip line noise until a start flag appears
        if buf.is_empty() && byte != FRAME_FLAG {
            continue;
        }
        buf.push(byte);

        if buf.len() == 5 {
            let len = u16::from_le_bytes([buf[3], buf[4]]) as usize;
            if len > MAX_PAYLOAD {
                return Ok(ReadOutcome::Invalid(FrameError::Malformed));
            }
        }

        if buf.len() >= DELIMITED_OVERHEAD {
            let len = u16::from_le_bytes([buf[3], buf[4]]) as usize;
            if buf.len() == DELIMITED_OVERHEAD + len {
                return Ok(match decode_delimited(&buf) {
                    Ok(frame) => ReadOutcome::Frame(frame),
                    Err(e) => ReadOutcome::Invalid(e),
                });
            }
        }
    }
}

fn read_fixed(serial: &mut dyn SerialPort, timeout: Duration) -> io::Result<ReadOutcome> {
    let mut buf = [0u8; FIXED_FRAME_SIZE];
    let mut filled = 0;

    while filled < FIXED_FRAME_SIZE {
        match serial.read_timeout(&mut buf[filled..], timeout) {
            Ok(0) => return Ok(ReadOutcome::TimedOut),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Ok(ReadOutcome::TimedOut);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(match decode_fixed(&buf) {
        Ok(frame) => ReadOutcome::Frame(frame),
        Err(e) => ReadOutcome::Invalid(e),
    })
}

// ============================================================================
// Tests
// ============================================================================
