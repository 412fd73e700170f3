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

use std::marker::PhantomData;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::frame::{self, Frame, FrameKind, Framing, FrameError, ReadOutcome};
use crate::handshake::{read_line, HandshakeMessage};
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum ReceiverError {
    Io(std::io::Error),
    Handshake(String),
    /// A DATA frame declared more payload than this receiver was configured
    /// to accept. Local misconfiguration, not a channel fault.
    BufferTooSmall { declared: usize, capacity: usize },
    /// Session terminator: the sender signaled end of transmission
    TransferComplete { written: u64 },
}

impl std::fmt::Display for ReceiverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiverError::Io(e) => write!(f, "I/O error: {}", e),
            ReceiverError::Handshake(msg) => write!(f, "handshake failed: {}", msg),
            ReceiverError::BufferTooSmall { declared, capacity } => {
                write!(f, "payload of {} bytes exceeds the {}-byte block capacity", declared, capacity)
            }
            ReceiverError::TransferComplete { written } => {
                write!(f, "transfer complete, {} bytes written", written)
            }
        }
    }
}

impl std::error::Error for ReceiverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReceiverError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReceiverError {
    fn from(err: std::io::Error) -> Self {
        ReceiverError::Io(err)
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub framing: Framing,
    /// Largest DATA payload this receiver will deliver
    pub block_capacity: usize,
    pub timeout: Duration,
    /// Send a NAK on checksum mismatch to short-circuit the sender's
    /// timeout. An optimization only; recovery never depends on it.
    pub send_nak: bool,
    pub debug: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            framing: Framing::Delimited,
            block_capacity: MAX_PAYLOAD,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            send_nak: false,
            debug: false,
        }
    }
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitStatus;
pub struct AwaitStart;
pub struct AwaitFrame;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    config: ReceiverConfig,
    output_dir: PathBuf,
    file: Option<File>,
    resume_offset: u64,
    expected_seq: u8,
    bytes_written: u64,
    crc_errors: u64,
    malformed: u64,
    idle_timeouts: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            serial: self.serial,
            config: self.config,
            output_dir: self.output_dir,
            file: self.file,
            resume_offset: self.resume_offset,
            expected_seq: self.expected_seq,
            bytes_written: self.bytes_written,
            crc_errors: self.crc_errors,
            malformed: self.malformed,
            idle_timeouts: self.idle_timeouts,
        })
    }

    fn io_error(&self, e: std::io::Error) -> ReceiverError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        ReceiverError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<AwaitStatus> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let line = read_line(fsm.serial.as_mut(), STATUS_WAIT)
            .map_err(|e| fsm.io_error(e))?
            .ok_or_else(|| ReceiverError::Handshake("no STATUS request received".to_string()))?;

        let name = match HandshakeMessage::parse(&line) {
            Some(HandshakeMessage::StatusQuery { name }) => name,
            _ => {
                if fsm.config.debug {
                    println!("Ignoring unexpected line before STATUS: {:?}",
                             String::from_utf8_lossy(&line).trim_end());
                }
                return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
            }
        };
        if fsm.config.debug { println!("Received: STATUS:{}", name); }

        // Never let an announced name escape the output directory
        let base = Path::new(&name)
            .file_name()
            .and_then(|base| base.to_str())
            .ok_or_else(|| ReceiverError::Handshake(format!("unusable file name: {:?}", name)))?;
        let path = fsm.output_dir.join(base);

        let existing = std::fs::metadata(&path)
            .ok()
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .filter(|&len| len > 0);

        let reply = match existing {
            Some(len) => {
                fsm.resume_offset = len;
                fsm.file = Some(OpenOptions::new().append(true).open(&path)?);
                println!("Partial file found, requesting resume from byte {}", len);
                HandshakeMessage::AckPosition { offset: len }
            }
            None => {
                fsm.file = Some(File::create(&path)?);
                if fsm.config.debug { println!("Created file: {:?}", path); }
                HandshakeMessage::StartFresh
            }
        };

        fsm.serial.write_all(&reply.encode()).map_err(|e| fsm.io_error(e))?;
        if fsm.config.debug { println!("Sent: {:?}", reply); }

        let next = fsm.transition::<AwaitStart>();
        Ok(next as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<AwaitStart> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let line = read_line(fsm.serial.as_mut(), HANDSHAKE_TIMEOUT)
            .map_err(|e| fsm.io_error(e))?
            .ok_or_else(|| ReceiverError::Handshake("no START marker received".to_string()))?;

        match HandshakeMessage::parse(&line) {
            Some(HandshakeMessage::StartMarker { name }) => {
                if fsm.config.debug { println!("Received: START:{}", name); }
                fsm.bytes_written = fsm.resume_offset;

                let next = fsm.transition::<AwaitFrame>();
                Ok(next as Box<dyn ReceiverState>)
            }
            _ => Err(ReceiverError::Handshake(format!(
                "expected START marker, got {:?}",
                String::from_utf8_lossy(&line).trim_end()
            ))),
        }
    }
}

impl ReceiverState for ReceiverFsm<AwaitFrame> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let outcome = frame::read_frame(fsm.serial.as_mut(), fsm.config.framing, fsm.config.timeout)
            .map_err(|e| fsm.io_error(e))?;

        match outcome {
            ReadOutcome::TimedOut => {
                fsm.idle_timeouts += 1;
                if fsm.idle_timeouts >= MAX_IDLE_TIMEOUTS {
                    return Err(ReceiverError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("link idle for {} intervals", fsm.idle_timeouts),
                    )));
                }
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
            ReadOutcome::Invalid(FrameError::ChecksumMismatch) => {
                fsm.crc_errors += 1;
                fsm.idle_timeouts = 0;
                if fsm.config.debug { println!("Checksum mismatch, discarding ({} so far)", fsm.crc_errors); }

                // No ACK: the sender's timeout drives recovery. The NAK is
                // only a hint that shortens the wait.
                if fsm.config.send_nak {
                    let nak = frame::encode(&Frame::nak(fsm.expected_seq), fsm.config.framing);
                    fsm.serial.write_all(&nak).map_err(|e| fsm.io_error(e))?;
                    if fsm.config.debug { println!("Sent: NAK #{}", fsm.expected_seq); }
                }
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
            ReadOutcome::Invalid(FrameError::Malformed) => {
                fsm.malformed += 1;
                fsm.idle_timeouts = 0;
                if fsm.config.debug { println!("Malformed frame, discarding ({} so far)", fsm.malformed); }
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
            ReadOutcome::Frame(received) => {
                fsm.idle_timeouts = 0;
                fsm.handle_frame(received)
            }
        }
    }
}

impl ReceiverFsm<AwaitFrame> {
    fn handle_frame(mut self, received: Frame) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        match received.kind {
            FrameKind::Eot => {
                println!(
                    "Reception finished: {} bytes written, {} checksum errors, {} malformed frames",
                    self.bytes_written, self.crc_errors, self.malformed
                );
                Err(ReceiverError::TransferComplete { written: self.bytes_written })
            }
            FrameKind::Data => {
                if received.payload.len() > self.config.block_capacity {
                    return Err(ReceiverError::BufferTooSmall {
                        declared: received.payload.len(),
                        capacity: self.config.block_capacity,
                    });
                }

                if received.seq != self.expected_seq {
                    // Duplicate of the previous block: its ACK was lost.
                    // Re-acknowledge, deliver nothing.
                    if self.config.debug {
                        println!("Duplicate DATA #{}, re-sending ACK", received.seq);
                    }
                    let ack = frame::encode(&Frame::ack(received.seq), self.config.framing);
                    self.serial.write_all(&ack).map_err(|e| self.io_error(e))?;
                    return Ok(Box::new(self) as Box<dyn ReceiverState>);
                }

                if let Some(ref mut file) = self.file {
                    file.write_all(&received.payload)?;
                }
                self.bytes_written += received.payload.len() as u64;
                if self.config.debug {
                    println!("Received: DATA #{} ({} bytes, {} total)",
                             received.seq, received.payload.len(), self.bytes_written);
                }

                let ack = frame::encode(&Frame::ack(self.expected_seq), self.config.framing);
                self.serial.write_all(&ack).map_err(|e| self.io_error(e))?;
                self.expected_seq = 1 - self.expected_seq;

                Ok(Box::new(self) as Box<dyn ReceiverState>)
            }
            FrameKind::Ack | FrameKind::Nak => {
                // Stray response frames are noise while expecting DATA
                if self.config.debug { println!("Ignoring stray {:?} frame", received.kind); }
                Ok(Box::new(self) as Box<dyn ReceiverState>)
            }
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl ReceiverFsm<AwaitStatus> {
    pub fn new(serial: Box<dyn SerialPort>, output_dir: PathBuf, config: ReceiverConfig) -> Box<dyn ReceiverState> {
        assert!(config.block_capacity >= 1 && config.block_capacity <= MAX_PAYLOAD);

        Box::new(ReceiverFsm {
            state: PhantomData::<AwaitStatus>,
            serial,
            config,
            output_dir,
            file: None,
            resume_offset: 0,
            expected_seq: 0,
            bytes_written: 0,
            crc_errors: 0,
            malformed: 0,
            idle_timeouts: 0,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
