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
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::frame::{self, Frame, FrameKind, Framing, ReadOutcome};
use crate::handshake::{read_line, HandshakeMessage};
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum SenderError {
    Io(std::io::Error),
    Handshake(String),
    /// The retransmission budget for one block was exhausted. `delivered`
    /// is the byte offset the receiver is known to hold.
    RetryBudgetExceeded { delivered: u64 },
    /// Session terminator: the whole file is at the receiver
    TransferComplete { delivered: u64 },
}

impl std::fmt::Display for SenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderError::Io(e) => write!(f, "I/O error: {}", e),
            SenderError::Handshake(msg) => write!(f, "handshake failed: {}", msg),
            SenderError::RetryBudgetExceeded { delivered } => {
                write!(f, "retry budget exhausted, {} bytes delivered", delivered)
            }
            SenderError::TransferComplete { delivered } => {
                write!(f, "transfer complete, {} bytes delivered", delivered)
            }
        }
    }
}

impl std::error::Error for SenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SenderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SenderError {
    fn from(err: std::io::Error) -> Self {
        SenderError::Io(err)
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub framing: Framing,
    pub block_size: usize,
    pub max_retries: u32,
    pub timeout: Duration,
    pub debug: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            framing: Framing::Delimited,
            block_size: DEFAULT_BLOCK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            debug: false,
        }
    }
}

// ============================================================================
// States
// ============================================================================

pub struct ResumeHandshake;
pub struct SendStart;
pub struct PrepareBlock;
pub struct SendBlock;
pub struct AwaitAck;
pub struct SendEot;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    config: SenderConfig,
    path: PathBuf,
    name: String,
    file: Option<File>,
    file_size: u64,
    bytes_sent: u64,
    seq: u8,
    retry_count: u32,
    block: Vec<u8>,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            serial: self.serial,
            config: self.config,
            path: self.path,
            name: self.name,
            file: self.file,
            file_size: self.file_size,
            bytes_sent: self.bytes_sent,
            seq: self.seq,
            retry_count: self.retry_count,
            block: self.block,
        })
    }

    fn io_error(&self, e: std::io::Error) -> SenderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<ResumeHandshake> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let file = File::open(&fsm.path)?;
        fsm.file_size = file.metadata()?.len();
        fsm.file = Some(file);
        fsm.name = base_name(&fsm.path);

        let query = HandshakeMessage::StatusQuery { name: fsm.name.clone() };
        fsm.serial.write_all(&query.encode()).map_err(|e| fsm.io_error(e))?;
        if fsm.config.debug { println!("Sent: STATUS:{}", fsm.name); }

        let reply = read_line(fsm.serial.as_mut(), HANDSHAKE_TIMEOUT)
            .map_err(|e| fsm.io_error(e))?
            .and_then(|line| HandshakeMessage::parse(&line));

        match reply {
            Some(HandshakeMessage::AckPosition { offset }) => {
                if offset >= fsm.file_size {
                    // Nothing left to send from a prior session
                    println!("Receiver already holds the complete file ({} bytes)", fsm.file_size);
                    fsm.bytes_sent = fsm.file_size;
                    return Err(SenderError::TransferComplete { delivered: fsm.bytes_sent });
                }
                if offset > 0 {
                    if let Some(ref mut file) = fsm.file {
                        file.seek(SeekFrom::Start(offset))?;
                    }
                    fsm.bytes_sent = offset;
                    println!("Resuming from byte {} of {}", offset, fsm.file_size);
                } else if fsm.config.debug {
                    println!("Received: ACK_POS:0, starting from scratch");
                }
            }
            Some(HandshakeMessage::StartFresh) => {
                if fsm.config.debug { println!("Received: START_NEW"); }
            }
            _ => {
                // Unparseable or absent reply: begin from offset zero
                if fsm.config.debug { println!("No usable STATUS reply, starting from scratch"); }
            }
        }

        let next = fsm.transition::<SendStart>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<SendStart> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let marker = HandshakeMessage::StartMarker { name: fsm.name.clone() };
        fsm.serial.write_all(&marker.encode()).map_err(|e| fsm.io_error(e))?;
        if fsm.config.debug { println!("Sent: START:{}", fsm.name); }

        let next = fsm.transition::<PrepareBlock>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<PrepareBlock> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        fsm.block.clear();
        fsm.block.resize(fsm.config.block_size, 0);
        let mut filled = 0;

        if let Some(ref mut file) = fsm.file {
            while filled < fsm.block.len() {
                let n = file.read(&mut fsm.block[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
        }
        fsm.block.truncate(filled);

        if filled == 0 {
            let next = fsm.transition::<SendEot>();
            Ok(next as Box<dyn SenderState>)
        } else {
            if fsm.config.debug { println!("Prepared block #{} ({} bytes)", fsm.seq, filled); }
            let next = fsm.transition::<SendBlock>();
            Ok(next as Box<dyn SenderState>)
        }
    }
}

impl SenderState for SenderFsm<SendBlock> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let data = Frame::data(fsm.seq, fsm.block.clone());
        let encoded = frame::encode(&data, fsm.config.framing);
        fsm.serial.write_all(&encoded).map_err(|e| fsm.io_error(e))?;
        if fsm.config.debug {
            println!("Sent: DATA #{} ({} bytes, attempt {}/{})",
                     fsm.seq, fsm.block.len(), fsm.retry_count + 1, fsm.config.max_retries + 1);
        }

        let next = fsm.transition::<AwaitAck>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<AwaitAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let outcome = frame::read_frame(fsm.serial.as_mut(), fsm.config.framing, fsm.config.timeout)
            .map_err(|e| fsm.io_error(e))?;

        match outcome {
            ReadOutcome::Frame(ref response)
                if response.kind == FrameKind::Ack && response.seq == fsm.seq =>
            {
                if fsm.config.debug { println!("Received: ACK #{}", fsm.seq); }
                fsm.bytes_sent += fsm.block.len() as u64;
                fsm.seq = 1 - fsm.seq;
                fsm.retry_count = 0;

                let next = fsm.transition::<PrepareBlock>();
                Ok(next as Box<dyn SenderState>)
            }
            outcome => {
                // Wrong sequence, NAK, corruption and silence all recover
                // the same way: retransmit the block in flight
                if fsm.config.debug {
                    match outcome {
                        ReadOutcome::Frame(f) => println!("Unexpected {:?} #{}, retransmitting", f.kind, f.seq),
                        ReadOutcome::Invalid(e) => println!("Invalid response ({}), retransmitting", e),
                        ReadOutcome::TimedOut => println!("Timeout, retransmitting"),
                    }
                }
                fsm.retry_count += 1;
                if fsm.retry_count > fsm.config.max_retries {
                    return Err(SenderError::RetryBudgetExceeded { delivered: fsm.bytes_sent });
                }

                let next = fsm.transition::<SendBlock>();
                Ok(next as Box<dyn SenderState>)
            }
        }
    }
}

impl SenderState for SenderFsm<SendEot> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let encoded = frame::encode(&Frame::eot(), fsm.config.framing);
        fsm.serial.write_all(&encoded).map_err(|e| fsm.io_error(e))?;
        if fsm.config.debug { println!("Sent: EOT"); }

        Err(SenderError::TransferComplete { delivered: fsm.bytes_sent })
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl SenderFsm<ResumeHandshake> {
    pub fn new(serial: Box<dyn SerialPort>, path: PathBuf, config: SenderConfig) -> Box<dyn SenderState> {
        assert!(config.block_size >= 1 && config.block_size <= MAX_PAYLOAD);

        Box::new(SenderFsm {
            state: PhantomData::<ResumeHandshake>,
            serial,
            config,
            path,
            name: String::new(),
            file: None,
            file_size: 0,
            bytes_sent: 0,
            seq: 0,
            retry_count: 0,
            block: Vec::new(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn base_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("unnamed")
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;

    fn run_sender(mut fsm: Box<dyn SenderState>) -> Result<u64, SenderError> {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(SenderError::TransferComplete { delivered }) => return Ok(delivered),
                Err(e) => return Err(e),
            }
        }
    }

    fn config(block_size: usize) -> SenderConfig {
        SenderConfig {
            block_size,
            timeout: Duration::from_secs(1),
            debug: true,
            ..SenderConfig::default()
        }
    }

    fn push_bytes(script: &mut Vec<Option<u8>>, bytes: &[u8]) {
        script.extend(bytes.iter().map(|&b| Some(b)));
    }

    fn push_frame(script: &mut Vec<Option<u8>>, frame: &Frame, framing: Framing) {
        push_bytes(script, &frame::encode(frame, framing));
    }

    fn write_test_file(name: &str, content: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_full_transfer_three_blocks() {
        // 250 bytes with 100-byte blocks: DATA 100/100/50, seqs 0,1,0
        let content: Vec<u8> = (0..250u32).map(|i| (i % 256) as u8).collect();
        let path = write_test_file("swlink_send_e2e.bin", &content);

        let mut responses = Vec::new();
        push_bytes(&mut responses, b"START_NEW\n");
        for seq in [0u8, 1, 0] {
            push_frame(&mut responses, &Frame::ack(seq), Framing::Delimited);
        }

        let mut expected = Vec::new();
        expected.extend_from_slice(b"STATUS:swlink_send_e2e.bin\n");
        expected.extend_from_slice(b"START:swlink_send_e2e.bin\n");
        expected.extend(frame::encode(&Frame::data(0, content[..100].to_vec()), Framing::Delimited));
        expected.extend(frame::encode(&Frame::data(1, content[100..200].to_vec()), Framing::Delimited));
        expected.extend(frame::encode(&Frame::data(0, content[200..250].to_vec()), Framing::Delimited));
        expected.extend(frame::encode(&Frame::eot(), Framing::Delimited));

        let serial = Box::new(MockSerialPort::new(responses, expected));
        let fsm = SenderFsm::new(serial, path.clone(), config(100));

        assert_eq!(run_sender(fsm).unwrap(), 250);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_lost_ack_retransmits_once() {
        let content = b"hello";
        let path = write_test_file("swlink_send_lost_ack.bin", content);

        let mut responses = Vec::new();
        push_bytes(&mut responses, b"START_NEW\n");
        responses.push(None); // first ACK lost
        push_frame(&mut responses, &Frame::ack(0), Framing::Delimited);

        let data = frame::encode(&Frame::data(0, content.to_vec()), Framing::Delimited);
        let mut expected = Vec::new();
        expected.extend_from_slice(b"STATUS:swlink_send_lost_ack.bin\n");
        expected.extend_from_slice(b"START:swlink_send_lost_ack.bin\n");
        expected.extend(&data);
        expected.extend(&data); // exactly one retransmission
        expected.extend(frame::encode(&Frame::eot(), Framing::Delimited));

        let serial = Box::new(MockSerialPort::new(responses, expected));
        let fsm = SenderFsm::new(serial, path.clone(), config(100));

        assert_eq!(run_sender(fsm).unwrap(), 5);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_wrong_seq_ack_retransmits() {
        let content = b"block";
        let path = write_test_file("swlink_send_wrong_seq.bin", content);

        let mut responses = Vec::new();
        push_bytes(&mut responses, b"START_NEW\n");
        push_frame(&mut responses, &Frame::ack(1), Framing::Delimited); // acknowledges the wrong bit
        push_frame(&mut responses, &Frame::ack(0), Framing::Delimited);

        let data = frame::encode(&Frame::data(0, content.to_vec()), Framing::Delimited);
        let mut expected = Vec::new();
        expected.extend_from_slice(b"STATUS:swlink_send_wrong_seq.bin\n");
        expected.extend_from_slice(b"START:swlink_send_wrong_seq.bin\n");
        expected.extend(&data);
        expected.extend(&data);
        expected.extend(frame::encode(&Frame::eot(), Framing::Delimited));

        let serial = Box::new(MockSerialPort::new(responses, expected));
        let fsm = SenderFsm::new(serial, path.clone(), config(100));

        assert_eq!(run_sender(fsm).unwrap(), 5);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_nak_retransmits() {
        let content = b"nak me";
        let path = write_test_file("swlink_send_nak.bin", content);

        let mut responses = Vec::new();
        push_bytes(&mut responses, b"START_NEW\n");
        push_frame(&mut responses, &Frame::nak(0), Framing::Delimited);
        push_frame(&mut responses, &Frame::ack(0), Framing::Delimited);

        let data = frame::encode(&Frame::data(0, content.to_vec()), Framing::Delimited);
        let mut expected = Vec::new();
        expected.extend_from_slice(b"STATUS:swlink_send_nak.bin\n");
        expected.extend_from_slice(b"START:swlink_send_nak.bin\n");
        expected.extend(&data);
        expected.extend(&data);
        expected.extend(frame::encode(&Frame::eot(), Framing::Delimited));

        let serial = Box::new(MockSerialPort::new(responses, expected));
        let fsm = SenderFsm::new(serial, path.clone(), config(100));

        assert_eq!(run_sender(fsm).unwrap(), 6);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let content = b"never acked";
        let path = write_test_file("swlink_send_exhaust.bin", content);

        let mut responses = Vec::new();
        push_bytes(&mut responses, b"START_NEW\n");
        // No ACK ever arrives: the exhausted script times out forever

        let data = frame::encode(&Frame::data(0, content.to_vec()), Framing::Delimited);
        let mut expected = Vec::new();
        expected.extend_from_slice(b"STATUS:swlink_send_exhaust.bin\n");
        expected.extend_from_slice(b"START:swlink_send_exhaust.bin\n");
        for _ in 0..4 {
            expected.extend(&data); // max_retries + 1 attempts
        }

        let serial = Box::new(MockSerialPort::new(responses, expected));
        let mut cfg = config(100);
        cfg.max_retries = 3;
        let fsm = SenderFsm::new(serial, path.clone(), cfg);

        match run_sender(fsm) {
            Err(SenderError::RetryBudgetExceeded { delivered: 0 }) => {}
            other => panic!("expected RetryBudgetExceeded, got {:?}", other.map(|_| ())),
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_resume_seeks_to_offset() {
        let content: Vec<u8> = (0..250u32).map(|i| (i % 256) as u8).collect();
        let path = write_test_file("swlink_send_resume.bin", &content);

        let mut responses = Vec::new();
        push_bytes(&mut responses, b"ACK_POS:100\n");
        push_frame(&mut responses, &Frame::ack(0), Framing::Delimited);
        push_frame(&mut responses, &Frame::ack(1), Framing::Delimited);

        let mut expected = Vec::new();
        expected.extend_from_slice(b"STATUS:swlink_send_resume.bin\n");
        expected.extend_from_slice(b"START:swlink_send_resume.bin\n");
        expected.extend(frame::encode(&Frame::data(0, content[100..200].to_vec()), Framing::Delimited));
        expected.extend(frame::encode(&Frame::data(1, content[200..250].to_vec()), Framing::Delimited));
        expected.extend(frame::encode(&Frame::eot(), Framing::Delimited));

        let serial = Box::new(MockSerialPort::new(responses, expected));
        let fsm = SenderFsm::new(serial, path.clone(), config(100));

        assert_eq!(run_sender(fsm).unwrap(), 250);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_resume_already_complete() {
        let content = vec![7u8; 250];
        let path = write_test_file("swlink_send_complete.bin", &content);

        let mut responses = Vec::new();
        push_bytes(&mut responses, b"ACK_POS:250\n");

        // No START, no DATA, no EOT
        let expected = b"STATUS:swlink_send_complete.bin\n".to_vec();

        let serial = Box::new(MockSerialPort::new(responses, expected));
        let fsm = SenderFsm::new(serial, path.clone(), config(100));

        assert_eq!(run_sender(fsm).unwrap(), 250);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_garbled_status_reply_starts_from_zero() {
        let content = b"fresh";
        let path = write_test_file("swlink_send_garbled.bin", content);

        let mut responses = Vec::new();
        push_bytes(&mut responses, b"WHAT?\n");
        push_frame(&mut responses, &Frame::ack(0), Framing::Delimited);

        let mut expected = Vec::new();
        expected.extend_from_slice(b"STATUS:swlink_send_garbled.bin\n");
        expected.extend_from_slice(b"START:swlink_send_garbled.bin\n");
        expected.extend(frame::encode(&Frame::data(0, content.to_vec()), Framing::Delimited));
        expected.extend(frame::encode(&Frame::eot(), Framing::Delimited));

        let serial = Box::new(MockSerialPort::new(responses, expected));
        let fsm = SenderFsm::new(serial, path.clone(), config(100));

        assert_eq!(run_sender(fsm).unwrap(), 5);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_absent_status_reply_starts_from_zero() {
        let content = b"quiet";
        let path = write_test_file("swlink_send_quiet.bin", content);

        let mut responses = vec![None]; // receiver says nothing
        push_frame(&mut responses, &Frame::ack(0), Framing::Delimited);

        let mut expected = Vec::new();
        expected.extend_from_slice(b"STATUS:swlink_send_quiet.bin\n");
        expected.extend_from_slice(b"START:swlink_send_quiet.bin\n");
        expected.extend(frame::encode(&Frame::data(0, content.to_vec()), Framing::Delimited));
        expected.extend(frame::encode(&Frame::eot(), Framing::Delimited));

        let serial = Box::new(MockSerialPort::new(responses, expected));
        let fsm = SenderFsm::new(serial, path.clone(), config(100));

        assert_eq!(run_sender(fsm).unwrap(), 5);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_fixed_framing_transfer() {
        let content = b"fixed slot";
        let path = write_test_file("swlink_send_fixed.bin", content);

        let mut responses = Vec::new();
        push_bytes(&mut responses, b"START_NEW\n");
        push_frame(&mut responses, &Frame::ack(0), Framing::Fixed);

        let mut expected = Vec::new();
        expected.extend_from_slice(b"STATUS:swlink_send_fixed.bin\n");
        expected.extend_from_slice(b"START:swlink_send_fixed.bin\n");
        expected.extend(frame::encode(&Frame::data(0, content.to_vec()), Framing::Fixed));
        expected.extend(frame::encode(&Frame::eot(), Framing::Fixed));

        let serial = Box::new(MockSerialPort::new(responses, expected));
        let mut cfg = config(100);
        cfg.framing = Framing::Fixed;
        let fsm = SenderFsm::new(serial, path.clone(), cfg);

        assert_eq!(run_sender(fsm).unwrap(), 10);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_empty_file_sends_only_eot() {
        let path = write_test_file("swlink_send_empty.bin", b"");

        let mut responses = Vec::new();
        push_bytes(&mut responses, b"START_NEW\n");

        let mut expected = Vec::new();
        expected.extend_from_slice(b"STATUS:swlink_send_empty.bin\n");
        expected.extend_from_slice(b"START:swlink_send_empty.bin\n");
        expected.extend(frame::encode(&Frame::eot(), Framing::Delimited));

        let serial = Box::new(MockSerialPort::new(responses, expected));
        let fsm = SenderFsm::new(serial, path.clone(), config(100));

        assert_eq!(run_sender(fsm).unwrap(), 0);
        std::fs::remove_file(&path).ok();
    }
}
