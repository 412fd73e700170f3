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

//! Resume/checkpoint handshake messages.
//!
//! Handshake lines are newline-terminated ASCII with a fixed keyword
//! prefix per message type. They are exchanged once before the ARQ loop
//! and are entirely separate from the byte-counting data framing.

use std::io;
use std::time::Duration;
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Message Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// Sender asks how many bytes of the named file the receiver holds
    StatusQuery { name: String },
    /// Receiver reports the byte offset already durably written
    AckPosition { offset: u64 },
    /// Receiver holds nothing usable, transfer starts from offset zero
    StartFresh,
    /// Sender announces the transfer of the named file is about to begin
    StartMarker { name: String },
    /// End-of-transmission text marker
    EndMarker,
}

impl HandshakeMessage {
    /// Serializes the message as a newline-terminated line
    pub fn encode(&self) -> Vec<u8> {
        let line = match self {
            HandshakeMessage::StatusQuery { name } => format!("{}{}\n", STATUS_PREFIX, name),
            HandshakeMessage::AckPosition { offset } => format!("{}{}\n", ACK_POS_PREFIX, offset),
            HandshakeMessage::StartFresh => format!("{}\n", START_NEW_KEYWORD),
            HandshakeMessage::StartMarker { name } => format!("{}{}\n", START_PREFIX, name),
            HandshakeMessage::EndMarker => format!("{}\n", END_KEYWORD),
        };
        line.into_bytes()
    }

    /// Parses one line, with or without its terminator. Returns None for
    /// unknown keywords, empty names or non-decimal offsets.
    pub fn parse(line: &[u8]) -> Option<HandshakeMessage> {
        let text = std::str::from_utf8(line).ok()?;
        let text = text.trim_end_matches(['\r', '\n']);

        if let Some(name) = text.strip_prefix(STATUS_PREFIX) {
            if name.is_empty() {
                return None;
            }
            return Some(HandshakeMessage::StatusQuery { name: name.to_string() });
        }
        if let Some(offset) = text.strip_prefix(ACK_POS_PREFIX) {
            return offset
                .parse::<u64>()
                .ok()
                .map(|offset| HandshakeMessage::AckPosition { offset });
        }
        // START_NEW shares a prefix with START:, check it first
        if text == START_NEW_KEYWORD {
            return Some(HandshakeMessage::StartFresh);
        }
        if let Some(name) = text.strip_prefix(START_PREFIX) {
            if name.is_empty() {
                return None;
            }
            return Some(HandshakeMessage::StartMarker { name: name.to_string() });
        }
        if text == END_KEYWORD {
            return Some(HandshakeMessage::EndMarker);
        }

        None
    }
}

// ============================================================================
// Line Reader
// ============================================================================

/// Reads bytes until a newline. Returns None on timeout; lines longer than
/// MAX_LINE are truncated to the cap (the parser will reject them).
pub fn read_line(serial: &mut dyn SerialPort, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();

    loop {
        let mut byte = [0u8; 1];
        match serial.read_timeout(&mut byte, timeout) {
            Ok(0) => return Ok(None),
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' || line.len() >= MAX_LINE {
                    return Ok(Some(line));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
