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

//! SWLINK protocol constants

use std::time::Duration;

/// Flag byte delimiting a frame in the delimited framing
pub const FRAME_FLAG: u8 = 0x7E;

/// Frame kind - data block
pub const FRAME_DATA: u8 = 0x01;

/// Frame kind - acknowledgment, carries the sequence bit it acknowledges
pub const FRAME_ACK: u8 = 0x02;

/// Frame kind - negative acknowledgment, carries the rejected sequence bit
pub const FRAME_NAK: u8 = 0x03;

/// Frame kind - end of transmission, no more data blocks will follow
pub const FRAME_EOT: u8 = 0x04;

/// Maximum payload bytes carried by one DATA frame
pub const MAX_PAYLOAD: usize = 1024;

/// Delimited framing overhead: 2 flags + seq + kind + 2-byte length + 4-byte CRC
pub const DELIMITED_OVERHEAD: usize = 10;

/// Fixed framing header: 4-byte CRC + seq + kind + 2-byte length
pub const FIXED_HEADER: usize = 8;

/// Total size of every frame in the fixed framing, padding included
pub const FIXED_FRAME_SIZE: usize = FIXED_HEADER + MAX_PAYLOAD;

/// Handshake keyword - sender asks how much of a named file already exists
pub const STATUS_PREFIX: &str = "STATUS:";

/// Handshake keyword - receiver reports the resume offset in decimal
pub const ACK_POS_PREFIX: &str = "ACK_POS:";

/// Handshake keyword - receiver holds nothing, transfer starts from zero
pub const START_NEW_KEYWORD: &str = "START_NEW";

/// Handshake keyword - sender announces the transfer is about to begin
pub const START_PREFIX: &str = "START:";

/// Handshake keyword - end-of-transmission text marker
pub const END_KEYWORD: &str = "END";

/// Longest handshake line accepted before the reader gives up
pub const MAX_LINE: usize = 512;

/// Time allowed for each handshake exchange (reply to STATUS, START marker)
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time the receiver waits for the initial STATUS request
pub const STATUS_WAIT: Duration = Duration::from_secs(30);

/// Consecutive per-frame timeouts before the receiver declares the link dead
pub const MAX_IDLE_TIMEOUTS: u32 = 20;

/// Default retransmission budget per block
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default wait for an ACK, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Default block size read from the source file per DATA frame
pub const DEFAULT_BLOCK_SIZE: usize = 512;
