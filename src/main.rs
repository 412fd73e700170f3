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

// Stop-and-Wait serial file transfer
mod crc;
mod frame;
mod handshake;
mod protocol;
mod receiver;
mod sender;
mod serial;

use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;
use std::time::Duration;
use frame::Framing;
use serial::{RealSerialPort, SerialSettings};

#[derive(Parser)]
#[command(name = "swlink")]
#[command(about = "Reliable Stop-and-Wait file transfer over a serial link", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// On-wire framing (delimited or fixed)
    #[arg(long, default_value = "delimited")]
    framing: String,

    /// Payload bytes per DATA frame
    #[arg(long, default_value = "512", value_name = "BYTES")]
    block_size: usize,

    /// Retransmissions allowed per block before the transfer aborts
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Seconds to wait for a response to each frame
    #[arg(long, default_value = "3", value_name = "SECS")]
    timeout: u64,

    /// Reply with a NAK on checksum mismatch (receiver fast path)
    #[arg(long)]
    nak: bool,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file, resuming a previous partial transfer if possible
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive a file into a directory
    Receive {
        /// Directory to save the received file
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn parse_framing(framing: &str) -> Result<Framing, String> {
    match framing.to_lowercase().as_str() {
        "delimited" => Ok(Framing::Delimited),
        "fixed" => Ok(Framing::Fixed),
        _ => Err(format!("Invalid framing: {}. Must be 'delimited' or 'fixed'", framing)),
    }
}

fn main() {
    let cli = Cli::parse();

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let framing = match parse_framing(&cli.framing) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.block_size < 1 || cli.block_size > protocol::MAX_PAYLOAD {
        eprintln!("Error: block size must be between 1 and {}", protocol::MAX_PAYLOAD);
        std::process::exit(1);
    }

    let settings = SerialSettings {
        port: cli.port,
        baud: cli.baud,
        data_bits,
        parity,
        stop_bits,
    };

    println!("Opening serial port: {}", settings.port);
    println!(
        "Settings: {} baud, {:?}, {:?}, {:?}, {:?} framing",
        settings.baud, settings.data_bits, settings.parity, settings.stop_bits, framing
    );

    let serial_port = match RealSerialPort::open(&settings) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Send { file } => {
            println!("\nSending file: {}", file.display());
            let config = sender::SenderConfig {
                framing,
                block_size: cli.block_size,
                max_retries: cli.max_retries,
                timeout,
                debug: cli.debug,
            };
            match send_file(serial_port, file, config) {
                Ok(delivered) => {
                    println!("\nFile fully delivered ({} bytes)", delivered);
                }
                Err(sender::SenderError::RetryBudgetExceeded { delivered }) => {
                    eprintln!(
                        "\nSend failed: retry budget exhausted. {} bytes were delivered; \
                         rerun to resume from there.",
                        delivered
                    );
                    std::process::exit(1);
                }
                Err(sender::SenderError::Handshake(msg)) => {
                    eprintln!("\nSend failed before any data was exchanged: {}", msg);
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("\nSend failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Receive { output_dir } => {
            if !output_dir.exists() {
                eprintln!("Error: output directory not found: {}", output_dir.display());
                std::process::exit(1);
            }
            println!("\nReceiving into: {}", output_dir.display());
            let config = receiver::ReceiverConfig {
                framing,
                block_capacity: cli.block_size,
                timeout,
                send_nak: cli.nak,
                debug: cli.debug,
            };
            match receive_file(serial_port, output_dir, config) {
                Ok(written) => {
                    println!("\nFile received ({} bytes total)", written);
                }
                Err(receiver::ReceiverError::Handshake(msg)) => {
                    eprintln!("\nReceive failed before any data was exchanged: {}", msg);
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("\nReceive failed: {}. A partial file, if any, is kept for resume.", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn send_file(
    serial_port: RealSerialPort,
    file: PathBuf,
    config: sender::SenderConfig,
) -> Result<u64, sender::SenderError> {
    use sender::{SenderFsm, SenderError};

    if !file.exists() {
        return Err(SenderError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", file.display()),
        )));
    }

    let mut state = SenderFsm::new(Box::new(serial_port), file, config);

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(SenderError::TransferComplete { delivered }) => {
                return Ok(delivered);
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}

fn receive_file(
    serial_port: RealSerialPort,
    output_dir: PathBuf,
    config: receiver::ReceiverConfig,
) -> Result<u64, receiver::ReceiverError> {
    use receiver::{ReceiverFsm, ReceiverError};

    let mut state = ReceiverFsm::new(Box::new(serial_port), output_dir, config);

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(ReceiverError::TransferComplete { written }) => {
                return Ok(written);
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}
