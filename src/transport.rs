//! Modbus RTU transport session.
//!
//! One session owns the serial port for the whole process lifetime and
//! walks a simple state machine: disconnected until `connect`, connected
//! while polling, closed after `close`. Exactly one thread ever touches
//! it. Requests are generated and responses validated with `rmodbus`;
//! the response is assembled from timed reads because RTU delimits
//! frames by silence, not by length prefix.

use std::{
    io::{Read, Write},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use rmodbus::{client::ModbusRequest, guess_response_frame_len, ModbusProto};
use serialport::SerialPort;
use thiserror::Error;

use crate::config::Rs485Config;

const READ_BUF_SIZE: usize = 256;
/// Per-read blocking window on the serial handle.
const POLL_TIMEOUT: Duration = Duration::from_millis(20);
/// Overall budget for one request/response exchange.
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

// errno values surfaced on the last-error signal for faults that carry
// no OS error code of their own.
const EIO: i32 = 5;
const EINVAL: i32 = 22;
const EPROTO: i32 = 71;
const ENOTCONN: i32 = 107;
const ETIMEDOUT: i32 = 110;

/// A failed bus transaction. Recoverable at loop level: the sweep aborts,
/// the error counter ticks, and the next sweep retries from scratch.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("modbus protocol error: {0}")]
    Protocol(#[from] rmodbus::ErrorKind),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("session is not connected")]
    NotConnected,
    #[error("output kind mismatch for '{name}'")]
    KindMismatch { name: String },
}

impl TransportError {
    /// Numeric code published on the last-error signal.
    pub fn code(&self) -> i32 {
        match self {
            TransportError::Io(err) => err.raw_os_error().unwrap_or(EIO),
            TransportError::Protocol(_) => EPROTO,
            TransportError::Timeout(_) => ETIMEDOUT,
            TransportError::NotConnected => ENOTCONN,
            TransportError::KindMismatch { .. } => EINVAL,
        }
    }
}

/// The seam the acquisition cycle reads through; tests substitute a stub.
pub trait Transport {
    /// Read a single holding register from the bound slave.
    fn read_register(&mut self, address: u16) -> Result<u16, TransportError>;

    /// Release the session. Idempotent; further reads fail.
    fn close(&mut self) {}
}

enum SessionState {
    Disconnected,
    Connected(Box<dyn SerialPort>),
    Closed,
}

pub struct RtuSession {
    cfg: Rs485Config,
    debug: bool,
    state: SessionState,
}

impl RtuSession {
    pub fn new(cfg: &Rs485Config, debug: bool) -> Self {
        Self {
            cfg: cfg.clone(),
            debug,
            state: SessionState::Disconnected,
        }
    }

    /// Open the serial device and bind the configured slave address. No
    /// retry here: a failed open is fatal to the process.
    pub fn connect(&mut self) -> Result<()> {
        let port = self
            .cfg
            .apply_builder(serialport::new(&self.cfg.device, self.cfg.baud))
            .timeout(POLL_TIMEOUT)
            .open()
            .with_context(|| format!("failed to open {}", self.cfg.device))?;
        log::info!(
            "opened {} ({} baud, {}{}{}, slave {})",
            self.cfg.device,
            self.cfg.baud,
            self.cfg.data_bits,
            self.cfg.parity,
            self.cfg.stop_bits,
            self.cfg.slave
        );
        self.state = SessionState::Connected(port);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Connected(_))
    }

    fn read_response(port: &mut Box<dyn SerialPort>) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        let mut frame: Vec<u8> = Vec::with_capacity(READ_BUF_SIZE);
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match port.read(&mut buf) {
                Ok(n) if n > 0 => {
                    frame.extend_from_slice(&buf[..n]);
                    if frame.len() >= 3 {
                        if let Ok(expected) = guess_response_frame_len(&frame, ModbusProto::Rtu) {
                            if frame.len() >= expected as usize {
                                frame.truncate(expected as usize);
                                return Ok(frame);
                            }
                        }
                    }
                }
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(err) => return Err(TransportError::Io(err)),
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout(RESPONSE_TIMEOUT));
            }
        }
    }
}

impl Transport for RtuSession {
    fn read_register(&mut self, address: u16) -> Result<u16, TransportError> {
        let port = match &mut self.state {
            SessionState::Connected(port) => port,
            SessionState::Disconnected | SessionState::Closed => {
                return Err(TransportError::NotConnected)
            }
        };

        let mut request = ModbusRequest::new(self.cfg.slave, ModbusProto::Rtu);
        let mut raw = Vec::new();
        request.generate_get_holdings(address, 1, &mut raw)?;
        if self.debug {
            log::debug!("-> {}", format_hex_bytes(&raw));
        }
        port.write_all(&raw)?;
        port.flush()?;

        let response = Self::read_response(port)?;
        if self.debug {
            log::debug!("<- {}", format_hex_bytes(&response));
        }
        request.parse_ok(&response)?;
        // addr, func, byte count, then big-endian payload before the CRC.
        if response.len() < 7 {
            return Err(TransportError::Protocol(rmodbus::ErrorKind::FrameBroken));
        }
        Ok(u16::from_be_bytes([response[3], response[4]]))
    }

    fn close(&mut self) {
        if self.is_open() {
            log::info!("closing {}", self.cfg.device);
        }
        self.state = SessionState::Closed;
    }
}

/// Convert a byte slice into an uppercase hexadecimal string separated by
/// spaces.
fn format_hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parity;

    fn cfg() -> Rs485Config {
        Rs485Config {
            device: "/dev/null".into(),
            baud: 9600,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
            slave: 1,
            protocol_delay: 0,
            loop_delay_ms: 0,
        }
    }

    #[test]
    fn reads_fail_before_connect_and_after_close() {
        let mut session = RtuSession::new(&cfg(), false);
        assert!(!session.is_open());
        assert!(matches!(
            session.read_register(0x2103),
            Err(TransportError::NotConnected)
        ));

        session.close();
        session.close(); // idempotent
        assert!(!session.is_open());
        assert!(matches!(
            session.read_register(0x2103),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn error_codes_are_errno_like() {
        assert_eq!(TransportError::NotConnected.code(), 107);
        assert_eq!(TransportError::Timeout(RESPONSE_TIMEOUT).code(), 110);
        assert_eq!(
            TransportError::KindMismatch { name: "x".into() }.code(),
            22
        );
        let io = TransportError::Io(std::io::Error::from_raw_os_error(6));
        assert_eq!(io.code(), 6);
    }

    #[test]
    fn hex_formatting_matches_bus_logs() {
        assert_eq!(format_hex_bytes(&[0x01, 0x03, 0xAB]), "01 03 AB");
        assert_eq!(format_hex_bytes(&[]), "");
    }
}
