//! vfdlink — Modbus RTU acquisition core for variable-frequency drives.
//!
//! Polls a configured set of drive registers over an RS-485 serial link,
//! scales the raw values into engineering units and publishes them as
//! named typed signals for an external control framework. The loop is
//! single-threaded and blocking by design; the RTU physical layer is
//! paced with a per-transaction protocol delay and a fixed per-sweep
//! loop delay.

pub mod acquisition;
pub mod config;
pub mod registers;
pub mod scale;
pub mod signals;
pub mod timing;
pub mod transport;
