//! Bus timing discipline.
//!
//! Two independent blocking delays gate the acquisition loop: a protocol
//! delay derived from the serial framing parameters, applied before every
//! single register read, and a fixed loop delay applied once per sweep.
//! Both are additive sleeps; neither compensates for time already spent
//! in I/O.

use std::{thread, time::Duration};

use crate::config::Rs485Config;

/// Quiet time before one transaction: `protocol_delay` character times,
/// where a character occupies start + data + stop bit slots (the start
/// slot counts twice when a parity bit is on the wire).
pub fn protocol_delay_duration(cfg: &Rs485Config) -> Duration {
    let bits =
        u64::from(cfg.parity.start_bits()) + u64::from(cfg.data_bits) + u64::from(cfg.stop_bits);
    let ns = 1_000_000_000u64 * u64::from(cfg.protocol_delay) * bits / u64::from(cfg.baud);
    Duration::from_nanos(ns)
}

pub fn loop_delay_duration(cfg: &Rs485Config) -> Duration {
    Duration::from_millis(cfg.loop_delay_ms)
}

/// Block until the bus has settled. Must run before every read, including
/// the first one of each sweep.
pub fn protocol_delay(cfg: &Rs485Config) {
    let delay = protocol_delay_duration(cfg);
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

/// Block for the fixed per-sweep pause.
pub fn loop_delay(cfg: &Rs485Config) {
    let delay = loop_delay_duration(cfg);
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parity;

    fn cfg(parity: Parity, protocol_delay: u32) -> Rs485Config {
        Rs485Config {
            device: "/dev/ttyUSB0".into(),
            baud: 9600,
            parity,
            data_bits: 8,
            stop_bits: 1,
            slave: 1,
            protocol_delay,
            loop_delay_ms: 200,
        }
    }

    #[test]
    fn protocol_delay_for_9600_8n1() {
        // 1e9 * 1 * (1 + 8 + 1) / 9600, truncated.
        let delay = protocol_delay_duration(&cfg(Parity::None, 1));
        assert_eq!(delay, Duration::from_nanos(1_041_666));
    }

    #[test]
    fn parity_adds_a_bit_slot() {
        let none = protocol_delay_duration(&cfg(Parity::None, 1));
        let even = protocol_delay_duration(&cfg(Parity::Even, 1));
        let odd = protocol_delay_duration(&cfg(Parity::Odd, 1));
        assert_eq!(even, Duration::from_nanos(1_145_833));
        assert_eq!(odd, even);
        assert!(even > none);
    }

    #[test]
    fn delay_scales_with_factor() {
        // 1e9 * 4 * 10 / 9600; multiplied before the truncating divide.
        let four = protocol_delay_duration(&cfg(Parity::None, 4));
        assert_eq!(four, Duration::from_nanos(4_166_666));
    }

    #[test]
    fn zero_factor_means_no_delay() {
        assert!(protocol_delay_duration(&cfg(Parity::None, 0)).is_zero());
    }

    #[test]
    fn loop_delay_is_plain_milliseconds() {
        assert_eq!(
            loop_delay_duration(&cfg(Parity::None, 1)),
            Duration::from_millis(200)
        );
    }
}
