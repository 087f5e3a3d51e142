use std::{fmt, fs, io::Write, path::Path};

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use serialport::{DataBits, Parity as SerialParity, SerialPortBuilder, StopBits};

/// Serial parity symbol as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Parity {
    #[serde(rename = "N")]
    None,
    #[serde(rename = "O")]
    Odd,
    #[serde(rename = "E")]
    Even,
}

impl Parity {
    /// Bit slots consumed before the data bits: one start bit, plus one
    /// extra slot when a parity bit is on the wire.
    pub fn start_bits(&self) -> u8 {
        match self {
            Parity::None => 1,
            Parity::Odd | Parity::Even => 2,
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::None => write!(f, "N"),
            Parity::Odd => write!(f, "O"),
            Parity::Even => write!(f, "E"),
        }
    }
}

/// Output representation of a published user parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum OutputKind {
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "s32")]
    S32,
    #[serde(rename = "u32")]
    U32,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Float => write!(f, "float"),
            OutputKind::S32 => write!(f, "s32"),
            OutputKind::U32 => write!(f, "u32"),
        }
    }
}

/// Upper bound on the protocol delay factor, in character times.
pub const MAX_PROTOCOL_DELAY: u32 = 10_000;

/// RTU physical-layer parameters plus the two loop timing knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Rs485Config {
    pub device: String,
    pub baud: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub slave: u8,
    /// Quiet time before each transaction, in character times.
    pub protocol_delay: u32,
    pub loop_delay_ms: u64,
}

impl Rs485Config {
    pub fn apply_builder(&self, b: SerialPortBuilder) -> SerialPortBuilder {
        let b = b.data_bits(match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        });
        let b = b.stop_bits(match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        });
        b.parity(match self.parity {
            Parity::None => SerialParity::None,
            Parity::Odd => SerialParity::Odd,
            Parity::Even => SerialParity::Even,
        })
    }
}

/// Spindle RPM feedback register binding. Exactly one, always published
/// as a float output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SpindleConfig {
    pub address: u16,
    pub multiplier: i32,
    pub divisor: i32,
}

/// One user-declared register binding. Declaration order in the config
/// file defines both polling order and signal creation order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UserParam {
    pub name: String,
    pub address: u16,
    pub multiplier: i32,
    pub divisor: i32,
    #[serde(rename = "type")]
    pub kind: OutputKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MainConfig {
    pub component: String,
    pub rs485: Rs485Config,
    pub spindle: SpindleConfig,
    #[serde(default, rename = "parameter")]
    pub parameters: Vec<UserParam>,
}

impl MainConfig {
    /// Reject anything the acquisition loop must never see. All of these
    /// are fatal before the first connection attempt.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.component.trim().is_empty(), "component name is empty");
        ensure!(!self.rs485.device.trim().is_empty(), "serial device is empty");
        ensure!(self.rs485.baud > 0, "baud rate must be greater than zero");
        ensure!(
            (5..=8).contains(&self.rs485.data_bits),
            "data bits must be 5..=8, got {}",
            self.rs485.data_bits
        );
        ensure!(
            self.rs485.stop_bits == 1 || self.rs485.stop_bits == 2,
            "stop bits must be 1 or 2, got {}",
            self.rs485.stop_bits
        );
        ensure!(
            (1..=247).contains(&self.rs485.slave),
            "slave address must be 1..=247, got {}",
            self.rs485.slave
        );
        // Keeps the nanosecond delay arithmetic far away from u64 range;
        // anything beyond this is minutes of quiet time per transaction.
        ensure!(
            self.rs485.protocol_delay <= MAX_PROTOCOL_DELAY,
            "protocol delay factor must be at most {MAX_PROTOCOL_DELAY}, got {}",
            self.rs485.protocol_delay
        );
        ensure!(self.spindle.divisor != 0, "spindle divisor must be nonzero");
        for param in &self.parameters {
            ensure!(
                !param.name.trim().is_empty(),
                "parameter at address {} has an empty name",
                param.address
            );
            ensure!(
                param.divisor != 0,
                "parameter '{}' has a zero divisor",
                param.name
            );
        }
        for (i, param) in self.parameters.iter().enumerate() {
            let duplicate = self.parameters[..i].iter().any(|p| p.name == param.name);
            ensure!(!duplicate, "duplicate parameter name '{}'", param.name);
        }
        Ok(())
    }
}

/// Load and validate a config file. Any failure here is fatal to the
/// process; acquisition never starts on a half-valid config.
pub fn load_config(path: &Path) -> Result<MainConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: MainConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

const BLANK_CONFIG: &str = r#"# vfdlink configuration

# Component name, used as the prefix of every published signal.
component = "spindle-vfd"

[rs485]
device = "/dev/ttyUSB0"
baud = 9600
# N = none, O = odd, E = even
parity = "N"
data-bits = 8
stop-bits = 1
slave = 1
# Quiet time before each transaction, in character times.
protocol-delay = 4
# Pause after each full sweep.
loop-delay-ms = 200

# Spindle RPM feedback, published as <component>.spindle.speed-rpm-out.
[spindle]
address = 0x2103
multiplier = 60
divisor = 100

# Optional extra registers, polled in declaration order and published
# as <component>.parameters.<name>. Repeat the block per register.
[[parameter]]
name = "output-current"
address = 0x2104
multiplier = 1
divisor = 10
# float | s32 | u32
type = "float"
"#;

/// Write a commented template config. Refuses to clobber an existing file.
pub fn write_blank_config(path: &Path) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(BLANK_CONFIG.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MainConfig {
        toml::from_str(
            r#"
            component = "vfd"

            [rs485]
            device = "/dev/ttyUSB0"
            baud = 9600
            parity = "N"
            data-bits = 8
            stop-bits = 1
            slave = 1
            protocol-delay = 4
            loop-delay-ms = 100

            [spindle]
            address = 8451
            multiplier = 60
            divisor = 100

            [[parameter]]
            name = "output-current"
            address = 8452
            multiplier = 1
            divisor = 10
            type = "float"

            [[parameter]]
            name = "dc-bus-voltage"
            address = 8453
            multiplier = 1
            divisor = 1
            type = "u32"
            "#,
        )
        .expect("sample config must parse")
    }

    #[test]
    fn sample_config_parses_and_validates() {
        let config = sample();
        assert_eq!(config.component, "vfd");
        assert_eq!(config.rs485.parity, Parity::None);
        assert_eq!(config.parameters.len(), 2);
        assert_eq!(config.parameters[1].kind, OutputKind::U32);
        config.validate().expect("sample config must validate");
    }

    #[test]
    fn parameter_order_is_preserved() {
        let config = sample();
        let names: Vec<_> = config.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["output-current", "dc-bus-voltage"]);
    }

    #[test]
    fn rejects_zero_baud() {
        let mut config = sample();
        config.rs485.baud = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_divisor() {
        let mut config = sample();
        config.parameters[0].divisor = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("output-current"));

        let mut config = sample();
        config.spindle.divisor = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_parameter_names() {
        let mut config = sample();
        config.parameters[1].name = "output-current".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_oversized_protocol_delay() {
        let mut config = sample();
        config.rs485.protocol_delay = MAX_PROTOCOL_DELAY;
        config.validate().expect("bound itself is accepted");
        config.rs485.protocol_delay = MAX_PROTOCOL_DELAY + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("protocol delay"));
    }

    #[test]
    fn rejects_bad_framing() {
        let mut config = sample();
        config.rs485.data_bits = 9;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.rs485.stop_bits = 3;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.rs485.slave = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_parity_symbol() {
        let text = r#"parity = "X""#;
        #[derive(Deserialize)]
        struct Probe {
            #[allow(dead_code)]
            parity: Parity,
        }
        assert!(toml::from_str::<Probe>(text).is_err());
    }

    #[test]
    fn parity_start_bits() {
        assert_eq!(Parity::None.start_bits(), 1);
        assert_eq!(Parity::Odd.start_bits(), 2);
        assert_eq!(Parity::Even.start_bits(), 2);
    }

    #[test]
    fn blank_config_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blank.toml");
        write_blank_config(&path).expect("first write succeeds");
        let config = load_config(&path).expect("template must be a valid config");
        assert_eq!(config.component, "spindle-vfd");
        assert_eq!(config.parameters.len(), 1);

        // Never clobber an existing file.
        assert!(write_blank_config(&path).is_err());
    }
}
