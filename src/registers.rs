//! The register map: an immutable, ordered view of everything one sweep
//! reads. Built once from a validated config; the spindle entry always
//! comes first, user entries follow in declaration order. That order is
//! externally observable twice over (polling order and signal creation
//! order), so nothing here reorders or deduplicates.

use crate::config::{MainConfig, OutputKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterEntry {
    pub address: u16,
    pub multiplier: i32,
    pub divisor: i32,
    pub kind: OutputKind,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RegisterMap {
    spindle: RegisterEntry,
    users: Vec<RegisterEntry>,
}

impl RegisterMap {
    pub fn from_config(config: &MainConfig) -> Self {
        let spindle = RegisterEntry {
            address: config.spindle.address,
            multiplier: config.spindle.multiplier,
            divisor: config.spindle.divisor,
            kind: OutputKind::Float,
            name: "spindle.speed-rpm-out".into(),
        };
        let users = config
            .parameters
            .iter()
            .map(|param| RegisterEntry {
                address: param.address,
                multiplier: param.multiplier,
                divisor: param.divisor,
                kind: param.kind,
                name: param.name.clone(),
            })
            .collect();
        Self { spindle, users }
    }

    pub fn spindle(&self) -> &RegisterEntry {
        &self.spindle
    }

    pub fn users(&self) -> &[RegisterEntry] {
        &self.users
    }

    /// Registers read per sweep: the spindle plus every user entry.
    pub fn register_count(&self) -> usize {
        1 + self.users.len()
    }
}
