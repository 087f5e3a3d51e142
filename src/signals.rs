//! The published signal surface.
//!
//! The external control framework sees a flat namespace of typed slots,
//! `<component>.<group>.<name>`. This shim owns their creation order and
//! nothing else: the acquisition thread is the only writer of the output
//! slots, the framework drives the command inputs. Every slot starts at
//! zero/false before the first connection attempt, and any creation
//! failure is fatal before the loop starts.

use std::sync::Arc;

use anyhow::{ensure, Result};
use parking_lot::RwLock;

use crate::config::OutputKind;
use crate::registers::RegisterEntry;

/// A single named typed value, cheap to clone and hand out.
#[derive(Debug, Default)]
pub struct Slot<T: Copy>(Arc<RwLock<T>>);

impl<T: Copy> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Copy + Default> Slot<T> {
    fn new() -> Self {
        Self(Arc::new(RwLock::new(T::default())))
    }
}

impl<T: Copy> Slot<T> {
    pub fn set(&self, value: T) {
        *self.0.write() = value;
    }

    pub fn get(&self) -> T {
        *self.0.read()
    }
}

/// Whether the slot is written by this component or by the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// Creates named slots and remembers their creation order.
pub struct SignalRegistry {
    component: String,
    names: Vec<(String, Direction)>,
}

impl SignalRegistry {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            names: Vec::new(),
        }
    }

    fn register(&mut self, suffix: &str, direction: Direction) -> Result<String> {
        let name = format!("{}.{}", self.component, suffix);
        ensure!(
            self.names.iter().all(|(existing, _)| *existing != name),
            "signal '{name}' already exists"
        );
        self.names.push((name.clone(), direction));
        Ok(name)
    }

    pub fn bit(&mut self, suffix: &str, direction: Direction) -> Result<Slot<bool>> {
        self.register(suffix, direction)?;
        Ok(Slot::new())
    }

    pub fn s32(&mut self, suffix: &str, direction: Direction) -> Result<Slot<i32>> {
        self.register(suffix, direction)?;
        Ok(Slot::new())
    }

    pub fn u32(&mut self, suffix: &str, direction: Direction) -> Result<Slot<u32>> {
        self.register(suffix, direction)?;
        Ok(Slot::new())
    }

    pub fn float(&mut self, suffix: &str, direction: Direction) -> Result<Slot<f64>> {
        self.register(suffix, direction)?;
        Ok(Slot::new())
    }

    /// Full signal names in creation order.
    pub fn names(&self) -> Vec<&str> {
        self.names.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The fixed part of the surface, present for every drive.
pub struct MainSignals {
    pub is_connected: Slot<bool>,
    pub error_count: Slot<i32>,
    pub last_error: Slot<i32>,
    pub spindle_rpm_in: Slot<f64>,
    pub spindle_rpm_out: Slot<f64>,
    pub at_speed: Slot<bool>,
    pub run_forward: Slot<bool>,
    pub run_reverse: Slot<bool>,
}

impl MainSignals {
    /// Creation order is part of the external contract; keep it stable.
    pub fn create(registry: &mut SignalRegistry) -> Result<Self> {
        Ok(Self {
            is_connected: registry.bit("rs485.is-connected", Direction::Out)?,
            error_count: registry.s32("rs485.error-count", Direction::Out)?,
            last_error: registry.s32("rs485.last-error", Direction::Out)?,
            spindle_rpm_in: registry.float("spindle.speed-rpm-in", Direction::In)?,
            spindle_rpm_out: registry.float("spindle.speed-rpm-out", Direction::Out)?,
            at_speed: registry.bit("spindle.at-speed", Direction::Out)?,
            run_forward: registry.bit("spindle.run-forward", Direction::In)?,
            run_reverse: registry.bit("spindle.run-reverse", Direction::In)?,
        })
    }
}

/// Output slot of one user parameter, typed per its configured kind.
pub enum UserSignal {
    Float(Slot<f64>),
    S32(Slot<i32>),
    U32(Slot<u32>),
}

impl UserSignal {
    pub fn create(registry: &mut SignalRegistry, entry: &RegisterEntry) -> Result<Self> {
        let suffix = format!("parameters.{}", entry.name);
        Ok(match entry.kind {
            OutputKind::Float => UserSignal::Float(registry.float(&suffix, Direction::Out)?),
            OutputKind::S32 => UserSignal::S32(registry.s32(&suffix, Direction::Out)?),
            OutputKind::U32 => UserSignal::U32(registry.u32(&suffix, Direction::Out)?),
        })
    }
}

/// One typed slot per user entry, index-locked to the register map.
pub fn create_user_signals(
    registry: &mut SignalRegistry,
    entries: &[RegisterEntry],
) -> Result<Vec<UserSignal>> {
    entries
        .iter()
        .map(|entry| UserSignal::create(registry, entry))
        .collect()
}
