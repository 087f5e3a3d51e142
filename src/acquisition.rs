//! The acquisition cycle.
//!
//! One sweep reads the spindle register and then every user parameter in
//! declaration order, with the protocol delay in front of each read and
//! the loop delay after the whole sweep. The first failed read aborts
//! the remainder of the sweep; the error counter ticks once, the
//! last-error signal takes the fault's code, and all outputs keep their
//! last good values. The next sweep retries unconditionally, so a dead
//! bus shows up as a steadily climbing error count at loop cadence.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{ensure, Result};

use crate::config::{OutputKind, Rs485Config};
use crate::registers::RegisterMap;
use crate::scale;
use crate::signals::{MainSignals, UserSignal};
use crate::timing;
use crate::transport::{Transport, TransportError};

pub struct Acquisition<T: Transport> {
    transport: T,
    rs485: Rs485Config,
    map: RegisterMap,
    main: MainSignals,
    users: Vec<UserSignal>,
}

impl<T: Transport> Acquisition<T> {
    pub fn new(
        transport: T,
        rs485: Rs485Config,
        map: RegisterMap,
        main: MainSignals,
        users: Vec<UserSignal>,
    ) -> Result<Self> {
        ensure!(
            users.len() == map.users().len(),
            "user signal count ({}) does not match register map ({})",
            users.len(),
            map.users().len()
        );
        Ok(Self {
            transport,
            rs485,
            map,
            main,
            users,
        })
    }

    /// One full pass over the register map. Returns the fault that
    /// aborted the sweep, if any; the error signals are already updated
    /// by the time this returns.
    pub fn sweep(&mut self) -> Result<(), TransportError> {
        timing::protocol_delay(&self.rs485);
        let spindle = self.map.spindle();
        let raw = match self.transport.read_register(spindle.address) {
            Ok(raw) => raw,
            Err(err) => return Err(self.record(err)),
        };
        self.main
            .spindle_rpm_out
            .set(scale::to_float(raw, spindle.multiplier, spindle.divisor));

        for index in 0..self.map.users().len() {
            timing::protocol_delay(&self.rs485);
            let entry = &self.map.users()[index];
            let raw = match self.transport.read_register(entry.address) {
                Ok(raw) => raw,
                Err(err) => return Err(self.record(err)),
            };
            // The signal vector is index-locked to the map; a mismatch
            // here means the startup wiring is broken, treated like any
            // other per-entry fault.
            match (&self.users[index], entry.kind) {
                (UserSignal::Float(slot), OutputKind::Float) => {
                    slot.set(scale::to_float(raw, entry.multiplier, entry.divisor));
                }
                (UserSignal::S32(slot), OutputKind::S32) => {
                    slot.set(scale::to_s32(raw, entry.multiplier, entry.divisor));
                }
                (UserSignal::U32(slot), OutputKind::U32) => {
                    slot.set(scale::to_u32(raw, entry.multiplier, entry.divisor));
                }
                _ => {
                    let err = TransportError::KindMismatch {
                        name: entry.name.clone(),
                    };
                    return Err(self.record(err));
                }
            }
        }
        Ok(())
    }

    fn record(&self, err: TransportError) -> TransportError {
        log::warn!("({}) {err}", err.code());
        self.main.error_count.set(self.main.error_count.get() + 1);
        self.main.last_error.set(err.code());
        err
    }

    /// Sweep until the stop flag is observed. The flag is checked only
    /// at sweep boundaries, so an in-flight sweep always runs to
    /// completion (or to its first fault) and the loop delay still
    /// applies afterwards.
    pub fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::SeqCst) {
            let _ = self.sweep();
            timing::loop_delay(&self.rs485);
        }
    }

    /// Release the bus and drop the connection flag.
    pub fn shutdown(&mut self) {
        self.transport.close();
        self.main.is_connected.set(false);
    }

    pub fn signals(&self) -> &MainSignals {
        &self.main
    }
}
