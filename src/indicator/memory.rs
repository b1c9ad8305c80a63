//! In-memory output backend
//!
//! Used for `--backend sim` (lamp changes are logged) and as the observable
//! backend in tests. Clones share state, so a test can keep one clone as a
//! handle while the controller owns the other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

use super::{ChannelHandle, OutputBackend, OutputError};
use crate::app::config::BackendKind;

/// One recorded `set_active` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinEvent {
    pub at: Instant,
    pub pin: u8,
    pub active: bool,
}

#[derive(Debug)]
struct Channel {
    pin: u8,
    active: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    channels: HashMap<ChannelHandle, Channel>,
    next_handle: u32,
    history: Vec<PinEvent>,
    closed_pins: Vec<u8>,
    broken_pins: Vec<u8>,
    broken_writes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail for the given pin
    pub fn with_broken_pin(self, pin: u8) -> Self {
        self.lock().broken_pins.push(pin);
        self
    }

    /// Make switching the given pin on fail; switching it off still works
    pub fn with_broken_write(self, pin: u8) -> Self {
        self.lock().broken_writes.push(pin);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state of an open pin, `None` if it is not open
    pub fn is_active(&self, pin: u8) -> Option<bool> {
        self.lock()
            .channels
            .values()
            .find(|c| c.pin == pin)
            .map(|c| c.active)
    }

    /// Pins currently lit, in ascending order
    pub fn active_pins(&self) -> Vec<u8> {
        let mut pins: Vec<u8> = self
            .lock()
            .channels
            .values()
            .filter(|c| c.active)
            .map(|c| c.pin)
            .collect();
        pins.sort_unstable();
        pins
    }

    pub fn open_pins(&self) -> Vec<u8> {
        let mut pins: Vec<u8> = self.lock().channels.values().map(|c| c.pin).collect();
        pins.sort_unstable();
        pins
    }

    pub fn closed_pins(&self) -> Vec<u8> {
        self.lock().closed_pins.clone()
    }

    pub fn history(&self) -> Vec<PinEvent> {
        self.lock().history.clone()
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }
}

impl OutputBackend for MemoryBackend {
    fn backend(&self) -> BackendKind {
        BackendKind::Sim
    }

    fn open(&mut self, pin: u8) -> Result<ChannelHandle, OutputError> {
        let mut state = self.lock();
        if state.broken_pins.contains(&pin) {
            return Err(OutputError::Open {
                pin,
                reason: "simulated failure".to_string(),
            });
        }
        if state.channels.values().any(|c| c.pin == pin) {
            return Err(OutputError::Open {
                pin,
                reason: "already open".to_string(),
            });
        }

        let handle = ChannelHandle::new(state.next_handle);
        state.next_handle += 1;
        state.channels.insert(handle, Channel { pin, active: false });
        debug!("sim: opened pin {}", pin);
        Ok(handle)
    }

    fn set_active(&mut self, handle: ChannelHandle, active: bool) -> Result<(), OutputError> {
        let mut state = self.lock();
        let broken = active
            && state
                .channels
                .get(&handle)
                .is_some_and(|c| state.broken_writes.contains(&c.pin));
        let channel = state
            .channels
            .get_mut(&handle)
            .ok_or(OutputError::UnknownHandle(handle))?;
        let pin = channel.pin;
        if broken {
            return Err(OutputError::Write {
                pin,
                reason: "simulated failure".to_string(),
            });
        }
        if channel.active != active {
            debug!("sim: pin {} {}", pin, if active { "on" } else { "off" });
        }
        channel.active = active;
        state.history.push(PinEvent {
            at: Instant::now(),
            pin,
            active,
        });
        Ok(())
    }

    fn close(&mut self, handle: ChannelHandle) -> Result<(), OutputError> {
        let mut state = self.lock();
        let channel = state
            .channels
            .remove(&handle)
            .ok_or(OutputError::UnknownHandle(handle))?;
        state.closed_pins.push(channel.pin);
        debug!("sim: closed pin {}", channel.pin);
        Ok(())
    }
}
