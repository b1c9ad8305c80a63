//! Raspberry Pi GPIO backend (BCM pin numbering)

use rppal::gpio::{Gpio, OutputPin};
use std::collections::HashMap;
use tracing::debug;

use super::{ChannelHandle, OutputBackend, OutputError};
use crate::app::config::BackendKind;

pub struct GpioBackend {
    gpio: Gpio,
    active_low: bool,
    pins: HashMap<ChannelHandle, OutputPin>,
    next_handle: u32,
}

impl GpioBackend {
    pub fn new(active_low: bool) -> Result<Self, OutputError> {
        let gpio = Gpio::new().map_err(|e| OutputError::Unavailable(e.to_string()))?;
        Ok(Self {
            gpio,
            active_low,
            pins: HashMap::new(),
            next_handle: 0,
        })
    }
}

fn drive(pin: &mut OutputPin, active: bool, active_low: bool) {
    // active XOR active_low -> high
    if active != active_low {
        pin.set_high();
    } else {
        pin.set_low();
    }
}

impl OutputBackend for GpioBackend {
    fn backend(&self) -> BackendKind {
        BackendKind::Gpio
    }

    fn open(&mut self, pin: u8) -> Result<ChannelHandle, OutputError> {
        let raw = self.gpio.get(pin).map_err(|e| OutputError::Open {
            pin,
            reason: e.to_string(),
        })?;

        // Start at the inactive level so the lamp never flickers on
        let output = if self.active_low {
            raw.into_output_high()
        } else {
            raw.into_output_low()
        };

        let handle = ChannelHandle::new(self.next_handle);
        self.next_handle += 1;
        self.pins.insert(handle, output);
        debug!("gpio: opened BCM {}", pin);
        Ok(handle)
    }

    fn set_active(&mut self, handle: ChannelHandle, active: bool) -> Result<(), OutputError> {
        let pin = self
            .pins
            .get_mut(&handle)
            .ok_or(OutputError::UnknownHandle(handle))?;
        drive(pin, active, self.active_low);
        Ok(())
    }

    fn close(&mut self, handle: ChannelHandle) -> Result<(), OutputError> {
        let mut pin = self
            .pins
            .remove(&handle)
            .ok_or(OutputError::UnknownHandle(handle))?;
        drive(&mut pin, false, self.active_low);
        debug!("gpio: released BCM {}", pin.pin());
        // Dropping the pin restores its original mode
        drop(pin);
        Ok(())
    }
}
