//! Build status -> lamp state machine

use std::time::Duration;
use tracing::{debug, warn};

use super::{create_backend, ChannelHandle, OutputBackend, OutputError};
use crate::app::config::IndicatorConfig;
use crate::status::BuildStatus;

/// Error flash: red+yellow on, hold, all off, hold; repeated
pub const FLASH_CYCLES: u32 = 3;
pub const FLASH_HOLD: Duration = Duration::from_millis(500);

/// Dwell time per lamp during the start-up lamp test
pub const LAMP_TEST_STEP: Duration = Duration::from_millis(100);

/// 信号灯のランプ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lamp {
    Green,
    Yellow,
    Red,
}

impl Lamp {
    pub const ALL: [Lamp; 3] = [Lamp::Green, Lamp::Yellow, Lamp::Red];

    fn index(self) -> usize {
        match self {
            Lamp::Green => 0,
            Lamp::Yellow => 1,
            Lamp::Red => 2,
        }
    }

    /// Green -> Yellow -> Red -> Green
    pub fn next(self) -> Lamp {
        match self {
            Lamp::Green => Lamp::Yellow,
            Lamp::Yellow => Lamp::Red,
            Lamp::Red => Lamp::Green,
        }
    }
}

/// Pin assigned to each lamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPins {
    pub green: u8,
    pub yellow: u8,
    pub red: u8,
}

impl ChannelPins {
    pub fn pin(&self, lamp: Lamp) -> u8 {
        match lamp {
            Lamp::Green => self.green,
            Lamp::Yellow => self.yellow,
            Lamp::Red => self.red,
        }
    }
}

impl From<&IndicatorConfig> for ChannelPins {
    fn from(config: &IndicatorConfig) -> Self {
        Self {
            green: config.green_pin,
            yellow: config.yellow_pin,
            red: config.red_pin,
        }
    }
}

/// Owns the three lamp channels and renders a [`BuildStatus`] on them
///
/// Outside of the error flash at most one lamp is lit, and it is the lamp of
/// the current status. The flash lights red and yellow together; that is the
/// only time two lamps are on at once.
pub struct IndicatorController {
    backend: Box<dyn OutputBackend>,
    pins: ChannelPins,
    /// Indexed by [`Lamp::index`]; `None` once released
    handles: [Option<ChannelHandle>; 3],
    status: BuildStatus,
}

impl IndicatorController {
    /// Claim all three channels and switch them off
    ///
    /// `initial` is recorded but not rendered; the first `set_status` call
    /// draws the light. If any channel cannot be opened, the ones already
    /// claimed are released again.
    pub fn new(
        mut backend: Box<dyn OutputBackend>,
        pins: ChannelPins,
        initial: BuildStatus,
    ) -> Result<Self, OutputError> {
        let mut handles = [None; 3];
        for lamp in Lamp::ALL {
            match backend.open(pins.pin(lamp)) {
                Ok(handle) => handles[lamp.index()] = Some(handle),
                Err(e) => {
                    for handle in handles.iter_mut().filter_map(Option::take) {
                        let _ = backend.set_active(handle, false);
                        let _ = backend.close(handle);
                    }
                    return Err(e);
                }
            }
        }

        let mut controller = Self {
            backend,
            pins,
            handles,
            status: initial,
        };
        // Outputs may power up lit
        controller.switch_all_off()?;
        debug!(
            "Indicator ready ({:?}, green={}, yellow={}, red={})",
            controller.backend.backend(),
            pins.green,
            pins.yellow,
            pins.red
        );
        Ok(controller)
    }

    /// Build the configured backend and claim its channels
    pub fn from_config(config: &IndicatorConfig) -> Result<Self, OutputError> {
        let backend = create_backend(config)?;
        Self::new(backend, ChannelPins::from(config), config.initial_status)
    }

    /// Last status passed to `set_status` (or the initial one)
    pub fn status(&self) -> BuildStatus {
        self.status
    }

    /// Render `status`
    ///
    /// Every call starts from all lamps off. `Error` runs the full flash
    /// sequence each time, even when the previous status was also `Error`,
    /// and returns with all lamps off.
    pub async fn set_status(&mut self, status: BuildStatus) -> Result<(), OutputError> {
        self.status = status;
        self.switch_all_off()?;
        match status {
            BuildStatus::Good => self.switch(Lamp::Green, true),
            BuildStatus::Unknown => self.switch(Lamp::Yellow, true),
            BuildStatus::Bad => self.switch(Lamp::Red, true),
            BuildStatus::Error => self.flash().await,
        }
    }

    async fn flash(&mut self) -> Result<(), OutputError> {
        for _ in 0..FLASH_CYCLES {
            self.switch(Lamp::Red, true)?;
            self.switch(Lamp::Yellow, true)?;
            tokio::time::sleep(FLASH_HOLD).await;
            self.switch_all_off()?;
            tokio::time::sleep(FLASH_HOLD).await;
        }
        Ok(())
    }

    /// Walk a single lit lamp green -> yellow -> red for `rounds` rounds,
    /// ending with all lamps off
    pub async fn lamp_test(&mut self, rounds: usize) -> Result<(), OutputError> {
        let mut lamp = Lamp::Green;
        for _ in 0..rounds * Lamp::ALL.len() {
            self.switch_all_off()?;
            self.switch(lamp, true)?;
            tokio::time::sleep(LAMP_TEST_STEP).await;
            lamp = lamp.next();
        }
        self.switch_all_off()
    }

    fn switch(&mut self, lamp: Lamp, active: bool) -> Result<(), OutputError> {
        match self.handles[lamp.index()] {
            Some(handle) => self.backend.set_active(handle, active),
            None => Err(OutputError::Unavailable(format!(
                "{:?} lamp (pin {}) already released",
                lamp,
                self.pins.pin(lamp)
            ))),
        }
    }

    fn switch_all_off(&mut self) -> Result<(), OutputError> {
        for lamp in Lamp::ALL {
            self.switch(lamp, false)?;
        }
        Ok(())
    }

    /// Switch every lamp off, trying all of them even if one fails
    ///
    /// The logical status is left untouched.
    pub fn switch_off(&mut self) -> Result<(), OutputError> {
        let mut first_error = None;
        for lamp in Lamp::ALL {
            if let Err(e) = self.switch(lamp, false) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Switch everything off and release the channels
    ///
    /// Idempotent. Every channel is attempted even if an earlier one fails;
    /// the first error is returned. Also runs on drop.
    pub fn shutdown(&mut self) -> Result<(), OutputError> {
        let mut first_error = None;
        for lamp in Lamp::ALL {
            let Some(handle) = self.handles[lamp.index()].take() else {
                continue;
            };
            let result = self
                .backend
                .set_active(handle, false)
                .and_then(|_| self.backend.close(handle));
            if let Err(e) = result {
                warn!("Failed to release {:?} lamp: {}", lamp, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_released(&self) -> bool {
        self.handles.iter().all(Option::is_none)
    }
}

impl Drop for IndicatorController {
    fn drop(&mut self) {
        if !self.is_released() {
            let _ = self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::MemoryBackend;
    use tokio::time::Instant;

    const PINS: ChannelPins = ChannelPins {
        green: 22,
        yellow: 27,
        red: 17,
    };

    fn controller() -> (IndicatorController, MemoryBackend) {
        let lamps = MemoryBackend::new();
        let controller =
            IndicatorController::new(Box::new(lamps.clone()), PINS, BuildStatus::Unknown).unwrap();
        (controller, lamps)
    }

    #[test]
    fn test_new_switches_all_off_without_rendering() {
        let (controller, lamps) = controller();
        assert_eq!(lamps.open_pins(), vec![17, 22, 27]);
        assert!(lamps.active_pins().is_empty());
        assert_eq!(lamps.history().len(), 3);
        assert!(lamps.history().iter().all(|e| !e.active));
        assert_eq!(controller.status(), BuildStatus::Unknown);
    }

    #[test]
    fn test_new_releases_channels_when_a_pin_fails() {
        let lamps = MemoryBackend::new().with_broken_pin(PINS.red);
        let result = IndicatorController::new(Box::new(lamps.clone()), PINS, BuildStatus::Unknown);

        assert!(matches!(result, Err(OutputError::Open { pin: 17, .. })));
        assert!(lamps.open_pins().is_empty());
        assert_eq!(lamps.closed_pins(), vec![22, 27]);
    }

    #[tokio::test]
    async fn test_single_lamp_per_status() {
        let (mut controller, lamps) = controller();
        let cases = [
            (BuildStatus::Good, PINS.green),
            (BuildStatus::Bad, PINS.red),
            (BuildStatus::Unknown, PINS.yellow),
            (BuildStatus::Good, PINS.green),
        ];
        for (status, pin) in cases {
            controller.set_status(status).await.unwrap();
            assert_eq!(lamps.active_pins(), vec![pin], "status {status}");
            assert_eq!(controller.status(), status);
        }
    }

    #[tokio::test]
    async fn test_transition_switches_everything_off_first() {
        let (mut controller, lamps) = controller();
        controller.set_status(BuildStatus::Bad).await.unwrap();
        lamps.clear_history();

        controller.set_status(BuildStatus::Good).await.unwrap();
        let events: Vec<(u8, bool)> = lamps.history().iter().map(|e| (e.pin, e.active)).collect();
        assert_eq!(
            events,
            vec![(22, false), (27, false), (17, false), (22, true)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_flashes_three_times_and_ends_dark() {
        let (mut controller, lamps) = controller();
        controller.set_status(BuildStatus::Good).await.unwrap();
        lamps.clear_history();

        let start = Instant::now();
        controller.set_status(BuildStatus::Error).await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert!(lamps.active_pins().is_empty());
        assert_eq!(controller.status(), BuildStatus::Error);

        let history = lamps.history();
        let red_on: Vec<Instant> = history
            .iter()
            .filter(|e| e.pin == PINS.red && e.active)
            .map(|e| e.at)
            .collect();
        let yellow_on = history
            .iter()
            .filter(|e| e.pin == PINS.yellow && e.active)
            .count();
        assert_eq!(red_on.len(), FLASH_CYCLES as usize);
        assert_eq!(yellow_on, FLASH_CYCLES as usize);
        assert!(history.iter().all(|e| e.pin != PINS.green || !e.active));

        for (i, at) in red_on.iter().enumerate() {
            assert_eq!(*at - start, Duration::from_secs(i as u64));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_repeats_full_animation() {
        let (mut controller, lamps) = controller();
        controller.set_status(BuildStatus::Error).await.unwrap();
        lamps.clear_history();

        let start = Instant::now();
        controller.set_status(BuildStatus::Error).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        let red_on = lamps
            .history()
            .iter()
            .filter(|e| e.pin == PINS.red && e.active)
            .count();
        assert_eq!(red_on, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lamp_test_sweeps_and_ends_dark() {
        let (mut controller, lamps) = controller();
        lamps.clear_history();

        controller.lamp_test(2).await.unwrap();

        let lit: Vec<u8> = lamps
            .history()
            .iter()
            .filter(|e| e.active)
            .map(|e| e.pin)
            .collect();
        assert_eq!(lit, vec![22, 27, 17, 22, 27, 17]);
        assert!(lamps.active_pins().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_switches_off_and_releases() {
        let (mut controller, lamps) = controller();
        controller.set_status(BuildStatus::Bad).await.unwrap();

        controller.shutdown().unwrap();
        assert!(lamps.open_pins().is_empty());
        assert_eq!(lamps.closed_pins(), vec![22, 27, 17]);
        assert!(controller.is_released());

        // Idempotent
        controller.shutdown().unwrap();
        assert_eq!(lamps.closed_pins().len(), 3);
        assert!(controller.set_status(BuildStatus::Good).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_releases_channels() {
        let (mut controller, lamps) = controller();
        controller.set_status(BuildStatus::Good).await.unwrap();
        drop(controller);

        assert!(lamps.open_pins().is_empty());
        assert_eq!(lamps.closed_pins().len(), 3);
        assert!(lamps.history().last().map(|e| !e.active).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_switch_off_keeps_status() {
        let (mut controller, lamps) = controller();
        controller.set_status(BuildStatus::Bad).await.unwrap();

        controller.switch_off().unwrap();
        assert!(lamps.active_pins().is_empty());
        assert_eq!(controller.status(), BuildStatus::Bad);
    }

    #[test]
    fn test_lamp_rotation() {
        let mut lamp = Lamp::Green;
        for _ in 0..3 {
            lamp = lamp.next();
        }
        assert_eq!(lamp, Lamp::Green);
    }
}
