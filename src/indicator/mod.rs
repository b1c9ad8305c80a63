//! Traffic light output
//!
//! [`IndicatorController`] maps a [`BuildStatus`](crate::status::BuildStatus)
//! onto three lamps. The lamps themselves sit behind [`OutputBackend`] so the
//! Raspberry Pi GPIO driver and the in-memory simulator are interchangeable.

pub mod controller;
#[cfg(target_os = "linux")]
pub mod gpio;
pub mod memory;

use thiserror::Error;

use crate::app::config::{BackendKind, IndicatorConfig};

pub use controller::{ChannelPins, IndicatorController, Lamp};
pub use memory::MemoryBackend;

/// Opaque handle for an opened output channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(u32);

impl ChannelHandle {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

/// 出力ハードウェアのエラー
#[derive(Error, Debug)]
pub enum OutputError {
    /// The output device itself cannot be used
    #[error("output hardware unavailable: {0}")]
    Unavailable(String),

    /// A single pin could not be claimed
    #[error("failed to open pin {pin}: {reason}")]
    Open { pin: u8, reason: String },

    /// Handle was never opened or already closed
    #[error("unknown channel handle {}", .0.id())]
    UnknownHandle(ChannelHandle),

    #[error("failed to drive pin {pin}: {reason}")]
    Write { pin: u8, reason: String },
}

/// 出力バックエンドの共通インターフェース
///
/// One channel per lamp. `set_active(handle, true)` means "lamp lit"; any
/// electrical inversion is the backend's business.
pub trait OutputBackend: Send {
    /// バックエンドの種類を返す
    fn backend(&self) -> BackendKind;

    /// 指定ピンを出力チャネルとして確保
    fn open(&mut self, pin: u8) -> Result<ChannelHandle, OutputError>;

    /// チャネルの点灯/消灯
    fn set_active(&mut self, handle: ChannelHandle, active: bool) -> Result<(), OutputError>;

    /// チャネルを解放
    fn close(&mut self, handle: ChannelHandle) -> Result<(), OutputError>;
}

/// 設定から出力バックエンドを生成
pub fn create_backend(config: &IndicatorConfig) -> Result<Box<dyn OutputBackend>, OutputError> {
    match config.backend {
        BackendKind::Sim => Ok(Box::new(MemoryBackend::new())),
        #[cfg(target_os = "linux")]
        BackendKind::Gpio => Ok(Box::new(gpio::GpioBackend::new(config.active_low)?)),
        #[cfg(not(target_os = "linux"))]
        BackendKind::Gpio => Err(OutputError::Unavailable(
            "GPIO backend is only supported on Linux".to_string(),
        )),
    }
}
