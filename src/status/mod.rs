//! Build status model and the source that produces it
//!
//! The provider's raw vocabulary is translated into [`BuildStatus`] here so
//! that nothing downstream needs to know about the CI provider's wire format.

pub mod circleci;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use circleci::{CircleCiSource, FetchError};

/// Status shown on the traffic light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Latest build passed
    Good,
    /// Provider reported an indeterminate result (cancelled, not run, running...)
    #[default]
    Unknown,
    /// Latest build failed
    Bad,
    /// Status could not be determined (network, HTTP or parse failure)
    Error,
}

impl BuildStatus {
    /// Translate the provider's raw build status
    ///
    /// - "success", "fixed" -> Good
    /// - "failed" -> Bad
    /// - "cancelled", "not_run" and anything else -> Unknown
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "success" | "fixed" => BuildStatus::Good,
            "failed" => BuildStatus::Bad,
            "cancelled" | "not_run" => BuildStatus::Unknown,
            _ => BuildStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Good => "good",
            BuildStatus::Unknown => "unknown",
            BuildStatus::Bad => "bad",
            BuildStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can report the latest build status
///
/// Failures are returned, never swallowed: the poll loop decides how an
/// undeterminable status is displayed.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self) -> Result<BuildStatus, FetchError>;
}
