mod automation;
mod error;
mod human;
mod metrics;
mod page;
mod retry;
mod session;
mod telemetry;

pub use automation::{BrowserAutomation, BrowserContext, BrowserLauncher, LaunchOverrides};
pub use error::{BrowserError, BrowserResult};
pub use human::{CancelSignal, ScrollPacer};
pub use metrics::BrowserMetrics;
pub use page::{BrowserProfilePage, DomContainer, ElementContainer, ProfilePage};
pub use retry::RetryPolicy;
pub(crate) use retry::longest_backoff_ms;
pub use session::{
    verify_logged_in, ContextOptions, FileSessionProvisioner, SessionProvisioner, StorageState,
    StoredCookie, DEFAULT_SESSION_PATH, LOGGED_IN_MARKER,
};
pub use telemetry::{
    telemetry_failure, AutomationTelemetry, ErrorCategorizer, FailureCategory, FailureContext,
    RemediationAction, RunContext, TelemetryError,
};
