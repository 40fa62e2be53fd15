//! Platform-specific socket implementations.

#[cfg(unix)]
pub mod unix;

use crate::SourceSinkHandle;
use multitrace_core::TracerouteError;

/// Creates a Source and Sink appropriate for the current platform.
pub async fn new_source_sink() -> Result<SourceSinkHandle, TracerouteError> {
    #[cfg(unix)]
    return unix::new_source_sink().await;

    #[cfg(not(unix))]
    return Err(TracerouteError::Internal(
        "Unsupported platform".to_string(),
    ));
}
