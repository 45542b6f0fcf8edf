use core::error::Error;
use std::time::Duration;

/// Fatal outcomes of a health-check run.
///
/// Anything recoverable is surfaced as a report anomaly instead.
#[derive(Debug, derive_more::Display)]
pub enum HealthCheckError {
    #[display("No response from the cluster within {}s", timeout.as_secs_f64())]
    CollectionTimeout { timeout: Duration },
    #[display("Cluster rejected credentials: {message}")]
    AuthError { message: String },
    #[display("Failed to create Kubernetes client: {message}")]
    ClientSetup { message: String },
    #[display("Failed to initialize GPU probe: {message}")]
    ProbeSetup { message: String },
    #[display("Failed to render report: {message}")]
    Render { message: String },
}

impl Error for HealthCheckError {}

impl HealthCheckError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            HealthCheckError::CollectionTimeout { .. } => ExitCode::CollectionTimeout,
            HealthCheckError::AuthError { .. } => ExitCode::AuthError,
            HealthCheckError::ClientSetup { .. }
            | HealthCheckError::ProbeSetup { .. }
            | HealthCheckError::Render { .. } => ExitCode::Failure,
        }
    }
}

/// Process exit codes, stable for scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Healthy = 0,
    AnomaliesDetected = 1,
    CollectionTimeout = 2,
    AuthError = 3,
    Failure = 4,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn fatal_errors_have_distinct_exit_codes() {
        let timeout = HealthCheckError::CollectionTimeout {
            timeout: Duration::from_secs(30),
        };
        let auth = HealthCheckError::AuthError {
            message: "401".to_string(),
        };
        assert_eq!(timeout.exit_code() as u8, 2);
        assert_eq!(auth.exit_code() as u8, 3);
        assert_ne!(timeout.exit_code(), ExitCode::AnomaliesDetected);
    }

    #[test]
    fn timeout_message_mentions_deadline() {
        let err = HealthCheckError::CollectionTimeout {
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "No response from the cluster within 1.5s");
    }
}
