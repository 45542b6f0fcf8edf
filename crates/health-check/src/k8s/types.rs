use core::error::Error;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Kubernetes API rejected the request: {message}")]
    Unauthorized { message: String },
    #[display("Kubernetes API request failed: {message}")]
    RequestFailed { message: String },
    #[display("Invalid {resource} resource: {message}")]
    InvalidResource { resource: String, message: String },
}

impl Error for KubernetesError {}

impl KubernetesError {
    /// Maps a client error onto the taxonomy, splitting out credential problems.
    pub fn classify(err: &kube::Error, action: &str) -> Self {
        match err {
            kube::Error::Api(response) if matches!(response.code, 401 | 403) => {
                KubernetesError::Unauthorized {
                    message: format!("{action}: {} ({})", response.message, response.code),
                }
            }
            kube::Error::Auth(auth) => KubernetesError::Unauthorized {
                message: format!("{action}: {auth}"),
            },
            other => KubernetesError::RequestFailed {
                message: format!("{action}: {other}"),
            },
        }
    }

    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, KubernetesError::Unauthorized { .. })
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;

    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "nodes is forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code,
        })
    }

    #[test]
    fn forbidden_and_unauthorized_are_auth_failures() {
        assert!(KubernetesError::classify(&api_error(401), "list nodes").is_unauthorized());
        assert!(KubernetesError::classify(&api_error(403), "list nodes").is_unauthorized());
    }

    #[test]
    fn server_errors_are_request_failures() {
        let err = KubernetesError::classify(&api_error(500), "list nodes");
        assert!(!err.is_unauthorized());
        assert!(err.to_string().contains("list nodes"));
    }
}
