//! Fleet error types.

use serde::Serialize;
use thiserror::Error;

use crate::request::FleetRequestState;

/// Errors surfaced by fleet operations.
///
/// Every failing operation leaves fleet and instance state as it was
/// before the call.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("invalid value for {field}: {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("fleet request {id} is {state}, modifications require an active request")]
    IncorrectState { id: String, state: FleetRequestState },

    #[error("fleet request not found: {0}")]
    FleetRequestNotFound(String),

    #[error("launch template id not found: {0}")]
    LaunchTemplateIdNotFound(String),

    #[error("launch template name not found: {0}")]
    LaunchTemplateNameNotFound(String),

    #[error("launch template version {version} not found for {template}")]
    LaunchTemplateVersionNotFound { template: String, version: String },

    #[error("launch template already exists: {0}")]
    LaunchTemplateExists(String),

    #[error("invalid fleet configuration: {0}")]
    Configuration(String),

    #[error("state store error: {0}")]
    State(#[from] nimbus_state::StateError),
}

/// The class a [`FleetError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input; nothing was changed.
    Validation,
    /// A referenced resource does not exist.
    NotFound,
    /// The request cannot be satisfied as configured.
    Configuration,
    /// Backing store failure.
    Internal,
}

impl FleetError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        FleetError::InvalidParameter {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::InvalidParameter { .. }
            | FleetError::IncorrectState { .. }
            | FleetError::LaunchTemplateExists(_) => ErrorKind::Validation,
            FleetError::FleetRequestNotFound(_)
            | FleetError::LaunchTemplateIdNotFound(_)
            | FleetError::LaunchTemplateNameNotFound(_)
            | FleetError::LaunchTemplateVersionNotFound { .. } => ErrorKind::NotFound,
            FleetError::Configuration(_) => ErrorKind::Configuration,
            FleetError::State(_) => ErrorKind::Internal,
        }
    }

    /// Cloud-API style error code.
    pub fn code(&self) -> &'static str {
        match self {
            FleetError::InvalidParameter { .. } => "InvalidParameterValue",
            FleetError::IncorrectState { .. } => "IncorrectSpotFleetRequestState",
            FleetError::FleetRequestNotFound(_) => "InvalidSpotFleetRequestId.NotFound",
            FleetError::LaunchTemplateIdNotFound(_) => "InvalidLaunchTemplateId.NotFound",
            FleetError::LaunchTemplateNameNotFound(_) => "InvalidLaunchTemplateName.NotFoundException",
            FleetError::LaunchTemplateVersionNotFound { .. } => "InvalidLaunchTemplateId.VersionNotFound",
            FleetError::LaunchTemplateExists(_) => "InvalidLaunchTemplateName.AlreadyExistsException",
            FleetError::Configuration(_) => "InvalidSpotFleetRequestConfig",
            FleetError::State(_) => "InternalError",
        }
    }
}

pub type FleetResult<T> = Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy() {
        assert_eq!(FleetError::invalid("TargetCapacity", "negative").kind(), ErrorKind::Validation);
        assert_eq!(
            FleetError::FleetRequestNotFound("sfr-1".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            FleetError::LaunchTemplateNameNotFound("web".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(FleetError::Configuration("empty".into()).kind(), ErrorKind::Configuration);
        assert_eq!(
            FleetError::State(nimbus_state::StateError::Read("io".into())).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn codes() {
        assert_eq!(
            FleetError::FleetRequestNotFound("sfr-1".into()).code(),
            "InvalidSpotFleetRequestId.NotFound"
        );
        assert_eq!(
            FleetError::IncorrectState {
                id: "sfr-1".into(),
                state: FleetRequestState::CancelledRunning,
            }
            .code(),
            "IncorrectSpotFleetRequestState"
        );
    }

    #[test]
    fn messages() {
        let err = FleetError::invalid("TargetCapacity", "-1 is out of range");
        assert_eq!(err.to_string(), "invalid value for TargetCapacity: -1 is out of range");

        let err = FleetError::IncorrectState {
            id: "sfr-1".into(),
            state: FleetRequestState::CancelledRunning,
        };
        assert_eq!(
            err.to_string(),
            "fleet request sfr-1 is cancelled_running, modifications require an active request"
        );
    }
}
