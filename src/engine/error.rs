use thiserror::Error;

use crate::model::{OfficeId, Role, UserId};
use crate::ports::PortError;
use crate::store::StoreError;

/// A precondition that did not hold. The Display text is what callers see.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardFailure {
    #[error("Office {0} not found")]
    OfficeNotFound(OfficeId),

    #[error("User {user} does not have permission. Required roles: {}", role_list(.required))]
    MissingRole { user: UserId, required: Vec<Role> },

    #[error("User {user} is already a member of office {office}.")]
    AlreadyMember { user: UserId, office: OfficeId },

    #[error("User {user} is not a member of office {office}.")]
    NotMember { user: UserId, office: OfficeId },
}

impl GuardFailure {
    pub fn label(&self) -> &'static str {
        match self {
            GuardFailure::OfficeNotFound(_) => "office_exists",
            GuardFailure::MissingRole { .. } => "has_role",
            GuardFailure::AlreadyMember { .. } => "not_member",
            GuardFailure::NotMember { .. } => "is_member",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardFailure::OfficeNotFound(_) | GuardFailure::NotMember { .. } => ErrorKind::NotFound,
            GuardFailure::MissingRole { .. } => ErrorKind::Authorization,
            GuardFailure::AlreadyMember { .. } => ErrorKind::Conflict,
        }
    }
}

fn role_list(roles: &[Role]) -> String {
    roles.iter().map(Role::as_str).collect::<Vec<_>>().join(", ")
}

fn failure_list(failures: &[GuardFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Coarse classification of a [`ServiceError`], for the calling boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    Authorization,
    NotFound,
    Conflict,
    Store,
    Upstream,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    /// Missing, malformed or expired credentials.
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// One or more guards failed; every failure is reported.
    #[error("Failed to {action}: {}", failure_list(.failures))]
    Rejected {
        action: &'static str,
        failures: Vec<GuardFailure>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Port(#[from] PortError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            ServiceError::Authorization(_) => ErrorKind::Authorization,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            // Guards run office, role, membership: the first failure decides.
            ServiceError::Rejected { failures, .. } => failures
                .first()
                .map(GuardFailure::kind)
                .unwrap_or(ErrorKind::Authorization),
            ServiceError::Store(_) => ErrorKind::Store,
            ServiceError::Port(_) => ErrorKind::Upstream,
        }
    }

    /// Message safe to show outside the core. Backend failures are not echoed.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Store(_) => "storage unavailable".to_string(),
            ServiceError::Port(e) => format!("{} unavailable", e.service),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn rejected_joins_every_reason() {
        let office = Ulid::new();
        let user = Ulid::new();
        let err = ServiceError::Rejected {
            action: "add member",
            failures: vec![
                GuardFailure::OfficeNotFound(office),
                GuardFailure::MissingRole { user, required: Role::MANAGERS.to_vec() },
            ],
        };
        assert_eq!(
            err.to_string(),
            format!(
                "Failed to add member: Office {office} not found, User {user} does not have permission. Required roles: ADMIN, OWNER"
            )
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn store_errors_are_not_echoed() {
        let err = ServiceError::from(StoreError::Wal("disk on fire".into()));
        assert_eq!(err.kind(), ErrorKind::Store);
        assert_eq!(err.public_message(), "storage unavailable");
    }

    #[test]
    fn port_errors_name_the_service() {
        let err = ServiceError::from(PortError::new("email", "smtp timeout"));
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.public_message(), "email unavailable");
    }
}
