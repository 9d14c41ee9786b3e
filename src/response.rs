use serde::Serialize;

use crate::engine::ServiceError;

/// Outcome handed to the request boundary: a success flag and a message fit
/// for the end user. Raw store errors never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceResponse {
    pub success: bool,
    pub message: String,
}

impl ServiceResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }

    /// Collapse an operation result, using `success_message` when it succeeded.
    pub fn from_result<T>(result: Result<T, ServiceError>, success_message: &str) -> Self {
        match result {
            Ok(_) => Self::ok(success_message),
            Err(e) => Self::from(e),
        }
    }
}

impl From<ServiceError> for ServiceResponse {
    fn from(err: ServiceError) -> Self {
        Self::failure(err.public_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn success_uses_given_message() {
        let r = ServiceResponse::from_result(Ok::<_, ServiceError>(()), "Booking created.");
        assert_eq!(r, ServiceResponse::ok("Booking created."));
    }

    #[test]
    fn failures_carry_the_error_text() {
        let r = ServiceResponse::from_result::<()>(
            Err(ServiceError::Conflict("Element is already booked for this time range.".into())),
            "Booking created.",
        );
        assert!(!r.success);
        assert_eq!(r.message, "Element is already booked for this time range.");
    }

    #[test]
    fn store_errors_are_masked() {
        let r = ServiceResponse::from(ServiceError::Store(StoreError::UnknownTable("x".into())));
        assert_eq!(r, ServiceResponse::failure("storage unavailable"));
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            serde_json::json!({ "success": false, "message": "storage unavailable" })
        );
    }
}
