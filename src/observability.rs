use std::time::Instant;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations executed. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "desky_operations_total";

/// Histogram: engine operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "desky_operation_duration_seconds";

/// Counter: booking writes rejected because the window was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "desky_booking_conflicts_total";

/// Counter: individual guard failures. Labels: guard.
pub const GUARD_REJECTIONS_TOTAL: &str = "desky_guard_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "desky_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (mutations per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "desky_wal_flush_batch_size";

/// Engine operations, as metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateBooking,
    AmendBooking,
    DeleteBooking,
    GetBooking,
    CreateAttendee,
    UpdateAttendeeStatus,
    CreateMembership,
    AddMember,
    RemoveMember,
    CreateOffice,
    Register,
    VerifyEmail,
    Login,
    Authenticate,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Operation::CreateBooking => "create_booking",
            Operation::AmendBooking => "amend_booking",
            Operation::DeleteBooking => "delete_booking",
            Operation::GetBooking => "get_booking",
            Operation::CreateAttendee => "create_attendee",
            Operation::UpdateAttendeeStatus => "update_attendee_status",
            Operation::CreateMembership => "create_membership",
            Operation::AddMember => "add_member",
            Operation::RemoveMember => "remove_member",
            Operation::CreateOffice => "create_office",
            Operation::Register => "register",
            Operation::VerifyEmail => "verify_email",
            Operation::Login => "login",
            Operation::Authenticate => "authenticate",
        }
    }
}

/// Record count and latency for one finished operation.
pub fn record_operation<T, E>(op: Operation, started: Instant, result: &Result<T, E>) {
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(OPERATIONS_TOTAL, "operation" => op.label(), "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => op.label())
        .record(started.elapsed().as_secs_f64());
}
