mod attendees;
mod bookings;
mod conflict;
mod error;
mod guard;
mod membership;
mod offices;

pub use conflict::is_quantized;
pub use error::{ErrorKind, GuardFailure, ServiceError};
pub use guard::{all_pass, Check};

use std::sync::Arc;

use crate::config::{Config, Tables};
use crate::model::*;
use crate::ports::ObjectStore;
use crate::store::{IndexSchema, Store, StoreError, TableSchema};

/// Bookings by resource, ordered by start time.
pub const ELEMENT_INDEX: &str = "ElementIndex";

/// Users by e-mail address.
pub const EMAIL_INDEX: &str = "EmailIndex";

/// Schemas of the five tables, keyed the way the engine addresses them.
///
/// The membership and attendee tables hold two records per relation:
/// `USER#<user>` / `<other id>` and `OFFICE#<office>` (or `BOOKING#<booking>`) / `<user>`.
pub fn table_schemas(tables: &Tables) -> Vec<TableSchema> {
    vec![
        TableSchema::new(&tables.users, "id").with_index(IndexSchema::new(EMAIL_INDEX, "email")),
        TableSchema::new(&tables.offices, "id"),
        TableSchema::new(&tables.memberships, "pk").with_sort_key("sk"),
        TableSchema::new(&tables.bookings, "bookingId")
            .with_index(IndexSchema::new(ELEMENT_INDEX, "elementId").with_sort_key("startTime")),
        TableSchema::new(&tables.attendees, "pk").with_sort_key("sk"),
    ]
}

pub(crate) fn user_partition(user: UserId) -> String {
    format!("USER#{user}")
}

pub(crate) fn office_partition(office: OfficeId) -> String {
    format!("OFFICE#{office}")
}

pub(crate) fn booking_partition(booking: BookingId) -> String {
    format!("BOOKING#{booking}")
}

/// Id stored as a sort key.
pub(crate) fn parse_id(raw: &str) -> Result<ulid::Ulid, StoreError> {
    ulid::Ulid::from_string(raw).map_err(|e| StoreError::Codec(format!("bad id {raw:?}: {e}")))
}

/// Shared handle to the booking and membership core. Cheap to share behind
/// an `Arc`; holds no per-request state.
pub struct Engine {
    store: Arc<dyn Store>,
    objects: Arc<dyn ObjectStore>,
    config: Config,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, objects: Arc<dyn ObjectStore>, config: Config) -> Self {
        Self { store, objects, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn tables(&self) -> &Tables {
        &self.config.tables
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("config", &self.config).finish_non_exhaustive()
    }
}
