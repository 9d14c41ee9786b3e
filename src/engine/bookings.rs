use std::time::Instant;

use tracing::{error, info, warn};

use crate::limits::{MAX_BOOKING_DESCRIPTION_LEN, MAX_BOOKING_NAME_LEN};
use crate::model::*;
use crate::observability::{record_operation, Operation, BOOKING_CONFLICTS_TOTAL};
use crate::response::ServiceResponse;
use crate::store::{from_item, to_item, Condition, Key, Query, StoreError, Update};

use super::{Engine, ServiceError, ELEMENT_INDEX};

const ALREADY_BOOKED: &str = "Element is already booked for this time range.";

fn validate_text(name: Option<&str>, description: Option<&str>) -> Result<(), ServiceError> {
    if let Some(name) = name {
        if name.trim().is_empty() {
            return Err(ServiceError::Validation("Booking name must not be empty.".into()));
        }
        if name.chars().count() > MAX_BOOKING_NAME_LEN {
            return Err(ServiceError::Validation(format!(
                "Booking name must be at most {MAX_BOOKING_NAME_LEN} characters."
            )));
        }
    }
    if let Some(description) = description
        && description.chars().count() > MAX_BOOKING_DESCRIPTION_LEN
    {
        return Err(ServiceError::Validation(format!(
            "Booking description must be at most {MAX_BOOKING_DESCRIPTION_LEN} characters."
        )));
    }
    Ok(())
}

fn not_found(id: BookingId) -> ServiceError {
    ServiceError::NotFound(format!("Booking with ID {id} not found."))
}

impl Engine {
    /// Create a booking once its window is slot-aligned and free.
    ///
    /// The availability check and the write are separate steps: two
    /// concurrent creates for overlapping windows can both succeed. The
    /// write itself only refuses an existing booking id.
    pub async fn create_booking(&self, booking: Booking) -> Result<Booking, ServiceError> {
        let started = Instant::now();
        let result = self.create_booking_inner(booking).await;
        record_operation(Operation::CreateBooking, started, &result);
        result
    }

    async fn create_booking_inner(&self, booking: Booking) -> Result<Booking, ServiceError> {
        validate_text(Some(&booking.booking_name), booking.description.as_deref())?;
        let window = self.check_window(booking.start_time, booking.end_time)?;

        if !self.find_conflicts(booking.element_id, &window, None).await?.is_empty() {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(ServiceError::Conflict(ALREADY_BOOKED.into()));
        }

        let item = to_item(&booking)?;
        match self.store.put(&self.tables().bookings, item, Some(Condition::NotExists)).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed { .. }) => {
                return Err(ServiceError::Conflict(format!(
                    "Booking with ID {} already exists.",
                    booking.booking_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "booking {} created on element {} [{}, {})",
            booking.booking_id, booking.element_id, booking.start_time, booking.end_time
        );
        Ok(booking)
    }

    /// Apply a partial update. A new window must name both bounds; it is
    /// checked against every other confirmed booking on the same element.
    pub async fn amend_booking(
        &self,
        booking_id: BookingId,
        changes: BookingUpdate,
    ) -> Result<Booking, ServiceError> {
        let started = Instant::now();
        let result = self.amend_booking_inner(booking_id, changes).await;
        record_operation(Operation::AmendBooking, started, &result);
        result
    }

    async fn amend_booking_inner(
        &self,
        booking_id: BookingId,
        changes: BookingUpdate,
    ) -> Result<Booking, ServiceError> {
        validate_text(changes.booking_name.as_deref(), changes.description.as_deref())?;

        let mut update = Update::new();
        match (changes.start_time, changes.end_time) {
            (Some(start), Some(end)) => {
                let window = self.check_window(start, end)?;
                let current = self.get_booking_by_id(booking_id).await?;
                let conflicts =
                    self.find_conflicts(current.element_id, &window, Some(booking_id)).await?;
                if !conflicts.is_empty() {
                    metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
                    return Err(ServiceError::Conflict(ALREADY_BOOKED.into()));
                }
                update = update.set("startTime", start).set("endTime", end);
            }
            (None, None) => {}
            _ => {
                return Err(ServiceError::Validation(
                    "Start and end times must be amended together.".into(),
                ));
            }
        }
        if let Some(name) = changes.booking_name {
            update = update.set("bookingName", name);
        }
        if let Some(description) = changes.description {
            update = update.set("description", description);
        }
        if update.is_empty() {
            return Err(ServiceError::Validation("No changes supplied.".into()));
        }

        let key = Key::new(booking_id.to_string());
        let item = match self
            .store
            .update(&self.tables().bookings, &key, update, Some(Condition::Exists))
            .await
        {
            Ok(item) => item,
            Err(StoreError::ConditionFailed { .. }) => return Err(not_found(booking_id)),
            Err(e) => return Err(e.into()),
        };

        info!("booking {booking_id} amended");
        Ok(from_item(item)?)
    }

    /// Delete a booking. Never fails: a missing booking or a store error
    /// becomes an unsuccessful response.
    pub async fn delete_booking(&self, booking_id: BookingId) -> ServiceResponse {
        let started = Instant::now();
        let key = Key::new(booking_id.to_string());
        let result = self
            .store
            .delete(&self.tables().bookings, &key, Some(Condition::Exists))
            .await;
        record_operation(Operation::DeleteBooking, started, &result);

        match result {
            Ok(_) => {
                info!("booking {booking_id} deleted");
                ServiceResponse::ok("Booking deleted.")
            }
            Err(e) => {
                error!("error deleting booking {booking_id}: {e}");
                ServiceResponse::failure("Failed to delete booking.")
            }
        }
    }

    pub async fn get_booking_by_id(&self, booking_id: BookingId) -> Result<Booking, ServiceError> {
        let started = Instant::now();
        let result = self.get_booking_inner(booking_id).await;
        record_operation(Operation::GetBooking, started, &result);
        result
    }

    async fn get_booking_inner(&self, booking_id: BookingId) -> Result<Booking, ServiceError> {
        let items = self
            .store
            .query(&self.tables().bookings, &Query::partition(booking_id.to_string()))
            .await?;
        if items.len() > 1 {
            warn!("multiple bookings found for ID {booking_id}; returning the first one");
        }
        let Some(item) = items.into_iter().next() else {
            return Err(not_found(booking_id));
        };
        from_item(item).map_err(|e| {
            error!("failed to parse booking {booking_id}: {e}");
            ServiceError::from(e)
        })
    }

    /// Every booking on `element`, in start-time order.
    pub async fn list_element_bookings(
        &self,
        element: ElementId,
    ) -> Result<Vec<Booking>, ServiceError> {
        let query = Query::partition(element.to_string()).index(ELEMENT_INDEX);
        let items = self.store.query(&self.tables().bookings, &query).await?;
        Ok(items.into_iter().map(from_item).collect::<Result<_, _>>()?)
    }
}
