use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::model::*;
use crate::observability::{record_operation, Operation};
use crate::store::{from_item, to_item, Condition, Key, Query, StoreError, Update, WriteOp};

use super::{booking_partition, parse_id, user_partition, Engine, ServiceError};

/// One half of an attendee relation as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttendeeRecord {
    pk: String,
    sk: String,
    #[serde(default)]
    status: AttendeeStatus,
}

impl Engine {
    /// Attach `user` to `booking`. The booking must exist and the pair must be
    /// new; both relation records are written in one transaction.
    pub async fn create_booking_attendee(
        &self,
        booking: BookingId,
        user: UserId,
        status: AttendeeStatus,
    ) -> Result<BookingAttendee, ServiceError> {
        let started = Instant::now();
        let result = self.create_attendee_inner(booking, user, status).await;
        record_operation(Operation::CreateAttendee, started, &result);
        result
    }

    async fn create_attendee_inner(
        &self,
        booking: BookingId,
        user: UserId,
        status: AttendeeStatus,
    ) -> Result<BookingAttendee, ServiceError> {
        let tables = self.tables();

        let booking_key = Key::new(booking.to_string());
        if self.peek(&tables.bookings, &booking_key).await.is_none() {
            return Err(ServiceError::NotFound("Booking does not exist.".into()));
        }
        let user_key = Key::composite(user_partition(user), booking.to_string());
        if self.peek(&tables.attendees, &user_key).await.is_some() {
            return Err(ServiceError::Conflict(
                "User is already an attendee for this booking.".into(),
            ));
        }

        let by_user = AttendeeRecord { pk: user_partition(user), sk: booking.to_string(), status };
        let by_booking =
            AttendeeRecord { pk: booking_partition(booking), sk: user.to_string(), status };
        let ops = vec![
            WriteOp::Put {
                table: tables.attendees.clone(),
                item: to_item(&by_user)?,
                condition: Some(Condition::NotExists),
            },
            WriteOp::Put {
                table: tables.attendees.clone(),
                item: to_item(&by_booking)?,
                condition: Some(Condition::NotExists),
            },
        ];
        match self.store.transact_write(ops).await {
            Ok(()) => {
                info!("user {user} attends booking {booking}");
                Ok(BookingAttendee { booking_id: booking, user_id: user, status })
            }
            Err(e @ StoreError::TransactionCanceled { .. }) => {
                error!("failed to create booking attendee: {e}");
                Err(ServiceError::Conflict(
                    "Attendee already exists or conflict occurred.".into(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Change an attendee's status on the user-keyed record only. The
    /// booking-keyed record keeps the status it was created with.
    pub async fn update_attendee_status(
        &self,
        booking: BookingId,
        user: UserId,
        status: AttendeeStatus,
    ) -> Result<(), ServiceError> {
        let started = Instant::now();
        let key = Key::composite(user_partition(user), booking.to_string());
        let update = Update::new().set("status", status.as_str());
        let result = match self
            .store
            .update(&self.tables().attendees, &key, update, Some(Condition::Exists))
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::ConditionFailed { .. }) => Err(ServiceError::NotFound(format!(
                "User {user} is not an attendee of booking {booking}."
            ))),
            Err(e) => Err(e.into()),
        };
        record_operation(Operation::UpdateAttendeeStatus, started, &result);
        result
    }

    /// Attendees of `booking`, from the booking-keyed records. No attendees is NotFound.
    pub async fn get_booking_attendees(
        &self,
        booking: BookingId,
    ) -> Result<Vec<BookingAttendee>, ServiceError> {
        let items = self
            .store
            .query(&self.tables().attendees, &Query::partition(booking_partition(booking)))
            .await?;
        if items.is_empty() {
            return Err(ServiceError::NotFound(format!("No attendees for booking {booking}.")));
        }
        items
            .into_iter()
            .map(|item| -> Result<BookingAttendee, ServiceError> {
                let record: AttendeeRecord = from_item(item)?;
                Ok(BookingAttendee {
                    booking_id: booking,
                    user_id: parse_id(&record.sk)?,
                    status: record.status,
                })
            })
            .collect()
    }

    /// Bookings `user` attends, from the user-keyed records.
    pub async fn list_user_bookings(
        &self,
        user: UserId,
    ) -> Result<Vec<BookingAttendee>, ServiceError> {
        let items = self
            .store
            .query(&self.tables().attendees, &Query::partition(user_partition(user)))
            .await?;
        items
            .into_iter()
            .map(|item| -> Result<BookingAttendee, ServiceError> {
                let record: AttendeeRecord = from_item(item)?;
                Ok(BookingAttendee {
                    booking_id: parse_id(&record.sk)?,
                    user_id: user,
                    status: record.status,
                })
            })
            .collect()
    }
}
