use crate::model::*;
use crate::store::{from_item, AttrValue, Item, Query, SortCondition, StoreError};

use super::{Engine, ServiceError, ELEMENT_INDEX};

/// Whether `ts` sits on a slot boundary.
pub fn is_quantized(ts: Ms, slot_ms: Ms) -> bool {
    slot_ms > 0 && ts.rem_euclid(slot_ms) == 0
}

/// A stored booking blocks `window` iff it is CONFIRMED and its end lies
/// after the window start. The store query already bounds `start < window.end`.
fn blocks(item: &Item, window: &Span) -> bool {
    let confirmed = item.get("status").and_then(AttrValue::as_str)
        == Some(BookingStatus::Confirmed.as_str());
    let ends_after = item
        .get("endTime")
        .and_then(AttrValue::as_i64)
        .is_some_and(|end| end > window.start);
    confirmed && ends_after
}

impl Engine {
    /// True iff no confirmed booking on `element` intersects `[start, end)`.
    /// Back-to-back bookings do not conflict.
    pub async fn is_resource_available(
        &self,
        element: ElementId,
        start: Ms,
        end: Ms,
    ) -> Result<bool, ServiceError> {
        let window = Span::try_new(start, end)
            .ok_or_else(|| ServiceError::Validation("Start time must be before end time.".into()))?;
        Ok(self.find_conflicts(element, &window, None).await?.is_empty())
    }

    /// Confirmed bookings on `element` overlapping `window`, skipping `exclude`.
    pub(crate) async fn find_conflicts(
        &self,
        element: ElementId,
        window: &Span,
        exclude: Option<BookingId>,
    ) -> Result<Vec<Booking>, StoreError> {
        let query = Query::partition(element.to_string())
            .index(ELEMENT_INDEX)
            .sort(SortCondition::LessThan(AttrValue::Int(window.end)));
        let items = self.store.query(&self.tables().bookings, &query).await?;

        let excluded = exclude.map(|id| id.to_string());
        items
            .into_iter()
            .filter(|item| blocks(item, window))
            .filter(|item| {
                excluded.is_none()
                    || item.get("bookingId").and_then(AttrValue::as_str) != excluded.as_deref()
            })
            .map(from_item::<Booking>)
            .collect()
    }

    /// Reject bounds that are not slot multiples or do not form a window.
    pub(crate) fn check_window(&self, start: Ms, end: Ms) -> Result<Span, ServiceError> {
        let slot = self.config.slot_ms();
        if !is_quantized(start, slot) || !is_quantized(end, slot) {
            return Err(ServiceError::Validation(format!(
                "Start and end times must be multiples of {} minutes.",
                self.config.slot_minutes
            )));
        }
        Span::try_new(start, end)
            .ok_or_else(|| ServiceError::Validation("Start time must be before end time.".into()))
    }
}
