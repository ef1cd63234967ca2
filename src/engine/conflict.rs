use std::collections::BTreeMap;
use std::ops::Deref;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::evaluate;
use super::{Engine, EngineError};

pub(crate) fn today() -> Day {
    chrono::Utc::now().date_naive()
}

/// Reject inverted and oversized ranges before any availability work.
pub(crate) fn validate_range(start: Day, end: Day) -> Result<DateRange, EngineError> {
    if end < start {
        return Err(EngineError::InvalidRange { start, end });
    }
    let range = DateRange::new(start, end);
    if range.num_days() > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too long"));
    }
    Ok(range)
}

pub(crate) fn validate_line_items(lines: &[LineItem]) -> Result<(), EngineError> {
    if lines.is_empty() {
        return Err(EngineError::InvalidInput("reservation has no line items"));
    }
    if lines.len() > MAX_LINE_ITEMS {
        return Err(EngineError::LimitExceeded("too many line items"));
    }
    if lines.iter().any(|l| l.quantity == 0) {
        return Err(EngineError::InvalidInput("line item quantity must be positive"));
    }
    Ok(())
}

pub(crate) fn validate_request(req: &ReservationRequest) -> Result<DateRange, EngineError> {
    let range = validate_range(req.start, req.end)?;
    validate_line_items(&req.line_items)?;
    if req.customer.len() > MAX_CUSTOMER_LEN {
        return Err(EngineError::LimitExceeded("customer reference too long"));
    }
    if req.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(range)
}

/// Total requested per item, in order of first appearance. Lines naming the
/// same item draw on the same pool, so they are summed.
pub(crate) fn demand(lines: &[LineItem]) -> Vec<(Ulid, u32)> {
    let mut out: Vec<(Ulid, u32)> = Vec::with_capacity(lines.len());
    for line in lines {
        match out.iter_mut().find(|(id, _)| *id == line.item_id) {
            Some((_, qty)) => *qty = qty.saturating_add(line.quantity),
            None => out.push((line.item_id, line.quantity)),
        }
    }
    out
}

/// Reservation conflict check against already-locked item states.
///
/// Every item must be present in `items` (missing ones are reported as
/// `NotFound` before any availability work). Items are evaluated one by one
/// and the first violation is returned.
pub(crate) fn check_demand<G>(
    items: &BTreeMap<Ulid, G>,
    demand: &[(Ulid, u32)],
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError>
where
    G: Deref<Target = ItemState>,
{
    if let Some((missing, _)) = demand.iter().find(|(id, _)| !items.contains_key(id)) {
        return Err(EngineError::NotFound(*missing));
    }
    for (item_id, requested) in demand {
        let item = &items[item_id];
        if let Err(violation) = evaluate(item, *requested, range, exclude) {
            metrics::counter!(crate::observability::AVAILABILITY_VIOLATIONS_TOTAL).increment(1);
            tracing::debug!(
                item = %violation.item_id,
                day = %violation.day,
                requested = violation.requested,
                available = violation.available,
                "availability violation"
            );
            return Err(violation.into());
        }
    }
    Ok(())
}

impl Engine {
    /// Side-effect-free availability check for one item.
    pub async fn check_availability(
        &self,
        item_id: Ulid,
        requested: u32,
        start: Day,
        end: Day,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let range = validate_range(start, end)?;
        let items = self.read_items(&[item_id]).await?;
        check_demand(&items, &[(item_id, requested)], &range, exclude)
    }

    /// Side-effect-free check of a whole proposed reservation. Safe to call
    /// speculatively; mutations re-run the same check under write locks.
    pub async fn validate_reservation(
        &self,
        line_items: &[LineItem],
        start: Day,
        end: Day,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let range = validate_range(start, end)?;
        validate_line_items(line_items)?;
        let demand = demand(line_items);
        let ids: Vec<Ulid> = demand.iter().map(|(id, _)| *id).collect();
        let items = self.read_items(&ids).await?;
        check_demand(&items, &demand, &range, exclude)
    }
}
