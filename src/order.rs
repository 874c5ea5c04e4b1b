//! Ordered-list reconciliation for sibling rows that carry a dense 1..=N
//! position within a scope (subjects within a class).
//!
//! These functions are pure: they take a snapshot of the active siblings
//! and produce the minimal set of position updates. Applying a plan inside
//! one transaction keeps the dense-range invariant from ever being observed
//! broken.

#[derive(Debug, Clone, PartialEq)]
pub struct SiblingRow {
    pub id: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub id: String,
    pub position: i64,
}

#[derive(Debug, PartialEq)]
pub enum OrderError {
    ItemNotFound,
    OutOfRange { requested: i64, max: i64 },
}

/// Plan moving `item_id` to `requested` (1-based). Returns the updates for
/// every row whose position changes, the moved item included. An empty plan
/// means the move is a no-op.
///
/// Moving later shifts the siblings in `(old, requested]` down by one;
/// moving earlier shifts `[requested, old)` up by one.
pub fn plan_reorder(
    siblings: &[SiblingRow],
    item_id: &str,
    requested: i64,
) -> Result<Vec<PositionUpdate>, OrderError> {
    let max = siblings.len() as i64;
    let item = siblings
        .iter()
        .find(|s| s.id == item_id)
        .ok_or(OrderError::ItemNotFound)?;
    if requested < 1 || requested > max {
        return Err(OrderError::OutOfRange { requested, max });
    }

    let old = item.position;
    if requested == old {
        return Ok(Vec::new());
    }

    let mut updates = Vec::new();
    for s in siblings {
        if s.id == item_id {
            continue;
        }
        if requested > old && s.position > old && s.position <= requested {
            updates.push(PositionUpdate {
                id: s.id.clone(),
                position: s.position - 1,
            });
        } else if requested < old && s.position >= requested && s.position < old {
            updates.push(PositionUpdate {
                id: s.id.clone(),
                position: s.position + 1,
            });
        }
    }
    updates.push(PositionUpdate {
        id: item.id.clone(),
        position: requested,
    });
    Ok(updates)
}

/// Plan inserting a new row at `requested` (default: end of list). Valid
/// targets are 1..=N+1; siblings at or after the slot shift up by one.
/// Returns the resolved position for the new row and the sibling updates.
pub fn plan_insertion(
    siblings: &[SiblingRow],
    requested: Option<i64>,
) -> Result<(i64, Vec<PositionUpdate>), OrderError> {
    let max = siblings.len() as i64 + 1;
    let target = requested.unwrap_or(max);
    if target < 1 || target > max {
        return Err(OrderError::OutOfRange {
            requested: target,
            max,
        });
    }

    let updates = siblings
        .iter()
        .filter(|s| s.position >= target)
        .map(|s| PositionUpdate {
            id: s.id.clone(),
            position: s.position + 1,
        })
        .collect();
    Ok((target, updates))
}

/// Plan the compaction after removing `removed_id`: every sibling past the
/// removed slot shifts down by one, everything before it stays put.
pub fn plan_compaction(
    siblings: &[SiblingRow],
    removed_id: &str,
) -> Result<Vec<PositionUpdate>, OrderError> {
    let removed = siblings
        .iter()
        .find(|s| s.id == removed_id)
        .ok_or(OrderError::ItemNotFound)?;

    Ok(siblings
        .iter()
        .filter(|s| s.position > removed.position)
        .map(|s| PositionUpdate {
            id: s.id.clone(),
            position: s.position - 1,
        })
        .collect())
}

/// True when `positions` is exactly {1, ..., N}: no duplicates, no gaps.
pub fn is_dense(positions: &[i64]) -> bool {
    let mut sorted = positions.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .enumerate()
        .all(|(i, p)| *p == i as i64 + 1)
}
