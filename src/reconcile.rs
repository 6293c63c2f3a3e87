//! Find-or-create-or-update of one entity against the store.

use tracing::debug;

use crate::error::StoreError;
use crate::model::{Change, Entity, Reconciled};
use crate::stats::KindStats;
use crate::store::Store;

pub fn find_existing<E, S>(store: &S, name: &str) -> Result<Option<E>, StoreError>
where
    E: Entity,
    S: Store<E> + ?Sized,
{
    store.find_by_name(name)
}

/// Map a freshly parsed draft onto the stored entity of the same name.
///
/// Absent: created from the whole draft. Present: only the fields that differ
/// are written, and the change lists them. The outcome is recorded in `stats`
/// exactly once.
pub fn reconcile<E, S>(
    store: &S,
    stats: &mut KindStats,
    draft: E::Draft,
) -> Result<Reconciled<E>, StoreError>
where
    E: Entity,
    S: Store<E> + ?Sized,
{
    let (entity, change) = match store.find_by_name(E::draft_name(&draft))? {
        None => {
            let id = store.create(&draft)?;
            (E::from_draft(id, draft), Change::Created)
        }
        Some(existing) => {
            let changed = existing.changed_fields(&draft);
            if changed.is_empty() {
                (existing, Change::Unchanged)
            } else {
                store.update(&existing, &draft, &changed)?;
                (E::from_draft(existing.id(), draft), Change::Updated(changed))
            }
        }
    };
    debug!("{} {}: {}", E::KIND, entity.name(), change.label());
    stats.record(entity.name(), &change);
    Ok(Reconciled { entity, change })
}
