//! What the reconciliation engine needs from persistence, and nothing more.

use crate::error::StoreError;
use crate::model::{Collection, Entity, Organization, Publication};

/// Per-kind persistence primitives. Entities created through one call must be
/// visible to `find_by_name` on the next, so a reference shared by two
/// publications in one run is only created once.
pub trait Store<E: Entity> {
    fn find_by_name(&self, name: &str) -> Result<Option<E>, StoreError>;

    /// Insert a new entity and return its id.
    fn create(&self, draft: &E::Draft) -> Result<i64, StoreError>;

    /// Write the named fields of `draft` onto the stored `entity`. Fields not
    /// listed are left alone.
    fn update(&self, entity: &E, draft: &E::Draft, changed: &[&'static str]) -> Result<(), StoreError>;
}

/// A store that holds every entity kind.
pub trait Catalog: Store<Organization> + Store<Collection> + Store<Publication> {}

impl<T> Catalog for T where T: Store<Organization> + Store<Collection> + Store<Publication> {}
