//! Last-seen revision numbers per document.
//!
//! Most document ids in the store are prefixed with the id of the model (tenant)
//! they belong to, e.g. `"3f2c...:machine-0"`. Storing that prefix once per
//! document dominates the memory of a flat `(collection, id)` map, so ids that
//! follow the `tenant:local-id` shape are kept in a nested map keyed by tenant.
//! Any other id (including `"tenant:"` and `":local-id"`) is kept as-is.
//!
//! The two layouts are an implementation detail; lookups behave exactly like a
//! flat map keyed by `(collection, id)`.

use std::collections::HashMap;

const TENANT_SEPARATOR: char = ':';

#[derive(Debug, Default)]
struct CollectionRevnos {
    /// tenant -> local id -> revno
    tenants: HashMap<String, HashMap<String, i64>>,
    /// raw id -> revno, for ids that are not tenant-prefixed
    opaque: HashMap<String, i64>,
}

/// Cache of the last revno passed to [`RevnoTracker::update`] for each document.
///
/// Not synchronised; the dispatcher owns its instance exclusively.
#[derive(Debug, Default)]
pub struct RevnoTracker {
    collections: HashMap<String, CollectionRevnos>,
}

/// Splits `tenant:local` when both sides are non-empty.
fn split_tenant(id: &str) -> Option<(&str, &str)> {
    let (tenant, local) = id.split_once(TENANT_SEPARATOR)?;
    if tenant.is_empty() || local.is_empty() {
        return None;
    }
    Some((tenant, local))
}

impl RevnoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached revno, or `None` if this document was never updated.
    pub fn find(
        &self,
        collection: &str,
        id: &str,
    ) -> Option<i64> {
        let revnos = self.collections.get(collection)?;
        match split_tenant(id) {
            Some((tenant, local)) => revnos.tenants.get(tenant)?.get(local).copied(),
            None => revnos.opaque.get(id).copied(),
        }
    }

    /// Stores `revno` and reports whether it differs from the cached value.
    /// A document that was never seen always counts as changed.
    pub fn update(
        &mut self,
        collection: &str,
        id: &str,
        revno: i64,
    ) -> bool {
        let revnos = match self.collections.get_mut(collection) {
            Some(revnos) => revnos,
            None => self.collections.entry(collection.to_owned()).or_default(),
        };

        let slot = match split_tenant(id) {
            Some((tenant, local)) => {
                let locals = match revnos.tenants.get_mut(tenant) {
                    Some(locals) => locals,
                    None => revnos.tenants.entry(tenant.to_owned()).or_default(),
                };
                locals.insert(local.to_owned(), revno)
            }
            None => revnos.opaque.insert(id.to_owned(), revno),
        };

        slot != Some(revno)
    }

    /// Number of documents tracked across all collections.
    pub fn len(&self) -> usize {
        self.collections
            .values()
            .map(|c| c.opaque.len() + c.tenants.values().map(HashMap::len).sum::<usize>())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn opaque_revno(
        &self,
        collection: &str,
        id: &str,
    ) -> Option<i64> {
        self.collections.get(collection)?.opaque.get(id).copied()
    }

    #[cfg(test)]
    pub(crate) fn tenant_revno(
        &self,
        collection: &str,
        tenant: &str,
        local: &str,
    ) -> Option<i64> {
        self.collections.get(collection)?.tenants.get(tenant)?.get(local).copied()
    }
}
