//! Server-authoritative state cells
//!
//! A cell is an address holding at most one JSON value per partition key; the
//! default partition uses the empty key. Writes that change a cell are pushed
//! synchronously to every interested connection through the
//! [`ClientManager`]. Values are kept as `serde_json::Value` so cells of any
//! type can share one store, and [`StateCell`] restores the static type at the
//! edges.

use crate::client_manager::ClientManager;
use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared::{cell_address, split_cell_address};
use std::collections::HashMap;
use std::marker::PhantomData;

#[derive(Debug, Default)]
pub struct StateStore {
    cells: HashMap<String, HashMap<String, Value>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &str, partition: Option<&str>) -> Option<&Value> {
        self.cells
            .get(address)?
            .get(partition.unwrap_or_default())
    }

    /// Looks up a value by its full address (`base` or `base|key`).
    pub fn current(&self, full_address: &str) -> Option<&Value> {
        let (base, partition) = split_cell_address(full_address);
        self.get(base, partition)
    }

    /// Writes a cell and broadcasts the new value.
    ///
    /// Returns false, without broadcasting, when the value is unchanged.
    pub fn set(
        &mut self,
        clients: &ClientManager,
        address: &str,
        value: Value,
        partition: Option<&str>,
    ) -> bool {
        let key = partition.unwrap_or_default();
        let slot = self
            .cells
            .entry(address.to_string())
            .or_default()
            .entry(key.to_string());

        let value = match slot {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                if *entry.get() == value {
                    return false;
                }
                entry.insert(value);
                entry.into_mut()
            }
            std::collections::hash_map::Entry::Vacant(entry) => entry.insert(value),
        };

        clients.broadcast_update(&cell_address(address, partition), value);
        true
    }

    /// Applies `change` to the current value (if any) and writes the result.
    pub fn update<F>(
        &mut self,
        clients: &ClientManager,
        address: &str,
        partition: Option<&str>,
        change: F,
    ) -> bool
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let next = change(self.get(address, partition));
        self.set(clients, address, next, partition)
    }
}

/// Mutable view over the store together with the registry it broadcasts to.
///
/// Procedure handlers receive one of these for the duration of a call.
pub struct SyncContext<'a> {
    pub store: &'a mut StateStore,
    pub clients: &'a ClientManager,
}

impl<'a> SyncContext<'a> {
    pub fn new(store: &'a mut StateStore, clients: &'a ClientManager) -> Self {
        Self { store, clients }
    }
}

/// Typed handle to a cell address.
#[derive(Debug)]
pub struct StateCell<V> {
    address: &'static str,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for StateCell<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for StateCell<V> {}

impl<V> StateCell<V>
where
    V: Serialize + DeserializeOwned,
{
    pub const fn new(address: &'static str) -> Self {
        Self {
            address,
            _value: PhantomData,
        }
    }

    pub fn address(&self) -> &'static str {
        self.address
    }

    pub fn get(&self, store: &StateStore, partition: Option<&str>) -> Result<Option<V>, StoreError> {
        store
            .get(self.address, partition)
            .map(|value| {
                V::deserialize(value).map_err(|source| StoreError::Decode {
                    address: cell_address(self.address, partition),
                    source,
                })
            })
            .transpose()
    }

    pub fn set(&self, ctx: &mut SyncContext<'_>, value: &V, partition: Option<&str>) -> Result<bool, StoreError> {
        let encoded = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            address: cell_address(self.address, partition),
            source,
        })?;
        Ok(ctx.store.set(ctx.clients, self.address, encoded, partition))
    }

    pub fn update<F>(&self, ctx: &mut SyncContext<'_>, partition: Option<&str>, change: F) -> Result<bool, StoreError>
    where
        F: FnOnce(Option<V>) -> V,
    {
        let current = self.get(ctx.store, partition)?;
        self.set(ctx, &change(current), partition)
    }
}
