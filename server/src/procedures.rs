//! Statically declared table of callable procedures.
//!
//! Handlers are registered once at startup under their dotted address. Each
//! handler declares its argument tuple and return type; the table converts the
//! raw JSON argument list on the way in and the result on the way out, so
//! unknown addresses and ill-typed arguments are rejected before any handler
//! code runs.

use crate::error::ProcedureError;
use crate::state_store::SyncContext;
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared::ConnectionId;
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};

type Handler<S> =
    Box<dyn Fn(&mut S, &mut SyncContext<'_>, ConnectionId, Vec<Value>) -> Result<Value, ProcedureError> + Send>;

pub struct ProcedureTable<S> {
    handlers: HashMap<String, Handler<S>>,
    cells: BTreeSet<String>,
}

impl<S> Default for ProcedureTable<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            cells: BTreeSet::new(),
        }
    }
}

impl<S: 'static> ProcedureTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `address`.
    ///
    /// `A` is the argument tuple, e.g. `(String, usize)`, or `()` for a
    /// procedure without arguments.
    pub fn register<A, R, F>(&mut self, address: &str, handler: F) -> &mut Self
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(&mut S, &mut SyncContext<'_>, ConnectionId, A) -> Result<R, ProcedureError> + Send + 'static,
    {
        let name = address.to_string();
        let wrapped: Handler<S> = Box::new(move |state, ctx, caller, args| {
            let args = decode_args::<A>(&name, args)?;
            let result = handler(state, ctx, caller, args)?;
            serde_json::to_value(result).map_err(|source| ProcedureError::InvalidResult {
                address: name.clone(),
                source,
            })
        });

        self.handlers.insert(address.to_string(), wrapped);
        self
    }

    /// Declares a readable cell address next to the callables.
    pub fn expose_cell(&mut self, address: &str) -> &mut Self {
        self.cells.insert(address.to_string());
        self
    }

    pub fn is_cell(&self, address: &str) -> bool {
        self.cells.contains(address)
    }

    pub fn addresses(&self) -> Vec<&str> {
        let mut addresses: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        addresses.sort_unstable();
        addresses
    }

    /// Resolves `address` and runs its handler on behalf of `caller`.
    ///
    /// Errors and panics raised by the handler are turned into a
    /// [`ProcedureError`]; nothing escapes to the dispatcher.
    pub fn invoke(
        &self,
        state: &mut S,
        ctx: &mut SyncContext<'_>,
        caller: ConnectionId,
        address: &str,
        args: Vec<Value>,
    ) -> Result<Value, ProcedureError> {
        let handler = self
            .handlers
            .get(address)
            .ok_or_else(|| ProcedureError::UnknownProcedure(address.to_string()))?;

        debug!("Connection {} called {} with {:?}", caller, address, args);

        match catch_unwind(AssertUnwindSafe(|| handler(state, ctx, caller, args))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Procedure {} panicked: {}", address, message);
                Err(ProcedureError::Panicked {
                    address: address.to_string(),
                    message,
                })
            }
        }
    }
}

fn decode_args<A: DeserializeOwned>(address: &str, args: Vec<Value>) -> Result<A, ProcedureError> {
    // `()` deserializes from null, tuples from arrays
    let raw = if args.is_empty() {
        Value::Null
    } else {
        Value::Array(args)
    };

    serde_json::from_value(raw).map_err(|source| ProcedureError::InvalidArguments {
        address: address.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_manager::ClientManager;
    use crate::state_store::StateStore;
    use serde_json::json;

    #[derive(Default)]
    struct Counter {
        total: i64,
        last_caller: Option<ConnectionId>,
    }

    fn table() -> ProcedureTable<Counter> {
        let mut table = ProcedureTable::new();
        table
            .register("counter.add", |state: &mut Counter, _ctx, caller, (amount,): (i64,)| {
                state.total += amount;
                state.last_caller = Some(caller);
                Ok(state.total)
            })
            .register("counter.reset", |state: &mut Counter, _ctx, _caller, ()| {
                state.total = 0;
                Ok(())
            })
            .register("counter.fail", |_state: &mut Counter, _ctx, _caller, ()| {
                Err::<(), _>(ProcedureError::rejected("counter is locked"))
            })
            .register("counter.explode", |_state: &mut Counter, _ctx, _caller, ()| -> Result<(), ProcedureError> {
                panic!("kaboom")
            })
            .register("counter.pairs", |state: &mut Counter, _ctx, _caller, ()| {
                // JSON object keys must be strings
                let mut pairs = HashMap::new();
                pairs.insert((state.total, state.total), "same");
                Ok(pairs)
            })
            .register("counter.publish", |state: &mut Counter, ctx, _caller, ()| {
                ctx.store.set(ctx.clients, "counter", json!(state.total), None);
                Ok(())
            })
            .expose_cell("counter");
        table
    }

    fn call(
        table: &ProcedureTable<Counter>,
        state: &mut Counter,
        store: &mut StateStore,
        address: &str,
        args: Vec<Value>,
    ) -> Result<Value, ProcedureError> {
        let clients = ClientManager::new(1);
        let mut ctx = SyncContext::new(store, &clients);
        table.invoke(state, &mut ctx, 7, address, args)
    }

    #[test]
    fn test_invoke_typed_handler() {
        let table = table();
        let mut state = Counter::default();
        let mut store = StateStore::new();

        let result = call(&table, &mut state, &mut store, "counter.add", vec![json!(5)]).unwrap();

        assert_eq!(result, json!(5));
        assert_eq!(state.last_caller, Some(7));
    }

    #[test]
    fn test_invoke_without_arguments() {
        let table = table();
        let mut state = Counter { total: 3, last_caller: None };
        let mut store = StateStore::new();

        let result = call(&table, &mut state, &mut store, "counter.reset", vec![]).unwrap();

        assert_eq!(result, Value::Null);
        assert_eq!(state.total, 0);
    }

    #[test]
    fn test_unknown_address_is_rejected() {
        let table = table();
        let err = call(&table, &mut Counter::default(), &mut StateStore::new(), "counter.nope", vec![])
            .unwrap_err();
        assert!(matches!(err, ProcedureError::UnknownProcedure(ref a) if a == "counter.nope"));
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_bad_arguments_are_rejected() {
        let table = table();
        let mut state = Counter::default();

        let err = call(&table, &mut state, &mut StateStore::new(), "counter.add", vec![json!("five")])
            .unwrap_err();
        assert_eq!(err.status(), 400);

        let err = call(&table, &mut state, &mut StateStore::new(), "counter.add", vec![]).unwrap_err();
        assert_eq!(err.status(), 400);
        assert_eq!(state.total, 0);
    }

    #[test]
    fn test_handler_error_is_returned() {
        let table = table();
        let err = call(&table, &mut Counter::default(), &mut StateStore::new(), "counter.fail", vec![])
            .unwrap_err();
        assert_eq!(err.to_string(), "counter is locked");
        assert_eq!(err.status(), 409);
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let table = table();
        let err = call(&table, &mut Counter::default(), &mut StateStore::new(), "counter.explode", vec![])
            .unwrap_err();
        match err {
            ProcedureError::Panicked { address, message } => {
                assert_eq!(address, "counter.explode");
                assert_eq!(message, "kaboom");
            }
            other => panic!("Unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_handlers_can_write_cells() {
        let table = table();
        let mut state = Counter { total: 9, last_caller: None };
        let mut store = StateStore::new();

        call(&table, &mut state, &mut store, "counter.publish", vec![]).unwrap();

        assert_eq!(store.get("counter", None), Some(&json!(9)));
    }

    #[test]
    fn test_unencodable_result_is_a_server_error() {
        let table = table();
        let mut state = Counter { total: 2, last_caller: None };

        let err = call(&table, &mut state, &mut StateStore::new(), "counter.pairs", vec![]).unwrap_err();

        assert!(matches!(err, ProcedureError::InvalidResult { ref address, .. } if address == "counter.pairs"));
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn test_table_lists_addresses() {
        let table = table();
        assert_eq!(
            table.addresses(),
            vec!["counter.add", "counter.explode", "counter.fail", "counter.pairs", "counter.publish", "counter.reset"]
        );
        assert!(table.is_cell("counter"));
        assert!(!table.is_cell("counter.add"));
    }
}
