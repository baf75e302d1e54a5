//! Persistence layer for the durable execution core (§6.1).
//!
//! `Store` is the only thing `exec-emm` depends on to reach disk. Two
//! implementations are provided: [`PostgresStore`] for production and
//! [`InMemoryStore`] for tests, grounded on the same split the reference
//! durable-execution engine uses between its Postgres- and memory-backed
//! persistence modules.

mod error;
mod memory;
mod postgres;
mod store;
mod tx;
mod types;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{run_tx, Store, StoreTransaction};
pub use tx::StoreTx;
pub use types::{
    HandlerRunFields, MutationFields, NewEvent, NewHandlerRun, NewMutation, WorkflowFields,
};
