use std::future::Future;

use async_trait::async_trait;

use crate::error::StoreError;

/// A `StoreTx` that additionally knows how to end itself. Kept as a
/// separate trait from `StoreTx` so that ordinary EMM code only ever sees
/// the CRUD surface, never `commit`/`rollback` directly — those are only
/// reachable through `run_tx`.
#[async_trait]
pub trait StoreTransaction: StoreTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Top-level handle to a persistence backend (§6.1). The only thing a
/// `Store` itself can do is open a transaction; every read and write goes
/// through the `StoreTx` returned by `begin`.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// Runs `body` inside one atomic transaction: commits on `Ok`, rolls back
/// on `Err`. This is the `tx(body)` combinator §6.1 calls for — every
/// `exec-emm` method is exactly one call to this function, so a method
/// either fully applies or has no visible effect.
///
/// `body` only ever sees the transaction through `&mut dyn StoreTransaction`;
/// `commit`/`rollback` take `self: Box<Self>`, so `body` has no way to
/// reach them through a plain reference. Only `run_tx` decides the outcome.
///
/// The error type is generic over anything `StoreError` converts into, so
/// callers like `exec-emm` can run a body that fails with their own error
/// type (carrying invariant-violation messages `StoreError` has no variant
/// for) without an intermediate conversion step at every call site.
pub async fn run_tx<S, F, Fut, T, E>(store: &S, body: F) -> Result<T, E>
where
    S: Store + ?Sized,
    F: FnOnce(&mut dyn StoreTransaction) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    let mut tx = store.begin().await?;
    match body(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            // Best-effort: if rollback itself fails the connection is
            // already gone and the transaction is dead either way.
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}
