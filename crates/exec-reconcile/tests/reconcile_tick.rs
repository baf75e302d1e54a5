use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use exec_emm::Emm;
use exec_model::{HandlerType, Mutation, MutationStatus, WorkflowRecord};
use exec_reconcile::{BackoffPolicy, MutationProbe, ProbeError, ProbeOutcome, ProbeRegistry, ReconciliationEngine};
use exec_store::{run_tx, InMemoryStore, NewHandlerRun, NewMutation};
use uuid::Uuid;

struct FakeProbe {
    outcome: ProbeOutcome,
}

#[async_trait]
impl MutationProbe for FakeProbe {
    async fn check(&self, _mutation: &Mutation) -> Result<ProbeOutcome, ProbeError> {
        Ok(self.outcome.clone())
    }
}

async fn seed(store: &InMemoryStore) -> (Uuid, Uuid) {
    let workflow_id = Uuid::now_v7();
    store.seed_workflow(WorkflowRecord {
        id: workflow_id,
        status: "active".to_string(),
        error: None,
        maintenance: false,
        pending_retry_run_id: None,
    });
    let session_id = run_tx(store, |tx| {
        Box::pin(async move { Ok(tx.start_session(workflow_id).await?.id) })
    })
    .await
    .unwrap();
    let run_id = run_tx(store, |tx| {
        Box::pin(async move {
            Ok(tx
                .create_handler_run(NewHandlerRun {
                    session_id,
                    workflow_id,
                    handler_name: "on_message".to_string(),
                    handler_type: HandlerType::Consumer,
                    phase: "mutating".to_string(),
                    retry_of: None,
                    input_state: None,
                    start_ts: Utc::now(),
                })
                .await?
                .id)
        })
    })
    .await
    .unwrap();
    let mutation = run_tx(store, |tx| {
        Box::pin(async move {
            let m = tx
                .create_mutation(NewMutation {
                    handler_run_id: run_id,
                    workflow_id,
                    tool_namespace: "email".to_string(),
                    tool_method: "send".to_string(),
                    params: serde_json::json!({}),
                    idempotency_key: "k1".to_string(),
                })
                .await?;
            tx.update_mutation(
                m.id,
                exec_store::MutationFields {
                    status: Some(MutationStatus::NeedsReconcile),
                    ..Default::default()
                },
            )
            .await
        })
    })
    .await
    .unwrap();
    (run_id, mutation.id)
}

#[tokio::test]
async fn tick_resolves_applied_mutation_via_probe() {
    let store = InMemoryStore::new();
    let (_, mutation_id) = seed(&store).await;

    let emm = Emm::new(Arc::new(store.clone()));
    let mut registry = ProbeRegistry::new();
    registry.register(
        "email",
        "send",
        Arc::new(FakeProbe { outcome: ProbeOutcome::Applied(serde_json::json!({"ok": true})) }),
    );

    let engine = ReconciliationEngine::new(Arc::new(store.clone()), emm, registry);
    let processed = engine.tick().await.unwrap();
    assert_eq!(processed, 1);

    let mutation = run_tx(&store, |tx| Box::pin(async move { tx.get_mutation(mutation_id).await }))
        .await
        .unwrap();
    assert_eq!(mutation.status, MutationStatus::Applied);
}

#[tokio::test]
async fn tick_backs_off_while_still_pending_without_marking_indeterminate() {
    let store = InMemoryStore::new();
    let (_, mutation_id) = seed(&store).await;

    let emm = Emm::new(Arc::new(store.clone()));
    let mut registry = ProbeRegistry::new();
    registry.register("email", "send", Arc::new(FakeProbe { outcome: ProbeOutcome::StillPending }));

    let engine = ReconciliationEngine::new(Arc::new(store.clone()), emm, registry)
        .with_backoff(BackoffPolicy { base: Duration::from_millis(1), max: Duration::from_millis(5), max_attempts: 5 });
    engine.tick().await.unwrap();

    let mutation = run_tx(&store, |tx| Box::pin(async move { tx.get_mutation(mutation_id).await }))
        .await
        .unwrap();
    // §4.2 step 3's `Retry` row only reschedules; a mutation still within
    // its attempt budget stays `needs_reconcile` so the next tick's fetch
    // (which already includes `indeterminate` for visibility, but whose
    // semantics hinge on attempts, not status) picks it up again.
    assert_eq!(mutation.status, MutationStatus::NeedsReconcile);
    assert_eq!(mutation.reconcile_attempts, 1);
    assert!(mutation.next_reconcile_at.is_some());
}

#[tokio::test]
async fn tick_marks_indeterminate_once_attempts_are_exhausted() {
    let store = InMemoryStore::new();
    let (_, mutation_id) = seed(&store).await;

    let emm = Emm::new(Arc::new(store.clone()));
    let mut registry = ProbeRegistry::new();
    registry.register("email", "send", Arc::new(FakeProbe { outcome: ProbeOutcome::StillPending }));

    let engine = ReconciliationEngine::new(Arc::new(store.clone()), emm, registry)
        .with_backoff(BackoffPolicy { base: Duration::from_millis(1), max: Duration::from_millis(5), max_attempts: 1 });
    engine.tick().await.unwrap();

    let mutation = run_tx(&store, |tx| Box::pin(async move { tx.get_mutation(mutation_id).await }))
        .await
        .unwrap();
    assert_eq!(mutation.status, MutationStatus::NeedsReconcile);
    assert_eq!(mutation.reconcile_attempts, 1);

    // The next tick sees attempt 2 against a budget of 1: exhausted.
    engine.tick().await.unwrap();
    let mutation = run_tx(&store, |tx| Box::pin(async move { tx.get_mutation(mutation_id).await }))
        .await
        .unwrap();
    assert_eq!(mutation.status, MutationStatus::Indeterminate);
}

#[tokio::test]
async fn tick_resolves_after_an_earlier_retry() {
    let store = InMemoryStore::new();
    let (_, mutation_id) = seed(&store).await;

    let emm = Emm::new(Arc::new(store.clone()));
    let mut registry = ProbeRegistry::new();
    registry.register("email", "send", Arc::new(FakeProbe { outcome: ProbeOutcome::StillPending }));

    let engine = ReconciliationEngine::new(Arc::new(store.clone()), emm.clone(), registry)
        .with_backoff(BackoffPolicy { base: Duration::from_millis(1), max: Duration::from_millis(5), max_attempts: 5 });
    engine.tick().await.unwrap();

    let mutation = run_tx(&store, |tx| Box::pin(async move { tx.get_mutation(mutation_id).await }))
        .await
        .unwrap();
    assert_eq!(mutation.status, MutationStatus::NeedsReconcile);

    emm.apply_mutation(mutation_id, serde_json::json!({"ok": true}), None)
        .await
        .unwrap();
    let mutation = run_tx(&store, |tx| Box::pin(async move { tx.get_mutation(mutation_id).await }))
        .await
        .unwrap();
    assert_eq!(mutation.status, MutationStatus::Applied);
}
