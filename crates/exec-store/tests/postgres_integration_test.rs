//! Runs only against a real Postgres instance; skipped when `DATABASE_URL`
//! isn't set, matching the reference durable-execution engine's own
//! opt-in integration test.

use exec_store::{run_tx, NewHandlerRun, PostgresStore};
use exec_model::HandlerType;
use uuid::Uuid;

#[tokio::test]
async fn connects_and_round_trips_a_handler_run() {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let store = PostgresStore::connect(&database_url).await.expect("connect");
    store.migrate().await.expect("migrate");

    let workflow_id = Uuid::now_v7();
    sqlx::query("INSERT INTO workflows (id, status) VALUES ($1, 'active')")
        .bind(workflow_id)
        .execute(&sqlx::PgPool::connect(&database_url).await.unwrap())
        .await
        .expect("seed workflow");

    let session_id = run_tx(&store, |tx| {
        Box::pin(async move { Ok(tx.start_session(workflow_id).await?.id) })
    })
    .await
    .expect("start session");

    let run = run_tx(&store, |tx| {
        let input = None;
        Box::pin(async move {
            tx.create_handler_run(NewHandlerRun {
                session_id,
                workflow_id,
                handler_name: "on_message".to_string(),
                handler_type: HandlerType::Consumer,
                phase: "pending".to_string(),
                retry_of: None,
                input_state: input,
                start_ts: chrono::Utc::now(),
            })
            .await
        })
    })
    .await
    .expect("create handler run");

    assert_eq!(run.session_id, session_id);
}
