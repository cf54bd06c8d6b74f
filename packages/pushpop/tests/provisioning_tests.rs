//! Schema provisioning on connect.

mod common;

use pushpop::{Client, ClientConfig, MessageState, schema};
use test_context::test_context;

use crate::common::TestHarness;

async fn table_exists(client: &Client) -> bool {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1)",
    )
    .bind(schema::TABLE)
    .fetch_one(client.pool())
    .await
    .unwrap()
}

#[test_context(TestHarness)]
#[tokio::test]
async fn connect_provisions_an_empty_database(ctx: &mut TestHarness) {
    let url = ctx.fresh_database().await.unwrap();

    let client = Client::connect(&url).await.unwrap();
    assert!(table_exists(&client).await);

    let mut msg = client.new_message("widgets", "1");
    msg.push(&client).await.unwrap();
    let popped = client.pop("widgets").await.unwrap();
    assert_eq!(popped.id, msg.id);
    client.close().await;
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reconnecting_keeps_existing_messages(ctx: &mut TestHarness) {
    let url = ctx.fresh_database().await.unwrap();

    let first = Client::connect(&url).await.unwrap();
    let mut msg = first.new_message("widgets", "kept");
    msg.push(&first).await.unwrap();
    first.close().await;

    let second = Client::connect(&url).await.unwrap();
    let stored = second.find_by_id(msg.id).await.unwrap();
    assert_eq!(stored.state, MessageState::Ready);
    assert_eq!(stored.payload, b"kept");

    // Provisioning an existing schema is a no-op
    schema::ensure_schema(second.pool()).await.unwrap();
    assert_eq!(second.counts("widgets").await.unwrap().ready, 1);
    second.close().await;
}

#[test_context(TestHarness)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_connects_all_succeed(ctx: &mut TestHarness) {
    for _ in 0..3 {
        let url = ctx.fresh_database().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let config = ClientConfig::new(url.clone()).with_max_connections(2);
            handles.push(tokio::spawn(Client::connect_with(config)));
        }

        let mut clients = Vec::new();
        for handle in handles {
            let client = handle
                .await
                .unwrap()
                .unwrap_or_else(|e| panic!("concurrent connect failed: {}", e));
            clients.push(client);
        }

        for client in clients {
            assert!(table_exists(&client).await);
            client.close().await;
        }
    }
}
