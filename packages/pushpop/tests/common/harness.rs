//! Test harness with testcontainers for integration testing.
//!
//! One Postgres container is shared by every test in a binary. Tests isolate
//! themselves by using a fresh topic rather than a fresh database.

#![allow(dead_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use pushpop::{Client, ClientConfig};
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=pushpop=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Test harness handing out connected clients and unique topics.
///
/// ```ignore
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &mut TestHarness) {
///     let topic = ctx.topic("widgets");
///     ctx.client.new_message(&topic, "1").push(&ctx.client).await.unwrap();
/// }
/// ```
pub struct TestHarness {
    pub client: Client,
    pub db_url: String,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.client.close().await;
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        Self::with_config(|config| config).await
    }

    /// Connect with a customized client configuration.
    pub async fn with_config(configure: impl FnOnce(ClientConfig) -> ClientConfig) -> Result<Self> {
        let infra = SharedTestInfra::get().await;
        let config = configure(ClientConfig::new(infra.db_url.clone()).with_max_connections(20));
        let client = Client::connect_with(config)
            .await
            .context("Failed to connect test client")?;

        Ok(Self {
            client,
            db_url: infra.db_url.clone(),
        })
    }

    /// A topic name no other test uses.
    pub fn topic(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, Uuid::new_v4())
    }

    /// A second client with its own pool, as another process would have.
    pub async fn other_client(&self, lease: Duration) -> Result<Client> {
        let config = ClientConfig::new(self.db_url.clone()).with_lease_duration(lease);
        Ok(Client::connect_with(config).await?)
    }

    /// Create an empty database on the shared server and return its URL.
    ///
    /// For tests that need to see the schema provisioned from scratch.
    pub async fn fresh_database(&self) -> Result<String> {
        let name = format!("pushpop_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE DATABASE {}", name))
            .execute(self.pool())
            .await
            .context("Failed to create database")?;

        let (server, _) = self
            .db_url
            .rsplit_once('/')
            .context("Database URL has no path")?;
        Ok(format!("{}/{}", server, name))
    }

    pub fn pool(&self) -> &PgPool {
        self.client.pool()
    }

    /// Push a message with `payload` to `topic` and return it.
    pub async fn push(&self, topic: &str, payload: &str) -> pushpop::Message {
        let mut msg = self.client.new_message(topic, payload);
        msg.push(&self.client).await.expect("push failed");
        msg
    }
}
