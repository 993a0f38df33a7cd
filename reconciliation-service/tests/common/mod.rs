//! Common test utilities for reconciliation-service integration tests.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};
use reconciliation_service::config::{
    DatabaseConfig, RateLimitConfig, ReconciliationConfig, RedisConfig, UploadConfig, WorkerConfig,
};
use reconciliation_service::startup::Application;
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use sqlx::PgPool;
use std::sync::Once;
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,reconciliation_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn test_config(database_url: String) -> ReconciliationConfig {
    ReconciliationConfig {
        common: CommonConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
        },
        service_name: "reconciliation-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        api_prefix: "/api/v1".to_string(),
        database: DatabaseConfig {
            url: database_url,
            max_connections: 4,
            min_connections: 1,
        },
        // No Redis in tests: in-process queue, no-op mirror.
        redis: RedisConfig { url: None },
        worker: WorkerConfig {
            concurrency: 1,
            lock_seconds: 60,
            max_attempts: 3,
        },
        upload: UploadConfig {
            dir: std::env::temp_dir()
                .join("reconciliation-test-uploads")
                .to_string_lossy()
                .into_owned(),
            max_bytes: 50 * 1024 * 1024,
        },
        cors_origins: vec![],
        rate_limit: RateLimitConfig {
            window_seconds: 60,
            max_requests: 100_000,
        },
    }
}

/// Test application wrapper.
pub struct TestApp {
    pub address: String,
    pub api: String,
    pub client: reqwest::Client,
    pub pool: PgPool,
}

/// Spawn a test application against `TEST_DATABASE_URL`. Returns `None`
/// (and the test should pass vacuously) when no test database is
/// configured, so the suite stays green on machines without Postgres.
pub async fn spawn_app() -> Option<TestApp> {
    init_tracing();

    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set - skipping integration test");
        return None;
    };

    let config = test_config(database_url);
    let app = Application::build(config)
        .await
        .expect("Failed to build application");

    let port = app.port();
    let pool = app.db().pool().clone();

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let address = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::new();

    // Wait for the server to accept connections.
    let mut attempts = 0;
    loop {
        match client.get(format!("{address}/health/live")).send().await {
            Ok(_) => break,
            Err(_) if attempts < 20 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => panic!("Server did not come up after 20 attempts: {e}"),
        }
    }

    Some(TestApp {
        api: format!("{address}/api/v1"),
        address,
        client,
        pool,
    })
}

impl TestApp {
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.api))
            .send()
            .await
            .expect("request failed")
    }

    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.api))
            .json(body)
            .send()
            .await
            .expect("request failed")
    }

    pub async fn post_empty(&self, path: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.api))
            .send()
            .await
            .expect("request failed")
    }

    /// Upload a CSV and return the new batch id.
    pub async fn upload_csv(&self, csv: &str) -> Uuid {
        let part = reqwest::multipart::Part::bytes(csv.as_bytes().to_vec())
            .file_name("transactions.csv")
            .mime_str("text/csv")
            .expect("valid mime");
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/reconciliation/upload", self.api))
            .multipart(form)
            .send()
            .await
            .expect("upload failed");

        assert_eq!(response.status().as_u16(), 202, "upload should be accepted");
        let body: serde_json::Value = response.json().await.expect("json body");
        body["batchId"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .expect("batchId in response")
    }

    /// Poll the batch status endpoint until the batch reaches a
    /// terminal state.
    pub async fn wait_for_batch(&self, batch_id: Uuid) -> serde_json::Value {
        for _ in 0..300 {
            let response = self.get(&format!("/reconciliation/{batch_id}")).await;
            assert_eq!(response.status().as_u16(), 200);
            let body: serde_json::Value = response.json().await.expect("json body");
            match body["status"].as_str() {
                Some("completed") | Some("failed") => return body,
                _ => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
        panic!("batch {batch_id} did not reach a terminal state");
    }

    /// Retire any invoices sharing this amount so earlier test runs
    /// cannot leak into this run's candidate set.
    pub async fn retire_amount(&self, amount: Decimal) {
        sqlx::query("UPDATE invoices SET status = 'paid' WHERE amount = $1")
            .bind(amount)
            .execute(&self.pool)
            .await
            .expect("retire invoices");
    }

    pub async fn seed_invoice(
        &self,
        customer_name: &str,
        amount: Decimal,
        due_date: NaiveDate,
    ) -> Uuid {
        let invoice_id = Uuid::new_v4();
        let invoice_number = format!("INV-{}", &invoice_id.to_string()[..13]);
        sqlx::query(
            r#"
            INSERT INTO invoices
                (invoice_id, invoice_number, customer_name, customer_email, amount, due_date, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'sent')
            "#,
        )
        .bind(invoice_id)
        .bind(&invoice_number)
        .bind(customer_name)
        .bind(format!(
            "{}@example.com",
            customer_name.to_lowercase().replace(' ', ".")
        ))
        .bind(amount)
        .bind(due_date)
        .execute(&self.pool)
        .await
        .expect("seed invoice");
        invoice_id
    }

    /// Insert a terminal batch row directly, bypassing the upload path.
    pub async fn seed_batch(&self) -> Uuid {
        let batch_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO reconciliation_batches (batch_id, original_filename, status, completed_utc)
            VALUES ($1, 'seeded.csv', 'completed', NOW())
            "#,
        )
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .expect("seed batch");
        batch_id
    }

    /// Insert a transaction row directly with a given status.
    pub async fn seed_transaction(
        &self,
        batch_id: Uuid,
        status: &str,
        matched_invoice_id: Option<Uuid>,
        created_utc: Option<DateTime<Utc>>,
    ) -> Uuid {
        let transaction_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO bank_transactions
                (transaction_id, upload_batch_id, transaction_date, description, amount,
                 status, matched_invoice_id, confidence_score, created_utc)
            VALUES ($1, $2, '2024-01-15', 'SEEDED ROW', 100.00, $3, $4, 90.00,
                    COALESCE($5, NOW()))
            "#,
        )
        .bind(transaction_id)
        .bind(batch_id)
        .bind(status)
        .bind(matched_invoice_id)
        .bind(created_utc)
        .execute(&self.pool)
        .await
        .expect("seed transaction");
        transaction_id
    }

    pub async fn transaction_status(&self, transaction_id: Uuid) -> String {
        let (status,): (String,) =
            sqlx::query_as("SELECT status FROM bank_transactions WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_one(&self.pool)
                .await
                .expect("read transaction status");
        status
    }

    pub async fn audit_count(&self, transaction_id: Uuid, action: &str) -> i64 {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM match_audit_log WHERE transaction_id = $1 AND action = $2",
        )
        .bind(transaction_id)
        .bind(action)
        .fetch_one(&self.pool)
        .await
        .expect("count audit entries");
        count
    }
}
