//! Tests for simple and extended query execution.

use std::env;
use std::sync::atomic::{AtomicU32, Ordering};

use pgnet::{Conn, PgValue, TxOpts};

static TABLE_COUNTER: AtomicU32 = AtomicU32::new(0);

fn db_url() -> String {
    let mut db_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/postgres".to_string());
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    db_url
}

async fn get_conn() -> Conn {
    Conn::connect_url(&db_url()).await.expect("Failed to connect")
}

struct TestTable {
    name: String,
}

impl TestTable {
    async fn new(conn: &mut Conn, columns: &str) -> Self {
        let id = TABLE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let name = format!("pgnet_query_test_{}", id);
        conn.query_drop(&format!("DROP TABLE IF EXISTS {}", name))
            .await
            .unwrap();
        conn.query_drop(&format!("CREATE TABLE {} ({})", name, columns))
            .await
            .unwrap();
        Self { name }
    }

    async fn cleanup(&self, conn: &mut Conn) {
        let _ = conn
            .query_drop(&format!("DROP TABLE IF EXISTS {}", self.name))
            .await;
    }
}

#[tokio::test]
async fn test_minimal_query() {
    let mut conn = get_conn().await;

    let mut handler = pgnet::CollectHandler::new();
    conn.query("SELECT 'foo'", &mut handler).await.unwrap();

    assert_eq!(handler.rows().len(), 1);
    assert_eq!(
        handler.rows()[0].get(0),
        Some(&PgValue::Text("foo".into()))
    );
    assert_eq!(handler.command_tag(), Some("SELECT 1"));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_parameter_round_trip() {
    let mut conn = get_conn().await;
    let table = TestTable::new(
        &mut conn,
        "id SERIAL PRIMARY KEY, i INT, t TEXT, b BYTEA, j JSONB",
    )
    .await;

    let json = serde_json::json!({"a": 1});
    conn.exec_drop(
        &format!("INSERT INTO {} (i, t, b, j) VALUES ($1, $2, $3, $4)", table.name),
        &[
            Some(PgValue::Int4(2147483647)),
            Some(PgValue::Text("héllo".into())),
            Some(PgValue::Bytea(vec![0x00, 0xFF])),
            Some(PgValue::Jsonb(json.clone())),
        ],
    )
    .await
    .unwrap();

    let rows = conn
        .exec_collect(&format!("SELECT i, t, b, j FROM {}", table.name), &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some(&PgValue::Int4(2147483647)));
    assert_eq!(rows[0].get(1), Some(&PgValue::Text("héllo".into())));
    assert_eq!(rows[0].get(2), Some(&PgValue::Bytea(vec![0x00, 0xFF])));
    assert_eq!(rows[0].get(3), Some(&PgValue::Jsonb(json)));

    table.cleanup(&mut conn).await;
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_null_round_trip() {
    let mut conn = get_conn().await;

    let rows = conn
        .exec_collect("SELECT $1::int, ''::text", &[None])
        .await
        .unwrap();
    assert_eq!(rows[0].get(0), None);
    // Zero-length payloads are values, not NULLs
    assert_eq!(rows[0].get(1), Some(&PgValue::Text(String::new())));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_statement_cache_reuse() {
    let mut conn = get_conn().await;

    let sql = "SELECT $1::int + 1";
    for i in 0..3 {
        let rows = conn
            .exec_collect(sql, &[Some(PgValue::Int4(i))])
            .await
            .unwrap();
        assert_eq!(rows[0].get(0), Some(&PgValue::Int4(i + 1)));
    }
    // One cached entry despite three executions
    assert_eq!(conn.cached_statements(), 1);

    // A whitespace variation is a distinct cache entry
    conn.exec_collect("SELECT $1::int  + 1", &[Some(PgValue::Int4(0))])
        .await
        .unwrap();
    assert_eq!(conn.cached_statements(), 2);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_rows_affected() {
    let mut conn = get_conn().await;
    let table = TestTable::new(&mut conn, "v INT").await;

    let affected = conn
        .exec_drop(
            &format!("INSERT INTO {} SELECT generate_series(1, 5)", table.name),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(affected, Some(5));

    let affected = conn
        .exec_drop(&format!("UPDATE {} SET v = v + 1 WHERE v > 3", table.name), &[])
        .await
        .unwrap();
    assert_eq!(affected, Some(2));

    table.cleanup(&mut conn).await;
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_server_error_recovers_outside_transaction() {
    let mut conn = get_conn().await;

    let err = conn.query_drop("SELECT no_such_column").await.unwrap_err();
    assert_eq!(err.sqlstate(), Some("42703"));

    // The session drained to ReadyForQuery and stays usable
    let rows = conn.query_collect("SELECT 1").await.unwrap();
    assert_eq!(rows.len(), 1);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_portal_fetch_in_batches() {
    let mut conn = get_conn().await;

    // Portals survive Sync only inside an explicit transaction
    let tx = conn.begin(TxOpts::default()).await.unwrap();

    let mut portal = conn
        .exec_portal("SELECT generate_series(1, 10)", &[])
        .await
        .unwrap();

    let mut total = 0;
    let mut batches = 0;
    while !portal.is_complete() {
        let rows = portal.fetch_collect(&mut conn, 4).await.unwrap();
        total += rows.len();
        batches += 1;
        assert!(batches < 10, "portal never completed");
    }
    assert_eq!(total, 10);
    // 4 + 4 + 2
    assert_eq!(batches, 3);

    portal.close(&mut conn).await.unwrap();
    tx.commit(&mut conn).await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_array_and_numeric_round_trip() {
    use rust_decimal::Decimal;
    use std::str::FromStr;

    let mut conn = get_conn().await;

    let rows = conn
        .exec_collect(
            "SELECT $1::int4[], $2::numeric",
            &[
                Some(PgValue::Array(pgnet::value::PgArray::new(
                    pgnet::protocol::types::oid::INT4,
                    vec![Some(PgValue::Int4(1)), None, Some(PgValue::Int4(3))],
                ))),
                Some(PgValue::Numeric(Decimal::from_str("123.45").unwrap())),
            ],
        )
        .await
        .unwrap();

    match rows[0].get(0) {
        Some(PgValue::Array(a)) => {
            assert_eq!(
                a.elements,
                vec![Some(PgValue::Int4(1)), None, Some(PgValue::Int4(3))]
            );
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(
        rows[0].get(1),
        Some(&PgValue::Numeric(Decimal::from_str("123.45").unwrap()))
    );

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_notices_are_delivered() {
    let mut conn = get_conn().await;
    let mut notices = conn.notices(8);

    conn.query_drop("DROP TABLE IF EXISTS pgnet_definitely_missing")
        .await
        .unwrap();

    let notice = notices.try_recv().expect("expected a notice");
    assert_eq!(notice.severity(), "NOTICE");

    conn.close().await.unwrap();
}
