use channel_inbox::db::{
    datetime_to_millis, db_kind_from_url, init_db, millis_to_datetime, rewrite_sql, DbKind,
};
use sqlx::AnyPool;
use tempfile::TempDir;

#[test]
fn test_db_kind_from_url_sqlite() {
    assert_eq!(db_kind_from_url("sqlite://test.db"), DbKind::Sqlite);
    assert_eq!(db_kind_from_url("SQLite://test.db"), DbKind::Sqlite);
}

#[test]
fn test_db_kind_from_url_postgres() {
    assert_eq!(db_kind_from_url("postgres://localhost/inbox"), DbKind::Postgres);
    assert_eq!(db_kind_from_url("postgresql://localhost/inbox"), DbKind::Postgres);
}

#[test]
fn test_rewrite_sql_sqlite() {
    let sql = "SELECT * FROM messages WHERE channel = ? AND provider_message_id = ?";
    assert_eq!(rewrite_sql(sql, DbKind::Sqlite).as_ref(), sql);
}

#[test]
fn test_rewrite_sql_postgres() {
    let sql = "UPDATE conversations SET unread_count = unread_count + ? WHERE id = ?";
    assert_eq!(
        rewrite_sql(sql, DbKind::Postgres).as_ref(),
        "UPDATE conversations SET unread_count = unread_count + $1 WHERE id = $2"
    );
}

#[test]
fn test_millis_conversion() {
    let dt = millis_to_datetime(1_700_000_000_000);
    assert_eq!(dt.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    assert_eq!(datetime_to_millis(dt), 1_700_000_000_000);
}

#[tokio::test]
async fn test_init_db_is_idempotent() {
    sqlx::any::install_default_drivers();
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("schema.db").to_string_lossy());
    let pool = AnyPool::connect(&url).await.unwrap();

    init_db(&pool, DbKind::Sqlite).await.unwrap();
    init_db(&pool, DbKind::Sqlite).await.unwrap();

    for table in ["contacts", "conversations", "messages", "attachments"] {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(1) FROM {table}"))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0, "{table} should start empty");
    }
}
