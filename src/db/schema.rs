use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Purchases (one row per checkout attempt, never deleted)
        -- status carries the business status, or a reconciling:<...> lock
        -- token while the reconciler owns the row.
        CREATE TABLE IF NOT EXISTS purchases (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            amount_minor INTEGER NOT NULL,
            provider TEXT NOT NULL,
            payment_id TEXT,
            status TEXT NOT NULL,
            paid_at INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_purchases_user ON purchases(user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_purchases_unsettled
            ON purchases(provider, created_at) WHERE paid_at IS NULL;

        -- Access grants (one per user/course pair; insert is idempotent)
        CREATE TABLE IF NOT EXISTS access_grants (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            purchase_id TEXT NOT NULL REFERENCES purchases(id),
            status TEXT NOT NULL DEFAULT 'active',
            granted_at INTEGER NOT NULL,

            UNIQUE(user_id, course_id)
        );
        CREATE INDEX IF NOT EXISTS idx_access_grants_user ON access_grants(user_id);

        -- Courses (catalog glue; the real catalog is an external collaborator)
        CREATE TABLE IF NOT EXISTS courses (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            price INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#,
    )
}
