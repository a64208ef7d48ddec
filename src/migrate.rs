use sqlx::SqlitePool;

/// Creates the relational schema. Idempotent.
///
/// `elements.documentId` references the surrogate `documents.uuid`; the
/// typed value columns are mutually exclusive per row.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS endpoints (
            name TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            protocol TEXT NOT NULL,
            version TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            uuid INTEGER PRIMARY KEY AUTOINCREMENT,
            endpoint TEXT NOT NULL,
            id TEXT NOT NULL,
            idShort TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL,
            checksum INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            readonly INTEGER NOT NULL DEFAULT 0,
            onlineReady INTEGER NOT NULL DEFAULT 0,
            parentId TEXT,
            assetId TEXT,
            thumbnail TEXT,
            UNIQUE(endpoint, id),
            FOREIGN KEY (endpoint) REFERENCES endpoints(name) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS elements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            documentId INTEGER NOT NULL,
            modelType TEXT NOT NULL,
            idShort TEXT NOT NULL DEFAULT '',
            language TEXT,
            stringValue TEXT,
            numberValue REAL,
            dateValue INTEGER,
            bigintValue INTEGER,
            booleanValue INTEGER,
            FOREIGN KEY (documentId) REFERENCES documents(uuid) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_elements_document ON elements(documentId)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_elements_model ON elements(modelType, idShort)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_id ON documents(id)")
        .execute(pool)
        .await?;

    Ok(())
}
