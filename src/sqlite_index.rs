//! SQLite-backed [`DocumentIndex`] implementation.
//!
//! Keyset pagination is pushed into SQL with row-value style conditions on
//! `(endpoint, id)`; filters compile to a [`SqlFragment`] whose parameters
//! are bound in placeholder order.

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{query::Query, Row, Sqlite, SqlitePool};

use aasx_index_core::error::IndexError;
use aasx_index_core::models::{
    Cursor, Direction, DocumentDescriptor, DocumentKey, ElementRow, Endpoint, Page, TypedValue,
};
use aasx_index_core::query::{normalize_filter, SqlFragment, SqlParam};
use aasx_index_core::store::DocumentIndex;

use crate::db;
use crate::migrate;

const DOCUMENT_COLUMNS: &str = "documents.endpoint, documents.id, documents.idShort, \
    documents.address, documents.checksum, documents.timestamp, documents.readonly, \
    documents.onlineReady, documents.parentId, documents.assetId, documents.thumbnail";

/// SQLite implementation of the [`DocumentIndex`] trait.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Connects to `url` and creates the schema if needed.
    pub async fn open(url: &str) -> Result<Self, IndexError> {
        let pool = db::connect(url).await.map_err(storage)?;
        migrate::run_migrations(&pool).await.map_err(storage)?;
        Ok(Self { pool })
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn page(
        &self,
        endpoint: Option<&str>,
        cursor: &Cursor,
        fragment: Option<&SqlFragment>,
    ) -> Result<Page<DocumentDescriptor>, IndexError> {
        let limit = cursor.limit.max(1);
        let scope = Scope { endpoint, fragment };

        match cursor.direction() {
            Direction::Forward(after) => {
                let mut items = self.fetch(&scope, after.map(|k| (k, Side::After)), limit + 1).await?;
                let mut next = None;
                if items.len() > limit {
                    items.truncate(limit);
                    next = items.last().map(DocumentDescriptor::key);
                }
                let previous = match items.first().map(DocumentDescriptor::key) {
                    Some(first) if self.exists(&scope, &first, Side::Before).await? => Some(first),
                    _ => None,
                };
                Ok(Page {
                    previous,
                    next,
                    items,
                })
            }
            Direction::Backward(before) => {
                let mut items = self.fetch(&scope, Some((before, Side::Before)), limit + 1).await?;
                let mut previous = None;
                if items.len() > limit {
                    items.truncate(limit);
                    previous = items.last().map(DocumentDescriptor::key);
                }
                items.reverse();
                let next = match items.last().map(DocumentDescriptor::key) {
                    Some(last) if self.exists(&scope, &last, Side::After).await? => Some(last),
                    _ => None,
                };
                Ok(Page {
                    previous,
                    next,
                    items,
                })
            }
        }
    }

    /// Fetches up to `limit` rows beyond `boundary`, nearest first.
    async fn fetch(
        &self,
        scope: &Scope<'_>,
        boundary: Option<(&DocumentKey, Side)>,
        limit: usize,
    ) -> Result<Vec<DocumentDescriptor>, IndexError> {
        let (condition, mut params) = scope.condition(boundary);
        let order = match boundary {
            Some((_, Side::Before)) => "DESC",
            _ => "ASC",
        };
        let sql = format!(
            "SELECT {cols} FROM documents WHERE {cond} \
             ORDER BY documents.endpoint {order}, documents.id {order} LIMIT ?",
            cols = DOCUMENT_COLUMNS,
            cond = condition,
            order = order,
        );
        params.push(SqlParam::Integer(limit as i64));

        let rows = bind_all(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(descriptor_from_row).collect()
    }

    async fn exists(
        &self,
        scope: &Scope<'_>,
        key: &DocumentKey,
        side: Side,
    ) -> Result<bool, IndexError> {
        let (condition, params) = scope.condition(Some((key, side)));
        let sql = format!("SELECT EXISTS (SELECT 1 FROM documents WHERE {})", condition);
        let row = bind_all(sqlx::query(&sql), &params)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let found: bool = row.try_get(0).map_err(storage)?;
        Ok(found)
    }

    async fn document_uuid(&self, key: &DocumentKey) -> Result<Option<i64>, IndexError> {
        sqlx::query_scalar("SELECT uuid FROM documents WHERE endpoint = ? AND id = ?")
            .bind(&key.endpoint)
            .bind(&key.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)
    }
}

#[derive(Clone, Copy)]
enum Side {
    After,
    Before,
}

struct Scope<'a> {
    endpoint: Option<&'a str>,
    fragment: Option<&'a SqlFragment>,
}

impl Scope<'_> {
    /// WHERE clause for this scope beyond an optional boundary, with its
    /// parameters in placeholder order.
    fn condition(&self, boundary: Option<(&DocumentKey, Side)>) -> (String, Vec<SqlParam>) {
        let mut clauses = vec!["1 = 1".to_string()];
        let mut params = Vec::new();

        if let Some(endpoint) = self.endpoint {
            clauses.push("documents.endpoint = ?".to_string());
            params.push(SqlParam::Text(endpoint.to_string()));
        }

        if let Some((key, side)) = boundary {
            let op = match side {
                Side::After => ">",
                Side::Before => "<",
            };
            clauses.push(format!(
                "(documents.endpoint {op} ? OR (documents.endpoint = ? AND documents.id {op} ?))",
                op = op
            ));
            params.push(SqlParam::Text(key.endpoint.clone()));
            params.push(SqlParam::Text(key.endpoint.clone()));
            params.push(SqlParam::Text(key.id.clone()));
        }

        if let Some(fragment) = self.fragment {
            clauses.push(fragment.sql.clone());
            params.extend(fragment.params.iter().cloned());
        }

        (clauses.join(" AND "), params)
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [SqlParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(s) => query.bind(s.as_str()),
            SqlParam::Real(f) => query.bind(*f),
            SqlParam::Integer(i) => query.bind(*i),
            SqlParam::Bool(b) => query.bind(*b),
        };
    }
    query
}

fn storage(err: sqlx::Error) -> IndexError {
    IndexError::Storage(err.to_string())
}

fn descriptor_from_row(row: &SqliteRow) -> Result<DocumentDescriptor, IndexError> {
    let checksum: i64 = row.try_get("checksum").map_err(storage)?;
    Ok(DocumentDescriptor {
        endpoint: row.try_get("endpoint").map_err(storage)?,
        id: row.try_get("id").map_err(storage)?,
        id_short: row.try_get("idShort").map_err(storage)?,
        address: row.try_get("address").map_err(storage)?,
        checksum: checksum as u32,
        timestamp: row.try_get("timestamp").map_err(storage)?,
        readonly: row.try_get("readonly").map_err(storage)?,
        online_ready: row.try_get("onlineReady").map_err(storage)?,
        parent_id: row.try_get("parentId").map_err(storage)?,
        asset_id: row.try_get("assetId").map_err(storage)?,
        thumbnail: row.try_get("thumbnail").map_err(storage)?,
    })
}

fn element_from_row(key: &DocumentKey, row: &SqliteRow) -> Result<ElementRow, IndexError> {
    let string: Option<String> = row.try_get("stringValue").map_err(storage)?;
    let number: Option<f64> = row.try_get("numberValue").map_err(storage)?;
    let date: Option<i64> = row.try_get("dateValue").map_err(storage)?;
    let bigint: Option<i64> = row.try_get("bigintValue").map_err(storage)?;
    let boolean: Option<bool> = row.try_get("booleanValue").map_err(storage)?;

    let value = if let Some(s) = string {
        Some(TypedValue::String(s))
    } else if let Some(n) = number {
        Some(TypedValue::Number(n))
    } else if let Some(ms) = date {
        DateTime::from_timestamp_millis(ms).map(TypedValue::Date)
    } else if let Some(i) = bigint {
        Some(TypedValue::BigInt(i))
    } else {
        boolean.map(TypedValue::Boolean)
    };

    Ok(ElementRow {
        document: key.clone(),
        model_type: row.try_get("modelType").map_err(storage)?,
        id_short: row.try_get("idShort").map_err(storage)?,
        language: row.try_get("language").map_err(storage)?,
        value,
    })
}

#[async_trait]
impl DocumentIndex for SqliteIndex {
    async fn get_page(
        &self,
        endpoint: Option<&str>,
        cursor: &Cursor,
    ) -> Result<Page<DocumentDescriptor>, IndexError> {
        self.page(endpoint, cursor, None).await
    }

    async fn query(
        &self,
        cursor: &Cursor,
        filter: Option<&str>,
        language: Option<&str>,
    ) -> Result<Page<DocumentDescriptor>, IndexError> {
        let Some(filter) = normalize_filter(filter) else {
            return self.page(None, cursor, None).await;
        };
        let fragment = SqlFragment::compile(filter, language);
        if fragment.is_empty() {
            return Ok(Page::empty());
        }
        self.page(None, cursor, Some(&fragment)).await
    }

    async fn find(
        &self,
        endpoint: Option<&str>,
        id: &str,
    ) -> Result<Option<DocumentDescriptor>, IndexError> {
        let sql = match endpoint {
            Some(_) => format!(
                "SELECT {} FROM documents WHERE documents.endpoint = ? AND documents.id = ?",
                DOCUMENT_COLUMNS
            ),
            None => format!(
                "SELECT {} FROM documents WHERE documents.id = ? \
                 ORDER BY documents.endpoint LIMIT 1",
                DOCUMENT_COLUMNS
            ),
        };
        let mut query = sqlx::query(&sql);
        if let Some(endpoint) = endpoint {
            query = query.bind(endpoint);
        }
        let row = query
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(descriptor_from_row).transpose()
    }

    async fn upsert(
        &self,
        descriptor: &DocumentDescriptor,
        rows: Option<&[ElementRow]>,
    ) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let registered: Option<i64> = sqlx::query_scalar("SELECT 1 FROM endpoints WHERE name = ?")
            .bind(&descriptor.endpoint)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;
        if registered.is_none() {
            return Err(IndexError::EndpointNotFound(descriptor.endpoint.clone()));
        }

        let uuid: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (endpoint, id, idShort, address, checksum, timestamp,
                                   readonly, onlineReady, parentId, assetId, thumbnail)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(endpoint, id) DO UPDATE SET
                idShort = excluded.idShort,
                address = excluded.address,
                checksum = excluded.checksum,
                timestamp = excluded.timestamp,
                readonly = excluded.readonly,
                onlineReady = excluded.onlineReady,
                parentId = excluded.parentId,
                assetId = excluded.assetId,
                thumbnail = excluded.thumbnail
            RETURNING uuid
            "#,
        )
        .bind(&descriptor.endpoint)
        .bind(&descriptor.id)
        .bind(&descriptor.id_short)
        .bind(&descriptor.address)
        .bind(descriptor.checksum as i64)
        .bind(descriptor.timestamp)
        .bind(descriptor.readonly)
        .bind(descriptor.online_ready)
        .bind(&descriptor.parent_id)
        .bind(&descriptor.asset_id)
        .bind(&descriptor.thumbnail)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

        if let Some(rows) = rows {
            sqlx::query("DELETE FROM elements WHERE documentId = ?")
                .bind(uuid)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;

            for row in rows {
                let (mut string, mut number, mut date, mut bigint, mut boolean) =
                    (None, None, None, None, None);
                match &row.value {
                    Some(TypedValue::String(s)) => string = Some(s.as_str()),
                    Some(TypedValue::Number(n)) => number = Some(*n),
                    Some(TypedValue::Date(d)) => date = Some(d.timestamp_millis()),
                    Some(TypedValue::BigInt(i)) => bigint = Some(*i),
                    Some(TypedValue::Boolean(b)) => boolean = Some(*b),
                    None => {}
                }
                sqlx::query(
                    r#"
                    INSERT INTO elements (documentId, modelType, idShort, language,
                                          stringValue, numberValue, dateValue,
                                          bigintValue, booleanValue)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(uuid)
                .bind(&row.model_type)
                .bind(&row.id_short)
                .bind(&row.language)
                .bind(string)
                .bind(number)
                .bind(date)
                .bind(bigint)
                .bind(boolean)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
            }
        }

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn remove(&self, endpoint: Option<&str>, id: Option<&str>) -> Result<bool, IndexError> {
        let result = match (endpoint, id) {
            (Some(e), Some(id)) => {
                sqlx::query("DELETE FROM documents WHERE endpoint = ? AND id = ?")
                    .bind(e)
                    .bind(id)
                    .execute(&self.pool)
                    .await
            }
            (Some(e), None) => {
                sqlx::query("DELETE FROM documents WHERE endpoint = ?")
                    .bind(e)
                    .execute(&self.pool)
                    .await
            }
            (None, Some(id)) => {
                sqlx::query(
                    "DELETE FROM documents WHERE uuid = \
                     (SELECT uuid FROM documents WHERE id = ? ORDER BY endpoint LIMIT 1)",
                )
                .bind(id)
                .execute(&self.pool)
                .await
            }
            (None, None) => return Ok(false),
        };
        Ok(result.map_err(storage)?.rows_affected() > 0)
    }

    async fn list_endpoint_documents(
        &self,
        endpoint: &str,
    ) -> Result<Vec<DocumentDescriptor>, IndexError> {
        let sql = format!(
            "SELECT {} FROM documents WHERE documents.endpoint = ? ORDER BY documents.id",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(endpoint)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(descriptor_from_row).collect()
    }

    async fn element_rows(&self, key: &DocumentKey) -> Result<Vec<ElementRow>, IndexError> {
        let Some(uuid) = self.document_uuid(key).await? else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            "SELECT modelType, idShort, language, stringValue, numberValue, dateValue, \
             bigintValue, booleanValue FROM elements WHERE documentId = ? ORDER BY id",
        )
        .bind(uuid)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(|row| element_from_row(key, row)).collect()
    }

    async fn endpoints(&self) -> Result<Vec<Endpoint>, IndexError> {
        let rows = sqlx::query("SELECT name, url, protocol, version FROM endpoints ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(endpoint_from_row).collect()
    }

    async fn find_endpoint(&self, name: &str) -> Result<Option<Endpoint>, IndexError> {
        let row = sqlx::query("SELECT name, url, protocol, version FROM endpoints WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(endpoint_from_row).transpose()
    }

    async fn add_endpoint(&self, endpoint: &Endpoint) -> Result<(), IndexError> {
        let result = sqlx::query(
            "INSERT INTO endpoints (name, url, protocol, version) VALUES (?, ?, ?, ?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&endpoint.name)
        .bind(&endpoint.url)
        .bind(&endpoint.protocol)
        .bind(&endpoint.version)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(IndexError::EndpointExists(endpoint.name.clone()));
        }
        Ok(())
    }

    async fn remove_endpoint(&self, name: &str) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        sqlx::query("DELETE FROM documents WHERE endpoint = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        let result = sqlx::query("DELETE FROM endpoints WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(IndexError::EndpointNotFound(name.to_string()));
        }
        tx.commit().await.map_err(storage)?;
        Ok(())
    }
}

fn endpoint_from_row(row: &SqliteRow) -> Result<Endpoint, IndexError> {
    Ok(Endpoint {
        name: row.try_get("name").map_err(storage)?,
        url: row.try_get("url").map_err(storage)?,
        protocol: row.try_get("protocol").map_err(storage)?,
        version: row.try_get("version").map_err(storage)?,
    })
}
