//! Audit log SQLite storage.
//!
//! Append and query only; the single delete path is the retention cleanup.

use sqlx::SqlitePool;

use super::types::{AuditEntry, AuditQuery};
use crate::utils::{AppResult, now_millis, time::DAY_MS};

/// Dynamic bind value for building parameterized filter queries.
enum BindValue {
    Int(i64),
    Str(String),
}

#[derive(Clone)]
pub struct AuditStorage {
    pool: SqlitePool,
}

impl AuditStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &self,
        user_name: Option<String>,
        action: String,
        module: String,
        record_id: String,
        summary: String,
        before_json: Option<String>,
        after_json: Option<String>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> AppResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO audit_log \
             (user_name, action, module, record_id, summary, before_json, after_json, ip, user_agent, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(user_name)
        .bind(action)
        .bind(module)
        .bind(record_id)
        .bind(summary)
        .bind(before_json)
        .bind(after_json)
        .bind(ip)
        .bind(user_agent)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    fn build_filter(q: &AuditQuery) -> (String, Vec<BindValue>) {
        let mut conditions = Vec::new();
        let mut binds: Vec<BindValue> = Vec::new();

        if let Some(ref module) = q.module {
            conditions.push("module = ?");
            binds.push(BindValue::Str(module.clone()));
        }
        if let Some(ref user) = q.user {
            conditions.push("user_name = ?");
            binds.push(BindValue::Str(user.clone()));
        }
        if let Some(ref record_id) = q.record_id {
            conditions.push("record_id = ?");
            binds.push(BindValue::Str(record_id.clone()));
        }
        if let Some(from) = q.from {
            conditions.push("created_at >= ?");
            binds.push(BindValue::Int(from));
        }
        if let Some(to) = q.to {
            conditions.push("created_at <= ?");
            binds.push(BindValue::Int(to));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        (where_clause, binds)
    }

    /// Filtered, paginated read, newest first. Returns `(rows, total)`.
    pub async fn query(&self, q: &AuditQuery) -> AppResult<(Vec<AuditEntry>, i64)> {
        let (where_clause, binds) = Self::build_filter(q);

        let count_sql = format!("SELECT COUNT(*) FROM audit_log{where_clause}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for v in &binds {
            count_query = match v {
                BindValue::Int(i) => count_query.bind(i),
                BindValue::Str(s) => count_query.bind(s),
            };
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let select_sql = format!(
            "SELECT id, user_name, action, module, record_id, summary, before_json, after_json, \
             ip, user_agent, created_at \
             FROM audit_log{where_clause} ORDER BY id DESC LIMIT ? OFFSET ?"
        );
        let mut select_query = sqlx::query_as::<_, AuditEntry>(&select_sql);
        for v in &binds {
            select_query = match v {
                BindValue::Int(i) => select_query.bind(i),
                BindValue::Str(s) => select_query.bind(s),
            };
        }
        select_query = select_query.bind(q.limit.clamp(1, 1000)).bind(q.offset.max(0));
        let rows = select_query.fetch_all(&self.pool).await?;

        Ok((rows, total))
    }

    /// Export the filtered rows as CSV (snapshots excluded).
    pub async fn export_csv(&self, q: &AuditQuery) -> AppResult<String> {
        let mut query = q.clone();
        query.limit = 10_000;
        query.offset = 0;
        let (rows, _) = self.query(&query).await?;

        let mut out = String::from("id,created_at,user,action,module,record_id,summary,ip\n");
        for e in rows {
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{}\n",
                e.id,
                e.created_at,
                csv_field(e.user_name.as_deref().unwrap_or("")),
                csv_field(&e.action),
                csv_field(&e.module),
                csv_field(&e.record_id),
                csv_field(&e.summary),
                csv_field(e.ip.as_deref().unwrap_or("")),
            ));
        }
        Ok(out)
    }

    /// Delete rows older than the retention window. Returns rows removed.
    pub async fn cleanup(&self, retention_days: i64) -> AppResult<u64> {
        let cutoff = now_millis() - retention_days.max(1) * DAY_MS;
        let result = sqlx::query("DELETE FROM audit_log WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    #[tokio::test]
    async fn append_and_filter() {
        let (db, _dir) = test_db().await;
        let storage = AuditStorage::new(db.pool.clone());

        storage
            .append(
                Some("alice".into()),
                "create".into(),
                "vendors".into(),
                "V-001".into(),
                "Created vendor Acme".into(),
                None,
                Some(r#"{"name":"Acme"}"#.into()),
                Some("10.0.0.1".into()),
                None,
            )
            .await
            .unwrap();
        storage
            .append(
                Some("bob".into()),
                "update".into(),
                "inventory".into(),
                "RES-001".into(),
                "Adjusted stock".into(),
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let (all, total) = storage.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(total, 2);
        // Newest first.
        assert_eq!(all[0].module, "inventory");

        let (vendors, total) = storage
            .query(&AuditQuery {
                module: Some("vendors".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(vendors[0].record_id, "V-001");
        assert_eq!(vendors[0].after_json.as_deref(), Some(r#"{"name":"Acme"}"#));
    }

    #[tokio::test]
    async fn csv_escapes_fields() {
        let (db, _dir) = test_db().await;
        let storage = AuditStorage::new(db.pool.clone());
        storage
            .append(
                Some("alice".into()),
                "update".into(),
                "vendors".into(),
                "V-001".into(),
                r#"Renamed to "Acme, Inc""#.into(),
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let csv = storage.export_csv(&AuditQuery::default()).await.unwrap();
        assert!(csv.contains(r#""Renamed to ""Acme, Inc""""#));
    }

    #[tokio::test]
    async fn cleanup_respects_window() {
        let (db, _dir) = test_db().await;
        let storage = AuditStorage::new(db.pool.clone());
        storage
            .append(None, "login".into(), "auth".into(), "admin".into(), "Login".into(), None, None, None, None)
            .await
            .unwrap();

        // Age the row beyond one day, then clean with a 1-day window.
        sqlx::query("UPDATE audit_log SET created_at = created_at - ?")
            .bind(2 * DAY_MS)
            .execute(&db.pool)
            .await
            .unwrap();
        assert_eq!(storage.cleanup(1).await.unwrap(), 1);
        let (_, total) = storage.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(total, 0);
    }
}
