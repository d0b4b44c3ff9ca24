//! Database layer.
//!
//! One embedded SQLite file with a WAL journal: many concurrent readers,
//! one writer. On open the pool enables foreign-key enforcement, applies
//! the embedded migrations, and seeds the initial admin user when the user
//! table is empty. All multi-statement mutations run inside one transaction
//! obtained from [`Db::begin`]; an un-committed transaction rolls back on
//! drop.

pub mod ids;

use crate::auth::password;
use crate::utils::{AppError, AppResult, now_millis};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

/// Database service — owns the SQLite connection pool.
#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Open (creating if missing), configure pragmas, migrate, seed.
    pub async fn open(db_path: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| AppError::internal(format!("Invalid database path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_millis(500))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| AppError::internal(format!("Failed to open database: {e}")))?;

        tracing::info!("Database connection established (SQLite WAL, busy_timeout=500ms)");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::internal(format!("Failed to apply migrations: {e}")))?;

        let db = Self { pool };
        db.seed_admin().await?;
        Ok(db)
    }

    /// Begin a write transaction. SQLite serializes writers internally; the
    /// busy timeout absorbs short lock contention.
    pub async fn begin(&self) -> AppResult<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(Into::into)
    }

    /// Seed the initial admin user when the user table is empty.
    async fn seed_admin(&self) -> AppResult<()> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            return Ok(());
        }

        let initial_password =
            std::env::var("ZRP_ADMIN_PASSWORD").unwrap_or_else(|_| "admin123".to_string());
        let hash = password::hash_password(&initial_password)?;

        sqlx::query(
            "INSERT INTO users (username, password_hash, role, is_active, created_at) \
             VALUES (?, ?, 'admin', 1, ?)",
        )
        .bind("admin")
        .bind(&hash)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        tracing::info!("Seeded initial admin user (username: admin)");
        if std::env::var("ZRP_ADMIN_PASSWORD").is_err() {
            tracing::warn!("Admin user created with the default password — change it");
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    //! Test fixtures: a migrated throwaway database on a temp file.

    use super::Db;
    use tempfile::TempDir;

    pub async fn test_db() -> (Db, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("test.db");
        let db = Db::open(path.to_str().unwrap()).await.expect("open test db");
        (db, dir)
    }
}
