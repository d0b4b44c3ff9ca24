//! Database-backed session store.
//!
//! A session is an opaque random token bound to a user row, valid for
//! 24 hours, destroyed on logout. Expired rows are purged by the periodic
//! scanner.

use crate::auth::{CurrentUser, Role, token};
use crate::db::Db;
use crate::utils::{AppResult, now_millis, time::DAY_MS};

pub const SESSION_TTL_MS: i64 = DAY_MS;

/// Cookie name carrying the session token.
pub const SESSION_COOKIE: &str = "zrp_session";

pub struct NewSession {
    pub token: String,
    pub expires_at: i64,
}

/// Create a session for `user_id`, returning the opaque token.
pub async fn create(db: &Db, user_id: i64) -> AppResult<NewSession> {
    let tok = token::random_token(token::SESSION_TOKEN_LEN);
    let now = now_millis();
    let expires_at = now + SESSION_TTL_MS;

    sqlx::query("INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&tok)
        .bind(user_id)
        .bind(now)
        .bind(expires_at)
        .execute(&db.pool)
        .await?;

    Ok(NewSession {
        token: tok,
        expires_at,
    })
}

/// Resolve a session token into a user. Expired or unknown tokens, and
/// disabled users, resolve to `None`.
pub async fn validate(db: &Db, session_token: &str) -> AppResult<Option<CurrentUser>> {
    let row: Option<(i64, String, String)> = sqlx::query_as(
        "SELECT u.id, u.username, u.role \
         FROM sessions s JOIN users u ON u.id = s.user_id \
         WHERE s.token = ? AND s.expires_at > ? AND u.is_active = 1",
    )
    .bind(session_token)
    .bind(now_millis())
    .fetch_optional(&db.pool)
    .await?;

    Ok(row.and_then(|(id, username, role)| {
        Role::parse(&role).map(|role| CurrentUser { id, username, role })
    }))
}

/// Destroy one session (logout). Unknown tokens are a no-op.
pub async fn destroy(db: &Db, session_token: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(session_token)
        .execute(&db.pool)
        .await?;
    Ok(())
}

/// Delete expired sessions; returns the number removed.
pub async fn purge_expired(db: &Db) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(now_millis())
        .execute(&db.pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    async fn admin_id(db: &Db) -> i64 {
        sqlx::query_scalar("SELECT id FROM users WHERE username = 'admin'")
            .fetch_one(&db.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_validate_destroy() {
        let (db, _dir) = test_db().await;
        let uid = admin_id(&db).await;

        let session = create(&db, uid).await.unwrap();
        let user = validate(&db, &session.token).await.unwrap().unwrap();
        assert_eq!(user.username, "admin");
        assert_eq!(user.role, Role::Admin);

        destroy(&db, &session.token).await.unwrap();
        assert!(validate(&db, &session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_rejected() {
        let (db, _dir) = test_db().await;
        let uid = admin_id(&db).await;
        let session = create(&db, uid).await.unwrap();

        // Age the row past the 24 h window.
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE token = ?")
            .bind(now_millis() - 1)
            .bind(&session.token)
            .execute(&db.pool)
            .await
            .unwrap();

        assert!(validate(&db, &session.token).await.unwrap().is_none());
        assert_eq!(purge_expired(&db).await.unwrap(), 1);
    }
}
