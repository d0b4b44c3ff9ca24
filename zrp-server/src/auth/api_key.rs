//! Bearer API keys.
//!
//! Keys are `zrp_` + 30 random alphanumeric characters. Only a salted
//! SHA-256 hash is stored; the full key is shown exactly once at creation
//! and the 12-character prefix is what humans see afterwards. Verification
//! is constant-time. `last_used_at` is stamped asynchronously so the
//! request path never waits on that write.

use crate::auth::{CurrentUser, Role, token};
use crate::db::Db;
use crate::utils::{AppResult, now_millis};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ApiKeyInfo {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub prefix: String,
    pub enabled: bool,
    pub expires_at: Option<i64>,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
}

/// The one-time response to key creation: the only place the full key
/// appears.
#[derive(Debug, Serialize)]
pub struct IssuedKey {
    pub id: i64,
    pub name: String,
    pub prefix: String,
    pub key: String,
}

fn hash_key(salt_hex: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt_hex.as_bytes());
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

fn random_salt() -> String {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes).expect("system RNG unavailable");
    hex::encode(bytes)
}

/// Issue a new key for a user.
pub async fn issue(
    db: &Db,
    user_id: i64,
    name: &str,
    expires_at: Option<i64>,
) -> AppResult<IssuedKey> {
    let key = token::new_api_key();
    let prefix = token::key_prefix(&key);
    let salt = random_salt();
    let key_hash = hash_key(&salt, &key);

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO api_keys (user_id, name, prefix, salt, key_hash, enabled, expires_at, created_at) \
         VALUES (?, ?, ?, ?, ?, 1, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(name)
    .bind(&prefix)
    .bind(&salt)
    .bind(&key_hash)
    .bind(expires_at)
    .bind(now_millis())
    .fetch_one(&db.pool)
    .await?;

    Ok(IssuedKey {
        id,
        name: name.to_string(),
        prefix,
        key,
    })
}

/// Resolve a presented bearer key into a user. Disabled, expired and
/// unknown keys resolve to `None`.
pub async fn verify(db: &Db, presented: &str) -> AppResult<Option<CurrentUser>> {
    if !presented.starts_with("zrp_") {
        return Ok(None);
    }
    let prefix = token::key_prefix(presented);

    let rows: Vec<(i64, String, String, Option<i64>, i64, String, String)> = sqlx::query_as(
        "SELECT k.id, k.salt, k.key_hash, k.expires_at, u.id, u.username, u.role \
         FROM api_keys k JOIN users u ON u.id = k.user_id \
         WHERE k.prefix = ? AND k.enabled = 1 AND u.is_active = 1",
    )
    .bind(&prefix)
    .fetch_all(&db.pool)
    .await?;

    let now = now_millis();
    for (key_id, salt, stored_hash, expires_at, user_id, username, role) in rows {
        if let Some(exp) = expires_at
            && exp <= now
        {
            continue;
        }
        let candidate = hash_key(&salt, presented);
        let matches = ring::constant_time::verify_slices_are_equal(
            candidate.as_bytes(),
            stored_hash.as_bytes(),
        )
        .is_ok();
        if matches {
            touch_last_used(db, key_id);
            return Ok(Role::parse(&role).map(|role| CurrentUser {
                id: user_id,
                username,
                role,
            }));
        }
    }
    Ok(None)
}

/// Stamp `last_used_at` off the request path.
fn touch_last_used(db: &Db, key_id: i64) {
    let pool = db.pool.clone();
    let now = now_millis();
    tokio::spawn(async move {
        if let Err(e) = sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(now)
            .bind(key_id)
            .execute(&pool)
            .await
        {
            tracing::warn!(error = %e, key_id, "Failed to stamp api key last_used_at");
        }
    });
}

pub async fn list_for_user(db: &Db, user_id: i64) -> AppResult<Vec<ApiKeyInfo>> {
    let keys = sqlx::query_as::<_, ApiKeyInfo>(
        "SELECT id, user_id, name, prefix, enabled, expires_at, last_used_at, created_at \
         FROM api_keys WHERE user_id = ? ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(&db.pool)
    .await?;
    Ok(keys)
}

/// Revoke (delete) a key owned by `user_id`. Returns false when no such
/// key exists.
pub async fn revoke(db: &Db, user_id: i64, key_id: i64) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM api_keys WHERE id = ? AND user_id = ?")
        .bind(key_id)
        .bind(user_id)
        .execute(&db.pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_enabled(db: &Db, user_id: i64, key_id: i64, enabled: bool) -> AppResult<bool> {
    let result = sqlx::query("UPDATE api_keys SET enabled = ? WHERE id = ? AND user_id = ?")
        .bind(enabled)
        .bind(key_id)
        .bind(user_id)
        .execute(&db.pool)
        .await?;
    Ok(result.rows_affected() > 0)
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
    async fn issue_and_verify() {
        let (db, _dir) = test_db().await;
        let uid = admin_id(&db).await;

        let issued = issue(&db, uid, "ci", None).await.unwrap();
        assert!(issued.key.starts_with("zrp_"));
        assert_eq!(issued.prefix.len(), 12);

        let user = verify(&db, &issued.key).await.unwrap().unwrap();
        assert_eq!(user.username, "admin");

        // Wrong key with the right prefix must not verify.
        let mut forged = issued.key.clone();
        forged.pop();
        forged.push('x');
        assert!(verify(&db, &forged).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_and_revoked_keys_rejected() {
        let (db, _dir) = test_db().await;
        let uid = admin_id(&db).await;

        let expired = issue(&db, uid, "old", Some(now_millis() - 1000)).await.unwrap();
        assert!(verify(&db, &expired.key).await.unwrap().is_none());

        let live = issue(&db, uid, "live", None).await.unwrap();
        assert!(verify(&db, &live.key).await.unwrap().is_some());
        assert!(revoke(&db, uid, live.id).await.unwrap());
        assert!(verify(&db, &live.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_key_rejected() {
        let (db, _dir) = test_db().await;
        let uid = admin_id(&db).await;

        let key = issue(&db, uid, "toggle", None).await.unwrap();
        assert!(set_enabled(&db, uid, key.id, false).await.unwrap());
        assert!(verify(&db, &key.key).await.unwrap().is_none());
        assert!(set_enabled(&db, uid, key.id, true).await.unwrap());
        assert!(verify(&db, &key.key).await.unwrap().is_some());
    }
}
