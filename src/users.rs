use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::web::auth::AuthClaims;

/// Durable user record backing an external identity.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Get-or-create the user row for a verified identity.
///
/// A single conditional insert keeps concurrent first-time requests from the
/// same identity from racing to duplicate rows: the losing writer lands on
/// the conflict arm and reads the existing row back. The conflict arm also
/// refreshes the denormalized profile fields, without discarding values the
/// latest token happens to omit.
pub async fn resolve_user(pool: &PgPool, claims: &AuthClaims) -> sqlx::Result<UserRecord> {
    sqlx::query_as::<_, UserRecord>(
        "INSERT INTO users (subject, email, display_name) VALUES ($1, $2, $3)
         ON CONFLICT (subject) DO UPDATE SET
             email = COALESCE(EXCLUDED.email, users.email),
             display_name = COALESCE(EXCLUDED.display_name, users.display_name)
         RETURNING id, subject, email, display_name, created_at",
    )
    .bind(&claims.subject)
    .bind(claims.email.as_deref())
    .bind(claims.display_name())
    .fetch_one(pool)
    .await
}
