use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiError;
use crate::users::repo_types::{PublicUser, User, UserRole};

const USER_COLUMNS: &str =
    "id, username, email, password_hash, profile_picture, role, created_at, updated_at";
/// Listing never selects the hash at all.
const PUBLIC_COLUMNS: &str =
    "id, username, email, profile_picture, role, created_at, updated_at";

/// Maps a unique-index violation onto the field that collided. The index
/// is the authoritative uniqueness guard; pre-checks only improve the
/// error message for the common case.
fn conflict_or_internal(err: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return match db_err.constraint() {
                Some("users_email_key") => ApiError::Conflict("Email"),
                Some("users_username_key") => ApiError::Conflict("Username"),
                _ => ApiError::Conflict("Username or email"),
            };
        }
    }
    ApiError::Internal(err.into())
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Filter for the listing queries; both the page and the count must see
/// the same one.
#[derive(Debug, Default, Clone)]
pub struct ListFilter {
    pub role: Option<UserRole>,
    pub search: Option<String>,
}

impl ListFilter {
    fn role_str(&self) -> Option<&'static str> {
        self.role.map(|r| r.as_str())
    }

    fn search_pattern(&self) -> Option<String> {
        self.search.as_deref().map(like_pattern)
    }
}

impl User {
    /// Create a user. A duplicate username or email surfaces as a conflict.
    pub async fn create(
        db: &PgPool,
        username: &str,
        email: &str,
        password_hash: &str,
        role: UserRole,
        profile_picture: &str,
    ) -> Result<User, ApiError> {
        let sql = format!(
            r#"
            INSERT INTO users (username, email, password_hash, role, profile_picture)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .bind(email)
            .bind(password_hash)
            .bind(role)
            .bind(profile_picture)
            .fetch_one(db)
            .await
            .map_err(conflict_or_internal)
    }

    /// Find a user by id.
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(db)
            .await?;
        Ok(user)
    }

    /// Find a user by (lowercased) email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(db)
            .await?;
        Ok(user)
    }

    /// Single combined lookup for the registration pre-check.
    pub async fn find_conflicting(
        db: &PgPool,
        username: &str,
        email: &str,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $2 LIMIT 1"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .bind(email)
            .fetch_optional(db)
            .await?;
        Ok(user)
    }

    /// Same pre-check for updates, ignoring the record being updated.
    pub async fn find_conflicting_except(
        db: &PgPool,
        id: Uuid,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE (username = $2 OR email = $3) AND id <> $1
            LIMIT 1
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(username)
            .bind(email)
            .fetch_optional(db)
            .await?;
        Ok(user)
    }

    /// Partial update; absent fields keep their stored value. `None` result
    /// means the record does not exist.
    pub async fn apply_update(
        db: &PgPool,
        id: Uuid,
        username: Option<&str>,
        email: Option<&str>,
        role: Option<UserRole>,
        profile_picture: Option<&str>,
    ) -> Result<Option<User>, ApiError> {
        let sql = format!(
            r#"
            UPDATE users
            SET username = COALESCE($2, username),
                email = COALESCE($3, email),
                role = COALESCE($4, role),
                profile_picture = COALESCE($5, profile_picture),
                updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(username)
            .bind(email)
            .bind(role)
            .bind(profile_picture)
            .fetch_optional(db)
            .await
            .map_err(conflict_or_internal)
    }

    pub async fn set_profile_picture(
        db: &PgPool,
        id: Uuid,
        url: &str,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users
            SET profile_picture = $2, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(url)
            .fetch_optional(db)
            .await?;
        Ok(user)
    }

    /// Returns whether a row was actually removed.
    pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// One page of sanitized records, newest first.
    pub async fn list_public(
        db: &PgPool,
        filter: &ListFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<PublicUser>> {
        let sql = format!(
            r#"
            SELECT {PUBLIC_COLUMNS} FROM users
            WHERE ($1::text IS NULL OR role = $1)
              AND ($2::text IS NULL OR username ILIKE $2 OR email ILIKE $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        );
        let users = sqlx::query_as::<_, PublicUser>(&sql)
            .bind(filter.role_str())
            .bind(filter.search_pattern())
            .bind(limit)
            .bind(offset)
            .fetch_all(db)
            .await?;
        Ok(users)
    }

    /// Total row count under the same filter as [`User::list_public`].
    pub async fn count(db: &PgPool, filter: &ListFilter) -> anyhow::Result<i64> {
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM users
            WHERE ($1::text IS NULL OR role = $1)
              AND ($2::text IS NULL OR username ILIKE $2 OR email ILIKE $2)
            "#,
        )
        .bind(filter.role_str())
        .bind(filter.search_pattern())
        .fetch_one(db)
        .await?;
        Ok(total)
    }
}
