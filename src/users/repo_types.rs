use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Placeholder avatar for accounts registered without a picture.
pub const DEFAULT_PROFILE_PICTURE: &str =
    "https://cdn-icons-png.flaticon.com/512/149/149071.png";

/// Stored as lowercase text; the column carries a CHECK with the same set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Instructor,
    #[default]
    Student,
}

impl UserRole {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "instructor" => Some(UserRole::Instructor),
            "student" => Some(UserRole::Student),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Instructor => "instructor",
            UserRole::Student => "student",
        }
    }
}

/// Full user record as stored. Deliberately not serializable; anything
/// leaving the service goes through [`User::into_public`] first.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub profile_picture: String,
    pub role: UserRole,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// The projection of a user that crosses the wire.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub profile_picture: String,
    pub role: UserRole,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn into_public(self) -> PublicUser {
        PublicUser {
            id: self.id,
            username: self.username,
            email: self.email,
            profile_picture: self.profile_picture,
            role: self.role,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
