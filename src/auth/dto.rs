use serde::{Deserialize, Serialize};

use crate::users::repo_types::{PublicUser, UserRole};
use crate::users::validate;

/// Login body. Fields are optional so a partial body still reaches the
/// required-field checks instead of dying in the deserializer.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Text fields collected off the registration multipart form.
#[derive(Debug, Default)]
pub struct RegisterForm {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

/// A registration that passed every rule. Username is trimmed and the
/// email lowercased; the password is still plaintext at this point.
#[derive(Debug)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
}

impl RegisterForm {
    /// Checks every rule and reports all failures at once.
    pub fn validate(self) -> Result<NewAccount, Vec<String>> {
        let mut errors = Vec::new();

        let username = self.username.as_deref().map(str::trim).unwrap_or_default();
        if username.is_empty() {
            errors.push("Username is required".to_string());
        } else if let Err(e) = validate::validate_username(username) {
            errors.push(e);
        }

        let email = self
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .unwrap_or_default();
        if email.is_empty() {
            errors.push("Email is required".to_string());
        } else if let Err(e) = validate::validate_email(&email) {
            errors.push(e);
        }

        let password = self.password.unwrap_or_default();
        if password.is_empty() {
            errors.push("Password is required".to_string());
        } else if let Err(e) = validate::validate_password(&password) {
            errors.push(e);
        }

        let role = match self.role.as_deref().map(str::trim) {
            None | Some("") => UserRole::default(),
            Some(raw) => match UserRole::parse(raw) {
                Some(role) => role,
                None => {
                    errors.push("Role must be one of admin, instructor, student".to_string());
                    UserRole::default()
                }
            },
        };

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(NewAccount {
            username: username.to_string(),
            email,
            password,
            role,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    pub user: PublicUser,
}
