use serde::{Deserialize, Serialize};

use crate::users::repo_types::{PublicUser, UserRole};
use crate::users::validate;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

/// Query string of the listing endpoint. Page and limit are lenient:
/// junk values fall back to their defaults rather than failing the
/// request. An unknown role is a real error, handled where it is parsed.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ListUsersQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub role: Option<String>,
    pub search: Option<String>,
}

impl ListUsersQuery {
    pub fn page(&self) -> i64 {
        self.page
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(DEFAULT_PAGE)
    }

    pub fn limit(&self) -> i64 {
        self.limit
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|l| l.clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT)
    }

    /// Offset of the requested page. Saturates so an absurd page number
    /// degrades to an empty page instead of overflowing.
    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.limit())
    }

    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_users: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
        Self {
            current_page: page,
            total_pages,
            total_users: total,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

/// Profile update body. Every field is optional; empty strings count as
/// absent so a form submitting blank inputs does not clobber anything.
#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub profile_picture: Option<String>,
}

/// A validated, normalized set of profile changes.
#[derive(Debug, Default)]
pub struct ProfileChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<UserRole>,
    pub profile_picture: Option<String>,
}

impl UpdateUserRequest {
    pub fn validate(self) -> Result<ProfileChanges, Vec<String>> {
        let mut errors = Vec::new();
        let mut changes = ProfileChanges::default();

        if let Some(username) = non_blank(self.username) {
            let username = username.trim().to_string();
            match validate::validate_username(&username) {
                Ok(()) => changes.username = Some(username),
                Err(e) => errors.push(e),
            }
        }

        if let Some(email) = non_blank(self.email) {
            let email = email.trim().to_lowercase();
            match validate::validate_email(&email) {
                Ok(()) => changes.email = Some(email),
                Err(e) => errors.push(e),
            }
        }

        if let Some(role) = non_blank(self.role) {
            match UserRole::parse(role.trim()) {
                Some(role) => changes.role = Some(role),
                None => errors.push("Role must be one of admin, instructor, student".to_string()),
            }
        }

        if let Some(url) = non_blank(self.profile_picture) {
            let url = url.trim().to_string();
            match validate::validate_image_url(&url) {
                Ok(()) => changes.profile_picture = Some(url),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(changes)
        } else {
            Err(errors)
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub success: bool,
    pub message: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub success: bool,
    pub message: String,
    pub users: Vec<PublicUser>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_and_limit_fall_back_on_junk() {
        let q = ListUsersQuery {
            page: Some("abc".into()),
            limit: Some("many".into()),
            ..Default::default()
        };
        assert_eq!(q.page(), DEFAULT_PAGE);
        assert_eq!(q.limit(), DEFAULT_LIMIT);

        let q = ListUsersQuery::default();
        assert_eq!(q.page(), 1);
        assert_eq!(q.limit(), 10);
    }

    #[test]
    fn page_and_limit_are_clamped() {
        let q = ListUsersQuery {
            page: Some("-3".into()),
            limit: Some("0".into()),
            ..Default::default()
        };
        assert_eq!(q.page(), 1);
        assert_eq!(q.limit(), 1);

        let q = ListUsersQuery {
            page: Some("7".into()),
            limit: Some("5000".into()),
            ..Default::default()
        };
        assert_eq!(q.page(), 7);
        assert_eq!(q.limit(), MAX_LIMIT);
    }

    #[test]
    fn offset_follows_page_and_limit() {
        let q = ListUsersQuery {
            page: Some("3".into()),
            limit: Some("10".into()),
            ..Default::default()
        };
        assert_eq!(q.offset(), 20);

        let q = ListUsersQuery::default();
        assert_eq!(q.offset(), 0);
    }

    #[test]
    fn offset_saturates_on_a_huge_page_number() {
        let q = ListUsersQuery {
            page: Some(i64::MAX.to_string()),
            limit: Some("10".into()),
            ..Default::default()
        };
        assert_eq!(q.page(), i64::MAX);
        assert_eq!(q.offset(), i64::MAX);
        assert!(q.offset() >= 0);
    }

    #[test]
    fn search_term_is_trimmed_and_dropped_when_blank() {
        let q = ListUsersQuery {
            search: Some("  ann  ".into()),
            ..Default::default()
        };
        assert_eq!(q.search_term().as_deref(), Some("ann"));

        let q = ListUsersQuery {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(q.search_term(), None);
    }

    #[test]
    fn pagination_rounds_total_pages_up() {
        let p = Pagination::new(1, 10, 43);
        assert_eq!(p.total_pages, 5);
        assert_eq!(p.total_users, 43);
        assert!(p.has_next_page);
        assert!(!p.has_prev_page);

        let p = Pagination::new(5, 10, 43);
        assert!(!p.has_next_page);
        assert!(p.has_prev_page);

        let p = Pagination::new(4, 10, 40);
        assert_eq!(p.total_pages, 4);
        assert!(!p.has_next_page);
    }

    #[test]
    fn empty_listing_has_zero_pages() {
        let p = Pagination::new(1, 10, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next_page);
        assert!(!p.has_prev_page);
    }

    #[test]
    fn update_normalizes_and_validates_present_fields() {
        let req = UpdateUserRequest {
            username: Some("  nadia  ".into()),
            email: Some("  Nadia@Example.COM ".into()),
            role: Some("admin".into()),
            profile_picture: Some("https://cdn.example/nadia.png".into()),
        };
        let changes = req.validate().expect("valid update");
        assert_eq!(changes.username.as_deref(), Some("nadia"));
        assert_eq!(changes.email.as_deref(), Some("nadia@example.com"));
        assert_eq!(changes.role, Some(UserRole::Admin));
        assert_eq!(
            changes.profile_picture.as_deref(),
            Some("https://cdn.example/nadia.png")
        );
    }

    #[test]
    fn update_treats_blank_fields_as_absent() {
        let req = UpdateUserRequest {
            username: Some("".into()),
            email: Some("   ".into()),
            role: None,
            profile_picture: Some("".into()),
        };
        let changes = req.validate().expect("nothing to validate");
        assert!(changes.username.is_none());
        assert!(changes.email.is_none());
        assert!(changes.role.is_none());
        assert!(changes.profile_picture.is_none());
    }

    #[test]
    fn update_collects_every_broken_field() {
        let req = UpdateUserRequest {
            username: Some("xy".into()),
            email: Some("nope".into()),
            role: Some("wizard".into()),
            profile_picture: Some("https://cdn.example/a.pdf".into()),
        };
        let errors = req.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors[3].contains("valid image URL"));
    }
}
