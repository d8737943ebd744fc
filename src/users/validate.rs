use lazy_static::lazy_static;
use regex::Regex;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 20;
pub const PASSWORD_MIN: usize = 9;

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn is_valid_image_url(url: &str) -> bool {
    lazy_static! {
        static ref IMAGE_URL_RE: Regex =
            Regex::new(r"(?i)^https?://\S+\.(jpe?g|png|gif|webp|bmp|tiff)(\?\S*)?$").unwrap();
    }
    IMAGE_URL_RE.is_match(url)
}

/// Length in characters, caller trims first.
pub fn validate_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if len < USERNAME_MIN || len > USERNAME_MAX {
        return Err(format!(
            "Username must be between {} and {} characters",
            USERNAME_MIN, USERNAME_MAX
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if !is_valid_email(email) {
        return Err("Email must be a valid email address".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < PASSWORD_MIN {
        return Err(format!(
            "Password must be at least {} characters long",
            PASSWORD_MIN
        ));
    }
    Ok(())
}

pub fn validate_image_url(url: &str) -> Result<(), String> {
    if !is_valid_image_url(url) {
        return Err("Profile picture must be a valid image URL".to_string());
    }
    Ok(())
}
