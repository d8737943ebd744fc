use axum::{
    extract::{DefaultBodyLimit, FromRef, FromRequest, Host, Multipart, Request, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::auth::dto::{LoginRequest, LoginResponse, RegisterForm};
use crate::auth::jwt::JwtKeys;
use crate::auth::password;
use crate::error::ApiError;
use crate::state::AppState;
use crate::uploads::{self, ImageUpload};
use crate::users::dto::{MessageResponse, UserResponse};
use crate::users::repo_types::{User, DEFAULT_PROFILE_PICTURE};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(liveness))
        .route(
            "/register",
            post(register).layer(DefaultBodyLimit::max(uploads::MULTIPART_BODY_LIMIT)),
        )
        .route("/login", post(login))
}

pub async fn liveness() -> Json<MessageResponse> {
    Json(MessageResponse {
        success: true,
        message: "Auth service is running".to_string(),
    })
}

#[instrument(skip(state, headers, request))]
pub async fn register(
    State(state): State<AppState>,
    Host(host): Host,
    headers: HeaderMap,
    request: Request,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let mut multipart = Multipart::from_request(request, &()).await.map_err(|err| {
        ApiError::Validation(vec![format!("Expected multipart form data: {}", err)])
    })?;

    let mut form = RegisterForm::default();
    let mut upload: Option<ImageUpload> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(uploads::multipart_error)?
    {
        if field.file_name().is_some() {
            uploads::read_image_field(field, &mut upload).await?;
            continue;
        }
        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await.map_err(uploads::multipart_error)?;
        match name.as_str() {
            "username" => form.username = Some(value),
            "email" => form.email = Some(value),
            "password" => form.password = Some(value),
            "role" => form.role = Some(value),
            _ => {}
        }
    }

    let account = form.validate().map_err(ApiError::Validation)?;

    // Pre-check gives the friendlier message; the unique index is what
    // actually guarantees uniqueness under concurrent registrations.
    if let Some(existing) =
        User::find_conflicting(&state.db, &account.username, &account.email).await?
    {
        let field = if existing.email == account.email {
            "Email"
        } else {
            "Username"
        };
        warn!(field, "registration conflict");
        return Err(ApiError::Conflict(field));
    }

    let hash = password::hash_password(&account.password)?;

    let mut stored_name = None;
    let picture = match &upload {
        Some(image) => {
            let stored = uploads::store_image(&state.config.upload_dir, image).await?;
            let base = uploads::request_base_url(&headers, &host);
            let url = uploads::public_url(&base, &stored);
            stored_name = Some(stored);
            url
        }
        None => DEFAULT_PROFILE_PICTURE.to_string(),
    };

    // If the insert loses the uniqueness race the stored file would have
    // no owning row; drop it before reporting the failure.
    let user = match User::create(
        &state.db,
        &account.username,
        &account.email,
        &hash,
        account.role,
        &picture,
    )
    .await
    {
        Ok(user) => user,
        Err(err) => {
            if let Some(name) = &stored_name {
                uploads::discard_image(&state.config.upload_dir, name).await;
            }
            return Err(err);
        }
    };

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            success: true,
            message: "User registered successfully".to_string(),
            user: user.into_public(),
        }),
    ))
}

#[instrument(skip(state, request))]
pub async fn login(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(payload) = Json::<LoginRequest>::from_request(request, &())
        .await
        .map_err(|err| ApiError::Validation(vec![format!("Malformed JSON body: {}", err)]))?;

    let mut errors = Vec::new();
    let email = payload
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .unwrap_or_default();
    if email.is_empty() {
        errors.push("Email is required".to_string());
    }
    let password = payload.password.unwrap_or_default();
    if password.is_empty() {
        errors.push("Password is required".to_string());
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    // Identical failure for unknown email and wrong password.
    let user = match User::find_by_email(&state.db, &email).await? {
        Some(user) => user,
        None => {
            warn!("login with unknown email");
            return Err(ApiError::InvalidCredentials);
        }
    };
    if !password::verify_password(&password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(&user)?;

    info!(user_id = %user.id, "user logged in");
    Ok(Json(LoginResponse {
        success: true,
        message: "Login successful".to_string(),
        token,
        user: user.into_public(),
    }))
}
