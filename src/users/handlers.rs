use axum::{
    extract::{DefaultBodyLimit, FromRequest, Host, Multipart, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    routing::{get, put},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::uploads::{self, ImageUpload, UploadError};
use crate::users::dto::{
    ListUsersQuery, MessageResponse, Pagination, UpdateUserRequest, UserListResponse, UserResponse,
};
use crate::users::repo::ListFilter;
use crate::users::repo_types::{User, UserRole};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route(
            "/users/:id",
            get(get_user)
                .put(update_user)
                .delete(delete_user)
                .layer(DefaultBodyLimit::max(uploads::MULTIPART_BODY_LIMIT)),
        )
        .route(
            "/users/:id/picture",
            put(update_picture).layer(DefaultBodyLimit::max(uploads::MULTIPART_BODY_LIMIT)),
        )
}

fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation(vec!["Invalid user id".to_string()]))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    let role = match query.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        None => None,
        Some(raw) => Some(UserRole::parse(raw).ok_or_else(|| {
            ApiError::Validation(vec!["Role must be one of admin, instructor, student".to_string()])
        })?),
    };
    let filter = ListFilter {
        role,
        search: query.search_term(),
    };
    let page = query.page();
    let limit = query.limit();

    let total = User::count(&state.db, &filter).await?;
    let users = User::list_public(&state.db, &filter, limit, query.offset()).await?;

    Ok(Json(UserListResponse {
        success: true,
        message: "Users retrieved successfully".to_string(),
        users,
        pagination: Pagination::new(page, limit, total),
    }))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let id = parse_user_id(&id)?;
    let user = User::find_by_id(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(UserResponse {
        success: true,
        message: "User retrieved successfully".to_string(),
        user: user.into_public(),
    }))
}

/// Pulls the update fields out of either a JSON body or a multipart form.
/// Only the multipart shape can carry a file.
async fn parse_update_request(
    request: Request,
) -> Result<(UpdateUserRequest, Option<ImageUpload>), ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let mut multipart = Multipart::from_request(request, &()).await.map_err(|err| {
            ApiError::Validation(vec![format!("Malformed multipart body: {}", err)])
        })?;
        let mut dto = UpdateUserRequest::default();
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
                "username" => dto.username = Some(value),
                "email" => dto.email = Some(value),
                "role" => dto.role = Some(value),
                "profilePicture" => dto.profile_picture = Some(value),
                _ => {}
            }
        }
        Ok((dto, upload))
    } else {
        let Json(dto) = Json::<UpdateUserRequest>::from_request(request, &())
            .await
            .map_err(|err| {
                ApiError::Validation(vec![format!("Malformed JSON body: {}", err)])
            })?;
        Ok((dto, None))
    }
}

#[instrument(skip(state, headers, request))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Host(host): Host,
    headers: HeaderMap,
    request: Request,
) -> Result<Json<UserResponse>, ApiError> {
    let id = parse_user_id(&id)?;
    let (dto, upload) = parse_update_request(request).await?;
    let changes = dto.validate().map_err(ApiError::Validation)?;

    let target = User::find_by_id(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    // Uniqueness is only re-checked for fields that actually change.
    let new_username = changes.username.as_deref().filter(|u| *u != target.username);
    let new_email = changes.email.as_deref().filter(|e| *e != target.email);
    if new_username.is_some() || new_email.is_some() {
        if let Some(existing) =
            User::find_conflicting_except(&state.db, id, new_username, new_email).await?
        {
            let field = if new_email == Some(existing.email.as_str()) {
                "Email"
            } else {
                "Username"
            };
            warn!(field, user_id = %id, "update conflict");
            return Err(ApiError::Conflict(field));
        }
    }

    // An uploaded file wins over a picture URL in the body.
    let mut stored_name = None;
    let picture = match &upload {
        Some(image) => {
            let stored = uploads::store_image(&state.config.upload_dir, image).await?;
            let base = uploads::request_base_url(&headers, &host);
            let url = uploads::public_url(&base, &stored);
            stored_name = Some(stored);
            Some(url)
        }
        None => changes.profile_picture.clone(),
    };

    // On failure the stored file has no owning row; drop it before
    // reporting the error.
    let updated = match User::apply_update(
        &state.db,
        id,
        changes.username.as_deref(),
        changes.email.as_deref(),
        changes.role,
        picture.as_deref(),
    )
    .await
    {
        Ok(Some(user)) => user,
        Ok(None) => {
            if let Some(name) = &stored_name {
                uploads::discard_image(&state.config.upload_dir, name).await;
            }
            return Err(ApiError::NotFound("User"));
        }
        Err(err) => {
            if let Some(name) = &stored_name {
                uploads::discard_image(&state.config.upload_dir, name).await;
            }
            return Err(err);
        }
    };

    info!(user_id = %updated.id, "user updated");
    Ok(Json(UserResponse {
        success: true,
        message: "User updated successfully".to_string(),
        user: updated.into_public(),
    }))
}

#[instrument(skip(state, headers, request))]
pub async fn update_picture(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Host(host): Host,
    headers: HeaderMap,
    request: Request,
) -> Result<Json<UserResponse>, ApiError> {
    let id = parse_user_id(&id)?;
    let mut multipart = Multipart::from_request(request, &()).await.map_err(|err| {
        ApiError::Validation(vec![format!("Malformed multipart body: {}", err)])
    })?;

    let mut upload: Option<ImageUpload> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(uploads::multipart_error)?
    {
        if field.file_name().is_some() {
            uploads::read_image_field(field, &mut upload).await?;
        }
    }
    let image = upload.ok_or(UploadError::Missing)?;

    if User::find_by_id(&state.db, id).await?.is_none() {
        return Err(ApiError::NotFound("User"));
    }

    let stored = uploads::store_image(&state.config.upload_dir, &image).await?;
    let base = uploads::request_base_url(&headers, &host);
    let url = uploads::public_url(&base, &stored);
    // The user may have vanished since the existence check; do not leave
    // the stored file orphaned in that case.
    let updated = match User::set_profile_picture(&state.db, id, &url).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            uploads::discard_image(&state.config.upload_dir, &stored).await;
            return Err(ApiError::NotFound("User"));
        }
        Err(err) => {
            uploads::discard_image(&state.config.upload_dir, &stored).await;
            return Err(err.into());
        }
    };

    info!(user_id = %updated.id, "profile picture updated");
    Ok(Json(UserResponse {
        success: true,
        message: "Profile picture updated successfully".to_string(),
        user: updated.into_public(),
    }))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_user_id(&id)?;
    if !User::delete(&state.db, id).await? {
        return Err(ApiError::NotFound("User"));
    }
    info!(user_id = %id, "user deleted");
    Ok(Json(MessageResponse {
        success: true,
        message: "User deleted successfully".to_string(),
    }))
}
