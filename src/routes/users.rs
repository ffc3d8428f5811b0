use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use super::homes::delete_objects;
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::models::{CreateUserRequest, PublicProfile, UpdateUserRequest, User};
use crate::AppState;

/// The caller's full profile
pub async fn me(State(state): State<Arc<AppState>>, user: AuthUser) -> AppResult<Json<User>> {
    let profile: User = sqlx::query_as(
        r#"
        SELECT owner_firebase_uid, email, name, profile_image, phone_country_code, phone_number,
               linkedin_url, instagram_id, facebook_id, created_at, updated_at
        FROM users WHERE owner_firebase_uid = $1
        "#,
    )
    .bind(&user.uid)
    .fetch_optional(state.db.pool())
    .await?
    .ok_or(AppError::UserNotFound)?;

    Ok(Json(profile))
}

/// Public part of anyone's profile
pub async fn public_profile(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> AppResult<Json<PublicProfile>> {
    let profile: PublicProfile = sqlx::query_as(
        "SELECT owner_firebase_uid, name, profile_image FROM users WHERE owner_firebase_uid = $1",
    )
    .bind(&uid)
    .fetch_optional(state.db.pool())
    .await?
    .ok_or(AppError::UserNotFound)?;

    Ok(Json(profile))
}

/// Register the caller after Firebase sign-up
pub async fn create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(request) = body.map_err(json_error)?;
    if request.owner_firebase_uid != user.uid {
        return Err(AppError::ForeignAccount);
    }
    request.validate()?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO users (owner_firebase_uid, email, name, profile_image, is_email_verified)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&request.owner_firebase_uid)
    .bind(&request.email)
    .bind(&request.name)
    .bind(&request.profile_image)
    .bind(request.is_email_verified)
    .execute(state.db.pool())
    .await
    .map_err(AppError::from);

    match inserted {
        Ok(_) => {}
        Err(e) if e.is_unique_violation() => return Err(AppError::UserAlreadyExists),
        Err(e) => return Err(e),
    }

    tracing::info!("Created user {}", request.owner_firebase_uid);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "uid": request.owner_firebase_uid,
            "message": "User created successfully",
        })),
    ))
}

/// Change the provided profile fields
pub async fn update(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(uid): Path<String>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    user.require_owner(&uid)?;
    let Json(request) = body.map_err(json_error)?;
    request.validate()?;

    let result = request
        .columns()
        .into_update("owner_firebase_uid", uid.clone())
        .build()
        .execute(state.db.pool())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::UserNotFound);
    }

    Ok(Json(json!({ "message": "User updated successfully" })))
}

/// Delete the account with everything it owns
pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(uid): Path<String>,
) -> AppResult<Json<Value>> {
    user.require_owner(&uid)?;

    let mut tx = state.db.pool().begin().await?;

    let exists: Option<i32> =
        sqlx::query_scalar("SELECT 1 FROM users WHERE owner_firebase_uid = $1")
            .bind(&uid)
            .fetch_optional(&mut *tx)
            .await?;
    if exists.is_none() {
        return Ok(Json(json!({
            "message": "User not in database but deleted successfully"
        })));
    }

    let urls: Vec<String> =
        sqlx::query_scalar("SELECT public_url FROM images WHERE owner_firebase_uid = $1")
            .bind(&uid)
            .fetch_all(&mut *tx)
            .await?;
    sqlx::query("DELETE FROM users WHERE owner_firebase_uid = $1")
        .bind(&uid)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    tracing::info!("Deleted user {} and {} image rows", uid, urls.len());

    delete_objects(&state, &urls).await;

    Ok(Json(json!({ "message": "User and related data deleted successfully" })))
}

/// Malformed JSON bodies are validation errors
pub(crate) fn json_error(rejection: JsonRejection) -> AppError {
    AppError::Validation(rejection.body_text())
}
