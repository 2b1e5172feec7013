use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, FieldError};
use crate::services::auth::{hash_password, password_strength_error};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub user_id: Uuid,
    pub old_password: String,
    pub new_password1: String,
    pub new_password2: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordResponse {
    pub changed: bool,
}

/// パスワード変更ハンドラー
///
/// POST /api/password/change
///
/// 旧パスワードの確認はログインと同じ認証パイプラインを通す
/// （ローカル照合、必要ならレガシー委譲）。
///
/// # Security
/// - 新旧パスワードはログに出力しない
pub async fn change_password(
    State(state): State<AppState>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<ChangePasswordResponse>, AppError> {
    let user = state
        .user_repo
        .find_by_id(request.user_id)
        .await?
        .ok_or_else(|| AppError::Authentication("user not found".to_string()))?;

    // 旧パスワード確認
    if request.old_password.is_empty()
        || state
            .pipeline
            .authenticate(&user.email, &request.old_password)
            .await?
            .is_none()
    {
        return Err(AppError::ValidationFailed(vec![FieldError::new(
            "old_password",
            "パスワードが正しくありません",
        )]));
    }

    // 新パスワードの検証（一致 + 強度）
    let mut errors = Vec::new();
    if request.new_password1.is_empty() {
        errors.push(FieldError::new("new_password1", "パスワードは必須です"));
    } else if request.new_password1 != request.new_password2 {
        errors.push(FieldError::new(
            "new_password2",
            "パスワードが一致しません",
        ));
    } else {
        let local_part = user.email.split('@').next().unwrap_or("");
        if let Some(message) =
            password_strength_error(&request.new_password2, &[local_part, &user.name])
        {
            errors.push(FieldError::new("new_password2", message));
        }
    }

    if !errors.is_empty() {
        return Err(AppError::ValidationFailed(errors));
    }

    let new_hash = hash_password(&request.new_password2)?;
    state.user_repo.update_password(user.id, &new_hash).await?;

    tracing::info!(user_id = %user.id, "パスワード変更完了");

    Ok(Json(ChangePasswordResponse { changed: true }))
}
