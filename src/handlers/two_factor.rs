use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::User;
use crate::services::TotpService;
use crate::services::otp::{backup_code_digest, generate_backup_codes};
use crate::state::AppState;

// === 2FA Setup ===

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub user_id: Uuid,
    pub password: String,
    /// デバイスの表示名（省略時 "default"）
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SetupResponse {
    pub secret: String,
    pub qr_code: String,
}

/// POST /api/2fa/setup
///
/// 2FA設定を開始（シークレット生成、QRコード返却）
///
/// # Security
/// - パスワード確認必須
/// - シークレット平文はログ出力禁止
pub async fn setup_2fa(
    State(state): State<AppState>,
    Json(request): Json<SetupRequest>,
) -> Result<Json<SetupResponse>, AppError> {
    validate_password(&request.password)?;

    let user = verify_user_password(&state, request.user_id, &request.password).await?;

    // 既に有効化済みならエラー、未確認の残骸は作り直す
    if let Some(existing) = state.otp_repo.find_totp_by_user(user.id).await? {
        if existing.confirmed {
            return Err(AppError::TotpAlreadyEnabled);
        }
        state.otp_repo.delete_totp(user.id).await?;
    }

    let secret = TotpService::generate_secret();
    let encrypted = state.totp_service.encrypt_secret(&secret)?;

    let device_name = request.device_name.as_deref().unwrap_or("default");
    state
        .otp_repo
        .create_totp(user.id, device_name, &encrypted)
        .await?;

    let qr_code = state.totp_service.generate_qr_code(&user.email, &secret)?;

    tracing::info!(user_id = %user.id, "2FA設定開始");

    Ok(Json(SetupResponse {
        secret,
        qr_code: format!("data:image/png;base64,{}", qr_code),
    }))
}

// === 2FA Confirm ===

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub user_id: Uuid,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub enabled: bool,
}

/// POST /api/2fa/confirm
///
/// 初回コード検証でデバイスを有効化し、デフォルトに設定する
///
/// # Security
/// - コードはログ出力禁止
pub async fn confirm_2fa(
    State(state): State<AppState>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, AppError> {
    validate_totp_code(&request.code)?;

    let device = state
        .otp_repo
        .find_totp_by_user(request.user_id)
        .await?
        .ok_or(AppError::TotpNotEnabled)?;

    if device.confirmed {
        return Err(AppError::TotpAlreadyEnabled);
    }

    let secret = state.totp_service.decrypt_secret(&device.secret_encrypted)?;

    let Some(step) = state.totp_service.verify_code(&secret, &request.code)? else {
        return Err(AppError::OtpRejected);
    };

    state
        .otp_repo
        .confirm_as_default(request.user_id, device.id)
        .await?;
    // 確認に使ったコードもリプレイ対象として消費
    state.otp_repo.advance_totp_step(device.id, step).await?;

    tracing::info!(user_id = %request.user_id, "2FA有効化完了");

    Ok(Json(ConfirmResponse { enabled: true }))
}

// === バックアップコード ===

#[derive(Debug, Deserialize)]
pub struct BackupCodesRequest {
    pub user_id: Uuid,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct BackupCodesResponse {
    /// 平文コード。この応答でのみ返し、保存はダイジェストのみ
    pub codes: Vec<String>,
}

/// POST /api/2fa/backup-codes
///
/// バックアップコード一式を発行し直す（既存コードは全破棄）
///
/// # Security
/// - パスワード確認必須
/// - 平文コードはログ出力禁止、レスポンスで一度だけ返す
pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    Json(request): Json<BackupCodesRequest>,
) -> Result<Json<BackupCodesResponse>, AppError> {
    validate_password(&request.password)?;

    let user = verify_user_password(&state, request.user_id, &request.password).await?;

    // TOTPが有効なユーザーのみ発行できる
    if state.otp_repo.find_default_totp(user.id).await?.is_none() {
        return Err(AppError::TotpNotEnabled);
    }

    let codes = generate_backup_codes();
    let digests: Vec<Vec<u8>> = codes.iter().map(|c| backup_code_digest(c)).collect();

    state.otp_repo.replace_backup_codes(user.id, &digests).await?;

    tracing::info!(user_id = %user.id, count = codes.len(), "バックアップコード発行");

    Ok(Json(BackupCodesResponse { codes }))
}

// === 2FA Disable ===

#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    pub user_id: Uuid,
    pub password: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct DisableResponse {
    pub disabled: bool,
}

/// POST /api/2fa/disable
///
/// 2FA無効化（TOTPデバイスとバックアップコードをすべて削除）
///
/// # Security
/// - パスワード確認必須
/// - TOTPコード確認必須
pub async fn disable_2fa(
    State(state): State<AppState>,
    Json(request): Json<DisableRequest>,
) -> Result<Json<DisableResponse>, AppError> {
    validate_password(&request.password)?;
    validate_totp_code(&request.code)?;

    let user = verify_user_password(&state, request.user_id, &request.password).await?;

    let device = state
        .otp_repo
        .find_default_totp(user.id)
        .await?
        .ok_or(AppError::TotpNotEnabled)?;

    let secret = state.totp_service.decrypt_secret(&device.secret_encrypted)?;

    let Some(step) = state.totp_service.verify_code(&secret, &request.code)? else {
        return Err(AppError::OtpRejected);
    };
    if !state.otp_repo.advance_totp_step(device.id, step).await? {
        return Err(AppError::OtpRejected);
    }

    state.otp_repo.delete_totp(user.id).await?;
    state.otp_repo.delete_backup_device(user.id).await?;

    tracing::info!(user_id = %user.id, "2FA無効化完了");

    Ok(Json(DisableResponse { disabled: true }))
}

// === Helper Functions ===

/// パスワードバリデーション
fn validate_password(password: &str) -> Result<(), AppError> {
    if password.is_empty() {
        return Err(AppError::Validation("パスワードは必須です".to_string()));
    }
    Ok(())
}

/// TOTPコードバリデーション
fn validate_totp_code(code: &str) -> Result<(), AppError> {
    if code.is_empty() {
        return Err(AppError::Validation("認証コードは必須です".to_string()));
    }
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "認証コードは6桁の数字で入力してください".to_string(),
        ));
    }
    Ok(())
}

/// ユーザーのパスワードを検証し、ユーザー情報を返す
///
/// 再認証はログインと同じパイプラインを通す
async fn verify_user_password(
    state: &AppState,
    user_id: Uuid,
    password: &str,
) -> Result<User, AppError> {
    let user = state
        .user_repo
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Authentication("user not found".to_string()))?;

    state
        .pipeline
        .authenticate(&user.email, password)
        .await?
        .ok_or_else(|| AppError::Authentication("invalid_credentials".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_password() {
        assert!(validate_password("").is_err());
    }

    #[test]
    fn test_validate_nonempty_password() {
        assert!(validate_password("password123").is_ok());
    }

    #[test]
    fn test_validate_empty_code() {
        assert!(validate_totp_code("").is_err());
    }

    #[test]
    fn test_validate_short_code() {
        assert!(validate_totp_code("12345").is_err());
    }

    #[test]
    fn test_validate_non_digit_code() {
        assert!(validate_totp_code("12345a").is_err());
    }

    #[test]
    fn test_validate_valid_code() {
        assert!(validate_totp_code("123456").is_ok());
    }
}
