use std::net::SocketAddr;

use axum::{Json, extract::ConnectInfo, extract::State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{BackupCodeDevice, TotpDevice, User};
use crate::services::captcha::{self, FAILURE_WINDOW_SECS};
use crate::services::otp::backup_code_digest;
use crate::state::AppState;

/// ログインリクエスト
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// ユーザーのメールアドレス
    pub email: String,
    /// ユーザーのパスワード
    pub password: String,
    /// CAPTCHA応答トークン（ゲートが要求した場合のみ）
    pub captcha_response: Option<String>,
    /// OTPトークン（TOTPコードまたはバックアップコード）
    pub otp_token: Option<String>,
    /// トークンなしの再チャレンジ要求。試行を消費しない
    #[serde(default)]
    pub otp_challenge: bool,
    /// OTP検証成功時に「このデバイスを記憶する」トークンを発行するか
    #[serde(default)]
    pub remember_device: bool,
    /// 以前発行された remember トークン（あればOTPをバイパス）
    pub remember_token: Option<String>,
}

/// ログインレスポンス
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// 認証完了時のみ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    /// 第二要素の提出が必要
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_otp: Option<bool>,
    /// remember_device 要求時に発行されるトークン
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remember_token: Option<String>,
}

impl LoginResponse {
    fn success(user: &User, remember_token: Option<String>) -> Self {
        Self {
            user_id: Some(user.id),
            name: Some(user.name.clone()),
            is_admin: Some(user.is_admin),
            requires_otp: None,
            remember_token,
        }
    }

    fn requires_otp() -> Self {
        Self {
            user_id: None,
            name: None,
            is_admin: None,
            requires_otp: Some(true),
            remember_token: None,
        }
    }
}

/// ログインハンドラー
///
/// POST /api/login
///
/// 処理フロー:
/// 1. リクエストバリデーション
/// 2. CAPTCHAゲート（リスクシグナル駆動、必要時のみ）
/// 3. 認証パイプライン（ローカル → レガシー委譲）
/// 4. 失敗ならイベントログへ追記して一般エラー
/// 5. OTPチャレンジ（デフォルトデバイス登録者のみ）
/// 6. 成功レスポンス返却
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    // 1. リクエストバリデーション
    validate_login_request(&request)?;

    let config = state.site_config_repo.snapshot().await?;

    // 2. CAPTCHAゲート
    let failures = state
        .event_log_repo
        .login_failures_since(&request.email, FAILURE_WINDOW_SECS)
        .await?;

    if captcha::login_captcha_required(&config, failures) {
        let secret = config.recaptcha_secret().unwrap_or_default();
        if !state
            .captcha_service
            .verify(&secret, request.captcha_response.as_deref())
            .await
        {
            // 資格情報は検証せずここで打ち切る
            return Err(AppError::CaptchaFailed);
        }
    }

    // 3. 認証パイプライン
    let user = state
        .pipeline
        .authenticate(&request.email, &request.password)
        .await?;

    let Some(user) = user else {
        // 4. リスクシグナルへ追記（CAPTCHAゲートが参照する）
        state
            .event_log_repo
            .record_login_failure(&request.email, Some(&addr.ip().to_string()))
            .await?;
        return Err(AppError::Authentication("invalid_credentials".to_string()));
    };

    if !user.is_active {
        return Err(AppError::Authentication("inactive".to_string()));
    }

    // 5. OTPチャレンジ
    let response = run_otp_challenge(&state, &user, &request).await?;

    Ok(Json(response))
}

/// OTPチャレンジの状態遷移
///
/// デフォルトデバイス未登録なら単要素で成功。
/// remember トークン有効ならトークン入力なしで成功。
/// challenge フラグは再プロンプトのみ（試行を消費しない）。
async fn run_otp_challenge(
    state: &AppState,
    user: &User,
    request: &LoginRequest,
) -> Result<LoginResponse, AppError> {
    let totp_device = state.otp_repo.find_default_totp(user.id).await?;
    let backup_device = state.otp_repo.find_backup_device(user.id).await?;

    // 第二要素が未登録ならバイパス
    if totp_device.is_none() && backup_device.is_none() {
        return Ok(LoginResponse::success(user, None));
    }

    // remember トークンによるバイパス
    if let Some(token) = &request.remember_token
        && let Some(device_id) = state.remember_service.validate(token, user.id)
        && state
            .otp_repo
            .device_belongs_to_user(user.id, device_id)
            .await?
    {
        tracing::info!(user_id = %user.id, "OTP: rememberトークンでバイパス");
        return Ok(LoginResponse::success(user, None));
    }

    // トークンなしの再チャレンジ要求
    if request.otp_challenge {
        return Ok(LoginResponse::requires_otp());
    }

    let token = match &request.otp_token {
        // 初回提示: トークン入力を要求
        None => return Ok(LoginResponse::requires_otp()),
        Some(t) if t.trim().is_empty() => {
            return Err(AppError::Validation(
                "認証コードを入力してください".to_string(),
            ));
        }
        Some(t) => t.trim(),
    };

    let verified_device =
        verify_otp_token(state, user, totp_device.as_ref(), backup_device.as_ref(), token).await?;

    let Some(device_id) = verified_device else {
        // デバイス違い/トークン違いは区別しない（列挙防止）
        return Err(AppError::OtpRejected);
    };

    let remember_token = if request.remember_device {
        Some(state.remember_service.mint(user.id, device_id)?)
    } else {
        None
    };

    tracing::info!(user_id = %user.id, "OTP検証成功");
    Ok(LoginResponse::success(user, remember_token))
}

/// デフォルトTOTPデバイス → バックアップコードの順に検証
///
/// 一致したデバイスIDを返す。TOTPは一致ステップを単調前進させてから
/// 成立とみなす（同一ウィンドウ内のリプレイ拒否）。
/// バックアップコードは消費（削除）できた場合のみ成立。
async fn verify_otp_token(
    state: &AppState,
    user: &User,
    totp_device: Option<&TotpDevice>,
    backup_device: Option<&BackupCodeDevice>,
    token: &str,
) -> Result<Option<Uuid>, AppError> {
    if let Some(device) = totp_device {
        let secret = state.totp_service.decrypt_secret(&device.secret_encrypted)?;
        if let Some(step) = state.totp_service.verify_code(&secret, token)? {
            if state.otp_repo.advance_totp_step(device.id, step).await? {
                return Ok(Some(device.id));
            }
            tracing::warn!(user_id = %user.id, "OTP: 使用済みタイムステップ（リプレイ拒否）");
            return Ok(None);
        }
    }

    if let Some(device) = backup_device {
        let digest = backup_code_digest(token);
        if state
            .otp_repo
            .consume_backup_code(device.id, &digest)
            .await?
        {
            let remaining = state.otp_repo.remaining_backup_codes(device.id).await?;
            tracing::info!(user_id = %user.id, remaining, "バックアップコードを消費");
            return Ok(Some(device.id));
        }
    }

    Ok(None)
}

/// ログインリクエストのバリデーション
fn validate_login_request(request: &LoginRequest) -> Result<(), AppError> {
    // email: 必須、メール形式
    if request.email.trim().is_empty() {
        return Err(AppError::Validation("メールアドレスは必須です".to_string()));
    }

    // 簡易的なメール形式チェック（@ が含まれているか）
    if !request.email.contains('@') {
        return Err(AppError::Validation(
            "有効なメールアドレスを入力してください".to_string(),
        ));
    }

    // password: 必須
    if request.password.is_empty() {
        return Err(AppError::Validation("パスワードは必須です".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            captcha_response: None,
            otp_token: None,
            otp_challenge: false,
            remember_device: false,
            remember_token: None,
        }
    }

    #[test]
    fn test_validate_empty_email() {
        let result = validate_login_request(&request("", "password123"));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_invalid_email() {
        let result = validate_login_request(&request("invalid-email", "password123"));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_empty_password() {
        let result = validate_login_request(&request("test@example.com", ""));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_valid_request() {
        let result = validate_login_request(&request("test@example.com", "password123"));
        assert!(result.is_ok());
    }

    #[test]
    fn test_otp_token_fields_default_to_absent() {
        // challenge フラグやトークン欠落時のデシリアライズ
        let parsed: LoginRequest =
            serde_json::from_str(r#"{"email":"a@example.com","password":"pw"}"#).unwrap();
        assert!(parsed.otp_token.is_none());
        assert!(!parsed.otp_challenge);
        assert!(!parsed.remember_device);
        assert!(parsed.remember_token.is_none());
    }
}
