use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AppError, FieldError};
use crate::models::SiteConfig;
use crate::models::site_config::{KEY_APP_TITLE, KEY_EMAIL_DOMAIN_ALLOW_LIST};
use crate::repositories::NewUser;
use crate::repositories::user::is_email_unique_violation;
use crate::services::auth::{hash_password, password_strength_error};
use crate::services::captcha;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    // SecretBox不要（Deserialize後すぐハッシュ化）
    pub password1: String,
    pub password2: String,
    #[serde(default)]
    pub accepted_terms: bool,
    #[serde(default)]
    pub receives_newsletter: bool,
    pub captcha_response: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// ユーザー登録ハンドラー
///
/// POST /api/register
///
/// フィールドごとのエラーを集約して一括で返す（最初の違反のみ採用）。
/// CAPTCHAは設定されていれば常に必須（リスクシグナルによる免除なし）。
///
/// # Security
/// - パスワードはログに出力しない
/// - パスワードは即座にハッシュ化
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let config = state.site_config_repo.snapshot().await?;

    // 同期チェック（形式・パスワード・規約同意）
    let mut errors = validate_register_fields(&request);

    // email: 形式が通ったものだけドメイン許可リストと重複を確認
    if !errors.iter().any(|e| e.field == "email") {
        if !email_domain_allowed(&config, &request.email) {
            errors.push(FieldError::new(
                "email",
                "このメールアドレスは許可されていません",
            ));
        } else if state
            .user_repo
            .find_active_by_email_exact(&request.email)
            .await?
            .is_some()
        {
            errors.push(FieldError::new(
                "email",
                "このメールアドレスは既に登録されています",
            ));
        }
    }

    // CAPTCHA（登録では常時）
    if captcha::registration_captcha_required(&config) {
        let secret = config.recaptcha_secret().unwrap_or_default();
        if !state
            .captcha_service
            .verify(&secret, request.captcha_response.as_deref())
            .await
        {
            errors.push(FieldError::new(
                "captcha_response",
                "CAPTCHA検証に失敗しました",
            ));
        }
    }

    if !errors.is_empty() {
        return Err(AppError::ValidationFailed(errors));
    }

    // パスワードハッシュ化してユーザー作成
    let password_hash = hash_password(&request.password1)?;

    let user = state
        .user_repo
        .create(NewUser {
            email: &request.email,
            name: &request.name,
            password_hash: &password_hash,
            is_active: true,
            is_admin: false,
            accepted_terms: true,
            receives_newsletter: request.receives_newsletter,
        })
        .await
        .map_err(|e| {
            if is_email_unique_violation(&e) {
                // チェック後に滑り込まれた場合もフィールドエラーとして返す
                return AppError::ValidationFailed(vec![FieldError::new(
                    "email",
                    "このメールアドレスは既に登録されています",
                )]);
            }
            AppError::Database(e)
        })?;

    tracing::info!(email = %user.email, "ユーザー登録成功");

    // ウェルカムメール（送信失敗で登録は失敗させない）
    let app_title = config.str_or(KEY_APP_TITLE, "elggate");
    let subject = format!("{app_title} へようこそ");
    let body = format!(
        "{} さん\n\nアカウントの登録が完了しました。\n",
        user.name
    );
    if let Err(e) = state.email_service.send(&config, &user.email, &subject, body).await {
        tracing::warn!(error = ?e, email = %user.email, "ウェルカムメール送信失敗");
    }

    Ok(Json(RegisterResponse {
        id: user.id,
        email: user.email,
        name: user.name,
        created_at: user.created_at,
    }))
}

/// 同期フィールドバリデーション
///
/// フィールドごとに最初の違反だけを記録し、全フィールド分を集約する。
fn validate_register_fields(request: &RegisterRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();

    // name: 必須、100文字以内
    if request.name.trim().is_empty() {
        errors.push(FieldError::new("name", "名前は必須です"));
    } else if request.name.chars().count() > 100 {
        errors.push(FieldError::new("name", "名前は100文字以内で入力してください"));
    }

    // email: 必須、メール形式
    if request.email.trim().is_empty() {
        errors.push(FieldError::new("email", "メールアドレスは必須です"));
    } else if !request.email.contains('@') {
        errors.push(FieldError::new(
            "email",
            "有効なメールアドレスを入力してください",
        ));
    }

    // password1/password2: バイト単位の完全一致（正規化しない）
    if request.password1.is_empty() {
        errors.push(FieldError::new("password1", "パスワードは必須です"));
    } else if request.password1 != request.password2 {
        errors.push(FieldError::new(
            "password2",
            "パスワードが一致しません",
        ));
    } else {
        let local_part = request.email.split('@').next().unwrap_or("");
        if let Some(message) =
            password_strength_error(&request.password2, &[local_part, &request.name])
        {
            errors.push(FieldError::new("password2", message));
        }
    }

    // 規約同意は明示的な true が必要
    if !request.accepted_terms {
        errors.push(FieldError::new(
            "accepted_terms",
            "利用規約への同意が必要です",
        ));
    }

    errors
}

/// メールドメイン許可リストの確認
///
/// リスト未設定（空）はすべて許可。比較は小文字化して行う。
fn email_domain_allowed(config: &SiteConfig, email: &str) -> bool {
    let allow_list = config.str_list(KEY_EMAIL_DOMAIN_ALLOW_LIST);
    if allow_list.is_empty() {
        return true;
    }

    let Some(domain) = email.rsplit('@').next() else {
        return false;
    };
    let domain = domain.to_lowercase();

    allow_list.iter().any(|d| d.to_lowercase() == domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> RegisterRequest {
        RegisterRequest {
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password1: "tr0ub4dor&3xt".to_string(),
            password2: "tr0ub4dor&3xt".to_string(),
            accepted_terms: true,
            receives_newsletter: false,
            captcha_response: None,
        }
    }

    #[test]
    fn test_valid_request_has_no_errors() {
        assert!(validate_register_fields(&request()).is_empty());
    }

    #[test]
    fn test_password_mismatch() {
        let mut r = request();
        r.password2 = "something else!".to_string();
        let errors = validate_register_fields(&r);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "password2");
    }

    #[test]
    fn test_passwords_compared_byte_for_byte() {
        // 正規化で同一視される文字列でもバイトが違えば不一致
        let mut r = request();
        r.password1 = "pa\u{00df}word123".to_string(); // ß
        r.password2 = "password123".to_string();
        let errors = validate_register_fields(&r);
        assert!(errors.iter().any(|e| e.field == "password2"));
    }

    #[test]
    fn test_errors_are_aggregated_across_fields() {
        let r = RegisterRequest {
            name: "".to_string(),
            email: "not-an-email".to_string(),
            password1: "short".to_string(),
            password2: "different".to_string(),
            accepted_terms: false,
            receives_newsletter: false,
            captcha_response: None,
        };
        let errors = validate_register_fields(&r);
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"email"));
        assert!(fields.contains(&"password2"));
        assert!(fields.contains(&"accepted_terms"));
    }

    #[test]
    fn test_first_failure_per_field_wins() {
        // password1 空なら mismatch/強度チェックまで進まない
        let mut r = request();
        r.password1 = "".to_string();
        r.password2 = "".to_string();
        let errors = validate_register_fields(&r);
        let password_errors: Vec<_> = errors
            .iter()
            .filter(|e| e.field.starts_with("password"))
            .collect();
        assert_eq!(password_errors.len(), 1);
        assert_eq!(password_errors[0].field, "password1");
    }

    #[test]
    fn test_terms_must_be_true() {
        let mut r = request();
        r.accepted_terms = false;
        let errors = validate_register_fields(&r);
        assert!(errors.iter().any(|e| e.field == "accepted_terms"));
    }

    #[test]
    fn test_weak_password_is_rejected() {
        let mut r = request();
        r.password1 = "password123".to_string();
        r.password2 = "password123".to_string();
        let errors = validate_register_fields(&r);
        assert!(errors.iter().any(|e| e.field == "password2"));
    }

    #[test]
    fn test_domain_allow_list_empty_allows_all() {
        let config = SiteConfig::default();
        assert!(email_domain_allowed(&config, "user@anything.example"));
    }

    #[test]
    fn test_domain_allow_list_filters() {
        let config = SiteConfig::new(
            [(
                KEY_EMAIL_DOMAIN_ALLOW_LIST.to_string(),
                json!(["example.com", "Example.ORG"]),
            )]
            .into_iter()
            .collect(),
        );
        assert!(email_domain_allowed(&config, "user@example.com"));
        assert!(email_domain_allowed(&config, "user@EXAMPLE.ORG"));
        assert!(!email_domain_allowed(&config, "user@evil.example"));
    }
}
