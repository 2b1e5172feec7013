use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// 登録フォームのフィールド単位エラー
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("認証エラー: {0}")]
    Authentication(String),

    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// 登録パイプラインのフィールド別エラー（全フィールド分を集約して返す）
    #[error("入力内容に誤りがあります")]
    ValidationFailed(Vec<FieldError>),

    #[error("CAPTCHA検証に失敗しました")]
    CaptchaFailed,

    /// OTP検証失敗。デバイス違い/トークン違いは区別しない（列挙防止）
    #[error("認証コードが無効です")]
    OtpRejected,

    #[error("二要素認証は既に有効です")]
    TotpAlreadyEnabled,

    #[error("二要素認証が有効化されていません")]
    TotpNotEnabled,

    #[error("データベースエラー")]
    Database(#[from] sqlx::Error),

    /// 外部サービス（レガシーSSO / reCAPTCHA）との通信エラー
    /// ユーザーには一般的な認証失敗としてしか見せない（fail closed）
    #[error("外部サービスエラー")]
    Remote(#[from] reqwest::Error),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldError>>,
}

impl ErrorResponse {
    fn message(message: String) -> Self {
        Self {
            error: message,
            fields: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Authentication(reason) => {
                tracing::warn!(reason = %reason, "認証失敗");
                (
                    StatusCode::UNAUTHORIZED,
                    ErrorResponse::message(
                        "メールアドレスまたはパスワードが正しくありません".to_string(),
                    ),
                )
            }
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::message(msg.clone())),
            Self::ValidationFailed(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    error: "入力内容に誤りがあります".to_string(),
                    fields: Some(fields.clone()),
                },
            ),
            Self::CaptchaFailed => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::message("CAPTCHA検証に失敗しました".to_string()),
            ),
            Self::OtpRejected => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::message("認証コードが正しくありません".to_string()),
            ),
            Self::TotpAlreadyEnabled => (
                StatusCode::CONFLICT,
                ErrorResponse::message("二要素認証は既に有効です".to_string()),
            ),
            Self::TotpNotEnabled => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::message("二要素認証が有効化されていません".to_string()),
            ),
            Self::Database(e) => {
                tracing::error!(error = ?e, "データベースエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::message("内部エラーが発生しました".to_string()),
                )
            }
            Self::Remote(e) => {
                // 外部障害を資格情報エラーと区別して応答しない
                tracing::error!(error = ?e, "外部サービス通信エラー");
                (
                    StatusCode::UNAUTHORIZED,
                    ErrorResponse::message(
                        "メールアドレスまたはパスワードが正しくありません".to_string(),
                    ),
                )
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::message("内部エラーが発生しました".to_string()),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otp_rejected_is_generic() {
        // デバイス違い/トークン違いで文言が変わらないこと
        let response = AppError::OtpRejected.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_internal_returns_500() {
        let err = AppError::Internal(anyhow::anyhow!("boom"));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_validation_failed_reports_all_fields() {
        let err = AppError::ValidationFailed(vec![
            FieldError::new("email", "必須です"),
            FieldError::new("password2", "一致しません"),
        ]);
        assert_eq!(
            err.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
