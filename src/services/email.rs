use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::error::AppError;
use crate::models::SiteConfig;
use crate::models::site_config::{
    KEY_EMAIL_FAIL_SILENTLY, KEY_EMAIL_FROM, KEY_EMAIL_HOST, KEY_EMAIL_PASS, KEY_EMAIL_PORT,
    KEY_EMAIL_SECURITY, KEY_EMAIL_TIMEOUT_SECS, KEY_EMAIL_USER,
};

/// メール送信サービス
///
/// トランスポートは送信のたびにサイト設定スナップショットから構築する。
/// SMTP設定の変更は再起動なしで次の送信から反映される。
/// host または from が未設定なら送信は無効（ログだけ残して成功扱い）。
#[derive(Clone)]
pub struct EmailService;

/// SMTP接続の保護方式（サイト設定 email_security の値）
#[derive(Debug, PartialEq, Eq)]
pub enum SmtpSecurity {
    None,
    Ssl,
    Tls,
}

impl SmtpSecurity {
    /// 未知の値は None（平文）ではなく最も安全な Tls に倒す
    pub fn parse(value: &str) -> Self {
        match value {
            "none" => Self::None,
            "ssl" => Self::Ssl,
            "tls" => Self::Tls,
            other => {
                tracing::warn!(value = %other, "不明な email_security 値、tls として扱う");
                Self::Tls
            }
        }
    }
}

impl EmailService {
    pub fn new() -> Self {
        Self
    }

    /// プレーンテキストメールを送信
    ///
    /// email_fail_silently が true のときは送信エラーを警告ログに
    /// 落として成功扱いにする（元システムの fail_silently 相当）。
    pub async fn send(
        &self,
        config: &SiteConfig,
        to: &str,
        subject: &str,
        body: String,
    ) -> Result<(), AppError> {
        let host = config.str_or(KEY_EMAIL_HOST, "");
        let from = config.str_or(KEY_EMAIL_FROM, "");
        let fail_silently = config.bool_or(KEY_EMAIL_FAIL_SILENTLY, false);

        if host.is_empty() || from.is_empty() {
            tracing::info!(to = %to, "SMTP未設定のためメール送信をスキップ");
            return Ok(());
        }

        let message = Message::builder()
            .from(from.parse().map_err(|e: lettre::address::AddressError| {
                tracing::error!(error = ?e, "送信元アドレスのパースエラー");
                AppError::Internal(e.into())
            })?)
            .to(to.parse().map_err(|e: lettre::address::AddressError| {
                tracing::error!(error = ?e, "宛先アドレスのパースエラー");
                AppError::Internal(e.into())
            })?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| AppError::Internal(e.into()))?;

        let mailer = build_transport(config, &host)?;

        // lettre の SmtpTransport は同期なのでブロッキングプールで送る
        let result = tokio::task::spawn_blocking(move || mailer.send(&message))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("email send task error: {e}")))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to, "メール送信完了");
                Ok(())
            }
            Err(e) if fail_silently => {
                tracing::warn!(error = ?e, to = %to, "メール送信失敗（fail_silently）");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = ?e, to = %to, "メール送信失敗");
                Err(AppError::Internal(e.into()))
            }
        }
    }
}

impl Default for EmailService {
    fn default() -> Self {
        Self::new()
    }
}

/// サイト設定からSMTPトランスポートを構築
fn build_transport(config: &SiteConfig, host: &str) -> Result<SmtpTransport, AppError> {
    let security = SmtpSecurity::parse(&config.str_or(KEY_EMAIL_SECURITY, "none"));
    let timeout = Duration::from_secs(config.u64_or(KEY_EMAIL_TIMEOUT_SECS, 5));

    // ポート未設定時は保護方式の標準ポートを使う
    let (mut builder, default_port) = match security {
        // SSL: 接続時からTLS（implicit TLS）
        SmtpSecurity::Ssl => (SmtpTransport::relay(host).map_err(smtp_build_error)?, 465),
        // TLS: STARTTLSで昇格
        SmtpSecurity::Tls => (
            SmtpTransport::starttls_relay(host).map_err(smtp_build_error)?,
            587,
        ),
        // 平文（閉域網での利用想定）
        SmtpSecurity::None => (SmtpTransport::builder_dangerous(host), 25),
    };
    let port = config.u16_or(KEY_EMAIL_PORT, default_port);

    builder = builder.port(port).timeout(Some(timeout));

    let username = config.str_or(KEY_EMAIL_USER, "");
    if !username.is_empty() {
        let password = config.str_or(KEY_EMAIL_PASS, "");
        builder = builder.credentials(Credentials::new(username, password));
    }

    Ok(builder.build())
}

fn smtp_build_error(e: lettre::transport::smtp::Error) -> AppError {
    tracing::error!(error = ?e, "SMTPトランスポートの構築に失敗");
    AppError::Internal(anyhow::anyhow!("smtp transport build error"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_mode_parsing() {
        assert_eq!(SmtpSecurity::parse("none"), SmtpSecurity::None);
        assert_eq!(SmtpSecurity::parse("ssl"), SmtpSecurity::Ssl);
        assert_eq!(SmtpSecurity::parse("tls"), SmtpSecurity::Tls);
        // 不明値は平文に落とさない
        assert_eq!(SmtpSecurity::parse("starttls?"), SmtpSecurity::Tls);
    }

    #[tokio::test]
    async fn test_send_without_host_is_noop() {
        let service = EmailService::new();
        let config = SiteConfig::default();
        let result = service
            .send(&config, "user@example.com", "件名", "本文".to_string())
            .await;
        assert!(result.is_ok());
    }
}
