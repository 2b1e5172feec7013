use serde::Deserialize;

use crate::error::AppError;
use crate::models::SiteConfig;
use crate::models::site_config::KEY_RECAPTCHA_ENABLED;

/// CAPTCHA要求の閾値: 直近5分間に5回以上のログイン失敗
/// （元システムのロックアウト設定に合わせる）
pub const FAILURE_LIMIT: i64 = 5;
pub const FAILURE_WINDOW_SECS: i64 = 5 * 60;

/// 検証サービスのレスポンス。success 以外のフィールドは見ない
#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    #[serde(default)]
    success: bool,
}

/// ログイン試行でCAPTCHAが必要か
///
/// 有効フラグとシークレットキーが揃っていて、かつリスクシグナル
/// （失敗回数）が閾値以上のときだけ要求する。
/// シークレット未設定 = 機能無効（エラーではない）。
pub fn login_captcha_required(config: &SiteConfig, recent_failures: i64) -> bool {
    if !config.bool_or(KEY_RECAPTCHA_ENABLED, true) {
        return false;
    }
    if config.recaptcha_secret().is_none() {
        return false;
    }
    recent_failures >= FAILURE_LIMIT
}

/// 登録でCAPTCHAが必要か（リスクシグナルによるバイパスなし）
pub fn registration_captcha_required(config: &SiteConfig) -> bool {
    config.bool_or(KEY_RECAPTCHA_ENABLED, true) && config.recaptcha_secret().is_some()
}

/// CAPTCHAトークン検証サービス
#[derive(Clone)]
pub struct CaptchaService {
    client: reqwest::Client,
    verify_url: String,
}

impl CaptchaService {
    pub fn new(verify_url: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| {
                tracing::error!(error = ?e, "CAPTCHAクライアントの初期化に失敗");
                AppError::Internal(anyhow::anyhow!("captcha client build error"))
            })?;

        Ok(Self { client, verify_url })
    }

    /// 提出されたトークンを検証する
    ///
    /// fail closed: トークン欠落・通信エラー・パース失敗はすべて false。
    /// 成否は検証サービスの success フィールドのみで判定する。
    pub async fn verify(&self, secret: &str, response_token: Option<&str>) -> bool {
        let Some(token) = response_token else {
            tracing::warn!("CAPTCHA検証: トークン未提出");
            return false;
        };
        if token.is_empty() {
            tracing::warn!("CAPTCHA検証: 空トークン");
            return false;
        }

        let params = [("secret", secret), ("response", token)];

        let response = match self.client.post(&self.verify_url).form(&params).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = ?e, "CAPTCHA検証: 通信エラー（拒否として扱う）");
                return false;
            }
        };

        match response.json::<SiteVerifyResponse>().await {
            Ok(parsed) => parsed.success,
            Err(e) => {
                tracing::warn!(error = ?e, "CAPTCHA検証: レスポンスのパースエラー");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(pairs: &[(&str, serde_json::Value)]) -> SiteConfig {
        SiteConfig::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_login_not_required_below_limit() {
        let c = config(&[("recaptcha_secret_key", json!("secret"))]);
        assert!(!login_captcha_required(&c, 0));
        assert!(!login_captcha_required(&c, FAILURE_LIMIT - 1));
    }

    #[test]
    fn test_login_required_at_limit() {
        let c = config(&[("recaptcha_secret_key", json!("secret"))]);
        assert!(login_captcha_required(&c, FAILURE_LIMIT));
        assert!(login_captcha_required(&c, FAILURE_LIMIT + 10));
    }

    #[test]
    fn test_missing_secret_disables_gate() {
        // シークレット未設定は機能無効であってエラーではない
        let c = SiteConfig::default();
        assert!(!login_captcha_required(&c, 100));
        assert!(!registration_captcha_required(&c));
    }

    #[test]
    fn test_disabled_flag_wins_over_failures() {
        let c = config(&[
            ("recaptcha_enabled", json!(false)),
            ("recaptcha_secret_key", json!("secret")),
        ]);
        assert!(!login_captcha_required(&c, 100));
        assert!(!registration_captcha_required(&c));
    }

    #[test]
    fn test_registration_always_required_when_configured() {
        let c = config(&[("recaptcha_secret_key", json!("secret"))]);
        assert!(registration_captcha_required(&c));
    }

    #[test]
    fn test_site_verify_response_defaults_to_failure() {
        let parsed: SiteVerifyResponse = serde_json::from_str("{}").unwrap();
        assert!(!parsed.success);
    }
}
