use std::collections::HashMap;

/// サイト設定のスナップショット
///
/// site_settings テーブルを読み込んだ時点のキー・バリューを保持する。
/// 参照系アクセサは「キー欠落 = 機能無効」として常にデフォルトを返し、
/// 欠落をエラーにしない。書き込みは管理操作のみで、次回スナップショット
/// から再起動なしで反映される。
#[derive(Debug, Clone, Default)]
pub struct SiteConfig {
    values: HashMap<String, serde_json::Value>,
}

// 既知のキー（元システムの設定ストアに合わせたデフォルト）
pub const KEY_LEGACY_URL: &str = "legacy_url";
pub const KEY_RECAPTCHA_ENABLED: &str = "recaptcha_enabled";
pub const KEY_RECAPTCHA_SITE_KEY: &str = "recaptcha_site_key";
pub const KEY_RECAPTCHA_SECRET_KEY: &str = "recaptcha_secret_key";
pub const KEY_EMAIL_FROM: &str = "email_from";
pub const KEY_EMAIL_HOST: &str = "email_host";
pub const KEY_EMAIL_PORT: &str = "email_port";
pub const KEY_EMAIL_USER: &str = "email_user";
pub const KEY_EMAIL_PASS: &str = "email_pass";
pub const KEY_EMAIL_TIMEOUT_SECS: &str = "email_timeout_secs";
pub const KEY_EMAIL_SECURITY: &str = "email_security";
pub const KEY_EMAIL_FAIL_SILENTLY: &str = "email_fail_silently";
pub const KEY_EMAIL_DOMAIN_ALLOW_LIST: &str = "email_domain_allow_list";
pub const KEY_APP_TITLE: &str = "app_title";

impl SiteConfig {
    pub fn new(values: HashMap<String, serde_json::Value>) -> Self {
        Self { values }
    }

    /// 全設定の走査（管理表示用）
    pub fn entries(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.values.iter()
    }

    /// 文字列値。未設定・型違いなら default
    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    }

    /// 真偽値。未設定・型違いなら default
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.values
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    /// 整数値。未設定・型違い・範囲外なら default
    pub fn u16_or(&self, key: &str, default: u16) -> u16 {
        self.values
            .get(key)
            .and_then(|v| v.as_u64())
            .and_then(|n| u16::try_from(n).ok())
            .unwrap_or(default)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.values
            .get(key)
            .and_then(|v| v.as_u64())
            .unwrap_or(default)
    }

    /// 文字列配列。未設定なら空（= 制限なしの意味で使う）
    pub fn str_list(&self, key: &str) -> Vec<String> {
        self.values
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// レガシーSSOのベースURL。空文字列は「未設定 = 委譲無効」
    pub fn legacy_url(&self) -> Option<String> {
        let url = self.str_or(KEY_LEGACY_URL, "");
        if url.trim().is_empty() { None } else { Some(url) }
    }

    /// reCAPTCHA シークレット。空なら Some にしない（= ゲート無効）
    pub fn recaptcha_secret(&self) -> Option<String> {
        let secret = self.str_or(KEY_RECAPTCHA_SECRET_KEY, "");
        if secret.is_empty() {
            None
        } else {
            Some(secret)
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
    fn test_missing_key_returns_default() {
        let c = SiteConfig::default();
        assert_eq!(c.str_or(KEY_EMAIL_HOST, ""), "");
        assert_eq!(c.u16_or(KEY_EMAIL_PORT, 25), 25);
        assert!(c.bool_or(KEY_RECAPTCHA_ENABLED, true));
        assert!(c.str_list(KEY_EMAIL_DOMAIN_ALLOW_LIST).is_empty());
    }

    #[test]
    fn test_type_mismatch_returns_default() {
        let c = config(&[(KEY_EMAIL_PORT, json!("not-a-number"))]);
        assert_eq!(c.u16_or(KEY_EMAIL_PORT, 25), 25);
    }

    #[test]
    fn test_empty_legacy_url_means_disabled() {
        let c = config(&[(KEY_LEGACY_URL, json!(""))]);
        assert!(c.legacy_url().is_none());

        let c = config(&[(KEY_LEGACY_URL, json!("   "))]);
        assert!(c.legacy_url().is_none());

        let c = config(&[(KEY_LEGACY_URL, json!("https://legacy.example.org"))]);
        assert_eq!(
            c.legacy_url().as_deref(),
            Some("https://legacy.example.org")
        );
    }

    #[test]
    fn test_empty_recaptcha_secret_means_disabled() {
        let c = SiteConfig::default();
        assert!(c.recaptcha_secret().is_none());

        let c = config(&[(KEY_RECAPTCHA_SECRET_KEY, json!("secret"))]);
        assert_eq!(c.recaptcha_secret().as_deref(), Some("secret"));
    }
}
