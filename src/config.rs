use secrecy::SecretBox;
use serde::Deserialize;

/// プロセス起動時の環境変数設定
///
/// 実行時に変更可能な運用設定（SMTP、レガシーURL、reCAPTCHAキーなど）は
/// DB上のサイト設定ストア（site_settings）が持つ。ここには再起動を
/// 要するものだけを置く。
#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: SecretBox<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // レガシーSSO検証API
    /// レガシー検証エンドポイントのタイムアウト（秒）
    /// 元システムには明示タイムアウトが無いため必ず上限を設ける
    #[serde(default = "default_legacy_timeout_secs")]
    pub legacy_timeout_secs: u64,

    // reCAPTCHA
    /// トークン検証エンドポイント（テスト時に差し替え可能）
    #[serde(default = "default_captcha_verify_url")]
    pub captcha_verify_url: String,

    // 2FA (TOTP) 設定
    /// TOTP発行者名（認証アプリに表示される）
    pub totp_issuer: String,
    /// AES-256暗号化キー（Base64エンコード、32バイト）
    /// TOTPシークレットの保存と remember トークンの封緘に使う
    pub encryption_key: SecretBox<String>,

    /// 「このデバイスを記憶する」トークンの有効期間（秒）
    #[serde(default = "default_remember_ttl_secs")]
    pub remember_ttl_secs: i64,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_LEGACY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
const DEFAULT_REMEMBER_TTL_SECS: i64 = 30 * 24 * 3600;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_legacy_timeout_secs() -> u64 {
    DEFAULT_LEGACY_TIMEOUT_SECS
}

fn default_captcha_verify_url() -> String {
    DEFAULT_CAPTCHA_VERIFY_URL.to_string()
}

fn default_remember_ttl_secs() -> i64 {
    DEFAULT_REMEMBER_TTL_SECS
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        envy::from_env()
    }
}
