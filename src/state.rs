use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::{
    EventLogRepository, IdentityProviderRepository, OtpDeviceRepository, SiteConfigRepository,
    UserRepository,
};
use crate::services::{
    AuthPipeline, CaptchaService, EmailService, LegacyBackend, LocalBackend, RememberService,
    TotpService,
};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL コネクションプール
    pub db_pool: PgPool,
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// ユーザーリポジトリ
    pub user_repo: UserRepository,
    /// OTPデバイスリポジトリ
    pub otp_repo: OtpDeviceRepository,
    /// 認証失敗イベントリポジトリ（リスクシグナル）
    pub event_log_repo: EventLogRepository,
    /// サイト設定ストア
    pub site_config_repo: SiteConfigRepository,
    /// SAML IdP リポジトリ
    pub idp_repo: IdentityProviderRepository,
    /// 認証パイプライン（ローカル → レガシー委譲の順）
    pub pipeline: AuthPipeline,
    /// CAPTCHA検証サービス
    pub captcha_service: CaptchaService,
    /// TOTPサービス
    pub totp_service: TotpService,
    /// rememberデバイストークンサービス
    pub remember_service: RememberService,
    /// メールサービス
    pub email_service: EmailService,
}

impl AppState {
    /// 新しい AppState を作成
    pub fn new(db_pool: PgPool, config: Config) -> Result<Self, AppError> {
        let config = Arc::new(config);
        let user_repo = UserRepository::new(db_pool.clone());
        let otp_repo = OtpDeviceRepository::new(db_pool.clone());
        let event_log_repo = EventLogRepository::new(db_pool.clone());
        let site_config_repo = SiteConfigRepository::new(db_pool.clone());
        let idp_repo = IdentityProviderRepository::new(db_pool.clone());

        // 認証バックエンドの明示的な順序付きリスト
        let local_backend = LocalBackend::new(user_repo.clone());
        let legacy_backend = LegacyBackend::new(
            user_repo.clone(),
            site_config_repo.clone(),
            Duration::from_secs(config.legacy_timeout_secs),
        )?;
        let pipeline = AuthPipeline::new(vec![Box::new(local_backend), Box::new(legacy_backend)]);

        let captcha_service = CaptchaService::new(config.captcha_verify_url.clone())?;
        let totp_service = TotpService::new(
            config.totp_issuer.clone(),
            config.encryption_key.expose_secret(),
        )?;
        let remember_service = RememberService::new(
            config.encryption_key.expose_secret(),
            config.remember_ttl_secs,
        )?;
        let email_service = EmailService::new();

        Ok(Self {
            db_pool,
            config,
            user_repo,
            otp_repo,
            event_log_repo,
            site_config_repo,
            idp_repo,
            pipeline,
            captcha_service,
            totp_service,
            remember_service,
            email_service,
        })
    }
}
