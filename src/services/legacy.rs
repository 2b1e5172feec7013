use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::User;
use crate::repositories::user::is_email_unique_violation;
use crate::repositories::{NewUser, SiteConfigRepository, UserRepository};
use crate::services::auth::{Authenticator, hash_password, verify_password};

/// レガシーAPIのメソッド名
const VERIFY_METHOD: &str = "pleio.verifyuser";

/// レガシー検証APIのレスポンス
///
/// 信頼しない入力として防御的にパースする。
/// キー欠落時のデフォルト: valid=false, name=入力ユーザー名, admin=false
#[derive(Debug, Default, Deserialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub result: VerifyResult,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyResult {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub admin: bool,
}

/// レガシーSSO委譲バックエンド
///
/// ローカルに該当ユーザーが居なければレガシーシステムのAPIで資格情報を
/// 検証し、成功時にローカルユーザーをJITプロビジョニングする。
/// サイト設定にレガシーURLが無ければ常に不成立（エラーではない）。
#[derive(Clone)]
pub struct LegacyBackend {
    client: reqwest::Client,
    user_repo: UserRepository,
    site_config_repo: SiteConfigRepository,
}

impl LegacyBackend {
    /// # Arguments
    /// * `timeout` - 外部呼び出しの上限。リクエスト全体をブロックするため必須
    pub fn new(
        user_repo: UserRepository,
        site_config_repo: SiteConfigRepository,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                tracing::error!(error = ?e, "レガシーAPIクライアントの初期化に失敗");
                AppError::Internal(anyhow::anyhow!("legacy client build error"))
            })?;

        Ok(Self {
            client,
            user_repo,
            site_config_repo,
        })
    }

    /// レガシーAPIで資格情報を検証
    ///
    /// ネットワーク障害・非2xx・パース失敗はすべて「不成立」に潰す。
    /// 運用上の切り分けのためログには理由を区別して残す。
    async fn verify_remote(
        &self,
        legacy_url: &str,
        username: &str,
        password: &str,
    ) -> Option<VerifyResult> {
        let url = format!("{}/services/api/rest/json/", legacy_url.trim_end_matches('/'));

        let params = [
            ("method", VERIFY_METHOD),
            ("user", username),
            ("password", password),
        ];

        let response = match self.client.post(&url).form(&params).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = ?e, "レガシー検証: 通信エラー（認証不成立として扱う）");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "レガシー検証: 異常ステータス");
            return None;
        }

        match response.json::<VerifyResponse>().await {
            Ok(parsed) => Some(parsed.result),
            Err(e) => {
                tracing::warn!(error = ?e, "レガシー検証: レスポンスのパースエラー");
                None
            }
        }
    }

    /// 検証成功したレガシーユーザーをローカルにプロビジョニング
    ///
    /// 同一ユーザー名の並行ログインが挿入を競合させうる。ユニーク制約
    /// 違反は致命エラーではなく「先に作られたユーザーを読み直して返す」。
    async fn provision(
        &self,
        username: &str,
        password: &str,
        result: VerifyResult,
    ) -> Result<User, AppError> {
        let name = result.name.unwrap_or_else(|| username.to_string());
        let password_hash = hash_password(password)?;

        let new_user = NewUser {
            email: username,
            name: &name,
            password_hash: &password_hash,
            is_active: true,
            is_admin: result.admin,
            // レガシー利用者は規約同意済み・ニュースレター購読として移行する
            accepted_terms: true,
            receives_newsletter: true,
        };

        match self.user_repo.create(new_user).await {
            Ok(user) => {
                tracing::info!(email = %username, admin = result.admin, "レガシーユーザーをプロビジョニング");
                Ok(user)
            }
            Err(e) if is_email_unique_violation(&e) => {
                tracing::info!(email = %username, "プロビジョニング競合: 既存ユーザーを返す");
                self.user_repo
                    .find_by_email_ci(username)
                    .await?
                    .ok_or(AppError::Database(e))
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }
}

#[async_trait]
impl Authenticator for LegacyBackend {
    async fn attempt(&self, email: &str, password: &str) -> Result<Option<User>, AppError> {
        // URL未設定なら委譲は不活性。ネットワーク呼び出しもしない
        let config = self.site_config_repo.snapshot().await?;
        let Some(legacy_url) = config.legacy_url() else {
            return Ok(None);
        };

        // ローカルに既存ユーザーがいればレガシー検証はしない
        // （既存ユーザーの平文パスワードをレガシーAPIに流さない）
        if let Some(user) = self.user_repo.find_by_email_ci(email).await? {
            let matched = match &user.password_hash {
                Some(hash) => verify_password(password, hash)?,
                None => false,
            };
            return Ok(matched.then_some(user));
        }

        let Some(result) = self.verify_remote(&legacy_url, email, password).await else {
            return Ok(None);
        };

        // valid が厳密に true のときだけプロビジョニング
        if !result.valid {
            tracing::debug!(email = %email, "レガシー検証: 資格情報不一致");
            return Ok(None);
        }

        Ok(Some(self.provision(email, password, result).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_response() {
        let json = r#"{"result":{"valid":true,"name":"Alice","admin":false}}"#;
        let parsed: VerifyResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.result.valid);
        assert_eq!(parsed.result.name.as_deref(), Some("Alice"));
        assert!(!parsed.result.admin);
    }

    #[test]
    fn test_parse_defaults_for_absent_keys() {
        // valid 欠落 → false, name 欠落 → None（呼び出し側で入力ユーザー名）,
        // admin 欠落 → false
        let parsed: VerifyResponse = serde_json::from_str(r#"{"result":{}}"#).unwrap();
        assert!(!parsed.result.valid);
        assert!(parsed.result.name.is_none());
        assert!(!parsed.result.admin);
    }

    #[test]
    fn test_parse_missing_result_object() {
        let parsed: VerifyResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(!parsed.result.valid);
    }

    #[test]
    fn test_parse_invalid_credentials_response() {
        let parsed: VerifyResponse =
            serde_json::from_str(r#"{"result":{"valid":false}}"#).unwrap();
        assert!(!parsed.result.valid);
    }

    #[test]
    fn test_parse_garbage_is_error() {
        // パース不能レスポンスは呼び出し側で不成立に潰される
        let parsed = serde_json::from_str::<VerifyResponse>("not json at all");
        assert!(parsed.is_err());
    }
}
