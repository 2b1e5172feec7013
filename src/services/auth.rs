use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;

use crate::error::AppError;
use crate::models::User;
use crate::repositories::UserRepository;

/// タイミング攻撃対策用ダミーハッシュ
/// ユーザー不在時も同等のコストでパスワード検証を実行する
const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$VE0e3g7DalWHgDwou3nuRA$uC6TER156UQpk0lNQ5+jHM0l5poVjPA1he8TZbuGcaA";

/// パスワードをargon2idでハッシュ化
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| {
            tracing::error!(error = ?e, "パスワードハッシュ生成エラー");
            AppError::Internal(anyhow::anyhow!("password hash error"))
        })?;
    Ok(hash.to_string())
}

/// パスワードを検証
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| {
        tracing::error!(error = ?e, "パスワードハッシュのパースエラー");
        AppError::Internal(anyhow::anyhow!("password hash parse error"))
    })?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// よく使われる脆弱パスワード（強度チェックで拒否）
const COMMON_PASSWORDS: &[&str] = &[
    "password", "password1", "password123", "12345678", "123456789", "1234567890", "qwerty123",
    "qwertyuiop", "iloveyou", "admin123", "letmein1", "welcome1", "sunshine", "football",
    "princess", "dragon123", "baseball", "superman", "trustno1", "starwars",
];

/// パスワード強度チェック
///
/// 8文字以上・数字のみ不可・既知の脆弱パスワード不可・
/// ユーザー属性（メールのローカル部、表示名）を含まないこと。
/// 違反時はフィールドエラー向けのメッセージを返す。
pub fn password_strength_error(password: &str, user_attrs: &[&str]) -> Option<String> {
    if password.len() < 8 {
        return Some("パスワードは8文字以上で入力してください".to_string());
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        return Some("パスワードを数字だけにすることはできません".to_string());
    }
    let lowered = password.to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        return Some("このパスワードは一般的すぎます".to_string());
    }
    for attr in user_attrs {
        let attr = attr.trim().to_lowercase();
        if attr.len() >= 4 && lowered.contains(&attr) {
            return Some("パスワードが個人情報と似すぎています".to_string());
        }
    }
    None
}

/// 単一の認証バックエンド
///
/// 資格情報を受け取り、成立すれば Some(User)、不成立なら None を返す。
/// None は「このバックエンドでは判定できない」を意味し、
/// パイプラインは次のバックエンドへ進む。
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn attempt(&self, email: &str, password: &str) -> Result<Option<User>, AppError>;
}

/// ローカルDBの保存ハッシュに対する認証バックエンド
#[derive(Clone)]
pub struct LocalBackend {
    user_repo: UserRepository,
}

impl LocalBackend {
    pub fn new(user_repo: UserRepository) -> Self {
        Self { user_repo }
    }
}

#[async_trait]
impl Authenticator for LocalBackend {
    /// タイミング攻撃対策: ユーザー不在・パスワード未設定でも
    /// ダミーのパスワード検証を実行する
    async fn attempt(&self, email: &str, password: &str) -> Result<Option<User>, AppError> {
        let user = self.user_repo.find_by_email_ci(email).await?;

        match user {
            Some(user) => {
                let password_hash = match &user.password_hash {
                    Some(hash) => hash.clone(),
                    None => {
                        // パスワード未設定ユーザー（レガシー移行途中など）
                        let _ = verify_password(password, DUMMY_HASH);
                        tracing::warn!(email = %email, "ローカル認証失敗: パスワード未設定");
                        return Ok(None);
                    }
                };

                if verify_password(password, &password_hash)? {
                    tracing::info!(email = %email, "ローカル認証成功");
                    Ok(Some(user))
                } else {
                    tracing::warn!(email = %email, "ローカル認証失敗: パスワード不一致");
                    Ok(None)
                }
            }
            None => {
                // ユーザーの存在有無を応答時間から推測できなくする
                let _ = verify_password(password, DUMMY_HASH);
                tracing::debug!(email = %email, "ローカル認証: ユーザー不在");
                Ok(None)
            }
        }
    }
}

/// 認証パイプライン
///
/// バックエンドの明示的な順序付きリスト。先頭から順に attempt を呼び、
/// 最初に Some を返したバックエンドの結果を採用する。
/// 全バックエンドが None なら認証失敗。
#[derive(Clone)]
pub struct AuthPipeline {
    backends: Arc<Vec<Box<dyn Authenticator>>>,
}

impl AuthPipeline {
    pub fn new(backends: Vec<Box<dyn Authenticator>>) -> Self {
        Self {
            backends: Arc::new(backends),
        }
    }

    /// 順序どおりに各バックエンドで認証を試みる
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AppError> {
        for backend in self.backends.iter() {
            if let Some(user) = backend.attempt(email, password).await? {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_roundtrip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &hash).unwrap());
        assert!(!verify_password("wrong password", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_invalid_hash_format() {
        let result = verify_password("whatever1", "invalid_hash_format");
        assert!(result.is_err());
    }

    #[test]
    fn test_strength_rejects_short_password() {
        assert!(password_strength_error("short", &[]).is_some());
    }

    #[test]
    fn test_strength_rejects_numeric_only() {
        assert!(password_strength_error("92837465", &[]).is_some());
    }

    #[test]
    fn test_strength_rejects_common_password() {
        assert!(password_strength_error("password123", &[]).is_some());
        assert!(password_strength_error("QWERTY123", &[]).is_some());
    }

    #[test]
    fn test_strength_rejects_user_attribute_similarity() {
        let err = password_strength_error("alice2024!", &["alice", "Alice Jones"]);
        assert!(err.is_some());
    }

    #[test]
    fn test_strength_accepts_reasonable_password() {
        assert!(password_strength_error("tr0ub4dor&3xt", &["alice"]).is_none());
    }

    struct StaticBackend(Option<&'static str>);

    #[async_trait]
    impl Authenticator for StaticBackend {
        async fn attempt(&self, email: &str, _password: &str) -> Result<Option<User>, AppError> {
            Ok(self.0.filter(|e| *e == email).map(|e| test_user(e)))
        }
    }

    fn test_user(email: &str) -> User {
        User {
            id: uuid::Uuid::new_v4(),
            email: email.to_string(),
            name: "Test".to_string(),
            password_hash: None,
            is_active: true,
            is_admin: false,
            accepted_terms: true,
            receives_newsletter: false,
            avatar: None,
            created_at: time::OffsetDateTime::now_utc(),
            updated_at: time::OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_pipeline_stops_at_first_match() {
        let pipeline = AuthPipeline::new(vec![
            Box::new(StaticBackend(None)),
            Box::new(StaticBackend(Some("a@example.com"))),
        ]);

        let user = pipeline.authenticate("a@example.com", "pw").await.unwrap();
        assert!(user.is_some());
    }

    #[tokio::test]
    async fn test_pipeline_exhaustion_is_no_user() {
        let pipeline = AuthPipeline::new(vec![
            Box::new(StaticBackend(None)),
            Box::new(StaticBackend(Some("a@example.com"))),
        ]);

        let user = pipeline.authenticate("b@example.com", "pw").await.unwrap();
        assert!(user.is_none());
    }
}
