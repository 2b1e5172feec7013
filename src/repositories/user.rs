use sqlx::PgPool;
use uuid::Uuid;

use crate::models::User;

/// LOWER(email) 上のユニークインデックス名
/// プロビジョニング競合の判定に使う
pub const EMAIL_UNIQUE_CONSTRAINT: &str = "users_email_lower_key";

const USER_COLUMNS: &str = "id, email, name, password_hash, is_active, is_admin, \
     accepted_terms, receives_newsletter, avatar, created_at, updated_at";

/// 新規ユーザー作成パラメータ
///
/// password_hash はハッシュ済みであること（平文は渡さない）
#[derive(Debug)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub password_hash: &'a str,
    pub is_active: bool,
    pub is_admin: bool,
    pub accepted_terms: bool,
    pub receives_newsletter: bool,
}

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// メールアドレスでユーザーを検索（大文字小文字を区別しない）
    ///
    /// 認証経路はこちらを使う
    pub async fn find_by_email_ci(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE LOWER(email) = LOWER($1)
            "#,
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    /// アクティブユーザーを完全一致で検索（大文字小文字を区別する）
    ///
    /// # Note
    /// 登録時の重複チェック専用。認証側の検索（大文字小文字を区別しない）
    /// と意図的に挙動が異なる。最終的な一意性は LOWER(email) の
    /// ユニークインデックスが担保する。
    pub async fn find_active_by_email_exact(
        &self,
        email: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE email = $1 AND is_active = true
            "#,
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    /// ユーザーIDでユーザーを検索
    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE id = $1
            "#,
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// 新しいユーザーを作成
    ///
    /// # Errors
    /// ユニーク制約違反時: `sqlx::Error::Database`
    /// (constraint = `EMAIL_UNIQUE_CONSTRAINT`)。
    /// 呼び出し側で競合（再読み込み）かフィールドエラーかを判断すること。
    pub async fn create(&self, new_user: NewUser<'_>) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users
                (email, name, password_hash, is_active, is_admin,
                 accepted_terms, receives_newsletter)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(new_user.email)
        .bind(new_user.name)
        .bind(new_user.password_hash)
        .bind(new_user.is_active)
        .bind(new_user.is_admin)
        .bind(new_user.accepted_terms)
        .bind(new_user.receives_newsletter)
        .fetch_one(&self.pool)
        .await
    }

    /// ユーザーのパスワードを更新
    ///
    /// # Note
    /// password_hash はログに出力しないこと
    pub async fn update_password(
        &self,
        user_id: Uuid,
        new_password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(new_password_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// メール一意性制約違反かどうか
pub fn is_email_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.constraint() == Some(EMAIL_UNIQUE_CONSTRAINT);
    }
    false
}
