use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// ユーザー
///
/// ローカル登録またはレガシーSSO検証成功時のJITプロビジョニングで作成される。
/// email はDB側で LOWER(email) のユニークインデックスにより
/// 大文字小文字を区別せず一意。
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
    pub accepted_terms: bool,
    pub receives_newsletter: bool,
    pub avatar: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
