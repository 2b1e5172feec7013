use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// SAML IdP 設定レコード
///
/// スキーマのみ。メタデータのパースや判定ロジックは持たない。
/// 証明書は空文字列のことがある（暗号化なし運用）。
#[derive(Debug, FromRow, Serialize)]
pub struct IdentityProvider {
    pub id: Uuid,
    pub shortname: String,
    pub entity_id: String,
    pub sso_url: String,
    pub slo_url: Option<String>,
    pub signing_cert: String,
    pub encryption_cert: String,
    pub created_at: OffsetDateTime,
}
