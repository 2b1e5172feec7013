use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// ユーザーのTOTPデバイス
///
/// シークレットは AES-256-GCM で暗号化されて保存される。
/// 平文シークレットはログに出力禁止。
/// `last_used_step` は同一タイムステップのコード再使用（リプレイ）を
/// 防ぐための単調増加カウンタ。
#[derive(Debug, FromRow, Serialize)]
pub struct TotpDevice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip)]
    pub secret_encrypted: Vec<u8>,
    /// 初回コード検証が済んで有効化されたか
    pub confirmed: bool,
    /// チャレンジ選択に使うデフォルトデバイスか（ユーザーにつき最大1つ）
    pub is_default: bool,
    #[serde(skip)]
    pub last_used_step: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// バックアップコードデバイス
///
/// コード本体は backup_codes テーブルに SHA-256 ダイジェストで保存され、
/// 消費時に行ごと削除される（ワンタイム）。
#[derive(Debug, FromRow, Serialize)]
pub struct BackupCodeDevice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
}
