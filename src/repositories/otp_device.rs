use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{BackupCodeDevice, TotpDevice};

const TOTP_COLUMNS: &str = "id, user_id, name, secret_encrypted, confirmed, is_default, \
     last_used_step, created_at, updated_at";

#[derive(Clone)]
pub struct OtpDeviceRepository {
    pool: PgPool,
}

impl OtpDeviceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // === TOTP デバイス ===

    /// チャレンジ選択に使うデフォルトTOTPデバイスを検索（有効化済みのみ）
    pub async fn find_default_totp(&self, user_id: Uuid) -> Result<Option<TotpDevice>, sqlx::Error> {
        sqlx::query_as::<_, TotpDevice>(&format!(
            r#"
            SELECT {TOTP_COLUMNS}
            FROM totp_devices
            WHERE user_id = $1 AND confirmed = true AND is_default = true
            "#,
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// ユーザーのTOTPデバイスを検索（未確認含む、設定フロー用）
    pub async fn find_totp_by_user(&self, user_id: Uuid) -> Result<Option<TotpDevice>, sqlx::Error> {
        sqlx::query_as::<_, TotpDevice>(&format!(
            r#"
            SELECT {TOTP_COLUMNS}
            FROM totp_devices
            WHERE user_id = $1
            "#,
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// 未確認のTOTPデバイスを作成
    ///
    /// # Note
    /// 作成時は confirmed = false, is_default = false。
    /// 初回コード検証成功後に confirm() を呼び出す。
    pub async fn create_totp(
        &self,
        user_id: Uuid,
        name: &str,
        secret_encrypted: &[u8],
    ) -> Result<TotpDevice, sqlx::Error> {
        sqlx::query_as::<_, TotpDevice>(&format!(
            r#"
            INSERT INTO totp_devices (user_id, name, secret_encrypted)
            VALUES ($1, $2, $3)
            RETURNING {TOTP_COLUMNS}
            "#,
        ))
        .bind(user_id)
        .bind(name)
        .bind(secret_encrypted)
        .fetch_one(&self.pool)
        .await
    }

    /// デバイスを有効化し、ユーザーのデフォルトに設定
    ///
    /// デフォルトはユーザーにつき最大1つ。既存のデフォルトは外す。
    pub async fn confirm_as_default(&self, user_id: Uuid, device_id: Uuid) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE totp_devices
            SET is_default = false, updated_at = NOW()
            WHERE user_id = $1 AND is_default = true
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE totp_devices
            SET confirmed = true, is_default = true, updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(device_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    /// ユーザーのTOTPデバイスを削除
    pub async fn delete_totp(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM totp_devices
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// TOTPのタイムステップを前進させる（リプレイガード）
    ///
    /// 同一ステップのコードが二度受理されないよう、単一のUPDATEで
    /// チェックと更新を行う。更新0行 = 使用済みステップ = 拒否。
    pub async fn advance_totp_step(&self, device_id: Uuid, step: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE totp_devices
            SET last_used_step = $2, updated_at = NOW()
            WHERE id = $1 AND last_used_step < $2
            "#,
        )
        .bind(device_id)
        .bind(step)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // === バックアップコードデバイス ===

    pub async fn find_backup_device(
        &self,
        user_id: Uuid,
    ) -> Result<Option<BackupCodeDevice>, sqlx::Error> {
        sqlx::query_as::<_, BackupCodeDevice>(
            r#"
            SELECT id, user_id, created_at
            FROM backup_code_devices
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// バックアップコード一式を発行し直す
    ///
    /// デバイスが無ければ作成し、既存コードは全て破棄して
    /// 新しいダイジェストに差し替える。
    pub async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        code_digests: &[Vec<u8>],
    ) -> Result<BackupCodeDevice, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let device: BackupCodeDevice = sqlx::query_as(
            r#"
            INSERT INTO backup_code_devices (user_id)
            VALUES ($1)
            ON CONFLICT (user_id)
            DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING id, user_id, created_at
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM backup_codes
            WHERE device_id = $1
            "#,
        )
        .bind(device.id)
        .execute(&mut *tx)
        .await?;

        for digest in code_digests {
            sqlx::query(
                r#"
                INSERT INTO backup_codes (device_id, code_sha256)
                VALUES ($1, $2)
                "#,
            )
            .bind(device.id)
            .bind(digest)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(device)
    }

    /// バックアップコードを消費する（ワンタイム）
    ///
    /// チェックと無効化は単一のDELETEで行う。並行提出されても
    /// どちらか一方しか行を得られない（二重消費防止）。
    pub async fn consume_backup_code(
        &self,
        device_id: Uuid,
        code_digest: &[u8],
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM backup_codes
            WHERE device_id = $1 AND code_sha256 = $2
            "#,
        )
        .bind(device_id)
        .bind(code_digest)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() >= 1)
    }

    /// 残りのバックアップコード数
    pub async fn remaining_backup_codes(&self, device_id: Uuid) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM backup_codes
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// ユーザーのバックアップコードデバイスを削除（コードはFKカスケード）
    pub async fn delete_backup_device(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM backup_code_devices
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// remember トークンが指すデバイスがユーザーの登録デバイスか確認
    pub async fn device_belongs_to_user(
        &self,
        user_id: Uuid,
        device_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM totp_devices
                WHERE id = $1 AND user_id = $2 AND confirmed = true
                UNION
                SELECT 1 FROM backup_code_devices
                WHERE id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(device_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}
