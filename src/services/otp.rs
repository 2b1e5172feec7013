use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng},
};
use data_encoding::BASE32;
use rand::Rng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, TOTP};

use crate::error::AppError;

/// TOTPのタイムステップ幅（秒）
const TOTP_PERIOD: u64 = 30;
/// 前後に許容するステップ数（±30秒）
const TOTP_SKEW: i64 = 1;

/// 発行するバックアップコードの数と桁数
pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_DIGITS: u32 = 8;

/// TOTP (Time-based One-Time Password) サービス
///
/// # Security
/// - シークレットはAES-256-GCMで暗号化してDB保存
/// - シークレット平文・コードはログに出力しない
#[derive(Clone)]
pub struct TotpService {
    issuer: String,
    encryption_key: [u8; 32],
}

impl TotpService {
    /// # Arguments
    /// * `issuer` - TOTP発行者名（認証アプリに表示される）
    /// * `encryption_key_base64` - Base64エンコードされた32バイトの暗号化キー
    pub fn new(issuer: String, encryption_key_base64: &str) -> Result<Self, AppError> {
        let encryption_key = decode_key(encryption_key_base64)?;
        Ok(Self {
            issuer,
            encryption_key,
        })
    }

    /// 20バイトのランダムシークレットを生成し、Base32でエンコード
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        BASE32.encode(&bytes)
    }

    /// シークレットをAES-256-GCMで暗号化
    ///
    /// # Returns
    /// 96ビットnonce (12バイト) + 暗号文
    pub fn encrypt_secret(&self, secret: &str) -> Result<Vec<u8>, AppError> {
        encrypt(&self.encryption_key, secret.as_bytes())
    }

    /// 暗号化されたシークレットを復号
    pub fn decrypt_secret(&self, encrypted: &[u8]) -> Result<String, AppError> {
        let plaintext = decrypt(&self.encryption_key, encrypted)?;
        String::from_utf8(plaintext).map_err(|e| {
            tracing::error!(error = ?e, "復号データのUTF-8変換エラー");
            AppError::Internal(anyhow::anyhow!("invalid utf8 after decryption"))
        })
    }

    /// QRコードを生成（PNG形式、Base64エンコード）
    pub fn generate_qr_code(&self, email: &str, secret: &str) -> Result<String, AppError> {
        let totp = self.create_totp(secret, Some(self.issuer.clone()), email.to_string())?;

        totp.get_qr_base64().map_err(|e| {
            tracing::error!(error = %e, "QRコード生成エラー");
            AppError::Internal(anyhow::anyhow!("qr code generation error"))
        })
    }

    /// TOTPコードを検証し、一致したタイムステップを返す
    ///
    /// 前後1ステップの時間ウィンドウを許容（±30秒）。
    /// 返したステップは呼び出し側でリプレイガード
    /// （last_used_step の単調前進）に使うこと。
    pub fn verify_code(&self, secret: &str, code: &str) -> Result<Option<i64>, AppError> {
        // 入力検証: コードは6桁の数字のみ
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(None);
        }

        let totp = self.create_totp(secret, None, String::new())?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| {
                tracing::error!(error = ?e, "システム時刻取得エラー");
                AppError::Internal(anyhow::anyhow!("system time error"))
            })?
            .as_secs();

        Ok(Self::match_step(&totp, code, now))
    }

    /// 現在ステップと前後 TOTP_SKEW ステップを突き合わせる
    fn match_step(totp: &TOTP, code: &str, now_secs: u64) -> Option<i64> {
        let current_step = (now_secs / TOTP_PERIOD) as i64;

        for offset in -TOTP_SKEW..=TOTP_SKEW {
            let step = current_step + offset;
            if step < 0 {
                continue;
            }
            let expected = totp.generate(step as u64 * TOTP_PERIOD);
            if expected == code {
                return Some(step);
            }
        }
        None
    }

    fn create_totp(
        &self,
        secret: &str,
        issuer: Option<String>,
        account_name: String,
    ) -> Result<TOTP, AppError> {
        let secret_bytes = BASE32.decode(secret.as_bytes()).map_err(|e| {
            tracing::error!(error = ?e, "シークレットのBase32デコードエラー");
            AppError::Internal(anyhow::anyhow!("invalid base32 secret"))
        })?;

        TOTP::new(
            Algorithm::SHA1,
            6,
            TOTP_SKEW as u8,
            TOTP_PERIOD,
            secret_bytes,
            issuer,
            account_name,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "TOTP作成エラー");
            AppError::Internal(anyhow::anyhow!("totp creation error"))
        })
    }
}

/// バックアップコード一式を生成（8桁数字 × BACKUP_CODE_COUNT）
///
/// 平文はレスポンスで一度だけ返し、保存はダイジェストのみ。
pub fn generate_backup_codes() -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let n: u32 = rng.gen_range(0..100_000_000);
            format!("{:08}", n)
        })
        .collect()
}

/// バックアップコードの保存用ダイジェスト
pub fn backup_code_digest(code: &str) -> Vec<u8> {
    Sha256::digest(code.trim().as_bytes()).to_vec()
}

/// Base64キーを32バイト配列へ
pub(crate) fn decode_key(encryption_key_base64: &str) -> Result<[u8; 32], AppError> {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    let key_bytes = STANDARD.decode(encryption_key_base64).map_err(|e| {
        tracing::error!(error = ?e, "暗号化キーのBase64デコードエラー");
        AppError::Internal(anyhow::anyhow!("invalid encryption key format"))
    })?;

    if key_bytes.len() != 32 {
        tracing::error!(
            expected = 32,
            actual = key_bytes.len(),
            "暗号化キーの長さが不正"
        );
        return Err(AppError::Internal(anyhow::anyhow!(
            "encryption key must be 32 bytes"
        )));
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&key_bytes);
    Ok(key)
}

/// AES-256-GCM 暗号化（nonce 12バイトを先頭に付与）
pub(crate) fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, AppError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| {
        tracing::error!(error = ?e, "AES-GCM暗号化器の初期化エラー");
        AppError::Internal(anyhow::anyhow!("cipher initialization error"))
    })?;

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|e| {
        tracing::error!(error = ?e, "暗号化エラー");
        AppError::Internal(anyhow::anyhow!("encryption error"))
    })?;

    let mut result = Vec::with_capacity(12 + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// encrypt() の逆操作
pub(crate) fn decrypt(key: &[u8; 32], encrypted: &[u8]) -> Result<Vec<u8>, AppError> {
    if encrypted.len() < 12 {
        tracing::error!(len = encrypted.len(), "暗号化データが短すぎる");
        return Err(AppError::Internal(anyhow::anyhow!(
            "encrypted data too short"
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| {
        tracing::error!(error = ?e, "AES-GCM暗号化器の初期化エラー");
        AppError::Internal(anyhow::anyhow!("cipher initialization error"))
    })?;

    let (nonce_bytes, ciphertext) = encrypted.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher.decrypt(nonce, ciphertext).map_err(|e| {
        tracing::error!(error = ?e, "復号エラー");
        AppError::Internal(anyhow::anyhow!("decryption error"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    fn create_test_service() -> TotpService {
        let key = [0u8; 32];
        let key_base64 = STANDARD.encode(key);
        TotpService::new("TestApp".to_string(), &key_base64).unwrap()
    }

    #[test]
    fn test_generate_secret() {
        let secret = TotpService::generate_secret();
        // Base32エンコードされた20バイト = 32文字
        assert_eq!(secret.len(), 32);
        assert!(
            secret
                .chars()
                .all(|c| "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567".contains(c))
        );
    }

    #[test]
    fn test_encrypt_decrypt_secret() {
        let service = create_test_service();
        let original = TotpService::generate_secret();

        let encrypted = service.encrypt_secret(&original).unwrap();
        // 12バイトnonce + 暗号文 + 16バイトtag
        assert!(encrypted.len() > 12);

        let decrypted = service.decrypt_secret(&encrypted).unwrap();
        assert_eq!(original, decrypted);
    }

    #[test]
    fn test_verify_returns_matched_step() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();
        let totp = service
            .create_totp(&secret, None, String::new())
            .unwrap();

        let now = 1_700_000_000u64;
        let code = totp.generate(now);
        let step = TotpService::match_step(&totp, &code, now);
        assert_eq!(step, Some((now / TOTP_PERIOD) as i64));
    }

    #[test]
    fn test_verify_accepts_previous_step_within_skew() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();
        let totp = service
            .create_totp(&secret, None, String::new())
            .unwrap();

        let now = 1_700_000_000u64;
        let previous_code = totp.generate(now - TOTP_PERIOD);
        let step = TotpService::match_step(&totp, &previous_code, now);
        assert_eq!(step, Some((now / TOTP_PERIOD) as i64 - 1));
    }

    #[test]
    fn test_verify_rejects_stale_code() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();
        let totp = service
            .create_totp(&secret, None, String::new())
            .unwrap();

        let now = 1_700_000_000u64;
        let stale_code = totp.generate(now - 10 * TOTP_PERIOD);
        assert_eq!(TotpService::match_step(&totp, &stale_code, now), None);
    }

    #[test]
    fn test_verify_invalid_code_format() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();

        // 6桁でない
        assert!(service.verify_code(&secret, "12345").unwrap().is_none());
        // 数字以外を含む
        assert!(service.verify_code(&secret, "12345a").unwrap().is_none());
    }

    #[test]
    fn test_generate_qr_code() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();

        let qr_base64 = service
            .generate_qr_code("test@example.com", &secret)
            .unwrap();
        assert!(!qr_base64.is_empty());
    }

    #[test]
    fn test_backup_codes_shape() {
        let codes = generate_backup_codes();
        assert_eq!(codes.len(), BACKUP_CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), BACKUP_CODE_DIGITS as usize);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_backup_code_digest_ignores_whitespace() {
        assert_eq!(backup_code_digest("12345678"), backup_code_digest(" 12345678 "));
        assert_ne!(backup_code_digest("12345678"), backup_code_digest("12345679"));
    }

    #[test]
    fn test_new_with_invalid_key_length() {
        let short_key = STANDARD.encode([0u8; 16]);
        let result = TotpService::new("TestApp".to_string(), &short_key);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_with_invalid_base64() {
        let result = TotpService::new("TestApp".to_string(), "not-valid-base64!!!");
        assert!(result.is_err());
    }
}
