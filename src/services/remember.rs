use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::otp::{decode_key, decrypt, encrypt};

/// 「このデバイスを記憶する」トークン
///
/// OTP検証成功時に発行し、次回ログインでは有効なトークンの提示で
/// OTPチャレンジをバイパスする。ペイロードは
/// `user_id:device_id:expires_unix` をAES-256-GCMで封緘したもの。
/// 改ざん・期限切れ・別ユーザーのトークンはすべて単に無効として扱う。
#[derive(Clone)]
pub struct RememberService {
    encryption_key: [u8; 32],
    ttl_secs: i64,
}

impl RememberService {
    pub fn new(encryption_key_base64: &str, ttl_secs: i64) -> Result<Self, AppError> {
        Ok(Self {
            encryption_key: decode_key(encryption_key_base64)?,
            ttl_secs,
        })
    }

    /// トークンを発行する
    pub fn mint(&self, user_id: Uuid, device_id: Uuid) -> Result<String, AppError> {
        let expires = OffsetDateTime::now_utc().unix_timestamp() + self.ttl_secs;
        let payload = format!("{user_id}:{device_id}:{expires}");
        let sealed = encrypt(&self.encryption_key, payload.as_bytes())?;
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// トークンを検証し、有効なら記憶されたデバイスIDを返す
    ///
    /// 失敗理由は区別せず None（復号失敗・形式不正・期限切れ・
    /// ユーザー不一致のいずれでも同じ）。
    pub fn validate(&self, token: &str, user_id: Uuid) -> Option<Uuid> {
        let sealed = URL_SAFE_NO_PAD.decode(token).ok()?;
        let payload = decrypt(&self.encryption_key, &sealed).ok()?;
        let payload = String::from_utf8(payload).ok()?;

        let mut parts = payload.splitn(3, ':');
        let token_user: Uuid = parts.next()?.parse().ok()?;
        let device_id: Uuid = parts.next()?.parse().ok()?;
        let expires: i64 = parts.next()?.parse().ok()?;

        if token_user != user_id {
            return None;
        }
        if OffsetDateTime::now_utc().unix_timestamp() >= expires {
            return None;
        }

        Some(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    fn create_test_service(ttl_secs: i64) -> RememberService {
        let key_base64 = STANDARD.encode([7u8; 32]);
        RememberService::new(&key_base64, ttl_secs).unwrap()
    }

    #[test]
    fn test_mint_validate_roundtrip() {
        let service = create_test_service(3600);
        let user_id = Uuid::new_v4();
        let device_id = Uuid::new_v4();

        let token = service.mint(user_id, device_id).unwrap();
        assert_eq!(service.validate(&token, user_id), Some(device_id));
    }

    #[test]
    fn test_rejects_other_users_token() {
        let service = create_test_service(3600);
        let token = service.mint(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert_eq!(service.validate(&token, Uuid::new_v4()), None);
    }

    #[test]
    fn test_rejects_expired_token() {
        let service = create_test_service(-1);
        let user_id = Uuid::new_v4();
        let token = service.mint(user_id, Uuid::new_v4()).unwrap();
        assert_eq!(service.validate(&token, user_id), None);
    }

    #[test]
    fn test_rejects_tampered_token() {
        let service = create_test_service(3600);
        let user_id = Uuid::new_v4();
        let token = service.mint(user_id, Uuid::new_v4()).unwrap();
        let last = token.chars().last().unwrap();
        let flipped = if last == 'A' { 'B' } else { 'A' };
        let mut tampered = token[..token.len() - 1].to_string();
        tampered.push(flipped);
        assert_eq!(service.validate(&tampered, user_id), None);
    }

    #[test]
    fn test_rejects_garbage_token() {
        let service = create_test_service(3600);
        assert_eq!(service.validate("not a token", Uuid::new_v4()), None);
        assert_eq!(service.validate("", Uuid::new_v4()), None);
    }

    #[test]
    fn test_tokens_from_other_key_are_invalid() {
        let service = create_test_service(3600);
        let other_key = STANDARD.encode([9u8; 32]);
        let other = RememberService::new(&other_key, 3600).unwrap();

        let user_id = Uuid::new_v4();
        let token = other.mint(user_id, Uuid::new_v4()).unwrap();
        assert_eq!(service.validate(&token, user_id), None);
    }
}
