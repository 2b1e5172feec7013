pub mod auth;
pub mod captcha;
pub mod email;
pub mod legacy;
pub mod otp;
pub mod remember;

pub use auth::{AuthPipeline, Authenticator, LocalBackend};
pub use captcha::CaptchaService;
pub use email::EmailService;
pub use legacy::LegacyBackend;
pub use otp::TotpService;
pub use remember::RememberService;
