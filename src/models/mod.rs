pub mod event_log;
pub mod identity_provider;
pub mod otp_device;
pub mod site_config;
pub mod user;

pub use event_log::EventLog;
pub use identity_provider::IdentityProvider;
pub use otp_device::{BackupCodeDevice, TotpDevice};
pub use site_config::SiteConfig;
pub use user::User;
