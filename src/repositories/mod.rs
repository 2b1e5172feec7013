pub mod event_log;
pub mod identity_provider;
pub mod otp_device;
pub mod site_config;
pub mod user;

pub use event_log::EventLogRepository;
pub use identity_provider::IdentityProviderRepository;
pub use otp_device::OtpDeviceRepository;
pub use site_config::SiteConfigRepository;
pub use user::{NewUser, UserRepository};
