pub mod health;
pub mod login;
pub mod password;
pub mod register;
pub mod saml;
pub mod settings;
pub mod two_factor;

pub use health::health_check;
pub use login::login;
pub use password::change_password;
pub use register::register;
pub use saml::list_identity_providers;
pub use settings::{get_settings, update_setting};
pub use two_factor::{confirm_2fa, disable_2fa, regenerate_backup_codes, setup_2fa};
