//! Настройки харнесса: строки подключения по профилям, таймауты клиента,
//! переподключение, handshake и логирование.

pub mod profile;
pub mod settings;

pub use profile::Profile;
pub use settings::{
    ClientSettings, ConnectionStrings, HandshakeSettings, ReconnectSettings, Settings,
    CONFIG_BASENAME, ENV_PREFIX, LOCAL_SCHEME,
};
