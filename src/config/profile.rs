use std::fmt;

/// Профиль строки подключения, выбираемый первым аргументом командной строки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    Master1,
    Master2,
    Master3,
    Slave1,
    Slave2,
    Slave3,
    Dev,
    #[default]
    Default,
}

impl Profile {
    /// `m1`..`m3`, `s1`..`s3`, `dev`; всё остальное, включая отсутствие
    /// аргумента, даёт [`Profile::Default`].
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg.map(str::to_ascii_lowercase).as_deref() {
            Some("m1") => Self::Master1,
            Some("m2") => Self::Master2,
            Some("m3") => Self::Master3,
            Some("s1") => Self::Slave1,
            Some("s2") => Self::Slave2,
            Some("s3") => Self::Slave3,
            Some("dev") => Self::Dev,
            _ => Self::Default,
        }
    }

    /// Ключ в секции `connection_strings`.
    pub fn key(self) -> &'static str {
        match self {
            Self::Master1 => "master1",
            Self::Master2 => "master2",
            Self::Master3 => "master3",
            Self::Slave1 => "slave1",
            Self::Slave2 => "slave2",
            Self::Slave3 => "slave3",
            Self::Dev => "dev",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.key())
    }
}
