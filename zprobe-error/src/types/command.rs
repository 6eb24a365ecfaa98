use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки консольных команд харнесса.
#[derive(Debug, Clone)]
pub enum CommandError {
    /// Ввод не соответствует ни одной команде
    UnknownCommand { input: String },
    /// Аргумент команды не удалось разобрать
    InvalidArgument { argument: String, reason: String },
    /// Экземпляр сервиса с таким ID не зарегистрирован
    UnknownInstance { id: u32 },
}

impl std::fmt::Display for CommandError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::UnknownCommand { input } => write!(f, "Unknown Command : {input}"),
            Self::InvalidArgument { argument, reason } => {
                write!(f, "Invalid argument '{argument}': {reason}")
            }
            Self::UnknownInstance { id } => write!(f, "Unknown service instance: {id}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl ErrorExt for CommandError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownCommand { .. } => StatusCode::InvalidCommand,
            Self::InvalidArgument { .. } => StatusCode::InvalidArgs,
            Self::UnknownInstance { .. } => StatusCode::NotFound,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
