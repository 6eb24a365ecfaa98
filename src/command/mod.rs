//! Консольные команды харнесса.
//!
//! - `parser`: разбор строки ввода в [`HarnessCommand`];
//! - `processor`: выполнение команд над реестром экземпляров.

pub mod parser;
pub mod processor;

pub use parser::{parse_line, HarnessCommand, ParseError};
pub use processor::{CommandProcessor, CommandReply, InstanceInfo, LineOutcome, HELP_TEXT};
