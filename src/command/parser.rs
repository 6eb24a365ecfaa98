//! Разбор строки консоли в [`HarnessCommand`].
//!
//! Грамматика (регистр не важен):
//!
//! ```text
//! psub   "<pattern>" [d<ms>] [s<count>] [c]
//! punsub "<pattern>" [s<count>]
//! pub    "<channel>" "<message>" [d<ms>] [w<repeat>] [c]
//! list | dispose <id> | help | q | quit
//! ```
//!
//! Опции допускаются в любом порядке, каждая не более одного раза.

use thiserror::Error;
use zprobe_error::CommandError;

/// Задержка и счётчики, если опция не указана.
pub const DEFAULT_DELAY_MS: u64 = 1;
pub const DEFAULT_COUNT: i64 = 1;

/// Команда консоли харнесса.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarnessCommand {
    /// `psub`: подписка на `count` экземплярах
    Subscribe {
        pattern: String,
        delay_ms: u64,
        count: i64,
        handshake: bool,
    },
    /// `punsub`: отписка основного и fan-out экземпляров
    Unsubscribe { pattern: String, count: i64 },
    /// `pub`: публикация через основной публикатор
    Publish {
        channel: String,
        message: String,
        delay_ms: u64,
        repeat: i64,
        handshake: bool,
    },
    List,
    Dispose { id: u32 },
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown Command : {0}")]
    Unknown(String),

    #[error("unterminated quoted string")]
    UnterminatedQuote,

    #[error("{command}: missing {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },

    #[error("{command}: empty {what}")]
    EmptyArgument {
        command: &'static str,
        what: &'static str,
    },

    #[error("{command}: unsupported option '{option}'")]
    InvalidOption {
        command: &'static str,
        option: String,
    },

    #[error("{command}: option '{option}' given more than once")]
    DuplicateOption {
        command: &'static str,
        option: char,
    },

    #[error("{command}: '{value}' is not a valid number")]
    InvalidNumber {
        command: &'static str,
        value: String,
    },
}

impl From<ParseError> for CommandError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Unknown(input) => CommandError::UnknownCommand { input },
            other => CommandError::InvalidArgument {
                argument: other.argument(),
                reason: other.to_string(),
            },
        }
    }
}

impl ParseError {
    fn argument(&self) -> String {
        match self {
            Self::Unknown(input) => input.clone(),
            Self::UnterminatedQuote => "\"".to_string(),
            Self::MissingArgument { what, .. } | Self::EmptyArgument { what, .. } => {
                what.to_string()
            }
            Self::InvalidOption { option, .. } => option.clone(),
            Self::DuplicateOption { option, .. } => option.to_string(),
            Self::InvalidNumber { value, .. } => value.clone(),
        }
    }
}

/// Лексема строки: слово или строка в кавычках.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    quoted: bool,
}

/// Разбирает строку консоли. Пустая строка даёт `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<HarnessCommand>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let unknown = || ParseError::Unknown(line.to_string());
    let tokens = tokenize(line)?;
    let Some((head, args)) = tokens.split_first() else {
        return Ok(None);
    };
    if head.quoted {
        return Err(unknown());
    }

    let command = match head.text.to_ascii_lowercase().as_str() {
        "psub" => parse_psub(args)?,
        "punsub" => parse_punsub(args)?,
        "pub" => parse_pub(args)?,
        "list" if args.is_empty() => HarnessCommand::List,
        "help" if args.is_empty() => HarnessCommand::Help,
        "q" | "quit" if args.is_empty() => HarnessCommand::Quit,
        "dispose" => parse_dispose(args)?,
        _ => return Err(unknown()),
    };
    Ok(Some(command))
}

fn parse_psub(args: &[Token]) -> Result<HarnessCommand, ParseError> {
    const CMD: &str = "psub";
    let (pattern, rest) = positional(CMD, "pattern", args)?;
    let opts = Options::parse(CMD, rest, &['d', 's', 'c'])?;
    Ok(HarnessCommand::Subscribe {
        pattern,
        delay_ms: opts.delay_ms(CMD)?,
        count: opts.count(CMD, 's')?,
        handshake: opts.flag,
    })
}

fn parse_punsub(args: &[Token]) -> Result<HarnessCommand, ParseError> {
    const CMD: &str = "punsub";
    let (pattern, rest) = positional(CMD, "pattern", args)?;
    let opts = Options::parse(CMD, rest, &['s'])?;
    Ok(HarnessCommand::Unsubscribe {
        pattern,
        count: opts.count(CMD, 's')?,
    })
}

fn parse_pub(args: &[Token]) -> Result<HarnessCommand, ParseError> {
    const CMD: &str = "pub";
    let (channel, rest) = positional(CMD, "channel", args)?;
    let (message, rest) = positional(CMD, "message", rest)?;
    let opts = Options::parse(CMD, rest, &['d', 'w', 'c'])?;
    Ok(HarnessCommand::Publish {
        channel,
        message,
        delay_ms: opts.delay_ms(CMD)?,
        repeat: opts.count(CMD, 'w')?,
        handshake: opts.flag,
    })
}

fn parse_dispose(args: &[Token]) -> Result<HarnessCommand, ParseError> {
    const CMD: &str = "dispose";
    let (raw, rest) = positional(CMD, "instance id", args)?;
    if let Some(extra) = rest.first() {
        return Err(ParseError::InvalidOption {
            command: CMD,
            option: extra.text.clone(),
        });
    }
    let id = raw.parse().map_err(|_| ParseError::InvalidNumber {
        command: CMD,
        value: raw.clone(),
    })?;
    Ok(HarnessCommand::Dispose { id })
}

/// Берёт обязательный позиционный аргумент.
fn positional<'a>(
    command: &'static str,
    what: &'static str,
    args: &'a [Token],
) -> Result<(String, &'a [Token]), ParseError> {
    let (first, rest) = args
        .split_first()
        .ok_or(ParseError::MissingArgument { command, what })?;
    if first.text.is_empty() {
        return Err(ParseError::EmptyArgument { command, what });
    }
    Ok((first.text.clone(), rest))
}

/// Опции команды после позиционных аргументов.
#[derive(Debug, Default)]
struct Options {
    /// Цифры после `d`, `s`, `w`
    values: Vec<(char, String)>,
    /// Флаг `c`
    flag: bool,
}

impl Options {
    fn parse(
        command: &'static str,
        tokens: &[Token],
        allowed: &[char],
    ) -> Result<Self, ParseError> {
        let mut opts = Options::default();
        let mut seen = Vec::with_capacity(tokens.len());

        for token in tokens {
            let invalid = || ParseError::InvalidOption {
                command,
                option: token.text.clone(),
            };
            if token.quoted {
                return Err(invalid());
            }

            let lower = token.text.to_ascii_lowercase();
            let mut chars = lower.chars();
            let Some(key) = chars.next().filter(|k| allowed.contains(k)) else {
                return Err(invalid());
            };
            let value = chars.as_str();

            if seen.contains(&key) {
                return Err(ParseError::DuplicateOption {
                    command,
                    option: key,
                });
            }
            seen.push(key);

            match key {
                'c' if value.is_empty() => opts.flag = true,
                'c' => return Err(invalid()),
                _ if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                    opts.values.push((key, value.to_string()));
                }
                _ => return Err(invalid()),
            }
        }
        Ok(opts)
    }

    fn raw(
        &self,
        key: char,
    ) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    fn delay_ms(
        &self,
        command: &'static str,
    ) -> Result<u64, ParseError> {
        self.raw('d').map_or(Ok(DEFAULT_DELAY_MS), |v| {
            v.parse().map_err(|_| ParseError::InvalidNumber {
                command,
                value: v.to_string(),
            })
        })
    }

    fn count(
        &self,
        command: &'static str,
        key: char,
    ) -> Result<i64, ParseError> {
        self.raw(key).map_or(Ok(DEFAULT_COUNT), |v| {
            v.parse().map_err(|_| ParseError::InvalidNumber {
                command,
                value: v.to_string(),
            })
        })
    }
}

/// Делит строку на слова; `"..."` даёт одну лексему, `\"` и `\\`
/// экранируются внутри кавычек.
fn tokenize(line: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' if matches!(chars.peek(), Some('"') | Some('\\')) => {
                        if let Some(escaped) = chars.next() {
                            text.push(escaped);
                        }
                    }
                    _ => text.push(c),
                }
            }
            if !closed {
                return Err(ParseError::UnterminatedQuote);
            }
            tokens.push(Token { text, quoted: true });
        } else {
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                text.push(c);
                chars.next();
            }
            tokens.push(Token {
                text,
                quoted: false,
            });
        }
    }
    Ok(tokens)
}
