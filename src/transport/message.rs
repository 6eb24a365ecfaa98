use std::{borrow::Cow, sync::Arc};

use bytes::Bytes;

/// Сообщение, доставленное транспортом подписчику.
#[derive(Debug, Clone)]
pub struct Message {
    /// Канал, в который сообщение было опубликовано.
    pub channel: Arc<str>,
    /// Шаблон подписки, по которому сообщение совпало (для pattern-подписок).
    pub pattern: Option<Arc<str>>,
    pub payload: Bytes,
}

impl Message {
    pub fn new(
        channel: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            channel: channel.into(),
            pattern: None,
            payload: payload.into(),
        }
    }

    /// Помечает сообщение шаблоном, через который оно было получено.
    pub fn with_pattern(
        mut self,
        pattern: impl Into<Arc<str>>,
    ) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Payload как текст (невалидный UTF-8 заменяется).
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
