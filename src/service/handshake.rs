//! Двусторонний handshake поверх односторонней доставки pub/sub.
//!
//! Запрос публикуется в канал `<channel>/replyTo/<token>`, а ответчик
//! подтверждает его значением [`ACK_MARKER`] в канале `/replyTo/<token>`.
//! Токен является UUID v4, параллельные handshake не пересекаются.
//!
//! Каждый вызов владеет одним [`ReplyCorrelation`]: временная подписка на
//! канал ответа снимается на любом пути выхода (успех, таймаут, ошибка,
//! отмена future).

use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{
    runtime::Handle,
    time::{sleep, timeout_at, Instant},
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zprobe_error::{ConnectionError, ProbeResult};

use crate::transport::{Subscription, Transport};

/// Время ожидания подтверждения по умолчанию.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(500);
/// Значение, которым ответчик подтверждает запрос.
pub const ACK_MARKER: i64 = 1;
/// Результат handshake, если подтверждение не пришло вовремя.
pub const HANDSHAKE_FAILED: i64 = -1;
/// Разделитель между исходным каналом и токеном.
pub const REPLY_MARKER: &str = "/replyTo/";

/// Разобранный маркер ответа из имени канала.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyMarker<'a> {
    pub original: &'a str,
    pub token: &'a str,
}

impl ReplyMarker<'_> {
    /// Канал, в который ответчик публикует подтверждение.
    pub fn ack_channel(&self) -> String {
        ack_channel(self.token)
    }
}

/// Ищет завершающий маркер `<original>/replyTo/<token>`.
///
/// `None`, если маркера нет, исходный канал пуст или токен содержит
/// что-то кроме `[A-Za-z0-9-]`.
pub fn parse_reply_marker(channel: &str) -> Option<ReplyMarker<'_>> {
    let idx = channel.rfind(REPLY_MARKER)?;
    let original = &channel[..idx];
    let token = &channel[idx + REPLY_MARKER.len()..];

    let valid_token =
        !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if original.is_empty() || !valid_token {
        return None;
    }
    Some(ReplyMarker { original, token })
}

pub fn ack_channel(token: &str) -> String {
    format!("{REPLY_MARKER}{token}")
}

pub fn request_channel(
    channel: &str,
    token: &str,
) -> String {
    format!("{channel}{REPLY_MARKER}{token}")
}

/// Состояние корреляции запроса и подтверждения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationState {
    Pending,
    Resolved,
    TimedOut,
    Cleaned,
}

/// Одна пара запрос/подтверждение с временной подпиской на канал ответа.
///
/// `Pending → {Resolved | TimedOut} → Cleaned`. Если [`close`](Self::close)
/// не был вызван, подписку снимает `Drop`.
pub struct ReplyCorrelation {
    instance_id: u32,
    token: String,
    reply_channel: String,
    state: CorrelationState,
    result: Option<i64>,
    deadline: Instant,
    subscription: Option<Subscription>,
    transport: Arc<dyn Transport>,
}

impl ReplyCorrelation {
    /// Генерирует токен и подписывается на канал ответа.
    ///
    /// Срок ожидания отсчитывается с момента, когда подписка оформлена.
    pub async fn open(
        instance_id: u32,
        transport: Arc<dyn Transport>,
        wait: Duration,
    ) -> ProbeResult<Self> {
        let token = Uuid::new_v4().to_string();
        let reply_channel = ack_channel(&token);
        let subscription = transport.subscribe(&reply_channel).await?;
        info!(instance = instance_id, %token, "ReplyTo subscribe: {reply_channel}");

        Ok(Self {
            instance_id,
            token,
            reply_channel,
            state: CorrelationState::Pending,
            result: None,
            deadline: Instant::now() + wait,
            subscription: Some(subscription),
            transport,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn reply_channel(&self) -> &str {
        &self.reply_channel
    }

    /// Канал запроса для исходного канала `channel`.
    pub fn request_channel(
        &self,
        channel: &str,
    ) -> String {
        request_channel(channel, &self.token)
    }

    pub fn state(&self) -> CorrelationState {
        self.state
    }

    pub fn result(&self) -> Option<i64> {
        self.result
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Ждёт первое целое значение в канале ответа до дедлайна.
    ///
    /// Возвращает значение или [`HANDSHAKE_FAILED`] по таймауту. Нечисловые
    /// payload пропускаются.
    pub async fn wait(&mut self) -> ProbeResult<i64> {
        let Some(subscription) = self.subscription.as_mut() else {
            return Err(ConnectionError::ConnectionClosed.into());
        };

        loop {
            match timeout_at(self.deadline, subscription.recv()).await {
                Err(_) => {
                    self.state = CorrelationState::TimedOut;
                    return Ok(HANDSHAKE_FAILED);
                }
                Ok(None) => return Err(ConnectionError::ConnectionClosed.into()),
                Ok(Some(message)) => {
                    let work_id = Uuid::new_v4();
                    info!(
                        instance = self.instance_id,
                        %work_id,
                        "On {}: {}",
                        message.channel,
                        message.payload_str()
                    );
                    match message.payload_str().trim().parse::<i64>() {
                        Ok(value) => {
                            self.state = CorrelationState::Resolved;
                            self.result = Some(value);
                            return Ok(value);
                        }
                        Err(_) => warn!(
                            instance = self.instance_id,
                            token = %self.token,
                            "Ignoring non-integer acknowledgement"
                        ),
                    }
                }
            }
        }
    }

    /// Снимает временную подписку. Повторный вызов ничего не делает.
    pub async fn close(&mut self) -> ProbeResult<()> {
        if self.state == CorrelationState::Cleaned {
            return Ok(());
        }
        self.state = CorrelationState::Cleaned;
        self.subscription = None;
        self.transport.unsubscribe(&self.reply_channel).await?;
        info!(instance = self.instance_id, "ReplyTo unsubscribe: {}", self.reply_channel);
        Ok(())
    }
}

impl Drop for ReplyCorrelation {
    fn drop(&mut self) {
        if self.state == CorrelationState::Cleaned {
            return;
        }
        self.state = CorrelationState::Cleaned;
        self.subscription = None;

        let transport = self.transport.clone();
        let channel = std::mem::take(&mut self.reply_channel);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = transport.unsubscribe(&channel).await {
                        warn!("Failed to release reply channel {channel}: {err}");
                    }
                });
            }
            Err(_) => warn!("No runtime to release reply channel {channel}"),
        }
    }
}

/// Итог серии handshake-публикаций.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakeSummary {
    pub attempts: u64,
    pub acknowledged: u64,
    pub failures: u64,
    /// Сумма полученных подтверждений (без неудач)
    pub ack_total: i64,
    /// Сумма всех результатов, включая `-1` за каждую неудачу
    pub legacy_total: i64,
}

impl HandshakeSummary {
    pub fn record(
        &mut self,
        value: i64,
    ) {
        self.attempts += 1;
        self.legacy_total += value;
        if value == HANDSHAKE_FAILED {
            self.failures += 1;
        } else {
            self.acknowledged += 1;
            self.ack_total += value;
        }
    }
}

impl fmt::Display for HandshakeSummary {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "attempts={} acknowledged={} failures={} ack_total={} legacy_total={}",
            self.attempts, self.acknowledged, self.failures, self.ack_total, self.legacy_total
        )
    }
}

/// Публикации с ожиданием подтверждения от подписчика.
#[derive(Clone)]
pub struct HandshakeCoordinator {
    instance_id: u32,
    transport: Arc<dyn Transport>,
    ack_timeout: Duration,
}

impl HandshakeCoordinator {
    pub fn new(
        instance_id: u32,
        transport: Arc<dyn Transport>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            instance_id,
            transport,
            ack_timeout,
        }
    }

    /// Один цикл запрос/подтверждение.
    ///
    /// Возвращает полученное значение или [`HANDSHAKE_FAILED`] по таймауту.
    /// Ошибки транспорта возвращаются после снятия временной подписки.
    pub async fn publish_with_ack(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> ProbeResult<i64> {
        let mut correlation =
            ReplyCorrelation::open(self.instance_id, self.transport.clone(), self.ack_timeout)
                .await?;
        let request = correlation.request_channel(channel);

        let outcome = async {
            let receivers = self.transport.publish(&request, payload.clone()).await?;
            info!(
                instance = self.instance_id,
                receivers,
                "Publish {request}: {}",
                String::from_utf8_lossy(&payload)
            );
            correlation.wait().await
        }
        .await;

        if let Err(err) = correlation.close().await {
            warn!(instance = self.instance_id, "Failed to release reply channel: {err}");
        }

        match &outcome {
            Ok(value) if *value == HANDSHAKE_FAILED => {
                warn!(instance = self.instance_id, "Publish {request}: handshake failed")
            }
            Ok(value) => {
                info!(instance = self.instance_id, result = value, "Publish {request}: acknowledged")
            }
            Err(err) => warn!(instance = self.instance_id, "Publish {request}: {err}"),
        }
        outcome
    }

    /// Повторяет [`publish_with_ack`](Self::publish_with_ack) `max(repeat, 1)`
    /// раз с паузой `delay` между попытками.
    pub async fn publish_with_ack_repeated(
        &self,
        channel: &str,
        payload: Bytes,
        delay: Duration,
        repeat: i64,
    ) -> ProbeResult<HandshakeSummary> {
        let iterations = repeat.max(1);
        let mut summary = HandshakeSummary::default();

        for i in 0..iterations {
            if i > 0 {
                sleep(delay).await;
            }
            let value = self.publish_with_ack(channel, payload.clone()).await?;
            summary.record(value);
            debug!(instance = self.instance_id, attempt = i + 1, value, "Handshake attempt finished");
        }

        info!(instance = self.instance_id, %summary, "Handshake publish finished: {channel}");
        Ok(summary)
    }
}
