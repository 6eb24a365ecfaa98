use std::{fmt, time::Duration};

use tracing::{debug, error, info, warn};
use zprobe_error::{CommandError, LogLevel, ProbeResult, ResultExt, StackError};

use super::parser::{parse_line, HarnessCommand};
use crate::service::{
    ConnectionState, PatternSubscription, PublishOutcome, PublishRequest, ServiceRegistry,
    StatsSnapshot,
};

/// Подсказка, которую консоль печатает при старте и по команде `help`.
pub const HELP_TEXT: &str = r#"Your input (q to quit)

ex) psub "pattern/*" d1000 s2 c
Subscribe a pattern/* with 2 subscribers and delay 1000ms, with handshake acknowledgement.
Subscriber 1 is always the same service; from 2 on, services are created in order.

ex) pub "pattern/aaa" "message" d1 w10 c
Publish to pattern/aaa 10 times with delay 1ms, waiting for an acknowledgement each time.

ex) punsub "pattern/*" s2
Unsubscribe pattern/* on 2 subscribers.

list           show service instances
dispose <id>   dispose one service instance
help           show this text"#;

/// Сведения об экземпляре для команды `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: u32,
    pub state: ConnectionState,
    pub patterns: Vec<String>,
    pub subscriptions: usize,
    pub stats: StatsSnapshot,
}

impl fmt::Display for InstanceInfo {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "#{} {} subscriptions={} received={} processed={} acks={}",
            self.id,
            self.state,
            self.subscriptions,
            self.stats.received,
            self.stats.processed,
            self.stats.acks_sent,
        )?;
        if !self.patterns.is_empty() {
            write!(f, " patterns=[{}]", self.patterns.join(", "))?;
        }
        Ok(())
    }
}

/// Результат успешно выполненной команды.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Subscribed {
        pattern: String,
        instances: Vec<u32>,
    },
    Unsubscribed {
        pattern: String,
        instances: Vec<u32>,
        removed: usize,
    },
    Published {
        channel: String,
        outcome: PublishOutcome,
    },
    Instances(Vec<InstanceInfo>),
    Disposed {
        id: u32,
    },
    Help,
    Quit,
}

impl fmt::Display for CommandReply {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Subscribed { pattern, instances } => {
                write!(f, "PSubscribe {pattern} on {}", join_ids(instances))
            }
            Self::Unsubscribed {
                pattern,
                instances,
                removed,
            } => write!(
                f,
                "PUnsubscribe {pattern} on {} (removed {removed})",
                join_ids(instances)
            ),
            Self::Published { channel, outcome } => write!(f, "Publish {channel}: {outcome}"),
            Self::Instances(list) if list.is_empty() => f.write_str("(no instances)"),
            Self::Instances(list) => {
                for (i, info) in list.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{info}")?;
                }
                Ok(())
            }
            Self::Disposed { id } => write!(f, "Disposed service instance #{id}"),
            Self::Help => f.write_str(HELP_TEXT),
            Self::Quit => f.write_str("bye bye"),
        }
    }
}

fn join_ids(ids: &[u32]) -> String {
    let ids: Vec<String> = ids.iter().map(|id| format!("#{id}")).collect();
    ids.join(", ")
}

/// Итог обработки одной строки консоли.
#[derive(Debug)]
pub enum LineOutcome {
    /// Пустая строка
    Empty,
    Reply(CommandReply),
    /// Команда завершилась ошибкой; ошибка уже залогирована
    Failed(StackError),
}

impl LineOutcome {
    pub fn is_quit(&self) -> bool {
        matches!(self, Self::Reply(CommandReply::Quit))
    }
}

/// Выполняет команды консоли над реестром экземпляров.
///
/// Команды выполняются строго последовательно; реестр принадлежит
/// обработчику целиком.
pub struct CommandProcessor {
    registry: ServiceRegistry,
    executed: u64,
    failed: u64,
}

impl CommandProcessor {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry,
            executed: 0,
            failed: 0,
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Число выполненных и упавших команд.
    pub fn counters(&self) -> (u64, u64) {
        (self.executed, self.failed)
    }

    /// Разбирает и выполняет строку. Ошибки не пробрасываются, а логируются,
    /// чтобы цикл консоли продолжал работу.
    pub async fn run_line(
        &mut self,
        line: &str,
    ) -> LineOutcome {
        let command = match parse_line(line) {
            Ok(Some(command)) => command,
            Ok(None) => return LineOutcome::Empty,
            Err(err) => {
                let err: StackError = CommandError::from(err).into();
                return self.fail(line, err);
            }
        };

        debug!(?command, "Executing command");
        match self.execute(command).await {
            Ok(reply) => {
                self.executed += 1;
                LineOutcome::Reply(reply)
            }
            Err(err) => self.fail(line, err),
        }
    }

    fn fail(
        &mut self,
        line: &str,
        err: StackError,
    ) -> LineOutcome {
        self.failed += 1;
        match err.log_level() {
            LogLevel::Error => error!(input = line, code = %err.status_code(), "{err}"),
            LogLevel::Warn => warn!(input = line, code = %err.status_code(), "{err}"),
            _ => info!(input = line, code = %err.status_code(), "{err}"),
        }
        LineOutcome::Failed(err)
    }

    pub async fn execute(
        &mut self,
        command: HarnessCommand,
    ) -> ProbeResult<CommandReply> {
        match command {
            HarnessCommand::Subscribe {
                pattern,
                delay_ms,
                count,
                handshake,
            } => self.subscribe(pattern, delay_ms, count, handshake).await,
            HarnessCommand::Unsubscribe { pattern, count } => {
                self.unsubscribe(pattern, count).await
            }
            HarnessCommand::Publish {
                channel,
                message,
                delay_ms,
                repeat,
                handshake,
            } => {
                let request = PublishRequest::new(channel, message)
                    .with_delay(Duration::from_millis(delay_ms))
                    .with_repeat(repeat)
                    .with_handshake(handshake);
                self.publish(request).await
            }
            HarnessCommand::List => Ok(CommandReply::Instances(self.list())),
            HarnessCommand::Dispose { id } => {
                self.registry
                    .dispose_instance(id)
                    .await
                    .with_context(|| format!("dispose #{id}"))?;
                Ok(CommandReply::Disposed { id })
            }
            HarnessCommand::Help => Ok(CommandReply::Help),
            HarnessCommand::Quit => Ok(CommandReply::Quit),
        }
    }

    async fn subscribe(
        &mut self,
        pattern: String,
        delay_ms: u64,
        count: i64,
        handshake: bool,
    ) -> ProbeResult<CommandReply> {
        let ids = self
            .registry
            .get_or_create_for_fanout(count)
            .await
            .with_context(|| format!("psub {pattern}"))?;

        let subscription = PatternSubscription::new(pattern.clone())
            .with_delay(Duration::from_millis(delay_ms))
            .with_handshake(handshake);
        for &id in &ids {
            self.registry
                .get_mut(id)?
                .subscribe(subscription.clone())
                .await
                .with_context(|| format!("psub {pattern} on #{id}"))?;
        }

        Ok(CommandReply::Subscribed {
            pattern,
            instances: ids,
        })
    }

    async fn unsubscribe(
        &mut self,
        pattern: String,
        count: i64,
    ) -> ProbeResult<CommandReply> {
        let ids = self.registry.existing_for_fanout(count)?;
        let mut removed = 0;
        for &id in &ids {
            let instance = self.registry.get_mut(id)?;
            if instance
                .unsubscribe(&pattern)
                .await
                .with_context(|| format!("punsub {pattern} on #{id}"))?
            {
                removed += 1;
            }
        }

        Ok(CommandReply::Unsubscribed {
            pattern,
            instances: ids,
            removed,
        })
    }

    async fn publish(
        &self,
        request: PublishRequest,
    ) -> ProbeResult<CommandReply> {
        let outcome = self
            .registry
            .publisher()?
            .publish(&request)
            .await
            .with_context(|| format!("pub {}", request.channel))?;

        Ok(CommandReply::Published {
            channel: request.channel,
            outcome,
        })
    }

    fn list(&self) -> Vec<InstanceInfo> {
        self.registry
            .instances()
            .map(|instance| InstanceInfo {
                id: instance.id(),
                state: instance.state(),
                patterns: instance.patterns(),
                subscriptions: instance.subscription_count(),
                stats: instance.stats(),
            })
            .collect()
    }

    /// Освобождает все экземпляры перед выходом.
    pub async fn shutdown(&mut self) {
        info!(
            executed = self.executed,
            failed = self.failed,
            "Shutting down service instances"
        );
        self.registry.dispose_all().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::{sleep, timeout};
    use zprobe_error::StatusCode;

    use super::*;
    use crate::{
        service::ACK_TIMEOUT,
        transport::{Broker, LocalConnector},
    };

    async fn processor() -> (Arc<Broker>, CommandProcessor) {
        let broker = Arc::new(Broker::new());
        let connector = Arc::new(LocalConnector::new(broker.clone()));
        let mut registry = ServiceRegistry::new(connector, ACK_TIMEOUT);
        registry.bootstrap().await.unwrap();
        (broker, CommandProcessor::new(registry))
    }

    fn reply(outcome: LineOutcome) -> CommandReply {
        match outcome {
            LineOutcome::Reply(reply) => reply,
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_psub_fanout_then_pub() {
        let (_broker, mut processor) = processor().await;

        let r = reply(processor.run_line(r#"psub "topic/*" s3"#).await);
        assert_eq!(
            r,
            CommandReply::Subscribed {
                pattern: "topic/*".into(),
                instances: vec![1, 2, 3],
            }
        );

        let r = reply(processor.run_line(r#"pub "topic/x" "hi""#).await);
        assert_eq!(
            r,
            CommandReply::Published {
                channel: "topic/x".into(),
                outcome: PublishOutcome::Plain { receivers: 3 },
            }
        );
    }

    #[tokio::test]
    async fn test_handshake_pub_through_console() {
        let (_broker, mut processor) = processor().await;
        reply(processor.run_line(r#"psub "ch/*" c"#).await);

        let r = reply(processor.run_line(r#"pub "ch" "hello" w2 c"#).await);
        let CommandReply::Published {
            outcome: PublishOutcome::Handshake(summary),
            ..
        } = r
        else {
            panic!("expected handshake outcome, got {r:?}");
        };
        assert_eq!(summary.acknowledged, 2);
        assert_eq!(summary.failures, 0);
    }

    #[tokio::test]
    async fn test_punsub_only_touches_existing_instances() {
        let (broker, mut processor) = processor().await;
        reply(processor.run_line(r#"psub "topic/*" s2"#).await);
        assert_eq!(processor.registry().len(), 3);

        let r = reply(processor.run_line(r#"punsub "topic/*" s5"#).await);
        assert_eq!(
            r,
            CommandReply::Unsubscribed {
                pattern: "topic/*".into(),
                instances: vec![1, 2],
                removed: 2,
            }
        );
        assert_eq!(processor.registry().len(), 3);
        assert_eq!(broker.route_count(), 0);
    }

    /// Ошибка команды не останавливает обработку следующих строк.
    #[tokio::test]
    async fn test_failures_do_not_stop_processing() {
        let (_broker, mut processor) = processor().await;

        let LineOutcome::Failed(err) = processor.run_line("bogus").await else {
            panic!("expected failure");
        };
        assert_eq!(err.status_code(), StatusCode::InvalidCommand);

        let LineOutcome::Failed(err) = processor.run_line("dispose 42").await else {
            panic!("expected failure");
        };
        assert_eq!(err.status_code(), StatusCode::NotFound);

        assert!(matches!(processor.run_line("").await, LineOutcome::Empty));
        assert_eq!(reply(processor.run_line("help").await), CommandReply::Help);
        assert!(processor.run_line("q").await.is_quit());
        assert_eq!(processor.counters(), (2, 2));
    }

    #[tokio::test]
    async fn test_list_and_dispose() {
        let (_broker, mut processor) = processor().await;
        reply(processor.run_line(r#"psub "a/*""#).await);
        reply(processor.run_line(r#"pub "a/1" "m""#).await);

        timeout(Duration::from_secs(2), async {
            loop {
                let CommandReply::Instances(list) = reply(processor.run_line("list").await) else {
                    panic!("expected instances");
                };
                if list[1].stats.processed == 1 {
                    assert_eq!(list[1].patterns, vec!["a/*".to_string()]);
                    assert_eq!(list[0].state, ConnectionState::Connected);
                    break;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let r = reply(processor.run_line("dispose 1").await);
        assert_eq!(r, CommandReply::Disposed { id: 1 });

        let LineOutcome::Failed(_) = processor.run_line(r#"psub "a/*""#).await else {
            panic!("primary subscriber is gone");
        };
    }

    #[tokio::test]
    async fn test_shutdown_disposes_everything() {
        let (broker, mut processor) = processor().await;
        reply(processor.run_line(r#"psub "x" s2"#).await);
        processor.shutdown().await;
        assert!(processor.registry().is_empty());
        assert_eq!(broker.client_count(), 0);
    }

    #[test]
    fn test_reply_display() {
        let r = CommandReply::Subscribed {
            pattern: "p/*".into(),
            instances: vec![1, 2],
        };
        assert_eq!(r.to_string(), "PSubscribe p/* on #1, #2");
        assert_eq!(
            CommandReply::Published {
                channel: "c".into(),
                outcome: PublishOutcome::Plain { receivers: 4 },
            }
            .to_string(),
            "Publish c: receivers=4"
        );
        assert!(CommandReply::Help.to_string().contains("psub"));
    }
}
