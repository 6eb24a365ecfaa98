use std::{collections::HashMap, sync::Arc};

use globset::GlobMatcher;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::{Message, Subscription};

/// Маршрут одного имени канала/шаблона внутри соединения.
struct Route {
    /// Скомпилированный glob (только для локального брокера и шаблонов).
    matcher: Option<GlobMatcher>,
    handlers: Vec<mpsc::UnboundedSender<Message>>,
}

/// Таблица обработчиков доставок одного соединения.
///
/// Ключ: имя канала или шаблона, как его передали в `subscribe`.
/// Повторная подписка на то же имя добавляет ещё один обработчик;
/// `remove` удаляет их все, закрывая потоки доставок.
#[derive(Default)]
pub(crate) struct HandlerTable {
    routes: RwLock<HashMap<Arc<str>, Route>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует обработчик. Второй элемент равен `true`, если это первый
    /// обработчик для данного имени (т.е. брокеру нужна реальная подписка).
    pub fn add(
        &self,
        channel: &str,
        matcher: Option<GlobMatcher>,
    ) -> (Subscription, bool) {
        let key: Arc<str> = Arc::from(channel);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut routes = self.routes.write();
        let first = !routes.contains_key(channel);
        routes
            .entry(key.clone())
            .or_insert_with(|| Route {
                matcher,
                handlers: Vec::new(),
            })
            .handlers
            .push(tx);

        (Subscription::new(key, rx), first)
    }

    /// Удаляет все обработчики имени. `false`, если их не было.
    pub fn remove(
        &self,
        channel: &str,
    ) -> bool {
        self.routes.write().remove(channel).is_some()
    }

    /// Доставляет сообщение обработчикам ключа `key`.
    ///
    /// Закрытые приёмники вычищаются. Возвращает `true`, если сообщение
    /// получил хотя бы один обработчик.
    pub fn dispatch(
        &self,
        key: &str,
        message: &Message,
    ) -> bool {
        let mut routes = self.routes.write();
        match routes.get_mut(key) {
            Some(route) => Self::deliver(route, message),
            None => false,
        }
    }

    /// Локальная маршрутизация: проверяет каждый маршрут (точное имя или
    /// glob) и возвращает число маршрутов, получивших сообщение.
    pub fn route(
        &self,
        channel: &str,
        message: &Message,
    ) -> usize {
        let mut routes = self.routes.write();
        let mut delivered = 0;
        for (key, route) in routes.iter_mut() {
            let matched = match &route.matcher {
                Some(matcher) => matcher.is_match(channel),
                None => &**key == channel,
            };
            if !matched {
                continue;
            }
            let message = match route.matcher {
                Some(_) => message.clone().with_pattern(key.clone()),
                None => message.clone(),
            };
            if Self::deliver(route, &message) {
                delivered += 1;
            }
        }
        delivered
    }

    fn deliver(
        route: &mut Route,
        message: &Message,
    ) -> bool {
        route.handlers.retain(|tx| !tx.is_closed());
        let mut delivered = false;
        for tx in &route.handlers {
            delivered |= tx.send(message.clone()).is_ok();
        }
        delivered
    }

    /// Имена всех активных подписок.
    pub fn keys(&self) -> Vec<Arc<str>> {
        self.routes.read().keys().cloned().collect()
    }

    pub fn contains(
        &self,
        channel: &str,
    ) -> bool {
        self.routes.read().contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn clear(&self) {
        self.routes.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use globset::Glob;

    use super::*;

    /// Тест проверяет, что повторная подписка не считается "первой".
    #[test]
    fn test_add_reports_first_handler() {
        let table = HandlerTable::new();
        let (_a, first_a) = table.add("chan", None);
        let (_b, first_b) = table.add("chan", None);
        assert!(first_a);
        assert!(!first_b);
        assert_eq!(table.len(), 1);
    }

    /// Тест проверяет, что remove закрывает все потоки доставок.
    #[tokio::test]
    async fn test_remove_closes_streams() {
        let table = HandlerTable::new();
        let (mut sub, _) = table.add("chan", None);
        assert!(table.remove("chan"));
        assert!(!table.remove("chan"));
        assert!(sub.recv().await.is_none());
    }

    /// Тест проверяет маршрутизацию по glob и по точному имени.
    #[tokio::test]
    async fn test_route_counts_matching_routes() {
        let table = HandlerTable::new();
        let matcher = Glob::new("topic/*").unwrap().compile_matcher();
        let (mut psub, _) = table.add("topic/*", Some(matcher));
        let (mut sub, _) = table.add("topic/x", None);
        let (_other, _) = table.add("other", None);

        let msg = Message::new("topic/x", Bytes::from_static(b"m"));
        assert_eq!(table.route("topic/x", &msg), 2);

        let via_pattern = psub.recv().await.unwrap();
        assert_eq!(via_pattern.pattern.as_deref(), Some("topic/*"));
        let exact = sub.recv().await.unwrap();
        assert!(exact.pattern.is_none());
    }

    /// Тест проверяет, что закрытые приёмники не учитываются в доставке.
    #[test]
    fn test_dispatch_skips_dropped_receivers() {
        let table = HandlerTable::new();
        let (sub, _) = table.add("chan", None);
        drop(sub);
        let msg = Message::new("chan", Bytes::from_static(b"m"));
        assert!(!table.dispatch("chan", &msg));
    }
}
