use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tracing::{info, warn};
use zprobe_error::{ensure, CommandError, GenericError, ProbeResult, StatusCode};

use super::instance::ServiceInstance;
use crate::transport::Connector;

/// Реестр экземпляров сервиса.
///
/// Принадлежит обработчику команд и изменяется только им. Экземпляры
/// получают последовательные id начиная с 0: первым создаётся основной
/// публикатор, вторым основной подписчик.
pub struct ServiceRegistry {
    connector: Arc<dyn Connector>,
    ack_timeout: Duration,
    instances: BTreeMap<u32, ServiceInstance>,
    next_id: u32,
    publisher_id: Option<u32>,
    subscriber_id: Option<u32>,
    /// Экземпляры, созданные для fan-out, в порядке создания
    fanout: Vec<u32>,
}

impl ServiceRegistry {
    pub fn new(
        connector: Arc<dyn Connector>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            ack_timeout,
            instances: BTreeMap::new(),
            next_id: 0,
            publisher_id: None,
            subscriber_id: None,
            fanout: Vec::new(),
        }
    }

    /// Создаёт основной публикатор и основной подписчик.
    pub async fn bootstrap(&mut self) -> ProbeResult<()> {
        let publisher = self.new_instance().await?;
        self.publisher_id = Some(publisher);
        let subscriber = self.new_instance().await?;
        self.subscriber_id = Some(subscriber);
        info!(publisher, subscriber, "Service registry ready");
        Ok(())
    }

    /// Выделяет следующий id и подключает экземпляр, не регистрируя его.
    ///
    /// Id расходуется даже при ошибке подключения.
    pub async fn create_instance(&mut self) -> ProbeResult<ServiceInstance> {
        let id = self.next_id;
        self.next_id += 1;

        let mut instance = ServiceInstance::new(id, self.connector.clone(), self.ack_timeout);
        instance.setup().await?;
        Ok(instance)
    }

    /// Создаёт, подключает и регистрирует экземпляр; возвращает его id.
    pub async fn new_instance(&mut self) -> ProbeResult<u32> {
        let instance = self.create_instance().await?;
        let id = instance.id();
        self.register(instance);
        Ok(id)
    }

    pub fn register(
        &mut self,
        instance: ServiceInstance,
    ) {
        self.instances.insert(instance.id(), instance);
    }

    pub fn get(
        &self,
        id: u32,
    ) -> ProbeResult<&ServiceInstance> {
        self.instances
            .get(&id)
            .ok_or_else(|| CommandError::UnknownInstance { id }.into())
    }

    pub fn get_mut(
        &mut self,
        id: u32,
    ) -> ProbeResult<&mut ServiceInstance> {
        self.instances
            .get_mut(&id)
            .ok_or_else(|| CommandError::UnknownInstance { id }.into())
    }

    /// Основной публикатор.
    pub fn publisher(&self) -> ProbeResult<&ServiceInstance> {
        let id = self.publisher_id.ok_or_else(not_bootstrapped)?;
        self.get(id)
    }

    /// Id основного подписчика, если он ещё зарегистрирован.
    pub fn subscriber_id(&self) -> ProbeResult<u32> {
        let id = self.subscriber_id.ok_or_else(not_bootstrapped)?;
        ensure!(
            self.instances.contains_key(&id),
            StatusCode::NotFound,
            "primary subscriber {} is disposed",
            id
        );
        Ok(id)
    }

    /// `max(count, 1)` экземпляров: основной подписчик и `count - 1` новых.
    pub async fn get_or_create_for_fanout(
        &mut self,
        count: i64,
    ) -> ProbeResult<Vec<u32>> {
        let mut ids = vec![self.subscriber_id()?];
        for _ in 1..count.max(1) {
            let id = self.new_instance().await?;
            self.fanout.push(id);
            ids.push(id);
        }
        Ok(ids)
    }

    /// Основной подписчик и до `count - 1` уже созданных fan-out экземпляров.
    /// Новых экземпляров не создаёт.
    pub fn existing_for_fanout(
        &self,
        count: i64,
    ) -> ProbeResult<Vec<u32>> {
        let extra = usize::try_from(count.max(1) - 1).unwrap_or(0);
        let mut ids = vec![self.subscriber_id()?];
        ids.extend(
            self.fanout
                .iter()
                .copied()
                .filter(|id| self.instances.contains_key(id))
                .take(extra),
        );
        Ok(ids)
    }

    /// Убирает экземпляр из реестра и освобождает его соединение.
    pub async fn dispose_instance(
        &mut self,
        id: u32,
    ) -> ProbeResult<()> {
        let mut instance = self
            .instances
            .remove(&id)
            .ok_or(CommandError::UnknownInstance { id })?;
        self.fanout.retain(|f| *f != id);
        instance.dispose().await?;
        info!(instance = id, "Service instance disposed");
        Ok(())
    }

    /// Освобождает все экземпляры; ошибки логируются.
    pub async fn dispose_all(&mut self) {
        let instances = std::mem::take(&mut self.instances);
        self.fanout.clear();
        for (id, mut instance) in instances {
            if let Err(err) = instance.dispose().await {
                warn!(instance = id, "Failed to dispose instance: {err}");
            }
        }
    }

    pub fn instances(&self) -> impl Iterator<Item = &ServiceInstance> + '_ {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

fn not_bootstrapped() -> GenericError {
    GenericError::new(StatusCode::Internal, "service registry is not bootstrapped")
}
