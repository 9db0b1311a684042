use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::interval};

use super::{channel::ChannelInfo, engine::Broker};
use crate::shutdown::ShutdownSignal;

/// Решает, какие каналы удалять из реестра при чистке.
pub trait ReapPolicy: Send + Sync {
    fn should_reap(
        &self,
        info: &ChannelInfo,
        now: u64,
    ) -> bool;
}

/// Каналы никогда не удаляются.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverReap;

/// Удаляет пустые каналы (нет сообщений и слушателей), простаивающие
/// дольше `max_idle` секунд.
#[derive(Debug, Clone, Copy)]
pub struct IdleReaper {
    pub max_idle: u64,
}

impl ReapPolicy for NeverReap {
    fn should_reap(
        &self,
        _info: &ChannelInfo,
        _now: u64,
    ) -> bool {
        false
    }
}

impl ReapPolicy for IdleReaper {
    fn should_reap(
        &self,
        info: &ChannelInfo,
        now: u64,
    ) -> bool {
        info.messages == 0
            && info.listeners == 0
            && now.saturating_sub(info.last_seen) > self.max_idle
    }
}

////////////////////////////////////////////////////////////////////////////////
// Внешние функции
////////////////////////////////////////////////////////////////////////////////

/// Запускает фоновую чистку брокера с периодом `every`.
///
/// Задача завершается после сигнала `shutdown`.
pub fn spawn_sweeper(
    broker: Arc<Broker>,
    policy: Arc<dyn ReapPolicy>,
    every: Duration,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        // первый тик срабатывает сразу
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = broker.sweep(policy.as_ref());
                    if report.reaped > 0 {
                        tracing::info!(reaped = report.reaped, "Idle channels reaped");
                    }
                }
                _ = shutdown.wait() => {
                    tracing::debug!("Sweeper stopped");
                    break;
                }
            }
        }
    })
}
