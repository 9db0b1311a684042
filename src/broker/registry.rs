use std::collections::BTreeMap;

use bytes::Bytes;
use pushpoll_error::BrokerError;

use super::{
    arena::{channel_footprint, Arena},
    channel::Channel,
};

/// Реестр каналов, упорядоченный по идентификатору.
///
/// Реестр не синхронизирован сам по себе: брокер держит его под единой
/// блокировкой, поэтому два одновременных `find_or_create` с одним
/// идентификатором всегда видят одну запись.
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: BTreeMap<Bytes, Channel>,
    max_messages: usize,
}

impl ChannelRegistry {
    pub fn new(max_messages: usize) -> Self {
        Self {
            channels: BTreeMap::new(),
            max_messages,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn find(
        &self,
        id: &[u8],
    ) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn find_mut(
        &mut self,
        id: &[u8],
    ) -> Option<&mut Channel> {
        self.channels.get_mut(id)
    }

    /// Возвращает канал, создавая его при первом обращении.
    ///
    /// Узел нового канала выделяется в арене до вставки; при нехватке
    /// места реестр не меняется.
    pub fn find_or_create(
        &mut self,
        id: &[u8],
        arena: &Arena,
        now: u64,
    ) -> Result<&mut Channel, BrokerError> {
        if id.is_empty() {
            return Err(BrokerError::InvalidChannel {
                reason: "channel id must not be empty".to_string(),
            });
        }

        // ключ копируется только для нового канала
        if !self.channels.contains_key(id) {
            let block = arena.alloc(channel_footprint(id.len()))?;
            let key = Bytes::copy_from_slice(id);
            tracing::debug!(
                channel = %String::from_utf8_lossy(id),
                "Channel created"
            );
            let channel = Channel::new(key.clone(), self.max_messages, now, block);
            self.channels.insert(key, channel);
        }

        self.channels
            .get_mut(id)
            .ok_or_else(|| BrokerError::InvariantViolation {
                reason: "channel missing right after insert".to_string(),
            })
    }

    pub fn remove(
        &mut self,
        id: &[u8],
    ) -> Option<Channel> {
        self.channels.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.values_mut()
    }

    /// Оставляет только каналы, для которых `keep` вернул `true`.
    pub fn retain<F>(
        &mut self,
        mut keep: F,
    ) where
        F: FnMut(&mut Channel) -> bool,
    {
        self.channels.retain(|_, channel| keep(channel));
    }
}
