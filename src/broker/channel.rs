use bytes::Bytes;
use serde::Serialize;

use super::{
    arena::Block,
    listener::ListenerQueue,
    message::Cursor,
    queue::MessageQueue,
};

/// Канал: очередь сообщений и очередь ожидающих слушателей под одним
/// идентификатором.
#[derive(Debug)]
pub struct Channel {
    id: Bytes,
    pub(crate) queue: MessageQueue,
    pub(crate) listeners: ListenerQueue,
    created_at: u64,
    last_seen: u64,
    published: u64,
    _block: Block,
}

/// Сводка по каналу, отдаваемая отправителю после публикации и по запросу.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub id: String,
    pub messages: usize,
    pub listeners: usize,
    pub published: u64,
    pub created_at: u64,
    pub last_seen: u64,
    pub last_cursor: Option<Cursor>,
}

impl Channel {
    pub(crate) fn new(
        id: Bytes,
        max_messages: usize,
        now: u64,
        block: Block,
    ) -> Self {
        Self {
            id,
            queue: MessageQueue::new(max_messages),
            listeners: ListenerQueue::new(),
            created_at: now,
            last_seen: now,
            published: 0,
            _block: block,
        }
    }

    pub fn id(&self) -> &Bytes {
        &self.id
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Отмечает обращение к каналу. Время не откатывается назад.
    pub(crate) fn touch(
        &mut self,
        now: u64,
    ) {
        self.last_seen = self.last_seen.max(now);
    }

    pub(crate) fn record_publish(&mut self) {
        self.published += 1;
    }

    /// Канал пуст: нет ни сообщений, ни ожидающих слушателей.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.listeners.is_empty()
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            id: String::from_utf8_lossy(&self.id).into_owned(),
            messages: self.queue.len(),
            listeners: self.listeners.len(),
            published: self.published,
            created_at: self.created_at,
            last_seen: self.last_seen,
            last_cursor: self.queue.last_issued(),
        }
    }
}
