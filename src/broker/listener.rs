use std::{collections::VecDeque, sync::Arc};

use tokio::sync::oneshot;

use super::{
    arena::Block,
    message::{Cursor, Message},
};

/// Идентификатор ожидающего слушателя, уникальный в пределах брокера.
pub type ListenerId = u64;

/// Что получает припаркованный слушатель.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Message(Arc<Message>),
    /// Канал удалён, пока слушатель ждал.
    Gone,
}

/// Ожидающий слушатель: курсор, с которого он хочет читать, и канал для
/// однократной передачи результата.
#[derive(Debug)]
pub struct ParkedListener {
    id: ListenerId,
    cursor: Option<Cursor>,
    tx: oneshot::Sender<Delivery>,
    _block: Block,
}

/// FIFO-очередь ожидающих слушателей одного канала.
#[derive(Debug, Default)]
pub struct ListenerQueue {
    listeners: VecDeque<ParkedListener>,
}

impl ParkedListener {
    pub fn new(
        id: ListenerId,
        cursor: Option<Cursor>,
        tx: oneshot::Sender<Delivery>,
        block: Block,
    ) -> Self {
        Self {
            id,
            cursor,
            tx,
            _block: block,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Слушатель ждёт сообщение с данным курсором, если его собственный
    /// курсор отсутствует или строго меньше.
    pub fn wants(
        &self,
        cursor: Cursor,
    ) -> bool {
        self.cursor.is_none_or(|own| own < cursor)
    }

    /// Передаёт результат. Возвращает `false`, если получатель уже ушёл.
    pub fn deliver(
        self,
        delivery: Delivery,
    ) -> bool {
        self.tx.send(delivery).is_ok()
    }
}

impl ListenerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn enqueue(
        &mut self,
        listener: ParkedListener,
    ) {
        self.listeners.push_back(listener);
    }

    pub fn dequeue_oldest(&mut self) -> Option<ParkedListener> {
        self.listeners.pop_front()
    }

    /// Удаляет слушателя по идентификатору (таймаут или отмена ожидания).
    pub fn remove(
        &mut self,
        id: ListenerId,
    ) -> Option<ParkedListener> {
        let idx = self.listeners.iter().position(|l| l.id == id)?;
        self.listeners.remove(idx)
    }

    /// Забирает всех слушателей, которым подходит сообщение с `cursor`,
    /// в порядке парковки. Остальные остаются в очереди.
    pub fn take_eligible(
        &mut self,
        cursor: Cursor,
    ) -> Vec<ParkedListener> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.listeners.len());
        for listener in self.listeners.drain(..) {
            if listener.wants(cursor) {
                taken.push(listener);
            } else {
                kept.push_back(listener);
            }
        }
        self.listeners = kept;
        taken
    }

    pub fn drain_all(&mut self) -> Vec<ParkedListener> {
        self.listeners.drain(..).collect()
    }

    /// Удаляет слушателей, чей получатель уже закрыт.
    pub fn prune_closed(&mut self) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|l| !l.tx.is_closed());
        before - self.listeners.len()
    }
}
