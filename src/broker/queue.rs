use std::{collections::VecDeque, sync::Arc};

use pushpoll_error::BrokerError;

use super::message::{Cursor, Message, StoredMessage};

/// Результат поиска сообщения по курсору.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Найдено самое старое сообщение новее курсора.
    Found(Arc<Message>),
    /// Новых сообщений нет, слушатель должен ждать.
    Pending,
    /// Точка курсора уже вытеснена из истории канала.
    Gone,
}

/// Сколько сообщений удалено при очередной вставке или чистке.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub expired: usize,
    pub evicted: usize,
}

/// Очередь сообщений канала, упорядоченная по курсору по возрастанию.
///
/// Размер ограничен `max_size`: при переполнении вытесняются самые старые
/// сообщения. Истёкшие сообщения удаляются при каждой вставке и поиске.
#[derive(Debug)]
pub struct MessageQueue {
    messages: VecDeque<StoredMessage>,
    max_size: usize,
    /// Последний выданный курсор; теги не переиспользуются даже после
    /// вытеснения.
    last_issued: Option<Cursor>,
    /// Самый новый курсор среди вытесненных или истёкших сообщений.
    horizon: Option<Cursor>,
}

impl EvictionReport {
    pub fn total(&self) -> usize {
        self.expired + self.evicted
    }
}

impl MessageQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_size: max_size.max(1),
            last_issued: None,
            horizon: None,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn last_issued(&self) -> Option<Cursor> {
        self.last_issued
    }

    pub fn horizon(&self) -> Option<Cursor> {
        self.horizon
    }

    /// Курсор для сообщения, публикуемого в момент `now`.
    ///
    /// Тег равен 0 для новой секунды и растёт внутри одной секунды. Когда
    /// теги секунды кончились, публикация отклоняется до следующей секунды.
    pub fn next_cursor(
        &self,
        now: u64,
    ) -> Result<Cursor, BrokerError> {
        match self.last_issued {
            None => Ok(Cursor::new(now, 0)),
            Some(last) => last
                .successor(now)
                .ok_or(BrokerError::CursorsExhausted { time: last.time }),
        }
    }

    /// Добавляет сообщение в хвост очереди.
    ///
    /// Сначала удаляет истёкшие сообщения, затем вытесняет самые старые,
    /// пока после вставки размер не будет превышать `max_size`. Курсор
    /// нового сообщения обязан быть строго больше всех выданных ранее.
    pub(crate) fn enqueue(
        &mut self,
        stored: StoredMessage,
        now: u64,
    ) -> Result<EvictionReport, BrokerError> {
        let cursor = stored.cursor();
        if self.last_issued.is_some_and(|last| last >= cursor) {
            return Err(BrokerError::InvariantViolation {
                reason: format!(
                    "cursor {cursor} is not newer than last issued {}",
                    self.last_issued.unwrap_or(cursor)
                ),
            });
        }

        let mut report = EvictionReport {
            expired: self.purge_expired(now),
            evicted: 0,
        };
        while self.messages.len() >= self.max_size {
            if self.evict_oldest().is_none() {
                break;
            }
            report.evicted += 1;
        }

        self.messages.push_back(stored);
        self.last_issued = Some(cursor);
        Ok(report)
    }

    /// Удаляет все истёкшие сообщения, от старых к новым.
    pub fn purge_expired(
        &mut self,
        now: u64,
    ) -> usize {
        let before = self.messages.len();
        let mut horizon = self.horizon;
        self.messages.retain(|stored| {
            if stored.message.is_expired(now) {
                horizon = horizon.max(Some(stored.cursor()));
                false
            } else {
                true
            }
        });
        self.horizon = horizon;
        before - self.messages.len()
    }

    /// Снимает самое старое сообщение.
    pub fn dequeue_oldest(&mut self) -> Option<Arc<Message>> {
        self.messages.pop_front().map(|stored| stored.message.clone())
    }

    /// Самое новое сообщение без удаления.
    pub fn peek_newest(&self) -> Option<&Arc<Message>> {
        self.messages.back().map(|stored| &stored.message)
    }

    /// Самое старое сообщение без удаления.
    pub fn peek_oldest(&self) -> Option<&Arc<Message>> {
        self.messages.front().map(|stored| &stored.message)
    }

    /// Ищет самое старое сообщение с курсором строго больше `cursor`.
    ///
    /// Без курсора возвращается самое старое сообщение очереди.
    /// `Gone` возвращается, когда курсор старше всех сохранённых сообщений
    /// и указывает на уже вытесненную часть истории.
    pub fn find_after(
        &mut self,
        cursor: Option<Cursor>,
        now: u64,
    ) -> Lookup {
        self.purge_expired(now);

        let Some(cursor) = cursor else {
            return self
                .peek_oldest()
                .map_or(Lookup::Pending, |msg| Lookup::Found(msg.clone()));
        };
        let lost = self.horizon.is_some_and(|h| cursor <= h);

        let (Some(oldest), Some(newest)) = (self.messages.front(), self.messages.back()) else {
            let behind = self.last_issued.is_some_and(|last| cursor < last);
            return if behind && lost {
                Lookup::Gone
            } else {
                Lookup::Pending
            };
        };

        if newest.cursor() <= cursor {
            return Lookup::Pending;
        }
        if cursor < oldest.cursor() {
            return if lost {
                Lookup::Gone
            } else {
                Lookup::Found(oldest.message.clone())
            };
        }

        let idx = self.messages.partition_point(|m| m.cursor() <= cursor);
        match self.messages.get(idx) {
            Some(stored) => Lookup::Found(stored.message.clone()),
            None => Lookup::Pending,
        }
    }

    /// Удаляет сообщение с данным курсором (одноразовое потребление).
    pub fn remove(
        &mut self,
        cursor: Cursor,
    ) -> Option<Arc<Message>> {
        let idx = self
            .messages
            .binary_search_by_key(&cursor, |m| m.cursor())
            .ok()?;
        self.messages.remove(idx).map(|stored| stored.message)
    }

    /// Курсоры всех сообщений очереди, от старых к новым.
    pub fn cursors(&self) -> impl Iterator<Item = Cursor> + '_ {
        self.messages.iter().map(|m| m.cursor())
    }

    /// Проверяет строгую упорядоченность очереди.
    pub fn validate(&self) -> Result<(), BrokerError> {
        let mut prev: Option<Cursor> = None;
        for cursor in self.cursors() {
            if prev.is_some_and(|p| p >= cursor) {
                return Err(BrokerError::InvariantViolation {
                    reason: format!("message queue out of order at {cursor}"),
                });
            }
            prev = Some(cursor);
        }
        if self.messages.len() > self.max_size {
            return Err(BrokerError::InvariantViolation {
                reason: format!(
                    "message queue holds {} entries, bound is {}",
                    self.messages.len(),
                    self.max_size
                ),
            });
        }
        Ok(())
    }

    fn evict_oldest(&mut self) -> Option<Cursor> {
        let stored = self.messages.pop_front()?;
        let cursor = stored.cursor();
        self.horizon = self.horizon.max(Some(cursor));
        Some(cursor)
    }
}
