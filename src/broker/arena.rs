use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use pushpoll_error::BrokerError;
use serde::Serialize;

/// Фиксированный размер служебной записи сообщения (очередь, курсор, срок
/// жизни).
pub const MESSAGE_OVERHEAD: usize = 64;
/// Размер записи ожидающего слушателя.
pub const LISTENER_RECORD: usize = 48;
/// Размер узла канала без идентификатора.
pub const CHANNEL_OVERHEAD: usize = 96;

/// Арена фиксированного размера, из которой выделяется всё состояние
/// брокера.
///
/// Арена ведёт учёт байтов: каждая запись (сообщение, слушатель, узел
/// канала) держит [`Block`], который возвращает свои байты при `Drop`.
/// Клонирование дешёвое, все клоны разделяют один пул.
#[derive(Debug, Clone)]
pub struct Arena {
    inner: Arc<ArenaInner>,
}

#[derive(Debug)]
struct ArenaInner {
    capacity: usize,
    used: AtomicUsize,
    allocations: AtomicU64,
    failed_allocations: AtomicU64,
}

/// Аренда `size` байт из арены. Освобождается при `Drop`.
#[derive(Debug)]
pub struct Block {
    arena: Arc<ArenaInner>,
    size: usize,
}

/// Снимок состояния арены.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArenaStats {
    pub capacity: usize,
    pub used: usize,
    pub allocations: u64,
    pub failed_allocations: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Arena {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(ArenaInner {
                capacity,
                used: AtomicUsize::new(0),
                allocations: AtomicU64::new(0),
                failed_allocations: AtomicU64::new(0),
            }),
        }
    }

    /// Выделяет блок размером `size` байт.
    ///
    /// При нехватке места возвращает [`BrokerError::ResourceExhausted`] и
    /// не меняет состояние арены.
    pub fn alloc(
        &self,
        size: usize,
    ) -> Result<Block, BrokerError> {
        let capacity = self.inner.capacity;
        let reserved = self
            .inner
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|next| *next <= capacity)
            });

        match reserved {
            Ok(_) => {
                self.inner.allocations.fetch_add(1, Ordering::Relaxed);
                Ok(Block {
                    arena: self.inner.clone(),
                    size,
                })
            }
            Err(used) => {
                self.inner.failed_allocations.fetch_add(1, Ordering::Relaxed);
                Err(BrokerError::ResourceExhausted {
                    requested: size,
                    available: capacity.saturating_sub(used),
                })
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.used())
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.inner.capacity,
            used: self.used(),
            allocations: self.inner.allocations.load(Ordering::Relaxed),
            failed_allocations: self.inner.failed_allocations.load(Ordering::Relaxed),
        }
    }
}

impl Block {
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        self.arena.used.fetch_sub(self.size, Ordering::AcqRel);
    }
}

/// Размер, учитываемый в арене для сообщения.
pub fn message_footprint(
    content_type: &str,
    charset: &str,
    payload_len: usize,
) -> usize {
    MESSAGE_OVERHEAD + content_type.len() + charset.len() + payload_len
}

/// Размер, учитываемый в арене для узла канала.
pub fn channel_footprint(id_len: usize) -> usize {
    CHANNEL_OVERHEAD + id_len
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что блок возвращает байты в арену при `Drop`.
    #[test]
    fn test_block_released_on_drop() {
        let arena = Arena::new(100);
        let block = arena.alloc(40).unwrap();
        assert_eq!(block.size(), 40);
        assert_eq!(arena.used(), 40);
        assert_eq!(arena.available(), 60);

        drop(block);
        assert_eq!(arena.used(), 0);
    }

    /// Тест проверяет, что при исчерпании арена возвращает
    /// `ResourceExhausted` и не меняет счётчик занятых байтов.
    #[test]
    fn test_exhaustion_leaves_arena_unchanged() {
        let arena = Arena::new(64);
        let _a = arena.alloc(50).unwrap();

        let err = arena.alloc(20).unwrap_err();
        assert_eq!(
            err,
            BrokerError::ResourceExhausted {
                requested: 20,
                available: 14,
            }
        );
        assert_eq!(arena.used(), 50);

        let stats = arena.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.failed_allocations, 1);
    }

    #[test]
    fn test_exact_fit_and_zero_sized() {
        let arena = Arena::new(32);
        let a = arena.alloc(32).unwrap();
        let z = arena.alloc(0).unwrap();
        assert_eq!(arena.available(), 0);
        drop(a);
        drop(z);
        assert_eq!(arena.available(), 32);
    }

    /// Тест проверяет, что клоны арены разделяют один пул.
    #[test]
    fn test_clones_share_pool() {
        let arena = Arena::new(10);
        let other = arena.clone();
        let _b = other.alloc(7).unwrap();
        assert_eq!(arena.used(), 7);
        assert!(arena.alloc(4).is_err());
    }

    #[test]
    fn test_concurrent_alloc_never_exceeds_capacity() {
        let arena = Arena::new(1000);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let arena = arena.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter_map(|_| arena.alloc(3).ok())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let blocks: Vec<Block> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert!(arena.used() <= 1000);
        assert_eq!(arena.used(), blocks.len() * 3);
        drop(blocks);
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_footprints() {
        assert_eq!(message_footprint("text/plain", "utf-8", 5), 64 + 10 + 5 + 5);
        assert_eq!(channel_footprint(4), 100);
    }
}
