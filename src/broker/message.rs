use std::{fmt, str::FromStr, sync::Arc};

use bytes::Bytes;
use pushpoll_error::ProtocolError;
use serde::{Deserialize, Serialize};

use super::arena::Block;

/// Курсор возобновления: время публикации и тег внутри одной секунды.
///
/// Порядок лексикографический по `(time, tag)`, что совпадает с
/// порядком публикации внутри канала.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    /// Время публикации, секунды unix.
    pub time: u64,
    /// Номер сообщения среди опубликованных в ту же секунду.
    pub tag: u32,
}

/// Опубликованное сообщение.
///
/// Сообщение неизменяемо; слушателям отдаётся `Arc<Message>`, поэтому
/// широковещательная доставка не копирует тело.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cursor: Cursor,
    pub content_type: String,
    pub charset: String,
    pub payload: Bytes,
    /// Абсолютное время истечения (секунды unix); `None` - бессрочно.
    pub expires: Option<u64>,
}

/// Сообщение в очереди вместе с его блоком арены.
#[derive(Debug)]
pub(crate) struct StoredMessage {
    pub(crate) message: Arc<Message>,
    _block: Block,
}

impl Cursor {
    pub const fn new(
        time: u64,
        tag: u32,
    ) -> Self {
        Self { time, tag }
    }

    /// Курсор, следующий за текущим при публикации в момент `now`.
    ///
    /// Если часы ушли назад, время не уменьшается: используется прежнее
    /// время со следующим тегом. `None`, если тег уже `u32::MAX`.
    pub fn successor(
        &self,
        now: u64,
    ) -> Option<Self> {
        if now > self.time {
            Some(Self::new(now, 0))
        } else {
            self.tag.checked_add(1).map(|tag| Self::new(self.time, tag))
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.time, self.tag)
    }
}

impl FromStr for Cursor {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidCursor {
            cursor: s.to_string(),
        };
        let (time, tag) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            time: time.parse().map_err(|_| invalid())?,
            tag: tag.parse().map_err(|_| invalid())?,
        })
    }
}

impl Message {
    pub fn is_expired(
        &self,
        now: u64,
    ) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }
}

impl StoredMessage {
    pub(crate) fn new(
        message: Message,
        block: Block,
    ) -> Self {
        Self {
            message: Arc::new(message),
            _block: block,
        }
    }

    pub(crate) fn cursor(&self) -> Cursor {
        self.message.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(
        time: u64,
        tag: u32,
        expires: Option<u64>,
    ) -> Message {
        Message {
            cursor: Cursor::new(time, tag),
            content_type: "text/plain".to_string(),
            charset: String::new(),
            payload: Bytes::from_static(b"x"),
            expires,
        }
    }

    /// Тест проверяет порядок курсоров: сначала время, затем тег.
    #[test]
    fn test_cursor_ordering() {
        assert!(Cursor::new(10, 5) < Cursor::new(11, 0));
        assert!(Cursor::new(10, 0) < Cursor::new(10, 1));
        assert_eq!(Cursor::new(3, 3), Cursor::new(3, 3));
    }

    #[test]
    fn test_successor_new_second_resets_tag() {
        assert_eq!(Cursor::new(10, 4).successor(11), Some(Cursor::new(11, 0)));
    }

    #[test]
    fn test_successor_same_second_bumps_tag() {
        assert_eq!(Cursor::new(10, 4).successor(10), Some(Cursor::new(10, 5)));
    }

    /// Тест проверяет, что последний тег секунды не переполняется и не
    /// повторяется.
    #[test]
    fn test_successor_tag_ceiling() {
        let last = Cursor::new(10, u32::MAX);
        assert_eq!(last.successor(10), None);
        assert_eq!(last.successor(9), None);
        assert_eq!(last.successor(11), Some(Cursor::new(11, 0)));
    }

    /// Тест проверяет, что при откате часов курсор всё равно растёт.
    #[test]
    fn test_successor_clock_went_backwards() {
        let next = Cursor::new(10, 0).successor(7).unwrap();
        assert_eq!(next, Cursor::new(10, 1));
        assert!(next > Cursor::new(10, 0));
    }

    #[test]
    fn test_cursor_text_form() {
        let c = Cursor::new(1700000000, 2);
        assert_eq!(c.to_string(), "1700000000:2");
        assert_eq!("1700000000:2".parse::<Cursor>().unwrap(), c);
    }

    #[test]
    fn test_cursor_parse_errors() {
        for bad in ["", "12", "a:1", "1:b", "1:-1", ":"] {
            assert!(
                matches!(bad.parse::<Cursor>(), Err(ProtocolError::InvalidCursor { .. })),
                "{bad:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_message_expiry() {
        assert!(!message(1, 0, None).is_expired(u64::MAX));
        assert!(!message(1, 0, Some(10)).is_expired(9));
        assert!(message(1, 0, Some(10)).is_expired(10));
    }
}
