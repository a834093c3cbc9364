//! User-visible notifications (toasts)

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
    pub dismissible: bool,
}

#[derive(Debug, Default)]
struct Board {
    next_id: u64,
    notices: Vec<Notice>,
}

/// Shared handle; clones post to the same board
#[derive(Debug, Clone, Default)]
pub struct NoticeBoard {
    inner: Rc<RefCell<Board>>,
}

impl NoticeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, level: NoticeLevel, message: impl Into<String>, dismissible: bool) -> u64 {
        let mut board = self.inner.borrow_mut();
        board.next_id += 1;
        let id = board.next_id;
        board.notices.push(Notice { id, level, message: message.into(), dismissible });
        id
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.post(NoticeLevel::Info, message, true)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.post(NoticeLevel::Error, message, true)
    }

    pub fn active(&self) -> Vec<Notice> {
        self.inner.borrow().notices.clone()
    }

    pub fn has_errors(&self) -> bool {
        self.inner.borrow().notices.iter().any(|n| n.level == NoticeLevel::Error)
    }

    /// Returns false if the notice is unknown or not dismissible
    pub fn dismiss(&self, id: u64) -> bool {
        let mut board = self.inner.borrow_mut();
        let before = board.notices.len();
        board.notices.retain(|n| n.id != id || !n.dismissible);
        board.notices.len() != before
    }

    pub fn drain(&self) -> Vec<Notice> {
        std::mem::take(&mut self.inner.borrow_mut().notices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_board() {
        let board = NoticeBoard::new();
        let other = board.clone();
        other.error("boom");
        assert!(board.has_errors());
        assert_eq!(board.active()[0].message, "boom");
    }

    #[test]
    fn dismiss_respects_flag() {
        let board = NoticeBoard::new();
        let sticky = board.post(NoticeLevel::Warning, "sticky", false);
        let toast = board.info("toast");
        assert!(!board.dismiss(sticky));
        assert!(board.dismiss(toast));
        assert_eq!(board.active().len(), 1);
        assert_eq!(board.drain().len(), 1);
        assert!(board.active().is_empty());
    }
}
