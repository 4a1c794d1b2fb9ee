use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub text: String,
}

/// Short-lived user messages. Each one expires after the configured lifetime.
#[derive(Debug)]
pub struct Notices {
    ttl: Duration,
    next_id: u64,
    queue: VecDeque<(Notice, Instant)>,
}

impl Notices {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_id: 1,
            queue: VecDeque::new(),
        }
    }

    pub fn push(&mut self, kind: NoticeKind, text: impl Into<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let notice = Notice {
            id,
            kind,
            text: text.into(),
        };
        self.queue.push_back((notice, Instant::now() + self.ttl));
        id
    }

    pub fn info(&mut self, text: impl Into<String>) -> u64 {
        self.push(NoticeKind::Info, text)
    }

    pub fn success(&mut self, text: impl Into<String>) -> u64 {
        self.push(NoticeKind::Success, text)
    }

    pub fn warning(&mut self, text: impl Into<String>) -> u64 {
        self.push(NoticeKind::Warning, text)
    }

    pub fn error(&mut self, text: impl Into<String>) -> u64 {
        self.push(NoticeKind::Error, text)
    }

    /// Drop expired notices and return how many went away.
    pub fn expire(&mut self) -> usize {
        let now = Instant::now();
        let before = self.queue.len();
        self.queue.retain(|(_, deadline)| *deadline > now);
        before - self.queue.len()
    }

    pub fn active(&self) -> impl Iterator<Item = &Notice> {
        self.queue.iter().map(|(n, _)| n)
    }

    pub fn latest(&self) -> Option<&Notice> {
        self.queue.back().map(|(n, _)| n)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self::new(DEFAULT_NOTICE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_notices_expire_after_ttl() {
        let mut notices = Notices::default();
        notices.success("录音已保存");

        tokio::time::advance(Duration::from_millis(2000)).await;
        notices.error("播放失败");
        assert_eq!(notices.expire(), 0);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(notices.expire(), 1);

        let left: Vec<_> = notices.active().map(|n| n.kind).collect();
        assert_eq!(left, vec![NoticeKind::Error]);
    }

    #[test]
    fn test_latest_and_kind_names() {
        let mut notices = Notices::new(Duration::from_secs(10));
        notices.success("录音已导出");
        notices.warning("录音不存在");

        assert_eq!(notices.len(), 2);
        assert_eq!(notices.latest().unwrap().text, "录音不存在");
        assert_eq!(
            serde_json::to_string(&NoticeKind::Warning).unwrap(),
            "\"warning\""
        );
    }
}
