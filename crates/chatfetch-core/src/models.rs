use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

pub type AccountId = i64;
pub type ChatId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Photo,
    Video,
    Audio,
    #[serde(rename = "file")]
    Document,
}

pub const DEFAULT_KIND_ORDER: [FileKind; 4] = [
    FileKind::Photo,
    FileKind::Video,
    FileKind::Audio,
    FileKind::Document,
];

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Photo => "photo",
            FileKind::Video => "video",
            FileKind::Audio => "audio",
            FileKind::Document => "file",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Idle,
    Downloading,
    Paused,
    Completed,
    Error,
}

/// One downloadable message as surfaced by the platform client. The numeric
/// message id can change (e.g. after edits); `unique_id` is the stable
/// content identity used for all deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub file_id: i32,
    pub unique_id: String,
    pub kind: FileKind,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub messages: Vec<MediaMessage>,
    pub next_cursor: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewMessageEvent {
    pub account_id: AccountId,
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Daily download window. Half-open `[start, end)`; when `start > end` the
/// window wraps past midnight. `start == end` admits nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindowRecord {
    pub start_time: String,
    pub end_time: String,
}

impl TimeWindow {
    pub fn admits(&self, now: NaiveTime) -> bool {
        if self.start > self.end {
            now >= self.start || now < self.end
        } else {
            now >= self.start && now < self.end
        }
    }

    pub fn from_record(record: &TimeWindowRecord) -> anyhow::Result<Self> {
        let start = NaiveTime::parse_from_str(&record.start_time, "%H:%M")?;
        let end = NaiveTime::parse_from_str(&record.end_time, "%H:%M")?;
        Ok(Self { start, end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: &str, end: &str) -> TimeWindow {
        TimeWindow::from_record(&TimeWindowRecord {
            start_time: start.to_string(),
            end_time: end.to_string(),
        })
        .expect("window")
    }

    fn at(time: &str) -> NaiveTime {
        NaiveTime::parse_from_str(time, "%H:%M").expect("time")
    }

    #[test]
    fn plain_window_admits_inside_only() {
        let w = window("08:00", "18:00");
        assert!(w.admits(at("12:00")));
        assert!(!w.admits(at("20:00")));
        assert!(!w.admits(at("07:59")));
    }

    #[test]
    fn wrapping_window_admits_across_midnight() {
        let w = window("22:00", "06:00");
        assert!(w.admits(at("23:30")));
        assert!(w.admits(at("02:00")));
        assert!(!w.admits(at("12:00")));
    }

    #[test]
    fn window_includes_start_excludes_end() {
        let w = window("08:00", "18:00");
        assert!(w.admits(at("08:00")));
        assert!(!w.admits(at("18:00")));
    }

    #[test]
    fn empty_window_admits_nothing() {
        let w = window("08:00", "08:00");
        assert!(!w.admits(at("08:00")));
        assert!(!w.admits(at("12:00")));
    }

    #[test]
    fn from_record_rejects_garbage() {
        let record = TimeWindowRecord {
            start_time: "eight".to_string(),
            end_time: "18:00".to_string(),
        };
        assert!(TimeWindow::from_record(&record).is_err());
    }

    #[test]
    fn file_kind_serde_uses_platform_names() {
        let json = serde_json::to_string(&FileKind::Document).expect("encode");
        assert_eq!(json, "\"file\"");
        let kind: FileKind = serde_json::from_str("\"photo\"").expect("decode");
        assert_eq!(kind, FileKind::Photo);
    }
}
