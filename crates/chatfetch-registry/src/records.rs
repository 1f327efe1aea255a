use serde::{Deserialize, Serialize};

use chatfetch_core::models::{AccountId, ChatId, FileKind};

/// Persisted form of the enabled-target set, stored as one JSON value under
/// the auto-download setting key. Cursor state rides along so backfill
/// resumes where it left off across restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetsRecord {
    #[serde(default)]
    pub items: Vec<TargetRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetRecord {
    pub account_id: AccountId,
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_kind: Option<FileKind>,
    #[serde(default)]
    pub next_cursor: i64,
    #[serde(default)]
    pub history_complete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default)]
    pub kinds: Vec<FileKind>,
}

impl TargetsRecord {
    pub fn decode(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn contains(&self, account: AccountId, chat: ChatId) -> bool {
        self.items
            .iter()
            .any(|item| item.account_id == account && item.chat_id == chat)
    }

    /// Insert or replace the entry for the record's (account, chat) pair.
    pub fn upsert(&mut self, record: TargetRecord) {
        self.items
            .retain(|item| !(item.account_id == record.account_id && item.chat_id == record.chat_id));
        self.items.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_tolerates_missing_cursor_state() {
        let record = TargetsRecord::decode(
            r#"{"items":[{"account_id":1,"chat_id":2,"rule":{"kinds":["photo","video"]}}]}"#,
        )
        .expect("decode");
        let item = &record.items[0];
        assert_eq!(item.next_cursor, 0);
        assert!(item.next_kind.is_none());
        assert!(!item.history_complete);
        assert_eq!(
            item.rule.as_ref().expect("rule").kinds,
            vec![FileKind::Photo, FileKind::Video]
        );
    }

    #[test]
    fn encode_decode_round_trips_cursor_state() {
        let mut record = TargetsRecord::default();
        record.upsert(TargetRecord {
            account_id: 1,
            chat_id: 2,
            rule: None,
            next_kind: Some(FileKind::Audio),
            next_cursor: 777,
            history_complete: true,
        });
        let decoded = TargetsRecord::decode(&record.encode().expect("encode")).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn upsert_replaces_existing_pair() {
        let mut record = TargetsRecord::default();
        record.upsert(TargetRecord {
            account_id: 1,
            chat_id: 2,
            rule: None,
            next_kind: None,
            next_cursor: 5,
            history_complete: false,
        });
        record.upsert(TargetRecord {
            account_id: 1,
            chat_id: 2,
            rule: None,
            next_kind: None,
            next_cursor: 9,
            history_complete: false,
        });
        assert_eq!(record.items.len(), 1);
        assert_eq!(record.items[0].next_cursor, 9);
    }
}
