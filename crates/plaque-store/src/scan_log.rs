//! Append-only scan log.
//!
//! Records are only ever pushed. The per-token index answers "has this
//! holder presented this token before" without scanning the whole log.

use std::collections::HashMap;

use plaque_types::{HolderId, ScanId, ScanRecord, TokenCode};

#[derive(Debug, Default)]
pub struct ScanLog {
    /// All records in commit order; `records[i].id == ScanId(i + 1)`.
    records: Vec<ScanRecord>,
    /// Positions in `records` per token.
    by_token: HashMap<TokenCode, Vec<usize>>,
}

impl ScanLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the next appended record must carry.
    #[must_use]
    pub fn next_id(&self) -> ScanId {
        ScanId(self.records.len() as u64 + 1)
    }

    /// Append a record. Ids are assigned by the log, not the caller.
    pub fn append(&mut self, mut record: ScanRecord) -> ScanId {
        let id = self.next_id();
        record.id = id;
        self.by_token
            .entry(record.token.clone())
            .or_default()
            .push(self.records.len());
        self.records.push(record);
        id
    }

    /// Records for one token, oldest first.
    pub fn for_token<'a>(&'a self, token: &TokenCode) -> impl Iterator<Item = &'a ScanRecord> {
        self.by_token
            .get(token)
            .into_iter()
            .flatten()
            .map(|&idx| &self.records[idx])
    }

    /// Whether `holder` has presented `token` before.
    #[must_use]
    pub fn has_scanned(&self, token: &TokenCode, holder: HolderId) -> bool {
        self.for_token(token).any(|r| r.holder == Some(holder))
    }

    #[must_use]
    pub fn count_for(&self, token: &TokenCode) -> usize {
        self.by_token.get(token).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(token: &str, holder: Option<HolderId>) -> ScanRecord {
        ScanRecord {
            id: ScanId(0),
            token: TokenCode::parse(token).unwrap(),
            holder,
            origin: Some("10.0.0.1".into()),
            scanned_at: Utc::now(),
        }
    }

    #[test]
    fn ids_are_sequential() {
        let mut log = ScanLog::new();
        assert!(log.is_empty());
        assert_eq!(log.append(record("aaa111", None)), ScanId(1));
        assert_eq!(log.append(record("bbb222", None)), ScanId(2));
        assert_eq!(log.next_id(), ScanId(3));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn novelty_is_per_holder() {
        let mut log = ScanLog::new();
        let h1 = HolderId::new();
        let h2 = HolderId::new();
        let token = TokenCode::parse("aaa111").unwrap();

        log.append(record("aaa111", Some(h1)));
        log.append(record("aaa111", None));

        assert!(log.has_scanned(&token, h1));
        assert!(!log.has_scanned(&token, h2));
        assert_eq!(log.count_for(&token), 2);
    }

    #[test]
    fn for_token_filters_and_orders() {
        let mut log = ScanLog::new();
        log.append(record("aaa111", None));
        log.append(record("bbb222", None));
        log.append(record("aaa111", None));

        let ids: Vec<ScanId> = log
            .for_token(&TokenCode::parse("aaa111").unwrap())
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![ScanId(1), ScanId(3)]);
        assert_eq!(
            log.for_token(&TokenCode::parse("zzz999").unwrap()).count(),
            0
        );
    }
}
