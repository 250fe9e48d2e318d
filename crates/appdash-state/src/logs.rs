//! Log ingest and paginated browsing.
//!
//! Hosts ship batches of log lines per service. Lines landing in the same
//! (service, host, second) bucket share one [`LogRecord`]. Records are read
//! back newest-first in pages, resumed through an opaque [`PageToken`].
//!
//! Two tables back the scans:
//!
//! ```text
//! log_records   {service}|{host}|{inverted}  -> LogRecord   (one host)
//! log_timeline  {service}|{inverted}|{host}  -> record key  (all hosts)
//! ```
//!
//! A token carries its view kind and the last index key handed out, and the
//! next page starts strictly after it. Records inserted later for newer seconds sort before
//! that key, so they never push already returned records into a later page.

use std::collections::BTreeMap;
use std::ops::Bound;

use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::keys;
use crate::store::StateStore;
use crate::tables::{LOG_RECORDS, LOG_SERVICES, LOG_TIMELINE};
use crate::types::{LogLine, LogRecord, LogService};

/// Host wildcard selecting every host of a service.
pub const ALL_HOSTS: &str = "all";

/// Records per page in the log viewer.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// One ingest call, as posted by a log shipper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestBatch {
    pub service_name: String,
    pub host: String,
    pub logs: Vec<IngestLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestLine {
    pub message: String,
    pub level: u32,
    /// Unix seconds; fractional parts are truncated.
    pub timestamp: f64,
}

/// What an ingest call wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub lines: usize,
    pub records: usize,
}

const VIEW_HOST: &str = "host";
const VIEW_ALL: &str = "all";
const TOKEN_TAG_END: char = '\0';

/// Opaque resume position for [`StateStore::list_logs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageToken(String);

impl PageToken {
    /// Wrap a token string received from a client.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_key(all_hosts: bool, key: &str) -> Self {
        let view = if all_hosts { VIEW_ALL } else { VIEW_HOST };
        Self(hex::encode(format!("{view}{TOKEN_TAG_END}{key}")))
    }

    /// Recover the index key, refusing tokens minted for another scan.
    ///
    /// The view tag separates host view tokens from timeline tokens, whose
    /// keys can share the service prefix.
    fn resume_key(&self, prefix: &str, all_hosts: bool) -> StateResult<String> {
        let bytes = hex::decode(&self.0)
            .map_err(|e| StateError::InvalidToken(format!("undecodable token: {e}")))?;
        let decoded = String::from_utf8(bytes)
            .map_err(|_| StateError::InvalidToken("token is not a key".to_string()))?;
        let (view, key) = decoded
            .split_once(TOKEN_TAG_END)
            .ok_or_else(|| StateError::InvalidToken("token has no view tag".to_string()))?;
        let expected = if all_hosts { VIEW_ALL } else { VIEW_HOST };
        if view != expected || !key.starts_with(prefix) {
            return Err(StateError::InvalidToken(
                "token belongs to a different log view".to_string(),
            ));
        }
        let rest = &key[prefix.len()..];
        let shaped = if all_hosts {
            rest.split_once(keys::SEPARATOR)
                .is_some_and(|(inverted, host)| {
                    keys::is_inverted_component(inverted) && !host.is_empty()
                })
        } else {
            keys::is_inverted_component(rest)
        };
        if !shaped {
            return Err(StateError::InvalidToken("token key is malformed".to_string()));
        }
        Ok(key.to_string())
    }
}

impl std::fmt::Display for PageToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of log records, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogPage {
    pub records: Vec<LogRecord>,
    pub next_token: Option<PageToken>,
    pub has_more: bool,
}

/// A validated line with its bucket keys precomputed.
struct PreparedLine {
    record_key: String,
    timeline_key: String,
    line: LogLine,
}

fn prepare(batch: &IngestBatch) -> StateResult<Vec<PreparedLine>> {
    keys::validate_component("service name", &batch.service_name)?;
    keys::validate_component("host", &batch.host)?;
    if batch.host == ALL_HOSTS {
        return Err(StateError::Malformed(format!(
            "host name {ALL_HOSTS:?} is reserved"
        )));
    }

    batch
        .logs
        .iter()
        .map(|l| {
            if !l.timestamp.is_finite() || l.timestamp < 0.0 {
                return Err(StateError::Malformed(format!(
                    "invalid timestamp {}",
                    l.timestamp
                )));
            }
            let ts = l.timestamp.trunc() as u64;
            Ok(PreparedLine {
                record_key: keys::log_record_key(&batch.service_name, &batch.host, ts)?,
                timeline_key: keys::log_timeline_key(&batch.service_name, &batch.host, ts)?,
                line: LogLine {
                    message: l.message.clone(),
                    level: l.level,
                    timestamp: ts,
                },
            })
        })
        .collect()
}

impl StateStore {
    /// Store a batch of log lines for one (service, host).
    ///
    /// Every line is validated before anything is written; the host
    /// registration and all touched records commit in one transaction.
    pub fn ingest_logs(&self, batch: &IngestBatch) -> StateResult<IngestSummary> {
        let prepared = prepare(batch)?;
        let service = &batch.service_name;
        let host = &batch.host;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let touched;
        {
            let mut services = txn.open_table(LOG_SERVICES).map_err(map_err!(Table))?;
            let existing = match services.get(service.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<LogService>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            let registration = match existing {
                None => Some(LogService {
                    name: service.clone(),
                    hosts: vec![host.clone()],
                }),
                Some(mut s) if !s.hosts.contains(host) => {
                    s.hosts.push(host.clone());
                    Some(s)
                }
                Some(_) => None,
            };
            if let Some(registration) = registration {
                let value = serde_json::to_vec(&registration).map_err(map_err!(Serialize))?;
                services
                    .insert(service.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                debug!(%service, %host, "log host registered");
            }

            // Coalesce lines sharing a bucket before touching the table again.
            let mut records = txn.open_table(LOG_RECORDS).map_err(map_err!(Table))?;
            let mut pending: BTreeMap<String, (String, LogRecord)> = BTreeMap::new();
            for p in prepared {
                if !pending.contains_key(&p.record_key) {
                    let stored = match records.get(p.record_key.as_str()).map_err(map_err!(Read))? {
                        Some(guard) => Some(
                            serde_json::from_slice::<LogRecord>(guard.value())
                                .map_err(map_err!(Deserialize))?,
                        ),
                        None => None,
                    };
                    let record = stored.unwrap_or_else(|| LogRecord {
                        service: service.clone(),
                        host: host.clone(),
                        timestamp: p.line.timestamp,
                        lines: Vec::new(),
                    });
                    pending.insert(p.record_key.clone(), (p.timeline_key.clone(), record));
                }
                if let Some((_, record)) = pending.get_mut(&p.record_key) {
                    record.lines.push(p.line);
                }
            }

            let mut timeline = txn.open_table(LOG_TIMELINE).map_err(map_err!(Table))?;
            for (record_key, (timeline_key, record)) in &pending {
                let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
                records
                    .insert(record_key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                timeline
                    .insert(timeline_key.as_str(), record_key.as_str())
                    .map_err(map_err!(Write))?;
            }
            touched = pending.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;

        let summary = IngestSummary {
            lines: batch.logs.len(),
            records: touched,
        };
        debug!(%service, %host, lines = summary.lines, records = summary.records, "logs ingested");
        Ok(summary)
    }

    /// One page of a service's log records, newest first.
    ///
    /// `host` may be [`ALL_HOSTS`]. Without a token the page starts at the
    /// newest record.
    pub fn list_logs(
        &self,
        service: &str,
        host: &str,
        page_size: usize,
        token: Option<&PageToken>,
    ) -> StateResult<LogPage> {
        if page_size == 0 {
            return Err(StateError::Malformed("page size must be at least 1".to_string()));
        }
        let all_hosts = host == ALL_HOSTS;
        let prefix = if all_hosts {
            keys::scan_prefix(&[service])
        } else {
            keys::scan_prefix(&[service, host])
        };
        let resume = token
            .map(|t| t.resume_key(&prefix, all_hosts))
            .transpose()?;
        let start = match resume.as_deref() {
            Some(key) => Bound::Excluded(key),
            None => Bound::Included(prefix.as_str()),
        };

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let records_table = txn.open_table(LOG_RECORDS).map_err(map_err!(Table))?;

        // (index key, record key) pairs, one more than a page to detect the end.
        let mut hits: Vec<(String, String)> = Vec::with_capacity(page_size + 1);
        if all_hosts {
            let timeline = txn.open_table(LOG_TIMELINE).map_err(map_err!(Table))?;
            for entry in timeline
                .range::<&str>((start, Bound::Unbounded))
                .map_err(map_err!(Read))?
            {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) || hits.len() > page_size {
                    break;
                }
                hits.push((key.value().to_string(), value.value().to_string()));
            }
        } else {
            for entry in records_table
                .range::<&str>((start, Bound::Unbounded))
                .map_err(map_err!(Read))?
            {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) || hits.len() > page_size {
                    break;
                }
                hits.push((key.value().to_string(), key.value().to_string()));
            }
        }

        let has_more = hits.len() > page_size;
        hits.truncate(page_size);

        let mut records = Vec::with_capacity(hits.len());
        for (_, record_key) in &hits {
            let guard = records_table
                .get(record_key.as_str())
                .map_err(map_err!(Read))?
                .ok_or_else(|| StateError::NotFound(format!("log record {record_key}")))?;
            let record: LogRecord =
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            records.push(record);
        }

        let next_token = if has_more {
            hits.last()
                .map(|(index_key, _)| PageToken::from_key(all_hosts, index_key))
        } else {
            None
        };

        Ok(LogPage {
            records,
            next_token,
            has_more,
        })
    }

    /// Every service that has shipped logs, in name order.
    pub fn log_services(&self) -> StateResult<Vec<LogService>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LOG_SERVICES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let service: LogService =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(service);
        }
        Ok(results)
    }

    pub fn log_service(&self, name: &str) -> StateResult<Option<LogService>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LOG_SERVICES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let service: LogService =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(service))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(message: &str, ts: u64) -> IngestLine {
        IngestLine {
            message: message.to_string(),
            level: 2,
            timestamp: ts as f64,
        }
    }

    fn batch(service: &str, host: &str, lines: Vec<IngestLine>) -> IngestBatch {
        IngestBatch {
            service_name: service.to_string(),
            host: host.to_string(),
            logs: lines,
        }
    }

    fn timestamps(page: &LogPage) -> Vec<u64> {
        page.records.iter().map(|r| r.timestamp).collect()
    }

    // ── Ingest ─────────────────────────────────────────────────────

    #[test]
    fn same_second_lines_share_one_record() {
        let store = StateStore::open_in_memory().unwrap();
        let t = 1_700_000_000;
        let summary = store
            .ingest_logs(&batch("s1", "h1", vec![line("first", t), line("second", t)]))
            .unwrap();
        assert_eq!(summary, IngestSummary { lines: 2, records: 1 });

        let page = store.list_logs("s1", "h1", 10, None).unwrap();
        assert_eq!(page.records.len(), 1);
        let messages: Vec<&str> =
            page.records[0].lines.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);

        let key = keys::log_record_key("s1", "h1", t).unwrap();
        assert_eq!(key, format!("s1|h1|{}", ((1u64 << 34) - t) * 1_000_000));
    }

    #[test]
    fn later_batch_appends_to_existing_bucket() {
        let store = StateStore::open_in_memory().unwrap();
        store.ingest_logs(&batch("s1", "h1", vec![line("a", 100)])).unwrap();
        store.ingest_logs(&batch("s1", "h1", vec![line("b", 100)])).unwrap();

        let page = store.list_logs("s1", "h1", 10, None).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].lines.len(), 2);
    }

    #[test]
    fn hosts_registered_once_in_order() {
        let store = StateStore::open_in_memory().unwrap();
        store.ingest_logs(&batch("s1", "h1", vec![line("a", 1)])).unwrap();
        store.ingest_logs(&batch("s1", "h2", vec![line("b", 2)])).unwrap();
        store.ingest_logs(&batch("s1", "h1", vec![line("c", 3)])).unwrap();

        let service = store.log_service("s1").unwrap().unwrap();
        assert_eq!(service.hosts, vec!["h1".to_string(), "h2".to_string()]);
        assert_eq!(store.log_services().unwrap().len(), 1);
    }

    #[test]
    fn malformed_batch_writes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let mut bad = line("late", 1);
        bad.timestamp = -5.0;
        let err = store
            .ingest_logs(&batch("s1", "h1", vec![line("ok", 1), bad]))
            .unwrap_err();
        assert!(matches!(err, StateError::Malformed(_)));

        assert!(store.log_service("s1").unwrap().is_none());
        assert!(store.list_logs("s1", ALL_HOSTS, 10, None).unwrap().records.is_empty());
    }

    #[test]
    fn reserved_and_separator_names_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.ingest_logs(&batch("s1", ALL_HOSTS, vec![line("x", 1)])).is_err());
        assert!(store.ingest_logs(&batch("s|1", "h1", vec![line("x", 1)])).is_err());
    }

    // ── Pagination ─────────────────────────────────────────────────

    #[test]
    fn pages_of_two_over_five_records() {
        let store = StateStore::open_in_memory().unwrap();
        for ts in 1..=5u64 {
            let host = if ts % 2 == 0 { "h1" } else { "h2" };
            store.ingest_logs(&batch("s1", host, vec![line("x", ts)])).unwrap();
        }

        let first = store.list_logs("s1", ALL_HOSTS, 2, None).unwrap();
        assert_eq!(timestamps(&first), vec![5, 4]);
        assert!(first.has_more);
        let token = first.next_token.clone().unwrap();

        let second = store.list_logs("s1", ALL_HOSTS, 2, Some(&token)).unwrap();
        assert_eq!(timestamps(&second), vec![3, 2]);
        assert!(second.has_more);
        let token = second.next_token.clone().unwrap();

        let third = store.list_logs("s1", ALL_HOSTS, 2, Some(&token)).unwrap();
        assert_eq!(timestamps(&third), vec![1]);
        assert!(!third.has_more);
        assert!(third.next_token.is_none());
    }

    #[test]
    fn exact_multiple_of_page_size_ends_cleanly() {
        let store = StateStore::open_in_memory().unwrap();
        for ts in 1..=4u64 {
            store.ingest_logs(&batch("s1", "h1", vec![line("x", ts)])).unwrap();
        }
        let first = store.list_logs("s1", "h1", 2, None).unwrap();
        let second = store
            .list_logs("s1", "h1", 2, first.next_token.as_ref())
            .unwrap();
        assert_eq!(timestamps(&second), vec![2, 1]);
        assert!(!second.has_more);
        assert!(second.next_token.is_none());
    }

    #[test]
    fn single_host_view_filters_other_hosts() {
        let store = StateStore::open_in_memory().unwrap();
        store.ingest_logs(&batch("s1", "h1", vec![line("a", 10), line("b", 20)])).unwrap();
        store.ingest_logs(&batch("s1", "h10", vec![line("c", 30)])).unwrap();
        store.ingest_logs(&batch("s2", "h1", vec![line("d", 40)])).unwrap();

        let page = store.list_logs("s1", "h1", 10, None).unwrap();
        assert_eq!(timestamps(&page), vec![20, 10]);
        assert!(page.records.iter().all(|r| r.host == "h1" && r.service == "s1"));

        let all = store.list_logs("s1", ALL_HOSTS, 10, None).unwrap();
        assert_eq!(timestamps(&all), vec![30, 20, 10]);
    }

    #[test]
    fn concatenated_pages_survive_newer_inserts() {
        let store = StateStore::open_in_memory().unwrap();
        for ts in 100..110u64 {
            store.ingest_logs(&batch("s1", "h1", vec![line("x", ts)])).unwrap();
        }

        for page_size in 1..=4 {
            let mut seen = Vec::new();
            let mut token: Option<PageToken> = None;
            let mut extra = 1_000 + page_size as u64 * 10;
            loop {
                let page = store.list_logs("s1", ALL_HOSTS, page_size, token.as_ref()).unwrap();
                seen.extend(timestamps(&page).into_iter().filter(|ts| *ts < 1_000));
                // Newer records arriving between pages sort before the token.
                store.ingest_logs(&batch("s1", "h2", vec![line("new", extra)])).unwrap();
                extra += 1;
                if !page.has_more {
                    break;
                }
                token = page.next_token;
            }
            assert_eq!(seen, (100..110u64).rev().collect::<Vec<_>>(), "page size {page_size}");
        }
    }

    #[test]
    fn foreign_or_garbled_tokens_fail() {
        let store = StateStore::open_in_memory().unwrap();
        for ts in 1..=3u64 {
            store.ingest_logs(&batch("s1", "h1", vec![line("x", ts)])).unwrap();
        }
        let page = store.list_logs("s1", "h1", 1, None).unwrap();
        let token = page.next_token.unwrap();

        assert!(matches!(
            store.list_logs("s2", "h1", 1, Some(&token)),
            Err(StateError::InvalidToken(_))
        ));
        assert!(matches!(
            store.list_logs("s1", "h1", 1, Some(&PageToken::new("zz-not-hex"))),
            Err(StateError::InvalidToken(_))
        ));
    }

    #[test]
    fn tokens_do_not_cross_between_host_and_all_views() {
        let store = StateStore::open_in_memory().unwrap();
        for ts in 1..=3u64 {
            store.ingest_logs(&batch("s1", "h1", vec![line("x", ts)])).unwrap();
        }

        let host_token = store.list_logs("s1", "h1", 1, None).unwrap().next_token.unwrap();
        assert!(matches!(
            store.list_logs("s1", ALL_HOSTS, 1, Some(&host_token)),
            Err(StateError::InvalidToken(_))
        ));

        let all_token = store
            .list_logs("s1", ALL_HOSTS, 1, None)
            .unwrap()
            .next_token
            .unwrap();
        assert!(matches!(
            store.list_logs("s1", "h1", 1, Some(&all_token)),
            Err(StateError::InvalidToken(_))
        ));

        // Each token still resumes its own view.
        let page = store.list_logs("s1", ALL_HOSTS, 1, Some(&all_token)).unwrap();
        assert_eq!(timestamps(&page), vec![2]);
        let page = store.list_logs("s1", "h1", 1, Some(&host_token)).unwrap();
        assert_eq!(timestamps(&page), vec![2]);
    }

    #[test]
    fn zero_page_size_is_malformed() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(matches!(
            store.list_logs("s1", ALL_HOSTS, 0, None),
            Err(StateError::Malformed(_))
        ));
    }
}
