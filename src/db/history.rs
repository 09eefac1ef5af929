//! Append-only audit log of export and import executions

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DbPool;
use crate::{Error, Result};

/// Direction of a sync execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Export,
    Import,
}

impl SyncDirection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Import => "import",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flattened summary of one execution, ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub direction: SyncDirection,
    pub correlation_id: String,
    pub plugin_name: String,
    pub format: String,
    pub success: bool,
    pub dry_run: bool,
    /// Records exported, or records processed on import
    pub record_count: u64,
    pub created_count: u64,
    pub updated_count: u64,
    pub deleted_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub requester: String,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// A persisted history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    #[serde(flatten)]
    pub entry: HistoryEntry,
}

/// Filter and pagination for history listings
///
/// Out-of-range values are corrected rather than rejected: a page below 1
/// becomes 1, a page size outside `1..=100` becomes 20.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub page: u32,
    pub page_size: u32,
    pub plugin: Option<String>,
    pub success: Option<bool>,
}

impl HistoryQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    pub const MAX_PAGE_SIZE: u32 = 100;

    /// Build a query from numeric page parameters, correcting invalid values
    #[must_use]
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = page
            .filter(|p| *p >= 1)
            .and_then(|p| u32::try_from(p).ok())
            .unwrap_or(1);
        let page_size = page_size
            .filter(|s| (1..=i64::from(Self::MAX_PAGE_SIZE)).contains(s))
            .and_then(|s| u32::try_from(s).ok())
            .unwrap_or(Self::DEFAULT_PAGE_SIZE);

        Self {
            page,
            page_size,
            plugin: None,
            success: None,
        }
    }

    /// Build a query from raw query-string values
    ///
    /// Non-numeric page values fall back to defaults and unrecognised success
    /// values disable the success filter.
    #[must_use]
    pub fn from_params(
        page: Option<&str>,
        page_size: Option<&str>,
        plugin: Option<&str>,
        success: Option<&str>,
    ) -> Self {
        let parse = |v: Option<&str>| v.and_then(|s| s.trim().parse::<i64>().ok());
        let success = success.and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        });

        Self::new(parse(page), parse(page_size))
            .with_plugin(plugin)
            .with_success(success)
    }

    /// Restrict to a single plugin (empty names are ignored)
    #[must_use]
    pub fn with_plugin(mut self, plugin: Option<&str>) -> Self {
        self.plugin = plugin
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from);
        self
    }

    /// Restrict to successful or failed executions
    #[must_use]
    pub const fn with_success(mut self, success: Option<bool>) -> Self {
        self.success = success;
        self
    }

    fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.page_size)
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of history records
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub items: Vec<HistoryRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

/// Per-plugin execution counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginStatistics {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
}

/// Aggregate counts over the full history of one direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatistics {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    /// Total executions per plugin
    pub by_plugin: BTreeMap<String, u64>,
    /// Success/failure split per plugin
    pub plugins: BTreeMap<String, PluginStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

/// History repository
#[derive(Clone)]
pub struct HistoryRepo {
    pool: DbPool,
}

impl HistoryRepo {
    /// Create a new history repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append an entry
    ///
    /// # Errors
    ///
    /// Returns `HistoryPersistence` if the record cannot be written
    pub fn save(&self, entry: &HistoryEntry) -> Result<HistoryRecord> {
        let conn = super::conn(&self.pool).map_err(persistence)?;

        conn.execute(
            r"
            INSERT INTO sync_history (
                direction, correlation_id, plugin_name, format, success, dry_run,
                record_count, created_count, updated_count, deleted_count,
                output_path, error, requester, duration_ms, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ",
            rusqlite::params![
                entry.direction.as_str(),
                entry.correlation_id,
                entry.plugin_name,
                entry.format,
                entry.success,
                entry.dry_run,
                to_i64(entry.record_count),
                to_i64(entry.created_count),
                to_i64(entry.updated_count),
                to_i64(entry.deleted_count),
                entry.output_path,
                entry.error,
                entry.requester,
                to_i64(entry.duration_ms),
                entry.created_at.to_rfc3339(),
            ],
        )
        .map_err(persistence)?;

        let id = conn.last_insert_rowid();
        tracing::debug!(
            id,
            direction = %entry.direction,
            correlation_id = %entry.correlation_id,
            "history recorded"
        );

        Ok(HistoryRecord {
            id,
            entry: entry.clone(),
        })
    }

    /// List history for one direction, newest first
    ///
    /// Filters apply before pagination; a page past the end is empty.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, direction: SyncDirection, query: &HistoryQuery) -> Result<HistoryPage> {
        let conn = super::conn(&self.pool)?;

        let total: i64 = conn.query_row(
            r"
            SELECT COUNT(*) FROM sync_history
            WHERE direction = ?1
              AND (?2 IS NULL OR plugin_name = ?2)
              AND (?3 IS NULL OR success = ?3)
            ",
            rusqlite::params![direction.as_str(), query.plugin, query.success],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            r"
            SELECT id, direction, correlation_id, plugin_name, format, success, dry_run,
                   record_count, created_count, updated_count, deleted_count,
                   output_path, error, requester, duration_ms, created_at
            FROM sync_history
            WHERE direction = ?1
              AND (?2 IS NULL OR plugin_name = ?2)
              AND (?3 IS NULL OR success = ?3)
            ORDER BY id DESC
            LIMIT ?4 OFFSET ?5
            ",
        )?;

        let items = stmt
            .query_map(
                rusqlite::params![
                    direction.as_str(),
                    query.plugin,
                    query.success,
                    i64::from(query.page_size),
                    query.offset(),
                ],
                Self::row_to_record,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let total = to_u64(total);
        Ok(HistoryPage {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
            total_pages: total.div_ceil(u64::from(query.page_size)),
        })
    }

    /// Aggregate counts over the whole store for one direction
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn statistics(&self, direction: SyncDirection) -> Result<SyncStatistics> {
        let conn = super::conn(&self.pool)?;

        let mut stmt = conn.prepare(
            r"
            SELECT plugin_name, COUNT(*), COALESCE(SUM(success), 0), MAX(created_at)
            FROM sync_history
            WHERE direction = ?1
            GROUP BY plugin_name
            ORDER BY plugin_name
            ",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![direction.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stats = SyncStatistics::default();
        for (plugin, total, success, last) in rows {
            let total = to_u64(total);
            let success = to_u64(success);
            let plugin_stats = PluginStatistics {
                total,
                success,
                failure: total.saturating_sub(success),
            };

            stats.total += plugin_stats.total;
            stats.success += plugin_stats.success;
            stats.failure += plugin_stats.failure;
            stats.by_plugin.insert(plugin.clone(), total);
            stats.plugins.insert(plugin, plugin_stats);

            let last = last.as_deref().map(parse_datetime);
            if last > stats.last_run_at {
                stats.last_run_at = last;
            }
        }

        Ok(stats)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryRecord> {
        let direction: String = row.get(1)?;
        let direction = if direction == "import" {
            SyncDirection::Import
        } else {
            SyncDirection::Export
        };

        Ok(HistoryRecord {
            id: row.get(0)?,
            entry: HistoryEntry {
                direction,
                correlation_id: row.get(2)?,
                plugin_name: row.get(3)?,
                format: row.get(4)?,
                success: row.get(5)?,
                dry_run: row.get(6)?,
                record_count: to_u64(row.get(7)?),
                created_count: to_u64(row.get(8)?),
                updated_count: to_u64(row.get(9)?),
                deleted_count: to_u64(row.get(10)?),
                output_path: row.get(11)?,
                error: row.get(12)?,
                requester: row.get(13)?,
                duration_ms: to_u64(row.get(14)?),
                created_at: parse_datetime(&row.get::<_, String>(15)?),
            },
        })
    }
}

fn persistence(e: impl fmt::Display) -> Error {
    Error::HistoryPersistence(e.to_string())
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn entry(direction: SyncDirection, plugin: &str, success: bool) -> HistoryEntry {
        HistoryEntry {
            direction,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            plugin_name: plugin.to_string(),
            format: "json".to_string(),
            success,
            dry_run: false,
            record_count: 3,
            created_count: 0,
            updated_count: 0,
            deleted_count: 0,
            output_path: None,
            error: (!success).then(|| "boom".to_string()),
            requester: "tester".to_string(),
            duration_ms: 5,
            created_at: Utc::now(),
        }
    }

    fn seeded(n: usize) -> HistoryRepo {
        let repo = HistoryRepo::new(init_memory().unwrap());
        for _ in 0..n {
            repo.save(&entry(SyncDirection::Export, "archive", true)).unwrap();
        }
        repo
    }

    #[test]
    fn test_query_corrects_invalid_values() {
        let q = HistoryQuery::new(Some(0), Some(500));
        assert_eq!((q.page, q.page_size), (1, 20));

        let q = HistoryQuery::new(Some(-3), Some(0));
        assert_eq!((q.page, q.page_size), (1, 20));

        let q = HistoryQuery::from_params(Some("abc"), Some("xyz"), None, None);
        assert_eq!((q.page, q.page_size), (1, 20));

        let q = HistoryQuery::from_params(Some("3"), Some("100"), Some(""), Some("maybe"));
        assert_eq!((q.page, q.page_size), (3, 100));
        assert!(q.plugin.is_none());
        assert!(q.success.is_none());
    }

    #[test]
    fn test_last_page_returns_remainder() {
        let repo = seeded(7);
        let page = repo
            .list(SyncDirection::Export, &HistoryQuery::new(Some(3), Some(3)))
            .unwrap();

        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_page_past_end_is_empty() {
        let repo = seeded(2);
        let page = repo
            .list(SyncDirection::Export, &HistoryQuery::new(Some(9), Some(5)))
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_filters_apply_before_pagination() {
        let repo = HistoryRepo::new(init_memory().unwrap());
        repo.save(&entry(SyncDirection::Export, "a", true)).unwrap();
        repo.save(&entry(SyncDirection::Export, "a", false)).unwrap();
        repo.save(&entry(SyncDirection::Export, "b", true)).unwrap();
        repo.save(&entry(SyncDirection::Import, "a", true)).unwrap();

        let q = HistoryQuery::default()
            .with_plugin(Some("a"))
            .with_success(Some(true));
        let page = repo.list(SyncDirection::Export, &q).unwrap();
        assert_eq!(page.total, 1);
        assert!(page.items.iter().all(|r| r.entry.plugin_name == "a" && r.entry.success));

        let q = HistoryQuery::default().with_plugin(Some("missing"));
        let page = repo.list(SyncDirection::Export, &q).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_newest_first() {
        let repo = seeded(3);
        let page = repo
            .list(SyncDirection::Export, &HistoryQuery::default())
            .unwrap();
        assert!(page.items[0].id > page.items[2].id);
    }

    #[test]
    fn test_statistics_by_plugin() {
        let repo = HistoryRepo::new(init_memory().unwrap());
        repo.save(&entry(SyncDirection::Export, "A", true)).unwrap();
        repo.save(&entry(SyncDirection::Export, "A", true)).unwrap();
        repo.save(&entry(SyncDirection::Export, "A", false)).unwrap();
        repo.save(&entry(SyncDirection::Import, "A", false)).unwrap();

        let stats = repo.statistics(SyncDirection::Export).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failure, 1);
        assert_eq!(stats.by_plugin["A"], 3);
        assert!(stats.last_run_at.is_some());

        let stats = repo.statistics(SyncDirection::Import).unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.failure, 1);
    }
}
