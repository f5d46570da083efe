use anyhow::{anyhow, Error};
use std::str::FromStr;

pub const DEFAULT_EPHEMERAL_PREFIXES: &[&str] = &["Waiting for market open:", "Live SPX Price"];

const TS_OPEN: &str = "[TS:";

/// Splits a leading `[TS:<value>]` marker off a line.
///
/// Returns the marker value (if any) and the display text with the whitespace
/// after the marker removed. A marker with an empty value is not a marker.
pub fn split_timestamp(line: &str) -> (Option<&str>, &str) {
    if let Some(rest) = line.strip_prefix(TS_OPEN) {
        if let Some(end) = rest.find(']') {
            if end > 0 {
                return (Some(&rest[..end]), rest[end + 1..].trim_start());
            }
        }
    }
    (None, line)
}

pub fn strip_timestamp(line: &str) -> &str {
    split_timestamp(line).1
}

/// Whether the view should follow the tail after moving from `prev` to `next`.
pub fn log_grew(prev: &[String], next: &[String]) -> bool {
    next.len() > prev.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollapseMode {
    /// Keep only the most recent ephemeral line of the batch, whatever its category.
    #[default]
    Global,
    /// Keep the most recent line of each ephemeral category.
    PerCategory,
}

impl FromStr for CollapseMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(CollapseMode::Global),
            "per_category" | "per-category" => Ok(CollapseMode::PerCategory),
            other => Err(anyhow!("unknown collapse mode '{}'", other)),
        }
    }
}

/// Prefixes identifying lines that supersede their predecessors (countdowns, price ticks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralTable {
    prefixes: Vec<String>,
}

impl Default for EphemeralTable {
    fn default() -> Self {
        Self::new(DEFAULT_EPHEMERAL_PREFIXES.iter().copied())
    }
}

impl EphemeralTable {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Index of the first prefix matching the line's text once the timestamp is stripped.
    pub fn category(&self, line: &str) -> Option<usize> {
        let text = strip_timestamp(line);
        self.prefixes
            .iter()
            .position(|prefix| text.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogReconciler {
    table: EphemeralTable,
    mode: CollapseMode,
}

impl LogReconciler {
    pub fn new(table: EphemeralTable, mode: CollapseMode) -> Self {
        Self { table, mode }
    }

    pub fn table(&self) -> &EphemeralTable {
        &self.table
    }

    pub fn mode(&self) -> CollapseMode {
        self.mode
    }

    /// Collapses ephemeral lines of one output batch.
    ///
    /// Non-ephemeral lines keep their order; the surviving ephemeral line(s) go
    /// last. A batch without ephemeral lines comes back unchanged, timestamps
    /// included.
    pub fn reconcile(&self, batch: &[String]) -> Vec<String> {
        match self.mode {
            CollapseMode::Global => self.collapse_global(batch),
            CollapseMode::PerCategory => self.collapse_per_category(batch),
        }
    }

    fn collapse_global(&self, batch: &[String]) -> Vec<String> {
        let mut kept = Vec::with_capacity(batch.len());
        let mut latest = None;
        for line in batch {
            if self.table.category(line).is_some() {
                latest = Some(line);
            } else {
                kept.push(line.clone());
            }
        }
        match latest {
            Some(line) => {
                kept.push(line.clone());
                kept
            }
            None => batch.to_vec(),
        }
    }

    fn collapse_per_category(&self, batch: &[String]) -> Vec<String> {
        let mut latest: Vec<Option<usize>> = vec![None; self.table.prefixes.len()];
        let mut kept = Vec::with_capacity(batch.len());
        for (idx, line) in batch.iter().enumerate() {
            match self.table.category(line) {
                Some(category) => latest[category] = Some(idx),
                None => kept.push(line.clone()),
            }
        }

        let mut tails: Vec<usize> = latest.into_iter().flatten().collect();
        if tails.is_empty() {
            return batch.to_vec();
        }
        tails.sort_unstable();
        kept.extend(tails.into_iter().map(|idx| batch[idx].clone()));
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strips_leading_marker_only() {
        assert_eq!(strip_timestamp("[TS:2025-07-01 09:29:58] hello"), "hello");
        assert_eq!(strip_timestamp("[TS:1]hello"), "hello");
        assert_eq!(strip_timestamp("hello [TS:1]"), "hello [TS:1]");
        assert_eq!(strip_timestamp("[TS:] hello"), "[TS:] hello");
        assert_eq!(strip_timestamp("[TS:1 hello"), "[TS:1 hello");
    }

    #[test]
    fn split_exposes_marker_value() {
        assert_eq!(
            split_timestamp("[TS:2025-07-01 09:30:00]   Market is open!"),
            (Some("2025-07-01 09:30:00"), "Market is open!")
        );
        assert_eq!(split_timestamp("plain"), (None, "plain"));
    }

    #[test]
    fn batch_without_ephemeral_lines_is_identity() {
        let reconciler = LogReconciler::default();
        let batch = lines(&["[TS:1] hello", "[TS:2] Connected", "no marker"]);
        assert_eq!(reconciler.reconcile(&batch), batch);
        assert!(reconciler.reconcile(&[]).is_empty());
    }

    #[test]
    fn countdown_collapses_to_latest() {
        let reconciler = LogReconciler::default();
        let batch = lines(&[
            "[TS:1] hello",
            "[TS:2] Waiting for market open: 10s",
            "[TS:3] Waiting for market open: 5s",
        ]);

        let reconciled = reconciler.reconcile(&batch);
        assert_eq!(
            reconciled,
            lines(&["[TS:1] hello", "[TS:3] Waiting for market open: 5s"])
        );
        let shown: Vec<&str> = reconciled.iter().map(|l| strip_timestamp(l)).collect();
        assert_eq!(shown, vec!["hello", "Waiting for market open: 5s"]);
    }

    #[test]
    fn global_mode_keeps_single_latest_ephemeral_across_categories() {
        let reconciler = LogReconciler::default();
        let batch = lines(&[
            "Waiting for market open: 00:00:02 remaining...",
            "Staged 2 order(s).",
            "Live SPX Price: 6001.5",
            "Waiting for market open: 00:00:01 remaining...",
            "Market is open!",
            "Live SPX Price: 6002.0",
        ]);

        assert_eq!(
            reconciler.reconcile(&batch),
            lines(&[
                "Staged 2 order(s).",
                "Market is open!",
                "Live SPX Price: 6002.0"
            ])
        );
    }

    #[test]
    fn per_category_mode_keeps_latest_of_each_in_order() {
        let reconciler = LogReconciler::new(EphemeralTable::default(), CollapseMode::PerCategory);
        let batch = lines(&[
            "Live SPX Price: 6001.5",
            "Waiting for market open: 2s",
            "Staged 2 order(s).",
            "Live SPX Price: 6002.0",
            "Waiting for market open: 1s",
        ]);

        assert_eq!(
            reconciler.reconcile(&batch),
            lines(&[
                "Staged 2 order(s).",
                "Live SPX Price: 6002.0",
                "Waiting for market open: 1s"
            ])
        );
    }

    #[test]
    fn reconcile_is_idempotent() {
        let batch = lines(&[
            "[TS:1] a",
            "[TS:2] Live SPX Price: 1",
            "[TS:3] b",
            "[TS:4] Waiting for market open: 9s",
            "[TS:5] Live SPX Price: 2",
            "[TS:6] c",
        ]);
        for mode in [CollapseMode::Global, CollapseMode::PerCategory] {
            let reconciler = LogReconciler::new(EphemeralTable::default(), mode);
            let once = reconciler.reconcile(&batch);
            assert_eq!(reconciler.reconcile(&once), once, "{:?}", mode);
        }
    }

    #[test]
    fn ephemeral_tail_follows_non_ephemeral_lines_in_order() {
        let reconciler = LogReconciler::default();
        let batch = lines(&[
            "Live SPX Price: 1",
            "first",
            "Waiting for market open: 3s",
            "second",
            "third",
        ]);

        let reconciled = reconciler.reconcile(&batch);
        assert_eq!(reconciled.last().unwrap(), "Waiting for market open: 3s");
        assert_eq!(&reconciled[..3], &lines(&["first", "second", "third"])[..]);
    }

    #[test]
    fn custom_table_drives_classification() {
        let table = EphemeralTable::new(vec!["Heartbeat", ""]);
        assert_eq!(table.prefixes(), &["Heartbeat".to_string()]);
        let reconciler = LogReconciler::new(table, CollapseMode::Global);
        let batch = lines(&["Heartbeat 1", "Waiting for market open: 1s", "Heartbeat 2"]);

        assert_eq!(
            reconciler.reconcile(&batch),
            lines(&["Waiting for market open: 1s", "Heartbeat 2"])
        );
    }

    #[test]
    fn log_grew_compares_lengths() {
        let prev = lines(&["a", "Waiting for market open: 2s"]);
        assert!(!log_grew(&prev, &lines(&["a", "Waiting for market open: 1s"])));
        assert!(log_grew(&prev, &lines(&["a", "b", "Waiting for market open: 1s"])));
        assert!(!log_grew(&prev, &[]));
    }

    #[test]
    fn collapse_mode_parses() {
        assert_eq!("global".parse::<CollapseMode>().unwrap(), CollapseMode::Global);
        assert_eq!(
            " Per_Category ".parse::<CollapseMode>().unwrap(),
            CollapseMode::PerCategory
        );
        assert!("latest".parse::<CollapseMode>().is_err());
    }
}
