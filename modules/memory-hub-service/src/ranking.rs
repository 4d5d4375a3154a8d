//! Normalization and ordering of fan-out hits.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};
use memory_hub_types::{ResultRecord, SourceKind};
use std::cmp::Ordering;

use crate::sources::RawHit;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse the timestamp shapes the backends emit. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Start of the trailing `days_back`-day window, or `None` when it would
/// reach before year 1.
pub fn lookback_cutoff(days_back: u32) -> Option<DateTime<Utc>> {
    let window = Duration::try_days(i64::from(days_back))?;
    Utc::now()
        .checked_sub_signed(window)
        .filter(|cutoff| cutoff.year() >= 1)
}

/// Fill defaults for a raw adapter hit.
pub fn normalize(source: SourceKind, hit: RawHit) -> ResultRecord {
    let relevance = match hit.relevance {
        Some(r) if r.is_nan() => 0.0,
        Some(r) => r,
        None => 1.0,
    };
    ResultRecord {
        source,
        content: hit.content,
        timestamp: hit.timestamp.as_deref().and_then(parse_timestamp),
        metadata: hit.metadata,
        relevance,
    }
}

/// Relevance desc, timestamp desc with absent last, then source order and
/// content so equal inputs always produce the same output.
pub fn compare(a: &ResultRecord, b: &ResultRecord) -> Ordering {
    b.relevance
        .total_cmp(&a.relevance)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.content.cmp(&b.content))
}

/// Sort the full set, then truncate.
pub fn rank(mut records: Vec<ResultRecord>, limit: usize) -> Vec<ResultRecord> {
    records.sort_by(compare);
    records.truncate(limit);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use memory_hub_types::Metadata;

    fn record(source: SourceKind, content: &str, relevance: f64, ts: Option<i64>) -> ResultRecord {
        ResultRecord {
            source,
            content: content.to_string(),
            timestamp: ts.map(|secs| Utc.timestamp_opt(secs, 0).unwrap()),
            metadata: Metadata::new(),
            relevance,
        }
    }

    #[test]
    fn test_parse_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2026, 10, 15, 9, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2026-10-15T09:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-10-15T11:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-10-15 09:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-10-15T09:30:00.000"), Some(expected));
        assert_eq!(parse_timestamp("last tuesday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_lookback_cutoff_bounds() {
        let week = lookback_cutoff(7).unwrap();
        let span = Utc::now() - week;
        assert!(span >= Duration::days(7) && span < Duration::days(8));
        assert!(lookback_cutoff(0).is_some());
        assert!(lookback_cutoff(1_000_000).is_none());
        assert!(lookback_cutoff(u32::MAX).is_none());
    }

    #[test]
    fn test_normalize_defaults() {
        let hit = RawHit {
            content: "plain".to_string(),
            timestamp: Some("garbage".to_string()),
            ..RawHit::default()
        };
        let record = normalize(SourceKind::Graph, hit);
        assert_eq!(record.relevance, 1.0);
        assert!(record.timestamp.is_none());
        assert!(record.metadata.is_empty());

        let nan = RawHit {
            content: "nan".to_string(),
            relevance: Some(f64::NAN),
            ..RawHit::default()
        };
        assert_eq!(normalize(SourceKind::Omi, nan).relevance, 0.0);
    }

    #[test]
    fn test_relevance_then_recency() {
        let ranked = rank(
            vec![
                record(SourceKind::Local, "old strong", 0.9, Some(100)),
                record(SourceKind::Omi, "undated strong", 0.9, None),
                record(SourceKind::Letta, "weak", 0.2, Some(900)),
                record(SourceKind::Graph, "new strong", 0.9, Some(500)),
            ],
            10,
        );
        let order: Vec<&str> = ranked.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(order, vec!["new strong", "old strong", "undated strong", "weak"]);
    }

    #[test]
    fn test_ties_break_deterministically() {
        let a = record(SourceKind::Letta, "b", 1.0, None);
        let b = record(SourceKind::Omi, "z", 1.0, None);
        let c = record(SourceKind::Omi, "a", 1.0, None);
        let forward = rank(vec![a.clone(), b.clone(), c.clone()], 3);
        let backward = rank(vec![c, b, a], 3);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].content, "a");
        assert_eq!(forward[2].source, SourceKind::Letta);
    }

    #[test]
    fn test_truncates_after_sorting() {
        let ranked = rank(
            vec![
                record(SourceKind::Omi, "low", 0.1, None),
                record(SourceKind::Omi, "high", 5.0, None),
                record(SourceKind::Omi, "mid", 1.0, None),
            ],
            2,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].content, "high");
        assert_eq!(ranked[1].content, "mid");
        assert!(rank(ranked, 0).is_empty());
    }
}
