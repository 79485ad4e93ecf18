//! Runtime reconstruction from audit events
//!
//! Turns a possibly incomplete, possibly duplicated start/stop stream into
//! non-overlapping runtime intervals clipped to the query window. Every
//! irregularity degrades to a flag; only a malformed timestamp is fatal,
//! and only for the one resource whose stream contains it.

use crate::error::{EngineError, Result};
use crate::models::{AuditEvent, AuditEventKind, Resource, ResourceState, RuntimeInterval, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Irregularities observed while reconstructing runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionFlag {
    /// No audit events at all; runtime is unknown, not zero
    NoAuditCoverage,
    /// A start while an interval was already open
    RedundantStart,
    /// A stop with no open interval
    OrphanStop,
    /// An event kind that does not affect runtime
    UnknownEventKind,
    /// Events arrived out of timestamp order and were sorted
    Reordered,
    /// The stream ended with an open interval, closed at the window end
    OpenAtWindowEnd,
    /// The provider reports the resource stopped but the stream ends open
    StateMismatch,
    /// An event for a different resource was ignored
    ForeignEvent,
}

/// Result of reconstructing one resource's runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconstruction {
    pub resource_id: String,
    pub intervals: Vec<RuntimeInterval>,
    pub total_hours: f64,
    pub has_audit_coverage: bool,
    pub flags: BTreeSet<ReconstructionFlag>,
}

/// Rebuilds runtime intervals from audit events
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeReconstructor;

impl RuntimeReconstructor {
    pub fn new() -> Self {
        Self
    }

    /// Reconstruct runtime for `resource` within `window`.
    ///
    /// `now` bounds an interval that is still open when the stream ends, so a
    /// running resource contributes runtime up to the present and never into
    /// the future.
    pub fn reconstruct(
        &self,
        resource: &Resource,
        events: &[AuditEvent],
        window: &TimeWindow,
        now: DateTime<Utc>,
    ) -> Result<Reconstruction> {
        let mut flags = BTreeSet::new();
        let mut parsed: Vec<(DateTime<Utc>, AuditEventKind)> = Vec::with_capacity(events.len());

        for event in events {
            if event.resource_id != resource.id {
                flags.insert(ReconstructionFlag::ForeignEvent);
                continue;
            }
            parsed.push((parse_timestamp(&event.timestamp)?, event.kind));
        }

        if parsed.is_empty() {
            flags.insert(ReconstructionFlag::NoAuditCoverage);
            return Ok(Reconstruction {
                resource_id: resource.id.clone(),
                intervals: Vec::new(),
                total_hours: 0.0,
                has_audit_coverage: false,
                flags,
            });
        }

        if !parsed.windows(2).all(|w| w[0].0 <= w[1].0) {
            flags.insert(ReconstructionFlag::Reordered);
            // stable: same-instant events keep their log order
            parsed.sort_by_key(|(ts, _)| *ts);
        }

        let mut open: Option<DateTime<Utc>> = None;
        let mut spans: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();

        for (ts, kind) in parsed {
            match kind {
                AuditEventKind::Start => {
                    if open.is_some() {
                        flags.insert(ReconstructionFlag::RedundantStart);
                    } else {
                        open = Some(ts);
                    }
                }
                AuditEventKind::Stop => match open.take() {
                    Some(start) => spans.push((start, ts)),
                    None => {
                        flags.insert(ReconstructionFlag::OrphanStop);
                    }
                },
                AuditEventKind::Other => {
                    flags.insert(ReconstructionFlag::UnknownEventKind);
                }
            }
        }

        if let Some(start) = open {
            flags.insert(ReconstructionFlag::OpenAtWindowEnd);
            if resource.state == ResourceState::Stopped {
                flags.insert(ReconstructionFlag::StateMismatch);
            }
            let end = window.to.min(now);
            if end > start {
                spans.push((start, end));
            }
        }

        let clipped: Vec<(DateTime<Utc>, DateTime<Utc>)> = spans
            .into_iter()
            .filter_map(|(start, end)| window.clip(start, end))
            .collect();

        let intervals: Vec<RuntimeInterval> = merge_spans(clipped)
            .into_iter()
            .map(|(start, end)| RuntimeInterval {
                resource_id: resource.id.clone(),
                start,
                end,
            })
            .collect();

        let total_hours = intervals.iter().map(RuntimeInterval::hours).sum();

        Ok(Reconstruction {
            resource_id: resource.id.clone(),
            intervals,
            total_hours,
            has_audit_coverage: true,
            flags,
        })
    }
}

/// Parse an RFC 3339 audit timestamp
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| EngineError::InvalidInput(format!("malformed audit timestamp {:?}: {}", raw, e)))
}

/// Merge overlapping or touching spans so no instant is counted twice
fn merge_spans(
    mut spans: Vec<(DateTime<Utc>, DateTime<Utc>)>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    spans.sort_by_key(|(start, _)| *start);

    let mut merged: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                if end > *last_end {
                    *last_end = end;
                }
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}
