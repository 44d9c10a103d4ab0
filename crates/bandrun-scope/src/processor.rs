//! Group processor - break detection and scope state
//!
//! Consumes an already-sorted record stream one record at a time,
//! classifies each record's break level relative to its predecessor, and
//! tracks the current group key values, page number, and detail count.
//! The engine never sorts; it trusts the stream order.

use bandrun_ast::{BreakClassification, GroupDefinition, Record, Value};
use bandrun_eval::CalcEngine;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Per-record projection of group keys, level-ordered.
type KeyProjection = SmallVec<[(u32, Value); 4]>;

/// The per-record result handed to the rendering collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    /// The processed record
    pub record: Record,
    /// Break classifications for this record: empty for the first record
    /// of a run, otherwise exactly one entry
    pub group_changes: Vec<BreakClassification>,
    /// Group key values after this record, by level
    pub group_values: BTreeMap<u32, Value>,
    /// True iff a group break occurred (never on the first record or on a
    /// plain detail change)
    pub should_reset_variables: bool,
}

/// One item of [`GroupProcessor::process_stream`].
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedRecord {
    /// The per-record outcome
    pub outcome: RecordOutcome,
    /// Strictly monotonic processing timestamp
    pub processed_at: DateTime<Utc>,
}

/// Scope state machine over an ordered record stream.
///
/// With no group definitions every record is a plain detail record; with
/// definitions, breaks are classified level-by-level. All mutation goes
/// through the methods below; one processor serves exactly one run at a
/// time.
#[derive(Clone)]
pub struct GroupProcessor {
    engine: CalcEngine,
    /// Sorted ascending by level; duplicate levels keep declaration order
    definitions: Vec<GroupDefinition>,
    current_group_key_values: BTreeMap<u32, Value>,
    previous_record: Option<Record>,
    page_number: u32,
    detail_count: u64,
    break_count: u64,
}

impl GroupProcessor {
    /// Create a processor over the given group definitions.
    ///
    /// Definitions are stored sorted ascending by level (stable, so
    /// duplicate levels preserve declaration order).
    pub fn new(mut definitions: Vec<GroupDefinition>, engine: CalcEngine) -> Self {
        definitions.sort_by_key(|d| d.level);
        Self {
            engine,
            definitions,
            current_group_key_values: BTreeMap::new(),
            previous_record: None,
            page_number: 1,
            detail_count: 0,
            break_count: 0,
        }
    }

    /// The group definitions, sorted ascending by level
    pub fn definitions(&self) -> &[GroupDefinition] {
        &self.definitions
    }

    /// Current group key values by level
    pub fn group_values(&self) -> &BTreeMap<u32, Value> {
        &self.current_group_key_values
    }

    /// Current page number (starts at 1)
    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    /// Number of detail records processed since the last reset
    pub fn detail_count(&self) -> u64 {
        self.detail_count
    }

    /// Number of group breaks observed since the last reset
    pub fn break_count(&self) -> u64 {
        self.break_count
    }

    /// The most recently processed record
    pub fn previous_record(&self) -> Option<&Record> {
        self.previous_record.as_ref()
    }

    /// Project a record onto the group key expressions.
    ///
    /// A failing key expression degrades to `Null` instead of propagating:
    /// a bad expression degrades grouping quality, it does not halt the
    /// report. This trade-off is deliberate; do not tighten it.
    fn project_keys(&self, record: &Record) -> KeyProjection {
        self.definitions
            .iter()
            .map(|definition| {
                let key = match self.engine.evaluate(&definition.key_expression, record) {
                    Ok(value) => value,
                    Err(err) => {
                        log::warn!(
                            "group key {:?} (level {}) failed to evaluate, degrading to null: {}",
                            definition.name,
                            definition.level,
                            err
                        );
                        Value::Null
                    }
                };
                (definition.level, key)
            })
            .collect()
    }

    /// Record a detail record: store its group key projection, replace the
    /// previous record, and bump the detail count.
    pub fn update_detail(&mut self, record: &Record) {
        let projected = self.project_keys(record);
        self.current_group_key_values = projected.into_iter().collect();
        self.previous_record = Some(record.clone());
        self.detail_count += 1;
    }

    /// Pure lookahead: classify `next_record` against the current scope
    /// without mutating anything. Idempotent - repeated calls with the
    /// same record always return the same classification.
    ///
    /// `None` means there is no prior record to compare against (no break,
    /// distinct from ordinary no-change). A record literally identical to
    /// its predecessor is `NoChange`; same keys but a different record is
    /// `DetailChange`; differing keys report the smallest differing level
    /// only, lower-level differences are implied.
    pub fn check_group_break(&self, next_record: &Record) -> Option<BreakClassification> {
        self.previous_record.as_ref()?;

        if let Some(level) = self.first_differing_level(next_record) {
            return Some(BreakClassification::GroupChange(level));
        }

        if self.previous_record.as_ref() == Some(next_record) {
            Some(BreakClassification::NoChange)
        } else {
            Some(BreakClassification::DetailChange)
        }
    }

    /// Alias for [`check_group_break`](Self::check_group_break), the name
    /// used by callers thinking in scopes rather than groups.
    pub fn check_scope_change(&self, next_record: &Record) -> Option<BreakClassification> {
        self.check_group_break(next_record)
    }

    /// Smallest level whose key projection differs from the current one
    fn first_differing_level(&self, next_record: &Record) -> Option<u32> {
        // Collapse duplicate levels the same way update_detail stores them,
        // then compare ascending; the first difference is the break level
        let projected: BTreeMap<u32, Value> = self.project_keys(next_record).into_iter().collect();
        projected.into_iter().find_map(|(level, key)| {
            match self.current_group_key_values.get(&level) {
                Some(current) if *current == key => None,
                _ => Some(level),
            }
        })
    }

    /// Process one record: classify, then fold it into the scope state.
    ///
    /// The first record of a run yields an empty change list; every later
    /// record inside the same group yields `DetailChange`; a key change
    /// yields a single `GroupChange` at the smallest differing level.
    pub fn process_record(&mut self, record: Record) -> RecordOutcome {
        let group_changes: Vec<BreakClassification> = if self.previous_record.is_none() {
            Vec::new()
        } else {
            match self.first_differing_level(&record) {
                Some(level) => vec![BreakClassification::GroupChange(level)],
                None => vec![BreakClassification::DetailChange],
            }
        };

        let should_reset_variables = group_changes.iter().any(BreakClassification::is_group_change);
        if should_reset_variables {
            self.break_count += 1;
        }
        log::trace!(
            "record #{}: {:?}",
            self.detail_count + 1,
            group_changes
        );

        self.update_detail(&record);

        RecordOutcome {
            record,
            group_changes,
            group_values: self.current_group_key_values.clone(),
            should_reset_variables,
        }
    }

    /// Advance to the next page; all other state is preserved
    pub fn page_break(&mut self) {
        self.page_number += 1;
        log::debug!("page break -> page {}", self.page_number);
    }

    /// Clear the scan state: group key values, previous record, detail
    /// count, and break counter. Definitions (and the page number) are
    /// preserved.
    pub fn reset(&mut self) {
        self.current_group_key_values.clear();
        self.previous_record = None;
        self.detail_count = 0;
        self.break_count = 0;
    }

    /// Lazily process a whole record stream.
    ///
    /// The returned iterator borrows the processor mutably: it is
    /// single-pass, in-order, and non-restartable, because scope
    /// transitions are stateful and sequential. Each item carries a
    /// strictly monotonic `processed_at` timestamp.
    pub fn process_stream<I>(&mut self, records: I) -> RecordStream<'_, I::IntoIter>
    where
        I: IntoIterator<Item = Record>,
    {
        RecordStream {
            processor: self,
            records: records.into_iter(),
            last_timestamp: None,
        }
    }
}

/// Lazy, single-pass stream of per-record results.
///
/// Produced by [`GroupProcessor::process_stream`]; holds the processor
/// mutably for its whole lifetime.
pub struct RecordStream<'a, I> {
    processor: &'a mut GroupProcessor,
    records: I,
    last_timestamp: Option<DateTime<Utc>>,
}

impl<I> RecordStream<'_, I> {
    /// Next strictly-monotonic timestamp; clock regressions clamp forward.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }
}

impl<I> Iterator for RecordStream<'_, I>
where
    I: Iterator<Item = Record>,
{
    type Item = ProcessedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        let outcome = self.processor.process_record(record);
        Some(ProcessedRecord {
            outcome,
            processed_at: self.next_timestamp(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandrun_ast::Expression;
    use pretty_assertions::assert_eq;

    fn record(fields: &[(&str, &str)]) -> Record {
        fields
            .iter()
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect()
    }

    fn sales_processor() -> GroupProcessor {
        let definitions = vec![
            GroupDefinition::new("region", 1, Expression::field("region")),
            GroupDefinition::new("category", 2, Expression::field("category")),
        ];
        GroupProcessor::new(definitions, CalcEngine::new())
    }

    #[test]
    fn test_definitions_sorted_by_level() {
        let definitions = vec![
            GroupDefinition::new("category", 2, Expression::field("category")),
            GroupDefinition::new("region", 1, Expression::field("region")),
        ];
        let processor = GroupProcessor::new(definitions, CalcEngine::new());
        let levels: Vec<u32> = processor.definitions().iter().map(|d| d.level).collect();
        assert_eq!(levels, [1, 2]);
    }

    #[test]
    fn test_region_category_scenario() {
        let mut processor = sales_processor();
        let records = [
            record(&[("region", "West"), ("category", "Electronics"), ("id", "1")]),
            record(&[("region", "West"), ("category", "Electronics"), ("id", "2")]),
            record(&[("region", "West"), ("category", "Books"), ("id", "3")]),
            record(&[("region", "East"), ("category", "Electronics"), ("id", "4")]),
        ];

        let changes: Vec<Vec<BreakClassification>> = records
            .into_iter()
            .map(|r| processor.process_record(r).group_changes)
            .collect();

        assert_eq!(
            changes,
            vec![
                vec![],
                vec![BreakClassification::DetailChange],
                vec![BreakClassification::GroupChange(2)],
                vec![BreakClassification::GroupChange(1)],
            ]
        );
    }

    #[test]
    fn test_simultaneous_breaks_report_smallest_level() {
        let mut processor = sales_processor();
        processor.process_record(record(&[("region", "West"), ("category", "Books")]));

        // Both region (1) and category (2) change; only level 1 reported
        let outcome =
            processor.process_record(record(&[("region", "East"), ("category", "Games")]));
        assert_eq!(
            outcome.group_changes,
            vec![BreakClassification::GroupChange(1)]
        );
    }

    #[test]
    fn test_should_reset_variables_only_on_group_change() {
        let mut processor = sales_processor();

        let first = processor.process_record(record(&[("region", "W"), ("category", "C")]));
        assert!(!first.should_reset_variables);

        let detail = processor.process_record(record(&[
            ("region", "W"),
            ("category", "C"),
            ("extra", "x"),
        ]));
        assert!(!detail.should_reset_variables);

        let brk = processor.process_record(record(&[("region", "E"), ("category", "C")]));
        assert!(brk.should_reset_variables);
    }

    #[test]
    fn test_check_group_break_is_pure_and_idempotent() {
        let mut processor = sales_processor();
        processor.process_record(record(&[("region", "West"), ("category", "Books")]));

        let next = record(&[("region", "East"), ("category", "Books")]);
        let before = processor.group_values().clone();

        let first = processor.check_group_break(&next);
        let second = processor.check_group_break(&next);
        assert_eq!(first, second);
        assert_eq!(first, Some(BreakClassification::GroupChange(1)));
        assert_eq!(processor.group_values(), &before);
        assert_eq!(processor.detail_count(), 1);
    }

    #[test]
    fn test_check_group_break_distinguishes_identical_records() {
        let mut processor = sales_processor();
        let rec = record(&[("region", "West"), ("category", "Books"), ("amount", "5")]);
        processor.process_record(rec.clone());

        // Literally identical record
        assert_eq!(
            processor.check_group_break(&rec),
            Some(BreakClassification::NoChange)
        );

        // Same groups, different detail field
        let sibling = record(&[("region", "West"), ("category", "Books"), ("amount", "9")]);
        assert_eq!(
            processor.check_group_break(&sibling),
            Some(BreakClassification::DetailChange)
        );
    }

    #[test]
    fn test_no_prior_record_is_no_break() {
        let processor = sales_processor();
        let rec = record(&[("region", "West"), ("category", "Books")]);
        // Distinct from an ordinary NoChange: there is nothing to compare
        assert_eq!(processor.check_group_break(&rec), None);
    }

    #[test]
    fn test_failing_key_expression_degrades_to_null() {
        let definitions = vec![GroupDefinition::new(
            "region",
            1,
            Expression::field("missing_field"),
        )];
        let mut processor = GroupProcessor::new(definitions, CalcEngine::new());

        let outcome = processor.process_record(record(&[("other", "x")]));
        assert_eq!(outcome.group_values.get(&1), Some(&Value::Null));

        // Second record also projects null: same key, plain detail change
        let outcome = processor.process_record(record(&[("other", "y")]));
        assert_eq!(
            outcome.group_changes,
            vec![BreakClassification::DetailChange]
        );
    }

    #[test]
    fn test_no_groups_means_detail_only() {
        let mut processor = GroupProcessor::new(Vec::new(), CalcEngine::new());

        let first = processor.process_record(record(&[("id", "1")]));
        assert!(first.group_changes.is_empty());

        let second = processor.process_record(record(&[("id", "2")]));
        assert_eq!(
            second.group_changes,
            vec![BreakClassification::DetailChange]
        );
        assert!(!second.should_reset_variables);
    }

    #[test]
    fn test_page_break_preserves_other_state() {
        let mut processor = sales_processor();
        processor.process_record(record(&[("region", "West"), ("category", "Books")]));

        assert_eq!(processor.page_number(), 1);
        processor.page_break();
        assert_eq!(processor.page_number(), 2);
        assert_eq!(processor.detail_count(), 1);
        assert!(processor.previous_record().is_some());
    }

    #[test]
    fn test_reset_clears_scan_state() {
        let mut processor = sales_processor();
        processor.process_record(record(&[("region", "West"), ("category", "Books")]));
        processor.process_record(record(&[("region", "East"), ("category", "Books")]));
        processor.page_break();

        processor.reset();
        assert!(processor.group_values().is_empty());
        assert!(processor.previous_record().is_none());
        assert_eq!(processor.detail_count(), 0);
        assert_eq!(processor.break_count(), 0);
        // Definitions and page survive
        assert_eq!(processor.definitions().len(), 2);
        assert_eq!(processor.page_number(), 2);
    }

    #[test]
    fn test_process_stream_is_lazy_in_order_and_monotonic() {
        let mut processor = sales_processor();
        let records = vec![
            record(&[("region", "W"), ("category", "A")]),
            record(&[("region", "W"), ("category", "B")]),
            record(&[("region", "E"), ("category", "B")]),
        ];

        let results: Vec<ProcessedRecord> = processor.process_stream(records).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].outcome.group_changes.is_empty());
        assert_eq!(
            results[1].outcome.group_changes,
            vec![BreakClassification::GroupChange(2)]
        );
        assert_eq!(
            results[2].outcome.group_changes,
            vec![BreakClassification::GroupChange(1)]
        );

        for pair in results.windows(2) {
            assert!(pair[0].processed_at < pair[1].processed_at);
        }
    }
}
