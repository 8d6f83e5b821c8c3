use std::cmp::Reverse;

use bson::Bson;
use flint_engine::{CollectionHandle, IndexValue, IndexingOptions};
use flint_query::{Expression, Sort, SortDirection};

use super::plan::{
    bson_literal, Explain, IndexRange, QueryPlan, ReadPlan, ScanDirection, ScanRange,
    MAX_SENTINEL, NULL_SENTINEL, READ_PRIMARY, READ_SECONDARY,
};

/// Compiles a predicate tree plus sort into an index range plan.
pub struct Planner<'a> {
    handle: &'a CollectionHandle,
    options: &'a IndexingOptions,
}

struct Candidate {
    field: String,
    range: ScanRange,
    consumed: Vec<usize>,
}

impl Candidate {
    fn narrowness(&self) -> u8 {
        match &self.range {
            ScanRange::Eq(_) => 3,
            ScanRange::Range {
                lower: Some(_),
                upper: Some(_),
            } => 2,
            ScanRange::Range { .. } => 1,
            ScanRange::Full => 0,
        }
    }
}

impl<'a> Planner<'a> {
    pub fn new(handle: &'a CollectionHandle, options: &'a IndexingOptions) -> Self {
        Self { handle, options }
    }

    pub fn plan(&self, filter: &Expression, sort: &[Sort]) -> QueryPlan {
        if !self.index_readable() {
            let reason = self
                .references_indexed_field(filter)
                .then(|| "index not built".to_string());
            return self.primary_plan(filter, sort, reason);
        }

        match filter {
            Expression::Or(branches) => self.plan_or(filter, branches, sort),
            Expression::And(children) => self.plan_and(filter, children, sort),
            leaf => self.plan_and(filter, std::slice::from_ref(leaf), sort),
        }
    }

    // ── Conjunctions ────────────────────────────────────────────

    /// Flatten same-field leaves into bound tuples, pick one field by
    /// the cost heuristic, leave everything else as residual.
    fn plan_and(&self, original: &Expression, children: &[Expression], sort: &[Sort]) -> QueryPlan {
        let candidates = self.collect_candidates(children);
        let Some(best) = candidates.into_iter().max_by_key(|c| {
            (
                c.consumed.len() == children.len(),
                sort.first().is_some_and(|s| s.field == c.field),
                c.narrowness(),
                Reverse(c.field.clone()),
            )
        }) else {
            return self.primary_plan(original, sort, None);
        };

        // Residual: unconsumed children, plus a raw-equality re-check
        // for string point lookups (collation keys truncate).
        let mut residual: Vec<Expression> = children
            .iter()
            .enumerate()
            .filter(|(i, _)| !best.consumed.contains(i))
            .map(|(_, c)| c.clone())
            .collect();
        if let ScanRange::Eq(value @ Bson::String(_)) = &best.range {
            residual.push(Expression::Eq(best.field.clone(), value.clone()));
        }
        let residual = match residual.len() {
            0 => None,
            1 => Some(residual.pop().unwrap()),
            _ => Some(Expression::And(residual)),
        };

        // Sort pushdown: a single sort key on the planned field rides
        // the scan direction; anything else sorts in memory.
        let (direction, sort_stage) = match sort.first() {
            None => (ScanDirection::Forward, None),
            Some(first) if first.field == best.field && sort.len() == 1 => {
                let dir = match first.direction {
                    SortDirection::Asc => ScanDirection::Forward,
                    SortDirection::Desc => ScanDirection::Reverse,
                };
                (dir, None)
            }
            Some(_) => (ScanDirection::Forward, Some(sort.to_vec())),
        };

        let explain = Explain {
            read_type: READ_SECONDARY,
            field: Some(best.field.clone()),
            key_range: render_range(&best.range),
            reason: None,
        };

        QueryPlan {
            read: ReadPlan::SecondaryIndex {
                ranges: vec![IndexRange {
                    field: best.field,
                    range: best.range,
                }],
                direction,
            },
            residual,
            sort: sort_stage,
            explain,
        }
    }

    fn collect_candidates(&self, children: &[Expression]) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();
        for (i, child) in children.iter().enumerate() {
            let Some((field, value)) = usable_leaf(child) else {
                continue;
            };
            if !self.field_usable(field, value) {
                continue;
            }
            let slot = match candidates.iter_mut().find(|c| c.field == field) {
                Some(slot) => slot,
                None => {
                    candidates.push(Candidate {
                        field: field.to_string(),
                        range: ScanRange::Range {
                            lower: None,
                            upper: None,
                        },
                        consumed: Vec::new(),
                    });
                    candidates.last_mut().unwrap()
                }
            };
            match child {
                Expression::Eq(_, v) => {
                    if !matches!(slot.range, ScanRange::Eq(_)) {
                        // A point lookup supersedes any range bounds;
                        // displaced bounds return to the residual.
                        slot.range = ScanRange::Eq(v.clone());
                        slot.consumed = vec![i];
                    }
                }
                Expression::Gt(_, v) | Expression::Gte(_, v) => {
                    if let ScanRange::Range { lower, .. } = &mut slot.range {
                        if lower.is_none() {
                            *lower = Some((v.clone(), matches!(child, Expression::Gte(..))));
                            slot.consumed.push(i);
                        }
                    }
                }
                Expression::Lt(_, v) | Expression::Lte(_, v) => {
                    if let ScanRange::Range { upper, .. } = &mut slot.range {
                        if upper.is_none() {
                            *upper = Some((v.clone(), matches!(child, Expression::Lte(..))));
                            slot.consumed.push(i);
                        }
                    }
                }
                _ => {}
            }
        }
        candidates
    }

    // ── Disjunctions ────────────────────────────────────────────

    /// Every branch indexable → multi-range union plan; otherwise a
    /// primary scan. The whole disjunction is always re-checked as a
    /// residual, which makes overlapping ranges harmless.
    fn plan_or(&self, original: &Expression, branches: &[Expression], sort: &[Sort]) -> QueryPlan {
        let mut ranges = Vec::with_capacity(branches.len());
        for branch in branches {
            match self.branch_range(branch) {
                Some(range) => ranges.push(range),
                None => return self.primary_plan(original, sort, None),
            }
        }

        let explain = Explain {
            read_type: READ_SECONDARY,
            field: ranges.first().map(|r| r.field.clone()),
            key_range: ranges
                .first()
                .map(|r| render_range(&r.range))
                .unwrap_or_default(),
            reason: None,
        };

        QueryPlan {
            read: ReadPlan::SecondaryIndex {
                ranges,
                direction: ScanDirection::Forward,
            },
            residual: Some(original.clone()),
            sort: (!sort.is_empty()).then(|| sort.to_vec()),
            explain,
        }
    }

    /// Try to compile one OR branch into a single index range.
    fn branch_range(&self, branch: &Expression) -> Option<IndexRange> {
        let children = match branch {
            Expression::And(children) => children.as_slice(),
            leaf => std::slice::from_ref(leaf),
        };
        let candidates = self.collect_candidates(children);
        let best = candidates
            .into_iter()
            .find(|c| c.consumed.len() == children.len())?;
        Some(IndexRange {
            field: best.field,
            range: best.range,
        })
    }

    // ── Fallback ────────────────────────────────────────────────

    fn primary_plan(
        &self,
        filter: &Expression,
        sort: &[Sort],
        reason: Option<String>,
    ) -> QueryPlan {
        QueryPlan {
            read: ReadPlan::PrimaryScan,
            residual: Some(filter.clone()),
            sort: (!sort.is_empty()).then(|| sort.to_vec()),
            explain: Explain {
                read_type: READ_PRIMARY,
                field: None,
                key_range: Vec::new(),
                reason,
            },
        }
    }

    // ── Eligibility ─────────────────────────────────────────────

    fn index_readable(&self) -> bool {
        self.handle.indexes.iter().any(|ix| ix.state.readable())
    }

    fn field_usable(&self, field: &str, value: &Bson) -> bool {
        if !self
            .handle
            .schema
            .is_indexed(field, self.options.index_all)
        {
            return false;
        }
        if let Bson::Double(f) = value {
            if f.is_nan() {
                return false;
            }
        }
        let ty = self.handle.schema.leaf_type(field);
        IndexValue::from_bson(ty, value).is_some()
    }

    fn references_indexed_field(&self, filter: &Expression) -> bool {
        match filter {
            Expression::And(children) | Expression::Or(children) => children
                .iter()
                .any(|c| self.references_indexed_field(c)),
            leaf => leaf.leaf_field().is_some_and(|f| {
                self.handle
                    .schema
                    .is_indexed(f, self.options.index_all)
            }),
        }
    }
}

fn usable_leaf(expr: &Expression) -> Option<(&str, &Bson)> {
    match expr {
        Expression::Eq(f, v)
        | Expression::Gt(f, v)
        | Expression::Gte(f, v)
        | Expression::Lt(f, v)
        | Expression::Lte(f, v) => Some((f, v)),
        _ => None,
    }
}

fn render_range(range: &ScanRange) -> Vec<String> {
    match range {
        ScanRange::Eq(v) => vec![bson_literal(v)],
        ScanRange::Full => vec![NULL_SENTINEL.to_string(), MAX_SENTINEL.to_string()],
        ScanRange::Range { lower, upper } => vec![
            lower
                .as_ref()
                .map(|(v, _)| bson_literal(v))
                .unwrap_or_else(|| NULL_SENTINEL.to_string()),
            upper
                .as_ref()
                .map(|(v, _)| bson_literal(v))
                .unwrap_or_else(|| MAX_SENTINEL.to_string()),
        ],
    }
}
