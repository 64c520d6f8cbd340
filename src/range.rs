//! Row-range filter expressions.
//!
//! Grammar (1-based, comma-separated, composable):
//! `7` · `1-5` · `even` · `odd` · `all`, e.g. `1-5,8,10-15`.
//! The selected rows always come back in ascending file order, without duplicates.

use std::collections::BTreeSet;

use crate::error::{AutogenError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum RangePart {
    All,
    Even,
    Odd,
    Single(usize),
    Span(usize, usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    parts: Vec<RangePart>,
}

impl RowFilter {
    pub fn all() -> Self {
        Self {
            parts: vec![RangePart::All],
        }
    }

    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Ok(Self::all());
        }

        let mut parts = Vec::new();
        for raw in trimmed.split(',') {
            let part = raw.trim();
            if part.is_empty() {
                return Err(invalid(expression, "empty item"));
            }
            let lower = part.to_ascii_lowercase();
            let parsed = match lower.as_str() {
                "all" => RangePart::All,
                "even" => RangePart::Even,
                "odd" => RangePart::Odd,
                _ => match part.split_once('-') {
                    Some((start, end)) => {
                        let start = parse_index(expression, start)?;
                        let end = parse_index(expression, end)?;
                        if start > end {
                            return Err(invalid(
                                expression,
                                &format!("range {}-{} is reversed", start, end),
                            ));
                        }
                        RangePart::Span(start, end)
                    }
                    None => RangePart::Single(parse_index(expression, part)?),
                },
            };
            parts.push(parsed);
        }

        Ok(Self { parts })
    }

    /// Zero-based indices selected out of `total` rows, ascending.
    pub fn select(&self, total: usize) -> Vec<usize> {
        let mut selected = BTreeSet::new();
        for part in &self.parts {
            match *part {
                RangePart::All => selected.extend(0..total),
                RangePart::Even => selected.extend((1..total).step_by(2)),
                RangePart::Odd => selected.extend((0..total).step_by(2)),
                RangePart::Single(n) => {
                    if n <= total {
                        selected.insert(n - 1);
                    }
                }
                RangePart::Span(start, end) => {
                    let end = end.min(total);
                    if start <= end {
                        selected.extend(start - 1..end);
                    }
                }
            }
        }
        selected.into_iter().collect()
    }

    /// Keep the selected rows, paired with their zero-based position in `rows`.
    pub fn apply<T: Clone>(&self, rows: &[T]) -> Vec<(usize, T)> {
        self.select(rows.len())
            .into_iter()
            .map(|i| (i, rows[i].clone()))
            .collect()
    }
}

fn parse_index(expression: &str, text: &str) -> Result<usize> {
    let value: usize = text
        .trim()
        .parse()
        .map_err(|_| invalid(expression, &format!("'{}' is not a row number", text.trim())))?;
    if value == 0 {
        return Err(invalid(expression, "row numbers start at 1"));
    }
    Ok(value)
}

fn invalid(expression: &str, reason: &str) -> AutogenError {
    AutogenError::configuration(format!("invalid row range '{}': {}", expression, reason))
}
