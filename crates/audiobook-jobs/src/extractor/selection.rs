//! Chapter selection expressions: `all`, `*`, `last`, `-1`, `1,3,5-7`.
//!
//! Numbers are 1-based in the expression and 0-based in the result.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::error::QueueError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Invalid chapter selection format: '{0}'")]
    InvalidFormat(String),

    #[error("Chapter {chapter} out of bounds (1-{total})")]
    OutOfBounds { chapter: usize, total: usize },

    #[error("Range {start}-{end} out of bounds (1-{total})")]
    RangeOutOfBounds {
        start: usize,
        end: usize,
        total: usize,
    },

    #[error("Invalid range: {start}-{end} (start > end)")]
    InvalidRange { start: usize, end: usize },

    #[error("Chapter selection resulted in empty list")]
    Empty,
}

impl From<SelectionError> for QueueError {
    fn from(err: SelectionError) -> Self {
        QueueError::Validation(err.to_string())
    }
}

enum Part {
    Single(usize),
    Range(usize, usize),
}

enum Expression {
    All,
    Last,
    Parts(Vec<Part>),
}

fn parse(expr: &str) -> Result<Expression, SelectionError> {
    let trimmed = expr.trim();
    match trimmed {
        "all" | "*" => return Ok(Expression::All),
        "last" | "-1" => return Ok(Expression::Last),
        _ => {}
    }

    let invalid = || SelectionError::InvalidFormat(expr.to_string());
    let number = |s: &str| s.trim().parse::<usize>().map_err(|_| invalid());

    let mut parts = Vec::new();
    for part in trimmed.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(invalid());
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (number(start)?, number(end)?);
                if start > end {
                    return Err(SelectionError::InvalidRange { start, end });
                }
                parts.push(Part::Range(start, end));
            }
            None => parts.push(Part::Single(number(part)?)),
        }
    }
    Ok(Expression::Parts(parts))
}

/// Checks the syntax of an expression without knowing the chapter count.
pub fn validate_expression(expr: &str) -> Result<(), QueueError> {
    if let Expression::Parts(parts) = parse(expr)? {
        let starts_at_zero = parts
            .iter()
            .any(|part| matches!(part, Part::Single(0) | Part::Range(0, _)));
        if starts_at_zero {
            return Err(QueueError::validation(format!(
                "Chapter numbers start at 1: '{}'",
                expr
            )));
        }
    }
    Ok(())
}

/// Resolves `expr` against `total` chapters into sorted, de-duplicated
/// 0-based indices.
pub fn parse_chapter_selection(expr: &str, total: usize) -> Result<Vec<usize>, SelectionError> {
    let indices: BTreeSet<usize> = match parse(expr)? {
        Expression::All => (0..total).collect(),
        Expression::Last => total.checked_sub(1).into_iter().collect(),
        Expression::Parts(parts) => {
            let mut set = BTreeSet::new();
            for part in parts {
                match part {
                    Part::Single(chapter) => {
                        if chapter < 1 || chapter > total {
                            return Err(SelectionError::OutOfBounds { chapter, total });
                        }
                        set.insert(chapter - 1);
                    }
                    Part::Range(start, end) => {
                        if start < 1 || end > total {
                            return Err(SelectionError::RangeOutOfBounds { start, end, total });
                        }
                        set.extend(start - 1..end);
                    }
                }
            }
            set
        }
    };

    if indices.is_empty() {
        return Err(SelectionError::Empty);
    }
    Ok(indices.into_iter().collect())
}
