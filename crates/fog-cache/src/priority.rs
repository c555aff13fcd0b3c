//! Readiness classification of a set of entries.
//!
//! A priority expression is a small language over the flags of a set of entries. A sequence of
//! checks like `led` yields the status of the first check that holds: `l` for "any entry is
//! loading", `d` for "any entry has data", `e` for "any entry has an error". An uppercase letter
//! requires the flag on *every* entry instead. A trailing `f` makes the sequence fall back to
//! `data` when no check holds, and `condition ? then : else` selects between two
//! sub-expressions depending on whether the condition yields anything but `none`.
//!
//! The default expression `e?le:Dl` reads: if any entry has an error, report loading before
//! error; otherwise report data only once every entry has data, else loading if anything is.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::entry::EntryState;

/// The expression used when none is given.
pub const DEFAULT_PRIORITY: &str = "e?le:Dl";

/// The readiness of a set of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Loading,
    Data,
    Error,
    None,
}

impl Status {
    pub fn as_char(self) -> char {
        match self {
            Self::Loading => 'l',
            Self::Data => 'd',
            Self::Error => 'e',
            Self::None => 'n',
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loading => "loading",
            Self::Data => "data",
            Self::Error => "error",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Errors raised while parsing a priority expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriorityError {
    #[error("invalid priority token {token:?} at position {position}")]
    InvalidToken { token: char, position: usize },
    #[error("missing `:` branch for the condition ending at position {position}")]
    MissingElse { position: usize },
    #[error("unexpected `:` at position {position}")]
    UnexpectedElse { position: usize },
    #[error("empty condition or branch at position {position}")]
    EmptyExpression { position: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Loading,
    Data,
    Error,
    /// `f`, never holds by itself.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Check {
    flag: Flag,
    /// Uppercase tokens require the flag on every entry.
    every: bool,
}

impl Check {
    fn from_token(token: char) -> Option<Self> {
        let flag = match token.to_ascii_lowercase() {
            'l' => Flag::Loading,
            'd' => Flag::Data,
            'e' => Flag::Error,
            'f' => Flag::Fallback,
            _ => return None,
        };
        Some(Self {
            flag,
            every: token.is_ascii_uppercase(),
        })
    }

    /// The status this check yields if it holds for `entries`.
    fn evaluate<S: EntryState>(self, entries: &[S]) -> Option<Status> {
        let (status, flag): (Status, fn(&S) -> bool) = match self.flag {
            Flag::Loading => (Status::Loading, S::is_loading),
            Flag::Data => (Status::Data, S::has_data),
            Flag::Error => (Status::Error, S::has_error),
            Flag::Fallback => return None,
        };
        let holds = if self.every {
            entries.iter().all(flag)
        } else {
            entries.iter().any(flag)
        };
        holds.then_some(status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    /// Checks tried in order.
    Sequence { checks: Vec<Check>, fallback: bool },
    /// `condition ? if_true : if_false`.
    Ternary {
        condition: Box<Node>,
        if_true: Box<Node>,
        if_false: Box<Node>,
    },
}

impl Node {
    fn is_empty(&self) -> bool {
        matches!(self, Self::Sequence { checks, .. } if checks.is_empty())
    }

    fn evaluate<S: EntryState>(&self, entries: &[S]) -> Status {
        match self {
            Self::Sequence { checks, fallback } => checks
                .iter()
                .find_map(|check| check.evaluate(entries))
                .unwrap_or(if *fallback { Status::Data } else { Status::None }),
            Self::Ternary {
                condition,
                if_true,
                if_false,
            } => {
                if condition.evaluate(entries) != Status::None {
                    if_true.evaluate(entries)
                } else {
                    if_false.evaluate(entries)
                }
            }
        }
    }
}

/// A parsed priority expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityExpr(Node);

impl PriorityExpr {
    /// Parses an expression. Whitespace is ignored.
    ///
    /// Ternaries group to the right, so `a?b?c:d:e` reads as `a?(b?c:d):e` and `a?b:c?d:e` as
    /// `a?b:(c?d:e)`.
    pub fn parse(expression: &str) -> Result<Self, PriorityError> {
        let mut parser = Parser {
            tokens: expression.chars().filter(|c| !c.is_whitespace()).collect(),
            position: 0,
        };
        let node = parser.parse_expr()?;
        match parser.peek() {
            Some(_) => Err(PriorityError::UnexpectedElse {
                position: parser.position,
            }),
            None => Ok(Self(node)),
        }
    }

    /// An expression that never yields anything but [`Status::None`].
    pub fn none() -> Self {
        Self(Node::Sequence {
            checks: Vec::new(),
            fallback: false,
        })
    }

    pub fn evaluate<S: EntryState>(&self, entries: &[S]) -> Status {
        self.0.evaluate(entries)
    }
}

impl Default for PriorityExpr {
    /// `e?le:Dl`
    fn default() -> Self {
        let sequence = |checks: &[(Flag, bool)]| {
            Box::new(Node::Sequence {
                checks: checks
                    .iter()
                    .map(|&(flag, every)| Check { flag, every })
                    .collect(),
                fallback: false,
            })
        };
        Self(Node::Ternary {
            condition: sequence(&[(Flag::Error, false)]),
            if_true: sequence(&[(Flag::Loading, false), (Flag::Error, false)]),
            if_false: sequence(&[(Flag::Data, true), (Flag::Loading, false)]),
        })
    }
}

impl FromStr for PriorityExpr {
    type Err = PriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Parser {
    tokens: Vec<char>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.tokens.get(self.position).copied()
    }

    fn eat(&mut self, token: char) -> bool {
        if self.peek() == Some(token) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    /// `expr := seq ('?' expr ':' expr)?`
    ///
    /// Only a whole expression may be empty, never a condition or a branch.
    fn parse_expr(&mut self) -> Result<Node, PriorityError> {
        let start = self.position;
        let condition = self.parse_sequence()?;
        if !self.eat('?') {
            return Ok(condition);
        }
        if condition.is_empty() {
            return Err(PriorityError::EmptyExpression { position: start });
        }

        let if_true = self.parse_branch()?;
        if !self.eat(':') {
            return Err(PriorityError::MissingElse {
                position: self.position,
            });
        }
        let if_false = self.parse_branch()?;

        Ok(Node::Ternary {
            condition: Box::new(condition),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        })
    }

    fn parse_branch(&mut self) -> Result<Node, PriorityError> {
        let position = self.position;
        let branch = self.parse_expr()?;
        if branch.is_empty() {
            return Err(PriorityError::EmptyExpression { position });
        }
        Ok(branch)
    }

    /// `seq := token*`
    fn parse_sequence(&mut self) -> Result<Node, PriorityError> {
        let mut checks = Vec::new();
        while let Some(token) = self.peek() {
            if token == '?' || token == ':' {
                break;
            }
            let check = Check::from_token(token).ok_or(PriorityError::InvalidToken {
                token,
                position: self.position,
            })?;
            checks.push(check);
            self.position += 1;
        }

        let fallback = matches!(
            checks.last(),
            Some(Check {
                flag: Flag::Fallback,
                ..
            })
        );
        Ok(Node::Sequence { checks, fallback })
    }
}

/// Parses `expression` and classifies `entries` with it.
pub fn evaluate<S: EntryState>(entries: &[S], expression: &str) -> Result<Status, PriorityError> {
    Ok(PriorityExpr::parse(expression)?.evaluate(entries))
}
