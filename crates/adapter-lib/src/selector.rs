//! Label selectors
//!
//! Supports the equality (`k=v`, `k==v`, `k!=v`), set (`k in (a,b)`,
//! `k notin (a,b)`) and existence (`k`, `!k`) forms, comma-separated.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AdapterError;

/// A single selector term
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(k, values) => !labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }

    fn parse(term: &str) -> Result<Self, AdapterError> {
        let term = term.trim();

        if let Some(key) = term.strip_prefix('!') {
            return Ok(Requirement::DoesNotExist(key_of(key, term)?));
        }

        if let Some(open) = term.find('(') {
            let values = term[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| invalid(term))?;
            let values: Vec<String> = values
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            let head = term[..open].trim_end();
            if let Some(key) = operator_key(head, "notin") {
                return Ok(Requirement::NotIn(key_of(key, term)?, values));
            }
            if let Some(key) = operator_key(head, "in") {
                return Ok(Requirement::In(key_of(key, term)?, values));
            }
            return Err(invalid(term));
        }

        if let Some((key, value)) = term.split_once("!=") {
            return Ok(Requirement::NotEquals(key_of(key, term)?, value.trim().to_string()));
        }
        if let Some((key, value)) = term.split_once("==") {
            return Ok(Requirement::Equals(key_of(key, term)?, value.trim().to_string()));
        }
        if let Some((key, value)) = term.split_once('=') {
            return Ok(Requirement::Equals(key_of(key, term)?, value.trim().to_string()));
        }

        Ok(Requirement::Exists(key_of(term, term)?))
    }
}

/// `head` is `<key> <operator>`; the operator must be its own word.
fn operator_key<'a>(head: &'a str, operator: &str) -> Option<&'a str> {
    head.strip_suffix(operator)
        .filter(|rest| rest.ends_with(char::is_whitespace))
}

fn key_of(raw: &str, term: &str) -> Result<String, AdapterError> {
    let key = raw.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(invalid(term));
    }
    Ok(key.to_string())
}

fn invalid(term: &str) -> AdapterError {
    AdapterError::malformed(format!("invalid label selector term {:?}", term))
}

/// Split on commas that are not inside a value list
fn split_terms(raw: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&raw[start..]);
    terms
}

/// A conjunction of label requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector matching every object
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = AdapterError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().is_empty() {
            return Ok(Self::everything());
        }
        let requirements = split_terms(raw)
            .into_iter()
            .map(Requirement::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self
            .requirements
            .iter()
            .map(|r| match r {
                Requirement::Equals(k, v) => format!("{}={}", k, v),
                Requirement::NotEquals(k, v) => format!("{}!={}", k, v),
                Requirement::In(k, vs) => format!("{} in ({})", k, vs.join(",")),
                Requirement::NotIn(k, vs) => format!("{} notin ({})", k, vs.join(",")),
                Requirement::Exists(k) => k.clone(),
                Requirement::DoesNotExist(k) => format!("!{}", k),
            })
            .collect();
        f.write_str(&terms.join(","))
    }
}
