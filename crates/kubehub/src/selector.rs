//! Label selector parsing and rendering.
//!
//! Grammar: comma separated requirements of the form `k=v`, `k==v`, `k!=v`,
//! `k in (a,b)`, `k notin (a,b)`, `k` and `!k`.

use std::collections::BTreeMap;
use std::fmt;

use corral_core::{CorralError, CorralResult};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use once_cell::sync::Lazy;
use regex::Regex;

static SET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\S+)\s+(in|notin)\s*\((.*)\)$").expect("static regex"));
static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("static regex"));
static PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    NotEq,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub op: Op,
    pub values: Vec<String>,
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let v = labels.get(&self.key);
        match self.op {
            Op::Eq | Op::In => v.map(|v| self.values.contains(v)).unwrap_or(false),
            Op::NotEq | Op::NotIn => v.map(|v| !self.values.contains(v)).unwrap_or(true),
            Op::Exists => v.is_some(),
            Op::DoesNotExist => v.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Op::Eq => write!(f, "{}={}", self.key, self.values.join("")),
            Op::NotEq => write!(f, "{}!={}", self.key, self.values.join("")),
            Op::In => write!(f, "{} in ({})", self.key, self.values.join(",")),
            Op::NotIn => write!(f, "{} notin ({})", self.key, self.values.join(",")),
            Op::Exists => write!(f, "{}", self.key),
            Op::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// A parsed selector; the empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub requirements: Vec<Requirement>,
}

impl Selector {
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

fn invalid(selector: &str, why: impl fmt::Display) -> CorralError {
    CorralError::Input(format!("invalid label selector {:?}: {}", selector, why))
}

fn check_key(selector: &str, key: &str) -> CorralResult<()> {
    let (prefix, name) = match key.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };
    if let Some(p) = prefix {
        if p.is_empty() || p.len() > 253 || !PREFIX_RE.is_match(p) {
            return Err(invalid(selector, format!("bad key prefix in {:?}", key)));
        }
    }
    if name.is_empty() || name.len() > 63 || !NAME_RE.is_match(name) {
        return Err(invalid(selector, format!("bad key {:?}", key)));
    }
    Ok(())
}

fn check_value(selector: &str, value: &str) -> CorralResult<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > 63 || !NAME_RE.is_match(value) {
        return Err(invalid(selector, format!("bad value {:?}", value)));
    }
    Ok(())
}

/// Split on commas that are not inside a `(...)` value set.
fn split_terms(s: &str) -> CorralResult<Vec<&str>> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 { return Err(invalid(s, "unbalanced parenthesis")); }
            }
            ',' if depth == 0 => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 { return Err(invalid(s, "unbalanced parenthesis")); }
    out.push(&s[start..]);
    Ok(out)
}

fn parse_term(selector: &str, term: &str) -> CorralResult<Requirement> {
    if term.is_empty() {
        return Err(invalid(selector, "empty requirement"));
    }
    if let Some(c) = SET_RE.captures(term) {
        let key = c[1].to_string();
        let op = if &c[2] == "in" { Op::In } else { Op::NotIn };
        let values: Vec<String> = c[3].split(',').map(|v| v.trim().to_string()).collect();
        if values.iter().all(|v| v.is_empty()) {
            return Err(invalid(selector, format!("empty value set for {:?}", key)));
        }
        check_key(selector, &key)?;
        for v in &values { check_value(selector, v)?; }
        return Ok(Requirement { key, op, values });
    }
    let (key, op, value) = if let Some((k, v)) = term.split_once("!=") {
        (k, Op::NotEq, Some(v))
    } else if let Some((k, v)) = term.split_once("==") {
        (k, Op::Eq, Some(v))
    } else if let Some((k, v)) = term.split_once('=') {
        (k, Op::Eq, Some(v))
    } else if let Some(k) = term.strip_prefix('!') {
        (k, Op::DoesNotExist, None)
    } else {
        (term, Op::Exists, None)
    };
    let key = key.trim();
    check_key(selector, key)?;
    let values = match value {
        Some(v) => {
            let v = v.trim();
            check_value(selector, v)?;
            vec![v.to_string()]
        }
        None => Vec::new(),
    };
    Ok(Requirement { key: key.to_string(), op, values })
}

/// Parse a selector string. Empty or whitespace-only input is the match-all selector.
pub fn parse(selector: &str) -> CorralResult<Selector> {
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return Ok(Selector::default());
    }
    let requirements = split_terms(trimmed)?
        .into_iter()
        .map(|t| parse_term(trimmed, t.trim()))
        .collect::<CorralResult<Vec<_>>>()?;
    Ok(Selector { requirements })
}

/// Render a workload's `LabelSelector` into selector-string form.
pub fn from_label_selector(ls: &LabelSelector) -> CorralResult<String> {
    let mut reqs: Vec<Requirement> = Vec::new();
    if let Some(labels) = &ls.match_labels {
        for (k, v) in labels {
            reqs.push(Requirement { key: k.clone(), op: Op::Eq, values: vec![v.clone()] });
        }
    }
    for expr in ls.match_expressions.iter().flatten() {
        let values = expr.values.clone().unwrap_or_default();
        let op = match expr.operator.as_str() {
            "In" => Op::In,
            "NotIn" => Op::NotIn,
            "Exists" => Op::Exists,
            "DoesNotExist" => Op::DoesNotExist,
            other => return Err(CorralError::Conversion(format!("unsupported selector operator {:?} on {:?}", other, expr.key))),
        };
        reqs.push(Requirement { key: expr.key.clone(), op, values });
    }
    Ok(Selector { requirements: reqs }.to_string())
}
