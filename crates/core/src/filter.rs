//! Filter predicates over field-path adaptors.
//!
//! A filter string is a comma-separated conjunction of clauses:
//!
//! ```text
//! name==docker.io/library/nginx:latest
//! target.mediatype~application/vnd\.oci\..*
//! labels."containerd.io/gc.root"!=""
//! ```
//!
//! Each clause compares the string value at a dot-separated field path
//! against a literal (`==`, `!=`) or a regular expression (`~`). Field-path
//! segments and values may be double-quoted to embed separators. A list of
//! filters matches when any one filter matches; the empty list matches
//! everything. Missing fields compare unequal.

use regex::Regex;

/// Supplies string values for field paths of a concrete object.
pub trait Adaptor {
    /// The value at `fieldpath`, or `None` when the field is absent.
    fn field(&self, fieldpath: &[&str]) -> Option<String>;
}

/// Join a residual field path and look it up in a string map.
///
/// Map-valued fields (`labels`, `annotations`) treat the remainder of the
/// path as a single key, re-joined on `.`.
pub fn check_map(
    fieldpath: &[&str],
    map: &std::collections::BTreeMap<String, String>,
) -> Option<String> {
    if map.is_empty() {
        return None;
    }
    map.get(&fieldpath.join(".")).cloned()
}

#[derive(Debug)]
enum Op {
    Eq(String),
    NotEq(String),
    Matches(Regex),
}

#[derive(Debug)]
struct Clause {
    path: Vec<String>,
    op: Op,
}

impl Clause {
    fn matches(&self, adaptor: &dyn Adaptor) -> bool {
        let path: Vec<&str> = self.path.iter().map(String::as_str).collect();
        let value = adaptor.field(&path);
        match (&self.op, value) {
            (Op::Eq(want), Some(v)) => v == *want,
            (Op::Eq(_), None) => false,
            (Op::NotEq(want), Some(v)) => v != *want,
            (Op::NotEq(_), None) => true,
            (Op::Matches(re), Some(v)) => re.is_match(&v),
            (Op::Matches(_), None) => false,
        }
    }
}

/// A compiled conjunction of clauses.
#[derive(Debug)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    /// Parse a filter string.
    pub fn parse(input: &str) -> crate::Result<Self> {
        let mut parser = Parser::new(input);
        let mut clauses = Vec::new();
        loop {
            clauses.push(parser.clause()?);
            if !parser.eat(',') {
                break;
            }
        }
        parser.finish()?;
        Ok(Self { clauses })
    }

    /// True when every clause matches.
    pub fn matches(&self, adaptor: &dyn Adaptor) -> bool {
        self.clauses.iter().all(|c| c.matches(adaptor))
    }
}

/// A disjunction of filters; empty matches everything.
#[derive(Debug, Default)]
pub struct FilterList {
    filters: Vec<Filter>,
}

impl FilterList {
    /// Parse a list of filter strings.
    pub fn parse<S: AsRef<str>>(inputs: &[S]) -> crate::Result<Self> {
        let mut filters = Vec::with_capacity(inputs.len());
        for input in inputs {
            filters.push(Filter::parse(input.as_ref())?);
        }
        Ok(Self { filters })
    }

    /// True when no filters were supplied or any filter matches.
    pub fn matches(&self, adaptor: &dyn Adaptor) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.matches(adaptor))
    }
}

struct Parser<'a> {
    input: &'a str,
    rest: &'a str,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, rest: input }
    }

    fn error(&self, msg: &str) -> crate::Error {
        crate::Error::InvalidFilter(format!("{msg} at {:?} in {:?}", self.rest, self.input))
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if let Some(stripped) = self.rest.strip_prefix(c) {
            self.rest = stripped;
            true
        } else {
            false
        }
    }

    fn clause(&mut self) -> crate::Result<Clause> {
        let mut path = vec![self.segment()?];
        while self.eat('.') {
            path.push(self.segment()?);
        }

        self.skip_ws();
        let op = if let Some(r) = self.rest.strip_prefix("==") {
            self.rest = r;
            Op::Eq(self.value()?)
        } else if let Some(r) = self.rest.strip_prefix("!=") {
            self.rest = r;
            Op::NotEq(self.value()?)
        } else if let Some(r) = self.rest.strip_prefix('~') {
            self.rest = r;
            let pattern = self.value()?;
            let re = Regex::new(&pattern)
                .map_err(|e| crate::Error::InvalidFilter(format!("bad pattern {pattern:?}: {e}")))?;
            Op::Matches(re)
        } else {
            return Err(self.error("expected ==, != or ~"));
        };

        Ok(Clause { path, op })
    }

    fn segment(&mut self) -> crate::Result<String> {
        self.skip_ws();
        if self.rest.starts_with('"') {
            return self.quoted();
        }
        let end = self
            .rest
            .find(|c: char| matches!(c, '.' | ',' | '=' | '!' | '~' | '"') || c.is_whitespace())
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(self.error("expected field segment"));
        }
        let (seg, rest) = self.rest.split_at(end);
        self.rest = rest;
        Ok(seg.to_string())
    }

    fn value(&mut self) -> crate::Result<String> {
        self.skip_ws();
        if self.rest.starts_with('"') {
            return self.quoted();
        }
        let end = self.rest.find(',').unwrap_or(self.rest.len());
        let (value, rest) = self.rest.split_at(end);
        self.rest = rest;
        Ok(value.trim().to_string())
    }

    fn quoted(&mut self) -> crate::Result<String> {
        let mut chars = self.rest.char_indices();
        chars.next(); // opening quote
        let mut out = String::new();
        let mut escaped = false;
        for (i, c) in chars {
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                self.rest = &self.rest[i + 1..];
                return Ok(out);
            } else {
                out.push(c);
            }
        }
        Err(self.error("unterminated quote"))
    }

    fn finish(&self) -> crate::Result<()> {
        if self.rest.trim().is_empty() {
            Ok(())
        } else {
            Err(self.error("trailing input"))
        }
    }
}
