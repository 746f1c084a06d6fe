//! Route pattern grammar and segment matching.
//!
//! Patterns are `/`-separated segments:
//!
//! | Segment   | Matches                                   | Captured as       |
//! |-----------|-------------------------------------------|-------------------|
//! | `users`   | exactly that segment                      | -                 |
//! | `:id`     | any one non-empty segment                 | `id`              |
//! | `:tab?`   | one segment, or nothing at all            | `tab` (`""` if absent) |
//! | `*`       | the rest of the path, slashes included    | `*`               |
//!
//! When several patterns match the same path the most specific one wins,
//! compared segment by segment: literal, then parameter, then optional, then
//! wildcard. A pattern that ties on every position it shares with another
//! but is shorter wins. Whatever still ties goes to the route registered
//! first.

use std::collections::{HashMap, HashSet};

use crate::error::ConfigError;

/// Parameter name under which a trailing `*` stores the remainder.
pub const WILDCARD: &str = "*";

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Param(String),
    Optional(String),
    Wildcard,
}

impl Segment {
    fn rank(&self) -> u8 {
        match self {
            Self::Literal(_) => 0,
            Self::Param(_) => 1,
            Self::Optional(_) => 2,
            Self::Wildcard => 3,
        }
    }
}

/// A parsed, validated route pattern.
#[derive(Clone, Debug)]
pub(crate) struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub(crate) fn parse(raw: &str) -> Result<Self, ConfigError> {
        let source = normalize(raw);
        let parts: Vec<&str> = split(&source).collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut names = HashSet::new();
        let mut after_optional = false;

        for (i, part) in parts.iter().enumerate() {
            let segment = if *part == WILDCARD {
                if i + 1 != parts.len() {
                    return Err(ConfigError::WildcardNotLast { pattern: source.clone() });
                }
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix(':') {
                let (name, optional) = match name.strip_suffix('?') {
                    Some(name) => (name, true),
                    None => (name, false),
                };
                if name.is_empty() {
                    return Err(ConfigError::EmptyParam { pattern: source.clone() });
                }
                if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                    let name = name.to_owned();
                    return Err(ConfigError::InvalidParam { pattern: source.clone(), name });
                }
                if !names.insert(name) {
                    let name = name.to_owned();
                    return Err(ConfigError::DuplicateParam { pattern: source.clone(), name });
                }
                if optional {
                    Segment::Optional(name.to_owned())
                } else {
                    Segment::Param(name.to_owned())
                }
            } else if part.contains('*') {
                return Err(ConfigError::MisplacedWildcard { pattern: source.clone() });
            } else {
                Segment::Literal((*part).to_owned())
            };

            match segment {
                Segment::Optional(_) => after_optional = true,
                Segment::Wildcard => {}
                _ if after_optional => {
                    let segment = (*part).to_owned();
                    return Err(ConfigError::RequiredAfterOptional {
                        pattern: source.clone(),
                        segment,
                    });
                }
                _ => {}
            }
            segments.push(segment);
        }

        Ok(Self { source, segments })
    }

    /// The normalized pattern text, e.g. `"/users/:id"`.
    pub(crate) fn as_str(&self) -> &str {
        &self.source
    }

    /// Sort key: lower is more specific.
    pub(crate) fn specificity(&self) -> Vec<u8> {
        self.segments.iter().map(Segment::rank).collect()
    }

    /// Matches already-split path segments, returning the captured params.
    pub(crate) fn captures(
        &self,
        path: &[&str],
        case_sensitive: bool,
    ) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut rest = path;

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => {
                    let (first, tail) = rest.split_first()?;
                    if !literal_eq(literal, first, case_sensitive) {
                        return None;
                    }
                    rest = tail;
                }
                Segment::Param(name) => {
                    let (first, tail) = rest.split_first()?;
                    params.insert(name.clone(), (*first).to_owned());
                    rest = tail;
                }
                Segment::Optional(name) => match rest.split_first() {
                    Some((first, tail)) => {
                        params.insert(name.clone(), (*first).to_owned());
                        rest = tail;
                    }
                    None => {
                        params.insert(name.clone(), String::new());
                    }
                },
                Segment::Wildcard => {
                    params.insert(WILDCARD.to_owned(), rest.join("/"));
                    rest = &[];
                }
            }
        }

        rest.is_empty().then_some(params)
    }
}

/// Normalizes a prefix used for middleware, groups, mounts and static files.
///
/// `""` and `"/"` both mean "everything". Parameters and wildcards are
/// rejected: a prefix is compared textually, segment by segment.
pub(crate) fn parse_prefix(raw: &str) -> Result<String, ConfigError> {
    let prefix = normalize(raw);
    if split(&prefix).any(|part| part.starts_with(':') || part.contains('*')) {
        return Err(ConfigError::InvalidPrefix { prefix });
    }
    Ok(prefix)
}

/// Joins a group prefix and a route pattern.
pub(crate) fn join(prefix: &str, pattern: &str) -> String {
    let pattern = normalize(pattern);
    match (prefix, pattern.as_str()) {
        ("/", _) => pattern,
        (_, "/") => prefix.to_owned(),
        _ => format!("{prefix}{pattern}"),
    }
}

/// Whether `prefix` covers `path` on a segment boundary: `/error` covers
/// `/error` and `/error/x`, never `/errors`.
pub(crate) fn covers(prefix: &str, path: &str, case_sensitive: bool) -> bool {
    strip(prefix, path, case_sensitive).is_some()
}

/// Removes `prefix` from `path`, yielding the remainder with a leading `/`.
pub(crate) fn strip<'a>(prefix: &str, path: &'a str, case_sensitive: bool) -> Option<&'a str> {
    if prefix == "/" {
        return Some(path);
    }
    let head = path.get(..prefix.len())?;
    if !literal_eq(prefix, head, case_sensitive) {
        return None;
    }
    match &path[prefix.len()..] {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

/// Splits a request path (or normalized pattern) into non-empty segments.
pub(crate) fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

fn normalize(raw: &str) -> String {
    let joined = split(raw).collect::<Vec<_>>().join("/");
    format!("/{joined}")
}

fn literal_eq(expected: &str, actual: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        expected == actual
    } else {
        expected.eq_ignore_ascii_case(actual)
    }
}
