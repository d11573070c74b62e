//! Version resolution
//!
//! Explicit versions are plain semantic versions, optionally prefixed with
//! `v` or `=`. Anything else is a range in the npm dialect used by CI task
//! authors (`1.x`, `>=4.1`, `^2.0.0 || 3.1.x`, `1.2 - 1.4`), evaluated on top
//! of the `semver` crate's comparators.

use semver::{Comparator, Version, VersionReq};

/// Normalize a version string: trim it, drop leading `=`/`v` characters and
/// re-render it if what remains is a valid semantic version.
pub fn clean_version(version: &str) -> Option<String> {
    parse_version(version).map(|v| v.to_string())
}

/// Checks if a version spec names exactly one version (`1.0.1`, `v1.0.1`)
/// as opposed to a range such as `1.x`.
pub fn is_explicit_version(version_spec: &str) -> bool {
    let explicit = parse_version(version_spec).is_some();
    tracing::debug!("isExplicit: {} -> {}", version_spec, explicit);
    explicit
}

/// Return the highest candidate satisfying `version_spec`, or `None`.
///
/// Candidates that are not valid versions never match. An unparseable spec is
/// not an error, it simply matches nothing.
pub fn evaluate_versions<S: AsRef<str>>(versions: &[S], version_spec: &str) -> Option<String> {
    tracing::debug!("evaluating {} versions", versions.len());

    let Some(range) = VersionRange::parse(version_spec) else {
        tracing::debug!("'{}' is not a valid version range", version_spec);
        return None;
    };

    let mut candidates: Vec<(Version, &str)> = versions
        .iter()
        .filter_map(|v| parse_version(v.as_ref()).map(|parsed| (parsed, v.as_ref())))
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let mut matched = None;
    for (version, original) in candidates {
        if range.satisfies(&version) {
            matched = Some(original);
        }
    }

    match matched {
        Some(version) => tracing::debug!("matched: {}", version),
        None => tracing::debug!("match not found"),
    }
    matched.map(str::to_string)
}

fn parse_version(version: &str) -> Option<Version> {
    let stripped = version.trim().trim_start_matches(['=', 'v']);
    Version::parse(stripped).ok()
}

/// A union of comparator sets; a version satisfies the range when it
/// satisfies every comparator of at least one set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    sets: Vec<VersionReq>,
}

impl VersionRange {
    pub fn parse(spec: &str) -> Option<Self> {
        let sets = spec
            .split("||")
            .map(parse_comparator_set)
            .collect::<Option<Vec<_>>>()?;
        Some(Self { sets })
    }

    pub fn satisfies(&self, version: &Version) -> bool {
        self.sets.iter().any(|req| req.matches(version))
    }
}

const OPERATORS: [&str; 8] = [">=", "<=", "~>", ">", "<", "=", "~", "^"];

fn parse_comparator_set(set: &str) -> Option<VersionReq> {
    let tokens = join_operator_tokens(set.split_whitespace());
    let mut comparators = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        if tokens.get(i + 1).map(String::as_str) == Some("-") {
            let upper = tokens.get(i + 2)?;
            comparators.extend(parse_comparator(&format!(">={}", tokens[i]))?);
            comparators.extend(parse_comparator(&format!("<={}", upper))?);
            i += 3;
        } else {
            comparators.extend(parse_comparator(&tokens[i])?);
            i += 1;
        }
    }

    Some(VersionReq { comparators })
}

/// `>= 1.2` is written with a space in plenty of task inputs; glue the bare
/// operator back onto the version that follows it.
fn join_operator_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut joined: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;
    for token in tokens {
        if OPERATORS.contains(&token) {
            pending_op = Some(token);
            continue;
        }
        match pending_op.take() {
            Some(op) => joined.push(format!("{}{}", op, token)),
            None => joined.push(token.to_string()),
        }
    }
    if let Some(op) = pending_op {
        joined.push(op.to_string());
    }
    joined
}

/// Parse one npm comparator. Wildcards that match anything (`*`, `x`, `>=*`)
/// parse to `Some(None)`; invalid input is `None`.
fn parse_comparator(token: &str) -> Option<Option<Comparator>> {
    let op = OPERATORS
        .iter()
        .find(|op| token.starts_with(**op))
        .copied()
        .unwrap_or("");
    let rest = token[op.len()..].trim_start_matches(['v', '=']);
    let rest = rest.split('+').next().unwrap_or("");
    if rest.is_empty() && !op.is_empty() {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    let mut pre = None;
    let (numbers, prerelease) = match rest.split_once('-') {
        Some((numbers, prerelease)) => (numbers, Some(prerelease)),
        None => (rest, None),
    };
    for part in numbers.split('.') {
        if matches!(part, "x" | "X" | "*" | "") {
            break;
        }
        parts.push(part);
    }
    if parts.len() == 3 {
        pre = prerelease;
    }
    if parts.len() > 3 {
        return None;
    }
    if parts.is_empty() {
        return Some(None);
    }

    let op = match op {
        "" => "=",
        "~>" => "~",
        other => other,
    };
    let mut normalized = format!("{}{}", op, parts.join("."));
    if let Some(pre) = pre {
        normalized.push('-');
        normalized.push_str(pre);
    }

    normalized.parse::<Comparator>().ok().map(Some)
}
