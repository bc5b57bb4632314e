//! Declarative match conditions compiled into deterministic regexes.
//!
//! A [`Conditions`] value accepts a `/pattern/flags` literal, a prebuilt
//! regex, or one or more [`Condition`] key sets (optionally named). Condition
//! keys compile to regex segments that are concatenated in declaration order;
//! the final capture group is the canonical capture for the condition.

use crate::error::ExpressionError;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

/// Characters stripped from both ends of a captured value.
const CAPTURE_TRIM: &[char] = &[',', '-', ':', ' ', '\t'];

/// Semantic keys understood by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKey {
    /// Whole input equals the value.
    Is,
    /// Input begins with the value.
    Starts,
    /// Input ends with the value.
    Ends,
    /// Value appears as a word.
    Contains,
    /// Value does NOT appear.
    Excludes,
    /// Captures the text following the value.
    After,
    /// Captures the text preceding the value.
    Before,
    /// Numeric range `"lo-hi"` within 0-999.
    Range,
}

/// One condition: an ordered set of key/values terms. Values within a key
/// are OR-ed; keys concatenate in the order they were declared.
#[derive(Debug, Clone, Default)]
pub struct Condition {
    terms: Vec<(ConditionKey, Vec<String>)>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, key: ConditionKey, value: impl Into<String>) -> Self {
        let value = value.into();
        if let Some((_, values)) = self.terms.iter_mut().find(|(k, _)| *k == key) {
            values.push(value);
        } else {
            self.terms.push((key, vec![value]));
        }
        self
    }

    pub fn is(self, value: impl Into<String>) -> Self {
        self.push(ConditionKey::Is, value)
    }

    pub fn starts(self, value: impl Into<String>) -> Self {
        self.push(ConditionKey::Starts, value)
    }

    pub fn ends(self, value: impl Into<String>) -> Self {
        self.push(ConditionKey::Ends, value)
    }

    pub fn contains(self, value: impl Into<String>) -> Self {
        self.push(ConditionKey::Contains, value)
    }

    pub fn excludes(self, value: impl Into<String>) -> Self {
        self.push(ConditionKey::Excludes, value)
    }

    pub fn after(self, value: impl Into<String>) -> Self {
        self.push(ConditionKey::After, value)
    }

    pub fn before(self, value: impl Into<String>) -> Self {
        self.push(ConditionKey::Before, value)
    }

    pub fn range(self, value: impl Into<String>) -> Self {
        self.push(ConditionKey::Range, value)
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Per-conditions compilation options.
#[derive(Debug, Clone, Copy)]
pub struct ConditionOptions {
    /// Apply word boundaries around matched values.
    pub match_word: bool,
    /// Case-insensitive matching.
    pub ignore_case: bool,
    /// Punctuation inside matched values is optional.
    pub ignore_punctuation: bool,
}

impl Default for ConditionOptions {
    fn default() -> Self {
        Self {
            match_word: true,
            ignore_case: true,
            ignore_punctuation: false,
        }
    }
}

/// A compiled condition: the concatenated matcher (absent when the condition
/// holds only `excludes` terms) plus negatively-evaluated exclusion patterns.
#[derive(Debug, Clone)]
enum Compiled {
    /// A raw regex from a `/pattern/flags` literal or a prebuilt regex.
    Pattern(Regex),
    /// A compiled key-set condition.
    Fields {
        matcher: Option<Regex>,
        exclusions: Vec<Regex>,
    },
}

/// A set of compiled conditions evaluated together.
#[derive(Debug, Clone)]
pub struct Conditions {
    items: Vec<(Option<String>, Compiled)>,
}

impl Conditions {
    /// Parse a `/pattern/flags` literal. Flags: `i`, `m`, `s`.
    pub fn parse(literal: &str) -> Result<Self, ExpressionError> {
        let rest = literal
            .strip_prefix('/')
            .ok_or_else(|| ExpressionError::Invalid(literal.to_string()))?;
        let slash = rest
            .rfind('/')
            .ok_or_else(|| ExpressionError::Invalid(literal.to_string()))?;
        let (pattern, flags) = rest.split_at(slash);
        if pattern.is_empty() {
            return Err(ExpressionError::Invalid(literal.to_string()));
        }

        let mut builder = RegexBuilder::new(pattern);
        for flag in flags[1..].chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                _ => {
                    return Err(ExpressionError::UnknownFlag {
                        flag,
                        literal: literal.to_string(),
                    });
                }
            };
        }
        Ok(Self {
            items: vec![(None, Compiled::Pattern(builder.build()?))],
        })
    }

    pub fn from_regex(regex: Regex) -> Self {
        Self {
            items: vec![(None, Compiled::Pattern(regex))],
        }
    }

    pub fn single(condition: Condition) -> Result<Self, ExpressionError> {
        Self::single_with(condition, ConditionOptions::default())
    }

    pub fn single_with(
        condition: Condition,
        options: ConditionOptions,
    ) -> Result<Self, ExpressionError> {
        Ok(Self {
            items: vec![(None, compile_condition(&condition, options)?)],
        })
    }

    pub fn list(conditions: Vec<Condition>) -> Result<Self, ExpressionError> {
        Self::list_with(conditions, ConditionOptions::default())
    }

    pub fn list_with(
        conditions: Vec<Condition>,
        options: ConditionOptions,
    ) -> Result<Self, ExpressionError> {
        let mut items = Vec::with_capacity(conditions.len());
        for condition in &conditions {
            items.push((None, compile_condition(condition, options)?));
        }
        Ok(Self { items })
    }

    /// A named collection of conditions; results aggregate per name.
    pub fn named(
        conditions: Vec<(impl Into<String>, Condition)>,
    ) -> Result<Self, ExpressionError> {
        Self::named_with(conditions, ConditionOptions::default())
    }

    pub fn named_with(
        conditions: Vec<(impl Into<String>, Condition)>,
        options: ConditionOptions,
    ) -> Result<Self, ExpressionError> {
        let mut items = Vec::with_capacity(conditions.len());
        for (name, condition) in conditions {
            items.push((Some(name.into()), compile_condition(&condition, options)?));
        }
        Ok(Self { items })
    }

    /// Evaluate every condition against the input.
    pub fn exec(&self, input: &str) -> ConditionsResult {
        let outcomes = self
            .items
            .iter()
            .map(|(name, compiled)| (name.clone(), exec_compiled(compiled, input)))
            .collect();
        ConditionsResult { outcomes }
    }
}

/// The outcome of one condition against one input.
#[derive(Debug, Clone)]
pub struct ConditionMatch {
    pub matched: bool,
    /// Raw capture list: whole match first, then capture groups.
    pub groups: Vec<Option<String>>,
    /// The canonical capture, trimmed of `,-: \t`.
    pub captured: Option<String>,
}

/// Aggregated results of [`Conditions::exec`].
#[derive(Debug, Clone)]
pub struct ConditionsResult {
    outcomes: Vec<(Option<String>, ConditionMatch)>,
}

impl ConditionsResult {
    /// True when every condition matched.
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.matched)
    }

    pub fn outcomes(&self) -> &[(Option<String>, ConditionMatch)] {
        &self.outcomes
    }

    /// The canonical capture when a single unnamed condition was supplied.
    pub fn captured(&self) -> Option<&str> {
        match self.outcomes.as_slice() {
            [(None, outcome)] => outcome.captured.as_deref(),
            _ => None,
        }
    }

    pub fn captured_for(&self, name: &str) -> Option<&str> {
        self.outcomes
            .iter()
            .find(|(n, _)| n.as_deref() == Some(name))
            .and_then(|(_, outcome)| outcome.captured.as_deref())
    }

    /// Captures keyed by condition name, for named collections.
    pub fn captured_map(&self) -> HashMap<String, Option<String>> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| {
                name.as_ref()
                    .map(|n| (n.clone(), outcome.captured.clone()))
            })
            .collect()
    }

    /// Structured form recorded on matched-branch records.
    pub fn to_value(&self) -> serde_json::Value {
        if let [(None, outcome)] = self.outcomes.as_slice() {
            return outcome_value(outcome);
        }
        if self.outcomes.iter().all(|(name, _)| name.is_some()) {
            let map: serde_json::Map<String, serde_json::Value> = self
                .outcomes
                .iter()
                .map(|(name, outcome)| {
                    (name.clone().unwrap_or_default(), outcome_value(outcome))
                })
                .collect();
            return serde_json::Value::Object(map);
        }
        serde_json::Value::Array(self.outcomes.iter().map(|(_, o)| outcome_value(o)).collect())
    }
}

fn outcome_value(outcome: &ConditionMatch) -> serde_json::Value {
    serde_json::json!({
        "matched": outcome.matched,
        "captured": outcome.captured,
        "groups": outcome.groups,
    })
}

fn exec_compiled(compiled: &Compiled, input: &str) -> ConditionMatch {
    match compiled {
        Compiled::Pattern(regex) => match regex.captures(input) {
            Some(caps) => {
                let groups: Vec<Option<String>> = caps
                    .iter()
                    .map(|g| g.map(|m| m.as_str().to_string()))
                    .collect();
                let canonical = if caps.len() > 1 {
                    caps.get(1).map(|m| m.as_str())
                } else {
                    caps.get(0).map(|m| m.as_str())
                };
                ConditionMatch {
                    matched: true,
                    captured: canonical.map(trim_capture),
                    groups,
                }
            }
            None => miss(),
        },
        Compiled::Fields {
            matcher,
            exclusions,
        } => {
            if exclusions.iter().any(|re| re.is_match(input)) {
                return miss();
            }
            match matcher {
                Some(regex) => match regex.captures(input) {
                    Some(caps) => {
                        let groups: Vec<Option<String>> = caps
                            .iter()
                            .map(|g| g.map(|m| m.as_str().to_string()))
                            .collect();
                        // All but the last group were rewritten non-capturing
                        // at compile time, so group 1 is the canonical one.
                        let canonical = caps
                            .get(1)
                            .or_else(|| caps.get(0))
                            .map(|m| m.as_str());
                        ConditionMatch {
                            matched: true,
                            captured: canonical.map(trim_capture),
                            groups,
                        }
                    }
                    None => miss(),
                },
                // Exclusion-only condition: nothing excluded means a match.
                None => ConditionMatch {
                    matched: true,
                    groups: Vec::new(),
                    captured: None,
                },
            }
        }
    }
}

fn miss() -> ConditionMatch {
    ConditionMatch {
        matched: false,
        groups: Vec::new(),
        captured: None,
    }
}

fn trim_capture(raw: &str) -> String {
    raw.trim_matches(CAPTURE_TRIM).to_string()
}

/// One regex fragment produced for a condition key, carrying the markers the
/// join step needs for duplicate-value deduplication.
struct Segment {
    source: String,
    alt: String,
    value_at_end: bool,
    /// The strippable value prefix, present only for `after`.
    leading_value: Option<String>,
}

fn compile_condition(
    condition: &Condition,
    options: ConditionOptions,
) -> Result<Compiled, ExpressionError> {
    let boundary = if options.match_word { r"\b" } else { "" };
    let mut segments: Vec<Segment> = Vec::new();
    let mut exclusions: Vec<Regex> = Vec::new();

    for (key, values) in &condition.terms {
        let alt = values
            .iter()
            .map(|v| escape_value(v, options.ignore_punctuation))
            .collect::<Vec<_>>()
            .join("|");
        // Non-capturing occurrence of the value, used by after/before.
        let occurrence = format!("{boundary}(?:{alt}){boundary}");

        let segment = match key {
            ConditionKey::Is => Segment {
                source: format!("^({alt})$"),
                alt,
                value_at_end: true,
                leading_value: None,
            },
            ConditionKey::Starts => Segment {
                source: format!("^({alt}){boundary}"),
                alt,
                value_at_end: true,
                leading_value: None,
            },
            ConditionKey::Ends => Segment {
                source: format!("{boundary}({alt})$"),
                alt,
                value_at_end: true,
                leading_value: None,
            },
            ConditionKey::Contains => Segment {
                source: format!("{boundary}({alt}){boundary}"),
                alt,
                value_at_end: true,
                leading_value: None,
            },
            ConditionKey::After => Segment {
                source: format!(r"{occurrence}\s?(.*)"),
                alt,
                value_at_end: false,
                leading_value: Some(occurrence.clone()),
            },
            ConditionKey::Before => Segment {
                source: format!(r"(.*?)\s?{occurrence}"),
                alt,
                value_at_end: true,
                leading_value: None,
            },
            ConditionKey::Range => {
                let alt = range_pattern_from(values)?;
                Segment {
                    source: format!("{boundary}({alt}){boundary}"),
                    alt,
                    value_at_end: true,
                    leading_value: None,
                }
            }
            ConditionKey::Excludes => {
                // Lookaround is unavailable, so exclusion patterns are
                // evaluated negatively at exec time instead of inline.
                exclusions.push(build_regex(&occurrence, options)?);
                continue;
            }
        };
        segments.push(segment);
    }

    // Deduplicate the value pattern at each join point: a segment ending in
    // a value followed by an `after` of the same value keeps one occurrence.
    for i in 1..segments.len() {
        let duplicate = segments[i - 1].value_at_end
            && segments[i - 1].alt == segments[i].alt
            && segments[i].leading_value.is_some();
        if duplicate {
            let prefix = segments[i].leading_value.take().unwrap_or_default();
            let stripped = segments[i]
                .source
                .strip_prefix(&prefix)
                .map(str::to_string);
            if let Some(source) = stripped {
                segments[i].source = source;
            }
        }
    }

    // Rewrite every capture group except the final segment's to
    // non-capturing, so the last group is the canonical capture.
    let last = segments.len().saturating_sub(1);
    let pattern: String = segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            if i == last {
                segment.source.clone()
            } else {
                decapture(&segment.source)
            }
        })
        .collect();

    let matcher = if segments.is_empty() {
        None
    } else {
        Some(build_regex(&pattern, options)?)
    };
    Ok(Compiled::Fields {
        matcher,
        exclusions,
    })
}

fn build_regex(pattern: &str, options: ConditionOptions) -> Result<Regex, ExpressionError> {
    Ok(RegexBuilder::new(pattern)
        .case_insensitive(options.ignore_case)
        .build()?)
}

/// Escape a literal value; with `ignore_punctuation`, punctuation characters
/// in the value become optional.
fn escape_value(value: &str, ignore_punctuation: bool) -> String {
    if !ignore_punctuation {
        return regex::escape(value);
    }
    value
        .chars()
        .map(|c| {
            let escaped = regex::escape(&c.to_string());
            if matches!(c, '\'' | '.' | ',' | '-' | ':' | '!' | '?' | ';') {
                format!("{escaped}?")
            } else {
                escaped
            }
        })
        .collect()
}

/// Rewrite bare capture groups as non-capturing groups.
fn decapture(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + 8);
    let mut chars = source.chars().peekable();
    let mut escaped = false;
    while let Some(c) = chars.next() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '(' if chars.peek() != Some(&'?') => out.push_str("(?:"),
            _ => out.push(c),
        }
    }
    out
}

fn range_pattern_from(values: &[String]) -> Result<String, ExpressionError> {
    let mut alts = Vec::with_capacity(values.len());
    for value in values {
        let (lo, hi) = parse_range(value)?;
        alts.push(range_pattern(lo, hi));
    }
    Ok(alts.join("|"))
}

fn parse_range(value: &str) -> Result<(u16, u16), ExpressionError> {
    let err = || ExpressionError::Range(value.to_string());
    let (lo, hi) = value.split_once('-').ok_or_else(err)?;
    let lo: u16 = lo.trim().parse().map_err(|_| err())?;
    let hi: u16 = hi.trim().parse().map_err(|_| err())?;
    if lo > hi || hi > 999 {
        return Err(err());
    }
    Ok((lo, hi))
}

/// Build an alternation matching the decimal integers `lo..=hi` (no leading
/// zeros), split by digit count.
fn range_pattern(lo: u16, hi: u16) -> String {
    let mut parts = Vec::new();
    for width in 1..=3u32 {
        let floor = if width == 1 { 0 } else { 10u16.pow(width - 1) };
        let ceil = 10u16.pow(width) - 1;
        let a = lo.max(floor);
        let b = hi.min(ceil);
        if a > b {
            continue;
        }
        parts.push(fixed_width_pattern(
            &digits(a, width as usize),
            &digits(b, width as usize),
        ));
    }
    parts.join("|")
}

fn digits(n: u16, width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width];
    let mut n = n;
    for slot in out.iter_mut().rev() {
        *slot = (n % 10) as u8;
        n /= 10;
    }
    out
}

/// Pattern for all same-width numbers between digit sequences `a` and `b`.
fn fixed_width_pattern(a: &[u8], b: &[u8]) -> String {
    if a == b {
        return a.iter().map(|d| char::from(b'0' + d)).collect();
    }
    if a.len() == 1 {
        return format!("[{}-{}]", a[0], b[0]);
    }
    if a[0] == b[0] {
        return format!("{}{}", a[0], wrap(&fixed_width_pattern(&a[1..], &b[1..])));
    }

    let rest = a.len() - 1;
    let nines = vec![9u8; rest];
    let zeros = vec![0u8; rest];
    let mut alts = vec![format!(
        "{}{}",
        a[0],
        wrap(&fixed_width_pattern(&a[1..], &nines))
    )];
    if b[0] - a[0] >= 2 {
        let (lo_d, hi_d) = (a[0] + 1, b[0] - 1);
        let digit = if lo_d == hi_d {
            lo_d.to_string()
        } else {
            format!("[{lo_d}-{hi_d}]")
        };
        let tail = if rest == 1 {
            r"\d".to_string()
        } else {
            format!(r"\d{{{rest}}}")
        };
        alts.push(format!("{digit}{tail}"));
    }
    alts.push(format!(
        "{}{}",
        b[0],
        wrap(&fixed_width_pattern(&zeros, &b[1..]))
    ));
    alts.join("|")
}

fn wrap(pattern: &str) -> String {
    if pattern.contains('|') {
        format!("(?:{pattern})")
    } else {
        pattern.to_string()
    }
}
