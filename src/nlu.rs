//! NLU result model and the criteria branches match against it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A recognised intent with its confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NluIntent {
    pub name: String,
    pub score: f64,
}

impl NluIntent {
    pub fn new(name: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// The result of running a message through the NLU adapter.
///
/// Every field is optional; an adapter fills in what its vendor provides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NluResult {
    #[serde(default)]
    pub intents: Vec<NluIntent>,
    #[serde(default)]
    pub entities: HashMap<String, serde_json::Value>,
    pub sentiment: Option<String>,
    pub language: Option<String>,
    pub confidence: Option<f64>,
}

/// The NLU attribute a criterion inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NluAttribute {
    Intent,
    Entity,
    Sentiment,
    Language,
}

/// How a criterion value is compared against the attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NluOperator {
    /// Exact equality.
    Is,
    /// Substring containment.
    Contains,
    /// The criterion value is a regex tested against the attribute.
    Matches,
}

/// One requirement against an NLU result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluCriterion {
    pub attribute: NluAttribute,
    pub operator: NluOperator,
    pub value: String,
    /// Entity name to restrict to; only meaningful for entity criteria.
    pub key: Option<String>,
    /// Minimum confidence: the matched intent's score, or the result's
    /// overall confidence for other attributes.
    pub min_score: Option<f64>,
}

/// A set of criteria that must ALL hold for the branch to match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NluCriteria {
    pub criteria: Vec<NluCriterion>,
}

impl NluCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intent(value: impl Into<String>) -> Self {
        Self::new().and(NluAttribute::Intent, NluOperator::Is, value)
    }

    pub fn and(
        mut self,
        attribute: NluAttribute,
        operator: NluOperator,
        value: impl Into<String>,
    ) -> Self {
        self.criteria.push(NluCriterion {
            attribute,
            operator,
            value: value.into(),
            key: None,
            min_score: None,
        });
        self
    }

    /// Restrict the most recently added criterion to an entity name.
    pub fn for_key(mut self, key: impl Into<String>) -> Self {
        if let Some(last) = self.criteria.last_mut() {
            last.key = Some(key.into());
        }
        self
    }

    /// Set a minimum score on the most recently added criterion.
    pub fn with_score(mut self, min_score: f64) -> Self {
        if let Some(last) = self.criteria.last_mut() {
            last.min_score = Some(min_score);
        }
        self
    }

    /// Evaluate all criteria against a result. Returns the per-criterion
    /// evidence when every criterion holds, `None` otherwise.
    pub fn matches(&self, result: &NluResult) -> Option<Vec<serde_json::Value>> {
        let mut evidence = Vec::with_capacity(self.criteria.len());
        for criterion in &self.criteria {
            evidence.push(match_criterion(criterion, result)?);
        }
        Some(evidence)
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

fn match_criterion(criterion: &NluCriterion, result: &NluResult) -> Option<serde_json::Value> {
    match criterion.attribute {
        NluAttribute::Intent => {
            let floor = criterion.min_score.unwrap_or(0.0);
            let hit = result
                .intents
                .iter()
                .find(|intent| intent.score >= floor && compare(criterion, &intent.name))?;
            Some(serde_json::json!({ "intent": hit.name, "score": hit.score }))
        }
        NluAttribute::Entity => {
            if !confidence_ok(criterion, result) {
                return None;
            }
            let hit = result
                .entities
                .iter()
                .filter(|(name, _)| {
                    criterion
                        .key
                        .as_deref()
                        .is_none_or(|key| key == name.as_str())
                })
                .find(|(_, value)| compare(criterion, &value_text(value)))?;
            Some(serde_json::json!({ "entity": hit.0, "value": hit.1 }))
        }
        NluAttribute::Sentiment => {
            if !confidence_ok(criterion, result) {
                return None;
            }
            let sentiment = result.sentiment.as_deref()?;
            compare(criterion, sentiment)
                .then(|| serde_json::json!({ "sentiment": sentiment }))
        }
        NluAttribute::Language => {
            if !confidence_ok(criterion, result) {
                return None;
            }
            let language = result.language.as_deref()?;
            compare(criterion, language).then(|| serde_json::json!({ "language": language }))
        }
    }
}

fn confidence_ok(criterion: &NluCriterion, result: &NluResult) -> bool {
    match criterion.min_score {
        Some(floor) => result.confidence.is_some_and(|c| c >= floor),
        None => true,
    }
}

fn compare(criterion: &NluCriterion, candidate: &str) -> bool {
    match criterion.operator {
        NluOperator::Is => candidate == criterion.value,
        NluOperator::Contains => candidate.contains(&criterion.value),
        NluOperator::Matches => regex::Regex::new(&criterion.value)
            .map(|re| re.is_match(candidate))
            .unwrap_or(false),
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeting_result() -> NluResult {
        NluResult {
            intents: vec![NluIntent::new("greeting", 0.92), NluIntent::new("farewell", 0.3)],
            entities: HashMap::from([("city".to_string(), serde_json::json!("paris"))]),
            sentiment: Some("positive".to_string()),
            language: Some("en".to_string()),
            confidence: Some(0.9),
        }
    }

    #[test]
    fn intent_is_respects_score_floor() {
        let result = greeting_result();
        assert!(NluCriteria::intent("greeting").with_score(0.8).matches(&result).is_some());
        assert!(NluCriteria::intent("farewell").with_score(0.8).matches(&result).is_none());
        assert!(NluCriteria::intent("farewell").matches(&result).is_some());
    }

    #[test]
    fn entity_criterion_restricts_to_key() {
        let result = greeting_result();
        let hit = NluCriteria::new()
            .and(NluAttribute::Entity, NluOperator::Is, "paris")
            .for_key("city")
            .matches(&result);
        assert!(hit.is_some());

        let miss = NluCriteria::new()
            .and(NluAttribute::Entity, NluOperator::Is, "paris")
            .for_key("country")
            .matches(&result);
        assert!(miss.is_none());
    }

    #[test]
    fn all_criteria_must_hold() {
        let result = greeting_result();
        let criteria = NluCriteria::intent("greeting")
            .and(NluAttribute::Language, NluOperator::Is, "en");
        assert!(criteria.matches(&result).is_some());

        let criteria = NluCriteria::intent("greeting")
            .and(NluAttribute::Language, NluOperator::Is, "fr");
        assert!(criteria.matches(&result).is_none());
    }

    #[test]
    fn matches_operator_treats_value_as_regex() {
        let result = greeting_result();
        let criteria =
            NluCriteria::new().and(NluAttribute::Sentiment, NluOperator::Matches, "^pos");
        assert!(criteria.matches(&result).is_some());
    }
}
