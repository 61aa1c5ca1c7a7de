//! Rule-based phase translation between two workflow vocabularies.
//!
//! [`PhaseResolver`] stores [`MappingRule`]s and resolves a source phase,
//! plus an arbitrary context record, into an ordered and deduplicated list of
//! target phases. Rules are ranked by weight (ties keep registration order)
//! and may carry a declarative [`Condition`]. Named predicates and custom
//! mappers are registered by name so the rule table itself stays serializable.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ConditionError, PhaseSyncError, Result};

/// Arbitrary context record passed to conditions and custom mappers.
pub type Context = serde_json::Map<String, Value>;

/// A named predicate over a context. An `Err` is a non-match.
pub type Predicate = Arc<dyn Fn(&Context) -> std::result::Result<bool, ConditionError> + Send + Sync>;

fn default_weight() -> f64 {
    1.0
}

/// A declarative condition attached to a rule.
///
/// Keys are dotted paths into the context (`"review.approved"`).
/// Evaluation must be a pure function of the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Equals { key: String, value: Value },
    NotEquals { key: String, value: Value },
    Exists { key: String },
    OneOf { key: String, values: Vec<Value> },
    GreaterThan { key: String, value: f64 },
    LessThan { key: String, value: f64 },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
    /// Delegates to a predicate registered with [`PhaseResolver::register_predicate`].
    Predicate { name: String },
}

impl Condition {
    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn predicate(name: impl Into<String>) -> Self {
        Condition::Predicate { name: name.into() }
    }

    /// Evaluate against `context`. Missing keys are `Ok(false)`; type
    /// mismatches and unknown predicates are errors.
    pub fn evaluate(
        &self,
        context: &Context,
        predicates: &HashMap<String, Predicate>,
    ) -> std::result::Result<bool, ConditionError> {
        match self {
            Condition::Equals { key, value } => Ok(lookup(context, key) == Some(value)),
            Condition::NotEquals { key, value } => Ok(lookup(context, key) != Some(value)),
            Condition::Exists { key } => Ok(lookup(context, key).is_some_and(|v| !v.is_null())),
            Condition::OneOf { key, values } => {
                Ok(lookup(context, key).is_some_and(|v| values.contains(v)))
            }
            Condition::GreaterThan { key, value } => {
                Ok(numeric(context, key)?.is_some_and(|n| n > *value))
            }
            Condition::LessThan { key, value } => {
                Ok(numeric(context, key)?.is_some_and(|n| n < *value))
            }
            Condition::All { conditions } => {
                for condition in conditions {
                    if !condition.evaluate(context, predicates)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any { conditions } => {
                for condition in conditions {
                    if condition.evaluate(context, predicates)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not { condition } => Ok(!condition.evaluate(context, predicates)?),
            Condition::Predicate { name } => {
                let predicate = predicates
                    .get(name)
                    .ok_or_else(|| ConditionError::UnknownPredicate(name.clone()))?;
                predicate(context)
            }
        }
    }

    fn predicate_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::All { conditions } | Condition::Any { conditions } => {
                for condition in conditions {
                    condition.predicate_names(out);
                }
            }
            Condition::Not { condition } => condition.predicate_names(out),
            Condition::Predicate { name } => out.push(name),
            _ => {}
        }
    }
}

fn lookup<'a>(context: &'a Context, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = context.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn numeric(context: &Context, key: &str) -> std::result::Result<Option<f64>, ConditionError> {
    match lookup(context, key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| ConditionError::NotANumber { key: key.to_string() }),
    }
}

/// A stored translation directive. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    pub id: String,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub created_at: DateTime<Utc>,
}

/// A rule as submitted for registration. `id` is generated when omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    #[serde(default)]
    pub id: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub weight: Option<f64>,
}

impl NewRule {
    pub fn new<I, S>(from: impl Into<String>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            from: from.into(),
            to: to.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// A rule file: a list of `[[rules]]` tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<NewRule>,
}

impl RuleSet {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

/// A named mapping function that bypasses the rule table.
pub trait PhaseMapper: Send + Sync {
    fn map(&self, from_phase: &str, context: &Context) -> std::result::Result<Vec<String>, String>;
}

impl<F> PhaseMapper for F
where
    F: Fn(&str, &Context) -> std::result::Result<Vec<String>, String> + Send + Sync,
{
    fn map(&self, from_phase: &str, context: &Context) -> std::result::Result<Vec<String>, String> {
        self(from_phase, context)
    }
}

/// How a source phase is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStrategy {
    /// All matching rules, ranked by weight.
    Weighted,
    /// Only rules that carry a satisfied condition, in registration order.
    Conditional,
    /// A registered [`PhaseMapper`].
    Custom(String),
}

/// Translates phases using registered rules, predicates and custom mappers.
#[derive(Default)]
pub struct PhaseResolver {
    rules: Vec<MappingRule>,
    predicates: HashMap<String, Predicate>,
    mappers: HashMap<String, Arc<dyn PhaseMapper>>,
}

impl PhaseResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named predicate usable from [`Condition::Predicate`].
    pub fn register_predicate<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&Context) -> std::result::Result<bool, ConditionError> + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    /// Validate a rule and turn it into a [`MappingRule`] without storing it.
    pub fn prepare_rule(&self, rule: NewRule) -> Result<MappingRule> {
        if rule.from.trim().is_empty() {
            return Err(PhaseSyncError::Validation(
                "rule 'from' must be a non-empty phase".into(),
            ));
        }
        if rule.to.is_empty() {
            return Err(PhaseSyncError::Validation(format!(
                "rule for '{}' must map to at least one phase",
                rule.from
            )));
        }
        if rule.to.iter().any(|phase| phase.trim().is_empty()) {
            return Err(PhaseSyncError::Validation(format!(
                "rule for '{}' contains an empty target phase",
                rule.from
            )));
        }
        if let Some(weight) = rule.weight {
            if !weight.is_finite() {
                return Err(PhaseSyncError::Validation(format!(
                    "rule weight must be a finite number, got {weight}"
                )));
            }
        }
        if let Some(condition) = &rule.condition {
            let mut names = Vec::new();
            condition.predicate_names(&mut names);
            if let Some(missing) = names.iter().find(|n| !self.predicates.contains_key(**n)) {
                return Err(PhaseSyncError::Validation(format!(
                    "condition references unregistered predicate '{missing}'"
                )));
            }
        }
        if let Some(id) = &rule.id {
            if id.trim().is_empty() {
                return Err(PhaseSyncError::Validation("rule id must not be blank".into()));
            }
        }

        Ok(MappingRule {
            id: rule.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            from: rule.from,
            to: rule.to,
            condition: rule.condition,
            weight: rule.weight.unwrap_or_else(default_weight),
            created_at: Utc::now(),
        })
    }

    /// Validate and store a rule, returning its id.
    pub fn register_rule(&mut self, rule: NewRule) -> Result<String> {
        let rule = self.prepare_rule(rule)?;
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(PhaseSyncError::Validation(format!(
                "rule id '{}' is already registered",
                rule.id
            )));
        }
        info!(rule_id = %rule.id, from = %rule.from, to = ?rule.to, weight = rule.weight, "Registered mapping rule");
        let id = rule.id.clone();
        self.rules.push(rule);
        Ok(id)
    }

    /// Register every rule of a rule set. All rules are validated first, so an
    /// invalid rule (or a duplicate id) leaves the table unchanged.
    pub fn register_rules(&mut self, set: RuleSet) -> Result<Vec<String>> {
        let prepared = set
            .rules
            .into_iter()
            .map(|rule| self.prepare_rule(rule))
            .collect::<Result<Vec<MappingRule>>>()?;

        let mut ids = HashSet::new();
        for rule in &prepared {
            if !ids.insert(rule.id.as_str()) || self.get_rule(&rule.id).is_some() {
                return Err(PhaseSyncError::Validation(format!(
                    "rule id '{}' is already registered",
                    rule.id
                )));
            }
        }

        let ids: Vec<String> = prepared.iter().map(|rule| rule.id.clone()).collect();
        info!(count = prepared.len(), "Registered mapping rule set");
        self.rules.extend(prepared);
        Ok(ids)
    }

    /// Resolve `from_phase` to target phases using the stored rules.
    pub fn map(&self, from_phase: &str, context: &Context) -> Vec<String> {
        self.map_with_rules(&self.rules, from_phase, context)
    }

    /// Resolve `from_phase` against an explicit rule list (e.g. per-link overrides).
    pub fn map_with_rules(
        &self,
        rules: &[MappingRule],
        from_phase: &str,
        context: &Context,
    ) -> Vec<String> {
        let mut matched: Vec<&MappingRule> = rules
            .iter()
            .filter(|rule| rule.from == from_phase && self.is_satisfied(rule, context))
            .collect();
        // Stable sort: equal weights keep registration order.
        matched.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        let phases = dedup(matched.iter().flat_map(|rule| rule.to.iter()));
        debug!(from = from_phase, resolved = ?phases, "Resolved phase");
        phases
    }

    /// Find the source phases whose rules produce `to_phase`, in registration order.
    pub fn reverse_map(&self, to_phase: &str, context: &Context) -> Vec<String> {
        dedup(
            self.rules
                .iter()
                .filter(|rule| rule.to.iter().any(|p| p == to_phase))
                .filter(|rule| self.is_satisfied(rule, context))
                .map(|rule| &rule.from),
        )
    }

    pub fn register_custom_mapper<M>(&mut self, name: impl Into<String>, mapper: M)
    where
        M: PhaseMapper + 'static,
    {
        let name = name.into();
        debug!(mapper = %name, "Registered custom mapper");
        self.mappers.insert(name, Arc::new(mapper));
    }

    pub fn map_with_custom_mapper(
        &self,
        name: &str,
        from_phase: &str,
        context: &Context,
    ) -> Result<Vec<String>> {
        let mapper = self
            .mappers
            .get(name)
            .ok_or_else(|| PhaseSyncError::not_found("custom mapper", name))?;

        let phases = mapper
            .map(from_phase, context)
            .map_err(|e| PhaseSyncError::Contract(format!("mapper '{name}' failed: {e}")))?;
        if phases.iter().any(|p| p.trim().is_empty()) {
            return Err(PhaseSyncError::Contract(format!(
                "mapper '{name}' returned an empty phase identifier"
            )));
        }
        Ok(phases)
    }

    /// Dispatch resolution by strategy.
    pub fn resolve(
        &self,
        strategy: &MappingStrategy,
        from_phase: &str,
        context: &Context,
    ) -> Result<Vec<String>> {
        match strategy {
            MappingStrategy::Weighted => Ok(self.map(from_phase, context)),
            MappingStrategy::Conditional => Ok(dedup(
                self.rules
                    .iter()
                    .filter(|rule| rule.from == from_phase && rule.condition.is_some())
                    .filter(|rule| self.is_satisfied(rule, context))
                    .flat_map(|rule| rule.to.iter()),
            )),
            MappingStrategy::Custom(name) => self.map_with_custom_mapper(name, from_phase, context),
        }
    }

    pub fn get_rule(&self, id: &str) -> Option<&MappingRule> {
        self.rules.iter().find(|rule| rule.id == id)
    }

    pub fn all_rules(&self) -> &[MappingRule] {
        &self.rules
    }

    pub fn delete_rule(&mut self, id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|rule| rule.id != id);
        self.rules.len() != before
    }

    pub fn clear_rules(&mut self) {
        self.rules.clear();
    }

    fn is_satisfied(&self, rule: &MappingRule, context: &Context) -> bool {
        let Some(condition) = &rule.condition else {
            return true;
        };
        match condition.evaluate(context, &self.predicates) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(rule_id = %rule.id, error = %e, "Condition failed, treating rule as non-matching");
                false
            }
        }
    }
}

fn dedup<'a>(phases: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    phases
        .filter(|phase| seen.insert(phase.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn one_to_one_rule_maps_both_ways() {
        let mut resolver = PhaseResolver::new();
        resolver.register_rule(NewRule::new("draft", ["planning"])).unwrap();

        assert_eq!(resolver.map("draft", &Context::new()), vec!["planning"]);
        assert_eq!(resolver.reverse_map("planning", &Context::new()), vec!["draft"]);
    }

    #[test]
    fn higher_weight_ranks_first() {
        let mut resolver = PhaseResolver::new();
        resolver
            .register_rule(NewRule::new("draft", ["x"]).with_weight(0.5))
            .unwrap();
        resolver
            .register_rule(NewRule::new("draft", ["y"]).with_weight(0.9))
            .unwrap();

        assert_eq!(resolver.map("draft", &Context::new()), vec!["y", "x"]);
    }

    #[test]
    fn equal_weights_keep_registration_order() {
        let mut resolver = PhaseResolver::new();
        resolver.register_rule(NewRule::new("a", ["first"])).unwrap();
        resolver.register_rule(NewRule::new("a", ["second"])).unwrap();
        resolver.register_rule(NewRule::new("a", ["third"])).unwrap();

        assert_eq!(
            resolver.map("a", &Context::new()),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let mut resolver = PhaseResolver::new();
        resolver
            .register_rule(NewRule::new("review", ["design", "build"]).with_weight(2.0))
            .unwrap();
        resolver
            .register_rule(NewRule::new("review", ["build", "qa", "design"]))
            .unwrap();

        assert_eq!(
            resolver.map("review", &Context::new()),
            vec!["design", "build", "qa"]
        );
    }

    #[test]
    fn unmatched_phase_resolves_to_empty() {
        let mut resolver = PhaseResolver::new();
        resolver.register_rule(NewRule::new("draft", ["planning"])).unwrap();
        assert!(resolver.map("shipped", &Context::new()).is_empty());
    }

    #[test]
    fn conditions_filter_rules() {
        let mut resolver = PhaseResolver::new();
        resolver
            .register_rule(
                NewRule::new("review", ["approved"])
                    .with_condition(Condition::equals("review.approved", true)),
            )
            .unwrap();
        resolver
            .register_rule(
                NewRule::new("review", ["rework"])
                    .with_condition(Condition::equals("review.approved", false))
                    .with_weight(0.1),
            )
            .unwrap();

        let approved = ctx(json!({ "review": { "approved": true } }));
        let rejected = ctx(json!({ "review": { "approved": false } }));
        assert_eq!(resolver.map("review", &approved), vec!["approved"]);
        assert_eq!(resolver.map("review", &rejected), vec!["rework"]);
        assert!(resolver.map("review", &Context::new()).is_empty());
    }

    #[test]
    fn failing_condition_is_a_non_match() {
        let mut resolver = PhaseResolver::new();
        resolver.register_predicate("explodes", |_ctx: &Context| {
            Err(ConditionError::Predicate("boom".into()))
        });
        resolver
            .register_rule(
                NewRule::new("draft", ["never"]).with_condition(Condition::predicate("explodes")),
            )
            .unwrap();
        resolver
            .register_rule(
                NewRule::new("draft", ["also-never"]).with_condition(Condition::GreaterThan {
                    key: "score".into(),
                    value: 1.0,
                }),
            )
            .unwrap();
        resolver.register_rule(NewRule::new("draft", ["planning"])).unwrap();

        let context = ctx(json!({ "score": "high" }));
        assert_eq!(resolver.map("draft", &context), vec!["planning"]);
    }

    #[test]
    fn numeric_and_composite_conditions() {
        let mut resolver = PhaseResolver::new();
        resolver
            .register_rule(NewRule::new("build", ["release"]).with_condition(Condition::All {
                conditions: vec![
                    Condition::GreaterThan {
                        key: "coverage".into(),
                        value: 80.0,
                    },
                    Condition::Not {
                        condition: Box::new(Condition::Exists {
                            key: "blocker".into(),
                        }),
                    },
                ],
            }))
            .unwrap();

        assert_eq!(
            resolver.map("build", &ctx(json!({ "coverage": 91 }))),
            vec!["release"]
        );
        assert!(resolver
            .map("build", &ctx(json!({ "coverage": 91, "blocker": "JIRA-1" })))
            .is_empty());
        assert!(resolver.map("build", &ctx(json!({ "coverage": 42 }))).is_empty());
    }

    #[test]
    fn reverse_map_respects_conditions_and_registration_order() {
        let mut resolver = PhaseResolver::new();
        resolver
            .register_rule(NewRule::new("review", ["design"]).with_weight(0.1))
            .unwrap();
        resolver.register_rule(NewRule::new("draft", ["design"])).unwrap();
        resolver
            .register_rule(
                NewRule::new("spike", ["design"]).with_condition(Condition::Exists {
                    key: "spike".into(),
                }),
            )
            .unwrap();

        assert_eq!(
            resolver.reverse_map("design", &Context::new()),
            vec!["review", "draft"]
        );
        assert_eq!(
            resolver.reverse_map("design", &ctx(json!({ "spike": true }))),
            vec!["review", "draft", "spike"]
        );
    }

    #[test]
    fn invalid_rules_are_rejected_without_state_change() {
        let mut resolver = PhaseResolver::new();
        let cases = vec![
            NewRule::new("", ["x"]),
            NewRule::new("draft", Vec::<String>::new()),
            NewRule::new("draft", ["ok", " "]),
            NewRule::new("draft", ["x"]).with_weight(f64::NAN),
            NewRule::new("draft", ["x"]).with_condition(Condition::predicate("missing")),
        ];
        for rule in cases {
            let err = resolver.register_rule(rule).unwrap_err();
            assert!(matches!(err, PhaseSyncError::Validation(_)), "got {err}");
        }
        assert!(resolver.all_rules().is_empty());
    }

    #[test]
    fn explicit_ids_must_be_unique() {
        let mut resolver = PhaseResolver::new();
        let id = resolver
            .register_rule(NewRule::new("a", ["b"]).with_id("r1"))
            .unwrap();
        assert_eq!(id, "r1");
        assert!(resolver
            .register_rule(NewRule::new("c", ["d"]).with_id("r1"))
            .is_err());
        assert_eq!(resolver.all_rules().len(), 1);
    }

    #[test]
    fn rule_management() {
        let mut resolver = PhaseResolver::new();
        let first = resolver.register_rule(NewRule::new("a", ["b"])).unwrap();
        let second = resolver.register_rule(NewRule::new("c", ["d"])).unwrap();

        let rule = resolver.get_rule(&first).unwrap();
        assert_eq!(rule.from, "a");
        assert_eq!(rule.weight, 1.0);

        assert!(resolver.delete_rule(&first));
        assert!(!resolver.delete_rule(&first));
        assert!(resolver.get_rule(&first).is_none());
        assert_eq!(resolver.all_rules().len(), 1);
        assert_eq!(resolver.all_rules()[0].id, second);

        resolver.clear_rules();
        assert!(resolver.all_rules().is_empty());
        assert!(resolver.map("c", &Context::new()).is_empty());
    }

    #[test]
    fn custom_mapper_bypasses_rules() {
        let mut resolver = PhaseResolver::new();
        resolver.register_rule(NewRule::new("draft", ["planning"])).unwrap();
        resolver.register_custom_mapper(
            "upper",
            |from: &str, _ctx: &Context| -> std::result::Result<Vec<String>, String> {
                Ok(vec![from.to_uppercase()])
            },
        );

        let phases = resolver
            .map_with_custom_mapper("upper", "draft", &Context::new())
            .unwrap();
        assert_eq!(phases, vec!["DRAFT"]);
    }

    #[test]
    fn custom_mapper_errors() {
        let mut resolver = PhaseResolver::new();
        resolver.register_custom_mapper(
            "broken",
            |_: &str, _: &Context| -> std::result::Result<Vec<String>, String> {
                Err("nope".to_string())
            },
        );
        resolver.register_custom_mapper(
            "blank",
            |_: &str, _: &Context| -> std::result::Result<Vec<String>, String> {
                Ok(vec![String::new()])
            },
        );

        let err = resolver
            .map_with_custom_mapper("missing", "draft", &Context::new())
            .unwrap_err();
        assert!(matches!(err, PhaseSyncError::NotFound { .. }));

        let err = resolver
            .map_with_custom_mapper("broken", "draft", &Context::new())
            .unwrap_err();
        assert!(matches!(err, PhaseSyncError::Contract(_)));

        let err = resolver
            .map_with_custom_mapper("blank", "draft", &Context::new())
            .unwrap_err();
        assert!(matches!(err, PhaseSyncError::Contract(_)));
    }

    #[test]
    fn conditional_strategy_ignores_unconditioned_rules() {
        let mut resolver = PhaseResolver::new();
        resolver
            .register_rule(NewRule::new("draft", ["planning"]).with_weight(5.0))
            .unwrap();
        resolver
            .register_rule(NewRule::new("draft", ["fast-track"]).with_condition(Condition::OneOf {
                key: "priority".into(),
                values: vec![json!("p0"), json!("p1")],
            }))
            .unwrap();

        let context = ctx(json!({ "priority": "p0" }));
        assert_eq!(
            resolver
                .resolve(&MappingStrategy::Conditional, "draft", &context)
                .unwrap(),
            vec!["fast-track"]
        );
        assert_eq!(
            resolver
                .resolve(&MappingStrategy::Weighted, "draft", &context)
                .unwrap(),
            vec!["planning", "fast-track"]
        );
    }

    #[test]
    fn rule_set_from_toml() {
        let contents = r#"
            [[rules]]
            from = "draft"
            to = ["planning"]

            [[rules]]
            id = "hotfix"
            from = "draft"
            to = ["implement"]
            weight = 2.0
            condition = { op = "equals", key = "kind", value = "hotfix" }
        "#;
        let set = RuleSet::from_toml_str(contents).unwrap();
        assert_eq!(set.rules.len(), 2);

        let mut resolver = PhaseResolver::new();
        let ids = resolver.register_rules(set).unwrap();
        assert_eq!(ids[1], "hotfix");

        let hotfix = ctx(json!({ "kind": "hotfix" }));
        assert_eq!(resolver.map("draft", &hotfix), vec!["implement", "planning"]);
        assert_eq!(resolver.map("draft", &Context::new()), vec!["planning"]);
    }

    #[test]
    fn invalid_rule_set_registers_nothing() {
        let mut resolver = PhaseResolver::new();
        resolver
            .register_rule(NewRule::new("review", ["design"]).with_id("existing"))
            .unwrap();

        let bad_target = RuleSet {
            rules: vec![
                NewRule::new("draft", ["planning"]),
                NewRule::new("approved", Vec::<String>::new()),
            ],
        };
        assert!(matches!(
            resolver.register_rules(bad_target),
            Err(PhaseSyncError::Validation(_))
        ));

        let duplicate_ids = RuleSet {
            rules: vec![
                NewRule::new("draft", ["planning"]).with_id("dup"),
                NewRule::new("draft", ["backlog"]).with_id("dup"),
            ],
        };
        assert!(resolver.register_rules(duplicate_ids).is_err());

        let clashes = RuleSet {
            rules: vec![
                NewRule::new("draft", ["planning"]),
                NewRule::new("draft", ["backlog"]).with_id("existing"),
            ],
        };
        assert!(resolver.register_rules(clashes).is_err());

        assert_eq!(resolver.all_rules().len(), 1);
        assert!(resolver.map("draft", &Context::new()).is_empty());
    }

    #[test]
    fn condition_serializes_with_tag() {
        let condition = Condition::equals("kind", "hotfix");
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json, json!({ "op": "equals", "key": "kind", "value": "hotfix" }));
    }
}
