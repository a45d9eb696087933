use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RulesetError};
use crate::event::Action;

pub mod sbpl;

/// A filter or modifier argument. SBPL distinguishes quoted strings from
/// bare integers, so both survive the round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Int(u64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterArgument {
    pub value: ArgValue,
    /// Rendered verbatim in place of the value when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// A rule filter. `require-all`, `require-any` and `require-not` nest
/// subfilters; every other filter carries arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<FilterArgument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subfilters: Vec<Filter>,
}

impl Filter {
    pub fn is_combinator(&self) -> bool {
        matches!(
            self.name.as_str(),
            "require-all" | "require-any" | "require-not"
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifier {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<ArgValue>,
}

/// One profile rule. Rules are opaque values: two rules are equal iff their
/// structured representation is equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub action: Action,
    pub operations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<Modifier>,
}

impl Rule {
    pub fn is_default(&self) -> bool {
        self.operations.iter().any(|op| op == "default")
    }

    fn default_with(action: Action) -> Self {
        Rule {
            action,
            operations: vec!["default".to_string()],
            filters: Vec::new(),
            modifiers: Vec::new(),
        }
    }
}

/// An ordered sandbox profile. Later rules override earlier ones in the
/// kernel, so the sequence is never permuted. All edit operations return
/// fresh values and leave their input untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        for (i, rule) in rules.iter().enumerate() {
            if rules[..i].contains(rule) {
                log::warn!(
                    "ruleset contains a duplicate of rule {i}; \
                     index lookups will resolve to the earliest copy"
                );
            }
        }
        Self { rules }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RulesetError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let rules: Vec<Rule> = serde_json::from_str(content).map_err(RulesetError::Parse)?;
        Ok(Self::new(rules))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    /// Split off the last rule. Returns the shortened set, the removed rule
    /// and its index (which, because shrinking only ever trims the tail, is
    /// also the rule's index in the original set).
    pub fn remove_last(&self) -> Result<(RuleSet, Rule, usize)> {
        let (last, rest) = self.rules.split_last().ok_or(RulesetError::Empty)?;
        Ok((
            RuleSet {
                rules: rest.to_vec(),
            },
            last.clone(),
            self.rules.len() - 1,
        ))
    }

    pub fn get_nth(&self, n: usize) -> Option<&Rule> {
        self.rules.get(n)
    }

    /// Smallest index holding a rule structurally equal to `rule`.
    pub fn index_of(&self, rule: &Rule) -> Option<usize> {
        self.rules.iter().position(|r| r == rule)
    }

    /// The first rule whose operations contain `"default"`, with its index.
    pub fn get_default(&self) -> Option<(usize, &Rule)> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.is_default())
    }

    /// A copy with the default rule's action replaced, or with a fresh
    /// `(action default)` rule prepended when no default rule exists.
    pub fn set_default(&self, action: Action) -> RuleSet {
        let mut rules = self.rules.clone();
        match rules.iter_mut().find(|rule| rule.is_default()) {
            Some(rule) => rule.action = action,
            None => rules.insert(0, Rule::default_with(action)),
        }
        RuleSet { rules }
    }

    pub fn is_default_allow(&self) -> bool {
        matches!(self.get_default(), Some((_, rule)) if rule.action == Action::Allow)
    }

    /// The rules that can govern events of `op`: those whose operation list
    /// intersects the operation's fallback chain.
    pub fn rules_governing(&self, op: &str) -> Vec<(usize, &Rule)> {
        let relevant = crate::ops::relevant_operations(op);
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.operations.iter().any(|o| relevant.contains(o)))
            .collect()
    }
}
