//! A simulated batch oracle for driving the engine without forking.
//!
//! The simulation deliberately consumes the serialised SBPL text rather
//! than the structured rules, so the wire format the real oracle would see
//! stays honest: profiles are dumped, re-parsed as s-expressions and
//! evaluated structurally (later rules override earlier ones, filters are
//! compared under the queried category, unmatched operations fall back to
//! their built-in default and then to the profile's default rule).

use std::collections::HashMap;

use sbmatch::error::Result;
use sbmatch::event::{Action, LogEntry};
use sbmatch::ops;
use sbmatch::oracle::{strategy, BatchOracle, Decision, FilterCategory};
use sbmatch::ruleset::{sbpl, RuleSet};

#[derive(Debug, Clone)]
enum Sexp {
    Atom(String),
    Str(String),
    List(Vec<Sexp>),
}

enum Token {
    Open,
    Close,
    Atom(String),
    Str(String),
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                s.push(escaped);
                            }
                        }
                        '"' => break,
                        other => s.push(other),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' {
                        break;
                    }
                    s.push(c);
                    chars.next();
                }
                tokens.push(Token::Atom(s));
            }
        }
    }
    tokens
}

fn parse_one(tokens: &[Token], pos: usize) -> (Sexp, usize) {
    match &tokens[pos] {
        Token::Open => {
            let mut items = Vec::new();
            let mut pos = pos + 1;
            while !matches!(tokens[pos], Token::Close) {
                let (item, next) = parse_one(tokens, pos);
                items.push(item);
                pos = next;
            }
            (Sexp::List(items), pos + 1)
        }
        Token::Close => panic!("unbalanced profile text"),
        Token::Atom(a) => (Sexp::Atom(a.clone()), pos + 1),
        Token::Str(s) => (Sexp::Str(s.clone()), pos + 1),
    }
}

fn parse_sexps(text: &str) -> Vec<Sexp> {
    let tokens = tokenize(text);
    let mut sexps = Vec::new();
    let mut pos = 0;
    while pos < tokens.len() {
        let (sexp, next) = parse_one(&tokens, pos);
        sexps.push(sexp);
        pos = next;
    }
    sexps
}

#[derive(Debug)]
enum SimFilter {
    Pred { name: String, args: Vec<String> },
    All(Vec<SimFilter>),
    Any(Vec<SimFilter>),
    Not(Vec<SimFilter>),
}

#[derive(Debug)]
struct SimRule {
    allow: bool,
    operations: Vec<String>,
    filters: Vec<SimFilter>,
}

#[derive(Debug)]
struct SimProfile {
    rules: Vec<SimRule>,
}

fn build_filter(parts: &[Sexp]) -> SimFilter {
    let name = match parts.first() {
        Some(Sexp::Atom(n)) => n.clone(),
        _ => String::new(),
    };
    let subfilters = |parts: &[Sexp]| {
        parts[1..]
            .iter()
            .filter_map(|p| match p {
                Sexp::List(list) => Some(build_filter(list)),
                _ => None,
            })
            .collect()
    };
    match name.as_str() {
        "require-all" => SimFilter::All(subfilters(parts)),
        "require-any" => SimFilter::Any(subfilters(parts)),
        "require-not" => SimFilter::Not(subfilters(parts)),
        _ => {
            let args = parts[1..]
                .iter()
                .map(|p| match p {
                    Sexp::Str(s) => s.clone(),
                    Sexp::Atom(a) => a.clone(),
                    Sexp::List(_) => String::new(),
                })
                .collect();
            SimFilter::Pred { name, args }
        }
    }
}

fn build_profile(text: &str) -> SimProfile {
    let mut rules = Vec::new();
    for sexp in parse_sexps(text) {
        let Sexp::List(items) = sexp else { continue };
        let Some(Sexp::Atom(head)) = items.first() else {
            continue;
        };
        let allow = match head.as_str() {
            "allow" => true,
            "deny" => false,
            _ => continue, // (version 1)
        };

        let mut operations = Vec::new();
        let mut filters = Vec::new();
        for item in &items[1..] {
            match item {
                Sexp::Atom(op) => operations.push(op.clone()),
                Sexp::List(parts) => {
                    if matches!(parts.first(), Some(Sexp::Atom(n)) if n == "with") {
                        continue; // modifiers do not affect the decision
                    }
                    filters.push(build_filter(parts));
                }
                Sexp::Str(_) => {}
            }
        }
        rules.push(SimRule {
            allow,
            operations,
            filters,
        });
    }
    SimProfile { rules }
}

fn filter_category(name: &str) -> FilterCategory {
    match name {
        "subpath" | "literal" | "prefix" | "regex" | "path" => FilterCategory::Path,
        "global-name" => FilterCategory::GlobalName,
        "local-name" => FilterCategory::LocalName,
        "appleevent-destination" => FilterCategory::AppleeventDestination,
        "right-name" => FilterCategory::RightName,
        "preference-domain" => FilterCategory::PreferenceDomain,
        "kext-bundle-id" => FilterCategory::KextBundleId,
        "info-type" => FilterCategory::InfoType,
        "notification" => FilterCategory::Notification,
        _ => FilterCategory::None,
    }
}

impl SimFilter {
    fn matches(&self, category: FilterCategory, argument: &str) -> bool {
        match self {
            SimFilter::All(subs) => subs.iter().all(|f| f.matches(category, argument)),
            SimFilter::Any(subs) => subs.iter().any(|f| f.matches(category, argument)),
            SimFilter::Not(subs) => !subs.iter().all(|f| f.matches(category, argument)),
            SimFilter::Pred { name, args } => {
                // A query under the wrong category never matches; this is
                // what makes ambiguous-category sweeps sound on default-deny
                // profiles and hopeless on default-allow ones.
                if filter_category(name) != category {
                    return false;
                }
                args.iter().any(|value| match name.as_str() {
                    "subpath" => {
                        argument == value || argument.starts_with(&format!("{value}/"))
                    }
                    "prefix" => argument.starts_with(value.as_str()),
                    _ => argument == value,
                })
            }
        }
    }
}

impl SimRule {
    fn governs(&self, relevant: &std::collections::BTreeSet<String>) -> bool {
        self.operations
            .iter()
            .any(|op| op != "default" && relevant.contains(op))
    }

    fn matches(&self, category: FilterCategory, argument: Option<&str>) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let Some(argument) = argument else {
            return false;
        };
        self.filters.iter().any(|f| f.matches(category, argument))
    }
}

fn sim_check(
    profile: &SimProfile,
    op: &str,
    category: FilterCategory,
    argument: Option<&str>,
) -> Option<bool> {
    let relevant = ops::relevant_operations(op);

    // Later rules override earlier ones.
    let governing = profile
        .rules
        .iter()
        .rev()
        .find(|rule| rule.governs(&relevant) && rule.matches(category, argument));
    if let Some(rule) = governing {
        return Some(rule.allow);
    }

    // No rule applies: operations with a built-in allow stay allowed even on
    // default-deny profiles; everything else falls to the default rule.
    if ops::default_action(op) == Action::Allow {
        return Some(true);
    }
    let default_rule = profile
        .rules
        .iter()
        .find(|rule| rule.operations.iter().any(|op| op == "default"));
    Some(default_rule.map(|rule| rule.allow).unwrap_or(false))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    /// Behaves like the kernel-query probe, ambiguities included.
    Kernel,
    /// Behaves like the active probes: evaluates ambiguous operations under
    /// their true filter category.
    Active,
}

pub struct SimOracle {
    mode: SimMode,
    true_categories: HashMap<String, FilterCategory>,
}

impl SimOracle {
    pub fn kernel() -> Self {
        Self {
            mode: SimMode::Kernel,
            true_categories: HashMap::new(),
        }
    }

    pub fn active() -> Self {
        Self {
            mode: SimMode::Active,
            true_categories: HashMap::new(),
        }
    }

    pub fn with_true_category(mut self, op: &str, category: FilterCategory) -> Self {
        self.true_categories.insert(op.to_string(), category);
        self
    }
}

impl BatchOracle for SimOracle {
    fn evaluate(&mut self, rules: &RuleSet, events: &[LogEntry]) -> Result<Vec<Decision>> {
        let text = sbpl::dump(rules)?;
        let profile = build_profile(&text);
        let default_allow = rules.is_default_allow();

        Ok(events
            .iter()
            .map(|entry| {
                if self.mode == SimMode::Active {
                    if let Some(&category) = self.true_categories.get(&entry.operation) {
                        let argument = entry.argument_str();
                        if !argument.is_empty() {
                            return match sim_check(
                                &profile,
                                &entry.operation,
                                category,
                                Some(argument),
                            ) {
                                Some(true) => Decision::Allow,
                                Some(false) => Decision::Deny,
                                None => Decision::Error,
                            };
                        }
                    }
                }
                strategy::decide(
                    |op, category, argument| sim_check(&profile, op, category, argument),
                    entry,
                    default_allow,
                )
            })
            .collect())
    }
}

pub fn ruleset(json: serde_json::Value) -> RuleSet {
    serde_json::from_value(json).expect("test ruleset must parse")
}

pub fn entry(op: &str, argument: &str, action: Action) -> LogEntry {
    LogEntry {
        operation: op.to_string(),
        argument: if argument.is_empty() {
            None
        } else {
            Some(argument.to_string())
        },
        action,
    }
}
