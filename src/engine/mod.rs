//! The differential attribution engine.
//!
//! Attribution works backwards from the oracle: evaluate the whole event
//! batch against the full profile (the baseline), then repeatedly strip the
//! last rule and re-evaluate. The rule whose removal first changes an
//! event's decision is the rule that governed it. Denies explained by the
//! default-deny rule never change during the shrink (the kernel's own
//! default takes over) and are fixed up afterwards.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{OracleError, Result, RulesetError};
use crate::event::{Action, LogEntry};
use crate::oracle::{BatchOracle, Decision};
use crate::ruleset::RuleSet;

/// Where an observed event's outcome came from.
///
/// `Rule` carries an index into the original input rule set, never into a
/// shrunk intermediate. `External` marks events explained by something the
/// profile does not contain (typically an operation whose built-in default
/// is allow, observed on a default-deny profile).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    Rule(usize),
    Inconsistent,
    External,
}

impl Serialize for Attribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Attribution::Rule(index) => serializer.serialize_u64(*index as u64),
            Attribution::Inconsistent => serializer.serialize_str("inconsistent"),
            Attribution::External => serializer.serialize_str("external"),
        }
    }
}

impl<'de> Deserialize<'de> for Attribution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Index(u64),
            Tag(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Index(index) => Ok(Attribution::Rule(index as usize)),
            Repr::Tag(tag) => match tag.as_str() {
                "inconsistent" => Ok(Attribution::Inconsistent),
                "external" => Ok(Attribution::External),
                other => Err(D::Error::custom(format!("unknown attribution: {other}"))),
            },
        }
    }
}

/// Engine tunables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Confirm each default-deny attribution against a default-allow sibling
    /// profile (one extra oracle call for the whole batch). Attributions the
    /// sibling still denies are demoted to `External`.
    pub verify_default_deny: bool,
}

/// Attribute every event to the rule that governed it.
pub fn attribute(
    rules: &RuleSet,
    events: &[LogEntry],
    oracle: &mut dyn BatchOracle,
    options: EngineOptions,
) -> Result<Vec<Attribution>> {
    if rules.is_empty() {
        return Err(RulesetError::Empty.into());
    }

    // Phase A: baseline and consistency.
    let baseline = oracle.evaluate(rules, events)?;
    let mut consistent: Vec<bool> = baseline
        .iter()
        .zip(events)
        .map(|(decision, entry)| decision.agrees_with(entry.action))
        .collect();

    // Phase B: iterative shrink. Only the tail is ever removed, so the
    // index reported by remove_last is the rule's original index.
    let mut matched: Vec<Option<usize>> = vec![None; events.len()];
    let mut working = rules.clone();
    while !working.is_empty() {
        let (shrunk, removed, index) = working.remove_last()?;
        let step = oracle.evaluate(&shrunk, events)?;
        log::debug!(
            "shrink step: removed rule {index} ({} {})",
            removed.action,
            removed.operations.join(" ")
        );

        for i in 0..events.len() {
            if !consistent[i] || matched[i].is_some() {
                continue;
            }
            // A decision that merely degrades to unknown or error is not a
            // removal witness.
            if step[i].is_definitive() && step[i] != baseline[i] {
                matched[i] = Some(index);
            }
        }

        working = shrunk;
    }

    // Phase C: default-deny fix-up. Removing the default-deny rule changes
    // nothing because the kernel's own default is also deny, so these events
    // are still unmatched here.
    let default_rule = rules.get_default();
    let mut external = vec![false; events.len()];
    let mut fixed_up = Vec::new();
    for i in 0..events.len() {
        if !consistent[i] || matched[i].is_some() {
            continue;
        }
        match default_rule {
            Some((index, rule))
                if rule.action == Action::Deny && events[i].action == Action::Deny =>
            {
                matched[i] = Some(index);
                fixed_up.push(i);
            }
            _ => {
                if crate::ops::default_action(&events[i].operation) == Action::Allow {
                    log::debug!(
                        "event {i} ({}) is explained by the operation's built-in allow",
                        events[i].operation
                    );
                }
                consistent[i] = false;
                external[i] = true;
            }
        }
    }

    if options.verify_default_deny && !fixed_up.is_empty() {
        let sibling = rules.set_default(Action::Allow);
        let flipped = oracle.evaluate(&sibling, events)?;
        for &i in &fixed_up {
            if flipped[i] != Decision::Allow {
                log::debug!(
                    "event {i} still denied under a default-allow sibling; \
                     the profile does not explain it"
                );
                matched[i] = None;
                consistent[i] = false;
                external[i] = true;
            }
        }
    }

    // Phase D: synthesis.
    Ok((0..events.len())
        .map(|i| {
            if consistent[i] {
                if let Some(index) = matched[i] {
                    return Attribution::Rule(index);
                }
            }
            if external[i] {
                Attribution::External
            } else {
                Attribution::Inconsistent
            }
        })
        .collect())
}

/// Operations the kernel-query oracle decides too leniently; their events
/// go through the active-probe tier even when the first tier was happy.
pub fn must_recheck(operation: &str) -> bool {
    operation == "mach-register"
}

/// Whether `entry` belongs in the second, active-probe tier.
pub fn should_rematch(prior: &Attribution, entry: &LogEntry) -> bool {
    !matches!(prior, Attribution::Rule(_)) || must_recheck(&entry.operation)
}

/// Two-tier driver: re-run attribution on the doubtful subset with the
/// active-probe oracle and merge the results back by original index.
pub fn rematch(
    rules: &RuleSet,
    events: &[LogEntry],
    prior: &[Attribution],
    oracle: &mut dyn BatchOracle,
    options: EngineOptions,
) -> Result<Vec<Attribution>> {
    if events.len() != prior.len() {
        return Err(crate::error::SbmatchError::InvalidArgument(format!(
            "{} events but {} prior attributions",
            events.len(),
            prior.len()
        )));
    }

    let picked: Vec<usize> = (0..events.len())
        .filter(|&i| should_rematch(&prior[i], &events[i]))
        .collect();
    log::info!("rechecking {}/{} events", picked.len(), events.len());
    if picked.is_empty() {
        return Ok(prior.to_vec());
    }

    let subset: Vec<LogEntry> = picked.iter().map(|&i| events[i].clone()).collect();
    let redone = attribute(rules, &subset, oracle, options)?;

    let mut merged = prior.to_vec();
    for (&i, attribution) in picked.iter().zip(redone) {
        merged[i] = attribution;
    }
    Ok(merged)
}

/// Decision fusion for the consistency tool.
///
/// `kernel` queries the already-confined calling process; `perform` runs the
/// active probe. An event is consistent when the kernel agrees with the
/// observation, unless its operation must be rechecked; then the active
/// probe has the last word. `None` marks events nothing could decide.
pub fn check_consistency<K, P>(
    events: &[LogEntry],
    mut kernel: K,
    mut perform: P,
) -> Result<Vec<Option<bool>>>
where
    K: FnMut(&LogEntry) -> Decision,
    P: FnMut(&LogEntry) -> Decision,
{
    let mut results = Vec::with_capacity(events.len());

    for (i, entry) in events.iter().enumerate() {
        let queried = kernel(entry);
        if queried == Decision::Error {
            return Err(OracleError::ProbeFailed {
                index: i,
                operation: entry.operation.clone(),
            }
            .into());
        }

        if queried.agrees_with(entry.action) && !must_recheck(&entry.operation) {
            results.push(Some(true));
            continue;
        }

        let performed = perform(entry);
        match performed {
            Decision::Error => {
                return Err(OracleError::ProbeFailed {
                    index: i,
                    operation: entry.operation.clone(),
                }
                .into());
            }
            Decision::Unknown => {
                if queried == Decision::Unknown {
                    results.push(None);
                } else {
                    results.push(Some(queried.agrees_with(entry.action)));
                }
            }
            _ => results.push(Some(performed.agrees_with(entry.action))),
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Oracle that replays scripted decision vectors, for exercising the
    /// phase mechanics in isolation.
    struct ScriptedOracle {
        responses: VecDeque<Vec<Decision>>,
    }

    impl ScriptedOracle {
        fn new(responses: Vec<Vec<Decision>>) -> Self {
            Self {
                responses: responses.into(),
            }
        }
    }

    impl BatchOracle for ScriptedOracle {
        fn evaluate(&mut self, _rules: &RuleSet, _events: &[LogEntry]) -> Result<Vec<Decision>> {
            Ok(self.responses.pop_front().expect("script exhausted"))
        }
    }

    fn rules(json: &str) -> RuleSet {
        RuleSet::from_json(json).unwrap()
    }

    fn entry(op: &str, argument: &str, action: Action) -> LogEntry {
        LogEntry {
            operation: op.to_string(),
            argument: Some(argument.to_string()),
            action,
        }
    }

    const TWO_RULES: &str = r#"[
        {"action": "deny", "operations": ["default"]},
        {"action": "allow", "operations": ["file-read-data"],
         "filters": [{"name": "subpath", "arguments": [{"value": "/etc"}]}]}
    ]"#;

    use crate::oracle::Decision::{Allow, Deny, Unknown};

    #[test]
    fn removal_witness_attributes_to_the_removed_rule() {
        let set = rules(TWO_RULES);
        let events = vec![entry("file-read-data", "/etc/hosts", Action::Allow)];
        // baseline allow; removing rule 1 flips to deny; removing rule 0
        // leaves deny.
        let mut oracle =
            ScriptedOracle::new(vec![vec![Allow], vec![Deny], vec![Deny]]);
        let result = attribute(&set, &events, &mut oracle, EngineOptions::default()).unwrap();
        assert_eq!(result, vec![Attribution::Rule(1)]);
    }

    #[test]
    fn decision_degrading_to_unknown_is_not_a_witness() {
        let set = rules(TWO_RULES);
        let events = vec![entry("file-read-data", "/etc/hosts", Action::Allow)];
        // The shrink steps return unknown; nothing may be attributed to the
        // removed rules, and the event ends up external via phase C (it is
        // consistent but allowed, so the default-deny rule cannot explain
        // it).
        let mut oracle =
            ScriptedOracle::new(vec![vec![Allow], vec![Unknown], vec![Unknown]]);
        let result = attribute(&set, &events, &mut oracle, EngineOptions::default()).unwrap();
        assert_eq!(result, vec![Attribution::External]);
    }

    #[test]
    fn unchanged_deny_falls_back_to_the_default_rule() {
        let set = rules(TWO_RULES);
        let events = vec![entry("file-read-data", "/var/log/secret", Action::Deny)];
        let mut oracle = ScriptedOracle::new(vec![vec![Deny], vec![Deny], vec![Deny]]);
        let result = attribute(&set, &events, &mut oracle, EngineOptions::default()).unwrap();
        assert_eq!(result, vec![Attribution::Rule(0)]);
    }

    #[test]
    fn inconsistent_baseline_is_reported_as_such() {
        let set = rules(TWO_RULES);
        let events = vec![entry("file-read-data", "/var/log/secret", Action::Allow)];
        let mut oracle = ScriptedOracle::new(vec![vec![Deny], vec![Deny], vec![Deny]]);
        let result = attribute(&set, &events, &mut oracle, EngineOptions::default()).unwrap();
        assert_eq!(result, vec![Attribution::Inconsistent]);
    }

    #[test]
    fn sibling_verification_demotes_unexplained_denies() {
        let set = rules(TWO_RULES);
        let events = vec![entry("file-ioctl", "/dev/null", Action::Deny)];
        // Unchanged deny through the shrink, and the default-allow sibling
        // still denies: no rule of this profile explains the event.
        let mut oracle = ScriptedOracle::new(vec![
            vec![Deny], // baseline
            vec![Deny], // shrink step 1
            vec![Deny], // shrink step 2
            vec![Deny], // sibling
        ]);
        let options = EngineOptions {
            verify_default_deny: true,
        };
        let result = attribute(&set, &events, &mut oracle, options).unwrap();
        assert_eq!(result, vec![Attribution::External]);
    }

    #[test]
    fn sibling_verification_confirms_real_default_denies() {
        let set = rules(TWO_RULES);
        let events = vec![entry("file-read-data", "/var/log/secret", Action::Deny)];
        let mut oracle = ScriptedOracle::new(vec![
            vec![Deny],
            vec![Deny],
            vec![Deny],
            vec![Allow], // sibling allows: the default rule was responsible
        ]);
        let options = EngineOptions {
            verify_default_deny: true,
        };
        let result = attribute(&set, &events, &mut oracle, options).unwrap();
        assert_eq!(result, vec![Attribution::Rule(0)]);
    }

    #[test]
    fn empty_ruleset_is_rejected() {
        let set = RuleSet::new(Vec::new());
        let mut oracle = ScriptedOracle::new(vec![]);
        assert!(attribute(&set, &[], &mut oracle, EngineOptions::default()).is_err());
    }

    #[test]
    fn attribution_serde_round_trip() {
        let rows = vec![
            (0usize, Attribution::Rule(3)),
            (1, Attribution::Inconsistent),
            (2, Attribution::External),
        ];
        let json = serde_json::to_string(&rows).unwrap();
        assert_eq!(json, r#"[[0,3],[1,"inconsistent"],[2,"external"]]"#);
        let back: Vec<(usize, Attribution)> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn should_rematch_selects_doubtful_and_lenient_entries() {
        let consistent = entry("file-read-data", "/etc/hosts", Action::Allow);
        let lenient = entry("mach-register", "com.example.svc", Action::Allow);
        assert!(!should_rematch(&Attribution::Rule(1), &consistent));
        assert!(should_rematch(&Attribution::Inconsistent, &consistent));
        assert!(should_rematch(&Attribution::External, &consistent));
        assert!(should_rematch(&Attribution::Rule(1), &lenient));
    }

    #[test]
    fn check_consistency_fusion() {
        let events = vec![
            entry("file-read-data", "/etc/hosts", Action::Allow),
            entry("mach-register", "com.example.svc", Action::Allow),
            entry("iokit-open", "IGAccelDevice", Action::Deny),
        ];
        // Kernel: allow, allow, unknown. Active probe: (unused), deny,
        // unknown.
        let kernel = |entry: &LogEntry| match entry.operation.as_str() {
            "file-read-data" => Allow,
            "mach-register" => Allow,
            _ => Unknown,
        };
        let perform = |entry: &LogEntry| match entry.operation.as_str() {
            "file-read-data" => panic!("consistent entries are not re-probed"),
            "mach-register" => Deny,
            _ => Unknown,
        };
        let results = check_consistency(&events, kernel, perform).unwrap();
        assert_eq!(results, vec![Some(true), Some(false), None]);
    }

    #[test]
    fn check_consistency_probe_error_is_fatal() {
        let events = vec![entry("ipc-posix-sem-open", "/sem", Action::Allow)];
        let result = check_consistency(&events, |_| Unknown, |_| Decision::Error);
        assert!(result.is_err());
    }
}
