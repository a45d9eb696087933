//! Per-event probing strategy, shared by the kernel probe and by simulated
//! checks in tests.

use crate::event::LogEntry;

use super::{Decision, FilterCategory};

/// Decide one event against the active sandbox.
///
/// `check` performs a single low-level query; `None` signals a protocol
/// failure and turns the whole decision into `Decision::Error`.
///
/// Events without an argument are queried once with no filter category.
/// Events whose operation maps to a single category are queried once with
/// it. For ambiguous operations the answer depends on the profile: under a
/// default-allow profile a query on a wrong category still comes back
/// allowed, indistinguishable from a genuine allow, so no sound decision
/// exists and the result is `Unknown`. Under default-deny only the correct
/// category can produce an allow, so the categories are swept and a single
/// allow is authoritative.
pub fn decide<C>(mut check: C, entry: &LogEntry, default_allow: bool) -> Decision
where
    C: FnMut(&str, FilterCategory, Option<&str>) -> Option<bool>,
{
    let op = entry.operation.as_str();
    let argument = entry.argument_str();

    if argument.is_empty() {
        return verdict(check(op, FilterCategory::None, None));
    }

    match FilterCategory::for_operation(op, true) {
        FilterCategory::Unknown => {
            if default_allow {
                return Decision::Unknown;
            }
            for category in FilterCategory::CONCRETE {
                match check(op, category, Some(argument)) {
                    Some(true) => return Decision::Allow,
                    Some(false) => {}
                    None => return Decision::Error,
                }
            }
            Decision::Deny
        }
        category => verdict(check(op, category, Some(argument))),
    }
}

fn verdict(allowed: Option<bool>) -> Decision {
    match allowed {
        Some(true) => Decision::Allow,
        Some(false) => Decision::Deny,
        None => Decision::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;

    fn entry(op: &str, argument: Option<&str>) -> LogEntry {
        LogEntry {
            operation: op.to_string(),
            argument: argument.map(|s| s.to_string()),
            action: Action::Allow,
        }
    }

    #[test]
    fn no_argument_queries_without_category_once() {
        let mut calls = Vec::new();
        let decision = decide(
            |op, category, argument| {
                calls.push((op.to_string(), category, argument.map(String::from)));
                Some(true)
            },
            &entry("process-fork", None),
            false,
        );
        assert_eq!(decision, Decision::Allow);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, FilterCategory::None);
        assert_eq!(calls[0].2, None);
    }

    #[test]
    fn resolved_category_queries_once() {
        let mut calls = 0;
        let decision = decide(
            |_, category, _| {
                calls += 1;
                assert_eq!(category, FilterCategory::Path);
                Some(false)
            },
            &entry("file-read-data", Some("/etc/hosts")),
            false,
        );
        assert_eq!(decision, Decision::Deny);
        assert_eq!(calls, 1);
    }

    #[test]
    fn ambiguous_category_on_default_allow_is_unknown_without_querying() {
        let decision = decide(
            |_, _, _| panic!("must not query"),
            &entry("iokit-open", Some("IGAccelDevice")),
            true,
        );
        assert_eq!(decision, Decision::Unknown);
    }

    #[test]
    fn ambiguous_category_on_default_deny_sweeps_all_categories() {
        let mut seen = Vec::new();
        let decision = decide(
            |_, category, _| {
                seen.push(category);
                Some(false)
            },
            &entry("iokit-open", Some("IGAccelDevice")),
            false,
        );
        assert_eq!(decision, Decision::Deny);
        assert_eq!(seen, FilterCategory::CONCRETE.to_vec());
    }

    #[test]
    fn sweep_stops_at_first_allow() {
        let mut calls = 0;
        let decision = decide(
            |_, category, _| {
                calls += 1;
                Some(category == FilterCategory::GlobalName)
            },
            &entry("mach-bootstrap", Some("com.example.service")),
            false,
        );
        assert_eq!(decision, Decision::Allow);
        assert_eq!(calls, 2);
    }

    #[test]
    fn check_failure_is_an_error() {
        let decision = decide(
            |_, _, _| None,
            &entry("file-read-data", Some("/etc/hosts")),
            false,
        );
        assert_eq!(decision, Decision::Error);
    }
}
