//! Result output. Machine-readable JSON goes to stdout (or a file); the
//! optional human-readable account of each event goes to stderr.

use std::io::Write;

use colored::Colorize;

use crate::engine::Attribution;
use crate::error::Result;
use crate::event::{Action, LogEntry};
use crate::ruleset::RuleSet;

/// Write the attribution as `[event_index, result]` rows, where `result` is
/// a rule index, `"inconsistent"` or `"external"`.
pub fn write_attributions<W: Write>(mut out: W, attributions: &[Attribution]) -> Result<()> {
    let rows: Vec<(usize, &Attribution)> = attributions.iter().enumerate().collect();
    serde_json::to_writer_pretty(&mut out, &rows)?;
    writeln!(out)?;
    Ok(())
}

/// Write the consistency verdicts as a `true | false | null` array aligned
/// with the input events.
pub fn write_consistency<W: Write>(mut out: W, results: &[Option<bool>]) -> Result<()> {
    serde_json::to_writer(&mut out, results)?;
    writeln!(out)?;
    Ok(())
}

/// Colored per-event report on stderr.
///
/// Verbosity 0 is silent; 1 shows unattributed events and the summary; 2
/// shows every event.
pub struct TerminalReporter {
    verbosity: u8,
}

impl TerminalReporter {
    pub fn new(verbosity: u8, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { verbosity }
    }

    pub fn report(&self, rules: &RuleSet, events: &[LogEntry], attributions: &[Attribution]) {
        if self.verbosity == 0 {
            return;
        }

        for (i, (entry, attribution)) in events.iter().zip(attributions).enumerate() {
            let attributed = matches!(attribution, Attribution::Rule(_));
            if attributed && self.verbosity < 2 {
                continue;
            }
            eprintln!("{}", format_entry(i, rules, entry, attribution));
        }

        let matched = attributions
            .iter()
            .filter(|a| matches!(a, Attribution::Rule(_)))
            .count();
        let inconsistent = attributions
            .iter()
            .filter(|a| matches!(a, Attribution::Inconsistent))
            .count();
        let external = attributions
            .iter()
            .filter(|a| matches!(a, Attribution::External))
            .count();

        eprintln!("\n{}", "=== Attribution Summary ===".bold());
        eprintln!("Events:       {}", events.len());
        eprintln!("Attributed:   {matched}");
        eprintln!("Inconsistent: {inconsistent}");
        eprintln!("External:     {external}");
    }
}

fn format_entry(i: usize, rules: &RuleSet, entry: &LogEntry, attribution: &Attribution) -> String {
    let index = format!("#{i}").dimmed();
    let action = match entry.action {
        Action::Allow => "ALLOW".green().to_string(),
        Action::Deny => "DENY".red().bold().to_string(),
    };
    let operation = entry.operation.cyan();
    let argument = entry.argument_str();

    let outcome = match attribution {
        Attribution::Rule(rule_index) => match rules.get_nth(*rule_index) {
            Some(rule) => format!(
                "rule {rule_index} ({} {})",
                rule.action,
                rule.operations.join(" ")
            ),
            None => format!("rule {rule_index}"),
        },
        Attribution::Inconsistent => {
            let candidates = rules.rules_governing(&entry.operation).len();
            format!(
                "{} ({candidates} candidate rules)",
                "inconsistent".yellow().bold()
            )
        }
        Attribution::External => "external".blue().to_string(),
    };

    format!("{index} {action:<5} {operation} {argument} -> {outcome}")
}
