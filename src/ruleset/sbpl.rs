//! Rendering of a rule set into SBPL profile text.
//!
//! The output is what the profile compiler consumes, so it must be
//! deterministic: equal rule sets produce byte-identical text. Rule order is
//! preserved verbatim because later rules override earlier ones.

use crate::error::{Result, RulesetError};
use crate::ruleset::{ArgValue, Filter, Modifier, Rule, RuleSet};

const INDENT: usize = 4;

/// Serialise the whole rule set, header included.
pub fn dump(rules: &RuleSet) -> Result<String> {
    let mut out = String::from("(version 1)\n");
    for rule in rules.iter() {
        write_rule(&mut out, rule)?;
    }
    Ok(out)
}

fn write_rule(out: &mut String, rule: &Rule) -> Result<()> {
    if rule.operations.is_empty() {
        return Err(RulesetError::Malformed("rule without operations".to_string()).into());
    }

    out.push('(');
    out.push_str(&rule.action.to_string());
    out.push('\n');

    for op in &rule.operations {
        pad(out, INDENT);
        out.push_str(op);
        out.push('\n');
    }

    for filter in &rule.filters {
        write_filter(out, filter, INDENT)?;
        out.push('\n');
    }

    for modifier in &rule.modifiers {
        write_modifier(out, modifier);
        out.push('\n');
    }

    out.push_str(")\n");
    Ok(())
}

fn write_filter(out: &mut String, filter: &Filter, padding: usize) -> Result<()> {
    if filter.is_combinator() {
        if filter.subfilters.is_empty() {
            return Err(RulesetError::Malformed(format!(
                "combinator filter `{}` without subfilters",
                filter.name
            ))
            .into());
        }
        pad(out, padding);
        out.push('(');
        out.push_str(&filter.name);
        for subfilter in &filter.subfilters {
            out.push('\n');
            write_filter(out, subfilter, padding + INDENT)?;
        }
        out.push('\n');
        pad(out, padding);
        out.push(')');
        return Ok(());
    }

    if filter.arguments.is_empty() {
        return Err(RulesetError::Malformed(format!(
            "filter `{}` without arguments",
            filter.name
        ))
        .into());
    }

    pad(out, padding);
    out.push('(');
    out.push_str(&filter.name);
    out.push(' ');
    for (i, argument) in filter.arguments.iter().enumerate() {
        if i > 0 {
            // One argument per line, lined up under the first.
            out.push('\n');
            pad(out, padding + INDENT);
        }
        match &argument.alias {
            Some(alias) => out.push_str(alias),
            None => write_value(out, &argument.value),
        }
    }
    out.push(')');
    Ok(())
}

fn write_modifier(out: &mut String, modifier: &Modifier) {
    pad(out, INDENT);
    out.push_str("(with ");
    out.push_str(&modifier.name);
    if let Some(argument) = &modifier.argument {
        out.push(' ');
        write_value(out, argument);
    }
    out.push(')');
}

fn write_value(out: &mut String, value: &ArgValue) {
    match value {
        ArgValue::Str(s) => quote(out, s),
        ArgValue::Int(n) => out.push_str(&n.to_string()),
    }
}

/// Quote a resource string. Only the characters the profile compiler itself
/// cares about are escaped.
fn quote(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

fn pad(out: &mut String, padding: usize) {
    for _ in 0..padding {
        out.push(' ');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> RuleSet {
        RuleSet::from_json(json).unwrap()
    }

    #[test]
    fn dumps_default_rule() {
        let set = parse(r#"[{"action": "deny", "operations": ["default"]}]"#);
        assert_eq!(dump(&set).unwrap(), "(version 1)\n(deny\n    default\n)\n");
    }

    #[test]
    fn dumps_filtered_rule() {
        let set = parse(
            r#"[{"action": "allow", "operations": ["file-read-data"],
                "filters": [{"name": "subpath", "arguments": [{"value": "/etc"}]}]}]"#,
        );
        assert_eq!(
            dump(&set).unwrap(),
            "(version 1)\n(allow\n    file-read-data\n    (subpath \"/etc\")\n)\n"
        );
    }

    #[test]
    fn multiple_arguments_line_up() {
        let set = parse(
            r#"[{"action": "allow", "operations": ["file-read-data"],
                "filters": [{"name": "literal",
                             "arguments": [{"value": "/a"}, {"value": "/b"}]}]}]"#,
        );
        assert_eq!(
            dump(&set).unwrap(),
            "(version 1)\n(allow\n    file-read-data\n    (literal \"/a\"\n        \"/b\")\n)\n"
        );
    }

    #[test]
    fn alias_wins_over_value_and_is_not_quoted() {
        let set = parse(
            r#"[{"action": "allow", "operations": ["file-read-data"],
                "filters": [{"name": "subpath",
                             "arguments": [{"value": "/private/etc", "alias": "(param \"ETC\")"}]}]}]"#,
        );
        let text = dump(&set).unwrap();
        assert!(text.contains("(subpath (param \"ETC\"))"));
        assert!(!text.contains("/private/etc"));
    }

    #[test]
    fn combinators_nest_with_deeper_indent() {
        let set = parse(
            r#"[{"action": "deny", "operations": ["file-write-data"],
                "filters": [{"name": "require-any", "subfilters": [
                    {"name": "subpath", "arguments": [{"value": "/usr"}]},
                    {"name": "require-not", "subfilters": [
                        {"name": "literal", "arguments": [{"value": "/usr/local"}]}
                    ]}
                ]}]}]"#,
        );
        let expected = "(version 1)\n\
                        (deny\n\
                        \x20   file-write-data\n\
                        \x20   (require-any\n\
                        \x20       (subpath \"/usr\")\n\
                        \x20       (require-not\n\
                        \x20           (literal \"/usr/local\")\n\
                        \x20       )\n\
                        \x20   )\n\
                        )\n";
        assert_eq!(dump(&set).unwrap(), expected);
    }

    #[test]
    fn modifiers_with_and_without_argument() {
        let set = parse(
            r#"[{"action": "deny", "operations": ["network-outbound"],
                "modifiers": [{"name": "no-report"},
                              {"name": "report-severity", "argument": 3},
                              {"name": "message", "argument": "blocked"}]}]"#,
        );
        let text = dump(&set).unwrap();
        assert!(text.contains("    (with no-report)\n"));
        assert!(text.contains("    (with report-severity 3)\n"));
        assert!(text.contains("    (with message \"blocked\")\n"));
    }

    #[test]
    fn quoting_escapes_only_quote_and_backslash() {
        let mut out = String::new();
        quote(&mut out, r#"/tmp/a"b\c"#);
        assert_eq!(out, r#""/tmp/a\"b\\c""#);
    }

    #[test]
    fn equal_rulesets_dump_identically() {
        let json = r#"[{"action": "deny", "operations": ["default"]},
                       {"action": "allow", "operations": ["file-read-data"],
                        "filters": [{"name": "subpath", "arguments": [{"value": "/etc"}]}]}]"#;
        assert_eq!(dump(&parse(json)).unwrap(), dump(&parse(json)).unwrap());
    }

    #[test]
    fn malformed_rules_are_rejected() {
        let no_ops = parse(r#"[{"action": "deny", "operations": []}]"#);
        assert!(dump(&no_ops).is_err());

        let empty_combinator = parse(
            r#"[{"action": "deny", "operations": ["file-read-data"],
                "filters": [{"name": "require-all"}]}]"#,
        );
        assert!(dump(&empty_combinator).is_err());

        let bare_filter = parse(
            r#"[{"action": "deny", "operations": ["file-read-data"],
                "filters": [{"name": "subpath"}]}]"#,
        );
        assert!(dump(&bare_filter).is_err());
    }
}
