use anyhow::Context;
use clap::Parser;

use sbmatch::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Attribute(args) => {
            args.validate().context("Invalid arguments")?;
            run_attribute(args)
        }
        Commands::Check(args) => run_check(args),
        Commands::Rematch(args) => {
            args.validate().context("Invalid arguments")?;
            run_rematch(args)
        }
    }
}

#[cfg(target_os = "macos")]
mod commands {
    use std::fs;
    use std::io::Read;
    use std::path::Path;

    use anyhow::Context;
    use serde::Deserialize;

    use sbmatch::cli::{AttributeArgs, CheckArgs, RematchArgs};
    use sbmatch::engine::{self, Attribution, EngineOptions};
    use sbmatch::error::{OracleError, SbmatchError};
    use sbmatch::event::LogEntry;
    use sbmatch::ops::{self, OperationTable};
    use sbmatch::oracle::kernel::KernelProbe;
    use sbmatch::oracle::{kernel, strategy, Decision, ForkingOracle};
    use sbmatch::probe::{self, PerformProbe};
    use sbmatch::report::{self, TerminalReporter};
    use sbmatch::ruleset::{sbpl, RuleSet};

    fn install_ops_table(path: Option<&Path>) -> anyhow::Result<()> {
        if let Some(path) = path {
            let table = OperationTable::from_file(path)
                .with_context(|| format!("Failed to load operation table {}", path.display()))?;
            ops::install(table);
        }
        Ok(())
    }

    fn load_events(path: &Path) -> anyhow::Result<Vec<LogEntry>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read log file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse log entries in {}", path.display()))
    }

    fn write_rows(output: Option<&Path>, attributions: &[Attribution]) -> anyhow::Result<()> {
        match output {
            Some(path) => {
                let file = fs::File::create(path)
                    .with_context(|| format!("Failed to create output file {}", path.display()))?;
                report::write_attributions(file, attributions)?;
            }
            None => report::write_attributions(std::io::stdout().lock(), attributions)?,
        }
        Ok(())
    }

    pub fn run_attribute(args: AttributeArgs) -> anyhow::Result<()> {
        install_ops_table(args.ops_table.as_deref())?;

        let rules = RuleSet::from_file(&args.ruleset).context("Failed to load ruleset")?;
        let events = load_events(&args.logs)?;

        let mut oracle = ForkingOracle::new(KernelProbe::new());
        let options = EngineOptions {
            verify_default_deny: args.verify_default,
        };
        let attributions = engine::attribute(&rules, &events, &mut oracle, options)?;

        TerminalReporter::new(args.verbose, args.no_color).report(&rules, &events, &attributions);
        write_rows(args.output.as_deref(), &attributions)
    }

    #[derive(Deserialize)]
    struct CheckInput {
        sandbox_profile: RuleSet,
        processed_logs: Vec<LogEntry>,
    }

    pub fn run_check(args: CheckArgs) -> anyhow::Result<()> {
        install_ops_table(args.ops_table.as_deref())?;

        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read standard input")?;
        let input: CheckInput =
            serde_json::from_str(&raw).context("Failed to parse input document")?;

        let rules = input.sandbox_profile;
        let events = input.processed_logs;
        let default_allow = rules.is_default_allow();

        // The consistency tool is one-shot by design: it confines itself and
        // probes in-process.
        let profile = sbpl::dump(&rules)?;
        kernel::install_profile(&profile)
            .map_err(|message| SbmatchError::Oracle(OracleError::PolicyInstall(message)))?;

        let results = engine::check_consistency(
            &events,
            |entry| strategy::decide(kernel::check, entry, default_allow),
            |entry| {
                probe::perform(&entry.operation, entry.argument_str())
                    .unwrap_or(Decision::Unknown)
            },
        )?;

        report::write_consistency(std::io::stdout().lock(), &results)?;
        Ok(())
    }

    pub fn run_rematch(args: RematchArgs) -> anyhow::Result<()> {
        install_ops_table(args.ops_table.as_deref())?;

        let rules = RuleSet::from_file(&args.ruleset).context("Failed to load ruleset")?;
        let events = load_events(&args.logs)?;

        let raw = fs::read_to_string(&args.matches)
            .with_context(|| format!("Failed to read match file {}", args.matches.display()))?;
        let rows: Vec<(usize, Attribution)> =
            serde_json::from_str(&raw).context("Failed to parse prior attribution rows")?;

        // Rows the prior run did not cover are treated as doubtful.
        let mut prior = vec![Attribution::Inconsistent; events.len()];
        for (index, attribution) in rows {
            if index >= events.len() {
                anyhow::bail!(
                    "match row refers to event {index}, but only {} events exist",
                    events.len()
                );
            }
            prior[index] = attribution;
        }

        let mut oracle = ForkingOracle::new(PerformProbe::new());
        let options = EngineOptions {
            verify_default_deny: args.verify_default,
        };
        let merged = engine::rematch(&rules, &events, &prior, &mut oracle, options)?;

        TerminalReporter::new(args.verbose, args.no_color).report(&rules, &events, &merged);
        write_rows(args.output.as_deref(), &merged)
    }
}

#[cfg(not(target_os = "macos"))]
mod commands {
    use sbmatch::cli::{AttributeArgs, CheckArgs, RematchArgs};

    const UNSUPPORTED: &str = "the kernel sandbox oracle is only available on macOS";

    pub fn run_attribute(_args: AttributeArgs) -> anyhow::Result<()> {
        anyhow::bail!(UNSUPPORTED);
    }

    pub fn run_check(_args: CheckArgs) -> anyhow::Result<()> {
        anyhow::bail!(UNSUPPORTED);
    }

    pub fn run_rematch(_args: RematchArgs) -> anyhow::Result<()> {
        anyhow::bail!(UNSUPPORTED);
    }
}

use commands::{run_attribute, run_check, run_rematch};
