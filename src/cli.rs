use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sbmatch")]
#[command(about = "Attribute sandbox log entries to the profile rules that produced them")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attribute each log entry to a rule of the profile
    Attribute(AttributeArgs),

    /// Check log entries for consistency against a profile installed on
    /// this process (reads `{sandbox_profile, processed_logs}` from stdin)
    Check(CheckArgs),

    /// Re-attribute doubtful results with active probes
    Rematch(RematchArgs),
}

#[derive(Parser, Debug)]
pub struct AttributeArgs {
    /// Sandbox profile rules (JSON, as produced by the profile dumper)
    #[arg(value_name = "RULESET")]
    pub ruleset: PathBuf,

    /// Processed log entries (JSON)
    #[arg(value_name = "LOGS")]
    pub logs: PathBuf,

    /// Write the attribution to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Confirm default-deny attributions against a default-allow sibling
    /// profile (one extra worker per run)
    #[arg(long)]
    pub verify_default: bool,

    /// Operation table captured on the analysed system (JSON)
    #[arg(long, value_name = "FILE")]
    pub ops_table: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored terminal output
    #[arg(long)]
    pub no_color: bool,
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Operation table captured on the analysed system (JSON)
    #[arg(long, value_name = "FILE")]
    pub ops_table: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct RematchArgs {
    /// Sandbox profile rules (JSON)
    #[arg(value_name = "RULESET")]
    pub ruleset: PathBuf,

    /// Processed log entries (JSON)
    #[arg(value_name = "LOGS")]
    pub logs: PathBuf,

    /// Prior attribution output to refine (JSON rows)
    #[arg(value_name = "MATCHES")]
    pub matches: PathBuf,

    /// Write the merged attribution to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Confirm default-deny attributions against a default-allow sibling
    /// profile
    #[arg(long)]
    pub verify_default: bool,

    /// Operation table captured on the analysed system (JSON)
    #[arg(long, value_name = "FILE")]
    pub ops_table: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored terminal output
    #[arg(long)]
    pub no_color: bool,
}

impl AttributeArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        require_file(&self.ruleset)?;
        require_file(&self.logs)?;
        if let Some(table) = &self.ops_table {
            require_file(table)?;
        }
        Ok(())
    }
}

impl RematchArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        require_file(&self.ruleset)?;
        require_file(&self.logs)?;
        require_file(&self.matches)?;
        if let Some(table) = &self.ops_table {
            require_file(table)?;
        }
        Ok(())
    }
}

fn require_file(path: &std::path::Path) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("Input file does not exist: {}", path.display());
    }
    Ok(())
}
