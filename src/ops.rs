//! Operation taxonomy: for any operation, the set of operations whose rules
//! can also govern its events (the fallback chain), plus the operation's
//! built-in default action.
//!
//! The table is version-specific data captured from the analysed system.
//! A built-in snapshot covers the common operation families; `--ops-table`
//! installs a table captured elsewhere.

use std::collections::BTreeSet;
use std::path::Path;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RulesetError};
use crate::event::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Terminal,
    NonTerminal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationInfo {
    pub name: String,
    pub node_type: NodeType,
    /// Index of the next more general operation in the table.
    pub fallback: usize,
    pub default_action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationTable {
    entries: Vec<OperationInfo>,
}

use self::NodeType::{NonTerminal, Terminal};
use crate::event::Action::{Allow, Deny};

/// Snapshot of the operation database. Fallback values are indices into this
/// slice; `default` is its own fallback and terminates every chain.
#[rustfmt::skip]
const BUILTIN: &[(&str, NodeType, usize, Action)] = &[
    /*  0 */ ("default",                     Terminal,    0,  Deny),
    /*  1 */ ("file*",                       NonTerminal, 0,  Deny),
    /*  2 */ ("file-read*",                  NonTerminal, 1,  Deny),
    /*  3 */ ("file-read-data",              NonTerminal, 2,  Deny),
    /*  4 */ ("file-read-metadata",          NonTerminal, 2,  Deny),
    /*  5 */ ("file-read-xattr",             NonTerminal, 2,  Deny),
    /*  6 */ ("file-write*",                 NonTerminal, 1,  Deny),
    /*  7 */ ("file-write-data",             NonTerminal, 6,  Deny),
    /*  8 */ ("file-write-create",           NonTerminal, 6,  Deny),
    /*  9 */ ("file-write-unlink",           NonTerminal, 6,  Deny),
    /* 10 */ ("file-write-xattr",            NonTerminal, 6,  Deny),
    /* 11 */ ("file-ioctl",                  NonTerminal, 1,  Deny),
    /* 12 */ ("file-issue-extension",        NonTerminal, 1,  Deny),
    /* 13 */ ("file-map-executable",         NonTerminal, 1,  Allow),
    /* 14 */ ("ipc*",                        NonTerminal, 0,  Deny),
    /* 15 */ ("ipc-posix*",                  NonTerminal, 14, Deny),
    /* 16 */ ("ipc-posix-sem*",              NonTerminal, 15, Deny),
    /* 17 */ ("ipc-posix-sem-create",        NonTerminal, 16, Deny),
    /* 18 */ ("ipc-posix-sem-open",          NonTerminal, 16, Deny),
    /* 19 */ ("ipc-posix-sem-post",          NonTerminal, 16, Deny),
    /* 20 */ ("ipc-posix-sem-wait",          NonTerminal, 16, Deny),
    /* 21 */ ("ipc-posix-sem-unlink",        NonTerminal, 16, Deny),
    /* 22 */ ("ipc-posix-shm*",              NonTerminal, 15, Deny),
    /* 23 */ ("ipc-posix-shm-read*",         NonTerminal, 22, Deny),
    /* 24 */ ("ipc-posix-shm-read-data",     NonTerminal, 23, Deny),
    /* 25 */ ("ipc-posix-shm-read-metadata", NonTerminal, 23, Deny),
    /* 26 */ ("ipc-posix-shm-write*",        NonTerminal, 22, Deny),
    /* 27 */ ("ipc-posix-shm-write-create",  NonTerminal, 26, Deny),
    /* 28 */ ("ipc-posix-shm-write-data",    NonTerminal, 26, Deny),
    /* 29 */ ("ipc-posix-shm-write-unlink",  NonTerminal, 26, Deny),
    /* 30 */ ("mach*",                       NonTerminal, 0,  Deny),
    /* 31 */ ("mach-register",               NonTerminal, 30, Deny),
    /* 32 */ ("mach-lookup",                 NonTerminal, 30, Deny),
    /* 33 */ ("process*",                    NonTerminal, 0,  Deny),
    /* 34 */ ("process-fork",                NonTerminal, 33, Deny),
    /* 35 */ ("process-info*",               NonTerminal, 33, Deny),
    /* 36 */ ("process-info-dirtycontrol",   NonTerminal, 35, Deny),
    /* 37 */ ("process-info-setcontrol",     NonTerminal, 35, Deny),
    /* 38 */ ("process-info-pidinfo",        NonTerminal, 35, Deny),
    /* 39 */ ("process-info-listpids",       NonTerminal, 35, Deny),
    /* 40 */ ("signal",                      NonTerminal, 0,  Deny),
    /* 41 */ ("iokit*",                      NonTerminal, 0,  Deny),
    /* 42 */ ("iokit-open",                  NonTerminal, 41, Deny),
    /* 43 */ ("iokit-get-properties",        NonTerminal, 41, Deny),
    /* 44 */ ("nvram*",                      NonTerminal, 0,  Deny),
    /* 45 */ ("nvram-get",                   NonTerminal, 44, Deny),
    /* 46 */ ("nvram-set",                   NonTerminal, 44, Deny),
    /* 47 */ ("sysctl*",                     NonTerminal, 0,  Deny),
    /* 48 */ ("sysctl-read",                 NonTerminal, 47, Allow),
    /* 49 */ ("network*",                    NonTerminal, 0,  Deny),
    /* 50 */ ("network-outbound",            NonTerminal, 49, Deny),
];

impl OperationTable {
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|&(name, node_type, fallback, default_action)| OperationInfo {
                name: name.to_string(),
                node_type,
                fallback,
                default_action,
            })
            .collect();
        Self { entries }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RulesetError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;
        let table: OperationTable =
            serde_json::from_str(&content).map_err(RulesetError::Parse)?;
        Ok(table)
    }

    pub fn info_for(&self, name: &str) -> Option<&OperationInfo> {
        self.entries.iter().find(|info| info.name == name)
    }

    /// Built-in default for `op` absent any rule. Operations the table does
    /// not know default to deny.
    pub fn default_action(&self, op: &str) -> Action {
        self.info_for(op)
            .map(|info| info.default_action)
            .unwrap_or(Action::Deny)
    }

    /// The set of operation names whose rules can decide events of `op`.
    ///
    /// Starts at `op` and walks the fallback chain until a terminal node is
    /// reached or a name repeats (the cycle guard: `default` falls back to
    /// itself).
    pub fn relevant_operations(&self, op: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        result.insert(op.to_string());

        let Some(mut info) = self.info_for(op) else {
            log::debug!("operation {op} not in table; only direct rules apply");
            return result;
        };
        if info.node_type == NodeType::Terminal {
            return result;
        }

        loop {
            let Some(next) = self.entries.get(info.fallback) else {
                log::warn!("operation {} has out-of-range fallback", info.name);
                break;
            };
            info = next;
            if !result.insert(info.name.clone()) {
                break;
            }
            if info.node_type == NodeType::Terminal {
                break;
            }
        }

        result
    }
}

static INSTALLED: OnceCell<OperationTable> = OnceCell::new();

/// Install `table` as the process-wide operation table. Only the first
/// installation takes effect.
pub fn install(table: OperationTable) {
    if INSTALLED.set(table).is_err() {
        log::warn!("operation table already installed; keeping the existing one");
    }
}

/// The installed table, or the built-in snapshot when none was installed.
pub fn installed() -> &'static OperationTable {
    INSTALLED.get_or_init(OperationTable::builtin)
}

pub fn relevant_operations(op: &str) -> BTreeSet<String> {
    installed().relevant_operations(op)
}

pub fn default_action(op: &str) -> Action {
    installed().default_action(op)
}
