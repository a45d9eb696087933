use serde::{Deserialize, Serialize};

/// The decision the kernel recorded (or a rule prescribes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Allow => write!(f, "allow"),
            Action::Deny => write!(f, "deny"),
        }
    }
}

/// One observed sandbox event from the processed logs.
///
/// The argument is the single resource string the kernel reported for the
/// event. Context the kernel consulted but did not log (e.g. whether a mach
/// name was registered locally or globally) is not available here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
    pub action: Action,
}

impl LogEntry {
    /// Missing and empty arguments are treated identically everywhere.
    pub fn argument_str(&self) -> &str {
        self.argument.as_deref().unwrap_or("")
    }
}
