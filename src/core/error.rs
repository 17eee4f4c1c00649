use thiserror::Error;

/// Core error types for iptkeeper
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// iptables command execution failed
    #[error("iptables error: {message}")]
    Iptables {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Privilege escalation failed
    #[error("Elevation error: {0}")]
    Elevation(#[from] crate::elevation::ElevationError),

    /// Scheduler lifecycle misuse (start after stop, pass after stop)
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a validation failure on a named field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the tool's diagnostic stream if this is an iptables failure
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Iptables {
                stderr: Some(stderr),
                ..
            } => Some(stderr),
            Self::Iptables { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub help_url: Option<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            help_url: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }
}

/// Database of iptables error patterns and their translations
pub struct IptablesErrorPattern;

impl IptablesErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("you must be root")
        {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run iptkeeper as root or configure sudo/run0 for iptables")
                .with_suggestion("Set IPTKEEPER_ELEVATION_METHOD=sudo to force sudo")
                .with_suggestion("Check if CAP_NET_ADMIN capability is available")
                .with_help("https://wiki.archlinux.org/title/Iptables");
        }

        // Table module not loaded
        if lower.contains("can't initialize iptables") || lower.contains("table does not exist") {
            return ErrorTranslation::new("iptables table is not available in this kernel")
                .with_suggestion("Load the matching module, e.g.: sudo modprobe iptable_nat")
                .with_suggestion("Check loaded modules: lsmod | grep iptable")
                .with_help("https://wiki.archlinux.org/title/Iptables");
        }

        // Target errors (checked first: the message ends in "No such file")
        if lower.contains("couldn't load target") || lower.contains("unknown target") {
            return ErrorTranslation::new("Unknown rule target")
                .with_suggestion("Use ACCEPT, DROP, REJECT, LOG, RETURN or an existing chain name")
                .with_suggestion("NAT targets (SNAT, DNAT, MASQUERADE) only work in the nat table");
        }

        // Missing iptables
        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("iptables is not installed or not found in PATH")
                .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install iptables  (Fedora/RHEL)")
                .with_suggestion("Or: sudo pacman -S iptables  (Arch)")
                .with_suggestion("Or point IPTKEEPER_IPTABLES at the binary");
        }

        // Rule to delete is gone
        if lower.contains("index of deletion too big") || lower.contains("bad rule") {
            return ErrorTranslation::new("The rule at that line number no longer exists")
                .with_suggestion("Line numbers shift whenever any rule is added or removed")
                .with_suggestion("List the chain again and retry with the current line number");
        }

        // Chain errors
        if lower.contains("chain") && (lower.contains("does not exist") || lower.contains("no chain"))
        {
            return ErrorTranslation::new("Firewall chain not found")
                .with_suggestion("Ensure the chain exists in the selected table")
                .with_suggestion("Built-in chains differ per table (nat has no INPUT on old kernels)")
                .with_help("https://www.netfilter.org/documentation/HOWTO/packet-filtering-HOWTO-7.html");
        }

        // Port errors
        if lower.contains("port") && (lower.contains("invalid") || lower.contains("unknown")) {
            return ErrorTranslation::new("Invalid port or port range")
                .with_suggestion("Port numbers must be between 1 and 65535")
                .with_suggestion("Port ranges use a colon: 8000:9000")
                .with_suggestion("Ports require -p tcp or -p udp");
        }

        // Invalid address
        if lower.contains("host/network") || (lower.contains("invalid") && lower.contains("address"))
        {
            return ErrorTranslation::new("Invalid IP address or network")
                .with_suggestion("Use proper IP format: 192.168.1.1 or 192.168.1.0/24")
                .with_suggestion("Check CIDR notation: /24 for IPv4")
                .with_help("https://en.wikipedia.org/wiki/Classless_Inter-Domain_Routing");
        }

        // Lock held by another process
        if lower.contains("xtables lock") || lower.contains("resource temporarily unavailable") {
            return ErrorTranslation::new("Firewall resource is busy")
                .with_suggestion("Another process holds the xtables lock")
                .with_suggestion("Wait a moment and try again")
                .with_suggestion(
                    "Check for conflicting firewall managers: sudo systemctl status firewalld ufw",
                );
        }

        // Generic fallback
        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify iptables is working: sudo iptables -L -n")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
