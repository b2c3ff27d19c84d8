use std::fmt;

/// Machine-readable error codes for job runners and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    DocumentNotFound,
    SnapshotCorrupt,
    UpdateDecodeFailed,
    LockContention,
    LeaseLost,
    StoreUnavailable,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::DocumentNotFound => "E2001",
            Self::SnapshotCorrupt => "E2002",
            Self::UpdateDecodeFailed => "E2003",
            Self::LockContention => "E3001",
            Self::LeaseLost => "E3002",
            Self::StoreUnavailable => "E3003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and job output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::DocumentNotFound => "Document snapshot row not found",
            Self::SnapshotCorrupt => "Corrupt snapshot state",
            Self::UpdateDecodeFailed => "Update payload decode failed",
            Self::LockContention => "Lease lock contention",
            Self::LeaseLost => "Lease lost during critical section",
            Self::StoreUnavailable => "Lease store unavailable",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in the coordination config file and retry."),
            Self::DocumentNotFound => {
                Some("Create the document snapshot row before scheduling compaction.")
            }
            Self::SnapshotCorrupt => {
                Some("Restore the snapshot row from the update log by recreating the document.")
            }
            Self::UpdateDecodeFailed => {
                Some("Inspect the offending update-log row; the writer produced bad bytes.")
            }
            Self::LockContention => Some("Retry after the competing worker releases its lease."),
            Self::LeaseLost => {
                Some("Safe to retry: the transaction rolled back with no partial writes.")
            }
            Self::StoreUnavailable => Some("Check key-value store connectivity and retry."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::DocumentNotFound,
            ErrorCode::SnapshotCorrupt,
            ErrorCode::UpdateDecodeFailed,
            ErrorCode::LockContention,
            ErrorCode::LeaseLost,
            ErrorCode::StoreUnavailable,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::LeaseLost.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn retryable_codes_carry_hints() {
        assert!(ErrorCode::LockContention.hint().is_some());
        assert!(ErrorCode::LeaseLost.hint().is_some());
        assert!(ErrorCode::StoreUnavailable.hint().is_some());
    }
}
