//! Integer-coded source enums and their target string forms.
//!
//! The relational source stores transaction type and status as small
//! integers; the target stores the string names so consumers never need the
//! numeric mapping. Unrecognized codes survive as `Unknown(<n>)` rather than
//! failing the row.

use std::fmt;

/// Business meaning of a sales transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Sale,
    Purchase,
    Adjustment,
    /// Source code with no mapping; the code is preserved for repair.
    Unknown(i32),
}

impl TransactionType {
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Sale,
            1 => Self::Purchase,
            2 => Self::Adjustment,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sale => f.write_str("Sale"),
            Self::Purchase => f.write_str("Purchase"),
            Self::Adjustment => f.write_str("Adjustment"),
            Self::Unknown(code) => write!(f, "Unknown({code})"),
        }
    }
}

/// Settlement state of a sales transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Cancelled,
    /// Source code with no mapping; the code is preserved for repair.
    Unknown(i32),
}

impl TransactionStatus {
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Pending,
            1 => Self::Completed,
            2 => Self::Cancelled,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Completed => f.write_str("Completed"),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::Unknown(code) => write!(f, "Unknown({code})"),
        }
    }
}
