//! Replication clocks.
//!
//! A [`Clock`] is a position in the primary's replication log: the log file
//! name plus a byte offset within it. Clocks are totally ordered by file
//! name first and offset second, which is the order a single replication
//! stream advances in. Comparing clocks taken from unrelated log sequences
//! is the caller's business; nothing here checks that they belong together.
//!
//! Clocks are produced from the rows of `SHOW MASTER STATUS` and
//! `SHOW SLAVE STATUS`, and they round-trip through their `file@position`
//! string form so callers can carry one as a consistency token.

use std::fmt;
use std::str::FromStr;

use crate::Result;
use crate::error::{Error, TypeError};
use crate::row::Row;

/// Statement that reports the primary's current binlog position.
pub const MASTER_STATUS_SQL: &str = "SHOW MASTER STATUS";

/// Statement that reports how far a replica has applied the primary's log.
pub const SLAVE_STATUS_SQL: &str = "SHOW SLAVE STATUS";

/// Column pairs (file, position) read from each status statement.
const MASTER_COLUMNS: (&str, &str) = ("File", "Position");
const SLAVE_COLUMNS: (&str, &str) = ("Relay_Master_Log_File", "Exec_Master_Log_Pos");

static ZERO: Clock = Clock {
    file: String::new(),
    position: 0,
};

/// A replication log position.
///
/// Field order matters: the derived ordering compares `file`
/// lexicographically, then `position` numerically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Clock {
    file: String,
    position: u64,
}

impl Clock {
    /// Create a clock from a log file name and an offset within it.
    pub fn new(file: impl Into<String>, position: u64) -> Self {
        Self {
            file: file.into(),
            position,
        }
    }

    /// Create a clock from parts that may be absent.
    ///
    /// Fails with [`Error::InvalidArgument`] if either part is missing.
    #[allow(clippy::result_large_err)]
    pub fn try_new(file: Option<impl Into<String>>, position: Option<u64>) -> Result<Self> {
        match (file, position) {
            (Some(file), Some(position)) => Ok(Self::new(file, position)),
            _ => Err(Error::invalid_argument("file and position may not be nil")),
        }
    }

    /// The minimum clock, `("", 0)`. Means "no freshness requirement".
    pub fn zero() -> &'static Clock {
        &ZERO
    }

    /// Whether this is the zero clock.
    pub fn is_zero(&self) -> bool {
        self == &ZERO
    }

    /// The log file name.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The byte offset within the log file.
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Read a clock from a `SHOW MASTER STATUS` row (`File`, `Position`).
    #[allow(clippy::result_large_err)]
    pub fn from_master_status(row: &Row) -> Result<Self> {
        Self::from_status_row(row, MASTER_COLUMNS)
    }

    /// Read a clock from a `SHOW SLAVE STATUS` row
    /// (`Relay_Master_Log_File`, `Exec_Master_Log_Pos`).
    #[allow(clippy::result_large_err)]
    pub fn from_slave_status(row: &Row) -> Result<Self> {
        Self::from_status_row(row, SLAVE_COLUMNS)
    }

    #[allow(clippy::result_large_err)]
    fn from_status_row(row: &Row, (file_col, pos_col): (&str, &str)) -> Result<Self> {
        // absent and NULL columns both mean the part is missing
        let file = row.get_by_name(file_col).filter(|v| !v.is_null());
        let position = row.get_by_name(pos_col).filter(|v| !v.is_null());

        let file = file
            .map(|file| {
                file.as_str().ok_or_else(|| {
                    Error::Type(TypeError {
                        expected: "log file name",
                        actual: file.type_name().to_string(),
                        column: Some(file_col.to_string()),
                    })
                })
            })
            .transpose()?;
        let position = position
            .map(|position| {
                position.as_u64().ok_or_else(|| {
                    Error::Type(TypeError {
                        expected: "non-negative log position",
                        actual: format!("{:?}", position),
                        column: Some(pos_col.to_string()),
                    })
                })
            })
            .transpose()?;

        Self::try_new(file, position)
    }
}

impl Default for Clock {
    fn default() -> Self {
        ZERO.clone()
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.file, self.position)
    }
}

impl FromStr for Clock {
    type Err = Error;

    /// Parse the `file@position` form produced by `Display`.
    ///
    /// The split happens at the last `@`, so file names may contain `@`.
    fn from_str(s: &str) -> Result<Self> {
        let (file, position) = s
            .rsplit_once('@')
            .ok_or_else(|| Error::invalid_argument(format!("malformed clock '{}'", s)))?;
        let position = position.parse::<u64>().map_err(|_| {
            Error::invalid_argument(format!("malformed clock position in '{}'", s))
        })?;
        Ok(Self::new(file, position))
    }
}
