use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Timestamp format used by descriptors, e.g. `2024-05-17 13:00:00`
pub const PUBLISHED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeError {
    #[error("invalid month '{0}' (expected yyyy-MM)")]
    InvalidMonth(String),
    #[error("invalid timestamp '{0}' (expected yyyy-MM-dd HH:mm:ss)")]
    InvalidTimestamp(String),
}

/// A calendar month, the time bucket that scopes one secret
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self, TimeError> {
        if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
            return Err(TimeError::InvalidMonth(format!("{:04}-{:02}", year, month)));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First instant of the month
    pub fn start(&self) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap_or(NaiveDateTime::MIN)
    }

    /// Whether this month is outside a retention window that starts at `cutoff`.
    ///
    /// A month only counts as retained if it starts after the cutoff, so the
    /// month that contains the cutoff instant is already past it.
    pub fn is_past(&self, cutoff: &NaiveDateTime) -> bool {
        self.start() <= *cutoff
    }
}

impl FromStr for Month {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TimeError::InvalidMonth(s.to_string());
        let bytes = s.as_bytes();
        if bytes.len() != 7 || bytes[4] != b'-' {
            return Err(invalid());
        }
        if !s[..4].bytes().all(|b| b.is_ascii_digit()) || !s[5..].bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let year = s[..4].parse().map_err(|_| invalid())?;
        let month = s[5..].parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl fmt::Debug for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Month({})", self)
    }
}

/// Publication time of a descriptor, always UTC
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublishedTime(NaiveDateTime);

impl PublishedTime {
    pub fn from_naive(time: NaiveDateTime) -> Self {
        Self(time)
    }

    /// Parse a `yyyy-MM-dd HH:mm:ss` timestamp
    pub fn parse(s: &str) -> Result<Self, TimeError> {
        NaiveDateTime::parse_from_str(s.trim(), PUBLISHED_FORMAT)
            .map(Self)
            .map_err(|_| TimeError::InvalidTimestamp(s.to_string()))
    }

    pub fn as_naive(&self) -> &NaiveDateTime {
        &self.0
    }

    pub fn month(&self) -> Month {
        Month {
            year: self.0.year(),
            month: self.0.month(),
        }
    }

    /// Compact form used in file names, e.g. `20240517-130000`
    pub fn file_stamp(&self) -> String {
        format!(
            "{:04}{:02}{:02}-{:02}{:02}{:02}",
            self.0.year(),
            self.0.month(),
            self.0.day(),
            self.0.hour(),
            self.0.minute(),
            self.0.second()
        )
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }
}

impl FromStr for PublishedTime {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PublishedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(PUBLISHED_FORMAT))
    }
}

impl fmt::Debug for PublishedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublishedTime({})", self)
    }
}

/// The three kinds of bridge descriptors that get sanitized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    NetworkStatus,
    ServerDescriptor,
    ExtraInfo,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::NetworkStatus,
        RecordKind::ServerDescriptor,
        RecordKind::ExtraInfo,
    ];

    /// `@type` annotation written as the first line of sanitized output
    pub fn annotation(&self) -> &'static str {
        match self {
            Self::NetworkStatus => "@type bridge-network-status 1.0",
            Self::ServerDescriptor => "@type bridge-server-descriptor 1.1",
            Self::ExtraInfo => "@type bridge-extra-info 1.3",
        }
    }

    /// Directory name used in both output trees
    pub fn category(&self) -> &'static str {
        match self {
            Self::NetworkStatus => "statuses",
            Self::ServerDescriptor => "server-descriptors",
            Self::ExtraInfo => "extra-infos",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NetworkStatus => "bridge network status",
            Self::ServerDescriptor => "bridge server descriptor",
            Self::ExtraInfo => "bridge extra-info descriptor",
        };
        f.write_str(name)
    }
}
