use std::fmt;
use std::str::FromStr;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use crate::error::ConversationStoreError;

const TURN_ID_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second].[subsecond digits:9]Z");

/// Fixed-width UTC timestamp key identifying one turn.
///
/// Every id has the same length, so lexicographic order of the string form is
/// chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnId(String);

impl TurnId {
    pub fn now() -> Result<Self, ConversationStoreError> {
        Self::from_datetime(OffsetDateTime::now_utc())
    }

    pub fn from_datetime(at: OffsetDateTime) -> Result<Self, ConversationStoreError> {
        let utc = at.to_offset(time::UtcOffset::UTC);
        utc.format(TURN_ID_FORMAT)
            .map(Self)
            .map_err(ConversationStoreError::ClockFormat)
    }

    pub fn parse(value: &str) -> Result<Self, ConversationStoreError> {
        PrimitiveDateTime::parse(value, TURN_ID_FORMAT)
            .map_err(|_| ConversationStoreError::InvalidTurnId {
                value: value.to_string(),
            })
            .and_then(|parsed| Self::from_datetime(parsed.assume_utc()))
            .and_then(|normalized| {
                if normalized.0 == value {
                    Ok(normalized)
                } else {
                    Err(ConversationStoreError::InvalidTurnId {
                        value: value.to_string(),
                    })
                }
            })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the instant encoded in this id.
    pub fn datetime(&self) -> Result<OffsetDateTime, ConversationStoreError> {
        PrimitiveDateTime::parse(&self.0, TURN_ID_FORMAT)
            .map(PrimitiveDateTime::assume_utc)
            .map_err(|_| ConversationStoreError::InvalidTurnId {
                value: self.0.clone(),
            })
    }

    /// Returns the smallest id strictly after this one.
    pub fn successor(&self) -> Result<Self, ConversationStoreError> {
        Self::from_datetime(self.datetime()? + Duration::nanoseconds(1))
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TurnId {
    type Err = ConversationStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}
