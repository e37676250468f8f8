use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status codes sent to the host alongside an operation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StatusState {
    ProgressStart = 1,
    ProgressEnd = 2,
    /// No usable engine runtime; the host should offer install or a link.
    NoCli = 10,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("unknown status code: {0}")]
pub struct UnknownStatusError(pub u8);

impl From<StatusState> for u8 {
    fn from(state: StatusState) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for StatusState {
    type Error = UnknownStatusError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ProgressStart),
            2 => Ok(Self::ProgressEnd),
            10 => Ok(Self::NoCli),
            other => Err(UnknownStatusError(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_number() {
        assert_eq!(serde_json::to_string(&StatusState::NoCli).unwrap(), "10");
        let state: StatusState = serde_json::from_str("2").unwrap();
        assert_eq!(state, StatusState::ProgressEnd);
        assert!(serde_json::from_str::<StatusState>("3").is_err());
    }
}
