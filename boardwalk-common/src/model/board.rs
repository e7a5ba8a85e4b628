use crate::model::Id;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::fmt::Display;
use thiserror::Error;

pub const BOARD_LINK_MAX_LEN: usize = 32;

static BOARD_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,31}$").expect("invalid board link regex"));

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct BoardMarker;

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct Board {
    pub id: Id<BoardMarker>,
    pub link: BoardLink,
    pub title: String,
}

/// The short slug a board is addressed by, e.g. `b` or `tech`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct BoardLink(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The board link is invalid: {0:?}")]
pub struct InvalidBoardLinkError(String);

impl BoardLink {
    pub fn new(link: String) -> Result<Self, InvalidBoardLinkError> {
        if BOARD_LINK_RE.is_match(&link) {
            Ok(Self(link))
        } else {
            Err(InvalidBoardLinkError(link))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for BoardLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for BoardLink {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        BoardLink::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"a board link"))
    }
}
