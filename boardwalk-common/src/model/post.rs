use crate::{
    model::{
        Id,
        board::{BoardLink, BoardMarker},
        image::Image,
        user::UserMarker,
    },
    util::serialize_epoch_seconds,
};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use thiserror::Error;
use time::UtcDateTime;

pub const POST_TEXT_MAX_LEN: usize = 10_000;
pub const POSTER_MAX_LEN: usize = 50;
pub const DEFAULT_POSTER: &str = "Anonymous";

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

/// A thread root (`thread` is `None`) or a reply to one.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Post {
    pub id: Id<PostMarker>,
    #[serde(skip)]
    pub board_id: Id<BoardMarker>,
    pub board: BoardLink,
    pub text: String,
    pub poster: String,
    #[serde(skip)]
    pub author: Option<Id<UserMarker>>,
    pub thread: Option<Id<PostMarker>>,
    #[serde(serialize_with = "serialize_epoch_seconds")]
    pub date: UtcDateTime,
    #[serde(serialize_with = "serialize_epoch_seconds")]
    pub bump: UtcDateTime,
    #[serde(skip)]
    pub edited_at: Option<UtcDateTime>,
    pub files: Vec<Image>,
}

impl Post {
    #[must_use]
    pub fn is_thread_root(&self) -> bool {
        self.thread.is_none()
    }
}

/// A thread as shown in a board listing: the root plus its latest replies.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct ThreadSummary {
    #[serde(flatten)]
    pub post: Post,
    pub replies: Vec<Post>,
}

/// A whole thread, root first and then every reply by date.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Thread {
    pub id: Id<PostMarker>,
    pub board: BoardLink,
    pub posts: Vec<Post>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreatePost {
    pub board_id: Id<BoardMarker>,
    pub thread: Option<Id<PostMarker>>,
    pub author: Option<Id<UserMarker>>,
    pub poster: PosterName,
    /// Already passed through [`crate::markup::render_post_text`].
    pub text: String,
    pub date: UtcDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct EditPost {
    pub text: PostText,
}

/// Raw post text as submitted, before markup.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct PostText(String);

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Error)]
#[error("Post text must be between 1 and {POST_TEXT_MAX_LEN} characters")]
pub struct InvalidPostTextError;

impl PostText {
    pub fn new(text: String) -> Result<Self, InvalidPostTextError> {
        if text.trim().is_empty() || text.chars().count() > POST_TEXT_MAX_LEN {
            Err(InvalidPostTextError)
        } else {
            Ok(Self(text))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PostText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        PostText::new(inner)
            .map_err(|_| Error::invalid_value(Unexpected::Other("text"), &"a valid post text"))
    }
}

/// Display name shown on a post. Blank names become [`DEFAULT_POSTER`].
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct PosterName(String);

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Error)]
#[error("Poster name must be at most {POSTER_MAX_LEN} characters")]
pub struct InvalidPosterNameError;

impl PosterName {
    pub fn new(name: Option<&str>) -> Result<Self, InvalidPosterNameError> {
        let name = name.map(str::trim).unwrap_or_default();

        if name.is_empty() {
            Ok(Self::default())
        } else if name.chars().count() > POSTER_MAX_LEN {
            Err(InvalidPosterNameError)
        } else {
            Ok(Self(name.to_owned()))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Default for PosterName {
    fn default() -> Self {
        Self(DEFAULT_POSTER.to_owned())
    }
}
