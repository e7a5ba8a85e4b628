use crate::model::{Id, post::PostMarker};
use serde::Serialize;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct ImageMarker;

/// An attached image. `image` and `thumb` are paths relative to the media root
/// until the API layer turns them into URLs.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize)]
pub struct Image {
    #[serde(skip)]
    pub id: Id<ImageMarker>,
    #[serde(skip)]
    pub post_id: Id<PostMarker>,
    pub image: String,
    pub thumb: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct CreateImage {
    pub image: String,
    pub thumb: String,
}
