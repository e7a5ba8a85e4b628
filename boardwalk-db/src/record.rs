use boardwalk_common::{
    model::{
        Id, ModelValidationError,
        auth::Authentication,
        board::{Board, BoardLink},
        image::Image,
        post::Post,
        user::{User, UserHandle},
    },
    util::PositiveDuration,
};
use sqlx::FromRow;
use std::collections::HashMap;
use time::{Duration, PrimitiveDateTime, UtcDateTime};

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_id: i64,
    pub handle: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct BoardRecord {
    pub board_id: i64,
    pub link: String,
    pub title: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostRecord {
    pub post_id: i64,
    pub board_id: i64,
    pub link: String,
    pub thread_id: Option<i64>,
    pub user_id: Option<i64>,
    pub poster: String,
    pub text: String,
    pub posted_at: PrimitiveDateTime,
    pub bumped_at: PrimitiveDateTime,
    pub edited_at: Option<PrimitiveDateTime>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct ImageRecord {
    pub image_id: i64,
    pub post_id: i64,
    pub image: String,
    pub thumb: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_id: i64,
    pub token_hash: Vec<u8>,
    pub created_at: PrimitiveDateTime,
    pub expires_after_seconds: Option<i64>,
}

/// Timestamps are stored as UTC in `TIMESTAMP` columns.
pub(crate) fn to_primitive(date_time: UtcDateTime) -> PrimitiveDateTime {
    PrimitiveDateTime::new(date_time.date(), date_time.time())
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.user_id.try_into()?,
            handle: UserHandle::new(value.handle)?,
        })
    }
}

impl TryFrom<BoardRecord> for Board {
    type Error = ModelValidationError;

    fn try_from(value: BoardRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.board_id.try_into()?,
            link: BoardLink::new(value.link)?,
            title: value.title,
        })
    }
}

/// Images are attached afterwards with [`attach_images`].
impl TryFrom<PostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.post_id.try_into()?,
            board_id: value.board_id.try_into()?,
            board: BoardLink::new(value.link)?,
            text: value.text,
            poster: value.poster,
            author: value.user_id.map(Id::try_from).transpose()?,
            thread: value.thread_id.map(Id::try_from).transpose()?,
            date: value.posted_at.as_utc(),
            bump: value.bumped_at.as_utc(),
            edited_at: value.edited_at.map(PrimitiveDateTime::as_utc),
            files: Vec::new(),
        })
    }
}

impl TryFrom<ImageRecord> for Image {
    type Error = ModelValidationError;

    fn try_from(value: ImageRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.image_id.try_into()?,
            post_id: value.post_id.try_into()?,
            image: value.image,
            thumb: value.thumb,
        })
    }
}

impl TryFrom<AuthenticationRecord> for Authentication {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: value.user_id.try_into()?,
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at.as_utc(),
            expires_after: value
                .expires_after_seconds
                .map(|seconds| PositiveDuration::try_from(Duration::seconds(seconds)))
                .transpose()?,
        })
    }
}

/// Distributes images onto the posts they belong to, keeping image order.
pub(crate) fn attach_images(posts: &mut [Post], images: Vec<Image>) {
    let mut by_post: HashMap<_, Vec<Image>> = HashMap::new();
    for image in images {
        by_post.entry(image.post_id).or_default().push(image);
    }

    for post in posts {
        if let Some(files) = by_post.remove(&post.id) {
            post.files = files;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn post_record(post_id: i64, thread_id: Option<i64>) -> PostRecord {
        PostRecord {
            post_id,
            board_id: 1,
            link: "b".to_owned(),
            thread_id,
            user_id: None,
            poster: "Anonymous".to_owned(),
            text: "hello".to_owned(),
            posted_at: datetime!(2025-03-01 12:00),
            bumped_at: datetime!(2025-03-01 13:00),
            edited_at: None,
        }
    }

    #[test]
    fn post_record_converts() {
        let post = Post::try_from(post_record(4, Some(2))).unwrap();

        assert_eq!(post.id, Id::new(4));
        assert_eq!(post.thread, Some(Id::new(2)));
        assert_eq!(post.board.get(), "b");
        assert_eq!(post.author, None);
        assert_eq!(post.date.unix_timestamp(), 1_740_830_400);
        assert!(post.files.is_empty());
    }

    #[test]
    fn invalid_board_link_is_a_data_error() {
        let mut record = post_record(4, None);
        record.link = "Not A Slug".to_owned();

        assert!(matches!(
            Post::try_from(record),
            Err(ModelValidationError::BoardLink(_))
        ));
    }

    #[test]
    fn non_positive_expiry_is_a_data_error() {
        let record = AuthenticationRecord {
            user_id: 1,
            token_hash: vec![0; 32],
            created_at: datetime!(2025-03-01 12:00),
            expires_after_seconds: Some(0),
        };

        assert!(matches!(
            Authentication::try_from(record),
            Err(ModelValidationError::NonPositiveDuration(_))
        ));
    }

    #[test]
    fn images_land_on_their_posts() {
        let mut posts = vec![
            Post::try_from(post_record(1, None)).unwrap(),
            Post::try_from(post_record(2, Some(1))).unwrap(),
        ];
        let image = |image_id, post_id| Image {
            id: Id::new(image_id),
            post_id: Id::new(post_id),
            image: format!("images/{image_id}.png"),
            thumb: format!("thumbs/{image_id}.png"),
        };

        attach_images(&mut posts, vec![image(1, 2), image(2, 1), image(3, 2)]);

        assert_eq!(posts[0].files, vec![image(2, 1)]);
        assert_eq!(posts[1].files, vec![image(1, 2), image(3, 2)]);
    }

    #[test]
    fn primitive_round_trip() {
        let date_time = datetime!(2025-03-01 12:34:56.789).as_utc();
        assert_eq!(to_primitive(date_time).as_utc(), date_time);
    }
}
