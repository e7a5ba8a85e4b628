use crate::{
    MIGRATOR,
    record::{
        AuthenticationRecord, BoardRecord, ImageRecord, PostRecord, UserRecord, attach_images,
        to_primitive,
    },
};
use boardwalk_common::model::{
    Id, ModelValidationError,
    auth::{AuthTokenHash, Authentication},
    board::{Board, BoardLink, BoardMarker},
    image::{CreateImage, Image},
    post::{CreatePost, Post, PostMarker, Thread, ThreadSummary},
    user::{CreateUser, User, UserHandle, UserMarker},
};
use sqlx::{PgPool, migrate::MigrateError, query, query_as, query_scalar};
use thiserror::Error;
use time::UtcDateTime;
use tracing::debug;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Replies shown under each thread in a board listing.
pub const PREVIEW_REPLIES: i64 = 4;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("The handle {0:?} is already taken")]
    HandleTaken(String),
    #[error("Migrating the database failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

macro_rules! select_posts {
    ($($tail:literal),*) => {
        concat!(
            "
            SELECT
                posts.post_id,
                posts.board_id,
                boards.link,
                posts.thread_id,
                posts.user_id,
                posts.poster,
                posts.text,
                posts.posted_at,
                posts.bumped_at,
                posts.edited_at
            FROM
                posts.posts JOIN boards.boards ON boards.board_id = posts.board_id
            ",
            $($tail),*
        )
    };
}

#[derive(Debug)]
pub struct DbClient {
    pool: PgPool,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn fetch_boards(&self) -> Result<Vec<Board>> {
        let records = query_as::<_, BoardRecord>(
            "
            SELECT board_id, link, title
            FROM boards.boards
            ORDER BY link
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let boards = records
            .into_iter()
            .map(Board::try_from)
            .collect::<Result<_, _>>()?;
        Ok(boards)
    }

    pub async fn fetch_board(&self, link: &BoardLink) -> Result<Option<Board>> {
        let record = query_as::<_, BoardRecord>(
            "
            SELECT board_id, link, title
            FROM boards.boards
            WHERE link = $1
            ",
        )
        .bind(link.get())
        .fetch_optional(&self.pool)
        .await?;

        let board = record.map(Board::try_from).transpose()?;
        Ok(board)
    }

    pub async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(select_posts!("WHERE posts.post_id = $1"))
            .bind(post_id.to_row_id())
            .fetch_optional(&self.pool)
            .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        let mut posts = [Post::try_from(record)?];
        self.load_images(&mut posts).await?;
        let [post] = posts;
        Ok(Some(post))
    }

    /// The root and all of its replies by date, or `None` if `thread_id` is
    /// not a thread root.
    pub async fn fetch_thread(&self, thread_id: Id<PostMarker>) -> Result<Option<Thread>> {
        let records = query_as::<_, PostRecord>(select_posts!(
            "WHERE posts.post_id = $1 OR posts.thread_id = $1",
            "ORDER BY posts.thread_id IS NOT NULL, posts.posted_at, posts.post_id"
        ))
        .bind(thread_id.to_row_id())
        .fetch_all(&self.pool)
        .await?;

        let mut posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let Some(root) = posts.first() else {
            return Ok(None);
        };
        if root.id != thread_id || !root.is_thread_root() {
            return Ok(None);
        }
        let board = root.board.clone();

        self.load_images(&mut posts).await?;
        Ok(Some(Thread {
            id: thread_id,
            board,
            posts,
        }))
    }

    /// Thread roots by latest bump, each with its last [`PREVIEW_REPLIES`]
    /// replies oldest-first.
    pub async fn fetch_board_threads(&self, board_id: Id<BoardMarker>) -> Result<Vec<ThreadSummary>> {
        let root_records = query_as::<_, PostRecord>(select_posts!(
            "WHERE posts.board_id = $1 AND posts.thread_id IS NULL",
            "ORDER BY posts.bumped_at DESC, posts.post_id DESC"
        ))
        .bind(board_id.to_row_id())
        .fetch_all(&self.pool)
        .await?;

        let mut roots = root_records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if roots.is_empty() {
            return Ok(Vec::new());
        }

        let root_ids: Vec<i64> = roots.iter().map(|root| root.id.to_row_id()).collect();
        let reply_records = query_as::<_, PostRecord>(
            "
            SELECT
                latest.post_id,
                latest.board_id,
                boards.link,
                latest.thread_id,
                latest.user_id,
                latest.poster,
                latest.text,
                latest.posted_at,
                latest.bumped_at,
                latest.edited_at
            FROM (
                SELECT
                    posts.*,
                    row_number() OVER (
                        PARTITION BY posts.thread_id
                        ORDER BY posts.posted_at DESC, posts.post_id DESC
                    ) AS recency
                FROM posts.posts
                WHERE posts.thread_id = ANY($1)
            ) AS latest JOIN boards.boards ON boards.board_id = latest.board_id
            WHERE latest.recency <= $2
            ORDER BY latest.posted_at, latest.post_id
            ",
        )
        .bind(&root_ids)
        .bind(PREVIEW_REPLIES)
        .fetch_all(&self.pool)
        .await?;

        let mut replies = reply_records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        self.load_images(&mut roots).await?;
        self.load_images(&mut replies).await?;

        let mut summaries: Vec<ThreadSummary> = roots
            .into_iter()
            .map(|post| ThreadSummary {
                post,
                replies: Vec::new(),
            })
            .collect();
        for reply in replies {
            if let Some(summary) = summaries
                .iter_mut()
                .find(|summary| Some(summary.post.id) == reply.thread)
            {
                summary.replies.push(reply);
            }
        }

        Ok(summaries)
    }

    async fn load_images(&self, posts: &mut [Post]) -> Result<()> {
        if posts.is_empty() {
            return Ok(());
        }

        let post_ids: Vec<i64> = posts.iter().map(|post| post.id.to_row_id()).collect();
        let records = query_as::<_, ImageRecord>(
            "
            SELECT image_id, post_id, image, thumb
            FROM posts.images
            WHERE post_id = ANY($1)
            ORDER BY image_id
            ",
        )
        .bind(&post_ids)
        .fetch_all(&self.pool)
        .await?;

        let images = records
            .into_iter()
            .map(Image::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        attach_images(posts, images);
        Ok(())
    }

    /// Inserts the post with its images and bumps the thread for replies, all
    /// in one transaction.
    pub async fn create_post(
        &self,
        post: &CreatePost,
        images: &[CreateImage],
    ) -> Result<Id<PostMarker>> {
        let date = to_primitive(post.date);
        let mut transaction = self.pool.begin().await?;

        let post_id: i64 = query_scalar(
            "
            INSERT INTO posts.posts
                (board_id, thread_id, user_id, poster, text, posted_at, bumped_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING post_id
            ",
        )
        .bind(post.board_id.to_row_id())
        .bind(post.thread.map(Id::to_row_id))
        .bind(post.author.map(Id::to_row_id))
        .bind(post.poster.get())
        .bind(&post.text)
        .bind(date)
        .fetch_one(&mut *transaction)
        .await?;

        for image in images {
            query(
                "
                INSERT INTO posts.images (post_id, image, thumb)
                VALUES ($1, $2, $3)
                ",
            )
            .bind(post_id)
            .bind(&image.image)
            .bind(&image.thumb)
            .execute(&mut *transaction)
            .await?;
        }

        if let Some(thread) = post.thread {
            query(
                "
                UPDATE posts.posts
                SET bumped_at = GREATEST(bumped_at, $2)
                WHERE post_id = $1
                ",
            )
            .bind(thread.to_row_id())
            .bind(date)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        debug!(post_id, thread = ?post.thread, images = images.len(), "Created post");

        Ok(post_id.try_into()?)
    }

    /// Replaces the text and stamps `edited_at`. Returns whether a row was
    /// changed. With `first_edit_only`, a post that was already edited is left
    /// alone, so concurrent edits cannot both apply.
    pub async fn edit_post(
        &self,
        post_id: Id<PostMarker>,
        text: &str,
        edited_at: UtcDateTime,
        first_edit_only: bool,
    ) -> Result<bool> {
        let result = query(
            "
            UPDATE posts.posts
            SET text = $2, edited_at = $3
            WHERE post_id = $1 AND (NOT $4 OR edited_at IS NULL)
            ",
        )
        .bind(post_id.to_row_id())
        .bind(text)
        .bind(to_primitive(edited_at))
        .bind(first_edit_only)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deleting a thread root deletes its replies; images go with their posts.
    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let result = query(
            "
            DELETE FROM posts.posts
            WHERE post_id = $1
            ",
        )
        .bind(post_id.to_row_id())
        .execute(&self.pool)
        .await?;

        debug!(%post_id, deleted = result.rows_affected(), "Deleted post");
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_janny(&self, user_id: Id<UserMarker>, board_id: Id<BoardMarker>) -> Result<bool> {
        let is_janny = query_scalar(
            "
            SELECT EXISTS (
                SELECT 1
                FROM boards.jannies
                WHERE board_id = $1 AND user_id = $2
            )
            ",
        )
        .bind(board_id.to_row_id())
        .bind(user_id.to_row_id())
        .fetch_one(&self.pool)
        .await?;

        Ok(is_janny)
    }

    pub async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT user_id, handle
            FROM users.users
            WHERE user_id = $1
            ",
        )
        .bind(user_id.to_row_id())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    pub async fn fetch_user_by_handle(&self, handle: &UserHandle) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT user_id, handle
            FROM users.users
            WHERE handle = $1
            ",
        )
        .bind(handle.get())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    pub async fn create_user(&self, user: &CreateUser) -> Result<Id<UserMarker>> {
        let user_id: i64 = query_scalar(
            "
            INSERT INTO users.users (handle)
            VALUES ($1)
            RETURNING user_id
            ",
        )
        .bind(user.handle.get())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::HandleTaken(user.handle.get().to_owned())
            }
            err => DbError::Sqlx(err),
        })?;

        Ok(user_id.try_into()?)
    }

    pub async fn create_authentication(&self, authentication: &Authentication) -> Result<()> {
        query(
            "
            INSERT INTO users.authentications
                (token_hash, user_id, created_at, expires_after_seconds)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&authentication.token_hash.0[..])
        .bind(authentication.user.to_row_id())
        .bind(to_primitive(authentication.created_at))
        .bind(
            authentication
                .expires_after
                .map(|expires_after| expires_after.whole_seconds()),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch_authentication(
        &self,
        token_hash: &AuthTokenHash,
    ) -> Result<Option<Authentication>> {
        let record = query_as::<_, AuthenticationRecord>(
            "
            SELECT user_id, token_hash, created_at, expires_after_seconds
            FROM users.authentications
            WHERE token_hash = $1
            ",
        )
        .bind(&token_hash.0[..])
        .fetch_optional(&self.pool)
        .await?;

        let authentication = record.map(Authentication::try_from).transpose()?;
        Ok(authentication)
    }
}
