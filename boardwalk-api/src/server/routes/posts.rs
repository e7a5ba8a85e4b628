use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    json::{Created, Json},
    media::MediaStore,
    upload::{CREATE_POST_BODY_LIMIT, NewPostForm},
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{Method, StatusCode},
};
use axum_extra::routing::{RouterExt, TypedPath};
use boardwalk_common::{
    markup::render_post_text,
    model::{
        Id,
        board::Board,
        post::{CreatePost, EditPost, Post, PostMarker},
    },
    permission::{self, Actor, PermissionRequest, PostAction},
    thumbnail::{ImageUpload, Thumbnail, make_thumbnail},
};
use boardwalk_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use time::UtcDateTime;
use tracing::info;

pub fn routes() -> ServerRouter {
    let uploads = ServerRouter::new()
        .typed_post(create_post)
        .layer(DefaultBodyLimit::max(CREATE_POST_BODY_LIMIT));

    ServerRouter::new()
        .typed_get(get_post)
        .typed_patch(edit_post)
        .typed_delete(delete_post)
        .merge(uploads)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

async fn get_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    State(media): State<Arc<MediaStore>>,
) -> Result<Json<Post>> {
    let mut post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    media.resolve(&mut post);

    Ok(Json(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts", rejection(ServerError))]
struct CreatePostPath();

async fn create_post(
    CreatePostPath(): CreatePostPath,
    State(db): State<Arc<DbClient>>,
    State(media): State<Arc<MediaStore>>,
    user: Option<AuthenticatedUser>,
    multipart: Multipart,
) -> Result<Created<Post>> {
    let form = NewPostForm::read(multipart).await?;

    let board = db
        .fetch_board(&form.board)
        .await?
        .ok_or_else(|| ServerError::UnknownBoard(form.board.clone()))?;
    if let Some(thread) = form.thread {
        check_thread(&db, &board, thread).await?;
    }

    let thumbnails = make_thumbnails(form.files).await?;
    let mut images = Vec::with_capacity(thumbnails.len());
    for (upload, thumbnail) in &thumbnails {
        match media.save(upload, thumbnail).await {
            Ok(image) => images.push(image),
            Err(err) => {
                media.remove(&images).await;
                return Err(ServerError::Media(err));
            }
        }
    }

    let new_post = CreatePost {
        board_id: board.id,
        thread: form.thread,
        author: user.map(AuthenticatedUser::user_id),
        poster: form.poster,
        text: render_post_text(form.text.get()),
        date: UtcDateTime::now(),
    };
    let post_id = match db.create_post(&new_post, &images).await {
        Ok(post_id) => post_id,
        Err(err) => {
            media.remove(&images).await;
            return Err(err.into());
        }
    };
    info!(%post_id, board = %board.link, thread = ?new_post.thread, "Post created");

    let mut post = db
        .fetch_post(post_id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(post_id))?;
    media.resolve(&mut post);

    Ok(Created(post))
}

/// Replies must point at a thread root on the same board.
async fn check_thread(db: &DbClient, board: &Board, thread: Id<PostMarker>) -> Result<()> {
    match db.fetch_post(thread).await? {
        Some(root) if root.is_thread_root() && root.board_id == board.id => Ok(()),
        _ => Err(ServerError::InvalidThread(thread)),
    }
}

async fn make_thumbnails(uploads: Vec<ImageUpload>) -> Result<Vec<(ImageUpload, Thumbnail)>> {
    if uploads.is_empty() {
        return Ok(Vec::new());
    }

    let thumbnails = tokio::task::spawn_blocking(move || {
        uploads
            .into_iter()
            .map(|upload| make_thumbnail(&upload).map(|thumbnail| (upload, thumbnail)))
            .collect::<Result<Vec<_>, _>>()
    })
    .await??;

    Ok(thumbnails)
}

async fn edit_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    State(media): State<Arc<MediaStore>>,
    method: Method,
    user: Option<AuthenticatedUser>,
    Json(edit): Json<EditPost>,
) -> Result<Json<Post>> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    let now = UtcDateTime::now();
    let actor = authorize(&db, &method, user, &post, now).await?;
    let is_moderator = actor.is_some_and(|actor| actor.is_moderator);

    let edited = db
        .edit_post(id, &render_post_text(edit.text.get()), now, !is_moderator)
        .await?;
    if !edited {
        // Deleted, or edited by a concurrent request since the check.
        return Err(if is_moderator {
            ServerError::PostByIdNotFound(id)
        } else {
            ServerError::Forbidden(id)
        });
    }
    info!(post_id = %id, "Post edited");

    let mut post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    media.resolve(&mut post);

    Ok(Json(post))
}

async fn delete_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    method: Method,
    user: Option<AuthenticatedUser>,
) -> Result<StatusCode> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    authorize(&db, &method, user, &post, UtcDateTime::now()).await?;

    if !db.delete_post(id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }
    info!(post_id = %id, "Post deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Checks the action against the permission rules and returns the acting user.
async fn authorize(
    db: &DbClient,
    method: &Method,
    user: Option<AuthenticatedUser>,
    post: &Post,
    now: UtcDateTime,
) -> Result<Option<Actor>> {
    let action = PostAction::from_method(method.as_str()).ok_or(ServerError::Forbidden(post.id))?;

    let actor = match user {
        Some(user) => Some(Actor {
            user: user.user_id(),
            is_moderator: db.is_janny(user.user_id(), post.board_id).await?,
        }),
        None => None,
    };

    let decision = permission::evaluate(&PermissionRequest {
        action,
        actor,
        post,
        now,
    });

    if decision.is_permitted() {
        Ok(actor)
    } else {
        Err(ServerError::Forbidden(post.id))
    }
}
