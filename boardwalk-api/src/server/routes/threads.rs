use crate::server::{Result, ServerError, ServerRouter, json::Json, media::MediaStore};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use boardwalk_common::model::{
    Id,
    post::{PostMarker, Thread},
};
use boardwalk_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_get(get_thread)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/threads/{id}", rejection(ServerError))]
struct GetThreadPath {
    id: Id<PostMarker>,
}

async fn get_thread(
    GetThreadPath { id }: GetThreadPath,
    State(db): State<Arc<DbClient>>,
    State(media): State<Arc<MediaStore>>,
) -> Result<Json<Thread>> {
    let mut thread = db
        .fetch_thread(id)
        .await?
        .ok_or(ServerError::ThreadByIdNotFound(id))?;
    media.resolve_all(&mut thread.posts);

    Ok(Json(thread))
}
