use crate::server::{Result, ServerError, ServerRouter, json::Json, media::MediaStore};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use boardwalk_common::model::{
    board::{Board, BoardLink},
    post::ThreadSummary,
};
use boardwalk_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_boards)
        .typed_get(get_board)
        .typed_get(list_threads)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/boards", rejection(ServerError))]
struct ListBoardsPath();

async fn list_boards(
    ListBoardsPath(): ListBoardsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<Board>>> {
    Ok(Json(db.fetch_boards().await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/boards/{link}", rejection(ServerError))]
struct GetBoardPath {
    link: BoardLink,
}

async fn get_board(
    GetBoardPath { link }: GetBoardPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Board>> {
    let board = db
        .fetch_board(&link)
        .await?
        .ok_or(ServerError::BoardByLinkNotFound(link))?;

    Ok(Json(board))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/boards/{link}/threads", rejection(ServerError))]
struct ListThreadsPath {
    link: BoardLink,
}

async fn list_threads(
    ListThreadsPath { link }: ListThreadsPath,
    State(db): State<Arc<DbClient>>,
    State(media): State<Arc<MediaStore>>,
) -> Result<Json<Vec<ThreadSummary>>> {
    let board = db
        .fetch_board(&link)
        .await?
        .ok_or(ServerError::BoardByLinkNotFound(link))?;

    let mut threads = db.fetch_board_threads(board.id).await?;
    for thread in &mut threads {
        media.resolve(&mut thread.post);
        media.resolve_all(&mut thread.replies);
    }

    Ok(Json(threads))
}
