//! Post storage against a real database. Each test gets a fresh, migrated one.

use boardwalk_common::model::{
    Id,
    auth::{AuthToken, Authentication},
    board::{Board, BoardLink},
    image::CreateImage,
    post::{CreatePost, PostMarker, PosterName},
    user::{CreateUser, UserHandle},
};
use boardwalk_db::client::{DbClient, DbError};
use sqlx::PgPool;
use time::{Duration, UtcDateTime, macros::utc_datetime};

const START: UtcDateTime = utc_datetime!(2025-03-01 12:00);

fn minutes(minutes: i64) -> UtcDateTime {
    START + Duration::minutes(minutes)
}

async fn seed_board(pool: &PgPool, db: &DbClient, link: &str) -> Board {
    sqlx::query("INSERT INTO boards.boards (link, title) VALUES ($1, $2)")
        .bind(link)
        .bind("Random")
        .execute(pool)
        .await
        .unwrap();

    db.fetch_board(&BoardLink::new(link.to_owned()).unwrap())
        .await
        .unwrap()
        .unwrap()
}

async fn post_at(
    db: &DbClient,
    board: &Board,
    thread: Option<Id<PostMarker>>,
    at: i64,
    images: &[CreateImage],
) -> Id<PostMarker> {
    db.create_post(
        &CreatePost {
            board_id: board.id,
            thread,
            author: None,
            poster: PosterName::default(),
            text: format!("posted at {at}"),
            date: minutes(at),
        },
        images,
    )
    .await
    .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
async fn thread_lists_root_then_replies_by_date(pool: PgPool) {
    let db = DbClient::new(pool.clone());
    let board = seed_board(&pool, &db, "b").await;

    let root = post_at(&db, &board, None, 0, &[]).await;
    let second = post_at(&db, &board, Some(root), 20, &[]).await;
    let third = post_at(&db, &board, Some(root), 30, &[]).await;
    let first = post_at(&db, &board, Some(root), 10, &[]).await;

    let thread = db.fetch_thread(root).await.unwrap().unwrap();
    let ids: Vec<_> = thread.posts.iter().map(|post| post.id).collect();

    assert_eq!(thread.id, root);
    assert_eq!(thread.board, board.link);
    assert_eq!(ids, [root, first, second, third]);
    assert_eq!(thread.posts[0].bump, minutes(30), "bump follows the newest reply");

    assert_eq!(db.fetch_thread(first).await.unwrap(), None);
    assert_eq!(db.fetch_thread(Id::new(999_999)).await.unwrap(), None);
}

#[sqlx::test(migrations = "./migrations")]
async fn board_preview_keeps_latest_replies_oldest_first(pool: PgPool) {
    let db = DbClient::new(pool.clone());
    let board = seed_board(&pool, &db, "b").await;

    let old_root = post_at(&db, &board, None, 0, &[]).await;
    let new_root = post_at(&db, &board, None, 5, &[]).await;
    let mut replies = Vec::new();
    for at in [10, 20, 30, 40, 50] {
        replies.push(post_at(&db, &board, Some(old_root), at, &[]).await);
    }

    let threads = db.fetch_board_threads(board.id).await.unwrap();
    let roots: Vec<_> = threads.iter().map(|thread| thread.post.id).collect();
    assert_eq!(roots, [old_root, new_root], "bumped thread comes first");

    let preview: Vec<_> = threads[0].replies.iter().map(|reply| reply.id).collect();
    assert_eq!(preview, replies[1..]);
    assert_eq!(threads[0].post.date, START);
    assert_eq!(threads[0].post.bump, minutes(50));
    assert!(threads[1].replies.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn images_and_replies_go_with_their_post(pool: PgPool) {
    let db = DbClient::new(pool.clone());
    let board = seed_board(&pool, &db, "b").await;
    let image = CreateImage {
        image: "images/k/a.png".to_owned(),
        thumb: "thumbs/k/thumb_a.png".to_owned(),
    };

    let root = post_at(&db, &board, None, 0, std::slice::from_ref(&image)).await;
    let reply = post_at(&db, &board, Some(root), 10, &[]).await;

    let stored = db.fetch_post(root).await.unwrap().unwrap();
    assert_eq!(stored.files.len(), 1);
    assert_eq!(stored.files[0].image, image.image);
    assert_eq!(stored.files[0].thumb, image.thumb);

    assert!(db.delete_post(root).await.unwrap());
    assert_eq!(db.fetch_post(reply).await.unwrap(), None);
    assert!(!db.delete_post(root).await.unwrap());
}

#[sqlx::test(migrations = "./migrations")]
async fn second_edit_is_not_applied(pool: PgPool) {
    let db = DbClient::new(pool.clone());
    let board = seed_board(&pool, &db, "b").await;
    let root = post_at(&db, &board, None, 0, &[]).await;
    let reply = post_at(&db, &board, Some(root), 10, &[]).await;

    assert!(db.edit_post(reply, "first", minutes(20), true).await.unwrap());
    assert!(!db.edit_post(reply, "second", minutes(21), true).await.unwrap());

    let stored = db.fetch_post(reply).await.unwrap().unwrap();
    assert_eq!(stored.text, "first");
    assert_eq!(stored.edited_at, Some(minutes(20)));

    assert!(db.edit_post(reply, "moderated", minutes(22), false).await.unwrap());
    assert!(!db.edit_post(Id::new(999_999), "gone", minutes(23), false).await.unwrap());
}

#[sqlx::test(migrations = "./migrations")]
async fn users_tokens_and_jannies(pool: PgPool) {
    let db = DbClient::new(pool.clone());
    let board = seed_board(&pool, &db, "b").await;
    let user = CreateUser {
        handle: UserHandle::new("janny".to_owned()).unwrap(),
    };

    let user_id = db.create_user(&user).await.unwrap();
    assert!(matches!(
        db.create_user(&user).await,
        Err(DbError::HandleTaken(handle)) if handle == "janny"
    ));
    assert_eq!(
        db.fetch_user_by_handle(&user.handle).await.unwrap().map(|user| user.id),
        Some(user_id)
    );

    let token = AuthToken::generate_random(user_id);
    let token_hash = token.hash().unwrap();
    db.create_authentication(&Authentication {
        user: user_id,
        token_hash: token_hash.clone(),
        created_at: START,
        expires_after: None,
    })
    .await
    .unwrap();
    let authentication = db.fetch_authentication(&token_hash).await.unwrap().unwrap();
    assert_eq!(authentication.user, user_id);
    assert_eq!(authentication.created_at, START);

    assert!(!db.is_janny(user_id, board.id).await.unwrap());
    sqlx::query("INSERT INTO boards.jannies (board_id, user_id) VALUES ($1, $2)")
        .bind(board.id.to_row_id())
        .bind(user_id.to_row_id())
        .execute(&pool)
        .await
        .unwrap();
    assert!(db.is_janny(user_id, board.id).await.unwrap());
}
