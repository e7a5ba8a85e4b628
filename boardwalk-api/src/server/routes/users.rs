use crate::server::{
    Result, ServerError, ServerRouter,
    json::{Created, Json},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use boardwalk_common::{
    model::{
        Id,
        auth::{AuthToken, Authentication},
        user::{CreateUser, User, UserMarker},
    },
    util::PositiveDuration,
};
use boardwalk_db::client::DbClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::UtcDateTime;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_user)
        .typed_get(get_user)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users", rejection(ServerError))]
struct CreateUserPath();

/// A new account and the only copy of its bearer token.
#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct Registration {
    user: User,
    token: String,
}

async fn create_user(
    CreateUserPath(): CreateUserPath,
    State(db): State<Arc<DbClient>>,
    State(token_lifetime): State<Option<PositiveDuration>>,
    Json(user): Json<CreateUser>,
) -> Result<Created<Registration>> {
    let user_id = db.create_user(&user).await?;

    let token = AuthToken::generate_random(user_id);
    db.create_authentication(&Authentication {
        user: user_id,
        token_hash: token.hash()?,
        created_at: UtcDateTime::now(),
        expires_after: token_lifetime,
    })
    .await?;
    info!(%user_id, handle = user.handle.get(), "User registered");

    Ok(Created(Registration {
        user: User {
            id: user_id,
            handle: user.handle,
        },
        token: token.as_token_str(),
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}", rejection(ServerError))]
struct GetUserPath {
    id: Id<UserMarker>,
}

async fn get_user(
    GetUserPath { id }: GetUserPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<User>> {
    let user = db
        .fetch_user(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(user))
}
