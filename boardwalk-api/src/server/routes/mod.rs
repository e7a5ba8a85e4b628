use crate::server::ServerRouter;

mod boards;
mod posts;
mod threads;
mod users;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .merge(boards::routes())
        .merge(threads::routes())
        .merge(posts::routes())
        .merge(users::routes())
}
