use axum::{
    Router,
    extract::{
        FromRef, Request,
        multipart::MultipartError,
        rejection::{JsonRejection, PathRejection},
    },
    http::{HeaderValue, StatusCode, Uri, header::X_CONTENT_TYPE_OPTIONS},
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::TypedHeaderRejection;
use boardwalk_common::{
    model::{
        Id,
        auth::{AuthTokenDecodeError, AuthTokenHashError},
        board::{BoardLink, InvalidBoardLinkError},
        post::{InvalidPostTextError, InvalidPosterNameError, PostMarker},
        user::UserMarker,
    },
    thumbnail::{MAX_UPLOAD_BYTES, ThumbnailError},
    util::PositiveDuration,
};
use boardwalk_db::client::{DbClient, DbError};
use json::Json;
use media::MediaStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, warn};

mod auth;
mod json;
pub mod media;
mod routes;
mod upload;

pub type ServerRouter = Router<ServerState>;

#[derive(Clone, Debug, FromRef)]
pub struct ServerState {
    pub db_client: Arc<DbClient>,
    pub media: Arc<MediaStore>,
    /// Lifetime of newly issued tokens; `None` never expires.
    pub token_lifetime: Option<PositiveDuration>,
}

/// The complete application: API routes, uploaded media and request tracing.
pub fn app(state: ServerState) -> Router {
    // Uploads are served from our own origin; browsers must trust the extension.
    let media_files = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .service(ServeDir::new(state.media.root()));

    routes::routes()
        .nest_service(state.media.url_prefix(), media_files)
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Multipart form could not be read: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Authorization header was invalid: {0}")]
    InvalidAuthorizationHeader(TypedHeaderRejection),
    #[error("The provided auth token could not be decoded: {0}")]
    InvalidAuthToken(#[from] AuthTokenDecodeError),
    #[error("The auth token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error("Provided token was invalid")]
    InvalidToken,
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("Board {0} was not found.")]
    BoardByLinkNotFound(BoardLink),
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("Thread with id {0} was not found.")]
    ThreadByIdNotFound(Id<PostMarker>),
    #[error("User with id {0} was not found.")]
    UserByIdNotFound(Id<UserMarker>),
    #[error("Missing form field {0:?}")]
    MissingField(&'static str),
    #[error("Invalid form field {0:?}")]
    InvalidField(&'static str),
    #[error(transparent)]
    InvalidBoardLink(#[from] InvalidBoardLinkError),
    #[error(transparent)]
    InvalidPostText(#[from] InvalidPostTextError),
    #[error(transparent)]
    InvalidPosterName(#[from] InvalidPosterNameError),
    #[error("Board {0} does not exist")]
    UnknownBoard(BoardLink),
    #[error("Post {0} is not a thread on this board")]
    InvalidThread(Id<PostMarker>),
    #[error("File {0:?} is larger than {MAX_UPLOAD_BYTES} bytes")]
    FileTooLarge(String),
    #[error("At most {0} files may be attached")]
    TooManyFiles(usize),
    #[error("File {0:?} is not a supported image")]
    UnsupportedImage(String),
    #[error("Thumbnail generation failed: {0}")]
    Thumbnail(#[from] ThumbnailError),
    #[error("Blocking task failed: {0}")]
    Blocking(#[from] JoinError),
    #[error("Media storage failed: {0}")]
    Media(std::io::Error),
    #[error("Not permitted to modify post {0}")]
    Forbidden(Id<PostMarker>),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::BoardByLinkNotFound(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::ThreadByIdNotFound(_)
            | ServerError::UserByIdNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidToken => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::Multipart(err) => err.status(),
            ServerError::Database(DbError::HandleTaken(_)) => StatusCode::CONFLICT,
            ServerError::Thumbnail(ThumbnailError::UnsupportedFormat)
            | ServerError::JsonRejection(_)
            | ServerError::InvalidAuthorizationHeader(_)
            | ServerError::InvalidAuthToken(_)
            | ServerError::MissingField(_)
            | ServerError::InvalidField(_)
            | ServerError::InvalidBoardLink(_)
            | ServerError::InvalidPostText(_)
            | ServerError::InvalidPosterName(_)
            | ServerError::UnknownBoard(_)
            | ServerError::InvalidThread(_)
            | ServerError::FileTooLarge(_)
            | ServerError::TooManyFiles(_)
            | ServerError::UnsupportedImage(_) => StatusCode::BAD_REQUEST,
            ServerError::JsonResponse(_)
            | ServerError::Database(_)
            | ServerError::AuthTokenHash(_)
            | ServerError::Thumbnail(_)
            | ServerError::Blocking(_)
            | ServerError::Media(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
struct ErrorResponse {
    status: u16,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, %status, "Replying with error");
        } else {
            warn!(error = %self, %status, "Rejecting request");
        }

        let error_response = ErrorResponse {
            status: status.as_u16(),
        };
        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{self, Method, header},
    };
    use image::{DynamicImage, ImageFormat, RgbImage};
    use sqlx::postgres::PgPoolOptions;
    use std::io::Cursor;
    use tower::ServiceExt;

    const BOUNDARY: &str = "boardwalk-test-boundary";

    /// The pool never connects; these requests are all rejected before a query runs.
    fn test_app() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://boardwalk@localhost/boardwalk_test")
            .unwrap();
        let media_root = std::env::temp_dir().join("boardwalk-api-tests");

        app(ServerState {
            db_client: Arc::new(DbClient::new(pool)),
            media: Arc::new(MediaStore::new(media_root, "/media".to_owned())),
            token_lifetime: None,
        })
    }

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, Vec<u8>),
    }

    fn multipart_body(parts: Vec<Part<'_>>) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                            .as_bytes(),
                    );
                }
                Part::File(name, file_name, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(&bytes);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn create_post_request(parts: Vec<Part<'_>>) -> Request {
        http::Request::builder()
            .method(Method::POST)
            .uri("/posts")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap()
    }

    async fn status_of(request: Request) -> (StatusCode, serde_json::Value) {
        let response = test_app().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(4, 4))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let request = http::Request::builder()
            .uri("/nothing/here")
            .body(Body::empty())
            .unwrap();

        let (status, body) = status_of(request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, serde_json::json!({ "status": 404 }));
    }

    #[tokio::test]
    async fn invalid_board_link_is_not_found() {
        let request = http::Request::builder()
            .uri("/boards/NOT_A_SLUG")
            .body(Body::empty())
            .unwrap();

        assert_eq!(status_of(request).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let request = create_post_request(vec![
            Part::Text("board", "b"),
            Part::Text("text", "hello"),
            Part::File("file", "big.png", vec![0; MAX_UPLOAD_BYTES + 1]),
        ]);

        assert_eq!(status_of(request).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_image_file_is_rejected() {
        let request = create_post_request(vec![
            Part::Text("board", "b"),
            Part::Text("text", "hello"),
            Part::File("file", "notes.txt", b"plain text".to_vec()),
        ]);

        assert_eq!(status_of(request).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_text_is_rejected() {
        let request = create_post_request(vec![
            Part::Text("board", "b"),
            Part::File("file", "ok.png", png()),
        ]);

        assert_eq!(status_of(request).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn media_is_served_as_image_without_sniffing() {
        let media_root = std::env::temp_dir().join("boardwalk-api-tests");
        let dir = media_root.join("images/served");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let mut bytes = png();
        bytes.extend_from_slice(b"<script>alert(1)</script>");
        tokio::fs::write(dir.join("evil.png"), &bytes).await.unwrap();

        let request = http::Request::builder()
            .uri("/media/images/served/evil.png")
            .body(Body::empty())
            .unwrap();
        let response = test_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()[X_CONTENT_TYPE_OPTIONS], "nosniff");
    }

    #[tokio::test]
    async fn malformed_token_is_rejected() {
        let request = http::Request::builder()
            .method(Method::DELETE)
            .uri("/posts/1")
            .header(header::AUTHORIZATION, "Bearer not-a-token")
            .body(Body::empty())
            .unwrap();

        assert_eq!(status_of(request).await.0, StatusCode::BAD_REQUEST);
    }
}
