use crate::server::{Result, ServerError, media::sanitize_file_name};
use axum::extract::{Multipart, multipart::Field};
use boardwalk_common::{
    model::{
        Id,
        board::BoardLink,
        post::{PostMarker, PostText, PosterName},
    },
    thumbnail::{ImageUpload, MAX_UPLOAD_BYTES},
};

pub const MAX_FILES: usize = 10;
/// Every file at the size cap plus room for the text fields.
pub const CREATE_POST_BODY_LIMIT: usize = MAX_FILES * MAX_UPLOAD_BYTES + 256 * 1024;

/// A validated `multipart/form-data` post submission.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct NewPostForm {
    pub board: BoardLink,
    pub text: PostText,
    pub poster: PosterName,
    pub thread: Option<Id<PostMarker>>,
    pub files: Vec<ImageUpload>,
}

impl NewPostForm {
    /// Reads and validates the whole form. Nothing is written while reading.
    pub async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut board = None;
        let mut text = None;
        let mut poster = None;
        let mut thread = None;
        let mut files = Vec::new();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("board") => board = Some(field.text().await?),
                Some("text") => text = Some(field.text().await?),
                Some("poster") => poster = Some(field.text().await?),
                Some("thread") => thread = Some(field.text().await?),
                Some("file") => {
                    if let Some(upload) = read_file(field).await? {
                        if files.len() == MAX_FILES {
                            return Err(ServerError::TooManyFiles(MAX_FILES));
                        }
                        files.push(upload);
                    }
                }
                _ => {}
            }
        }

        let board = board.ok_or(ServerError::MissingField("board"))?;
        let text = text.ok_or(ServerError::MissingField("text"))?;
        let thread = match thread.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(thread) => Some(
                thread
                    .parse()
                    .map_err(|_| ServerError::InvalidField("thread"))?,
            ),
        };

        Ok(Self {
            board: BoardLink::new(board.trim().to_owned())?,
            text: PostText::new(text)?,
            poster: PosterName::new(poster.as_deref())?,
            thread,
            files,
        })
    }
}

/// `None` for the empty part browsers send when no file was picked.
async fn read_file(mut field: Field<'_>) -> Result<Option<ImageUpload>> {
    let picked = field.file_name().is_some_and(|name| !name.is_empty());
    let name = sanitize_file_name(field.file_name());

    let mut bytes = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if bytes.len() + chunk.len() > MAX_UPLOAD_BYTES {
            return Err(ServerError::FileTooLarge(name));
        }
        bytes.extend_from_slice(&chunk);
    }

    if bytes.is_empty() && !picked {
        return Ok(None);
    }

    let upload = ImageUpload::new(&name, bytes).map_err(|_| ServerError::UnsupportedImage(name))?;
    Ok(Some(upload))
}
