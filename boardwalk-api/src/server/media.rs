//! Uploaded images and their thumbnails on disk.
//!
//! Every upload gets its own random directory, so `images/<key>/<name>` and
//! `thumbs/<key>/thumb_<name>` never collide between posts.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use boardwalk_common::{
    model::{image::CreateImage, post::Post},
    thumbnail::{ImageUpload, Thumbnail},
};
use std::{
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

const MAX_FILE_NAME_LEN: usize = 100;
const FALLBACK_FILE_NAME: &str = "upload";

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct MediaStore {
    root: PathBuf,
    url_prefix: String,
}

impl MediaStore {
    #[must_use]
    pub fn new(root: PathBuf, url_prefix: String) -> Self {
        let url_prefix = format!("/{}", url_prefix.trim_matches('/'));
        Self { root, url_prefix }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    #[must_use]
    pub fn url(&self, relative_path: &str) -> String {
        format!("{}/{relative_path}", self.url_prefix)
    }

    /// Rewrites the stored relative paths of a post's images into URLs.
    pub fn resolve(&self, post: &mut Post) {
        for file in &mut post.files {
            file.image = self.url(&file.image);
            file.thumb = self.url(&file.thumb);
        }
    }

    pub fn resolve_all<'a>(&self, posts: impl IntoIterator<Item = &'a mut Post>) {
        for post in posts {
            self.resolve(post);
        }
    }

    /// Writes an upload and its thumbnail, returning their relative paths.
    pub async fn save(&self, upload: &ImageUpload, thumbnail: &Thumbnail) -> io::Result<CreateImage> {
        let key = BASE64_URL_SAFE_NO_PAD.encode(rand::random::<[u8; 12]>());
        let image = format!("images/{key}/{}", upload.name);
        let thumb = format!("thumbs/{key}/{}", thumbnail.name);

        self.write(&image, &upload.bytes).await?;
        if let Err(err) = self.write(&thumb, &thumbnail.bytes).await {
            self.remove_file(&image).await;
            return Err(err);
        }

        debug!(%image, %thumb, "Stored upload");
        Ok(CreateImage { image, thumb })
    }

    /// Best-effort cleanup of files whose rows never got written.
    pub async fn remove(&self, images: &[CreateImage]) {
        for image in images {
            self.remove_file(&image.image).await;
            self.remove_file(&image.thumb).await;
        }
    }

    async fn write(&self, relative_path: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.root.join(relative_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await
    }

    async fn remove_file(&self, relative_path: &str) {
        if let Err(err) = tokio::fs::remove_file(self.root.join(relative_path)).await {
            warn!(path = relative_path, error = %err, "Could not remove media file");
        }
    }
}

/// Reduces a client-supplied file name to a safe single path component.
#[must_use]
pub fn sanitize_file_name(name: Option<&str>) -> String {
    let base = name
        .unwrap_or_default()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_LEN)
        .collect();
    let sanitized = sanitized.trim_start_matches('.');

    if sanitized.is_empty() {
        FALLBACK_FILE_NAME.to_owned()
    } else {
        sanitized.to_owned()
    }
}
