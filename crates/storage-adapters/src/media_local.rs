//! # Local attachment storage
//!
//! Uploads land under `<root>/<board>/<10 digit token>.<ext>` and are served
//! from `<url_prefix>/<board>/...`. Release only ever touches paths below
//! the root.

use std::io::{Cursor, ErrorKind};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use domains::{Attachment, MediaError, MediaStorage, ReleaseOutcome};
use image::ImageReader;
use rand::Rng;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Default size ceiling for a single upload.
pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

const NAME_ATTEMPTS: usize = 8;

pub struct LocalMediaStore {
    /// Root directory for all uploads (e.g., "./data/uploads")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "/uploads")
    url_prefix: String,
    max_bytes: u64,
}

impl LocalMediaStore {
    pub fn new(root: PathBuf, url_prefix: impl Into<String>, max_bytes: u64) -> Self {
        let url_prefix = url_prefix.into().trim_end_matches('/').to_string();
        Self {
            root_path: root,
            url_prefix,
            max_bytes,
        }
    }

    /// Maps a public URL back to a file below the root, or refuses.
    fn resolve_managed(&self, url: &str) -> Result<PathBuf, MediaError> {
        let relative = url
            .strip_prefix(&self.url_prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| MediaError::Forbidden(url.to_string()))?;

        let relative = Path::new(relative);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !clean || relative.as_os_str().is_empty() {
            return Err(MediaError::Forbidden(url.to_string()));
        }
        Ok(self.root_path.join(relative))
    }
}

fn extension_for(content_type: &mime::Mime) -> Option<&'static str> {
    if content_type.type_() != mime::IMAGE {
        return None;
    }
    match content_type.subtype().as_str() {
        "jpeg" | "jpg" => Some("jpg"),
        "png" => Some("png"),
        "gif" => Some("gif"),
        "webp" => Some("webp"),
        _ => None,
    }
}

fn valid_board(board: &str) -> bool {
    !board.is_empty()
        && board
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..10).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect()
}

/// Reads width and height from the image header; `(0, 0)` when unreadable.
fn dimensions(data: &[u8]) -> (u32, u32) {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok())
        .unwrap_or((0, 0))
}

/// Writes `data` out; on failure the file at `path` is removed so no
/// truncated upload stays on disk.
async fn write_or_discard<W>(mut writer: W, path: &Path, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer.write_all(data).await?;
        writer.flush().await
    }
    .await;
    let Err(err) = written else {
        return Ok(());
    };

    drop(writer);
    if let Err(cleanup) = fs::remove_file(path).await {
        warn!(path = %path.display(), error = %cleanup, "partial upload left behind");
    }
    Err(err)
}

#[async_trait]
impl MediaStorage for LocalMediaStore {
    async fn store(
        &self,
        board: &str,
        data: Bytes,
        content_type: &mime::Mime,
    ) -> Result<Attachment, MediaError> {
        if !valid_board(board) {
            return Err(MediaError::InvalidBoard);
        }
        let ext = extension_for(content_type)
            .ok_or_else(|| MediaError::DisallowedType(content_type.essence_str().to_string()))?;
        let size = data.len() as u64;
        if size > self.max_bytes {
            return Err(MediaError::TooLarge {
                max: self.max_bytes,
                actual: size,
            });
        }

        let dir = self.root_path.join(board);
        fs::create_dir_all(&dir).await?;

        for _ in 0..NAME_ATTEMPTS {
            let file_name = format!("{}.{ext}", random_token());
            let path = dir.join(&file_name);

            let file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            };
            write_or_discard(file, &path, &data).await?;

            let (width, height) = dimensions(&data);
            info!(board, file = %file_name, size, "attachment written");
            return Ok(Attachment {
                url: format!("{}/{board}/{file_name}", self.url_prefix),
                file_name,
                size,
                width,
                height,
            });
        }

        Err(MediaError::Other("could not allocate a unique file name".into()))
    }

    async fn release(&self, url: &str) -> Result<ReleaseOutcome, MediaError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            debug!(url, "external attachment, nothing to release");
            return Ok(ReleaseOutcome::External);
        }

        let path = match self.resolve_managed(url) {
            Ok(path) => path,
            Err(err) => {
                warn!(url, "attachment release outside managed root refused");
                return Err(err);
            }
        };

        match fs::remove_file(&path).await {
            Ok(()) => Ok(ReleaseOutcome::Removed),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(ReleaseOutcome::AlreadyGone),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use super::*;

    /// A writer whose disk has gone away.
    struct FailingWriter;

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::new(ErrorKind::Other, "no space left")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn png(width: u32, height: u32) -> Bytes {
        let mut buf = Vec::new();
        image::RgbImage::new(width, height)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        Bytes::from(buf)
    }

    fn store(dir: &tempfile::TempDir) -> LocalMediaStore {
        LocalMediaStore::new(dir.path().to_path_buf(), "/uploads/", MAX_UPLOAD_BYTES)
    }

    #[tokio::test]
    async fn stores_under_board_with_random_name_and_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let media = store(&dir);

        let attachment = media.store("tech", png(4, 3), &mime::IMAGE_PNG).await.unwrap();

        let stem = attachment.file_name.trim_end_matches(".png");
        assert_eq!(stem.len(), 10);
        assert!(stem.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(attachment.url, format!("/uploads/tech/{}", attachment.file_name));
        assert_eq!((attachment.width, attachment.height), (4, 3));
        assert!(dir.path().join("tech").join(&attachment.file_name).exists());
    }

    #[tokio::test]
    async fn rejects_bad_type_size_and_board() {
        let dir = tempfile::tempdir().unwrap();
        let media = LocalMediaStore::new(dir.path().to_path_buf(), "/uploads", 16);

        let err = media
            .store("tech", Bytes::from_static(b"x"), &mime::TEXT_PLAIN)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::DisallowedType(_)));

        let err = media
            .store("tech", Bytes::from(vec![0u8; 17]), &mime::IMAGE_PNG)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::TooLarge { max: 16, actual: 17 }));

        let err = media
            .store("../etc", Bytes::from_static(b"x"), &mime::IMAGE_PNG)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidBoard));
    }

    #[tokio::test]
    async fn undecodable_image_gets_zero_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let attachment = store(&dir)
            .store("tech", Bytes::from_static(b"not really a gif"), &mime::IMAGE_GIF)
            .await
            .unwrap();
        assert_eq!((attachment.width, attachment.height), (0, 0));
    }

    #[tokio::test]
    async fn release_handles_missing_external_and_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let media = store(&dir);
        let attachment = media.store("tech", png(1, 1), &mime::IMAGE_PNG).await.unwrap();

        assert_eq!(media.release(&attachment.url).await.unwrap(), ReleaseOutcome::Removed);
        assert_eq!(
            media.release(&attachment.url).await.unwrap(),
            ReleaseOutcome::AlreadyGone
        );
        assert_eq!(
            media.release("https://cdn.example.com/a.png").await.unwrap(),
            ReleaseOutcome::External
        );
        assert!(matches!(
            media.release("/uploads/../secret.txt").await.unwrap_err(),
            MediaError::Forbidden(_)
        ));
        assert!(matches!(
            media.release("/etc/passwd").await.unwrap_err(),
            MediaError::Forbidden(_)
        ));
    }

    #[test]
    fn jpg_alias_is_accepted() {
        let alias: mime::Mime = "image/jpg".parse().unwrap();
        assert_eq!(extension_for(&alias), Some("jpg"));
        assert_eq!(extension_for(&mime::IMAGE_JPEG), Some("jpg"));
        assert_eq!(extension_for(&mime::IMAGE_SVG), None);
    }

    #[tokio::test]
    async fn failed_write_removes_the_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1234567890.png");
        std::fs::write(&path, b"half").unwrap();

        let err = write_or_discard(FailingWriter, &path, b"payload")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(!path.exists());
    }
}
