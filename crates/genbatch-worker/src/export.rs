//! Writes generated images to a local directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use genbatch_models::request::DEFAULT_DOWNLOAD_NAME;
use genbatch_models::{GeneratedImage, ItemId};

use crate::store::{ExportError, ExportResult, ResultExporter};

/// Give up on finding a free name after this many numbered candidates.
const MAX_NAME_CANDIDATES: u32 = 10_000;

/// Exports each image under its download name inside `dir`.
///
/// Hosted images are fetched over HTTP; `data:` URLs are decoded in place.
/// Existing files are never overwritten: when the name is taken the image
/// is written as `name-2.ext`, `name-3.ext`, and so on.
pub struct DirectoryExporter {
    dir: PathBuf,
    client: Client,
}

impl DirectoryExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_client(dir, Client::new())
    }

    pub fn with_client(dir: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            dir: dir.into(),
            client,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Destination for an image. Only the final path component of the
    /// image's file name is used.
    pub fn target_path(&self, image: &GeneratedImage) -> PathBuf {
        let name = Path::new(&image.file_name)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_DOWNLOAD_NAME);
        self.dir.join(name)
    }

    /// Create `base`, or the first free numbered variant of it, and write
    /// `bytes` there. Returns the path actually written.
    async fn write_new(&self, base: &Path, bytes: &[u8]) -> ExportResult<PathBuf> {
        for n in 1..=MAX_NAME_CANDIDATES {
            let candidate = numbered(base, n);
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} exists, trying another name", candidate.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ExportError::InvalidResult(format!(
            "no free file name for {}",
            base.display()
        )))
    }

    async fn fetch(&self, url: &str) -> ExportResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExportError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::Fetch(format!("HTTP {} for {}", status, url)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExportError::Fetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// `base` for `n == 1`, otherwise `base` with `-n` appended to its stem.
fn numbered(base: &Path, n: u32) -> PathBuf {
    if n == 1 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{}-{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}-{}", stem, n),
    };
    base.with_file_name(name)
}

/// Decode the body of a base64 `data:` URL (the part after `data:`).
fn decode_data_url(data: &str) -> ExportResult<Vec<u8>> {
    let (meta, body) = data
        .split_once(',')
        .ok_or_else(|| ExportError::InvalidResult("data URL without payload".to_string()))?;
    if !meta.ends_with(";base64") {
        return Err(ExportError::InvalidResult(format!(
            "unsupported data URL encoding: {}",
            meta
        )));
    }
    base64::engine::general_purpose::STANDARD
        .decode(body.trim())
        .map_err(|e| ExportError::Decode(e.to_string()))
}

#[async_trait]
impl ResultExporter<GeneratedImage> for DirectoryExporter {
    async fn export(&self, item_id: &ItemId, image: &GeneratedImage) -> ExportResult<()> {
        let bytes = match image.image_url.strip_prefix("data:") {
            Some(data) => decode_data_url(data)?,
            None => self.fetch(&image.image_url).await?,
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.write_new(&self.target_path(image), &bytes).await?;

        info!(item_id = %item_id, "Exported {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn image(url: &str, file_name: &str) -> GeneratedImage {
        GeneratedImage {
            image_url: url.to_string(),
            file_name: file_name.to_string(),
            revised_prompt: None,
        }
    }

    #[tokio::test]
    async fn test_export_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = DirectoryExporter::new(dir.path().join("out"));
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG-bytes");

        exporter
            .export(
                &ItemId::new("public/paris.png"),
                &image(&format!("data:image/png;base64,{}", encoded), "paris.png"),
            )
            .await
            .unwrap();

        let written = std::fs::read(dir.path().join("out/paris.png")).unwrap();
        assert_eq!(written, b"\x89PNG-bytes");
    }

    #[tokio::test]
    async fn test_export_fetches_hosted_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/rome.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"rome".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let exporter = DirectoryExporter::new(dir.path());
        let url = format!("{}/img/rome.png", server.uri());
        exporter
            .export(&ItemId::new("rome.png"), &image(&url, "rome.png"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("rome.png")).unwrap(), b"rome");
    }

    #[tokio::test]
    async fn test_fetch_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let exporter = DirectoryExporter::new(dir.path());
        let url = format!("{}/missing.png", server.uri());
        let err = exporter
            .export(&ItemId::new("missing.png"), &image(&url, "missing.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Fetch(_)));
    }

    #[test]
    fn test_target_path_strips_directories() {
        let exporter = DirectoryExporter::new("/tmp/out");
        assert_eq!(
            exporter.target_path(&image("x", "../../etc/passwd")),
            PathBuf::from("/tmp/out/passwd")
        );
        assert_eq!(
            exporter.target_path(&image("x", "")),
            PathBuf::from("/tmp/out").join(DEFAULT_DOWNLOAD_NAME)
        );
    }

    #[tokio::test]
    async fn test_shared_file_names_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = DirectoryExporter::new(dir.path());
        let engine = base64::engine::general_purpose::STANDARD;
        let europe = format!("data:image/png;base64,{}", engine.encode(b"europe"));
        let usa = format!("data:image/png;base64,{}", engine.encode(b"usa"));

        let successes = vec![
            (ItemId::new("europe/paris.png"), image(&europe, "paris.png")),
            (ItemId::new("usa/paris.png"), image(&usa, "paris.png")),
        ];
        let report = crate::store::export_all(&successes, &exporter).await;
        assert!(report.is_complete());
        assert_eq!(report.exported.len(), 2);

        assert_eq!(std::fs::read(dir.path().join("paris.png")).unwrap(), b"europe");
        assert_eq!(std::fs::read(dir.path().join("paris-2.png")).unwrap(), b"usa");
    }

    #[test]
    fn test_numbered_names() {
        let base = Path::new("/tmp/out/paris.png");
        assert_eq!(numbered(base, 1), PathBuf::from("/tmp/out/paris.png"));
        assert_eq!(numbered(base, 3), PathBuf::from("/tmp/out/paris-3.png"));
        assert_eq!(
            numbered(Path::new("/tmp/out/README"), 2),
            PathBuf::from("/tmp/out/README-2")
        );
    }

    #[test]
    fn test_bad_data_url() {
        assert!(matches!(
            decode_data_url("image/png,plain"),
            Err(ExportError::InvalidResult(_))
        ));
        assert!(matches!(
            decode_data_url("image/png;base64,@@@"),
            Err(ExportError::Decode(_))
        ));
    }
}
