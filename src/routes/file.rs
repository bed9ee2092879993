//! Protected file delivery
//!
//! Streams an authorized file in fixed-size chunks with headers that forbid
//! any intermediate or browser caching. The file is opened and measured
//! before the response head is built, so a failure never produces a partial
//! response.

use std::io;
use std::path::Path;

use bytes::BytesMut;
use futures_util::stream::{self, TryStreamExt};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::{Response, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, error};

use super::serve::ServeError;
use crate::catalog::PROTECTED_MIME;
use crate::server::{build_response, empty_body, BoxBody};

/// Read size per body frame
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Header value applied to every protected response
pub const NO_STORE: &str = "no-store, no-cache, must-revalidate, max-age=0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        }
    }
}

/// `Content-Disposition` value for `path`.
///
/// The plain `filename` is restricted to printable ASCII; when that loses
/// information the exact name follows as an RFC 5987 `filename*`.
pub fn content_disposition(disposition: Disposition, path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());

    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();

    if fallback == name {
        format!("{}; filename=\"{}\"", disposition.as_str(), fallback)
    } else {
        format!(
            "{}; filename=\"{}\"; filename*=UTF-8''{}",
            disposition.as_str(),
            fallback,
            urlencoding::encode(&name)
        )
    }
}

/// Stream `path` as a protected document.
///
/// Returns the response and the announced content length.
pub async fn serve_file(
    path: &Path,
    disposition: Disposition,
    head_only: bool,
) -> Result<(Response<BoxBody>, u64), ServeError> {
    let file = File::open(path).await.map_err(|e| open_error(path, e))?;
    let metadata = file.metadata().await.map_err(|e| open_error(path, e))?;
    if !metadata.is_file() {
        return Err(ServeError::NotFound);
    }
    let length = metadata.len();

    let body: BoxBody = if head_only {
        empty_body()
    } else {
        chunked_body(file)
    };

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", PROTECTED_MIME)
        .header("Content-Length", length)
        .header("Content-Disposition", content_disposition(disposition, path))
        .header("Cache-Control", NO_STORE)
        .header("Pragma", "no-cache")
        .header("Expires", "0")
        .header("X-Content-Type-Options", "nosniff");

    debug!(bytes = length, disposition = disposition.as_str(), "Serving protected file");
    Ok((build_response(builder, body), length))
}

fn chunked_body(file: File) -> BoxBody {
    let chunks = stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let read = file.read_buf(&mut buf).await?;
        if read == 0 {
            return Ok::<_, io::Error>(None);
        }
        Ok(Some((buf.freeze(), file)))
    });

    StreamBody::new(chunks.map_ok(Frame::data)).boxed()
}

fn open_error(path: &Path, e: io::Error) -> ServeError {
    if e.kind() == io::ErrorKind::NotFound {
        ServeError::NotFound
    } else {
        error!(path = %path.display(), error = %e, "Failed to open protected file");
        ServeError::Internal(e.to_string())
    }
}
