use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::Method;
use http_body::{Body, Frame};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use tokio::io::{AsyncRead, ReadBuf};

use crate::errors::SessionError;

const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

pub type RequestBody = BoxBody<Bytes, std::io::Error>;

pub fn empty() -> RequestBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub fn full<T: Into<Bytes>>(chunk: T) -> RequestBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

/// `application/x-www-form-urlencoded` serialization of `pairs`.
pub fn form_urlencoded<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Bytes {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
        .into()
}

/// Streams a file as body frames without announcing a length, so HTTP/1.1
/// sends it chunked.
pub struct FileBody {
    file: tokio::fs::File,
    done: bool,
}

impl FileBody {
    /// # Errors
    ///
    /// Fails when the file cannot be opened.
    pub async fn open(path: &Path) -> Result<Self, SessionError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|err| SessionError::Upload(path.to_path_buf(), err))?;

        Ok(Self { file, done: false })
    }
}

impl Body for FileBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let mut chunk = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut buf = ReadBuf::new(&mut chunk);

        match Pin::new(&mut this.file).poll_read(cx, &mut buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(err)) => Poll::Ready(Some(Err(err))),
            Poll::Ready(Ok(())) => {
                let read = buf.filled().len();
                if read == 0 {
                    this.done = true;
                    return Poll::Ready(None);
                }

                chunk.truncate(read);
                Poll::Ready(Some(Ok(Frame::data(Bytes::from(chunk)))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

/// What a session sends with its request.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    /// Nothing; the request is a GET.
    #[default]
    None,

    /// Fixed bytes posted as a form; the request is a POST.
    Fields(Bytes),

    /// A file streamed as the body; the request is a PUT.
    Upload(PathBuf),
}

impl Payload {
    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::None => Method::GET,
            Self::Fields(_) => Method::POST,
            Self::Upload(_) => Method::PUT,
        }
    }

    /// Length known up front, if any.
    #[must_use]
    pub fn known_len(&self) -> Option<usize> {
        match self {
            Self::None => Some(0),
            Self::Fields(fields) => Some(fields.len()),
            Self::Upload(_) => None,
        }
    }

    /// A fresh body for one request. Uploads reopen the file every time.
    ///
    /// # Errors
    ///
    /// Fails when the upload file cannot be opened.
    pub async fn open(&self) -> Result<RequestBody, SessionError> {
        match self {
            Self::None => Ok(empty()),
            Self::Fields(fields) => Ok(full(fields.clone())),
            Self::Upload(path) => Ok(FileBody::open(path).await?.boxed()),
        }
    }
}
