//! Method dispatch: one handler per DAV verb over the resolved storage path.

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use futures_util::stream::StreamExt;
use http_body_util::BodyExt;
use httpdate::fmt_http_date;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::atomic::AtomicFile;
use crate::error::DavError;
use crate::etag::etag_from_metadata;
use crate::http::{ALLOWED_METHODS, LOCK_TOKEN};
use crate::lock::{LockDepth, LockToken, render_lock_discovery};
use crate::props::{Depth, XML_CONTENT_TYPE, collect_props, render_multistatus};
use crate::storage::Storage;
use crate::transfer::{TransferMode, remove_tree, transfer};

/// Verbs this server understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DavMethod {
    Options,
    Propfind,
    Get,
    Head,
    Put,
    Delete,
    Mkcol,
    Lock,
    Unlock,
    Copy,
    Move,
}

impl DavMethod {
    pub fn parse(method: &Method) -> Option<Self> {
        let parsed = match method.as_str() {
            "OPTIONS" => DavMethod::Options,
            "PROPFIND" => DavMethod::Propfind,
            "GET" => DavMethod::Get,
            "HEAD" => DavMethod::Head,
            "PUT" => DavMethod::Put,
            "DELETE" => DavMethod::Delete,
            "MKCOL" => DavMethod::Mkcol,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            _ => return None,
        };
        Some(parsed)
    }
}

/// Per-request view of the target and the DAV headers that steer handlers.
#[derive(Debug)]
pub struct RequestContext {
    pub method: DavMethod,
    /// Raw request path, used verbatim as the PROPFIND href.
    pub href: String,
    pub target: PathBuf,
    pub depth: Depth,
    pub lock_depth: LockDepth,
    pub destination: Option<String>,
    pub overwrite: bool,
}

impl RequestContext {
    pub async fn from_request(
        storage: &Storage,
        method: DavMethod,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Result<Self, DavError> {
        let href = uri.path().to_string();
        let target = storage.resolve_path_checked(&href, true).await?;
        let depth_header = header_str(headers, "depth");
        Ok(Self {
            method,
            href,
            target,
            depth: Depth::from_header(depth_header),
            lock_depth: LockDepth::from_header(depth_header),
            destination: header_str(headers, "destination").map(str::to_string),
            overwrite: parse_overwrite(header_str(headers, "overwrite")),
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// `Overwrite` defaults to `T`; any value other than `T` disables overwriting.
pub fn parse_overwrite(value: Option<&str>) -> bool {
    value.is_none_or(|value| value.trim().eq_ignore_ascii_case("T"))
}

/// Entry point for every request path.
pub async fn dav_handler(
    Extension(storage): Extension<Arc<Storage>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: AxumBody,
) -> Result<Response, DavError> {
    let Some(dav_method) = DavMethod::parse(&method) else {
        return Err(DavError::MethodNotAllowed);
    };
    if dav_method == DavMethod::Options {
        return Ok(options());
    }

    let ctx = RequestContext::from_request(&storage, dav_method, &uri, &headers).await?;
    match ctx.method {
        DavMethod::Options => Ok(options()),
        DavMethod::Propfind => propfind(&ctx).await,
        DavMethod::Get | DavMethod::Head => get(&ctx).await,
        DavMethod::Put => put(&ctx, body).await,
        DavMethod::Delete => delete(&storage, &ctx).await,
        DavMethod::Mkcol => mkcol(&ctx).await,
        DavMethod::Lock => lock(&ctx),
        DavMethod::Unlock => {
            info!(path = ctx.href, "unlock");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        DavMethod::Copy => copy_or_move(&storage, &ctx, TransferMode::Copy).await,
        DavMethod::Move => copy_or_move(&storage, &ctx, TransferMode::Move).await,
    }
}

fn options() -> Response {
    (StatusCode::OK, [(header::ALLOW, ALLOWED_METHODS)]).into_response()
}

async fn propfind(ctx: &RequestContext) -> Result<Response, DavError> {
    let entries = collect_props(&ctx.target, &ctx.href, ctx.depth)
        .await
        .map_err(|_| DavError::NotFound)?;
    let body = render_multistatus(&entries)?;
    info!(
        path = ctx.href,
        depth = ?ctx.depth,
        count = entries.len(),
        "propfind"
    );
    Ok((
        StatusCode::MULTI_STATUS,
        [(header::CONTENT_TYPE, XML_CONTENT_TYPE)],
        body,
    )
        .into_response())
}

async fn get(ctx: &RequestContext) -> Result<Response, DavError> {
    let metadata = fs::metadata(&ctx.target).await?;
    if metadata.is_dir() {
        return Err(DavError::MethodNotAllowed);
    }

    let mime = mime_guess::from_path(&ctx.target).first_or_octet_stream();
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str()).map_err(DavError::internal)?,
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    response_headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag_from_metadata(&metadata)).map_err(DavError::internal)?,
    );
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified)).map_err(DavError::internal)?,
        );
    }

    if ctx.method == DavMethod::Head {
        return Ok((StatusCode::OK, response_headers, AxumBody::empty()).into_response());
    }

    let file = File::open(&ctx.target).await?;
    info!(path = ctx.href, size = metadata.len(), "download");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn put(ctx: &RequestContext, body: AxumBody) -> Result<Response, DavError> {
    let existed = match fs::symlink_metadata(&ctx.target).await {
        Ok(metadata) if metadata.is_dir() => return Err(DavError::MethodNotAllowed),
        Ok(_) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => return Err(DavError::internal(err)),
    };

    if let Some(parent) = ctx.target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(DavError::internal)?;
    }

    let mut atomic = AtomicFile::new(&ctx.target)
        .await
        .map_err(DavError::internal)?;
    let write_result: Result<u64, DavError> = async {
        let mut written = 0u64;
        let mut data_stream = BodyExt::into_data_stream(body);
        while let Some(chunk) = data_stream.next().await {
            let chunk = chunk.map_err(DavError::internal)?;
            if !chunk.is_empty() {
                atomic
                    .file_mut()
                    .write_all(&chunk)
                    .await
                    .map_err(DavError::internal)?;
                written += chunk.len() as u64;
            }
        }
        Ok(written)
    }
    .await;
    let written = match write_result {
        Ok(written) => written,
        Err(err) => {
            atomic.cleanup().await;
            return Err(err);
        }
    };
    atomic.finalize().await.map_err(DavError::internal)?;
    info!(path = ctx.href, size = written, replaced = existed, "upload");

    let metadata = fs::metadata(&ctx.target)
        .await
        .map_err(DavError::internal)?;
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag_from_metadata(&metadata)).map_err(DavError::internal)?,
    );
    if existed {
        Ok((StatusCode::NO_CONTENT, response_headers).into_response())
    } else {
        Ok((StatusCode::CREATED, response_headers, "Created").into_response())
    }
}

async fn delete(storage: &Storage, ctx: &RequestContext) -> Result<Response, DavError> {
    if ctx.target == storage.root_path() {
        return Err(DavError::MethodNotAllowed);
    }
    let metadata = fs::symlink_metadata(&ctx.target).await?;
    remove_tree(&ctx.target, &metadata)
        .await
        .map_err(DavError::internal)?;
    info!(path = ctx.href, is_dir = metadata.is_dir(), "delete");
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn mkcol(ctx: &RequestContext) -> Result<Response, DavError> {
    match fs::symlink_metadata(&ctx.target).await {
        Ok(_) => return Err(DavError::MethodNotAllowed),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(DavError::internal(err)),
    }
    fs::create_dir_all(&ctx.target)
        .await
        .map_err(DavError::internal)?;
    info!(path = ctx.href, "create collection");
    Ok((StatusCode::CREATED, "Created").into_response())
}

/// Issues an advisory token; nothing is recorded.
fn lock(ctx: &RequestContext) -> Result<Response, DavError> {
    let token = LockToken::generate();
    let body = render_lock_discovery(&token, ctx.lock_depth)?;
    info!(path = ctx.href, token = %token, "issued advisory lock");

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(XML_CONTENT_TYPE),
    );
    response_headers.insert(
        LOCK_TOKEN,
        HeaderValue::from_str(&token.header_value()).map_err(DavError::internal)?,
    );
    Ok((StatusCode::OK, response_headers, body).into_response())
}

async fn copy_or_move(
    storage: &Storage,
    ctx: &RequestContext,
    mode: TransferMode,
) -> Result<Response, DavError> {
    let destination = ctx
        .destination
        .as_deref()
        .ok_or_else(|| DavError::BadRequest("Destination header missing".into()))?;
    let dest = storage.resolve_destination(destination).await?;

    let status = transfer(storage.renamer(), mode, &ctx.target, &dest, ctx.overwrite).await?;
    info!(
        from = ctx.href,
        to = destination,
        overwrite = ctx.overwrite,
        status = status.as_u16(),
        "{}",
        mode.as_str()
    );
    if status == StatusCode::CREATED {
        Ok((status, "Created").into_response())
    } else {
        Ok(status.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_header_defaults_to_true() {
        assert!(parse_overwrite(None));
        assert!(parse_overwrite(Some("T")));
        assert!(parse_overwrite(Some("t")));
        assert!(!parse_overwrite(Some("F")));
        assert!(!parse_overwrite(Some("f")));
        assert!(!parse_overwrite(Some("maybe")));
    }

    #[test]
    fn unknown_verbs_are_not_parsed() {
        assert_eq!(
            DavMethod::parse(&Method::from_bytes(b"PROPFIND").expect("method")),
            Some(DavMethod::Propfind)
        );
        assert_eq!(DavMethod::parse(&Method::PATCH), None);
        assert_eq!(
            DavMethod::parse(&Method::from_bytes(b"PROPPATCH").expect("method")),
            None
        );
    }
}
