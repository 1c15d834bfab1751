//! PROPFIND property rendering in the `DAV:` namespace.

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use httpdate::fmt_http_date;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, warn};
use xmltree::{Element, EmitterConfig, Namespace, XMLNode};

use crate::atomic::is_staging_name;
use crate::error::DavError;
use crate::etag::etag_from_metadata;

pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

const DAV_PREFIX: &str = "D";
const DAV_NAMESPACE: &str = "DAV:";
const STATUS_OK: &str = "HTTP/1.1 200 OK";

/// How far a PROPFIND descends. Infinite depth is not offered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

impl Depth {
    /// `0` selects the resource alone; anything else, including no header, is depth 1.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("0") => Depth::Zero,
            _ => Depth::One,
        }
    }
}

/// Properties reported for a single resource.
#[derive(Clone, Debug)]
pub struct ResourceProps {
    pub href: String,
    pub is_dir: bool,
    pub content_length: u64,
    pub last_modified: SystemTime,
    pub created: SystemTime,
    pub etag: String,
}

impl ResourceProps {
    pub fn from_metadata(href: String, metadata: &Metadata) -> Self {
        let is_dir = metadata.is_dir();
        let last_modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        Self {
            href,
            is_dir,
            content_length: if is_dir { 0 } else { metadata.len() },
            last_modified,
            // Not every filesystem records birth time.
            created: metadata.created().unwrap_or(last_modified),
            etag: etag_from_metadata(metadata),
        }
    }

    fn to_element(&self) -> Element {
        let mut resource_type = dav_element("resourcetype");
        if self.is_dir {
            resource_type
                .children
                .push(XMLNode::Element(dav_element("collection")));
        }

        let created: DateTime<Utc> = self.created.into();
        let prop = with_children(
            "prop",
            vec![
                resource_type,
                text_element("getcontentlength", self.content_length.to_string()),
                text_element("getlastmodified", fmt_http_date(self.last_modified)),
                text_element(
                    "creationdate",
                    created.to_rfc3339_opts(SecondsFormat::Millis, true),
                ),
                text_element("getetag", self.etag.clone()),
            ],
        );
        let propstat = with_children("propstat", vec![prop, text_element("status", STATUS_OK)]);
        with_children(
            "response",
            vec![text_element("href", self.href.clone()), propstat],
        )
    }
}

/// Stats `target` and, for directories at depth 1, each direct child.
///
/// Fails only when `target` itself cannot be stat-ed. Unreadable children are
/// logged and left out.
pub async fn collect_props(
    target: &Path,
    href: &str,
    depth: Depth,
) -> io::Result<Vec<ResourceProps>> {
    collect_props_with(target, href, depth, |path| fs::symlink_metadata(path).boxed()).await
}

/// [`collect_props`] with the per-child stat supplied by the caller.
async fn collect_props_with<F>(
    target: &Path,
    href: &str,
    depth: Depth,
    child_metadata: F,
) -> io::Result<Vec<ResourceProps>>
where
    F: Fn(PathBuf) -> BoxFuture<'static, io::Result<Metadata>>,
{
    let metadata = fs::metadata(target).await?;
    let mut entries = vec![ResourceProps::from_metadata(href.to_string(), &metadata)];
    if !metadata.is_dir() || depth == Depth::Zero {
        return Ok(entries);
    }

    let mut dir = match fs::read_dir(target).await {
        Ok(dir) => dir,
        Err(err) => {
            warn!(href, error = %err, "failed to read directory for listing");
            return Ok(entries);
        }
    };

    let mut children = Vec::new();
    loop {
        let entry = match dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                warn!(href, error = %err, "directory listing interrupted");
                break;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_staging_name(&name) {
            continue;
        }
        let metadata = match child_metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(href, child = name, error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if metadata.file_type().is_symlink() {
            debug!(href, child = name, "skipping symlink");
            continue;
        }
        children.push(ResourceProps::from_metadata(child_href(href, &name), &metadata));
    }

    children.sort_by(|a, b| a.href.cmp(&b.href));
    entries.extend(children);
    Ok(entries)
}

/// Renders a `207 Multi-Status` body.
pub fn render_multistatus(entries: &[ResourceProps]) -> Result<String, DavError> {
    let mut root = dav_root("multistatus");
    root.children.extend(
        entries
            .iter()
            .map(|entry| XMLNode::Element(entry.to_element())),
    );
    to_xml_string(&root)
}

/// Joins a percent-encoded child name onto a parent href with exactly one `/`.
pub fn child_href(parent: &str, name: &str) -> String {
    let encoded = urlencoding::encode(name);
    if parent.ends_with('/') {
        format!("{parent}{encoded}")
    } else {
        format!("{parent}/{encoded}")
    }
}

pub(crate) fn dav_element(name: &str) -> Element {
    let mut element = Element::new(name);
    element.prefix = Some(DAV_PREFIX.to_string());
    element.namespace = Some(DAV_NAMESPACE.to_string());
    element
}

/// Document element carrying the `xmlns:D="DAV:"` declaration.
pub(crate) fn dav_root(name: &str) -> Element {
    let mut element = dav_element(name);
    let mut namespaces = Namespace::empty();
    namespaces.put(DAV_PREFIX, DAV_NAMESPACE);
    element.namespaces = Some(namespaces);
    element
}

pub(crate) fn text_element(name: &str, text: impl Into<String>) -> Element {
    let mut element = dav_element(name);
    element.children.push(XMLNode::Text(text.into()));
    element
}

pub(crate) fn with_children(name: &str, children: Vec<Element>) -> Element {
    let mut element = dav_element(name);
    element
        .children
        .extend(children.into_iter().map(XMLNode::Element));
    element
}

pub(crate) fn to_xml_string(root: &Element) -> Result<String, DavError> {
    let mut buffer = Vec::new();
    root.write_with_config(&mut buffer, EmitterConfig::new().perform_indent(true))
        .map_err(|err| DavError::Internal(format!("xml serialization failed: {err}")))?;
    String::from_utf8(buffer).map_err(|err| DavError::Internal(err.to_string()))
}
