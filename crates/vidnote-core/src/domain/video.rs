//! Video identity: the dedup and concurrency key of the pipeline.
//!
//! A `VideoId` is derived from whatever the user typed. Known platform ids
//! win (Bilibili `BV…`/`av…`, with the `p=` part suffix); anything else is
//! normalized so that trivially different spellings of one URL collapse to
//! the same key. Whether the reference actually points at a video is not
//! decided here: that is the Downloader's call.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

static BV_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(BV[a-zA-Z0-9]+)").expect("static regex"));
static AV_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bav(\d+)").expect("static regex"));
static PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]p=(\d+)").expect("static regex"));

const MAX_KEY_LEN: usize = 200;

/// Reference kinds recognized by [`VideoId::from_source_ref`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// A Bilibili id was found (`BV…` or `av…`).
    Bilibili,
    /// An http(s) URL without a known platform id.
    Url,
    /// Anything else; kept verbatim (after trimming).
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("empty video reference")]
pub struct EmptyReference;

/// Stable identifier of a video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Wrap an already-derived id (e.g. read back from storage or typed on the CLI).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id for a user-supplied reference.
    pub fn from_source_ref(source_ref: &str) -> Result<Self, EmptyReference> {
        Self::classify(source_ref).map(|(id, _)| id)
    }

    /// Derive the id and report what kind of reference it came from.
    pub fn classify(source_ref: &str) -> Result<(Self, RefKind), EmptyReference> {
        let trimmed = source_ref.trim();
        if trimmed.is_empty() {
            return Err(EmptyReference);
        }

        let platform_id = BV_ID
            .captures(trimmed)
            .map(|c| c[1].to_string())
            .or_else(|| AV_ID.captures(trimmed).map(|c| format!("av{}", &c[1])));

        if let Some(base) = platform_id {
            let id = match PART.captures(trimmed) {
                Some(c) => match c[1].parse::<u32>() {
                    Ok(part) => format!("{base}_p{part}"),
                    Err(_) => base,
                },
                None => base,
            };
            return Ok((Self(id), RefKind::Bilibili));
        }

        if let Some(url) = normalize_url(trimmed) {
            return Ok((Self(url), RefKind::Url));
        }

        Ok((Self(trimmed.to_string()), RefKind::Opaque))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe key for this id.
    ///
    /// Ids that had to be sanitized get a short digest suffix so two
    /// different ids can never share a key.
    pub fn storage_key(&self) -> String {
        let sanitized: String = self
            .0
            .chars()
            .map(|c| match c {
                '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '#' | '&' | '=' => '_',
                c if c.is_control() || c.is_whitespace() => '_',
                c => c,
            })
            .take(MAX_KEY_LEN)
            .collect();

        if sanitized == self.0 {
            return sanitized;
        }

        let digest = Sha256::digest(self.0.as_bytes());
        format!("{sanitized}-{}", &hex::encode(digest)[..10])
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lower-case scheme and host, drop the fragment and trailing slashes.
fn normalize_url(raw: &str) -> Option<String> {
    let (scheme, rest) = raw.split_once("://")?;
    let scheme = scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return None;
    }

    let rest = rest.split('#').next().unwrap_or_default();
    let (host, path) = match rest.find(['/', '?']) {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    if host.is_empty() {
        return None;
    }

    let path = path.trim_end_matches('/');
    Some(format!("{scheme}://{}{path}", host.to_ascii_lowercase()))
}
