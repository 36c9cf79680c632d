//! Splitting store paths into a container, a key within it, and the suffix that identified it.
use std::path::{MAIN_SEPARATOR, PathBuf};

use serde::{Deserialize, Serialize};

/// A path split at the first segment carrying a recognized suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorePath {
    /// Everything up to and including the suffixed segment.
    pub container: String,
    /// The remaining segments, joined with the separator of the input. Empty at the container root.
    pub inner_key: String,
    /// The suffix that matched.
    pub suffix: String,
    separator: char,
}

impl StorePath {
    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn is_url(&self) -> bool {
        self.container.contains("://")
    }

    /// Reassemble the original path.
    pub fn full_path(&self) -> String {
        if self.inner_key.is_empty() {
            self.container.clone()
        } else {
            format!("{}{}{}", self.container, self.separator, self.inner_key)
        }
    }

    /// A path to `key` below this one.
    pub fn join(&self, key: &str) -> StorePath {
        let key = key.trim_matches(|c| c == '/' || c == self.separator);
        let inner_key = match (self.inner_key.is_empty(), key.is_empty()) {
            (_, true) => self.inner_key.clone(),
            (true, false) => key.to_string(),
            (false, false) => format!("{}{}{}", self.inner_key, self.separator, key),
        };
        StorePath {
            inner_key,
            ..self.clone()
        }
    }

    /// The key in `/`-separated store form, without leading or trailing separators.
    pub fn store_key(&self) -> String {
        self.inner_key
            .split(['/', self.separator])
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// The container as a local filesystem path.
    ///
    /// `file://` URLs are accepted; any other scheme is not.
    pub fn local_container(&self) -> crate::Result<PathBuf> {
        match self.container.split_once("://") {
            None => Ok(PathBuf::from(&self.container)),
            Some(("file", _)) => Ok(PathBuf::from(strip_file_scheme(&self.container))),
            Some((scheme, _)) => Err(crate::Error::Unsupported(format!(
                "{scheme}:// stores are not supported: {}",
                self.container
            ))),
        }
    }

    pub fn into_tuple(self) -> (String, String, String) {
        (self.container, self.inner_key, self.suffix)
    }
}

/// Map a `file://` URL to a plain path; leave everything else alone.
pub fn strip_file_scheme(path: &str) -> &str {
    path.strip_prefix("file://").unwrap_or(path)
}

fn is_separator(c: char, url: bool) -> bool {
    if url {
        c == '/'
    } else {
        c == MAIN_SEPARATOR || c == '/'
    }
}

/// Split `path` at the first segment ending in one of `suffixes`.
///
/// URLs (`scheme://...`) are split on `/`, native paths on the platform separator.
pub fn split_by_suffix<S: AsRef<str>>(path: &str, suffixes: &[S]) -> crate::Result<StorePath> {
    let (scheme_len, url) = match path.find("://") {
        Some(idx) => (idx + 3, true),
        None => (0, false),
    };
    let separator = if url { '/' } else { MAIN_SEPARATOR };
    let body = &path[scheme_len..];

    let mut seg_start = 0;
    let mut boundaries: Vec<(usize, usize)> = Vec::new();
    for (idx, c) in body.char_indices() {
        if is_separator(c, url) {
            boundaries.push((seg_start, idx));
            seg_start = idx + c.len_utf8();
        }
    }
    boundaries.push((seg_start, body.len()));

    for (start, end) in boundaries {
        let segment = &body[start..end];
        if segment.is_empty() {
            continue;
        }
        let Some(suffix) = suffixes
            .iter()
            .map(AsRef::as_ref)
            .find(|s| segment.ends_with(*s))
        else {
            continue;
        };
        let container = path[..scheme_len + end].to_string();
        let inner_key = body[end..]
            .split(|c| is_separator(c, url))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(&separator.to_string());
        return Ok(StorePath {
            container,
            inner_key,
            suffix: suffix.to_string(),
            separator,
        });
    }
    Err(crate::Error::MalformedPath {
        path: path.to_string(),
    })
}
