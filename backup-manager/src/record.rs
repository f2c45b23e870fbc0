//! Records persisted by the dispatcher, and the keys they live under.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Key holding the list of registered provider names.
pub const PROVIDERS_KEY: &str = "meta:providers";

/// Marks a path stored as base64 of its raw OS bytes.
const ENCODED_PATH_PREFIX: &str = "b64:";

/// Key of the [`FileRecord`] for one provider and path.
pub fn file_record_key(provider: &str, path: &Path) -> String {
    format!("{provider}:{}", encode_path(path))
}

/// Key of a provider's [`ProviderMetaInfo`].
pub fn meta_info_key(provider: &str) -> String {
    format!("meta:{provider}")
}

/// Text form of `path` that [`decode_path`] turns back into the same path.
///
/// UTF-8 paths stay readable. Any other path, or one that already starts
/// with the `b64:` marker, is stored as the marker plus base64 of its bytes.
pub fn encode_path(path: &Path) -> String {
    match path.to_str() {
        Some(text) if !text.starts_with(ENCODED_PATH_PREFIX) => text.to_string(),
        _ => format!("{ENCODED_PATH_PREFIX}{}", STANDARD.encode(path_bytes(path))),
    }
}

/// Inverse of [`encode_path`]. `None` if the base64 payload is malformed.
pub fn decode_path(text: &str) -> Option<PathBuf> {
    match text.strip_prefix(ENCODED_PATH_PREFIX) {
        Some(encoded) => STANDARD.decode(encoded).ok().map(path_from_bytes),
        None => Some(PathBuf::from(text)),
    }
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

// Off unix only unpaired surrogates are not representable; they are replaced.
#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

/// Serde adapters storing paths through [`encode_path`].
mod path_text {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{decode_path, encode_path};

    fn decode<E: serde::de::Error>(text: &str) -> Result<PathBuf, E> {
        decode_path(text).ok_or_else(|| E::custom(format!("invalid encoded path: {text}")))
    }

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_path(path))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        decode(&String::deserialize(deserializer)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            path: &Option<PathBuf>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match path {
                Some(path) => serializer.serialize_some(&encode_path(path)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<PathBuf>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|text| decode(&text))
                .transpose()
        }
    }

    pub mod keys {
        use super::*;

        pub fn serialize<S: Serializer, V: serde::Serialize>(
            map: &BTreeMap<PathBuf, V>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            serializer.collect_map(map.iter().map(|(path, value)| (encode_path(path), value)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>, V: Deserialize<'de>>(
            deserializer: D,
        ) -> Result<BTreeMap<PathBuf, V>, D::Error> {
            BTreeMap::<String, V>::deserialize(deserializer)?
                .into_iter()
                .map(|(text, value)| decode::<D::Error>(&text).map(|path| (path, value)))
                .collect()
        }
    }
}

/// Last known backed-up state of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Watch root the file was attributed to.
    #[serde(default, with = "path_text::option")]
    pub root: Option<PathBuf>,

    /// Path of the file.
    #[serde(with = "path_text")]
    pub path: PathBuf,

    /// Size at the last successful backup.
    pub size: u64,

    /// Checksum of the content last uploaded, per provider.
    ///
    /// A missing entry means the provider has never backed the file up.
    pub checksums: BTreeMap<String, String>,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Checksum last uploaded to `provider`, if any.
    pub fn checksum_for(&self, provider: &str) -> Option<&str> {
        self.checksums.get(provider).map(String::as_str)
    }
}

/// Aggregate backup volume of a provider, per watch root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetaInfo {
    pub name: String,

    /// Cumulative bytes successfully backed up under each root.
    #[serde(with = "path_text::keys")]
    pub directories: BTreeMap<PathBuf, u64>,
}

impl ProviderMetaInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directories: BTreeMap::new(),
        }
    }

    /// Add `size` bytes to `root`, creating the entry at zero if needed.
    pub fn add_size(&mut self, root: &Path, size: u64) {
        let total = self.directories.entry(root.to_path_buf()).or_insert(0);
        *total = total.saturating_add(size);
    }

    /// Total bytes recorded under `root`.
    pub fn size_of(&self, root: &Path) -> Option<u64> {
        self.directories.get(root).copied()
    }
}
