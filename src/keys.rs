//! Object key model: pure functions that derive logical asset identity
//! (language, item id, revision) from storage paths, and the approval key
//! used to correlate a draft with its deployed counterpart.

/// Leading path segments that name a storage area rather than a language.
const AREA_SEGMENTS: [&str; 2] = ["audio", "deploy"];

/// Logical identity of a stored asset, derived from its path.
///
/// `revision` is the numeric value of a trailing `_vNNN` suffix on the file
/// stem (`cat_v002.mp3` -> 2). Absence of a suffix means "unversioned/latest"
/// and is represented as `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetKey {
    pub language: String,
    pub item_id: String,
    pub revision: Option<u32>,
    pub extension: Option<String>,
}

impl AssetKey {
    /// Reconstruct the canonical draft path for this identity.
    pub fn canonical_path(&self) -> String {
        let mut path = format!("audio/{}/{}", self.language, self.item_id);
        if let Some(rev) = self.revision {
            path.push_str(&format!("_v{:03}", rev));
        }
        if let Some(ext) = &self.extension {
            path.push('.');
            path.push_str(ext);
        }
        path
    }

    /// File name of the unversioned deployed copy (`cat.mp3` for any revision).
    pub fn deployed_file_name(&self) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{}", self.item_id, ext),
            None => self.item_id.clone(),
        }
    }
}

/// Parse a draft or deployed storage path into an [`AssetKey`].
///
/// Splits on `/`; a literal leading area segment (`audio`, `deploy`) is
/// skipped if present, the next segment is the language, and the remainder
/// (minus a trailing `_vNNN` revision suffix and the file extension) is the
/// item id. Returns `None` when no language/item pair can be derived.
pub fn parse_asset_path(path: &str) -> Option<AssetKey> {
    if !path_is_safe(path) {
        return None;
    }

    let mut segments: Vec<&str> = path.split('/').collect();
    if let Some(first) = segments.first() {
        if AREA_SEGMENTS.contains(first) {
            segments.remove(0);
        }
    }
    if segments.len() < 2 {
        return None;
    }

    let language = segments.remove(0);
    if language.is_empty() {
        return None;
    }

    let remainder = segments.join("/");
    let (stem, extension) = split_extension(&remainder);
    let (item_id, revision) = split_revision(stem);
    if item_id.is_empty() {
        return None;
    }

    Some(AssetKey {
        language: language.to_string(),
        item_id: item_id.to_string(),
        revision,
        extension: extension.map(str::to_string),
    })
}

/// Canonical approval key for a `(language, itemId)` pair.
///
/// Lowercased `language/itemId` with any revision suffix stripped from the
/// item. Returns an empty string when either input is empty, signaling
/// "uncorrelatable" to callers, who must skip the entry rather than fail.
pub fn approval_key(language: &str, item_id: &str) -> String {
    let (item, _) = split_revision(item_id);
    if language.is_empty() || item.is_empty() {
        return String::new();
    }
    format!("{}/{}", language.to_lowercase(), item.to_lowercase())
}

/// Path sanitation shared by the storage and repository layers.
///
/// Rejects traversal (`..`), backslashes, absolute paths, empty or `.`
/// segments, and control bytes. Paths failing this check must never reach a
/// storage or filesystem operation.
pub fn path_is_safe(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return false;
    }
    if path
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return false;
    }
    path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

/// Split `name.ext` into `(stem, Some(ext))`; names without a dot (or with
/// only a leading dot) come back unchanged with no extension.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => {
            (&name[..pos], Some(&name[pos + 1..]))
        }
        _ => (name, None),
    }
}

/// Split a trailing `_vNNN` (exactly three digits) revision suffix off a
/// file stem. `cat_v002` -> `("cat", Some(2))`, `cat_v02` -> unchanged.
fn split_revision(stem: &str) -> (&str, Option<u32>) {
    let bytes = stem.as_bytes();
    if bytes.len() > 5 {
        let tail = &bytes[bytes.len() - 5..];
        if tail[0] == b'_' && tail[1] == b'v' && tail[2..].iter().all(u8::is_ascii_digit) {
            // The suffix is pure ASCII, so these byte offsets sit on char
            // boundaries even for non-ASCII stems.
            let head = &stem[..stem.len() - 5];
            if let Ok(rev) = stem[stem.len() - 3..].parse::<u32>() {
                return (head, Some(rev));
            }
        }
    }
    (stem, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_versioned_draft_path() {
        let key = parse_asset_path("audio/es/cat_v002.mp3").unwrap();
        assert_eq!(key.language, "es");
        assert_eq!(key.item_id, "cat");
        assert_eq!(key.revision, Some(2));
        assert_eq!(key.extension.as_deref(), Some("mp3"));
    }

    #[test]
    fn parses_unversioned_and_deployed_paths() {
        let draft = parse_asset_path("audio/fr/dog.mp3").unwrap();
        assert_eq!(draft.revision, None);
        assert_eq!(draft.item_id, "dog");

        let deployed = parse_asset_path("deploy/fr/dog.mp3").unwrap();
        assert_eq!(deployed.language, "fr");
        assert_eq!(deployed.item_id, "dog");
    }

    #[test]
    fn parses_path_without_area_segment() {
        let key = parse_asset_path("es/cat.mp3").unwrap();
        assert_eq!(key.language, "es");
        assert_eq!(key.item_id, "cat");
    }

    #[test]
    fn nested_item_ids_keep_their_subpath() {
        let key = parse_asset_path("audio/es/animals/cat_v013.mp3").unwrap();
        assert_eq!(key.item_id, "animals/cat");
        assert_eq!(key.revision, Some(13));
    }

    #[test]
    fn canonical_path_round_trips() {
        for path in [
            "audio/es/cat_v002.mp3",
            "audio/fr/dog.mp3",
            "audio/de/wort",
            "audio/pt/animals/cat_v120.wav",
        ] {
            let key = parse_asset_path(path).unwrap();
            let again = parse_asset_path(&key.canonical_path()).unwrap();
            assert_eq!(key, again, "round-trip failed for {}", path);
        }
    }

    #[test]
    fn approval_key_is_revision_invariant() {
        let a = approval_key("ES", "word_v002");
        let b = approval_key("es", "word_v013");
        let c = approval_key("es", "word");
        assert_eq!(a, "es/word");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn approval_key_empty_inputs_signal_uncorrelatable() {
        assert_eq!(approval_key("", "word"), "");
        assert_eq!(approval_key("es", ""), "");
    }

    #[test]
    fn short_or_malformed_revision_suffixes_are_part_of_the_item() {
        let key = parse_asset_path("audio/es/cat_v02.mp3").unwrap();
        assert_eq!(key.item_id, "cat_v02");
        assert_eq!(key.revision, None);

        let key = parse_asset_path("audio/es/cat_vabc.mp3").unwrap();
        assert_eq!(key.item_id, "cat_vabc");
    }

    #[test]
    fn unsafe_paths_are_rejected() {
        for path in [
            "",
            "/audio/es/cat.mp3",
            "audio/../deploy/es/cat.mp3",
            "audio//es/cat.mp3",
            "audio\\es\\cat.mp3",
            "audio/es/./cat.mp3",
            "audio/es/cat.mp3/",
            "audio/es/cat\0.mp3",
        ] {
            assert!(!path_is_safe(path), "expected unsafe: {:?}", path);
            assert!(parse_asset_path(path).is_none());
        }
        assert!(path_is_safe("audio/es/cat.mp3"));
    }
}
