//! Static allow-list of file suffixes used by the `--fzip`, `--fcpy` and `--fmv` filters
//!
//! Suffixes are stored lowercase and dot-prefixed. Matching is case-insensitive: `photo.JPG`
//! qualifies because `.jpg` is on the list. Files without an extension never qualify.

use std::collections::HashSet;
use std::path::Path;

/// Suffixes accepted by the default allow-list.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    // text & documents
    ".txt", ".csv", ".tsv", ".md", ".rtf", ".pdf", ".doc", ".docx", ".odt", ".xls", ".xlsx",
    ".ods", ".ppt", ".pptx", ".odp",
    // configuration
    ".json", ".yaml", ".yml", ".ini", ".toml", ".conf", ".cfg", ".env",
    // images
    ".png", ".jpg", ".jpeg", ".svg", ".gif", ".bmp", ".tiff", ".webp", ".ico",
    // audio
    ".mp3", ".wav", ".flac", ".ogg", ".aac", ".m4a", ".wma", ".amr",
    // video
    ".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".mpg", ".mpeg",
    // archives
    ".zip", ".tar", ".gz", ".bz2", ".xz", ".7z", ".rar",
    // fonts
    ".ttf", ".otf", ".woff", ".woff2",
    // xml
    ".xml", ".xsd", ".dtd",
    // web
    ".html", ".htm", ".css",
    // python
    ".py", ".pyi", ".pyx", ".pxd", ".pxi",
    // c / c++
    ".c", ".h", ".cpp", ".hpp", ".cc", ".hh", ".cxx", ".hxx",
    // javascript / typescript
    ".js", ".mjs", ".cjs", ".ts", ".tsx", ".jsx", ".vue", ".svelte", ".astro",
    // c# / .net
    ".cs", ".csx", ".cshtml",
    // other languages
    ".java", ".kt", ".kts", ".go", ".rs", ".swift", ".rb", ".php", ".phtml",
    // shell / script
    ".sh", ".bash", ".zsh", ".bat", ".cmd", ".ps1", ".psm1", ".psd1",
    // data formats
    ".sql", ".db", ".sqlite", ".geojson", ".parquet", ".avro",
];

/// Set of permitted file suffixes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    suffixes: HashSet<String>,
}

impl AllowList {
    /// Build an allow-list from arbitrary suffixes, normalizing them to lowercase with a leading dot.
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let suffixes = suffixes
            .into_iter()
            .map(|suffix| {
                let suffix = suffix.as_ref().to_lowercase();
                if suffix.starts_with('.') {
                    suffix
                } else {
                    format!(".{suffix}")
                }
            })
            .collect();
        Self { suffixes }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    /// Check whether the file name of `path` carries an allowed suffix.
    #[must_use]
    pub fn allows(&self, path: &Path) -> bool {
        match suffix_of(path) {
            Some(suffix) => self.suffixes.contains(&suffix),
            None => false,
        }
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

/// Lowercase, dot-prefixed final extension of `path`, if any.
///
/// Hidden files without a further extension (e.g. `.env`) have no suffix, matching how
/// extensions are usually defined for file names.
#[must_use]
pub fn suffix_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

/// `true` when the file qualifies under an optional allow-list: no list (or an empty one)
/// admits every file.
#[must_use]
pub fn qualifies(allow_list: Option<&AllowList>, path: &Path) -> bool {
    match allow_list {
        Some(list) if !list.is_empty() => list.allows(path),
        _ => true,
    }
}
