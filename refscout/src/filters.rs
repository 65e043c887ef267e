/// File-level predicates shared by the target scanner, the candidate selector and the
/// content loader.
///
/// Extension lists come from configuration in whatever shape the user wrote them (`"py"`,
/// `".py"`, `"PY"`), so they are normalized once into an [`ExtensionSet`] and every later
/// comparison is a plain lookup:
///
/// ```rust,ignore
/// let allowed = ExtensionSet::from_config(&["py", ".MD"]);
/// assert!(allowed.matches(Path::new("docs/README.md")));
/// ```
///
/// Binary detection is two-staged. A cheap extension check rules out the obvious cases
/// before any I/O; [`looks_binary`] then inspects the leading bytes of whatever is left.
use std::collections::HashSet;
use std::path::Path;

/// Number of leading bytes inspected when sniffing for binary content
pub const BINARY_SAMPLE_SIZE: usize = 8 * 1024;

/// Below this share of printable bytes a sample is treated as binary
const MIN_PRINTABLE_RATIO: f64 = 0.7;

/// Lowercased extensions without their leading dot. An empty set admits every file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet(HashSet<String>);

impl ExtensionSet {
    pub fn from_config<S: AsRef<str>>(extensions: &[S]) -> Self {
        Self(
            extensions
                .iter()
                .map(|e| normalize_extension(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.0.contains(&normalize_extension(extension))
    }

    /// Whether `path` passes this allow-list
    pub fn matches(&self, path: &Path) -> bool {
        if self.0.is_empty() {
            return true;
        }
        path.extension()
            .map(|ext| self.contains(&ext.to_string_lossy()))
            .unwrap_or(false)
    }
}

/// `".PY"` and `"py"` both become `"py"`
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Checks if a file is likely to be binary
pub fn is_likely_binary(path: &Path) -> bool {
    // Common binary file extensions
    const BINARY_EXTENSIONS: &[&str] = &[
        "exe", "dll", "so", "dylib", "bin", "obj", "o", "a", "lib", "class", "jar", "war", "pyc",
        "pyo", "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "doc", "docx", "xls",
        "xlsx", "ppt", "pptx", "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "mp3", "mp4", "avi",
        "mov", "wav", "ttf", "otf", "woff", "woff2", "sqlite", "db",
    ];

    if let Some(ext) = path.extension() {
        if let Some(ext_str) = ext.to_str() {
            return BINARY_EXTENSIONS
                .iter()
                .any(|&bin_ext| bin_ext.eq_ignore_ascii_case(ext_str));
        }
    }
    false
}

/// Inspects the first [`BINARY_SAMPLE_SIZE`] bytes of `content`.
///
/// Any NUL byte marks the content as binary. Otherwise the share of printable bytes
/// (ASCII graphic characters and whitespace) must reach 70%. Bytes above 0x7F count as
/// printable when the sample decodes as UTF-8, allowing for a character cut off by the
/// sample boundary.
pub fn looks_binary(content: &[u8]) -> bool {
    let sample = &content[..content.len().min(BINARY_SAMPLE_SIZE)];
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }

    let utf8 = match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };

    let printable = sample
        .iter()
        .filter(|&&b| {
            b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0c) || (utf8 && b >= 0x80)
        })
        .count();

    (printable as f64) / (sample.len() as f64) < MIN_PRINTABLE_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_set_matching() {
        let extensions = ExtensionSet::from_config(&["rs", ".PY", " md "]);
        assert!(extensions.matches(Path::new("test.rs")));
        assert!(extensions.matches(Path::new("pkg/mod.py")));
        assert!(extensions.matches(Path::new("README.MD")));
        assert!(!extensions.matches(Path::new("test.txt")));
        assert!(!extensions.matches(Path::new("Makefile")));

        let any = ExtensionSet::from_config::<&str>(&[]);
        assert!(any.is_empty());
        assert!(any.matches(Path::new("Makefile")));
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(".Py"), "py");
        assert_eq!(normalize_extension("tar.gz"), "tar.gz");
        assert_eq!(normalize_extension(""), "");
    }

    #[test]
    fn test_is_likely_binary() {
        assert!(is_likely_binary(Path::new("test.exe")));
        assert!(is_likely_binary(Path::new("module.pyc")));
        assert!(is_likely_binary(Path::new("test.png")));
        assert!(is_likely_binary(Path::new("test.PDF"))); // Test case insensitivity
        assert!(!is_likely_binary(Path::new("test.rs")));
        assert!(!is_likely_binary(Path::new("test.txt")));
        assert!(!is_likely_binary(Path::new("test")));
    }

    #[test]
    fn test_looks_binary() {
        assert!(!looks_binary(b""));
        assert!(!looks_binary(b"import os\nprint('hello')\n"));
        assert!(looks_binary(b"ELF\x00\x01\x02"));

        let control_heavy: Vec<u8> = (1u8..32).cycle().take(200).collect();
        assert!(looks_binary(&control_heavy));

        let accented = "résumé naïve café ".repeat(50);
        assert!(!looks_binary(accented.as_bytes()));

        let latin1: Vec<u8> = std::iter::repeat(0xE9u8).take(100).collect();
        assert!(looks_binary(&latin1));
    }

    #[test]
    fn test_looks_binary_tolerates_split_character_at_sample_edge() {
        let mut content = vec![b'a'; BINARY_SAMPLE_SIZE - 1];
        content.extend_from_slice("é".as_bytes());
        content.extend(std::iter::repeat(0xC3u8).take(10));
        assert!(!looks_binary(&content));
    }
}
