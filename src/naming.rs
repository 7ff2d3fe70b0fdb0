//! Output naming
//!
//! Turns playpaths and URLs captured off the wire into filesystem-safe
//! names and downloader-ready URLs: query stripping, the `[[DYNAMIC]]` /
//! `[[IMPORT]]` sentinel tokens, duplicate suffixes, and the local-time
//! prefix stamped onto every output file.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;

/// Names at or beyond this length are replaced with a generated leaf
const MAX_LEAF_LEN: usize = 128;

/// Strip query parameters and resolve sentinel tokens.
///
/// Used on `tcUrl`/`swfUrl` before they go onto a downloader command line:
/// - everything from the first `?` on is dropped;
/// - `[[DYNAMIC]]` truncates the value just before the token;
/// - `[[IMPORT]]` replaces everything through the token with `http://`.
pub fn strip_params(src: &str) -> String {
    let mut s = match src.find('?') {
        Some(idx) => src[..idx].to_string(),
        None => src.to_string(),
    };

    if let Some(idx) = s.find("[[DYNAMIC]]") {
        s.truncate(idx.saturating_sub(1));
    }

    if let Some(idx) = s.find("[[IMPORT]]") {
        let tail_start = (idx + "[[IMPORT]]".len() + 1).min(s.len());
        s = format!("http://{}", &s[tail_start..]);
    }

    s
}

/// Reduce a playpath to its leaf: drop the query, drop everything up to the
/// last `/`, drop a single leading `.`.
pub fn strip_playpath(playpath: &str) -> &str {
    let mut p = playpath;

    // A query mark at offset 0 is itself stripped; otherwise it truncates
    if let Some(idx) = p.find('?') {
        if idx == 0 {
            p = &p[1..];
        } else {
            p = &p[..idx];
        }
    }

    if let Some(idx) = p.rfind('/') {
        p = &p[idx + 1..];
    }

    p.strip_prefix('.').unwrap_or(p)
}

/// Build the final leaf name from a stripped playpath and the number of
/// earlier plays that produced the same stripped path.
pub fn sanitize_leaf(stripped: &str, dup_count: usize) -> String {
    let mut leaf = stripped.to_string();
    if dup_count > 0 {
        // Hex keeps the suffix two characters wide for up to 255 dups
        leaf.push_str(&format!("{:02x}", dup_count));
    }

    if leaf.len() < MAX_LEAF_LEN {
        let has_dot_ext = leaf.len() >= 4 && leaf.as_bytes()[leaf.len() - 4] == b'.';
        if has_dot_ext {
            if !leaf.ends_with(".flv") {
                // Always use the flv extension, regardless of original
                leaf.truncate(leaf.len() - 4);
                leaf.push_str(".flv");
            }
        } else {
            leaf.push_str(".flv");
        }

        leaf = leaf
            .chars()
            .map(|c| match c {
                ':' | '&' | '^' | '|' => '_',
                other => other,
            })
            .collect();
    } else {
        leaf = format!("v{}.flv", random_suffix());
    }

    leaf
}

/// Prefix a leaf with the local-time stamp used on every output file
pub fn timestamped(leaf: &str) -> String {
    format!("{}{}", Local::now().format("%Y-%m-%d_%H-%M-%S_"), leaf)
}

/// Tracks stripped playpaths already issued on a session, so repeated plays
/// of the same path get distinct file names.
#[derive(Debug, Default)]
pub struct NameHistory {
    issued: Vec<String>,
}

impl NameHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the unique leaf for a playpath and record it
    pub fn leaf_for(&mut self, playpath: &str) -> String {
        let stripped = strip_playpath(playpath).to_string();
        let count = self.issued.iter().filter(|p| **p == stripped).count();
        self.issued.push(stripped.clone());
        sanitize_leaf(&stripped, count)
    }
}

/// Six alphanumeric characters from a time-seeded LCG; uniqueness per
/// process start is all the generated leaf needs.
fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
        | 1;

    (0..6)
        .map(|_| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ALPHABET[(seed >> 33) as usize % ALPHABET.len()] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_params_query() {
        assert_eq!(strip_params("rtmp://host/app?auth=abc"), "rtmp://host/app");
        assert_eq!(strip_params("rtmp://host/app"), "rtmp://host/app");
    }

    #[test]
    fn test_strip_params_dynamic() {
        // The token and the separator before it are removed
        assert_eq!(strip_params("http://cdn/x.swf/[[DYNAMIC]]/123"), "http://cdn/x.swf");
        assert_eq!(strip_params("[[DYNAMIC]]rest"), "");
    }

    #[test]
    fn test_strip_params_import() {
        assert_eq!(
            strip_params("mp4:foo/[[IMPORT]]/media.example/clip.mp4"),
            "http://media.example/clip.mp4"
        );
    }

    #[test]
    fn test_strip_params_query_before_tokens() {
        assert_eq!(
            strip_params("mp4:foo/[[IMPORT]]/media.example/clip.mp4?token=1"),
            "http://media.example/clip.mp4"
        );
    }

    #[test]
    fn test_strip_playpath_basic() {
        assert_eq!(strip_playpath("stream01"), "stream01");
        assert_eq!(strip_playpath("dir/sub/stream01"), "stream01");
    }

    #[test]
    fn test_strip_playpath_query() {
        assert_eq!(strip_playpath("stream01?token=x"), "stream01");
    }

    #[test]
    fn test_strip_playpath_leading_query_mark() {
        // A '?' at offset 0 is dropped and the remainder is the name
        assert_eq!(strip_playpath("?stream01"), "stream01");
    }

    #[test]
    fn test_strip_playpath_leading_dot() {
        assert_eq!(strip_playpath(".hidden"), "hidden");
        // Only a single leading dot is dropped
        assert_eq!(strip_playpath("..double"), ".double");
    }

    #[test]
    fn test_sanitize_appends_flv() {
        assert_eq!(sanitize_leaf("stream01", 0), "stream01.flv");
    }

    #[test]
    fn test_sanitize_replaces_extension() {
        assert_eq!(sanitize_leaf("movie.mp4", 0), "movie.flv");
        assert_eq!(sanitize_leaf("movie.flv", 0), "movie.flv");
    }

    #[test]
    fn test_sanitize_short_name() {
        assert_eq!(sanitize_leaf("x", 0), "x.flv");
    }

    #[test]
    fn test_sanitize_dup_counter() {
        assert_eq!(sanitize_leaf("x", 1), "x01.flv");
        assert_eq!(sanitize_leaf("x", 255), "xff.flv");
    }

    #[test]
    fn test_sanitize_invalid_characters() {
        assert_eq!(sanitize_leaf("a:b&c^d|e", 0), "a_b_c_d_e.flv");
    }

    #[test]
    fn test_sanitize_long_name_generated() {
        let long = "x".repeat(200);
        let leaf = sanitize_leaf(&long, 0);
        assert!(leaf.starts_with('v'));
        assert!(leaf.ends_with(".flv"));
        assert_eq!(leaf.len(), 1 + 6 + 4);
    }

    #[test]
    fn test_name_history_dedup() {
        let mut history = NameHistory::new();
        assert_eq!(history.leaf_for("x"), "x.flv");
        assert_eq!(history.leaf_for("x"), "x01.flv");
        assert_eq!(history.leaf_for("x"), "x02.flv");
        assert_eq!(history.leaf_for("y"), "y.flv");
    }

    #[test]
    fn test_name_history_same_leaf_different_dirs() {
        // Dedup keys on the stripped path, so two dirs with the same leaf
        // still collide into the counter
        let mut history = NameHistory::new();
        assert_eq!(history.leaf_for("a/stream"), "stream.flv");
        assert_eq!(history.leaf_for("b/stream"), "stream01.flv");
    }

    #[test]
    fn test_name_history_idempotent_per_path() {
        let mut a = NameHistory::new();
        let mut b = NameHistory::new();
        assert_eq!(a.leaf_for("some/path.mp4"), b.leaf_for("some/path.mp4"));
    }

    #[test]
    fn test_timestamped_shape() {
        let name = timestamped("stream01.flv");
        // YYYY-MM-DD_HH-MM-SS_ prefix is 20 characters
        assert_eq!(name.len(), 20 + "stream01.flv".len());
        assert!(name.ends_with("_stream01.flv"));
        assert_eq!(&name[4..5], "-");
        assert_eq!(&name[10..11], "_");
    }
}
