//! Filename handling for client-supplied names.
//!
//! Client filenames are never used as paths. The sanitized name is kept for
//! display and the extension feeds the stored artifact name, which is always
//! derived from the session id.

const MAX_NAME_BYTES: usize = 255;
const MAX_EXTENSION_LEN: usize = 10;

/// Strip path components, drive markers, control and reserved characters,
/// and leading dots from `raw`.
///
/// Returns `None` when nothing usable remains.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    // last path component, whichever separator the client used
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);

    // `C:clip.mp4` style drive-relative names
    let base = match base.split_once(':') {
        Some((drive, rest)) if drive.len() == 1 && drive.chars().all(|c| c.is_ascii_alphabetic()) => rest,
        _ => base,
    };

    // tabs and newlines separate words; other control characters vanish
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_start_matches('.').trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(truncate_utf8(trimmed, MAX_NAME_BYTES).to_string())
}

/// Lower-cased alphanumeric extension of a sanitized name, if it has one.
pub fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Storage name of the assembled artifact: `{id}.{ext}` or just `{id}`.
pub fn final_name(id: &str, sanitized: &str) -> String {
    match extension(sanitized) {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}

/// Reject names that could escape a storage root when joined onto it.
pub fn is_safe_storage_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_BYTES
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(
            sanitize_filename("C:\\Users\\me\\clip.mov").as_deref(),
            Some("clip.mov")
        );
        assert_eq!(sanitize_filename("D:clip.mov").as_deref(), Some("clip.mov"));
    }

    #[test]
    fn test_strips_leading_dots_and_reserved_chars() {
        assert_eq!(sanitize_filename("...hidden.mp4").as_deref(), Some("hidden.mp4"));
        assert_eq!(sanitize_filename("a<b>c|d?.mp4").as_deref(), Some("abcd.mp4"));
        assert_eq!(sanitize_filename("my   summer\tclip.mp4").as_deref(), Some("my summer clip.mp4"));
        assert_eq!(sanitize_filename("two\nlines.mp4").as_deref(), Some("two lines.mp4"));
        assert_eq!(sanitize_filename("bell\u{7}.mp4").as_deref(), Some("bell.mp4"));
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("../.."), None);
        assert_eq!(sanitize_filename("///"), None);
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let out = sanitize_filename(&long).unwrap();
        assert!(out.len() <= 255);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_extension_and_final_name() {
        assert_eq!(extension("clip.MP4").as_deref(), Some("mp4"));
        assert_eq!(extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension("noext"), None);
        assert_eq!(extension("weird.m p4"), None);
        assert_eq!(final_name("abc", "clip.MOV"), "abc.mov");
        assert_eq!(final_name("abc", "clip"), "abc");
    }

    #[test]
    fn test_safe_storage_name() {
        assert!(is_safe_storage_name("AbC-_12.mp4"));
        assert!(!is_safe_storage_name("../x"));
        assert!(!is_safe_storage_name(".x"));
        assert!(!is_safe_storage_name("a/b"));
        assert!(!is_safe_storage_name(""));
    }
}
