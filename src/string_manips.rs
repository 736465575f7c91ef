//! Small string helpers used for naming archive members. Ported from
//! `varc_core.utils.string_manips`.

/// Strips everything that isn't a word character. Used for the machine name
/// that prefixes the output archive's filename.
pub fn remove_special_characters(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect()
}

/// Sanitizes a process name for use in an archive member name: only
/// `[A-Za-z0-9_]` survives. Idempotent by construction.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Strips a Windows drive prefix (`C:\foo\bar` -> `foo\bar`, `C:/foo` ->
/// `foo`) and a single following separator. Paths with no drive letter pass
/// through unchanged, aside from a single leading separator being stripped.
pub fn strip_drive(path: &str) -> String {
    let without_drive = match path.split_once(':') {
        Some((prefix, rest)) if prefix.len() == 1 && prefix.chars().next().unwrap().is_ascii_alphabetic() => rest,
        _ => path,
    };
    without_drive
        .strip_prefix('\\')
        .or_else(|| without_drive.strip_prefix('/'))
        .unwrap_or(without_drive)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_idempotent_on_arbitrary_strings() {
        for s in ["abc", "a b/c.exe", "日本語.exe", "", "___", "a-b-c"] {
            let once = sanitize(s);
            let twice = sanitize(&once);
            assert_eq!(once, twice);
            assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
    }

    #[test]
    fn strip_drive_removes_windows_prefix() {
        assert_eq!(strip_drive("C:\\foo\\bar"), "foo\\bar");
        assert_eq!(strip_drive("D:/foo/bar"), "foo/bar");
    }

    #[test]
    fn strip_drive_passes_through_unprefixed_paths() {
        assert_eq!(strip_drive("/foo/bar"), "foo/bar");
        assert_eq!(strip_drive("relative/path"), "relative/path");
    }

    #[test]
    fn remove_special_characters_keeps_word_chars_only() {
        assert_eq!(remove_special_characters("my-host.local!"), "myhostlocal");
    }
}
