/// Characters replaced with `_` when an entity name is used as a directory name.
pub const UNSAFE_NAME_CHARS: [char; 23] = [
    '/', '\\', ':', '\'', '"', '?', '<', '>', '*', '|', '\0', '(', ')', '[', ']', '`', ',', '!',
    '$', '&', ' ', '\t', '\n',
];

/// Makes an entity name safe for use in a directory path.
///
/// Unsafe characters become `_`, then non-ASCII characters are dropped.
pub fn clean_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|ch| if UNSAFE_NAME_CHARS.contains(&ch) { '_' } else { ch })
        .filter(char::is_ascii)
        .collect()
}
