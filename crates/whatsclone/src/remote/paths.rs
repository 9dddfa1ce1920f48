//! Remote path layout.

use super::{RemoteError, RemoteResult};

pub const CONNECTION_STATUS: &str = "connection/status";
pub const CONNECTION_QR: &str = "connection/qr_code";
pub const SEND_COMMANDS: &str = "commands/send_message";
pub const MARK_READ_COMMANDS: &str = "commands/mark_read";

/// Characters a single key may not contain.
const FORBIDDEN: &[char] = &['.', '#', '$', '[', ']', '/'];

/// Encode an arbitrary id into a usable key.
///
/// `.` becomes `,` (keeps phone-style addresses readable); the other
/// forbidden characters, `%`, `,` and control characters are percent-encoded.
pub fn encode_key(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '.' => out.push(','),
            c if FORBIDDEN.contains(&c) || c == '%' || c == ',' || c.is_control() => {
                let mut buf = [0u8; 4];
                out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
            }
            c => out.push(c),
        }
    }
    out
}

/// Reverse of [`encode_key`].
pub fn decode_key(key: &str) -> String {
    let restored = key.replace(',', ".");
    urlencoding::decode(&restored)
        .map(|s| s.into_owned())
        .unwrap_or(restored)
}

pub fn conversation_info(conversation_id: &str) -> String {
    format!("conversations/{}/info", encode_key(conversation_id))
}

pub fn conversation_messages(conversation_id: &str) -> String {
    format!("conversations/{}/messages", encode_key(conversation_id))
}

pub fn conversation_message(conversation_id: &str, key: &str) -> String {
    format!("{}/{}", conversation_messages(conversation_id), key)
}

pub fn child(parent: &str, key: &str) -> String {
    format!("{parent}/{key}")
}

/// Check that `path` is a non-empty sequence of valid keys.
pub fn validate(path: &str) -> RemoteResult<()> {
    if path.is_empty() {
        return Err(RemoteError::InvalidPath("empty path".to_string()));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment.contains(|c: char| FORBIDDEN.contains(&c) || c.is_control())
        {
            return Err(RemoteError::InvalidPath(path.to_string()));
        }
    }
    Ok(())
}

/// Split a path into its segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
