use regex::Regex;
use std::sync::LazyLock;

use crate::model::PendingAttachment;

static ATTACH_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@attach#(\d+)").expect("attach ref pattern"));

/// Rewrite user-typed `@attach#<id>` markers into the `@attached_file#<id>`
/// form the backend expands.
pub fn rewrite_attachment_refs(text: &str) -> String {
    ATTACH_REF_RE
        .replace_all(text, "@attached_file#$1")
        .into_owned()
}

/// Final text of an outgoing message, or `None` when there is nothing to
/// send (blank text and no pending attachment).
pub fn compose_outgoing(text: &str, pending: Option<&PendingAttachment>) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() && pending.is_none() {
        return None;
    }
    let mut message = rewrite_attachment_refs(trimmed);
    if let Some(attachment) = pending {
        message.push_str(&format!(" @attached_file#{}", attachment.file_id));
    }
    Some(message.trim_start().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(id: i64) -> PendingAttachment {
        PendingAttachment {
            file_id: id,
            file_name: format!("file-{id}"),
        }
    }

    #[test]
    fn rewrites_every_attach_marker() {
        assert_eq!(
            rewrite_attachment_refs("see @attach#12 and @attach#3"),
            "see @attached_file#12 and @attached_file#3"
        );
        assert_eq!(rewrite_attachment_refs("@attach#x stays"), "@attach#x stays");
    }

    #[test]
    fn blank_message_without_attachment_is_not_sent() {
        assert_eq!(compose_outgoing("   \n", None), None);
    }

    #[test]
    fn pending_attachment_is_appended() {
        assert_eq!(
            compose_outgoing(" hello ", Some(&pending(7))).as_deref(),
            Some("hello @attached_file#7")
        );
        assert_eq!(
            compose_outgoing("", Some(&pending(7))).as_deref(),
            Some("@attached_file#7")
        );
    }
}
