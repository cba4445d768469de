use crate::{ChatId, ChatRecord, Post, PostAction, PostId, Quote, StatusIndicator};

/// Created post authored by user 1 ("tester").
pub fn post(id: PostId, chat_id: ChatId, message: &str) -> Post {
    Post {
        id,
        chat_id,
        user_id: 1,
        user_name: "tester".to_string(),
        message: message.to_string(),
        timestamp: 1_721_000_000.0 + id as f64,
        action: PostAction::Create,
        attachments: Vec::new(),
    }
}

/// Post authored by a specific user.
pub fn post_by(id: PostId, chat_id: ChatId, user_id: i64, message: &str) -> Post {
    Post {
        user_id,
        user_name: format!("user-{user_id}"),
        ..post(id, chat_id, message)
    }
}

/// Delete entry as the server sends it.
pub fn deleted(id: PostId) -> Post {
    Post {
        id,
        chat_id: 0,
        user_id: 0,
        user_name: String::new(),
        message: String::new(),
        timestamp: 0.0,
        action: PostAction::Delete,
        attachments: Vec::new(),
    }
}

pub fn quote(id: i64, message: &str) -> Quote {
    Quote {
        id,
        message: message.to_string(),
        user_name: "tester".to_string(),
        timestamp: 1_721_000_000.0,
    }
}

/// Listed chat described as "chat <id>".
pub fn chat_record(chat_id: ChatId, parent_msg_id: Option<PostId>) -> ChatRecord {
    ChatRecord {
        chat_id,
        description: format!("chat {chat_id}"),
        parent_msg_id,
        active: true,
    }
}

pub fn busy(actor: &str, elapsed_secs: f64) -> StatusIndicator {
    StatusIndicator::busy(Some(actor.to_string()), elapsed_secs)
}
