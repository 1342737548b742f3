use anyhow::Error;

use crate::{
    core::{
        types::{
            Dictionary,
            Value,
        },
        uri::Uri,
    },
    message::message::{
        ErrorMessage,
        Message,
    },
};

/// Builds the ERROR reply for a request that failed.
pub fn error_for_request(message: &Message, error: &Error) -> Message {
    Message::Error(ErrorMessage {
        request_type: message.tag(),
        request: message.request_id().unwrap_or_default(),
        details: Dictionary::from_iter([("message".to_owned(), Value::String(error.to_string()))]),
        error: Uri::for_error(error),
        ..Default::default()
    })
}
