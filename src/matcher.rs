//! Reply detection by token.

use crate::mail::InboxMessage;

/// Decides whether an inbox message answers the request carrying `token`.
pub trait ReplyMatcher {
    fn matches(&self, token: &str, message: &InboxMessage) -> bool;
}

/// Case-sensitive substring search over subject and body.
///
/// Substring semantics are deliberate: `TOK123` also matches text containing
/// `TOK1234`. Generated tokens end in a fixed-length random suffix, so a
/// real token is never a prefix of another.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSubstringMatcher;

impl ReplyMatcher for TokenSubstringMatcher {
    fn matches(&self, token: &str, message: &InboxMessage) -> bool {
        let token = token.trim();
        if token.is_empty() {
            return false;
        }
        message.subject.contains(token) || message.body.contains(token)
    }
}
