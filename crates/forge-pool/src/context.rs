use forge_types::{ChatMessage, Role};
use sha1::{Digest, Sha1};

/// Opaque summary of the conversational state already baked into an
/// instance's runtime (§4.3). Chat instances carry a digest; text
/// completion instances carry the literal text, since the matching rule
/// for text is a prefix comparison rather than equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextIdentity {
    Digest(String),
    Literal(String),
}

/// SHA1 over the ordered, role-prefixed, text-flattened concatenation of
/// `messages`, excluding non-leading system messages and tool messages,
/// with empty-content messages dropped. `drop_last_user_message` removes
/// the trailing user turn first — used when matching an *incoming*
/// request against an instance's already-ingested prefix.
pub fn chat_digest(messages: &[ChatMessage], drop_last_user_message: bool) -> ContextIdentity {
    let mut messages = messages.to_vec();
    if drop_last_user_message {
        if let Some(last) = messages.last() {
            if last.role == Role::User {
                messages.pop();
            }
        }
    }

    let mut flattened = String::new();
    for (i, m) in messages.iter().enumerate() {
        if m.content.is_empty() {
            continue;
        }
        if i > 0 && m.role == Role::System {
            continue;
        }
        if m.role == Role::Tool {
            continue;
        }
        flattened.push_str(role_prefix(m.role));
        flattened.push_str(&m.content);
        flattened.push('\n');
    }

    let mut hasher = Sha1::new();
    hasher.update(flattened.as_bytes());
    ContextIdentity::Digest(hex(&hasher.finalize()))
}

/// The stored identity for a text-completion instance, computed after a
/// successful run: the literal `prompt + generatedText`, stored verbatim.
pub fn text_identity(prompt: &str, generated_text: &str) -> ContextIdentity {
    ContextIdentity::Literal(format!("{prompt}{generated_text}"))
}

/// Pool matching rule (§4.4 step 2): does `identity` satisfy an incoming
/// chat request whose digest is `request_digest`?
pub fn chat_matches(identity: &ContextIdentity, request_digest: &ContextIdentity) -> bool {
    identity == request_digest
}

/// Pool matching rule for text completion: the stored identity is a
/// non-empty prefix of the incoming prompt.
pub fn text_matches(identity: &ContextIdentity, incoming_prompt: &str) -> bool {
    match identity {
        ContextIdentity::Literal(stored) => {
            !stored.is_empty() && incoming_prompt.starts_with(stored.as_str())
        }
        ContextIdentity::Digest(_) => false,
    }
}

fn role_prefix(role: Role) -> &'static str {
    match role {
        Role::System => "system: ",
        Role::User => "user: ",
        Role::Assistant => "assistant: ",
        Role::Tool => "tool: ",
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
