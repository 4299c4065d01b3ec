//! Chat line parsing for the game server's log format.
//!
//! Relevant lines look like
//! `[Chat::Global]['Zoe' (UserId=steam_765, IP=10.0.0.8)]: hello`, with
//! `Local` and `Guild` channels relayed as well.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static CHAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[Chat::(?:Global|Local|Guild)\]\['([^']+)'.*\]: (.*)").expect("valid chat regex")
});

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\[Chat::(?:Global|Local|Guild)\]\['([^']+)'\s*\(UserId=([^,]+),.*\]:\s*[!/]link\s+([A-Z0-9]+)",
    )
    .expect("valid link regex")
});

/// A chat message pulled from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub speaker: String,
    pub text: String,
}

/// A player asking to link their game account (`!link CODE`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRequest {
    pub player_name: String,
    pub user_id: String,
    /// Always upper case.
    pub code: String,
}

/// Messages and link requests found in one batch of log lines.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChatBatch {
    pub messages: Vec<ChatMessage>,
    pub links: Vec<LinkRequest>,
}

impl ChatBatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.links.is_empty()
    }
}

/// Extract `(speaker, message)` from a chat line.
pub fn parse_chat_line(line: &str) -> Option<ChatMessage> {
    let caps = CHAT_RE.captures(line)?;
    Some(ChatMessage {
        speaker: caps[1].to_string(),
        text: caps[2].to_string(),
    })
}

/// Extract a link request from a chat line.
pub fn parse_link_request(line: &str) -> Option<LinkRequest> {
    let caps = LINK_RE.captures(line)?;
    Some(LinkRequest {
        player_name: caps[1].to_string(),
        user_id: caps[2].trim().to_string(),
        code: caps[3].to_uppercase(),
    })
}

/// Turns raw log lines into relayable chat, dropping blocked messages.
#[derive(Debug, Clone)]
pub struct ChatFilter {
    blocked: Vec<String>,
}

impl ChatFilter {
    pub fn new(blocked: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            blocked: blocked
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_blocked(&self, text: &str) -> bool {
        self.blocked.iter().any(|p| text.contains(p.as_str()))
    }

    /// Chat message for `line`, unless it is not chat or is blocked.
    pub fn relayable(&self, line: &str) -> Option<ChatMessage> {
        parse_chat_line(line).filter(|m| !self.is_blocked(&m.text))
    }

    /// Link requests are collected even when the block list hides the line
    /// from the relay.
    pub fn extract<S: AsRef<str>>(&self, lines: &[S]) -> ChatBatch {
        let mut batch = ChatBatch::default();
        for line in lines {
            let line = line.as_ref();
            if let Some(link) = parse_link_request(line) {
                batch.links.push(link);
            }
            if let Some(msg) = self.relayable(line) {
                batch.messages.push(msg);
            }
        }
        batch
    }
}

impl Default for ChatFilter {
    fn default() -> Self {
        Self::new(["/adminpassword", "/creativemenu", "/", "!"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str =
        "[2024.06.01-12.00.01][info] [Chat::Global]['Zoe' (UserId=steam_765, IP=10.0.0.8)]: hello there";

    #[test]
    fn parses_global_chat() {
        let msg = parse_chat_line(HELLO).unwrap();
        assert_eq!(msg.speaker, "Zoe");
        assert_eq!(msg.text, "hello there");
    }

    #[test]
    fn parses_local_chat() {
        let line = "[Chat::Local]['Ann' (UserId=steam_1, IP=1.1.1.1)]: anyone near the base?";
        let msg = parse_chat_line(line).unwrap();
        assert_eq!(msg.speaker, "Ann");
        assert_eq!(msg.text, "anyone near the base?");
    }

    #[test]
    fn parses_guild_chat() {
        let line = "[Chat::Guild]['Bo' (UserId=steam_2, IP=1.1.1.2)]: raid at dusk";
        let msg = parse_chat_line(line).unwrap();
        assert_eq!(msg.speaker, "Bo");
        assert_eq!(msg.text, "raid at dusk");

        let link = "[Chat::Guild]['Bo' (UserId=steam_2, IP=1.1.1.2)]: !link zz9";
        assert_eq!(parse_link_request(link).unwrap().code, "ZZ9");
    }

    #[test]
    fn ignores_non_chat_lines() {
        assert!(parse_chat_line("[info] 'Zoe' joined the server").is_none());
        assert!(parse_chat_line("").is_none());
    }

    #[test]
    fn blocked_phrases_are_dropped() {
        let filter = ChatFilter::default();
        let cmd = "[Chat::Global]['Eve' (UserId=steam_9, IP=1.2.3.4)]: /adminpassword letmein";
        let bang = "[Chat::Global]['Eve' (UserId=steam_9, IP=1.2.3.4)]: !kit starter";
        assert!(filter.relayable(cmd).is_none());
        assert!(filter.relayable(bang).is_none());
        assert!(filter.relayable(HELLO).is_some());
    }

    #[test]
    fn custom_block_list() {
        let filter = ChatFilter::new(["secret"]);
        let line = "[Chat::Global]['Eve' (UserId=steam_9, IP=1.2.3.4)]: the secret is out";
        assert!(filter.relayable(line).is_none());
        let ok = "[Chat::Global]['Eve' (UserId=steam_9, IP=1.2.3.4)]: /home works here";
        assert!(filter.relayable(ok).is_some());
    }

    #[test]
    fn link_request_extracted_but_not_relayed() {
        let filter = ChatFilter::default();
        let line = "[Chat::Global]['Zoe' (UserId=steam_765, IP=10.0.0.8)]: !link ab12cd";
        let batch = filter.extract(&[line, HELLO]);

        assert_eq!(batch.links.len(), 1);
        assert_eq!(batch.links[0].player_name, "Zoe");
        assert_eq!(batch.links[0].user_id, "steam_765");
        assert_eq!(batch.links[0].code, "AB12CD");

        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].text, "hello there");
    }

    #[test]
    fn slash_link_is_recognised() {
        let line = "[Chat::Local]['Bo' (UserId=steam_2, IP=1.1.1.1)]: /link Q9";
        let link = parse_link_request(line).unwrap();
        assert_eq!(link.code, "Q9");
    }
}
