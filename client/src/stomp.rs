//! STOMP 1.2 frames as carried in WebSocket text messages.

use thiserror::Error;
use viewer::SubscriptionId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame has no command")]
    MissingCommand,
    #[error("malformed header line {0:?}")]
    BadHeader(String),
    #[error("invalid escape in header {0:?}")]
    BadEscape(String),
    #[error("frame body is not terminated")]
    Unterminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header. Repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str) -> Self {
        Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0")
    }

    pub fn subscribe(id: SubscriptionId, destination: &str) -> Self {
        Frame::new("SUBSCRIBE")
            .header("id", id.to_string())
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: SubscriptionId) -> Self {
        Frame::new("UNSUBSCRIBE").header("id", id.to_string())
    }

    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        Frame::new("SEND")
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new("DISCONNECT")
    }

    /// Subscription a MESSAGE frame was delivered on.
    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.get("subscription")
            .and_then(|v| v.strip_prefix("sub-"))
            .and_then(|n| n.parse().ok())
            .map(SubscriptionId)
    }

    fn escapes_headers(&self) -> bool {
        !matches!(self.command.as_str(), "CONNECT" | "CONNECTED")
    }

    pub fn encode(&self) -> String {
        let escape = self.escapes_headers();
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame. Returns `None` for a heart-beat (bare end-of-lines).
    pub fn parse(text: &str) -> Result<Option<Frame>, FrameError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (head, rest) = match text.find("\n\n") {
            Some(i) => (&text[..i], &text[i + 2..]),
            None => match text.find("\r\n\r\n") {
                Some(i) => (&text[..i], &text[i + 4..]),
                None => return Err(FrameError::Unterminated),
            },
        };

        let mut lines = head.lines();
        let command = lines
            .next()
            .map(|c| c.trim_end_matches('\r'))
            .filter(|c| !c.is_empty())
            .ok_or(FrameError::MissingCommand)?
            .to_string();
        let escaped = !matches!(command.as_str(), "CONNECT" | "CONNECTED");

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::BadHeader(line.to_string()))?;
            if escaped {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .and_then(|(_, v)| v.parse::<usize>().ok());
        let body = match length {
            Some(n) if rest.len() > n && rest.is_char_boundary(n) && rest.as_bytes()[n] == 0 => {
                &rest[..n]
            }
            _ => rest.find('\0').map(|i| &rest[..i]).ok_or(FrameError::Unterminated)?,
        };

        Ok(Some(Frame {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::BadEscape(raw.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_frame_layout() {
        let frame = Frame::send("/update-requested-blocks", r#"{"client":"a"}"#);
        assert_eq!(
            frame.encode(),
            "SEND\ndestination:/update-requested-blocks\ncontent-type:application/json\ncontent-length:14\n\n{\"client\":\"a\"}\0"
        );
    }

    #[test]
    fn parses_a_message_frame() {
        let raw = "MESSAGE\nsubscription:sub-7\ndestination:/topic/block/1/-2\nmessage-id:3\n\n[[true]]\0";
        let frame = Frame::parse(raw).unwrap().unwrap();
        assert_eq!(frame.command, "MESSAGE");
        assert_eq!(frame.subscription(), Some(SubscriptionId(7)));
        assert_eq!(frame.get("destination"), Some("/topic/block/1/-2"));
        assert_eq!(frame.body, "[[true]]");
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let raw = "MESSAGE\ncontent-length:3\n\na\0b\0";
        assert_eq!(Frame::parse(raw).unwrap().unwrap().body, "a\0b");
    }

    #[test]
    fn header_escapes_survive_a_round_trip() {
        let frame = Frame::new("SEND").header("note", "a:b\\c\nd");
        let encoded = frame.encode();
        assert!(encoded.contains("note:a\\cb\\\\c\\nd\n"));
        assert_eq!(Frame::parse(&encoded).unwrap(), Some(frame));
    }

    #[test]
    fn connect_headers_are_not_escaped() {
        let encoded = Frame::connect("localhost:8080").encode();
        assert!(encoded.contains("host:localhost:8080\n"));
        let parsed = Frame::parse("CONNECTED\nversion:1.2\nserver:x:1\n\n\0").unwrap().unwrap();
        assert_eq!(parsed.get("server"), Some("x:1"));
    }

    #[test]
    fn heartbeats_and_garbage() {
        assert_eq!(Frame::parse("\n"), Ok(None));
        assert_eq!(Frame::parse("\r\n\n"), Ok(None));
        assert_eq!(Frame::parse("MESSAGE\nid:1\n\nno terminator"), Err(FrameError::Unterminated));
        assert!(matches!(Frame::parse("MESSAGE\nnocolon\n\n\0"), Err(FrameError::BadHeader(_))));
        assert!(matches!(Frame::parse("SEND\nx:bad\\q\n\n\0"), Err(FrameError::BadEscape(_))));
    }

    #[test]
    fn subscription_header_must_be_ours() {
        let frame = Frame::new("MESSAGE").header("subscription", "other-1");
        assert_eq!(frame.subscription(), None);
    }
}
