//! STOMP 1.2 frames as carried in WebSocket text messages.
//!
//! A frame is `COMMAND\n`, `key:value\n` headers, a blank line, the body and a NUL octet.
//! Bare EOLs between frames are heart-beats.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("malformed header line {0:?}")]
    BadHeader(String),
    #[error("invalid escape sequence in {0:?}")]
    BadEscape(String),
    #[error("frame is not NUL-terminated")]
    Unterminated,
    #[error("invalid content-length {0:?}")]
    BadContentLength(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Result<Self, FrameError> {
        Ok(match s {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }

    // CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First occurrence wins for repeated headers.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str, heartbeat: HeartBeat) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1,1.0")
            .header("host", host)
            .header("heart-beat", heartbeat.to_string())
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn send(destination: &str, body: impl Into<String>, content_type: &str) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", content_type)
            .with_body(body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(Command::Disconnect).header("receipt", receipt)
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Parse every frame in one WebSocket text message. Heart-beat EOLs are skipped,
/// so a message holding only EOLs yields an empty list.
pub fn parse_frames(text: &str) -> Result<Vec<Frame>, FrameError> {
    let mut frames = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return Ok(frames);
        }
        let (frame, remaining) = parse_one(rest)?;
        frames.push(frame);
        rest = remaining;
    }
}

fn parse_one(input: &str) -> Result<(Frame, &str), FrameError> {
    let (command_line, mut rest) = split_line(input).ok_or(FrameError::Unterminated)?;
    let command = Command::parse(command_line)?;
    let escaped = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, after) = split_line(rest).ok_or(FrameError::Unterminated)?;
        rest = after;
        if line.is_empty() {
            break;
        }
        let (k, v) = line
            .split_once(':')
            .ok_or_else(|| FrameError::BadHeader(line.to_string()))?;
        if escaped {
            headers.push((unescape_header(k)?, unescape_header(v)?));
        } else {
            headers.push((k.to_string(), v.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::BadContentLength(v.clone()))
        })
        .transpose()?;

    let (body, remaining) = match content_length {
        Some(len) => {
            if rest.len() < len || !rest.is_char_boundary(len) || !rest[len..].starts_with('\0') {
                return Err(FrameError::Unterminated);
            }
            (&rest[..len], &rest[len + 1..])
        }
        None => {
            let nul = rest.find('\0').ok_or(FrameError::Unterminated)?;
            (&rest[..nul], &rest[nul + 1..])
        }
    };

    Ok((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        remaining,
    ))
}

fn split_line(input: &str) -> Option<(&str, &str)> {
    let nl = input.find('\n')?;
    let line = input[..nl].strip_suffix('\r').unwrap_or(&input[..nl]);
    Some((line, &input[nl + 1..]))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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

fn unescape_header(s: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
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
            _ => return Err(FrameError::BadEscape(s.to_string())),
        }
    }
    Ok(out)
}

/// `heart-beat` header value: (can send every, wants to receive every), in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing: u64,
    pub incoming: u64,
}

impl HeartBeat {
    pub fn symmetric(every: Duration) -> Self {
        let ms = every.as_millis() as u64;
        Self {
            outgoing: ms,
            incoming: ms,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (out, inc) = value.split_once(',')?;
        Some(Self {
            outgoing: out.trim().parse().ok()?,
            incoming: inc.trim().parse().ok()?,
        })
    }

    /// How often the client must emit heart-beats, given the server's CONNECTED value.
    pub fn negotiate_outgoing(self, server: HeartBeat) -> Option<Duration> {
        if self.outgoing == 0 || server.incoming == 0 {
            return None;
        }
        Some(Duration::from_millis(self.outgoing.max(server.incoming)))
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing, self.incoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_frame_wire_format() {
        let frame = Frame::send("/app/clipboard/ping", "ping", "text/plain");
        assert_eq!(
            frame.encode(),
            "SEND\ndestination:/app/clipboard/ping\ncontent-type:text/plain\ncontent-length:4\n\nping\0"
        );
    }

    #[test]
    fn test_connect_headers_are_not_escaped() {
        let frame = Frame::connect("localhost:5000", HeartBeat::symmetric(Duration::from_secs(4)));
        let wire = frame.encode();
        assert!(wire.starts_with("CONNECT\n"));
        assert!(wire.contains("host:localhost:5000\n"));
        assert!(wire.contains("heart-beat:4000,4000\n"));
    }

    #[test]
    fn test_message_frame_parses() {
        let wire = "MESSAGE\ndestination:/topic/clipboard/delete\nsubscription:sub-2\nmessage-id:m-1\n\n42\0";
        let frames = parse_frames(wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Message);
        assert_eq!(frames[0].get("destination"), Some("/topic/clipboard/delete"));
        assert_eq!(frames[0].body, "42");
    }

    #[test]
    fn test_header_escapes_are_decoded() {
        let wire = "MESSAGE\ndestination:/topic/a\\cb\nnote:line\\none\\\\two\n\n\0";
        let frame = &parse_frames(wire).unwrap()[0];
        assert_eq!(frame.get("destination"), Some("/topic/a:b"));
        assert_eq!(frame.get("note"), Some("line\none\\two"));
    }

    #[test]
    fn test_escaped_header_survives_encoding() {
        let frame = Frame::new(Command::Send).header("destination", "/a:b\\c");
        let parsed = &parse_frames(&frame.encode()).unwrap()[0];
        assert_eq!(parsed.get("destination"), Some("/a:b\\c"));
    }

    #[test]
    fn test_bad_escape_is_rejected() {
        let wire = "MESSAGE\ndestination:/topic\\t\n\n\0";
        assert!(matches!(parse_frames(wire), Err(FrameError::BadEscape(_))));
    }

    #[test]
    fn test_heartbeats_and_multiple_frames() {
        let wire = "\n\nRECEIPT\nreceipt-id:1\n\n\0\nMESSAGE\ndestination:/d\n\nhello\0\n";
        let frames = parse_frames(wire).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Receipt);
        assert_eq!(frames[1].body, "hello");

        assert!(parse_frames("\n").unwrap().is_empty());
        assert!(parse_frames("\r\n\r\n").unwrap().is_empty());
    }

    #[test]
    fn test_content_length_allows_embedded_nul() {
        let wire = "MESSAGE\ndestination:/d\ncontent-length:3\n\na\0b\0";
        let frame = &parse_frames(wire).unwrap()[0];
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn test_crlf_line_endings() {
        let wire = "CONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0";
        let frame = &parse_frames(wire).unwrap()[0];
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.get("version"), Some("1.2"));
    }

    #[test]
    fn test_repeated_header_first_wins() {
        let wire = "MESSAGE\nfoo:first\nfoo:second\n\n\0";
        assert_eq!(parse_frames(wire).unwrap()[0].get("foo"), Some("first"));
    }

    #[test]
    fn test_malformed_frames() {
        assert_eq!(
            parse_frames("BOGUS\n\n\0"),
            Err(FrameError::UnknownCommand("BOGUS".to_string()))
        );
        assert_eq!(
            parse_frames("MESSAGE\ndestination:/d\n\nno terminator"),
            Err(FrameError::Unterminated)
        );
        assert!(matches!(
            parse_frames("MESSAGE\nnot-a-header\n\n\0"),
            Err(FrameError::BadHeader(_))
        ));
        assert!(matches!(
            parse_frames("MESSAGE\ncontent-length:abc\n\n\0"),
            Err(FrameError::BadContentLength(_))
        ));
    }

    #[test]
    fn test_heartbeat_negotiation() {
        let ours = HeartBeat::symmetric(Duration::from_millis(4000));
        let server = HeartBeat::parse("10000,10000").unwrap();
        assert_eq!(ours.negotiate_outgoing(server), Some(Duration::from_millis(10000)));
        assert_eq!(ours.negotiate_outgoing(HeartBeat::parse("0,0").unwrap()), None);
        assert_eq!(HeartBeat::default().negotiate_outgoing(server), None);
        assert!(HeartBeat::parse("garbage").is_none());
    }
}
