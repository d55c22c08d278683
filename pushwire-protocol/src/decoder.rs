/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Inbound line decoder.
//!
//! Server lines are comma-separated tokens whose first token names the
//! message type. Free-text tokens are percent-encoded; the last token of a
//! message may itself contain commas only for messages whose trailing field
//! is opaque (e.g. `U` values), so tokenization is bounded per message type.

use crate::message::{ConOk, ServerMessage};
use crate::percent;
use memchr::{memchr, memmem};
use pushwire_core::error::DecodeError;
use pushwire_core::types::{Bandwidth, ReqId, SessionId};
use smallvec::SmallVec;

/// Token separator.
pub const COMMA: u8 = b',';

type Tokens<'a> = SmallVec<[&'a str; 8]>;

/// Splits a line into at most `max` tokens; the last one keeps the remainder.
fn tokenize(line: &str, max: usize) -> Tokens<'_> {
    let mut tokens = Tokens::new();
    let mut rest = line;
    while tokens.len() + 1 < max {
        match memchr(COMMA, rest.as_bytes()) {
            Some(pos) => {
                tokens.push(&rest[..pos]);
                rest = &rest[pos + 1..];
            }
            None => break,
        }
    }
    tokens.push(rest);
    tokens
}

/// Field accessor bound to one message.
struct Fields<'a> {
    name: &'static str,
    tokens: Tokens<'a>,
}

impl<'a> Fields<'a> {
    fn raw(&self, index: usize) -> Result<&'a str, DecodeError> {
        self.tokens
            .get(index + 1)
            .copied()
            .ok_or(DecodeError::MissingField {
                message: self.name,
                index,
            })
    }

    fn text(&self, index: usize) -> Result<String, DecodeError> {
        Ok(percent::decode(self.raw(index)?)?.into_owned())
    }

    fn text_or_empty(&self, index: usize) -> Result<String, DecodeError> {
        match self.tokens.get(index + 1) {
            Some(token) => Ok(percent::decode(token)?.into_owned()),
            None => Ok(String::new()),
        }
    }

    fn uint(&self, index: usize) -> Result<u64, DecodeError> {
        let token = self.raw(index)?;
        token.parse().map_err(|_| DecodeError::InvalidNumber {
            message: self.name,
            value: token.to_string(),
        })
    }

    fn int(&self, index: usize) -> Result<i32, DecodeError> {
        let token = self.raw(index)?;
        token.parse().map_err(|_| DecodeError::InvalidNumber {
            message: self.name,
            value: token.to_string(),
        })
    }
}

/// Maps a type token to its static name.
fn known_name(head: &str) -> Option<&'static str> {
    const NAMES: [&str; 25] = [
        "CONOK", "CONERR", "REQOK", "REQERR", "ERROR", "SUBOK", "SUBCMD", "U", "UNSUB", "EOS",
        "CS", "OV", "CONF", "CONS", "SERVNAME", "CLIENTIP", "LOOP", "SYNC", "PROG", "END",
        "MSGDONE", "MSGFAIL", "MPNREG", "MPNOK", "MPNDEL",
    ];
    NAMES.iter().copied().find(|name| *name == head)
}

/// Returns the maximum token count for a message type, type token included.
fn arity(name: &str) -> usize {
    match name {
        "SERVNAME" | "CLIENTIP" | "MPNDEL" => 2,
        "U" | "CONF" | "CONS" => 4,
        "CONERR" | "END" | "ERROR" => 3,
        "REQERR" | "MSGDONE" => 4,
        "MSGFAIL" | "CONOK" => 5,
        "SUBCMD" => 6,
        _ => 8,
    }
}

/// Decodes one server line.
///
/// # Arguments
/// * `line` - A single line, without its terminator
///
/// # Errors
/// Returns `DecodeError` if the line is empty, names an unknown message type,
/// or misses or malforms a mandatory field.
pub fn decode_line(line: &str) -> Result<ServerMessage, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }
    let head = match memchr(COMMA, line.as_bytes()) {
        Some(pos) => &line[..pos],
        None => line,
    };
    let name = match head {
        "PROBE" => return Ok(ServerMessage::Probe),
        "NOOP" => return Ok(ServerMessage::Noop),
        "WSOK" => return Ok(ServerMessage::WsOk),
        other => known_name(other).ok_or_else(|| DecodeError::UnknownMessage(other.to_string()))?,
    };
    let tokens = tokenize(line, arity(name));
    let f = Fields { name, tokens };

    let message = match name {
        "CONOK" => {
            let raw_id = f.raw(0)?;
            let session_id = SessionId::new(raw_id)
                .ok_or_else(|| DecodeError::InvalidEncoding(raw_id.to_string()))?;
            let control_link = match f.tokens.get(4).copied() {
                None | Some("*") | Some("") => None,
                Some(link) => Some(percent::decode(link)?.into_owned()),
            };
            ServerMessage::ConOk(ConOk {
                session_id,
                request_limit: f.uint(1)?,
                keepalive_ms: f.uint(2)?,
                control_link,
            })
        }
        "CONERR" => ServerMessage::ConErr {
            code: f.int(0)?,
            message: f.text_or_empty(1)?,
        },
        "REQOK" => ServerMessage::ReqOk {
            req_id: ReqId::new(f.uint(0)?),
        },
        "REQERR" => ServerMessage::ReqErr {
            req_id: ReqId::new(f.uint(0)?),
            code: f.int(1)?,
            message: f.text_or_empty(2)?,
        },
        "ERROR" => ServerMessage::Error {
            code: f.int(0)?,
            message: f.text_or_empty(1)?,
        },
        "SUBOK" => ServerMessage::SubOk {
            sub_id: f.uint(0)?,
            items: f.uint(1)?,
            fields: f.uint(2)?,
        },
        "SUBCMD" => ServerMessage::SubCmd {
            sub_id: f.uint(0)?,
            items: f.uint(1)?,
            fields: f.uint(2)?,
            key_pos: f.uint(3)?,
            command_pos: f.uint(4)?,
        },
        "U" => ServerMessage::Update {
            sub_id: f.uint(0)?,
            item: f.uint(1)?,
            values: f.raw(2)?.to_string(),
        },
        "UNSUB" => ServerMessage::Unsub {
            sub_id: f.uint(0)?,
        },
        "EOS" => ServerMessage::Eos {
            sub_id: f.uint(0)?,
            item: f.uint(1)?,
        },
        "CS" => ServerMessage::Cs {
            sub_id: f.uint(0)?,
            item: f.uint(1)?,
        },
        "OV" => ServerMessage::Ov {
            sub_id: f.uint(0)?,
            item: f.uint(1)?,
            lost: f.uint(2)?,
        },
        "CONF" => ServerMessage::Conf {
            sub_id: f.uint(0)?,
            frequency: f.text(1)?,
        },
        "CONS" => {
            let token = f.raw(0)?;
            let bandwidth = Bandwidth::parse(token).ok_or_else(|| DecodeError::InvalidNumber {
                message: "CONS",
                value: token.to_string(),
            })?;
            ServerMessage::Cons(bandwidth)
        }
        "SERVNAME" => ServerMessage::ServName(f.text(0)?),
        "CLIENTIP" => ServerMessage::ClientIp(f.text(0)?),
        "LOOP" => ServerMessage::Loop {
            delay_ms: if f.tokens.len() > 1 { f.uint(0)? } else { 0 },
        },
        "SYNC" => ServerMessage::Sync {
            seconds: f.uint(0)?,
        },
        "PROG" => ServerMessage::Prog { count: f.uint(0)? },
        "END" => ServerMessage::End {
            code: f.int(0)?,
            message: f.text_or_empty(1)?,
        },
        "MSGDONE" => ServerMessage::MsgDone {
            sequence: f.text(0)?,
            prog: f.uint(1)?,
            response: f.text_or_empty(2)?,
        },
        "MSGFAIL" => ServerMessage::MsgFail {
            sequence: f.text(0)?,
            prog: f.uint(1)?,
            code: f.int(2)?,
            message: f.text_or_empty(3)?,
        },
        "MPNREG" => ServerMessage::MpnReg {
            device_id: f.text(0)?,
            adapter_name: f.text(1)?,
        },
        "MPNOK" => ServerMessage::MpnOk {
            sub_id: f.uint(0)?,
            pn_sub_id: f.text(1)?,
        },
        "MPNDEL" => ServerMessage::MpnDel {
            pn_sub_id: f.text(0)?,
        },
        other => return Err(DecodeError::UnknownMessage(other.to_string())),
    };
    Ok(message)
}

/// Iterator over the logical lines of a physical frame.
///
/// Full-duplex frames multiplex several lines separated by `\r\n`; empty
/// lines are skipped.
#[derive(Debug)]
pub struct FrameLines<'a> {
    rest: &'a str,
}

impl<'a> Iterator for FrameLines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.rest.is_empty() {
                return None;
            }
            let (line, rest) = match memmem::find(self.rest.as_bytes(), b"\r\n") {
                Some(pos) => (&self.rest[..pos], &self.rest[pos + 2..]),
                None => (self.rest, ""),
            };
            self.rest = rest;
            if !line.is_empty() {
                return Some(line);
            }
        }
    }
}

/// Splits a physical frame into logical lines.
#[must_use]
pub fn split_frame(frame: &str) -> FrameLines<'_> {
    FrameLines { rest: frame }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_conok() {
        let msg = decode_line("CONOK,S1a2b,50000,5000,*").unwrap();
        match msg {
            ServerMessage::ConOk(ok) => {
                assert_eq!(ok.session_id.as_str(), "S1a2b");
                assert_eq!(ok.request_limit, 50000);
                assert_eq!(ok.keepalive_ms, 5000);
                assert!(ok.control_link.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_conok_with_control_link() {
        let msg = decode_line("CONOK,S1,100,2000,push2.example.com").unwrap();
        let ServerMessage::ConOk(ok) = msg else {
            panic!("expected CONOK");
        };
        assert_eq!(ok.control_link.as_deref(), Some("push2.example.com"));
    }

    #[test]
    fn test_decode_errors_with_text() {
        assert_eq!(
            decode_line("CONERR,5,Server%20busy").unwrap(),
            ServerMessage::ConErr {
                code: 5,
                message: "Server busy".to_string()
            }
        );
        assert_eq!(
            decode_line("REQERR,7,-3,Refused").unwrap(),
            ServerMessage::ReqErr {
                req_id: ReqId::new(7),
                code: -3,
                message: "Refused".to_string()
            }
        );
        assert_eq!(
            decode_line("END,41").unwrap(),
            ServerMessage::End {
                code: 41,
                message: String::new()
            }
        );
    }

    #[test]
    fn test_decode_update_keeps_commas() {
        let msg = decode_line("U,3,1,a|b,c|#").unwrap();
        assert_eq!(
            msg,
            ServerMessage::Update {
                sub_id: 3,
                item: 1,
                values: "a|b,c|#".to_string()
            }
        );
    }

    #[test]
    fn test_decode_control_lines() {
        assert_eq!(decode_line("PROBE").unwrap(), ServerMessage::Probe);
        assert_eq!(decode_line("NOOP,keep").unwrap(), ServerMessage::Noop);
        assert_eq!(decode_line("WSOK").unwrap(), ServerMessage::WsOk);
        assert_eq!(
            decode_line("LOOP,0").unwrap(),
            ServerMessage::Loop { delay_ms: 0 }
        );
        assert_eq!(decode_line("LOOP").unwrap(), ServerMessage::Loop { delay_ms: 0 });
        assert_eq!(decode_line("SYNC,12").unwrap(), ServerMessage::Sync { seconds: 12 });
        assert_eq!(decode_line("PROG,99").unwrap(), ServerMessage::Prog { count: 99 });
        assert_eq!(
            decode_line("CONS,unlimited").unwrap(),
            ServerMessage::Cons(Bandwidth::Unlimited)
        );
    }

    #[test]
    fn test_decode_message_outcomes() {
        assert_eq!(
            decode_line("MSGDONE,orders,4,ok").unwrap(),
            ServerMessage::MsgDone {
                sequence: "orders".to_string(),
                prog: 4,
                response: "ok".to_string()
            }
        );
        assert_eq!(
            decode_line("MSGFAIL,orders,5,38,timeout").unwrap(),
            ServerMessage::MsgFail {
                sequence: "orders".to_string(),
                prog: 5,
                code: 38,
                message: "timeout".to_string()
            }
        );
    }

    #[test]
    fn test_decode_invalid() {
        assert_eq!(decode_line(""), Err(DecodeError::Empty));
        assert!(matches!(
            decode_line("BOGUS,1"),
            Err(DecodeError::UnknownMessage(_))
        ));
        assert!(matches!(
            decode_line("PROG,abc"),
            Err(DecodeError::InvalidNumber { .. })
        ));
        assert!(matches!(
            decode_line("SUBOK,1,2"),
            Err(DecodeError::MissingField { index: 2, .. })
        ));
    }

    #[test]
    fn test_split_frame() {
        let lines: Vec<&str> = split_frame("U,1,1,a\r\nPROG,3\r\n\r\nNOOP").collect();
        assert_eq!(lines, vec!["U,1,1,a", "PROG,3", "NOOP"]);
        assert_eq!(split_frame("").count(), 0);
    }
}
