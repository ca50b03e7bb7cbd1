//! Decode-once codec for the extension socket.
//!
//! - Text frames => `ControlMessage`
//! - Binary frames => `ExtFrame` (panic-free bytes::Buf parsing)
//! - Ping/Pong/Close are surfaced for lifecycle management

use axum::extract::ws::Message;
use gtproxy_core::{
    error::{ProxyError, Result},
    protocol::control::ControlMessage,
    protocol::frame::{decode_ext_frame, encode_ext_frame, ExtFrame},
};

#[derive(Debug)]
pub enum Inbound {
    Control(ControlMessage),
    Frame(ExtFrame),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

pub fn decode(msg: Message) -> Result<Inbound> {
    match msg {
        Message::Text(s) => {
            let ctl: ControlMessage = serde_json::from_str(&s)
                .map_err(|e| ProxyError::BadRequest(format!("invalid control json: {e}")))?;
            Ok(Inbound::Control(ctl))
        }
        Message::Binary(b) => Ok(Inbound::Frame(decode_ext_frame(bytes::Bytes::from(b))?)),
        Message::Ping(v) => Ok(Inbound::Ping(v)),
        Message::Pong(v) => Ok(Inbound::Pong(v)),
        Message::Close(_) => Ok(Inbound::Close),
    }
}

pub fn control(msg: &ControlMessage) -> Message {
    Message::Text(msg.to_json())
}

pub fn frame(frame: &ExtFrame) -> Message {
    Message::Binary(encode_ext_frame(frame).to_vec())
}

pub fn error(err: &ProxyError) -> Message {
    control(&ControlMessage::error(err.code().as_str(), err.to_string()))
}
