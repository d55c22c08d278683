/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! # PushWire Protocol
//!
//! Wire grammar of the push session protocol.
//!
//! This crate provides:
//! - **Encoder**: `ControlBatch`, an operation name followed by `&`-joined
//!   `LS_` parameters
//! - **Decoder**: comma-separated server lines into `ServerMessage` values,
//!   and splitting of multiplexed `\r\n` frames
//! - **Percent encoding**: escaping of parameter values and free-text tokens

pub mod decoder;
pub mod encoder;
pub mod message;
pub mod percent;

pub use decoder::{decode_line, split_frame};
pub use encoder::{ControlBatch, params};
pub use message::{ConOk, Operation, ServerMessage};
