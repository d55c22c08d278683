/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! # PushWire Core
//!
//! Core types, cause codes and error definitions for the PushWire session engine.
//!
//! This crate provides the fundamental building blocks used across all PushWire crates:
//! - **Error types**: Unified error handling with `thiserror`
//! - **Identifiers**: `SessionId`, `ReqId`
//! - **Status**: `HighLevelStatus` and `TransportKind`
//! - **Cause codes**: `ServerCause` and the retry/fatal classification

pub mod cause;
pub mod error;
pub mod types;

pub use cause::{CauseClass, ServerCause, classify};
pub use error::{ConfigError, DecodeError, PushError, Result, SessionError};
pub use types::{Bandwidth, HighLevelStatus, ReqId, SessionId, TransportKind};
