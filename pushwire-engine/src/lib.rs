/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! # PushWire Engine
//!
//! Runtime facade for the PushWire push client.
//!
//! This crate provides:
//! - **Listener trait**: Async callbacks for status, data and request outcomes
//! - **Builder API**: Fluent configuration of a client
//! - **Driver**: A single tokio task owning the active session machine and
//!   executing the effects it requests
//! - **Client handle**: Cloneable handle used to connect, subscribe and send

pub mod builder;
pub mod client;
mod driver;
pub mod listener;

pub use builder::ClientBuilder;
pub use client::PushClient;
pub use listener::{ClientListener, NoOpListener, SessionProperty};
