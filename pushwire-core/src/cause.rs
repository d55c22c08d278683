/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Server cause codes and their classification.
//!
//! `CONERR`, `REQERR`, `END` and `ERROR` carry a numeric cause code. The
//! session machines only need to know which recovery strategy a code calls
//! for, which is what [`CauseClass`] captures.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cause codes the session engine gives a specific meaning to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromPrimitive, ToPrimitive,
)]
#[repr(i32)]
pub enum ServerCause {
    /// User credentials were rejected.
    CredentialsRejected = 1,
    /// The requested adapter set is not available.
    AdapterSetUnavailable = 2,
    /// The session cannot be recovered on the server.
    RecoveryUnavailable = 4,
    /// The server is temporarily overloaded.
    ServerBusy = 5,
    /// The bind request arrived while another bind was in progress.
    BindConflict = 6,
    /// License limit on sessions reached.
    LicenseLimit = 7,
    /// Configured server load limit reached.
    LoadLimit = 8,
    /// New sessions are temporarily blocked.
    CreationBlocked = 9,
    /// Streaming is not available for this client.
    StreamingUnavailable = 10,
    /// Bind request for a session unknown to the server.
    SessionUnknown = 20,
    /// The Metadata Adapter asked the client to retry later.
    MetadataDeferred = 30,
    /// The session was closed by an administrator.
    ClosedByAdministrator = 31,
    /// The session was closed through a manual rebind.
    ManualRebind = 40,
    /// The session was rebound on another connection.
    ForcedRebind = 41,
    /// The session reached its maximum duration.
    MaxDuration = 48,
    /// The client library version is not supported.
    ClientVersionUnsupported = 60,
    /// Data notifications were lost and cannot be recovered.
    RecoveryError = 61,
}

impl ServerCause {
    /// Looks up a known cause from its numeric code.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::from_i32(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ServerCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Strategy a cause code calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CauseClass {
    /// Tear down the session and schedule a normal retry.
    Retry,
    /// Force the connect timeout to its maximum and retry with unlimited TTL.
    ServerBusy,
    /// Retry after a random delay bounded by a server-given maximum.
    Deferred,
    /// Close permanently and notify listeners.
    Fatal,
}

/// Classifies a numeric cause code.
///
/// Unknown codes, including Metadata Adapter custom codes (`<= 0`), are fatal.
#[must_use]
pub fn classify(code: i32) -> CauseClass {
    match ServerCause::from_code(code) {
        Some(
            ServerCause::RecoveryUnavailable
            | ServerCause::BindConflict
            | ServerCause::SessionUnknown
            | ServerCause::ManualRebind
            | ServerCause::ForcedRebind
            | ServerCause::MaxDuration,
        ) => CauseClass::Retry,
        Some(ServerCause::ServerBusy) => CauseClass::ServerBusy,
        Some(ServerCause::MetadataDeferred) => CauseClass::Deferred,
        _ => CauseClass::Fatal,
    }
}
