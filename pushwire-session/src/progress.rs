/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Countable message progress.
//!
//! The data count is the number of countable messages processed on the
//! session. After a recovery bind the server replays from the requested
//! point, so countables are buffered until the first `PROG` reveals where
//! the replay starts; from then on every countable advances the server side
//! counter and only those beyond the local count are delivered.

use pushwire_protocol::ServerMessage;

/// Disposition of a countable message.
#[derive(Debug, Clone, PartialEq)]
pub enum Countable {
    /// The message is new and must be delivered.
    Deliver(ServerMessage),
    /// The message was already processed before.
    Skip,
    /// The message is held until the replay start is known.
    Buffered,
}

/// Result of a `PROG` notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgOutcome {
    /// Client and server agree.
    Consistent {
        /// Buffered messages that must now be delivered, in order.
        released: Vec<ServerMessage>,
    },
    /// The server restarted from an earlier point; duplicates are skipped.
    ///
    /// Recovery must not be attempted again on this session.
    Realigned {
        /// Buffered messages that must now be delivered, in order.
        released: Vec<ServerMessage>,
    },
    /// The server is ahead of the client; data was lost.
    Gap {
        /// Local data count.
        local: u64,
        /// Server position.
        server: u64,
    },
}

/// Progress region of a bound connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressRegion {
    /// Recovery bind: waiting for the first `PROG`.
    Unconfirmed {
        /// Countables received before the first `PROG`.
        buffered: Vec<ServerMessage>,
    },
    /// Replay start known.
    Confirmed {
        /// Countables the server has sent on the session.
        server_prog: u64,
    },
}

impl ProgressRegion {
    /// Returns the region for a new bind.
    ///
    /// # Arguments
    /// * `recovering` - Whether the bind is a recovery bind
    /// * `data_count` - Local data count
    #[must_use]
    pub fn on_bind(recovering: bool, data_count: u64) -> Self {
        if recovering {
            Self::Unconfirmed {
                buffered: Vec::new(),
            }
        } else {
            Self::Confirmed {
                server_prog: data_count,
            }
        }
    }

    /// Returns true until the first `PROG` of a recovery bind.
    #[must_use]
    pub const fn is_unconfirmed(&self) -> bool {
        matches!(self, Self::Unconfirmed { .. })
    }

    /// Processes a countable message.
    pub fn on_countable(&mut self, message: ServerMessage, data_count: &mut u64) -> Countable {
        match self {
            Self::Unconfirmed { buffered } => {
                buffered.push(message);
                Countable::Buffered
            }
            Self::Confirmed { server_prog } => {
                *server_prog += 1;
                if *server_prog <= *data_count {
                    Countable::Skip
                } else {
                    *data_count += 1;
                    Countable::Deliver(message)
                }
            }
        }
    }

    /// Processes a `PROG` notification.
    ///
    /// # Arguments
    /// * `count` - Countables the server reports as sent
    /// * `data_count` - Local data count, advanced for released messages
    pub fn on_prog(&mut self, count: u64, data_count: &mut u64) -> ProgOutcome {
        match self {
            Self::Unconfirmed { buffered } => {
                let held = std::mem::take(buffered);
                let Some(start) = count.checked_sub(held.len() as u64) else {
                    return ProgOutcome::Gap {
                        local: *data_count,
                        server: count,
                    };
                };
                if start > *data_count {
                    return ProgOutcome::Gap {
                        local: *data_count,
                        server: start,
                    };
                }
                let local = *data_count;
                *self = Self::Confirmed { server_prog: start };
                let mut released = Vec::new();
                for message in held {
                    if let Countable::Deliver(message) = self.on_countable(message, data_count) {
                        released.push(message);
                    }
                }
                if start < local {
                    ProgOutcome::Realigned { released }
                } else {
                    ProgOutcome::Consistent { released }
                }
            }
            Self::Confirmed { server_prog } => {
                if count == *server_prog {
                    ProgOutcome::Consistent {
                        released: Vec::new(),
                    }
                } else if count > *data_count {
                    ProgOutcome::Gap {
                        local: *data_count,
                        server: count,
                    }
                } else {
                    *server_prog = count;
                    ProgOutcome::Realigned {
                        released: Vec::new(),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(n: u32) -> ServerMessage {
        ServerMessage::Update {
            sub_id: 1,
            item: 1,
            values: n.to_string(),
        }
    }

    #[test]
    fn test_plain_bind_delivers_everything() {
        let mut count = 5;
        let mut region = ProgressRegion::on_bind(false, count);
        assert_eq!(region.on_countable(update(1), &mut count), Countable::Deliver(update(1)));
        assert_eq!(count, 6);
        assert_eq!(
            region.on_prog(6, &mut count),
            ProgOutcome::Consistent { released: vec![] }
        );
    }

    #[test]
    fn test_recovery_buffers_until_prog() {
        let mut count = 10;
        let mut region = ProgressRegion::on_bind(true, count);
        assert_eq!(region.on_countable(update(9), &mut count), Countable::Buffered);
        assert_eq!(region.on_countable(update(10), &mut count), Countable::Buffered);
        assert_eq!(region.on_countable(update(11), &mut count), Countable::Buffered);

        // Replay started at 8: two duplicates, one new message.
        let outcome = region.on_prog(11, &mut count);
        assert_eq!(
            outcome,
            ProgOutcome::Realigned {
                released: vec![update(11)]
            }
        );
        assert_eq!(count, 11);
        assert!(!region.is_unconfirmed());
    }

    #[test]
    fn test_recovery_exact_start() {
        let mut count = 10;
        let mut region = ProgressRegion::on_bind(true, count);
        region.on_countable(update(11), &mut count);
        let outcome = region.on_prog(11, &mut count);
        assert_eq!(
            outcome,
            ProgOutcome::Consistent {
                released: vec![update(11)]
            }
        );
    }

    #[test]
    fn test_recovery_gap() {
        let mut count = 10;
        let mut region = ProgressRegion::on_bind(true, count);
        region.on_countable(update(14), &mut count);
        assert_eq!(
            region.on_prog(14, &mut count),
            ProgOutcome::Gap {
                local: 10,
                server: 13
            }
        );
        assert_eq!(count, 10);
    }

    #[test]
    fn test_prog_lower_than_buffer_is_gap() {
        let mut count = 0;
        let mut region = ProgressRegion::on_bind(true, count);
        region.on_countable(update(1), &mut count);
        region.on_countable(update(2), &mut count);
        assert!(matches!(
            region.on_prog(1, &mut count),
            ProgOutcome::Gap { .. }
        ));
    }

    #[test]
    fn test_confirmed_mismatch() {
        let mut count = 0;
        let mut region = ProgressRegion::on_bind(false, count);
        region.on_countable(update(1), &mut count);
        region.on_countable(update(2), &mut count);
        assert!(matches!(
            region.on_prog(5, &mut count),
            ProgOutcome::Gap { local: 2, server: 5 }
        ));
        assert_eq!(
            region.on_prog(1, &mut count),
            ProgOutcome::Realigned { released: vec![] }
        );
        assert_eq!(region.on_countable(update(2), &mut count), Countable::Skip);
        assert_eq!(region.on_countable(update(3), &mut count), Countable::Deliver(update(3)));
    }
}
