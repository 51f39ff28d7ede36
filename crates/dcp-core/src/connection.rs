//! Per-connection session state machine.
//!
//! Manages the read buffer, frame extraction, registration lifecycle, and
//! signon/ping timers. Uses the action pattern: methods take time (and, for
//! randomness, an [`Environment`]) as input and return actions for the
//! driver to execute. This keeps the state machine pure (no I/O), which
//! makes it straightforward to test with a virtual clock and seeded RNG.
//!
//! # State machine
//!
//! ```text
//! ┌───────────┐   signon/register ok   ┌────────────┐
//! │ Connected │────────────────────────>│ Registered │
//! └───────────┘                         └────────────┘
//!       │ signon timeout / fatal error        │ ping timeout / fatal error
//!       ↓                                      ↓
//!                      ┌────────┐
//!                      │ Closed │
//!                      └────────┘
//! ```

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use dcp_proto::{Dialect, Frame, KVal};

use crate::env::Environment;
use crate::error::DispatchError;

/// Time allowed to complete registration (`signon` or `register`) after
/// accept.
pub const SIGNON_TIMEOUT: Duration = Duration::from_secs(60);

/// Actions returned by the session state machine.
///
/// The driver (test harness or production server) executes these: write the
/// frame to the transport, or close it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Encode and send this frame to the peer.
    SendFrame(Frame),
    /// Close the transport.
    Close,
}

/// Registration state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Just accepted; a signon timer is armed.
    Connected,
    /// Signon/register completed; a ping timer is armed.
    Registered,
    /// Transport gone or a fatal error was emitted.
    Closed,
}

/// Result of feeding newly-arrived bytes into a [`Connection`].
#[derive(Debug, Default)]
pub struct IngestOutcome {
    /// Complete frames extracted from the buffer, in wire order, ready for
    /// dispatch.
    pub frames: Vec<Frame>,
    /// Actions generated by malformed frames (non-fatal `error` replies);
    /// well-formed frames produce no action here; the dispatcher is
    /// responsible for any reply to those.
    pub actions: Vec<SessionAction>,
}

/// Per-connection session state machine.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct Connection<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: SessionState,
    dialect: Dialect,
    server_name: String,
    buffer: Vec<u8>,
    signon_deadline: I,
    ping_due: Option<I>,
    pending_ping: bool,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new connection in [`SessionState::Connected`], with the
    /// signon timer armed for [`SIGNON_TIMEOUT`] from `now`.
    #[must_use]
    pub fn new(now: I, dialect: Dialect, server_name: impl Into<String>) -> Self
    where
        I: std::ops::Add<Duration, Output = I>,
    {
        Self {
            state: SessionState::Connected,
            dialect,
            server_name: server_name.into(),
            buffer: Vec::new(),
            signon_deadline: now + SIGNON_TIMEOUT,
            ping_due: None,
            pending_ping: false,
        }
    }

    /// Current registration state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a `pong` is currently owed.
    #[must_use]
    pub fn pending_ping(&self) -> bool {
        self.pending_ping
    }

    /// Append newly-arrived bytes and extract as many complete frames as
    /// the buffer now holds.
    ///
    /// A malformed frame (oversize or structurally invalid) does not stop
    /// extraction of subsequent bytes in the general case, but since the
    /// codec cannot reliably resynchronize mid-stream after a structural
    /// violation, the remaining buffered bytes are discarded alongside the
    /// non-fatal `error` reply.
    pub fn ingest(&mut self, bytes: &[u8]) -> IngestOutcome {
        self.buffer.extend_from_slice(bytes);
        let mut outcome = IngestOutcome::default();

        loop {
            match self.dialect.decode(&self.buffer) {
                Ok(Some(decoded)) => {
                    self.buffer.drain(..decoded.consumed);
                    outcome.frames.push(decoded.frame);
                },
                Ok(None) => break,
                Err(dcp_proto::FrameError::Incomplete) => break,
                Err(dcp_proto::FrameError::Oversize) => {
                    outcome.actions.push(self.error_frame("*", "Oversize frame", &KVal::new()));
                    self.buffer.clear();
                    break;
                },
                Err(dcp_proto::FrameError::Invalid(reason)) => {
                    outcome.actions.push(self.error_frame("*", &reason, &KVal::new()));
                    self.buffer.clear();
                    break;
                },
            }
        }

        outcome
    }

    /// Encode `frame` for the wire. Callers use this instead of reaching
    /// into the dialect directly so the session's chosen dialect stays the
    /// single source of truth.
    ///
    /// # Errors
    ///
    /// Returns [`dcp_proto::FrameError::Oversize`] if `frame` is too large
    /// to encode.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, dcp_proto::FrameError> {
        self.dialect.encode(frame)
    }

    /// Build a non-fatal `error` frame sourced from the server.
    #[must_use]
    pub fn error_frame(&self, command: &str, reason: &str, extargs: &KVal) -> SessionAction {
        SessionAction::SendFrame(self.build_error(command, reason, extargs))
    }

    fn build_error(&self, command: &str, reason: &str, extargs: &KVal) -> Frame {
        let mut kval = extargs.clone();
        kval.insert("command".to_string(), vec![command.to_string()]);
        kval.insert("reason".to_string(), vec![reason.to_string()]);
        Frame::new(format!("={}", self.server_name), "*", "error", kval)
    }

    /// Emit an `error` frame for `err`, returning the frame plus a
    /// `Close` action if `err` is fatal.
    #[must_use]
    pub fn fail(&mut self, command: &str, err: &DispatchError, extargs: &KVal) -> Vec<SessionAction> {
        let mut actions = vec![SessionAction::SendFrame(self.build_error(command, &err.to_string(), extargs))];
        if err.fatal() {
            self.state = SessionState::Closed;
            actions.push(SessionAction::Close);
        }
        actions
    }

    /// Transition from `Connected` to `Registered`: cancel the signon timer
    /// and arm the first ping.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyRegistered`] if not currently
    /// `Connected`.
    pub fn enter_registered<E: Environment<Instant = I>>(
        &mut self,
        env: &E,
        now: I,
    ) -> Result<(), DispatchError>
    where
        I: std::ops::Add<Duration, Output = I>,
    {
        if self.state != SessionState::Connected {
            return Err(DispatchError::AlreadyRegistered);
        }
        self.state = SessionState::Registered;
        self.ping_due = Some(now + env.random_ping_interval());
        Ok(())
    }

    /// Clear the pending-ping flag on receipt of `pong`.
    pub fn handle_pong(&mut self) {
        self.pending_ping = false;
    }

    /// Periodic maintenance: signon timeout while `Connected`, ping
    /// scheduling/timeout while `Registered`.
    pub fn tick<E: Environment<Instant = I>>(&mut self, env: &E, now: I) -> Vec<SessionAction>
    where
        I: std::ops::Add<Duration, Output = I>,
    {
        match self.state {
            SessionState::Connected => {
                if now >= self.signon_deadline {
                    self.state = SessionState::Closed;
                    vec![
                        SessionAction::SendFrame(self.build_error(
                            "*",
                            &DispatchError::SignonTimeout.to_string(),
                            &KVal::new(),
                        )),
                        SessionAction::Close,
                    ]
                } else {
                    Vec::new()
                }
            },
            SessionState::Registered => {
                let Some(due) = self.ping_due else { return Vec::new() };
                if now < due {
                    return Vec::new();
                }

                if self.pending_ping {
                    self.state = SessionState::Closed;
                    return vec![
                        SessionAction::SendFrame(self.build_error(
                            "*",
                            &DispatchError::PingTimeout.to_string(),
                            &KVal::new(),
                        )),
                        SessionAction::Close,
                    ];
                }

                self.pending_ping = true;
                self.ping_due = Some(now + env.random_ping_interval());
                let mut kval = KVal::new();
                kval.insert("time".to_string(), vec![env.wall_clock_secs().to_string()]);
                vec![SessionAction::SendFrame(Frame::new(
                    format!("={}", self.server_name),
                    "*",
                    "ping",
                    kval,
                ))]
            },
            SessionState::Closed => Vec::new(),
        }
    }

    /// Mark the session closed and cancel all timers, for transport-driven
    /// shutdown (the peer disconnected, or the acceptor is shutting down).
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.ping_due = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Clone)]
    struct TestEnv {
        next: std::cell::Cell<u64>,
    }

    impl Environment for TestEnv {
        type Instant = Instant;
        fn now(&self) -> Instant {
            Instant::now()
        }
        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }
        fn random_bytes(&self, buffer: &mut [u8]) {
            let v = self.next.get();
            self.next.set(v.wrapping_add(1));
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = ((v >> (i % 8 * 8)) & 0xFF) as u8;
            }
        }
        fn wall_clock_secs(&self) -> u64 {
            1_700_000_000
        }
    }

    fn env() -> TestEnv {
        TestEnv { next: std::cell::Cell::new(7) }
    }

    #[test]
    fn signon_timeout_closes_connected_session() {
        let e = env();
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, Dialect::Binary, "irc");
        let actions = conn.tick(&e, t0 + SIGNON_TIMEOUT);
        assert_eq!(conn.state(), SessionState::Closed);
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[1], SessionAction::Close));
    }

    #[test]
    fn registration_arms_a_ping_within_the_jitter_window() {
        let e = env();
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, Dialect::Binary, "irc");
        conn.enter_registered(&e, t0).unwrap();
        assert_eq!(conn.state(), SessionState::Registered);

        // No ping yet below the minimum jitter bound.
        assert!(conn.tick(&e, t0 + Duration::from_secs(44)).is_empty());

        let actions = conn.tick(&e, t0 + Duration::from_secs(60));
        assert_eq!(actions.len(), 1);
        assert!(conn.pending_ping());
    }

    #[test]
    fn unanswered_ping_times_out_the_session() {
        let e = env();
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, Dialect::Binary, "irc");
        conn.enter_registered(&e, t0).unwrap();
        let first = conn.tick(&e, t0 + Duration::from_secs(60));
        assert_eq!(first.len(), 1);

        let second = conn.tick(&e, t0 + Duration::from_secs(120));
        assert_eq!(second.len(), 2);
        assert_eq!(conn.state(), SessionState::Closed);
    }

    #[test]
    fn pong_clears_pending_flag_before_next_timeout() {
        let e = env();
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, Dialect::Binary, "irc");
        conn.enter_registered(&e, t0).unwrap();
        conn.tick(&e, t0 + Duration::from_secs(60));
        assert!(conn.pending_ping());
        conn.handle_pong();
        assert!(!conn.pending_ping());
    }

    #[test]
    fn ingest_buffers_a_partial_trailing_frame() {
        let e = env();
        let _ = e;
        let mut conn = Connection::new(Instant::now(), Dialect::Binary, "irc");
        let mut kval = KVal::new();
        kval.insert("handle".to_string(), vec!["alice".to_string()]);
        let frame = Frame::new("alice", "*", "signon", kval);
        let bytes = dcp_proto::binary::encode(&frame).unwrap();

        let outcome = conn.ingest(&bytes[..bytes.len() - 1]);
        assert!(outcome.frames.is_empty());

        let outcome = conn.ingest(&bytes[bytes.len() - 1..]);
        assert_eq!(outcome.frames, vec![frame]);
    }

    #[test]
    fn ingest_reports_and_recovers_from_a_malformed_frame() {
        let mut conn = Connection::new(Instant::now(), Dialect::Binary, "irc");
        let mut buf = 1500u16.to_be_bytes().to_vec();
        buf.push(0);
        let outcome = conn.ingest(&buf);
        assert!(outcome.frames.is_empty());
        assert_eq!(outcome.actions.len(), 1);
    }
}
