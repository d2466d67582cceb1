//! Connection state machine shared by the client and server roles.
//!
//! ```text
//! Connecting -> Ready -> AwaitingRequest <-> ProcessingRequest -> Closed
//! ```
//!
//! Any state may move to `Closed` (timeout, reset, explicit CLOSE).

use crate::error::{Error, Result};
use crate::protocol::{Method, Request};
use std::net::SocketAddr;

/// Current phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Transport is being established or the greeting is in flight.
    Connecting,
    /// Greeting exchanged.
    Ready,
    /// Waiting for the next request line.
    AwaitingRequest,
    /// A GET or POST exchange is in progress.
    ProcessingRequest(Method),
    /// Terminal.
    Closed,
}

impl ConnState {
    fn can_move_to(self, next: ConnState) -> bool {
        use ConnState::*;
        match (self, next) {
            (_, Closed) => self != Closed,
            (Connecting, Ready) => true,
            (Ready, AwaitingRequest) => true,
            (AwaitingRequest, ProcessingRequest(Method::Get | Method::Post)) => true,
            (ProcessingRequest(_), AwaitingRequest) => true,
            _ => false,
        }
    }
}

/// Which end of the connection this session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// One connection's position in the request/response cycle.
#[derive(Debug)]
pub struct Session {
    role: Role,
    peer: SocketAddr,
    state: ConnState,
    requests: u64,
}

impl Session {
    pub fn new(role: Role, peer: SocketAddr) -> Self {
        Self {
            role,
            peer,
            state: ConnState::Connecting,
            requests: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Number of GET/POST exchanges started on this connection.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    fn transition(&mut self, next: ConnState) -> Result<()> {
        if !self.state.can_move_to(next) {
            return Err(Error::Protocol(format!(
                "{:?} session cannot move from {:?} to {:?}",
                self.role, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Greeting sent (server) or consumed (client).
    pub fn ready(&mut self) -> Result<()> {
        self.transition(ConnState::Ready)
    }

    /// Enter the request loop, or return to it after an exchange.
    pub fn await_request(&mut self) -> Result<()> {
        self.transition(ConnState::AwaitingRequest)
    }

    /// Start handling a request; a CLOSE request ends the session.
    pub fn begin(&mut self, request: &Request) -> Result<ConnState> {
        let next = match request.method {
            Method::Close => ConnState::Closed,
            method => ConnState::ProcessingRequest(method),
        };
        if self.state != ConnState::AwaitingRequest {
            return Err(Error::Protocol(format!(
                "request {} received while {:?}",
                request.method, self.state
            )));
        }
        self.transition(next)?;
        if next != ConnState::Closed {
            self.requests += 1;
        }
        Ok(next)
    }

    /// Finish the current exchange.
    pub fn complete(&mut self) -> Result<()> {
        self.await_request()
    }

    /// Move to `Closed`; closing twice is a no-op.
    pub fn close(&mut self) {
        self.state = ConnState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn test_full_cycle() {
        let mut session = Session::new(Role::Server, peer());
        assert_eq!(session.state(), ConnState::Connecting);

        session.ready().unwrap();
        session.await_request().unwrap();

        let get = Request::new(Method::Get, "a.txt");
        assert_eq!(
            session.begin(&get).unwrap(),
            ConnState::ProcessingRequest(Method::Get)
        );
        session.complete().unwrap();

        let post = Request::new(Method::Post, "b.txt");
        session.begin(&post).unwrap();
        session.complete().unwrap();
        assert_eq!(session.requests(), 2);

        let close = Request::new(Method::Close, "");
        assert_eq!(session.begin(&close).unwrap(), ConnState::Closed);
        assert!(session.is_closed());
        assert_eq!(session.requests(), 2);
    }

    #[test]
    fn test_request_before_ready_rejected() {
        let mut session = Session::new(Role::Client, peer());
        let get = Request::new(Method::Get, "a.txt");
        assert!(matches!(session.begin(&get), Err(Error::Protocol(_))));
        assert_eq!(session.state(), ConnState::Connecting);
    }

    #[test]
    fn test_no_pipelining() {
        let mut session = Session::new(Role::Server, peer());
        session.ready().unwrap();
        session.await_request().unwrap();
        session.begin(&Request::new(Method::Get, "a")).unwrap();
        assert!(session.begin(&Request::new(Method::Get, "b")).is_err());
    }

    #[test]
    fn test_close_from_any_state() {
        let mut session = Session::new(Role::Server, peer());
        session.close();
        assert!(session.is_closed());
        assert!(session.ready().is_err());

        // Idempotent
        session.close();
        assert!(session.is_closed());
    }
}
