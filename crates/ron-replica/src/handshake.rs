//! Connection handshake
//!
//! Every stream starts unauthenticated. The first frame must be a
//! handshake op addressed to this database; its event field carries
//! either a zero-valued stamp ("I have no identity yet", requesting a
//! fresh session grant) or an existing session identifier, which must lie
//! inside the accepting replica's namespace subtree. Anything else is
//! rejected with a verbatim reason string — the reason strings are part
//! of the observable wire contract and must not be reworded.

use ron_wire::atom::Atom;
use ron_wire::frame::Frame;
use ron_wire::op::{Op, Term};
use ron_wire::uuid::Uuid;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The well-known handshake type name.
pub const HANDSHAKE_TYPE: &str = "db";

/// Rejection reasons. Exact strings, tested by the scenario suite.
pub const WRONG_DB: &str = "wrong database id";
pub const WRONG_SUBTREE: &str = "wrong ssn (wrong subtree)";
pub const NO_HANDSHAKE: &str = "no handshake";

/// Connection lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Unauthenticated,
    AwaitingHandshake,
    Accepted(Uuid),
    Rejected(String),
}

/// The outcome of processing one handshake frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Session granted or validated; the response frame echoes the
    /// session identifier.
    Accepted { session: Uuid, response: Frame },
    /// Rejected with a reason; the response is an error op and the
    /// stream must be terminated.
    Rejected { reason: String, response: Frame },
}

impl HandshakeOutcome {
    pub fn response(&self) -> &Frame {
        match self {
            HandshakeOutcome::Accepted { response, .. } => response,
            HandshakeOutcome::Rejected { response, .. } => response,
        }
    }
}

/// Grants and validates session identifiers for one database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRegistry {
    db_id: String,
    origin: String,
    granted: u64,
}

impl SessionRegistry {
    /// `db_id` names the database; `origin` is this replica's own origin
    /// word, the root of the namespace subtree it may grant from.
    pub fn new(db_id: impl Into<String>, origin: impl Into<String>) -> SessionRegistry {
        SessionRegistry {
            db_id: db_id.into(),
            origin: origin.into(),
            granted: 0,
        }
    }

    pub fn db_id(&self) -> &str {
        &self.db_id
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Process the first frame of a stream.
    pub fn process(&mut self, frame: &Frame) -> HandshakeOutcome {
        let op = match frame.first_op() {
            Some(op) => op,
            None => return self.reject(&Op::zero(), NO_HANDSHAKE),
        };

        if op.ty() != &Uuid::name(HANDSHAKE_TYPE) {
            return self.reject(&op, NO_HANDSHAKE);
        }
        if op.object() != &Uuid::name(&self.db_id) {
            return self.reject(&op, WRONG_DB);
        }

        let claimed = op.event();
        let session = if claimed.has_zero_value() {
            // Fresh stream: grant the next identifier in our subtree.
            self.grant()
        } else if self.in_subtree(claimed.origin()) {
            claimed.clone()
        } else {
            return self.reject(&op, WRONG_SUBTREE);
        };

        debug!(session = %session, db = %self.db_id, "handshake accepted");
        let response = Op::new(
            Uuid::name(HANDSHAKE_TYPE),
            Uuid::name(&self.db_id),
            session.clone(),
            Uuid::zero(),
            &[],
            Term::Header,
        );
        HandshakeOutcome::Accepted {
            session,
            response: Frame::of(&response),
        }
    }

    /// A downstream's claimed origin must extend this replica's origin
    /// word — children live strictly below their parent in the
    /// namespace.
    fn in_subtree(&self, claimed_origin: &str) -> bool {
        claimed_origin.starts_with(&self.origin) && claimed_origin != self.origin
    }

    fn grant(&mut self) -> Uuid {
        self.granted += 1;
        let suffix = ron_wire::base64::int2base(self.granted, 1).unwrap_or_default();
        Uuid::event("0", &format!("{}{}", self.origin, suffix))
    }

    fn reject(&self, op: &Op, reason: &str) -> HandshakeOutcome {
        debug!(reason = reason, db = %self.db_id, "handshake rejected");
        let mut error = op.error_op(reason);
        if op.ty() != &Uuid::name(HANDSHAKE_TYPE) {
            // Keep the response addressed to the handshake channel even
            // when the offending op was something else entirely.
            error = Op::new(
                Uuid::name(HANDSHAKE_TYPE),
                Uuid::name(&self.db_id),
                Uuid::error(),
                Uuid::zero(),
                &[Atom::String(reason.to_string())],
                Term::Raw,
            );
        }
        HandshakeOutcome::Rejected {
            reason: reason.to_string(),
            response: Frame::of(&error),
        }
    }
}
