//! Who wrote a snapshot, and what that means for the local object
//!
//! The apply-or-ignore decision is a pure function of the snapshot's origin
//! and whether the object already completed its first sync.

use roomsync_api::{SenderId, TransformSnapshot};

/// Origin of a received snapshot relative to this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Written by this session (an echo of our own save)
    Local,
    /// Written by another client
    Remote(SenderId),
}

impl Origin {
    pub fn of(snapshot: &TransformSnapshot, local: &SenderId) -> Self {
        if snapshot.sender_id == *local {
            Origin::Local
        } else {
            Origin::Remote(snapshot.sender_id.clone())
        }
    }
}

/// What to do with a received snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// First state for this object, whoever wrote it: apply and mark the
    /// object initialized, without a latency sample
    Initialize,
    /// A peer moved an initialized object: apply and sample latency
    ApplyRemote,
    /// Our own write echoed back after initialization: leave the object alone
    IgnoreEcho,
}

impl Decision {
    pub fn applies(self) -> bool {
        !matches!(self, Decision::IgnoreEcho)
    }
}

pub fn decide(origin: &Origin, initialized: bool) -> Decision {
    match (initialized, origin) {
        (false, _) => Decision::Initialize,
        (true, Origin::Remote(_)) => Decision::ApplyRemote,
        (true, Origin::Local) => Decision::IgnoreEcho,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomsync_api::Transform;

    fn snapshot_from(sender: &str) -> TransformSnapshot {
        TransformSnapshot::new(Transform::default(), SenderId::new(sender), 0, None)
    }

    #[test]
    fn test_origin_compares_sender_ids() {
        let me = SenderId::new("user5");
        assert_eq!(Origin::of(&snapshot_from("user5"), &me), Origin::Local);
        assert_eq!(
            Origin::of(&snapshot_from("user6"), &me),
            Origin::Remote(SenderId::new("user6"))
        );
    }

    #[test]
    fn test_decision_table() {
        let peer = Origin::Remote(SenderId::new("user9"));

        assert_eq!(decide(&Origin::Local, false), Decision::Initialize);
        assert_eq!(decide(&peer, false), Decision::Initialize);
        assert_eq!(decide(&peer, true), Decision::ApplyRemote);
        assert_eq!(decide(&Origin::Local, true), Decision::IgnoreEcho);

        assert!(!decide(&Origin::Local, true).applies());
        assert!(decide(&Origin::Local, false).applies());
    }
}
