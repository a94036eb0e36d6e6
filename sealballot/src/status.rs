use crate::*;
use num_enum::TryFromPrimitive;

/// Where a vote is in its lifecycle.
///
/// ```text
/// Submitted ──▶ CoApproved ──▶ DeCounted
///     │              │
///     ▼              ▼
/// CoRejected     DeRejected
/// ```
#[derive(Serialize, Deserialize, TryFromPrimitive, Copy, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum VoteStatus {
    Submitted = 1,
    CoApproved = 2,
    CoRejected = 3,
    DeCounted = 4,
    DeRejected = 5,
}

/// Every legal edge of the vote state machine
pub const TRANSITIONS: &[(VoteStatus, VoteStatus)] = &[
    (VoteStatus::Submitted, VoteStatus::CoApproved),
    (VoteStatus::Submitted, VoteStatus::CoRejected),
    (VoteStatus::CoApproved, VoteStatus::DeCounted),
    (VoteStatus::CoApproved, VoteStatus::DeRejected),
];

impl VoteStatus {
    pub const ALL: [VoteStatus; 5] = [
        VoteStatus::Submitted,
        VoteStatus::CoApproved,
        VoteStatus::CoRejected,
        VoteStatus::DeCounted,
        VoteStatus::DeRejected,
    ];

    pub fn can_transition_to(self, next: VoteStatus) -> bool {
        use VoteStatus::*;
        match self {
            Submitted => matches!(next, CoApproved | CoRejected),
            CoApproved => matches!(next, DeCounted | DeRejected),
            CoRejected | DeCounted | DeRejected => false,
        }
    }

    /// Validate a move, returning the new status
    pub fn transition(self, next: VoteStatus) -> Result<VoteStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidState {
                current: self,
                attempted: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        VoteStatus::ALL
            .iter()
            .all(|next| !self.can_transition_to(*next))
    }

    pub fn name(&self) -> &'static str {
        match self {
            VoteStatus::Submitted => "submitted",
            VoteStatus::CoApproved => "co_approved",
            VoteStatus::CoRejected => "co_rejected",
            VoteStatus::DeCounted => "de_counted",
            VoteStatus::DeRejected => "de_rejected",
        }
    }
}

impl std::fmt::Display for VoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn table_matches_transition_function() {
        for from in VoteStatus::ALL.iter() {
            for to in VoteStatus::ALL.iter() {
                let listed = TRANSITIONS.contains(&(*from, *to));
                assert_eq!(listed, from.can_transition_to(*to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!VoteStatus::Submitted.is_terminal());
        assert!(!VoteStatus::CoApproved.is_terminal());
        assert!(VoteStatus::CoRejected.is_terminal());
        assert!(VoteStatus::DeCounted.is_terminal());
        assert!(VoteStatus::DeRejected.is_terminal());
    }

    #[test]
    fn invalid_transition_reports_current_state() {
        let err = VoteStatus::DeCounted
            .transition(VoteStatus::DeCounted)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                current: VoteStatus::DeCounted,
                attempted: VoteStatus::DeCounted
            }
        ));
        assert!(VoteStatus::Submitted.transition(VoteStatus::DeCounted).is_err());
    }

    #[test]
    fn repr_and_serde() {
        assert_eq!(VoteStatus::try_from(2u8).unwrap(), VoteStatus::CoApproved);
        assert!(VoteStatus::try_from(9u8).is_err());
        assert_eq!(
            serde_json::to_string(&VoteStatus::DeRejected).unwrap(),
            "\"de_rejected\""
        );
    }
}
