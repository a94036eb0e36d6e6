use crate::*;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outbound hooks fired by the vote lifecycle.
///
/// Failures are logged and never abort the transition that fired them.
pub trait Notifier: Send + Sync {
    /// The authentication layer issued `voter` a credential for `election`
    fn credential_issued(&self, election: Uuid, voter: Uuid) -> Result<()>;

    /// A vote is waiting for Counting Office review
    fn pending_validation(&self, vote: &Vote) -> Result<()>;

    /// A ballot was counted
    fn ballot_counted(&self, ballot: &DecryptedBallot) -> Result<()>;

    /// The linking check failed on `vote`
    fn integrity_alert(&self, vote: &Vote) -> Result<()>;
}

/// Emits each notification as a `tracing` event
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn credential_issued(&self, election: Uuid, voter: Uuid) -> Result<()> {
        info!(%voter, %election, "voting credential issued");
        Ok(())
    }

    fn pending_validation(&self, vote: &Vote) -> Result<()> {
        info!(vote = %vote.id, election = %vote.election, "vote pending CO validation");
        Ok(())
    }

    fn ballot_counted(&self, ballot: &DecryptedBallot) -> Result<()> {
        info!(election = %ballot.election, unique_id = %ballot.unique_id, "ballot counted");
        Ok(())
    }

    fn integrity_alert(&self, vote: &Vote) -> Result<()> {
        error!(
            target: "sealballot::audit",
            vote = %vote.id,
            election = %vote.election,
            "integrity alert raised"
        );
        Ok(())
    }
}

pub(crate) fn deliver(hook: &'static str, vote: Uuid, result: Result<()>) {
    if let Err(e) = result {
        warn!(hook, %vote, error = %e, "notification failed");
    }
}
