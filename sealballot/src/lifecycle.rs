//! The vote state machine.
//!
//! A vote is submitted as two sealed envelopes. The Counting Office opens
//! the identity envelope (M1) and approves or rejects the voter; on approval
//! the linking id read from M1 is stored on the vote. The Decryption Entity
//! then opens the ballot envelope (M2) and counts it only if the linking id
//! it reads there matches the stored one.
//!
//! Transitions on one vote are serialized by a per-vote lock and committed
//! with a compare-and-swap on the stored status. A failed decryption or
//! schema check leaves the vote where it was.

use crate::notify::deliver;
use crate::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const RECEIPT_ATTEMPTS: usize = 3;

/// What the Counting Office decided
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CoAction {
    Approve,
    Reject,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CoDecision {
    pub action: CoAction,

    #[serde(default)]
    pub notes: Option<String>,
}

impl CoDecision {
    pub fn approve() -> Self {
        CoDecision {
            action: CoAction::Approve,
            notes: None,
        }
    }

    pub fn reject() -> Self {
        CoDecision {
            action: CoAction::Reject,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    fn target(&self) -> VoteStatus {
        match self.action {
            CoAction::Approve => VoteStatus::CoApproved,
            CoAction::Reject => VoteStatus::CoRejected,
        }
    }
}

/// A vote awaiting Counting Office review
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CoPendingVote {
    pub id: Uuid,
    pub election: Uuid,
    pub voter: Uuid,
    pub m1_identity: String,
    pub unique_id: String,
    pub submitted_at: u64,
}

/// A vote awaiting decryption. Deliberately has no voter field.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DePendingVote {
    pub id: Uuid,
    pub election: Uuid,
    pub m2_ballot: String,
    pub unique_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VotingStatus {
    pub election: Uuid,
    pub is_assigned: bool,
    pub has_voted: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidateCount {
    pub candidate_id: String,
    pub count: u64,
}

/// Counted ballots per candidate, most votes first
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    pub election: Uuid,
    pub results: Vec<CandidateCount>,
    pub total_counted: u64,
}

/// Drives votes from submission to counting
#[derive(Clone)]
pub struct VoteLifecycle {
    config: Config,
    store: Arc<dyn Store>,
    elections: Arc<dyn ElectionDirectory>,
    candidates: Arc<dyn CandidateDirectory>,
    notifier: Arc<dyn Notifier>,
    keys: KeyPairService,
    envelopes: EnvelopeCrypto,
    receipts: ReceiptService,
    locks: Arc<KeyedLocks<Uuid>>,
}

impl VoteLifecycle {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        elections: Arc<dyn ElectionDirectory>,
        candidates: Arc<dyn CandidateDirectory>,
    ) -> Self {
        Self::with_backend(config, store, elections, candidates, Arc::new(EciesBackend))
    }

    pub fn with_backend(
        config: Config,
        store: Arc<dyn Store>,
        elections: Arc<dyn ElectionDirectory>,
        candidates: Arc<dyn CandidateDirectory>,
        backend: Arc<dyn EnvelopeBackend>,
    ) -> Self {
        VoteLifecycle {
            keys: KeyPairService::new(store.clone(), elections.clone(), backend.clone()),
            envelopes: EnvelopeCrypto::new(backend, &config),
            receipts: ReceiptService::new(&config),
            notifier: Arc::new(LogNotifier),
            locks: Arc::new(KeyedLocks::default()),
            config,
            store,
            elections,
            candidates,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn keys(&self) -> &KeyPairService {
        &self.keys
    }

    pub fn envelopes(&self) -> &EnvelopeCrypto {
        &self.envelopes
    }

    /// Called by the authentication layer once `voter` holds a credential
    /// for `election`. Only fires the notification.
    pub fn credential_issued(&self, election: Uuid, voter: Uuid) -> Result<()> {
        if !self.elections.is_assigned(election, voter)? {
            return Err(Error::NotAssigned { election, voter });
        }
        deliver(
            "credential_issued",
            voter,
            self.notifier.credential_issued(election, voter),
        );
        Ok(())
    }

    /// Accept a voter's sealed envelopes.
    ///
    /// Creating the vote, marking the voter as voted and storing the receipt
    /// happen in one store call. Nothing is retried on the caller's behalf
    /// except a receipt code collision.
    #[instrument(skip(self, actor, submission), fields(voter = %actor.id, election = %submission.election))]
    pub fn submit(&self, actor: &Actor, submission: Submission) -> Result<SubmissionReceipt> {
        actor.require(Permission::SubmitVote)?;
        validate_unique_id(&submission.unique_id, self.config.max_unique_id_len)?;

        let election = submission.election;
        if !self.elections.is_open(election)? {
            return Err(Error::ElectionNotOpen(election));
        }
        if !self.elections.is_assigned(election, actor.id)? {
            return Err(Error::NotAssigned {
                election,
                voter: actor.id,
            });
        }
        if self.elections.has_voted(election, actor.id)? {
            return Err(Error::AlreadyVoted {
                election,
                voter: actor.id,
            });
        }

        let co = self.keys.existing(Authority::CountingOffice, election)?;
        let de = self.keys.existing(Authority::DecryptionEntity, election)?;
        EnvelopeCrypto::check_recipient(&submission.m1_identity, &co.fingerprint).map_err(|_| {
            Error::Schema("m1_identity is not an envelope for this election's CO key".into())
        })?;
        EnvelopeCrypto::check_recipient(&submission.m2_ballot, &de.fingerprint).map_err(|_| {
            Error::Schema("m2_ballot is not an envelope for this election's DE key".into())
        })?;

        let vote = Vote::new(actor.id, submission);
        let mut attempts = 0;
        let receipt = loop {
            attempts += 1;
            let receipt = self.receipts.issue(&vote)?;
            match self.store.record_submission(vote.clone(), receipt.clone()) {
                Ok(()) => break receipt,
                Err(Error::ReceiptCollision) if attempts < RECEIPT_ATTEMPTS => {
                    warn!(attempts, "receipt code collision, reissuing");
                }
                Err(e) => return Err(e),
            }
        };

        info!(vote = %vote.id, "vote submitted");
        deliver(
            "pending_validation",
            vote.id,
            self.notifier.pending_validation(&vote),
        );

        Ok(SubmissionReceipt {
            vote_id: vote.id,
            receipt_code: receipt.receipt_code,
            unique_id: vote.unique_id,
        })
    }

    /// Counting Office review of a submitted vote.
    ///
    /// Approval opens M1 and stores its linking id. Rejection opens nothing.
    #[instrument(skip(self, actor, decision), fields(actor = %actor.id, action = ?decision.action))]
    pub async fn co_decide(
        &self,
        vote_id: Uuid,
        actor: &Actor,
        decision: CoDecision,
    ) -> Result<Vote> {
        actor.require(Permission::ReviewIdentity)?;
        let _guard = self.locks.lock(vote_id).await;

        let vote = self.store.vote(vote_id)?;
        let target = decision.target();
        let current = vote.status;
        current.transition(target)?;

        let mut updated = vote.clone();
        if decision.action == CoAction::Approve {
            let key = self.keys.existing(Authority::CountingOffice, vote.election)?;
            let plaintext = self.envelopes.decrypt(&vote.m1_identity, &key).await?;
            let identity = IdentityPayload::parse(&plaintext)?;
            updated.linking_id = Some(extract_linking_id(&identity)?);
        }

        updated.status = target;
        updated.co_decided_by = Some(actor.id);
        updated.co_decided_at = Some(unix_now());
        updated.co_notes = decision.notes;
        self.store.update_vote(&updated, current)?;

        info!(election = %updated.election, status = %updated.status, "CO decision recorded");
        Ok(updated)
    }

    /// Decryption Entity processing of an approved vote.
    ///
    /// Counts the ballot only if M2's linking id equals the one the CO
    /// stored. A mismatch moves the vote to `DeRejected`, raises an
    /// integrity alert and returns `LinkingMismatch`.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn de_decide(&self, vote_id: Uuid, actor: &Actor) -> Result<DecryptedBallot> {
        actor.require(Permission::CountBallot)?;
        let _guard = self.locks.lock(vote_id).await;

        let vote = self.store.vote(vote_id)?;
        let current = vote.status;
        current.transition(VoteStatus::DeCounted)?;

        let co_linking = vote
            .linking_id
            .clone()
            .ok_or_else(|| Error::Storage(format!("approved vote {} has no linking id", vote.id)))?;

        let key = self.keys.existing(Authority::DecryptionEntity, vote.election)?;
        let plaintext = self.envelopes.decrypt(&vote.m2_ballot, &key).await?;
        let payload = BallotPayload::parse(&plaintext)?;
        let de_linking = extract_linking_id(&payload)?;

        let mut updated = vote.clone();
        updated.de_decided_by = Some(actor.id);
        updated.de_decided_at = Some(unix_now());

        if !verify_match(&co_linking, &de_linking) {
            updated.status = current.transition(VoteStatus::DeRejected)?;
            self.store.update_vote(&updated, current)?;

            error!(
                target: "sealballot::audit",
                vote = %vote.id,
                election = %vote.election,
                actor = %actor.id,
                "linking id mismatch, vote rejected"
            );
            deliver(
                "integrity_alert",
                vote.id,
                self.notifier.integrity_alert(&updated),
            );
            return Err(Error::LinkingMismatch(vote.id));
        }

        let candidate_id = payload.candidate_id()?;
        if !self.candidates.candidate_exists(vote.election, &candidate_id)? {
            return Err(Error::CandidateNotFound(candidate_id));
        }

        let ballot = DecryptedBallot {
            id: Uuid::new_v4(),
            election: vote.election,
            candidate_id,
            unique_id: vote.unique_id.clone(),
            decrypted_by: actor.id,
            decrypted_at: unix_now(),
        };
        updated.status = VoteStatus::DeCounted;
        self.store.record_count(&updated, current, ballot.clone())?;

        info!(election = %ballot.election, "ballot counted");
        deliver(
            "ballot_counted",
            ballot.id,
            self.notifier.ballot_counted(&ballot),
        );
        Ok(ballot)
    }

    /// Submitted votes waiting for Counting Office review, oldest first
    pub fn pending_for_co(
        &self,
        actor: &Actor,
        election: Option<Uuid>,
    ) -> Result<Vec<CoPendingVote>> {
        actor.require(Permission::ReviewIdentity)?;
        let votes = self.store.votes_with_status(VoteStatus::Submitted, election)?;

        Ok(votes
            .into_iter()
            .map(|v| CoPendingVote {
                id: v.id,
                election: v.election,
                voter: v.voter,
                m1_identity: v.m1_identity,
                unique_id: v.unique_id,
                submitted_at: v.submitted_at,
            })
            .collect())
    }

    /// Approved votes waiting for decryption. Voter references are stripped.
    pub fn pending_for_de(
        &self,
        actor: &Actor,
        election: Option<Uuid>,
    ) -> Result<Vec<DePendingVote>> {
        actor.require(Permission::CountBallot)?;
        let votes = self
            .store
            .votes_with_status(VoteStatus::CoApproved, election)?;

        Ok(votes
            .into_iter()
            .map(|v| DePendingVote {
                id: v.id,
                election: v.election,
                m2_ballot: v.m2_ballot,
                unique_id: v.unique_id,
            })
            .collect())
    }

    pub fn voting_status(&self, actor: &Actor, election: Uuid) -> Result<VotingStatus> {
        actor.require(Permission::ViewVotingStatus)?;
        Ok(VotingStatus {
            election,
            is_assigned: self.elections.is_assigned(election, actor.id)?,
            has_voted: self.elections.has_voted(election, actor.id)?,
        })
    }

    /// Count decrypted ballots per candidate
    pub fn tally(&self, actor: &Actor, election: Uuid) -> Result<Tally> {
        actor.require(Permission::ViewTally)?;

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for ballot in self.store.ballots(election)? {
            *counts.entry(ballot.candidate_id).or_insert(0) += 1;
        }
        let total_counted = counts.values().sum();

        let mut results: Vec<CandidateCount> = counts
            .into_iter()
            .map(|(candidate_id, count)| CandidateCount {
                candidate_id,
                count,
            })
            .collect();
        // BTreeMap order already sorts ties by candidate id
        results.sort_by(|a, b| b.count.cmp(&a.count));

        Ok(Tally {
            election,
            results,
            total_counted,
        })
    }

    pub fn verify_receipt(&self, actor: &Actor, code: &str) -> Result<ReceiptStatus> {
        self.receipts.verify(self.store.as_ref(), actor, code)
    }
}
