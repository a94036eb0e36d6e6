use crate::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Persistence for keys, votes, ballots and receipts.
///
/// Every method that changes more than one record does so atomically: an
/// error means nothing was written.
pub trait Store: Send + Sync {
    /// Key pair for (election, authority), if generated
    fn key_material(
        &self,
        election: Uuid,
        authority: Authority,
    ) -> Result<Option<Arc<ElectionKeyMaterial>>>;

    /// Persist a key pair unless one already exists, returning whichever
    /// pair is stored afterwards.
    ///
    /// Fails with `KeyMaterialRevoked` once the election's keys were removed.
    fn insert_key_material(&self, material: ElectionKeyMaterial)
        -> Result<Arc<ElectionKeyMaterial>>;

    /// Destroy every key pair of an election and remember that it was
    /// revoked, returning how many pairs were removed
    fn remove_key_material(&self, election: Uuid) -> Result<usize>;

    fn is_revoked(&self, election: Uuid) -> Result<bool>;

    fn vote(&self, id: Uuid) -> Result<Vote>;

    /// Votes in `status`, oldest first, optionally limited to one election
    fn votes_with_status(&self, status: VoteStatus, election: Option<Uuid>) -> Result<Vec<Vote>>;

    /// Create a vote, mark its voter as having voted and store its receipt.
    ///
    /// Fails with `AlreadyVoted`, `DuplicateUniqueId` or `ReceiptCollision`.
    fn record_submission(&self, vote: Vote, receipt: VoteReceipt) -> Result<()>;

    /// Replace a vote if its stored status is still `expected`
    fn update_vote(&self, vote: &Vote, expected: VoteStatus) -> Result<()>;

    /// Replace a vote and create its ballot, if its stored status is still
    /// `expected`
    fn record_count(&self, vote: &Vote, expected: VoteStatus, ballot: DecryptedBallot)
        -> Result<()>;

    fn ballots(&self, election: Uuid) -> Result<Vec<DecryptedBallot>>;

    fn receipt(&self, code: &str) -> Result<VoteReceipt>;
}

/// Election state owned outside this crate
pub trait ElectionDirectory: Send + Sync {
    fn is_open(&self, election: Uuid) -> Result<bool>;

    fn is_assigned(&self, election: Uuid, voter: Uuid) -> Result<bool>;

    fn has_voted(&self, election: Uuid, voter: Uuid) -> Result<bool>;
}

/// Candidate lists owned outside this crate
pub trait CandidateDirectory: Send + Sync {
    fn candidate_exists(&self, election: Uuid, candidate: &str) -> Result<bool>;
}

#[derive(Default)]
struct ElectionRecord {
    open: bool,
    voters: BTreeSet<Uuid>,
    candidates: BTreeSet<String>,
}

#[derive(Default)]
struct Inner {
    keys: BTreeMap<(Uuid, Authority), Arc<ElectionKeyMaterial>>,
    revoked: BTreeSet<Uuid>,
    elections: BTreeMap<Uuid, ElectionRecord>,
    votes: BTreeMap<Uuid, Vote>,
    voted: BTreeSet<(Uuid, Uuid)>,
    unique_ids: BTreeSet<String>,
    ballots: BTreeMap<Uuid, DecryptedBallot>,
    receipts: BTreeMap<String, VoteReceipt>,
}

impl Inner {
    fn compare_and_set(&mut self, vote: &Vote, expected: VoteStatus) -> Result<()> {
        let stored = self
            .votes
            .get_mut(&vote.id)
            .ok_or(Error::VoteNotFound(vote.id))?;
        if stored.status != expected {
            return Err(Error::InvalidState {
                current: stored.status,
                attempted: vote.status,
            });
        }
        *stored = vote.clone();
        Ok(())
    }
}

/// A simple store that keeps everything in in-memory BTreeMaps.
///
/// Also acts as the election and candidate directory, which makes it
/// enough to drive the whole pipeline in tests.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Storage("memstore lock poisoned".into()))
    }

    fn admin(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open_election(&self, election: Uuid) {
        self.admin().elections.entry(election).or_default().open = true;
    }

    pub fn close_election(&self, election: Uuid) {
        self.admin().elections.entry(election).or_default().open = false;
    }

    pub fn assign_voter(&self, election: Uuid, voter: Uuid) {
        self.admin()
            .elections
            .entry(election)
            .or_default()
            .voters
            .insert(voter);
    }

    pub fn add_candidate(&self, election: Uuid, candidate: &str) {
        self.admin()
            .elections
            .entry(election)
            .or_default()
            .candidates
            .insert(candidate.to_owned());
    }

    pub fn key_material_count(&self) -> usize {
        self.admin().keys.len()
    }

    pub fn vote_count(&self) -> usize {
        self.admin().votes.len()
    }

    pub fn ballot_count(&self) -> usize {
        self.admin().ballots.len()
    }
}

impl Store for MemStore {
    fn key_material(
        &self,
        election: Uuid,
        authority: Authority,
    ) -> Result<Option<Arc<ElectionKeyMaterial>>> {
        Ok(self.lock()?.keys.get(&(election, authority)).cloned())
    }

    fn insert_key_material(
        &self,
        material: ElectionKeyMaterial,
    ) -> Result<Arc<ElectionKeyMaterial>> {
        let mut inner = self.lock()?;
        if inner.revoked.contains(&material.election) {
            return Err(Error::KeyMaterialRevoked(material.election));
        }
        let stored = inner
            .keys
            .entry((material.election, material.authority))
            .or_insert_with(|| Arc::new(material));
        Ok(stored.clone())
    }

    fn remove_key_material(&self, election: Uuid) -> Result<usize> {
        let mut inner = self.lock()?;
        let before = inner.keys.len();
        inner.keys.retain(|(e, _), _| *e != election);
        inner.revoked.insert(election);
        Ok(before - inner.keys.len())
    }

    fn is_revoked(&self, election: Uuid) -> Result<bool> {
        Ok(self.lock()?.revoked.contains(&election))
    }

    fn vote(&self, id: Uuid) -> Result<Vote> {
        self.lock()?
            .votes
            .get(&id)
            .cloned()
            .ok_or(Error::VoteNotFound(id))
    }

    fn votes_with_status(&self, status: VoteStatus, election: Option<Uuid>) -> Result<Vec<Vote>> {
        let inner = self.lock()?;
        let mut votes: Vec<Vote> = inner
            .votes
            .values()
            .filter(|v| v.status == status)
            .filter(|v| election.map_or(true, |e| v.election == e))
            .cloned()
            .collect();
        votes.sort_by_key(|v| v.submitted_at);
        Ok(votes)
    }

    fn record_submission(&self, vote: Vote, receipt: VoteReceipt) -> Result<()> {
        let mut inner = self.lock()?;

        let voter_key = (vote.election, vote.voter);
        if inner.voted.contains(&voter_key) {
            return Err(Error::AlreadyVoted {
                election: vote.election,
                voter: vote.voter,
            });
        }
        if inner.unique_ids.contains(&vote.unique_id) {
            return Err(Error::DuplicateUniqueId);
        }
        if inner.receipts.contains_key(&receipt.receipt_code) {
            return Err(Error::ReceiptCollision);
        }

        inner.voted.insert(voter_key);
        inner.unique_ids.insert(vote.unique_id.clone());
        inner.receipts.insert(receipt.receipt_code.clone(), receipt);
        inner.votes.insert(vote.id, vote);
        Ok(())
    }

    fn update_vote(&self, vote: &Vote, expected: VoteStatus) -> Result<()> {
        self.lock()?.compare_and_set(vote, expected)
    }

    fn record_count(
        &self,
        vote: &Vote,
        expected: VoteStatus,
        ballot: DecryptedBallot,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        if inner
            .ballots
            .values()
            .any(|b| b.election == ballot.election && b.unique_id == ballot.unique_id)
        {
            return Err(Error::Storage("ballot already recorded".into()));
        }
        inner.compare_and_set(vote, expected)?;
        inner.ballots.insert(ballot.id, ballot);
        Ok(())
    }

    fn ballots(&self, election: Uuid) -> Result<Vec<DecryptedBallot>> {
        Ok(self
            .lock()?
            .ballots
            .values()
            .filter(|b| b.election == election)
            .cloned()
            .collect())
    }

    fn receipt(&self, code: &str) -> Result<VoteReceipt> {
        self.lock()?
            .receipts
            .get(code)
            .cloned()
            .ok_or(Error::ReceiptNotFound)
    }
}

impl ElectionDirectory for MemStore {
    fn is_open(&self, election: Uuid) -> Result<bool> {
        Ok(self
            .lock()?
            .elections
            .get(&election)
            .map_or(false, |e| e.open))
    }

    fn is_assigned(&self, election: Uuid, voter: Uuid) -> Result<bool> {
        Ok(self
            .lock()?
            .elections
            .get(&election)
            .map_or(false, |e| e.voters.contains(&voter)))
    }

    fn has_voted(&self, election: Uuid, voter: Uuid) -> Result<bool> {
        Ok(self.lock()?.voted.contains(&(election, voter)))
    }
}

impl CandidateDirectory for MemStore {
    fn candidate_exists(&self, election: Uuid, candidate: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .elections
            .get(&election)
            .map_or(false, |e| e.candidates.contains(candidate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(election: Uuid, unique_id: &str) -> Submission {
        Submission {
            election,
            m1_identity: "m1".into(),
            m2_ballot: "m2".into(),
            unique_id: unique_id.into(),
        }
    }

    fn receipt_for(vote: &Vote, code: &str) -> VoteReceipt {
        VoteReceipt {
            vote: vote.id,
            receipt_code: code.into(),
            created_at: 0,
        }
    }

    #[test]
    fn submission_is_all_or_nothing() {
        let store = MemStore::default();
        let election = Uuid::new_v4();
        let voter = Uuid::new_v4();

        let first = Vote::new(voter, submission(election, "u1"));
        store
            .record_submission(first.clone(), receipt_for(&first, "r1"))
            .unwrap();
        assert!(store.has_voted(election, voter).unwrap());

        // Same voter again
        let again = Vote::new(voter, submission(election, "u2"));
        assert!(matches!(
            store.record_submission(again.clone(), receipt_for(&again, "r2")),
            Err(Error::AlreadyVoted { .. })
        ));

        // Another voter reusing the unique_id
        let other = Uuid::new_v4();
        let dup = Vote::new(other, submission(election, "u1"));
        assert!(matches!(
            store.record_submission(dup.clone(), receipt_for(&dup, "r3")),
            Err(Error::DuplicateUniqueId)
        ));
        assert!(!store.has_voted(election, other).unwrap());

        // Receipt code collision leaves nothing behind
        let clash = Vote::new(other, submission(election, "u3"));
        assert!(matches!(
            store.record_submission(clash.clone(), receipt_for(&clash, "r1")),
            Err(Error::ReceiptCollision)
        ));
        assert!(!store.has_voted(election, other).unwrap());
        assert_eq!(store.vote_count(), 1);
    }

    #[test]
    fn update_is_compare_and_swap() {
        let store = MemStore::default();
        let vote = Vote::new(Uuid::new_v4(), submission(Uuid::new_v4(), "u"));
        store
            .record_submission(vote.clone(), receipt_for(&vote, "r"))
            .unwrap();

        let mut approved = vote.clone();
        approved.status = VoteStatus::CoApproved;
        store.update_vote(&approved, VoteStatus::Submitted).unwrap();

        let mut rejected = vote;
        rejected.status = VoteStatus::CoRejected;
        let err = store.update_vote(&rejected, VoteStatus::Submitted).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                current: VoteStatus::CoApproved,
                ..
            }
        ));
        assert_eq!(store.vote(approved.id).unwrap().status, VoteStatus::CoApproved);
    }

    #[test]
    fn key_material_first_writer_wins() {
        let store = MemStore::default();
        let election = Uuid::new_v4();
        let a = ElectionKeyMaterial::new(
            election,
            Authority::CountingOffice,
            EciesBackend.generate().unwrap(),
        );
        let b = ElectionKeyMaterial::new(
            election,
            Authority::CountingOffice,
            EciesBackend.generate().unwrap(),
        );

        let stored_a = store.insert_key_material(a.clone()).unwrap();
        let stored_b = store.insert_key_material(b).unwrap();
        assert_eq!(stored_a.fingerprint, a.fingerprint);
        assert_eq!(stored_b.fingerprint, a.fingerprint);
        assert_eq!(store.key_material_count(), 1);
    }

    #[test]
    fn removed_keys_leave_a_tombstone() {
        let store = MemStore::default();
        let election = Uuid::new_v4();
        let pair = ElectionKeyMaterial::new(
            election,
            Authority::DecryptionEntity,
            EciesBackend.generate().unwrap(),
        );
        store.insert_key_material(pair.clone()).unwrap();

        assert!(!store.is_revoked(election).unwrap());
        assert_eq!(store.remove_key_material(election).unwrap(), 1);
        assert!(store.is_revoked(election).unwrap());

        assert!(matches!(
            store.insert_key_material(pair),
            Err(Error::KeyMaterialRevoked(e)) if e == election
        ));
        assert_eq!(store.key_material_count(), 0);
    }

    #[test]
    fn directories() {
        let store = MemStore::default();
        let election = Uuid::new_v4();
        let voter = Uuid::new_v4();

        assert!(!store.is_open(election).unwrap());
        store.open_election(election);
        store.assign_voter(election, voter);
        store.add_candidate(election, "7");
        assert!(store.is_open(election).unwrap());
        assert!(store.is_assigned(election, voter).unwrap());
        assert!(store.candidate_exists(election, "7").unwrap());
        assert!(!store.candidate_exists(election, "8").unwrap());

        store.close_election(election);
        assert!(!store.is_open(election).unwrap());
    }
}
