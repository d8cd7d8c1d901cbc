//! Consensus rounds.
//!
//! A round snapshots the participant set at creation, collects one value per
//! participant (last write wins) and is finalized exactly once by plurality.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::Address;
use crate::error::{Error, Result};
use crate::oracle::FeedValue;

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS & REQUESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique round identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(Uuid);

impl RoundId {
    /// Fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RoundId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RoundId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::InvalidRound(s.to_string()))
    }
}

/// Request a round decides on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    /// On-chain request identifier
    pub request_id: u64,
    /// Source the proposed value came from
    pub source: String,
    /// Proposed value
    pub payload: FeedValue,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND
// ═══════════════════════════════════════════════════════════════════════════════

/// Round lifecycle; `Finalized` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Accepting submissions
    Active,
    /// Consensus value fixed
    Finalized,
}

/// Submitter outcome after finalization: `(validator, agreed_with_consensus)`
pub type SubmissionOutcome = (Address, bool);

/// A single consensus round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRound {
    /// Round identifier
    pub id: RoundId,
    /// Request under decision
    pub request: DataRequest,
    /// Leader when the round was opened
    pub leader: Address,
    /// Validators allowed to submit
    pub participants: Vec<Address>,
    /// Submissions in first-submission order
    pub submissions: Vec<(Address, FeedValue)>,
    /// Lifecycle status
    pub status: RoundStatus,
    /// Set once finalized
    pub consensus_value: Option<FeedValue>,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Finalization time
    pub ended_at: Option<DateTime<Utc>>,
}

impl ConsensusRound {
    /// Open a round
    pub fn new(request: DataRequest, leader: Address, participants: Vec<Address>) -> Self {
        Self {
            id: RoundId::new(),
            request,
            leader,
            participants,
            submissions: Vec::new(),
            status: RoundStatus::Active,
            consensus_value: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Whether the round still accepts submissions
    pub fn is_active(&self) -> bool {
        self.status == RoundStatus::Active
    }

    /// Whether `validator` was snapshotted into this round
    pub fn is_participant(&self, validator: &str) -> bool {
        self.participants.iter().any(|p| p == validator)
    }

    /// Value submitted by `validator`, if any
    pub fn submission(&self, validator: &str) -> Option<&FeedValue> {
        self.submissions
            .iter()
            .find(|(addr, _)| addr == validator)
            .map(|(_, value)| value)
    }

    /// Number of distinct submitters
    pub fn submission_count(&self) -> usize {
        self.submissions.len()
    }

    /// Every participant has submitted
    pub fn is_complete(&self) -> bool {
        !self.participants.is_empty() && self.submissions.len() == self.participants.len()
    }

    /// Record or overwrite a participant's submission.
    ///
    /// Overwrites keep the validator's original position.
    pub fn record(&mut self, validator: &str, value: FeedValue) -> Result<()> {
        if !self.is_active() {
            return Err(Error::InvalidRound(self.id.to_string()));
        }
        if !self.is_participant(validator) {
            return Err(Error::NotParticipant {
                round_id: self.id.to_string(),
                validator: validator.to_string(),
            });
        }

        match self.submissions.iter_mut().find(|(addr, _)| addr == validator) {
            Some((_, existing)) => *existing = value,
            None => self.submissions.push((validator.to_string(), value)),
        }
        Ok(())
    }

    /// Plurality value over the current submissions.
    ///
    /// A value only takes the lead by strictly exceeding the current maximum,
    /// so on a tie the value that reached the winning count first wins.
    pub fn tally(&self) -> Option<FeedValue> {
        let mut counts: Vec<(&FeedValue, usize)> = Vec::new();
        let mut leader: Option<&FeedValue> = None;
        let mut max_count = 0;

        for (_, value) in &self.submissions {
            let count = match counts.iter_mut().find(|(v, _)| *v == value) {
                Some((_, n)) => {
                    *n += 1;
                    *n
                }
                None => {
                    counts.push((value, 1));
                    1
                }
            };

            if count > max_count {
                max_count = count;
                leader = Some(value);
            }
        }

        leader.cloned()
    }

    /// Fix the consensus value and close the round.
    ///
    /// Returns the value together with each submitter's agreement.
    pub fn finalize(&mut self) -> Result<(FeedValue, Vec<SubmissionOutcome>)> {
        if !self.is_active() {
            return Err(Error::InvalidRound(self.id.to_string()));
        }
        let value = self
            .tally()
            .ok_or_else(|| Error::InvalidRound(format!("{} has no submissions", self.id)))?;

        self.status = RoundStatus::Finalized;
        self.consensus_value = Some(value.clone());
        self.ended_at = Some(Utc::now());

        let outcomes = self
            .submissions
            .iter()
            .map(|(addr, submitted)| (addr.clone(), *submitted == value))
            .collect();

        Ok((value, outcomes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(participants: &[&str]) -> ConsensusRound {
        ConsensusRound::new(
            DataRequest {
                request_id: 1,
                source: "cryptoPrice".into(),
                payload: FeedValue::from(2000.0),
            },
            participants[0].to_string(),
            participants.iter().map(|p| p.to_string()).collect(),
        )
    }

    #[test]
    fn test_round_id_parse() {
        let id = RoundId::new();
        assert_eq!(id.to_string().parse::<RoundId>().unwrap(), id);
        assert!(matches!("nope".parse::<RoundId>(), Err(Error::InvalidRound(_))));
        assert_ne!(RoundId::new(), RoundId::new());
    }

    #[test]
    fn test_plurality_with_dissent() {
        let mut r = round(&["a", "b", "c"]);
        r.record("a", 5.0.into()).unwrap();
        r.record("b", 5.0.into()).unwrap();
        r.record("c", 7.0.into()).unwrap();

        let (value, outcomes) = r.finalize().unwrap();
        assert_eq!(value, FeedValue::from(5.0));
        assert_eq!(
            outcomes,
            vec![
                ("a".to_string(), true),
                ("b".to_string(), true),
                ("c".to_string(), false)
            ]
        );
        assert_eq!(r.status, RoundStatus::Finalized);
        assert_eq!(r.consensus_value, Some(5.0.into()));
        assert!(r.ended_at.is_some());
    }

    #[test]
    fn test_tie_goes_to_first_to_reach_count() {
        let mut r = round(&["a", "b", "c", "d"]);
        r.record("a", 1.0.into()).unwrap();
        r.record("b", 2.0.into()).unwrap();
        r.record("c", 2.0.into()).unwrap();
        r.record("d", 1.0.into()).unwrap();
        assert_eq!(r.tally(), Some(2.0.into()));

        let mut r = round(&["a", "b"]);
        r.record("a", 3.0.into()).unwrap();
        r.record("b", 4.0.into()).unwrap();
        assert_eq!(r.tally(), Some(3.0.into()));
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut r = round(&["a", "b"]);
        r.record("a", 1.0.into()).unwrap();
        r.record("b", 2.0.into()).unwrap();
        r.record("a", 9.0.into()).unwrap();

        assert_eq!(r.submission_count(), 2);
        assert_eq!(r.submissions[0], ("a".to_string(), FeedValue::from(9.0)));
        assert_eq!(r.submission("a"), Some(&FeedValue::from(9.0)));
    }

    #[test]
    fn test_rejects_non_participant_and_closed_round() {
        let mut r = round(&["a"]);
        assert!(matches!(
            r.record("z", 1.0.into()),
            Err(Error::NotParticipant { .. })
        ));

        r.record("a", 1.0.into()).unwrap();
        assert!(r.is_complete());
        r.finalize().unwrap();

        assert!(matches!(r.finalize(), Err(Error::InvalidRound(_))));
        assert!(matches!(r.record("a", 2.0.into()), Err(Error::InvalidRound(_))));
    }

    #[test]
    fn test_finalize_without_submissions() {
        let mut r = round(&["a"]);
        assert!(r.finalize().is_err());
        assert!(r.is_active());
    }
}
