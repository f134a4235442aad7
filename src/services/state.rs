// src/services/state.rs
//! Issuance state machine.
//!
//! The issuance flow is an explicit tagged-union phase value driven by a
//! pure transition function, not a chain of callbacks. Phases advance in one
//! direction only; the single failure phase `Aborted` is reachable from every
//! non-terminal phase, and terminal phases accept no further events.

use std::fmt;

use crate::errors::IssuanceError;

/// Phase of one issuance session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuancePhase {
    /// No work started; the caller is still assembling the submission.
    Form,
    /// Computing the content fingerprint.
    Hashing,
    /// Writing document bytes to the storage network.
    Storing,
    /// Waiting for the external wallet to sign. Indefinite suspension point:
    /// no orchestrator-level timeout, only explicit completion or abort.
    AwaitingSignature,
    /// Reading the mined transaction back and checking the fingerprint.
    Confirming,
    /// Writing the credential row.
    Persisting,
    /// Credential persisted and retrievable. Terminal.
    Success,
    /// Flow abandoned or failed. Terminal; no credential persisted.
    Aborted,
}

impl IssuancePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, IssuancePhase::Success | IssuancePhase::Aborted)
    }
}

impl fmt::Display for IssuancePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssuancePhase::Form => "FORM",
            IssuancePhase::Hashing => "HASHING",
            IssuancePhase::Storing => "STORING",
            IssuancePhase::AwaitingSignature => "AWAITING_SIGNATURE",
            IssuancePhase::Confirming => "CONFIRMING",
            IssuancePhase::Persisting => "PERSISTING",
            IssuancePhase::Success => "SUCCESS",
            IssuancePhase::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Event that moves a session forward (or aborts it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceEvent {
    StartHashing,
    Hashed,
    Stored,
    TransactionReceived,
    FingerprintMatched,
    Persisted,
    Abort,
}

/// Pure transition function. Returns the next phase, or `InvalidState` for
/// any edge the protocol does not allow.
pub fn advance(
    phase: IssuancePhase,
    event: IssuanceEvent,
) -> Result<IssuancePhase, IssuanceError> {
    use IssuanceEvent::*;
    use IssuancePhase::*;

    let next = match (phase, event) {
        (Form, StartHashing) => Hashing,
        (Hashing, Hashed) => Storing,
        (Storing, Stored) => AwaitingSignature,
        (AwaitingSignature, TransactionReceived) => Confirming,
        (Confirming, FingerprintMatched) => Persisting,
        (Persisting, Persisted) => Success,
        (phase, Abort) if !phase.is_terminal() => Aborted,
        (phase, event) => {
            return Err(IssuanceError::InvalidState(format!(
                "event {:?} not allowed in phase {}",
                event, phase
            )))
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::IssuanceEvent::*;
    use super::IssuancePhase::*;
    use super::*;

    #[test]
    fn happy_path_walks_every_phase() {
        let mut phase = Form;
        for event in [
            StartHashing,
            Hashed,
            Stored,
            TransactionReceived,
            FingerprintMatched,
            Persisted,
        ] {
            phase = advance(phase, event).unwrap();
        }
        assert_eq!(phase, Success);
    }

    #[test]
    fn abort_reachable_from_every_non_terminal_phase() {
        for phase in [Form, Hashing, Storing, AwaitingSignature, Confirming, Persisting] {
            assert_eq!(advance(phase, Abort).unwrap(), Aborted);
        }
    }

    #[test]
    fn terminal_phases_accept_no_events() {
        for phase in [Success, Aborted] {
            for event in [
                StartHashing,
                Hashed,
                Stored,
                TransactionReceived,
                FingerprintMatched,
                Persisted,
                Abort,
            ] {
                assert!(advance(phase, event).is_err());
            }
        }
    }

    #[test]
    fn phases_advance_in_one_direction_only() {
        assert!(advance(Storing, StartHashing).is_err());
        assert!(advance(AwaitingSignature, Hashed).is_err());
        assert!(advance(Form, Persisted).is_err());
        assert!(advance(Confirming, Stored).is_err());
    }
}
