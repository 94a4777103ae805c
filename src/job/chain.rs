//! Automatic phase chaining policy.
//!
//! Candidate-theme generation flows straight into consolidation when it
//! completes; nothing else chains. Failed or stopped runs never trigger
//! the successor, and the successor's own termination chains no further.

use super::Phase;

/// The phase automatically started after `phase` completes, if any.
pub fn next_phase(phase: Phase) -> Option<Phase> {
    match phase {
        Phase::P3 => Some(Phase::P3b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_p3_chains() {
        assert_eq!(next_phase(Phase::P3), Some(Phase::P3b));
        assert_eq!(next_phase(Phase::P2), None);
        assert_eq!(next_phase(Phase::P3b), None);
        assert_eq!(next_phase(Phase::P4), None);
    }
}
