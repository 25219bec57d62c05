use log::debug;
use sha2::{Digest, Sha256};

/// Number of leading hex zeros a proof digest must have
pub const DIFFICULTY: usize = 4;

/// How many candidates are tried between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Checks whether `sha256("{previous_proof}{candidate}")` has `DIFFICULTY` leading zeros
pub fn check(previous_proof: u64, candidate: u64) -> bool {
    let guess = format!("{}{}", previous_proof, candidate);
    let digest = Sha256::digest(guess.as_bytes());

    // Each byte is two hex digits
    let full_bytes = DIFFICULTY / 2;
    if digest[..full_bytes].iter().any(|b| *b != 0) {
        return false;
    }
    DIFFICULTY % 2 == 0 || digest[full_bytes] >> 4 == 0
}

/// Finds the first non-negative proof that satisfies `check`
pub fn solve(previous_proof: u64) -> u64 {
    // `should_stop` never fires, so the search always yields a proof
    solve_until(previous_proof, || false).unwrap_or_default()
}

/// Like `solve`, but gives up and returns `None` once `should_stop` reports true
pub fn solve_until<F>(previous_proof: u64, should_stop: F) -> Option<u64>
where
    F: Fn() -> bool,
{
    let mut candidate: u64 = 0;

    loop {
        if candidate % CANCEL_CHECK_INTERVAL == 0 && should_stop() {
            debug!("Proof search after {} abandoned at candidate {}", previous_proof, candidate);
            return None;
        }

        if check(previous_proof, candidate) {
            debug!("Found proof {} after {}", candidate, previous_proof);
            return Some(candidate);
        }

        candidate += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn hex_digest(previous_proof: u64, candidate: u64) -> String {
        hex::encode(Sha256::digest(format!("{}{}", previous_proof, candidate).as_bytes()))
    }

    #[test]
    fn test_solve_finds_first_valid_proof() {
        let proof = solve(100);

        assert!(check(100, proof));
        assert!(hex_digest(100, proof).starts_with("0000"));
        assert!((0..proof).all(|candidate| !check(100, candidate)));
    }

    #[test]
    fn test_check_agrees_with_hex_prefix() {
        for candidate in 0..5000 {
            assert_eq!(
                check(7, candidate),
                hex_digest(7, candidate).starts_with("0000")
            );
        }
    }

    #[test]
    fn test_solve_until_cancelled() {
        let stop = AtomicBool::new(true);
        assert_eq!(solve_until(100, || stop.load(Ordering::SeqCst)), None);

        stop.store(false, Ordering::SeqCst);
        assert_eq!(solve_until(100, || stop.load(Ordering::SeqCst)), Some(solve(100)));
    }
}
