//! Program-derived address primitives.
//!
//! A program-derived address (PDA) is `SHA-256(seeds || program_id ||
//! "ProgramDerivedAddress")`, accepted only when the digest is *not* a valid
//! ed25519 point. [`find_program_address`] appends a one-byte bump seed and
//! walks it downward from 255 until the digest falls off the curve.

use crate::config::{MAX_BUMP_ATTEMPTS, MAX_SEEDS, MAX_SEED_LENGTH, PDA_MARKER};
use crate::crypto::hash::sha256_multi;
use crate::crypto::keys::Address;

use super::DerivationError;

/// Computes the address for an exact seed list (bump included, if any).
///
/// # Errors
///
/// - `InvalidSeed` when more than [`MAX_SEEDS`] seeds are given or any seed
///   exceeds [`MAX_SEED_LENGTH`] bytes.
/// - `OnCurve` when the digest is a valid ed25519 point and therefore
///   unusable as a PDA.
pub fn create_program_address(
    seeds: &[&[u8]],
    program_id: &Address,
) -> Result<Address, DerivationError> {
    if seeds.len() > MAX_SEEDS {
        return Err(DerivationError::InvalidSeed(format!(
            "{} seeds exceeds the maximum of {MAX_SEEDS}",
            seeds.len()
        )));
    }
    if let Some(seed) = seeds.iter().find(|s| s.len() > MAX_SEED_LENGTH) {
        return Err(DerivationError::InvalidSeed(format!(
            "seed of {} bytes exceeds the maximum of {MAX_SEED_LENGTH}",
            seed.len()
        )));
    }

    let mut parts: Vec<&[u8]> = Vec::with_capacity(seeds.len() + 2);
    parts.extend_from_slice(seeds);
    parts.push(program_id.as_bytes());
    parts.push(PDA_MARKER);

    let candidate = Address::new(sha256_multi(&parts));
    if candidate.is_on_curve() {
        return Err(DerivationError::OnCurve);
    }
    Ok(candidate)
}

/// Finds the canonical (highest) bump for `seeds` and returns it with the
/// resulting address.
///
/// The caller's seeds plus the bump must stay within [`MAX_SEEDS`].
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Address,
) -> Result<(Address, u8), DerivationError> {
    if seeds.len() >= MAX_SEEDS {
        return Err(DerivationError::InvalidSeed(format!(
            "{} seeds leaves no room for the bump",
            seeds.len()
        )));
    }

    for bump in (0..MAX_BUMP_ATTEMPTS).rev() {
        let bump_seed = [bump as u8];
        let mut with_bump: Vec<&[u8]> = Vec::with_capacity(seeds.len() + 1);
        with_bump.extend_from_slice(seeds);
        with_bump.push(&bump_seed);

        match create_program_address(&with_bump, program_id) {
            Ok(address) => return Ok((address, bump as u8)),
            Err(DerivationError::OnCurve) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(DerivationError::DerivationExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> Address {
        Address::new([42u8; 32])
    }

    #[test]
    fn found_address_is_off_curve_and_reproducible() {
        let (addr, bump) = find_program_address(&[b"vault", &[0u8]], &program()).unwrap();
        assert!(!addr.is_on_curve());

        let again = create_program_address(&[b"vault", &[0u8], &[bump]], &program()).unwrap();
        assert_eq!(addr, again);
    }

    #[test]
    fn higher_bumps_were_on_curve() {
        let (_, bump) = find_program_address(&[b"escrow"], &program()).unwrap();
        for higher in (bump as usize + 1)..MAX_BUMP_ATTEMPTS {
            let result = create_program_address(&[b"escrow", &[higher as u8]], &program());
            assert_eq!(result, Err(DerivationError::OnCurve));
        }
    }

    #[test]
    fn program_id_changes_address() {
        let (a, _) = find_program_address(&[b"seed"], &program()).unwrap();
        let (b, _) = find_program_address(&[b"seed"], &Address::new([43u8; 32])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn oversized_seed_rejected() {
        let long = [0u8; MAX_SEED_LENGTH + 1];
        assert!(matches!(
            find_program_address(&[&long], &program()),
            Err(DerivationError::InvalidSeed(_))
        ));
    }

    #[test]
    fn too_many_seeds_rejected() {
        let seeds: Vec<&[u8]> = vec![b"s".as_slice(); MAX_SEEDS];
        assert!(matches!(
            find_program_address(&seeds, &program()),
            Err(DerivationError::InvalidSeed(_))
        ));
    }

    #[test]
    fn bump_fills_the_last_seed_slot() {
        let seeds: Vec<&[u8]> = vec![b"s".as_slice(); MAX_SEEDS - 1];
        let (addr, bump) = find_program_address(&seeds, &program()).unwrap();

        let mut with_bump = seeds.clone();
        let bump_seed = [bump];
        with_bump.push(&bump_seed);
        assert_eq!(create_program_address(&with_bump, &program()), Ok(addr));
    }
}
