//! Constant-time comparison of secrets and identifiers.
//!
//! Two disciplines are provided:
//!
//! - [`eq_public_len`]: rejects a length mismatch immediately. Only for
//!   values whose expected length is already known to every caller, such as
//!   the bearer secret.
//! - [`eq_strict`] / [`contains_strict`]: always scan the full reference
//!   length and every member of a set, so timing reveals neither a shared
//!   prefix nor which member matched.

use subtle::{Choice, ConstantTimeEq};

/// Compare `candidate` against `expected`, leaking only whether the lengths
/// differ.
pub fn eq_public_len(expected: &[u8], candidate: &[u8]) -> bool {
    if expected.len() != candidate.len() {
        return false;
    }
    expected.ct_eq(candidate).into()
}

fn eq_strict_choice(expected: &[u8], candidate: &[u8]) -> Choice {
    let mut same = Choice::from(1u8);
    for (i, byte) in expected.iter().enumerate() {
        // Missing positions compare against the complement, which never matches.
        let other = candidate.get(i).copied().unwrap_or(!*byte);
        same &= byte.ct_eq(&other);
    }
    let same_len = (expected.len() as u64).ct_eq(&(candidate.len() as u64));
    same & same_len
}

/// Compare `candidate` against `expected`, scanning all of `expected`
/// regardless of where (or whether) the inputs differ.
pub fn eq_strict(expected: &[u8], candidate: &[u8]) -> bool {
    eq_strict_choice(expected, candidate).into()
}

/// Membership test over a secret set.
///
/// Every member is compared in full and the results are folded without
/// branching, so timing does not depend on which member, if any, matches.
pub fn contains_strict<'a, I>(members: I, candidate: &[u8]) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut found = Choice::from(0u8);
    for member in members {
        found |= eq_strict_choice(member, candidate);
    }
    found.into()
}
