//! Lehmer codes: permutations numbered in the factorial number system.
//!
//! Digit `i` of the code counts how many of the remaining elements are
//! smaller than element `i`, and carries weight `(n - 1 - i)!`.

/// `n!`, saturating at `u32::MAX`.
#[must_use]
pub fn factorial(n: usize) -> u32
{
    (1..=n).try_fold(1u32, |acc, k| acc.checked_mul(u32::try_from(k).ok()?))
        .unwrap_or(u32::MAX)
}

/// The permutation of `0..n` numbered `code`. Codes at or above `n!` wrap.
#[must_use]
pub fn unrank(n: usize, code: u32) -> Vec<u8>
{
    let mut remaining: Vec<u8> = (0..n).filter_map(|value| u8::try_from(value).ok()).collect();
    let mut code = code % factorial(n).max(1);
    let mut permutation = Vec::with_capacity(remaining.len());
    for position in 0..remaining.len() {
        let weight = factorial(n - 1 - position);
        let digit = (code / weight) as usize;
        code %= weight;
        permutation.push(remaining.remove(digit.min(remaining.len() - 1)));
    }
    permutation
}

/// The Lehmer code of `permutation`. Only the relative order of the
/// elements matters.
#[must_use]
pub fn rank(permutation: &[u8]) -> u32
{
    let n = permutation.len();
    permutation.iter().enumerate().fold(0u32, |code, (position, &value)| {
        let smaller_after = permutation[position + 1..].iter().filter(|&&later| later < value).count();
        code.saturating_add((smaller_after as u32).saturating_mul(factorial(n - 1 - position)))
    })
}
