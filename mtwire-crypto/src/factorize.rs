//! PQ factorization for the auth-key handshake: Brent's variant of Pollard's rho.

use crate::CryptoError;

/// Inputs below this are split by trial division; the rho start values
/// derived from `n / 13` and friends degenerate for them.
const TRIAL_DIVISION_LIMIT: u64 = 1 << 16;

/// Polynomial constants tried in order, each scaled by `n / 103`.
const MULTIPLIERS: [u128; 5] = [43, 47, 53, 59, 61];

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// One rho run over `f(y) = y² + c mod n`. Returns a divisor of `n`, which
/// may be the trivial `1` or `n`.
fn brent(n: u128, c: u128) -> u128 {
    let f = |y: u128| (y * y % n + c) % n;
    let batch = 7 * (n / 13);
    let mut y = 3 * (n / 7);
    let (mut x, mut ys) = (0u128, 0u128);
    let (mut g, mut r, mut q) = (1u128, 1u128, 1u128);

    while g == 1 {
        x = y;
        for _ in 0..r {
            y = f(y);
        }
        let mut k = 0;
        while k < r && g == 1 {
            ys = y;
            for _ in 0..batch.min(r - k) {
                y = f(y);
                q = q * x.abs_diff(y) % n;
            }
            g = gcd(q, n);
            k += batch;
        }
        r *= 2;
    }

    if g == n {
        // The batched product swallowed the factor; replay step by step.
        loop {
            ys = f(ys);
            g = gcd(x.abs_diff(ys), n);
            if g > 1 {
                break;
            }
        }
    }
    g
}

fn trial_division(pq: u64) -> Result<(u64, u64), CryptoError> {
    (2..)
        .take_while(|d| d * d <= pq)
        .find(|d| pq % d == 0)
        .map(|d| (d, pq / d))
        .ok_or(CryptoError::Factorize(pq))
}

/// Split `pq` into `(p, q)` with `p ≤ q`.
///
/// Fails for inputs below 4, for primes, and when every constant in the
/// fixed list yields only the trivial divisor.
pub fn factorize(pq: u64) -> Result<(u64, u64), CryptoError> {
    if pq < 4 {
        return Err(CryptoError::Factorize(pq));
    }
    if pq < TRIAL_DIVISION_LIMIT {
        return trial_division(pq);
    }
    if pq % 2 == 0 {
        return Ok((2, pq / 2));
    }

    let n = pq as u128;
    MULTIPLIERS
        .iter()
        .map(|m| brent(n, m * (n / 103)))
        .find(|&g| g != 1 && g != n)
        .map(|g| {
            let (p, q) = (g as u64, (n / g) as u64);
            (p.min(q), p.max(q))
        })
        .ok_or(CryptoError::Factorize(pq))
}
