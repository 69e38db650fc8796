//! shamir secret sharing over the secp256k1 scalar field
//!
//! each custodian node holds `f(i)` for its 1-indexed position `i` on a
//! degree `t - 1` polynomial with `f(0)` the user's key. any `t` shares
//! recover `f(0)` by lagrange interpolation at zero.
//!
//! coefficients use the common denominator technique:
//!
//! λ_i = ξ · ρ_i · d̄^{-1}
//!
//! where ξ = Π_j j, d_i = i · Π_{j ≠ i} (j - i), ρ_i = Π_{j ≠ i} d_j and
//! d̄ = Π_i d_i, so only one modular inversion is needed.

use k256::{elliptic_curve::Field, Scalar};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

/// one party's point on the sharing polynomial
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// x coordinate (node index, 1-indexed)
    pub index: u32,
    /// f(index)
    pub value: Scalar,
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// lagrange coefficients at x = 0 for the given index set, in input order
pub fn lagrange_coefficients(indices: &[u32]) -> Result<Vec<Scalar>> {
    let k = indices.len();
    if k == 0 {
        return Err(Error::InsufficientShares { have: 0, need: 1 });
    }
    if indices.contains(&0) {
        return Err(Error::InvalidIndex);
    }

    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    for w in sorted.windows(2) {
        if w[0] == w[1] {
            return Err(Error::DuplicateIndex(w[0]));
        }
    }

    if k == 1 {
        return Ok(vec![Scalar::ONE]);
    }

    let xs: Vec<Scalar> = indices.iter().map(|&i| Scalar::from(i as u64)).collect();

    let xi = xs.iter().fold(Scalar::ONE, |acc, x| acc * x);

    let d: Vec<Scalar> = (0..k)
        .map(|i| {
            (0..k)
                .filter(|&j| j != i)
                .fold(xs[i], |acc, j| acc * (xs[j] - xs[i]))
        })
        .collect();

    // rho[i] = product of every d except d[i], via prefix and suffix products
    let mut rho = vec![Scalar::ONE; k];
    for i in 1..k {
        rho[i] = rho[i - 1] * d[i - 1];
    }
    let mut suffix = Scalar::ONE;
    for i in (0..k).rev() {
        rho[i] *= suffix;
        suffix *= d[i];
    }

    // distinct non-zero indices below the group order keep d̄ invertible
    let d_bar_inv = Option::<Scalar>::from(suffix.invert()).ok_or(Error::InvalidIndex)?;
    let delta = xi * d_bar_inv;

    Ok(rho.into_iter().map(|r| delta * r).collect())
}

/// recover f(0) from shares
pub fn interpolate_at_zero(shares: &[Share]) -> Result<Scalar> {
    let indices: Vec<u32> = shares.iter().map(|s| s.index).collect();
    let coeffs = lagrange_coefficients(&indices)?;
    Ok(shares
        .iter()
        .zip(coeffs.iter())
        .fold(Scalar::ZERO, |acc, (s, c)| acc + s.value * c))
}

/// split `secret` into `n` shares, any `threshold` of which recover it
pub fn split_secret(secret: &Scalar, threshold: usize, n: usize) -> Result<Vec<Share>> {
    if threshold == 0 || threshold > n {
        return Err(Error::Config(format!(
            "threshold {} invalid for {} shares",
            threshold, n
        )));
    }

    let mut rng = rand::thread_rng();
    let mut coeffs = Vec::with_capacity(threshold);
    coeffs.push(*secret);
    for _ in 1..threshold {
        coeffs.push(Scalar::random(&mut rng));
    }

    let shares = (1..=n as u32)
        .map(|i| Share {
            index: i,
            value: eval_poly(&coeffs, &Scalar::from(i as u64)),
        })
        .collect();

    coeffs.zeroize();
    Ok(shares)
}

/// horner evaluation
fn eval_poly(coeffs: &[Scalar], x: &Scalar) -> Scalar {
    coeffs
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, c| acc * x + c)
}

/// every `k`-sized subset of `0..n`, in lexicographic order, produced lazily
pub(crate) fn combinations(n: usize, k: usize) -> Combinations {
    Combinations {
        n,
        next: (k <= n).then(|| (0..k).collect()),
    }
}

pub(crate) struct Combinations {
    n: usize,
    next: Option<Vec<usize>>,
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.take()?;
        let k = current.len();

        // bump the rightmost position that still has room, reset the tail after it
        let mut following = current.clone();
        if let Some(i) = (0..k).rev().find(|&i| following[i] < self.n - k + i) {
            following[i] += 1;
            for j in i + 1..k {
                following[j] = following[j - 1] + 1;
            }
            self.next = Some(following);
        }
        Some(current)
    }
}
