//! Quantile search over the valid prefix `Z(0..=t, t)`.
//!
//! A quantile `q >= 1` is a "1 in q" threshold. Its position is the first
//! `x = 2n - t` at which `Z` has fallen to `1/q` or below. `Z` is
//! non-increasing in `n`, so the entries strictly above the threshold form
//! a leading run and the answer is `2k - t` for that run's length `k`.
//! When every valid entry is above the threshold, `k = t + 1` and the
//! position lands one site past the frontier, where `Z` is zero.

use crate::{
    error::{SimError, SimResult},
    numeric::Quad,
    types::{Position, Time},
};

/// Reject anything that is not a finite quantile `>= 1`.
pub fn check_quantile(quantile: Quad) -> SimResult<()> {
    if quantile.is_nan() || !quantile.is_finite() || quantile < Quad::ONE {
        return Err(SimError::precondition(format!(
            "quantile must be a finite value >= 1, got {quantile}"
        )));
    }
    Ok(())
}

#[inline]
fn position(k: usize, time: Time) -> Position {
    2 * k as Position - time as Position
}

/// Length of the leading run of entries strictly above `threshold`.
#[inline]
pub(crate) fn leading_above(prefix: &[Quad], threshold: Quad) -> usize {
    prefix.partition_point(|z| *z > threshold)
}

/// Binary search for one quantile.
pub fn find_quantile(prefix: &[Quad], time: Time, quantile: Quad) -> SimResult<Position> {
    check_quantile(quantile)?;
    let k = leading_above(prefix, quantile.recip());
    Ok(position(k, time))
}

/// Resolve several quantiles in one descending sweep.
///
/// `descending` says how the caller ordered `quantiles`: `true` for largest
/// first, `false` for smallest first. Either way the result lines up with
/// the input, entry for entry. An input that matches neither order is
/// sorted internally.
pub fn find_quantiles(
    prefix: &[Quad],
    time: Time,
    quantiles: &[Quad],
    descending: bool,
) -> SimResult<Vec<Position>> {
    for &q in quantiles {
        check_quantile(q)?;
    }

    // Visit order: largest quantile (smallest threshold) first.
    let mut order: Vec<usize> = if descending {
        (0..quantiles.len()).collect()
    } else {
        (0..quantiles.len()).rev().collect()
    };
    let sorted = order.windows(2).all(|w| quantiles[w[0]] >= quantiles[w[1]]);
    if !sorted {
        order.sort_by(|&a, &b| {
            quantiles[b]
                .partial_cmp(&quantiles[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    // Thresholds rise along `order`, so the run length only shrinks.
    let mut positions = vec![0; quantiles.len()];
    let mut k = prefix.len();
    for idx in order {
        let threshold = quantiles[idx].recip();
        while k > 0 && !(prefix[k - 1] > threshold) {
            k -= 1;
        }
        positions[idx] = position(k, time);
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Z at t = 2 in the deterministic (p = 1/2) environment.
    fn binomial_t2() -> Vec<Quad> {
        vec![Quad::ONE, Quad::from(0.75), Quad::from(0.25)]
    }

    #[test]
    fn single_quantile_positions() {
        let z = binomial_t2();
        assert_eq!(find_quantile(&z, 2, Quad::ONE).unwrap(), -2);
        assert_eq!(find_quantile(&z, 2, Quad::from(1.2)).unwrap(), 0);
        assert_eq!(find_quantile(&z, 2, Quad::from(2.0)).unwrap(), 2);
        assert_eq!(find_quantile(&z, 2, Quad::from(4.0)).unwrap(), 2);
        assert_eq!(find_quantile(&z, 2, Quad::from(5.0)).unwrap(), 4);
    }

    #[test]
    fn rejects_quantiles_below_one() {
        let z = binomial_t2();
        assert!(find_quantile(&z, 2, Quad::from(0.5)).is_err());
        assert!(find_quantile(&z, 2, Quad::from(f64::NAN)).is_err());
        assert!(find_quantiles(&z, 2, &[Quad::from(2.0), Quad::from(0.9)], false).is_err());
    }

    #[test]
    fn batch_preserves_input_order() {
        let z = binomial_t2();
        let qs: Vec<Quad> = [1.2, 2.0, 5.0].into_iter().map(Quad::from).collect();
        assert_eq!(find_quantiles(&z, 2, &qs, false).unwrap(), vec![0, 2, 4]);

        let desc: Vec<Quad> = qs.iter().rev().copied().collect();
        assert_eq!(find_quantiles(&z, 2, &desc, true).unwrap(), vec![4, 2, 0]);

        // Unsorted input, wrong hint: still lined up with the input.
        let mixed: Vec<Quad> = [2.0, 5.0, 1.2].into_iter().map(Quad::from).collect();
        assert_eq!(find_quantiles(&z, 2, &mixed, true).unwrap(), vec![2, 4, 0]);
    }

    #[test]
    fn empty_batch() {
        assert!(find_quantiles(&binomial_t2(), 2, &[], false).unwrap().is_empty());
    }
}
