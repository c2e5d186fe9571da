//! Integer square root by Newton's method.

use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Floor of the square root of `n`.
///
/// Starts from `2^ceil(bits/2)`, which is never below the root, so the
/// iteration decreases monotonically and stops at the floor.
pub fn isqrt(n: &BigUint) -> BigUint {
    if n.is_zero() {
        return BigUint::zero();
    }

    let mut x = BigUint::one() << n.bits().div_ceil(2);
    loop {
        let y = (&x + n / &x) >> 1u32;
        if y >= x {
            return x;
        }
        x = y;
    }
}
