//////////////////
// VECTOR STUFF //
//////////////////

/// Clip every entry of a vector to the non-negative orthant
///
/// ### Params
///
/// * `x` - The vector to clip in place.
#[inline]
pub fn clip_nonneg(x: &mut [f64]) {
    for xi in x.iter_mut() {
        if *xi < 0.0 {
            *xi = 0.0;
        }
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_nonneg() {
        let mut x = vec![1.0, -0.5, 0.0, -1e-12, 3.0];
        clip_nonneg(&mut x);
        assert_eq!(x, vec![1.0, 0.0, 0.0, 0.0, 3.0]);
    }
}
