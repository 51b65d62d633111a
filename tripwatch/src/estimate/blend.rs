//! Confidence-weighted blending of travel-time sources.

/// Relative difference below which the two sources are considered to agree.
///
/// When they agree the primary (matrix) figure is used untouched.
pub const AGREEMENT_THRESHOLD: f64 = 0.2;

/// Weight of the primary source when the two sources disagree.
pub const PRIMARY_WEIGHT: f64 = 0.75;

/// Weight of the distance-synthesized source when the two sources disagree.
pub const SECONDARY_WEIGHT: f64 = 0.25;

/// Floor for the assumed travel speed in metres per second.
///
/// Keeps the synthesized ETA finite when a zero or negative speed is configured.
pub const MIN_SPEED_MPS: f64 = 0.5;

/// Treat non-finite and negative inputs as absent.
fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Combines a matrix-sourced ETA with a distance-synthesized ETA.
///
/// - Both present and within [`AGREEMENT_THRESHOLD`] of each other: the
///   matrix figure is returned unchanged.
/// - Both present and disagreeing: `round(0.75 * matrix + 0.25 * distance)`.
/// - Only one present: that one.
/// - Neither present: `None`. The caller must skip the entity rather than
///   write a synthetic zero.
///
/// # Examples
///
/// ```
/// use tripwatch::estimate::blend;
///
/// assert_eq!(blend(Some(100.0), Some(95.0)), Some(100.0));
/// assert_eq!(blend(Some(100.0), Some(50.0)), Some(88.0));
/// assert_eq!(blend(None, Some(80.0)), Some(80.0));
/// assert_eq!(blend(None, None), None);
/// ```
pub fn blend(matrix_eta: Option<f64>, distance_eta: Option<f64>) -> Option<f64> {
    match (usable(matrix_eta), usable(distance_eta)) {
        (Some(matrix), Some(distance)) => {
            let diff_ratio = (matrix - distance).abs() / matrix.max(distance).max(1.0);
            if diff_ratio < AGREEMENT_THRESHOLD {
                Some(matrix)
            } else {
                Some((PRIMARY_WEIGHT * matrix + SECONDARY_WEIGHT * distance).round())
            }
        }
        (Some(matrix), None) => Some(matrix),
        (None, Some(distance)) => Some(distance),
        (None, None) => None,
    }
}

/// Derives an ETA in seconds from a distance and an assumed speed.
///
/// `round(distance / max(speed_kmph / 3.6, 0.5))`, never less than one second.
/// Returns `None` for negative or non-finite distances.
///
/// # Examples
///
/// ```
/// use tripwatch::estimate::synthesize_eta;
///
/// // 1 km at 36 km/h (10 m/s)
/// assert_eq!(synthesize_eta(1000.0, 36.0), Some(100.0));
/// ```
pub fn synthesize_eta(distance_meters: f64, speed_kmph: f64) -> Option<f64> {
    if !distance_meters.is_finite() || distance_meters < 0.0 {
        return None;
    }
    let speed_mps = speed_kmph * 1000.0 / 3600.0;
    // NaN speed falls through max() to the floor
    let speed_mps = speed_mps.max(MIN_SPEED_MPS);
    Some((distance_meters / speed_mps).round().max(1.0))
}
