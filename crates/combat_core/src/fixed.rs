/// Upper bound for an explicitly stated damage reduction.
pub const EXPLICIT_REDUCTION_MAX: f64 = 0.8;

/// Upper bound for damage reduction derived from defense.
pub const DERIVED_REDUCTION_MAX: f64 = 0.6;

/// Defense softening constant in `def / (def + DEFENSE_SOFTENING)`.
pub const DEFENSE_SOFTENING: f64 = 100.0;

/// Smallest damage a hit with positive potential can deal.
pub const MIN_HIT_DAMAGE: i64 = 1;

/// Share of maximum health restored when a talisman is consumed.
pub const TALISMAN_REVIVE_FRACTION: f64 = 0.3;

/// Clamp a float into `[min, max]`, mapping NaN to `min`.
pub fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    debug_assert!(min <= max);
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}

/// Apply a signed delta to a resource meter, returning the clamped value.
pub fn commit_resource_delta(current: i64, delta: i64, max: i64) -> i64 {
    current.saturating_add(delta).clamp(0, max.max(0))
}

/// Floor a float into an integer amount, treating non-finite input as zero.
pub fn floor_amount(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    value.floor() as i64
}
