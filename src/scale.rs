//! Raw register value to engineering unit scaling.
//!
//! All three converters compute `value * multiplier / divisor`; the
//! difference is the numeric domain. Float outputs divide in `f64`,
//! integer outputs multiply in `i64` and divide with truncation toward
//! zero before narrowing to the destination width. A zero divisor is a
//! config error and is rejected long before these are ever called.

pub fn to_float(raw: u16, multiplier: i32, divisor: i32) -> f64 {
    f64::from(raw) * f64::from(multiplier) / f64::from(divisor)
}

pub fn to_s32(raw: u16, multiplier: i32, divisor: i32) -> i32 {
    (i64::from(raw) * i64::from(multiplier) / i64::from(divisor)) as i32
}

/// Like [`to_s32`] but narrowed to `u32`; a negative quotient wraps the
/// way an unsigned assignment does.
pub fn to_u32(raw: u16, multiplier: i32, divisor: i32) -> u32 {
    (i64::from(raw) * i64::from(multiplier) / i64::from(divisor)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_mode_divides_exactly() {
        assert_eq!(to_float(1500, 1, 2), 750.0);
        assert_eq!(to_float(1, 1, 3), 1.0 / 3.0);
        assert_eq!(to_float(2500, 60, 100), 1500.0);
    }

    #[test]
    fn integer_modes_truncate_toward_zero() {
        assert_eq!(to_s32(1500, 1, 2), 750);
        assert_eq!(to_s32(7, 1, 2), 3);
        assert_eq!(to_s32(10, -3, 4), -7);
        assert_eq!(to_u32(7, 1, 2), 3);
        assert_eq!(to_u32(100, 3, 2), 150);
    }

    #[test]
    fn multiplication_widens_before_dividing() {
        // u16::MAX * 40000 overflows i32 but not i64.
        assert_eq!(to_s32(u16::MAX, 40_000, 40_000), 65_535);
        assert_eq!(to_u32(u16::MAX, 65_535, 1), 0xFFFE_0001);
    }

    #[test]
    fn negative_quotient_wraps_in_u32_mode() {
        assert_eq!(to_u32(1, -1, 1), u32::MAX);
    }
}
