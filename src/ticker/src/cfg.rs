//! Precomputed timing parameters derived from the hardware counter.
use core::fmt;
use num_rational::Ratio;

use crate::Ticks;

/// Picoseconds in one second.
const PS_PER_SEC: u128 = 1_000_000_000_000;

/// Picoseconds in one microsecond.
const PS_PER_MICRO: u128 = 1_000_000;

/// The parameters of the hardware counter driving a [`Ticker`].
///
/// It can be passed to [`TickerCfg::new`] to construct [`TickerCfg`].
///
/// [`Ticker`]: crate::Ticker
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TickerOptions {
    /// The numerator of the hardware counter frequency.
    pub hw_freq_num: u64,
    /// The denominator of the hardware counter frequency.
    pub hw_freq_denom: u64,
    /// The width of the free-running counter in bits.
    pub counter_bits: u32,
    /// The minimum distance (in ticks) between the counter value and a
    /// compare value for the compare event to be guaranteed to occur.
    pub cmp_offset_min: Ticks,
    /// The number of ticks the counter may advance while a compare value is
    /// being written.
    pub set_latency: Ticks,
}

impl TickerOptions {
    /// A 32768 Hz, 24-bit counter, as commonly found on BLE controllers.
    pub const RTC_32K: Self = Self {
        hw_freq_num: 32_768,
        hw_freq_denom: 1,
        counter_bits: 24,
        cmp_offset_min: 3,
        set_latency: 0,
    };
}

/// Error type for [`TickerCfg::new`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CfgError {
    /// The numerator of the counter frequency is zero.
    FreqNumZero,
    /// The denominator of the counter frequency is zero.
    FreqDenomZero,
    /// The counter width is not in range `2..=32`.
    CounterBitsOutOfRange,
    /// The tick period is shorter than one picosecond.
    PeriodTooShort,
    /// The tick period does not fit in 31 bits when measured in picoseconds.
    PeriodTooLong,
    /// `cmp_offset_min + set_latency` does not fit in half the counter range.
    CompareMarginTooLarge,
}

impl CfgError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FreqNumZero => "the numerator of the counter frequency must not be zero",
            Self::FreqDenomZero => "the denominator of the counter frequency must not be zero",
            Self::CounterBitsOutOfRange => "the counter width must be in range `2..=32`",
            Self::PeriodTooShort => "the tick period must be at least one picosecond",
            Self::PeriodTooLong => {
                "the tick period is too long and \
                does not fit in 31 bits when measured in picoseconds"
            }
            Self::CompareMarginTooLarge => {
                "`cmp_offset_min + set_latency` must be less than half the counter range"
            }
        }
    }

    pub const fn panic(self) -> ! {
        match self {
            Self::FreqNumZero => panic!("the numerator of the counter frequency must not be zero"),
            Self::FreqDenomZero => {
                panic!("the denominator of the counter frequency must not be zero")
            }
            Self::CounterBitsOutOfRange => panic!("the counter width must be in range `2..=32`"),
            Self::PeriodTooShort => panic!("the tick period must be at least one picosecond"),
            Self::PeriodTooLong => panic!(
                "the tick period is too long and \
                does not fit in 31 bits when measured in picoseconds"
            ),
            Self::CompareMarginTooLarge => {
                panic!("`cmp_offset_min + set_latency` must be less than half the counter range")
            }
        }
    }
}

impl fmt::Display for CfgError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The precomputed parameters for a [`Ticker`].
///
/// [`Ticker`]: crate::Ticker
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TickerCfg {
    /// `hw_freq_num`, kept for exact unit conversion.
    freq_num: u64,
    /// `hw_freq_denom`, kept for exact unit conversion.
    freq_denom: u64,
    /// Masks a tick value to the counter width.
    cntr_mask: Ticks,
    /// The integral part of the tick period measured in picoseconds. This is
    /// the unit of [`remainder_periodic`](crate::Start::periodic).
    remainder_range: u32,
    cmp_offset_min: Ticks,
    set_latency: Ticks,
}

impl TickerCfg {
    /// Construct a `TickerCfg`.
    pub const fn new(
        TickerOptions {
            hw_freq_num: freq_num,
            hw_freq_denom: freq_denom,
            counter_bits,
            cmp_offset_min,
            set_latency,
        }: TickerOptions,
    ) -> Result<Self, CfgError> {
        if freq_denom == 0 {
            return Err(CfgError::FreqDenomZero);
        } else if freq_num == 0 {
            return Err(CfgError::FreqNumZero);
        } else if counter_bits < 2 || counter_bits > 32 {
            return Err(CfgError::CounterBitsOutOfRange);
        }

        // `tick_period = 1 / (freq_num / freq_denom)`
        // `0 < tick_period_ps.numer() <= 0xd8d7_26b7_177a_8000_0000_0000_0000`
        // `0 < tick_period_ps.denom() <=                0xffff_ffff_ffff_ffff`
        let tick_period_ps = Ratio::new_raw(PS_PER_SEC * freq_denom as u128, freq_num as u128);
        let remainder_range = *tick_period_ps.numer() / *tick_period_ps.denom();

        if remainder_range == 0 {
            return Err(CfgError::PeriodTooShort);
        } else if remainder_range >= 1 << 31 {
            return Err(CfgError::PeriodTooLong);
        }

        let cntr_mask = if counter_bits == 32 {
            Ticks::MAX
        } else {
            (1 << counter_bits) - 1
        };

        // Both operands are `u32`; sum in `u64` so that the check itself
        // can't overflow
        if cmp_offset_min as u64 + set_latency as u64 > (cntr_mask >> 1) as u64 {
            return Err(CfgError::CompareMarginTooLarge);
        }

        Ok(Self {
            freq_num,
            freq_denom,
            cntr_mask,
            remainder_range: remainder_range as u32,
            cmp_offset_min,
            set_latency,
        })
    }

    /// Get the mask applied to every counter value.
    #[inline]
    pub const fn cntr_mask(&self) -> Ticks {
        self.cntr_mask
    }

    /// Get the most significant bit of the counter.
    #[inline]
    pub const fn cntr_msb(&self) -> Ticks {
        self.cntr_mask ^ (self.cntr_mask >> 1)
    }

    /// Get the number of remainder units (picoseconds) in one tick.
    #[inline]
    pub const fn remainder_range(&self) -> u32 {
        self.remainder_range
    }

    #[inline]
    pub const fn cmp_offset_min(&self) -> Ticks {
        self.cmp_offset_min
    }

    #[inline]
    pub const fn set_latency(&self) -> Ticks {
        self.set_latency
    }

    /// Calculate `now - old` modulo the counter width.
    #[inline]
    pub const fn ticks_diff(&self, now: Ticks, old: Ticks) -> Ticks {
        now.wrapping_sub(old) & self.cntr_mask
    }

    /// Calculate `a + b` modulo the counter width.
    #[inline]
    pub const fn ticks_add(&self, a: Ticks, b: Ticks) -> Ticks {
        a.wrapping_add(b) & self.cntr_mask
    }

    /// Get the tick period as an exact number of picoseconds.
    fn tick_period_ps(&self) -> Ratio<u128> {
        Ratio::new(
            PS_PER_SEC * self.freq_denom as u128,
            self.freq_num as u128,
        )
    }

    /// Convert a duration in microseconds to whole ticks plus the remainder
    /// in picoseconds, suitable for [`Start::periodic`].
    ///
    /// The tick count saturates at `Ticks::MAX`.
    ///
    /// [`Start::periodic`]: crate::Start::periodic
    pub fn ticks_from_micros(&self, micros: u32) -> (Ticks, u32) {
        let period = self.tick_period_ps();
        let total = Ratio::from_integer(micros as u128 * PS_PER_MICRO);
        let ticks = (total / period).to_integer();
        let remainder = (total - period * ticks).to_integer();
        if ticks > Ticks::MAX as u128 {
            (Ticks::MAX, 0)
        } else {
            // `remainder < period <= 2^31`
            (ticks as Ticks, remainder as u32)
        }
    }

    /// Convert a tick count to microseconds, rounding down.
    pub fn micros_from_ticks(&self, ticks: Ticks) -> u64 {
        let micros = (self.tick_period_ps() * ticks as u128 / PS_PER_MICRO).to_integer();
        // `ticks < 2^32` and `period < 2^31 ps`, so this is `< 2^43`
        micros as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn rtc_32k() {
        let cfg = TickerCfg::new(TickerOptions::RTC_32K).unwrap();
        assert_eq!(cfg.cntr_mask(), 0xff_ffff);
        assert_eq!(cfg.cntr_msb(), 0x80_0000);
        assert_eq!(cfg.remainder_range(), 30_517_578);
    }

    #[test]
    fn full_width_counter() {
        let cfg = TickerCfg::new(TickerOptions {
            counter_bits: 32,
            ..TickerOptions::RTC_32K
        })
        .unwrap();
        assert_eq!(cfg.cntr_mask(), u32::MAX);
        assert_eq!(cfg.cntr_msb(), 0x8000_0000);
        assert_eq!(cfg.ticks_diff(1, u32::MAX), 2);
    }

    #[test]
    fn errors() {
        let base = TickerOptions::RTC_32K;
        let check = |opts, e| assert_eq!(TickerCfg::new(opts), Err(e));
        check(
            TickerOptions {
                hw_freq_num: 0,
                ..base
            },
            CfgError::FreqNumZero,
        );
        check(
            TickerOptions {
                hw_freq_denom: 0,
                ..base
            },
            CfgError::FreqDenomZero,
        );
        check(
            TickerOptions {
                counter_bits: 1,
                ..base
            },
            CfgError::CounterBitsOutOfRange,
        );
        check(
            TickerOptions {
                counter_bits: 33,
                ..base
            },
            CfgError::CounterBitsOutOfRange,
        );
        // 2 THz
        check(
            TickerOptions {
                hw_freq_num: 2_000_000_000_000,
                ..base
            },
            CfgError::PeriodTooShort,
        );
        // 1 Hz
        check(
            TickerOptions {
                hw_freq_num: 1,
                ..base
            },
            CfgError::PeriodTooLong,
        );
        check(
            TickerOptions {
                counter_bits: 4,
                cmp_offset_min: 5,
                set_latency: 3,
                ..base
            },
            CfgError::CompareMarginTooLarge,
        );
    }

    #[test]
    fn micros_round_trip_at_32k() {
        let cfg = TickerCfg::new(TickerOptions::RTC_32K).unwrap();

        // 7.5 ms connection interval
        assert_eq!(cfg.ticks_from_micros(7_500), (245, 23_193_359));
        // 1.25 ms
        assert_eq!(cfg.ticks_from_micros(1_250), (40, 29_296_875));
        assert_eq!(cfg.ticks_from_micros(0), (0, 0));

        assert_eq!(cfg.micros_from_ticks(32_768), 1_000_000);
        assert_eq!(cfg.micros_from_ticks(245), 7_476);
    }

    #[test]
    fn fractional_frequency() {
        // 32768 * 3 / 2 Hz
        let cfg = TickerCfg::new(TickerOptions {
            hw_freq_num: 32_768 * 3,
            hw_freq_denom: 2,
            ..TickerOptions::RTC_32K
        })
        .unwrap();
        assert_eq!(cfg.remainder_range(), 20_345_052);
        assert_eq!(cfg.micros_from_ticks(49_152), 1_000_000);
    }

    #[quickcheck]
    fn ticks_from_micros_is_exact(micros: u32) {
        let cfg = TickerCfg::new(TickerOptions::RTC_32K).unwrap();
        let (ticks, remainder) = cfg.ticks_from_micros(micros);

        // `ticks * 30517578.125 + remainder <= micros * 1e6`, with
        // `remainder` being the floor of the difference
        let total_fs = micros as u128 * 1_000_000_000;
        let ticks_fs = ticks as u128 * 30_517_578_125;
        assert!(ticks_fs <= total_fs);
        assert_eq!((total_fs - ticks_fs) / 1000, remainder as u128);
        assert!(remainder <= cfg.remainder_range());
    }

    #[quickcheck]
    fn diff_add_inverse(bits: u8, a: u32, b: u32) {
        let bits = 2 + bits as u32 % 31;
        let cfg = TickerCfg::new(TickerOptions {
            counter_bits: bits,
            cmp_offset_min: 0,
            ..TickerOptions::RTC_32K
        })
        .unwrap();
        let a = a & cfg.cntr_mask();
        let d = cfg.ticks_diff(b, a);
        assert_eq!(cfg.ticks_add(a, d), b & cfg.cntr_mask());
    }
}
