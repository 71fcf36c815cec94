//! Fixed sizes and the 24.8 fixed-point timestamp used throughout the engine.
//!
//! Audiality 2 times everything in audio frames with an 8-bit fractional
//! part (`FRAC_BITS`), so that voice wake-ups, ramps and event timestamps
//! share one deterministic integer axis instead of floating point.

/// Maximum number of sample frames processed by a single unit `Process()`
/// call (a "fragment"). Keeps scratch buffers and cache footprint bounded.
pub const A2_MAXFRAG: usize = 64;

/// Number of VM registers per voice.
pub const A2_REGISTERS: usize = 32;

/// Maximum number of arguments to a VM program or function.
pub const A2_MAXARGS: usize = 8;

/// Maximum number of message-handler entry points a program can have.
/// Entry point 0 is always `main()`.
pub const A2_MAXEPS: usize = 8;

/// Hardwired control registers every voice has, ahead of its arguments.
pub const R_TICK: usize = 0;
pub const R_TRANSPOSE: usize = 1;
pub const A2_FIXEDREGS: usize = 2;

/// First VM register that user code/compiler may wire to a control port.
pub const A2_FIRSTCONTROLREG: usize = A2_FIXEDREGS;

/// Per-voice instruction budget between two timing instructions. A voice
/// that blows through this without advancing its wake time is killed with
/// `Overload`.
pub const A2_INSLIMIT: u32 = 10_000;

/// Maximum output/scratch channels on a single bus.
pub const A2_MAXCHANNELS: usize = 8;

/// Maximum nesting depth of subvoice scratch buses.
pub const A2_MAXNESTING: usize = 255;

/// Size of the direct subvoice-id lookup table before falling back linear.
pub const A2_SV_LUT_SIZE: usize = 16;

/// Padding samples before mip level 0 of a wave.
pub const A2_WAVEPRE: usize = 1;

/// Maximum per-sample phase increment for a wavetable oscillator, used to
/// size the post-roll padding so interpolation never reads past the buffer.
pub const A2_MAXPHINC: usize = 256 * 32;

/// Padding samples after each mip level of a wave.
pub fn a2_wavepost() -> usize {
    2 + (A2_MAXFRAG * A2_MAXPHINC).div_ceil(256) + 1
}

/// Number of mip levels for a `MipWave`.
pub const A2_MIPLEVELS: usize = 10;

/// Number of fractional bits in a [`Timestamp`].
pub const FRAC_BITS: u32 = 8;
pub const FRAC_ONE: i64 = 1 << FRAC_BITS;

/// A 24.8 fixed-point frame count: whole sample frames in the high bits,
/// sub-sample position in the low 8 bits.
///
/// All engine scheduling (voice wake times, event timestamps, ramp start
/// and duration) is expressed in this type so that two runs at the same
/// sample rate and seed produce bit-identical output regardless of how the
/// audio buffer happens to be split into fragments (§8 "timing
/// idempotence").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    #[inline]
    pub fn from_frames(frames: i64) -> Self {
        Timestamp(frames << FRAC_BITS)
    }

    #[inline]
    pub fn from_frac(ticks_24_8: i64) -> Self {
        Timestamp(ticks_24_8)
    }

    #[inline]
    pub fn whole_frames(self) -> i64 {
        self.0 >> FRAC_BITS
    }

    #[inline]
    pub fn frac(self) -> i64 {
        self.0 & (FRAC_ONE - 1)
    }

    #[inline]
    pub fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn from_ms(ms: f64, samplerate: f64) -> Self {
        Timestamp((ms * samplerate / 1000.0 * FRAC_ONE as f64).round() as i64)
    }

    #[inline]
    pub fn to_ms(self, samplerate: f64) -> f64 {
        self.0 as f64 / FRAC_ONE as f64 * 1000.0 / samplerate
    }

    #[inline]
    pub fn saturating_add(self, other: Timestamp) -> Timestamp {
        Timestamp(self.0.saturating_add(other.0))
    }

    #[inline]
    pub fn saturating_sub(self, other: Timestamp) -> Timestamp {
        Timestamp(self.0.saturating_sub(other.0))
    }
}

impl std::ops::Add for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: Timestamp) -> Timestamp {
        Timestamp(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: Timestamp) -> Timestamp {
        Timestamp(self.0 - rhs.0)
    }
}

/// A VM register value: 16.16 fixed point packed into an `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reg(pub i32);

pub const REG_FRAC_BITS: u32 = 16;
pub const REG_ONE: i32 = 1 << REG_FRAC_BITS;

impl Reg {
    #[inline]
    pub fn from_f32(v: f32) -> Self {
        Reg((v * REG_ONE as f32) as i32)
    }

    #[inline]
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / REG_ONE as f32
    }

    #[inline]
    pub fn from_int(v: i32) -> Self {
        Reg(v << REG_FRAC_BITS)
    }

    #[inline]
    pub fn truthy(self) -> bool {
        self.0 != 0
    }

    #[inline]
    pub fn bool(v: bool) -> Self {
        if v {
            Reg(REG_ONE)
        } else {
            Reg(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_roundtrips_ms() {
        let ts = Timestamp::from_ms(1000.0, 48000.0);
        assert_eq!(ts.whole_frames(), 48000);
        assert_eq!(ts.frac(), 0);
    }

    #[test]
    fn timestamp_add_sub() {
        let a = Timestamp::from_frames(10);
        let b = Timestamp::from_frac(5);
        assert_eq!((a + b).raw(), 10 * FRAC_ONE + 5);
        assert_eq!((a + b - a), b);
    }

    #[test]
    fn reg_float_roundtrip_within_quantization() {
        let r = Reg::from_f32(0.5);
        assert!((r.to_f32() - 0.5).abs() < 1e-4);
    }
}
