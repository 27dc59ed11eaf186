//! The virgin-map engine: `has_new_bits` and the coverage-decrease
//! detector `has_few_bits`, plus the state record both live on.
//!
//! Per the "Global mutable state" design note, the three virgin maps and
//! the two running minima are packaged into one `CoverageState` owned by
//! whoever drives [`crate::dispatcher::save_if_interesting`], rather than
//! process-wide statics.

use crate::bitmap::{classify_counts, count_bytes};

/// A byte equal to `0xff` means "this edge has never been touched"; any
/// other value is the bitwise-NOT of the worst-seen-so-far classification.
#[derive(Debug, Clone)]
pub struct VirginMap {
    bytes: Vec<u8>,
}

impl VirginMap {
    pub fn new(map_size: usize) -> Self {
        Self {
            bytes: vec![0xffu8; map_size],
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Result of [`has_new_bits`]: the maximum novelty class observed across
/// the scan. `None` means no novelty -- the map is discarded as-is by the
/// caller; `NewHitCount`/`NewTuple` mean the virgin map was mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Novelty {
    None = 0,
    NewHitCount = 1,
    NewTuple = 2,
}

impl Novelty {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// The three independent decrease signals packed by the original
/// `has_few_bits` into bits 2/1/0 of a `0x10..=0x17` return value, lifted
/// here into an explicit record per Design Note §9.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecreaseAxes {
    /// Bit 2: total covered-byte count dropped below the running minimum.
    pub bitmap: bool,
    /// Bit 1: a previously-covered edge is no longer hit.
    pub coverage: bool,
    /// Bit 0: total hit-count sum dropped below the running minimum, with
    /// at least one non-novel hit still visible.
    pub hitcount: bool,
}

impl DecreaseAxes {
    pub fn any(self) -> bool {
        self.bitmap || self.coverage || self.hitcount
    }

    /// Reconstruct the original packed wire value (`0x10..=0x17`), done
    /// only at filename-formatting time rather than carried around as the
    /// primary representation.
    pub fn tag(self) -> u8 {
        0x10 | ((self.bitmap as u8) << 2) | ((self.coverage as u8) << 1) | (self.hitcount as u8)
    }
}

/// The outcome of a call to [`CoverageState::has_few_bits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FewBitsOutcome {
    /// No testcase matrix yet -- delegated straight to `has_new_bits`.
    Fallback(Novelty),
    /// A testcase matrix exists; these are the decrease axes observed.
    Decrease(DecreaseAxes),
}

impl FewBitsOutcome {
    /// True iff this outcome should be treated as "not interesting" by the
    /// dispatcher -- i.e. `0x10` (no axis decreased) or the `has_new_bits`
    /// fallback returning no novelty.
    pub fn is_not_interesting(self) -> bool {
        match self {
            FewBitsOutcome::Fallback(n) => n == Novelty::None,
            FewBitsOutcome::Decrease(axes) => !axes.any(),
        }
    }
}

/// Cross-cutting fuzzing-session state the virgin-map engine owns:
/// the three virgin maps, the bitmap-dirty flag, and the two running
/// minima. This is the "explicit state record" Design Note §9 asks for in
/// place of process-global singletons.
#[derive(Debug)]
pub struct CoverageState {
    pub virgin_bits: VirginMap,
    pub virgin_tmout: VirginMap,
    pub virgin_crash: VirginMap,
    /// Set whenever `virgin_bits` changes; cleared by
    /// [`crate::persistence::dump_bitmap`] once written out.
    pub bitmap_dirty: bool,
    /// Fewest covered bytes seen so far this session, or `u32::MAX` if a
    /// testcase matrix hasn't arrived yet and no comparison is meaningful.
    pub min_bitmap_size: u32,
    /// Smallest total hit-count sum seen so far this session.
    pub min_actual_cnts: u64,
    /// Whether an external testcase matrix has been supplied yet. While
    /// `false`, `has_few_bits` behaves exactly like `has_new_bits`.
    pub has_testcase_matrix: bool,
}

impl CoverageState {
    pub fn new(map_size: usize) -> Self {
        Self {
            virgin_bits: VirginMap::new(map_size),
            virgin_tmout: VirginMap::new(map_size),
            virgin_crash: VirginMap::new(map_size),
            bitmap_dirty: false,
            min_bitmap_size: u32::MAX,
            min_actual_cnts: u64::MAX,
            has_testcase_matrix: false,
        }
    }

    /// Standard novelty check: does `current` bring any new tuple or hit
    /// count to `virgin`? Mutates `virgin` in place so a later call never
    /// re-reports the same novelty.
    ///
    /// `is_coverage_map` should be `true` only when `virgin` is
    /// `self.virgin_bits` -- that's the one case where novelty sets
    /// `bitmap_dirty`.
    pub fn has_new_bits(&mut self, current: &[u8], virgin: VirginMapId) -> Novelty {
        let dirty = self.discover(current, virgin);
        if dirty != Novelty::None && virgin == VirginMapId::Bits {
            self.bitmap_dirty = true;
        }
        dirty
    }

    fn virgin_mut(&mut self, which: VirginMapId) -> &mut VirginMap {
        match which {
            VirginMapId::Bits => &mut self.virgin_bits,
            VirginMapId::Timeout => &mut self.virgin_tmout,
            VirginMapId::Crash => &mut self.virgin_crash,
        }
    }

    fn discover(&mut self, current: &[u8], which: VirginMapId) -> Novelty {
        let virgin = self.virgin_mut(which);
        debug_assert_eq!(current.len(), virgin.bytes.len());

        let mut ret = Novelty::None;
        for (c, v) in current.iter().zip(virgin.bytes.iter_mut()) {
            let masked = c & *v;
            if masked == 0 {
                continue;
            }
            if *v == 0xff {
                ret = Novelty::NewTuple;
            } else if ret < Novelty::NewHitCount {
                ret = Novelty::NewHitCount;
            }
            *v &= !c;
        }
        ret
    }

    /// A cheap skim over an unclassified trace: if it can certify "no
    /// novelty possible" against `virgin`, the caller can skip
    /// classification entirely. Must be a sound approximation: it may
    /// falsely claim novelty (forcing the slow path) but must never miss
    /// true novelty -- so it only ever returns `false` when every byte of
    /// `current` is entirely absorbed by `virgin` (i.e. `current & virgin
    /// == 0` everywhere).
    fn skim(current: &[u8], virgin: &[u8]) -> bool {
        current
            .iter()
            .zip(virgin.iter())
            .any(|(&c, &v)| (c & v) != 0)
    }

    /// Optimization over `has_new_bits`: skims the unclassified trace
    /// first, and only pays for `classify_counts` + the full scan when the
    /// skim can't rule out novelty.
    pub fn has_new_bits_unclassified(&mut self, trace: &mut [u8], which: VirginMapId) -> Novelty {
        if !Self::skim(trace, self.virgin_mut(which).as_slice()) {
            return Novelty::None;
        }
        classify_counts(trace);
        self.has_new_bits(trace, which)
    }

    /// The coverage-decrease detector. If no testcase matrix has arrived
    /// yet, delegates to [`Self::has_new_bits`] (`Fallback`). Otherwise
    /// computes the three decrease axes, resetting any dropped virgin byte
    /// back to `0xff` as it goes (the only place virgin bits are set back
    /// to virgin), and updates the running minima unconditionally -- the
    /// minima update is not gated on the input being admitted to the
    /// queue, per the ordering rule in §5 of the spec.
    pub fn has_few_bits(&mut self, current: &[u8], actual_counts: u64, which: VirginMapId) -> FewBitsOutcome {
        if !self.has_testcase_matrix {
            return FewBitsOutcome::Fallback(self.has_new_bits(current, which));
        }

        let cur_bitmap_size = count_bytes(current);
        let bms_decrease = cur_bitmap_size < self.min_bitmap_size;

        let mut hcn_decrease = false;
        let mut cov_decrease = false;

        {
            let virgin = &mut self.virgin_mut(which).bytes;
            debug_assert_eq!(current.len(), virgin.len());

            for (c, v) in current.iter().zip(virgin.iter_mut()) {
                // No prior coverage to lose at this byte -- skip it, this
                // is the speed optimization the original source documents
                // as "case 1".
                if *v == 0xff {
                    continue;
                }

                if (c & *v) != 0 && actual_counts < self.min_actual_cnts {
                    hcn_decrease = true;
                }

                if *c == 0 {
                    *v = 0xff;
                    cov_decrease = true;
                }
            }
        }

        if cov_decrease {
            self.bitmap_dirty = true;
        }

        // Minima update happens every call, decoupled from whether the
        // dispatcher ultimately admits this input -- see the Open
        // Question resolution in SPEC_FULL.md.
        if cur_bitmap_size < self.min_bitmap_size {
            self.min_bitmap_size = cur_bitmap_size;
        }
        if actual_counts < self.min_actual_cnts {
            self.min_actual_cnts = actual_counts;
        }

        FewBitsOutcome::Decrease(DecreaseAxes {
            bitmap: bms_decrease,
            coverage: cov_decrease,
            hitcount: hcn_decrease,
        })
    }
}

/// Which of the three virgin maps an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirginMapId {
    Bits,
    Timeout,
    Crash,
}
