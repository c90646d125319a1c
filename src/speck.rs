//! The SPECK set-partitioning bitplane coder for 3-D coefficient fields.
//!
//! The coder walks the magnitude bitplanes of a wavelet coefficient field
//! from the most significant downwards. Per bitplane, a sorting pass
//! locates newly significant coefficients by recursively partitioning
//! octant sets, and a refinement pass sharpens the coefficients found in
//! earlier bitplanes by one bit each. The decoder replays the identical
//! walk, consuming the bits the encoder produced.
//!
//! Working state lives in three lists. The list of insignificant sets
//! (LIS) buckets sets by partition level; the list of insignificant
//! pixels (LIP) and the significant-pixel lists (LSP, split into the
//! previous-plane and current-plane parts) hold flat pixel indices.
//! Removal from LIS and LIP is deferred: entries are tombstoned during a
//! pass and compacted between bitplanes, keeping iteration indices stable.

use crate::error::{Error, UnitResult};
use crate::math::{num_partitions, num_xforms, Vec3};
use rayon::prelude::*;
use smallvec::SmallVec;

/// Upper bound on coded bitplanes, enough for the full double-precision range.
pub const MAX_BITPLANES: usize = 128;

/// Tombstone value for pixel indices; anything at or above the
/// volume length acts as one.
const SENTINEL: u64 = u64::MAX;

/// Once this fraction of all coefficients is significant, a precomputed
/// significance map beats repeated magnitude comparisons in the inner loops.
/// Purely a performance knob, the produced bits do not depend on it.
const SIG_MAP_THRESHOLD: f32 = 0.8;

const STATE_INSIG: u8 = 0;
const STATE_SIG_POS: u8 = 1;
const STATE_SIG_NEG: u8 = 2;

/// What is known about a set or pixel at the current threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Significance {
    /// Not yet examined at this threshold.
    #[default]
    Dunno,

    /// Contains at least one coefficient at or above the threshold.
    Sig,

    /// All coefficients below the threshold.
    Insig,

    /// Became significant within the current bitplane.
    NewlySig,
}

/// How an encoding run decides it is finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Stop once this many bits were produced.
    /// The budget is rounded up to a whole number of bytes.
    BitBudget(u64),

    /// Code every bitplane down to and including this quantization level
    /// (the bitplane of threshold `2^level`).
    QuantLevel(i32),
}

/// Internal control signal: the bit budget was exhausted
/// and the current pass unwinds.
struct BudgetMet;

type CodeResult<T = ()> = std::result::Result<T, BudgetMet>;

/// An axis-aligned sub-box of the volume, tracked in the LIS.
#[derive(Clone, Copy, Debug, Default)]
struct SpeckSet3d {
    start_x: u32,
    start_y: u32,
    start_z: u32,
    length_x: u32,
    length_y: u32,
    length_z: u32,

    /// How many partition halvings produced this set.
    /// Doubles as the LIS bucket index.
    part_level: u16,

    significance: Significance,
    garbage: bool,
}

impl SpeckSet3d {
    fn whole_volume(dims: Vec3<usize>) -> Self {
        SpeckSet3d {
            length_x: dims.x() as u32,
            length_y: dims.y() as u32,
            length_z: dims.z() as u32,
            .. Self::default()
        }
    }

    fn is_pixel(&self) -> bool {
        self.length_x == 1 && self.length_y == 1 && self.length_z == 1
    }

    fn is_empty(&self) -> bool {
        self.length_x == 0 || self.length_y == 0 || self.length_z == 0
    }
}

/// Split lengths for one axis: the larger half first, so odd lengths
/// leave the extra sample in the approximation part.
#[inline]
fn split(length: u32) -> [u32; 2] {
    [length - length / 2, length / 2]
}

/// The SPECK coder for one volume or chunk. One instance either encodes
/// or decodes; it exclusively owns all working buffers for that call.
#[derive(Debug)]
pub struct Speck3d {
    dims: Vec3<usize>,

    coeffs: Vec<f64>,
    signs: Vec<bool>,

    bits: Vec<bool>,
    bit_cursor: usize,

    termination: Termination,
    budget: usize,
    decode_limit: usize,
    max_coeff_bits: i32,
    threshold: f64,

    lis: SmallVec<[Vec<SpeckSet3d>; 24]>,
    lip: Vec<u64>,
    lsp_old: Vec<u64>,
    lsp_new: Vec<u64>,

    sig_map: Vec<bool>,
    sig_map_enabled: bool,
    scan_states: Vec<u8>,
}

impl Speck3d {
    pub fn new(dims: Vec3<usize>) -> Self {
        Speck3d {
            dims,
            coeffs: Vec::new(),
            signs: Vec::new(),
            bits: Vec::new(),
            bit_cursor: 0,
            termination: Termination::QuantLevel(i32::MIN),
            budget: 0,
            decode_limit: 0,
            max_coeff_bits: 0,
            threshold: 0.0,
            lis: SmallVec::new(),
            lip: Vec::new(),
            lsp_old: Vec::new(),
            lsp_new: Vec::new(),
            sig_map: Vec::new(),
            sig_map_enabled: false,
            scan_states: Vec::new(),
        }
    }

    /// Take ownership of the coefficient field to encode.
    pub fn take_coeffs(&mut self, coeffs: Vec<f64>) -> UnitResult {
        if coeffs.len() != self.dims.volume() {
            return Err(Error::wrong_size("coefficient count does not match the volume dimensions"));
        }
        self.coeffs = coeffs;
        Ok(())
    }

    /// Take ownership of a bit sequence to decode.
    pub fn take_bits(&mut self, bits: Vec<bool>) {
        self.bits = bits;
    }

    pub fn set_termination(&mut self, termination: Termination) {
        self.termination = match termination {
            Termination::BitBudget(budget) => Termination::BitBudget((budget + 7) / 8 * 8),
            quant => quant,
        };
    }

    /// Cap the number of bits a decode may consume, rounded up to whole
    /// bytes. Zero (the default) decodes everything available.
    pub fn set_decode_bit_limit(&mut self, limit: u64) {
        self.decode_limit = (((limit + 7) / 8) * 8) as usize;
    }

    pub fn set_max_coeff_bits(&mut self, bits: i32) {
        self.max_coeff_bits = bits;
    }

    pub fn max_coeff_bits(&self) -> i32 {
        self.max_coeff_bits
    }

    pub fn bit_count(&self) -> usize {
        self.bits.len()
    }

    pub fn bit_buffer(&self) -> &[bool] {
        &self.bits
    }

    pub fn release_bits(&mut self) -> Vec<bool> {
        std::mem::take(&mut self.bits)
    }

    pub fn release_coeffs(&mut self) -> Vec<f64> {
        std::mem::take(&mut self.coeffs)
    }

    /// Encode the owned coefficient field into a bit sequence.
    ///
    /// The produced bits are available through `bit_buffer` or
    /// `release_bits` afterwards, padded to a whole number of bytes.
    /// The coefficient buffer is consumed by residual subtraction and
    /// holds no meaningful values once this returns.
    pub fn encode(&mut self) -> UnitResult {
        if self.coeffs.is_empty() || self.coeffs.len() != self.dims.volume() {
            return Err(Error::invalid("no coefficient data to encode"));
        }
        if self.dims.x() == 0 || self.dims.y() == 0 || self.dims.z() < 2 {
            return Err(Error::invalid("encoded volumes must measure at least 1 x 1 x 2"));
        }

        match self.termination {
            Termination::BitBudget(budget) => {
                if budget == 0 {
                    return Err(Error::invalid("bit budget is zero"));
                }
                if budget > 64 * self.coeffs.len() as u64 {
                    return Err(Error::invalid_param("bit budget exceeds 64 bits per sample"));
                }
                self.budget = budget as usize;
                self.bits = Vec::with_capacity(budget as usize);
            }
            Termination::QuantLevel(_) => {
                self.budget = usize::MAX;
                self.bits = Vec::new();
            }
        }

        self.initialize_lists();

        let max_coeff = self.split_signs();
        self.max_coeff_bits = if max_coeff > 0.0 { max_coeff.log2().floor() as i32 } else { 0 };
        self.threshold = (2.0_f64).powi(self.max_coeff_bits);

        let mut current_level = self.max_coeff_bits;
        if let Termination::QuantLevel(last_level) = self.termination {
            if last_level > self.max_coeff_bits {
                return Err(Error::invalid_param("quantization level lies above the top bitplane"));
            }
        }

        for _ in 0 .. MAX_BITPLANES {
            self.prepare_sig_map();

            if self.sorting_pass_encode().is_err() { break }
            if self.refinement_pass_encode().is_err() { break }

            if let Termination::QuantLevel(last_level) = self.termination {
                if current_level <= last_level { break }
                current_level -= 1;
            }

            self.threshold *= 0.5;
            self.clean_lis();
        }

        // trailing zeros decode as insignificance and change nothing
        while self.bits.len() % 8 != 0 {
            self.bits.push(false);
        }

        Ok(())
    }

    /// Decode the owned bit sequence into a coefficient field.
    ///
    /// Decoding a prefix of a longer stream is valid and yields a
    /// coarser reconstruction. Retrieve the field with `release_coeffs`.
    pub fn decode(&mut self) -> UnitResult {
        if self.bits.is_empty() {
            return Err(Error::invalid("no bitstream to decode"));
        }
        if self.dims.volume() == 0 {
            return Err(Error::invalid("volume dimensions are not set"));
        }

        self.budget = if self.decode_limit == 0 || self.decode_limit > self.bits.len() {
            self.bits.len()
        } else {
            self.decode_limit
        };

        let len = self.dims.volume();
        self.coeffs.clear();
        self.coeffs.resize(len, 0.0);
        self.signs.clear();
        self.signs.resize(len, true);
        self.sig_map_enabled = false;

        self.initialize_lists();

        self.bit_cursor = 0;
        self.threshold = (2.0_f64).powi(self.max_coeff_bits);

        for _ in 0 .. MAX_BITPLANES {
            if self.sorting_pass_decode().is_err() { break }
            if self.refinement_pass_decode().is_err() { break }

            self.threshold *= 0.5;
            self.clean_lis();
        }

        // pixels whose significance arrived but whose refinement did not
        // settle at the midpoint of the bin the received bits imply
        let newly = self.threshold * 1.5;
        for &index in &self.lsp_new {
            self.coeffs[index as usize] = newly;
        }

        for (coeff, &positive) in self.coeffs.iter_mut().zip(&self.signs) {
            if !positive {
                *coeff = -*coeff;
            }
        }

        Ok(())
    }

    /// Build the LIS by recursively splitting the whole-volume set,
    /// mirroring the level structure of the wavelet transform:
    /// octant splits for the combined levels, then plane-only quadrant
    /// splits or depth-only halvings for the leftover levels.
    fn initialize_lists(&mut self) {
        let bucket_count = 1
            + num_partitions(self.dims.x())
            + num_partitions(self.dims.y())
            + num_partitions(self.dims.z());

        self.lis.clear();
        self.lis.resize(bucket_count, Vec::new());
        self.lip.clear();

        let xforms_xy = num_xforms(self.dims.x().min(self.dims.y()));
        let xforms_z = num_xforms(self.dims.z());

        let mut big = SpeckSet3d::whole_volume(self.dims);
        let mut applied = 0;

        while applied < xforms_xy && applied < xforms_z {
            let subsets = partition_xyz(&big);
            big = subsets[0];
            for subset in &subsets[1 ..] {
                self.lis[subset.part_level as usize].push(*subset);
            }
            applied += 1;
        }

        if xforms_xy > xforms_z {
            while applied < xforms_xy {
                let subsets = partition_xy(&big);
                big = subsets[0];
                for subset in &subsets[1 ..] {
                    self.lis[subset.part_level as usize].push(*subset);
                }
                applied += 1;
            }
        }
        else {
            while applied < xforms_z {
                let subsets = partition_z(&big);
                big = subsets[0];
                self.lis[subsets[1].part_level as usize].push(subsets[1]);
                applied += 1;
            }
        }

        // the remaining set is the lowest-frequency subband and the one
        // most likely to turn significant first, so it goes to the front
        self.lis[big.part_level as usize].insert(0, big);

        self.lsp_new.clear();
        self.lsp_old.clear();
        self.lsp_old.reserve(self.dims.volume());
    }

    /// Make every coefficient non-negative, remember the signs,
    /// and return the largest magnitude.
    fn split_signs(&mut self) -> f64 {
        self.signs.clear();
        self.signs.resize(self.coeffs.len(), true);

        let mut max = 0.0_f64;
        for (coeff, sign) in self.coeffs.iter_mut().zip(self.signs.iter_mut()) {
            if *coeff < 0.0 {
                *coeff = -*coeff;
                *sign = false;
            }
            if *coeff > max {
                max = *coeff;
            }
        }

        max
    }

    /// Decide whether this bitplane warrants a precomputed significance
    /// map, and build it in 64-wide stripes if so.
    fn prepare_sig_map(&mut self) {
        self.sig_map_enabled =
            self.lsp_old.len() > (self.coeffs.len() as f32 * SIG_MAP_THRESHOLD) as usize;

        if !self.sig_map_enabled {
            return;
        }

        self.sig_map.clear();
        self.sig_map.resize(self.coeffs.len(), false);

        let threshold = self.threshold;
        self.sig_map
            .par_chunks_mut(64)
            .zip(self.coeffs.par_chunks(64))
            .for_each(|(map_stripe, coeff_stripe)| {
                for (flag, &coeff) in map_stripe.iter_mut().zip(coeff_stripe) {
                    *flag = coeff >= threshold;
                }
            });
    }

    #[inline]
    fn pixel_is_significant(&self, index: usize) -> bool {
        if self.sig_map_enabled {
            self.sig_map[index]
        }
        else {
            self.coeffs[index] >= self.threshold
        }
    }

    /// Append one bit; in fixed-rate mode, signal once the budget is full.
    #[inline]
    fn push_bit(&mut self, bit: bool) -> CodeResult {
        self.bits.push(bit);
        if self.bits.len() >= self.budget {
            return Err(BudgetMet);
        }
        Ok(())
    }

    /// Consume one bit; signal when the readable range is exhausted.
    #[inline]
    fn read_bit(&mut self) -> CodeResult<bool> {
        if self.bit_cursor >= self.budget {
            return Err(BudgetMet);
        }
        let bit = self.bits[self.bit_cursor];
        self.bit_cursor += 1;
        Ok(bit)
    }

    /// Remove tombstoned entries from the LIS buckets and the LIP.
    fn clean_lis(&mut self) {
        for bucket in self.lis.iter_mut() {
            bucket.retain(|set| !set.garbage);
        }
        self.lip.retain(|&pixel| pixel != SENTINEL);
    }

    // ---- encoding ----

    /// One sorting pass: the LIP first, then the LIS buckets from the
    /// finest partition level down to the coarsest, in append order.
    fn sorting_pass_encode(&mut self) -> CodeResult {
        // The LIP scan touches disjoint slots only, so it runs in
        // parallel into a per-slot state buffer. Serializing the states
        // into the bit buffer afterwards preserves the bit order.
        let lip_len = self.lip.len();
        self.lsp_new.clear();
        self.lsp_new.resize(lip_len, SENTINEL);
        self.scan_states.clear();
        self.scan_states.resize(lip_len, STATE_INSIG);

        {
            let threshold = self.threshold;
            let sig_map_enabled = self.sig_map_enabled;
            let sig_map = &self.sig_map;
            let coeffs = &self.coeffs;
            let signs = &self.signs;

            self.lip
                .par_iter_mut()
                .zip(self.lsp_new.par_iter_mut())
                .zip(self.scan_states.par_iter_mut())
                .for_each(|((pixel, new_slot), state)| {
                    let index = *pixel as usize;
                    let significant =
                        if sig_map_enabled { sig_map[index] } else { coeffs[index] >= threshold };

                    if significant {
                        *state = if signs[index] { STATE_SIG_POS } else { STATE_SIG_NEG };
                        *new_slot = *pixel;
                        *pixel = SENTINEL;
                    }
                });
        }

        self.lsp_new.retain(|&index| index != SENTINEL);

        for position in 0 .. lip_len {
            match self.scan_states[position] {
                STATE_SIG_POS => {
                    self.push_bit(true)?;
                    self.push_bit(true)?;
                }
                STATE_SIG_NEG => {
                    self.push_bit(true)?;
                    self.push_bit(false)?;
                }
                _ => self.push_bit(false)?,
            }
        }

        for reverse in 1 ..= self.lis.len() {
            let bucket = self.lis.len() - reverse;
            let mut position = 0;
            while position < self.lis[bucket].len() {
                if !self.lis[bucket][position].garbage {
                    self.process_s_encode(bucket, position, Significance::Dunno)?;
                }
                position += 1;
            }
        }

        Ok(())
    }

    /// One refinement pass: one bit per previously significant pixel,
    /// then silent residual subtraction for the pixels that just became
    /// significant (their value bit was already coded in the sorting pass).
    fn refinement_pass_encode(&mut self) -> CodeResult {
        let old_len = self.lsp_old.len();
        self.scan_states.clear();
        self.scan_states.resize(old_len, STATE_INSIG);

        if self.sig_map_enabled {
            let sig_map = &self.sig_map;
            self.scan_states
                .par_iter_mut()
                .zip(self.lsp_old.par_iter())
                .for_each(|(state, &index)| {
                    if sig_map[index as usize] {
                        *state = STATE_SIG_POS;
                    }
                });
            // the residual subtraction for these pixels happens below,
            // together with the newly significant ones
        }
        else {
            for position in 0 .. old_len {
                let index = self.lsp_old[position] as usize;
                if self.coeffs[index] >= self.threshold {
                    self.coeffs[index] -= self.threshold;
                    self.scan_states[position] = STATE_SIG_POS;
                }
            }
        }

        for position in 0 .. old_len {
            let bit = self.scan_states[position] != STATE_INSIG;
            self.push_bit(bit)?;
        }

        if self.sig_map_enabled {
            // one sweep covers both lists: anything still at or above the
            // threshold is either an old significant pixel whose state was
            // just coded, or a pixel that turned significant this plane
            let threshold = self.threshold;
            self.coeffs.par_iter_mut().for_each(|coeff| {
                if *coeff >= threshold {
                    *coeff -= threshold;
                }
            });
        }
        else {
            for &index in &self.lsp_new {
                self.coeffs[index as usize] -= self.threshold;
            }
        }

        self.lsp_old.extend_from_slice(&self.lsp_new);
        self.lsp_new.clear();

        Ok(())
    }

    fn process_p_encode(&mut self, position: usize, hint: Significance) -> CodeResult {
        debug_assert!(hint != Significance::NewlySig);
        let index = self.lip[position] as usize;

        let significant = match hint {
            Significance::Sig => true,
            Significance::Insig => false,
            _ => self.pixel_is_significant(index),
        };

        self.push_bit(significant)?;

        if significant {
            self.push_bit(self.signs[index])?;
            self.lsp_new.push(index as u64);
            self.lip[position] = SENTINEL;
        }

        Ok(())
    }

    /// Scan a set for its first significant coefficient, in z-major
    /// order. Returns the hit position relative to the set's corner.
    fn decide_significance(&self, set: &SpeckSet3d) -> Option<(u32, u32, u32)> {
        debug_assert!(!set.is_empty());

        let row = self.dims.x();
        let slice = self.dims.x() * self.dims.y();

        for z in set.start_z .. set.start_z + set.length_z {
            let slice_offset = z as usize * slice;
            for y in set.start_y .. set.start_y + set.length_y {
                let row_offset = slice_offset + y as usize * row;
                for x in set.start_x .. set.start_x + set.length_x {
                    if self.pixel_is_significant(row_offset + x as usize) {
                        return Some((x - set.start_x, y - set.start_y, z - set.start_z));
                    }
                }
            }
        }

        None
    }

    fn process_s_encode(&mut self, bucket: usize, position: usize, hint: Significance) -> CodeResult {
        debug_assert!(hint != Significance::NewlySig);

        let set = self.lis[bucket][position];
        let mut subset_sigs = [Significance::Dunno; 8];

        let significance = match hint {
            Significance::Dunno => match self.decide_significance(&set) {
                Some((x, y, z)) => {
                    // The scan visits the subsets in their sub-index order,
                    // so the hit pins down its own subset, and a hit in the
                    // upper-depth block proves the four lower ones empty of
                    // significance. Passing these facts down skips rescans
                    // without changing any emitted bit.
                    let mut sub_index = 0;
                    if x >= set.length_x - set.length_x / 2 { sub_index += 1 }
                    if y >= set.length_y - set.length_y / 2 { sub_index += 2 }
                    if z >= set.length_z - set.length_z / 2 { sub_index += 4 }

                    subset_sigs[sub_index] = Significance::Sig;
                    if sub_index >= 4 {
                        for sig in &mut subset_sigs[.. 4] {
                            *sig = Significance::Insig;
                        }
                    }

                    Significance::Sig
                }
                None => Significance::Insig,
            },
            known => known,
        };

        self.lis[bucket][position].significance = significance;
        let significant = self.lis[bucket][position].significance == Significance::Sig;
        self.push_bit(significant)?;

        if significant {
            self.code_s_encode(set, subset_sigs)?;
            self.lis[bucket][position].garbage = true;
        }

        Ok(())
    }

    /// Partition a significant set and process all eight subsets in
    /// sub-index order. Pixels join the LIP, boxes join the LIS;
    /// empty subsets produce no bit at all.
    fn code_s_encode(&mut self, set: SpeckSet3d, subset_sigs: [Significance; 8]) -> CodeResult {
        let subsets = partition_xyz(&set);

        for (subset, hint) in subsets.iter().zip(subset_sigs) {
            if subset.is_pixel() {
                let index = Vec3(subset.start_x as usize, subset.start_y as usize, subset.start_z as usize)
                    .flat_index_for_size(self.dims);
                self.lip.push(index as u64);
                self.process_p_encode(self.lip.len() - 1, hint)?;
            }
            else if !subset.is_empty() {
                let bucket = subset.part_level as usize;
                self.lis[bucket].push(*subset);
                let position = self.lis[bucket].len() - 1;
                self.process_s_encode(bucket, position, hint)?;
            }
        }

        Ok(())
    }

    // ---- decoding ----

    fn sorting_pass_decode(&mut self) -> CodeResult {
        self.lsp_new.reserve(self.lip.len());

        for position in 0 .. self.lip.len() {
            self.process_p_decode(position)?;
        }

        for reverse in 1 ..= self.lis.len() {
            let bucket = self.lis.len() - reverse;
            let mut position = 0;
            while position < self.lis[bucket].len() {
                if !self.lis[bucket][position].garbage {
                    self.process_s_decode(bucket, position)?;
                }
                position += 1;
            }
        }

        Ok(())
    }

    fn refinement_pass_decode(&mut self) -> CodeResult {
        let refinable = (self.budget - self.bit_cursor).min(self.lsp_old.len());
        let half = self.threshold * 0.5;

        for position in 0 .. refinable {
            let index = self.lsp_old[position] as usize;
            let up = self.bits[self.bit_cursor + position];
            self.coeffs[index] += if up { half } else { -half };
        }

        self.bit_cursor += refinable;
        if self.bit_cursor >= self.budget {
            return Err(BudgetMet);
        }

        let newly = self.threshold * 1.5;
        for &index in &self.lsp_new {
            self.coeffs[index as usize] = newly;
        }

        self.lsp_old.extend_from_slice(&self.lsp_new);
        self.lsp_new.clear();

        Ok(())
    }

    fn process_p_decode(&mut self, position: usize) -> CodeResult {
        if self.read_bit()? {
            let pixel = self.lip[position];

            if !self.read_bit()? {
                self.signs[pixel as usize] = false;
            }

            self.lip[position] = SENTINEL;
            self.lsp_new.push(pixel);
        }

        Ok(())
    }

    fn process_s_decode(&mut self, bucket: usize, position: usize) -> CodeResult {
        debug_assert!(!self.lis[bucket][position].is_pixel());

        let bit = self.read_bit()?;
        self.lis[bucket][position].significance =
            if bit { Significance::Sig } else { Significance::Insig };

        if self.lis[bucket][position].significance == Significance::Sig {
            let set = self.lis[bucket][position];
            self.code_s_decode(set)?;
            self.lis[bucket][position].garbage = true;
        }

        Ok(())
    }

    fn code_s_decode(&mut self, set: SpeckSet3d) -> CodeResult {
        let subsets = partition_xyz(&set);

        for subset in &subsets {
            if subset.is_pixel() {
                let index = Vec3(subset.start_x as usize, subset.start_y as usize, subset.start_z as usize)
                    .flat_index_for_size(self.dims);
                self.lip.push(index as u64);
                self.process_p_decode(self.lip.len() - 1)?;
            }
            else if !subset.is_empty() {
                let bucket = subset.part_level as usize;
                self.lis[bucket].push(*subset);
                let position = self.lis[bucket].len() - 1;
                self.process_s_decode(bucket, position)?;
            }
        }

        Ok(())
    }
}

/// Split a set into its eight octants. Sub-index `i = x + 2y + 4z` over
/// the axis bits; the partition level grows by one per axis actually split.
fn partition_xyz(set: &SpeckSet3d) -> [SpeckSet3d; 8] {
    let lengths_x = split(set.length_x);
    let lengths_y = split(set.length_y);
    let lengths_z = split(set.length_z);

    let mut part_level = set.part_level;
    if lengths_x[1] > 0 { part_level += 1 }
    if lengths_y[1] > 0 { part_level += 1 }
    if lengths_z[1] > 0 { part_level += 1 }

    let starts_x = [set.start_x, set.start_x + lengths_x[0]];
    let starts_y = [set.start_y, set.start_y + lengths_y[0]];
    let starts_z = [set.start_z, set.start_z + lengths_z[0]];

    let mut subsets = [SpeckSet3d::default(); 8];
    for z in 0 .. 2 {
        for y in 0 .. 2 {
            for x in 0 .. 2 {
                let subset = &mut subsets[x + 2 * y + 4 * z];
                subset.start_x = starts_x[x];
                subset.length_x = lengths_x[x];
                subset.start_y = starts_y[y];
                subset.length_y = lengths_y[y];
                subset.start_z = starts_z[z];
                subset.length_z = lengths_z[z];
                subset.part_level = part_level;
            }
        }
    }

    subsets
}

/// Split a set into four quadrants in the plane, leaving depth alone.
fn partition_xy(set: &SpeckSet3d) -> [SpeckSet3d; 4] {
    let lengths_x = split(set.length_x);
    let lengths_y = split(set.length_y);

    let mut part_level = set.part_level;
    if lengths_x[1] > 0 { part_level += 1 }
    if lengths_y[1] > 0 { part_level += 1 }

    let starts_x = [set.start_x, set.start_x + lengths_x[0]];
    let starts_y = [set.start_y, set.start_y + lengths_y[0]];

    let mut subsets = [SpeckSet3d::default(); 4];
    for y in 0 .. 2 {
        for x in 0 .. 2 {
            let subset = &mut subsets[x + 2 * y];
            subset.start_x = starts_x[x];
            subset.length_x = lengths_x[x];
            subset.start_y = starts_y[y];
            subset.length_y = lengths_y[y];
            subset.start_z = set.start_z;
            subset.length_z = set.length_z;
            subset.part_level = part_level;
        }
    }

    subsets
}

/// Split a set into two halves along the depth axis.
fn partition_z(set: &SpeckSet3d) -> [SpeckSet3d; 2] {
    let lengths_z = split(set.length_z);

    let mut part_level = set.part_level;
    if lengths_z[1] > 0 { part_level += 1 }

    let starts_z = [set.start_z, set.start_z + lengths_z[0]];

    let mut subsets = [SpeckSet3d::default(); 2];
    for (z, subset) in subsets.iter_mut().enumerate() {
        subset.start_x = set.start_x;
        subset.length_x = set.length_x;
        subset.start_y = set.start_y;
        subset.length_y = set.length_y;
        subset.start_z = starts_z[z];
        subset.length_z = lengths_z[z];
        subset.part_level = part_level;
    }

    subsets
}

#[cfg(test)]
mod test {
    use super::*;

    fn covered_indices(sets: &[SpeckSet3d], dims: Vec3<usize>) -> Vec<usize> {
        let mut indices = Vec::new();
        for set in sets {
            for z in set.start_z .. set.start_z + set.length_z {
                for y in set.start_y .. set.start_y + set.length_y {
                    for x in set.start_x .. set.start_x + set.length_x {
                        indices.push(Vec3(x as usize, y as usize, z as usize).flat_index_for_size(dims));
                    }
                }
            }
        }
        indices
    }

    #[test]
    fn octants_partition_exactly() {
        let set = SpeckSet3d { length_x: 7, length_y: 5, length_z: 3, .. SpeckSet3d::default() };
        let dims = Vec3(7, 5, 3);

        let subsets = partition_xyz(&set);
        let mut indices = covered_indices(&subsets, dims);
        indices.sort_unstable();

        // every position exactly once
        assert_eq!(indices, (0 .. dims.volume()).collect::<Vec<_>>());

        // odd lengths put the larger half first
        assert_eq!(subsets[0].length_x, 4);
        assert_eq!(subsets[1].length_x, 3);
        assert_eq!(subsets[0].length_z, 2);
        assert_eq!(subsets[4].length_z, 1);

        // all three axes split
        assert!(subsets.iter().all(|subset| subset.part_level == 3));
    }

    #[test]
    fn degenerate_axes_do_not_raise_the_level() {
        let set = SpeckSet3d { length_x: 1, length_y: 1, length_z: 4, .. SpeckSet3d::default() };
        let subsets = partition_xyz(&set);

        // only the depth axis actually split
        assert!(subsets.iter().all(|subset| subset.part_level == 1));
        assert_eq!(subsets.iter().filter(|subset| !subset.is_empty()).count(), 2);
    }

    #[test]
    fn initial_lists_cover_the_volume() {
        let dims = Vec3(17, 17, 17);
        let mut coder = Speck3d::new(dims);
        coder.initialize_lists();

        let all_sets: Vec<SpeckSet3d> =
            coder.lis.iter().flatten().copied().collect();
        let mut indices = covered_indices(&all_sets, dims);
        indices.sort_unstable();

        assert_eq!(indices, (0 .. dims.volume()).collect::<Vec<_>>());
        assert!(coder.lip.is_empty());
        assert_eq!(coder.lis.len(), 1 + 3 * num_partitions(17));
    }

    #[test]
    fn coder_roundtrip_close_to_original() {
        let dims = Vec3(10, 10, 10);
        let field: Vec<f64> = (0 .. dims.volume())
            .map(|index| {
                let wave = ((index % 97) as f64 * 0.21).sin() * 100.0;
                let spike = if index % 31 == 0 { 900.0 } else { 0.0 };
                wave + spike - 40.0
            })
            .collect();

        let mut encoder = Speck3d::new(dims);
        encoder.take_coeffs(field.clone()).unwrap();
        encoder.set_termination(Termination::BitBudget(64 * dims.volume() as u64));
        encoder.encode().unwrap();

        let mut decoder = Speck3d::new(dims);
        decoder.set_max_coeff_bits(encoder.max_coeff_bits());
        decoder.take_bits(encoder.release_bits());
        decoder.decode().unwrap();

        let decoded = decoder.release_coeffs();
        for (&original, &reconstructed) in field.iter().zip(&decoded) {
            assert!(
                (original - reconstructed).abs() < 1e-4,
                "{} decoded as {}", original, reconstructed
            );
        }
    }

    #[test]
    fn quant_level_roundtrip_stays_in_bin() {
        let dims = Vec3(8, 8, 8);
        let field: Vec<f64> = (0 .. dims.volume())
            .map(|index| ((index * 13 % 512) as f64 - 256.0) * 0.5)
            .collect();

        let mut encoder = Speck3d::new(dims);
        encoder.take_coeffs(field.clone()).unwrap();
        encoder.set_termination(Termination::QuantLevel(-10));
        encoder.encode().unwrap();

        assert_eq!(encoder.bit_count() % 8, 0);

        let mut decoder = Speck3d::new(dims);
        decoder.set_max_coeff_bits(encoder.max_coeff_bits());
        decoder.take_bits(encoder.release_bits());
        decoder.decode().unwrap();

        let decoded = decoder.release_coeffs();
        for (&original, &reconstructed) in field.iter().zip(&decoded) {
            assert!((original - reconstructed).abs() < (2.0_f64).powi(-9));
        }
    }

    #[test]
    fn rejects_thin_volumes_and_oversized_budgets() {
        let mut coder = Speck3d::new(Vec3(4, 4, 1));
        coder.take_coeffs(vec![1.0; 16]).unwrap();
        coder.set_termination(Termination::BitBudget(64));
        assert!(coder.encode().is_err());

        let mut coder = Speck3d::new(Vec3(4, 4, 4));
        coder.take_coeffs(vec![1.0; 64]).unwrap();
        coder.set_termination(Termination::BitBudget(64 * 64 + 8));
        assert!(matches!(coder.encode(), Err(Error::InvalidParam(_))));
    }

    #[test]
    fn budget_limits_the_stream_length() {
        let dims = Vec3(16, 16, 16);
        let field: Vec<f64> = (0 .. dims.volume()).map(|index| (index as f64 * 0.37).sin() * 50.0).collect();

        let mut encoder = Speck3d::new(dims);
        encoder.take_coeffs(field).unwrap();
        encoder.set_termination(Termination::BitBudget(4 * dims.volume() as u64));
        encoder.encode().unwrap();

        assert_eq!(encoder.bit_count(), 4 * dims.volume());
    }

    #[test]
    fn constant_field_decodes_to_zeros() {
        let dims = Vec3(8, 8, 8);

        let mut encoder = Speck3d::new(dims);
        encoder.take_coeffs(vec![0.0; dims.volume()]).unwrap();
        encoder.set_termination(Termination::BitBudget(8 * dims.volume() as u64));
        encoder.encode().unwrap();

        let mut decoder = Speck3d::new(dims);
        decoder.set_max_coeff_bits(encoder.max_coeff_bits());
        decoder.take_bits(encoder.release_bits());
        decoder.decode().unwrap();

        assert!(decoder.release_coeffs().iter().all(|&coeff| coeff == 0.0));
    }
}
