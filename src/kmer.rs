//src/kmer.rs

use ahash::AHashSet;

use crate::error::{Result, TaxError};
use crate::types::{Kmer, Sequence};

/// Largest supported k-mer length (24 bits packed).
pub const MAX_KMER_SIZE: usize = 12;

/// Largest supported step between window starts.
pub const MAX_STEP_SIZE: usize = 12;

const INVALID: u8 = 0xFF;

/// ASCII -> 2-bit code (A=0, T/U=1, C=2, G=3), `INVALID` for anything else.
static BASE_LUT: [u8; 256] = {
    let mut t = [INVALID; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'T' as usize] = 1;
    t[b't' as usize] = 1;
    t[b'U' as usize] = 1;
    t[b'u' as usize] = 1;
    t[b'C' as usize] = 2;
    t[b'c' as usize] = 2;
    t[b'G' as usize] = 3;
    t[b'g' as usize] = 3;
    t
};

#[inline]
fn encode_base_2bit(b: u8) -> Option<Kmer> {
    let code = BASE_LUT[b as usize];
    if code == INVALID {
        None
    } else {
        Some(code as Kmer)
    }
}

/// Reject k-mer and step sizes outside `1..=12`.
pub fn validate_kmer_params(kmer_size: usize, step_size: usize) -> Result<()> {
    if !(1..=MAX_KMER_SIZE).contains(&kmer_size) {
        return Err(TaxError::InvalidParameter(format!(
            "kmer_size must be in 1..={MAX_KMER_SIZE}, got {kmer_size}"
        )));
    }
    if !(1..=MAX_STEP_SIZE).contains(&step_size) {
        return Err(TaxError::InvalidParameter(format!(
            "step_size must be in 1..={MAX_STEP_SIZE}, got {step_size}"
        )));
    }
    Ok(())
}

/// Windows of `k` bases starting every `step` positions, packed most
/// significant base first. Cloning restarts nothing; it forks the cursor.
#[derive(Debug, Clone)]
pub struct KmerIter<'a> {
    seq: &'a [u8],
    k: usize,
    step: usize,
    pos: usize,
}

impl<'a> KmerIter<'a> {
    /// Validates the parameters and every residue up front, so iteration
    /// itself cannot fail.
    pub fn new(seq: &'a str, kmer_size: usize, step_size: usize) -> Result<Self> {
        validate_kmer_params(kmer_size, step_size)?;
        let bytes = seq.as_bytes();
        if let Some(pos) = bytes.iter().position(|&b| encode_base_2bit(b).is_none()) {
            let residue = seq[pos..].chars().next().unwrap_or('?');
            return Err(TaxError::InvalidResidue { residue, pos });
        }
        Ok(Self {
            seq: bytes,
            k: kmer_size,
            step: step_size,
            pos: 0,
        })
    }
}

impl Iterator for KmerIter<'_> {
    type Item = Kmer;

    fn next(&mut self) -> Option<Kmer> {
        let end = self.pos.checked_add(self.k)?;
        if end > self.seq.len() {
            return None;
        }
        let window = &self.seq[self.pos..end];
        self.pos += self.step;
        Some(
            window
                .iter()
                .fold(0, |val, &b| (val << 2) | BASE_LUT[b as usize] as Kmer),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = if self.pos + self.k > self.seq.len() {
            0
        } else {
            (self.seq.len() - self.k - self.pos) / self.step + 1
        };
        (n, Some(n))
    }
}

/// Distinct k-mers of `seq`.
pub fn kmer_set(seq: &str, kmer_size: usize, step_size: usize) -> Result<AHashSet<Kmer>> {
    Ok(KmerIter::new(seq, kmer_size, step_size)?.collect())
}

/// Anything a k-mer set can be extracted from.
pub trait KmerSource {
    fn to_kmers(&self, kmer_size: usize, step_size: usize) -> Result<AHashSet<Kmer>>;
}

impl KmerSource for str {
    fn to_kmers(&self, kmer_size: usize, step_size: usize) -> Result<AHashSet<Kmer>> {
        kmer_set(self, kmer_size, step_size)
    }
}

impl KmerSource for String {
    fn to_kmers(&self, kmer_size: usize, step_size: usize) -> Result<AHashSet<Kmer>> {
        kmer_set(self, kmer_size, step_size)
    }
}

impl KmerSource for Sequence {
    fn to_kmers(&self, kmer_size: usize, step_size: usize) -> Result<AHashSet<Kmer>> {
        kmer_set(&self.seq, kmer_size, step_size)
    }
}
