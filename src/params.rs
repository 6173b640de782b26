// Mapping options shared by the CLI and the library entry points.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::MapError;
use crate::kernel::KernelParams;
use crate::swa::SwScoring;

/// Template selection policy for concordant mapping.
///
/// A subread counts as "full pass" when it is bracketed by adapter intervals
/// on both sides. Every policy falls back to the left-most longest surviving
/// interval when no full-pass subread exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplatePolicy {
    /// Left-most longest full-pass subread.
    LongestSubread,
    /// Full-pass subread whose length is closest to the upper median of the
    /// full-pass lengths.
    TypicalSubread,
    /// Full-pass subread whose length is closest to the interpolated median
    /// of the full-pass lengths.
    MedianSubread,
}

impl TemplatePolicy {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "longestsubread" => Ok(TemplatePolicy::LongestSubread),
            "typicalsubread" => Ok(TemplatePolicy::TypicalSubread),
            "mediansubread" => Ok(TemplatePolicy::MedianSubread),
            _ => Err(format!(
                "Unknown concordant template '{}'. Expected one of \
                 longestsubread, typicalsubread, mediansubread.",
                s
            )),
        }
    }
}

/// Inclusive hole-number ranges parsed from a `--holeNumbers` list such as
/// "64,1024-2048,4096".
#[derive(Debug, Clone)]
pub struct HoleNumberRanges {
    ranges: Vec<(u32, u32)>,
}

impl HoleNumberRanges {
    pub fn parse(s: &str) -> Result<Self, String> {
        let mut ranges = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (lo, hi) = match part.split_once('-') {
                Some((a, b)) => {
                    let lo = a
                        .parse::<u32>()
                        .map_err(|_| format!("Invalid hole number: {}", a))?;
                    let hi = b
                        .parse::<u32>()
                        .map_err(|_| format!("Invalid hole number: {}", b))?;
                    (lo, hi)
                }
                None => {
                    let h = part
                        .parse::<u32>()
                        .map_err(|_| format!("Invalid hole number: {}", part))?;
                    (h, h)
                }
            };
            if lo > hi {
                return Err(format!("Hole number range {}-{} is reversed", lo, hi));
            }
            ranges.push((lo, hi));
        }
        if ranges.is_empty() {
            return Err(format!("Empty hole number list: {}", s));
        }
        Ok(HoleNumberRanges { ranges })
    }

    pub fn contains(&self, hole: u32) -> bool {
        self.ranges.iter().any(|&(lo, hi)| lo <= hole && hole <= hi)
    }

    /// Largest hole number covered by any range. Fetching past this value
    /// lets the Read Source stop early on instrument-ordered input.
    pub fn max(&self) -> u32 {
        self.ranges.iter().map(|&(_, hi)| hi).max().unwrap_or(0)
    }
}

/// All knobs the mapping run consumes. Mirrors the command line one to one;
/// `main` fills this in from clap and calls `make_sane` before running.
#[derive(Debug, Clone)]
pub struct MapParams {
    // Inputs
    pub genome_file: PathBuf,
    pub read_files: Vec<PathBuf>,
    pub sa_file: Option<PathBuf>,
    pub ctab_file: Option<PathBuf>,
    pub region_table_file: Option<PathBuf>,
    pub ccs_fofn_file: Option<PathBuf>,

    // Outputs
    pub out_file: Option<PathBuf>,
    pub unaligned_file: Option<PathBuf>,
    pub print_sam: bool,

    // Molecule filtering
    pub min_read_length: usize,
    pub min_subread_length: usize,
    pub min_raw_subread_score: i32,
    pub min_avg_qual: f64,
    pub max_read_length: usize, // 0 = no cap
    pub hole_numbers: Option<HoleNumberRanges>,
    pub subsample: f64,

    // Alignment
    pub max_score: i32,
    pub bestn: usize,
    pub n_candidates: usize,
    pub min_match_len: usize,
    pub max_seed_hits: usize,
    pub max_kmer_freq: u32,
    pub match_score: i32,
    pub mismatch: i32,
    pub insertion: i32,
    pub deletion: i32,
    pub do_sensitive_search: bool,
    pub store_mapqv: bool,

    // Modes
    pub map_subreads_separately: bool,
    pub concordant: bool,
    pub concordant_template: TemplatePolicy,
    pub concordant_align_both_directions: bool,
    pub flank_size: usize,
    pub use_ccs: bool,
    pub use_all_subreads_in_ccs: bool,
    pub use_ccs_only: bool,
    pub by_adapter: bool,

    // Runtime
    pub n_proc: usize,
    pub random_seed: u64,
    pub verbosity: i32,
    pub tuple_size: usize,
}

impl Default for MapParams {
    fn default() -> Self {
        MapParams {
            genome_file: PathBuf::new(),
            read_files: Vec::new(),
            sa_file: None,
            ctab_file: None,
            region_table_file: None,
            ccs_fofn_file: None,

            out_file: None,
            unaligned_file: None,
            print_sam: false,

            min_read_length: 50,
            min_subread_length: 0,
            min_raw_subread_score: 0,
            min_avg_qual: 0.0,
            max_read_length: 0,
            hole_numbers: None,
            subsample: 1.0,

            max_score: -200,
            bestn: 10,
            n_candidates: 10,
            min_match_len: 12,
            max_seed_hits: 100,
            max_kmer_freq: 1000,
            match_score: 5,
            mismatch: 6,
            insertion: 5,
            deletion: 5,
            do_sensitive_search: false,
            store_mapqv: true,

            map_subreads_separately: true,
            concordant: false,
            concordant_template: TemplatePolicy::LongestSubread,
            concordant_align_both_directions: false,
            flank_size: 40,
            use_ccs: false,
            use_all_subreads_in_ccs: false,
            use_ccs_only: false,
            by_adapter: false,

            n_proc: 1,
            random_seed: 0,
            verbosity: 3,
            tuple_size: 8,
        }
    }
}

impl MapParams {
    /// Validate and normalize the options. Configuration problems are fatal
    /// at startup; minor inconsistencies are repaired with a warning.
    pub fn make_sane(&mut self) -> Result<(), MapError> {
        if self.read_files.is_empty() {
            return Err(MapError::Config("no read files specified".to_string()));
        }
        if self.bestn == 0 {
            return Err(MapError::Config("--bestn must be at least 1".to_string()));
        }
        if self.n_candidates == 0 {
            return Err(MapError::Config(
                "--nCandidates must be at least 1".to_string(),
            ));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(MapError::Config(format!(
                "--subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        if self.use_ccs && self.ccs_fofn_file.is_none() {
            return Err(MapError::Config(
                "CCS modes require a consensus file (--ccsFofn)".to_string(),
            ));
        }
        if self.concordant && !self.map_subreads_separately {
            log::warn!("Option --concordant has no effect with --noSplitSubreads; disabling it.");
            self.concordant = false;
        }
        if self.min_match_len < self.tuple_size {
            log::warn!(
                "The value of --minMatch {} is less than the smallest searched length of {}. \
                 Setting --minMatch to {}.",
                self.min_match_len,
                self.tuple_size,
                self.tuple_size
            );
            self.min_match_len = self.tuple_size;
        }
        if self.n_proc == 0 {
            log::warn!("Invalid --nproc 0, using 1 worker");
            self.n_proc = 1;
        }
        if self.random_seed == 0 {
            // Time-seeded run: selection is still reproducible per molecule
            // for the lifetime of this process.
            self.random_seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(1)
                .max(1);
            log::info!("Seeding random generator from time: {}", self.random_seed);
        }
        Ok(())
    }

    /// True when any of the CCS alignment modes is active.
    pub fn uses_ccs(&self) -> bool {
        self.use_ccs
    }

    pub fn kernel_params(&self) -> KernelParams {
        KernelParams {
            min_match_len: self.min_match_len,
            max_seed_hits: self.max_seed_hits,
            max_kmer_freq: self.max_kmer_freq,
            n_candidates: self.n_candidates,
        }
    }

    /// More sensitive profile for the retry pass: shorter seeds, more seed
    /// hits and more clusters carried into extension.
    pub fn sensitive_kernel_params(&self) -> KernelParams {
        KernelParams {
            min_match_len: self.min_match_len.saturating_sub(4).max(self.tuple_size),
            max_seed_hits: self.max_seed_hits * 4,
            max_kmer_freq: self.max_kmer_freq.saturating_mul(4),
            n_candidates: self.n_candidates * 3,
        }
    }

    pub fn scoring(&self) -> SwScoring {
        SwScoring {
            match_score: self.match_score,
            mismatch: self.mismatch,
            insertion: self.insertion,
            deletion: self.deletion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let p = MapParams::default();
        assert_eq!(p.min_read_length, 50, "Min read length should be 50");
        assert_eq!(p.max_score, -200, "Max score should be -200");
        assert_eq!(p.bestn, 10, "bestn should be 10");
        assert_eq!(p.flank_size, 40, "Flank size should be 40");
        assert_eq!(p.min_match_len, 12, "Min match should be 12");
        assert!(p.map_subreads_separately);
        assert!(!p.concordant);
        assert_eq!(p.concordant_template, TemplatePolicy::LongestSubread);
    }

    #[test]
    fn test_parse_template_policy() {
        assert_eq!(
            TemplatePolicy::parse("longestsubread").unwrap(),
            TemplatePolicy::LongestSubread
        );
        assert_eq!(
            TemplatePolicy::parse("mediansubread").unwrap(),
            TemplatePolicy::MedianSubread
        );
        assert!(TemplatePolicy::parse("bestsubread").is_err());
    }

    #[test]
    fn test_parse_hole_ranges() {
        let r = HoleNumberRanges::parse("64,1024-2048,4096").unwrap();
        assert!(r.contains(64));
        assert!(!r.contains(65));
        assert!(r.contains(1024));
        assert!(r.contains(2048));
        assert!(r.contains(4096));
        assert_eq!(r.max(), 4096);

        assert!(HoleNumberRanges::parse("10-5").is_err());
        assert!(HoleNumberRanges::parse("").is_err());
        assert!(HoleNumberRanges::parse("abc").is_err());
    }

    #[test]
    fn test_make_sane_rejects_bad_config() {
        let mut p = MapParams::default();
        p.read_files.push(PathBuf::from("reads.fasta"));
        p.bestn = 0;
        assert!(p.make_sane().is_err());

        let mut p = MapParams::default();
        p.read_files.push(PathBuf::from("reads.fasta"));
        p.subsample = 0.0;
        assert!(p.make_sane().is_err());

        // CCS mode without a consensus sidecar is a configuration error.
        let mut p = MapParams::default();
        p.read_files.push(PathBuf::from("reads.fasta"));
        p.use_ccs = true;
        assert!(p.make_sane().is_err());
    }

    #[test]
    fn test_make_sane_repairs_minor_issues() {
        let mut p = MapParams::default();
        p.read_files.push(PathBuf::from("reads.fasta"));
        p.min_match_len = 4;
        p.random_seed = 42;
        p.make_sane().unwrap();
        assert_eq!(p.min_match_len, p.tuple_size);
        assert_eq!(p.random_seed, 42, "explicit seed must be kept");
    }

    #[test]
    fn test_sensitive_profile_is_more_permissive() {
        let p = MapParams::default();
        let normal = p.kernel_params();
        let sensitive = p.sensitive_kernel_params();
        assert!(sensitive.min_match_len < normal.min_match_len);
        assert!(sensitive.max_seed_hits > normal.max_seed_hits);
        assert!(sensitive.n_candidates > normal.n_candidates);
    }
}
