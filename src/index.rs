// Shared read-only index structures: suffix array, BWT-FM view, tuple count
// table. Built once before the workers start and never mutated afterwards;
// workers share the handle through a cheap `Arc` clone.
//
// Suffix array construction is delegated to the `bio` crate. Precomputed
// `.sa` / `.ctab` files (from the `index` subcommand) are loaded when given
// on the command line; otherwise everything is built on the fly from the
// reference.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bio::alphabets::Alphabet;
use bio::data_structures::bwt::{bwt, less, Less, Occ, BWT};
use bio::data_structures::fmindex::FMIndex;
use bio::data_structures::suffix_array::{suffix_array, RawSuffixArray};
use rayon::prelude::*;

use crate::error::MapError;
use crate::seqdb::SeqDb;

/// Occurrence checkpoint sampling rate for the FM view.
const OCC_SAMPLING_RATE: u32 = 64;

/// Borrowed FM-index view over the shared BWT tables.
pub type FmView<'a> = FMIndex<&'a BWT, &'a Less, &'a Occ>;

fn text_alphabet() -> Alphabet {
    // Symbols that can occur in the concatenated text, sentinel included.
    Alphabet::new(b"$ACGNT")
}

/// k-mer frequency table over the reference, used to skip seeds whose prefix
/// is too common to be informative.
#[derive(Debug)]
pub struct TupleCountTable {
    tuple_size: usize,
    counts: Vec<u32>,
}

impl TupleCountTable {
    pub fn build(seqdb: &SeqDb, text: &[u8], tuple_size: usize) -> Self {
        let size = 1usize << (2 * tuple_size);
        let counts = seqdb
            .entries()
            .par_iter()
            .map(|entry| {
                let contig = &text[entry.offset..entry.offset + entry.len];
                let mut local = vec![0u32; size];
                if contig.len() >= tuple_size {
                    for w in contig.windows(tuple_size) {
                        if let Some(code) = Self::encode(w) {
                            local[code] = local[code].saturating_add(1);
                        }
                    }
                }
                local
            })
            .reduce(
                || vec![0u32; size],
                |mut acc, local| {
                    for (a, b) in acc.iter_mut().zip(local) {
                        *a = a.saturating_add(b);
                    }
                    acc
                },
            );
        TupleCountTable { tuple_size, counts }
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    fn encode(window: &[u8]) -> Option<usize> {
        let mut code = 0usize;
        for &b in window {
            code = (code << 2)
                | match b {
                    b'A' => 0,
                    b'C' => 1,
                    b'G' => 2,
                    b'T' => 3,
                    _ => return None,
                };
        }
        Some(code)
    }

    /// Frequency of the leading tuple of `window` in the reference. `None`
    /// when the window is too short or contains an ambiguous base.
    pub fn frequency(&self, window: &[u8]) -> Option<u32> {
        if window.len() < self.tuple_size {
            return None;
        }
        Self::encode(&window[..self.tuple_size]).map(|code| self.counts[code])
    }

    pub fn write_to(&self, path: &Path) -> Result<(), MapError> {
        let file = File::create(path).map_err(|e| MapError::open(path, e))?;
        let mut out = BufWriter::new(file);
        out.write_all(&(self.tuple_size as u32).to_le_bytes())
            .map_err(MapError::IoWrite)?;
        out.write_all(&(self.counts.len() as u64).to_le_bytes())
            .map_err(MapError::IoWrite)?;
        for c in &self.counts {
            out.write_all(&c.to_le_bytes()).map_err(MapError::IoWrite)?;
        }
        out.flush().map_err(MapError::IoWrite)
    }

    pub fn read_from(path: &Path) -> Result<Self, MapError> {
        let file = File::open(path).map_err(|e| MapError::open(path, e))?;
        let mut reader = BufReader::new(file);
        let mut buf_u32 = [0u8; 4];
        let mut buf_u64 = [0u8; 8];

        reader
            .read_exact(&mut buf_u32)
            .map_err(|e| MapError::read(path, e))?;
        let tuple_size = u32::from_le_bytes(buf_u32) as usize;
        reader
            .read_exact(&mut buf_u64)
            .map_err(|e| MapError::read(path, e))?;
        let n = u64::from_le_bytes(buf_u64) as usize;
        if tuple_size == 0 || tuple_size > 15 || n != 1usize << (2 * tuple_size) {
            return Err(MapError::Config(format!(
                "{} is not a valid tuple count table",
                path.display()
            )));
        }
        let mut counts = Vec::with_capacity(n);
        for _ in 0..n {
            reader
                .read_exact(&mut buf_u32)
                .map_err(|e| MapError::read(path, e))?;
            counts.push(u32::from_le_bytes(buf_u32));
        }
        Ok(TupleCountTable { tuple_size, counts })
    }
}

fn write_suffix_array(path: &Path, sa: &RawSuffixArray) -> Result<(), MapError> {
    let file = File::create(path).map_err(|e| MapError::open(path, e))?;
    let mut out = BufWriter::new(file);
    out.write_all(&(sa.len() as u64).to_le_bytes())
        .map_err(MapError::IoWrite)?;
    for &p in sa {
        out.write_all(&(p as u64).to_le_bytes())
            .map_err(MapError::IoWrite)?;
    }
    out.flush().map_err(MapError::IoWrite)
}

fn read_suffix_array(path: &Path, expected_len: usize) -> Result<RawSuffixArray, MapError> {
    let file = File::open(path).map_err(|e| MapError::open(path, e))?;
    let mut reader = BufReader::new(file);
    let mut buf_u64 = [0u8; 8];

    reader
        .read_exact(&mut buf_u64)
        .map_err(|e| MapError::read(path, e))?;
    let n = u64::from_le_bytes(buf_u64) as usize;
    if n != expected_len {
        return Err(MapError::Config(format!(
            "{} is not a valid suffix array for this reference \
             ({} entries, reference has {}). Rebuild it with the index command.",
            path.display(),
            n,
            expected_len
        )));
    }
    let mut sa = Vec::with_capacity(n);
    for _ in 0..n {
        reader
            .read_exact(&mut buf_u64)
            .map_err(|e| MapError::read(path, e))?;
        sa.push(u64::from_le_bytes(buf_u64) as usize);
    }
    Ok(sa)
}

/// Immutable index handle shared by all workers.
pub struct ReferenceIndex {
    text: Vec<u8>, // genome + '$'
    seqdb: SeqDb,
    sa: RawSuffixArray,
    bwt: BWT,
    less: Less,
    occ: Occ,
    counts: TupleCountTable,
}

impl ReferenceIndex {
    /// Assemble the index for a mapping run. The suffix array and tuple
    /// count table are loaded from precomputed files when given, otherwise
    /// built from the reference text.
    pub fn prepare(
        seqdb: SeqDb,
        text: Vec<u8>,
        sa_file: Option<&Path>,
        ctab_file: Option<&Path>,
        tuple_size: usize,
    ) -> Result<Self, MapError> {
        let sa = match sa_file {
            Some(path) => {
                log::info!("Reading suffix array from {}", path.display());
                read_suffix_array(path, text.len())?
            }
            None => {
                log::info!(
                    "Building suffix array over {} bases ({} contigs)",
                    seqdb.total_len(),
                    seqdb.n_seqs()
                );
                suffix_array(&text)
            }
        };

        let alphabet = text_alphabet();
        let bwt = bwt(&text, &sa);
        let less = less(&bwt, &alphabet);
        let occ = Occ::new(&bwt, OCC_SAMPLING_RATE, &alphabet);

        let counts = match ctab_file {
            Some(path) => {
                log::info!("Reading tuple count table from {}", path.display());
                let counts = TupleCountTable::read_from(path)?;
                if counts.tuple_size() != tuple_size {
                    log::warn!(
                        "Tuple count table uses tuple size {}, overriding the configured {}",
                        counts.tuple_size(),
                        tuple_size
                    );
                }
                counts
            }
            None => TupleCountTable::build(&seqdb, &text, tuple_size),
        };

        Ok(ReferenceIndex {
            text,
            seqdb,
            sa,
            bwt,
            less,
            occ,
            counts,
        })
    }

    /// Genome bases without the trailing sentinel.
    pub fn genome(&self) -> &[u8] {
        &self.text[..self.seqdb.total_len()]
    }

    pub fn seqdb(&self) -> &SeqDb {
        &self.seqdb
    }

    pub fn sa(&self) -> &RawSuffixArray {
        &self.sa
    }

    /// FM-index view over the shared BWT tables. Cheap to construct; safe
    /// for concurrent readers.
    pub fn fm(&self) -> FmView<'_> {
        FMIndex::new(&self.bwt, &self.less, &self.occ)
    }

    pub fn counts(&self) -> &TupleCountTable {
        &self.counts
    }
}

/// Build and dump the precomputable index parts for the `index` subcommand.
/// Writes `<prefix>.sa` and `<prefix>.ctab`.
pub fn build_index_files(fasta: &Path, prefix: &Path, tuple_size: usize) -> Result<(), MapError> {
    let (seqdb, text) = crate::seqdb::read_reference(fasta)?;
    log::info!(
        "Building suffix array over {} bases ({} contigs)",
        seqdb.total_len(),
        seqdb.n_seqs()
    );
    let sa = suffix_array(&text);
    let sa_path = PathBuf::from(prefix.to_string_lossy().to_string() + ".sa");
    write_suffix_array(&sa_path, &sa)?;
    log::info!("Wrote {}", sa_path.display());

    let counts = TupleCountTable::build(&seqdb, &text, tuple_size);
    let ctab_path = PathBuf::from(prefix.to_string_lossy().to_string() + ".ctab");
    counts.write_to(&ctab_path)?;
    log::info!("Wrote {}", ctab_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seqdb;
    use bio::data_structures::fmindex::{BackwardSearchResult, FMIndexable};
    use std::io::Write as _;

    fn small_reference(dir: &Path) -> (SeqDb, Vec<u8>) {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join("ref.fa");
        let mut f = File::create(&path).unwrap();
        f.write_all(b">c1\nACGTACGTTTACGGACGT\n>c2\nGGGGCCCCAAAATTTT\n")
            .unwrap();
        seqdb::read_reference(&path).unwrap()
    }

    #[test]
    fn test_fm_view_finds_exact_matches() {
        let dir = PathBuf::from("target/test_index_fm");
        let (seqdb, text) = small_reference(&dir);
        let idx = ReferenceIndex::prepare(seqdb, text, None, None, 4).unwrap();

        let pattern = b"ACGT";
        let mut positions: Vec<usize> = match idx.fm().backward_search(pattern.iter()) {
            BackwardSearchResult::Complete(intv) => idx.sa()[intv.lower..intv.upper].to_vec(),
            _ => Vec::new(),
        };
        positions.sort_unstable();
        assert_eq!(positions, vec![0, 4, 14]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_tuple_count_table() {
        let dir = PathBuf::from("target/test_index_ctab");
        let (seqdb, text) = small_reference(&dir);
        let ct = TupleCountTable::build(&seqdb, &text, 4);
        // ACGT occurs three times in c1; contig boundaries are not crossed.
        assert_eq!(ct.frequency(b"ACGTACGT"), Some(3));
        assert_eq!(ct.frequency(b"NNNN"), None);
        assert_eq!(ct.frequency(b"AC"), None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_index_files_round_trip() {
        let dir = PathBuf::from("target/test_index_roundtrip");
        let (seqdb, text) = small_reference(&dir);

        build_index_files(&dir.join("ref.fa"), &dir.join("ref"), 4).unwrap();

        let idx = ReferenceIndex::prepare(
            seqdb,
            text.clone(),
            Some(&dir.join("ref.sa")),
            Some(&dir.join("ref.ctab")),
            4,
        )
        .unwrap();
        assert_eq!(idx.sa(), &suffix_array(&text));
        assert_eq!(idx.counts().frequency(b"ACGTACGT"), Some(3));

        // A suffix array for a different reference is rejected.
        let err = read_suffix_array(&dir.join("ref.sa"), 3);
        assert!(matches!(err, Err(MapError::Config(_))));

        std::fs::remove_dir_all(&dir).ok();
    }
}
