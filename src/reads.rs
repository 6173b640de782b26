// Molecule records and the serialized Read Source.
//
// The source owns the only mutex around input position: a successful call to
// `next` is the linearization point that fixes per-molecule global order and
// draws the molecule's random integer, so downstream selection does not
// depend on how many workers are pulling.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bio::io::{fasta, fastq};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::MapError;
use crate::params::MapParams;
use crate::regions::RegionTable;
use crate::seqdb::open_maybe_gz;

/// One molecule (ZMW) record.
#[derive(Debug, Clone)]
pub struct SmrtRead {
    pub title: String,
    pub movie: String,
    pub hole_number: u32,
    pub seq: Vec<u8>,
    /// Phred quality values, present for FASTQ input.
    pub qual: Option<Vec<u8>>,
    /// Subread coordinates parsed from a `movie/hole/start_end` title;
    /// (0, 0) when the title carries none.
    pub q_start: usize,
    pub q_end: usize,
    pub lq_prefix: usize,
    pub lq_suffix: usize,
    pub hq_score: i32,
}

impl SmrtRead {
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn average_quality(&self) -> Option<f64> {
        let qual = self.qual.as_ref()?;
        if qual.is_empty() {
            return None;
        }
        Some(qual.iter().map(|&q| q as f64).sum::<f64>() / qual.len() as f64)
    }

    pub fn has_subread_coordinates(&self) -> bool {
        self.q_end > self.q_start
    }
}

/// What one call to `ReadSource::next` hands a worker.
pub enum NextResult {
    Molecule(ZmwUnit),
    /// Pre-segmented subreads of one hole, emitted under `--concordant`;
    /// the worker stitches them into a synthetic polymerase read.
    Batch(BatchUnit),
    Exhausted,
}

pub struct ZmwUnit {
    pub read: SmrtRead,
    pub ccs: Option<SmrtRead>,
    pub regions: Option<Arc<RegionTable>>,
    pub rand_int: u32,
}

pub struct BatchUnit {
    pub subreads: Vec<SmrtRead>,
    pub rand_int: u32,
}

enum RecordReader {
    Fasta(fasta::Records<BufReader<Box<dyn Read + Send>>>),
    Fastq(fastq::Records<BufReader<Box<dyn Read + Send>>>),
}

impl RecordReader {
    fn open(path: &Path) -> Result<Self, MapError> {
        let raw = open_maybe_gz(path)?;
        if is_fastq_path(path) {
            Ok(RecordReader::Fastq(fastq::Reader::new(raw).records()))
        } else {
            Ok(RecordReader::Fasta(fasta::Reader::new(raw).records()))
        }
    }

    /// (title, sequence, phred qualities)
    #[allow(clippy::type_complexity)]
    fn next_raw(&mut self) -> Option<io::Result<(String, Vec<u8>, Option<Vec<u8>>)>> {
        match self {
            RecordReader::Fasta(records) => records.next().map(|r| {
                r.map(|rec| (rec.id().to_string(), rec.seq().to_vec(), None))
            }),
            RecordReader::Fastq(records) => records.next().map(|r| {
                r.map(|rec| {
                    let qual = rec.qual().iter().map(|&q| q.saturating_sub(33)).collect();
                    (rec.id().to_string(), rec.seq().to_vec(), Some(qual))
                })
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            }),
        }
    }
}

fn is_fastq_path(path: &Path) -> bool {
    let name = path.to_string_lossy().to_lowercase();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    name.ends_with(".fastq") || name.ends_with(".fq")
}

/// A file of filenames is detected by its extension or by a first byte that
/// belongs to neither FASTA nor FASTQ.
fn is_fofn(path: &Path) -> Result<bool, MapError> {
    if path.extension().map(|e| e == "fofn").unwrap_or(false) {
        return Ok(true);
    }
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        return Ok(false);
    }
    let mut file = File::open(path).map_err(|e| MapError::open(path, e))?;
    let mut first = [0u8; 1];
    match file.read(&mut first) {
        Ok(0) => Ok(false),
        Ok(_) => Ok(first[0] != b'>' && first[0] != b'@'),
        Err(e) => Err(MapError::read(path, e)),
    }
}

/// Expand any file-of-filenames entries into their listed paths.
pub fn expand_file_list(paths: &[PathBuf]) -> Result<Vec<PathBuf>, MapError> {
    let mut out = Vec::new();
    for path in paths {
        if is_fofn(path)? {
            let file = File::open(path).map_err(|e| MapError::open(path, e))?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|e| MapError::read(path, e))?;
                let line = line.trim();
                if !line.is_empty() {
                    out.push(PathBuf::from(line));
                }
            }
        } else {
            out.push(path.clone());
        }
    }
    Ok(out)
}

fn parse_title(title: &str) -> Option<(String, u32, Option<(usize, usize)>)> {
    let mut parts = title.split('/');
    let movie = parts.next()?;
    let hole = parts.next()?.parse::<u32>().ok()?;
    let coords = parts.next().and_then(|range| {
        let (s, e) = range.split_once('_')?;
        let s = s.parse::<usize>().ok()?;
        let e = e.parse::<usize>().ok()?;
        (s < e).then_some((s, e))
    });
    Some((movie.to_string(), hole, coords))
}

fn make_read(
    title: String,
    seq: Vec<u8>,
    qual: Option<Vec<u8>>,
    fallback_movie: &str,
    ordinal: u32,
) -> SmrtRead {
    let seq = seq
        .iter()
        .map(|b| match b.to_ascii_uppercase() {
            c @ (b'A' | b'C' | b'G' | b'T') => c,
            _ => b'N',
        })
        .collect();

    let (movie, hole_number, coords) = match parse_title(&title) {
        Some(parsed) => parsed,
        None => (fallback_movie.to_string(), ordinal, None),
    };
    let (q_start, q_end) = coords.unwrap_or((0, 0));

    SmrtRead {
        title,
        movie,
        hole_number,
        seq,
        qual,
        q_start,
        q_end,
        lq_prefix: 0,
        lq_suffix: 0,
        hq_score: 0,
    }
}

/// Deterministic per-molecule generator seeded from the run seed and the
/// hole number. Used for the selection integer and the subsample draw.
pub(crate) fn molecule_rng(seed: u64, hole: u32) -> StdRng {
    StdRng::seed_from_u64(seed ^ (hole as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn load_ccs_map(path: &Path) -> Result<HashMap<u32, SmrtRead>, MapError> {
    let mut reader = RecordReader::open(path)?;
    let mut map = HashMap::new();
    let stem = file_stem(path);
    let mut ordinal = 0u32;
    while let Some(record) = reader.next_raw() {
        let (title, seq, qual) = record.map_err(|e| MapError::read(path, e))?;
        let read = make_read(title, seq, qual, &stem, ordinal);
        map.insert(read.hole_number, read);
        ordinal += 1;
    }
    Ok(map)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

struct InputFile {
    path: PathBuf,
    movie_fallback: String,
    regions: Option<Arc<RegionTable>>,
    ccs: Option<Arc<HashMap<u32, SmrtRead>>>,
}

struct Fetched {
    read: SmrtRead,
    file: usize,
}

struct SourceState {
    files: Vec<InputFile>,
    file_idx: usize,
    reader: Option<RecordReader>,
    pending: Option<Fetched>,
    ordinal: u32,
    consecutive_errors: u32,
    stopped: bool,
}

// After this many record errors in a row the stream is treated as broken
// rather than merely dirty.
const MAX_CONSECUTIVE_BAD_RECORDS: u32 = 5;

/// Serialized producer of molecule-level records from one or more read
/// files, with optional region-table and CCS sidecars paired 1:1.
pub struct ReadSource {
    state: Mutex<SourceState>,
    params: MapParams,
}

impl ReadSource {
    pub fn open(params: &MapParams) -> Result<Self, MapError> {
        let read_paths = expand_file_list(&params.read_files)?;
        if read_paths.is_empty() {
            return Err(MapError::Config("no read files specified".to_string()));
        }

        let region_paths = match &params.region_table_file {
            Some(path) => expand_file_list(std::slice::from_ref(path))?,
            None => Vec::new(),
        };
        if !region_paths.is_empty() && region_paths.len() != read_paths.len() {
            return Err(MapError::Config(format!(
                "there are not the same number of region table files ({}) as input files ({})",
                region_paths.len(),
                read_paths.len()
            )));
        }

        let ccs_paths = match &params.ccs_fofn_file {
            Some(path) => expand_file_list(std::slice::from_ref(path))?,
            None => Vec::new(),
        };
        if !ccs_paths.is_empty() && ccs_paths.len() != read_paths.len() {
            return Err(MapError::Config(format!(
                "there are not the same number of ccs files ({}) as input files ({})",
                ccs_paths.len(),
                read_paths.len()
            )));
        }

        let mut files = Vec::with_capacity(read_paths.len());
        for (i, path) in read_paths.iter().enumerate() {
            let regions = match region_paths.get(i) {
                Some(rp) => Some(Arc::new(RegionTable::load(rp)?)),
                None => None,
            };
            let ccs = match ccs_paths.get(i) {
                Some(cp) => Some(Arc::new(load_ccs_map(cp)?)),
                None => None,
            };
            files.push(InputFile {
                path: path.clone(),
                movie_fallback: file_stem(path),
                regions,
                ccs,
            });
        }

        Ok(ReadSource {
            state: Mutex::new(SourceState {
                files,
                file_idx: 0,
                reader: None,
                pending: None,
                ordinal: 0,
                consecutive_errors: 0,
                stopped: false,
            }),
            params: params.clone(),
        })
    }

    /// Fetch the next unit of work. Serialized: holds the source mutex for
    /// the duration of the call.
    pub fn next(&self) -> Result<NextResult, MapError> {
        let mut st = self.state.lock().unwrap();
        if st.stopped {
            return Ok(NextResult::Exhausted);
        }

        loop {
            let Some(fetched) = st.fetch_record()? else {
                st.stopped = true;
                return Ok(NextResult::Exhausted);
            };
            let mut read = fetched.read;
            let file = fetched.file;

            // Region handling happens at fetch time: record the HQ bounds on
            // the molecule and mask non-HQ bases.
            let mut has_good_region = true;
            if let Some(rt) = &st.files[file].regions {
                if rt.has_hole(read.hole_number) {
                    let len = read.len();
                    let (hq_start, hq_end, score) = rt.hq_region(read.hole_number);
                    read.lq_prefix = hq_start.min(len);
                    read.lq_suffix = len.saturating_sub(hq_end.min(len));
                    read.hq_score = score;
                    has_good_region = rt.mask(read.hole_number, &mut read.seq);
                }
            }

            let mut rng = molecule_rng(self.params.random_seed, read.hole_number);
            let rand_int: u32 = rng.gen();
            if self.params.subsample < 1.0 && !rng.gen_bool(self.params.subsample) {
                continue;
            }

            let mut stop = false;
            let good = is_good_read(&read, &self.params, &mut stop);
            if stop {
                st.stopped = true;
                return Ok(NextResult::Exhausted);
            }
            if !good || !has_good_region {
                continue;
            }

            if self.params.concordant && read.has_subread_coordinates() {
                let hole = read.hole_number;
                let mut subreads = vec![read];
                while let Some(peek) = st.fetch_record()? {
                    if peek.file != file || peek.read.hole_number != hole {
                        st.pending = Some(peek);
                        break;
                    }
                    let mut stop2 = false;
                    if is_good_read(&peek.read, &self.params, &mut stop2) {
                        subreads.push(peek.read);
                    }
                    if stop2 {
                        st.stopped = true;
                        break;
                    }
                }
                return Ok(NextResult::Batch(BatchUnit { subreads, rand_int }));
            }

            let ccs = st.files[file]
                .ccs
                .as_ref()
                .and_then(|m| m.get(&read.hole_number).cloned());
            if self.params.uses_ccs() && ccs.is_none() {
                log::warn!(
                    "No consensus sequence for hole {}; skipping the molecule.",
                    read.hole_number
                );
                continue;
            }

            let regions = st.files[file].regions.clone();
            return Ok(NextResult::Molecule(ZmwUnit {
                read,
                ccs,
                regions,
                rand_int,
            }));
        }
    }

    /// Shutdown barrier: acquire and release the source mutex so the last
    /// worker to finish observes a consistent source state.
    pub fn barrier(&self) {
        drop(self.state.lock().unwrap());
    }
}

impl SourceState {
    /// Next raw record across the file list. `Ok(None)` means all inputs
    /// are exhausted. Malformed records are skipped with a warning; too many
    /// in a row become a fatal read error.
    fn fetch_record(&mut self) -> Result<Option<Fetched>, MapError> {
        if let Some(pending) = self.pending.take() {
            return Ok(Some(pending));
        }

        loop {
            if self.file_idx >= self.files.len() {
                return Ok(None);
            }
            if self.reader.is_none() {
                let path = &self.files[self.file_idx].path;
                log::info!("Reading reads from {}", path.display());
                self.reader = Some(RecordReader::open(path)?);
            }

            match self.reader.as_mut().unwrap().next_raw() {
                Some(Ok((title, seq, qual))) => {
                    self.consecutive_errors = 0;
                    let file = self.file_idx;
                    let read = make_read(
                        title,
                        seq,
                        qual,
                        &self.files[file].movie_fallback,
                        self.ordinal,
                    );
                    self.ordinal += 1;
                    return Ok(Some(Fetched { read, file }));
                }
                Some(Err(e)) => {
                    self.consecutive_errors += 1;
                    if self.consecutive_errors > MAX_CONSECUTIVE_BAD_RECORDS {
                        return Err(MapError::read(&self.files[self.file_idx].path, e));
                    }
                    log::warn!(
                        "Skipping malformed record in {}: {}",
                        self.files[self.file_idx].path.display(),
                        e
                    );
                }
                None => {
                    self.reader = None;
                    self.file_idx += 1;
                }
            }
        }
    }
}

/// The filtering predicate applied inside `next`. Sets `stop` when the hole
/// number lies strictly past the allow-list maximum, which ends the run on
/// instrument-ordered input.
fn is_good_read(read: &SmrtRead, params: &MapParams, stop: &mut bool) -> bool {
    if let Some(ranges) = &params.hole_numbers {
        if !ranges.contains(read.hole_number) {
            if read.hole_number > ranges.max() {
                *stop = true;
            }
            return false;
        }
    }

    if read.hq_score < params.min_raw_subread_score
        || (params.max_read_length != 0 && read.len() > params.max_read_length)
        || read.len() < params.min_read_length
    {
        return false;
    }

    if let Some(avg) = read.average_quality() {
        if avg < params.min_avg_qual {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::HoleNumberRanges;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn base_params(reads: PathBuf) -> MapParams {
        let mut p = MapParams {
            read_files: vec![reads],
            min_read_length: 1,
            random_seed: 11,
            ..MapParams::default()
        };
        p.min_raw_subread_score = 0;
        p
    }

    #[test]
    fn test_title_parsing() {
        let (movie, hole, coords) = parse_title("m541/77/100_900").unwrap();
        assert_eq!(movie, "m541");
        assert_eq!(hole, 77);
        assert_eq!(coords, Some((100, 900)));

        let (_, hole, coords) = parse_title("m541/78").unwrap();
        assert_eq!(hole, 78);
        assert_eq!(coords, None);

        assert!(parse_title("plain-read-name").is_none());
        // A reversed range is ignored, not an error.
        let (_, _, coords) = parse_title("m541/79/900_100").unwrap();
        assert_eq!(coords, None);
    }

    #[test]
    fn test_molecule_rng_is_deterministic_per_hole() {
        let a: u32 = molecule_rng(7, 1234).gen();
        let b: u32 = molecule_rng(7, 1234).gen();
        let c: u32 = molecule_rng(7, 1235).gen();
        let d: u32 = molecule_rng(8, 1234).gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_filtering_predicate() {
        let dir = PathBuf::from("target/test_reads_filter");
        let reads = write_file(
            &dir,
            "reads.fasta",
            ">m0/1/0_4\nACGT\n>m0/2/0_12\nACGTACGTACGT\n",
        );
        let mut params = base_params(reads);
        params.min_read_length = 10;
        let source = ReadSource::open(&params).unwrap();

        // The 4 bp molecule is filtered; only hole 2 comes through.
        match source.next().unwrap() {
            NextResult::Molecule(unit) => assert_eq!(unit.read.hole_number, 2),
            _ => panic!("expected a molecule"),
        }
        assert!(matches!(source.next().unwrap(), NextResult::Exhausted));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_hole_allow_list_early_stop() {
        let dir = PathBuf::from("target/test_reads_earlystop");
        let reads = write_file(
            &dir,
            "reads.fasta",
            ">m0/12345/0_8\nACGTACGT\n>m0/12346/0_8\nACGTACGT\n",
        );
        let mut params = base_params(reads);
        params.hole_numbers = Some(HoleNumberRanges::parse("10000-12000").unwrap());
        let source = ReadSource::open(&params).unwrap();

        // 12345 > 12000: the source declares exhaustion without touching the
        // rest of the stream.
        assert!(matches!(source.next().unwrap(), NextResult::Exhausted));
        assert!(matches!(source.next().unwrap(), NextResult::Exhausted));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_fofn_expansion() {
        let dir = PathBuf::from("target/test_reads_fofn");
        let a = write_file(&dir, "a.fasta", ">m0/1/0_8\nACGTACGT\n");
        let b = write_file(&dir, "b.fasta", ">m1/2/0_8\nACGTACGT\n");
        let fofn = write_file(
            &dir,
            "reads.fofn",
            &format!("{}\n{}\n", a.display(), b.display()),
        );

        let expanded = expand_file_list(&[fofn]).unwrap();
        assert_eq!(expanded, vec![a.clone(), b.clone()]);
        // Plain FASTA is not mistaken for a file of filenames.
        let expanded = expand_file_list(&[a.clone()]).unwrap();
        assert_eq!(expanded, vec![a]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_batch_grouping_under_concordant() {
        let dir = PathBuf::from("target/test_reads_batch");
        let reads = write_file(
            &dir,
            "reads.fasta",
            ">m0/5/0_8\nACGTACGT\n>m0/5/20_30\nACGTACGTAC\n>m0/6/0_8\nTTTTACGT\n",
        );
        let mut params = base_params(reads);
        params.concordant = true;
        let source = ReadSource::open(&params).unwrap();

        match source.next().unwrap() {
            NextResult::Batch(batch) => {
                assert_eq!(batch.subreads.len(), 2);
                assert!(batch.subreads.iter().all(|r| r.hole_number == 5));
            }
            _ => panic!("expected a batch"),
        }
        match source.next().unwrap() {
            NextResult::Batch(batch) => {
                assert_eq!(batch.subreads.len(), 1);
                assert_eq!(batch.subreads[0].hole_number, 6);
            }
            _ => panic!("expected a batch"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_masking_applied_at_fetch() {
        let dir = PathBuf::from("target/test_reads_mask");
        let reads = write_file(&dir, "reads.fasta", ">m0/9/0_12\nACGTACGTACGT\n");
        let rt = write_file(&dir, "reads.rgn", "9\tInsert\t0\t12\n9\tHQ\t2\t10\t800\n");
        let mut params = base_params(reads);
        params.region_table_file = Some(rt);
        let source = ReadSource::open(&params).unwrap();

        match source.next().unwrap() {
            NextResult::Molecule(unit) => {
                assert_eq!(&unit.read.seq, b"NNGTACGTACNN");
                assert_eq!(unit.read.lq_prefix, 2);
                assert_eq!(unit.read.lq_suffix, 2);
                assert_eq!(unit.read.hq_score, 800);
            }
            _ => panic!("expected a molecule"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
