// Contig name/offset table over the concatenated reference text.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use bio::io::fasta;
use flate2::read::GzDecoder;

use crate::error::MapError;

/// One reference contig: its name and where it lives inside the concatenated
/// genome text.
#[derive(Debug, Clone)]
pub struct SeqDbEntry {
    pub name: String,
    pub offset: usize,
    pub len: usize,
}

/// Contig boundary index for the reference. Alignment windows never span the
/// end of a contig; `clamp_to_contig` enforces that.
#[derive(Debug)]
pub struct SeqDb {
    entries: Vec<SeqDbEntry>,
    total_len: usize,
}

impl SeqDb {
    pub fn n_seqs(&self) -> usize {
        self.entries.len()
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn name(&self, rid: usize) -> &str {
        &self.entries[rid].name
    }

    pub fn offset(&self, rid: usize) -> usize {
        self.entries[rid].offset
    }

    pub fn contig_len(&self, rid: usize) -> usize {
        self.entries[rid].len
    }

    pub fn entries(&self) -> &[SeqDbEntry] {
        &self.entries
    }

    /// Find the contig containing a position in the concatenated text.
    /// Returns `None` past the end of the genome.
    pub fn pos2rid(&self, pos: usize) -> Option<usize> {
        if pos >= self.total_len || self.entries.is_empty() {
            return None;
        }
        let mut left = 0usize;
        let mut right = self.entries.len();
        while left < right {
            let mid = (left + right) >> 1;
            if pos >= self.entries[mid].offset {
                if mid + 1 == self.entries.len() || pos < self.entries[mid + 1].offset {
                    return Some(mid);
                }
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        None
    }

    /// Clamp a half-open window of concatenated-text coordinates to the
    /// boundaries of one contig.
    pub fn clamp_to_contig(&self, rid: usize, start: usize, end: usize) -> (usize, usize) {
        let lo = self.entries[rid].offset;
        let hi = lo + self.entries[rid].len;
        (start.clamp(lo, hi), end.clamp(lo, hi))
    }

    /// Convert a concatenated-text position into (contig id, contig-local
    /// position).
    pub fn to_local(&self, pos: usize) -> Option<(usize, usize)> {
        let rid = self.pos2rid(pos)?;
        Some((rid, pos - self.entries[rid].offset))
    }
}

pub(crate) fn open_maybe_gz(path: &Path) -> Result<Box<dyn Read + Send>, MapError> {
    let file = File::open(path).map_err(|e| MapError::open(path, e))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Read a (possibly gzipped) multi-contig FASTA reference. Returns the contig
/// table and the concatenated, uppercased genome text terminated with the `$`
/// sentinel required by suffix array construction. Non-ACGT characters become
/// `N`. The title of each contig is truncated at the first space.
pub fn read_reference(path: &Path) -> Result<(SeqDb, Vec<u8>), MapError> {
    let reader = fasta::Reader::new(open_maybe_gz(path)?);

    let mut entries = Vec::new();
    let mut text: Vec<u8> = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|e| MapError::read(path, e))?;
        let offset = text.len();
        for &b in record.seq() {
            text.push(match b.to_ascii_uppercase() {
                c @ (b'A' | b'C' | b'G' | b'T') => c,
                _ => b'N',
            });
        }
        entries.push(SeqDbEntry {
            name: record.id().to_string(),
            offset,
            len: text.len() - offset,
        });
    }

    if entries.is_empty() {
        return Err(MapError::Config(format!(
            "reference {} contains no sequences",
            path.display()
        )));
    }

    let total_len = text.len();
    text.push(b'$');

    Ok((SeqDb { entries, total_len }, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fasta(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_reference_multi_contig() {
        let dir = std::path::PathBuf::from("target/test_seqdb_multi");
        std::fs::create_dir_all(&dir).unwrap();
        let path = write_fasta(&dir, "ref.fa", ">chr1 circular\nACGTacgt\n>chr2\nGGNNCC\n");

        let (db, text) = read_reference(&path).unwrap();
        assert_eq!(db.n_seqs(), 2);
        assert_eq!(db.name(0), "chr1");
        assert_eq!(db.name(1), "chr2");
        assert_eq!(db.offset(1), 8);
        assert_eq!(db.contig_len(1), 6);
        assert_eq!(db.total_len(), 14);
        assert_eq!(&text[..8], b"ACGTACGT");
        assert_eq!(&text[8..14], b"GGNNCC");
        assert_eq!(text[14], b'$');

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_pos2rid_and_clamp() {
        let db = SeqDb {
            entries: vec![
                SeqDbEntry {
                    name: "a".into(),
                    offset: 0,
                    len: 100,
                },
                SeqDbEntry {
                    name: "b".into(),
                    offset: 100,
                    len: 50,
                },
            ],
            total_len: 150,
        };
        assert_eq!(db.pos2rid(0), Some(0));
        assert_eq!(db.pos2rid(99), Some(0));
        assert_eq!(db.pos2rid(100), Some(1));
        assert_eq!(db.pos2rid(149), Some(1));
        assert_eq!(db.pos2rid(150), None);

        assert_eq!(db.clamp_to_contig(1, 80, 200), (100, 150));
        assert_eq!(db.to_local(120), Some((1, 20)));
    }
}
