// Serialized consumer of per-molecule results. One mutex, one record per
// selected candidate, plus an optional FASTA sink for molecules that
// produced nothing.
//
// Two formats: a tabular layout (default) with the columns
//   qName tName score percentSimilarity qStrand qStart qEnd qLength
//   tStrand tStart tEnd tLength mapQV
// and SAM via --sam.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Mutex;

use crate::bundle::ReadAlignments;
use crate::candidates::AlignmentCandidate;
use crate::error::MapError;
use crate::params::MapParams;
use crate::reads::SmrtRead;
use crate::seqdb::SeqDb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Tabular,
    Sam,
}

struct WriterInner {
    out: BufWriter<Box<dyn Write + Send>>,
    unaligned: Option<BufWriter<Box<dyn Write + Send>>>,
    format: OutputFormat,
}

/// Serialized alignment writer shared by all workers.
pub struct AlignmentWriter {
    inner: Mutex<WriterInner>,
}

impl AlignmentWriter {
    pub fn create(params: &MapParams, seqdb: &SeqDb) -> Result<Self, MapError> {
        let out: Box<dyn Write + Send> = match &params.out_file {
            Some(path) => Box::new(File::create(path).map_err(|e| MapError::open(path, e))?),
            None => Box::new(io::stdout()),
        };
        let mut out = BufWriter::new(out);

        let format = if params.print_sam {
            OutputFormat::Sam
        } else {
            OutputFormat::Tabular
        };

        if format == OutputFormat::Sam {
            write_sam_header(&mut out, seqdb).map_err(MapError::IoWrite)?;
        }

        let unaligned = match &params.unaligned_file {
            Some(path) => Some(BufWriter::new(Box::new(
                File::create(path).map_err(|e| MapError::open(path, e))?,
            ) as Box<dyn Write + Send>)),
            None => None,
        };

        Ok(AlignmentWriter {
            inner: Mutex::new(WriterInner {
                out,
                unaligned,
                format,
            }),
        })
    }

    /// Record every selected candidate of one molecule, or note the molecule
    /// in the unaligned sink when nothing was selected. One critical section
    /// per molecule.
    pub fn write_alignments(
        &self,
        read: &SmrtRead,
        read_rc: &[u8],
        alns: &ReadAlignments,
        seqdb: &SeqDb,
    ) -> Result<(), MapError> {
        let mut inner = self.inner.lock().unwrap();

        if alns.n_selected() == 0 {
            if let Some(un) = inner.unaligned.as_mut() {
                writeln!(un, ">{}", read.title).map_err(MapError::IoWrite)?;
                un.write_all(&read.seq).map_err(MapError::IoWrite)?;
                writeln!(un).map_err(MapError::IoWrite)?;
            }
            return Ok(());
        }

        let format = inner.format;
        for slot in alns.slots() {
            for cand in slot {
                match format {
                    OutputFormat::Tabular => write_tabular(&mut inner.out, read, cand, seqdb),
                    OutputFormat::Sam => write_sam(&mut inner.out, read, read_rc, cand, seqdb),
                }
                .map_err(MapError::IoWrite)?;
            }
        }
        Ok(())
    }

    /// Flush everything; write failures surface here at the latest.
    pub fn finish(&self) -> Result<(), MapError> {
        let mut inner = self.inner.lock().unwrap();
        inner.out.flush().map_err(MapError::IoWrite)?;
        if let Some(un) = inner.unaligned.as_mut() {
            un.flush().map_err(MapError::IoWrite)?;
        }
        Ok(())
    }
}

fn write_sam_header<W: Write>(out: &mut W, seqdb: &SeqDb) -> io::Result<()> {
    writeln!(out, "@HD\tVN:1.5\tSO:unknown")?;
    for rid in 0..seqdb.n_seqs() {
        writeln!(
            out,
            "@SQ\tSN:{}\tLN:{}",
            seqdb.name(rid),
            seqdb.contig_len(rid)
        )?;
    }
    const PKG_NAME: &str = env!("CARGO_PKG_NAME");
    const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
    writeln!(
        out,
        "@PG\tID:{}\tPN:{}\tVN:{}\tCL:{}",
        PKG_NAME,
        PKG_NAME,
        PKG_VERSION,
        std::env::args().collect::<Vec<_>>().join(" ")
    )
}

fn write_tabular<W: Write>(
    out: &mut W,
    read: &SmrtRead,
    cand: &AlignmentCandidate,
    seqdb: &SeqDb,
) -> io::Result<()> {
    writeln!(
        out,
        "{} {} {} {:.4} {} {} {} {} {} {} {} {} {}",
        read.title,
        seqdb.name(cand.t_id),
        cand.score,
        cand.pct_similarity,
        cand.q_strand,
        cand.q_start,
        cand.q_end,
        read.len(),
        0,
        cand.t_start,
        cand.t_end,
        seqdb.contig_len(cand.t_id),
        cand.mapqv.unwrap_or(0),
    )
}

fn cigar_string(cand: &AlignmentCandidate, read_len: usize) -> String {
    let mut s = String::new();
    if cand.q_start > 0 {
        s.push_str(&format!("{}S", cand.q_start));
    }
    for &(op, len) in &cand.cigar {
        s.push_str(&format!("{}{}", len, op as char));
    }
    if read_len > cand.q_end {
        s.push_str(&format!("{}S", read_len - cand.q_end));
    }
    if s.is_empty() {
        s.push('*');
    }
    s
}

fn write_sam<W: Write>(
    out: &mut W,
    read: &SmrtRead,
    read_rc: &[u8],
    cand: &AlignmentCandidate,
    seqdb: &SeqDb,
) -> io::Result<()> {
    let flag: u16 = if cand.q_strand == 1 { 0x10 } else { 0 };

    // Query coordinates were rebased onto the strand-matching molecule
    // buffer, so the emitted sequence and the soft clips line up.
    let seq: &[u8] = if cand.q_strand == 1 {
        read_rc
    } else {
        &read.seq
    };
    let qual = match &read.qual {
        Some(q) => {
            let ascii: Vec<u8> = if cand.q_strand == 1 {
                q.iter().rev().map(|&v| v + 33).collect()
            } else {
                q.iter().map(|&v| v + 33).collect()
            };
            String::from_utf8_lossy(&ascii).into_owned()
        }
        None => "*".to_string(),
    };

    let nm = cand.n_mismatch + cand.n_ins + cand.n_del;
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t*\t0\t0\t{}\t{}\tAS:i:{}\tNM:i:{}",
        read.title,
        flag,
        seqdb.name(cand.t_id),
        cand.t_start + 1,
        cand.mapqv.unwrap_or(255),
        cigar_string(cand, seq.len()),
        String::from_utf8_lossy(seq),
        qual,
        cand.score,
        nm,
    )
}
