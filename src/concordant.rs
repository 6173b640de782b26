// Concordant realignment: the selected alignments of one template (a chosen
// subread, or the CCS consensus) anchor the realignment of the molecule's
// other passes against a flanked reference window.

use crate::candidates::AlignmentCandidate;
use crate::index::ReferenceIndex;
use crate::params::MapParams;
use crate::plan::is_full_pass;
use crate::reads::SmrtRead;
use crate::regions::{ReadInterval, RegionTable};
use crate::swa::banded_sw;

/// Widen a template candidate's reference interval by `flank` bases on each
/// side, clamped to its contig. Returns concatenated-text coordinates.
pub fn flank_target(
    c: &AlignmentCandidate,
    seqdb: &crate::seqdb::SeqDb,
    flank: usize,
) -> (usize, usize) {
    let offset = seqdb.offset(c.t_id);
    let contig_len = seqdb.contig_len(c.t_id);
    let start = offset + c.t_start.saturating_sub(flank);
    let end = offset + (c.t_end + flank).min(contig_len);
    (start, end)
}

/// Realign one subread interval of the molecule against a template
/// candidate's flanked window, honoring the pass direction. The resulting
/// candidate is already rebased onto the molecule buffers.
#[allow(clippy::too_many_arguments)]
pub fn align_subread_to_target(
    read: &SmrtRead,
    read_rc: &[u8],
    interval: &ReadInterval,
    pass_direction: u8,
    template: &AlignmentCandidate,
    idx: &ReferenceIndex,
    params: &MapParams,
    trace: &mut Vec<u8>,
) -> Option<AlignmentCandidate> {
    let len = read.len();
    // The window is a forward-strand slice of the template's contig, so the
    // orientation of this pass relative to the genome combines the pass
    // direction with the template's strand.
    let eff_strand = pass_direction ^ template.q_strand;
    let sub: &[u8] = if eff_strand == 0 {
        &read.seq[interval.start..interval.end]
    } else {
        &read_rc[len - interval.end..len - interval.start]
    };

    let (ws, we) = flank_target(template, idx.seqdb(), params.flank_size);
    if we <= ws {
        return None;
    }
    let target = &idx.genome()[ws..we];

    let band = sub.len() / 8 + params.flank_size + 16;
    let sw = banded_sw(sub, target, band, &params.scoring(), trace)?;
    if sw.q_end - sw.q_start < params.min_match_len {
        return None;
    }

    let q_offset = if eff_strand == 0 {
        interval.start
    } else {
        len - interval.end
    };
    let t_offset = idx.seqdb().offset(template.t_id);
    let aligned_cols = sw.n_match + sw.n_mismatch + sw.n_ins + sw.n_del;

    Some(AlignmentCandidate {
        t_id: template.t_id,
        t_start: ws + sw.t_start - t_offset,
        t_end: ws + sw.t_end - t_offset,
        q_start: q_offset + sw.q_start,
        q_end: q_offset + sw.q_end,
        q_strand: eff_strand,
        score: -sw.score,
        pct_similarity: 100.0 * sw.n_match as f32 / aligned_cols.max(1) as f32,
        n_match: sw.n_match,
        n_mismatch: sw.n_mismatch,
        n_ins: sw.n_ins,
        n_del: sw.n_del,
        mapqv: None,
        cigar: sw.cigar,
    })
}

/// One pass of a molecule: a subread fragment with its strand relative to
/// the molecule.
#[derive(Debug, Clone, Copy)]
pub struct Pass {
    pub direction: u8,
    pub start: usize,
    pub num_bases: usize,
}

/// Iterator over the passes of an unrolled molecule, restricted to full-pass
/// subreads or covering every fragment. The CCS realignment loop drives both
/// variants through the same two operations.
#[derive(Debug)]
pub struct SubreadIterator {
    passes: Vec<Pass>,
    at: usize,
}

impl SubreadIterator {
    pub fn full_pass(read: &SmrtRead, regions: Option<&RegionTable>, by_adapter: bool) -> Self {
        Self::build(read, regions, by_adapter, true)
    }

    pub fn all_fragments(read: &SmrtRead, regions: Option<&RegionTable>, by_adapter: bool) -> Self {
        Self::build(read, regions, by_adapter, false)
    }

    fn build(
        read: &SmrtRead,
        regions: Option<&RegionTable>,
        by_adapter: bool,
        full_only: bool,
    ) -> Self {
        let len = read.len();
        let (intervals, adapters) = match regions {
            Some(rt) => (
                rt.subread_intervals(read.hole_number, len, by_adapter),
                rt.adapter_intervals(read.hole_number),
            ),
            None => (vec![ReadInterval::new(0, len)], Vec::new()),
        };

        let passes = intervals
            .iter()
            .enumerate()
            .filter(|(_, iv)| !full_only || is_full_pass(iv, &adapters))
            .map(|(i, iv)| Pass {
                direction: (i % 2) as u8,
                start: iv.start,
                num_bases: iv.len(),
            })
            .collect();
        SubreadIterator { passes, at: 0 }
    }

    pub fn num_passes(&self) -> usize {
        self.passes.len()
    }

    pub fn next_pass(&mut self) -> Option<Pass> {
        let pass = self.passes.get(self.at).copied();
        self.at += 1;
        pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seqdb::{self, SeqDb};
    use std::io::Write as _;
    use std::path::PathBuf;

    fn toy_seqdb(dir: &str) -> SeqDb {
        let dir = PathBuf::from(dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ref.fa");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b">c1\nACGTACGTACGTACGTACGT\n").unwrap();
        let (db, _) = seqdb::read_reference(&path).unwrap();
        std::fs::remove_dir_all(&dir).ok();
        db
    }

    fn candidate(t_start: usize, t_end: usize) -> AlignmentCandidate {
        AlignmentCandidate {
            t_id: 0,
            t_start,
            t_end,
            q_start: 0,
            q_end: t_end - t_start,
            q_strand: 0,
            score: -100,
            pct_similarity: 100.0,
            n_match: (t_end - t_start) as u32,
            n_mismatch: 0,
            n_ins: 0,
            n_del: 0,
            mapqv: None,
            cigar: Vec::new(),
        }
    }

    #[test]
    fn test_flank_clamps_to_contig() {
        let db = toy_seqdb("target/test_concordant_flank");
        assert_eq!(flank_target(&candidate(5, 10), &db, 3), (2, 13));
        // Flanks run into both contig ends.
        assert_eq!(flank_target(&candidate(1, 19), &db, 5), (0, 20));
    }

    #[test]
    fn test_subread_iterator_full_pass_filter() {
        let read = SmrtRead {
            title: "m/1/0_0".into(),
            movie: "m".into(),
            hole_number: 1,
            seq: vec![b'A'; 1000],
            qual: None,
            q_start: 0,
            q_end: 0,
            lq_prefix: 0,
            lq_suffix: 0,
            hq_score: 0,
        };

        let dir = PathBuf::from("target/test_concordant_iter");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("regions.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(
            b"1\tInsert\t0\t200\n1\tAdapter\t200\t210\n1\tInsert\t210\t600\n\
              1\tAdapter\t600\t610\n1\tInsert\t610\t1000\n1\tHQ\t0\t1000\t900\n",
        )
        .unwrap();
        let rt = RegionTable::load(&path).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        let mut all = SubreadIterator::all_fragments(&read, Some(&rt), false);
        assert_eq!(all.num_passes(), 3);
        let first = all.next_pass().unwrap();
        assert_eq!((first.direction, first.start, first.num_bases), (0, 0, 200));

        // Only the middle subread has adapters on both sides.
        let mut full = SubreadIterator::full_pass(&read, Some(&rt), false);
        assert_eq!(full.num_passes(), 1);
        let only = full.next_pass().unwrap();
        assert_eq!((only.start, only.num_bases), (210, 390));
        assert!(full.next_pass().is_none());
    }

    #[test]
    fn test_iterator_without_regions_covers_whole_read() {
        let read = SmrtRead {
            title: "m/2/0_0".into(),
            movie: "m".into(),
            hole_number: 2,
            seq: vec![b'A'; 321],
            qual: None,
            q_start: 0,
            q_end: 0,
            lq_prefix: 0,
            lq_suffix: 0,
            hq_score: 0,
        };
        let mut it = SubreadIterator::all_fragments(&read, None, false);
        assert_eq!(it.num_passes(), 1);
        let p = it.next_pass().unwrap();
        assert_eq!((p.direction, p.start, p.num_bases), (0, 0, 321));
    }
}
