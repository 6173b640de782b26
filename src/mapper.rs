// Per-interval mapping: extract the substring, call the kernel with the
// default profile, fall back to the sensitive profile, store mapping
// quality, select survivors and rebase their query coordinates onto the
// molecule.

use bio::alphabets::dna;

use crate::candidates::{select_top_candidates, store_mapqv, AlignmentCandidate};
use crate::index::ReferenceIndex;
use crate::kernel::{map_read, MappingBuffers};
use crate::params::MapParams;
use crate::reads::SmrtRead;
use crate::regions::ReadInterval;

/// Map one subread interval of a molecule and return the selected,
/// molecule-rebased candidates. Unselected candidates are dropped here.
pub fn align_interval(
    read: &SmrtRead,
    interval: &ReadInterval,
    idx: &ReferenceIndex,
    params: &MapParams,
    rand_int: u32,
    bufs: &mut MappingBuffers,
) -> Vec<AlignmentCandidate> {
    let sub = &read.seq[interval.start..interval.end];
    let sub_rc = dna::revcomp(sub);
    let scoring = params.scoring();

    let mut cands = map_read(sub, &sub_rc, idx, &params.kernel_params(), &scoring, bufs);

    // No hit, or a weak top hit: optionally try again with a more sensitive
    // parameter profile.
    if (cands.is_empty() || cands[0].pct_similarity < 80.0) && params.do_sensitive_search {
        cands = map_read(
            sub,
            &sub_rc,
            idx,
            &params.sensitive_kernel_params(),
            &scoring,
            bufs,
        );
    }

    if !cands.is_empty() && cands[0].score < params.max_score && params.store_mapqv {
        store_mapqv(&mut cands);
    }

    let mut selected = select_top_candidates(cands, params.max_score, params.bestn, rand_int);
    rebase_onto_molecule(&mut selected, interval, read.len());
    selected
}

/// Move interval-local query coordinates onto the molecule-level forward or
/// reverse-complement buffer, matching the candidate's strand.
pub fn rebase_onto_molecule(
    cands: &mut [AlignmentCandidate],
    interval: &ReadInterval,
    read_len: usize,
) {
    for c in cands {
        let offset = if c.q_strand == 0 {
            interval.start
        } else {
            // The reverse complement of read[s..e) starts at read_len - e in
            // the molecule's reverse-complement buffer.
            read_len - interval.end
        };
        c.q_start += offset;
        c.q_end += offset;
    }
}
