// The two per-molecule mapping pipelines.
//
// Subread mode: plan intervals, map each one (or only the template under
// --concordant), then realign siblings against the template's windows.
//
// Whole-molecule mode: map the molecule (or its CCS consensus) as a single
// entity; in the CCS explode modes the consensus alignments then anchor the
// realignment of the unrolled read's passes.

use crate::bundle::{AlignMode, ReadAlignments};
use crate::candidates::AlignmentCandidate;
use crate::concordant::{align_subread_to_target, SubreadIterator};
use crate::index::ReferenceIndex;
use crate::kernel::MappingBuffers;
use crate::mapper::align_interval;
use crate::params::MapParams;
use crate::plan::{build_work_plan, create_directions, WorkPlan};
use crate::reads::SmrtRead;
use crate::regions::{ReadInterval, RegionTable};

/// Stitch pre-segmented subreads of one hole into a synthetic polymerase
/// read: subread sequences land at their molecule coordinates, everything
/// in between stays 'N'.
pub fn polymerase_from_subreads(subreads: &[SmrtRead]) -> SmrtRead {
    let len = subreads.iter().map(|s| s.q_end).max().unwrap_or(0);
    let mut seq = vec![b'N'; len];
    for s in subreads {
        let end = (s.q_start + s.seq.len()).min(s.q_end).min(len);
        if end > s.q_start {
            seq[s.q_start..end].copy_from_slice(&s.seq[..end - s.q_start]);
        }
    }

    let first = &subreads[0];
    SmrtRead {
        title: format!("{}/{}", first.movie, first.hole_number),
        movie: first.movie.clone(),
        hole_number: first.hole_number,
        seq,
        qual: None,
        q_start: 0,
        q_end: 0,
        lq_prefix: 0,
        lq_suffix: 0,
        hq_score: subreads.iter().map(|s| s.hq_score).max().unwrap_or(0),
    }
}

/// Work plan over stitched subread records. Every stitched interval is a
/// full pass, so the template is the one nearest the median length.
pub fn plan_from_subreads(subreads: &[SmrtRead]) -> WorkPlan {
    let mut intervals: Vec<ReadInterval> = subreads
        .iter()
        .map(|s| ReadInterval::new(s.q_start, s.q_end))
        .collect();
    intervals.sort_by_key(|iv| iv.start);
    let mut directions = create_directions(intervals.len());

    let template_idx = if intervals.is_empty() {
        None
    } else {
        let mut lengths: Vec<usize> = intervals.iter().map(|iv| iv.len()).collect();
        lengths.sort_unstable();
        let target = lengths[lengths.len() / 2];
        (0..intervals.len()).min_by_key(|&i| (intervals[i].len().abs_diff(target), i))
    };

    if let Some(t) = template_idx {
        if directions[t] == 1 {
            for d in &mut directions {
                *d ^= 1;
            }
        }
    }

    WorkPlan {
        intervals,
        directions,
        template_idx,
    }
}

/// Subread pipeline: one slot per planned interval; under --concordant only
/// the template is mapped de novo and the siblings are realigned against
/// its selected alignments.
#[allow(clippy::too_many_arguments)]
pub fn map_subread_intervals(
    read: &SmrtRead,
    read_rc: &[u8],
    batch: Option<&[SmrtRead]>,
    regions: Option<&RegionTable>,
    idx: &ReferenceIndex,
    params: &MapParams,
    rand_int: u32,
    bufs: &mut MappingBuffers,
) -> ReadAlignments {
    let plan = match batch {
        Some(subreads) => plan_from_subreads(subreads),
        None => build_work_plan(read, regions, params),
    };

    let mut alns = ReadAlignments::new(AlignMode::Subread);
    alns.resize(plan.len());
    if plan.is_empty() {
        return alns;
    }

    let (start, end) = if params.concordant {
        match plan.template_idx {
            Some(t) => {
                log::debug!(
                    "Concordant template subread index: {}, {}/{}..{}",
                    t,
                    read.hole_number,
                    plan.intervals[t].start,
                    plan.intervals[t].end
                );
                (t, t + 1)
            }
            None => (0, plan.len()),
        }
    } else {
        (0, plan.len())
    };

    for i in start..end {
        let selected = align_interval(read, &plan.intervals[i], idx, params, rand_int, bufs);
        alns.set_slot(i, selected);
    }

    if params.concordant {
        alns.mode = AlignMode::ZmwSubreads;
        if let Some(t) = plan.template_idx {
            // The template's selected alignments are shared by every sibling
            // realignment of this molecule.
            let templates: Vec<AlignmentCandidate> = alns.slot(t).to_vec();
            realign_passes_to_templates(
                read,
                read_rc,
                &templates,
                plan.intervals
                    .iter()
                    .zip(plan.directions.iter())
                    .enumerate()
                    .filter(|(i, _)| *i != t)
                    .map(|(i, (iv, dir))| (i, *iv, *dir)),
                params.concordant_align_both_directions,
                idx,
                params,
                bufs,
                &mut alns,
            );
        }
    }

    alns
}

/// Whole-molecule pipeline: Fullread for unrolled polymerase reads,
/// CcsDeNovo for consensus-only mapping, CcsAllPass/CcsFullPass when the
/// consensus alignments anchor realignment of the molecule's passes.
#[allow(clippy::too_many_arguments)]
pub fn map_whole_molecule(
    read: &SmrtRead,
    read_rc: &[u8],
    ccs: Option<&SmrtRead>,
    regions: Option<&RegionTable>,
    idx: &ReferenceIndex,
    params: &MapParams,
    rand_int: u32,
    bufs: &mut MappingBuffers,
) -> ReadAlignments {
    let query = ccs.unwrap_or(read);
    let whole = ReadInterval::new(0, query.len());
    let selected = align_interval(query, &whole, idx, params, rand_int, bufs);

    if ccs.is_none() || params.use_ccs_only {
        let mode = if ccs.is_some() {
            AlignMode::CcsDeNovo
        } else {
            AlignMode::Fullread
        };
        let mut alns = ReadAlignments::new(mode);
        alns.resize(1);
        alns.set_slot(0, selected);
        return alns;
    }

    // Explode: realign the unrolled read's passes to wherever the consensus
    // aligned.
    let (mode, mut passes) = if params.use_all_subreads_in_ccs {
        (
            AlignMode::CcsAllPass,
            SubreadIterator::all_fragments(read, regions, params.by_adapter),
        )
    } else {
        (
            AlignMode::CcsFullPass,
            SubreadIterator::full_pass(read, regions, params.by_adapter),
        )
    };

    let mut alns = ReadAlignments::new(mode);
    alns.resize(passes.num_passes());

    let mut pass_list = Vec::with_capacity(passes.num_passes());
    let mut slot = 0usize;
    while let Some(pass) = passes.next_pass() {
        pass_list.push((
            slot,
            ReadInterval::new(pass.start, pass.start + pass.num_bases),
            pass.direction,
        ));
        slot += 1;
    }

    realign_passes_to_templates(
        read,
        read_rc,
        &selected,
        pass_list.into_iter(),
        false,
        idx,
        params,
        bufs,
        &mut alns,
    );
    alns
}

/// Shared sibling-realignment loop. Template candidates arrive sorted by
/// ascending score; the per-candidate loop stops at the first one past the
/// score cutoff. Passes at or below the minimum read length are skipped.
#[allow(clippy::too_many_arguments)]
fn realign_passes_to_templates(
    read: &SmrtRead,
    read_rc: &[u8],
    templates: &[AlignmentCandidate],
    passes: impl Iterator<Item = (usize, ReadInterval, u8)>,
    both_directions: bool,
    idx: &ReferenceIndex,
    params: &MapParams,
    bufs: &mut MappingBuffers,
    alns: &mut ReadAlignments,
) {
    for (slot, interval, direction) in passes {
        if interval.len() <= params.min_read_length {
            continue;
        }
        for template in templates {
            if template.score > params.max_score {
                break;
            }
            if let Some(cand) = align_subread_to_target(
                read,
                read_rc,
                &interval,
                direction,
                template,
                idx,
                params,
                &mut bufs.trace,
            ) {
                alns.push_to_slot(slot, cand);
            }
            if both_directions {
                if let Some(cand) = align_subread_to_target(
                    read,
                    read_rc,
                    &interval,
                    direction ^ 1,
                    template,
                    idx,
                    params,
                    &mut bufs.trace,
                ) {
                    alns.push_to_slot(slot, cand);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subread(hole: u32, q_start: usize, q_end: usize) -> SmrtRead {
        SmrtRead {
            title: format!("m0/{}/{}_{}", hole, q_start, q_end),
            movie: "m0".into(),
            hole_number: hole,
            seq: vec![b'A'; q_end - q_start],
            qual: None,
            q_start,
            q_end,
            lq_prefix: 0,
            lq_suffix: 0,
            hq_score: 0,
        }
    }

    #[test]
    fn test_polymerase_stitching() {
        let subs = vec![subread(3, 0, 4), subread(3, 8, 12)];
        let stitched = polymerase_from_subreads(&subs);
        assert_eq!(stitched.len(), 12);
        assert_eq!(&stitched.seq, b"AAAANNNNAAAA");
        assert_eq!(stitched.hole_number, 3);
        assert_eq!(stitched.title, "m0/3");
    }

    #[test]
    fn test_plan_from_subreads_median_template() {
        let subs = vec![
            subread(3, 0, 200),
            subread(3, 210, 1010),
            subread(3, 1020, 1620),
            subread(3, 1630, 2030),
        ];
        let plan = plan_from_subreads(&subs);
        assert_eq!(plan.len(), 4);
        // Lengths 200, 800, 600, 400: upper median 600 picks index 2, which
        // already has direction 0 so nothing flips.
        assert_eq!(plan.template_idx, Some(2));
        assert_eq!(plan.directions, vec![0, 1, 0, 1]);
    }
}
