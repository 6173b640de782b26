// Seed-and-extend mapping kernel.
//
// A pure function of (query, index, parameters): exact seed matches come from
// the FM view (with a tuple-count prefilter against overrepresented words and
// the suffix array resolving match positions), seeds are clustered by
// diagonal, and the best clusters are extended with banded Smith-Waterman
// against a window of the reference. Scores are distance-style: smaller is
// better, good alignments are strongly negative.

use bio::data_structures::fmindex::{BackwardSearchResult, FMIndexable};

use crate::candidates::AlignmentCandidate;
use crate::index::ReferenceIndex;
use crate::swa::{banded_sw, SwScoring};

/// Kernel sensitivity profile. Two instances exist per run: the default one
/// and the sensitive retry profile.
#[derive(Debug, Clone)]
pub struct KernelParams {
    pub min_match_len: usize,
    pub max_seed_hits: usize,
    pub max_kmer_freq: u32,
    pub n_candidates: usize,
}

/// Per-worker reusable scratch. Lives for the worker's lifetime and is
/// reset every 100 molecules to curb fragmentation.
#[derive(Debug, Default)]
pub struct MappingBuffers {
    pub(crate) anchors: Vec<Anchor>,
    pub(crate) trace: Vec<u8>,
}

impl MappingBuffers {
    pub fn new() -> Self {
        MappingBuffers::default()
    }

    /// Drop accumulated capacity.
    pub fn reset(&mut self) {
        self.anchors = Vec::new();
        self.trace = Vec::new();
    }
}

/// An exact seed match: query offset -> concatenated-text offset.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Anchor {
    qpos: usize,
    tpos: usize,
}

impl Anchor {
    fn diag(&self) -> i64 {
        self.tpos as i64 - self.qpos as i64
    }
}

#[derive(Debug, Clone, Copy)]
struct Cluster {
    begin: usize, // anchor index range, half open
    end: usize,
    diag_lo: i64,
    diag_hi: i64,
}

impl Cluster {
    fn count(&self) -> usize {
        self.end - self.begin
    }
}

// Anchors per read are capped to keep pathological repeat regions from
// exploding the cluster sweep.
const MAX_ANCHORS: usize = 100_000;
const MAX_TPOS_GAP: i64 = 10_000;

/// Map one query (given in both orientations) against the reference.
/// Returns candidates sorted by ascending score. An empty result is not an
/// error; the caller decides whether to retry with a sensitive profile.
pub fn map_read(
    query: &[u8],
    query_rc: &[u8],
    idx: &ReferenceIndex,
    kp: &KernelParams,
    sc: &SwScoring,
    bufs: &mut MappingBuffers,
) -> Vec<AlignmentCandidate> {
    let mut out: Vec<AlignmentCandidate> = Vec::new();
    let k = kp.min_match_len;

    for (strand, q) in [(0u8, query), (1u8, query_rc)] {
        if q.len() < k {
            continue;
        }
        collect_anchors(q, idx, kp, &mut bufs.anchors);
        if bufs.anchors.is_empty() {
            continue;
        }
        let clusters = cluster_anchors(&mut bufs.anchors, q.len());
        let MappingBuffers { anchors, trace } = bufs;
        extend_clusters(q, strand, &clusters, anchors, idx, kp, sc, trace, &mut out);
    }

    out.sort_by(|a, b| {
        a.score.cmp(&b.score).then(
            b.pct_similarity
                .partial_cmp(&a.pct_similarity)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
    dedupe_overlaps(&mut out);
    out
}

fn collect_anchors(q: &[u8], idx: &ReferenceIndex, kp: &KernelParams, anchors: &mut Vec<Anchor>) {
    anchors.clear();
    let k = kp.min_match_len;
    let fm = idx.fm();
    let sa = idx.sa();

    for qpos in 0..=q.len() - k {
        let window = &q[qpos..qpos + k];
        // Skip overrepresented words; the count table also rejects windows
        // whose leading tuple contains an ambiguous base.
        match idx.counts().frequency(window) {
            Some(freq) if freq <= kp.max_kmer_freq => {}
            _ => continue,
        }
        if let BackwardSearchResult::Complete(intv) = fm.backward_search(window.iter()) {
            let n = intv.upper.saturating_sub(intv.lower);
            if n == 0 || n > kp.max_seed_hits {
                continue;
            }
            for &tpos in &sa[intv.lower..intv.upper] {
                anchors.push(Anchor { qpos, tpos });
            }
            if anchors.len() > MAX_ANCHORS {
                return;
            }
        }
    }
}

/// Group diagonal-sorted anchors into clusters. Consecutive anchors belong
/// to the same cluster while their diagonals stay within the drift bound and
/// their target positions within a fixed gap.
fn cluster_anchors(anchors: &mut [Anchor], qlen: usize) -> Vec<Cluster> {
    anchors.sort_unstable_by_key(|a| (a.diag(), a.tpos));
    let max_drift = (qlen / 4 + 32) as i64;

    let mut clusters = Vec::new();
    let mut begin = 0usize;
    for i in 1..=anchors.len() {
        let split = if i == anchors.len() {
            true
        } else {
            let prev = &anchors[i - 1];
            let cur = &anchors[i];
            cur.diag() - prev.diag() > max_drift
                || (cur.tpos as i64 - prev.tpos as i64).abs() > qlen as i64 + MAX_TPOS_GAP
        };
        if split {
            clusters.push(Cluster {
                begin,
                end: i,
                diag_lo: anchors[begin].diag(),
                diag_hi: anchors[i - 1].diag(),
            });
            begin = i;
        }
    }
    clusters.sort_by(|a, b| b.count().cmp(&a.count()));
    clusters
}

#[allow(clippy::too_many_arguments)]
fn extend_clusters(
    q: &[u8],
    strand: u8,
    clusters: &[Cluster],
    anchors: &[Anchor],
    idx: &ReferenceIndex,
    kp: &KernelParams,
    sc: &SwScoring,
    trace: &mut Vec<u8>,
    out: &mut Vec<AlignmentCandidate>,
) {
    let seqdb = idx.seqdb();
    let genome = idx.genome();
    let qlen = q.len();

    for cluster in clusters.iter().take(kp.n_candidates) {
        let drift = (cluster.diag_hi - cluster.diag_lo) as usize;
        let band = drift / 2 + qlen / 10 + 16;

        let w_start = cluster.diag_lo - band as i64;
        let w_end = cluster.diag_hi + qlen as i64 + band as i64;

        let Some(rid) = seqdb.pos2rid(anchors[cluster.begin].tpos) else {
            continue;
        };
        let (ws, we) =
            seqdb.clamp_to_contig(rid, w_start.max(0) as usize, w_end.max(0) as usize);
        if we <= ws || we - ws < kp.min_match_len {
            continue;
        }

        let Some(sw) = banded_sw(q, &genome[ws..we], band, sc, trace) else {
            continue;
        };
        if sw.q_end - sw.q_start < kp.min_match_len {
            continue;
        }

        let aligned_cols = sw.n_match + sw.n_mismatch + sw.n_ins + sw.n_del;
        let t_offset = seqdb.offset(rid);
        out.push(AlignmentCandidate {
            t_id: rid,
            t_start: ws + sw.t_start - t_offset,
            t_end: ws + sw.t_end - t_offset,
            q_start: sw.q_start,
            q_end: sw.q_end,
            q_strand: strand,
            score: -sw.score,
            pct_similarity: 100.0 * sw.n_match as f32 / aligned_cols.max(1) as f32,
            n_match: sw.n_match,
            n_mismatch: sw.n_mismatch,
            n_ins: sw.n_ins,
            n_del: sw.n_del,
            mapqv: None,
            cigar: sw.cigar,
        });
    }
}

/// Drop candidates that restate a better candidate's placement: same contig,
/// same strand, and more than half of the better target interval covered.
fn dedupe_overlaps(cands: &mut Vec<AlignmentCandidate>) {
    let mut kept: Vec<AlignmentCandidate> = Vec::with_capacity(cands.len());
    for cand in cands.drain(..) {
        let redundant = kept.iter().any(|better| {
            better.t_id == cand.t_id
                && better.q_strand == cand.q_strand
                && overlap(better.t_start, better.t_end, cand.t_start, cand.t_end) * 2
                    > better.t_end - better.t_start
        });
        if !redundant {
            kept.push(cand);
        }
    }
    *cands = kept;
}

fn overlap(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> usize {
    let lo = a_start.max(b_start);
    let hi = a_end.min(b_end);
    hi.saturating_sub(lo)
}
