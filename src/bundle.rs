// Per-molecule container of selected alignments, handed to the Writer as
// one unit.

use crate::candidates::AlignmentCandidate;

/// How the molecule was aligned; recorded on the bundle and reported with
/// each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignMode {
    Subread,
    ZmwSubreads,
    CcsDeNovo,
    Fullread,
    CcsAllPass,
    CcsFullPass,
}

impl AlignMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlignMode::Subread => "Subread",
            AlignMode::ZmwSubreads => "ZmwSubreads",
            AlignMode::CcsDeNovo => "CcsDeNovo",
            AlignMode::Fullread => "Fullread",
            AlignMode::CcsAllPass => "CcsAllPass",
            AlignMode::CcsFullPass => "CcsFullPass",
        }
    }
}

/// Selected candidate lists, one slot per planned interval (or pass).
/// Created empty, mutated only by the owning worker, serialized in full to
/// the Writer, then dropped.
#[derive(Debug)]
pub struct ReadAlignments {
    pub mode: AlignMode,
    slots: Vec<Vec<AlignmentCandidate>>,
}

impl ReadAlignments {
    pub fn new(mode: AlignMode) -> Self {
        ReadAlignments {
            mode,
            slots: Vec::new(),
        }
    }

    pub fn resize(&mut self, n: usize) {
        self.slots.resize_with(n, Vec::new);
    }

    pub fn n_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn set_slot(&mut self, i: usize, cands: Vec<AlignmentCandidate>) {
        self.slots[i] = cands;
    }

    pub fn push_to_slot(&mut self, i: usize, cand: AlignmentCandidate) {
        self.slots[i].push(cand);
    }

    pub fn slot(&self, i: usize) -> &[AlignmentCandidate] {
        &self.slots[i]
    }

    pub fn slots(&self) -> impl Iterator<Item = &[AlignmentCandidate]> {
        self.slots.iter().map(|s| s.as_slice())
    }

    pub fn n_selected(&self) -> usize {
        self.slots.iter().map(|s| s.len()).sum()
    }
}
