pub mod bundle; // Per-molecule alignment container and mode tags
pub mod candidates; // Alignment candidates and deterministic selection
pub mod concordant; // Template flanking and sibling realignment
pub mod error;
pub mod index; // Shared suffix array / FM view / count table handle
pub mod kernel; // Seed-and-extend mapping kernel
pub mod mapper; // Per-interval mapping with sensitive retry
pub mod params;
pub mod pipeline; // Subread and whole-molecule pipelines
pub mod plan; // Interval planning and template policies
pub mod reads; // Molecule records and the serialized Read Source
pub mod regions; // Region table oracle (inserts, adapters, HQ)
pub mod runtime; // Worker pool
pub mod seqdb; // Contig boundary index over the reference
pub mod swa; // Banded Smith-Waterman with traceback
pub mod writer; // Serialized tabular/SAM writer
