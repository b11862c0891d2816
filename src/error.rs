use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong in this library. Local detection yields the
/// error; collective operations check collectively, so an error detected on
/// one rank is surfaced on all of them.
#[derive(Debug, Error)]
pub enum Error {
    /// The neighbor graph handed to `Domain::new` is inconsistent.
    #[error("domain invariant violated at patch {patch_id}: {detail}")]
    DomainInvariantViolation { patch_id: i64, detail: String },

    /// A face index outside the enumeration for its dimension.
    #[error("face index {index} out of range for {kind}")]
    FaceOutOfRange { kind: &'static str, index: usize },

    /// A typed neighbor accessor was called for the wrong variant.
    #[error("neighbor on face {face} is {actual}, not {requested}")]
    NbrTypeMismatch {
        face: usize,
        requested: &'static str,
        actual: &'static str,
    },

    /// Arithmetic between vectors that do not share a domain and shape.
    #[error("vector shape mismatch: {detail}")]
    VectorShapeMismatch { detail: String },

    /// View indexing out of range (debug builds).
    #[error("view coordinate {coord:?} out of bounds")]
    OutOfBounds { coord: Vec<isize> },

    /// Illegal `CycleBuilder` transition or null-equivalent argument.
    #[error("cycle builder misuse: {operation} is not legal from state {from_state}")]
    BuilderMisuse {
        from_state: &'static str,
        operation: &'static str,
    },

    /// A Krylov method lost orthogonality or hit a zero denominator.
    #[error("krylov breakdown: {detail}")]
    Breakdown { detail: &'static str },

    /// The message transport failed underneath a collective.
    #[error("communication failure on rank {rank} during {stage}")]
    CommunicationFailure { rank: usize, stage: &'static str },

    /// A configuration the implementation cannot handle.
    #[error("unsupported: {what}")]
    UnsupportedFeature { what: String },

    /// A serialized byte stream that cannot be decoded.
    #[error("malformed serialized data: {detail}")]
    MalformedData { detail: String },
}
