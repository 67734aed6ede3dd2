//! Fault injection knobs for the simulated light.

/// Failure modes applied to subsequent operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// Never complete writes.
    pub drop_writes: bool,
    /// Complete writes with this transport error.
    pub fail_writes: Option<String>,
    /// Never complete reads.
    pub drop_reads: bool,
    /// Complete reads with this transport error.
    pub fail_reads: Option<String>,
    /// Answer pairing reads with these bytes instead of the real response.
    pub pair_response: Option<Vec<u8>>,
    /// Refuse mesh credential updates.
    pub reject_mesh_update: bool,
}

impl Faults {
    /// No faults.
    pub fn none() -> Self {
        Self::default()
    }

    /// Writes vanish without a completion.
    pub fn dropping_writes() -> Self {
        Faults {
            drop_writes: true,
            ..Self::default()
        }
    }

    /// Reads vanish without a completion.
    pub fn dropping_reads() -> Self {
        Faults {
            drop_reads: true,
            ..Self::default()
        }
    }

    /// Writes fail with `reason`.
    pub fn failing_writes(reason: impl Into<String>) -> Self {
        Faults {
            fail_writes: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Pairing reads return `bytes`.
    pub fn with_pair_response(bytes: &[u8]) -> Self {
        Faults {
            pair_response: Some(bytes.to_vec()),
            ..Self::default()
        }
    }
}
