use std::fmt;

/// Fuzz case statistics
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    /// Number of executed transactions
    pub fuzz_cases: u64,

    /// Transactions that ended in an exception
    pub reverts: u64,

    /// Size of the coverage fingerprint set
    pub coverage: usize,

    /// Number of retained seeds
    pub corpus: usize,

    /// Every violation observed, duplicates included
    pub violations: u64,

    /// Distinct violated oracles
    pub unique_violations: usize,

    /// Patterns seen on reverted transactions
    pub potential_violations: u64,

    // Number of runs that finished
    pub threads_finished: u64,
}

impl Statistics {
    /// Fold the result of another run into this one
    pub fn merge(&mut self, other: &Statistics) {
        self.fuzz_cases += other.fuzz_cases;
        self.reverts += other.reverts;
        self.coverage += other.coverage;
        self.corpus += other.corpus;
        self.violations += other.violations;
        self.unique_violations += other.unique_violations;
        self.potential_violations += other.potential_violations;
        self.threads_finished += other.threads_finished;
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:9} fuzz cases | {:8} reverts | {:6} coverage | {:6} corpus | {:6} violations [{:4} unique] | {:6} potential",
            self.fuzz_cases,
            self.reverts,
            self.coverage,
            self.corpus,
            self.violations,
            self.unique_violations,
            self.potential_violations
        )
    }
}
