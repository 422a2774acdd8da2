use serde::{Deserialize, Serialize};

// ─── Scalar aliases ───────────────────────────────────────────

/// Declared identity of a policy, framework, control, query or risk factor.
pub type Mrn = String;

/// Content checksum of a query's compiled executable form.
pub type CodeId = String;

/// Stable id of a compiled applicability predicate.
pub type PredicateId = String;

/// Seconds since the Unix epoch (UTC). Zero means "unbounded".
pub type UnixSeconds = i64;

// ─── Actions ──────────────────────────────────────────────────

/// Per-reference activation override.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    #[default]
    Unspecified,
    Activate,
    Deactivate,
    Ignore,
}

impl Action {
    pub fn is_specified(self) -> bool {
        self != Action::Unspecified
    }
}

/// Outcome of activation for one reachable entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// Materialized and scored.
    Active,
    /// Materialized, contributes no score.
    Ignored,
    /// Not materialized.
    Absent,
}

impl From<Action> for Activation {
    fn from(action: Action) -> Self {
        match action {
            Action::Unspecified | Action::Activate => Activation::Active,
            Action::Ignore => Activation::Ignored,
            Action::Deactivate => Activation::Absent,
        }
    }
}

// ─── Scoring ──────────────────────────────────────────────────

/// Aggregation rule a reporting job applies to its children.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoringSystem {
    #[default]
    Unspecified,
    Weighted,
    Worst,
    Average,
    DataOnly,
    IgnoreScore,
    Banded,
    Decayed,
    Disabled,
}

impl ScoringSystem {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoringSystem::Unspecified => "UNSPECIFIED",
            ScoringSystem::Weighted => "WEIGHTED",
            ScoringSystem::Worst => "WORST",
            ScoringSystem::Average => "AVERAGE",
            ScoringSystem::DataOnly => "DATA_ONLY",
            ScoringSystem::IgnoreScore => "IGNORE_SCORE",
            ScoringSystem::Banded => "BANDED",
            ScoringSystem::Decayed => "DECAYED",
            ScoringSystem::Disabled => "DISABLED",
        }
    }
}

// ─── Groups ───────────────────────────────────────────────────

/// Kind of a policy or framework group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupType {
    /// Regular content group.
    #[default]
    Default,
    /// Removes the referenced entities.
    Disable,
    /// Removes the referenced entities, reported as out of scope.
    OutOfScope,
    /// Keeps the referenced entities but ignores their score once accepted.
    Exception,
}

impl GroupType {
    /// Groups that modify other references instead of contributing content.
    pub fn is_modifier(self) -> bool {
        self != GroupType::Default
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    #[default]
    Unspecified,
    Accepted,
    Rejected,
}

// ─── Reporting job kinds ──────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportingJobType {
    Root,
    Policy,
    Framework,
    Control,
    Check,
    DataQuery,
    RiskFactor,
}

impl ReportingJobType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportingJobType::Root => "ROOT",
            ReportingJobType::Policy => "POLICY",
            ReportingJobType::Framework => "FRAMEWORK",
            ReportingJobType::Control => "CONTROL",
            ReportingJobType::Check => "CHECK",
            ReportingJobType::DataQuery => "DATA_QUERY",
            ReportingJobType::RiskFactor => "RISK_FACTOR",
        }
    }

    /// Nodes backed by executable code.
    pub fn is_query(self) -> bool {
        matches!(self, ReportingJobType::Check | ReportingJobType::DataQuery)
    }
}

/// `end == 0` is unbounded; otherwise valid strictly before `end`.
pub fn is_valid_until(end: UnixSeconds, now: UnixSeconds) -> bool {
    end == 0 || end > now
}

/// `start == 0` is unbounded; otherwise valid from `start` on.
pub fn is_valid_from(start: UnixSeconds, now: UnixSeconds) -> bool {
    start == 0 || start <= now
}
