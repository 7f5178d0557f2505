// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;
use std::ops::AddAssign;

/// Name of the group assignment column in the votes table.
pub const GROUP_ID_COLUMN: &str = "group-id";
/// Name of the participant identifier column in the votes table, when present.
/// It is only used to make the logs readable.
pub const PARTICIPANT_COLUMN: &str = "participant";
/// Name of the identifier column in the comments table.
pub const COMMENT_ID_COLUMN: &str = "comment-id";
/// Name of the free-text column in the comments table.
pub const COMMENT_BODY_COLUMN: &str = "comment-body";
/// Canonical name given to the comment text in the output.
pub const COMMENT_TEXT_COLUMN: &str = "comment_text";

/// The recomputed aggregate columns, in the order they are written when they
/// have to be appended to the comment table.
pub const TOTAL_COLUMNS: [&str; 3] = ["agrees", "disagrees", "passes"];

/// A table as handed over by the loader: column names plus string cells.
///
/// An empty cell means that no value was recorded at this position.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// A single vote on one comment, decoded from the -1/0/1 encoding.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum VoteValue {
    Disagree,
    Pass,
    Agree,
}

impl VoteValue {
    /// Decodes the export encoding. Anything outside {-1, 0, 1} is not a vote.
    pub fn from_encoded(x: i64) -> Option<VoteValue> {
        match x {
            -1 => Some(VoteValue::Disagree),
            0 => Some(VoteValue::Pass),
            1 => Some(VoteValue::Agree),
            _ => None,
        }
    }
}

/// One cleaned row of the vote matrix.
///
/// `votes` only holds the votes that were actually cast: a comment the
/// participant skipped has no entry at all.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct VoteRecord {
    pub participant: String,
    pub group_id: i64,
    pub votes: Vec<(i64, VoteValue)>,
}

/// The cleaned vote matrix plus the domains discovered while cleaning it.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct NormalizedVotes {
    pub records: Vec<VoteRecord>,
    /// Distinct group identifiers, sorted.
    pub group_ids: Vec<i64>,
    /// The comment identifiers named by the vote columns, sorted.
    pub comment_ids: Vec<i64>,
    /// Rows dropped because they had no group assignment.
    pub dropped_unassigned: usize,
}

/// One row of the comments table. `fields` is aligned with the columns of
/// the owning [CommentTable] and passes through to the output untouched.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CommentRecord {
    pub comment_id: i64,
    pub fields: Vec<String>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CommentTable {
    pub columns: Vec<String>,
    /// Position of the comment identifier within `columns`.
    pub id_column: usize,
    pub rows: Vec<CommentRecord>,
}

// ******** Output data structures *********

/// Counts of each vote kind for one (comment, group) pair.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Hash)]
pub struct TallyCounts {
    pub agrees: u64,
    pub disagrees: u64,
    pub passes: u64,
}

impl TallyCounts {
    /// The counts in the order the output columns are laid out
    /// (disagree, pass, agree).
    pub fn kind_counts(&self) -> [u64; 3] {
        [self.disagrees, self.passes, self.agrees]
    }

    /// Total number of cast votes behind this tally.
    pub fn total(&self) -> u64 {
        self.agrees + self.disagrees + self.passes
    }
}

impl AddAssign for TallyCounts {
    fn add_assign(&mut self, rhs: TallyCounts) {
        self.agrees += rhs.agrees;
        self.disagrees += rhs.disagrees;
        self.passes += rhs.passes;
    }
}

/// The tally for one (comment, group) pair that had at least one cast vote.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct GroupTally {
    pub comment_id: i64,
    pub group_id: i64,
    pub counts: TallyCounts,
}

/// One comment with a tally for every known group, in group-domain order.
/// Pairs that were never observed carry zero counts.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct WidenedRow {
    pub comment_id: i64,
    pub counts: Vec<TallyCounts>,
}

/// The final output table: schema plus rows, ready for serialization.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct MergedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// How many rows fell out of the inner join between the comments table and
/// the widened tallies. Non-zero values are a data-consistency signal for
/// the caller, not an error.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub struct JoinStats {
    /// Comments with no counterpart column in the vote matrix.
    pub comments_without_votes: u64,
    /// Vote columns with no counterpart row in the comments table.
    pub votes_without_comments: u64,
}

/// Everything produced by one run over the two input tables.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct GroupStatsResult {
    pub table: MergedTable,
    pub group_ids: Vec<i64>,
    pub comment_ids: Vec<i64>,
    pub join_stats: JoinStats,
    pub dropped_unassigned: usize,
}

// ******** Errors *********

/// Errors that prevent the tally computation from completing.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum TallyErrors {
    /// A required column is absent from one of the input tables.
    MissingColumn {
        table: &'static str,
        column: String,
    },
    /// A value that is used as a tally key could not be coerced to an
    /// integer. Silently dropping such a row would corrupt the keys, so
    /// this is fatal.
    TypeMismatch { column: String, value: String },
    /// A vote cell held something other than -1, 0, 1 or blank.
    BadVoteValue { column: String, value: String },
}

impl Error for TallyErrors {}

impl Display for TallyErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TallyErrors::MissingColumn { table, column } => {
                write!(f, "the {} table has no {:?} column", table, column)
            }
            TallyErrors::TypeMismatch { column, value } => {
                write!(
                    f,
                    "cannot read the {:?} value {:?} as an integer",
                    column, value
                )
            }
            TallyErrors::BadVoteValue { column, value } => {
                write!(
                    f,
                    "unexpected vote value {:?} in column {:?} (expected -1, 0, 1 or blank)",
                    value, column
                )
            }
        }
    }
}
