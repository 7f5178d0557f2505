mod records;
use log::{debug, info, warn};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub use crate::records::*;

// **** Private structures ****

/// One melted vote event: a single cast vote attributed to a group.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
struct VoteEvent {
    comment_id: i64,
    group_id: i64,
    value: VoteValue,
}

/// The vote kinds in the order the output columns are laid out.
const VOTE_KINDS: [&str; 3] = ["disagree", "pass", "agree"];

/// Runs the full tally computation over the two input tables.
///
/// Arguments:
/// * `votes` the participants-votes matrix: one row per participant, one
///   purely-numeric-named column per comment.
/// * `comments` the comments table, keyed by `comment-id`.
///
/// The result is a pure function of the inputs: running it twice over the
/// same tables yields identical output.
pub fn run_group_stats(
    votes: &RawTable,
    comments: &RawTable,
) -> Result<GroupStatsResult, TallyErrors> {
    info!(
        "run_group_stats: processing {} vote rows and {} comment rows",
        votes.rows.len(),
        comments.rows.len()
    );

    let normalized = normalize_votes(votes)?;
    info!(
        "run_group_stats: {} vote records kept ({} unassigned dropped), {} groups, {} vote columns",
        normalized.records.len(),
        normalized.dropped_unassigned,
        normalized.group_ids.len(),
        normalized.comment_ids.len()
    );

    let comment_table = normalize_comments(comments)?;

    let tallies = aggregate_votes(&normalized.records);
    debug!(
        "run_group_stats: {} (comment, group) pairs with at least one vote",
        tallies.len()
    );

    let widened = widen_tallies(&tallies, &normalized.group_ids, &normalized.comment_ids);
    let (table, join_stats) = merge_comments(&comment_table, &widened, &normalized.group_ids);

    if join_stats.comments_without_votes > 0 || join_stats.votes_without_comments > 0 {
        warn!(
            "run_group_stats: join mismatch: {} comments without vote columns, {} vote columns without comments (unmatched rows dropped)",
            join_stats.comments_without_votes, join_stats.votes_without_comments
        );
    }

    info!("run_group_stats: produced {} output rows", table.rows.len());
    Ok(GroupStatsResult {
        table,
        group_ids: normalized.group_ids,
        comment_ids: normalized.comment_ids,
        join_stats,
        dropped_unassigned: normalized.dropped_unassigned,
    })
}

/// Coerces a cell to an integer key.
///
/// Exports that have been round-tripped through dataframe tooling write
/// integer columns as floats ("4.0"), so a float literal with a zero
/// fractional part is accepted as well. Returns None for everything else,
/// including the empty cell.
fn coerce_int(cell: &str) -> Option<i64> {
    let t = cell.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(x) = t.parse::<i64>() {
        return Some(x);
    }
    match t.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Some(f as i64),
        _ => None,
    }
}

/// A column of the votes table holds votes exactly when its name is purely
/// numeric; the name is then the comment identifier.
fn is_comment_column(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

fn parse_vote(cell: &str) -> Option<VoteValue> {
    coerce_int(cell).and_then(VoteValue::from_encoded)
}

/// Cleans the raw vote matrix.
///
/// Rows without a group assignment are dropped (they cannot contribute to
/// any group tally); surviving `group-id` values must coerce to integers.
/// The comment domain is discovered from the numeric column names,
/// independently of the comments table.
pub fn normalize_votes(table: &RawTable) -> Result<NormalizedVotes, TallyErrors> {
    let group_idx = table
        .column_index(GROUP_ID_COLUMN)
        .ok_or(TallyErrors::MissingColumn {
            table: "votes",
            column: GROUP_ID_COLUMN.to_string(),
        })?;
    let participant_idx = table.column_index(PARTICIPANT_COLUMN);

    let mut vote_columns: Vec<(usize, i64)> = Vec::new();
    for (idx, name) in table.columns.iter().enumerate() {
        if !is_comment_column(name) {
            continue;
        }
        let comment_id = name
            .parse::<i64>()
            .map_err(|_| TallyErrors::TypeMismatch {
                column: name.clone(),
                value: name.clone(),
            })?;
        vote_columns.push((idx, comment_id));
    }
    debug!(
        "normalize_votes: {} vote columns out of {}",
        vote_columns.len(),
        table.columns.len()
    );

    let mut records: Vec<VoteRecord> = Vec::new();
    let mut group_ids: BTreeSet<i64> = BTreeSet::new();
    let mut dropped_unassigned: usize = 0;
    for (idx, row) in table.rows.iter().enumerate() {
        let participant = participant_idx
            .and_then(|i| row.get(i))
            .cloned()
            .unwrap_or_else(|| format!("row-{}", idx + 1));

        let raw_group = row.get(group_idx).map(String::as_str).unwrap_or("");
        if raw_group.trim().is_empty() {
            debug!(
                "normalize_votes: participant {:?} has no group assignment, dropping",
                participant
            );
            dropped_unassigned += 1;
            continue;
        }
        let group_id = coerce_int(raw_group).ok_or(TallyErrors::TypeMismatch {
            column: GROUP_ID_COLUMN.to_string(),
            value: raw_group.to_string(),
        })?;

        let mut cast: Vec<(i64, VoteValue)> = Vec::new();
        for &(col_idx, comment_id) in vote_columns.iter() {
            let cell = row.get(col_idx).map(String::as_str).unwrap_or("");
            if cell.trim().is_empty() {
                // No vote cast on this comment. This is not a pass.
                continue;
            }
            let value = parse_vote(cell).ok_or(TallyErrors::BadVoteValue {
                column: table.columns[col_idx].clone(),
                value: cell.to_string(),
            })?;
            cast.push((comment_id, value));
        }

        group_ids.insert(group_id);
        records.push(VoteRecord {
            participant,
            group_id,
            votes: cast,
        });
    }

    let mut comment_ids: Vec<i64> = vote_columns.iter().map(|p| p.1).collect();
    comment_ids.sort_unstable();
    comment_ids.dedup();

    Ok(NormalizedVotes {
        records,
        group_ids: group_ids.into_iter().collect(),
        comment_ids,
        dropped_unassigned,
    })
}

/// Cleans the comments table: the `comment-id` key is coerced to an
/// integer, everything else passes through untouched.
pub fn normalize_comments(table: &RawTable) -> Result<CommentTable, TallyErrors> {
    let id_column = table
        .column_index(COMMENT_ID_COLUMN)
        .ok_or(TallyErrors::MissingColumn {
            table: "comments",
            column: COMMENT_ID_COLUMN.to_string(),
        })?;

    let mut rows: Vec<CommentRecord> = Vec::with_capacity(table.rows.len());
    for row in table.rows.iter() {
        let raw = row.get(id_column).map(String::as_str).unwrap_or("");
        let comment_id = coerce_int(raw).ok_or(TallyErrors::TypeMismatch {
            column: COMMENT_ID_COLUMN.to_string(),
            value: raw.to_string(),
        })?;
        rows.push(CommentRecord {
            comment_id,
            fields: row.clone(),
        });
    }
    Ok(CommentTable {
        columns: table.columns.clone(),
        id_column,
        rows,
    })
}

fn melt_votes(records: &[VoteRecord]) -> Vec<VoteEvent> {
    let mut events: Vec<VoteEvent> = Vec::new();
    for r in records.iter() {
        for &(comment_id, value) in r.votes.iter() {
            events.push(VoteEvent {
                comment_id,
                group_id: r.group_id,
                value,
            });
        }
    }
    events
}

/// Reshapes the wide vote records into per-(comment, group) tallies.
///
/// Two passes: melt the matrix into long-form vote events, then accumulate
/// the events per pair. A kind that never occurs for a pair stays at zero
/// in the fixed-shape counts.
pub fn aggregate_votes(records: &[VoteRecord]) -> Vec<GroupTally> {
    let events = melt_votes(records);
    debug!(
        "aggregate_votes: {} vote events from {} records",
        events.len(),
        records.len()
    );

    let mut acc: BTreeMap<(i64, i64), TallyCounts> = BTreeMap::new();
    for ev in events.iter() {
        let counts = acc.entry((ev.comment_id, ev.group_id)).or_default();
        match ev.value {
            VoteValue::Agree => counts.agrees += 1,
            VoteValue::Disagree => counts.disagrees += 1,
            VoteValue::Pass => counts.passes += 1,
        }
    }

    acc.into_iter()
        .map(|((comment_id, group_id), counts)| GroupTally {
            comment_id,
            group_id,
            counts,
        })
        .collect()
}

/// The names of the per-group count columns, generated from the group
/// domain before any row is emitted so that schema and data cannot drift
/// apart.
pub fn widened_columns(group_ids: &[i64]) -> Vec<String> {
    let mut cols: Vec<String> = Vec::with_capacity(group_ids.len() * VOTE_KINDS.len());
    for gid in group_ids.iter() {
        for kind in VOTE_KINDS.iter() {
            cols.push(format!("group-{}-{}-count", gid, kind));
        }
    }
    cols
}

/// Pivots the tallies into one fixed-shape row per comment.
///
/// The row index is anchored on the full comment domain discovered from the
/// vote matrix, and every (comment, group) pair of the two domains gets a
/// value: pairs that were never observed densify to zero so that the
/// downstream sums never meet a missing count.
pub fn widen_tallies(
    tallies: &[GroupTally],
    group_ids: &[i64],
    comment_ids: &[i64],
) -> Vec<WidenedRow> {
    let by_pair: HashMap<(i64, i64), TallyCounts> = tallies
        .iter()
        .map(|t| ((t.comment_id, t.group_id), t.counts))
        .collect();

    comment_ids
        .iter()
        .map(|&comment_id| WidenedRow {
            comment_id,
            counts: group_ids
                .iter()
                .map(|&gid| by_pair.get(&(comment_id, gid)).copied().unwrap_or_default())
                .collect(),
        })
        .collect()
}

/// Joins the widened tallies onto the comments table.
///
/// The aggregate `agrees`/`disagrees`/`passes` fields are recomputed from
/// the per-group counts; whatever the input carried there is discarded as a
/// stale cache. The join is inner: unmatched rows on either side are
/// dropped and counted in the returned [JoinStats].
pub fn merge_comments(
    comments: &CommentTable,
    widened: &[WidenedRow],
    group_ids: &[i64],
) -> (MergedTable, JoinStats) {
    let by_comment: HashMap<i64, &WidenedRow> =
        widened.iter().map(|w| (w.comment_id, w)).collect();

    // Output schema: the comment columns with the body renamed and the
    // total columns recomputed in place (appended when absent), then the
    // per-group count columns.
    let mut columns: Vec<String> = comments
        .columns
        .iter()
        .map(|c| {
            if c == COMMENT_BODY_COLUMN {
                COMMENT_TEXT_COLUMN.to_string()
            } else {
                c.clone()
            }
        })
        .collect();
    let total_indexes: Vec<usize> = TOTAL_COLUMNS
        .iter()
        .map(|name| match columns.iter().position(|c| c == name) {
            Some(idx) => idx,
            None => {
                columns.push(name.to_string());
                columns.len() - 1
            }
        })
        .collect();
    let base_len = columns.len();
    columns.extend(widened_columns(group_ids));

    let mut rows: Vec<Vec<String>> = Vec::with_capacity(comments.rows.len());
    let mut stats = JoinStats::default();
    let mut matched: HashSet<i64> = HashSet::new();

    for comment in comments.rows.iter() {
        let row_counts = match by_comment.get(&comment.comment_id) {
            Some(w) => &w.counts,
            None => {
                debug!(
                    "merge_comments: comment {} has no vote column, dropping",
                    comment.comment_id
                );
                stats.comments_without_votes += 1;
                continue;
            }
        };
        matched.insert(comment.comment_id);

        let mut totals = TallyCounts::default();
        for counts in row_counts.iter() {
            totals += *counts;
        }

        let mut row: Vec<String> = vec![String::new(); base_len];
        for idx in 0..comments.columns.len() {
            row[idx] = comment.fields.get(idx).cloned().unwrap_or_default();
        }
        row[comments.id_column] = comment.comment_id.to_string();
        row[total_indexes[0]] = totals.agrees.to_string();
        row[total_indexes[1]] = totals.disagrees.to_string();
        row[total_indexes[2]] = totals.passes.to_string();
        for counts in row_counts.iter() {
            for v in counts.kind_counts().iter() {
                row.push(v.to_string());
            }
        }
        rows.push(row);
    }

    stats.votes_without_comments = widened
        .iter()
        .filter(|w| !matched.contains(&w.comment_id))
        .count() as u64;

    (MergedTable { columns, rows }, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(columns: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    fn votes_table(rows: &[&[&str]]) -> RawTable {
        raw(&["participant", "group-id", "101"], rows)
    }

    fn comments_table(rows: &[&[&str]]) -> RawTable {
        raw(
            &["comment-id", "comment-body", "agrees", "disagrees", "passes"],
            rows,
        )
    }

    fn cell<'a>(res: &'a GroupStatsResult, row: usize, column: &str) -> &'a str {
        let idx = res
            .table
            .columns
            .iter()
            .position(|c| c == column)
            .unwrap_or_else(|| panic!("no column {:?}", column));
        res.table.rows[row][idx].as_str()
    }

    #[test]
    fn two_participants_one_comment() {
        let _ = env_logger::builder().is_test(true).try_init();
        let votes = votes_table(&[&["p1", "1", "1"], &["p2", "1", "-1"]]);
        let comments = comments_table(&[&["101", "Free icecream", "9", "9", "9"]]);

        let res = run_group_stats(&votes, &comments).unwrap();
        assert_eq!(
            res.table.columns,
            vec![
                "comment-id",
                "comment_text",
                "agrees",
                "disagrees",
                "passes",
                "group-1-disagree-count",
                "group-1-pass-count",
                "group-1-agree-count",
            ]
        );
        assert_eq!(
            res.table.rows,
            vec![vec!["101", "Free icecream", "1", "1", "0", "1", "0", "1"]]
        );
        assert_eq!(res.group_ids, vec![1]);
        assert_eq!(res.join_stats, JoinStats::default());
    }

    #[test]
    fn unassigned_rows_do_not_count() {
        let with_unassigned = votes_table(&[
            &["p1", "1", "1"],
            &["p2", "1", "-1"],
            &["p3", "", "1"],
        ]);
        let without = votes_table(&[&["p1", "1", "1"], &["p2", "1", "-1"]]);
        let comments = comments_table(&[&["101", "Free icecream", "0", "0", "0"]]);

        let res1 = run_group_stats(&with_unassigned, &comments).unwrap();
        let res2 = run_group_stats(&without, &comments).unwrap();
        assert_eq!(res1.table, res2.table);
        assert_eq!(res1.dropped_unassigned, 1);
    }

    #[test]
    fn skipped_cells_are_not_passes() {
        let votes = votes_table(&[&["p1", "1", "1"], &["p2", "1", ""]]);
        let comments = comments_table(&[&["101", "text", "", "", ""]]);

        let res = run_group_stats(&votes, &comments).unwrap();
        assert_eq!(cell(&res, 0, "passes"), "0");
        assert_eq!(cell(&res, 0, "group-1-pass-count"), "0");
        assert_eq!(cell(&res, 0, "agrees"), "1");
    }

    #[test]
    fn silent_group_densifies_to_zero() {
        // Group 2 only ever votes on comment 202; comment 101 must still
        // carry explicit zero columns for it.
        let votes = raw(
            &["participant", "group-id", "101", "202"],
            &[&["p1", "1", "1", ""], &["p2", "2", "", "-1"]],
        );
        let comments = raw(
            &["comment-id", "comment-body"],
            &[&["101", "a"], &["202", "b"]],
        );

        let res = run_group_stats(&votes, &comments).unwrap();
        assert_eq!(cell(&res, 0, "group-2-disagree-count"), "0");
        assert_eq!(cell(&res, 0, "group-2-pass-count"), "0");
        assert_eq!(cell(&res, 0, "group-2-agree-count"), "0");
        assert_eq!(cell(&res, 1, "group-2-disagree-count"), "1");
        assert_eq!(cell(&res, 0, "group-1-agree-count"), "1");
    }

    #[test]
    fn totals_match_group_breakdown() {
        let votes = raw(
            &["participant", "group-id", "101", "102"],
            &[
                &["p1", "0", "1", "0"],
                &["p2", "0", "1", "-1"],
                &["p3", "1", "-1", "1"],
                &["p4", "1", "", "1"],
            ],
        );
        let comments = raw(
            &["comment-id", "comment-body"],
            &[&["101", "a"], &["102", "b"]],
        );

        let res = run_group_stats(&votes, &comments).unwrap();
        for (row_idx, _) in res.table.rows.iter().enumerate() {
            for (kind, total_col) in
                [("agree", "agrees"), ("disagree", "disagrees"), ("pass", "passes")]
            {
                let total: u64 = cell(&res, row_idx, total_col).parse().unwrap();
                let summed: u64 = res
                    .group_ids
                    .iter()
                    .map(|g| {
                        cell(&res, row_idx, &format!("group-{}-{}-count", g, kind))
                            .parse::<u64>()
                            .unwrap()
                    })
                    .sum();
                assert_eq!(total, summed);
            }
        }
        assert_eq!(cell(&res, 0, "agrees"), "2");
        assert_eq!(cell(&res, 1, "passes"), "1");
    }

    #[test]
    fn pair_counts_match_cast_votes() {
        let records = vec![
            VoteRecord {
                participant: "p1".to_string(),
                group_id: 0,
                votes: vec![(101, VoteValue::Agree), (102, VoteValue::Pass)],
            },
            VoteRecord {
                participant: "p2".to_string(),
                group_id: 0,
                votes: vec![(101, VoteValue::Disagree)],
            },
            VoteRecord {
                participant: "p3".to_string(),
                group_id: 1,
                votes: vec![(101, VoteValue::Agree)],
            },
        ];
        let tallies = aggregate_votes(&records);
        for t in tallies.iter() {
            let cast = records
                .iter()
                .filter(|r| r.group_id == t.group_id)
                .flat_map(|r| r.votes.iter())
                .filter(|(cid, _)| *cid == t.comment_id)
                .count() as u64;
            assert_eq!(t.counts.total(), cast);
        }
        assert_eq!(tallies.len(), 3);
    }

    #[test]
    fn comments_without_vote_columns_are_dropped() {
        let votes = votes_table(&[&["p1", "1", "1"]]);
        let comments = raw(
            &["comment-id", "comment-body"],
            &[&["101", "kept"], &["999", "no vote column"]],
        );

        let res = run_group_stats(&votes, &comments).unwrap();
        assert_eq!(res.table.rows.len(), 1);
        assert_eq!(cell(&res, 0, "comment-id"), "101");
        assert_eq!(res.join_stats.comments_without_votes, 1);
    }

    #[test]
    fn vote_columns_without_comments_are_reported() {
        let votes = raw(
            &["participant", "group-id", "101", "555"],
            &[&["p1", "1", "1", "-1"]],
        );
        let comments = raw(&["comment-id", "comment-body"], &[&["101", "kept"]]);

        let res = run_group_stats(&votes, &comments).unwrap();
        assert_eq!(res.table.rows.len(), 1);
        assert!(res.table.columns.iter().all(|c| !c.contains("555")));
        assert_eq!(res.join_stats.votes_without_comments, 1);
    }

    #[test]
    fn stale_totals_are_discarded() {
        let votes = votes_table(&[&["p1", "1", "0"]]);
        let comments = comments_table(&[&["101", "text", "40", "12", "7"]]);

        let res = run_group_stats(&votes, &comments).unwrap();
        assert_eq!(cell(&res, 0, "agrees"), "0");
        assert_eq!(cell(&res, 0, "disagrees"), "0");
        assert_eq!(cell(&res, 0, "passes"), "1");
    }

    #[test]
    fn totals_columns_are_appended_when_missing() {
        let votes = votes_table(&[&["p1", "1", "1"]]);
        let comments = raw(&["comment-id", "comment-body"], &[&["101", "text"]]);

        let res = run_group_stats(&votes, &comments).unwrap();
        assert_eq!(
            res.table.columns,
            vec![
                "comment-id",
                "comment_text",
                "agrees",
                "disagrees",
                "passes",
                "group-1-disagree-count",
                "group-1-pass-count",
                "group-1-agree-count",
            ]
        );
        assert_eq!(cell(&res, 0, "agrees"), "1");
    }

    #[test]
    fn float_formatted_ids_coerce() {
        let votes = votes_table(&[&["p1", "1.0", "1"]]);
        let comments = raw(&["comment-id", "comment-body"], &[&["101.0", "text"]]);

        let res = run_group_stats(&votes, &comments).unwrap();
        assert_eq!(res.group_ids, vec![1]);
        assert_eq!(cell(&res, 0, "comment-id"), "101");
        assert_eq!(cell(&res, 0, "group-1-agree-count"), "1");
    }

    #[test]
    fn group_id_must_be_numeric() {
        let votes = votes_table(&[&["p1", "blue", "1"]]);
        let comments = comments_table(&[&["101", "text", "", "", ""]]);

        let res = run_group_stats(&votes, &comments);
        assert!(matches!(
            res,
            Err(TallyErrors::TypeMismatch { ref column, .. }) if column == "group-id"
        ));
    }

    #[test]
    fn comment_id_must_be_numeric() {
        let votes = votes_table(&[&["p1", "1", "1"]]);
        let comments = raw(&["comment-id", "comment-body"], &[&["abc", "text"]]);

        let res = run_group_stats(&votes, &comments);
        assert!(matches!(
            res,
            Err(TallyErrors::TypeMismatch { ref column, .. }) if column == "comment-id"
        ));
    }

    #[test]
    fn vote_values_outside_encoding_fail() {
        let votes = votes_table(&[&["p1", "1", "5"]]);
        let comments = comments_table(&[&["101", "text", "", "", ""]]);

        let res = run_group_stats(&votes, &comments);
        assert!(matches!(
            res,
            Err(TallyErrors::BadVoteValue { ref column, ref value })
                if column == "101" && value == "5"
        ));
    }

    #[test]
    fn missing_group_column_fails() {
        let votes = raw(&["participant", "101"], &[&["p1", "1"]]);
        let comments = comments_table(&[&["101", "text", "", "", ""]]);

        let res = run_group_stats(&votes, &comments);
        assert!(matches!(
            res,
            Err(TallyErrors::MissingColumn { table: "votes", .. })
        ));
    }

    #[test]
    fn same_input_same_output() {
        let votes = raw(
            &["participant", "group-id", "101", "102"],
            &[
                &["p1", "2", "1", "-1"],
                &["p2", "0", "0", ""],
                &["p3", "1", "-1", "1"],
            ],
        );
        let comments = raw(
            &["comment-id", "comment-body"],
            &[&["102", "b"], &["101", "a"]],
        );

        let first = run_group_stats(&votes, &comments).unwrap();
        let second = run_group_stats(&votes, &comments).unwrap();
        assert_eq!(first, second);
        // Output rows follow the comments table order.
        assert_eq!(cell(&first, 0, "comment-id"), "102");
        assert_eq!(cell(&first, 1, "comment-id"), "101");
    }

    #[test]
    fn group_column_schema() {
        assert_eq!(
            widened_columns(&[0, 2]),
            vec![
                "group-0-disagree-count",
                "group-0-pass-count",
                "group-0-agree-count",
                "group-2-disagree-count",
                "group-2-pass-count",
                "group-2-agree-count",
            ]
        );
        assert!(widened_columns(&[]).is_empty());
    }
}
