use log::info;
use serde::Serialize;
use serde_json::{json, Value as JSValue};
use snafu::{prelude::*, Snafu};
use std::fs;

use group_tally::{run_group_stats, GroupStatsResult};

use crate::args::Args;

pub mod io_csv;

#[derive(Debug, Snafu)]
pub enum PolisError {
    #[snafu(display("Cannot open input file {path}"))]
    OpeningCsv { source: csv::Error, path: String },
    #[snafu(display("Input file {path} is empty"))]
    EmptyInput { path: String },
    #[snafu(display("Cannot parse line {lineno} of {path}"))]
    CsvLineParse {
        source: csv::Error,
        path: String,
        lineno: usize,
    },
    #[snafu(display("Cannot process the vote data: {source}"))]
    Tally { source: group_tally::TallyErrors },
    #[snafu(display("Cannot write output file {path}"))]
    WritingCsv { source: csv::Error, path: String },
    #[snafu(display("Cannot write output file {path}"))]
    FlushingCsv {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Cannot write summary file {path}"))]
    WritingSummary {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Cannot serialize the run summary"))]
    SerializingSummary { source: serde_json::Error },
}

pub type PolisResult<T> = Result<T, PolisError>;

#[derive(Serialize, Debug)]
struct JoinSummary {
    #[serde(rename = "commentsWithoutVotes")]
    comments_without_votes: u64,
    #[serde(rename = "votesWithoutComments")]
    votes_without_comments: u64,
}

fn build_summary_js(votes_path: &str, comments_path: &str, res: &GroupStatsResult) -> JSValue {
    let mismatch = JoinSummary {
        comments_without_votes: res.join_stats.comments_without_votes,
        votes_without_comments: res.join_stats.votes_without_comments,
    };
    json!({
        "participantsVotes": votes_path,
        "comments": comments_path,
        "groups": res.group_ids,
        "voteColumns": res.comment_ids.len(),
        "outputRows": res.table.rows.len(),
        "droppedUnassigned": res.dropped_unassigned,
        "joinMismatch": mismatch,
    })
}

pub fn run_pipeline(args: &Args) -> PolisResult<()> {
    let votes_path = args.participants_votes_path();
    let comments_path = args.comments_path();
    info!(
        "Reading votes from {:?} and comments from {:?}",
        votes_path, comments_path
    );

    // Both inputs are read and the whole table is computed before the
    // output file is created: a failure anywhere leaves no partial output.
    let votes = io_csv::read_raw_table(&votes_path)?;
    let comments = io_csv::read_raw_table(&comments_path)?;

    let res = run_group_stats(&votes, &comments).context(TallySnafu {})?;

    io_csv::write_table(&args.out, &res.table)?;
    info!("Wrote {} rows to {:?}", res.table.rows.len(), args.out);

    if let Some(summary_path) = args.summary.clone() {
        let js = build_summary_js(&votes_path, &comments_path, &res);
        let pretty = serde_json::to_string_pretty(&js).context(SerializingSummarySnafu {})?;
        if summary_path == "stdout" {
            println!("{}", pretty);
        } else {
            fs::write(&summary_path, pretty).context(WritingSummarySnafu {
                path: summary_path.clone(),
            })?;
        }
    }
    Ok(())
}
