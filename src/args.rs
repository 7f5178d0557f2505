use clap::Parser;

/// Processes a deliberation export into a comments table annotated with
/// per-group vote tallies.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the export directory. The inputs are expected at
    /// <dir>/participants-votes.csv and <dir>/comments.csv unless
    /// overridden below.
    #[clap(value_parser)]
    pub export_directory: String,

    /// (file path, optional) Overrides the location of the participants
    /// votes file.
    #[clap(long, value_parser)]
    pub participants_votes: Option<String>,

    /// (file path, optional) Overrides the location of the comments file.
    #[clap(long, value_parser)]
    pub comments: Option<String>,

    /// (file path) Where the enriched comments table will be written, in
    /// CSV format.
    #[clap(short, long, value_parser)]
    pub out: String,

    /// (file path or 'stdout') If specified, a JSON summary of the run
    /// (row counts, discovered groups, join mismatches) will be written to
    /// the given location.
    #[clap(long, value_parser)]
    pub summary: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}

impl Args {
    pub fn participants_votes_path(&self) -> String {
        self.participants_votes
            .clone()
            .unwrap_or_else(|| format!("{}/participants-votes.csv", self.export_directory))
    }

    pub fn comments_path(&self) -> String {
        self.comments
            .clone()
            .unwrap_or_else(|| format!("{}/comments.csv", self.export_directory))
    }
}
