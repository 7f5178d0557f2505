// Primitives for reading and writing the CSV tables.

use log::debug;
use snafu::prelude::*;

use group_tally::{MergedTable, RawTable};

use crate::pipeline::{
    CsvLineParseSnafu, EmptyInputSnafu, FlushingCsvSnafu, OpeningCsvSnafu, PolisResult,
    WritingCsvSnafu,
};

pub fn read_raw_table(path: &str) -> PolisResult<RawTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context(OpeningCsvSnafu { path })?;

    let headers = rdr
        .headers()
        .context(CsvLineParseSnafu { path, lineno: 1usize })?;
    let columns: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    ensure!(columns.iter().any(|c| !c.is_empty()), EmptyInputSnafu { path });

    let mut rows: Vec<Vec<String>> = Vec::new();
    for (idx, record) in rdr.into_records().enumerate() {
        // Line 1 is the header.
        let lineno = idx + 2;
        let record = record.context(CsvLineParseSnafu { path, lineno })?;
        rows.push(record.iter().map(|s| s.to_string()).collect());
    }
    debug!(
        "read_raw_table: {:?}: {} columns, {} rows",
        path,
        columns.len(),
        rows.len()
    );
    Ok(RawTable { columns, rows })
}

pub fn write_table(path: &str, table: &MergedTable) -> PolisResult<()> {
    let mut wtr = csv::Writer::from_path(path).context(WritingCsvSnafu { path })?;
    wtr.write_record(&table.columns)
        .context(WritingCsvSnafu { path })?;
    for row in table.rows.iter() {
        wtr.write_record(row).context(WritingCsvSnafu { path })?;
    }
    wtr.flush().context(FlushingCsvSnafu { path })?;
    Ok(())
}
