//! Delimited-file ingestion

use crate::error::{PipelineError, Result};
use crate::types::transaction::{
    RawRecord, RawTable, AMOUNT_COLUMN, RECEIVER_COLUMN, SENDER_COLUMN, TIME_COLUMN,
};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, info};

/// Header positions of the columns the pipeline understands
struct ColumnLayout {
    sender: usize,
    receiver: usize,
    amount: usize,
    time: Option<usize>,
    extra: Vec<usize>,
}

impl ColumnLayout {
    fn resolve(headers: &[String]) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| {
                PipelineError::format(format!("required column '{}' is missing", name))
            })
        };

        let sender = require(SENDER_COLUMN)?;
        let receiver = require(RECEIVER_COLUMN)?;
        let amount = require(AMOUNT_COLUMN)?;
        let time = find(TIME_COLUMN);

        let extra = (0..headers.len())
            .filter(|&i| i != sender && i != receiver && i != amount && Some(i) != time)
            .collect();

        Ok(Self {
            sender,
            receiver,
            amount,
            time,
            extra,
        })
    }
}

/// Load a transfer table from a delimited file
pub fn load_transactions<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<RawTable> {
    let path = path.as_ref();

    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PipelineError::NotFound(path.to_path_buf()),
        _ => PipelineError::Io(e),
    })?;

    let table = read_transactions(file, delimiter)?;
    info!(
        path = %path.display(),
        rows = table.len(),
        columns = table.headers.len(),
        "Transactions loaded"
    );
    Ok(table)
}

/// Read a transfer table from any reader
pub fn read_transactions<R: Read>(reader: R, delimiter: u8) -> Result<RawTable> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
    let layout = ColumnLayout::resolve(&headers)?;

    let mut records = Vec::new();
    for result in rdr.records() {
        let row = result?;
        records.push(parse_row(&row, &layout)?);
    }

    debug!(rows = records.len(), "Parsed transfer rows");

    Ok(RawTable {
        extra_headers: layout.extra.iter().map(|&i| headers[i].clone()).collect(),
        has_time: layout.time.is_some(),
        headers,
        records,
    })
}

fn cell(row: &StringRecord, idx: usize) -> Option<String> {
    row.get(idx)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

fn parse_row(row: &StringRecord, layout: &ColumnLayout) -> Result<RawRecord> {
    let amount = match cell(row, layout.amount) {
        None => None,
        Some(text) if text.eq_ignore_ascii_case("nan") => None,
        Some(text) => match text.parse::<f64>() {
            Ok(value) if value.is_finite() => Some(value),
            _ => {
                let line = row.position().map(|p| p.line()).unwrap_or(0);
                return Err(PipelineError::format(format!(
                    "line {}: amount '{}' is not a finite number",
                    line, text
                )));
            }
        },
    };

    Ok(RawRecord {
        sender: cell(row, layout.sender),
        receiver: cell(row, layout.receiver),
        amount,
        time: layout.time.and_then(|idx| cell(row, idx)),
        extra: layout.extra.iter().map(|&idx| cell(row, idx)).collect(),
    })
}
