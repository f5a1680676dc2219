//! Event log reader

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::warn;

use crate::event::Event;
use crate::{HooksinkError, Result};

/// Load all events from a JSONL log, in line order.
///
/// Lines that fail to parse are skipped with a warning rather than aborting
/// the load; an all-invalid file yields an empty sequence.
///
/// # Errors
///
/// Returns error if the file cannot be opened or read
pub fn load_events(path: &Path) -> Result<Vec<Event>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut events = Vec::new();
    let mut skipped = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match parse_record(&line, index + 1) {
            Ok(event) => events.push(event),
            Err(error) => {
                skipped += 1;
                warn!("{error}");
            }
        }
    }

    if skipped > 0 {
        warn!(
            "Skipped {skipped} invalid record(s) in {}",
            path.display()
        );
    }

    Ok(events)
}

fn parse_record(line: &str, line_number: usize) -> Result<Event> {
    serde_json::from_str(line).map_err(|e| HooksinkError::InvalidRecord {
        line: line_number,
        reason: e.to_string(),
    })
}
