// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;

use tracing::debug;

use crate::bounded_channel::BoundedReceiver;
use crate::harvester::event::{FileEvent, FileState};

/// What the spooler saw before its channel closed
#[derive(Debug, Default)]
pub struct SpoolerSummary {
    pub published: u64,
    pub heartbeats: u64,
    /// Latest state per source path
    pub states: HashMap<PathBuf, FileState>,
}

/// Drains harvester events, writing each document as one JSON line.
pub struct Spooler<W> {
    rx: BoundedReceiver<FileEvent>,
    out: W,
    summary: SpoolerSummary,
}

impl<W: Write> Spooler<W> {
    pub fn new(rx: BoundedReceiver<FileEvent>, out: W) -> Self {
        Self {
            rx,
            out,
            summary: SpoolerSummary::default(),
        }
    }

    /// Block until every sender is gone.
    pub fn run(mut self) -> io::Result<SpoolerSummary> {
        while let Some(event) = self.rx.recv_blocking() {
            self.handle(event)?;
        }
        self.out.flush()?;
        debug!(
            published = self.summary.published,
            heartbeats = self.summary.heartbeats,
            "Spooler finished"
        );
        Ok(self.summary)
    }

    fn handle(&mut self, event: FileEvent) -> io::Result<()> {
        match event.to_document() {
            Some(doc) => {
                serde_json::to_writer(&mut self.out, &doc)?;
                self.out.write_all(b"\n")?;
                self.summary.published += 1;
            }
            None => self.summary.heartbeats += 1,
        }
        if let Some(state) = event.file_state {
            self.summary.states.insert(state.source.clone(), state);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;
    use crate::harvester::config::EventMetadata;
    use crate::harvester::input::{FileId, FileInfo};

    fn event(offset: i64, text: Option<&str>) -> FileEvent {
        let id = FileId::new(3, 4);
        FileEvent {
            source: PathBuf::from("/logs/a.log"),
            offset,
            bytes: 2,
            read_time: None,
            text: text.map(str::to_string),
            json_fields: None,
            input_type: "log".to_string(),
            document_type: "log".to_string(),
            event_metadata: EventMetadata::default(),
            file_info: FileInfo {
                id,
                size: 0,
                modified: None,
            },
            file_state: Some(FileState {
                source: PathBuf::from("/logs/a.log"),
                offset,
                os: id.into(),
            }),
            json_config: None,
        }
    }

    #[test]
    fn test_writes_documents_and_tracks_state() {
        let (tx, rx) = bounded(8);
        tx.send_blocking(event(0, None)).unwrap();
        tx.send_blocking(event(2, Some("a"))).unwrap();
        tx.send_blocking(event(4, None)).unwrap();
        drop(tx);

        let mut out = Vec::new();
        let summary = Spooler::new(rx, &mut out).run().unwrap();

        assert_eq!(summary.published, 1);
        assert_eq!(summary.heartbeats, 2);
        assert_eq!(summary.states[&PathBuf::from("/logs/a.log")].offset, 4);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let doc: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(doc["message"], "a");
        assert_eq!(doc["offset"], 2);
    }
}
