use thiserror::Error;
use time::OffsetDateTime;

use super::remote::UploadDestination;
use super::scanner::CandidateFile;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("requested {requested} upload destinations, received {received}")]
pub struct ProtocolMismatch {
    pub requested: usize,
    pub received: usize,
}

/// Candidates paired with their destinations, consumed front to back.
#[derive(Debug)]
pub struct SyncPass {
    candidates: Vec<CandidateFile>,
    destinations: Vec<UploadDestination>,
    cursor: usize,
    started_at: OffsetDateTime,
}

impl SyncPass {
    /// Pairs candidates with destinations by position. Lists of different
    /// length cannot be paired safely and are rejected.
    pub fn new(
        candidates: Vec<CandidateFile>,
        destinations: Vec<UploadDestination>,
    ) -> Result<Self, ProtocolMismatch> {
        if candidates.len() != destinations.len() {
            return Err(ProtocolMismatch {
                requested: candidates.len(),
                received: destinations.len(),
            });
        }
        Ok(Self {
            candidates,
            destinations,
            cursor: 0,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    pub fn current(&self) -> Option<(&CandidateFile, &UploadDestination)> {
        Some((
            self.candidates.get(self.cursor)?,
            self.destinations.get(self.cursor)?,
        ))
    }

    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1).min(self.candidates.len());
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.candidates.len()
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }
}
