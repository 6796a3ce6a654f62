// This module defines the two callbacks into the host execution environment. Reservation
// happens before code memory exists and only says how much descriptor storage is needed and
// for which region; the commit happens after final layout and hands over the finished record
// with the code range it covers. Neither call returns data to the drivers, and a failure is
// fatal for the compilation. RecordingHost is a host that keeps every request, used by the
// trace tool and by tests to check reservation/commit symmetry.

//! Host callbacks for unwind info reservation and commit.

use std::fmt;

use super::error::UnwindResult;
use super::funclet::FuncKind;

/// Base address of a code region in host memory.
///
/// Only passed through to the host, never dereferenced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeAddr(pub usize);

impl fmt::Display for CodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A finished unwind record as committed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindCommit<'a> {
    pub hot_code: CodeAddr,
    /// Only present when the record describes cold code.
    pub cold_code: Option<CodeAddr>,
    /// Start of the covered range, relative to its region's base.
    pub start_offset: u32,
    /// End (exclusive) of the covered range, relative to its region's base.
    pub end_offset: u32,
    pub payload: &'a [u8],
    pub kind: FuncKind,
}

/// Unwind storage provided by the host environment.
pub trait UnwindHost {
    /// Reserve `size` bytes of descriptor storage.
    fn reserve_unwind_info(&mut self, is_funclet: bool, is_cold: bool, size: usize) -> UnwindResult<()>;

    /// Store one finished record.
    fn alloc_unwind_info(&mut self, commit: &UnwindCommit<'_>) -> UnwindResult<()>;
}

impl<H: UnwindHost + ?Sized> UnwindHost for &mut H {
    fn reserve_unwind_info(&mut self, is_funclet: bool, is_cold: bool, size: usize) -> UnwindResult<()> {
        (**self).reserve_unwind_info(is_funclet, is_cold, size)
    }

    fn alloc_unwind_info(&mut self, commit: &UnwindCommit<'_>) -> UnwindResult<()> {
        (**self).alloc_unwind_info(commit)
    }
}

/// One reservation request as seen by [`RecordingHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub is_funclet: bool,
    pub is_cold: bool,
    pub size: usize,
}

/// Owned copy of an [`UnwindCommit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedUnwind {
    pub hot_code: CodeAddr,
    pub cold_code: Option<CodeAddr>,
    pub start_offset: u32,
    pub end_offset: u32,
    pub payload: Vec<u8>,
    pub kind: FuncKind,
}

impl From<&UnwindCommit<'_>> for CommittedUnwind {
    fn from(commit: &UnwindCommit<'_>) -> Self {
        Self {
            hot_code: commit.hot_code,
            cold_code: commit.cold_code,
            start_offset: commit.start_offset,
            end_offset: commit.end_offset,
            payload: commit.payload.to_vec(),
            kind: commit.kind,
        }
    }
}

/// Host that records every request in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    pub reservations: Vec<Reservation>,
    pub commits: Vec<CommittedUnwind>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything recorded so far.
    pub fn clear(&mut self) {
        self.reservations.clear();
        self.commits.clear();
    }

    pub fn reserved_bytes(&self) -> usize {
        self.reservations.iter().map(|r| r.size).sum()
    }
}

impl UnwindHost for RecordingHost {
    fn reserve_unwind_info(&mut self, is_funclet: bool, is_cold: bool, size: usize) -> UnwindResult<()> {
        self.reservations.push(Reservation { is_funclet, is_cold, size });
        Ok(())
    }

    fn alloc_unwind_info(&mut self, commit: &UnwindCommit<'_>) -> UnwindResult<()> {
        self.commits.push(CommittedUnwind::from(commit));
        Ok(())
    }
}

impl fmt::Display for RecordingHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reservations:")?;
        for (idx, r) in self.reservations.iter().enumerate() {
            writeln!(
                f,
                "  #{idx}: {} {} {} bytes",
                if r.is_funclet { "funclet" } else { "root" },
                if r.is_cold { "cold" } else { "hot" },
                r.size
            )?;
        }
        writeln!(f, "Commits:")?;
        for (idx, c) in self.commits.iter().enumerate() {
            let cold = c.cold_code.map_or_else(|| "-".to_string(), |addr| addr.to_string());
            write!(
                f,
                "  #{idx}: {} [{}, {}) hot={} cold={} payload=",
                c.kind, c.start_offset, c.end_offset, c.hot_code, cold
            )?;
            for byte in &c.payload {
                write!(f, "{byte:02x}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
