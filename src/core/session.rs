// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession owns the arena reference and the unwind statistics for one compiled
// unit. The function/funclet descriptor set is copied into the arena when the unwind context
// is created, which makes it immutable for the rest of the compilation and ties its lifetime
// to the unit. The session also records what the reservation and emission drivers did:
// reservations and their sizes, commits per region and kind, and commits produced by the
// fake splitting mode. Sessions are not shared between units, so concurrently compiled units
// each get their own.

//! Arena-based compilation session management.
//!
//! All per-unit unwind data is tied to the session lifetime, eliminating
//! lifetime propagation through the drivers.

use bumpalo::Bump;
use std::cell::RefCell;
use std::fmt;

use super::funclet::FuncKind;
use super::location::CodeRegion;

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for compilation objects.
    arena: &'arena Bump,

    /// Unwind statistics for debugging.
    stats: RefCell<UnwindStats>,

    /// Current function being compiled.
    current_function: RefCell<Option<String>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(UnwindStats::default()),
            current_function: RefCell::new(None),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Allocate an object in the session arena.
    pub fn alloc<T>(&self, value: T) -> &'arena mut T {
        self.arena.alloc(value)
    }

    /// Allocate a slice in the session arena.
    pub fn alloc_slice<T>(&self, slice: &[T]) -> &'arena [T]
    where
        T: Clone,
    {
        self.arena.alloc_slice_clone(slice)
    }

    /// Set current function being compiled.
    pub fn set_current_function(&self, name: &str) {
        *self.current_function.borrow_mut() = Some(name.to_string());
    }

    /// Name of the current function, or `"<unnamed>"`.
    pub fn current_function(&self) -> String {
        self.current_function
            .borrow()
            .clone()
            .unwrap_or_else(|| "<unnamed>".to_string())
    }

    /// Record a reservation request.
    pub fn record_reservation(&self, size: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.reservations += 1;
        stats.reserved_bytes += size;
    }

    /// Record a commit.
    pub fn record_commit(&self, kind: FuncKind, region: CodeRegion, size: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.commits += 1;
        stats.committed_bytes += size;
        if region.is_cold() {
            stats.cold_commits += 1;
        }
        if kind.is_funclet() {
            stats.funclet_commits += 1;
        }
    }

    /// Record a commit made by the fake splitting path.
    pub fn record_fake_split_commit(&self, size: usize) {
        self.record_commit(FuncKind::Root, CodeRegion::Hot, size);
        self.stats.borrow_mut().fake_split_commits += 1;
    }

    /// Get unwind statistics.
    pub fn stats(&self) -> UnwindStats {
        self.stats.borrow().clone()
    }

    /// Reset statistics and the current function name.
    pub fn clear_function_state(&self) {
        *self.stats.borrow_mut() = UnwindStats::default();
        *self.current_function.borrow_mut() = None;
    }
}

/// Unwind statistics of one session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnwindStats {
    /// Reservation requests issued.
    pub reservations: usize,

    /// Total bytes reserved.
    pub reserved_bytes: usize,

    /// Records committed.
    pub commits: usize,

    /// Total payload bytes committed.
    pub committed_bytes: usize,

    /// Records committed against the cold region.
    pub cold_commits: usize,

    /// Records committed for funclets.
    pub funclet_commits: usize,

    /// Records committed by the fake splitting path.
    pub fake_split_commits: usize,
}

impl fmt::Display for UnwindStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Unwind Statistics:")?;
        writeln!(f, "  Reservations: {} ({} bytes)", self.reservations, self.reserved_bytes)?;
        writeln!(f, "  Commits: {} ({} bytes)", self.commits, self.committed_bytes)?;
        writeln!(f, "  Cold commits: {}", self.cold_commits)?;
        writeln!(f, "  Funclet commits: {}", self.funclet_commits)?;

        if self.fake_split_commits > 0 {
            writeln!(f, "  Fake split commits: {}", self.fake_split_commits)?;
        }

        Ok(())
    }
}
