// This module defines UnwindContext, the per-compilation context the reservation and emission
// drivers run against. It replaces ambient compiler state with an explicit object: the
// arena-owned function/funclet set, one recorder per function (wrapped in a PrologTracker so
// ordering can be asserted), the configuration and the session receiving statistics. Code
// generation reaches the recorders through recorder_mut while it builds each function's
// prolog and epilogs; afterwards reserve() and emit() walk the same set. RegionPlan is the
// single decision both drivers share about which regions a function is reported for, which
// keeps reservation and commit counts symmetric.

//! Per-compilation unwind context.

use super::config::UnwindConfig;
use super::error::{UnwindError, UnwindResult};
use super::funclet::{FuncInfo, FuncInfoSet};
use super::recorder::{PrologTracker, UnwindRecorder};
use super::session::CompilationSession;

/// Unwind state of one compiled unit.
pub struct UnwindContext<'s, 'arena, R> {
    pub(crate) session: &'s CompilationSession<'arena>,
    pub(crate) funcs: FuncInfoSet<'arena>,
    pub(crate) recorders: Vec<PrologTracker<R>>,
    pub(crate) config: UnwindConfig,
}

/// Which records a function gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegionPlan {
    /// One record against the hot region.
    HotOnly,
    /// One hot record and one cold record (root of a split unit).
    HotAndCold,
    /// One hot record spanning the whole unit (fake splitting).
    FakeSplit,
}

impl<'s, 'arena, R: UnwindRecorder> UnwindContext<'s, 'arena, R> {
    /// Create a context with a default recorder per function.
    pub fn new(
        session: &'s CompilationSession<'arena>,
        funcs: &[FuncInfo],
        config: UnwindConfig,
    ) -> UnwindResult<Self>
    where
        R: Default,
    {
        let recorders = funcs.iter().map(|_| PrologTracker::new(R::default())).collect();
        Self::with_recorders(session, funcs, recorders, config)
    }

    /// Create a context from explicit recorders, one per function in order.
    ///
    /// Each tracker keeps its phase, so a prolog or epilog left open during
    /// generation still trips the drivers' ordering checks.
    pub fn with_recorders(
        session: &'s CompilationSession<'arena>,
        funcs: &[FuncInfo],
        recorders: Vec<PrologTracker<R>>,
        config: UnwindConfig,
    ) -> UnwindResult<Self> {
        if recorders.len() != funcs.len() {
            return Err(UnwindError::InvalidFuncSet {
                reason: format!(
                    "{} recorders supplied for {} functions",
                    recorders.len(),
                    funcs.len()
                ),
            });
        }

        let funcs = FuncInfoSet::new(session.alloc_slice(funcs))?;
        log::debug!(
            "unwind context for {}: {} funclet(s), cold region: {}",
            session.current_function(),
            funcs.funclet_count(),
            funcs.has_cold_region()
        );

        Ok(Self {
            session,
            funcs,
            recorders,
            config,
        })
    }

    pub fn funcs(&self) -> FuncInfoSet<'arena> {
        self.funcs
    }

    pub fn config(&self) -> UnwindConfig {
        self.config
    }

    pub fn session(&self) -> &'s CompilationSession<'arena> {
        self.session
    }

    pub fn has_cold_region(&self) -> bool {
        self.funcs.has_cold_region()
    }

    /// Recorder of function `func_idx`.
    ///
    /// # Panics
    ///
    /// Panics if `func_idx` is not a valid descriptor index.
    pub fn recorder(&self, func_idx: usize) -> &PrologTracker<R> {
        &self.recorders[func_idx]
    }

    /// Mutable recorder of function `func_idx`, for prolog/epilog generation.
    ///
    /// # Panics
    ///
    /// Panics if `func_idx` is not a valid descriptor index.
    pub fn recorder_mut(&mut self, func_idx: usize) -> &mut PrologTracker<R> {
        &mut self.recorders[func_idx]
    }

    /// Reservation and emission must not run while any prolog or epilog is open.
    pub(crate) fn assert_not_generating(&self) {
        debug_assert!(
            self.recorders.iter().all(|r| !r.generating_prolog()),
            "unwind info requested while generating a prolog"
        );
        debug_assert!(
            self.recorders.iter().all(|r| !r.generating_epilog()),
            "unwind info requested while generating an epilog"
        );
    }

    /// Decide which records `func` gets when the unit does (or does not) have
    /// a cold region.
    pub(crate) fn region_plan(&self, func: &FuncInfo, has_cold_region: bool) -> RegionPlan {
        debug_assert!(
            func.cold_span().is_none() || func.may_split(),
            "funclets are never split"
        );

        if !has_cold_region || !func.may_split() {
            return RegionPlan::HotOnly;
        }
        if self.config.fake_splitting_active(has_cold_region) {
            return RegionPlan::FakeSplit;
        }
        RegionPlan::HotAndCold
    }
}
