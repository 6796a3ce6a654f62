//! Reservation driver.
//!
//! Runs once per unit after code generation and before code memory is
//! allocated. For every function, in index order, it asks the host for one
//! hot-region block, plus a cold-region block for the root of a split unit.
//! Under fake splitting the root only gets the hot block, since it will be
//! reported as one contiguous span.

use super::context::{RegionPlan, UnwindContext};
use super::error::UnwindResult;
use super::funclet::FuncInfo;
use super::host::UnwindHost;
use super::location::CodeRegion;
use super::recorder::{PrologTracker, UnwindRecorder};

impl<R: UnwindRecorder> UnwindContext<'_, '_, R> {
    /// Ask the host to reserve storage for every record this unit will commit.
    ///
    /// Depends only on the function set, the recorders and the configuration,
    /// so calling it twice issues the same requests twice.
    pub fn reserve<H: UnwindHost + ?Sized>(&self, host: &mut H) -> UnwindResult<()> {
        self.assert_not_generating();

        let has_cold_region = self.funcs.has_cold_region();
        for (func, recorder) in self.funcs.iter().zip(&self.recorders) {
            self.reserve_func(host, func, recorder, has_cold_region)?;
        }
        Ok(())
    }

    fn reserve_func<H: UnwindHost + ?Sized>(
        &self,
        host: &mut H,
        func: &FuncInfo,
        recorder: &PrologTracker<R>,
        has_cold_region: bool,
    ) -> UnwindResult<()> {
        match self.region_plan(func, has_cold_region) {
            RegionPlan::HotOnly | RegionPlan::FakeSplit => {
                self.reserve_func_helper(host, func, recorder, CodeRegion::Hot)
            }
            RegionPlan::HotAndCold => {
                self.reserve_func_helper(host, func, recorder, CodeRegion::Hot)?;
                self.reserve_func_helper(host, func, recorder, CodeRegion::Cold)
            }
        }
    }

    fn reserve_func_helper<H: UnwindHost + ?Sized>(
        &self,
        host: &mut H,
        func: &FuncInfo,
        recorder: &PrologTracker<R>,
        region: CodeRegion,
    ) -> UnwindResult<()> {
        let is_funclet = func.is_funclet();
        let is_cold = region.is_cold();
        let size = recorder.unwind_info_size(region);

        log::debug!(
            "{}: reserve {} {:?} unwind info, {} bytes",
            self.session.current_function(),
            func.kind(),
            region,
            size
        );

        host.reserve_unwind_info(is_funclet, is_cold, size)?;
        self.session.record_reservation(size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::UnwindConfig;
    use crate::core::context::UnwindContext;
    use crate::core::error::{UnwindError, UnwindResult};
    use crate::core::funclet::{CodeSpan, FuncInfoSetBuilder};
    use crate::core::host::{RecordingHost, Reservation, UnwindCommit, UnwindHost};
    use crate::core::recorder::UnwindRecorder;
    use crate::core::reg::AsmReg;
    use crate::core::test_utils::test::with_test_context;
    use crate::x86::X86UnwindRecorder;

    struct FailingHost;

    impl UnwindHost for FailingHost {
        fn reserve_unwind_info(&mut self, _: bool, _: bool, _: usize) -> UnwindResult<()> {
            Err(UnwindError::HostReserve { reason: "out of memory".to_string() })
        }

        fn alloc_unwind_info(&mut self, _: &UnwindCommit<'_>) -> UnwindResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_reserve_root_only() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let funcs = FuncInfoSetBuilder::new()
                .root(CodeSpan::whole(), None)
                .build()
                .unwrap();
            let unwind: UnwindContext<'_, '_, X86UnwindRecorder> =
                UnwindContext::new(&session, &funcs, UnwindConfig::default()).unwrap();

            let mut host = RecordingHost::new();
            unwind.reserve(&mut host).unwrap();

            assert_eq!(
                host.reservations,
                vec![Reservation { is_funclet: false, is_cold: false, size: 4 }]
            );
            assert_eq!(session.stats().reservations, 1);
        });
    }

    #[test]
    fn test_reserve_split_unit_skips_cold_for_funclets() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let funcs = FuncInfoSetBuilder::new()
                .root(CodeSpan::whole(), Some(CodeSpan::whole()))
                .handler(CodeSpan::whole())
                .filter(CodeSpan::whole())
                .build()
                .unwrap();
            let unwind: UnwindContext<'_, '_, X86UnwindRecorder> =
                UnwindContext::new(&session, &funcs, UnwindConfig::default()).unwrap();

            let mut host = RecordingHost::new();
            unwind.reserve(&mut host).unwrap();

            let shape: Vec<_> = host
                .reservations
                .iter()
                .map(|r| (r.is_funclet, r.is_cold))
                .collect();
            assert_eq!(shape, vec![(false, false), (false, true), (true, false), (true, false)]);
            assert_eq!(host.reserved_bytes(), 16);
        });
    }

    #[test]
    fn test_reserve_is_repeatable() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let funcs = FuncInfoSetBuilder::new()
                .root(CodeSpan::whole(), Some(CodeSpan::whole()))
                .handler(CodeSpan::whole())
                .build()
                .unwrap();
            let unwind: UnwindContext<'_, '_, X86UnwindRecorder> =
                UnwindContext::new(&session, &funcs, UnwindConfig::default()).unwrap();

            let mut first = RecordingHost::new();
            let mut second = RecordingHost::new();
            unwind.reserve(&mut first).unwrap();
            unwind.reserve(&mut second).unwrap();

            assert_eq!(first.reservations, second.reservations);
        });
    }

    #[test]
    fn test_host_failure_propagates() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let funcs = FuncInfoSetBuilder::new()
                .root(CodeSpan::whole(), None)
                .build()
                .unwrap();
            let unwind: UnwindContext<'_, '_, X86UnwindRecorder> =
                UnwindContext::new(&session, &funcs, UnwindConfig::default()).unwrap();

            let err = unwind.reserve(&mut FailingHost).unwrap_err();
            assert_eq!(err, UnwindError::HostReserve { reason: "out of memory".to_string() });
            assert_eq!(session.stats().reservations, 0);
        });
    }

    #[test]
    #[should_panic(expected = "while generating a prolog")]
    #[cfg(debug_assertions)]
    fn test_reserve_inside_prolog_panics() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let funcs = FuncInfoSetBuilder::new()
                .root(CodeSpan::whole(), None)
                .build()
                .unwrap();
            let mut unwind: UnwindContext<'_, '_, X86UnwindRecorder> =
                UnwindContext::new(&session, &funcs, UnwindConfig::default()).unwrap();

            unwind.recorder_mut(0).begin_prolog();
            unwind.recorder_mut(0).push(AsmReg::RBP);
            let _ = unwind.reserve(&mut RecordingHost::new());
        });
    }
}
