// This module implements the emission driver. It runs once per unit after final code layout,
// walking the function/funclet set in the same order and with the same region plan as the
// reservation driver. For each (function, region) pair it resolves the start and end code
// locations, normalizes them to the region's own base, asks the function's recorder for the
// finished record and commits it to the host. The hot record of a split root is committed
// without the cold base; the cold record carries both. Under fake procedure splitting the root
// is committed once as a single hot span over the whole unit, letting the host's split-aware
// path run against a single contiguous buffer.

//! Emission driver.

use super::context::{RegionPlan, UnwindContext};
use super::error::{UnwindError, UnwindResult};
use super::funclet::FuncInfo;
use super::host::{CodeAddr, UnwindCommit, UnwindHost};
use super::location::{CodeLocation, CodeRegion, LocationOracle};
use super::recorder::{PrologTracker, UnwindRecorder};

/// Final code placement of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitLayout {
    /// Base of the hot code.
    pub hot_code: CodeAddr,
    /// Base of the cold code, if the unit was split.
    pub cold_code: Option<CodeAddr>,
    /// Bytes of hot code, which is also the unit-relative offset where cold code starts.
    pub total_hot_code_size: u32,
    /// Bytes of hot plus cold code.
    pub total_native_code_size: u32,
}

impl UnitLayout {
    /// Layout of a unit without a cold region.
    pub fn hot_only(hot_code: CodeAddr, code_size: u32) -> Self {
        Self {
            hot_code,
            cold_code: None,
            total_hot_code_size: code_size,
            total_native_code_size: code_size,
        }
    }

    /// Layout of a split unit.
    pub fn split(hot_code: CodeAddr, cold_code: CodeAddr, hot_size: u32, total_size: u32) -> Self {
        debug_assert!(hot_size <= total_size);
        Self {
            hot_code,
            cold_code: Some(cold_code),
            total_hot_code_size: hot_size,
            total_native_code_size: total_size,
        }
    }
}

impl<R: UnwindRecorder> UnwindContext<'_, '_, R> {
    /// Commit the unwind record of every function to the host.
    pub fn emit<H, O>(&self, host: &mut H, oracle: &O, layout: &UnitLayout) -> UnwindResult<()>
    where
        H: UnwindHost + ?Sized,
        O: LocationOracle + ?Sized,
    {
        self.assert_not_generating();
        debug_assert_eq!(
            layout.cold_code.is_some(),
            self.funcs.has_cold_region(),
            "cold code base must be given exactly when the unit has a cold region"
        );
        debug_assert!(layout.total_hot_code_size <= layout.total_native_code_size);

        let has_cold_region = layout.cold_code.is_some();
        for (func, recorder) in self.funcs.iter().zip(&self.recorders) {
            match self.region_plan(func, has_cold_region) {
                RegionPlan::HotOnly => {
                    self.emit_func_helper(host, oracle, layout, func, recorder, CodeRegion::Hot)?;
                }
                RegionPlan::HotAndCold => {
                    self.emit_func_helper(host, oracle, layout, func, recorder, CodeRegion::Hot)?;
                    self.emit_func_helper(host, oracle, layout, func, recorder, CodeRegion::Cold)?;
                }
                RegionPlan::FakeSplit => {
                    self.fake_emit_func_helper(host, layout, func, recorder)?;
                }
            }
        }
        Ok(())
    }

    fn emit_func_helper<H, O>(
        &self,
        host: &mut H,
        oracle: &O,
        layout: &UnitLayout,
        func: &FuncInfo,
        recorder: &PrologTracker<R>,
        region: CodeRegion,
    ) -> UnwindResult<()>
    where
        H: UnwindHost + ?Sized,
        O: LocationOracle + ?Sized,
    {
        let hot_size = layout.total_hot_code_size;

        let (start_offset, end_offset, cold_code) = match region {
            CodeRegion::Hot => {
                let span = func.hot_span();
                let start = resolve(oracle, span.start, 0)?;
                let end = resolve(oracle, span.end, hot_size)?;

                debug_assert!(end <= hot_size, "hot range ends past the hot code ({end} > {hot_size})");
                // The host only wants the cold base for cold records.
                (start, end, None)
            }
            CodeRegion::Cold => {
                debug_assert!(func.may_split(), "funclets are never split");
                let span = func.cold_span().unwrap_or_default();
                let start = resolve(oracle, span.start, hot_size)?;
                let end = resolve(oracle, span.end, layout.total_native_code_size)?;

                debug_assert!(start >= hot_size, "cold range starts in hot code ({start} < {hot_size})");
                (start.saturating_sub(hot_size), end.saturating_sub(hot_size), layout.cold_code)
            }
        };
        debug_assert!(start_offset <= end_offset, "inverted range [{start_offset}, {end_offset})");

        let info = recorder.unwind_info(region, end_offset.saturating_sub(start_offset))?;
        debug_assert_eq!(info.len(), recorder.unwind_info_size(region), "record size differs from reservation");

        log::debug!(
            "{}: commit {} {:?} unwind info [{}, {}), {} bytes",
            self.session.current_function(),
            func.kind(),
            region,
            start_offset,
            end_offset,
            info.len()
        );

        host.alloc_unwind_info(&UnwindCommit {
            hot_code: layout.hot_code,
            cold_code,
            start_offset,
            end_offset,
            payload: &info.bytes,
            kind: func.kind(),
        })?;
        self.session.record_commit(func.kind(), region, info.len());
        Ok(())
    }

    /// Report the root as one hot span over the whole unit. The cold base is
    /// withheld so the host sets up a single record covering hot and cold code.
    fn fake_emit_func_helper<H>(
        &self,
        host: &mut H,
        layout: &UnitLayout,
        func: &FuncInfo,
        recorder: &PrologTracker<R>,
    ) -> UnwindResult<()>
    where
        H: UnwindHost + ?Sized,
    {
        debug_assert!(layout.cold_code.is_some());
        debug_assert!(func.may_split(), "no fake splitting of funclets");

        let start_offset = 0;
        let end_offset = layout.total_native_code_size;
        let info = recorder.unwind_info(CodeRegion::Hot, end_offset)?;

        log::debug!(
            "{}: commit fake-split {} unwind info [{}, {}), {} bytes",
            self.session.current_function(),
            func.kind(),
            start_offset,
            end_offset,
            info.len()
        );

        host.alloc_unwind_info(&UnwindCommit {
            hot_code: layout.hot_code,
            cold_code: None,
            start_offset,
            end_offset,
            payload: &info.bytes,
            kind: func.kind(),
        })?;
        self.session.record_fake_split_commit(info.len());
        Ok(())
    }
}

/// Resolve an optional marker, falling back to the region boundary.
fn resolve<O>(oracle: &O, location: Option<CodeLocation>, boundary: u32) -> UnwindResult<u32>
where
    O: LocationOracle + ?Sized,
{
    match location {
        None => Ok(boundary),
        Some(location) => oracle
            .code_offset(location)
            .ok_or(UnwindError::UnresolvedLocation { location }),
    }
}
