//! End-to-end reservation and emission scenarios against a recording host.

use bumpalo::Bump;
use tpde_unwind::core::{
    CodeAddr, CodeLocation, CodeSpan, CompilationSession, FuncInfo, FuncInfoSetBuilder, FuncKind,
    LocationTable, RecordingHost, Reservation, UnitLayout, UnwindConfig, UnwindContext,
    UnwindError, UnwindHost,
};
use tpde_unwind::X86UnwindRecorder;

const HOT_BASE: CodeAddr = CodeAddr(0x4000);
const COLD_BASE: CodeAddr = CodeAddr(0x9000);

/// Hands out markers and records where they land.
struct Layout {
    table: LocationTable,
    next: u32,
}

impl Layout {
    fn new() -> Self {
        Self { table: LocationTable::new(), next: 0 }
    }

    fn at(&mut self, offset: u32) -> Option<CodeLocation> {
        let location = CodeLocation::new(self.next);
        self.next += 1;
        self.table.insert(location, offset);
        Some(location)
    }

    fn span(&mut self, start: u32, end: u32) -> CodeSpan {
        CodeSpan::new(self.at(start), self.at(end))
    }
}

fn run_unit(
    funcs: &[FuncInfo],
    locations: &LocationTable,
    layout: &UnitLayout,
    config: UnwindConfig,
) -> RecordingHost {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ctx = UnwindContext::<X86UnwindRecorder>::new(&session, funcs, config).unwrap();

    let mut host = RecordingHost::new();
    ctx.reserve(&mut host).unwrap();
    ctx.emit(&mut host, locations, layout).unwrap();

    let stats = session.stats();
    assert_eq!(stats.reservations, host.reservations.len());
    assert_eq!(stats.commits, host.commits.len());
    host
}

fn payload_length(payload: &[u8]) -> u32 {
    u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]])
}

#[test]
fn root_only_unit() {
    let funcs = FuncInfoSetBuilder::new().root(CodeSpan::whole(), None).build().unwrap();
    let layout = UnitLayout::hot_only(HOT_BASE, 64);

    let host = run_unit(&funcs, &LocationTable::new(), &layout, UnwindConfig::default());

    assert_eq!(
        host.reservations,
        vec![Reservation { is_funclet: false, is_cold: false, size: 4 }]
    );
    assert_eq!(host.commits.len(), 1);
    let commit = &host.commits[0];
    assert_eq!(commit.kind, FuncKind::Root);
    assert_eq!((commit.start_offset, commit.end_offset), (0, 64));
    assert_eq!(commit.hot_code, HOT_BASE);
    assert_eq!(commit.cold_code, None);
    assert_eq!(payload_length(&commit.payload), 64);
}

#[test]
fn split_root_with_handler() {
    let mut marks = Layout::new();
    let root_hot = marks.span(0, 40);
    let root_cold = marks.span(512, 600);
    let handler = marks.span(40, 56);
    let funcs = FuncInfoSetBuilder::new()
        .root(root_hot, Some(root_cold))
        .handler(handler)
        .build()
        .unwrap();
    let layout = UnitLayout::split(HOT_BASE, COLD_BASE, 512, 600);

    let host = run_unit(&funcs, &marks.table, &layout, UnwindConfig::default());

    assert_eq!(
        host.reservations,
        vec![
            Reservation { is_funclet: false, is_cold: false, size: 4 },
            Reservation { is_funclet: false, is_cold: true, size: 4 },
            Reservation { is_funclet: true, is_cold: false, size: 4 },
        ]
    );

    let ranges: Vec<_> = host
        .commits
        .iter()
        .map(|c| (c.kind, c.start_offset, c.end_offset, c.cold_code))
        .collect();
    assert_eq!(
        ranges,
        vec![
            (FuncKind::Root, 0, 40, None),
            (FuncKind::Root, 0, 88, Some(COLD_BASE)),
            (FuncKind::Handler, 40, 56, None),
        ]
    );
    assert_eq!(payload_length(&host.commits[1].payload), 88);
}

#[test]
fn absent_markers_take_region_boundaries() {
    let funcs = FuncInfoSetBuilder::new()
        .root(CodeSpan::whole(), Some(CodeSpan::whole()))
        .build()
        .unwrap();
    let layout = UnitLayout::split(HOT_BASE, COLD_BASE, 96, 160);

    let host = run_unit(&funcs, &LocationTable::new(), &layout, UnwindConfig::default());

    assert_eq!((host.commits[0].start_offset, host.commits[0].end_offset), (0, 96));
    assert_eq!((host.commits[1].start_offset, host.commits[1].end_offset), (0, 64));
}

#[test]
fn hot_only_units_never_pass_cold_base() {
    let mut marks = Layout::new();
    let root = marks.span(0, 100);
    let filter = marks.span(100, 120);
    let handler = marks.span(120, 150);
    let funcs = FuncInfoSetBuilder::new()
        .root(root, None)
        .filter(filter)
        .handler(handler)
        .build()
        .unwrap();
    let layout = UnitLayout::hot_only(HOT_BASE, 150);

    let host = run_unit(&funcs, &marks.table, &layout, UnwindConfig::default());

    assert_eq!(host.commits.len(), funcs.len());
    for commit in &host.commits {
        assert_eq!(commit.cold_code, None);
        assert!(commit.start_offset < commit.end_offset);
        assert!(commit.end_offset <= 150);
    }
    assert_eq!(host.reservations.len(), host.commits.len());
}

#[test]
#[cfg(debug_assertions)]
fn fake_split_commits_whole_unit_as_hot() {
    let mut marks = Layout::new();
    let root_hot = marks.span(0, 120);
    let root_cold = marks.span(150, 200);
    let funcs = FuncInfoSetBuilder::new().root(root_hot, Some(root_cold)).build().unwrap();
    let layout = UnitLayout::split(HOT_BASE, COLD_BASE, 150, 200);
    let config = UnwindConfig::new().with_fake_procedure_splitting(true);

    let host = run_unit(&funcs, &marks.table, &layout, config);

    assert_eq!(
        host.reservations,
        vec![Reservation { is_funclet: false, is_cold: false, size: 4 }]
    );
    assert_eq!(host.commits.len(), 1);
    let commit = &host.commits[0];
    assert_eq!((commit.start_offset, commit.end_offset), (0, 200));
    assert_eq!(commit.cold_code, None);
    assert_eq!(payload_length(&commit.payload), 200);
}

#[test]
fn fake_split_without_cold_region_changes_nothing() {
    let funcs = FuncInfoSetBuilder::new().root(CodeSpan::whole(), None).build().unwrap();
    let layout = UnitLayout::hot_only(HOT_BASE, 80);

    let plain = run_unit(&funcs, &LocationTable::new(), &layout, UnwindConfig::default());
    let toggled = run_unit(
        &funcs,
        &LocationTable::new(),
        &layout,
        UnwindConfig::new().with_fake_procedure_splitting(true),
    );

    assert_eq!(plain.reservations, toggled.reservations);
    assert_eq!(plain.commits, toggled.commits);
}

#[test]
fn reservation_is_repeatable() {
    let funcs = FuncInfoSetBuilder::new()
        .root(CodeSpan::whole(), Some(CodeSpan::whole()))
        .handler(CodeSpan::whole())
        .filter(CodeSpan::whole())
        .build()
        .unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ctx = UnwindContext::<X86UnwindRecorder>::new(&session, &funcs, UnwindConfig::default()).unwrap();

    let mut first = RecordingHost::new();
    let mut second = RecordingHost::new();
    ctx.reserve(&mut first).unwrap();
    ctx.reserve(&mut second).unwrap();

    assert_eq!(first.reservations.len(), 4);
    assert_eq!(first.reservations, second.reservations);
}

#[test]
fn host_commit_failure_stops_emission() {
    struct RejectCold(RecordingHost);

    impl UnwindHost for RejectCold {
        fn reserve_unwind_info(&mut self, is_funclet: bool, is_cold: bool, size: usize) -> Result<(), UnwindError> {
            self.0.reserve_unwind_info(is_funclet, is_cold, size)
        }

        fn alloc_unwind_info(&mut self, commit: &tpde_unwind::UnwindCommit<'_>) -> Result<(), UnwindError> {
            if commit.cold_code.is_some() {
                return Err(UnwindError::HostCommit { reason: "cold storage exhausted".to_string() });
            }
            self.0.alloc_unwind_info(commit)
        }
    }

    let funcs = FuncInfoSetBuilder::new()
        .root(CodeSpan::whole(), Some(CodeSpan::whole()))
        .handler(CodeSpan::whole())
        .build()
        .unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ctx = UnwindContext::<X86UnwindRecorder>::new(&session, &funcs, UnwindConfig::default()).unwrap();
    let layout = UnitLayout::split(HOT_BASE, COLD_BASE, 32, 48);

    let mut host = RejectCold(RecordingHost::new());
    ctx.reserve(&mut host).unwrap();
    let err = ctx.emit(&mut host, &LocationTable::new(), &layout).unwrap_err();

    assert!(matches!(err, UnwindError::HostCommit { .. }));
    // root hot went through, the handler was never reached
    assert_eq!(host.0.commits.len(), 1);
}

#[test]
fn unresolved_marker_is_reported() {
    let dangling = CodeLocation::new(42);
    let funcs = FuncInfoSetBuilder::new()
        .root(CodeSpan::new(None, Some(dangling)), None)
        .build()
        .unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ctx = UnwindContext::<X86UnwindRecorder>::new(&session, &funcs, UnwindConfig::default()).unwrap();

    let mut host = RecordingHost::new();
    ctx.reserve(&mut host).unwrap();
    let err = ctx
        .emit(&mut host, &LocationTable::new(), &UnitLayout::hot_only(HOT_BASE, 16))
        .unwrap_err();

    assert_eq!(err, UnwindError::UnresolvedLocation { location: dangling });
    assert!(host.commits.is_empty());
}

#[test]
fn invalid_descriptor_sets_are_rejected() {
    assert!(matches!(
        FuncInfoSetBuilder::new().build(),
        Err(UnwindError::InvalidFuncSet { .. })
    ));
    assert!(FuncInfoSetBuilder::new()
        .handler(CodeSpan::whole())
        .root(CodeSpan::whole(), None)
        .build()
        .is_err());
}
