//! Unwind reservation/commit tracer.
//!
//! Builds a compiled-unit description from the command line, runs the
//! reservation and emission drivers against a recording host and prints
//! every request followed by the unit's statistics.

use bumpalo::Bump;
use clap::{Parser, ValueEnum};
use tpde_unwind::core::{
    AsmReg, CodeAddr, CodeLocation, CodeSpan, CompilationSession, FuncInfo, FuncKind,
    LocationTable, RecordingHost, UnitLayout, UnwindConfig, UnwindContext, UnwindRecorder,
};
use tpde_unwind::{X64UnwindRecorder, X86UnwindRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Arch {
    X86,
    X64,
}

/// Offsets of one span; `None` is an absent marker.
#[derive(Debug, Clone, Copy)]
struct SpanArg {
    start: Option<u32>,
    end: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct FuncletArg {
    kind: FuncKind,
    span: SpanArg,
}

#[derive(Parser, Debug)]
#[command(name = "unwind-trace", about = "Trace unwind info reservation and commit for one unit")]
struct Cli {
    /// Recorder variant to run.
    #[arg(long, value_enum, default_value = "x64")]
    arch: Arch,

    /// Bytes of hot code in the unit.
    #[arg(long)]
    hot_size: u32,

    /// Bytes of hot plus cold code; defaults to the hot size.
    #[arg(long)]
    total_size: Option<u32>,

    /// Base address of the hot code.
    #[arg(long, default_value_t = 0x10000)]
    hot_base: usize,

    /// Root hot span, START:END with `-` for an absent marker.
    #[arg(long, value_parser = parse_span, default_value = "-:-")]
    root: SpanArg,

    /// Root cold span; its presence splits the unit.
    #[arg(long, value_parser = parse_span)]
    cold: Option<SpanArg>,

    /// Funclet as KIND:START:END, KIND being `handler` or `filter`.
    #[arg(long, value_parser = parse_funclet)]
    funclet: Vec<FuncletArg>,

    /// Request fake procedure splitting (debug builds only).
    #[arg(long)]
    fake_split: bool,
}

fn parse_offset(text: &str) -> Result<Option<u32>, String> {
    if text == "-" {
        return Ok(None);
    }
    let value = match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    value.map(Some).map_err(|e| format!("invalid offset `{text}`: {e}"))
}

fn parse_span(text: &str) -> Result<SpanArg, String> {
    let (start, end) = text
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got `{text}`"))?;
    Ok(SpanArg {
        start: parse_offset(start)?,
        end: parse_offset(end)?,
    })
}

fn parse_funclet(text: &str) -> Result<FuncletArg, String> {
    let (kind, span) = text
        .split_once(':')
        .ok_or_else(|| format!("expected KIND:START:END, got `{text}`"))?;
    let kind = match kind {
        "handler" => FuncKind::Handler,
        "filter" => FuncKind::Filter,
        other => return Err(format!("unknown funclet kind `{other}`")),
    };
    Ok(FuncletArg {
        kind,
        span: parse_span(span)?,
    })
}

/// Turns span offsets into markers and remembers where each one lands.
#[derive(Default)]
struct Markers {
    next: u32,
    table: LocationTable,
}

impl Markers {
    fn marker(&mut self, offset: Option<u32>) -> Option<CodeLocation> {
        let offset = offset?;
        let location = CodeLocation::new(self.next);
        self.next += 1;
        self.table.insert(location, offset);
        Some(location)
    }

    fn span(&mut self, span: SpanArg) -> CodeSpan {
        CodeSpan::new(self.marker(span.start), self.marker(span.end))
    }
}

/// Cold code is placed directly after the hot code.
fn cold_base(hot_base: usize, hot_size: u32) -> Result<CodeAddr, String> {
    hot_base
        .checked_add(hot_size as usize)
        .map(CodeAddr)
        .ok_or_else(|| format!("hot code at {hot_base:#x} with {hot_size} bytes overflows the address space"))
}

fn run<R>(cli: &Cli, funcs: &[FuncInfo], locations: &LocationTable) -> Result<(), Box<dyn std::error::Error>>
where
    R: UnwindRecorder + Default,
{
    let mut config = UnwindConfig::from_env();
    if cli.fake_split {
        config = config.with_fake_procedure_splitting(true);
    }

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    session.set_current_function("unit");
    let mut ctx = UnwindContext::<R>::new(&session, funcs, config)?;

    // push rbp ; mov rbp, rsp for every function and funclet
    for idx in 0..funcs.len() {
        let recorder = ctx.recorder_mut(idx);
        recorder.begin_prolog();
        recorder.push(AsmReg::RBP);
        recorder.set_frame_reg(AsmReg::RBP, 0);
        recorder.end_prolog();
    }

    let mut host = RecordingHost::new();
    ctx.reserve(&mut host)?;

    let hot_base = CodeAddr(cli.hot_base);
    let total_size = cli.total_size.unwrap_or(cli.hot_size);
    let layout = if cli.cold.is_some() {
        let cold_base = cold_base(cli.hot_base, cli.hot_size)?;
        UnitLayout::split(hot_base, cold_base, cli.hot_size, total_size)
    } else {
        UnitLayout::hot_only(hot_base, cli.hot_size)
    };
    ctx.emit(&mut host, locations, &layout)?;

    print!("{host}");
    print!("{}", session.stats());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut markers = Markers::default();
    let hot = markers.span(cli.root);
    let cold = cli.cold.map(|span| markers.span(span));
    let mut funcs = vec![FuncInfo::root(hot, cold)];
    for funclet in &cli.funclet {
        funcs.push(FuncInfo::funclet(funclet.kind, markers.span(funclet.span)));
    }

    match cli.arch {
        Arch::X86 => run::<X86UnwindRecorder>(&cli, &funcs, &markers.table),
        Arch::X64 => run::<X64UnwindRecorder>(&cli, &funcs, &markers.table),
    }
}
