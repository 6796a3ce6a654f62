// This module defines the function/funclet descriptor set produced by exception handling
// analysis. A compiled unit is one root function plus zero or more funclets (handlers and
// filters), held in a fixed order with the root at index 0. Each FuncInfo carries the code
// location markers bounding its hot code and, for the root only, its cold code. Funclets are
// never split, and that rule is enforced by construction: FuncInfo::funclet takes no cold
// span, and FuncInfoSetBuilder rejects sets that break the root/funclet shape.

//! Function and funclet descriptors.

use std::fmt;

use super::error::{UnwindError, UnwindResult};
use super::location::CodeLocation;

/// Kind of code a descriptor covers.
///
/// The discriminants match the host interface's function kind values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FuncKind {
    Root = 0,
    Handler = 1,
    Filter = 2,
}

impl FuncKind {
    pub fn is_funclet(self) -> bool {
        self != FuncKind::Root
    }
}

impl fmt::Display for FuncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuncKind::Root => write!(f, "root"),
            FuncKind::Handler => write!(f, "handler"),
            FuncKind::Filter => write!(f, "filter"),
        }
    }
}

/// Start/end markers of one contiguous code range.
///
/// An absent start means the region's first byte, an absent end means the
/// region's last byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeSpan {
    pub start: Option<CodeLocation>,
    pub end: Option<CodeLocation>,
}

impl CodeSpan {
    pub const fn new(start: Option<CodeLocation>, end: Option<CodeLocation>) -> Self {
        Self { start, end }
    }

    /// Span covering the whole region.
    pub const fn whole() -> Self {
        Self { start: None, end: None }
    }
}

/// Descriptor for the root function or one funclet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncInfo {
    kind: FuncKind,
    hot: CodeSpan,
    cold: Option<CodeSpan>,
}

impl FuncInfo {
    /// Descriptor for the root function; `cold` is present when the code
    /// generator moved some of its blocks to the cold region.
    pub fn root(hot: CodeSpan, cold: Option<CodeSpan>) -> Self {
        Self { kind: FuncKind::Root, hot, cold }
    }

    /// Descriptor for a funclet. Funclets only ever have hot code.
    pub fn funclet(kind: FuncKind, hot: CodeSpan) -> Self {
        debug_assert!(kind.is_funclet(), "funclet descriptor must not be a root");
        Self { kind, hot, cold: None }
    }

    pub fn kind(&self) -> FuncKind {
        self.kind
    }

    pub fn is_funclet(&self) -> bool {
        self.kind.is_funclet()
    }

    /// Only the root may own code in both regions.
    pub fn may_split(&self) -> bool {
        self.kind == FuncKind::Root
    }

    pub fn hot_span(&self) -> CodeSpan {
        self.hot
    }

    pub fn cold_span(&self) -> Option<CodeSpan> {
        self.cold
    }
}

/// Ordered descriptor set of one compiled unit. Index 0 is the root.
#[derive(Debug, Clone, Copy)]
pub struct FuncInfoSet<'arena> {
    funcs: &'arena [FuncInfo],
}

impl<'arena> FuncInfoSet<'arena> {
    /// Wrap an arena slice, checking the root/funclet shape.
    pub fn new(funcs: &'arena [FuncInfo]) -> UnwindResult<Self> {
        validate(funcs)?;
        Ok(Self { funcs })
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    /// Always false for a validated set.
    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    pub fn root(&self) -> &'arena FuncInfo {
        &self.funcs[0]
    }

    pub fn get(&self, idx: usize) -> Option<&'arena FuncInfo> {
        self.funcs.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'arena FuncInfo> + 'arena {
        self.funcs.iter()
    }

    pub fn funclet_count(&self) -> usize {
        self.funcs.len() - 1
    }

    /// Whether the unit has a cold region (the root carries a cold span).
    pub fn has_cold_region(&self) -> bool {
        self.root().cold.is_some()
    }
}

/// Builder collecting descriptors in index order.
#[derive(Debug, Default)]
pub struct FuncInfoSetBuilder {
    funcs: Vec<FuncInfo>,
}

impl FuncInfoSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(mut self, hot: CodeSpan, cold: Option<CodeSpan>) -> Self {
        self.funcs.push(FuncInfo::root(hot, cold));
        self
    }

    pub fn handler(mut self, hot: CodeSpan) -> Self {
        self.funcs.push(FuncInfo::funclet(FuncKind::Handler, hot));
        self
    }

    pub fn filter(mut self, hot: CodeSpan) -> Self {
        self.funcs.push(FuncInfo::funclet(FuncKind::Filter, hot));
        self
    }

    pub fn push(mut self, func: FuncInfo) -> Self {
        self.funcs.push(func);
        self
    }

    /// Validate and return the collected descriptors.
    pub fn build(self) -> UnwindResult<Vec<FuncInfo>> {
        validate(&self.funcs)?;
        Ok(self.funcs)
    }
}

fn validate(funcs: &[FuncInfo]) -> UnwindResult<()> {
    let Some(first) = funcs.first() else {
        return Err(UnwindError::InvalidFuncSet {
            reason: "a compiled unit needs a root function".to_string(),
        });
    };
    if first.kind != FuncKind::Root {
        return Err(UnwindError::InvalidFuncSet {
            reason: format!("descriptor 0 is a {}, expected the root", first.kind),
        });
    }
    for (idx, func) in funcs.iter().enumerate().skip(1) {
        if !func.is_funclet() {
            return Err(UnwindError::InvalidFuncSet {
                reason: format!("descriptor {idx} is a second root"),
            });
        }
        if func.cold.is_some() {
            return Err(UnwindError::InvalidFuncSet {
                reason: format!("funclet {idx} has a cold span"),
            });
        }
    }
    Ok(())
}
