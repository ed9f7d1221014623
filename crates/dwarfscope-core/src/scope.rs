//! # Scope and locals resolution
//!
//! Answers "which locals are live at this instruction pointer, across inlined
//! frames".
//!
//! The resolver finds the top-level subprogram whose code ranges contain the
//! address, then walks its children:
//!
//! - lexical blocks are entered only when they contain the address (blocks
//!   without any code location are transparent);
//! - an inlined subroutine containing the address becomes the next, more
//!   specific frame;
//! - variables and formal parameters contribute locals, with their location
//!   resolved at the address.
//!
//! Frames are returned outermost first.

use gimli::constants;
use rustc_demangle::try_demangle;
use tracing::{debug, trace, warn};

use crate::cfi::{CallFrameInfo, CfaRule};
use crate::error::{DecodeError, Result};
use crate::expr::Operation;
use crate::location::{LocationDescription, LocationResolver};
use crate::model::{Attribute, DebugInfo, DieRef};
use crate::ranges::RangeResolver;

/// Name under which a function's `DW_AT_frame_base` is reported.
pub const FRAME_BASE_NAME: &str = "__frame_base";

/// Upper bound on `abstract_origin`/`specification` hops.
const MAX_ORIGIN_DEPTH: usize = 8;

const DW_OP_CALL_FRAME_CFA: u8 = 0x9c;

/// Where a local lives at the queried address.
#[derive(Debug)]
pub enum LocalLocation
{
    /// The location in effect at the address.
    Available
    {
        description: LocationDescription,
        active: Vec<Operation>,
    },
    /// The variable has a location list, but nothing covers this address.
    OptimizedOut
    {
        description: LocationDescription,
    },
    /// The entry carries no location attribute at all.
    NoLocation,
    /// The location attribute could not be decoded.
    Failed(DecodeError),
}

impl LocalLocation
{
    #[must_use]
    pub fn is_available(&self) -> bool
    {
        matches!(self, LocalLocation::Available { .. })
    }

    /// The expression in effect, when available.
    #[must_use]
    pub fn active(&self) -> Option<&[Operation]>
    {
        match self {
            LocalLocation::Available { active, .. } => Some(active),
            _ => None,
        }
    }
}

/// A variable, parameter or frame base visible in a frame.
#[derive(Debug)]
pub struct Local
{
    pub name: String,
    pub location: LocalLocation,
    /// Offset of the entry that declared the local.
    pub entry: u64,
    pub is_parameter: bool,
}

/// One physical or inlined frame.
#[derive(Debug)]
pub struct ScopeFrame
{
    pub function_name: Option<String>,
    pub linkage_name: Option<String>,
    /// Demangled Rust linkage name.
    pub demangled_name: Option<String>,
    pub source_file: Option<String>,
    pub source_line: Option<u64>,
    pub locals: Vec<Local>,
    /// CFA rule at the address, when the frame base is CFA relative.
    pub cfa: Option<CfaRule>,
    /// Offset of the subprogram or inlined-subroutine entry.
    pub entry: u64,
    pub is_inline: bool,
}

impl ScopeFrame
{
    /// The best name available: `DW_AT_name`, then the demangled or raw
    /// linkage name.
    #[must_use]
    pub fn display_name(&self) -> &str
    {
        self.function_name
            .as_deref()
            .or(self.demangled_name.as_deref())
            .or(self.linkage_name.as_deref())
            .unwrap_or("<unknown>")
    }

    #[must_use]
    pub fn local(&self, name: &str) -> Option<&Local>
    {
        self.locals.iter().find(|local| local.name == name)
    }
}

pub struct ScopeResolver<'a>
{
    info: &'a DebugInfo,
    call_frames: Option<&'a CallFrameInfo>,
}

impl<'a> ScopeResolver<'a>
{
    #[must_use]
    pub fn new(info: &'a DebugInfo) -> Self
    {
        Self { info, call_frames: None }
    }

    /// Attach call frame information, used to report the CFA rule of
    /// functions whose frame base is `DW_OP_call_frame_cfa`.
    #[must_use]
    pub fn with_call_frames(mut self, call_frames: &'a CallFrameInfo) -> Self
    {
        self.call_frames = Some(call_frames);
        self
    }

    /// The single top-level subprogram whose code contains `address`.
    pub fn function_at(&self, address: u64) -> Result<DieRef<'a>>
    {
        let mut candidates = Vec::new();
        for unit in self.info.units() {
            let Some(root) = unit.root() else {
                continue;
            };
            let ranges = RangeResolver::for_unit(self.info, unit);
            let mut pending: Vec<DieRef<'a>> = root.children().collect();
            while let Some(die) = pending.pop() {
                if die.tag() != constants::DW_TAG_subprogram {
                    pending.extend(die.children());
                    continue;
                }
                if !die.has_code_location() {
                    continue;
                }
                match ranges.contains(die, address) {
                    Ok(true) => candidates.push(die),
                    Ok(false) => {}
                    Err(err) => warn!(entry = die.offset(), %err, "skipping subprogram with unreadable ranges"),
                }
            }
        }

        match candidates.as_slice() {
            [] => Err(DecodeError::NoFunctionAtAddress { address }),
            [function] => Ok(*function),
            _ => {
                let mut offsets: Vec<u64> = candidates.iter().map(DieRef::offset).collect();
                offsets.sort_unstable();
                debug!(address, ?offsets, "several functions contain the address");
                Err(DecodeError::AmbiguousFunction {
                    address,
                    candidates: offsets,
                })
            }
        }
    }

    /// Frames and locals at `address`, outermost first.
    pub fn locals_at(&self, address: u64) -> Result<Vec<ScopeFrame>>
    {
        let function = self.function_at(address)?;
        self.frames_for(function, address)
    }

    /// Frames and locals of `function` at `address`, outermost first.
    pub fn frames_for(&self, function: DieRef<'a>, address: u64) -> Result<Vec<ScopeFrame>>
    {
        let unit = function.unit();
        let ranges = RangeResolver::for_unit(self.info, unit);
        let locations = LocationResolver::for_unit(self.info, unit);

        let mut frames = Vec::new();
        let mut scopes = Vec::new();
        let mut next = Some(function);
        while let Some(scope) = next.take() {
            let mut frame = self.frame_header(scope);
            if let Some(attribute) = scope.attribute(constants::DW_AT_frame_base) {
                let location = locate(&locations, attribute, address, unit.base_address());
                if frames.is_empty() && uses_call_frame_cfa(&location) {
                    frame.cfa = self.cfa_at(address);
                }
                frame.locals.push(Local {
                    name: FRAME_BASE_NAME.to_string(),
                    location,
                    entry: scope.offset(),
                    is_parameter: false,
                });
            }

            let mut pending: Vec<DieRef<'a>> = scope.children().collect();
            pending.reverse();
            while let Some(child) = pending.pop() {
                let tag = child.tag();
                if tag == constants::DW_TAG_variable || tag == constants::DW_TAG_formal_parameter {
                    let location = match child.attribute(constants::DW_AT_location) {
                        Some(attribute) => locate(&locations, attribute, address, unit.base_address()),
                        None => LocalLocation::NoLocation,
                    };
                    frame.locals.push(Local {
                        name: self.name_of(child).unwrap_or("<unnamed>").to_string(),
                        location,
                        entry: child.offset(),
                        is_parameter: tag == constants::DW_TAG_formal_parameter,
                    });
                } else if tag == constants::DW_TAG_lexical_block {
                    if !child.has_code_location() || covers(&ranges, child, address) {
                        let mut children: Vec<DieRef<'a>> = child.children().collect();
                        children.reverse();
                        pending.extend(children);
                    }
                } else if tag == constants::DW_TAG_inlined_subroutine && covers(&ranges, child, address) {
                    if next.is_none() {
                        next = Some(child);
                    } else {
                        warn!(entry = child.offset(), address, "ignoring overlapping inlined subroutine");
                    }
                }
            }
            trace!(entry = scope.offset(), locals = frame.locals.len(), "resolved scope");
            frames.push(frame);
            scopes.push(scope);
        }

        // Each frame's position is the call site of the inline it contains;
        // the innermost frame's position comes from the line table.
        for index in 0..frames.len() {
            let (file, line) = match scopes.get(index + 1) {
                Some(inline) => (
                    inline
                        .udata(constants::DW_AT_call_file)
                        .and_then(|file| unit.file_name(file))
                        .map(str::to_string),
                    inline.udata(constants::DW_AT_call_line),
                ),
                None => match unit.line_for_address(address) {
                    Some(row) => (unit.file_name(row.file).map(str::to_string), Some(row.line)),
                    None => (None, None),
                },
            };
            frames[index].source_file = file;
            frames[index].source_line = line;
        }
        Ok(frames)
    }

    fn frame_header(&self, scope: DieRef<'a>) -> ScopeFrame
    {
        let linkage_name = self.linkage_name_of(scope).map(str::to_string);
        let demangled_name = linkage_name
            .as_deref()
            .and_then(|raw| try_demangle(raw).ok())
            .map(|demangled| format!("{demangled:#}"));
        ScopeFrame {
            function_name: self.name_of(scope).map(str::to_string),
            linkage_name,
            demangled_name,
            source_file: None,
            source_line: None,
            locals: Vec::new(),
            cfa: None,
            entry: scope.offset(),
            is_inline: scope.tag() == constants::DW_TAG_inlined_subroutine,
        }
    }

    /// The entry `die` completes, via `abstract_origin` or `specification`.
    fn origin(&self, die: DieRef<'a>) -> Option<DieRef<'a>>
    {
        die.reference(constants::DW_AT_abstract_origin)
            .or_else(|| die.reference(constants::DW_AT_specification))
            .and_then(|offset| self.info.entry(offset))
    }

    fn name_of(&self, die: DieRef<'a>) -> Option<&'a str>
    {
        self.follow(die, |entry| entry.name())
    }

    fn linkage_name_of(&self, die: DieRef<'a>) -> Option<&'a str>
    {
        self.follow(die, |entry| entry.linkage_name())
    }

    fn follow(&self, die: DieRef<'a>, get: impl Fn(DieRef<'a>) -> Option<&'a str>) -> Option<&'a str>
    {
        let mut current = die;
        for _ in 0..MAX_ORIGIN_DEPTH {
            if let Some(value) = get(current) {
                return Some(value);
            }
            current = self.origin(current)?;
        }
        None
    }

    fn cfa_at(&self, address: u64) -> Option<CfaRule>
    {
        let call_frames = self.call_frames?;
        match call_frames.row_for_address(address) {
            Ok(row) => Some(row.cfa),
            Err(err) => {
                trace!(address, %err, "no CFA rule for frame base");
                None
            }
        }
    }
}

fn covers(ranges: &RangeResolver<'_>, die: DieRef<'_>, address: u64) -> bool
{
    ranges.contains(die, address).unwrap_or_else(|err| {
        warn!(entry = die.offset(), %err, "treating scope with unreadable ranges as not containing the address");
        false
    })
}

fn locate(
    locations: &LocationResolver<'_>,
    attribute: &Attribute,
    address: u64,
    unit_base: Option<u64>,
) -> LocalLocation
{
    let description = match locations.resolve(attribute) {
        Ok(description) => description,
        Err(err) => return LocalLocation::Failed(err),
    };
    let active = match description.expression_at(address, unit_base) {
        Ok(active) => active.map(<[Operation]>::to_vec),
        Err(err) => return LocalLocation::Failed(err),
    };
    match active {
        Some(active) if !active.is_empty() => LocalLocation::Available { description, active },
        _ => LocalLocation::OptimizedOut { description },
    }
}

fn uses_call_frame_cfa(location: &LocalLocation) -> bool
{
    location
        .active()
        .is_some_and(|ops| ops.iter().any(|op| op.opcode == DW_OP_CALL_FRAME_CFA))
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;

    use super::*;
    use crate::model::{AttrValue, LineProgram, LineRow, Sections, UnitBuilder};
    use crate::types::Architecture;

    fn code(low: u64, high: u64) -> Vec<Attribute>
    {
        vec![
            Attribute::new(DW_AT_low_pc, AttrValue::Address(low)),
            Attribute::new(DW_AT_high_pc, AttrValue::Udata(high - low)),
        ]
    }

    fn named(name: &str, mut attributes: Vec<Attribute>) -> Vec<Attribute>
    {
        attributes.push(Attribute::new(DW_AT_name, AttrValue::from(name)));
        attributes
    }

    fn info(build: impl FnOnce(&mut UnitBuilder)) -> DebugInfo
    {
        let mut builder = UnitBuilder::new(4, 8);
        builder.open(DW_TAG_compile_unit, named("a.c", code(0, 0x1000)));
        build(&mut builder);
        DebugInfo::new(Architecture::X86_64, Sections::default(), vec![builder.finish()])
    }

    #[test]
    fn test_lexical_block_scope()
    {
        let info = info(|b| {
            b.open(DW_TAG_subprogram, named("f", code(0, 0x100)));
            b.leaf(
                DW_TAG_variable,
                named("outer", vec![Attribute::new(DW_AT_location, AttrValue::Block(vec![0x91, 0x70]))]),
            );
            b.open(DW_TAG_lexical_block, code(0x10, 0x20));
            b.leaf(
                DW_TAG_variable,
                named("x", vec![Attribute::new(DW_AT_location, AttrValue::Block(vec![0x91, 0x68]))]),
            );
            b.close();
            b.close();
        });
        let resolver = ScopeResolver::new(&info);

        let frames = resolver.locals_at(0x15).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].function_name.as_deref(), Some("f"));
        assert!(frames[0].local("x").unwrap().location.is_available());
        assert!(frames[0].local("outer").is_some());

        let frames = resolver.locals_at(0x25).unwrap();
        assert!(frames[0].local("x").is_none());
        assert!(frames[0].local("outer").is_some());
    }

    #[test]
    fn test_blocks_without_code_are_transparent()
    {
        let info = info(|b| {
            b.open(DW_TAG_subprogram, named("f", code(0, 0x100)));
            b.open(DW_TAG_lexical_block, Vec::<Attribute>::new());
            b.leaf(DW_TAG_variable, named("hidden", Vec::new()));
            b.close();
            b.close();
        });
        let frames = ScopeResolver::new(&info).locals_at(0x80).unwrap();
        let local = frames[0].local("hidden").unwrap();
        assert!(matches!(local.location, LocalLocation::NoLocation));
    }

    #[test]
    fn test_inline_chain_and_call_sites()
    {
        let mut lines = LineProgram::default();
        lines.files = vec!["a.c".into(), "b.h".into()];
        lines.rows = vec![
            LineRow {
                address: 0,
                file: 1,
                line: 7,
                is_stmt: true,
                end_sequence: false,
            },
            LineRow {
                address: 0x100,
                file: 1,
                line: 0,
                is_stmt: true,
                end_sequence: true,
            },
        ];

        let mut builder = UnitBuilder::new(4, 8);
        builder.line_program(lines);
        builder.open(DW_TAG_compile_unit, named("a.c", code(0, 0x1000)));
        let abstract_g = builder.leaf(DW_TAG_subprogram, named("g", Vec::new()));
        builder.open(DW_TAG_subprogram, named("f", code(0, 0x100)));
        builder.leaf(DW_TAG_formal_parameter, named("p", Vec::new()));
        let mut inline = code(0x40, 0x60);
        inline.push(Attribute::new(DW_AT_abstract_origin, AttrValue::Ref(abstract_g)));
        inline.push(Attribute::new(DW_AT_call_file, AttrValue::Udata(0)));
        inline.push(Attribute::new(DW_AT_call_line, AttrValue::Udata(42)));
        builder.open(DW_TAG_inlined_subroutine, inline);
        builder.leaf(
            DW_TAG_variable,
            named("inner", vec![Attribute::new(DW_AT_location, AttrValue::Block(vec![0x50]))]),
        );
        let info = DebugInfo::new(Architecture::X86_64, Sections::default(), vec![builder.finish()]);

        let frames = ScopeResolver::new(&info).locals_at(0x44).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].display_name(), "f");
        assert_eq!(frames[0].source_file.as_deref(), Some("a.c"));
        assert_eq!(frames[0].source_line, Some(42));
        assert!(frames[0].local("p").unwrap().is_parameter);
        assert_eq!(frames[1].display_name(), "g");
        assert!(frames[1].is_inline);
        assert_eq!(frames[1].source_file.as_deref(), Some("b.h"));
        assert_eq!(frames[1].source_line, Some(7));
        assert!(frames[1].local("inner").unwrap().location.is_available());

        let frames = ScopeResolver::new(&info).locals_at(0x80).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_function_lookup_failures()
    {
        let info = info(|b| {
            b.leaf(DW_TAG_subprogram, named("f", code(0, 0x100)));
            b.leaf(DW_TAG_subprogram, named("g", code(0x80, 0x180)));
            b.leaf(DW_TAG_subprogram, named("decl", Vec::new()));
        });
        let resolver = ScopeResolver::new(&info);
        assert!(matches!(
            resolver.locals_at(0x200),
            Err(DecodeError::NoFunctionAtAddress { address: 0x200 })
        ));
        match resolver.locals_at(0x90) {
            Err(DecodeError::AmbiguousFunction { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(resolver.locals_at(0x10).unwrap()[0].display_name(), "f");
    }

    #[test]
    fn test_frame_base_and_rust_linkage_name()
    {
        let info = info(|b| {
            let mut attributes = named("f", code(0, 0x100));
            attributes.push(Attribute::new(DW_AT_frame_base, AttrValue::Block(vec![0x9c])));
            attributes.push(Attribute::new(
                DW_AT_linkage_name,
                AttrValue::from("_ZN4core3fmt5write17h0123456789abcdefE"),
            ));
            b.leaf(DW_TAG_subprogram, attributes);
        });
        let frames = ScopeResolver::new(&info).locals_at(0x10).unwrap();
        let frame_base = frames[0].local(FRAME_BASE_NAME).unwrap();
        assert_eq!(frame_base.location.active().map(<[Operation]>::len), Some(1));
        assert_eq!(frames[0].demangled_name.as_deref(), Some("core::fmt::write"));
        assert!(frames[0].cfa.is_none());
    }
}
