//! Compile units and their lazily populated cache.

use gimli::{constants, RunTimeEndian};
use once_cell::sync::OnceCell;
use smallvec::SmallVec;
use tracing::{trace, warn};

use super::die::{AttrValue, Die, DieRef};
use super::lines::{row_for_address, LineProgram, LineRow};
use super::DwarfFlavor;
use crate::error::{DecodeError, Result};
use crate::expr::ExpressionProfile;

type ChildList = SmallVec<[usize; 4]>;

/// Parent/child links derived from the flat entry list.
#[derive(Debug, Default)]
struct DieTree
{
    children: Vec<ChildList>,
    parents: Vec<Option<usize>>,
}

/// Per-unit state computed on first use.
///
/// Every slot is a `OnceCell`, so accessors are idempotent get-or-create
/// operations and a unit can be shared by reference across threads. Each
/// unit owns its own cache; units never share cached state.
#[derive(Debug, Default)]
pub struct UnitCache
{
    profile: OnceCell<ExpressionProfile>,
    lines: OnceCell<Vec<LineRow>>,
    base_address: OnceCell<Option<u64>>,
    tree: OnceCell<DieTree>,
    terminators: OnceCell<Vec<usize>>,
}

impl UnitCache
{
    /// Whether the entry tree has been built yet.
    #[must_use]
    pub fn has_tree(&self) -> bool
    {
        self.tree.get().is_some()
    }

    /// Whether the legacy terminator table has been built yet.
    #[must_use]
    pub fn has_terminators(&self) -> bool
    {
        self.terminators.get().is_some()
    }
}

/// Header values a unit is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitHeader
{
    /// Offset of the unit header in `.debug_info`.
    pub offset: u64,
    pub version: u16,
    pub address_size: u8,
    /// 4 for 32-bit DWARF, 8 for 64-bit DWARF.
    pub offset_size: u8,
    pub endian: RunTimeEndian,
    /// `DW_AT_addr_base` of the unit (0 when absent).
    pub addr_base: u64,
}

/// One compilation unit: header, entries, line table, cache.
#[derive(Debug)]
pub struct CompileUnit
{
    header: UnitHeader,
    flavor: DwarfFlavor,
    entries: Vec<Die>,
    lines: Option<LineProgram>,
    cache: UnitCache,
}

impl CompileUnit
{
    /// Entries must be in section order (ascending offsets).
    pub(crate) fn new(header: UnitHeader, entries: Vec<Die>, lines: Option<LineProgram>) -> Self
    {
        Self {
            flavor: DwarfFlavor::for_version(header.version),
            header,
            entries,
            lines,
            cache: UnitCache::default(),
        }
    }

    #[must_use]
    pub fn offset(&self) -> u64
    {
        self.header.offset
    }

    #[must_use]
    pub fn version(&self) -> u16
    {
        self.header.version
    }

    #[must_use]
    pub fn address_size(&self) -> u8
    {
        self.header.address_size
    }

    #[must_use]
    pub fn endian(&self) -> RunTimeEndian
    {
        self.header.endian
    }

    #[must_use]
    pub fn addr_base(&self) -> u64
    {
        self.header.addr_base
    }

    #[must_use]
    pub fn flavor(&self) -> DwarfFlavor
    {
        self.flavor
    }

    #[must_use]
    pub fn cache(&self) -> &UnitCache
    {
        &self.cache
    }

    #[must_use]
    pub fn entries(&self) -> &[Die]
    {
        &self.entries
    }

    #[must_use]
    pub fn lines(&self) -> Option<&LineProgram>
    {
        self.lines.as_ref()
    }

    /// The unit's root entry (`DW_TAG_compile_unit` or similar).
    #[must_use]
    pub fn root(&self) -> Option<DieRef<'_>>
    {
        (!self.entries.is_empty()).then(|| DieRef::new(self, 0))
    }

    pub(crate) fn index_of(&self, offset: u64) -> Option<usize>
    {
        self.entries.binary_search_by_key(&offset, |die| die.offset).ok()
    }

    /// Entry at absolute `.debug_info` offset `offset`.
    #[must_use]
    pub fn entry(&self, offset: u64) -> Option<DieRef<'_>>
    {
        self.index_of(offset).map(|index| DieRef::new(self, index))
    }

    /// Expression decoding profile for this unit.
    #[must_use]
    pub fn profile(&self) -> &ExpressionProfile
    {
        self.cache.profile.get_or_init(|| ExpressionProfile {
            address_size: self.header.address_size,
            offset_size: self.header.offset_size,
            endian: self.header.endian,
            version: self.header.version,
        })
    }

    /// The unit base address (`DW_AT_low_pc` of the root), if resolvable.
    #[must_use]
    pub fn base_address(&self) -> Option<u64>
    {
        *self.cache.base_address.get_or_init(|| {
            let base = self.root().and_then(|root| match root.attr(constants::DW_AT_low_pc) {
                Some(AttrValue::Address(address)) => Some(*address),
                _ => None,
            });
            trace!(unit = self.header.offset, ?base, "resolved unit base address");
            base
        })
    }

    /// Like [`CompileUnit::base_address`] but failing with `NoBaseAddress`.
    pub fn require_base_address(&self) -> Result<u64>
    {
        self.base_address()
            .ok_or(DecodeError::NoBaseAddress { offset: self.header.offset })
    }

    /// Line-table row covering `address`.
    #[must_use]
    pub fn line_for_address(&self, address: u64) -> Option<LineRow>
    {
        let program = self.lines.as_ref()?;
        let rows = self.cache.lines.get_or_init(|| program.sorted_rows());
        row_for_address(rows, address).copied()
    }

    /// Name of line-table file `index`.
    #[must_use]
    pub fn file_name(&self, index: u64) -> Option<&str>
    {
        self.lines.as_ref().and_then(|program| program.file_name(index))
    }

    fn tree(&self) -> &DieTree
    {
        self.cache.tree.get_or_init(|| match self.flavor {
            DwarfFlavor::Modern { .. } => build_nested_tree(&self.entries),
            DwarfFlavor::Legacy => build_sibling_tree(&self.entries, self.terminators()),
        })
    }

    pub(crate) fn child_indices(&self, index: usize) -> &[usize]
    {
        self.tree().children.get(index).map_or(&[] as &[usize], |list| list.as_slice())
    }

    pub(crate) fn parent_index(&self, index: usize) -> Option<usize>
    {
        self.tree().parents.get(index).copied().flatten()
    }

    /// Index one past the last entry of `index`'s subtree, including the
    /// null entry closing its children (legacy units).
    #[must_use]
    pub fn subtree_end(&self, index: usize) -> usize
    {
        self.terminators().get(index).copied().unwrap_or(index + 1)
    }

    fn terminators(&self) -> &[usize]
    {
        self.cache
            .terminators
            .get_or_init(|| legacy_terminators(&self.entries, |offset| self.index_of(offset)))
    }
}

/// Tree from explicit nesting: `has_children` opens a level, a null entry
/// closes it.
fn build_nested_tree(entries: &[Die]) -> DieTree
{
    let mut tree = DieTree {
        children: vec![ChildList::new(); entries.len()],
        parents: vec![None; entries.len()],
    };
    let mut open: Vec<usize> = Vec::new();
    for (index, die) in entries.iter().enumerate() {
        if die.is_null() {
            open.pop();
            continue;
        }
        if let Some(&parent) = open.last() {
            tree.children[parent].push(index);
            tree.parents[index] = Some(parent);
        }
        if die.has_children {
            open.push(index);
        }
    }
    tree
}

/// Tree from `DW_AT_sibling` chains: the children of an entry start right
/// after it and follow sibling links until a null entry or its own end.
fn build_sibling_tree(entries: &[Die], terminators: &[usize]) -> DieTree
{
    let mut tree = DieTree {
        children: vec![ChildList::new(); entries.len()],
        parents: vec![None; entries.len()],
    };
    for (index, die) in entries.iter().enumerate() {
        if die.is_null() {
            continue;
        }
        let end = terminators[index];
        let mut child = index + 1;
        while child < end && !entries[child].is_null() {
            tree.children[index].push(child);
            if tree.parents[child].is_none() {
                tree.parents[child] = Some(index);
            }
            child = terminators[child];
        }
    }
    tree
}

enum Step
{
    Done(usize),
    Advance(usize),
    Descend(usize),
}

/// Subtree end for every entry of a sibling-linked unit.
///
/// Entries with a valid `DW_AT_sibling` end where it points. Entries that can
/// own children but carry no sibling are scanned child by child; that scan
/// runs on an explicit stack and reuses every end it has already found, so
/// each entry is resolved once.
fn legacy_terminators(entries: &[Die], index_of: impl Fn(u64) -> Option<usize>) -> Vec<usize>
{
    let count = entries.len();
    let mut memo: Vec<Option<usize>> = vec![None; count];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    let sibling_of = |index: usize| -> Option<usize> {
        let die = &entries[index];
        let AttrValue::Ref(offset) = &die.attribute(constants::DW_AT_sibling)?.value else {
            return None;
        };
        match index_of(*offset) {
            Some(next) if next > index => Some(next),
            _ => {
                warn!(
                    entry = die.offset,
                    sibling = *offset,
                    "ignoring DW_AT_sibling that does not point forward"
                );
                None
            }
        }
    };

    for start in 0..count {
        if memo[start].is_some() {
            continue;
        }
        stack.push((start, start + 1));
        while let Some(&(index, cursor)) = stack.last() {
            let die = &entries[index];
            let step = if let Some(end) = memo[index] {
                Step::Done(end)
            } else if die.is_null() || (!die.has_children && !die.has_attr_sibling()) {
                Step::Done(index + 1)
            } else if let Some(next) = sibling_of(index) {
                Step::Done(next)
            } else if !die.has_children {
                Step::Done(index + 1)
            } else if cursor >= count {
                Step::Done(count)
            } else if entries[cursor].is_null() {
                Step::Done(cursor + 1)
            } else if let Some(next) = memo[cursor] {
                Step::Advance(next)
            } else {
                Step::Descend(cursor)
            };

            match step {
                Step::Done(end) => {
                    memo[index] = Some(end);
                    stack.pop();
                }
                Step::Advance(next) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 = next;
                    }
                }
                Step::Descend(child) => stack.push((child, child + 1)),
            }
        }
    }

    memo.into_iter()
        .enumerate()
        .map(|(index, end)| end.unwrap_or(index + 1))
        .collect()
}

impl Die
{
    fn has_attr_sibling(&self) -> bool
    {
        self.attribute(constants::DW_AT_sibling).is_some()
    }
}
