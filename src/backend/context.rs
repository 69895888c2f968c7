//! Name and storage bookkeeping for codegen.
//!
//! [`SymbolIndex`] lives for the whole program and hands out assembly symbols
//! for subroutines, string data and class initializers. [`FrameContext`] is
//! created per subroutine and dropped before the next one starts; it maps
//! values to their frame pointer relative stack slots.

use hashbrown::{HashMap, HashSet};
use indexmap::{IndexMap, IndexSet};

use crate::{
    backend::runtime::{INLINE_SLOT_SIZE, POINTER_SLOT_SIZE, SLOT_GRANULE, align_to},
    index::IndexVec,
    middle::{
        hir::TypeId,
        mir::{self, SubroutineId, SubroutineKind, ValueId},
    },
};

/// Entry point symbol of every executable
pub const START_SYMBOL: &str = "_start";

/// Replaces every character an assembler symbol can't hold
pub fn mangle(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// An assembler local label scoped to `symbol`, e.g. `.Lfib.bb3`
pub fn local_label(symbol: &str, role: impl std::fmt::Display) -> String {
    format!(".L{symbol}.{role}")
}

#[derive(Debug)]
pub struct SymbolIndex {
    subroutines: IndexVec<SubroutineId, String>,
    /// String contents to their `.rodata` symbol, in first use order
    strings: IndexMap<String, String>,
    initializers: IndexMap<TypeId, String>,
    methods: IndexSet<SubroutineId>,
    /// Every symbol defined by this unit or reserved by the runtime
    taken: HashSet<String>,
}

impl SymbolIndex {
    pub fn new(program: &mir::Program, reserved: &[&str]) -> Self {
        let mut taken = reserved
            .iter()
            .map(|s| (*s).to_owned())
            .collect::<HashSet<_>>();
        taken.insert(START_SYMBOL.to_owned());

        let subroutines = program
            .subroutines
            .iter()
            .map(|subroutine| {
                let name = subroutine.symbol.name.value();

                // native symbols have to match the library's spelling exactly
                if let SubroutineKind::Imported {
                    entry_point: Some(entry_point),
                    ..
                } = &subroutine.kind
                {
                    return entry_point.clone();
                }
                if subroutine.is_foreign() {
                    return name.to_owned();
                }

                let base = match subroutine.owner {
                    Some(owner) => {
                        format!("{}.{}", mangle(&program.type_name(owner)), mangle(name))
                    }
                    None => mangle(name),
                };
                claim(&mut taken, base)
            })
            .collect();

        Self {
            subroutines,
            strings: IndexMap::new(),
            initializers: IndexMap::new(),
            methods: IndexSet::new(),
            taken,
        }
    }

    pub fn subroutine(&self, id: SubroutineId) -> Option<&str> {
        self.subroutines.get(id).map(String::as_str)
    }

    /// The data symbol holding `value`. Identical contents share one symbol.
    pub fn string(&mut self, value: &str) -> String {
        if let Some(symbol) = self.strings.get(value) {
            return symbol.clone();
        }

        let symbol = format!(".Lstr{}", self.strings.len());
        self.strings.insert(value.to_owned(), symbol.clone());
        symbol
    }

    /// `(contents, symbol)` of every string handed out so far
    pub fn strings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.strings.iter().map(|(v, s)| (v.as_str(), s.as_str()))
    }

    /// The initializer symbol for class type `ty`, and whether this is the
    /// first time it was asked for (so its body still has to be emitted)
    pub fn initializer(&mut self, program: &mir::Program, ty: TypeId) -> (String, bool) {
        if let Some(symbol) = self.initializers.get(&ty) {
            return (symbol.clone(), false);
        }

        let base = format!("{}.init", mangle(&program.type_name(ty)));
        let symbol = claim(&mut self.taken, base);
        self.initializers.insert(ty, symbol.clone());
        (symbol, true)
    }

    /// Marks method `id` as referenced. Returns true the first time only.
    pub fn reference_method(&mut self, id: SubroutineId) -> bool {
        self.methods.insert(id)
    }
}

/// Inserts `base`, or the first free `base.N`, into `taken`
fn claim(taken: &mut HashSet<String>, base: String) -> String {
    let mut symbol = base.clone();
    let mut suffix = 1;
    while !taken.insert(symbol.clone()) {
        symbol = format!("{base}.{suffix}");
        suffix += 1;
    }
    symbol
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Relative to `%rbp`, always negative for slots below the frame pointer
    pub offset: i64,
    /// The slot holds a `Value*` instead of the value record itself
    pub by_reference: bool,
}

#[derive(Debug, Default)]
pub struct FrameContext {
    slots: HashMap<ValueId, Slot>,
    frame_size: i64,
}

impl FrameContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, value: ValueId, by_reference: bool) -> Slot {
        let size = if by_reference {
            POINTER_SLOT_SIZE
        } else {
            INLINE_SLOT_SIZE
        };
        let slot = Slot {
            offset: -self.reserve(size),
            by_reference,
        };
        self.slots.insert(value, slot);
        slot
    }

    /// Reserves `size` bytes of unnamed storage and returns the distance of
    /// its start below the frame pointer
    pub fn reserve(&mut self, size: i64) -> i64 {
        self.frame_size += align_to(size, SLOT_GRANULE);
        self.frame_size
    }

    /// Moves `value` into a different slot, e.g. once a parameter passed by
    /// pointer has been copied into storage the subroutine owns
    pub fn rebind(&mut self, value: ValueId, slot: Slot) {
        self.slots.insert(value, slot);
    }

    pub fn slot(&self, value: ValueId) -> Option<Slot> {
        self.slots.get(&value).copied()
    }

    pub fn frame_size(&self) -> i64 {
        self.frame_size
    }

    /// Accounts for bytes pushed below the reserved frame around a call
    pub fn grow(&mut self, bytes: i64) {
        self.frame_size += bytes;
    }

    pub fn shrink(&mut self, bytes: i64) {
        self.frame_size -= bytes;
    }
}
