use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;

use crate::{
    diagnostics::{DiagnosticKind, Diagnostics, Stage},
    index::{Index, IndexVec},
    intern::InternedSymbol,
    middle::{
        hir,
        mir::{self, ClassId, Field, Method, SubroutineId},
    },
};

#[derive(Debug, Clone, Default)]
struct Members {
    fields: IndexMap<InternedSymbol, Field>,
    methods: IndexMap<InternedSymbol, Method>,
}

struct ClassLoweringContext<'hir> {
    program: &'hir hir::Program,
    diagnostics: &'hir mut Diagnostics,
    /// `None` marks a class that failed to merge
    merged: HashMap<hir::ClassId, Option<Members>>,
    in_progress: HashSet<hir::ClassId>,
}

/// Merges every class with its ancestors. Classes with colliding members are
/// reported and left out, as are classes deriving from them.
pub(super) fn lower_classes(
    program: &hir::Program,
    diagnostics: &mut Diagnostics,
) -> IndexVec<ClassId, mir::Class> {
    let mut ctx = ClassLoweringContext {
        program,
        diagnostics,
        merged: HashMap::new(),
        in_progress: HashSet::new(),
    };

    let mut classes = IndexVec::new();
    for (id, class) in program.classes.enumerate() {
        let Some(members) = ctx.merge(id) else {
            continue;
        };

        classes.push(mir::Class {
            symbol: class.symbol,
            ty: class.ty,
            fields: members.fields.into_values().collect(),
            methods: members.methods.into_values().collect(),
        });
    }

    classes
}

impl ClassLoweringContext<'_> {
    fn merge(&mut self, id: hir::ClassId) -> Option<Members> {
        if let Some(merged) = self.merged.get(&id) {
            return merged.clone();
        }

        if !self.in_progress.insert(id) {
            let symbol = self.program.class(id).symbol;
            self.diagnostics.error(
                Stage::Lowering,
                DiagnosticKind::CyclicInheritance,
                symbol.location,
                format!("class `{}` inherits from itself", symbol.name),
            );
            return None;
        }

        let merged = self.merge_uncached(id);
        self.in_progress.remove(&id);
        self.merged.insert(id, merged.clone());
        merged
    }

    fn merge_uncached(&mut self, id: hir::ClassId) -> Option<Members> {
        let class = self.program.class(id);

        let inherited = match class.parent {
            Some(parent) => self.merge(parent)?,
            None => Members::default(),
        };

        let mut merged = inherited.clone();
        let mut failed = false;

        for field in &class.fields {
            let name = field.symbol.name;
            let collision = if inherited.fields.contains_key(&name) {
                Some("an inherited field")
            } else if inherited.methods.contains_key(&name) {
                Some("an inherited method")
            } else if merged.fields.contains_key(&name) {
                Some("another field")
            } else {
                None
            };

            if let Some(collision) = collision {
                self.duplicate(class, field.symbol, collision);
                failed = true;
                continue;
            }

            merged.fields.insert(name, Field { name, ty: field.ty });
        }

        let mut own_methods = HashSet::new();
        for method in &class.methods {
            let symbol = self.program.function(*method).symbol;
            let name = symbol.name;

            let collision = if inherited.fields.contains_key(&name) {
                Some("an inherited field")
            } else if merged.fields.contains_key(&name) {
                Some("a field")
            } else if !own_methods.insert(name) {
                Some("another method")
            } else {
                None
            };

            if let Some(collision) = collision {
                self.duplicate(class, symbol, collision);
                failed = true;
                continue;
            }

            // overriding keeps the inherited slot's position
            merged.methods.insert(
                name,
                Method {
                    name,
                    subroutine: SubroutineId::new(method.index()),
                },
            );
        }

        (!failed).then_some(merged)
    }

    fn duplicate(&mut self, class: &hir::Class, member: hir::Symbol, collision: &str) {
        self.diagnostics.error(
            Stage::Lowering,
            DiagnosticKind::DuplicateMember,
            member.location,
            format!(
                "`{}` in class `{}` collides with {collision}",
                member.name, class.symbol.name
            ),
        );
    }
}
