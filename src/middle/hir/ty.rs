use hashbrown::HashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::ClassId;
use crate::{
    index::{IndexVec, simple_index},
    intern::InternedSymbol,
};

simple_index! {
    /// Identifies an entry of the program's [`TypeTable`]
    pub struct TypeId;
}

/// Scalar and string types the runtime knows how to box into a tagged value.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PrimitiveKind {
    Bool,
    Byte,
    Int,
    UInt,
    Long,
    ULong,
    Char,
    String,
}

impl PrimitiveKind {
    /// Runtime type tag, as stored in the first word of a value record
    pub fn tag(self) -> i64 {
        match self {
            PrimitiveKind::Bool => 1,
            PrimitiveKind::Byte => 2,
            PrimitiveKind::Int => 3,
            PrimitiveKind::UInt => 4,
            PrimitiveKind::Long => 5,
            PrimitiveKind::ULong => 6,
            PrimitiveKind::Char => 7,
            PrimitiveKind::String => 8,
        }
    }

    /// Whether values of this kind unwrap to a single native integer register
    pub fn is_scalar(self) -> bool {
        !matches!(self, PrimitiveKind::String)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Void,
    /// A value whose dynamic type is only known at runtime
    Dynamic,
    Primitive(PrimitiveKind),
    Array(TypeId),
    Function {
        parameters: Vec<TypeId>,
        return_type: TypeId,
    },
    /// A concrete instantiation of a (possibly generic) class
    Class {
        class: ClassId,
        arguments: Vec<TypeId>,
    },
}

/// Interned table of every type referenced by a program. Structurally equal
/// types share one id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeTable {
    types: IndexVec<TypeId, TypeKind>,
    #[serde(skip)]
    lookup: HashMap<TypeKind, TypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(id) = self.lookup.get(&kind) {
            return *id;
        }

        // tables decoded from JSON arrive without the lookup side table
        if let Some((id, _)) = self.types.enumerate().find(|(_, k)| **k == kind) {
            self.lookup.insert(kind, id);
            return id;
        }

        let id = self.types.push(kind.clone());
        self.lookup.insert(kind, id);
        id
    }

    pub fn primitive(&mut self, kind: PrimitiveKind) -> TypeId {
        self.intern(TypeKind::Primitive(kind))
    }

    pub fn get(&self, id: TypeId) -> &TypeKind {
        &self.types[id]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn as_primitive(&self, id: TypeId) -> Option<PrimitiveKind> {
        match self.get(id) {
            TypeKind::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Void)
    }

    /// Renders a type the way the source language spells it. Class names are
    /// looked up through `class_name` since the table only stores class ids.
    pub fn display(&self, id: TypeId, class_name: &dyn Fn(ClassId) -> InternedSymbol) -> String {
        match self.get(id) {
            TypeKind::Void => "void".to_owned(),
            TypeKind::Dynamic => "dynamic".to_owned(),
            TypeKind::Primitive(kind) => kind.to_string(),
            TypeKind::Array(element) => format!("{}[]", self.display(*element, class_name)),
            TypeKind::Function {
                parameters,
                return_type,
            } => format!(
                "function({}): {}",
                parameters
                    .iter()
                    .map(|p| self.display(*p, class_name))
                    .join(", "),
                self.display(*return_type, class_name)
            ),
            TypeKind::Class { class, arguments } if arguments.is_empty() => {
                class_name(*class).value().to_owned()
            }
            TypeKind::Class { class, arguments } => format!(
                "{}<{}>",
                class_name(*class),
                arguments
                    .iter()
                    .map(|a| self.display(*a, class_name))
                    .join(", ")
            ),
        }
    }

    /// Parameter and return types of a callable type
    pub fn signature(&self, id: TypeId) -> Option<(&[TypeId], TypeId)> {
        match self.get(id) {
            TypeKind::Function {
                parameters,
                return_type,
            } => Some((parameters, *return_type)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structurally_equal_types_share_an_id() {
        let mut table = TypeTable::new();
        let int = table.primitive(PrimitiveKind::Int);
        let a = table.intern(TypeKind::Array(int));
        let b = table.intern(TypeKind::Array(int));

        assert_eq!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.as_primitive(int), Some(PrimitiveKind::Int));
    }

    #[test]
    fn decoded_tables_still_deduplicate() {
        let mut table = TypeTable::new();
        let string = table.primitive(PrimitiveKind::String);

        let json = serde_json::to_string(&table).unwrap();
        let mut decoded: TypeTable = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.primitive(PrimitiveKind::String), string);
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn primitive_names_parse() {
        assert_eq!("ulong".parse::<PrimitiveKind>().unwrap(), PrimitiveKind::ULong);
        assert_eq!(PrimitiveKind::UInt.to_string(), "uint");
    }
}
