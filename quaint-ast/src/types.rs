use serde::{Deserialize, Serialize};
use std::fmt;

/// Named member or parameter of an aggregate or function-pointer type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeNamePair {
    pub name: String,
    pub ty: Type,
}

/// Type descriptor kind. Arrays are not a separate kind: any type with
/// `count > 1` is an array of that many elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeKind {
    Void,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    Usize,
    Ssize,
    Uptr,
    Iptr,
    /// Pointer to a subtype
    Ptr(Box<Type>),
    /// Pointer to anything; no arithmetic, no dereference
    Vptr,
    /// Function pointer with named parameters and optional return type
    Fptr {
        params: Vec<TypeNamePair>,
        ret: Option<Box<Type>>,
    },
    /// Suspendable computation yielding a value of the subtype
    Quaint(Box<Type>),
    Struct {
        members: Vec<TypeNamePair>,
        /// Filled at quantification time, one offset per member
        offsets: Vec<u64>,
    },
    Union {
        members: Vec<TypeNamePair>,
        offsets: Vec<u64>,
    },
    Enum {
        values: Vec<(String, u64)>,
        /// Always an integer kind
        underlying: Box<TypeKind>,
    },
}

/// A type descriptor. `size` and `alignment` are zero until `quantify`
/// runs; afterwards `alignment` is a power of two no larger than 8.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type {
    pub kind: TypeKind,
    pub count: u64,
    pub size: u64,
    pub alignment: u64,
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    let rem = value % alignment;
    if rem == 0 {
        value
    } else {
        value + alignment - rem
    }
}

impl Type {
    pub fn scalar(kind: TypeKind) -> Self {
        Self {
            kind,
            count: 1,
            size: 0,
            alignment: 0,
        }
    }

    pub fn array(kind: TypeKind, count: u64) -> Self {
        Self {
            kind,
            count,
            size: 0,
            alignment: 0,
        }
    }

    pub fn ptr_to(sub: Type) -> Self {
        Self::scalar(TypeKind::Ptr(Box::new(sub)))
    }

    pub fn quaint_of(sub: Type) -> Self {
        Self::scalar(TypeKind::Quaint(Box::new(sub)))
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    pub fn is_integral(&self) -> bool {
        self.kind.is_integral()
    }

    pub fn is_signed(&self) -> bool {
        self.kind.is_signed()
    }

    pub fn is_unsigned(&self) -> bool {
        self.is_integral() && !self.is_signed()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Ptr(_) | TypeKind::Vptr | TypeKind::Fptr { .. }
        )
    }

    pub fn is_quaint(&self) -> bool {
        matches!(self.kind, TypeKind::Quaint(_))
    }

    pub fn is_scalar(&self) -> bool {
        self.count == 1
    }

    /// Signedness as carried into operands: signed integers only
    pub fn operand_signed(&self) -> bool {
        self.is_integral() && self.is_signed()
    }

    /// Total byte size including the array count
    pub fn full_size(&self) -> u64 {
        self.size * self.count
    }

    pub fn pointee(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::Ptr(sub) | TypeKind::Quaint(sub) => Some(sub),
            _ => None,
        }
    }

    pub fn pointee_mut(&mut self) -> Option<&mut Type> {
        match &mut self.kind {
            TypeKind::Ptr(sub) | TypeKind::Quaint(sub) => Some(sub),
            _ => None,
        }
    }

    pub fn members(&self) -> Option<&[TypeNamePair]> {
        match &self.kind {
            TypeKind::Struct { members, .. } | TypeKind::Union { members, .. } => Some(members),
            _ => None,
        }
    }

    pub fn offsets(&self) -> Option<&[u64]> {
        match &self.kind {
            TypeKind::Struct { offsets, .. } | TypeKind::Union { offsets, .. } => Some(offsets),
            _ => None,
        }
    }

    /// Structural equality as used by the checker: member names are
    /// ignored for struct/union, enum values are compared by name and
    /// value, sizes and offsets never participate.
    pub fn equivalent(&self, other: &Type) -> bool {
        if self.count != other.count {
            return false;
        }

        match (&self.kind, &other.kind) {
            (TypeKind::Ptr(a), TypeKind::Ptr(b)) | (TypeKind::Quaint(a), TypeKind::Quaint(b)) => {
                a.equivalent(b)
            }

            (
                TypeKind::Struct { members: ma, .. },
                TypeKind::Struct { members: mb, .. },
            )
            | (
                TypeKind::Union { members: ma, .. },
                TypeKind::Union { members: mb, .. },
            ) => {
                ma.len() == mb.len()
                    && ma
                        .iter()
                        .zip(mb.iter())
                        .all(|(a, b)| a.ty.equivalent(&b.ty))
            }

            (
                TypeKind::Fptr {
                    params: pa,
                    ret: ra,
                },
                TypeKind::Fptr {
                    params: pb,
                    ret: rb,
                },
            ) => {
                pa.len() == pb.len()
                    && pa
                        .iter()
                        .zip(pb.iter())
                        .all(|(a, b)| a.ty.equivalent(&b.ty))
                    && match (ra, rb) {
                        (None, None) => true,
                        (Some(a), Some(b)) => a.equivalent(b),
                        _ => false,
                    }
            }

            (
                TypeKind::Enum {
                    values: va,
                    underlying: ua,
                },
                TypeKind::Enum {
                    values: vb,
                    underlying: ub,
                },
            ) => va == vb && ua == ub,

            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }

    /// Compute `size` and `alignment`. Idempotent; recurses into aggregate
    /// members. Struct members are laid out at offsets aligned to their own
    /// alignment and the total is padded to the greatest member alignment.
    pub fn quantify(&mut self) {
        if self.size != 0 || matches!(self.kind, TypeKind::Void) {
            return;
        }

        if let Some(fixed) = self.kind.fixed_size() {
            self.size = fixed;
            self.alignment = fixed;
            return;
        }

        match &mut self.kind {
            TypeKind::Struct { members, offsets } => {
                let mut offset = 0u64;
                let mut greatest = 0u64;
                offsets.clear();

                for member in members.iter_mut() {
                    member.ty.quantify();
                    let size = member.ty.full_size();
                    let alignment = member.ty.alignment;
                    greatest = greatest.max(alignment);
                    offset = align_up(offset, alignment);
                    offsets.push(offset);
                    offset += size;
                }

                self.size = align_up(offset, greatest);
                self.alignment = greatest;
            }

            TypeKind::Union { members, offsets } => {
                let mut greatest_size = 0u64;
                let mut greatest_alignment = 0u64;
                offsets.clear();

                for member in members.iter_mut() {
                    member.ty.quantify();
                    greatest_size = greatest_size.max(member.ty.full_size());
                    greatest_alignment = greatest_alignment.max(member.ty.alignment);
                    offsets.push(0);
                }

                self.size = greatest_size;
                self.alignment = greatest_alignment;
            }

            _ => {}
        }
    }
}

impl TypeKind {
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            TypeKind::U8
                | TypeKind::I8
                | TypeKind::U16
                | TypeKind::I16
                | TypeKind::U32
                | TypeKind::I32
                | TypeKind::U64
                | TypeKind::I64
                | TypeKind::Usize
                | TypeKind::Ssize
                | TypeKind::Uptr
                | TypeKind::Iptr
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            TypeKind::I8
                | TypeKind::I16
                | TypeKind::I32
                | TypeKind::I64
                | TypeKind::Ssize
                | TypeKind::Iptr
        )
    }

    /// Fixed byte size of non-aggregate kinds; aggregates return None
    pub fn fixed_size(&self) -> Option<u64> {
        match self {
            TypeKind::U8 | TypeKind::I8 => Some(1),
            TypeKind::U16 | TypeKind::I16 => Some(2),
            TypeKind::U32 | TypeKind::I32 => Some(4),
            TypeKind::U64
            | TypeKind::I64
            | TypeKind::Usize
            | TypeKind::Ssize
            | TypeKind::Uptr
            | TypeKind::Iptr => Some(8),
            TypeKind::Ptr(_) | TypeKind::Vptr | TypeKind::Fptr { .. } | TypeKind::Quaint(_) => {
                Some(8)
            }
            TypeKind::Enum { underlying, .. } => underlying.fixed_size(),
            TypeKind::Void | TypeKind::Struct { .. } | TypeKind::Union { .. } => None,
        }
    }

    /// Flip an unsigned integer kind to its signed counterpart
    pub fn to_signed(&self) -> TypeKind {
        match self {
            TypeKind::U8 => TypeKind::I8,
            TypeKind::U16 => TypeKind::I16,
            TypeKind::U32 => TypeKind::I32,
            TypeKind::U64 => TypeKind::I64,
            TypeKind::Usize => TypeKind::Ssize,
            TypeKind::Uptr => TypeKind::Iptr,
            other => other.clone(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_count = |f: &mut fmt::Formatter<'_>, name: &str, count: u64| {
            if count == 1 {
                write!(f, "{}", name)
            } else {
                write!(f, "{}[{}]", name, count)
            }
        };

        match &self.kind {
            TypeKind::Void => write!(f, "void"),
            TypeKind::U8 => write_count(f, "u8", self.count),
            TypeKind::I8 => write_count(f, "i8", self.count),
            TypeKind::U16 => write_count(f, "u16", self.count),
            TypeKind::I16 => write_count(f, "i16", self.count),
            TypeKind::U32 => write_count(f, "u32", self.count),
            TypeKind::I32 => write_count(f, "i32", self.count),
            TypeKind::U64 => write_count(f, "u64", self.count),
            TypeKind::I64 => write_count(f, "i64", self.count),
            TypeKind::Usize => write_count(f, "usize", self.count),
            TypeKind::Ssize => write_count(f, "ssize", self.count),
            TypeKind::Uptr => write_count(f, "uptr", self.count),
            TypeKind::Iptr => write_count(f, "iptr", self.count),
            TypeKind::Vptr => write_count(f, "vptr", self.count),
            TypeKind::Ptr(sub) => {
                write_count(f, "ptr", self.count)?;
                write!(f, "({})", sub)
            }
            TypeKind::Quaint(sub) => {
                write_count(f, "quaint", self.count)?;
                write!(f, "({})", sub)
            }
            TypeKind::Fptr { params, ret } => {
                write_count(f, "fptr", self.count)?;
                write!(f, "(")?;
                for (idx, p) in params.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", p.name, p.ty)?;
                }
                write!(f, ")")?;
                if let Some(ret) = ret {
                    write!(f, ": {}", ret)?;
                }
                Ok(())
            }
            TypeKind::Struct { members, .. } | TypeKind::Union { members, .. } => {
                let name = if matches!(self.kind, TypeKind::Struct { .. }) {
                    "struct"
                } else {
                    "union"
                };
                write_count(f, name, self.count)?;
                write!(f, "(")?;
                for (idx, m) in members.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", m.name, m.ty)?;
                }
                write!(f, ")")
            }
            TypeKind::Enum { values, .. } => {
                write_count(f, "enum", self.count)?;
                write!(f, "(")?;
                for (idx, (name, value)) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, value)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Spellings accepted in type specifiers; every primitive has a word name
/// and most have a short alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeNameMatch {
    /// Complete without arguments
    Prim(&'static str),
    Ptr,
    Fptr,
    Quaint,
    Struct,
    Union,
    Enum,
}

pub fn match_type_name(name: &str) -> Option<TypeNameMatch> {
    let prim = |k| Some(TypeNameMatch::Prim(k));
    match name {
        "byte" | "u8" => prim("u8"),
        "sbyte" | "i8" => prim("i8"),
        "ushort" | "u16" => prim("u16"),
        "short" | "i16" => prim("i16"),
        "uint" | "u32" => prim("u32"),
        "int" | "i32" => prim("i32"),
        "ulong" | "u64" => prim("u64"),
        "long" | "i64" => prim("i64"),
        "usize" => prim("usize"),
        "ssize" => prim("ssize"),
        "uptr" => prim("uptr"),
        "iptr" => prim("iptr"),
        "vptr" => prim("vptr"),
        "ptr" => Some(TypeNameMatch::Ptr),
        "fptr" => Some(TypeNameMatch::Fptr),
        "quaint" => Some(TypeNameMatch::Quaint),
        "struct" => Some(TypeNameMatch::Struct),
        "union" => Some(TypeNameMatch::Union),
        "enum" => Some(TypeNameMatch::Enum),
        _ => None,
    }
}

/// Turn a primitive spelling into its kind
pub fn prim_kind(spelling: &str) -> Option<TypeKind> {
    match spelling {
        "u8" => Some(TypeKind::U8),
        "i8" => Some(TypeKind::I8),
        "u16" => Some(TypeKind::U16),
        "i16" => Some(TypeKind::I16),
        "u32" => Some(TypeKind::U32),
        "i32" => Some(TypeKind::I32),
        "u64" => Some(TypeKind::U64),
        "i64" => Some(TypeKind::I64),
        "usize" => Some(TypeKind::Usize),
        "ssize" => Some(TypeKind::Ssize),
        "uptr" => Some(TypeKind::Uptr),
        "iptr" => Some(TypeKind::Iptr),
        "vptr" => Some(TypeKind::Vptr),
        _ => None,
    }
}

/// Unit-wide table of named types. Append-only; duplicate names are
/// rejected. Using sites deep-copy their descriptor so quantification stays
/// local.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TypeTable {
    entries: Vec<(String, Type)>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, name: &str) -> Option<&Type> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Err(()) on duplicate name
    pub fn insert(&mut self, name: String, ty: Type) -> Result<(), ()> {
        if self.find(&name).is_some() {
            return Err(());
        }
        self.entries.push((name, ty));
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_sizes() {
        for (kind, size) in [
            (TypeKind::U8, 1),
            (TypeKind::I16, 2),
            (TypeKind::U32, 4),
            (TypeKind::I64, 8),
            (TypeKind::Usize, 8),
            (TypeKind::Uptr, 8),
        ] {
            let mut ty = Type::scalar(kind);
            ty.quantify();
            assert_eq!(ty.size, size);
            assert_eq!(ty.alignment, size);
        }
    }

    #[test]
    fn test_struct_layout() {
        // struct(x: u8, y: u32): offsets [0, 4], size 8, alignment 4
        let mut ty = Type::scalar(TypeKind::Struct {
            members: vec![
                TypeNamePair {
                    name: "x".to_string(),
                    ty: Type::scalar(TypeKind::U8),
                },
                TypeNamePair {
                    name: "y".to_string(),
                    ty: Type::scalar(TypeKind::U32),
                },
            ],
            offsets: Vec::new(),
        });
        ty.quantify();
        assert_eq!(ty.offsets().unwrap(), &[0, 4]);
        assert_eq!(ty.size, 8);
        assert_eq!(ty.alignment, 4);
        assert_eq!(ty.size % ty.alignment, 0);
    }

    #[test]
    fn test_union_layout() {
        let mut ty = Type::scalar(TypeKind::Union {
            members: vec![
                TypeNamePair {
                    name: "a".to_string(),
                    ty: Type::scalar(TypeKind::U16),
                },
                TypeNamePair {
                    name: "b".to_string(),
                    ty: Type::scalar(TypeKind::U64),
                },
            ],
            offsets: Vec::new(),
        });
        ty.quantify();
        assert_eq!(ty.size, 8);
        assert_eq!(ty.alignment, 8);
    }

    #[test]
    fn test_array_full_size() {
        let mut ty = Type::array(TypeKind::U32, 4);
        ty.quantify();
        assert_eq!(ty.size, 4);
        assert_eq!(ty.full_size(), 16);
    }

    #[test]
    fn test_alignment_power_of_two() {
        let mut ty = Type::ptr_to(Type::scalar(TypeKind::U8));
        ty.quantify();
        assert!(ty.alignment.is_power_of_two());
        assert!(ty.alignment <= 8);
    }

    #[test]
    fn test_quantify_idempotent() {
        let mut ty = Type::scalar(TypeKind::U32);
        ty.quantify();
        ty.quantify();
        assert_eq!(ty.size, 4);
    }

    #[test]
    fn test_equivalence_ignores_member_names() {
        let a = Type::scalar(TypeKind::Struct {
            members: vec![TypeNamePair {
                name: "x".to_string(),
                ty: Type::scalar(TypeKind::U8),
            }],
            offsets: Vec::new(),
        });
        let b = Type::scalar(TypeKind::Struct {
            members: vec![TypeNamePair {
                name: "y".to_string(),
                ty: Type::scalar(TypeKind::U8),
            }],
            offsets: Vec::new(),
        });
        assert!(a.equivalent(&b));
    }

    #[test]
    fn test_equivalence_rejects_count_mismatch() {
        let a = Type::array(TypeKind::U8, 2);
        let b = Type::scalar(TypeKind::U8);
        assert!(!a.equivalent(&b));
    }

    #[test]
    fn test_enum_size_from_underlying() {
        let mut ty = Type::scalar(TypeKind::Enum {
            values: vec![("a".to_string(), 0), ("b".to_string(), 1)],
            underlying: Box::new(TypeKind::U16),
        });
        ty.quantify();
        assert_eq!(ty.size, 2);
    }

    #[test]
    fn test_type_table_duplicates() {
        let mut table = TypeTable::new();
        assert!(table
            .insert("point".to_string(), Type::scalar(TypeKind::U8))
            .is_ok());
        assert!(table
            .insert("point".to_string(), Type::scalar(TypeKind::U16))
            .is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_spellings() {
        assert_eq!(match_type_name("byte"), Some(TypeNameMatch::Prim("u8")));
        assert_eq!(match_type_name("long"), Some(TypeNameMatch::Prim("i64")));
        assert_eq!(match_type_name("ptr"), Some(TypeNameMatch::Ptr));
        assert_eq!(match_type_name("widget"), None);
    }
}
