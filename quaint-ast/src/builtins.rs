use crate::types::{Type, TypeKind, TypeNamePair};
use serde::{Deserialize, Serialize};

/// Built-in constants injected into the unit scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BconId {
    Null = 0,
    True = 1,
    False = 2,
}

pub const BCON_COUNT: usize = 3;

impl BconId {
    pub fn name(self) -> &'static str {
        match self {
            BconId::Null => "null",
            BconId::True => "true",
            BconId::False => "false",
        }
    }

    pub fn value(self) -> u64 {
        match self {
            BconId::Null => 0,
            BconId::True => 1,
            BconId::False => 0,
        }
    }

    pub fn ty(self) -> Type {
        match self {
            BconId::Null => Type::scalar(TypeKind::Vptr),
            BconId::True | BconId::False => Type::scalar(TypeKind::U8),
        }
    }

    pub fn all() -> [BconId; BCON_COUNT] {
        [BconId::Null, BconId::True, BconId::False]
    }
}

/// Built-in functions. The ids double as entry locations: the instruction
/// stream opens with one `bfun` opcode per id, so calling built-in `k`
/// jumps the instruction pointer to `k`. Id 0 is reserved and never
/// callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BfunId {
    Reserved = 0,
    Monotime = 1,
    Malloc = 2,
    Calloc = 3,
    Realloc = 4,
    Free = 5,
    Ps = 6,
    Pu8 = 7,
    Pi8 = 8,
    Pu16 = 9,
    Pi16 = 10,
    Pu32 = 11,
    Pi32 = 12,
    Pu64 = 13,
    Pi64 = 14,
    Pnl = 15,
    Exit = 16,
}

pub const BFUN_COUNT: usize = 17;

impl BfunId {
    pub fn name(self) -> &'static str {
        match self {
            BfunId::Reserved => "",
            BfunId::Monotime => "monotime",
            BfunId::Malloc => "malloc",
            BfunId::Calloc => "calloc",
            BfunId::Realloc => "realloc",
            BfunId::Free => "free",
            BfunId::Ps => "ps",
            BfunId::Pu8 => "pu8",
            BfunId::Pi8 => "pi8",
            BfunId::Pu16 => "pu16",
            BfunId::Pi16 => "pi16",
            BfunId::Pu32 => "pu32",
            BfunId::Pi32 => "pi32",
            BfunId::Pu64 => "pu64",
            BfunId::Pi64 => "pi64",
            BfunId::Pnl => "pnl",
            BfunId::Exit => "exit",
        }
    }

    /// Parameter name/type list of the built-in's signature
    pub fn params(self) -> Vec<TypeNamePair> {
        let pair = |name: &str, kind: TypeKind| TypeNamePair {
            name: name.to_string(),
            ty: Type::scalar(kind),
        };

        match self {
            BfunId::Reserved | BfunId::Monotime | BfunId::Pnl => Vec::new(),
            BfunId::Malloc | BfunId::Calloc => vec![pair("size", TypeKind::Usize)],
            BfunId::Realloc => vec![
                pair("oldptr", TypeKind::Vptr),
                pair("newsize", TypeKind::Usize),
            ],
            BfunId::Free => vec![pair("ptr", TypeKind::Vptr)],
            BfunId::Ps => vec![TypeNamePair {
                name: "str".to_string(),
                ty: Type::ptr_to(Type::scalar(TypeKind::U8)),
            }],
            BfunId::Pu8 => vec![pair("num", TypeKind::U8)],
            BfunId::Pi8 => vec![pair("num", TypeKind::I8)],
            BfunId::Pu16 => vec![pair("num", TypeKind::U16)],
            BfunId::Pi16 => vec![pair("num", TypeKind::I16)],
            BfunId::Pu32 => vec![pair("num", TypeKind::U32)],
            BfunId::Pi32 => vec![pair("num", TypeKind::I32)],
            BfunId::Pu64 => vec![pair("num", TypeKind::U64)],
            BfunId::Pi64 => vec![pair("num", TypeKind::I64)],
            BfunId::Exit => vec![pair("status", TypeKind::I32)],
        }
    }

    pub fn ret(self) -> Option<Type> {
        match self {
            BfunId::Monotime => Some(Type::scalar(TypeKind::U64)),
            BfunId::Malloc | BfunId::Calloc | BfunId::Realloc => {
                Some(Type::scalar(TypeKind::Vptr))
            }
            _ => None,
        }
    }

    /// The function-pointer type a reference to this built-in has
    pub fn fptr_type(self) -> Type {
        Type::scalar(TypeKind::Fptr {
            params: self.params(),
            ret: self.ret().map(Box::new),
        })
    }

    /// Every injectable built-in (the reserved id is skipped)
    pub fn all() -> impl Iterator<Item = BfunId> {
        (1..BFUN_COUNT as u8).filter_map(BfunId::from_u8)
    }

    pub fn from_u8(id: u8) -> Option<BfunId> {
        match id {
            0 => Some(BfunId::Reserved),
            1 => Some(BfunId::Monotime),
            2 => Some(BfunId::Malloc),
            3 => Some(BfunId::Calloc),
            4 => Some(BfunId::Realloc),
            5 => Some(BfunId::Free),
            6 => Some(BfunId::Ps),
            7 => Some(BfunId::Pu8),
            8 => Some(BfunId::Pi8),
            9 => Some(BfunId::Pu16),
            10 => Some(BfunId::Pi16),
            11 => Some(BfunId::Pu32),
            12 => Some(BfunId::Pi32),
            13 => Some(BfunId::Pu64),
            14 => Some(BfunId::Pi64),
            15 => Some(BfunId::Pnl),
            16 => Some(BfunId::Exit),
            _ => None,
        }
    }

    pub fn from_u64(id: u64) -> Option<BfunId> {
        u8::try_from(id).ok().and_then(BfunId::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable() {
        assert_eq!(BfunId::Monotime as u8, 1);
        assert_eq!(BfunId::Exit as u8, 16);
        assert_eq!(BfunId::all().count(), BFUN_COUNT - 1);
    }

    #[test]
    fn test_roundtrip() {
        for id in BfunId::all() {
            assert_eq!(BfunId::from_u8(id as u8), Some(id));
        }
    }

    #[test]
    fn test_signatures() {
        let malloc = BfunId::Malloc.fptr_type();
        match malloc.kind {
            TypeKind::Fptr { params, ret } => {
                assert_eq!(params.len(), 1);
                assert_eq!(params[0].ty.kind, TypeKind::Usize);
                assert_eq!(ret.unwrap().kind, TypeKind::Vptr);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_const_values() {
        assert_eq!(BconId::Null.value(), 0);
        assert_eq!(BconId::True.value(), 1);
        assert_eq!(BconId::False.value(), 0);
        assert_eq!(BconId::Null.ty().kind, TypeKind::Vptr);
    }
}
