//! Word decomposition of types: the single place that decides how many
//! machine words a value of some type occupies and how wide each word is.
//!
//! Every stage (HLIR building, MLIR signatures, wasm lowering) reads layout
//! from here or from the `RegisterInfo` it produced, never re-deriving it.

use crate::ast::{EnumTypeDefn, Type};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Width and signedness of one word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeInfo {
    pub size: u32,
    pub signed: bool,
}

impl TypeInfo {
    pub const INT: TypeInfo = TypeInfo {
        size: 8,
        signed: true,
    };
    pub const BOOL: TypeInfo = TypeInfo {
        size: 1,
        signed: false,
    };
    pub const BYTE: TypeInfo = TypeInfo {
        size: 1,
        signed: false,
    };
    /// Addresses in linear memory.
    pub const POINTER: TypeInfo = TypeInfo {
        size: 4,
        signed: false,
    };

    pub const fn new(size: u32, signed: bool) -> Self {
        Self { size, signed }
    }
}

/// Size in bytes used when a register carries no metadata.
pub const DEFAULT_WORD_SIZE: u32 = 4;

/// One word of a decomposed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Word {
    pub info: TypeInfo,
    /// The word holds an address rather than a scalar.
    pub pointer: bool,
}

impl Word {
    fn scalar(info: TypeInfo) -> Self {
        Self {
            info,
            pointer: false,
        }
    }

    fn pointer() -> Self {
        Self {
            info: TypeInfo::POINTER,
            pointer: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("sum type `{0}` has no machine representation")]
    SumType(String),
    #[error("array element type `{0}` occupies more than one word")]
    MultiWordElement(String),
}

/// Type name -> layout of its single word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeInformation {
    sizes: BTreeMap<String, TypeInfo>,
}

impl Default for TypeInformation {
    fn default() -> Self {
        let mut sizes = BTreeMap::new();
        sizes.insert("int".to_string(), TypeInfo::INT);
        sizes.insert("bool".to_string(), TypeInfo::BOOL);
        sizes.insert("byte".to_string(), TypeInfo::BYTE);
        sizes.insert("string".to_string(), TypeInfo::POINTER);
        for bits in [8u32, 16, 32, 64] {
            sizes.insert(format!("int{}", bits), TypeInfo::new(bits / 8, true));
            sizes.insert(format!("uint{}", bits), TypeInfo::new(bits / 8, false));
        }
        Self { sizes }
    }
}

impl TypeInformation {
    pub fn insert(&mut self, name: impl Into<String>, info: TypeInfo) {
        self.sizes.insert(name.into(), info);
    }

    pub fn get(&self, name: &str) -> Option<TypeInfo> {
        self.sizes.get(name).copied()
    }

    /// Layout of a scalar type's single word. Aliases use their own entry when
    /// one exists and fall back to the base type.
    pub fn scalar(&self, ty: &Type) -> TypeInfo {
        match ty {
            Type::Alias { name, base } => self.get(name).unwrap_or_else(|| self.scalar(base)),
            Type::Sized { signed, bits } => self
                .get(&ty.canonical_name())
                .unwrap_or(TypeInfo::new((*bits / 8).max(1), *signed)),
            Type::Int => self.get("int").unwrap_or(TypeInfo::INT),
            Type::Bool => self.get("bool").unwrap_or(TypeInfo::BOOL),
            Type::Byte => self.get("byte").unwrap_or(TypeInfo::BYTE),
            Type::Str => self.get("string").unwrap_or(TypeInfo::POINTER),
            Type::Enum(_) => self.get("int").unwrap_or(TypeInfo::INT),
            Type::Slice(_) | Type::Array(..) | Type::Sum(_) | Type::Tuple(_) => TypeInfo::POINTER,
        }
    }

    /// Words a value of `ty` occupies when passed across a call boundary.
    /// Slices and strings are `(length, pointer)`, arrays one word per
    /// element, enums their constructor index followed by the widest payload.
    pub fn words(&self, ty: &Type) -> Result<Vec<Word>, LayoutError> {
        match ty {
            Type::Alias { name, base } => match self.get(name) {
                Some(info) => Ok(vec![Word::scalar(info)]),
                None => self.words(base),
            },
            Type::Str | Type::Slice(_) => Ok(vec![Word::scalar(self.length()), Word::pointer()]),
            Type::Array(base, size) => {
                let elem = self.element(base)?;
                Ok(vec![Word::scalar(elem); *size as usize])
            }
            Type::Enum(e) => self.enum_words(e),
            Type::Tuple(fields) => {
                let mut out = Vec::new();
                for field in fields {
                    out.extend(self.words(&field.typ)?);
                }
                Ok(out)
            }
            Type::Sum(_) => Err(LayoutError::SumType(ty.canonical_name())),
            Type::Int | Type::Bool | Type::Byte | Type::Sized { .. } => {
                Ok(vec![Word::scalar(self.scalar(ty))])
            }
        }
    }

    /// Layout of the length word of a slice or string.
    pub fn length(&self) -> TypeInfo {
        self.get("int").unwrap_or(TypeInfo::INT)
    }

    /// Layout of one element of an array or slice. Elements must be a single
    /// word; nested aggregates are rejected.
    pub fn element(&self, elem: &Type) -> Result<TypeInfo, LayoutError> {
        let words = self.words(elem)?;
        match words.as_slice() {
            [w] => Ok(w.info),
            _ => Err(LayoutError::MultiWordElement(elem.canonical_name())),
        }
    }

    /// Constructor index word followed by the widest constructor payload.
    pub fn enum_words(&self, e: &EnumTypeDefn) -> Result<Vec<Word>, LayoutError> {
        let mut widest: Vec<Word> = Vec::new();
        for option in &e.options {
            let mut payload = Vec::new();
            for param in &option.params {
                payload.extend(self.words(param)?);
            }
            if payload.len() > widest.len() {
                widest = payload;
            }
        }
        let mut out = vec![Word::scalar(self.scalar(&Type::Int))];
        out.extend(widest);
        Ok(out)
    }

    /// Word offset of each payload parameter of `constructor`, relative to the
    /// first payload word, paired with its width in words.
    pub fn payload_offsets(
        &self,
        e: &EnumTypeDefn,
        constructor: &str,
    ) -> Result<Vec<(usize, usize)>, LayoutError> {
        let mut out = Vec::new();
        let mut at = 0;
        if let Some(option) = e.option(constructor) {
            for param in &option.params {
                let n = self.words(param)?.len();
                out.push((at, n));
                at += n;
            }
        }
        Ok(out)
    }
}

/// Number of bytes a raw string literal occupies once its escapes are
/// decoded (`\n` counts once).
pub fn string_byte_len(raw: &str) -> usize {
    unescape(raw).len()
}

/// Decodes the escape sequences a source string literal may carry.
pub fn unescape(raw: &str) -> Vec<u8> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let decoded = match bytes[i + 1] {
                b'n' => Some(b'\n'),
                b't' => Some(b'\t'),
                b'r' => Some(b'\r'),
                b'0' => Some(0),
                b'\\' => Some(b'\\'),
                b'"' => Some(b'"'),
                b'\'' => Some(b'\''),
                _ => None,
            };
            if let Some(b) = decoded {
                out.push(b);
                i += 2;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EnumOption, VarWithType};

    fn option_enum() -> EnumTypeDefn {
        EnumTypeDefn {
            name: "Maybe".to_string(),
            options: vec![
                EnumOption {
                    constructor: "Nothing".to_string(),
                    params: vec![],
                },
                EnumOption {
                    constructor: "Just".to_string(),
                    params: vec![Type::Int, Type::Byte],
                },
            ],
        }
    }

    #[test]
    fn slices_and_strings_are_length_pointer_pairs() {
        let types = TypeInformation::default();
        for ty in [Type::Str, Type::slice(Type::Byte)] {
            let words = types.words(&ty).unwrap();
            assert_eq!(words.len(), 2);
            assert_eq!(words[0].info, TypeInfo::INT);
            assert!(!words[0].pointer);
            assert!(words[1].pointer);
        }
    }

    #[test]
    fn arrays_take_one_word_per_element() {
        let types = TypeInformation::default();
        let words = types.words(&Type::array(Type::Byte, 3)).unwrap();
        assert_eq!(words.len(), 3);
        assert!(words.iter().all(|w| w.info == TypeInfo::BYTE));
    }

    #[test]
    fn enum_words_use_the_widest_payload() {
        let types = TypeInformation::default();
        let words = types.enum_words(&option_enum()).unwrap();
        assert_eq!(words.len(), 3);
        assert_eq!(words[2].info, TypeInfo::BYTE);
        let offsets = types.payload_offsets(&option_enum(), "Just").unwrap();
        assert_eq!(offsets, vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn tuples_concatenate_their_fields() {
        let types = TypeInformation::default();
        let tuple = Type::Tuple(vec![
            VarWithType::new("a", Type::Int),
            VarWithType::new("b", Type::Str),
        ]);
        assert_eq!(types.words(&tuple).unwrap().len(), 3);
    }

    #[test]
    fn sum_types_are_rejected() {
        let types = TypeInformation::default();
        let err = types.words(&Type::Sum(vec![Type::Int, Type::Str])).unwrap_err();
        assert_eq!(err, LayoutError::SumType("int | string".to_string()));
    }

    #[test]
    fn alias_overrides_win_over_base() {
        let mut types = TypeInformation::default();
        types.insert("Age", TypeInfo::new(2, false));
        let ty = Type::alias("Age", Type::Int);
        assert_eq!(types.scalar(&ty), TypeInfo::new(2, false));
        assert_eq!(types.scalar(&Type::alias("Count", Type::Int)), TypeInfo::INT);
    }

    #[test]
    fn escapes_count_once() {
        assert_eq!(string_byte_len("Hello, world!\\n"), 14);
        assert_eq!(unescape("a\\tb"), b"a\tb".to_vec());
        assert_eq!(unescape("\\q"), b"\\q".to_vec());
    }
}
