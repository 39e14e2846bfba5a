//! The Anzu type model.
//!
//! A [`TypeName`] is a structural description of a type: either a
//! fundamental/user name or a compound built from inner types. Equality
//! and hashing are structural (derived, recursing into children), which
//! is what lets compound types key hash maps such as the builtin
//! registry and the [`TypeStore`].
//!
//! The store maps user record names to their ordered field lists and
//! owns the layout rules: every value has a statically known byte size,
//! records are laid out in declaration order with no padding.

use std::collections::HashMap;
use std::fmt;

pub const I32: &str = "i32";
pub const I64: &str = "i64";
pub const U64: &str = "u64";
pub const F64: &str = "f64";
pub const CHAR: &str = "char";
pub const BOOL: &str = "bool";
pub const NULL: &str = "null";

/// A structural type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeName {
    /// A fundamental type or a user record, by name.
    Simple(String),
    /// Fixed-size array: `[T; N]`.
    List { inner: Box<TypeName>, count: u64 },
    /// 8-byte tagged pointer: `T&`.
    Ptr { inner: Box<TypeName> },
    /// (pointer, length) pair: `T[]`. 16 bytes.
    Span { inner: Box<TypeName> },
    /// 8-byte pointer dereferenced implicitly by the lvalue rules.
    Reference { inner: Box<TypeName> },
    /// 8-byte code address: `fn(T, ...) -> T`.
    FnPtr {
        params: Vec<TypeName>,
        return_type: Box<TypeName>,
    },
}

pub fn i32_type() -> TypeName {
    TypeName::Simple(I32.to_string())
}

pub fn i64_type() -> TypeName {
    TypeName::Simple(I64.to_string())
}

pub fn u64_type() -> TypeName {
    TypeName::Simple(U64.to_string())
}

pub fn f64_type() -> TypeName {
    TypeName::Simple(F64.to_string())
}

pub fn char_type() -> TypeName {
    TypeName::Simple(CHAR.to_string())
}

pub fn bool_type() -> TypeName {
    TypeName::Simple(BOOL.to_string())
}

pub fn null_type() -> TypeName {
    TypeName::Simple(NULL.to_string())
}

pub fn list_of(inner: TypeName, count: u64) -> TypeName {
    TypeName::List {
        inner: Box::new(inner),
        count,
    }
}

pub fn ptr_to(inner: TypeName) -> TypeName {
    TypeName::Ptr {
        inner: Box::new(inner),
    }
}

pub fn span_of(inner: TypeName) -> TypeName {
    TypeName::Span {
        inner: Box::new(inner),
    }
}

pub fn reference_to(inner: TypeName) -> TypeName {
    TypeName::Reference {
        inner: Box::new(inner),
    }
}

impl TypeName {
    pub fn is_fundamental(&self) -> bool {
        matches!(
            self,
            TypeName::Simple(name)
                if matches!(name.as_str(), I32 | I64 | U64 | F64 | CHAR | BOOL | NULL)
        )
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, TypeName::Ptr { .. })
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeName::Simple(name) => write!(f, "{}", name),
            TypeName::List { inner, count } => write!(f, "list<{}, {}>", inner, count),
            TypeName::Ptr { inner } => write!(f, "ptr<{}>", inner),
            TypeName::Span { inner } => write!(f, "span<{}>", inner),
            TypeName::Reference { inner } => write!(f, "ref<{}>", inner),
            TypeName::FnPtr {
                params,
                return_type,
            } => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", return_type)
            }
        }
    }
}

// ── Type store ───────────────────────────────────────────────────────

/// A named field of a user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: TypeName,
}

/// Registry of user record layouts, keyed by the record's simple name.
/// Registration is monotonic: a name's layout (and hence its size)
/// never changes once added.
#[derive(Debug, Default)]
pub struct TypeStore {
    classes: HashMap<TypeName, Vec<Field>>,
}

impl TypeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record. Returns false if the name is already taken
    /// (including the fundamental names).
    pub fn add(&mut self, name: &TypeName, fields: Vec<Field>) -> bool {
        if name.is_fundamental() || self.classes.contains_key(name) {
            return false;
        }
        self.classes.insert(name.clone(), fields);
        true
    }

    pub fn contains(&self, t: &TypeName) -> bool {
        match t {
            TypeName::Simple(_) => t.is_fundamental() || self.classes.contains_key(t),
            TypeName::List { inner, .. }
            | TypeName::Ptr { inner }
            | TypeName::Span { inner }
            | TypeName::Reference { inner } => self.contains(inner),
            TypeName::FnPtr {
                params,
                return_type,
            } => params.iter().all(|p| self.contains(p)) && self.contains(return_type),
        }
    }

    pub fn fields_of(&self, t: &TypeName) -> Option<&[Field]> {
        self.classes.get(t).map(|f| f.as_slice())
    }

    /// Byte offset and type of a record field, laid out in declaration
    /// order with no padding.
    pub fn field_offset(&self, t: &TypeName, field: &str) -> Option<(u64, &TypeName)> {
        let fields = self.classes.get(t)?;
        let mut offset = 0;
        for f in fields {
            if f.name == field {
                return Some((offset, &f.ty));
            }
            offset += self.size_of(&f.ty);
        }
        None
    }

    /// The byte size of any registered type.
    pub fn size_of(&self, t: &TypeName) -> u64 {
        match t {
            TypeName::Simple(name) => match name.as_str() {
                I32 => 4,
                I64 | U64 | F64 => 8,
                CHAR | BOOL | NULL => 1,
                _ => self
                    .classes
                    .get(t)
                    .expect("size_of called with an unregistered type")
                    .iter()
                    .map(|f| self.size_of(&f.ty))
                    .sum(),
            },
            TypeName::List { inner, count } => count * self.size_of(inner),
            TypeName::Ptr { .. } | TypeName::Reference { .. } | TypeName::FnPtr { .. } => 8,
            TypeName::Span { .. } => 16,
        }
    }
}
