use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// The kind of a value on the Lua stack or behind a [`Ref`](crate::Ref).
///
/// Each kind occupies one bit so kinds can be combined into a [`KindSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Kind {
    /// No value at all (empty handle, position past the top).
    None = 1 << 0,
    Nil = 1 << 1,
    Bool = 1 << 2,
    /// Raw pointer without a metatable.
    LightPointer = 1 << 3,
    /// Float-subtype number.
    Number = 1 << 4,
    String = 1 << 5,
    /// Full userdata; may carry a metatable.
    OpaqueObject = 1 << 6,
    Thread = 1 << 7,
    /// A C function registered from the host.
    NativeFunction = 1 << 8,
    /// Integer-subtype number.
    Integer = 1 << 9,
    Table = 1 << 10,
    /// A function compiled from script source.
    Function = 1 << 11,
}

impl Kind {
    /// Every kind, in bit order.
    pub const ALL: [Kind; 12] = [
        Kind::None,
        Kind::Nil,
        Kind::Bool,
        Kind::LightPointer,
        Kind::Number,
        Kind::String,
        Kind::OpaqueObject,
        Kind::Thread,
        Kind::NativeFunction,
        Kind::Integer,
        Kind::Table,
        Kind::Function,
    ];

    /// The bit this kind occupies in a [`KindSet`].
    pub const fn bit(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::None => "None",
            Kind::Nil => "Nil",
            Kind::Bool => "Bool",
            Kind::LightPointer => "LightPointer",
            Kind::Number => "Number",
            Kind::String => "String",
            Kind::OpaqueObject => "OpaqueObject",
            Kind::Thread => "Thread",
            Kind::NativeFunction => "NativeFunction",
            Kind::Integer => "Integer",
            Kind::Table => "Table",
            Kind::Function => "Function",
        }
    }

    /// Whether a value of this kind is callable.
    pub fn is_callable(self) -> bool {
        matches!(self, Kind::Function | Kind::NativeFunction)
    }

    /// Whether a value of this kind is a number of either subtype.
    pub fn is_number(self) -> bool {
        matches!(self, Kind::Number | Kind::Integer)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of [`Kind`]s.
///
/// Used to declare which kinds a host type can be received from and to
/// filter field lookups by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KindSet {
    mask: u16,
}

impl KindSet {
    pub const EMPTY: KindSet = KindSet { mask: 0 };
    pub const ALL: KindSet = KindSet { mask: (1 << 12) - 1 };
    /// Every kind a live value can have.
    pub const VALUES: KindSet = KindSet::ALL.without(Kind::None);
    /// Every kind except `None` and `Nil`.
    pub const NON_NIL: KindSet = KindSet::VALUES.without(Kind::Nil);
    pub const NUMBERS: KindSet = KindSet::of(Kind::Number).with(Kind::Integer);
    pub const CALLABLE: KindSet = KindSet::of(Kind::Function).with(Kind::NativeFunction);

    pub const fn of(kind: Kind) -> Self {
        KindSet { mask: kind.bit() }
    }

    pub const fn with(self, kind: Kind) -> Self {
        KindSet { mask: self.mask | kind.bit() }
    }

    pub const fn without(self, kind: Kind) -> Self {
        KindSet { mask: self.mask & !kind.bit() }
    }

    pub const fn union(self, other: KindSet) -> Self {
        KindSet { mask: self.mask | other.mask }
    }

    pub const fn contains(self, kind: Kind) -> bool {
        self.mask & kind.bit() != 0
    }

    pub const fn intersects(self, other: KindSet) -> bool {
        self.mask & other.mask != 0
    }

    pub const fn is_empty(self) -> bool {
        self.mask == 0
    }

    pub const fn bits(self) -> u16 {
        self.mask
    }

    pub fn iter(self) -> impl Iterator<Item = Kind> {
        Kind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl From<Kind> for KindSet {
    fn from(kind: Kind) -> Self {
        KindSet::of(kind)
    }
}

impl BitOr for Kind {
    type Output = KindSet;

    fn bitor(self, rhs: Kind) -> KindSet {
        KindSet::of(self).with(rhs)
    }
}

impl BitOr<Kind> for KindSet {
    type Output = KindSet;

    fn bitor(self, rhs: Kind) -> KindSet {
        self.with(rhs)
    }
}

impl BitOr for KindSet {
    type Output = KindSet;

    fn bitor(self, rhs: KindSet) -> KindSet {
        self.union(rhs)
    }
}

impl BitOrAssign<Kind> for KindSet {
    fn bitor_assign(&mut self, rhs: Kind) {
        *self = self.with(rhs);
    }
}

impl fmt::Display for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("nothing");
        }
        for (i, kind) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(kind.name())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_are_distinct() {
        let mut seen = 0u16;
        for kind in Kind::ALL {
            assert_eq!(seen & kind.bit(), 0, "{} overlaps", kind);
            seen |= kind.bit();
        }
        assert_eq!(seen, KindSet::ALL.bits());
    }

    #[test]
    fn test_set_operations() {
        let set = Kind::Integer | Kind::Number;
        assert!(set.contains(Kind::Integer));
        assert!(set.contains(Kind::Number));
        assert!(!set.contains(Kind::String));
        assert_eq!(set, KindSet::NUMBERS);
        assert!(set.intersects(KindSet::of(Kind::Number)));
        assert!(!set.intersects(KindSet::of(Kind::Table)));
    }

    #[test]
    fn test_value_sets() {
        assert!(!KindSet::VALUES.contains(Kind::None));
        assert!(KindSet::VALUES.contains(Kind::Nil));
        assert!(!KindSet::NON_NIL.contains(Kind::Nil));
        assert!(KindSet::NON_NIL.contains(Kind::Table));
    }

    #[test]
    fn test_display() {
        assert_eq!(Kind::OpaqueObject.to_string(), "OpaqueObject");
        assert_eq!((Kind::Number | Kind::Integer).to_string(), "Number|Integer");
        assert_eq!(KindSet::EMPTY.to_string(), "nothing");
    }
}
