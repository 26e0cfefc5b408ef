use mlua_sys as ffi;

use super::Ref;
use crate::stack::{Kind, StackGuard};

/// Iterator over the raw `(key, value)` pairs of a table, in `lua_next`
/// order.
///
/// The current key is kept in its own registry slot, reused at every
/// step. Inserting new keys into the table while iterating is not
/// supported; assigning to existing fields is.
pub struct RefIter<'a> {
    table: &'a Ref,
    key: Ref,
}

impl<'a> RefIter<'a> {
    pub(crate) fn new(table: &'a Ref) -> Self {
        // Start from a nil key; a non-table yields nothing.
        let key = match table.anchor() {
            Some(anchor) if table.holds(Kind::Table) => Ref {
                anchor: Some(anchor.clone()),
                slot: ffi::LUA_REFNIL,
            },
            _ => Ref::empty(),
        };
        RefIter { table, key }
    }

    /// Whether iteration has finished.
    pub fn is_done(&self) -> bool {
        !self.key.is_valid()
    }
}

impl Iterator for RefIter<'_> {
    type Item = (Ref, Ref);

    fn next(&mut self) -> Option<(Ref, Ref)> {
        if self.is_done() {
            return None;
        }
        let (Some(stack), Some(anchor)) = (self.table.stack(), self.table.anchor().cloned())
        else {
            self.key.destroy();
            return None;
        };
        let _guard = StackGuard::new(stack);
        if !stack.ensure(4) {
            self.key.destroy();
            return None;
        }
        self.table.push_onto(stack);
        if stack.kind(-1) != Kind::Table {
            self.key.destroy();
            return None;
        }
        self.key.push_onto(stack);
        if unsafe { ffi::lua_next(stack.as_ptr(), -2) } == 0 {
            self.key.destroy();
            return None;
        }
        // [table, key, value]
        let value = Ref::pop_from(anchor.clone(), stack);
        let key = Ref::capture(anchor.clone(), stack, -1);
        self.key.replace_from_top(&anchor, stack);
        Some((key, value))
    }
}
