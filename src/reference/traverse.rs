//! Depth-first walk over nested tables.

use super::Ref;
use crate::stack::Kind;

/// Options of one walk.
#[derive(Clone, Copy)]
struct Walk {
    keys: bool,
    values: bool,
    max_depth: usize,
}

impl Ref {
    /// Visit every raw pair of this table, then descend into pairs whose
    /// key and/or value is a table.
    ///
    /// The visitor receives each pair by value. A table already on the
    /// path from the root is not entered again. With `max_depth` 0 or 1
    /// only the root's entries are visited; `usize::MAX` means no limit.
    ///
    /// # Arguments
    /// - `visitor`: called once per pair, before the walk decides whether to descend
    /// - `traverse_keys`: descend into tables used as keys
    /// - `traverse_values`: descend into tables stored as values
    /// - `max_depth`: number of table levels visited
    pub fn traverse<F>(&self, mut visitor: F, traverse_keys: bool, traverse_values: bool, max_depth: usize)
    where
        F: FnMut((Ref, Ref)),
    {
        let walk = Walk {
            keys: traverse_keys,
            values: traverse_values,
            max_depth,
        };
        let mut visit = |(key, value): (Ref, Ref), descend: bool| {
            let next_key = (descend && walk.keys && key.holds(Kind::Table)).then(|| key.clone());
            let next_value =
                (descend && walk.values && value.holds(Kind::Table)).then(|| value.clone());
            visitor((key, value));
            (next_key, next_value)
        };
        let mut ancestors = Vec::new();
        self.walk(&mut visit, walk, 0, &mut ancestors);
    }

    /// Like [`traverse`](Ref::traverse), but the visitor borrows each pair.
    ///
    /// The walk descends into the pair as the visitor left it.
    pub fn traverse_mut<F>(
        &self,
        mut visitor: F,
        traverse_keys: bool,
        traverse_values: bool,
        max_depth: usize,
    ) where
        F: FnMut(&mut (Ref, Ref)),
    {
        let walk = Walk {
            keys: traverse_keys,
            values: traverse_values,
            max_depth,
        };
        let mut visit = |mut pair: (Ref, Ref), descend: bool| {
            visitor(&mut pair);
            let (key, value) = pair;
            let next_key = (descend && walk.keys && key.holds(Kind::Table)).then_some(key);
            let next_value = (descend && walk.values && value.holds(Kind::Table)).then_some(value);
            (next_key, next_value)
        };
        let mut ancestors = Vec::new();
        self.walk(&mut visit, walk, 0, &mut ancestors);
    }

    fn walk<V>(&self, visit: &mut V, walk: Walk, level: usize, ancestors: &mut Vec<Ref>)
    where
        V: FnMut((Ref, Ref), bool) -> (Option<Ref>, Option<Ref>),
    {
        if !self.holds(Kind::Table) {
            return;
        }
        ancestors.push(self.clone());
        let descend = level.saturating_add(1) < walk.max_depth;
        for pair in self.iter() {
            let (next_key, next_value) = visit(pair, descend);
            for table in [next_key, next_value].into_iter().flatten() {
                // Raw equality against the path, handles may use different slots.
                if ancestors.iter().any(|ancestor| *ancestor == table) {
                    continue;
                }
                table.walk(visit, walk, level + 1, ancestors);
            }
        }
        ancestors.pop();
    }
}
