// Hybrid table: a dense array part for integer keys 1..N plus a chained
// hash part for everything else.
//
// The hash part uses the main-position scheme: every key hashes to a main
// slot; colliding keys are linked through `next` indices inside the same
// node vector. Inserting a key whose main slot is occupied by a key that
// does NOT belong there relocates the squatter to a free slot and claims
// the main slot. When no free slot remains the table rehashes, sizing the
// array part to the largest power of two P with more than half of 1..P
// populated.
//
// Invariants:
// - a key is never present in both parts;
// - nil is never stored as a key; assigning nil to a value erases the
//   entry (the node keeps its key until the next rehash so that an
//   in-progress `next` traversal can still find its position);
// - NaN keys are rejected.

use super::lua_value::LuaValue;
use crate::gc::TableId;

/// Upper bound for the array part (2^26 slots), matching the bins used by
/// the rehash counting.
const MAX_ARRAY_BITS: usize = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKeyError {
    Nil,
    NaN,
}

impl TableKeyError {
    pub fn message(self) -> &'static str {
        match self {
            TableKeyError::Nil => "table index is nil",
            TableKeyError::NaN => "table index is NaN",
        }
    }
}

#[derive(Clone, Copy)]
struct Node {
    key: LuaValue,
    value: LuaValue,
    /// Index of the next node in this main-position chain, or -1.
    next: i32,
}

impl Node {
    const EMPTY: Node = Node {
        key: LuaValue::nil(),
        value: LuaValue::nil(),
        next: -1,
    };
}

pub struct LuaTable {
    array: Vec<LuaValue>,
    node: Vec<Node>,
    /// One past the last slot still worth probing for a free position.
    lastfree: usize,
    pub metatable: Option<TableId>,
    /// Bitmap caching "this metamethod is known absent"; cleared whenever
    /// the table is mutated so stale absences cannot linger.
    pub flags: u8,
}

/// Hash a key to a bucket selector. Strings carry their interned hash in
/// the id-distinct pool, so here every key kind is reduced to its payload
/// bits and mixed; -0.0 is normalized so it shares a slot with 0.0.
fn hash_key(key: &LuaValue) -> u64 {
    let bits = match key.ttype() {
        super::lua_value::LUA_TNUMBER => {
            let n = key.nvalue();
            if n == 0.0 { 0 } else { n.to_bits() }
        }
        super::lua_value::LUA_TBOOLEAN => key.bvalue() as u64 + 1,
        super::lua_value::LUA_TLIGHTUSERDATA => key.pvalue() as u64,
        _ => match key.gc_index() {
            Some((tag, id)) => ((tag as u64) << 32) | id as u64,
            None => 0,
        },
    };
    // Fibonacci-style mixing; the node count is a power of two.
    let h = bits.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    h ^ (h >> 29)
}

/// Integer array index of a key, when it is a number with an exact
/// integral value in range.
#[inline]
fn array_key(key: &LuaValue) -> Option<usize> {
    let n = key.as_number()?;
    if n.fract() == 0.0 && n >= 1.0 && n <= (1usize << MAX_ARRAY_BITS) as f64 {
        Some(n as usize)
    } else {
        None
    }
}

impl LuaTable {
    pub fn new(narray: usize, nhash: usize) -> Self {
        let mut t = LuaTable {
            array: Vec::new(),
            node: Vec::new(),
            lastfree: 0,
            metatable: None,
            flags: 0,
        };
        t.resize(narray, nhash);
        t
    }

    /// Accounted footprint of the parts, excluding the struct itself.
    pub fn payload_size(&self) -> usize {
        self.array.len() * std::mem::size_of::<LuaValue>()
            + self.node.len() * std::mem::size_of::<Node>()
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    // ---- get ----

    /// Raw get: never consults metamethods. Absent keys read as nil.
    pub fn get(&self, key: &LuaValue) -> LuaValue {
        if key.is_nil() {
            return LuaValue::nil();
        }
        if let Some(i) = array_key(key) {
            if i <= self.array.len() {
                return self.array[i - 1];
            }
        }
        match self.find_node(key) {
            Some(idx) => self.node[idx].value,
            None => LuaValue::nil(),
        }
    }

    /// Raw get with a native integer key (array fast path).
    pub fn get_int(&self, i: usize) -> LuaValue {
        if i >= 1 && i <= self.array.len() {
            self.array[i - 1]
        } else {
            self.get(&LuaValue::number(i as f64))
        }
    }

    fn find_node(&self, key: &LuaValue) -> Option<usize> {
        if self.node.is_empty() {
            return None;
        }
        let mut idx = self.main_position(key) as i32;
        while idx >= 0 {
            let n = &self.node[idx as usize];
            if n.key.raw_equal(key) {
                return Some(idx as usize);
            }
            idx = n.next;
        }
        None
    }

    #[inline]
    fn main_position(&self, key: &LuaValue) -> usize {
        debug_assert!(!self.node.is_empty());
        (hash_key(key) as usize) & (self.node.len() - 1)
    }

    // ---- set ----

    /// Raw set: never consults metamethods. Setting nil erases.
    pub fn set(&mut self, key: LuaValue, value: LuaValue) -> Result<(), TableKeyError> {
        if key.is_nil() {
            return Err(TableKeyError::Nil);
        }
        if key.is_number() && key.nvalue().is_nan() {
            return Err(TableKeyError::NaN);
        }
        self.flags = 0;
        if let Some(i) = array_key(&key) {
            if i <= self.array.len() {
                self.array[i - 1] = value;
                return Ok(());
            }
        }
        if let Some(idx) = self.find_node(&key) {
            self.node[idx].value = value;
            return Ok(());
        }
        if value.is_nil() {
            // erasing an absent key is a no-op
            return Ok(());
        }
        self.new_key(key, value);
        Ok(())
    }

    pub fn set_int(&mut self, i: usize, value: LuaValue) {
        if i >= 1 && i <= self.array.len() {
            self.flags = 0;
            self.array[i - 1] = value;
        } else {
            // integer keys fit neither NaN nor nil, so this cannot fail
            let _ = self.set(LuaValue::number(i as f64), value);
        }
    }

    /// Insert a key known to be absent from both parts.
    fn new_key(&mut self, key: LuaValue, value: LuaValue) {
        if self.node.is_empty() {
            self.rehash(&key);
            // the rehash may have opened an array slot for this key
            let _ = self.set(key, value);
            return;
        }
        let mp = self.main_position(&key);
        if !self.node[mp].key.is_nil() {
            let Some(free) = self.free_position() else {
                self.rehash(&key);
                let _ = self.set(key, value);
                return;
            };
            let other_main = self.main_position(&self.node[mp].key.clone());
            if other_main != mp {
                // squatter: relocate it to the free slot, then claim mp
                let mut prev = other_main;
                while self.node[prev].next != mp as i32 {
                    prev = self.node[prev].next as usize;
                }
                self.node[prev].next = free as i32;
                self.node[free] = self.node[mp];
                self.node[mp] = Node {
                    key,
                    value,
                    next: -1,
                };
            } else {
                // same main position: chain the new key through the free slot
                self.node[free] = Node {
                    key,
                    value,
                    next: self.node[mp].next,
                };
                self.node[mp].next = free as i32;
            }
        } else {
            self.node[mp] = Node {
                key,
                value,
                next: -1,
            };
        }
    }

    fn free_position(&mut self) -> Option<usize> {
        while self.lastfree > 0 {
            self.lastfree -= 1;
            if self.node[self.lastfree].key.is_nil() {
                return Some(self.lastfree);
            }
        }
        None
    }

    // ---- rehash ----

    /// Count live entries into power-of-two bins and rebuild both parts,
    /// reserving room for `extra_key`.
    fn rehash(&mut self, extra_key: &LuaValue) {
        let mut nums = [0usize; MAX_ARRAY_BITS + 1];
        let mut total_int = 0usize;

        // array part
        for (i, v) in self.array.iter().enumerate() {
            if !v.is_nil() {
                nums[ceil_log2(i + 1)] += 1;
                total_int += 1;
            }
        }
        // hash part
        let mut total_other = 0usize;
        for n in &self.node {
            if n.value.is_nil() {
                continue;
            }
            if let Some(i) = array_key(&n.key) {
                nums[ceil_log2(i)] += 1;
                total_int += 1;
            } else {
                total_other += 1;
            }
        }
        // the pending key
        if let Some(i) = array_key(extra_key) {
            nums[ceil_log2(i)] += 1;
            total_int += 1;
        } else {
            total_other += 1;
        }

        // choose the largest power of two P such that more than half of
        // the keys 1..P are present
        let mut narray = 0usize;
        let mut na = 0usize;
        let mut running = 0usize;
        let mut pow = 1usize;
        for bin in nums.iter().take(MAX_ARRAY_BITS + 1) {
            running += bin;
            if running > pow / 2 && running > 0 {
                narray = pow;
                na = running;
            }
            if pow > total_int {
                break;
            }
            pow *= 2;
        }
        let nhash = total_int - na + total_other;
        self.resize(narray, nhash);
    }

    /// Rebuild the parts with the requested sizes, migrating every live
    /// entry. The node count is rounded up to a power of two.
    pub fn resize(&mut self, narray: usize, nhash: usize) {
        let new_node_len = if nhash == 0 {
            0
        } else {
            nhash.next_power_of_two()
        };
        let old_array = std::mem::take(&mut self.array);
        let old_node = std::mem::take(&mut self.node);

        self.array = vec![LuaValue::nil(); narray];
        self.node = vec![Node::EMPTY; new_node_len];
        self.lastfree = new_node_len;

        for (i, v) in old_array.into_iter().enumerate() {
            if v.is_nil() {
                continue;
            }
            if i < narray {
                self.array[i] = v;
            } else {
                self.reinsert(LuaValue::number((i + 1) as f64), v);
            }
        }
        for n in old_node {
            if n.value.is_nil() {
                continue;
            }
            self.reinsert(n.key, n.value);
        }
    }

    /// Insertion during a rebuild: the parts are pre-sized, so a missing
    /// free slot cannot happen.
    fn reinsert(&mut self, key: LuaValue, value: LuaValue) {
        if let Some(i) = array_key(&key) {
            if i <= self.array.len() {
                self.array[i - 1] = value;
                return;
            }
        }
        self.new_key(key, value);
    }

    // ---- length ----

    /// A border: n >= 0 with t[n] non-nil and t[n+1] nil. Binary search in
    /// the array part; if the array part ends non-nil, probe into the
    /// hash part by doubling.
    pub fn length(&self) -> usize {
        let alen = self.array.len();
        if alen > 0 && self.array[alen - 1].is_nil() {
            // there is a border inside the array part
            let mut lo = 0usize;
            let mut hi = alen;
            while hi - lo > 1 {
                let m = (lo + hi) / 2;
                if self.array[m - 1].is_nil() {
                    hi = m;
                } else {
                    lo = m;
                }
            }
            return lo;
        }
        if self.node.is_empty() {
            return alen;
        }
        // unbound search above the array part
        let mut i = alen;
        let mut j = alen + 1;
        while !self.get_int(j).is_nil() {
            i = j;
            match j.checked_mul(2) {
                Some(next) => j = next,
                None => {
                    // pathological table: fall back to a linear scan
                    let mut k = 1;
                    while !self.get_int(k).is_nil() {
                        k += 1;
                    }
                    return k - 1;
                }
            }
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get_int(m).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    // ---- iteration ----

    /// Position of a key in the frozen traversal order: array part first
    /// (positions 0..alen), then nodes in storage order. Returns None for
    /// a key not found anywhere (invalid resume key).
    fn traversal_index(&self, key: &LuaValue) -> Option<usize> {
        if key.is_nil() {
            return Some(0);
        }
        if let Some(i) = array_key(key) {
            if i <= self.array.len() {
                return Some(i);
            }
        }
        self.find_node(key).map(|n| self.array.len() + n + 1)
    }

    /// Step the traversal. `Ok(None)` means exhausted; an unknown resume
    /// key reports an error so the caller can raise "invalid key to 'next'".
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, ()> {
        let start = self.traversal_index(key).ok_or(())?;
        for i in start..self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((LuaValue::number((i + 1) as f64), self.array[i])));
            }
        }
        let nstart = start.saturating_sub(self.array.len());
        for n in &self.node[nstart..] {
            if !n.value.is_nil() {
                return Ok(Some((n.key, n.value)));
            }
        }
        Ok(None)
    }

    /// Snapshot every live entry; used by the collector to traverse
    /// without holding a borrow across marking.
    pub fn iter_all(&self) -> Vec<(LuaValue, LuaValue)> {
        let mut out = Vec::new();
        for (i, v) in self.array.iter().enumerate() {
            if !v.is_nil() {
                out.push((LuaValue::number((i + 1) as f64), *v));
            }
        }
        for n in &self.node {
            if !n.value.is_nil() {
                out.push((n.key, n.value));
            }
        }
        out
    }

}

/// Smallest b with 2^b >= i, for i >= 1.
fn ceil_log2(i: usize) -> usize {
    debug_assert!(i >= 1);
    (usize::BITS - (i - 1).leading_zeros()) as usize
}
