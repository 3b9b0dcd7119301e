// Hash-consed strings.
//
// Every string is interned: equal content yields the same id, so value
// equality is id equality. The bucket map is keyed by the content hash;
// collisions chain through a small vector per bucket.

use ahash::RandomState;
use std::collections::HashMap;

use crate::gc::gc_object::{GcHeader, GcObject};
use crate::gc::object_pool::ObjectPool;
use crate::gc::{GC, StringId};
use crate::lua_value::LuaString;

/// Content hash. For long strings only a sampled subset of the bytes is
/// hashed: the sampling stride is `(len >> 5) + 1`, walking from the last
/// byte toward the front. This exact recipe is part of the interning
/// contract and must not change.
pub fn lua_hash(bytes: &[u8]) -> u32 {
    let len = bytes.len();
    let mut h = len as u32;
    let step = (len >> 5) + 1;
    let mut l1 = len;
    while l1 >= step {
        h ^= h
            .wrapping_shl(5)
            .wrapping_add(h >> 2)
            .wrapping_add(bytes[l1 - 1] as u32);
        l1 -= step;
    }
    h
}

pub struct StringInterner {
    map: HashMap<u32, Vec<StringId>, RandomState>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(256, RandomState::new()),
        }
    }

    /// Intern a byte string: return the existing id when the content is
    /// already present, allocating otherwise. A condemned-but-unswept
    /// string is revived instead of duplicated.
    pub fn intern(&mut self, bytes: &[u8], pool: &mut ObjectPool, gc: &mut GC) -> StringId {
        let hash = lua_hash(bytes);
        let other_white = GcHeader::other_white(gc.current_white);

        if let Some(ids) = self.map.get(&hash) {
            for &id in ids {
                let obj = pool.string(id);
                // dead strings are about to be swept; never hand them out
                if obj.header.is_dead(other_white) {
                    continue;
                }
                if obj.data.as_bytes() == bytes {
                    // revive a condemned survivor so this cycle keeps it
                    if obj.header.is_white() {
                        pool.strings
                            .get_mut(id.0)
                            .expect("stale string id")
                            .header
                            .make_black();
                    }
                    return id;
                }
            }
        }

        let size = std::mem::size_of::<GcObject<LuaString>>() + bytes.len();
        let s = LuaString::new(bytes.to_vec().into_boxed_slice(), hash);
        let id = StringId(pool.strings.alloc(GcObject::new(s, gc.current_white, size)));
        gc.account_alloc(size);
        self.map.entry(hash).or_default().push(id);
        id
    }

    /// Drop a dead string from its bucket (called by the sweep).
    pub fn remove_dead(&mut self, id: StringId, hash: u32) {
        if let Some(ids) = self.map.get_mut(&hash) {
            ids.retain(|&i| i != id);
            if ids.is_empty() {
                self.map.remove(&hash);
            }
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.map.len()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
