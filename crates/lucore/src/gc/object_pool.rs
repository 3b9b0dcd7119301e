// Slab pools for GC-managed objects.
//
// Objects never move: a freed slot goes on a free list and is reused for
// a later allocation, so a 32-bit index identifies an object for its whole
// lifetime. Only the collector's sweep frees slots.

use crate::gc::gc_object::GcObject;
use crate::gc::{ClosureId, StringId, TableId, ThreadId, UpvalueId, UserdataId};
use crate::lua_value::{LuaClosure, LuaString, LuaTable, LuaUpvalue, LuaUserdata};
use crate::lua_vm::LuaThread;

pub struct Pool<T> {
    slots: Vec<Option<GcObject<T>>>,
    free: Vec<u32>,
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn alloc(&mut self, obj: GcObject<T>) -> u32 {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(obj);
                idx
            }
            None => {
                self.slots.push(Some(obj));
                (self.slots.len() - 1) as u32
            }
        }
    }

    #[inline(always)]
    pub fn get(&self, idx: u32) -> Option<&GcObject<T>> {
        self.slots.get(idx as usize)?.as_ref()
    }

    #[inline(always)]
    pub fn get_mut(&mut self, idx: u32) -> Option<&mut GcObject<T>> {
        self.slots.get_mut(idx as usize)?.as_mut()
    }

    /// Free a slot, returning the object (with its accounted size) so the
    /// caller can settle the byte counter.
    pub fn free(&mut self, idx: u32) -> Option<GcObject<T>> {
        let slot = self.slots.get_mut(idx as usize)?;
        let obj = slot.take()?;
        self.free.push(idx);
        Some(obj)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &GcObject<T>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|o| (i as u32, o)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut GcObject<T>)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|o| (i as u32, o)))
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// All pools of a runtime instance.
pub struct ObjectPool {
    pub strings: Pool<LuaString>,
    pub tables: Pool<LuaTable>,
    pub closures: Pool<LuaClosure>,
    pub upvalues: Pool<LuaUpvalue>,
    pub userdata: Pool<LuaUserdata>,
    pub threads: Pool<LuaThread>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self {
            strings: Pool::new(),
            tables: Pool::new(),
            closures: Pool::new(),
            upvalues: Pool::new(),
            userdata: Pool::new(),
            threads: Pool::new(),
        }
    }

    // Typed panicking accessors for ids the runtime itself produced; a
    // stale id here is a collector bug, not a recoverable condition.

    #[inline(always)]
    pub fn string(&self, id: StringId) -> &GcObject<LuaString> {
        self.strings.get(id.0).expect("stale string id")
    }

    #[inline(always)]
    pub fn table(&self, id: TableId) -> &GcObject<LuaTable> {
        self.tables.get(id.0).expect("stale table id")
    }

    #[inline(always)]
    pub fn table_mut(&mut self, id: TableId) -> &mut GcObject<LuaTable> {
        self.tables.get_mut(id.0).expect("stale table id")
    }

    #[inline(always)]
    pub fn closure(&self, id: ClosureId) -> &GcObject<LuaClosure> {
        self.closures.get(id.0).expect("stale closure id")
    }

    #[inline(always)]
    pub fn closure_mut(&mut self, id: ClosureId) -> &mut GcObject<LuaClosure> {
        self.closures.get_mut(id.0).expect("stale closure id")
    }

    #[inline(always)]
    pub fn upvalue(&self, id: UpvalueId) -> &GcObject<LuaUpvalue> {
        self.upvalues.get(id.0).expect("stale upvalue id")
    }

    #[inline(always)]
    pub fn upvalue_mut(&mut self, id: UpvalueId) -> &mut GcObject<LuaUpvalue> {
        self.upvalues.get_mut(id.0).expect("stale upvalue id")
    }

    #[inline(always)]
    pub fn userdata_ref(&self, id: UserdataId) -> &GcObject<LuaUserdata> {
        self.userdata.get(id.0).expect("stale userdata id")
    }

    #[inline(always)]
    pub fn userdata_mut(&mut self, id: UserdataId) -> &mut GcObject<LuaUserdata> {
        self.userdata.get_mut(id.0).expect("stale userdata id")
    }

    #[inline(always)]
    pub fn thread(&self, id: ThreadId) -> &GcObject<LuaThread> {
        self.threads.get(id.0).expect("stale thread id")
    }

    #[inline(always)]
    pub fn thread_mut(&mut self, id: ThreadId) -> &mut GcObject<LuaThread> {
        self.threads.get_mut(id.0).expect("stale thread id")
    }

    #[inline(always)]
    pub fn string_bytes(&self, id: StringId) -> &[u8] {
        self.string(id).data.as_bytes()
    }
}

impl Default for ObjectPool {
    fn default() -> Self {
        Self::new()
    }
}
