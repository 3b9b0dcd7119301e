// Incremental tri-color mark-and-sweep collector.
//
// Two alternating whites distinguish objects born during the current cycle
// from last cycle's condemned ones; gray objects are reachable with
// children pending; black objects are fully scanned. The invariant "no
// black object points to a white one" is preserved by a forward barrier
// (mark the new target) and, for tables, a backward barrier (re-gray the
// container onto the grayagain list).
//
// Cycle: Pause -> mark roots -> Propagate (budgeted) -> atomic (remark,
// weak clearing, finalizer separation, white flip) -> SweepString ->
// Sweep -> Finalize -> Pause.
//
// The collector never runs finalizers itself: the VM wrapper drives them
// when a step reports NeedFinalize, so `__gc` bodies run under a normal
// protected call.

mod gc_id;
mod gc_object;
pub mod object_pool;
pub mod string_interner;

pub use gc_id::*;
pub use gc_object::{GcHeader, GcObject};
pub use object_pool::{ObjectPool, Pool};
pub use string_interner::{StringInterner, lua_hash};

use crate::lua_value::lua_value::{
    LUA_TFUNCTION, LUA_TSTRING, LUA_TTABLE, LUA_TTHREAD, LUA_TUSERDATA,
};
use crate::lua_value::{Chunk, LuaClosure, LuaTable, LuaUpvalue, LuaValue};

/// Default pause: start a new cycle when usage doubles the live estimate.
pub const DEFAULT_PAUSE: u32 = 200;
/// Default step multiplier (percent of allocation speed).
pub const DEFAULT_STEP_MUL: u32 = 200;
/// Bytes of allocation between incremental steps.
const STEP_SIZE: usize = 1024;
/// Objects swept per work unit burst.
const SWEEP_MAX: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    Pause,
    Propagate,
    SweepString,
    Sweep,
    Finalize,
}

/// Outcome of one collector micro-step.
pub enum StepResult {
    /// Some marking/sweeping happened; the payload is the work done.
    Work(usize),
    /// Finalizers are queued; the VM must run them before the cycle ends.
    NeedFinalize,
    /// The cycle closed and the next threshold is set.
    CycleDone,
}

/// Which pool the sweep phase is walking.
const SWEEP_POOLS: usize = 5;

pub struct GC {
    pub total_bytes: usize,
    pub threshold: usize,
    /// Live-byte estimate taken at the end of the atomic phase.
    pub estimate: usize,
    pub current_white: u8,
    pub state: GcState,
    /// Pause percentage between cycles.
    pub pause: u32,
    /// Work per allocation percentage.
    pub step_mul: u32,
    /// False when stopped through the GC control interface.
    pub running: bool,

    gray: Vec<GcId>,
    grayagain: Vec<GcId>,
    /// Weak tables found during propagation, cleared in the atomic phase.
    weak: Vec<TableId>,
    /// Objects resurrected for finalization; drained by the VM.
    pub tobefnz: Vec<GcId>,

    sweep_pool: usize,
    sweep_cursor: u32,

    /// Interned "__mode" / "__gc" keys, installed by the runtime at boot.
    pub mode_key: Option<StringId>,
    pub gc_key: Option<StringId>,
}

impl GC {
    pub fn new() -> Self {
        GC {
            total_bytes: 0,
            threshold: 4 * STEP_SIZE,
            estimate: 0,
            current_white: 0,
            state: GcState::Pause,
            pause: DEFAULT_PAUSE,
            step_mul: DEFAULT_STEP_MUL,
            running: true,
            gray: Vec::with_capacity(64),
            grayagain: Vec::with_capacity(16),
            weak: Vec::new(),
            tobefnz: Vec::new(),
            sweep_pool: 0,
            sweep_cursor: 0,
            mode_key: None,
            gc_key: None,
        }
    }

    // ---- byte accounting ----

    #[inline]
    pub fn account_alloc(&mut self, size: usize) {
        self.total_bytes += size;
    }

    #[inline]
    pub fn account_free(&mut self, size: usize) {
        self.total_bytes = self.total_bytes.saturating_sub(size);
    }

    /// Adjust accounting when an object's payload grows or shrinks.
    #[inline]
    pub fn account_resize(&mut self, old: usize, new: usize) {
        self.account_free(old);
        self.account_alloc(new);
    }

    #[inline]
    pub fn should_step(&self) -> bool {
        self.running && self.total_bytes >= self.threshold
    }

    /// True while the tri-color invariant must be preserved by barriers.
    #[inline]
    pub fn keep_invariant(&self) -> bool {
        self.state == GcState::Propagate
    }

    // ---- write barriers ----

    /// Forward barrier: a black container was wired to point at `v`.
    /// During marking the target is marked; during sweeping the container
    /// is simply made current-white again so the barrier stops firing.
    pub fn barrier_forward(&mut self, container: GcId, v: &LuaValue, pool: &mut ObjectPool) {
        if !self.container_is_black(container, pool) || !self.value_is_white(v, pool) {
            return;
        }
        if self.keep_invariant() {
            self.mark_value(v, pool);
        } else {
            self.whiten(container, pool);
        }
    }

    /// Backward barrier: a black table was mutated. Re-gray the table and
    /// queue it for a rescan in the atomic phase.
    pub fn barrier_back(&mut self, id: TableId, pool: &mut ObjectPool) {
        let obj = pool.table_mut(id);
        if obj.header.is_black() {
            obj.header.make_gray();
            if !self.grayagain.contains(&GcId::Table(id)) {
                self.grayagain.push(GcId::Table(id));
            }
        }
    }

    fn container_is_black(&self, id: GcId, pool: &ObjectPool) -> bool {
        self.header_of(id, pool).map(|h| h.is_black()).unwrap_or(false)
    }

    fn value_is_white(&self, v: &LuaValue, pool: &ObjectPool) -> bool {
        match value_gc_id(v) {
            Some(id) => self.header_of(id, pool).map(|h| h.is_white()).unwrap_or(false),
            None => false,
        }
    }

    fn header_of(&self, id: GcId, pool: &ObjectPool) -> Option<GcHeader> {
        match id {
            GcId::String(i) => pool.strings.get(i.0).map(|o| o.header),
            GcId::Table(i) => pool.tables.get(i.0).map(|o| o.header),
            GcId::Closure(i) => pool.closures.get(i.0).map(|o| o.header),
            GcId::Upvalue(i) => pool.upvalues.get(i.0).map(|o| o.header),
            GcId::Userdata(i) => pool.userdata.get(i.0).map(|o| o.header),
            GcId::Thread(i) => pool.threads.get(i.0).map(|o| o.header),
        }
    }

    fn whiten(&mut self, id: GcId, pool: &mut ObjectPool) {
        let white = self.current_white;
        match id {
            GcId::String(i) => {
                if let Some(o) = pool.strings.get_mut(i.0) {
                    o.header.make_white(white);
                }
            }
            GcId::Table(i) => {
                if let Some(o) = pool.tables.get_mut(i.0) {
                    o.header.make_white(white);
                }
            }
            GcId::Closure(i) => {
                if let Some(o) = pool.closures.get_mut(i.0) {
                    o.header.make_white(white);
                }
            }
            GcId::Upvalue(i) => {
                if let Some(o) = pool.upvalues.get_mut(i.0) {
                    o.header.make_white(white);
                }
            }
            GcId::Userdata(i) => {
                if let Some(o) = pool.userdata.get_mut(i.0) {
                    o.header.make_white(white);
                }
            }
            GcId::Thread(i) => {
                if let Some(o) = pool.threads.get_mut(i.0) {
                    o.header.make_white(white);
                }
            }
        }
    }

    // ---- marking ----

    pub fn mark_value(&mut self, v: &LuaValue, pool: &mut ObjectPool) {
        if let Some(id) = value_gc_id(v) {
            self.mark_object(id, pool);
        }
    }

    pub fn mark_object(&mut self, id: GcId, pool: &mut ObjectPool) {
        match id {
            GcId::String(i) => {
                // strings are leaves: white -> black directly
                if let Some(o) = pool.strings.get_mut(i.0) {
                    if o.header.is_white() {
                        o.header.make_black();
                    }
                }
            }
            GcId::Table(i) => {
                if let Some(o) = pool.tables.get_mut(i.0) {
                    if o.header.is_white() {
                        o.header.make_gray();
                        self.gray.push(id);
                    }
                }
            }
            GcId::Closure(i) => {
                if let Some(o) = pool.closures.get_mut(i.0) {
                    if o.header.is_white() {
                        o.header.make_gray();
                        self.gray.push(id);
                    }
                }
            }
            GcId::Upvalue(i) => {
                if let Some(o) = pool.upvalues.get_mut(i.0) {
                    if o.header.is_white() {
                        o.header.make_gray();
                        self.gray.push(id);
                    }
                }
            }
            GcId::Userdata(i) => {
                if let Some(o) = pool.userdata.get_mut(i.0) {
                    if o.header.is_white() {
                        o.header.make_gray();
                        self.gray.push(id);
                    }
                }
            }
            GcId::Thread(i) => {
                if let Some(o) = pool.threads.get_mut(i.0) {
                    if o.header.is_white() {
                        o.header.make_gray();
                        self.gray.push(id);
                    }
                }
            }
        }
    }

    /// Pop one gray object, blacken it and gray its children. Returns the
    /// work done (the object's accounted size).
    fn propagate_mark(&mut self, pool: &mut ObjectPool) -> usize {
        let Some(id) = self.gray.pop() else {
            return 0;
        };
        self.traverse(id, pool)
    }

    fn traverse(&mut self, id: GcId, pool: &mut ObjectPool) -> usize {
        match id {
            GcId::String(_) => 1,
            GcId::Table(tid) => self.traverse_table(tid, pool),
            GcId::Closure(cid) => self.traverse_closure(cid, pool),
            GcId::Upvalue(uid) => self.traverse_upvalue(uid, pool),
            GcId::Userdata(uid) => self.traverse_userdata(uid, pool),
            GcId::Thread(tid) => self.traverse_thread(tid, pool, false),
        }
    }

    /// Weakness of a table, read from its metatable's `__mode` field.
    fn weak_mode(&self, t: &LuaTable, pool: &ObjectPool) -> (bool, bool) {
        let Some(mode_key) = self.mode_key else {
            return (false, false);
        };
        let Some(mt) = t.metatable else {
            return (false, false);
        };
        let Some(mt_obj) = pool.tables.get(mt.0) else {
            return (false, false);
        };
        let mode = mt_obj.data.get(&LuaValue::string(mode_key));
        match mode.as_string_id() {
            Some(sid) => {
                let bytes = pool.string_bytes(sid);
                (bytes.contains(&b'k'), bytes.contains(&b'v'))
            }
            None => (false, false),
        }
    }

    fn traverse_table(&mut self, tid: TableId, pool: &mut ObjectPool) -> usize {
        let (entries, metatable, size) = {
            let Some(obj) = pool.tables.get_mut(tid.0) else {
                return 0;
            };
            obj.header.make_black();
            (obj.data.iter_all(), obj.data.metatable, obj.size)
        };
        let (weak_k, weak_v) = match pool.tables.get(tid.0) {
            Some(obj) => self.weak_mode(&obj.data, pool),
            None => (false, false),
        };

        if let Some(mt) = metatable {
            self.mark_object(GcId::Table(mt), pool);
        }
        if weak_k || weak_v {
            self.weak.push(tid);
        }
        for (k, v) in &entries {
            if !weak_k {
                self.mark_value(k, pool);
            }
            if !weak_v {
                self.mark_value(v, pool);
            }
        }
        size.max(1)
    }

    fn mark_chunk(&mut self, chunk: &Chunk, pool: &mut ObjectPool) {
        for c in &chunk.constants {
            self.mark_value(c, pool);
        }
        for p in &chunk.protos {
            self.mark_chunk(p, pool);
        }
    }

    fn traverse_closure(&mut self, cid: ClosureId, pool: &mut ObjectPool) -> usize {
        enum Parts {
            Script(std::rc::Rc<Chunk>, Vec<UpvalueId>, TableId),
            Native(Vec<LuaValue>, TableId),
        }
        let (parts, size) = {
            let Some(obj) = pool.closures.get_mut(cid.0) else {
                return 0;
            };
            obj.header.make_black();
            let size = obj.size;
            let parts = match &obj.data {
                LuaClosure::Script(c) => {
                    Parts::Script(c.chunk.clone(), c.upvalues.clone(), c.env)
                }
                LuaClosure::Native(c) => Parts::Native(c.upvalues.clone(), c.env),
            };
            (parts, size)
        };
        match parts {
            Parts::Script(chunk, upvals, env) => {
                self.mark_object(GcId::Table(env), pool);
                for u in upvals {
                    self.mark_object(GcId::Upvalue(u), pool);
                }
                self.mark_chunk(&chunk, pool);
            }
            Parts::Native(upvals, env) => {
                self.mark_object(GcId::Table(env), pool);
                for v in &upvals {
                    self.mark_value(v, pool);
                }
            }
        }
        size.max(1)
    }

    fn traverse_upvalue(&mut self, uid: UpvalueId, pool: &mut ObjectPool) -> usize {
        let value = {
            let Some(obj) = pool.upvalues.get_mut(uid.0) else {
                return 0;
            };
            obj.header.make_black();
            match &obj.data {
                LuaUpvalue::Closed(v) => Some(*v),
                LuaUpvalue::Open { thread, slot } => pool
                    .threads
                    .get(thread.0)
                    .and_then(|t| t.data.stack.get(*slot).copied()),
            }
        };
        if let Some(v) = value {
            self.mark_value(&v, pool);
        }
        1
    }

    fn traverse_userdata(&mut self, uid: UserdataId, pool: &mut ObjectPool) -> usize {
        let (mt, env, size) = {
            let Some(obj) = pool.userdata.get_mut(uid.0) else {
                return 0;
            };
            obj.header.make_black();
            (obj.data.metatable, obj.data.env, obj.size)
        };
        if let Some(mt) = mt {
            self.mark_object(GcId::Table(mt), pool);
        }
        self.mark_object(GcId::Table(env), pool);
        size.max(1)
    }

    /// Threads stay gray through propagation: their stacks keep changing,
    /// so they are queued on grayagain and rescanned atomically.
    fn traverse_thread(&mut self, tid: ThreadId, pool: &mut ObjectPool, atomic: bool) -> usize {
        let (values, upvals, globals, size) = {
            let Some(obj) = pool.threads.get_mut(tid.0) else {
                return 0;
            };
            if atomic {
                obj.header.make_black();
            } else {
                obj.header.make_gray();
            }
            let extent = obj.data.stack_extent();
            let values: Vec<LuaValue> = obj.data.stack[..extent].to_vec();
            let upvals = obj.data.open_upvalues.clone();
            (values, upvals, obj.data.globals, obj.size)
        };
        for v in &values {
            self.mark_value(v, pool);
        }
        for u in upvals {
            self.mark_object(GcId::Upvalue(u), pool);
        }
        self.mark_object(GcId::Table(globals), pool);
        if !atomic && !self.grayagain.contains(&GcId::Thread(tid)) {
            self.grayagain.push(GcId::Thread(tid));
        }
        size.max(1)
    }

    // ---- cycle control ----

    fn mark_roots(&mut self, roots: &[LuaValue], pool: &mut ObjectPool) {
        self.gray.clear();
        self.grayagain.clear();
        self.weak.clear();
        for v in roots {
            self.mark_value(v, pool);
        }
        // pending finalizable objects must survive until their __gc ran
        let pending: Vec<GcId> = self.tobefnz.clone();
        for id in pending {
            self.mark_object(id, pool);
        }
    }

    /// Everything not yet marked becomes eligible: re-whiten all objects.
    fn whiten_all(&mut self, pool: &mut ObjectPool) {
        let white = self.current_white;
        for (_, o) in pool.strings.iter_mut() {
            if !o.header.is_fixed() {
                o.header.make_white(white);
            }
        }
        for (_, o) in pool.tables.iter_mut() {
            o.header.make_white(white);
        }
        for (_, o) in pool.closures.iter_mut() {
            o.header.make_white(white);
        }
        for (_, o) in pool.upvalues.iter_mut() {
            o.header.make_white(white);
        }
        for (_, o) in pool.userdata.iter_mut() {
            o.header.make_white(white);
        }
        for (_, o) in pool.threads.iter_mut() {
            o.header.make_white(white);
        }
    }

    fn atomic(&mut self, roots: &[LuaValue], pool: &mut ObjectPool) {
        // remark roots: they may have changed since the cycle started
        for v in roots {
            self.mark_value(v, pool);
        }
        while !self.gray.is_empty() {
            self.propagate_mark(pool);
        }
        // rescan threads and barrier-backed tables
        let grayagain = std::mem::take(&mut self.grayagain);
        for id in grayagain {
            match id {
                GcId::Thread(tid) => {
                    self.traverse_thread(tid, pool, true);
                }
                other => {
                    self.traverse(other, pool);
                }
            }
        }
        while !self.gray.is_empty() {
            self.propagate_mark(pool);
        }

        self.clear_weak_tables(pool);
        self.separate_finalizable(pool);
        while !self.gray.is_empty() {
            self.propagate_mark(pool);
        }

        self.current_white ^= 1;
        self.estimate = self.total_bytes;
    }

    /// Remove entries with dead keys/values from weak tables. Strings are
    /// never considered clearable: they behave like values here.
    fn clear_weak_tables(&mut self, pool: &mut ObjectPool) {
        let weak = std::mem::take(&mut self.weak);
        for tid in weak {
            let (weak_k, weak_v) = match pool.tables.get(tid.0) {
                Some(obj) => self.weak_mode(&obj.data, pool),
                None => continue,
            };
            let dead: Vec<(LuaValue, LuaValue)> = match pool.tables.get(tid.0) {
                Some(obj) => obj.data.iter_all(),
                None => continue,
            };
            let mut to_clear: Vec<LuaValue> = Vec::new();
            for (k, v) in dead {
                let k_dead = weak_k && self.is_clearable(&k, pool);
                let v_dead = weak_v && self.is_clearable(&v, pool);
                if k_dead || v_dead {
                    to_clear.push(k);
                }
            }
            if let Some(obj) = pool.tables.get_mut(tid.0) {
                for k in to_clear {
                    let _ = obj.data.set(k, LuaValue::nil());
                }
            }
        }
    }

    fn is_clearable(&self, v: &LuaValue, pool: &ObjectPool) -> bool {
        if !v.is_collectable() || v.ttype() == LUA_TSTRING {
            return false;
        }
        match value_gc_id(v) {
            Some(id) => self.header_of(id, pool).map(|h| h.is_white()).unwrap_or(false),
            None => false,
        }
    }

    /// Find unreachable tables/userdata whose metatable has `__gc`:
    /// resurrect them and queue their finalizer exactly once.
    fn separate_finalizable(&mut self, pool: &mut ObjectPool) {
        let Some(gc_key) = self.gc_key else {
            return;
        };
        let gc_event = LuaValue::string(gc_key);

        let mut newly: Vec<GcId> = Vec::new();
        let userdata: Vec<(u32, Option<TableId>)> = pool
            .userdata
            .iter()
            .filter(|(_, o)| o.header.is_white() && !o.header.is_finalized())
            .map(|(i, o)| (i, o.data.metatable))
            .collect();
        for (i, mt) in userdata {
            if self.metatable_has(mt, &gc_event, pool) {
                newly.push(GcId::Userdata(UserdataId(i)));
            }
        }
        let tables: Vec<(u32, Option<TableId>)> = pool
            .tables
            .iter()
            .filter(|(_, o)| o.header.is_white() && !o.header.is_finalized())
            .map(|(i, o)| (i, o.data.metatable))
            .collect();
        for (i, mt) in tables {
            if self.metatable_has(mt, &gc_event, pool) {
                newly.push(GcId::Table(TableId(i)));
            }
        }

        for id in newly {
            match id {
                GcId::Userdata(i) => {
                    if let Some(o) = pool.userdata.get_mut(i.0) {
                        o.header.make_finalized();
                    }
                }
                GcId::Table(i) => {
                    if let Some(o) = pool.tables.get_mut(i.0) {
                        o.header.make_finalized();
                    }
                }
                _ => {}
            }
            self.mark_object(id, pool);
            self.tobefnz.push(id);
        }
    }

    fn metatable_has(&self, mt: Option<TableId>, event: &LuaValue, pool: &ObjectPool) -> bool {
        match mt.and_then(|m| pool.tables.get(m.0)) {
            Some(obj) => !obj.data.get(event).is_nil(),
            None => false,
        }
    }

    // ---- sweeping ----

    /// Sweep a bounded number of string slots, unlinking dead strings from
    /// the interner. Returns true when the string pool is fully swept.
    fn sweep_strings(&mut self, pool: &mut ObjectPool, interner: &mut StringInterner) -> bool {
        let other = GcHeader::other_white(self.current_white);
        let white = self.current_white;
        let end = pool.strings.slot_count();
        let mut seen = 0;
        while (self.sweep_cursor as usize) < end && seen < SWEEP_MAX {
            let idx = self.sweep_cursor;
            self.sweep_cursor += 1;
            seen += 1;
            let Some(obj) = pool.strings.get_mut(idx) else {
                continue;
            };
            if obj.header.is_dead(other) {
                let hash = obj.data.hash();
                interner.remove_dead(StringId(idx), hash);
                if let Some(freed) = pool.strings.free(idx) {
                    self.account_free(freed.size);
                }
            } else {
                obj.header.make_white(white);
            }
        }
        (self.sweep_cursor as usize) >= end
    }

    /// Sweep a bounded slice of the non-string pools. Returns true when
    /// every pool has been walked.
    fn sweep_objects(&mut self, pool: &mut ObjectPool) -> bool {
        let other = GcHeader::other_white(self.current_white);
        let white = self.current_white;
        let mut seen = 0;
        while self.sweep_pool < SWEEP_POOLS && seen < SWEEP_MAX {
            let end = match self.sweep_pool {
                0 => pool.tables.slot_count(),
                1 => pool.closures.slot_count(),
                2 => pool.upvalues.slot_count(),
                3 => pool.userdata.slot_count(),
                _ => pool.threads.slot_count(),
            };
            if (self.sweep_cursor as usize) >= end {
                self.sweep_pool += 1;
                self.sweep_cursor = 0;
                continue;
            }
            let idx = self.sweep_cursor;
            self.sweep_cursor += 1;
            seen += 1;
            let freed_size = match self.sweep_pool {
                0 => sweep_slot(&mut pool.tables, idx, other, white),
                1 => sweep_slot(&mut pool.closures, idx, other, white),
                2 => sweep_slot(&mut pool.upvalues, idx, other, white),
                3 => sweep_slot(&mut pool.userdata, idx, other, white),
                _ => sweep_slot(&mut pool.threads, idx, other, white),
            };
            if let Some(size) = freed_size {
                self.account_free(size);
            }
        }
        self.sweep_pool >= SWEEP_POOLS
    }

    // ---- stepping ----

    /// One micro-step of the state machine. The caller loops over this
    /// with a work budget, and runs finalizers whenever NeedFinalize
    /// comes back.
    pub fn single_step(
        &mut self,
        roots: &[LuaValue],
        pool: &mut ObjectPool,
        interner: &mut StringInterner,
    ) -> StepResult {
        match self.state {
            GcState::Pause => {
                self.whiten_all(pool);
                self.mark_roots(roots, pool);
                self.state = GcState::Propagate;
                StepResult::Work(STEP_SIZE / 4)
            }
            GcState::Propagate => {
                if self.gray.is_empty() {
                    self.atomic(roots, pool);
                    self.sweep_pool = 0;
                    self.sweep_cursor = 0;
                    self.state = GcState::SweepString;
                    StepResult::Work(STEP_SIZE / 4)
                } else {
                    StepResult::Work(self.propagate_mark(pool))
                }
            }
            GcState::SweepString => {
                if self.sweep_strings(pool, interner) {
                    self.state = GcState::Sweep;
                    self.sweep_pool = 0;
                    self.sweep_cursor = 0;
                }
                StepResult::Work(SWEEP_MAX * 16)
            }
            GcState::Sweep => {
                if self.sweep_objects(pool) {
                    if self.tobefnz.is_empty() {
                        self.finish_cycle();
                        return StepResult::CycleDone;
                    }
                    self.state = GcState::Finalize;
                    return StepResult::NeedFinalize;
                }
                StepResult::Work(SWEEP_MAX * 16)
            }
            GcState::Finalize => {
                if self.tobefnz.is_empty() {
                    self.finish_cycle();
                    StepResult::CycleDone
                } else {
                    StepResult::NeedFinalize
                }
            }
        }
    }

    /// Close the cycle and schedule the next one `pause` percent beyond
    /// the live estimate.
    fn finish_cycle(&mut self) {
        self.state = GcState::Pause;
        let base = self.estimate.max(STEP_SIZE);
        self.threshold = base / 100 * self.pause as usize;
    }

    /// Schedule the next incremental step after STEP_SIZE more bytes.
    pub fn delay_step(&mut self) {
        self.threshold = self.total_bytes + STEP_SIZE;
    }

    /// Work budget for one incremental step.
    pub fn step_budget(&self) -> usize {
        (STEP_SIZE / 100) * self.step_mul.max(1) as usize
    }
}

fn sweep_slot<T>(pool: &mut Pool<T>, idx: u32, other_white: u8, white: u8) -> Option<usize> {
    let obj = pool.get_mut(idx)?;
    if obj.header.is_dead(other_white) {
        pool.free(idx).map(|o| o.size)
    } else {
        obj.header.make_white(white);
        None
    }
}

impl<T> Pool<T> {
    /// Number of slots (live or free); sweep cursors walk this range.
    pub fn slot_count(&self) -> usize {
        self.iter().map(|(i, _)| i as usize + 1).max().unwrap_or(0)
    }
}

/// GC identity of a collectable value.
pub fn value_gc_id(v: &LuaValue) -> Option<GcId> {
    if !v.is_collectable() {
        return None;
    }
    Some(match v.ttype() {
        LUA_TSTRING => GcId::String(v.svalue()),
        LUA_TTABLE => GcId::Table(v.hvalue()),
        LUA_TFUNCTION => GcId::Closure(v.clvalue()),
        LUA_TUSERDATA => GcId::Userdata(v.uvalue()),
        LUA_TTHREAD => GcId::Thread(v.thvalue()),
        _ => return None,
    })
}

impl Default for GC {
    fn default() -> Self {
        Self::new()
    }
}
