// Global runtime state.
//
// One LuaVM per runtime instance: object pools, the collector, the string
// interner, the registry and globals tables, type-default metatables, and
// the thread currently executing. Threads of one instance share all of it;
// only one thread runs at a time.

pub mod api;
pub mod call_info;
pub mod coroutine;
pub mod debug_hook;
pub mod execute;
pub mod lua_error;
pub mod lua_thread;
pub mod opcode;

pub use call_info::{CallInfo, MULTRET, call_flags};
pub use debug_hook::{HookEvent, HookFn, hook_mask};
pub use lua_error::{FullError, ThreadStatus, VmError, VmResult};
pub use lua_thread::{CoStatus, LuaThread, MIN_STACK};
pub use opcode::{Instruction, OpCode};

use std::rc::Rc;

use crate::gc::{
    GC, GcId, GcObject, GcState, ObjectPool, StepResult, StringId, StringInterner, TableId,
    ThreadId, UpvalueId, UserdataId, value_gc_id,
};
use crate::gc::ClosureId;
use crate::lua_value::lua_value::NUM_TYPE_TAGS;
use crate::lua_value::{
    Chunk, LuaClosure, LuaTable, LuaUpvalue, LuaUserdata, LuaValue, NativeClosure, ScriptClosure,
};
use crate::lua_vm::execute::metamethod::TM_NAMES;

/// A host callback. Arguments arrive in the callback's frame on the
/// current thread; the return value is how many results were pushed.
pub type NativeFn = fn(&mut LuaVM) -> VmResult<i32>;

/// Called when an error escapes every protected boundary. If it returns,
/// the process is aborted.
pub type PanicFn = fn(&mut LuaVM) -> i32;

/// Runtime limits and GC tuning.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Value-stack slots a single thread may reach.
    pub max_stack: usize,
    /// Host-level call nesting (protected calls, metamethods, callbacks).
    pub max_call_depth: usize,
    /// Script-level call nesting per thread.
    pub max_frames: usize,
    /// Byte ceiling enforced by the accounting allocator.
    pub max_memory: usize,
    pub gc_pause: u32,
    pub gc_step_mul: u32,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack: 1_000_000,
            max_call_depth: 200,
            max_frames: 200,
            max_memory: usize::MAX,
            gc_pause: crate::gc::DEFAULT_PAUSE,
            gc_step_mul: crate::gc::DEFAULT_STEP_MUL,
        }
    }
}

pub struct LuaVM {
    pub(crate) pool: ObjectPool,
    pub(crate) gc: GC,
    pub(crate) interner: StringInterner,

    pub(crate) registry: TableId,
    pub(crate) globals: TableId,
    pub(crate) main_thread: ThreadId,
    pub(crate) current: ThreadId,
    /// Threads stacked by resume, outermost first; all of them are roots.
    pub(crate) resume_chain: Vec<ThreadId>,

    pub(crate) type_metatables: [Option<TableId>; NUM_TYPE_TAGS],
    /// Interned metamethod event names, indexed by TmKind.
    pub(crate) tm_names: Vec<StringId>,

    pub(crate) config: VmConfig,
    pub(crate) panic: Option<PanicFn>,
    /// Error object of the most recent raise.
    pub(crate) error_value: LuaValue,
    /// Host-level call nesting, shared by all threads of the instance.
    pub(crate) n_calls: u32,

    pub(crate) hook: Option<HookFn>,
    pub(crate) hook_mask: u8,
    pub(crate) hook_count: u32,
    pub(crate) hook_counter: u32,
    pub(crate) hook_last_line: u32,
    pub(crate) in_hook: bool,
}

const TABLE_BASE_SIZE: usize = std::mem::size_of::<GcObject<LuaTable>>();
const THREAD_BASE_SIZE: usize = std::mem::size_of::<GcObject<LuaThread>>();

impl LuaVM {
    pub fn new(config: VmConfig) -> LuaVM {
        let mut pool = ObjectPool::new();
        let mut gc = GC::new();
        gc.pause = config.gc_pause;
        gc.step_mul = config.gc_step_mul;
        let white = gc.current_white;

        let globals_table = LuaTable::new(0, 8);
        let gsize = TABLE_BASE_SIZE + globals_table.payload_size();
        let globals = TableId(pool.tables.alloc(GcObject::new(globals_table, white, gsize)));
        gc.account_alloc(gsize);

        let registry_table = LuaTable::new(0, 8);
        let rsize = TABLE_BASE_SIZE + registry_table.payload_size();
        let registry = TableId(pool.tables.alloc(GcObject::new(registry_table, white, rsize)));
        gc.account_alloc(rsize);

        let main = LuaThread::new(globals);
        let msize = THREAD_BASE_SIZE + main.payload_size();
        let main_thread = ThreadId(pool.threads.alloc(GcObject::new(main, white, msize)));
        gc.account_alloc(msize);
        pool.thread_mut(main_thread).data.status = CoStatus::Running;

        let mut vm = LuaVM {
            pool,
            gc,
            interner: StringInterner::new(),
            registry,
            globals,
            main_thread,
            current: main_thread,
            resume_chain: Vec::new(),
            type_metatables: [None; NUM_TYPE_TAGS],
            tm_names: Vec::new(),
            config,
            panic: None,
            error_value: LuaValue::nil(),
            n_calls: 0,
            hook: None,
            hook_mask: 0,
            hook_count: 0,
            hook_counter: 0,
            hook_last_line: 0,
            in_hook: false,
        };
        vm.boot_reserved_strings();
        vm
    }

    /// Intern the metamethod event names as fixed strings and teach the
    /// collector the keys it needs for weakness and finalization.
    fn boot_reserved_strings(&mut self) {
        for name in TM_NAMES {
            let id = self.interner.intern(name.as_bytes(), &mut self.pool, &mut self.gc);
            self.pool
                .strings
                .get_mut(id.0)
                .expect("stale string id")
                .header
                .make_fixed();
            self.tm_names.push(id);
        }
        let mode = self.intern(b"__mode");
        let gc_name = self.intern(b"__gc");
        self.gc.mode_key = Some(mode);
        self.gc.gc_key = Some(gc_name);
    }

    pub fn set_panic(&mut self, panic: Option<PanicFn>) {
        self.panic = panic;
    }

    // ---- thread access ----

    #[inline(always)]
    pub(crate) fn th(&self) -> &LuaThread {
        &self.pool.thread(self.current).data
    }

    #[inline(always)]
    pub(crate) fn th_mut(&mut self) -> &mut LuaThread {
        &mut self.pool.thread_mut(self.current).data
    }

    #[inline(always)]
    pub(crate) fn stack_get(&self, idx: usize) -> LuaValue {
        self.th().stack[idx]
    }

    #[inline(always)]
    pub(crate) fn stack_set(&mut self, idx: usize, v: LuaValue) {
        self.th_mut().stack[idx] = v;
    }

    pub fn main_thread_id(&self) -> ThreadId {
        self.main_thread
    }

    pub fn current_thread_id(&self) -> ThreadId {
        self.current
    }

    // ---- allocation ----

    #[inline]
    pub(crate) fn intern(&mut self, bytes: &[u8]) -> StringId {
        self.interner.intern(bytes, &mut self.pool, &mut self.gc)
    }

    pub fn new_string(&mut self, bytes: &[u8]) -> LuaValue {
        LuaValue::string(self.intern(bytes))
    }

    pub(crate) fn new_table(&mut self, narray: usize, nhash: usize) -> VmResult<TableId> {
        self.check_mem()?;
        let t = LuaTable::new(narray, nhash);
        let size = TABLE_BASE_SIZE + t.payload_size();
        let id = TableId(
            self.pool
                .tables
                .alloc(GcObject::new(t, self.gc.current_white, size)),
        );
        self.gc.account_alloc(size);
        Ok(id)
    }

    pub(crate) fn new_script_closure(
        &mut self,
        chunk: Rc<Chunk>,
        upvalues: Vec<UpvalueId>,
        env: TableId,
    ) -> VmResult<ClosureId> {
        self.check_mem()?;
        let size = std::mem::size_of::<GcObject<LuaClosure>>()
            + upvalues.len() * std::mem::size_of::<UpvalueId>();
        let c = LuaClosure::Script(ScriptClosure {
            chunk,
            upvalues,
            env,
        });
        let id = ClosureId(
            self.pool
                .closures
                .alloc(GcObject::new(c, self.gc.current_white, size)),
        );
        self.gc.account_alloc(size);
        Ok(id)
    }

    pub(crate) fn new_native_closure(
        &mut self,
        f: NativeFn,
        upvalues: Vec<LuaValue>,
        env: TableId,
    ) -> VmResult<ClosureId> {
        self.check_mem()?;
        let size = std::mem::size_of::<GcObject<LuaClosure>>()
            + upvalues.len() * std::mem::size_of::<LuaValue>();
        let c = LuaClosure::Native(NativeClosure { f, upvalues, env });
        let id = ClosureId(
            self.pool
                .closures
                .alloc(GcObject::new(c, self.gc.current_white, size)),
        );
        self.gc.account_alloc(size);
        Ok(id)
    }

    pub(crate) fn new_upvalue(&mut self, data: LuaUpvalue) -> UpvalueId {
        let size = std::mem::size_of::<GcObject<LuaUpvalue>>();
        let id = UpvalueId(
            self.pool
                .upvalues
                .alloc(GcObject::new(data, self.gc.current_white, size)),
        );
        self.gc.account_alloc(size);
        id
    }

    pub(crate) fn new_userdata(&mut self, len: usize, env: TableId) -> VmResult<UserdataId> {
        self.check_mem()?;
        let u = LuaUserdata {
            data: vec![0u8; len].into_boxed_slice(),
            metatable: None,
            env,
        };
        let size = std::mem::size_of::<GcObject<LuaUserdata>>() + len;
        let id = UserdataId(
            self.pool
                .userdata
                .alloc(GcObject::new(u, self.gc.current_white, size)),
        );
        self.gc.account_alloc(size);
        Ok(id)
    }

    pub(crate) fn new_thread_obj(&mut self) -> VmResult<ThreadId> {
        self.check_mem()?;
        let t = LuaThread::new(self.globals);
        let size = THREAD_BASE_SIZE + t.payload_size();
        let id = ThreadId(
            self.pool
                .threads
                .alloc(GcObject::new(t, self.gc.current_white, size)),
        );
        self.gc.account_alloc(size);
        Ok(id)
    }

    /// Refresh a thread's accounted size after its stack grew.
    pub(crate) fn refresh_thread_size(&mut self, id: ThreadId) {
        let obj = self.pool.thread_mut(id);
        let new = THREAD_BASE_SIZE + obj.data.payload_size();
        let old = obj.size;
        obj.size = new;
        self.gc.account_resize(old, new);
    }

    // ---- memory ceiling & GC driving ----

    pub(crate) fn check_mem(&mut self) -> VmResult<()> {
        if self.gc.total_bytes <= self.config.max_memory {
            return Ok(());
        }
        // emergency collection before giving up
        self.collect_garbage();
        if self.gc.total_bytes > self.config.max_memory {
            self.error_value = self.new_string(b"not enough memory");
            return Err(VmError::Memory);
        }
        Ok(())
    }

    /// GC safepoint: every value the mutator holds must be anchored on a
    /// stack, in a table, or in the registry when this is called.
    pub(crate) fn check_gc(&mut self) -> VmResult<()> {
        self.check_mem()?;
        if self.gc.should_step() {
            self.gc_step_once();
        }
        Ok(())
    }

    /// One bounded incremental step.
    pub fn gc_step_once(&mut self) {
        let mut budget = self.gc.step_budget() as isize;
        loop {
            let roots = self.gc_roots();
            match self
                .gc
                .single_step(&roots, &mut self.pool, &mut self.interner)
            {
                StepResult::Work(w) => {
                    budget -= w as isize;
                    if budget <= 0 {
                        self.gc.delay_step();
                        return;
                    }
                }
                StepResult::NeedFinalize => self.run_finalizers(),
                StepResult::CycleDone => return,
            }
        }
    }

    /// Force a complete collection cycle: finish anything in flight, then
    /// run one whole fresh cycle.
    pub fn collect_garbage(&mut self) {
        if self.gc.state != GcState::Pause {
            self.run_cycle_to_end();
        }
        self.run_cycle_to_end();
    }

    fn run_cycle_to_end(&mut self) {
        loop {
            let roots = self.gc_roots();
            match self
                .gc
                .single_step(&roots, &mut self.pool, &mut self.interner)
            {
                StepResult::Work(_) => {}
                StepResult::NeedFinalize => self.run_finalizers(),
                StepResult::CycleDone => return,
            }
        }
    }

    fn gc_roots(&self) -> Vec<LuaValue> {
        let mut roots = vec![
            LuaValue::table(self.registry),
            LuaValue::table(self.globals),
            LuaValue::thread(self.main_thread),
            LuaValue::thread(self.current),
            self.error_value,
        ];
        for t in &self.resume_chain {
            roots.push(LuaValue::thread(*t));
        }
        for mt in self.type_metatables.iter().flatten() {
            roots.push(LuaValue::table(*mt));
        }
        roots
    }

    /// Run queued `__gc` handlers under protection; a failing finalizer
    /// is dropped, not propagated.
    fn run_finalizers(&mut self) {
        while let Some(id) = self.gc.tobefnz.pop() {
            let (value, mt) = match id {
                GcId::Userdata(u) => (
                    LuaValue::userdata(u),
                    self.pool.userdata_ref(u).data.metatable,
                ),
                GcId::Table(t) => (LuaValue::table(t), self.pool.table(t).data.metatable),
                _ => continue,
            };
            let Some(mt) = mt else { continue };
            let Some(gc_key) = self.gc.gc_key else { continue };
            let handler = self.table_rawget(mt, &LuaValue::string(gc_key));
            if !handler.is_function() {
                continue;
            }
            let func_idx = self.th().top;
            self.th_mut().push(handler);
            self.th_mut().push(value);
            let _ = execute::call::pcall_at(self, func_idx, 1, 0, None);
        }
    }

    /// Memory counter as (kibibytes, remainder bytes).
    pub fn memory_count(&self) -> (usize, usize) {
        (self.gc.total_bytes >> 10, self.gc.total_bytes & 0x3FF)
    }

    // ---- raw table access with barriers ----

    #[inline]
    pub(crate) fn table_rawget(&self, t: TableId, k: &LuaValue) -> LuaValue {
        self.pool.table(t).data.get(k)
    }

    pub(crate) fn table_rawset(
        &mut self,
        t: TableId,
        k: LuaValue,
        v: LuaValue,
    ) -> VmResult<()> {
        let set_result;
        let is_black;
        {
            let obj = self.pool.table_mut(t);
            let old_size = obj.size;
            set_result = obj.data.set(k, v);
            let new_size = TABLE_BASE_SIZE + obj.data.payload_size();
            obj.size = new_size;
            is_black = obj.header.is_black();
            self.gc.account_resize(old_size, new_size);
        }
        if let Err(e) = set_result {
            return Err(self.runtime_error_msg(e.message().to_string()));
        }
        if is_black && (is_white_ref(self, &k) || is_white_ref(self, &v)) {
            self.gc.barrier_back(t, &mut self.pool);
        }
        Ok(())
    }

    /// Install a metatable on a table or userdata, with the forward
    /// barrier the reference needs.
    pub(crate) fn set_metatable_of(&mut self, v: &LuaValue, mt: Option<TableId>) -> VmResult<()> {
        if let Some(t) = v.as_table_id() {
            self.pool.table_mut(t).data.metatable = mt;
            self.pool.table_mut(t).data.flags = 0;
            if let Some(m) = mt {
                self.gc
                    .barrier_forward(GcId::Table(t), &LuaValue::table(m), &mut self.pool);
            }
            Ok(())
        } else if let Some(u) = v.as_userdata_id() {
            self.pool.userdata_mut(u).data.metatable = mt;
            if let Some(m) = mt {
                self.gc
                    .barrier_forward(GcId::Userdata(u), &LuaValue::table(m), &mut self.pool);
            }
            Ok(())
        } else {
            self.type_metatables[v.ttype() as usize] = mt;
            Ok(())
        }
    }

    // ---- upvalues ----

    /// Find or create the open upvalue for a stack slot of the current
    /// thread. Upvalues over the same slot are shared by identity.
    pub(crate) fn find_upvalue(&mut self, slot: usize) -> UpvalueId {
        let tid = self.current;
        {
            let th = self.th();
            for &uid in &th.open_upvalues {
                if let LuaUpvalue::Open { slot: s, .. } = &self.pool.upvalue(uid).data {
                    if *s == slot {
                        return uid;
                    }
                }
            }
        }
        let uid = self.new_upvalue(LuaUpvalue::Open { thread: tid, slot });
        // keep the list ordered, highest slot first, so closing a region
        // can stop at the first slot below it
        let slots: Vec<usize> = {
            let th = &self.pool.thread(tid).data;
            th.open_upvalues
                .iter()
                .map(|&u| match &self.pool.upvalue(u).data {
                    LuaUpvalue::Open { slot: s, .. } => *s,
                    LuaUpvalue::Closed(_) => 0,
                })
                .collect()
        };
        let pos = slots.iter().position(|&s| s < slot).unwrap_or(slots.len());
        self.pool
            .thread_mut(tid)
            .data
            .open_upvalues
            .insert(pos, uid);
        uid
    }

    /// Close every open upvalue of `tid` pointing at `from` or above.
    pub(crate) fn close_upvalues(&mut self, tid: ThreadId, from: usize) {
        let to_close: Vec<(UpvalueId, usize)> = {
            let th = &self.pool.thread(tid).data;
            th.open_upvalues
                .iter()
                .filter_map(|&uid| match &self.pool.upvalue(uid).data {
                    LuaUpvalue::Open { slot, .. } if *slot >= from => Some((uid, *slot)),
                    _ => None,
                })
                .collect()
        };
        for (uid, slot) in &to_close {
            let v = self.pool.thread(tid).data.stack[*slot];
            self.pool.upvalue_mut(*uid).data = LuaUpvalue::Closed(v);
            self.gc
                .barrier_forward(GcId::Upvalue(*uid), &v, &mut self.pool);
        }
        let th = &mut self.pool.thread_mut(tid).data;
        th.open_upvalues
            .retain(|uid| !to_close.iter().any(|(c, _)| c == uid));
    }

    /// Current value of an upvalue cell.
    pub(crate) fn upvalue_get(&self, uid: UpvalueId) -> LuaValue {
        match &self.pool.upvalue(uid).data {
            LuaUpvalue::Closed(v) => *v,
            LuaUpvalue::Open { thread, slot } => self.pool.thread(*thread).data.stack[*slot],
        }
    }

    pub(crate) fn upvalue_set(&mut self, uid: UpvalueId, v: LuaValue) {
        let target = match &self.pool.upvalue(uid).data {
            LuaUpvalue::Closed(_) => None,
            LuaUpvalue::Open { thread, slot } => Some((*thread, *slot)),
        };
        match target {
            Some((tid, slot)) => self.pool.thread_mut(tid).data.stack[slot] = v,
            None => {
                self.pool.upvalue_mut(uid).data = LuaUpvalue::Closed(v);
                self.gc
                    .barrier_forward(GcId::Upvalue(uid), &v, &mut self.pool);
            }
        }
    }

    // ---- call-depth guard ----

    pub(crate) fn enter_call(&mut self) -> VmResult<()> {
        self.n_calls += 1;
        if self.n_calls as usize > self.config.max_call_depth {
            self.n_calls -= 1;
            return Err(self.runtime_error_msg("stack overflow".to_string()));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn leave_call(&mut self) {
        debug_assert!(self.n_calls > 0);
        self.n_calls -= 1;
    }

    // ---- errors ----

    /// "source:line: " for the current script frame, empty otherwise.
    pub(crate) fn position_prefix(&self) -> String {
        let th = self.th();
        let Some(ci) = th.current_ci() else {
            return String::new();
        };
        if !ci.is_script() {
            return String::new();
        }
        let func = th.stack[ci.func];
        let Some(cid) = func.as_closure_id() else {
            return String::new();
        };
        match self.pool.closure(cid).data.as_script() {
            Some(sc) => {
                let pc = ci.saved_pc.saturating_sub(1) as usize;
                let line = sc.chunk.line_at(pc);
                format!("{}:{}: ", sc.chunk.display_source(), line)
            }
            None => String::new(),
        }
    }

    /// Raise a runtime error with a position-prefixed message.
    pub(crate) fn runtime_error_msg(&mut self, msg: String) -> VmError {
        let full = format!("{}{}", self.position_prefix(), msg);
        self.error_value = self.new_string(full.as_bytes());
        self.errormsg(VmError::Runtime)
    }

    /// Shorthand for `Err(self.runtime_error_msg(...))` with any Ok type.
    pub(crate) fn runtime_error<T>(&mut self, msg: String) -> VmResult<T> {
        Err(self.runtime_error_msg(msg))
    }

    /// Raise with an arbitrary error object (API `error`).
    pub(crate) fn throw_value(&mut self, v: LuaValue) -> VmError {
        self.error_value = v;
        self.errormsg(VmError::Runtime)
    }

    /// Route an error through the active handler, if any. The handler
    /// rewrites the error object; a failure inside it degrades the error
    /// to ErrErr. Memory errors bypass the handler entirely.
    pub(crate) fn errormsg(&mut self, kind: VmError) -> VmError {
        if kind == VmError::Memory {
            return kind;
        }
        let Some(errfunc) = self.th().errfunc else {
            return kind;
        };
        // disarm while the handler runs so it cannot recurse
        self.th_mut().errfunc = None;
        let handler = self.stack_get(errfunc);
        if !handler.is_function() {
            self.th_mut().errfunc = Some(errfunc);
            return VmError::ErrErr;
        }
        let err_obj = self.error_value;
        let func_idx = self.th().top;
        self.th_mut().push(handler);
        self.th_mut().push(err_obj);
        let result = execute::call::call_at(self, func_idx, 1, 1);
        self.th_mut().errfunc = Some(errfunc);
        match result {
            Ok(()) => {
                self.error_value = self.th_mut().pop();
                kind
            }
            Err(_) => {
                self.error_value = self.new_string(b"error in error handling");
                VmError::ErrErr
            }
        }
    }

    /// Pair an error kind with the rendered error object, for hosts that
    /// want one `std::error::Error` value.
    pub fn full_error(&self, kind: VmError) -> FullError {
        FullError {
            kind,
            message: self.display_value(&self.error_value),
        }
    }

    /// Last-resort handling for an error that escaped every protected
    /// boundary: give the panic callback a chance, then abort.
    pub(crate) fn unprotected_error(&mut self, e: VmError) -> ! {
        if let Some(panic) = self.panic {
            let obj = self.error_value;
            self.th_mut().push(obj);
            panic(self);
        }
        let msg = self.display_value(&self.error_value);
        panic!("unprotected error in call to runtime API ({msg}): {e}");
    }

    // ---- coercions ----

    /// Number coercion: numbers pass through, strings parse with optional
    /// hex prefix, everything else fails.
    pub(crate) fn tonumber_value(&self, v: &LuaValue) -> Option<f64> {
        if v.is_number() {
            return Some(v.nvalue());
        }
        if v.is_string() {
            return str_to_number(self.pool.string_bytes(v.svalue()));
        }
        None
    }

    /// String coercion used by concat and `to_lstring`: numbers become
    /// interned strings, strings pass through.
    pub(crate) fn tostring_value(&mut self, v: &LuaValue) -> Option<LuaValue> {
        if v.is_string() {
            return Some(*v);
        }
        if v.is_number() {
            let s = number_to_string(v.nvalue());
            return Some(self.new_string(s.as_bytes()));
        }
        None
    }

    /// Readable rendering for error messages and the panic path.
    pub(crate) fn display_value(&self, v: &LuaValue) -> String {
        if v.is_string() {
            return self.pool.string(v.svalue()).data.to_display().into_owned();
        }
        if v.is_number() {
            return number_to_string(v.nvalue());
        }
        match v.ttype() {
            crate::lua_value::lua_value::LUA_TNIL => "nil".to_string(),
            crate::lua_value::lua_value::LUA_TBOOLEAN => v.bvalue().to_string(),
            _ => format!("{}: {:?}", v.type_name(), v.gc_index().map(|(_, i)| i)),
        }
    }
}

fn is_white_ref(vm: &LuaVM, v: &LuaValue) -> bool {
    match value_gc_id(v) {
        Some(id) => match id {
            GcId::String(i) => vm.pool.strings.get(i.0).map(|o| o.header.is_white()),
            GcId::Table(i) => vm.pool.tables.get(i.0).map(|o| o.header.is_white()),
            GcId::Closure(i) => vm.pool.closures.get(i.0).map(|o| o.header.is_white()),
            GcId::Upvalue(i) => vm.pool.upvalues.get(i.0).map(|o| o.header.is_white()),
            GcId::Userdata(i) => vm.pool.userdata.get(i.0).map(|o| o.header.is_white()),
            GcId::Thread(i) => vm.pool.threads.get(i.0).map(|o| o.header.is_white()),
        }
        .unwrap_or(false),
        None => false,
    }
}

/// Parse a number the way the runtime coerces strings: optional
/// whitespace, optional sign, decimal or 0x-prefixed hex, nothing
/// trailing.
pub fn str_to_number(bytes: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(bytes).ok()?;
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if s.is_empty() {
        return None;
    }
    let (neg, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let n = if let Some(hex) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()? as f64
    } else {
        // reject forms Rust accepts but the runtime should not
        if body.contains(['i', 'n', 'N']) && !body.eq_ignore_ascii_case("inf") {
            return None;
        }
        body.parse::<f64>().ok()?
    };
    Some(if neg { -n } else { n })
}

/// Render a number: integral values print without a decimal point, other
/// values use shortest round-trip formatting.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    format!("{}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_to_number() {
        assert_eq!(str_to_number(b"42"), Some(42.0));
        assert_eq!(str_to_number(b"  3.5  "), Some(3.5));
        assert_eq!(str_to_number(b"0x10"), Some(16.0));
        assert_eq!(str_to_number(b"-0x10"), Some(-16.0));
        assert_eq!(str_to_number(b"1e3"), Some(1000.0));
        assert_eq!(str_to_number(b""), None);
        assert_eq!(str_to_number(b"12ab"), None);
        assert_eq!(str_to_number(b"ab"), None);
    }

    #[test]
    fn test_number_to_string_roundtrip() {
        for n in [0.0, 7.0, -3.0, 0.1, 1.5e300, -2.25, 123456789.125] {
            let s = number_to_string(n);
            assert_eq!(str_to_number(s.as_bytes()), Some(n), "{s}");
        }
        assert_eq!(number_to_string(7.0), "7");
        assert_eq!(number_to_string(-0.5), "-0.5");
    }

    #[test]
    fn test_memory_counter_units() {
        let vm = LuaVM::new(VmConfig::default());
        let (kb, rem) = vm.memory_count();
        assert_eq!(kb * 1024 + rem, vm.gc.total_bytes);
        assert!(rem < 1024);
    }
}
