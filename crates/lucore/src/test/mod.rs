// Test support.
//
// The compiler is an external collaborator, so these suites hand-assemble
// prototypes with a tiny builder and drive the runtime through the
// embedding API.
//
// Assembly discipline: interning (kstr) never steps the collector, but
// API calls like create_table do. Keep "assemble chunk" and "create
// closure" adjacent with no allocating API calls in between, so string
// constants cannot be condemned while they are only anchored in the
// builder.

pub mod test_api;
pub mod test_calls;
pub mod test_closures;
pub mod test_table;

use std::rc::Rc;

use crate::lua_value::{Chunk, LuaValue};
use crate::lua_vm::{Instruction, LuaVM, NativeFn, ThreadStatus, VmConfig};

pub(crate) fn vm() -> LuaVM {
    LuaVM::new(VmConfig::default())
}

/// Minimal prototype builder.
pub(crate) struct Asm {
    pub code: Vec<Instruction>,
    pub constants: Vec<LuaValue>,
    pub protos: Vec<Rc<Chunk>>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack: u8,
    pub nups: u8,
}

impl Asm {
    pub fn new(max_stack: u8) -> Self {
        Asm {
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack,
            nups: 0,
        }
    }

    pub fn params(mut self, n: u8) -> Self {
        self.num_params = n;
        self
    }

    pub fn vararg(mut self) -> Self {
        self.is_vararg = true;
        self
    }

    pub fn upvals(mut self, n: u8) -> Self {
        self.nups = n;
        self
    }

    pub fn emit(&mut self, i: Instruction) -> &mut Self {
        self.code.push(i);
        self
    }

    /// Raw word (SETLIST extended block index).
    pub fn raw(&mut self, w: u32) -> &mut Self {
        self.code.push(Instruction(w));
        self
    }

    pub fn knum(&mut self, n: f64) -> u32 {
        self.constants.push(LuaValue::number(n));
        (self.constants.len() - 1) as u32
    }

    pub fn kstr(&mut self, vm: &mut LuaVM, s: &str) -> u32 {
        let v = vm.new_string(s.as_bytes());
        self.constants.push(v);
        (self.constants.len() - 1) as u32
    }

    pub fn proto(&mut self, p: Rc<Chunk>) -> u32 {
        self.protos.push(p);
        (self.protos.len() - 1) as u32
    }

    pub fn build(self, source: &str) -> Rc<Chunk> {
        let n = self.code.len();
        Rc::new(Chunk {
            source: format!("@{source}"),
            line_defined: 0,
            last_line_defined: 0,
            num_params: self.num_params,
            is_vararg: self.is_vararg,
            max_stack_size: self.max_stack,
            nups: self.nups,
            code: self.code.into_iter().map(|i| i.0).collect(),
            constants: self.constants,
            protos: self.protos,
            line_info: (1..=n as u32).collect(),
            locvars: Vec::new(),
            upvalue_names: Vec::new(),
        })
    }
}

pub(crate) fn push_closure(vm: &mut LuaVM, chunk: Rc<Chunk>) {
    let env = vm.globals;
    let cid = vm
        .new_script_closure(chunk, Vec::new(), env)
        .expect("closure allocation");
    vm.push(LuaValue::function(cid));
}

pub(crate) fn register_native(vm: &mut LuaVM, name: &str, f: NativeFn) {
    vm.push_native_closure(f, 0).expect("native closure");
    vm.set_global(name).expect("set_global");
}

/// Push a closure over `chunk` and pcall it with no arguments.
pub(crate) fn call_chunk(vm: &mut LuaVM, chunk: Rc<Chunk>, nresults: i32) -> ThreadStatus {
    push_closure(vm, chunk);
    vm.pcall(0, nresults, 0)
}
