// lucore - an embeddable Lua 5.1 runtime core
// Bytecode VM, incremental GC, tables, coroutines, and a stack-based
// embedding API. Compiler, stdlib and host front-end live elsewhere.

#[cfg(test)]
mod test;

pub mod gc;
pub mod lua_value;
pub mod lua_vm;

pub use gc::{GC, GcId, ObjectPool, StringId, StringInterner, TableId, ThreadId, lua_hash};
pub use lua_value::{Chunk, LocVar, LuaClosure, LuaString, LuaTable, LuaValue};
pub use lua_vm::api::{ENVIRON_INDEX, GLOBALS_INDEX, REGISTRY_INDEX, upvalue_index};
pub use lua_vm::{
    CoStatus, FullError, HookEvent, Instruction, LuaVM, NativeFn, OpCode, ThreadStatus, VmConfig,
    VmError, VmResult, hook_mask,
};
