pub mod chunk_serializer;
mod lua_closure;
mod lua_string;
mod lua_table;
pub mod lua_value;

pub use lua_closure::{Chunk, LocVar, LuaClosure, LuaUpvalue, LuaUserdata, NativeClosure, ScriptClosure};
pub use lua_string::LuaString;
pub use lua_table::{LuaTable, TableKeyError};
pub use lua_value::LuaValue;
