// Binary chunk writer/loader.
//
// Little-endian header followed by one recursive prototype. The loader is
// bit-exact against the writer on the same platform profile: header size
// bytes are fixed at int=4, size_t=8, Instruction=4, Number=8 (f64),
// non-integral numbers.
//
// Strings on the wire carry a trailing NUL and are length-prefixed with a
// size_t; a length of zero means the absent string.

use std::io::{Read, Write};
use std::rc::Rc;

use super::lua_value::{LUA_TBOOLEAN, LUA_TNIL, LUA_TNUMBER, LUA_TSTRING};
use super::{Chunk, LocVar, LuaValue};
use crate::lua_vm::LuaVM;

pub const SIGNATURE: &[u8; 4] = b"\x1bLua";
pub const VERSION: u8 = 0x51;
pub const FORMAT: u8 = 0;
const LITTLE_ENDIAN: u8 = 1;
const SIZEOF_INT: u8 = 4;
const SIZEOF_SIZE_T: u8 = 8;
const SIZEOF_INSTRUCTION: u8 = 4;
const SIZEOF_NUMBER: u8 = 8;
const INTEGRAL_FLAG: u8 = 0;

const VARARG_FLAG: u8 = 2;

// ---- writing ----

struct Dumper<'a, 'w> {
    vm: &'a LuaVM,
    w: &'w mut dyn Write,
}

impl Dumper<'_, '_> {
    fn block(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.w
            .write_all(bytes)
            .map_err(|e| format!("unable to dump: {e}"))
    }

    fn byte(&mut self, b: u8) -> Result<(), String> {
        self.block(&[b])
    }

    fn int(&mut self, i: u32) -> Result<(), String> {
        self.block(&i.to_le_bytes())
    }

    fn size(&mut self, s: u64) -> Result<(), String> {
        self.block(&s.to_le_bytes())
    }

    fn number(&mut self, n: f64) -> Result<(), String> {
        self.block(&n.to_le_bytes())
    }

    fn string(&mut self, s: &[u8]) -> Result<(), String> {
        if s.is_empty() {
            self.size(0)
        } else {
            self.size(s.len() as u64 + 1)?;
            self.block(s)?;
            self.byte(0)
        }
    }

    fn header(&mut self) -> Result<(), String> {
        self.block(SIGNATURE)?;
        self.byte(VERSION)?;
        self.byte(FORMAT)?;
        self.byte(LITTLE_ENDIAN)?;
        self.byte(SIZEOF_INT)?;
        self.byte(SIZEOF_SIZE_T)?;
        self.byte(SIZEOF_INSTRUCTION)?;
        self.byte(SIZEOF_NUMBER)?;
        self.byte(INTEGRAL_FLAG)
    }

    fn constant(&mut self, v: &LuaValue) -> Result<(), String> {
        match v.ttype() {
            LUA_TNIL => self.byte(LUA_TNIL),
            LUA_TBOOLEAN => {
                self.byte(LUA_TBOOLEAN)?;
                self.byte(v.bvalue() as u8)
            }
            LUA_TNUMBER => {
                self.byte(LUA_TNUMBER)?;
                self.number(v.nvalue())
            }
            LUA_TSTRING => {
                self.byte(LUA_TSTRING)?;
                let bytes = self.vm.pool.string_bytes(v.svalue()).to_vec();
                self.string(&bytes)
            }
            _ => Err("bad constant in prototype".to_string()),
        }
    }

    fn function(&mut self, chunk: &Chunk) -> Result<(), String> {
        self.string(chunk.source.as_bytes())?;
        self.int(chunk.line_defined)?;
        self.int(chunk.last_line_defined)?;
        self.byte(chunk.nups)?;
        self.byte(chunk.num_params)?;
        self.byte(if chunk.is_vararg { VARARG_FLAG } else { 0 })?;
        self.byte(chunk.max_stack_size)?;

        self.int(chunk.code.len() as u32)?;
        for i in &chunk.code {
            self.int(*i)?;
        }

        self.int(chunk.constants.len() as u32)?;
        for c in &chunk.constants {
            self.constant(c)?;
        }

        self.int(chunk.protos.len() as u32)?;
        for p in &chunk.protos {
            self.function(p)?;
        }

        self.int(chunk.line_info.len() as u32)?;
        for l in &chunk.line_info {
            self.int(*l)?;
        }
        self.int(chunk.locvars.len() as u32)?;
        for lv in &chunk.locvars {
            self.string(lv.name.as_bytes())?;
            self.int(lv.start_pc)?;
            self.int(lv.end_pc)?;
        }
        self.int(chunk.upvalue_names.len() as u32)?;
        for name in &chunk.upvalue_names {
            self.string(name.as_bytes())?;
        }
        Ok(())
    }
}

pub fn dump(vm: &LuaVM, chunk: &Chunk, w: &mut dyn Write) -> Result<(), String> {
    let mut d = Dumper { vm, w };
    d.header()?;
    d.function(chunk)
}

// ---- loading ----

struct Undumper<'a, 'r> {
    vm: &'a mut LuaVM,
    r: &'r mut dyn Read,
    chunk_name: String,
}

impl Undumper<'_, '_> {
    fn block(&mut self, n: usize) -> Result<Vec<u8>, String> {
        let mut buf = vec![0u8; n];
        self.r
            .read_exact(&mut buf)
            .map_err(|_| format!("{}: unexpected end in precompiled chunk", self.chunk_name))?;
        Ok(buf)
    }

    fn byte(&mut self) -> Result<u8, String> {
        Ok(self.block(1)?[0])
    }

    fn int(&mut self) -> Result<u32, String> {
        let b = self.block(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn size(&mut self) -> Result<u64, String> {
        let b = self.block(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(&b);
        Ok(u64::from_le_bytes(a))
    }

    fn number(&mut self) -> Result<f64, String> {
        let b = self.block(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(&b);
        Ok(f64::from_le_bytes(a))
    }

    fn string(&mut self) -> Result<Vec<u8>, String> {
        let n = self.size()? as usize;
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut bytes = self.block(n)?;
        bytes.pop(); // trailing NUL
        Ok(bytes)
    }

    fn header(&mut self) -> Result<(), String> {
        let sig = self.block(4)?;
        if sig != SIGNATURE {
            return Err(format!("{}: not a precompiled chunk", self.chunk_name));
        }
        let version = self.byte()?;
        if version != VERSION {
            return Err(format!("{}: version mismatch in precompiled chunk", self.chunk_name));
        }
        let expect = [
            FORMAT,
            LITTLE_ENDIAN,
            SIZEOF_INT,
            SIZEOF_SIZE_T,
            SIZEOF_INSTRUCTION,
            SIZEOF_NUMBER,
            INTEGRAL_FLAG,
        ];
        for e in expect {
            if self.byte()? != e {
                return Err(format!(
                    "{}: incompatible precompiled chunk",
                    self.chunk_name
                ));
            }
        }
        Ok(())
    }

    fn constant(&mut self) -> Result<LuaValue, String> {
        let t = self.byte()?;
        match t {
            LUA_TNIL => Ok(LuaValue::nil()),
            LUA_TBOOLEAN => Ok(LuaValue::boolean(self.byte()? != 0)),
            LUA_TNUMBER => Ok(LuaValue::number(self.number()?)),
            LUA_TSTRING => {
                let bytes = self.string()?;
                Ok(self.vm.new_string(&bytes))
            }
            _ => Err(format!(
                "{}: bad constant in precompiled chunk",
                self.chunk_name
            )),
        }
    }

    fn function(&mut self) -> Result<Rc<Chunk>, String> {
        let source_bytes = self.string()?;
        let source = if source_bytes.is_empty() {
            self.chunk_name.clone()
        } else {
            String::from_utf8_lossy(&source_bytes).into_owned()
        };
        let line_defined = self.int()?;
        let last_line_defined = self.int()?;
        let nups = self.byte()?;
        let num_params = self.byte()?;
        let is_vararg = self.byte()? != 0;
        let max_stack_size = self.byte()?;

        let ncode = self.int()? as usize;
        let mut code = Vec::with_capacity(ncode);
        for _ in 0..ncode {
            code.push(self.int()?);
        }

        let nconst = self.int()? as usize;
        let mut constants = Vec::with_capacity(nconst);
        for _ in 0..nconst {
            constants.push(self.constant()?);
        }

        let nproto = self.int()? as usize;
        let mut protos = Vec::with_capacity(nproto);
        for _ in 0..nproto {
            protos.push(self.function()?);
        }

        let nlines = self.int()? as usize;
        let mut line_info = Vec::with_capacity(nlines);
        for _ in 0..nlines {
            line_info.push(self.int()?);
        }
        let nlocs = self.int()? as usize;
        let mut locvars = Vec::with_capacity(nlocs);
        for _ in 0..nlocs {
            let name = String::from_utf8_lossy(&self.string()?).into_owned();
            let start_pc = self.int()?;
            let end_pc = self.int()?;
            locvars.push(LocVar {
                name,
                start_pc,
                end_pc,
            });
        }
        let nupnames = self.int()? as usize;
        let mut upvalue_names = Vec::with_capacity(nupnames);
        for _ in 0..nupnames {
            upvalue_names.push(String::from_utf8_lossy(&self.string()?).into_owned());
        }

        Ok(Rc::new(Chunk {
            source,
            line_defined,
            last_line_defined,
            num_params,
            is_vararg,
            max_stack_size,
            nups,
            code,
            constants,
            protos,
            line_info,
            locvars,
            upvalue_names,
        }))
    }
}

pub fn undump(
    vm: &mut LuaVM,
    r: &mut dyn Read,
    chunk_name: &str,
) -> Result<Rc<Chunk>, String> {
    let mut u = Undumper {
        vm,
        r,
        chunk_name: chunk_name.to_string(),
    };
    u.header()?;
    u.function()
}
