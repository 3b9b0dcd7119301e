// The bytecode interpreter.
//
// One flat dispatch loop, re-entered through the 'startfunc label whenever
// the script-level frame changes (call, tail call, return): script-to-
// script transfers never recurse into the host stack, so tail calls run
// in constant space and deep call chains are bounded only by the frame
// limit.
//
// Between any two instructions the thread is consistent: pc is saved in
// the frame, the stack top is at the frame ceiling, and every live value
// sits below it. That is what makes error unwinds, yields, hooks and GC
// steps legal at instruction boundaries.

pub mod call;
pub mod metamethod;

use crate::lua_value::{LuaClosure, LuaValue};
use crate::lua_vm::call_info::MULTRET;
use crate::lua_vm::debug_hook::{HookEvent, hook_mask};
use crate::lua_vm::execute::metamethod::{
    ArithOp, arith, concat, equal_values, get_table_value, less_equal, less_than, object_length,
    set_table_value,
};
use crate::lua_vm::opcode::{FIELDS_PER_FLUSH, Instruction, OpCode, fb2int, index_k, is_k};
use crate::lua_vm::{LuaVM, VmResult};

/// Execute the current thread until its frame depth returns to
/// `target_depth`.
pub(crate) fn run(vm: &mut LuaVM, target_depth: usize) -> VmResult<()> {
    'startfunc: loop {
        if vm.th().depth() <= target_depth {
            return Ok(());
        }

        // ---- load frame context ----
        let tid = vm.current;
        let (mut base, mut pc, func_idx) = {
            let ci = vm.th().current_ci().expect("depth checked above");
            debug_assert!(ci.is_script(), "run entered with a native frame on top");
            (ci.base, ci.saved_pc as usize, ci.func)
        };
        let (chunk, upvalues, env) = {
            let cid = vm.stack_get(func_idx).clvalue();
            match &vm.pool.closure(cid).data {
                LuaClosure::Script(sc) => (sc.chunk.clone(), sc.upvalues.clone(), sc.env),
                LuaClosure::Native(_) => {
                    unreachable!("script frame holds a native closure")
                }
            }
        };
        let k = &chunk.constants;
        let code = &chunk.code;
        let nfix = chunk.num_params as usize;

        macro_rules! save_pc {
            () => {
                vm.th_mut().current_ci_mut().expect("frame alive").saved_pc = pc as u32;
            };
        }
        // an RK operand: constant-pool entry or register
        macro_rules! rk {
            ($x:expr) => {{
                let x = $x;
                if is_k(x) {
                    k[index_k(x)]
                } else {
                    vm.stack_get(base + x as usize)
                }
            }};
        }
        macro_rules! frame_top {
            () => {
                vm.th().current_ci().expect("frame alive").top
            };
        }

        // ---- dispatch loop ----
        loop {
            if vm.hook_mask & (hook_mask::LINE | hook_mask::COUNT) != 0 && !vm.in_hook {
                save_pc!();
                trace_hooks(vm, &chunk, pc)?;
                base = vm.th().current_ci().expect("frame alive").base;
            }

            let inst = Instruction(code[pc]);
            pc += 1;
            save_pc!();

            match inst.opcode() {
                OpCode::Move => {
                    let v = vm.stack_get(base + inst.b() as usize);
                    vm.stack_set(base + inst.a() as usize, v);
                }
                OpCode::LoadK => {
                    vm.stack_set(base + inst.a() as usize, k[inst.bx() as usize]);
                }
                OpCode::LoadBool => {
                    vm.stack_set(base + inst.a() as usize, LuaValue::boolean(inst.b() != 0));
                    if inst.c() != 0 {
                        pc += 1;
                    }
                }
                OpCode::LoadNil => {
                    // R(A) through R(B), inclusive
                    for i in inst.a()..=inst.b() {
                        vm.stack_set(base + i as usize, LuaValue::nil());
                    }
                }
                OpCode::GetUpval => {
                    let v = vm.upvalue_get(upvalues[inst.b() as usize]);
                    vm.stack_set(base + inst.a() as usize, v);
                }
                OpCode::SetUpval => {
                    let v = vm.stack_get(base + inst.a() as usize);
                    vm.upvalue_set(upvalues[inst.b() as usize], v);
                }
                OpCode::GetGlobal => {
                    let key = k[inst.bx() as usize];
                    let v = get_table_value(vm, LuaValue::table(env), key)?;
                    vm.stack_set(base + inst.a() as usize, v);
                }
                OpCode::SetGlobal => {
                    let key = k[inst.bx() as usize];
                    let v = vm.stack_get(base + inst.a() as usize);
                    set_table_value(vm, LuaValue::table(env), key, v)?;
                }
                OpCode::GetTable => {
                    let t = vm.stack_get(base + inst.b() as usize);
                    let key = rk!(inst.c());
                    let v = get_table_value(vm, t, key)?;
                    vm.stack_set(base + inst.a() as usize, v);
                }
                OpCode::SetTable => {
                    let t = vm.stack_get(base + inst.a() as usize);
                    let key = rk!(inst.b());
                    let v = rk!(inst.c());
                    set_table_value(vm, t, key, v)?;
                }
                OpCode::NewTable => {
                    let narray = fb2int(inst.b()) as usize;
                    let nhash = fb2int(inst.c()) as usize;
                    let t = vm.new_table(narray, nhash)?;
                    vm.stack_set(base + inst.a() as usize, LuaValue::table(t));
                    vm.check_gc()?;
                }
                OpCode::SelfIndex => {
                    let a = inst.a() as usize;
                    let obj = vm.stack_get(base + inst.b() as usize);
                    let key = rk!(inst.c());
                    vm.stack_set(base + a + 1, obj);
                    let v = get_table_value(vm, obj, key)?;
                    vm.stack_set(base + a, v);
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod
                | OpCode::Pow => {
                    let op = match inst.opcode() {
                        OpCode::Add => ArithOp::Add,
                        OpCode::Sub => ArithOp::Sub,
                        OpCode::Mul => ArithOp::Mul,
                        OpCode::Div => ArithOp::Div,
                        OpCode::Mod => ArithOp::Mod,
                        _ => ArithOp::Pow,
                    };
                    let x = rk!(inst.b());
                    let y = rk!(inst.c());
                    let v = if x.is_number() && y.is_number() {
                        LuaValue::number(op.apply(x.nvalue(), y.nvalue()))
                    } else {
                        arith(vm, op, x, y)?
                    };
                    vm.stack_set(base + inst.a() as usize, v);
                }
                OpCode::Unm => {
                    let x = vm.stack_get(base + inst.b() as usize);
                    let v = if x.is_number() {
                        LuaValue::number(-x.nvalue())
                    } else {
                        arith(vm, ArithOp::Unm, x, x)?
                    };
                    vm.stack_set(base + inst.a() as usize, v);
                }
                OpCode::Not => {
                    let x = vm.stack_get(base + inst.b() as usize);
                    vm.stack_set(base + inst.a() as usize, LuaValue::boolean(x.is_falsy()));
                }
                OpCode::Len => {
                    let x = vm.stack_get(base + inst.b() as usize);
                    let v = object_length(vm, x)?;
                    vm.stack_set(base + inst.a() as usize, v);
                }
                OpCode::Concat => {
                    let b = inst.b() as usize;
                    let c = inst.c() as usize;
                    concat(vm, c - b + 1, base + c)?;
                    let v = vm.stack_get(base + b);
                    vm.stack_set(base + inst.a() as usize, v);
                    vm.check_gc()?;
                }
                OpCode::Jmp => {
                    pc = (pc as i64 + inst.sbx() as i64) as usize;
                }
                OpCode::Eq | OpCode::Lt | OpCode::Le => {
                    let x = rk!(inst.b());
                    let y = rk!(inst.c());
                    let res = match inst.opcode() {
                        OpCode::Eq => equal_values(vm, x, y)?,
                        OpCode::Lt => less_than(vm, x, y)?,
                        _ => less_equal(vm, x, y)?,
                    };
                    if res == (inst.a() != 0) {
                        let jmp = Instruction(code[pc]);
                        debug_assert_eq!(jmp.opcode(), OpCode::Jmp);
                        pc = (pc as i64 + jmp.sbx() as i64) as usize;
                    }
                    pc += 1;
                }
                OpCode::Test => {
                    let x = vm.stack_get(base + inst.a() as usize);
                    if x.is_truthy() == (inst.c() != 0) {
                        let jmp = Instruction(code[pc]);
                        pc = (pc as i64 + jmp.sbx() as i64) as usize;
                    }
                    pc += 1;
                }
                OpCode::TestSet => {
                    let x = vm.stack_get(base + inst.b() as usize);
                    if x.is_truthy() == (inst.c() != 0) {
                        vm.stack_set(base + inst.a() as usize, x);
                        let jmp = Instruction(code[pc]);
                        pc = (pc as i64 + jmp.sbx() as i64) as usize;
                    }
                    pc += 1;
                }
                OpCode::Call => {
                    let a = inst.a() as usize;
                    let b = inst.b() as usize;
                    let c = inst.c() as usize;
                    let func_pos = base + a;
                    if b != 0 {
                        vm.th_mut().top = func_pos + b;
                    }
                    let nresults = if c == 0 { MULTRET } else { (c - 1) as i32 };
                    match call::precall(vm, func_pos, nresults)? {
                        call::Precall::Script => continue 'startfunc,
                        call::Precall::Native => {
                            if c != 0 {
                                let t = frame_top!();
                                vm.th_mut().top = t;
                            }
                        }
                    }
                }
                OpCode::TailCall => {
                    let a = inst.a() as usize;
                    let b = inst.b() as usize;
                    let func_pos = base + a;
                    if b != 0 {
                        vm.th_mut().top = func_pos + b;
                    }
                    let callee = vm.stack_get(func_pos);
                    let callee_is_script = callee
                        .as_closure_id()
                        .map(|cid| !vm.pool.closure(cid).data.is_native())
                        .unwrap_or(false);
                    if callee_is_script {
                        // reuse this frame: slide callee+args down over it
                        vm.close_upvalues(tid, base);
                        let (nresults, tailcalls) = {
                            let ci = *vm.th().current_ci().expect("frame alive");
                            (ci.nresults, ci.tailcalls)
                        };
                        let n = vm.th().top - func_pos;
                        {
                            let th = vm.th_mut();
                            for i in 0..n {
                                th.stack[func_idx + i] = th.stack[func_pos + i];
                            }
                            th.top = func_idx + n;
                            th.call_infos.pop();
                        }
                        match call::precall(vm, func_idx, nresults)? {
                            call::Precall::Script => {
                                let ci = vm.th_mut().current_ci_mut().expect("frame pushed");
                                ci.flags |= crate::lua_vm::call_flags::TAIL;
                                ci.tailcalls = tailcalls + 1;
                                continue 'startfunc;
                            }
                            call::Precall::Native => {
                                unreachable!("script callee cannot finish natively")
                            }
                        }
                    } else {
                        // native callee (or __call): degenerate to CALL
                        // followed by this frame's return
                        match call::precall(vm, func_pos, MULTRET)? {
                            call::Precall::Script => continue 'startfunc,
                            call::Precall::Native => {
                                vm.close_upvalues(tid, base);
                                let wanted = call::poscall(vm, func_pos)?;
                                if vm.th().depth() <= target_depth {
                                    return Ok(());
                                }
                                if wanted != MULTRET {
                                    let t = frame_top!();
                                    vm.th_mut().top = t;
                                }
                                continue 'startfunc;
                            }
                        }
                    }
                }
                OpCode::Return => {
                    let a = inst.a() as usize;
                    let b = inst.b() as usize;
                    let first = base + a;
                    vm.close_upvalues(tid, base);
                    if b != 0 {
                        vm.th_mut().top = first + b - 1;
                    }
                    let wanted = call::poscall(vm, first)?;
                    if vm.th().depth() <= target_depth {
                        return Ok(());
                    }
                    if wanted != MULTRET {
                        let t = frame_top!();
                        vm.th_mut().top = t;
                    }
                    continue 'startfunc;
                }
                OpCode::ForPrep => {
                    let a = inst.a() as usize;
                    let ra = base + a;
                    let init = vm.stack_get(ra);
                    let limit = vm.stack_get(ra + 1);
                    let step = vm.stack_get(ra + 2);
                    let Some(init) = vm.tonumber_value(&init) else {
                        return vm.runtime_error("'for' initial value must be a number".into());
                    };
                    let Some(limit) = vm.tonumber_value(&limit) else {
                        return vm.runtime_error("'for' limit must be a number".into());
                    };
                    let Some(step) = vm.tonumber_value(&step) else {
                        return vm.runtime_error("'for' step must be a number".into());
                    };
                    vm.stack_set(ra, LuaValue::number(init - step));
                    vm.stack_set(ra + 1, LuaValue::number(limit));
                    vm.stack_set(ra + 2, LuaValue::number(step));
                    pc = (pc as i64 + inst.sbx() as i64) as usize;
                }
                OpCode::ForLoop => {
                    let a = inst.a() as usize;
                    let ra = base + a;
                    let step = vm.stack_get(ra + 2).nvalue();
                    let idx = vm.stack_get(ra).nvalue() + step;
                    let limit = vm.stack_get(ra + 1).nvalue();
                    let cont = if step > 0.0 { idx <= limit } else { idx >= limit };
                    if cont {
                        pc = (pc as i64 + inst.sbx() as i64) as usize;
                        vm.stack_set(ra, LuaValue::number(idx));
                        vm.stack_set(ra + 3, LuaValue::number(idx));
                    }
                }
                OpCode::TForLoop => {
                    let a = inst.a() as usize;
                    let c = inst.c() as usize;
                    let ra = base + a;
                    let cb = ra + 3;
                    // iterator call: f(state, control)
                    let f = vm.stack_get(ra);
                    let state = vm.stack_get(ra + 1);
                    let control = vm.stack_get(ra + 2);
                    {
                        let th = vm.th_mut();
                        th.ensure_stack(cb + 3);
                        th.stack[cb] = f;
                        th.stack[cb + 1] = state;
                        th.stack[cb + 2] = control;
                        th.top = cb + 3;
                    }
                    call::call_at(vm, cb, 2, c as i32)?;
                    let t = frame_top!();
                    vm.th_mut().top = t;
                    let first = vm.stack_get(cb);
                    if !first.is_nil() {
                        vm.stack_set(cb - 1, first);
                        let jmp = Instruction(code[pc]);
                        pc = (pc as i64 + jmp.sbx() as i64) as usize;
                    }
                    pc += 1;
                }
                OpCode::SetList => {
                    let a = inst.a() as usize;
                    let mut n = inst.b() as usize;
                    let mut block = inst.c() as usize;
                    let ra = base + a;
                    if n == 0 {
                        n = vm.th().top - ra - 1;
                    }
                    if block == 0 {
                        // block index stored in the next raw word
                        block = code[pc] as usize;
                        pc += 1;
                        save_pc!();
                    }
                    let t = vm.stack_get(ra);
                    debug_assert!(t.is_table());
                    let tid_table = t.hvalue();
                    let first = (block - 1) * FIELDS_PER_FLUSH;
                    for i in 1..=n {
                        let v = vm.stack_get(ra + i);
                        vm.table_rawset(tid_table, LuaValue::number((first + i) as f64), v)?;
                    }
                    let t = frame_top!();
                    vm.th_mut().top = t;
                }
                OpCode::Close => {
                    vm.close_upvalues(tid, base + inst.a() as usize);
                }
                OpCode::Closure => {
                    let a = inst.a() as usize;
                    let proto = chunk.protos[inst.bx() as usize].clone();
                    let nups = proto.nups as usize;
                    let mut ups = Vec::with_capacity(nups);
                    for _ in 0..nups {
                        let pseudo = Instruction(code[pc]);
                        pc += 1;
                        match pseudo.opcode() {
                            OpCode::Move => {
                                ups.push(vm.find_upvalue(base + pseudo.b() as usize));
                            }
                            OpCode::GetUpval => {
                                ups.push(upvalues[pseudo.b() as usize]);
                            }
                            _ => {
                                return vm
                                    .runtime_error("malformed closure capture".to_string());
                            }
                        }
                    }
                    save_pc!();
                    let cl = vm.new_script_closure(proto, ups, env)?;
                    vm.stack_set(base + a, LuaValue::function(cl));
                    vm.check_gc()?;
                }
                OpCode::Vararg => {
                    let a = inst.a() as usize;
                    let b = inst.b() as usize;
                    let ra = base + a;
                    let navail = (base - func_idx).saturating_sub(nfix + 1);
                    if b == 0 {
                        // copy all varargs, raising top
                        call::grow_stack(vm, ra + navail)?;
                        let th = vm.th_mut();
                        for j in 0..navail {
                            th.stack[ra + j] = th.stack[base - navail + j];
                        }
                        th.top = ra + navail;
                    } else {
                        let want = b - 1;
                        let th = vm.th_mut();
                        for j in 0..want {
                            th.stack[ra + j] = if j < navail {
                                th.stack[base - navail + j]
                            } else {
                                LuaValue::nil()
                            };
                        }
                    }
                }
            }
        }
    }
}

/// Fire count/line hooks for the instruction about to execute at `pc`.
fn trace_hooks(vm: &mut LuaVM, chunk: &crate::lua_value::Chunk, pc: usize) -> VmResult<()> {
    if vm.hook_enabled(hook_mask::COUNT) {
        if vm.hook_counter <= 1 {
            vm.hook_counter = vm.hook_count;
            vm.call_hook(HookEvent::Count)?;
        } else {
            vm.hook_counter -= 1;
        }
    }
    if vm.hook_enabled(hook_mask::LINE) {
        let line = chunk.line_at(pc);
        if line != vm.hook_last_line {
            vm.hook_last_line = line;
            vm.call_hook(HookEvent::Line(line))?;
        }
    }
    Ok(())
}
