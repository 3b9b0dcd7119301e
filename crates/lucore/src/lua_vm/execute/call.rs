// Call protocol.
//
// `precall` pushes a frame for the callee at a stack position. Native
// callees run to completion right here; script callees leave the new
// frame on top and report Script so the dispatch loop re-enters it
// without host recursion. Non-functions get one chance at a `__call`
// handler, inserted by shifting the callee and arguments up a slot.
//
// `call_at` is the host-level entry (metamethods, hooks, the embedding
// API): it counts against the host call-depth guard, which is also what
// makes yields across such frames detectable.

use crate::lua_value::LuaClosure;
use crate::lua_value::LuaValue;
use crate::lua_vm::call_info::{CallInfo, MULTRET, call_flags};
use crate::lua_vm::debug_hook::{HookEvent, hook_mask};
use crate::lua_vm::execute::metamethod::TmKind;
use crate::lua_vm::lua_thread::MIN_STACK;
use crate::lua_vm::{LuaVM, ThreadStatus, VmError, VmResult};

pub(crate) enum Precall {
    /// A script frame was pushed; the dispatch loop must enter it.
    Script,
    /// A native callee ran to completion and its results are in place.
    Native,
}

/// Ensure the current thread's stack reaches `needed` slots, honoring the
/// configured ceiling.
pub(crate) fn grow_stack(vm: &mut LuaVM, needed: usize) -> VmResult<()> {
    if needed > vm.config.max_stack {
        return vm.runtime_error("stack overflow".to_string());
    }
    let tid = vm.current;
    vm.th_mut().ensure_stack(needed);
    vm.refresh_thread_size(tid);
    Ok(())
}

/// Call the value at `func_idx` with the arguments sitting between it and
/// the stack top.
pub(crate) fn precall(vm: &mut LuaVM, func_idx: usize, nresults: i32) -> VmResult<Precall> {
    let mut callee = vm.stack_get(func_idx);
    if !callee.is_function() {
        // one shot at __call: shift callee+args up, insert the handler
        let tm = vm.tm_by_value(&callee, TmKind::Call);
        if !tm.is_function() {
            return vm.type_error(&callee, "call");
        }
        let top = vm.th().top;
        grow_stack(vm, top + 1)?;
        {
            let th = vm.th_mut();
            for i in (func_idx..top).rev() {
                th.stack[i + 1] = th.stack[i];
            }
            th.stack[func_idx] = tm;
            th.top = top + 1;
        }
        callee = tm;
    }

    if vm.th().depth() >= vm.config.max_frames {
        return vm.runtime_error("stack overflow".to_string());
    }

    let cid = callee.clvalue();
    let is_native = vm.pool.closure(cid).data.is_native();
    if is_native {
        let base = func_idx + 1;
        let top = vm.th().top;
        grow_stack(vm, top + MIN_STACK)?;
        vm.th_mut()
            .call_infos
            .push(CallInfo::native(func_idx, base, top + MIN_STACK, nresults));
        if vm.hook_enabled(hook_mask::CALL) {
            vm.call_hook(HookEvent::Call)?;
        }
        let f = match &vm.pool.closure(cid).data {
            LuaClosure::Native(nc) => nc.f,
            LuaClosure::Script(_) => unreachable!("checked is_native"),
        };
        // a yield propagates with the frame still in place; resume
        // finishes it with the resume arguments as its results
        let n = f(vm)?;
        let n = n.max(0) as usize;
        let first_result = vm.th().top - n;
        poscall(vm, first_result)?;
        Ok(Precall::Native)
    } else {
        let chunk = match &vm.pool.closure(cid).data {
            LuaClosure::Script(sc) => sc.chunk.clone(),
            LuaClosure::Native(_) => unreachable!("checked is_native"),
        };
        let nfix = chunk.num_params as usize;
        let max_stack = chunk.max_stack_size as usize;

        let base = if chunk.is_vararg {
            // pad missing fixed args, then move them above the varargs
            let mut actual = vm.th().top - func_idx - 1;
            let reserve = vm.th().top + nfix.max(1) + max_stack;
            grow_stack(vm, reserve)?;
            {
                let th = vm.th_mut();
                while actual < nfix {
                    th.push(LuaValue::nil());
                    actual += 1;
                }
                let fixed = th.top - actual;
                let base = th.top;
                for i in 0..nfix {
                    let v = th.stack[fixed + i];
                    th.push(v);
                    th.stack[fixed + i] = LuaValue::nil();
                }
                base
            }
        } else {
            func_idx + 1
        };

        grow_stack(vm, base + max_stack)?;
        {
            let th = vm.th_mut();
            // clear residual slots between the arguments and the frame top
            for i in th.top..base + max_stack {
                th.stack[i] = LuaValue::nil();
            }
            th.top = base + max_stack;
            th.call_infos
                .push(CallInfo::script(func_idx, base, base + max_stack, nresults));
        }
        if vm.hook_enabled(hook_mask::CALL) {
            vm.call_hook(HookEvent::Call)?;
        }
        Ok(Precall::Script)
    }
}

/// Finish the top frame: move `nresults` down to the callee slot, pad
/// with nil, close upvalues of the abandoned region, pop the frame.
/// Returns the caller's expected-result count.
pub(crate) fn poscall(vm: &mut LuaVM, first_result: usize) -> VmResult<i32> {
    if vm.hook_enabled(hook_mask::RET) {
        let tailcalls = vm.th().current_ci().map(|ci| ci.tailcalls).unwrap_or(0);
        vm.call_hook(HookEvent::Return)?;
        for _ in 0..tailcalls {
            vm.call_hook(HookEvent::TailReturn)?;
        }
    }
    let tid = vm.current;
    let ci = vm
        .th_mut()
        .call_infos
        .pop()
        .expect("poscall without a frame");
    if ci.is_script() {
        vm.close_upvalues(tid, ci.base);
    }
    let res = ci.func;
    let wanted = ci.nresults;
    let th = vm.th_mut();
    let avail = th.top.saturating_sub(first_result);
    let n = if wanted == MULTRET {
        avail
    } else {
        wanted.max(0) as usize
    };
    th.ensure_stack(res + n);
    for i in 0..n {
        th.stack[res + i] = if i < avail {
            th.stack[first_result + i]
        } else {
            LuaValue::nil()
        };
    }
    th.top = res + n;
    Ok(wanted)
}

/// Host-level call: run the callee to completion, results landing at
/// `func_idx`. Counts one host call level.
pub(crate) fn call_at(
    vm: &mut LuaVM,
    func_idx: usize,
    nargs: usize,
    nresults: i32,
) -> VmResult<()> {
    debug_assert_eq!(vm.th().top, func_idx + 1 + nargs);
    vm.enter_call()?;
    let entry_depth = vm.th().depth();
    let r = match precall(vm, func_idx, nresults) {
        Ok(Precall::Native) => Ok(()),
        Ok(Precall::Script) => super::run(vm, entry_depth),
        Err(e) => Err(e),
    };
    vm.leave_call();
    r
}

/// Protected call: on error, unwind back to `func_idx`, close upvalues,
/// restore the frame and host-call depths, and leave the error object on
/// top. `errfunc` (an absolute stack index below `func_idx`) is armed for
/// the duration of the call.
pub(crate) fn pcall_at(
    vm: &mut LuaVM,
    func_idx: usize,
    nargs: usize,
    nresults: i32,
    errfunc: Option<usize>,
) -> ThreadStatus {
    let tid = vm.current;
    let saved_depth = vm.th().depth();
    let saved_ncalls = vm.n_calls;
    let saved_errfunc = vm.th().errfunc;
    vm.th_mut().errfunc = errfunc;

    let r = call_at(vm, func_idx, nargs, nresults);
    vm.th_mut().errfunc = saved_errfunc;

    match r {
        Ok(()) => ThreadStatus::Ok,
        Err(VmError::Yield) => {
            // yields cannot legally cross a protected boundary; the yield
            // guard raises before we could get here
            ThreadStatus::Yield
        }
        Err(e) => {
            vm.n_calls = saved_ncalls;
            vm.close_upvalues(tid, func_idx);
            let err_obj = vm.error_value;
            {
                let th = vm.th_mut();
                th.call_infos.truncate(saved_depth);
                th.top = func_idx;
                th.push(err_obj);
            }
            ThreadStatus::from(e)
        }
    }
}
