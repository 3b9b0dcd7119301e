// Coroutine machinery.
//
// Yield is a sentinel status carried on the error channel: the dispatch
// loop and native callbacks propagate it outward, and the resume boundary
// catches it with the thread's frames intact. Because host-level calls
// (metamethods, protected calls, API callbacks) each raise the call
// counter, "yield across a native frame" is detected by comparing the
// counter against the watermark taken at resume time.

use crate::gc::ThreadId;
use crate::lua_vm::call_info::MULTRET;
use crate::lua_vm::execute::{self, call};
use crate::lua_vm::{CoStatus, LuaVM, ThreadStatus, VmError, VmResult};

/// Outcome of a resume: status plus how many values the coroutine left on
/// its own stack top (yield values, final returns, or one error object).
pub struct ResumeOutcome {
    pub status: ThreadStatus,
    pub nresults: usize,
}

fn resume_error(vm: &mut LuaVM, co: ThreadId, msg: &str) -> ResumeOutcome {
    let s = vm.new_string(msg.as_bytes());
    vm.pool.thread_mut(co).data.push(s);
    ResumeOutcome {
        status: ThreadStatus::Runtime,
        nresults: 1,
    }
}

/// Transfer control to `co`. The `nargs` arguments must already sit on
/// top of `co`'s stack (pushed there by the host or moved with xmove).
pub fn resume(vm: &mut LuaVM, co: ThreadId, nargs: usize) -> ResumeOutcome {
    if co == vm.current {
        return resume_error(vm, co, "cannot resume non-suspended coroutine");
    }
    match vm.pool.thread(co).data.status {
        CoStatus::Suspended => {}
        CoStatus::Dead => return resume_error(vm, co, "cannot resume dead coroutine"),
        CoStatus::Running | CoStatus::Normal => {
            return resume_error(vm, co, "cannot resume non-suspended coroutine");
        }
    }

    let prev = vm.current;
    if vm.enter_call().is_err() {
        return resume_error(vm, co, "stack overflow");
    }
    vm.pool.thread_mut(prev).data.status = CoStatus::Normal;
    vm.resume_chain.push(prev);
    vm.current = co;
    {
        let base_calls = vm.n_calls;
        let th = vm.th_mut();
        th.status = CoStatus::Running;
        th.base_calls = base_calls;
    }

    let started = !vm.th().call_infos.is_empty();
    let result = if !started {
        start_body(vm, nargs)
    } else {
        continue_body(vm, nargs)
    };

    let outcome = settle(vm, co, result);
    vm.leave_call();
    vm.resume_chain.pop();
    vm.current = prev;
    vm.pool.thread_mut(prev).data.status = CoStatus::Running;
    outcome
}

/// First entry: the bottom of the stack holds the body function followed
/// by the arguments.
fn start_body(vm: &mut LuaVM, nargs: usize) -> VmResult<()> {
    let top = vm.th().top;
    let func_idx = top - nargs - 1;
    match call::precall(vm, func_idx, MULTRET)? {
        call::Precall::Native => Ok(()),
        call::Precall::Script => execute::run(vm, 0),
    }
}

/// Re-entry after a yield. A native frame parked at the yield is finished
/// with the resume arguments as its results; a script frame (hook yield)
/// simply continues at its saved pc.
fn continue_body(vm: &mut LuaVM, nargs: usize) -> VmResult<()> {
    let top_is_native = vm
        .th()
        .current_ci()
        .map(|ci| ci.is_native())
        .unwrap_or(false);
    if top_is_native {
        let first_result = vm.th().top - nargs;
        call::poscall(vm, first_result)?;
        if vm.th().depth() == 0 {
            return Ok(());
        }
    }
    execute::run(vm, 0)
}

fn settle(vm: &mut LuaVM, co: ThreadId, result: VmResult<()>) -> ResumeOutcome {
    match result {
        Ok(()) => {
            // body finished; everything on the stack is a return value
            let th = vm.th_mut();
            th.status = CoStatus::Dead;
            ResumeOutcome {
                status: ThreadStatus::Ok,
                nresults: th.top,
            }
        }
        Err(VmError::Yield) => {
            let th = vm.th_mut();
            th.status = CoStatus::Suspended;
            ResumeOutcome {
                status: ThreadStatus::Yield,
                nresults: th.yield_count,
            }
        }
        Err(e) => {
            let status = ThreadStatus::from(e);
            vm.close_upvalues(co, 0);
            let err_obj = vm.error_value;
            let th = vm.th_mut();
            th.status = CoStatus::Dead;
            th.error_code = status;
            th.call_infos.clear();
            th.top = 0;
            th.push(err_obj);
            ResumeOutcome {
                status,
                nresults: 1,
            }
        }
    }
}

/// Suspend the current thread, leaving the top `nresults` values for the
/// resumer. Returns the sentinel the caller must propagate.
pub fn yield_current(vm: &mut LuaVM, nresults: usize) -> VmError {
    if vm.current == vm.main_thread {
        return vm.runtime_error_msg("attempt to yield from outside a coroutine".to_string());
    }
    if vm.n_calls > vm.th().base_calls {
        return vm
            .runtime_error_msg("attempt to yield across metamethod/C-call boundary".to_string());
    }
    vm.th_mut().yield_count = nresults;
    VmError::Yield
}

/// Classify a thread the way the host-facing `status` operation does.
pub fn status_of(vm: &LuaVM, co: ThreadId) -> CoStatus {
    if co == vm.current {
        return CoStatus::Running;
    }
    vm.pool.thread(co).data.status
}
