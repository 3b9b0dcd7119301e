// Calls: script-to-script, native callbacks, multiple results, tail
// calls in constant frame space.

use crate::lua_vm::opcode::{OpCode, rk_as_k};
use crate::lua_vm::{Instruction, LuaVM, MULTRET, ThreadStatus, VmResult};
use crate::test::{Asm, call_chunk, push_closure, register_native, vm};

fn n_add(vm: &mut LuaVM) -> VmResult<i32> {
    let a = vm.to_number(1);
    let b = vm.to_number(2);
    vm.push_number(a + b);
    Ok(1)
}

fn n_three(vm: &mut LuaVM) -> VmResult<i32> {
    vm.push_number(1.0);
    vm.push_number(2.0);
    vm.push_number(3.0);
    Ok(3)
}

#[test]
fn test_native_call_from_script() {
    // return add(4, 5)
    let mut vm = vm();
    register_native(&mut vm, "add", n_add);
    let mut a = Asm::new(6);
    let kadd = a.kstr(&mut vm, "add");
    let k4 = a.knum(4.0);
    let k5 = a.knum(5.0);
    a.emit(Instruction::abx(OpCode::GetGlobal, 0, kadd));
    a.emit(Instruction::abx(OpCode::LoadK, 1, k4));
    a.emit(Instruction::abx(OpCode::LoadK, 2, k5));
    a.emit(Instruction::abc(OpCode::Call, 0, 3, 2));
    a.emit(Instruction::abc(OpCode::Return, 0, 2, 0));
    assert_eq!(call_chunk(&mut vm, a.build("ncall"), 1), ThreadStatus::Ok);
    assert_eq!(vm.to_number(-1), 9.0);
}

#[test]
fn test_script_calls_script() {
    // local function double(x) return x + x end; return double(21)
    let mut vm = vm();
    let mut inner = Asm::new(4).params(1);
    inner.emit(Instruction::abc(OpCode::Add, 1, 0, 0));
    inner.emit(Instruction::abc(OpCode::Return, 1, 2, 0));
    let inner = inner.build("double");

    let mut main = Asm::new(6);
    let k21 = main.knum(21.0);
    let p = main.proto(inner);
    main.emit(Instruction::abx(OpCode::Closure, 0, p));
    main.emit(Instruction::abx(OpCode::LoadK, 1, k21));
    main.emit(Instruction::abc(OpCode::Call, 0, 2, 2));
    main.emit(Instruction::abc(OpCode::Return, 0, 2, 0));
    assert_eq!(call_chunk(&mut vm, main.build("main"), 1), ThreadStatus::Ok);
    assert_eq!(vm.to_number(-1), 42.0);
}

#[test]
fn test_multret_flows_through() {
    // return three()  -- all results
    let mut vm = vm();
    register_native(&mut vm, "three", n_three);
    let mut a = Asm::new(6);
    let kt = a.kstr(&mut vm, "three");
    a.emit(Instruction::abx(OpCode::GetGlobal, 0, kt));
    a.emit(Instruction::abc(OpCode::Call, 0, 1, 0));
    a.emit(Instruction::abc(OpCode::Return, 0, 0, 0));
    assert_eq!(call_chunk(&mut vm, a.build("multret"), MULTRET), ThreadStatus::Ok);
    assert_eq!(vm.get_top(), 3);
    assert_eq!(vm.to_number(-1), 3.0);
}

#[test]
fn test_fixed_results_pad_with_nil() {
    // local a, b, c, d, e = three(); return e
    let mut vm = vm();
    register_native(&mut vm, "three", n_three);
    let mut a = Asm::new(8);
    let kt = a.kstr(&mut vm, "three");
    a.emit(Instruction::abx(OpCode::GetGlobal, 0, kt));
    a.emit(Instruction::abc(OpCode::Call, 0, 1, 6)); // five results
    a.emit(Instruction::abc(OpCode::Return, 4, 2, 0));
    assert_eq!(call_chunk(&mut vm, a.build("pad"), 1), ThreadStatus::Ok);
    assert!(vm.is_nil(-1));
}

/// countdown(n): if n == 0 then return 42 end; return countdown(n - 1)
fn countdown_proto(vm: &mut LuaVM) -> std::rc::Rc<crate::lua_value::Chunk> {
    let mut a = Asm::new(6).params(1);
    let k0 = a.knum(0.0);
    let k1 = a.knum(1.0);
    let k42 = a.knum(42.0);
    let kname = a.kstr(vm, "countdown");
    a.emit(Instruction::abc(OpCode::Eq, 1, 0, rk_as_k(k0)));
    a.emit(Instruction::asbx(OpCode::Jmp, 0, 3));
    a.emit(Instruction::abx(OpCode::GetGlobal, 1, kname));
    a.emit(Instruction::abc(OpCode::Sub, 2, 0, rk_as_k(k1)));
    a.emit(Instruction::abc(OpCode::TailCall, 1, 2, 0));
    a.emit(Instruction::abx(OpCode::LoadK, 1, k42));
    a.emit(Instruction::abc(OpCode::Return, 1, 2, 0));
    a.build("countdown")
}

#[test]
fn test_tail_call_runs_in_constant_frame_space() {
    // far more iterations than the frame limit allows for real recursion
    let mut vm = vm();
    let proto = countdown_proto(&mut vm);
    push_closure(&mut vm, proto);
    vm.set_global("countdown").unwrap();

    vm.get_global("countdown").unwrap();
    vm.push_number(10_000.0);
    assert_eq!(vm.pcall(1, 1, 0), ThreadStatus::Ok);
    assert_eq!(vm.to_number(-1), 42.0);
}

#[test]
fn test_deep_non_tail_recursion_overflows() {
    // recurse(n): if n == 0 then return 0 end; local r = recurse(n-1); return r
    let mut vm = vm();
    let mut a = Asm::new(6).params(1);
    let k0 = a.knum(0.0);
    let k1 = a.knum(1.0);
    let kname = a.kstr(&mut vm, "recurse");
    a.emit(Instruction::abc(OpCode::Eq, 1, 0, rk_as_k(k0)));
    a.emit(Instruction::asbx(OpCode::Jmp, 0, 3));
    a.emit(Instruction::abx(OpCode::GetGlobal, 1, kname));
    a.emit(Instruction::abc(OpCode::Sub, 2, 0, rk_as_k(k1)));
    a.emit(Instruction::abc(OpCode::Call, 1, 2, 2)); // NOT a tail call
    a.emit(Instruction::abc(OpCode::Return, 1, 2, 0));
    let proto = a.build("recurse");
    push_closure(&mut vm, proto);
    vm.set_global("recurse").unwrap();

    vm.get_global("recurse").unwrap();
    vm.push_number(100_000.0);
    let status = vm.pcall(1, 1, 0);
    assert_eq!(status, ThreadStatus::Runtime);
    let msg = vm.to_string_lossy(-1).unwrap();
    assert!(msg.contains("stack overflow"), "{msg}");
}

#[test]
fn test_call_non_function_reports_type() {
    let mut vm = vm();
    let mut a = Asm::new(4);
    let k7 = a.knum(7.0);
    a.emit(Instruction::abx(OpCode::LoadK, 0, k7));
    a.emit(Instruction::abc(OpCode::Call, 0, 1, 1));
    a.emit(Instruction::abc(OpCode::Return, 0, 1, 0));
    assert_eq!(call_chunk(&mut vm, a.build("badcall"), 0), ThreadStatus::Runtime);
    let msg = vm.to_string_lossy(-1).unwrap();
    assert!(msg.contains("attempt to call a number value"), "{msg}");
}

#[test]
fn test_host_call_api() {
    let mut vm = vm();
    vm.push_native_closure(n_add, 0).unwrap();
    vm.push_number(2.0);
    vm.push_number(3.0);
    vm.call(2, 1).unwrap();
    assert_eq!(vm.to_number(-1), 5.0);
    assert_eq!(vm.get_top(), 1);
}
