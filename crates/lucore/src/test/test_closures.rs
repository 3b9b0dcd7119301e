// Closures and upvalues: capture, sharing by identity, closing on
// return, and the upvalue inspection API.

use crate::lua_vm::opcode::{OpCode, rk_as_k};
use crate::lua_vm::{Instruction, ThreadStatus};
use crate::test::{Asm, call_chunk, vm};

/// Inner prototype: upvalue += k; return upvalue.
fn make_incrementer(delta_k: f64) -> std::rc::Rc<crate::lua_value::Chunk> {
    let mut a = Asm::new(4).upvals(1);
    let kd = a.knum(delta_k);
    a.emit(Instruction::abc(OpCode::GetUpval, 0, 0, 0));
    a.emit(Instruction::abc(OpCode::Add, 0, 0, rk_as_k(kd)));
    a.emit(Instruction::abc(OpCode::SetUpval, 0, 0, 0));
    a.emit(Instruction::abc(OpCode::Return, 0, 2, 0));
    a.build("inc")
}

#[test]
fn test_closure_captures_and_closes_on_return() {
    // local c = 0
    // local inc = function() c = c + 1; return c end
    // return inc
    let mut vm = vm();
    let mut main = Asm::new(4);
    let k0 = main.knum(0.0);
    let p = main.proto(make_incrementer(1.0));
    main.emit(Instruction::abx(OpCode::LoadK, 0, k0));
    main.emit(Instruction::abx(OpCode::Closure, 1, p));
    main.emit(Instruction::abc(OpCode::Move, 0, 0, 0)); // capture pseudo follows CLOSURE
    main.emit(Instruction::abc(OpCode::Return, 1, 2, 0));

    assert_eq!(call_chunk(&mut vm, main.build("outer"), 1), ThreadStatus::Ok);
    assert!(vm.is_function(-1));

    // the outer frame is gone; the upvalue must be closed and private
    vm.push_value(-1);
    assert_eq!(vm.pcall(0, 1, 0), ThreadStatus::Ok);
    assert_eq!(vm.to_number(-1), 1.0);
    vm.pop_n(1);
    vm.push_value(-1);
    assert_eq!(vm.pcall(0, 1, 0), ThreadStatus::Ok);
    assert_eq!(vm.to_number(-1), 2.0);
}

#[test]
fn test_two_closures_share_one_upvalue() {
    // local c = 0
    // return (function() c = c + 1; return c end),
    //        (function() c = c + 10; return c end)
    let mut vm = vm();
    let mut main = Asm::new(6);
    let k0 = main.knum(0.0);
    let p1 = main.proto(make_incrementer(1.0));
    let p2 = main.proto(make_incrementer(10.0));
    main.emit(Instruction::abx(OpCode::LoadK, 0, k0));
    main.emit(Instruction::abx(OpCode::Closure, 1, p1));
    main.emit(Instruction::abc(OpCode::Move, 0, 0, 0));
    main.emit(Instruction::abx(OpCode::Closure, 2, p2));
    main.emit(Instruction::abc(OpCode::Move, 0, 0, 0));
    main.emit(Instruction::abc(OpCode::Return, 1, 3, 0));

    assert_eq!(call_chunk(&mut vm, main.build("share"), 2), ThreadStatus::Ok);
    // stack: [inc1, inc10]
    vm.push_value(-2);
    assert_eq!(vm.pcall(0, 1, 0), ThreadStatus::Ok);
    assert_eq!(vm.to_number(-1), 1.0);
    vm.pop_n(1);

    // mutation through inc1 must be visible through inc10
    vm.push_value(-1);
    assert_eq!(vm.pcall(0, 1, 0), ThreadStatus::Ok);
    assert_eq!(vm.to_number(-1), 11.0);
    vm.pop_n(1);
}

#[test]
fn test_nested_closure_shares_enclosing_upvalue() {
    // outer(x) returns inner which captures outer's upvalue through
    // GETUPVAL pseudo-instruction
    let mut vm = vm();

    // innermost: return upvalue
    let mut leaf = Asm::new(2).upvals(1);
    leaf.emit(Instruction::abc(OpCode::GetUpval, 0, 0, 0));
    leaf.emit(Instruction::abc(OpCode::Return, 0, 2, 0));
    let leaf = leaf.build("leaf");

    // middle: has upvalue #0, builds leaf sharing it
    let mut middle = Asm::new(4).upvals(1);
    let pl = middle.proto(leaf);
    middle.emit(Instruction::abx(OpCode::Closure, 0, pl));
    middle.emit(Instruction::abc(OpCode::GetUpval, 0, 0, 0)); // share upvalue 0
    middle.emit(Instruction::abc(OpCode::Return, 0, 2, 0));
    let middle = middle.build("middle");

    // outer: local v = 123; mid = closure(middle) capturing v; return mid()
    let mut outer = Asm::new(6);
    let k = outer.knum(123.0);
    let pm = outer.proto(middle);
    outer.emit(Instruction::abx(OpCode::LoadK, 0, k));
    outer.emit(Instruction::abx(OpCode::Closure, 1, pm));
    outer.emit(Instruction::abc(OpCode::Move, 0, 0, 0));
    outer.emit(Instruction::abc(OpCode::Call, 1, 1, 2)); // leaf closure
    outer.emit(Instruction::abc(OpCode::Call, 1, 1, 2)); // leaf() -> 123
    outer.emit(Instruction::abc(OpCode::Return, 1, 2, 0));

    assert_eq!(call_chunk(&mut vm, outer.build("outer"), 1), ThreadStatus::Ok);
    assert_eq!(vm.to_number(-1), 123.0);
}

#[test]
fn test_close_opcode_splits_capture() {
    // Loop bodies re-capture fresh slots after CLOSE: two closures built
    // from the same register must not share once CLOSE ran between them.
    let mut vm = vm();
    let mut main = Asm::new(6);
    let k1 = main.knum(1.0);
    let k2 = main.knum(2.0);
    let p1 = main.proto(make_incrementer(0.0));
    let p2 = main.proto(make_incrementer(0.0));
    main.emit(Instruction::abx(OpCode::LoadK, 0, k1));
    main.emit(Instruction::abx(OpCode::Closure, 1, p1));
    main.emit(Instruction::abc(OpCode::Move, 0, 0, 0));
    main.emit(Instruction::abc(OpCode::Close, 0, 0, 0)); // close R0 upward
    main.emit(Instruction::abx(OpCode::LoadK, 0, k2));
    main.emit(Instruction::abx(OpCode::Closure, 2, p2));
    main.emit(Instruction::abc(OpCode::Move, 0, 0, 0));
    main.emit(Instruction::abc(OpCode::Return, 1, 3, 0));

    assert_eq!(call_chunk(&mut vm, main.build("close"), 2), ThreadStatus::Ok);
    vm.push_value(-2);
    assert_eq!(vm.pcall(0, 1, 0), ThreadStatus::Ok);
    let first = vm.to_number(-1);
    vm.pop_n(1);
    vm.push_value(-1);
    assert_eq!(vm.pcall(0, 1, 0), ThreadStatus::Ok);
    let second = vm.to_number(-1);
    assert_eq!(first, 1.0);
    assert_eq!(second, 2.0);
}

#[test]
fn test_upvalue_inspection_api() {
    let mut vm = vm();
    let mut main = Asm::new(4);
    let k7 = main.knum(7.0);
    let p = main.proto(make_incrementer(1.0));
    main.emit(Instruction::abx(OpCode::LoadK, 0, k7));
    main.emit(Instruction::abx(OpCode::Closure, 1, p));
    main.emit(Instruction::abc(OpCode::Move, 0, 0, 0));
    main.emit(Instruction::abc(OpCode::Return, 1, 2, 0));
    assert_eq!(call_chunk(&mut vm, main.build("inspect"), 1), ThreadStatus::Ok);

    // read upvalue 1
    let name = vm.get_upvalue(-1, 1).expect("has one upvalue");
    assert_eq!(name, ""); // stripped debug info
    assert_eq!(vm.to_number(-1), 7.0);
    vm.pop_n(1);
    assert!(vm.get_upvalue(-1, 2).is_none());

    // write upvalue 1, then observe through a call
    vm.push_number(100.0);
    vm.set_upvalue(-2, 1).expect("settable upvalue");
    vm.push_value(-1);
    assert_eq!(vm.pcall(0, 1, 0), ThreadStatus::Ok);
    assert_eq!(vm.to_number(-1), 101.0);
}

#[test]
fn test_native_closure_upvalues() {
    fn counter(vm: &mut crate::lua_vm::LuaVM) -> crate::lua_vm::VmResult<i32> {
        let idx = crate::lua_vm::api::upvalue_index(1);
        let n = vm.to_number(idx) + 1.0;
        vm.push_number(n);
        vm.push_value(-1);
        vm.replace(idx);
        Ok(1)
    }
    let mut vm = vm();
    vm.push_number(0.0);
    vm.push_native_closure(counter, 1).unwrap();
    vm.push_value(-1);
    vm.call(0, 1).unwrap();
    assert_eq!(vm.to_number(-1), 1.0);
    vm.pop_n(1);
    vm.push_value(-1);
    vm.call(0, 1).unwrap();
    assert_eq!(vm.to_number(-1), 2.0);
}
