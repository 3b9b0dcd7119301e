// Embedding API surface: stack manipulation, inspectors, coercions,
// cross-thread moves.

use crate::lua_vm::{LuaVM, ThreadStatus, VmResult};
use crate::test::vm;

#[test]
fn test_gettop_settop() {
    let mut vm = vm();
    assert_eq!(vm.get_top(), 0);
    vm.push_number(1.0);
    vm.push_number(2.0);
    vm.push_number(3.0);
    assert_eq!(vm.get_top(), 3);

    vm.set_top(1);
    assert_eq!(vm.get_top(), 1);
    assert_eq!(vm.to_number(-1), 1.0);

    // growing with settop nil-fills
    vm.set_top(4);
    assert_eq!(vm.get_top(), 4);
    assert!(vm.is_nil(-1));

    vm.set_top(-2); // drop one
    assert_eq!(vm.get_top(), 3);
}

#[test]
fn test_insert_remove_replace_pushvalue() {
    let mut vm = vm();
    vm.push_number(1.0);
    vm.push_number(2.0);
    vm.push_number(3.0);

    // insert top below the others: [3, 1, 2]
    vm.insert(1);
    assert_eq!(vm.to_number(1), 3.0);
    assert_eq!(vm.to_number(2), 1.0);
    assert_eq!(vm.to_number(3), 2.0);

    // remove the middle: [3, 2]
    vm.remove(2);
    assert_eq!(vm.get_top(), 2);
    assert_eq!(vm.to_number(2), 2.0);

    // replace bottom with top: [2]
    vm.replace(1);
    assert_eq!(vm.get_top(), 1);
    assert_eq!(vm.to_number(1), 2.0);

    vm.push_value(1);
    assert!(vm.raw_equal(1, 2));
}

#[test]
fn test_type_inspectors() {
    let mut vm = vm();
    vm.push_nil();
    vm.push_boolean(true);
    vm.push_number(1.5);
    vm.push_string(b"s");
    vm.create_table(0, 0).unwrap();

    assert_eq!(vm.type_name_at(1), "nil");
    assert_eq!(vm.type_name_at(2), "boolean");
    assert_eq!(vm.type_name_at(3), "number");
    assert_eq!(vm.type_name_at(4), "string");
    assert_eq!(vm.type_name_at(5), "table");
    assert_eq!(vm.type_name_at(99), "no value");
    assert!(vm.is_none_or_nil(1));
    assert!(vm.is_none_or_nil(99));
    assert!(!vm.is_none_or_nil(2));
}

#[test]
fn test_number_string_coercions() {
    let mut vm = vm();
    vm.push_string(b"42.5");
    assert!(vm.is_number(1));
    assert_eq!(vm.to_number(1), 42.5);
    // the slot itself is still a string
    assert_eq!(vm.type_name_at(1), "string");

    vm.push_number(7.0);
    // to_lstring coerces the slot in place
    assert_eq!(vm.to_lstring(2).unwrap(), b"7");
    assert_eq!(vm.type_name_at(2), "string");

    vm.push_boolean(true);
    assert!(vm.to_lstring(3).is_none());
    assert_eq!(vm.to_number(3), 0.0);
}

#[test]
fn test_tostring_tonumber_roundtrip_property() {
    let mut vm = vm();
    for n in [0.0, -1.0, 0.1, 1e100, -2.5e-7, 123456789.0, f64::MIN, f64::MAX] {
        vm.push_number(n);
        let s = vm.to_lstring(-1).unwrap().to_vec();
        vm.pop_n(1);
        vm.push_string(&s);
        assert_eq!(vm.to_number(-1), n, "{}", String::from_utf8_lossy(&s));
        vm.pop_n(1);
    }
}

#[test]
fn test_objlen_on_each_kind() {
    let mut vm = vm();
    vm.push_string(b"four");
    assert_eq!(vm.objlen(1), 4);

    vm.create_table(0, 0).unwrap();
    for i in 1..=3 {
        vm.push_number(i as f64);
        vm.raw_seti(-2, i).unwrap();
    }
    assert_eq!(vm.objlen(2), 3);

    vm.new_userdata_block(11).unwrap();
    assert_eq!(vm.objlen(3), 11);

    vm.push_number(5.0);
    assert_eq!(vm.objlen(4), 0);
}

#[test]
fn test_userdata_block_is_writable() {
    let mut vm = vm();
    let id = vm.new_userdata_block(4).unwrap();
    vm.userdata_bytes_mut(id).copy_from_slice(&[1, 2, 3, 4]);
    assert_eq!(vm.userdata_bytes_mut(id)[2], 3);
}

#[test]
fn test_xmove_between_threads() {
    let mut vm = vm();
    let co = vm.new_thread().unwrap();
    let main = vm.current_thread_id();

    vm.push_string(b"a");
    vm.push_string(b"b");
    vm.xmove(main, co, 2);
    assert_eq!(vm.pool.thread(co).data.top, 2);

    vm.xmove(co, main, 2);
    assert_eq!(vm.to_string_lossy(-1).unwrap(), "b");
    assert_eq!(vm.to_string_lossy(-2).unwrap(), "a");
}

#[test]
fn test_concat_api_zero_and_one() {
    let mut vm = vm();
    vm.concat(0).unwrap();
    assert_eq!(vm.to_lstring(-1).unwrap(), b"");
    vm.pop_n(1);

    vm.push_string(b"solo");
    vm.concat(1).unwrap();
    assert_eq!(vm.to_string_lossy(-1).unwrap(), "solo");
}

#[test]
fn test_push_fmt() {
    let mut vm = vm();
    vm.push_fmt(format_args!("{}-{}", "x", 7));
    assert_eq!(vm.to_string_lossy(-1).unwrap(), "x-7");
}

#[test]
fn test_check_stack_limits() {
    let mut vm = LuaVM::new(crate::lua_vm::VmConfig {
        max_stack: 64,
        ..Default::default()
    });
    assert!(vm.check_stack(32));
    assert!(!vm.check_stack(1000));
}

#[test]
fn test_native_frame_indexing() {
    fn probe(vm: &mut LuaVM) -> VmResult<i32> {
        assert_eq!(vm.get_top(), 2);
        assert_eq!(vm.to_number(1), 10.0);
        assert_eq!(vm.to_number(2), 20.0);
        assert_eq!(vm.to_number(-1), 20.0);
        assert_eq!(vm.to_number(-2), 10.0);
        vm.push_number(vm.to_number(1) + vm.to_number(2));
        Ok(1)
    }
    let mut vm = vm();
    vm.push_native_closure(probe, 0).unwrap();
    vm.push_number(10.0);
    vm.push_number(20.0);
    assert_eq!(vm.pcall(2, 1, 0), ThreadStatus::Ok);
    assert_eq!(vm.to_number(-1), 30.0);
}

#[test]
fn test_raw_equal_properties() {
    let mut vm = vm();
    vm.push_string(b"same");
    vm.push_string(b"same");
    vm.push_string(b"other");
    // reflexive, symmetric on interned strings
    assert!(vm.raw_equal(1, 1));
    assert!(vm.raw_equal(1, 2));
    assert!(vm.raw_equal(2, 1));
    assert!(!vm.raw_equal(1, 3));
}
