// Table behavior through the embedding API: raw access, boundaries,
// traversal, key restrictions, metatable plumbing.

use crate::lua_vm::LuaVM;
use crate::test::vm;

fn fresh_table(vm: &mut LuaVM) {
    vm.create_table(0, 0).unwrap();
}

#[test]
fn test_rawset_rawget_roundtrip() {
    let mut vm = vm();
    fresh_table(&mut vm);
    vm.push_string(b"key");
    vm.push_number(42.0);
    vm.raw_set(-3).unwrap();
    vm.push_string(b"key");
    vm.raw_get(-2).unwrap();
    assert_eq!(vm.to_number(-1), 42.0);
}

#[test]
fn test_integer_keys_and_border() {
    let mut vm = vm();
    fresh_table(&mut vm);
    for i in 1..=5 {
        vm.push_number(i as f64 * 2.0);
        vm.raw_seti(-2, i).unwrap();
    }
    assert_eq!(vm.objlen(-1), 5);
    vm.raw_geti(-1, 3);
    assert_eq!(vm.to_number(-1), 6.0);
    vm.pop_n(1);

    // nil at the end moves the border back
    vm.push_nil();
    vm.raw_seti(-2, 5).unwrap();
    assert_eq!(vm.objlen(-1), 4);
}

#[test]
fn test_key_just_above_array_size_is_kept() {
    let mut vm = vm();
    vm.create_table(4, 0).unwrap();
    for i in 1..=4 {
        vm.push_number(i as f64);
        vm.raw_seti(-2, i).unwrap();
    }
    vm.push_number(5.0);
    vm.raw_seti(-2, 5).unwrap();
    vm.raw_geti(-1, 5);
    assert_eq!(vm.to_number(-1), 5.0);
    vm.pop_n(1);
    assert_eq!(vm.objlen(-1), 5);
}

#[test]
fn test_huge_and_negative_keys_are_legal() {
    let mut vm = vm();
    fresh_table(&mut vm);
    vm.push_number(f64::INFINITY);
    vm.push_string(b"huge");
    vm.raw_set(-3).unwrap();
    vm.push_number(-7.25);
    vm.push_string(b"neg");
    vm.raw_set(-3).unwrap();

    vm.push_number(f64::INFINITY);
    vm.raw_get(-2).unwrap();
    assert_eq!(vm.to_string_lossy(-1).unwrap(), "huge");
    vm.pop_n(1);
    vm.push_number(-7.25);
    vm.raw_get(-2).unwrap();
    assert_eq!(vm.to_string_lossy(-1).unwrap(), "neg");
}

#[test]
fn test_nan_key_raises() {
    let mut vm = vm();
    fresh_table(&mut vm);
    vm.push_number(f64::NAN);
    vm.push_number(1.0);
    let r = vm.raw_set(-3);
    assert!(r.is_err());
    let msg = vm.display_value(&vm.error_value);
    assert!(msg.contains("table index is NaN"), "{msg}");
}

#[test]
fn test_nil_key_raises_on_insert() {
    let mut vm = vm();
    fresh_table(&mut vm);
    vm.push_nil();
    vm.push_number(1.0);
    assert!(vm.raw_set(-3).is_err());
}

#[test]
fn test_next_enumerates_exactly_once() {
    let mut vm = vm();
    fresh_table(&mut vm);
    for i in 1..=3 {
        vm.push_number(i as f64);
        vm.raw_seti(-2, i).unwrap();
    }
    vm.push_string(b"x");
    vm.push_number(100.0);
    vm.raw_set(-3).unwrap();

    let mut seen = Vec::new();
    vm.push_nil();
    while vm.next(-2).unwrap() {
        // stack: table, key, value
        let key_desc = if vm.is_number(-2) {
            format!("n:{}", vm.to_number(-2))
        } else {
            format!("s:{}", vm.to_string_lossy(-2).unwrap())
        };
        seen.push(key_desc);
        vm.pop_n(1); // drop value, keep key for the next step
    }
    seen.sort();
    assert_eq!(seen, vec!["n:1", "n:2", "n:3", "s:x"]);
    // key was consumed by the final next()
    assert_eq!(vm.get_top(), 1);
}

#[test]
fn test_next_invalid_key_errors() {
    let mut vm = vm();
    fresh_table(&mut vm);
    vm.push_number(1.0);
    vm.raw_seti(-2, 1).unwrap();
    vm.push_string(b"never-inserted");
    let r = vm.next(-2);
    assert!(r.is_err());
}

#[test]
fn test_metatable_roundtrip_and_flags_invalidation() {
    let mut vm = vm();
    fresh_table(&mut vm); // t
    assert!(!vm.get_metatable(-1));

    vm.create_table(0, 1).unwrap(); // mt
    vm.push_value(-1);
    vm.set_metatable(-3).unwrap();
    assert!(vm.get_metatable(-2));
    assert!(vm.raw_equal(-1, -2));
    vm.pop_n(2); // drop both mt copies

    // index through the metatable: __index miss is cached, then the
    // cache must be dropped when __index appears
    vm.push_string(b"absent");
    vm.get_table(-2).unwrap();
    assert!(vm.is_nil(-1));
    vm.pop_n(1);

    assert!(vm.get_metatable(-1));
    vm.create_table(0, 1).unwrap(); // fallback table
    vm.push_string(b"absent");
    vm.push_number(9.0);
    vm.set_table(-3).unwrap(); // fallback.absent = 9
    vm.set_field(-2, "__index").unwrap(); // mt.__index = fallback
    vm.pop_n(1); // drop mt

    vm.push_string(b"absent");
    vm.get_table(-2).unwrap();
    assert_eq!(vm.to_number(-1), 9.0);
}

#[test]
fn test_registry_and_globals_pseudo_indices() {
    let mut vm = vm();
    vm.push_number(5.0);
    vm.set_field(crate::lua_vm::api::REGISTRY_INDEX, "stash").unwrap();
    vm.get_field(crate::lua_vm::api::REGISTRY_INDEX, "stash").unwrap();
    assert_eq!(vm.to_number(-1), 5.0);
    vm.pop_n(1);

    vm.push_number(7.0);
    vm.set_global("g").unwrap();
    vm.get_global("g").unwrap();
    assert_eq!(vm.to_number(-1), 7.0);

    // globals are reachable through GLOBALS_INDEX as a table value
    assert!(vm.is_table(crate::lua_vm::api::GLOBALS_INDEX));
}
