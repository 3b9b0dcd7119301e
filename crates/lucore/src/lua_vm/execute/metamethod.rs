// Tag-method (metamethod) dispatch.
//
// Tables and userdata carry their own metatable; every other type falls
// back to the per-type default. Table metatables cache "event is absent"
// bits in the table's flags byte so the common no-metamethod case costs
// one bit test; any mutation of the metatable clears the cache.

use crate::gc::TableId;
use crate::lua_value::LuaValue;
use crate::lua_value::lua_value::{LUA_TSTRING, LUA_TTABLE};
use crate::lua_vm::execute::call;
use crate::lua_vm::{LuaVM, VmResult};

/// Chain limit for `__index` / `__newindex` loops.
pub const MAX_TAG_LOOP: usize = 100;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmKind {
    Index = 0,
    NewIndex,
    Gc,
    Mode,
    Eq,
    // events below are never cached in the flags byte
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Len,
    Lt,
    Le,
    Concat,
    Call,
}

pub const TM_NAMES: [&str; 17] = [
    "__index",
    "__newindex",
    "__gc",
    "__mode",
    "__eq",
    "__add",
    "__sub",
    "__mul",
    "__div",
    "__mod",
    "__pow",
    "__unm",
    "__len",
    "__lt",
    "__le",
    "__concat",
    "__call",
];

/// Events with an absence bit in the table flags byte.
const FAST_TM_LIMIT: u8 = TmKind::Eq as u8;

impl LuaVM {
    /// Metatable of a value: own for tables/userdata, type default
    /// otherwise.
    pub(crate) fn metatable_of(&self, v: &LuaValue) -> Option<TableId> {
        if let Some(t) = v.as_table_id() {
            self.pool.table(t).data.metatable
        } else if let Some(u) = v.as_userdata_id() {
            self.pool.userdata_ref(u).data.metatable
        } else {
            self.type_metatables[v.ttype() as usize]
        }
    }

    /// Raw lookup of an event in a metatable, maintaining the absence
    /// cache for the events that have a bit.
    pub(crate) fn fast_tm(&mut self, mt: TableId, event: TmKind) -> LuaValue {
        let cacheable = (event as u8) <= FAST_TM_LIMIT;
        if cacheable {
            let flags = self.pool.table(mt).data.flags;
            if flags & (1 << event as u8) != 0 {
                return LuaValue::nil();
            }
        }
        let name = self.tm_names[event as usize];
        let v = self.table_rawget(mt, &LuaValue::string(name));
        if v.is_nil() && cacheable {
            self.pool.table_mut(mt).data.flags |= 1 << event as u8;
        }
        v
    }

    /// Event handler for a value, or nil.
    pub(crate) fn tm_by_value(&mut self, v: &LuaValue, event: TmKind) -> LuaValue {
        match self.metatable_of(v) {
            Some(mt) => self.fast_tm(mt, event),
            None => LuaValue::nil(),
        }
    }

    pub(crate) fn type_error<T>(&mut self, v: &LuaValue, op: &str) -> VmResult<T> {
        let tn = v.type_name();
        self.runtime_error(format!("attempt to {op} a {tn} value"))
    }
}

/// Call `f(p1, p2)` and return its single result.
pub(crate) fn call_tm_res(
    vm: &mut LuaVM,
    f: LuaValue,
    p1: LuaValue,
    p2: LuaValue,
) -> VmResult<LuaValue> {
    let func_idx = vm.th().top;
    {
        let th = vm.th_mut();
        th.push(f);
        th.push(p1);
        th.push(p2);
    }
    call::call_at(vm, func_idx, 2, 1)?;
    Ok(vm.th_mut().pop())
}

/// Call `f(p1, p2, p3)` for effect (`__newindex`).
pub(crate) fn call_tm(
    vm: &mut LuaVM,
    f: LuaValue,
    p1: LuaValue,
    p2: LuaValue,
    p3: LuaValue,
) -> VmResult<()> {
    let func_idx = vm.th().top;
    {
        let th = vm.th_mut();
        th.push(f);
        th.push(p1);
        th.push(p2);
        th.push(p3);
    }
    call::call_at(vm, func_idx, 3, 0)
}

/// Indexing with the `__index` chain, bounded to break cycles.
pub(crate) fn get_table_value(
    vm: &mut LuaVM,
    t: LuaValue,
    key: LuaValue,
) -> VmResult<LuaValue> {
    let mut t = t;
    for _ in 0..MAX_TAG_LOOP {
        let tm = if let Some(tid) = t.as_table_id() {
            let raw = vm.table_rawget(tid, &key);
            if !raw.is_nil() {
                return Ok(raw);
            }
            let tm = match vm.pool.table(tid).data.metatable {
                Some(mt) => vm.fast_tm(mt, TmKind::Index),
                None => LuaValue::nil(),
            };
            if tm.is_nil() {
                return Ok(LuaValue::nil());
            }
            tm
        } else {
            let tm = vm.tm_by_value(&t, TmKind::Index);
            if tm.is_nil() {
                return vm.type_error(&t, "index");
            }
            tm
        };
        if tm.is_function() {
            return call_tm_res(vm, tm, t, key);
        }
        t = tm;
    }
    vm.runtime_error("loop in gettable".to_string())
}

/// Assignment with the `__newindex` chain.
pub(crate) fn set_table_value(
    vm: &mut LuaVM,
    t: LuaValue,
    key: LuaValue,
    value: LuaValue,
) -> VmResult<()> {
    let mut t = t;
    for _ in 0..MAX_TAG_LOOP {
        let tm = if let Some(tid) = t.as_table_id() {
            let raw = vm.table_rawget(tid, &key);
            let tm = if raw.is_nil() {
                match vm.pool.table(tid).data.metatable {
                    Some(mt) => vm.fast_tm(mt, TmKind::NewIndex),
                    None => LuaValue::nil(),
                }
            } else {
                LuaValue::nil()
            };
            if tm.is_nil() {
                return vm.table_rawset(tid, key, value);
            }
            tm
        } else {
            let tm = vm.tm_by_value(&t, TmKind::NewIndex);
            if tm.is_nil() {
                return vm.type_error(&t, "index");
            }
            tm
        };
        if tm.is_function() {
            return call_tm(vm, tm, t, key, value);
        }
        t = tm;
    }
    vm.runtime_error("loop in settable".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
}

impl ArithOp {
    fn event(self) -> TmKind {
        match self {
            ArithOp::Add => TmKind::Add,
            ArithOp::Sub => TmKind::Sub,
            ArithOp::Mul => TmKind::Mul,
            ArithOp::Div => TmKind::Div,
            ArithOp::Mod => TmKind::Mod,
            ArithOp::Pow => TmKind::Pow,
            ArithOp::Unm => TmKind::Unm,
        }
    }

    pub fn apply(self, x: f64, y: f64) -> f64 {
        match self {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
            // a - floor(a/b)*b, so the result keeps the divisor's sign
            ArithOp::Mod => x - (x / y).floor() * y,
            ArithOp::Pow => x.powf(y),
            ArithOp::Unm => -x,
        }
    }
}

/// Arithmetic with string->number coercion, then the metamethod.
pub(crate) fn arith(
    vm: &mut LuaVM,
    op: ArithOp,
    a: LuaValue,
    b: LuaValue,
) -> VmResult<LuaValue> {
    if let (Some(x), Some(y)) = (vm.tonumber_value(&a), vm.tonumber_value(&b)) {
        return Ok(LuaValue::number(op.apply(x, y)));
    }
    let tm = {
        let t = vm.tm_by_value(&a, op.event());
        if t.is_nil() { vm.tm_by_value(&b, op.event()) } else { t }
    };
    if tm.is_nil() {
        // blame the operand that refused to become a number
        let culprit = if vm.tonumber_value(&a).is_none() { a } else { b };
        return vm.type_error(&culprit, "perform arithmetic on");
    }
    call_tm_res(vm, tm, a, b)
}

/// Primitive-equality with `__eq`: consulted only for two tables or two
/// userdata exposing the identical handler.
pub(crate) fn equal_values(vm: &mut LuaVM, a: LuaValue, b: LuaValue) -> VmResult<bool> {
    if a.ttype() != b.ttype() {
        return Ok(false);
    }
    if a.raw_equal(&b) {
        return Ok(true);
    }
    if a.ttype() != LUA_TTABLE && !a.is_userdata() {
        return Ok(false);
    }
    let tm1 = vm.tm_by_value(&a, TmKind::Eq);
    if tm1.is_nil() {
        return Ok(false);
    }
    let tm2 = vm.tm_by_value(&b, TmKind::Eq);
    if !tm1.raw_equal(&tm2) {
        return Ok(false);
    }
    let r = call_tm_res(vm, tm1, a, b)?;
    Ok(r.is_truthy())
}

/// The shared comparison handler, present and identical on both operands,
/// or nil.
fn comparison_tm(vm: &mut LuaVM, a: &LuaValue, b: &LuaValue, event: TmKind) -> LuaValue {
    let tm1 = vm.tm_by_value(a, event);
    if tm1.is_nil() {
        return LuaValue::nil();
    }
    let tm2 = vm.tm_by_value(b, event);
    if tm1.raw_equal(&tm2) { tm1 } else { LuaValue::nil() }
}

fn compare_error<T>(vm: &mut LuaVM, a: &LuaValue, b: &LuaValue) -> VmResult<T> {
    let (t1, t2) = (a.type_name(), b.type_name());
    if t1 == t2 {
        vm.runtime_error(format!("attempt to compare two {t1} values"))
    } else {
        vm.runtime_error(format!("attempt to compare {t1} with {t2}"))
    }
}

pub(crate) fn less_than(vm: &mut LuaVM, a: LuaValue, b: LuaValue) -> VmResult<bool> {
    if a.is_number() && b.is_number() {
        // IEEE ordering: any comparison against NaN is false
        return Ok(a.nvalue() < b.nvalue());
    }
    if a.ttype() == LUA_TSTRING && b.ttype() == LUA_TSTRING {
        let x = vm.pool.string_bytes(a.svalue());
        let y = vm.pool.string_bytes(b.svalue());
        return Ok(x < y);
    }
    let tm = comparison_tm(vm, &a, &b, TmKind::Lt);
    if tm.is_nil() {
        return compare_error(vm, &a, &b);
    }
    let r = call_tm_res(vm, tm, a, b)?;
    Ok(r.is_truthy())
}

pub(crate) fn less_equal(vm: &mut LuaVM, a: LuaValue, b: LuaValue) -> VmResult<bool> {
    if a.is_number() && b.is_number() {
        return Ok(a.nvalue() <= b.nvalue());
    }
    if a.ttype() == LUA_TSTRING && b.ttype() == LUA_TSTRING {
        let x = vm.pool.string_bytes(a.svalue());
        let y = vm.pool.string_bytes(b.svalue());
        return Ok(x <= y);
    }
    let tm = comparison_tm(vm, &a, &b, TmKind::Le);
    if !tm.is_nil() {
        let r = call_tm_res(vm, tm, a, b)?;
        return Ok(r.is_truthy());
    }
    // no __le: fall back to not (b < a)
    let tm = comparison_tm(vm, &a, &b, TmKind::Lt);
    if tm.is_nil() {
        return compare_error(vm, &a, &b);
    }
    let r = call_tm_res(vm, tm, b, a)?;
    Ok(r.is_falsy())
}

/// Length of a value: primitive for strings and tables, `__len`
/// otherwise.
pub(crate) fn object_length(vm: &mut LuaVM, v: LuaValue) -> VmResult<LuaValue> {
    if v.is_string() {
        return Ok(LuaValue::number(
            vm.pool.string(v.svalue()).data.len() as f64
        ));
    }
    if let Some(t) = v.as_table_id() {
        return Ok(LuaValue::number(vm.pool.table(t).data.length() as f64));
    }
    let tm = vm.tm_by_value(&v, TmKind::Len);
    if tm.is_nil() {
        return vm.type_error(&v, "get length of");
    }
    call_tm_res(vm, tm, v, LuaValue::nil())
}

/// Right-associative concatenation of the `total` stack slots ending at
/// absolute index `last`. Runs of strings/numbers collapse in one pass;
/// anything else goes through `__concat` pairwise from the right.
pub(crate) fn concat(vm: &mut LuaVM, mut total: usize, mut last: usize) -> VmResult<()> {
    while total > 1 {
        let a = vm.stack_get(last - 1);
        let b = vm.stack_get(last);
        let a_prim = a.is_string() || a.is_number();
        let b_prim = b.is_string() || b.is_number();
        if a_prim && b_prim {
            // absorb every concatable operand to the left
            let mut n = 2;
            while n < total {
                let v = vm.stack_get(last - n);
                if !(v.is_string() || v.is_number()) {
                    break;
                }
                n += 1;
            }
            let mut bytes = Vec::new();
            for i in (0..n).rev() {
                let v = vm.stack_get(last - i);
                let s = vm
                    .tostring_value(&v)
                    .expect("operand checked as string or number");
                bytes.extend_from_slice(vm.pool.string_bytes(s.svalue()));
            }
            vm.check_mem()?;
            let result = vm.new_string(&bytes);
            vm.stack_set(last - n + 1, result);
            total -= n - 1;
            last -= n - 1;
        } else {
            let tm = {
                let t = vm.tm_by_value(&a, TmKind::Concat);
                if t.is_nil() { vm.tm_by_value(&b, TmKind::Concat) } else { t }
            };
            if tm.is_nil() {
                let culprit = if a_prim { b } else { a };
                return vm.type_error(&culprit, "concatenate");
            }
            let r = call_tm_res(vm, tm, a, b)?;
            vm.stack_set(last - 1, r);
            total -= 1;
            last -= 1;
        }
    }
    Ok(())
}
