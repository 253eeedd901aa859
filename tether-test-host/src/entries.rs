//! The C entry points the engine exports, and the resolver that hands them
//! out by name.

use std::alloc::{self, Layout};
use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use tether_ffi::{
    CallError, CallErrorKind, ClassCreationInfo, ClassInstancePtr, ClassMethodInfo, ClassTag, ConstTypePtr,
    ConstVariantPtr, EditorPluginApi, InstanceId, InterfaceFunction, LibraryToken, LoggingApi, MethodBindHandle,
    ObjectHandle, PackedHandle, PropertyInfo, PtrBuiltinMethod, PtrConstructor, PtrDestructor, PtrOperatorEvaluator,
    StringNamePtr, StringPtr, TypeFromVariantFn, TypePtr, UninitStringNamePtr, UninitStringPtr, UninitTypePtr,
    UninitVariantPtr, VariantApi, VariantFromTypeFn, VariantHandle, VariantOperator, VariantPtr, VariantType,
};

use crate::calls;
use crate::engine::{bind_ref, engine, log_line, ExtClass, ExtMethod, ExtProperty, RawPtr};
use crate::value::{
    handle_mut, handle_ref, id_of, read_storage, text_at, var_mut, var_ref, write_storage, Handle, Target, Value,
    Var,
};
use crate::variant_ops::{self, Indexed, PTR_METHODS};

/// Run an entry body; a host panic is logged and turned into `fallback`
/// instead of unwinding into the library.
fn guarded<R>(entry: &str, fallback: R, body: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(_) => {
            log_line(format!("error: host panic in {entry}"));
            fallback
        }
    }
}

fn invalid_method() -> CallError {
    CallError { error: CallErrorKind::InvalidMethod, argument: 0, expected: 0 }
}

fn instance_is_null() -> CallError {
    CallError { error: CallErrorKind::InstanceIsNull, argument: 0, expected: 0 }
}

unsafe fn set_flag(flag: *mut bool, value: bool) {
    if !flag.is_null() {
        unsafe { *flag = value };
    }
}

unsafe fn c_text(text: *const c_char) -> String {
    if text.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
}

unsafe fn call_args(args: *const ConstVariantPtr, argc: i64) -> Vec<Value> {
    if args.is_null() {
        return Vec::new();
    }
    (0..argc.max(0) as usize).map(|i| unsafe { var_ref(*args.add(i)) }.clone()).collect()
}

/// Write a call outcome: the value (nil on failure) and the error record.
unsafe fn finish_call(outcome: Result<Value, CallError>, ret: UninitVariantPtr, error: *mut CallError) {
    let (value, status) = match outcome {
        Ok(value) => (value, CallError::OK),
        Err(err) => (Value::Nil, err),
    };
    unsafe { Var::new(value).write_to(ret) };
    if !error.is_null() {
        unsafe { *error = status };
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Every block starts with a header holding its size.
const HEADER: usize = 16;

fn block_layout(bytes: usize) -> Option<Layout> {
    Layout::from_size_align(bytes.checked_add(HEADER)?, HEADER).ok()
}

unsafe extern "C" fn mem_alloc(bytes: usize) -> *mut c_void {
    let Some(layout) = block_layout(bytes) else { return ptr::null_mut() };
    unsafe {
        let base = alloc::alloc(layout);
        if base.is_null() {
            return ptr::null_mut();
        }
        (base as *mut usize).write(bytes);
        base.add(HEADER) as *mut c_void
    }
}

unsafe extern "C" fn mem_realloc(block: *mut c_void, bytes: usize) -> *mut c_void {
    if block.is_null() {
        return unsafe { mem_alloc(bytes) };
    }
    unsafe {
        let base = (block as *mut u8).sub(HEADER);
        let old = (base as *const usize).read();
        let (Some(old_layout), Some(_)) = (block_layout(old), block_layout(bytes)) else { return ptr::null_mut() };
        let grown = alloc::realloc(base, old_layout, bytes + HEADER);
        if grown.is_null() {
            return ptr::null_mut();
        }
        (grown as *mut usize).write(bytes);
        grown.add(HEADER) as *mut c_void
    }
}

unsafe extern "C" fn mem_free(block: *mut c_void) {
    if block.is_null() {
        return;
    }
    unsafe {
        let base = (block as *mut u8).sub(HEADER);
        if let Some(layout) = block_layout((base as *const usize).read()) {
            alloc::dealloc(base, layout);
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

unsafe extern "C" fn print_error(desc: *const c_char, _f: *const c_char, _file: *const c_char, _l: i32, _n: bool) {
    log_line(format!("error: {}", unsafe { c_text(desc) }));
}

unsafe extern "C" fn print_warning(desc: *const c_char, _f: *const c_char, _file: *const c_char, _l: i32, _n: bool) {
    log_line(format!("warning: {}", unsafe { c_text(desc) }));
}

unsafe extern "C" fn print_script_error(
    desc: *const c_char,
    _f: *const c_char,
    _file: *const c_char,
    _l: i32,
    _n: bool,
) {
    log_line(format!("script error: {}", unsafe { c_text(desc) }));
}

unsafe extern "C" fn print_info(message: *const c_char, _file: *const c_char, _line: i32) {
    log_line(format!("info: {}", unsafe { c_text(message) }));
}

unsafe extern "C" fn print_error_with_message(
    desc: *const c_char,
    message: *const c_char,
    _f: *const c_char,
    _file: *const c_char,
    _l: i32,
    _n: bool,
) {
    log_line(format!("error: {}: {}", unsafe { c_text(desc) }, unsafe { c_text(message) }));
}

unsafe extern "C" fn print_warning_with_message(
    desc: *const c_char,
    message: *const c_char,
    _f: *const c_char,
    _file: *const c_char,
    _l: i32,
    _n: bool,
) {
    log_line(format!("warning: {}: {}", unsafe { c_text(desc) }, unsafe { c_text(message) }));
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

unsafe extern "C" fn variant_new_copy(dst: UninitVariantPtr, src: ConstVariantPtr) {
    unsafe { Var::new(var_ref(src).clone()).write_to(dst) };
}

unsafe extern "C" fn variant_new_nil(dst: UninitVariantPtr) {
    unsafe { Var::nil().write_to(dst) };
}

static UNCONSTRUCTED_DESTROYS: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn unconstructed_destroys() -> usize {
    UNCONSTRUCTED_DESTROYS.load(Ordering::SeqCst)
}

unsafe extern "C" fn variant_destroy(this: VariantPtr) {
    if !this.is_null() {
        // Every constructed variant carries a payload word; all-zero storage
        // was never written by an entry.
        if unsafe { ptr::read_unaligned(this) }.words[1] == 0 {
            UNCONSTRUCTED_DESTROYS.fetch_add(1, Ordering::SeqCst);
            log_line("error: variant_destroy on unconstructed storage".to_string());
            return;
        }
        drop(unsafe { Var::adopt(ptr::read_unaligned(this)) });
        unsafe { ptr::write_unaligned(this, VariantHandle::ZEROED) };
    }
}

unsafe extern "C" fn variant_call(
    this: VariantPtr,
    method: StringNamePtr,
    args: *const ConstVariantPtr,
    argc: i64,
    ret: UninitVariantPtr,
    error: *mut CallError,
) {
    let outcome = guarded("variant_call", Err(invalid_method()), || {
        let method = unsafe { text_at(method) };
        let args = unsafe { call_args(args, argc) };
        let Some(value) = (unsafe { var_mut(this) }) else { return Err(instance_is_null()) };
        // Objects, callables and signals route to the object model first.
        let routed = match &*value {
            Value::Object(id) => Some(calls::call_method(*id, &method, &args)),
            Value::Callable(target) => calls::call_callable(target, &method, &args),
            Value::Signal(target) => calls::call_signal(target, &method, &args),
            _ => None,
        };
        routed.unwrap_or_else(|| variant_ops::call_builtin(value, &method, &args))
    });
    unsafe { finish_call(outcome, ret, error) };
}

unsafe extern "C" fn variant_call_static(
    ty: VariantType,
    method: StringNamePtr,
    args: *const ConstVariantPtr,
    argc: i64,
    ret: UninitVariantPtr,
    error: *mut CallError,
) {
    let method = unsafe { text_at(method) };
    let args = unsafe { call_args(args, argc) };
    unsafe { finish_call(variant_ops::call_static(ty, &method, &args), ret, error) };
}

unsafe extern "C" fn variant_evaluate(
    op: VariantOperator,
    a: ConstVariantPtr,
    b: ConstVariantPtr,
    ret: UninitVariantPtr,
    valid: *mut bool,
) {
    let result = guarded("variant_evaluate", None, || unsafe { variant_ops::evaluate(op, var_ref(a), var_ref(b)) });
    unsafe {
        set_flag(valid, result.is_some());
        Var::new(result.unwrap_or(Value::Nil)).write_to(ret);
    }
}

unsafe extern "C" fn variant_set(this: VariantPtr, key: ConstVariantPtr, value: ConstVariantPtr, valid: *mut bool) {
    let done = unsafe { var_mut(this) }
        .is_some_and(|target| variant_ops::set(target, unsafe { var_ref(key) }, unsafe { var_ref(value) }));
    unsafe { set_flag(valid, done) };
}

unsafe extern "C" fn variant_set_named(this: VariantPtr, name: StringNamePtr, value: ConstVariantPtr, valid: *mut bool) {
    let name = unsafe { text_at(name) };
    let done = unsafe { var_mut(this) }
        .is_some_and(|target| variant_ops::set_named(target, &name, unsafe { var_ref(value) }));
    unsafe { set_flag(valid, done) };
}

unsafe extern "C" fn variant_set_keyed(this: VariantPtr, key: ConstVariantPtr, value: ConstVariantPtr, valid: *mut bool) {
    let done = unsafe { var_mut(this) }
        .is_some_and(|target| variant_ops::set_keyed(target, unsafe { var_ref(key) }, unsafe { var_ref(value) }));
    unsafe { set_flag(valid, done) };
}

unsafe extern "C" fn variant_set_indexed(
    this: VariantPtr,
    index: i64,
    value: ConstVariantPtr,
    valid: *mut bool,
    oob: *mut bool,
) {
    let outcome = match unsafe { var_mut(this) } {
        Some(target) => variant_ops::set_indexed(target, index, unsafe { var_ref(value) }),
        None => Indexed::Invalid,
    };
    unsafe {
        set_flag(valid, matches!(outcome, Indexed::Found(_)));
        set_flag(oob, matches!(outcome, Indexed::OutOfBounds));
    }
}

unsafe fn write_lookup(found: Option<Value>, ret: UninitVariantPtr, valid: *mut bool) {
    unsafe {
        set_flag(valid, found.is_some());
        Var::new(found.unwrap_or(Value::Nil)).write_to(ret);
    }
}

unsafe extern "C" fn variant_get(this: ConstVariantPtr, key: ConstVariantPtr, ret: UninitVariantPtr, valid: *mut bool) {
    let found = guarded("variant_get", None, || unsafe { variant_ops::get(var_ref(this), var_ref(key)) });
    unsafe { write_lookup(found, ret, valid) };
}

unsafe extern "C" fn variant_get_named(this: ConstVariantPtr, name: StringNamePtr, ret: UninitVariantPtr, valid: *mut bool) {
    let name = unsafe { text_at(name) };
    let found = guarded("variant_get_named", None, || variant_ops::get_named(unsafe { var_ref(this) }, &name));
    unsafe { write_lookup(found, ret, valid) };
}

unsafe extern "C" fn variant_get_keyed(this: ConstVariantPtr, key: ConstVariantPtr, ret: UninitVariantPtr, valid: *mut bool) {
    let found = guarded("variant_get_keyed", None, || unsafe { variant_ops::get_keyed(var_ref(this), var_ref(key)) });
    unsafe { write_lookup(found, ret, valid) };
}

unsafe extern "C" fn variant_get_indexed(
    this: ConstVariantPtr,
    index: i64,
    ret: UninitVariantPtr,
    valid: *mut bool,
    oob: *mut bool,
) {
    let outcome = variant_ops::get_indexed(unsafe { var_ref(this) }, index);
    unsafe { set_flag(oob, matches!(outcome, Indexed::OutOfBounds)) };
    let found = match outcome {
        Indexed::Found(value) => Some(value),
        _ => None,
    };
    unsafe { write_lookup(found, ret, valid) };
}

unsafe extern "C" fn variant_iter_init(this: ConstVariantPtr, iter: UninitVariantPtr, valid: *mut bool) -> bool {
    let started = variant_ops::iter_init(unsafe { var_ref(this) });
    unsafe { set_flag(valid, started.is_some()) };
    let (state, more) = started.unwrap_or((Value::Nil, false));
    unsafe { Var::new(state).write_to(iter) };
    more
}

unsafe extern "C" fn variant_iter_next(this: ConstVariantPtr, iter: VariantPtr, valid: *mut bool) -> bool {
    let value = unsafe { var_ref(this) }.clone();
    let more = unsafe { var_mut(iter) }.and_then(|state| variant_ops::iter_next(&value, state));
    unsafe { set_flag(valid, more.is_some()) };
    more.unwrap_or(false)
}

unsafe extern "C" fn variant_iter_get(this: ConstVariantPtr, iter: VariantPtr, ret: UninitVariantPtr, valid: *mut bool) {
    let found = unsafe { variant_ops::iter_get(var_ref(this), var_ref(iter)) };
    unsafe { write_lookup(found, ret, valid) };
}

/// Depth used by the plain hash.
const HASH_DEPTH: i64 = 100;

unsafe extern "C" fn variant_hash(this: ConstVariantPtr) -> i64 {
    crate::value::hash_value(unsafe { var_ref(this) }, HASH_DEPTH)
}

unsafe extern "C" fn variant_recursive_hash(this: ConstVariantPtr, recursion_count: i64) -> i64 {
    crate::value::hash_value(unsafe { var_ref(this) }, recursion_count)
}

unsafe extern "C" fn variant_hash_compare(this: ConstVariantPtr, other: ConstVariantPtr) -> bool {
    let (a, b) = unsafe { (var_ref(this), var_ref(other)) };
    a.ty() == b.ty() && crate::value::equals(a, b, true)
}

unsafe extern "C" fn variant_booleanize(this: ConstVariantPtr) -> bool {
    variant_ops::booleanize(unsafe { var_ref(this) })
}

unsafe extern "C" fn variant_duplicate(this: ConstVariantPtr, ret: UninitVariantPtr, deep: bool) {
    unsafe { Var::new(crate::value::duplicate(var_ref(this), deep)).write_to(ret) };
}

unsafe extern "C" fn variant_stringify(this: ConstVariantPtr, ret: UninitStringPtr) {
    let text = guarded("variant_stringify", String::new(), || variant_ops::stringify(unsafe { var_ref(this) }));
    unsafe { write_storage(Value::String(text), ret as TypePtr) };
}

unsafe extern "C" fn variant_get_type(this: ConstVariantPtr) -> VariantType {
    unsafe { var_ref(this) }.ty()
}

unsafe extern "C" fn variant_has_method(this: ConstVariantPtr, method: StringNamePtr) -> bool {
    let method = unsafe { text_at(method) };
    match unsafe { var_ref(this) } {
        Value::Object(id) => calls::has_method(*id, &method),
        Value::Callable(_) if calls::CALLABLE_METHODS.contains(&method.as_str()) => true,
        Value::Signal(_) if calls::SIGNAL_METHODS.contains(&method.as_str()) => true,
        value => variant_ops::builtin_params(value.ty(), &method).is_some(),
    }
}

unsafe extern "C" fn variant_has_member(ty: VariantType, member: StringNamePtr) -> bool {
    crate::value::member_index(ty, &unsafe { text_at(member) }).is_some()
}

unsafe extern "C" fn variant_has_key(this: ConstVariantPtr, key: ConstVariantPtr, valid: *mut bool) -> bool {
    let found = unsafe { variant_ops::has_key(var_ref(this), var_ref(key)) };
    unsafe { set_flag(valid, found.is_some()) };
    found.unwrap_or(false)
}

unsafe extern "C" fn variant_get_type_name(ty: VariantType, ret: UninitStringPtr) {
    unsafe { write_storage(Value::String(variant_ops::type_name(ty)), ret as TypePtr) };
}

unsafe extern "C" fn variant_can_convert(from: VariantType, to: VariantType) -> bool {
    variant_ops::can_convert(from, to, false)
}

unsafe extern "C" fn variant_can_convert_strict(from: VariantType, to: VariantType) -> bool {
    variant_ops::can_convert(from, to, true)
}

unsafe extern "C" fn variant_construct(
    ty: VariantType,
    base: UninitVariantPtr,
    args: *const ConstVariantPtr,
    argc: i32,
    error: *mut CallError,
) {
    let args = unsafe { call_args(args, argc as i64) };
    unsafe { finish_call(variant_ops::construct(ty, &args), base, error) };
}

unsafe extern "C" fn variant_get_object_instance_id(this: ConstVariantPtr) -> InstanceId {
    match unsafe { var_ref(this) } {
        Value::Object(id) => *id,
        _ => InstanceId::NONE,
    }
}

// ---------------------------------------------------------------------------
// Per-type function pointers
// ---------------------------------------------------------------------------

unsafe extern "C" fn from_type<const T: usize>(dst: UninitVariantPtr, src: TypePtr) {
    let value = unsafe { read_storage(VariantType::ALL[T], src) };
    unsafe { Var::new(value).write_to(dst) };
}

unsafe extern "C" fn to_type<const T: usize>(dst: UninitTypePtr, src: VariantPtr) {
    let ty = VariantType::ALL[T];
    let value = match unsafe { var_ref(src) } {
        value if value.ty() != ty => variant_ops::default_value(ty),
        Value::Object(id) if !calls::is_live(*id) => Value::Object(InstanceId::NONE),
        value => value.clone(),
    };
    unsafe { write_storage(value, dst) };
}

unsafe extern "C" fn construct_default<const T: usize>(base: UninitTypePtr, _args: *const ConstTypePtr) {
    unsafe { write_storage(variant_ops::default_value(VariantType::ALL[T]), base) };
}

unsafe extern "C" fn construct_copy<const T: usize>(base: UninitTypePtr, args: *const ConstTypePtr) {
    let value = unsafe { read_storage(VariantType::ALL[T], *args) };
    unsafe { write_storage(value, base) };
}

/// Constructor 2: String from StringName, StringName and NodePath from
/// String, Callable and Signal from an object and a name.
unsafe extern "C" fn construct_convert<const T: usize>(base: UninitTypePtr, args: *const ConstTypePtr) {
    let ty = VariantType::ALL[T];
    let value = unsafe {
        match ty {
            VariantType::String => Value::String(text_at(*args as StringNamePtr)),
            VariantType::StringName => Value::StringName(text_at(*args as StringPtr)),
            VariantType::NodePath => Value::NodePath(text_at(*args as StringPtr)),
            VariantType::Callable | VariantType::Signal => {
                let object = id_of(ptr::read_unaligned(*args as *const ObjectHandle));
                let target = Target { object, name: text_at(*args.add(1) as StringNamePtr) };
                if ty == VariantType::Callable { Value::Callable(target) } else { Value::Signal(target) }
            }
            _ => variant_ops::default_value(ty),
        }
    };
    unsafe { write_storage(value, base) };
}

unsafe extern "C" fn destroy_handle(base: TypePtr) {
    if !base.is_null() {
        drop(Handle(unsafe { ptr::read_unaligned(base as *const PackedHandle) }));
    }
}

/// Pointer-call evaluator for scalar operands. `PAIR` encodes the operand
/// types as `left * 3 + right` over (bool, int, float).
unsafe extern "C" fn ptr_evaluate<const OP: usize, const PAIR: usize>(left: ConstTypePtr, right: ConstTypePtr, ret: TypePtr) {
    let (Some(op), Some(l), Some(r)) = (operator(OP), scalar(PAIR / 3), scalar(PAIR % 3)) else { return };
    let (a, b) = unsafe { (read_storage(l, left), read_storage(r, right)) };
    if let Some(result) = variant_ops::evaluate(op, &a, &b) {
        unsafe { write_storage(result, ret) };
    }
}

fn scalar(index: usize) -> Option<VariantType> {
    [VariantType::Bool, VariantType::Int, VariantType::Float].get(index).copied()
}

fn operator(index: usize) -> Option<VariantOperator> {
    use VariantOperator as Op;
    const ALL: [VariantOperator; 25] = [
        Op::Equal, Op::NotEqual, Op::Less, Op::LessEqual, Op::Greater, Op::GreaterEqual,
        Op::Add, Op::Subtract, Op::Multiply, Op::Divide, Op::Negate, Op::Positive, Op::Module, Op::Power,
        Op::ShiftLeft, Op::ShiftRight, Op::BitAnd, Op::BitOr, Op::BitXor, Op::BitNegate,
        Op::And, Op::Or, Op::Xor, Op::Not, Op::In,
    ];
    ALL.get(index).copied()
}

fn sample(ty: VariantType) -> Value {
    match ty {
        VariantType::Bool => Value::Bool(true),
        VariantType::Int => Value::Int(1),
        _ => Value::Float(1.0),
    }
}

/// Builtin method by index into [`PTR_METHODS`], dispatching on the value
/// behind `base`.
unsafe extern "C" fn ptr_builtin<const M: usize>(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: i32) {
    let method = PTR_METHODS[M];
    let Some(this) = (unsafe { handle_mut(base as *mut PackedHandle) }) else { return };
    let Some(params) = variant_ops::builtin_params(this.ty(), method) else { return };
    if argc < 0 || argc as usize != params.len() {
        log_line(format!("error: {method} expects {} arguments, got {argc}", params.len()));
        return;
    }
    let values: Vec<Value> =
        params.iter().enumerate().map(|(i, ty)| unsafe { read_storage(*ty, *args.add(i)) }).collect();
    if let Some(result) = variant_ops::run_builtin(this, method, &values) {
        unsafe { write_storage(result, ret) };
    }
}

macro_rules! per_type {
    (@arms $index:expr, $func:ident, $fty:ty; $($n:literal)*) => {
        match $index {
            $($n => Some($func::<$n> as $fty),)*
            _ => None,
        }
    };
    ($index:expr, $func:ident as $fty:ty) => {
        per_type!(@arms $index, $func, $fty;
            1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20
            21 22 23 24 25 26 27 28 29 30 31 32 33 34 35 36 37 38)
    };
}

macro_rules! builtins {
    ($index:expr; $($n:literal)*) => {
        match $index {
            $($n => Some(ptr_builtin::<$n> as PtrBuiltinMethod),)*
            _ => None,
        }
    };
}

macro_rules! evaluators {
    ($op:expr, $pair:expr; $($n:literal)*) => {
        match ($op, $pair) {
            $(
                ($n, 0) => Some(ptr_evaluate::<$n, 0> as PtrOperatorEvaluator),
                ($n, 1) => Some(ptr_evaluate::<$n, 1> as PtrOperatorEvaluator),
                ($n, 2) => Some(ptr_evaluate::<$n, 2> as PtrOperatorEvaluator),
                ($n, 3) => Some(ptr_evaluate::<$n, 3> as PtrOperatorEvaluator),
                ($n, 4) => Some(ptr_evaluate::<$n, 4> as PtrOperatorEvaluator),
                ($n, 5) => Some(ptr_evaluate::<$n, 5> as PtrOperatorEvaluator),
                ($n, 6) => Some(ptr_evaluate::<$n, 6> as PtrOperatorEvaluator),
                ($n, 7) => Some(ptr_evaluate::<$n, 7> as PtrOperatorEvaluator),
                ($n, 8) => Some(ptr_evaluate::<$n, 8> as PtrOperatorEvaluator),
            )*
            _ => None,
        }
    };
}

unsafe extern "C" fn get_variant_from_type_constructor(ty: VariantType) -> Option<VariantFromTypeFn> {
    per_type!(ty.index(), from_type as VariantFromTypeFn)
}

unsafe extern "C" fn get_variant_to_type_constructor(ty: VariantType) -> Option<TypeFromVariantFn> {
    per_type!(ty.index(), to_type as TypeFromVariantFn)
}

unsafe extern "C" fn variant_get_ptr_operator_evaluator(
    op: VariantOperator,
    a: VariantType,
    b: VariantType,
) -> Option<PtrOperatorEvaluator> {
    let position = |ty: VariantType| (0..3).position(|i| scalar(i) == Some(ty));
    let (l, r) = (position(a)?, position(b)?);
    // Only hand out evaluators for operations defined on these types.
    variant_ops::evaluate(op, &sample(a), &sample(b))?;
    evaluators!(op as usize, l * 3 + r;
        0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20 21 22 23 24)
}

unsafe extern "C" fn variant_get_ptr_builtin_method(ty: VariantType, method: StringNamePtr, hash: i64) -> Option<PtrBuiltinMethod> {
    let method = unsafe { text_at(method) };
    if variant_ops::ptr_method_hash(ty, &method)? != hash {
        return None;
    }
    let index = PTR_METHODS.iter().position(|name| *name == method)?;
    builtins!(index; 0 1 2 3 4 5 6 7 8 9 10 11 12 13)
}

unsafe extern "C" fn variant_get_ptr_constructor(ty: VariantType, index: i32) -> Option<PtrConstructor> {
    if matches!(ty, VariantType::Nil | VariantType::Object) {
        return None;
    }
    match index {
        0 => per_type!(ty.index(), construct_default as PtrConstructor),
        1 => per_type!(ty.index(), construct_copy as PtrConstructor),
        2 if matches!(
            ty,
            VariantType::String
                | VariantType::StringName
                | VariantType::NodePath
                | VariantType::Callable
                | VariantType::Signal
        ) =>
        {
            per_type!(ty.index(), construct_convert as PtrConstructor)
        }
        _ => None,
    }
}

unsafe extern "C" fn variant_get_ptr_destructor(ty: VariantType) -> Option<PtrDestructor> {
    ty.is_packed_handle().then_some(destroy_handle as PtrDestructor)
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

unsafe fn utf8_arg(contents: *const c_char, size: i64) -> String {
    if contents.is_null() {
        return String::new();
    }
    if size < 0 {
        return unsafe { c_text(contents) };
    }
    let bytes = unsafe { std::slice::from_raw_parts(contents as *const u8, size as usize) };
    String::from_utf8_lossy(bytes).into_owned()
}

unsafe extern "C" fn string_new_with_utf8_chars_and_len(dst: UninitStringPtr, contents: *const c_char, size: i64) {
    unsafe { write_storage(Value::String(utf8_arg(contents, size)), dst as TypePtr) };
}

unsafe extern "C" fn string_name_new_with_utf8_chars_and_len(
    dst: UninitStringNamePtr,
    contents: *const c_char,
    size: i64,
) {
    unsafe { write_storage(Value::StringName(utf8_arg(contents, size)), dst as TypePtr) };
}

unsafe extern "C" fn string_to_utf8_chars(this: StringPtr, text: *mut c_char, max_write_length: i64) -> i64 {
    let value = unsafe { handle_ref(this) };
    let bytes = value.text().unwrap_or_default().as_bytes();
    if !text.is_null() && max_write_length > 0 {
        let count = bytes.len().min(max_write_length as usize);
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), text as *mut u8, count) };
    }
    bytes.len() as i64
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

/// Slot pointers stay valid until the container is resized.
unsafe extern "C" fn array_operator_index(this: TypePtr, index: i64) -> VariantPtr {
    let Some(Value::Array(items)) = (unsafe { handle_mut(this as *mut PackedHandle) }) else {
        return ptr::null_mut();
    };
    let mut items = crate::value::lock(items);
    match usize::try_from(index).ok().and_then(|i| items.get_mut(i)) {
        Some(slot) => &mut slot.0 as *mut VariantHandle,
        None => ptr::null_mut(),
    }
}

unsafe extern "C" fn array_operator_index_const(this: ConstTypePtr, index: i64) -> VariantPtr {
    unsafe { array_operator_index(this as TypePtr, index) }
}

unsafe extern "C" fn dictionary_operator_index(this: TypePtr, key: ConstVariantPtr) -> VariantPtr {
    let Some(Value::Dictionary(dict)) = (unsafe { handle_mut(this as *mut PackedHandle) }) else {
        return ptr::null_mut();
    };
    let key = unsafe { var_ref(key) };
    let mut dict = crate::value::lock(dict);
    let index = match crate::value::find_key(&dict, key) {
        Some(index) => index,
        None => {
            dict.push((Var::new(key.clone()), Box::new(Var::nil())));
            dict.len() - 1
        }
    };
    &mut dict[index].1.0 as *mut VariantHandle
}

unsafe extern "C" fn dictionary_operator_index_const(this: ConstTypePtr, key: ConstVariantPtr) -> VariantPtr {
    let Value::Dictionary(dict) = (unsafe { handle_ref(this as *const PackedHandle) }) else {
        return ptr::null_mut();
    };
    let mut dict = crate::value::lock(dict);
    match crate::value::find_key(&dict, unsafe { var_ref(key) }) {
        Some(index) => &mut dict[index].1.0 as *mut VariantHandle,
        None => ptr::null_mut(),
    }
}

unsafe extern "C" fn packed_index<const T: usize>(this: TypePtr, index: i64) -> TypePtr {
    match unsafe { handle_mut(this as *mut PackedHandle) } {
        Some(Value::Packed(ty, data)) if *ty == VariantType::ALL[T] && index >= 0 => {
            data.element_ptr(index as usize)
        }
        _ => ptr::null_mut(),
    }
}

unsafe extern "C" fn packed_index_const<const T: usize>(this: ConstTypePtr, index: i64) -> ConstTypePtr {
    unsafe { packed_index::<T>(this as TypePtr, index) }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

unsafe extern "C" fn global_get_singleton(name: StringNamePtr) -> ObjectHandle {
    let name = unsafe { text_at(name) };
    engine().singleton(&name)
}

unsafe extern "C" fn object_destroy(obj: ObjectHandle) {
    let id = id_of(obj);
    guarded("object_destroy", (), || {
        if !calls::destroy(id) {
            log_line(format!("warning: object_destroy on a freed object #{}", id.0));
        }
    });
}

unsafe extern "C" fn object_set_instance(obj: ObjectHandle, class_name: StringNamePtr, instance: ClassInstancePtr) {
    let class = unsafe { text_at(class_name) };
    let mut engine = engine();
    let Some(id) = engine.live(obj) else {
        log_line(format!("error: object_set_instance({class}) on a freed object"));
        return;
    };
    let known = engine.classes.contains_key(&class);
    let Some(record) = engine.objects.get_mut(&id) else { return };
    if instance.is_null() {
        record.class = record.native.to_string();
        record.instance = RawPtr::NULL;
    } else if known {
        record.class = class;
        record.instance = RawPtr(instance);
    } else {
        log_line(format!("error: object_set_instance: {class} is not an extension class"));
    }
}

unsafe extern "C" fn object_get_class_name(obj: ObjectHandle, _library: LibraryToken, ret: UninitStringNamePtr) -> bool {
    let class = {
        let engine = engine();
        engine.live(obj).and_then(|id| engine.objects.get(&id)).map(|record| record.class.clone())
    };
    let found = class.is_some();
    unsafe { write_storage(Value::StringName(class.unwrap_or_default()), ret as TypePtr) };
    found
}

unsafe extern "C" fn object_cast_to(obj: ObjectHandle, tag: ClassTag) -> ObjectHandle {
    let engine = engine();
    let Some(target) = engine.class_of_tag(tag) else { return ObjectHandle::null() };
    match engine.live(obj).and_then(|id| engine.objects.get(&id)) {
        Some(record) if engine.is_a(&record.class, target) => obj,
        _ => ObjectHandle::null(),
    }
}

unsafe extern "C" fn object_get_instance_from_id(id: InstanceId) -> ObjectHandle {
    if calls::is_live(id) { crate::value::handle_of(id) } else { ObjectHandle::null() }
}

unsafe extern "C" fn object_get_instance_id(obj: ObjectHandle) -> InstanceId {
    engine().live(obj).unwrap_or(InstanceId::NONE)
}

unsafe extern "C" fn object_method_bind_call(
    method: MethodBindHandle,
    obj: ObjectHandle,
    args: *const ConstVariantPtr,
    argc: i64,
    ret: UninitVariantPtr,
    error: *mut CallError,
) {
    let outcome = guarded("object_method_bind_call", Err(invalid_method()), || {
        let Some(bind) = (unsafe { bind_ref(method) }) else { return Err(invalid_method()) };
        let Some(id) = engine().live(obj) else { return Err(instance_is_null()) };
        calls::call_bind(bind, id, &unsafe { call_args(args, argc) })
    });
    unsafe { finish_call(outcome, ret, error) };
}

unsafe extern "C" fn object_method_bind_ptrcall(
    method: MethodBindHandle,
    obj: ObjectHandle,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    let Some(bind) = (unsafe { bind_ref(method) }) else { return };
    let Some(id) = engine().live(obj) else {
        log_line("error: ptrcall on a freed object".to_string());
        return;
    };
    guarded("object_method_bind_ptrcall", (), || unsafe { calls::ptrcall_bind(bind, id, args, ret) });
}

// ---------------------------------------------------------------------------
// Class database
// ---------------------------------------------------------------------------

unsafe extern "C" fn classdb_construct_object(class_name: StringNamePtr) -> ObjectHandle {
    let class = unsafe { text_at(class_name) };
    guarded("classdb_construct_object", ObjectHandle::null(), || calls::construct_object(&class))
}

unsafe extern "C" fn classdb_get_method_bind(class_name: StringNamePtr, method_name: StringNamePtr, hash: i64) -> MethodBindHandle {
    let (class, method) = unsafe { (text_at(class_name), text_at(method_name)) };
    engine().method_bind(&class, &method, hash)
}

unsafe extern "C" fn classdb_get_class_tag(class_name: StringNamePtr) -> ClassTag {
    engine().tag_of(&unsafe { text_at(class_name) })
}

unsafe extern "C" fn classdb_register_extension_class(
    _library: LibraryToken,
    class_name: StringNamePtr,
    parent_class_name: StringNamePtr,
    info: *const ClassCreationInfo,
) {
    let (class, parent) = unsafe { (text_at(class_name), text_at(parent_class_name)) };
    let Some(info) = (unsafe { info.as_ref() }) else { return };
    let mut engine = engine();
    if engine.class_exists(&class) {
        log_line(format!("error: class {class} is already registered"));
        return;
    }
    let Some(native) = engine.native_of(&parent) else {
        log_line(format!("error: cannot register {class}: unknown parent {parent}"));
        return;
    };
    let ext = ExtClass {
        parent,
        native,
        is_abstract: info.is_abstract,
        userdata: RawPtr(info.class_userdata),
        create: info.create_instance_func,
        free: info.free_instance_func,
        to_string: info.to_string_func,
        notification: info.notification_func,
        get_virtual: info.get_virtual_call_data_func,
        call_virtual: info.call_virtual_with_data_func,
        methods: Vec::new(),
        properties: Vec::new(),
        constants: Vec::new(),
        signals: Vec::new(),
        virtuals: Default::default(),
        lookups: Default::default(),
    };
    engine.classes.insert(class.clone(), ext);
    engine.class_order.push(class.clone());
    engine.add_tag(&class);
}

/// Apply `edit` to a registered extension class, logging unknown names.
unsafe fn with_class(class_name: StringNamePtr, what: &str, edit: impl FnOnce(&mut ExtClass)) {
    let class = unsafe { text_at(class_name) };
    let mut engine = engine();
    match engine.classes.get_mut(&class) {
        Some(ext) => edit(ext),
        None => log_line(format!("error: cannot register {what} on unknown class {class}")),
    }
}

unsafe extern "C" fn classdb_register_extension_class_method(
    _library: LibraryToken,
    class_name: StringNamePtr,
    info: *const ClassMethodInfo,
) {
    let Some(info) = (unsafe { info.as_ref() }) else { return };
    let arg_types: Vec<VariantType> = (0..info.argument_count as usize)
        .map(|i| unsafe { (*info.arguments_info.add(i)).type_ })
        .collect();
    let defaults: Vec<Var> = (0..info.default_argument_count as usize)
        .map(|i| Var::new(unsafe { var_ref(*info.default_arguments.add(i)) }.clone()))
        .collect();
    let method = ExtMethod {
        name: unsafe { text_at(info.name) },
        userdata: RawPtr(info.method_userdata),
        call: info.call_func,
        ptrcall: info.ptrcall_func,
        flags: info.method_flags,
        arg_types,
        defaults,
    };
    unsafe { with_class(class_name, "a method", |ext| ext.methods.push(method)) };
}

unsafe extern "C" fn classdb_register_extension_class_integer_constant(
    _library: LibraryToken,
    class_name: StringNamePtr,
    enum_name: StringNamePtr,
    constant_name: StringNamePtr,
    value: i64,
    is_bitfield: bool,
) {
    let constant = unsafe { (text_at(enum_name), text_at(constant_name), value, is_bitfield) };
    unsafe { with_class(class_name, "a constant", |ext| ext.constants.push(constant)) };
}

unsafe fn register_property(
    class_name: StringNamePtr,
    info: *const PropertyInfo,
    setter: StringNamePtr,
    getter: StringNamePtr,
    index: Option<i64>,
) {
    let Some(info) = (unsafe { info.as_ref() }) else { return };
    let property = ExtProperty::Property {
        name: unsafe { text_at(info.name) },
        setter: unsafe { text_at(setter) },
        getter: unsafe { text_at(getter) },
        index,
    };
    unsafe { with_class(class_name, "a property", |ext| ext.properties.push(property)) };
}

unsafe extern "C" fn classdb_register_extension_class_property(
    _library: LibraryToken,
    class_name: StringNamePtr,
    info: *const PropertyInfo,
    setter: StringNamePtr,
    getter: StringNamePtr,
) {
    unsafe { register_property(class_name, info, setter, getter, None) };
}

unsafe extern "C" fn classdb_register_extension_class_property_indexed(
    _library: LibraryToken,
    class_name: StringNamePtr,
    info: *const PropertyInfo,
    setter: StringNamePtr,
    getter: StringNamePtr,
    index: i64,
) {
    unsafe { register_property(class_name, info, setter, getter, Some(index)) };
}

unsafe extern "C" fn classdb_register_extension_class_property_group(
    _library: LibraryToken,
    class_name: StringNamePtr,
    group_name: StringPtr,
    _prefix: StringPtr,
) {
    let group = ExtProperty::Group(unsafe { text_at(group_name) });
    unsafe { with_class(class_name, "a property group", |ext| ext.properties.push(group)) };
}

unsafe extern "C" fn classdb_register_extension_class_property_subgroup(
    _library: LibraryToken,
    class_name: StringNamePtr,
    subgroup_name: StringPtr,
    _prefix: StringPtr,
) {
    let subgroup = ExtProperty::Subgroup(unsafe { text_at(subgroup_name) });
    unsafe { with_class(class_name, "a property subgroup", |ext| ext.properties.push(subgroup)) };
}

unsafe extern "C" fn classdb_register_extension_class_signal(
    _library: LibraryToken,
    class_name: StringNamePtr,
    signal_name: StringNamePtr,
    _argument_info: *const PropertyInfo,
    argument_count: i64,
) {
    let signal = (unsafe { text_at(signal_name) }, argument_count.max(0) as usize);
    unsafe { with_class(class_name, "a signal", |ext| ext.signals.push(signal)) };
}

unsafe extern "C" fn classdb_unregister_extension_class(_library: LibraryToken, class_name: StringNamePtr) {
    let class = unsafe { text_at(class_name) };
    let mut engine = engine();
    if engine.classes.values().any(|ext| ext.parent == class) {
        log_line(format!("error: cannot unregister {class}: a registered class inherits from it"));
        return;
    }
    if engine.classes.remove(&class).is_none() {
        log_line(format!("error: cannot unregister unknown class {class}"));
        return;
    }
    engine.class_order.retain(|name| *name != class);
    engine.remove_tag(&class);
    for record in engine.objects.values_mut().filter(|record| record.class == class) {
        record.class = record.native.to_string();
        record.instance = RawPtr::NULL;
    }
}

// ---------------------------------------------------------------------------
// Editor
// ---------------------------------------------------------------------------

unsafe extern "C" fn editor_add_plugin(class_name: StringNamePtr) {
    let class = unsafe { text_at(class_name) };
    let mut engine = engine();
    if !engine.is_a(&class, "EditorPlugin") {
        log_line(format!("error: {class} is not an EditorPlugin"));
        return;
    }
    engine.plugins.push(class);
}

unsafe extern "C" fn editor_remove_plugin(class_name: StringNamePtr) {
    let class = unsafe { text_at(class_name) };
    engine().plugins.retain(|name| *name != class);
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

macro_rules! entry_table {
    ($($name:literal => $func:expr,)*) => {
        fn lookup(name: &CStr) -> Option<InterfaceFunction> {
            $(
                if name == $name {
                    // SAFETY: the library casts the pointer back to the
                    // signature it declares for this name.
                    return Some(unsafe { std::mem::transmute::<*const (), InterfaceFunction>($func as *const ()) });
                }
            )*
            None
        }
    };
}

entry_table! {
    c"mem_alloc" => mem_alloc,
    c"mem_realloc" => mem_realloc,
    c"mem_free" => mem_free,

    c"print_error" => print_error,
    c"print_warning" => print_warning,
    c"print_script_error" => print_script_error,
    c"print_info" => print_info,
    c"print_error_with_message" => print_error_with_message,
    c"print_warning_with_message" => print_warning_with_message,

    c"variant_new_copy" => variant_new_copy,
    c"variant_new_nil" => variant_new_nil,
    c"variant_destroy" => variant_destroy,
    c"variant_call" => variant_call,
    c"variant_call_static" => variant_call_static,
    c"variant_evaluate" => variant_evaluate,
    c"variant_set" => variant_set,
    c"variant_set_named" => variant_set_named,
    c"variant_set_keyed" => variant_set_keyed,
    c"variant_set_indexed" => variant_set_indexed,
    c"variant_get" => variant_get,
    c"variant_get_named" => variant_get_named,
    c"variant_get_keyed" => variant_get_keyed,
    c"variant_get_indexed" => variant_get_indexed,
    c"variant_iter_init" => variant_iter_init,
    c"variant_iter_next" => variant_iter_next,
    c"variant_iter_get" => variant_iter_get,
    c"variant_hash" => variant_hash,
    c"variant_recursive_hash" => variant_recursive_hash,
    c"variant_hash_compare" => variant_hash_compare,
    c"variant_booleanize" => variant_booleanize,
    c"variant_duplicate" => variant_duplicate,
    c"variant_stringify" => variant_stringify,
    c"variant_get_type" => variant_get_type,
    c"variant_has_method" => variant_has_method,
    c"variant_has_member" => variant_has_member,
    c"variant_has_key" => variant_has_key,
    c"variant_get_type_name" => variant_get_type_name,
    c"variant_can_convert" => variant_can_convert,
    c"variant_can_convert_strict" => variant_can_convert_strict,
    c"get_variant_from_type_constructor" => get_variant_from_type_constructor,
    c"get_variant_to_type_constructor" => get_variant_to_type_constructor,
    c"variant_get_ptr_operator_evaluator" => variant_get_ptr_operator_evaluator,
    c"variant_get_ptr_builtin_method" => variant_get_ptr_builtin_method,
    c"variant_get_ptr_constructor" => variant_get_ptr_constructor,
    c"variant_get_ptr_destructor" => variant_get_ptr_destructor,
    c"variant_construct" => variant_construct,
    c"variant_get_object_instance_id" => variant_get_object_instance_id,

    c"string_new_with_utf8_chars_and_len" => string_new_with_utf8_chars_and_len,
    c"string_to_utf8_chars" => string_to_utf8_chars,
    c"string_name_new_with_utf8_chars_and_len" => string_name_new_with_utf8_chars_and_len,

    c"array_operator_index" => array_operator_index,
    c"array_operator_index_const" => array_operator_index_const,
    c"dictionary_operator_index" => dictionary_operator_index,
    c"dictionary_operator_index_const" => dictionary_operator_index_const,
    c"packed_byte_array_operator_index" => packed_index::<29>,
    c"packed_byte_array_operator_index_const" => packed_index_const::<29>,
    c"packed_int32_array_operator_index" => packed_index::<30>,
    c"packed_int32_array_operator_index_const" => packed_index_const::<30>,
    c"packed_int64_array_operator_index" => packed_index::<31>,
    c"packed_int64_array_operator_index_const" => packed_index_const::<31>,
    c"packed_float32_array_operator_index" => packed_index::<32>,
    c"packed_float32_array_operator_index_const" => packed_index_const::<32>,
    c"packed_float64_array_operator_index" => packed_index::<33>,
    c"packed_float64_array_operator_index_const" => packed_index_const::<33>,
    c"packed_string_array_operator_index" => packed_index::<34>,
    c"packed_string_array_operator_index_const" => packed_index_const::<34>,
    c"packed_vector2_array_operator_index" => packed_index::<35>,
    c"packed_vector2_array_operator_index_const" => packed_index_const::<35>,
    c"packed_vector3_array_operator_index" => packed_index::<36>,
    c"packed_vector3_array_operator_index_const" => packed_index_const::<36>,
    c"packed_color_array_operator_index" => packed_index::<37>,
    c"packed_color_array_operator_index_const" => packed_index_const::<37>,

    c"global_get_singleton" => global_get_singleton,
    c"object_destroy" => object_destroy,
    c"object_set_instance" => object_set_instance,
    c"object_get_class_name" => object_get_class_name,
    c"object_cast_to" => object_cast_to,
    c"object_get_instance_from_id" => object_get_instance_from_id,
    c"object_get_instance_id" => object_get_instance_id,
    c"object_method_bind_call" => object_method_bind_call,
    c"object_method_bind_ptrcall" => object_method_bind_ptrcall,

    c"classdb_construct_object" => classdb_construct_object,
    c"classdb_get_method_bind" => classdb_get_method_bind,
    c"classdb_get_class_tag" => classdb_get_class_tag,
    c"classdb_register_extension_class" => classdb_register_extension_class,
    c"classdb_register_extension_class_method" => classdb_register_extension_class_method,
    c"classdb_register_extension_class_integer_constant" => classdb_register_extension_class_integer_constant,
    c"classdb_register_extension_class_property" => classdb_register_extension_class_property,
    c"classdb_register_extension_class_property_indexed" => classdb_register_extension_class_property_indexed,
    c"classdb_register_extension_class_property_group" => classdb_register_extension_class_property_group,
    c"classdb_register_extension_class_property_subgroup" => classdb_register_extension_class_property_subgroup,
    c"classdb_register_extension_class_signal" => classdb_register_extension_class_signal,
    c"classdb_unregister_extension_class" => classdb_unregister_extension_class,

    c"editor_add_plugin" => editor_add_plugin,
    c"editor_remove_plugin" => editor_remove_plugin,
}

unsafe fn requested<'a>(name: *const c_char) -> Option<&'a CStr> {
    (!name.is_null()).then(|| unsafe { CStr::from_ptr(name) })
}

/// Resolver of a full engine build.
pub unsafe extern "C" fn get_proc_address(name: *const c_char, _library: LibraryToken) -> Option<InterfaceFunction> {
    lookup(unsafe { requested(name) }?)
}

/// Resolver of an engine without any optional entry (no editor, no extra
/// printers, no instance-id shortcut).
pub unsafe extern "C" fn get_proc_address_baseline(name: *const c_char, _library: LibraryToken) -> Option<InterfaceFunction> {
    let name = unsafe { requested(name) }?;
    let optional = LoggingApi::OPTIONAL.iter().chain(VariantApi::OPTIONAL).chain(EditorPluginApi::OPTIONAL);
    if optional.copied().any(|entry| entry == name) {
        return None;
    }
    lookup(name)
}

/// Resolver missing the required `variant_call` entry.
pub unsafe extern "C" fn get_proc_address_without_variant_call(
    name: *const c_char,
    _library: LibraryToken,
) -> Option<InterfaceFunction> {
    let name = unsafe { requested(name) }?;
    if name == c"variant_call" {
        return None;
    }
    lookup(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PackedData;
    use tether_ffi::AbiTable;

    fn resolve(name: &CStr) -> Option<InterfaceFunction> {
        unsafe { get_proc_address(name.as_ptr(), crate::library_token()) }
    }

    #[test]
    fn every_required_entry_resolves() {
        let table = unsafe { AbiTable::load(get_proc_address, crate::library_token()) };
        assert!(table.is_ok());
        assert!(resolve(c"no_such_entry").is_none());
        assert!(unsafe { get_proc_address(ptr::null(), crate::library_token()) }.is_none());
    }

    #[test]
    fn baseline_drops_optional_entries_only() {
        let token = crate::library_token();
        assert!(unsafe { get_proc_address_baseline(c"print_info".as_ptr(), token) }.is_none());
        assert!(unsafe { get_proc_address_baseline(c"editor_add_plugin".as_ptr(), token) }.is_none());
        assert!(unsafe { get_proc_address_baseline(c"variant_call".as_ptr(), token) }.is_some());
    }

    #[test]
    fn allocator_keeps_contents_across_growth() {
        unsafe {
            let block = mem_alloc(4) as *mut u8;
            block.copy_from_nonoverlapping([1u8, 2, 3, 4].as_ptr(), 4);
            let grown = mem_realloc(block as *mut c_void, 64) as *mut u8;
            assert_eq!(std::slice::from_raw_parts(grown, 4), [1, 2, 3, 4]);
            mem_free(grown as *mut c_void);
            mem_free(ptr::null_mut());
        }
    }

    #[test]
    fn scalar_evaluators_follow_the_operand_types() {
        unsafe {
            let add = variant_get_ptr_operator_evaluator(VariantOperator::Add, VariantType::Int, VariantType::Float)
                .expect("int + float is defined");
            let (a, b, mut out) = (2i64, 0.5f64, 0f64);
            add(&a as *const i64 as ConstTypePtr, &b as *const f64 as ConstTypePtr, &mut out as *mut f64 as TypePtr);
            assert_eq!(out, 2.5);
            assert!(
                variant_get_ptr_operator_evaluator(VariantOperator::ShiftLeft, VariantType::Float, VariantType::Int)
                    .is_none()
            );
        }
    }

    #[test]
    fn packed_elements_are_addressable_in_place() {
        let mut handle = Handle::new(Value::Packed(
            VariantType::PackedInt32Array,
            PackedData::empty(VariantType::PackedInt32Array),
        ));
        if let Some(Value::Packed(ty, data)) = unsafe { handle_mut(&mut handle.0) } {
            data.push(*ty, &Value::Int(7));
        }
        let base = &mut handle.0 as *mut PackedHandle as TypePtr;
        let slot = unsafe { packed_index::<30>(base, 0) } as *mut i32;
        assert_eq!(unsafe { *slot }, 7);
        unsafe { *slot = 9 };
        assert!(unsafe { packed_index::<30>(base, 1) }.is_null());
        assert!(unsafe { packed_index::<29>(base, 0) }.is_null());
        let Value::Packed(ty, data) = handle.value() else { panic!("packed handle") };
        assert!(matches!(data.get(*ty, 0), Some(Value::Int(9))));
    }
}
