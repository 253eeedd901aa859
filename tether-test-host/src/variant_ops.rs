//! Variant semantics: operators, construction and conversion, text, member
//! and container access, iteration, and the builtin methods of the value
//! types.

use tether_ffi::{CallError, CallErrorKind, InstanceId, VariantOperator, VariantType};

use crate::calls;
use crate::value::{
    component_value, components, entries, find_key, from_components, lock, member_index, packed_item_type,
    pod_layout, pod_size, snapshot, Component, PackedData, Target, Value, Var,
};

/// Hash shared by every `size`/`length` method and `get_object_id`.
pub(crate) const SIZE_HASH: i64 = 3173160232;

pub(crate) fn default_value(ty: VariantType) -> Value {
    match ty {
        VariantType::Nil => Value::Nil,
        VariantType::Bool => Value::Bool(false),
        VariantType::Int => Value::Int(0),
        VariantType::Float => Value::Float(0.0),
        VariantType::String => Value::String(String::new()),
        VariantType::StringName => Value::StringName(String::new()),
        VariantType::NodePath => Value::NodePath(String::new()),
        VariantType::Object => Value::Object(InstanceId::NONE),
        VariantType::Callable => Value::Callable(Target { object: InstanceId::NONE, name: String::new() }),
        VariantType::Signal => Value::Signal(Target { object: InstanceId::NONE, name: String::new() }),
        VariantType::Dictionary => Value::new_dictionary(),
        VariantType::Array => Value::new_array(Vec::new()),
        t if t.is_packed_array() => Value::Packed(t, PackedData::empty(t)),
        t => Value::Pod(t, vec![0; pod_size(t)]),
    }
}

pub(crate) fn type_name(ty: VariantType) -> String {
    match ty {
        VariantType::Nil => "Nil".to_string(),
        VariantType::Bool => "bool".to_string(),
        VariantType::Int => "int".to_string(),
        VariantType::Float => "float".to_string(),
        VariantType::Aabb => "AABB".to_string(),
        VariantType::Rid => "RID".to_string(),
        other => format!("{other:?}"),
    }
}

pub(crate) fn booleanize(value: &Value) -> bool {
    match value {
        Value::Nil => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::String(s) | Value::StringName(s) | Value::NodePath(s) => !s.is_empty(),
        Value::Pod(_, bytes) => bytes.iter().any(|b| *b != 0),
        Value::Object(id) => calls::is_live(*id),
        Value::Callable(t) | Value::Signal(t) => t.object.is_valid() && !t.name.is_empty(),
        Value::Array(items) => !lock(items).is_empty(),
        Value::Dictionary(dict) => !lock(dict).is_empty(),
        Value::Packed(_, data) => data.len() > 0,
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Evaluate `a op b`; `None` when the operator is undefined for the operand
/// types (or divides an integer by zero).
pub(crate) fn evaluate(op: VariantOperator, a: &Value, b: &Value) -> Option<Value> {
    use VariantOperator as Op;
    match op {
        Op::Equal => Some(Value::Bool(crate::value::equals(a, b, false))),
        Op::NotEqual => Some(Value::Bool(!crate::value::equals(a, b, false))),
        Op::Less | Op::LessEqual | Op::Greater | Op::GreaterEqual => {
            let ord = compare(a, b)?;
            Some(Value::Bool(match op {
                Op::Less => ord.is_lt(),
                Op::LessEqual => ord.is_le(),
                Op::Greater => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        Op::Add | Op::Subtract | Op::Multiply | Op::Divide | Op::Module | Op::Power => arithmetic(op, a, b),
        Op::Negate => match a {
            Value::Int(i) => Some(Value::Int(i.wrapping_neg())),
            Value::Float(f) => Some(Value::Float(-f)),
            Value::Pod(ty, bytes) if is_float_pod(*ty) => {
                let negated: Vec<f64> = components(*ty, bytes).iter().map(|c| -c).collect();
                Some(Value::Pod(*ty, from_components(*ty, &negated)))
            }
            _ => None,
        },
        Op::Positive => matches!(a, Value::Int(_) | Value::Float(_) | Value::Pod(..)).then(|| a.clone()),
        Op::ShiftLeft | Op::ShiftRight | Op::BitAnd | Op::BitOr | Op::BitXor => {
            let (Value::Int(x), Value::Int(y)) = (a, b) else { return None };
            Some(Value::Int(match op {
                Op::ShiftLeft => x.checked_shl(u32::try_from(*y).ok()?)?,
                Op::ShiftRight => x.checked_shr(u32::try_from(*y).ok()?)?,
                Op::BitAnd => x & y,
                Op::BitOr => x | y,
                _ => x ^ y,
            }))
        }
        Op::BitNegate => match a {
            Value::Int(i) => Some(Value::Int(!i)),
            _ => None,
        },
        Op::And => Some(Value::Bool(booleanize(a) && booleanize(b))),
        Op::Or => Some(Value::Bool(booleanize(a) || booleanize(b))),
        Op::Xor => Some(Value::Bool(booleanize(a) != booleanize(b))),
        Op::Not => Some(Value::Bool(!booleanize(a))),
        Op::In => contains(b, a).map(Value::Bool),
    }
}

fn is_float_pod(ty: VariantType) -> bool {
    matches!(pod_layout(ty), Some((Component::F32, _)))
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => match (a.number(), b.number()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => match (a.text(), b.text()) {
                (Some(x), Some(y)) if a.ty() != VariantType::NodePath => Some(x.cmp(y)),
                _ => None,
            },
        },
    }
}

fn arithmetic(op: VariantOperator, a: &Value, b: &Value) -> Option<Value> {
    use VariantOperator as Op;
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(Value::Int(match op {
            Op::Add => x.wrapping_add(*y),
            Op::Subtract => x.wrapping_sub(*y),
            Op::Multiply => x.wrapping_mul(*y),
            Op::Divide => x.checked_div(*y)?,
            Op::Module => x.checked_rem(*y)?,
            _ => x.checked_pow(u32::try_from(*y).ok()?)?,
        })),
        (Value::String(x), Value::String(y)) if op == Op::Add => Some(Value::String(format!("{x}{y}"))),
        (Value::Array(x), Value::Array(y)) if op == Op::Add => {
            let mut joined: Vec<Var> = lock(x).iter().cloned().collect();
            joined.extend(snapshot(y).into_iter().map(Var::new));
            Some(Value::new_array(joined))
        }
        (Value::Pod(tx, x), Value::Pod(ty, y)) if tx == ty && is_float_pod(*tx) => {
            let (x, y) = (components(*tx, x), components(*ty, y));
            let combined: Vec<f64> = x
                .iter()
                .zip(&y)
                .map(|(l, r)| match op {
                    Op::Add => Some(l + r),
                    Op::Subtract => Some(l - r),
                    Op::Multiply => Some(l * r),
                    Op::Divide => Some(l / r),
                    _ => None,
                })
                .collect::<Option<_>>()?;
            Some(Value::Pod(*tx, from_components(*tx, &combined)))
        }
        (Value::Pod(ty, bytes), scalar) if is_float_pod(*ty) && matches!(op, Op::Multiply | Op::Divide) => {
            let s = scalar.number()?;
            let scaled: Vec<f64> = components(*ty, bytes)
                .iter()
                .map(|c| if op == Op::Multiply { c * s } else { c / s })
                .collect();
            Some(Value::Pod(*ty, from_components(*ty, &scaled)))
        }
        _ => {
            let (x, y) = (a.number()?, b.number()?);
            Some(Value::Float(match op {
                Op::Add => x + y,
                Op::Subtract => x - y,
                Op::Multiply => x * y,
                Op::Divide => x / y,
                Op::Module => x % y,
                _ => x.powf(y),
            }))
        }
    }
}

/// `needle in haystack`.
fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match haystack {
        Value::Array(items) => Some(snapshot(items).iter().any(|item| crate::value::equals(item, needle, false))),
        Value::Dictionary(dict) => Some(find_key(&lock(dict), needle).is_some()),
        Value::Packed(ty, data) => {
            Some(data.values(*ty).iter().any(|item| crate::value::equals(item, needle, false)))
        }
        Value::String(s) | Value::StringName(s) => needle.text().map(|n| s.contains(n)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Construction and conversion
// ---------------------------------------------------------------------------

fn invalid_method() -> CallError {
    CallError { error: CallErrorKind::InvalidMethod, argument: 0, expected: 0 }
}

/// Construct a `ty` from `args` the way the engine's dynamic constructors
/// do: no arguments gives the default, one argument of the same type
/// copies, and a few conversions are recognised.
pub(crate) fn construct(ty: VariantType, args: &[Value]) -> Result<Value, CallError> {
    match args {
        [] => return Ok(default_value(ty)),
        [single] if single.ty() == ty => return Ok(single.clone()),
        _ => {}
    }
    let converted = match (ty, args) {
        (_, [single]) => convert(single, ty, false),
        (VariantType::Callable, [Value::Object(object), name]) => {
            name.text().map(|n| Value::Callable(Target { object: *object, name: n.to_string() }))
        }
        (VariantType::Signal, [Value::Object(object), name]) => {
            name.text().map(|n| Value::Signal(Target { object: *object, name: n.to_string() }))
        }
        (t, parts) if pod_layout(t).is_some_and(|(_, count)| count == parts.len()) => {
            let numbers: Option<Vec<f64>> = parts.iter().map(Value::number).collect();
            numbers.map(|n| Value::Pod(t, from_components(t, &n)))
        }
        _ => None,
    };
    converted.ok_or_else(invalid_method)
}

/// Convert one value to `ty`, if the engine defines that conversion.
pub(crate) fn convert(value: &Value, ty: VariantType, strict: bool) -> Option<Value> {
    if value.ty() == ty {
        return Some(value.clone());
    }
    if !can_convert(value.ty(), ty, strict) {
        return None;
    }
    Some(match (value, ty) {
        (v, VariantType::Bool) => Value::Bool(booleanize(v)),
        (Value::Bool(b), VariantType::Int) => Value::Int(*b as i64),
        (Value::Float(f), VariantType::Int) => Value::Int(*f as i64),
        (Value::String(s), VariantType::Int) => Value::Int(s.trim().parse().ok()?),
        (Value::Bool(b), VariantType::Float) => Value::Float(*b as i64 as f64),
        (Value::Int(i), VariantType::Float) => Value::Float(*i as f64),
        (Value::String(s), VariantType::Float) => Value::Float(s.trim().parse().ok()?),
        (v, VariantType::String) => Value::String(stringify(v)),
        (v, VariantType::StringName) => Value::StringName(v.text()?.to_string()),
        (v, VariantType::NodePath) => Value::NodePath(v.text()?.to_string()),
        (Value::Packed(ty, data), VariantType::Array) => {
            Value::new_array(data.values(*ty).into_iter().map(Var::new).collect())
        }
        (Value::Array(items), t) if t.is_packed_array() => {
            let mut data = PackedData::empty(t);
            for item in snapshot(items) {
                if !data.push(t, &item) {
                    return None;
                }
            }
            Value::Packed(t, data)
        }
        (Value::Nil, t) => default_value(t),
        _ => return None,
    })
}

pub(crate) fn can_convert(from: VariantType, to: VariantType, strict: bool) -> bool {
    use VariantType as T;
    if from == to {
        return true;
    }
    let numeric = |t: T| matches!(t, T::Bool | T::Int | T::Float);
    let textual = |t: T| matches!(t, T::String | T::StringName | T::NodePath);
    match (from, to) {
        (f, t) if numeric(f) && numeric(t) => true,
        (f, t) if textual(f) && textual(t) => true,
        (T::Array, t) | (t, T::Array) if t.is_packed_array() => true,
        (T::String, T::Int | T::Float) => !strict,
        (_, T::String) | (_, T::Bool) | (T::Nil, _) => !strict,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::Nil => "<null>".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float_text(*f),
        Value::String(s) | Value::StringName(s) | Value::NodePath(s) => s.clone(),
        Value::Pod(VariantType::Rid, bytes) => format!("RID({})", components(VariantType::Rid, bytes)[0] as u64),
        Value::Pod(ty, bytes) => {
            let parts: Vec<String> = components(*ty, bytes)
                .into_iter()
                .map(|c| if is_float_pod(*ty) { float_text(c) } else { (c as i64).to_string() })
                .collect();
            format!("({})", parts.join(", "))
        }
        Value::Object(id) => calls::object_text(*id),
        Value::Callable(t) | Value::Signal(t) => format!("{}::{}", calls::object_text(t.object), t.name),
        Value::Array(items) => list_text(&snapshot(items)),
        Value::Packed(ty, data) => list_text(&data.values(*ty)),
        Value::Dictionary(dict) => {
            let entries = entries(dict);
            if entries.is_empty() {
                return "{}".to_string();
            }
            let parts: Vec<String> =
                entries.iter().map(|(key, value)| format!("{}: {}", nested_text(key), nested_text(value))).collect();
            format!("{{ {} }}", parts.join(", "))
        }
    }
}

fn list_text(items: &[Value]) -> String {
    let parts: Vec<String> = items.iter().map(nested_text).collect();
    format!("[{}]", parts.join(", "))
}

fn nested_text(value: &Value) -> String {
    match value {
        Value::String(s) | Value::StringName(s) => format!("\"{s}\""),
        other => stringify(other),
    }
}

fn float_text(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

// ---------------------------------------------------------------------------
// Access
// ---------------------------------------------------------------------------

pub(crate) enum Indexed {
    Found(Value),
    OutOfBounds,
    Invalid,
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

pub(crate) fn get_indexed(value: &Value, index: i64) -> Indexed {
    let found = |v: Option<Value>| v.map_or(Indexed::OutOfBounds, Indexed::Found);
    match value {
        Value::Array(items) => {
            let items = lock(items);
            found(resolve_index(index, items.len()).map(|i| items[i].value().clone()))
        }
        Value::Packed(ty, data) => found(resolve_index(index, data.len()).and_then(|i| data.get(*ty, i))),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            found(resolve_index(index, chars.len()).map(|i| Value::String(chars[i].to_string())))
        }
        Value::Pod(ty, bytes) if member_index(*ty, "x").is_some() || member_index(*ty, "r").is_some() => {
            let parts = components(*ty, bytes);
            found(resolve_index(index, parts.len()).map(|i| component_value(*ty, parts[i])))
        }
        Value::Dictionary(dict) => {
            let dict = lock(dict);
            find_key(&dict, &Value::Int(index)).map_or(Indexed::Invalid, |i| Indexed::Found(dict[i].1.value().clone()))
        }
        _ => Indexed::Invalid,
    }
}

pub(crate) fn set_indexed(target: &mut Value, index: i64, value: &Value) -> Indexed {
    match target {
        Value::Array(items) => {
            let mut items = lock(items);
            match resolve_index(index, items.len()) {
                Some(i) => {
                    items[i].set(value.clone());
                    Indexed::Found(Value::Nil)
                }
                None => Indexed::OutOfBounds,
            }
        }
        Value::Packed(ty, data) => match resolve_index(index, data.len()) {
            Some(i) if data.set(*ty, i, value) => Indexed::Found(Value::Nil),
            Some(_) => Indexed::Invalid,
            None => Indexed::OutOfBounds,
        },
        Value::Pod(ty, bytes) => {
            let mut parts = components(*ty, bytes);
            match (resolve_index(index, parts.len()), value.number()) {
                (Some(i), Some(n)) => {
                    parts[i] = n;
                    *bytes = from_components(*ty, &parts);
                    Indexed::Found(Value::Nil)
                }
                (None, _) => Indexed::OutOfBounds,
                _ => Indexed::Invalid,
            }
        }
        Value::Dictionary(_) => {
            if set_keyed(target, &Value::Int(index), value) { Indexed::Found(Value::Nil) } else { Indexed::Invalid }
        }
        _ => Indexed::Invalid,
    }
}

pub(crate) fn get_keyed(value: &Value, key: &Value) -> Option<Value> {
    match value {
        Value::Dictionary(dict) => {
            let dict = lock(dict);
            find_key(&dict, key).map(|i| dict[i].1.value().clone())
        }
        Value::Object(id) => calls::get_property(*id, key.text()?),
        _ => None,
    }
}

pub(crate) fn set_keyed(target: &mut Value, key: &Value, value: &Value) -> bool {
    match target {
        Value::Dictionary(dict) => {
            let mut dict = lock(dict);
            match find_key(&dict, key) {
                Some(i) => dict[i].1.set(value.clone()),
                None => dict.push((Var::new(key.clone()), Box::new(Var::new(value.clone())))),
            }
            true
        }
        Value::Object(id) => key.text().is_some_and(|name| calls::set_property(*id, name, value)),
        _ => false,
    }
}

pub(crate) fn get_named(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Pod(ty, bytes) => {
            let index = member_index(*ty, name)?;
            Some(component_value(*ty, *components(*ty, bytes).get(index)?))
        }
        Value::Object(id) => calls::get_property(*id, name),
        Value::Dictionary(_) => get_keyed(value, &Value::String(name.to_string())),
        _ => None,
    }
}

pub(crate) fn set_named(target: &mut Value, name: &str, value: &Value) -> bool {
    match target {
        Value::Pod(ty, bytes) => {
            let (Some(index), Some(n)) = (member_index(*ty, name), value.number()) else { return false };
            let mut parts = components(*ty, bytes);
            parts[index] = n;
            *bytes = from_components(*ty, &parts);
            true
        }
        Value::Object(id) => calls::set_property(*id, name, value),
        Value::Dictionary(_) => set_keyed(target, &Value::String(name.to_string()), value),
        _ => false,
    }
}

/// Generic `value[key]`: integer keys index, string keys name members.
pub(crate) fn get(value: &Value, key: &Value) -> Option<Value> {
    match (value, key) {
        (Value::Dictionary(_), _) => get_keyed(value, key),
        (_, Value::Int(index)) => match get_indexed(value, *index) {
            Indexed::Found(found) => Some(found),
            _ => None,
        },
        (_, key) => get_named(value, key.text()?),
    }
}

pub(crate) fn set(target: &mut Value, key: &Value, value: &Value) -> bool {
    match key {
        _ if matches!(target, Value::Dictionary(_)) => set_keyed(target, key, value),
        Value::Int(index) => matches!(set_indexed(target, *index, value), Indexed::Found(_)),
        key => key.text().is_some_and(|name| set_named(target, name, value)),
    }
}

pub(crate) fn has_key(value: &Value, key: &Value) -> Option<bool> {
    match value {
        Value::Dictionary(dict) => Some(find_key(&lock(dict), key).is_some()),
        Value::Object(id) => Some(key.text().is_some_and(|name| calls::has_property(*id, name))),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Iteration
// ---------------------------------------------------------------------------

fn iter_len(value: &Value) -> Option<i64> {
    Some(match value {
        Value::Array(items) => lock(items).len() as i64,
        Value::Dictionary(dict) => lock(dict).len() as i64,
        Value::Packed(_, data) => data.len() as i64,
        Value::String(s) => s.chars().count() as i64,
        Value::Int(n) => *n,
        _ => return None,
    })
}

/// Start iterating; `None` if the value cannot be iterated, otherwise the
/// initial iterator state and whether there is a first element.
pub(crate) fn iter_init(value: &Value) -> Option<(Value, bool)> {
    iter_len(value).map(|len| (Value::Int(0), len > 0))
}

pub(crate) fn iter_next(value: &Value, iter: &mut Value) -> Option<bool> {
    let len = iter_len(value)?;
    let Value::Int(position) = iter else { return None };
    *position += 1;
    Some(*position < len)
}

pub(crate) fn iter_get(value: &Value, iter: &Value) -> Option<Value> {
    let Value::Int(position) = iter else { return None };
    let position = usize::try_from(*position).ok()?;
    match value {
        Value::Dictionary(dict) => lock(dict).get(position).map(|(key, _)| key.value().clone()),
        Value::Int(n) => (position < *n as usize).then(|| Value::Int(position as i64)),
        other => match get_indexed(other, position as i64) {
            Indexed::Found(found) => Some(found),
            _ => None,
        },
    }
}

// ---------------------------------------------------------------------------
// Builtin methods
// ---------------------------------------------------------------------------

/// Names of the builtin methods with pointer-call entries, in the order
/// their function pointers are instantiated.
pub(crate) const PTR_METHODS: [&str; 14] = [
    "length",
    "size",
    "to_upper",
    "begins_with",
    "append",
    "has",
    "clear",
    "erase",
    "keys",
    "push_back",
    "resize",
    "get_object_id",
    "get_method",
    "get_name",
];

/// Pointer-call hash of `ty.method`.
pub(crate) fn ptr_method_hash(ty: VariantType, method: &str) -> Option<i64> {
    use VariantType as T;
    let hash = match (ty, method) {
        (T::String, "length") => SIZE_HASH,
        (T::String, "to_upper") => 3942272618,
        (T::String, "begins_with") => 2566493496,
        (T::Array | T::Dictionary, "size") => SIZE_HASH,
        (T::Array, "append") => 3316032543,
        (T::Array | T::Dictionary, "has") => 3680194679,
        (T::Array, "clear") => 3218959716,
        (T::Dictionary, "erase") => 1776646889,
        (T::Dictionary, "keys") => 4144163970,
        (t, "size") if t.is_packed_array() => SIZE_HASH,
        (t, "resize") if t.is_packed_array() => 848867239,
        (t, "push_back") if t.is_packed_array() => match t {
            T::PackedByteArray | T::PackedInt32Array | T::PackedInt64Array => 694024632,
            T::PackedFloat32Array | T::PackedFloat64Array => 4094791666,
            T::PackedVector2Array => 4188891560,
            T::PackedVector3Array => 3295363524,
            T::PackedColorArray => 1007858200,
            T::PackedStringArray => 816187996,
            _ => return None,
        },
        (T::Callable | T::Signal, "get_object_id") => SIZE_HASH,
        (T::Callable, "get_method") | (T::Signal, "get_name") => 1825232092,
        _ => return None,
    };
    Some(hash)
}

/// Parameter types of a builtin method; `Nil` accepts any value.
pub(crate) fn builtin_params(ty: VariantType, method: &str) -> Option<&'static [VariantType]> {
    use VariantType as T;
    const ANY: &[T] = &[T::Nil];
    Some(match (ty, method) {
        (T::String, "length" | "to_upper") => &[],
        (T::String, "begins_with") => &[T::String],
        (T::Array, "size" | "clear") | (T::Dictionary, "size" | "keys") => &[],
        (T::Array, "append" | "has") | (T::Dictionary, "has" | "erase") => ANY,
        (t, "size") if t.is_packed_array() => &[],
        (t, "resize") if t.is_packed_array() => &[T::Int],
        (t, "push_back") if t.is_packed_array() => match packed_item_type(t) {
            T::Int => &[T::Int],
            T::Float => &[T::Float],
            T::Vector2 => &[T::Vector2],
            T::Vector3 => &[T::Vector3],
            T::Color => &[T::Color],
            T::Vector4 => &[T::Vector4],
            _ => &[T::String],
        },
        (T::Callable | T::Signal, "get_object_id") | (T::Callable, "get_method") | (T::Signal, "get_name") => &[],
        _ => return None,
    })
}

/// Coerce an argument to a parameter type, as the engine's varcall does.
pub(crate) fn coerce(value: &Value, ty: VariantType) -> Option<Value> {
    use VariantType as T;
    match (ty, value) {
        (T::Nil, v) => Some(v.clone()),
        (T::String, v) => v.text().map(|s| Value::String(s.to_string())),
        (T::StringName, v) => v.text().map(|s| Value::StringName(s.to_string())),
        (T::Int | T::Float | T::Bool, v) if matches!(v, Value::Int(_) | Value::Float(_) | Value::Bool(_)) => {
            convert(v, ty, false)
        }
        (t, v) if v.ty() == t => Some(v.clone()),
        _ => None,
    }
}

/// Check arity and argument types against `params`.
pub(crate) fn check_args(params: &[VariantType], args: &[Value]) -> Result<Vec<Value>, CallError> {
    if args.len() != params.len() {
        return Err(CallError::arity(args.len(), params.len()));
    }
    params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(i, (ty, arg))| coerce(arg, *ty).ok_or(CallError::invalid_argument(i as i32, *ty as i32)))
        .collect()
}

/// Run a builtin method on a value with already-checked arguments.
pub(crate) fn run_builtin(this: &mut Value, method: &str, args: &[Value]) -> Option<Value> {
    let arg = args.first();
    Some(match (this, method) {
        (Value::String(s), "length") => Value::Int(s.chars().count() as i64),
        (Value::String(s), "to_upper") => Value::String(s.to_uppercase()),
        (Value::String(s), "begins_with") => Value::Bool(s.starts_with(arg?.text()?)),
        (Value::Array(items), "size") => Value::Int(lock(items).len() as i64),
        (Value::Array(items), "append") => {
            lock(items).push(Var::new(arg?.clone()));
            Value::Nil
        }
        (Value::Array(items), "has") => {
            Value::Bool(snapshot(items).iter().any(|item| crate::value::equals(item, arg.unwrap_or(&Value::Nil), false)))
        }
        (Value::Array(items), "clear") => {
            lock(items).clear();
            Value::Nil
        }
        (Value::Dictionary(dict), "size") => Value::Int(lock(dict).len() as i64),
        (Value::Dictionary(dict), "has") => Value::Bool(find_key(&lock(dict), arg?).is_some()),
        (Value::Dictionary(dict), "erase") => {
            let mut dict = lock(dict);
            match find_key(&dict, arg?) {
                Some(i) => {
                    dict.remove(i);
                    Value::Bool(true)
                }
                None => Value::Bool(false),
            }
        }
        (Value::Dictionary(dict), "keys") => {
            let keys: Vec<Var> = lock(dict).iter().map(|(key, _)| key.clone()).collect();
            Value::new_array(keys)
        }
        (Value::Packed(_, data), "size") => Value::Int(data.len() as i64),
        (Value::Packed(ty, data), "push_back") => Value::Bool(data.push(*ty, arg?)),
        (Value::Packed(_, data), "resize") => match arg? {
            Value::Int(len) if *len >= 0 => {
                data.resize(*len as usize);
                Value::Int(0)
            }
            _ => Value::Int(31),
        },
        (Value::Callable(t) | Value::Signal(t), "get_object_id") => Value::Int(t.object.0 as i64),
        (Value::Callable(t), "get_method") | (Value::Signal(t), "get_name") => Value::StringName(t.name.clone()),
        _ => return None,
    })
}

/// Dynamic call of a builtin method on a value type.
pub(crate) fn call_builtin(this: &mut Value, method: &str, args: &[Value]) -> Result<Value, CallError> {
    let params = builtin_params(this.ty(), method).ok_or_else(invalid_method)?;
    let args = check_args(params, args)?;
    run_builtin(this, method, &args).ok_or_else(invalid_method)
}

/// Static methods of the value types.
pub(crate) fn call_static(ty: VariantType, method: &str, args: &[Value]) -> Result<Value, CallError> {
    match (ty, method) {
        (VariantType::String, "num_int64") => {
            let args = check_args(&[VariantType::Int], args)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::String(i.to_string())),
                _ => Err(invalid_method()),
            }
        }
        _ => Err(invalid_method()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_by_zero_is_undefined() {
        assert!(evaluate(VariantOperator::Divide, &Value::Int(1), &Value::Int(0)).is_none());
        let inf = evaluate(VariantOperator::Divide, &Value::Float(1.0), &Value::Int(0));
        assert!(matches!(inf, Some(Value::Float(f)) if f.is_infinite()));
    }

    #[test]
    fn strict_conversion_refuses_text_to_number() {
        assert!(can_convert(VariantType::Int, VariantType::Float, true));
        assert!(can_convert(VariantType::String, VariantType::Int, false));
        assert!(!can_convert(VariantType::String, VariantType::Int, true));
        assert!(construct(VariantType::Int, &[Value::String("x".into())]).is_err());
    }

    #[test]
    fn containers_print_with_quoted_strings() {
        let array = Value::new_array(vec![Var::new(Value::Int(1)), Var::new(Value::String("a".into()))]);
        assert_eq!(stringify(&array), "[1, \"a\"]");
        assert_eq!(stringify(&Value::new_dictionary()), "{}");
        assert_eq!(stringify(&Value::Float(2.0)), "2.0");
    }

    #[test]
    fn builtin_calls_check_arity_then_types() {
        let mut s = Value::String("hello".into());
        let err = call_builtin(&mut s, "begins_with", &[]).unwrap_err();
        assert_eq!(err.error, CallErrorKind::TooFewArguments);
        let err = call_builtin(&mut s, "begins_with", &[Value::Int(3)]).unwrap_err();
        assert_eq!(err.error, CallErrorKind::InvalidArgument);
        assert!(matches!(call_builtin(&mut s, "begins_with", &[Value::String("he".into())]), Ok(Value::Bool(true))));
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let array = Value::new_array(vec![Var::new(Value::Int(1)), Var::new(Value::Int(2))]);
        assert!(matches!(get_indexed(&array, -1), Indexed::Found(Value::Int(2))));
        assert!(matches!(get_indexed(&array, 2), Indexed::OutOfBounds));
        assert!(matches!(get_indexed(&Value::Int(4), 0), Indexed::Invalid));
    }
}
