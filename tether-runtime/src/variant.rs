// Variant: a managed, tagged engine value with the engine's full value
// protocol (construction, calls, operators, reflective access, iteration,
// hashing, stringification).

use std::fmt;
use std::hash::{Hash, Hasher};

use tether_ffi::{
    CallError, ConstVariantPtr, InstanceId, UninitVariantPtr, VariantHandle, VariantOperator,
    VariantPtr, VariantType,
};

use crate::abi::{abi, Abi, NameArg};
use crate::builtins::GString;
use crate::convert::{FromVariant, ToVariant};
use crate::error::{check_access, check_call, HostError, HostResult, TypeError};
use crate::scope::{DetachedHandle, Managed, RawHandle, Release};

/// A managed engine variant.
///
/// Owned by the lifetime scope that was innermost when it was created;
/// freed when dropped or when that scope ends, whichever comes first.
pub struct Variant {
    managed: Managed,
}

impl Variant {
    // -----------------------------------------------------------------------
    // Construction and ownership
    // -----------------------------------------------------------------------

    pub fn nil() -> Variant {
        Self::with_uninit(abi(), |dst| unsafe { (abi().variants.variant_new_nil)(dst) })
    }

    /// Let the engine construct into fresh storage, then take ownership.
    pub(crate) fn with_uninit(abi: &'static Abi, construct: impl FnOnce(UninitVariantPtr)) -> Variant {
        let mut handle = VariantHandle::ZEROED;
        construct(&mut handle);
        // SAFETY: the engine just constructed into `handle`.
        unsafe { Self::from_owned(abi, handle) }
    }

    /// Adopt a variant whose ownership the engine transferred to us.
    ///
    /// # Safety
    /// `handle` must be a constructed variant nobody else will destroy.
    pub unsafe fn from_owned(abi: &'static Abi, handle: VariantHandle) -> Variant {
        Variant {
            managed: Managed::new_in_current(abi, RawHandle::Variant(handle), Release::Variant),
        }
    }

    /// Copy a variant the engine still owns.
    ///
    /// # Safety
    /// `src` must point at a constructed variant.
    pub unsafe fn from_borrowed(src: ConstVariantPtr) -> Variant {
        let abi = abi();
        Self::with_uninit(abi, |dst| unsafe { (abi.variants.variant_new_copy)(dst, src) })
    }

    pub fn from_value<T: ToVariant + ?Sized>(value: &T) -> HostResult<Variant> {
        value.to_variant()
    }

    pub fn to<T: FromVariant>(&self) -> HostResult<T> {
        T::from_variant(self)
    }

    pub fn managed(&self) -> &Managed {
        &self.managed
    }

    pub fn as_ptr(&self) -> HostResult<ConstVariantPtr> {
        Ok(self.managed.storage_ptr()? as ConstVariantPtr)
    }

    pub fn as_mut_ptr(&self) -> HostResult<VariantPtr> {
        Ok(self.managed.storage_ptr()? as VariantPtr)
    }

    pub fn try_clone(&self) -> HostResult<Variant> {
        let src = self.as_ptr()?;
        Ok(unsafe { Self::from_borrowed(src) })
    }

    /// Free now. Equivalent to dropping, but reports lifetime errors.
    pub fn free(self) -> HostResult<()> {
        self.managed.end()
    }

    pub fn end(&self) -> HostResult<()> {
        self.managed.end()
    }

    /// Give the engine ownership of the underlying storage.
    pub fn transfer_to_engine(&self) -> HostResult<VariantHandle> {
        let raw = self.managed.transfer_to_engine()?;
        raw.as_variant().ok_or(HostError::Type(TypeError::Invalid))
    }

    pub fn persist(&self) -> HostResult<()> {
        self.managed.persist()
    }

    pub fn detach(self) -> HostResult<DetachedHandle> {
        self.managed.detach()
    }

    pub fn attach(detached: DetachedHandle) -> HostResult<Variant> {
        match detached.raw() {
            RawHandle::Variant(_) => Ok(Variant { managed: detached.attach() }),
            _ => Err(HostError::Type(TypeError::Invalid)),
        }
    }

    /// Construct a value of `ty` from arguments, through the engine's
    /// constructor overloads. An empty argument list builds the default.
    pub fn construct(ty: VariantType, args: &[Variant]) -> HostResult<Variant> {
        let abi = abi();
        let ptrs = arg_ptrs(args)?;
        let mut error = CallError::OK;
        let result = Self::with_uninit(abi, |dst| unsafe {
            (abi.variants.variant_construct)(ty, dst, ptrs.as_ptr(), ptrs.len() as i32, &mut error)
        });
        if error.is_ok() {
            Ok(result)
        } else {
            // The engine leaves nil in the slot; the wrapper frees it.
            Err(HostError::Construction(ty))
        }
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    pub fn get_type(&self) -> HostResult<VariantType> {
        let ptr = self.as_ptr()?;
        Ok(unsafe { (self.abi().variants.variant_get_type)(ptr) })
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.get_type(), Ok(VariantType::Nil))
    }

    /// Engine-side name of a type, e.g. `"int"` or `"Vector2"`.
    pub fn type_name(ty: VariantType) -> String {
        let abi = abi();
        let name = GString::with_uninit(abi, |dst| unsafe {
            (abi.variants.variant_get_type_name)(ty, dst)
        });
        name.text().unwrap_or_default()
    }

    pub fn can_convert(from: VariantType, to: VariantType) -> bool {
        unsafe { (abi().variants.variant_can_convert)(from, to) }
    }

    pub fn can_convert_strict(from: VariantType, to: VariantType) -> bool {
        unsafe { (abi().variants.variant_can_convert_strict)(from, to) }
    }

    pub fn has_method(&self, method: &str) -> HostResult<bool> {
        let ptr = self.as_ptr()?;
        let name = NameArg::new(self.abi(), method);
        Ok(unsafe { (self.abi().variants.variant_has_method)(ptr, name.as_ptr()) })
    }

    /// Whether values of `ty` have a named member (e.g. `x` on vectors).
    pub fn has_member(ty: VariantType, member: &str) -> bool {
        let abi = abi();
        let name = NameArg::new(abi, member);
        unsafe { (abi.variants.variant_has_member)(ty, name.as_ptr()) }
    }

    pub fn has_key(&self, key: &Variant) -> HostResult<bool> {
        let ptr = self.as_ptr()?;
        let key = key.as_ptr()?;
        let mut valid = false;
        let found = unsafe { (self.abi().variants.variant_has_key)(ptr, key, &mut valid) };
        check_access(valid, false)?;
        Ok(found)
    }

    /// Instance id of an object variant without materializing the object.
    /// Needs an engine that provides the optional entry.
    pub fn object_instance_id(&self) -> HostResult<InstanceId> {
        let ptr = self.as_ptr()?;
        let entry = Abi::optional(
            self.abi().variants.variant_get_object_instance_id,
            c"variant_get_object_instance_id",
        )?;
        Ok(unsafe { entry(ptr) })
    }

    // -----------------------------------------------------------------------
    // Calls and operators
    // -----------------------------------------------------------------------

    /// Dynamic call of a method on this value.
    pub fn call(&self, method: &str, args: &[Variant]) -> HostResult<Variant> {
        let this = self.as_mut_ptr()?;
        let abi = self.abi();
        let ptrs = arg_ptrs(args)?;
        let name = NameArg::new(abi, method);
        let mut error = CallError::OK;
        let ret = Self::with_uninit(abi, |dst| unsafe {
            (abi.variants.variant_call)(this, name.as_ptr(), ptrs.as_ptr(), ptrs.len() as i64, dst, &mut error)
        });
        check_call(error)?;
        Ok(ret)
    }

    /// Dynamic call of a static method of a builtin type.
    pub fn call_static(ty: VariantType, method: &str, args: &[Variant]) -> HostResult<Variant> {
        let abi = abi();
        let ptrs = arg_ptrs(args)?;
        let name = NameArg::new(abi, method);
        let mut error = CallError::OK;
        let ret = Self::with_uninit(abi, |dst| unsafe {
            (abi.variants.variant_call_static)(ty, name.as_ptr(), ptrs.as_ptr(), ptrs.len() as i64, dst, &mut error)
        });
        check_call(error)?;
        Ok(ret)
    }

    /// Apply `op`. `Ok(None)` when the operator is undefined for the operand
    /// types. Unary operators ignore `right`.
    pub fn evaluate(op: VariantOperator, left: &Variant, right: &Variant) -> HostResult<Option<Variant>> {
        let a = left.as_ptr()?;
        let b = right.as_ptr()?;
        let abi = left.abi();
        let mut valid = false;
        let ret = Self::with_uninit(abi, |dst| unsafe {
            (abi.variants.variant_evaluate)(op, a, b, dst, &mut valid)
        });
        Ok(valid.then_some(ret))
    }

    pub fn evaluate_unary(op: VariantOperator, operand: &Variant) -> HostResult<Option<Variant>> {
        Self::evaluate(op, operand, &Variant::nil())
    }

    // -----------------------------------------------------------------------
    // Reflective access
    // -----------------------------------------------------------------------

    /// Generic `self[key]`.
    pub fn get(&self, key: &Variant) -> HostResult<Variant> {
        self.read_with(|abi, this, dst, valid| unsafe {
            (abi.variants.variant_get)(this, key.as_ptr()?, dst, valid);
            Ok(())
        })
    }

    pub fn set(&mut self, key: &Variant, value: &Variant) -> HostResult<()> {
        let this = self.as_mut_ptr()?;
        let (key, value) = (key.as_ptr()?, value.as_ptr()?);
        let mut valid = false;
        unsafe { (self.abi().variants.variant_set)(this, key, value, &mut valid) };
        check_access(valid, false)
    }

    pub fn get_keyed(&self, key: &Variant) -> HostResult<Variant> {
        self.read_with(|abi, this, dst, valid| unsafe {
            (abi.variants.variant_get_keyed)(this, key.as_ptr()?, dst, valid);
            Ok(())
        })
    }

    pub fn set_keyed(&mut self, key: &Variant, value: &Variant) -> HostResult<()> {
        let this = self.as_mut_ptr()?;
        let (key, value) = (key.as_ptr()?, value.as_ptr()?);
        let mut valid = false;
        unsafe { (self.abi().variants.variant_set_keyed)(this, key, value, &mut valid) };
        check_access(valid, false)
    }

    pub fn get_named(&self, name: &str) -> HostResult<Variant> {
        let name = NameArg::new(self.abi(), name);
        self.read_with(|abi, this, dst, valid| unsafe {
            (abi.variants.variant_get_named)(this, name.as_ptr(), dst, valid);
            Ok(())
        })
    }

    pub fn set_named(&mut self, name: &str, value: &Variant) -> HostResult<()> {
        let this = self.as_mut_ptr()?;
        let value = value.as_ptr()?;
        let name = NameArg::new(self.abi(), name);
        let mut valid = false;
        unsafe { (self.abi().variants.variant_set_named)(this, name.as_ptr(), value, &mut valid) };
        check_access(valid, false)
    }

    /// `self[index]`; distinguishes out-of-range from unsupported.
    pub fn get_indexed(&self, index: i64) -> HostResult<Variant> {
        let this = self.as_ptr()?;
        let abi = self.abi();
        let (mut valid, mut oob) = (false, false);
        let ret = Self::with_uninit(abi, |dst| unsafe {
            (abi.variants.variant_get_indexed)(this, index, dst, &mut valid, &mut oob)
        });
        check_access(valid, oob)?;
        Ok(ret)
    }

    pub fn set_indexed(&mut self, index: i64, value: &Variant) -> HostResult<()> {
        let this = self.as_mut_ptr()?;
        let value = value.as_ptr()?;
        let (mut valid, mut oob) = (false, false);
        unsafe {
            (self.abi().variants.variant_set_indexed)(this, index, value, &mut valid, &mut oob)
        };
        check_access(valid, oob)
    }

    fn read_with(
        &self,
        read: impl FnOnce(&Abi, ConstVariantPtr, UninitVariantPtr, &mut bool) -> HostResult<()>,
    ) -> HostResult<Variant> {
        let this = self.as_ptr()?;
        let abi = self.abi();
        let mut valid = false;
        let mut handle = VariantHandle::ZEROED;
        // Nothing was constructed if the read bailed out before the entry ran.
        read(abi, this, &mut handle as UninitVariantPtr, &mut valid)?;
        // SAFETY: the entry constructed into `handle`, valid or not.
        let ret = unsafe { Self::from_owned(abi, handle) };
        check_access(valid, false)?;
        Ok(ret)
    }

    // -----------------------------------------------------------------------
    // Iteration
    // -----------------------------------------------------------------------

    /// Start iterating. `Ok(None)` when the value is not iterable; otherwise
    /// the iterator state and whether there is a first element.
    pub fn iter_init(&self) -> HostResult<Option<(Variant, bool)>> {
        let this = self.as_ptr()?;
        let abi = self.abi();
        let mut valid = false;
        let mut has_more = false;
        let state = Self::with_uninit(abi, |dst| unsafe {
            has_more = (abi.variants.variant_iter_init)(this, dst, &mut valid);
        });
        Ok(valid.then_some((state, has_more)))
    }

    /// Advance; returns whether another element exists.
    pub fn iter_next(&self, state: &mut Variant) -> HostResult<bool> {
        let this = self.as_ptr()?;
        let iter = state.as_mut_ptr()?;
        let mut valid = false;
        let more = unsafe { (self.abi().variants.variant_iter_next)(this, iter, &mut valid) };
        check_access(valid, false)?;
        Ok(more)
    }

    /// Current element. Fails with `TypeError::Invalid` past the end.
    pub fn iter_get(&self, state: &Variant) -> HostResult<Variant> {
        let this = self.as_ptr()?;
        let iter = state.as_mut_ptr()?;
        self.read_with(|abi, _, dst, valid| unsafe {
            (abi.variants.variant_iter_get)(this, iter, dst, valid);
            Ok(())
        })
    }

    pub fn iter(&self) -> HostResult<Option<VariantIter<'_>>> {
        Ok(self
            .iter_init()?
            .map(|(state, has_more)| VariantIter { container: self, state, has_more }))
    }

    // -----------------------------------------------------------------------
    // Hashing, truthiness, copying, text
    // -----------------------------------------------------------------------

    pub fn hash_value(&self) -> HostResult<i64> {
        let ptr = self.as_ptr()?;
        Ok(unsafe { (self.abi().variants.variant_hash)(ptr) })
    }

    /// Hash that descends at most `depth` levels into nested containers.
    pub fn recursive_hash(&self, depth: i64) -> HostResult<i64> {
        let ptr = self.as_ptr()?;
        Ok(unsafe { (self.abi().variants.variant_recursive_hash)(ptr, depth) })
    }

    /// Equality as used by hashed containers (NaN equals NaN).
    pub fn hash_compare(&self, other: &Variant) -> HostResult<bool> {
        let (a, b) = (self.as_ptr()?, other.as_ptr()?);
        Ok(unsafe { (self.abi().variants.variant_hash_compare)(a, b) })
    }

    pub fn booleanize(&self) -> HostResult<bool> {
        let ptr = self.as_ptr()?;
        Ok(unsafe { (self.abi().variants.variant_booleanize)(ptr) })
    }

    /// Copy; with `deep`, nested arrays and dictionaries are copied too.
    pub fn duplicate(&self, deep: bool) -> HostResult<Variant> {
        let ptr = self.as_ptr()?;
        let abi = self.abi();
        Ok(Self::with_uninit(abi, |dst| unsafe {
            (abi.variants.variant_duplicate)(ptr, dst, deep)
        }))
    }

    pub fn stringify(&self) -> HostResult<String> {
        let ptr = self.as_ptr()?;
        let abi = self.abi();
        let text = GString::with_uninit(abi, |dst| unsafe { (abi.variants.variant_stringify)(ptr, dst) });
        text.text()
    }

    #[inline]
    fn abi(&self) -> &'static Abi {
        self.managed.abi()
    }
}

/// Collect argument storage addresses; fails if any argument is dead.
pub(crate) fn arg_ptrs(args: &[Variant]) -> HostResult<Vec<ConstVariantPtr>> {
    args.iter().map(Variant::as_ptr).collect()
}

impl Clone for Variant {
    /// Panics if the variant was already freed.
    fn clone(&self) -> Self {
        self.try_clone()
            .unwrap_or_else(|err| panic!("cannot clone variant: {err}"))
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            Variant::evaluate(VariantOperator::Equal, self, other)
                .ok()
                .flatten()
                .map(|v| v.booleanize()),
            Some(Ok(true))
        )
    }
}

impl Hash for Variant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_value().unwrap_or(0).hash(state);
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stringify() {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<freed>"),
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get_type() {
            Ok(ty) => write!(f, "Variant({ty:?}: {self})"),
            Err(_) => f.write_str("Variant(<freed>)"),
        }
    }
}

impl Default for Variant {
    fn default() -> Self {
        Variant::nil()
    }
}

// ---------------------------------------------------------------------------
// VariantIter
// ---------------------------------------------------------------------------

/// Iterator over an iterable variant (array, dictionary keys, string, range).
pub struct VariantIter<'a> {
    container: &'a Variant,
    state: Variant,
    has_more: bool,
}

impl Iterator for VariantIter<'_> {
    type Item = Variant;

    fn next(&mut self) -> Option<Variant> {
        if !self.has_more {
            return None;
        }
        let item = self.container.iter_get(&self.state).ok()?;
        self.has_more = self.container.iter_next(&mut self.state).unwrap_or(false);
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::{Array, Dictionary};
    use crate::error::LifetimeError;
    use crate::scope::LifetimeScope;
    use crate::test_support::install;

    fn int(v: i64) -> Variant {
        v.to_variant().unwrap()
    }

    #[test]
    fn int_round_trips_and_stringifies() {
        install();
        let v = int(42);
        assert_eq!(v.get_type().unwrap(), VariantType::Int);
        assert_eq!(v.to::<i64>().unwrap(), 42);
        assert_eq!(v.stringify().unwrap(), "42");
        assert!(v.booleanize().unwrap());
        assert_eq!(v.hash_value().unwrap(), int(42).hash_value().unwrap());
        let less = Variant::evaluate(VariantOperator::Less, &v, &int(43)).unwrap().unwrap();
        assert!(less.to::<bool>().unwrap());
    }

    #[test]
    fn nil_is_default_and_falsy() {
        install();
        let v = Variant::default();
        assert!(v.is_nil());
        assert!(!v.booleanize().unwrap());
        assert_eq!(v.stringify().unwrap(), "<null>");
    }

    #[test]
    fn construct_default_and_converting() {
        install();
        let zero = Variant::construct(VariantType::Float, &[]).unwrap();
        assert_eq!(zero.to::<f64>().unwrap(), 0.0);
        let converted = Variant::construct(VariantType::Float, &[int(3)]).unwrap();
        assert_eq!(converted.to::<f64>().unwrap(), 3.0);
        let err = Variant::construct(VariantType::Int, &["text".to_variant().unwrap()]);
        assert_eq!(err.unwrap_err(), HostError::Construction(VariantType::Int));
    }

    #[test]
    fn arithmetic_and_comparison_operators() {
        install();
        let sum = Variant::evaluate(VariantOperator::Add, &int(40), &int(2)).unwrap().unwrap();
        assert_eq!(sum.to::<i64>().unwrap(), 42);
        let less = Variant::evaluate(VariantOperator::Less, &int(1), &int(2)).unwrap().unwrap();
        assert!(less.to::<bool>().unwrap());
        let neg = Variant::evaluate_unary(VariantOperator::Negate, &int(5)).unwrap().unwrap();
        assert_eq!(neg.to::<i64>().unwrap(), -5);
        assert_eq!(int(7), int(7));
        assert_ne!(int(7), int(8));
    }

    #[test]
    fn undefined_operator_yields_none() {
        install();
        let text = "a".to_variant().unwrap();
        assert!(Variant::evaluate(VariantOperator::Subtract, &text, &int(1)).unwrap().is_none());
        assert!(Variant::evaluate(VariantOperator::Divide, &int(1), &int(0)).unwrap().is_none());
    }

    #[test]
    fn in_operator_checks_containment() {
        install();
        let array = Array::from_variants(&[int(10), int(20)]).unwrap().to_variant().unwrap();
        let hit = Variant::evaluate(VariantOperator::In, &int(20), &array).unwrap().unwrap();
        assert!(hit.to::<bool>().unwrap());
    }

    #[test]
    fn array_iteration_is_ordered_then_exhausted() {
        install();
        let array = Array::from_variants(&[int(10), int(20), int(30)]).unwrap().to_variant().unwrap();
        let items: Vec<i64> = array.iter().unwrap().unwrap().map(|v| v.to::<i64>().unwrap()).collect();
        assert_eq!(items, vec![10, 20, 30]);

        let (mut state, mut more) = array.iter_init().unwrap().unwrap();
        let mut steps = 0;
        while more {
            array.iter_get(&state).unwrap();
            more = array.iter_next(&mut state).unwrap();
            steps += 1;
        }
        assert_eq!(steps, 3);
        assert_eq!(array.iter_get(&state).unwrap_err(), HostError::Type(TypeError::Invalid));
    }

    #[test]
    fn non_iterable_value_has_no_iterator() {
        install();
        assert!(true.to_variant().unwrap().iter().unwrap().is_none());
    }

    #[test]
    fn indexed_access_distinguishes_out_of_bounds() {
        install();
        let mut array = Array::from_variants(&[int(1)]).unwrap().to_variant().unwrap();
        assert_eq!(array.get_indexed(0).unwrap().to::<i64>().unwrap(), 1);
        array.set_indexed(0, &int(5)).unwrap();
        assert_eq!(array.get_indexed(0).unwrap().to::<i64>().unwrap(), 5);
        assert_eq!(array.get_indexed(3).unwrap_err(), HostError::Type(TypeError::OutOfBounds));
        assert_eq!(int(3).get_indexed(0).unwrap_err(), HostError::Type(TypeError::Invalid));
    }

    #[test]
    fn keyed_and_named_access_on_dictionary() {
        install();
        let mut dict = Dictionary::new().to_variant().unwrap();
        dict.set_keyed(&"a".to_variant().unwrap(), &int(1)).unwrap();
        dict.set_named("b", &int(2)).unwrap();
        assert_eq!(dict.get_keyed(&"b".to_variant().unwrap()).unwrap().to::<i64>().unwrap(), 2);
        assert_eq!(dict.get_named("a").unwrap().to::<i64>().unwrap(), 1);
        assert!(dict.has_key(&"a".to_variant().unwrap()).unwrap());
        assert_eq!(dict.get_keyed(&"zzz".to_variant().unwrap()).unwrap_err(), HostError::Type(TypeError::Invalid));
        assert_eq!(dict.stringify().unwrap(), r#"{ "a": 1, "b": 2 }"#);
    }

    #[test]
    fn keyed_write_is_visible_to_keyed_read() {
        install();
        let mut dict = Dictionary::new().to_variant().unwrap();
        let key = "c".to_variant().unwrap();
        dict.set_keyed(&key, &int(3)).unwrap();
        assert_eq!(dict.get_keyed(&key).unwrap().to::<i64>().unwrap(), 3);
        assert_eq!(dict.get_keyed(&"c".to_variant().unwrap()).unwrap(), int(3));
    }

    #[test]
    fn read_with_dead_key_constructs_nothing() {
        install();
        let dict = Dictionary::new().to_variant().unwrap();
        let key = "gone".to_variant().unwrap();
        key.end().unwrap();
        let before = tether_test_host::unconstructed_variant_destroys();
        let err = dict.get_keyed(&key).unwrap_err();
        assert_eq!(err, HostError::Lifetime(LifetimeError::UseAfterFree));
        assert_eq!(dict.get(&key).unwrap_err(), err);
        assert_eq!(tether_test_host::unconstructed_variant_destroys(), before);
    }

    #[test]
    fn vector_members_are_named() {
        install();
        let v = crate::math::Vector2::new(1.5, -2.0).to_variant().unwrap();
        assert!(Variant::has_member(VariantType::Vector2, "x"));
        assert!(!Variant::has_member(VariantType::Vector2, "z"));
        assert_eq!(v.get_named("y").unwrap().to::<f64>().unwrap(), -2.0);
    }

    #[test]
    fn equal_values_hash_equal() {
        install();
        let a = "same".to_variant().unwrap();
        let b = "same".to_variant().unwrap();
        assert!(a.hash_compare(&b).unwrap());
        assert_eq!(a.hash_value().unwrap(), b.hash_value().unwrap());
        let x = Array::from_variants(&[int(1), int(2)]).unwrap().to_variant().unwrap();
        let y = Array::from_variants(&[int(1), int(2)]).unwrap().to_variant().unwrap();
        assert_eq!(x, y);
        assert_eq!(x.recursive_hash(4).unwrap(), y.recursive_hash(4).unwrap());
    }

    #[test]
    fn duplicate_shallow_shares_nested_deep_copies() {
        install();
        let inner = Array::from_variants(&[int(1)]).unwrap();
        let outer = Array::from_variants(&[inner.to_variant().unwrap()]).unwrap().to_variant().unwrap();
        let shallow = outer.duplicate(false).unwrap();
        let deep = outer.duplicate(true).unwrap();
        inner.push(&int(2)).unwrap();
        assert_eq!(shallow.get_indexed(0).unwrap().stringify().unwrap(), "[1, 2]");
        assert_eq!(deep.get_indexed(0).unwrap().stringify().unwrap(), "[1]");
    }

    #[test]
    fn dynamic_calls_map_call_errors() {
        install();
        let text = "hello".to_variant().unwrap();
        assert_eq!(text.call("length", &[]).unwrap().to::<i64>().unwrap(), 5);
        assert!(text.has_method("to_upper").unwrap());
        let err = text.call("no_such_method", &[]).unwrap_err();
        assert!(matches!(err, HostError::Call(e) if e.error == tether_ffi::CallErrorKind::InvalidMethod));
        let err = text.call("begins_with", &[]).unwrap_err();
        assert!(matches!(err, HostError::Call(e) if e.error == tether_ffi::CallErrorKind::TooFewArguments));
        let num = Variant::call_static(VariantType::String, "num_int64", &[int(7)]).unwrap();
        assert_eq!(num.to::<String>().unwrap(), "7");
    }

    #[test]
    fn type_names_and_conversion_rules() {
        install();
        assert_eq!(Variant::type_name(VariantType::Int), "int");
        assert_eq!(Variant::type_name(VariantType::Aabb), "AABB");
        assert!(Variant::can_convert(VariantType::Int, VariantType::Float));
        assert!(Variant::can_convert_strict(VariantType::Int, VariantType::Float));
        assert!(!Variant::can_convert_strict(VariantType::String, VariantType::Int));
    }

    #[test]
    fn variant_freed_by_scope_reports_use_after_free() {
        install();
        let scope = LifetimeScope::new();
        let escaped = int(1);
        scope.end();
        assert_eq!(escaped.get_type().unwrap_err(), HostError::Lifetime(LifetimeError::UseAfterFree));
        assert_eq!(escaped.free().unwrap_err(), HostError::Lifetime(LifetimeError::AlreadyEnded));
    }
}
