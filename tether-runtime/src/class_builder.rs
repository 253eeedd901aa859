// Class descriptors: everything a user class exposes to the engine,
// collected through a typed builder and stored type-erased for the registry.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use tether_ffi::{
    CallError, CallErrorKind, ConstTypePtr, InstanceId, ObjectHandle, TypePtr, METHOD_FLAG_CONST,
    METHOD_FLAG_NORMAL, METHOD_FLAG_STATIC, PROPERTY_HINT_NONE, PROPERTY_USAGE_DEFAULT,
};

use crate::class_registry::InstanceStorage;
use crate::convert::{Marshal, ToVariant, VariantRepr};
use crate::error::{HostError, HostResult};
use crate::object::{EngineClass, HasParent, ObjRef};
use crate::signature::{ArgList, ParamSpec};
use crate::variant::Variant;

/// A Rust type registered as an engine class.
///
/// The engine constructs the native base object; `create` builds the Rust
/// data attached to it. `Parent` is the class being extended, engine or user.
pub trait HostClass: HasParent + Sized {
    fn create(base: ObjRef<Self>) -> Self;

    /// Custom text for `str()` and printing; `None` keeps the engine's.
    fn to_text(&self) -> Option<String> {
        None
    }

    fn on_notification(&mut self, _what: i32) {}

    /// Methods, properties and the rest. Generated by `#[hostclass]`.
    fn describe(class: ClassBuilder<Self>) -> ClassBuilder<Self> {
        class
    }
}

pub(crate) type PtrInvoker =
    Box<dyn Fn(Option<&InstanceStorage>, *const ConstTypePtr, TypePtr) -> HostResult<()> + Send + Sync>;
pub(crate) type VarInvoker =
    Box<dyn Fn(Option<&InstanceStorage>, &[Variant]) -> HostResult<Variant> + Send + Sync>;
pub(crate) type Factory = fn(ObjectHandle, InstanceId) -> Box<dyn Any>;
pub(crate) type TextFn = fn(&dyn Any) -> Option<String>;
pub(crate) type NotifyFn = fn(&mut dyn Any, i32);

/// Produces a default argument value at registration time.
pub type DefaultArg = Arc<dyn Fn() -> HostResult<Variant> + Send + Sync>;

pub fn default_arg<V: ToVariant + Send + Sync + 'static>(value: V) -> DefaultArg {
    Arc::new(move || value.to_variant())
}

pub(crate) struct MethodDescriptor {
    pub(crate) name: &'static str,
    pub(crate) flags: u32,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) arg_names: Vec<&'static str>,
    pub(crate) ret: Option<ParamSpec>,
    pub(crate) defaults: Vec<DefaultArg>,
    pub(crate) ptrcall: PtrInvoker,
    pub(crate) varcall: VarInvoker,
}

pub(crate) struct VirtualDescriptor {
    pub(crate) name: &'static str,
    pub(crate) ret: Option<ParamSpec>,
    pub(crate) call: PtrInvoker,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PropertyDescriptor {
    pub(crate) name: &'static str,
    pub(crate) spec: ParamSpec,
    pub(crate) hint: u32,
    pub(crate) hint_string: &'static str,
    pub(crate) usage: u32,
    pub(crate) setter: &'static str,
    pub(crate) getter: &'static str,
    pub(crate) index: Option<i64>,
}

/// Properties and the inspector headers between them, in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PropertyEntry {
    Group { name: &'static str, prefix: &'static str },
    Subgroup { name: &'static str, prefix: &'static str },
    Property(PropertyDescriptor),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ConstantDescriptor {
    pub(crate) enum_name: &'static str,
    pub(crate) name: &'static str,
    pub(crate) value: i64,
    pub(crate) bitfield: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SignalDescriptor {
    pub(crate) name: &'static str,
    pub(crate) params: Vec<(&'static str, ParamSpec)>,
}

/// Type-erased description of one user class, ready to register.
pub struct ClassDescriptor {
    pub(crate) name: &'static str,
    pub(crate) parent: &'static str,
    pub(crate) is_virtual: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_exposed: bool,
    pub(crate) factory: Factory,
    pub(crate) to_text: TextFn,
    pub(crate) notification: NotifyFn,
    pub(crate) methods: Vec<MethodDescriptor>,
    pub(crate) virtuals: Vec<VirtualDescriptor>,
    pub(crate) properties: Vec<PropertyEntry>,
    pub(crate) constants: Vec<ConstantDescriptor>,
    pub(crate) signals: Vec<SignalDescriptor>,
}

impl ClassDescriptor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> &'static str {
        self.parent
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|m| m.name).collect()
    }

    pub fn virtual_names(&self) -> Vec<&'static str> {
        self.virtuals.iter().map(|v| v.name).collect()
    }
}

fn create_erased<T: HostClass>(handle: ObjectHandle, id: InstanceId) -> Box<dyn Any> {
    // SAFETY: the registry only calls this for objects it just constructed
    // as the native base of `T`.
    Box::new(T::create(unsafe { ObjRef::from_raw_parts(handle, id) }))
}

fn text_erased<T: HostClass>(data: &dyn Any) -> Option<String> {
    data.downcast_ref::<T>().and_then(T::to_text)
}

fn notify_erased<T: HostClass>(data: &mut dyn Any, what: i32) {
    if let Some(this) = data.downcast_mut::<T>() {
        this.on_notification(what);
    }
}

fn receiver(recv: Option<&InstanceStorage>) -> HostResult<&InstanceStorage> {
    recv.ok_or(HostError::Call(CallError {
        error: CallErrorKind::InstanceIsNull,
        argument: 0,
        expected: 0,
    }))
}

/// Typed front end for a [`ClassDescriptor`].
///
/// Member modifiers (`arg_names`, `default_args`, `hint`, `usage`) apply to
/// the most recently added method or property.
pub struct ClassBuilder<T: HostClass> {
    desc: ClassDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: HostClass> Default for ClassBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: HostClass> ClassBuilder<T> {
    pub fn new() -> Self {
        ClassBuilder {
            desc: ClassDescriptor {
                name: T::CLASS_NAME,
                parent: <T::Parent as EngineClass>::CLASS_NAME,
                is_virtual: false,
                is_abstract: false,
                is_exposed: true,
                factory: create_erased::<T>,
                to_text: text_erased::<T>,
                notification: notify_erased::<T>,
                methods: Vec::new(),
                virtuals: Vec::new(),
                properties: Vec::new(),
                constants: Vec::new(),
                signals: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    /// Continue a descriptor started elsewhere (a separate impl block).
    pub fn extend(desc: ClassDescriptor) -> Self {
        ClassBuilder { desc, _marker: PhantomData }
    }

    /// Builder with `T::describe` applied.
    pub fn described() -> Self {
        T::describe(Self::new())
    }

    pub fn build(self) -> ClassDescriptor {
        self.desc
    }

    pub fn abstract_class(mut self) -> Self {
        self.desc.is_abstract = true;
        self
    }

    /// Scripts may extend it and override its virtuals.
    pub fn virtual_class(mut self) -> Self {
        self.desc.is_virtual = true;
        self
    }

    /// Registered, but hidden from the editor's class lists.
    pub fn hidden(mut self) -> Self {
        self.desc.is_exposed = false;
        self
    }

    // -- methods --------------------------------------------------------

    fn push_method<A, R, C>(mut self, name: &'static str, flags: u32, call: C) -> Self
    where
        A: ArgList + 'static,
        R: Marshal + 'static,
        C: Fn(Option<&InstanceStorage>, A) -> HostResult<R> + Send + Sync + 'static,
    {
        let call = Arc::new(call);
        let by_ptr = Arc::clone(&call);
        let ptrcall: PtrInvoker = Box::new(
            move |recv: Option<&InstanceStorage>, args: *const ConstTypePtr, ret: TypePtr| {
                let args = unsafe { A::lift_ptr(args)? };
                let out = by_ptr(recv, args)?;
                unsafe { out.write_return(ret) }
            },
        );
        let varcall: VarInvoker = Box::new(move |recv: Option<&InstanceStorage>, args: &[Variant]| {
            let args = A::lift_variants(args).map_err(HostError::Call)?;
            call(recv, args)?.to_variant()
        });
        self.desc.methods.push(MethodDescriptor {
            name,
            flags,
            params: A::param_specs(),
            arg_names: Vec::new(),
            ret: (!R::IS_VOID).then(ParamSpec::of::<R>),
            defaults: Vec::new(),
            ptrcall,
            varcall,
        });
        self
    }

    /// Method that reads the instance.
    pub fn method<A, R, F>(self, name: &'static str, f: F) -> Self
    where
        A: ArgList + 'static,
        R: Marshal + 'static,
        F: Fn(&T, A) -> R + Send + Sync + 'static,
    {
        self.push_method(name, METHOD_FLAG_NORMAL | METHOD_FLAG_CONST, move |recv, args| {
            receiver(recv)?.with_ref(|this: &T| f(this, args))
        })
    }

    pub fn method_mut<A, R, F>(self, name: &'static str, f: F) -> Self
    where
        A: ArgList + 'static,
        R: Marshal + 'static,
        F: Fn(&mut T, A) -> R + Send + Sync + 'static,
    {
        self.push_method(name, METHOD_FLAG_NORMAL, move |recv, args| {
            receiver(recv)?.with_mut(|this: &mut T| f(this, args))
        })
    }

    /// Method without a receiver; callable on the class itself.
    pub fn static_method<A, R, F>(self, name: &'static str, f: F) -> Self
    where
        A: ArgList + 'static,
        R: Marshal + 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.push_method(name, METHOD_FLAG_NORMAL | METHOD_FLAG_STATIC, move |_, args| Ok(f(args)))
    }

    pub fn arg_names(mut self, names: &[&'static str]) -> Self {
        if let Some(method) = self.desc.methods.last_mut() {
            method.arg_names = names.to_vec();
        }
        self
    }

    /// Defaults for the trailing arguments, in order.
    pub fn default_args(mut self, defaults: Vec<DefaultArg>) -> Self {
        if let Some(method) = self.desc.methods.last_mut() {
            method.defaults = defaults;
        }
        self
    }

    /// Override of an engine virtual such as `_ready` or `_process`.
    pub fn virtual_method<A, R, F>(mut self, name: &'static str, f: F) -> Self
    where
        A: ArgList + 'static,
        R: Marshal + 'static,
        F: Fn(&mut T, A) -> R + Send + Sync + 'static,
    {
        let call: PtrInvoker = Box::new(
            move |recv: Option<&InstanceStorage>, args: *const ConstTypePtr, ret: TypePtr| {
                let args = unsafe { A::lift_ptr(args)? };
                let out = receiver(recv)?.with_mut(|this: &mut T| f(this, args))?;
                unsafe { out.write_return(ret) }
            },
        );
        let ret = (!R::IS_VOID).then(ParamSpec::of::<R>);
        self.desc.virtuals.push(VirtualDescriptor { name, ret, call });
        self
    }

    // -- properties -----------------------------------------------------

    fn push_property<V: VariantRepr>(
        mut self,
        name: &'static str,
        setter: &'static str,
        getter: &'static str,
        index: Option<i64>,
    ) -> Self {
        self.desc.properties.push(PropertyEntry::Property(PropertyDescriptor {
            name,
            spec: ParamSpec::of::<V>(),
            hint: PROPERTY_HINT_NONE,
            hint_string: "",
            usage: PROPERTY_USAGE_DEFAULT,
            setter,
            getter,
            index,
        }));
        self
    }

    /// Property backed by registered accessor methods. An empty setter makes
    /// it read-only.
    pub fn property<V: VariantRepr>(self, name: &'static str, setter: &'static str, getter: &'static str) -> Self {
        self.push_property::<V>(name, setter, getter, None)
    }

    /// Property whose accessors take `index` as their first argument.
    pub fn indexed_property<V: VariantRepr>(
        self,
        name: &'static str,
        setter: &'static str,
        getter: &'static str,
        index: i64,
    ) -> Self {
        self.push_property::<V>(name, setter, getter, Some(index))
    }

    fn last_property(&mut self) -> Option<&mut PropertyDescriptor> {
        self.desc.properties.iter_mut().rev().find_map(|entry| match entry {
            PropertyEntry::Property(p) => Some(p),
            _ => None,
        })
    }

    /// One of the `PROPERTY_HINT_*` constants plus its hint string.
    pub fn hint(mut self, hint: u32, hint_string: &'static str) -> Self {
        if let Some(property) = self.last_property() {
            property.hint = hint;
            property.hint_string = hint_string;
        }
        self
    }

    pub fn usage(mut self, usage: u32) -> Self {
        if let Some(property) = self.last_property() {
            property.usage = usage;
        }
        self
    }

    /// Inspector group for the properties that follow.
    pub fn group(mut self, name: &'static str, prefix: &'static str) -> Self {
        self.desc.properties.push(PropertyEntry::Group { name, prefix });
        self
    }

    pub fn subgroup(mut self, name: &'static str, prefix: &'static str) -> Self {
        self.desc.properties.push(PropertyEntry::Subgroup { name, prefix });
        self
    }

    // -- constants and signals ------------------------------------------

    pub fn constant(self, name: &'static str, value: i64) -> Self {
        self.enum_constant("", name, value)
    }

    pub fn enum_constant(mut self, enum_name: &'static str, name: &'static str, value: i64) -> Self {
        self.desc.constants.push(ConstantDescriptor { enum_name, name, value, bitfield: false });
        self
    }

    pub fn bitfield_flag(mut self, enum_name: &'static str, name: &'static str, value: i64) -> Self {
        self.desc.constants.push(ConstantDescriptor { enum_name, name, value, bitfield: true });
        self
    }

    /// Signal with parameters typed by `A`. Missing names become `argN`.
    pub fn signal<A: ArgList>(mut self, name: &'static str, arg_names: &[&'static str]) -> Self {
        let params = A::param_specs()
            .into_iter()
            .enumerate()
            .map(|(i, spec)| (arg_names.get(i).copied().unwrap_or(""), spec))
            .collect();
        self.desc.signals.push(SignalDescriptor { name, params });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::NodeClass;
    use tether_ffi::{VariantType, PROPERTY_HINT_RANGE};

    struct Probe {
        hits: i64,
    }

    impl EngineClass for Probe {
        const CLASS_NAME: &'static str = "BuilderProbe";
    }

    impl HasParent for Probe {
        type Parent = NodeClass;
    }

    impl HostClass for Probe {
        fn create(_base: ObjRef<Self>) -> Self {
            Probe { hits: 0 }
        }

        fn to_text(&self) -> Option<String> {
            Some(format!("Probe({})", self.hits))
        }
    }

    #[test]
    fn builder_collects_members_in_order() {
        let desc = ClassBuilder::<Probe>::new()
            .method("hits", |this: &Probe, (): ()| this.hits)
            .method_mut("hit", |this: &mut Probe, (n,): (i64,)| this.hits += n)
            .arg_names(&["amount"])
            .default_args(vec![default_arg(1i64)])
            .static_method("double", |(n,): (i64,)| n * 2)
            .virtual_method("_process", |this: &mut Probe, (_delta,): (f64,)| this.hits += 1)
            .group("Stats", "stat_")
            .property::<i64>("stat_hits", "", "hits")
            .hint(PROPERTY_HINT_RANGE, "0,100")
            .constant("MAX_HITS", 100)
            .signal::<(i64,)>("hit_taken", &["amount"])
            .build();

        assert_eq!(desc.name(), "BuilderProbe");
        assert_eq!(desc.parent(), "Node");
        assert_eq!(desc.method_names(), ["hits", "hit", "double"]);
        assert_eq!(desc.virtual_names(), ["_process"]);

        let hits = &desc.methods[0];
        assert_eq!(hits.flags, METHOD_FLAG_NORMAL | METHOD_FLAG_CONST);
        assert_eq!(hits.ret.map(|r| r.ty), Some(VariantType::Int));
        let hit = &desc.methods[1];
        assert!(hit.ret.is_none());
        assert_eq!(hit.arg_names, ["amount"]);
        assert_eq!(hit.defaults.len(), 1);
        assert_eq!(desc.methods[2].flags & METHOD_FLAG_STATIC, METHOD_FLAG_STATIC);

        assert_eq!(desc.properties.len(), 2);
        match &desc.properties[1] {
            PropertyEntry::Property(p) => {
                assert_eq!(p.hint, PROPERTY_HINT_RANGE);
                assert_eq!(p.getter, "hits");
                assert!(p.setter.is_empty());
            }
            other => panic!("expected a property, got {other:?}"),
        }
        assert_eq!(desc.constants[0].value, 100);
        assert_eq!(desc.signals[0].params[0].0, "amount");
    }

    #[test]
    fn erased_hooks_reach_the_typed_instance() {
        let desc = ClassBuilder::<Probe>::new().build();
        let mut data: Box<dyn Any> = Box::new(Probe { hits: 3 });
        assert_eq!((desc.to_text)(&*data).as_deref(), Some("Probe(3)"));
        (desc.notification)(&mut *data, 10);
        assert_eq!((desc.to_text)(&String::new()), None);
    }

    #[test]
    fn static_methods_need_no_receiver() {
        crate::test_support::install();
        let desc = ClassBuilder::<Probe>::new()
            .static_method("double", |(n,): (i64,)| n * 2)
            .method("hits", |this: &Probe, (): ()| this.hits)
            .build();
        let arg = 21i64.to_variant().unwrap();
        let out = (desc.methods[0].varcall)(None, &[arg]).unwrap();
        assert_eq!(out.to::<i64>().unwrap(), 42);
        let err = (desc.methods[1].varcall)(None, &[]).unwrap_err();
        assert!(matches!(err, HostError::Call(CallError { error: CallErrorKind::InstanceIsNull, .. })));
    }
}
