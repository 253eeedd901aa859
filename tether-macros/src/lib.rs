// tether-macros: #[hostclass] and #[hostclass_impl].

mod attrs;
mod class;
mod class_impl;

/// Attribute macro defining a Rust struct as an engine class.
///
/// # Example
/// ```ignore
/// #[hostclass(parent = Node)]
/// pub struct Player {
///     #[base]
///     base: ObjRef<Player>,
///
///     #[export(default = 100, hint = PROPERTY_HINT_RANGE, hint_string = "0,100")]
///     health: i64,
///
///     // Rust-only field, initialized with Default
///     cooldown: f64,
/// }
/// ```
///
/// Class arguments: `parent = Type` (required), `name = "EngineName"`,
/// `Abstract`, `Virtual`, `Hidden`, `to_string = method`,
/// `notification = method`.
#[proc_macro_attribute]
pub fn hostclass(attr: proc_macro::TokenStream, item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    match class::expand_hostclass(attr.into(), item.into()) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Attribute macro for an impl block on a `#[hostclass]` struct.
///
/// # Example
/// ```ignore
/// #[hostclass_impl]
/// impl Player {
///     #[func(defaults = (10))]
///     fn take_damage(&mut self, amount: i64) -> bool {
///         self.health = (self.health - amount).max(0);
///         self.health == 0
///     }
///
///     #[func(Override)]
///     fn _process(&mut self, delta: f64) { self.cooldown -= delta; }
///
///     #[signal]
///     fn died(score: i64) {}
///
///     #[constant]
///     const MAX_HEALTH: i64 = 100;
///
///     fn helper(&self) -> i64 { self.health * 2 }  // plain Rust method
/// }
/// ```
#[proc_macro_attribute]
pub fn hostclass_impl(attr: proc_macro::TokenStream, item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    match class_impl::expand_hostclass_impl(attr.into(), item.into()) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
